//! Package Builder
//!
//! Assembles generated source, the runtime shim for the target language, a
//! package manifest and the registered schema into one installable directory,
//! and keeps an index of what has been built.
//!
//! ## Layout
//!
//! ```text
//! artifacts/
//! ├── index.json
//! ├── .staging/                      (in-progress builds, never indexed)
//! └── UserSignupEvent/
//!     └── 4/                         (sequential id)
//!         └── python/
//!             └── UserSignupEvent_lib/
//!                 ├── pyproject.toml
//!                 ├── schema.avsc
//!                 └── UserSignupEvent_lib/
//!                     ├── __init__.py
//!                     ├── _runtime.py
//!                     └── ...
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use include_dir::{include_dir, Dir};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::codegen::{self, Language, RuntimeDefaults, TypeNames};
use crate::error::{ForgeError, Result};
use crate::schema::validate_subject;
use crate::version::{LogicalVersion, SchemaVersion, SequentialId};

/// Runtime shims shipped inside generated packages
static SHIMS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/shims");

const INDEX_FILE: &str = "index.json";
const STAGING_DIR: &str = ".staging";
const SCHEMA_FILE: &str = "schema.avsc";

/// A built package for one (subject, sequential id, language)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    /// `{subject}-{sequential_id}-{language}`
    pub id: String,
    pub subject: String,
    pub sequential_id: SequentialId,
    pub logical_version: LogicalVersion,
    pub language: Language,
    /// Package directory name (`{Subject}Event_lib`)
    pub package: String,
    /// Package root on disk
    pub location: PathBuf,
    /// Checksum over the sorted file tree
    pub checksum: Checksum,
    /// Paths relative to `location`, sorted
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl GeneratedArtifact {
    pub fn make_id(subject: &str, id: SequentialId, language: Language) -> String {
        format!("{}-{}-{}", subject, id, language)
    }
}

/// What `clean` removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanTarget {
    Artifact(String),
    Subject(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ArtifactIndex {
    artifacts: BTreeMap<String, GeneratedArtifact>,
}

/// Builds artifacts under one output directory
pub struct PackageBuilder {
    root: PathBuf,
    index: ArtifactIndex,
    runtime: RuntimeDefaults,
}

impl PackageBuilder {
    /// Open (or create) an artifact directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            serde_json::from_str(&fs::read_to_string(&index_path)?)?
        } else {
            ArtifactIndex::default()
        };

        // Leftovers from an interrupted build
        let staging = root.join(STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        Ok(Self {
            root,
            index,
            runtime: RuntimeDefaults::default(),
        })
    }

    /// Broker defaults baked into packages built from here on
    pub fn with_runtime(mut self, runtime: RuntimeDefaults) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the package for `version` in `language`.
    ///
    /// Identical inputs produce identical trees. When the indexed artifact's
    /// tree on disk still matches, it is returned without rebuilding.
    pub fn build(&mut self, version: &SchemaVersion, language: Language) -> Result<GeneratedArtifact> {
        let names = TypeNames::for_subject(&version.subject);
        let files = assemble(version, language, &names, &self.runtime)?;
        let checksum = Checksum::from_entries(
            files.iter().map(|(path, contents)| (path.as_str(), contents.as_bytes())),
        );
        let id = GeneratedArtifact::make_id(&version.subject, version.sequential_id, language);

        if let Some(existing) = self.index.artifacts.get(&id) {
            if existing.checksum == checksum && tree_matches(&existing.location, &checksum) {
                info!(artifact = %id, "Reusing existing artifact");
                return Ok(existing.clone());
            }
            debug!(artifact = %id, "Indexed artifact is stale, rebuilding");
        }

        let location = self
            .artifact_dir(&version.subject, version.sequential_id, language)
            .join(&names.package);
        self.write_tree(&id, &location, &files)?;

        let artifact = GeneratedArtifact {
            id: id.clone(),
            subject: version.subject.clone(),
            sequential_id: version.sequential_id,
            logical_version: version.logical_version,
            language,
            package: names.package.clone(),
            location: location.clone(),
            checksum,
            files: files.keys().cloned().collect(),
            created_at: Utc::now(),
        };

        let previous = self.index.artifacts.insert(id.clone(), artifact.clone());
        if let Err(e) = self.persist() {
            match previous {
                Some(previous) => {
                    self.index.artifacts.insert(id.clone(), previous);
                }
                None => {
                    self.index.artifacts.remove(&id);
                }
            }
            let _ = fs::remove_dir_all(&location);
            return Err(e);
        }

        info!(
            artifact = %id,
            files = artifact.files.len(),
            location = %location.display(),
            "Built artifact"
        );
        Ok(artifact)
    }

    /// Indexed artifacts, optionally for one subject, ordered by subject, id, language
    pub fn list(&self, subject: Option<&str>) -> Vec<&GeneratedArtifact> {
        let mut artifacts: Vec<&GeneratedArtifact> = self
            .index
            .artifacts
            .values()
            .filter(|a| subject.map_or(true, |s| a.subject == s))
            .collect();
        artifacts.sort_by(|a, b| {
            (&a.subject, a.sequential_id, a.language).cmp(&(&b.subject, b.sequential_id, b.language))
        });
        artifacts
    }

    pub fn get(&self, id: &str) -> Option<&GeneratedArtifact> {
        self.index.artifacts.get(id)
    }

    /// Remove artifacts from the index and from disk.
    ///
    /// Cleaning something that does not exist removes nothing and succeeds.
    pub fn clean(&mut self, target: &CleanTarget) -> Result<Vec<GeneratedArtifact>> {
        if let CleanTarget::Subject(subject) = target {
            validate_subject(subject)?;
        }

        let ids: Vec<String> = match target {
            CleanTarget::Artifact(id) => self
                .index
                .artifacts
                .contains_key(id)
                .then(|| id.clone())
                .into_iter()
                .collect(),
            CleanTarget::Subject(subject) => self
                .index
                .artifacts
                .values()
                .filter(|a| &a.subject == subject)
                .map(|a| a.id.clone())
                .collect(),
        };

        if ids.is_empty() {
            debug!(?target, "Nothing to clean");
            return Ok(Vec::new());
        }

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(artifact) = self.index.artifacts.remove(&id) {
                let dir = self.artifact_dir(&artifact.subject, artifact.sequential_id, artifact.language);
                self.remove_dir(&dir)?;
                self.prune_empty_parents(&dir)?;
                info!(artifact = %id, "Cleaned artifact");
                removed.push(artifact);
            }
        }
        self.persist()?;
        Ok(removed)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn artifact_dir(&self, subject: &str, id: SequentialId, language: Language) -> PathBuf {
        self.root
            .join(subject)
            .join(id.to_string())
            .join(language.as_str())
    }

    /// Write into a staging directory, then swap it into place
    fn write_tree(&self, id: &str, location: &Path, files: &BTreeMap<String, String>) -> Result<()> {
        let staging = self.root.join(STAGING_DIR).join(id);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let staged = (|| -> Result<()> {
            for (relative, contents) in files {
                let path = staging.join(relative);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, contents)?;
            }
            Ok(())
        })();
        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if location.exists() {
            warn!(location = %location.display(), "Replacing artifact tree");
            fs::remove_dir_all(location)?;
        }
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&staging, location)?;
        Ok(())
    }

    fn remove_dir(&self, dir: &Path) -> Result<()> {
        if dir == self.root || !dir.starts_with(&self.root) {
            return Err(ForgeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("refusing to remove {} outside {}", dir.display(), self.root.display()),
            )));
        }
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn prune_empty_parents(&self, dir: &Path) -> Result<()> {
        let mut current = dir.parent();
        while let Some(parent) = current {
            if parent == self.root || !parent.starts_with(&self.root) {
                break;
            }
            let empty = match fs::read_dir(parent) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => break,
            };
            if !empty {
                break;
            }
            fs::remove_dir(parent)?;
            current = parent.parent();
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let path = self.root.join(INDEX_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.index)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Every file of the package, keyed by path relative to the package root
pub fn assemble(
    version: &SchemaVersion,
    language: Language,
    names: &TypeNames,
    runtime: &RuntimeDefaults,
) -> Result<BTreeMap<String, String>> {
    let code = codegen::generate_with(version, language, runtime)?;
    let mut files = code.files;

    let (manifest_path, manifest) = codegen::manifest(version, language);
    files.insert(manifest_path, manifest);
    files.insert(SCHEMA_FILE.to_string(), format!("{}\n", version.body.pretty_json()?));

    for (relative, contents) in shim_files(language, names)? {
        if files.insert(relative.clone(), contents).is_some() {
            return Err(ForgeError::InvalidSchema(vec![format!(
                "generated file '{}' collides with the runtime shim",
                relative
            )]));
        }
    }
    Ok(files)
}

/// Shim sources for `language`, placed where the generated code imports them
fn shim_files(language: Language, names: &TypeNames) -> Result<Vec<(String, String)>> {
    let target_dir = match language {
        Language::Python => names.package.clone(),
        Language::TypeScript => "src".to_string(),
        // Generated Rust crates depend on this crate's runtime module
        Language::Rust => return Ok(Vec::new()),
    };

    let Some(dir) = SHIMS.get_dir(language.as_str()) else {
        return Ok(Vec::new());
    };

    let mut shims = Vec::new();
    for file in dir.files() {
        let Some(name) = file.path().file_name() else {
            continue;
        };
        let contents = file.contents_utf8().ok_or_else(|| {
            ForgeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("runtime shim {} is not UTF-8", file.path().display()),
            ))
        })?;
        shims.push((
            format!("{}/{}", target_dir, name.to_string_lossy()),
            contents.to_string(),
        ));
    }
    shims.sort();
    Ok(shims)
}

fn tree_matches(location: &Path, expected: &Checksum) -> bool {
    location.is_dir()
        && Checksum::from_tree(location)
            .map(|actual| &actual == expected)
            .unwrap_or(false)
}
