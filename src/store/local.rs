//! Local schema store
//!
//! Append-only, Git-backed storage on the local filesystem.
//!
//! ```text
//! <root>/
//! ├── store.json                  next sequential id
//! └── subjects/
//!     └── UserSignupEvent/
//!         ├── 1.avsc
//!         ├── 4.avsc
//!         └── checksums.sha256
//! ```
//!
//! Every registration is one commit, tagged `{subject}/{id}`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::{Commit, IndexAddOption, Oid, Repository, Signature};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checksum::Checksum;
use crate::error::{ForgeError, Result};
use crate::schema::SchemaBody;
use crate::version::SequentialId;

use super::SchemaStore;

const STORE_FILE: &str = "store.json";
const CHECKSUMS_FILE: &str = "checksums.sha256";
const DEFAULT_AUTHOR: &str = "Schema Registry";
const AUTHOR_EMAIL: &str = "schemas@schemaforge.dev";

#[derive(Debug, Serialize, Deserialize)]
struct StoreState {
    next_id: u32,
}

impl Default for StoreState {
    fn default() -> Self {
        Self { next_id: 1 }
    }
}

/// Git-backed store rooted at a directory
pub struct LocalSchemaStore {
    root: PathBuf,
    repo: Repository,
    state: StoreState,
    author: String,
}

impl LocalSchemaStore {
    /// Open an existing store or create a new one
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(root.join("subjects"))?;

        let repo = match Repository::open(&root) {
            Ok(repo) => repo,
            Err(_) => Repository::init(&root)?,
        };

        let state_path = root.join(STORE_FILE);
        let state = if state_path.exists() {
            serde_json::from_str(&fs::read_to_string(&state_path)?)?
        } else {
            StoreState::default()
        };

        Ok(Self {
            root,
            repo,
            state,
            author: DEFAULT_AUTHOR.to_string(),
        })
    }

    /// Author recorded on registration commits
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn subject_dir(&self, subject: &str) -> PathBuf {
        self.root.join("subjects").join(subject)
    }

    fn body_path(&self, subject: &str, id: SequentialId) -> PathBuf {
        self.subject_dir(subject).join(format!("{}.avsc", id))
    }

    fn read_checksums(&self, subject: &str) -> Result<BTreeMap<String, Checksum>> {
        let path = self.subject_dir(subject).join(CHECKSUMS_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(content
            .lines()
            .filter_map(|line| {
                let (sum, file) = line.split_once("  ")?;
                Some((file.to_string(), Checksum::from(sum.to_string())))
            })
            .collect())
    }

    fn write_atomic(path: &Path, content: &str) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Create a Git commit covering the store contents
    fn git_commit(&self, summary: &str) -> Result<Oid> {
        let mut index = self.repo.index()?;
        index.add_all(["subjects", STORE_FILE].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let oid = index.write_tree()?;
        let tree = self.repo.find_tree(oid)?;
        let sig = Signature::now(&self.author, AUTHOR_EMAIL)?;

        let parent_commit = self.get_head_commit();
        let parents: Vec<&Commit> = parent_commit.iter().collect();

        Ok(self
            .repo
            .commit(Some("HEAD"), &sig, &sig, summary, &tree, &parents)?)
    }

    fn git_tag(&self, tag_name: &str) -> Result<()> {
        let obj = self.repo.revparse_single("HEAD")?;
        let sig = Signature::now(&self.author, AUTHOR_EMAIL)?;
        self.repo
            .tag(tag_name, &obj, &sig, &format!("Register {}", tag_name), false)?;
        Ok(())
    }

    fn get_head_commit(&self) -> Option<Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }
}

impl SchemaStore for LocalSchemaStore {
    fn register(&mut self, subject: &str, body: &SchemaBody) -> Result<SequentialId> {
        let id = SequentialId(self.state.next_id);
        let dir = self.subject_dir(subject);
        let new_subject = !dir.is_dir();
        fs::create_dir_all(&dir)?;

        let body_path = self.body_path(subject, id);
        if body_path.exists() {
            return Err(ForgeError::ImmutabilityViolation {
                subject: subject.to_string(),
                id: id.get(),
            });
        }

        let checksums_path = dir.join(CHECKSUMS_FILE);
        let state_path = self.root.join(STORE_FILE);
        let previous_checksums = fs::read_to_string(&checksums_path).ok();
        let previous_state = fs::read_to_string(&state_path).ok();

        let written = (|| -> Result<()> {
            Self::write_atomic(&body_path, &body.pretty_json()?)?;

            let mut checksums = previous_checksums.clone().unwrap_or_default();
            if !checksums.is_empty() && !checksums.ends_with('\n') {
                checksums.push('\n');
            }
            checksums.push_str(&format!("{}  {}.avsc\n", body.checksum(), id));
            Self::write_atomic(&checksums_path, &checksums)?;

            let next = StoreState { next_id: id.get() + 1 };
            Self::write_atomic(&state_path, &serde_json::to_string_pretty(&next)?)?;

            self.git_commit(&format!("Register {} id {}", subject, id))?;
            self.git_tag(&format!("{}/{}", subject, id))
        })();

        if let Err(e) = written {
            // Leave nothing visible from the failed attempt
            let _ = fs::remove_file(&body_path);
            match previous_checksums {
                Some(content) => {
                    let _ = fs::write(&checksums_path, content);
                }
                None => {
                    let _ = fs::remove_file(&checksums_path);
                }
            }
            if let Some(content) = previous_state {
                let _ = fs::write(&state_path, content);
            }
            if new_subject {
                let _ = fs::remove_dir_all(&dir);
            }
            return Err(e);
        }

        self.state.next_id = id.get() + 1;
        info!(subject, %id, "Stored schema body");
        Ok(id)
    }

    fn fetch(&self, subject: &str, id: SequentialId) -> Result<SchemaBody> {
        if !self.subject_dir(subject).is_dir() {
            return Err(ForgeError::SubjectNotFound(subject.to_string()));
        }
        let path = self.body_path(subject, id);
        if !path.exists() {
            return Err(ForgeError::VersionNotFound {
                subject: subject.to_string(),
                version: format!("id {}", id),
            });
        }

        let content = fs::read_to_string(&path)?;
        let body = SchemaBody::parse(&content)?;

        let file_name = format!("{}.avsc", id);
        if let Some(expected) = self.read_checksums(subject)?.get(&file_name) {
            let actual = body.checksum();
            if *expected != actual {
                return Err(ForgeError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        debug!(subject, %id, "Fetched schema body");
        Ok(body)
    }

    fn list(&self, subject: &str) -> Result<Vec<SequentialId>> {
        let dir = self.subject_dir(subject);
        if !dir.is_dir() {
            return Err(ForgeError::SubjectNotFound(subject.to_string()));
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("avsc") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                ids.push(SequentialId(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn subjects(&self) -> Result<Vec<String>> {
        let mut subjects = Vec::new();
        for entry in fs::read_dir(self.root.join("subjects"))? {
            let entry = entry?;
            if entry.path().is_dir() {
                subjects.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        subjects.sort();
        Ok(subjects)
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn body(extra_field: Option<&str>) -> SchemaBody {
        let mut fields = vec![json!({ "name": "userId", "type": "string" })];
        if let Some(name) = extra_field {
            fields.push(json!({ "name": name, "type": "string", "default": "" }));
        }
        SchemaBody::from_value(json!({
            "type": "record",
            "name": "UserSignupEvent",
            "fields": fields
        }))
        .unwrap()
    }

    #[test]
    fn test_register_and_fetch() {
        let dir = tempdir().unwrap();
        let mut store = LocalSchemaStore::open(dir.path()).unwrap();

        let id = store.register("UserSignupEvent", &body(None)).unwrap();
        assert_eq!(id, SequentialId(1));
        assert_eq!(store.fetch("UserSignupEvent", id).unwrap(), body(None));
        assert_eq!(store.list("UserSignupEvent").unwrap(), vec![id]);
        assert_eq!(store.subjects().unwrap(), vec!["UserSignupEvent"]);
    }

    #[test]
    fn test_counter_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = LocalSchemaStore::open(dir.path()).unwrap();
            store.register("UserSignupEvent", &body(None)).unwrap();
        }
        let mut store = LocalSchemaStore::open(dir.path()).unwrap();
        let id = store.register("UserSignupEvent", &body(Some("source"))).unwrap();
        assert_eq!(id, SequentialId(2));
        assert_eq!(
            store.list("UserSignupEvent").unwrap(),
            vec![SequentialId(1), SequentialId(2)]
        );
    }

    #[test]
    fn test_each_registration_is_tagged() {
        let dir = tempdir().unwrap();
        let mut store = LocalSchemaStore::open(dir.path()).unwrap();
        store.register("UserSignupEvent", &body(None)).unwrap();
        store.register("UserSignupEvent", &body(Some("source"))).unwrap();

        let tags = store.repo.tag_names(None).unwrap();
        let names: Vec<_> = tags.iter().flatten().collect();
        assert!(names.contains(&"UserSignupEvent/1"));
        assert!(names.contains(&"UserSignupEvent/2"));
    }

    #[test]
    fn test_tampered_body_is_detected() {
        let dir = tempdir().unwrap();
        let mut store = LocalSchemaStore::open(dir.path()).unwrap();
        let id = store.register("UserSignupEvent", &body(None)).unwrap();

        let path = dir.path().join("subjects/UserSignupEvent/1.avsc");
        fs::write(&path, serde_json::to_string(body(Some("x")).definition()).unwrap()).unwrap();

        let err = store.fetch("UserSignupEvent", id).unwrap_err();
        assert!(matches!(err, ForgeError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_failed_registration_leaves_no_subject_behind() {
        let dir = tempdir().unwrap();
        let mut store = LocalSchemaStore::open(dir.path()).unwrap();
        store.register("OrderPlaced", &body(None)).unwrap();

        // A directory where the counter file goes makes the write fail
        let state_path = dir.path().join(STORE_FILE);
        fs::remove_file(&state_path).unwrap();
        fs::create_dir_all(state_path.join("blocked")).unwrap();

        assert!(store.register("UserSignupEvent", &body(None)).is_err());
        assert_eq!(store.subjects().unwrap(), vec!["OrderPlaced"]);
        assert!(matches!(
            store.list("UserSignupEvent"),
            Err(ForgeError::SubjectNotFound(_))
        ));

        // An existing subject keeps its directory and earlier versions
        assert!(store.register("OrderPlaced", &body(Some("source"))).is_err());
        assert_eq!(store.list("OrderPlaced").unwrap(), vec![SequentialId(1)]);

        fs::remove_dir_all(&state_path).unwrap();
        let id = store.register("UserSignupEvent", &body(None)).unwrap();
        assert_eq!(id, SequentialId(2));
        assert_eq!(store.subjects().unwrap(), vec!["OrderPlaced", "UserSignupEvent"]);
    }

    #[test]
    fn test_lookup_misses() {
        let dir = tempdir().unwrap();
        let mut store = LocalSchemaStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.list("Nope"),
            Err(ForgeError::SubjectNotFound(_))
        ));
        store.register("UserSignupEvent", &body(None)).unwrap();
        assert!(matches!(
            store.fetch("UserSignupEvent", SequentialId(7)),
            Err(ForgeError::VersionNotFound { .. })
        ));
    }
}
