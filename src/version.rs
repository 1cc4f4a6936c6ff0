//! Version resolution
//!
//! The registry only knows sequential ids. This module owns the caller-facing
//! logical versions: the Nth registration under a subject is logical version
//! N, forever. State is explicit and persisted as JSON next to the store.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checksum::Checksum;
use crate::compatibility::CompatibilityMode;
use crate::error::{ForgeError, Result};
use crate::schema::SchemaBody;

/// Registry-assigned, strictly increasing schema identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequentialId(pub u32);

impl SequentialId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SequentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-facing version label: 1, 2, 3, ... in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct LogicalVersion(u32);

impl LogicalVersion {
    pub fn new(n: u32) -> Result<Self> {
        if n == 0 {
            return Err(ForgeError::InvalidVersion(
                "logical versions start at 1".to_string(),
            ));
        }
        Ok(Self(n))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Semver used for generated package manifests (`N.0.0`)
    pub fn package_version(self) -> Version {
        Version::new(u64::from(self.0), 0, 0)
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl TryFrom<u32> for LogicalVersion {
    type Error = ForgeError;

    fn try_from(n: u32) -> Result<Self> {
        Self::new(n)
    }
}

impl From<LogicalVersion> for u32 {
    fn from(v: LogicalVersion) -> Self {
        v.0
    }
}

impl fmt::Display for LogicalVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LogicalVersion {
    type Err = ForgeError;

    /// Accepts `3`, `v3` and `3.0.0`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        if trimmed.contains('.') {
            let version = Version::parse(trimmed)?;
            if version.minor != 0 || version.patch != 0 || !version.pre.is_empty() {
                return Err(ForgeError::InvalidVersion(format!(
                    "'{}' is not a published package version (expected N.0.0)",
                    s
                )));
            }
            let major = u32::try_from(version.major)
                .map_err(|_| ForgeError::InvalidVersion(s.to_string()))?;
            return Self::new(major);
        }

        let n: u32 = trimmed
            .parse()
            .map_err(|_| ForgeError::InvalidVersion(s.to_string()))?;
        Self::new(n)
    }
}

/// Which version of a subject a caller is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Logical(LogicalVersion),
}

impl FromStr for VersionSelector {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("latest") {
            Ok(VersionSelector::Latest)
        } else {
            Ok(VersionSelector::Logical(s.parse()?))
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => write!(f, "latest"),
            VersionSelector::Logical(v) => write!(f, "{}", v),
        }
    }
}

/// One admitted registration, as remembered by the resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub logical_version: LogicalVersion,
    pub sequential_id: SequentialId,
    /// Mode in force when this version was admitted
    pub compatibility: CompatibilityMode,
    /// Checksum of the registered body
    pub checksum: Checksum,
    pub registered_at: DateTime<Utc>,
}

/// A registered schema version with its body
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaVersion {
    pub subject: String,
    pub sequential_id: SequentialId,
    pub logical_version: LogicalVersion,
    pub body: SchemaBody,
    pub compatibility: CompatibilityMode,
    pub registered_at: DateTime<Utc>,
}

impl SchemaVersion {
    pub fn from_record(subject: impl Into<String>, record: &VersionRecord, body: SchemaBody) -> Self {
        Self {
            subject: subject.into(),
            sequential_id: record.sequential_id,
            logical_version: record.logical_version,
            body,
            compatibility: record.compatibility,
            registered_at: record.registered_at,
        }
    }

    pub fn checksum(&self) -> Checksum {
        self.body.checksum()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} (id {})",
            self.subject, self.logical_version, self.sequential_id
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ResolverState {
    subjects: BTreeMap<String, Vec<VersionRecord>>,
}

/// Maps logical versions to sequential ids, append-only
pub struct VersionResolver {
    path: Option<PathBuf>,
    state: ResolverState,
}

impl VersionResolver {
    /// A resolver that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: ResolverState::default(),
        }
    }

    /// Load resolver state from `path`, starting empty when the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            ResolverState::default()
        };
        Ok(Self {
            path: Some(path),
            state,
        })
    }

    /// Record a newly admitted registration and assign its logical version.
    ///
    /// Ids must arrive in increasing order per subject; anything else would
    /// rewrite history.
    pub fn record(
        &mut self,
        subject: &str,
        sequential_id: SequentialId,
        compatibility: CompatibilityMode,
        checksum: Checksum,
    ) -> Result<VersionRecord> {
        let history = self.state.subjects.entry(subject.to_string()).or_default();
        if let Some(last) = history.last() {
            if sequential_id <= last.sequential_id {
                return Err(ForgeError::ImmutabilityViolation {
                    subject: subject.to_string(),
                    id: sequential_id.get(),
                });
            }
        }

        let logical_version = history
            .last()
            .map(|r| r.logical_version.next())
            .unwrap_or(LogicalVersion(1));
        let record = VersionRecord {
            logical_version,
            sequential_id,
            compatibility,
            checksum,
            registered_at: Utc::now(),
        };
        history.push(record.clone());

        if let Err(e) = self.persist() {
            // Roll back so memory never runs ahead of disk
            if let Some(history) = self.state.subjects.get_mut(subject) {
                history.pop();
                if history.is_empty() {
                    self.state.subjects.remove(subject);
                }
            }
            return Err(e);
        }

        debug!(subject, %sequential_id, %logical_version, "Assigned logical version");
        Ok(record)
    }

    /// Map a logical version to the registry id
    pub fn resolve(&self, subject: &str, version: LogicalVersion) -> Result<SequentialId> {
        Ok(self
            .record_for(subject, VersionSelector::Logical(version))?
            .sequential_id)
    }

    /// Find the record for a selector.
    ///
    /// An unknown subject has no versions, so it misses with `VersionNotFound` too.
    pub fn record_for(&self, subject: &str, selector: VersionSelector) -> Result<&VersionRecord> {
        let history = self
            .state
            .subjects
            .get(subject)
            .map(|h| h.as_slice())
            .unwrap_or_default();
        let found = match selector {
            VersionSelector::Latest => history.last(),
            VersionSelector::Logical(v) => history.get((v.get() - 1) as usize),
        };
        found.ok_or_else(|| ForgeError::VersionNotFound {
            subject: subject.to_string(),
            version: selector.to_string(),
        })
    }

    /// Highest assigned logical version
    pub fn latest(&self, subject: &str) -> Result<LogicalVersion> {
        Ok(self
            .record_for(subject, VersionSelector::Latest)?
            .logical_version)
    }

    /// Reverse lookup: which logical version a registry id received
    pub fn logical_for(&self, subject: &str, id: SequentialId) -> Option<LogicalVersion> {
        self.state
            .subjects
            .get(subject)?
            .iter()
            .find(|r| r.sequential_id == id)
            .map(|r| r.logical_version)
    }

    /// All records for a subject, oldest first
    pub fn history(&self, subject: &str) -> Result<&[VersionRecord]> {
        self.state
            .subjects
            .get(subject)
            .map(|h| h.as_slice())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ForgeError::SubjectNotFound(subject.to_string()))
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.state
            .subjects
            .get(subject)
            .map(|h| !h.is_empty())
            .unwrap_or(false)
    }

    /// Known subjects, sorted
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.state.subjects.keys().map(|s| s.as_str())
    }

    /// Ids present in the store but never recorded here, ascending.
    ///
    /// Only ids newer than the last recorded one qualify; older gaps cannot be
    /// given a logical version without renumbering.
    pub fn unrecorded(&self, subject: &str, store_ids: &[SequentialId]) -> Vec<SequentialId> {
        let last = self
            .state
            .subjects
            .get(subject)
            .and_then(|h| h.last())
            .map(|r| r.sequential_id);
        let mut missing: Vec<SequentialId> = store_ids
            .iter()
            .copied()
            .filter(|id| last.map_or(true, |l| *id > l))
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.state)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
