//! Schema service
//!
//! Ties the gateway, validator, resolver, generator and builder together:
//!
//! ```text
//! register → validate → store → assign logical version
//! generate → resolve version → render → build package
//! ```
//!
//! Validation always completes before the store is asked to register, so a
//! rejected body never consumes a sequential id.

use std::path::Path;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use tracing::{debug, info, warn};

use crate::codegen::Language;
use crate::compatibility::{
    render_diff, CompatibilityChecker, CompatibilityMode, CompatibilityResult, FieldChange,
};
use crate::config::{Backend, ForgeConfig, RegistryConfig};
use crate::error::{ForgeError, Result};
use crate::package::{CleanTarget, GeneratedArtifact, PackageBuilder};
use crate::schema::{validate_subject, SchemaBody};
use crate::store::{HttpSchemaStore, InMemorySchemaStore, LocalSchemaStore, SchemaStore};
use crate::version::{SchemaVersion, VersionRecord, VersionResolver, VersionSelector};

const RESOLVER_FILE: &str = "versions.json";

/// Field-level and textual difference between two registered versions
#[derive(Debug, Clone)]
pub struct VersionDiff {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    /// Changes judged under the subject's configured mode
    pub result: CompatibilityResult,
    /// Unified line diff of the two bodies
    pub text: String,
}

impl VersionDiff {
    pub fn changes(&self) -> &[FieldChange] {
        &self.result.changes
    }
}

/// Registry-side operations behind the HTTP contract and the CLI
pub struct SchemaService {
    store: Box<dyn SchemaStore>,
    resolver: VersionResolver,
    builder: PackageBuilder,
    registry: RegistryConfig,
}

impl SchemaService {
    /// Assemble a service and reconcile the resolver with the store
    pub fn new(
        store: Box<dyn SchemaStore>,
        resolver: VersionResolver,
        builder: PackageBuilder,
        registry: RegistryConfig,
    ) -> Result<Self> {
        let mut service = Self {
            store,
            resolver,
            builder,
            registry,
        };
        match service.reconcile() {
            Ok(0) => {}
            Ok(n) => warn!(recovered = n, "Recorded versions missing from resolver state"),
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Registry unreachable, skipping reconciliation")
            }
            Err(e) => return Err(e),
        }
        Ok(service)
    }

    /// Open the backends named by `config`
    pub fn from_config(config: &ForgeConfig) -> Result<Self> {
        let registry = &config.registry;
        let (store, resolver): (Box<dyn SchemaStore>, VersionResolver) = match registry.backend {
            Backend::Local => {
                let mut store = LocalSchemaStore::open(&registry.path)?;
                if let Some(author) = &registry.default_author {
                    store = store.with_author(author.clone());
                }
                let resolver = VersionResolver::open(registry.path.join(RESOLVER_FILE))?;
                (Box::new(store), resolver)
            }
            Backend::Memory => (
                Box::new(InMemorySchemaStore::new()),
                VersionResolver::in_memory(),
            ),
            Backend::Http => {
                let url = registry.url.as_deref().ok_or_else(|| {
                    ForgeError::Config("registry.url is required for the http backend".to_string())
                })?;
                let store = HttpSchemaStore::new(url, registry.timeout())?;
                let resolver = VersionResolver::open(registry.path.join(RESOLVER_FILE))?;
                (Box::new(store), resolver)
            }
        };

        let builder = PackageBuilder::open(&config.artifacts.output_dir)?
            .with_runtime(config.broker.runtime_defaults());
        info!(
            store = %store.describe(),
            artifacts = %config.artifacts.output_dir.display(),
            "Opened schema service"
        );
        Self::new(store, resolver, builder, registry.clone())
    }

    /// Volatile service over an in-memory store, building into `artifacts_dir`
    pub fn in_memory(artifacts_dir: impl AsRef<Path>) -> Result<Self> {
        Self::new(
            Box::new(InMemorySchemaStore::new()),
            VersionResolver::in_memory(),
            PackageBuilder::open(artifacts_dir)?,
            RegistryConfig::default(),
        )
    }

    /// Compatibility mode in force for `subject`
    pub fn mode_for(&self, subject: &str) -> CompatibilityMode {
        self.registry.mode_for(subject)
    }

    pub fn set_mode(&mut self, subject: &str, mode: CompatibilityMode) {
        self.registry.subjects.insert(subject.to_string(), mode);
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// First registration of a subject (`POST /schemas`).
    ///
    /// Re-submitting the body that is already registered returns that version.
    pub fn register_schema(&mut self, entity_name: &str, schema_file: &str) -> Result<SchemaVersion> {
        validate_subject(entity_name)?;
        let body = SchemaBody::parse(schema_file)?;

        if self.resolver.contains(entity_name) {
            let latest = self.resolver.record_for(entity_name, VersionSelector::Latest)?;
            if latest.checksum == body.checksum() {
                return self.get_version(entity_name, VersionSelector::Latest);
            }
            return Err(ForgeError::SubjectAlreadyExists(entity_name.to_string()));
        }
        self.admit(entity_name, body)
    }

    /// Register the next version of an existing subject (`POST /schemas/{entity_name}`)
    pub fn revise_schema(&mut self, entity_name: &str, schema_file: &str) -> Result<SchemaVersion> {
        if !self.resolver.contains(entity_name) {
            return Err(ForgeError::SubjectNotFound(entity_name.to_string()));
        }
        let body = SchemaBody::parse(schema_file)?;
        self.admit(entity_name, body)
    }

    /// Dry run: what the configured mode says about `schema_file`
    pub fn check_compatibility(&self, entity_name: &str, schema_file: &str) -> Result<CompatibilityResult> {
        validate_subject(entity_name)?;
        let body = SchemaBody::parse(schema_file)?;
        let checker = CompatibilityChecker::new(self.mode_for(entity_name));
        let history = self.history_bodies(entity_name, checker.mode())?;
        Ok(checker.check_history(&history, &body))
    }

    fn admit(&mut self, subject: &str, body: SchemaBody) -> Result<SchemaVersion> {
        let checksum = body.checksum();
        if let Ok(latest) = self.resolver.record_for(subject, VersionSelector::Latest) {
            if latest.checksum == checksum {
                debug!(subject, "Body matches latest version, nothing to register");
                return self.get_version(subject, VersionSelector::Latest);
            }
        }

        let mode = self.mode_for(subject);
        let checker = CompatibilityChecker::new(mode);
        let history = self.history_bodies(subject, mode)?;
        if let Err(e) = checker.admit(subject, &history, &body) {
            warn!(subject, %mode, fields = ?e.violating_fields(), "Rejected incompatible schema");
            return Err(e);
        }

        let id = self.store.register(subject, &body)?;
        let record = self.resolver.record(subject, id, mode, checksum)?;
        info!(
            subject,
            id = %record.sequential_id,
            version = %record.logical_version,
            %mode,
            "Registered schema version"
        );
        Ok(SchemaVersion::from_record(subject, &record, body))
    }

    /// Bodies the checker needs: every version for transitive modes, else the latest
    fn history_bodies(&self, subject: &str, mode: CompatibilityMode) -> Result<Vec<SchemaBody>> {
        let records = match self.resolver.history(subject) {
            Ok(records) => records,
            Err(ForgeError::SubjectNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let wanted: &[VersionRecord] = if mode.is_transitive() {
            records
        } else {
            &records[records.len().saturating_sub(1)..]
        };
        wanted
            .iter()
            .map(|record| self.store.fetch(subject, record.sequential_id))
            .collect()
    }

    /// Give logical versions to ids the store has but the resolver never recorded
    pub fn reconcile(&mut self) -> Result<usize> {
        let mut recovered = 0;
        for subject in self.store.subjects()? {
            let ids = self.store.list(&subject)?;
            for id in self.resolver.unrecorded(&subject, &ids) {
                let body = self.store.fetch(&subject, id)?;
                let mode = self.registry.mode_for(&subject);
                self.resolver.record(&subject, id, mode, body.checksum())?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn list_subjects(&self) -> Vec<String> {
        self.resolver.subjects().map(str::to_string).collect()
    }

    pub fn list_versions(&self, subject: &str) -> Result<Vec<VersionRecord>> {
        Ok(self.resolver.history(subject)?.to_vec())
    }

    /// A registered version with its body, checked against the recorded checksum
    pub fn get_version(&self, subject: &str, selector: VersionSelector) -> Result<SchemaVersion> {
        let record = self.resolver.record_for(subject, selector)?;
        let body = self.store.fetch(subject, record.sequential_id)?;
        let actual = body.checksum();
        if actual != record.checksum {
            return Err(ForgeError::ChecksumMismatch {
                expected: record.checksum.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(SchemaVersion::from_record(subject, record, body))
    }

    pub fn diff_versions(
        &self,
        subject: &str,
        from: VersionSelector,
        to: VersionSelector,
    ) -> Result<VersionDiff> {
        let from = self.get_version(subject, from)?;
        let to = self.get_version(subject, to)?;
        let result = CompatibilityChecker::new(self.mode_for(subject)).check(&from.body, &to.body);
        let text = render_diff(&from.body, &to.body)?;
        Ok(VersionDiff {
            from,
            to,
            result,
            text,
        })
    }

    /// Known subjects that look like `query`, best match first
    pub fn suggest_subjects(&self, query: &str, limit: usize) -> Vec<String> {
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, &str)> = self
            .resolver
            .subjects()
            .filter_map(|subject| matcher.fuzzy_match(subject, query).map(|score| (score, subject)))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, subject)| subject.to_string())
            .collect()
    }

    // =========================================================================
    // Generation and artifacts
    // =========================================================================

    /// Build the package for a registered version (`POST /schemas/{entity_name}/generate`)
    pub fn generate(
        &mut self,
        entity_name: &str,
        version: VersionSelector,
        language: Language,
    ) -> Result<GeneratedArtifact> {
        let resolved = self.get_version(entity_name, version)?;
        debug!(version = %resolved, %language, "Generating package");
        self.builder.build(&resolved, language)
    }

    pub fn list_artifacts(&self, subject: Option<&str>) -> Vec<GeneratedArtifact> {
        self.builder.list(subject).into_iter().cloned().collect()
    }

    pub fn clean_artifacts(&mut self, target: &CleanTarget) -> Result<Vec<GeneratedArtifact>> {
        self.builder.clean(target)
    }

    pub fn describe_store(&self) -> String {
        self.store.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    use crate::version::{LogicalVersion, SequentialId};

    fn schema(fields: serde_json::Value) -> String {
        json!({
            "type": "record",
            "name": "UserSignupEvent",
            "namespace": "com.example.events",
            "fields": fields
        })
        .to_string()
    }

    fn v1() -> String {
        schema(json!([
            { "name": "userId", "type": "string" },
            { "name": "email", "type": "string" },
            { "name": "signupTimestamp", "type": "long" },
            { "name": "source", "type": "string" }
        ]))
    }

    fn v2() -> String {
        schema(json!([
            { "name": "userId", "type": "string" },
            { "name": "email", "type": "string" },
            { "name": "signupTimestamp", "type": "long" },
            { "name": "source", "type": "string" },
            { "name": "referrer", "type": ["null", "string"], "default": null }
        ]))
    }

    #[test]
    fn test_register_then_revise() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();

        let first = service.register_schema("UserSignupEvent", &v1()).unwrap();
        assert_eq!(first.logical_version, LogicalVersion::new(1).unwrap());
        let second = service.revise_schema("UserSignupEvent", &v2()).unwrap();
        assert_eq!(second.logical_version, LogicalVersion::new(2).unwrap());
        assert!(second.sequential_id > first.sequential_id);
        assert_eq!(service.list_subjects(), vec!["UserSignupEvent"]);
    }

    #[test]
    fn test_register_existing_subject() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();
        let first = service.register_schema("UserSignupEvent", &v1()).unwrap();

        let again = service.register_schema("UserSignupEvent", &v1()).unwrap();
        assert_eq!(again.sequential_id, first.sequential_id);
        assert!(matches!(
            service.register_schema("UserSignupEvent", &v2()),
            Err(ForgeError::SubjectAlreadyExists(_))
        ));
    }

    #[test]
    fn test_revise_unknown_subject() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();
        assert!(matches!(
            service.revise_schema("OrderPlaced", &v1()),
            Err(ForgeError::SubjectNotFound(_))
        ));
    }

    #[test]
    fn test_rejection_consumes_no_id() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();
        service.register_schema("UserSignupEvent", &v1()).unwrap();

        let without_email = schema(json!([
            { "name": "userId", "type": "string" },
            { "name": "signupTimestamp", "type": "long" },
            { "name": "source", "type": "string" }
        ]));
        let err = service.revise_schema("UserSignupEvent", &without_email).unwrap_err();
        assert_eq!(err.violating_fields(), vec!["email"]);

        let next = service.revise_schema("UserSignupEvent", &v2()).unwrap();
        assert_eq!(next.sequential_id, SequentialId(2));
        assert_eq!(next.logical_version, LogicalVersion::new(2).unwrap());
    }

    #[test]
    fn test_mode_override() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();
        service.register_schema("UserSignupEvent", &v1()).unwrap();
        service.set_mode("UserSignupEvent", CompatibilityMode::None);

        let without_email = schema(json!([{ "name": "userId", "type": "string" }]));
        assert!(service.revise_schema("UserSignupEvent", &without_email).is_ok());
    }

    #[test]
    fn test_check_compatibility_is_dry_run() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();
        service.register_schema("UserSignupEvent", &v1()).unwrap();

        let result = service.check_compatibility("UserSignupEvent", &v2()).unwrap();
        assert!(result.is_compatible);
        assert_eq!(service.list_versions("UserSignupEvent").unwrap().len(), 1);

        assert!(service.check_compatibility("Brand.New", &v1()).unwrap().is_compatible);
    }

    #[test]
    fn test_generate_unknown_version() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();
        service.register_schema("UserSignupEvent", &v1()).unwrap();
        service.revise_schema("UserSignupEvent", &v2()).unwrap();

        let err = service
            .generate("UserSignupEvent", "5".parse().unwrap(), Language::Python)
            .unwrap_err();
        assert!(matches!(err, ForgeError::VersionNotFound { .. }));
        assert!(service.list_artifacts(None).is_empty());
    }

    #[test]
    fn test_generate_and_clean() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();
        service.register_schema("UserSignupEvent", &v1()).unwrap();

        let artifact = service
            .generate("UserSignupEvent", VersionSelector::Latest, Language::Python)
            .unwrap();
        assert_eq!(artifact.package, "UserSignupEvent_lib");
        assert_eq!(service.list_artifacts(Some("UserSignupEvent")).len(), 1);

        let removed = service
            .clean_artifacts(&CleanTarget::Subject("UserSignupEvent".to_string()))
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert!(service.list_artifacts(None).is_empty());
    }

    #[test]
    fn test_diff_versions() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();
        service.register_schema("UserSignupEvent", &v1()).unwrap();
        service.revise_schema("UserSignupEvent", &v2()).unwrap();

        let diff = service
            .diff_versions("UserSignupEvent", "1".parse().unwrap(), VersionSelector::Latest)
            .unwrap();
        assert_eq!(diff.changes().len(), 1);
        assert_eq!(diff.changes()[0].field, "referrer");
        assert!(diff.result.is_compatible);
        assert!(diff.text.contains("+"));
    }

    #[test]
    fn test_suggest_subjects() {
        let dir = tempdir().unwrap();
        let mut service = SchemaService::in_memory(dir.path()).unwrap();
        service.register_schema("UserSignupEvent", &v1()).unwrap();
        let suggestions = service.suggest_subjects("usersignup", 3);
        assert_eq!(suggestions, vec!["UserSignupEvent"]);
        assert!(service.suggest_subjects("zzz", 3).is_empty());
    }

    #[test]
    fn test_local_backend_reconciles_on_open() {
        let dir = tempdir().unwrap();
        let mut config = ForgeConfig::default();
        config.registry.path = dir.path().join("registry");
        config.artifacts.output_dir = dir.path().join("artifacts");

        {
            let mut service = SchemaService::from_config(&config).unwrap();
            service.register_schema("UserSignupEvent", &v1()).unwrap();
        }
        // Simulate a crash between the store write and the resolver write
        std::fs::remove_file(config.registry.path.join(RESOLVER_FILE)).unwrap();

        let service = SchemaService::from_config(&config).unwrap();
        let versions = service.list_versions("UserSignupEvent").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].sequential_id, SequentialId(1));
    }
}
