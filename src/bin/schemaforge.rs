//! schemaforge CLI
//!
//! Registers schemas, checks compatibility and builds client packages.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use schemaforge::{
    CleanTarget, ForgeConfig, ForgeError, Language, SchemaService, VersionSelector,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemaforge")]
#[command(about = "Schema-driven producer/consumer client generation")]
struct Cli {
    /// Extra config file (required to exist when given)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override registry.path
    #[arg(short, long, global = true)]
    registry: Option<PathBuf>,

    /// Override artifacts.output_dir
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new subject from a schema file
    Register {
        subject: String,
        file: PathBuf,
    },

    /// Register the next version of an existing subject
    Revise {
        subject: String,
        file: PathBuf,
    },

    /// Check a schema file against a subject without registering it
    Check {
        subject: String,
        file: PathBuf,
    },

    /// List registered subjects
    Subjects,

    /// List versions of a subject
    Versions {
        subject: String,
    },

    /// Print a registered schema body
    Show {
        subject: String,
        #[arg(default_value = "latest")]
        version: String,
    },

    /// Compare two versions of a subject
    Diff {
        subject: String,
        #[arg(short, long)]
        from: String,
        #[arg(short, long, default_value = "latest")]
        to: String,
    },

    /// Build a client package for a registered version
    Generate {
        subject: String,
        #[arg(short = 'V', long, default_value = "latest")]
        version: String,
        /// Target language (python, typescript, rust); defaults to codegen.default_language
        #[arg(short, long)]
        language: Option<String>,
    },

    /// List built artifacts
    Artifacts {
        #[arg(short, long)]
        subject: Option<String>,
    },

    /// Remove built artifacts
    Clean {
        /// Artifact id (`{subject}-{id}-{language}`)
        #[arg(long, conflicts_with = "subject")]
        artifact: Option<String>,
        /// Every artifact of a subject
        #[arg(long)]
        subject: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ForgeConfig::load_from(cli.config.as_deref())?;
    if let Some(path) = cli.registry {
        config.registry.path = path;
    }
    if let Some(path) = cli.output {
        config.artifacts.output_dir = path;
    }

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let mut service = SchemaService::from_config(&config)?;

    match cli.command {
        Commands::Register { subject, file } => {
            let schema = read_schema(&file)?;
            let version = service.register_schema(&subject, &schema)?;
            println!("✅ Registered {}", version);
        }

        Commands::Revise { subject, file } => {
            let schema = read_schema(&file)?;
            match service.revise_schema(&subject, &schema) {
                Ok(version) => println!("✅ Registered {}", version),
                Err(ForgeError::IncompatibleSchema { subject, violations }) => {
                    println!("❌ {} revision rejected", subject);
                    for violation in &violations {
                        println!("   └─ {}", violation);
                    }
                    std::process::exit(1);
                }
                Err(e) => return Err(suggest(&service, e)),
            }
        }

        Commands::Check { subject, file } => {
            let schema = read_schema(&file)?;
            let result = service.check_compatibility(&subject, &schema)?;
            println!("🔍 {} ({} mode)", subject, result.mode);
            for change in &result.changes {
                let marker = if change.is_breaking_under(result.mode) { "❌" } else { "✅" };
                println!("  {} {}", marker, change.description);
            }
            println!("{}", result.summary);
            if !result.is_compatible {
                std::process::exit(1);
            }
        }

        Commands::Subjects => {
            for subject in service.list_subjects() {
                println!("{}", subject);
            }
        }

        Commands::Versions { subject } => {
            let versions = service
                .list_versions(&subject)
                .map_err(|e| suggest(&service, e))?;
            for record in versions {
                println!(
                    "v{}  id {}  {}  {}  {}",
                    record.logical_version,
                    record.sequential_id,
                    record.compatibility,
                    record.checksum.short(),
                    record.registered_at.to_rfc3339()
                );
            }
        }

        Commands::Show { subject, version } => {
            let selector: VersionSelector = version.parse()?;
            let version = service
                .get_version(&subject, selector)
                .map_err(|e| suggest(&service, e))?;
            println!("{}", version.body.pretty_json()?);
        }

        Commands::Diff { subject, from, to } => {
            let diff = service
                .diff_versions(&subject, from.parse()?, to.parse()?)
                .map_err(|e| suggest(&service, e))?;
            println!(
                "🔍 {} v{} -> v{}: {}",
                subject, diff.from.logical_version, diff.to.logical_version, diff.result.summary
            );
            for change in diff.changes() {
                println!("  {:?} {}", change.change_type, change.description);
            }
            println!();
            print!("{}", diff.text);
        }

        Commands::Generate {
            subject,
            version,
            language,
        } => {
            let language: Language = match language {
                Some(name) => name.parse()?,
                None => config.codegen.default_language,
            };
            let artifact = service
                .generate(&subject, version.parse()?, language)
                .map_err(|e| suggest(&service, e))?;
            println!(
                "✅ {} v{} ({}) -> {}",
                artifact.package,
                artifact.logical_version,
                artifact.language,
                artifact.location.display()
            );
        }

        Commands::Artifacts { subject } => {
            for artifact in service.list_artifacts(subject.as_deref()) {
                println!(
                    "{}  v{}  {}  {}",
                    artifact.id,
                    artifact.logical_version,
                    artifact.checksum.short(),
                    artifact.location.display()
                );
            }
        }

        Commands::Clean { artifact, subject } => {
            let target = match (artifact, subject) {
                (Some(id), _) => CleanTarget::Artifact(id),
                (None, Some(subject)) => CleanTarget::Subject(subject),
                (None, None) => anyhow::bail!("pass --artifact or --subject"),
            };
            let removed = service.clean_artifacts(&target)?;
            println!("🧹 Removed {} artifact(s)", removed.len());
        }

        // Printed before the service was opened
        Commands::Config => {}
    }

    Ok(())
}

fn read_schema(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Attach "did you mean" candidates to unknown-subject errors
fn suggest(service: &SchemaService, err: ForgeError) -> anyhow::Error {
    let unknown = match &err {
        ForgeError::SubjectNotFound(subject) => Some(subject),
        ForgeError::VersionNotFound { subject, .. }
            if !service.list_subjects().contains(subject) =>
        {
            Some(subject)
        }
        _ => None,
    };
    if let Some(subject) = unknown {
        let candidates = service.suggest_subjects(subject, 3);
        if !candidates.is_empty() {
            return anyhow::anyhow!("{} (did you mean: {}?)", err, candidates.join(", "));
        }
    }
    err.into()
}
