use clap::{Parser, Subcommand, ValueEnum};
use octofhir_fhirvalidator::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fhir-validate")]
#[command(about = "Validate FHIR resources against StructureDefinition snapshots")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a FHIR resource (JSON)
    Validate {
        /// Path to the resource file
        file: PathBuf,
        /// Extra package to load (folder, .tgz or name#version), repeatable
        #[arg(short, long = "package")]
        packages: Vec<String>,
        /// Profile canonical to validate against, repeatable
        #[arg(long = "profile")]
        profiles: Vec<String>,
        /// Validator settings as JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Load a package and report what was stored
    Load {
        /// Folder, .tgz archive or name#version from the package cache
        package: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Validate {
            file,
            packages,
            profiles,
            config,
            format,
        } => validate(&file, &packages, &profiles, config.as_deref(), format).await,
        Commands::Load { package } => load(&package).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn load_packages(packages: &[String]) -> Result<Arc<SchemaStore>> {
    let store = Arc::new(SchemaStore::with_defaults()?);
    let loader = PackageLoader::new(store.clone());
    for package in packages {
        let summary = loader.load(package).await?;
        for failure in &summary.failed {
            eprintln!("warning: {}: {}: {}", summary.package, failure.file, failure.reason);
        }
    }
    Ok(store)
}

async fn validate(
    file: &Path,
    packages: &[String],
    profiles: &[String],
    config: Option<&Path>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let config = match config {
        Some(path) => ValidatorConfig::from_json_file(path)?,
        None => ValidatorConfig::default(),
    };
    let store = load_packages(packages).await?;

    let content = tokio::fs::read_to_string(file).await?;
    let resource: serde_json::Value = serde_json::from_str(&content)?;

    let validator = FhirValidator::new(store).with_config(config);
    let profiles: Vec<&str> = profiles.iter().map(String::as_str).collect();
    let outcome = validator.validate_with_profiles(&resource, &profiles)?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome.to_operation_outcome())?
            );
        }
        OutputFormat::Text => {
            if outcome.is_empty() {
                println!("{}: no issues", file.display());
            } else {
                print!("{outcome}");
                println!(
                    "{} error(s), {} warning(s)",
                    outcome.count(Severity::Error),
                    outcome.count(Severity::Warning)
                );
            }
        }
    }

    Ok(if outcome.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn load(package: &str) -> Result<ExitCode> {
    let store = Arc::new(SchemaStore::new());
    let loader = PackageLoader::new(store.clone());
    let summary = loader.load(package).await?;

    println!("Package: {}", summary.package);
    println!("Loaded: {}", summary.loaded);
    println!("Duplicates skipped: {}", summary.skipped_duplicate);
    println!("Ignored: {}", summary.ignored);
    for failure in &summary.failed {
        println!("Failed: {} ({})", failure.file, failure.reason);
    }
    println!(
        "Store: {} structure definitions, {} value sets, {} code systems",
        store.schema_count(),
        store.value_set_count(),
        store.code_system_count()
    );

    Ok(if summary.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
