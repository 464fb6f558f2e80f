//! Flux Sync CLI - Command-line interface for Synheart Sync
//!
//! Commands:
//! - run: Sync one or all entity kinds into the destination
//! - doctor: Diagnose configuration and credentials
//! - metrics: List canonical metrics and their default property names

use clap::{Parser, Subcommand, ValueEnum};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use synheart_sync::config::SyncConfig;
use synheart_sync::destination::{DestinationStore, InMemoryStore, NotionStore};
use synheart_sync::logging::{init_logging, LOG_ENV};
use synheart_sync::pipeline::SyncEngine;
use synheart_sync::types::{EntityKind, RunSummary};
use synheart_sync::{GarminConnectClient, SyncError, PRODUCER_NAME, SYNC_VERSION};

/// Flux Sync - Idempotent wearable data sync
#[derive(Parser)]
#[command(name = "flux-sync")]
#[command(author = "Synheart AI Inc")]
#[command(version = SYNC_VERSION)]
#[command(about = "Sync wearable activities, sleep and weight into a destination store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync entities inside the look-back window
    Run {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Entity kind to sync
        #[arg(long, value_enum, default_value = "all")]
        kind: KindArg,

        /// Write into an in-memory store instead of the destination
        #[arg(long)]
        dry_run: bool,
    },

    /// Diagnose configuration and credentials
    Doctor {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List canonical metrics and default property names
    Metrics {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Activity,
    Sleep,
    Weight,
    /// Every enabled collection
    All,
}

impl KindArg {
    fn kinds(self, config: &SyncConfig) -> Vec<EntityKind> {
        match self {
            KindArg::Activity => vec![EntityKind::Activity],
            KindArg::Sleep => vec![EntityKind::Sleep],
            KindArg::Weight => vec![EntityKind::Weight],
            KindArg::All => config.enabled_collections().map(|(kind, _)| kind).collect(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), SyncCliError> {
    match cli.command {
        Commands::Run {
            config,
            kind,
            dry_run,
        } => cmd_run(&config, kind, dry_run),
        Commands::Doctor { config, json } => cmd_doctor(&config, json),
        Commands::Metrics { json } => cmd_metrics(json),
    }
}

fn cmd_run(config_path: &Path, kind: KindArg, dry_run: bool) -> Result<(), SyncCliError> {
    let config = SyncConfig::from_file(config_path)?;
    init_logging(&config.logging, env::var(LOG_ENV).ok().as_deref())?;

    let offset = config.window.offset()?;
    let source_token = token(&config.source.token_env)?;
    let source = GarminConnectClient::new(&config.source, &source_token, offset)?;
    let store: Box<dyn DestinationStore> = if dry_run {
        Box::new(InMemoryStore::new())
    } else {
        let destination_token = token(&config.destination.token_env)?;
        Box::new(NotionStore::new(&config.destination, &destination_token, offset)?)
    };

    let kinds = kind.kinds(&config);
    if kinds.is_empty() {
        return Err(SyncCliError::NothingEnabled);
    }
    let engine = SyncEngine::new(&config, &source, store.as_ref())?;

    let mut reports = Vec::new();
    let mut fatal = 0usize;
    for kind in kinds {
        let report = match engine.run(kind) {
            Ok(summary) => RunReport::from_summary(summary),
            Err(e) => {
                fatal += 1;
                RunReport::failed(kind, &e)
            }
        };
        reports.push(report);
    }

    let output = SyncReport {
        producer: PRODUCER_NAME.to_string(),
        version: SYNC_VERSION.to_string(),
        dry_run,
        runs: reports,
    };
    if atty::is(atty::Stream::Stdout) {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", serde_json::to_string(&output)?);
    }

    if fatal > 0 {
        Err(SyncCliError::RunsFailed(fatal))
    } else {
        Ok(())
    }
}

fn token(var: &str) -> Result<String, SyncCliError> {
    env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| SyncCliError::MissingToken(var.to_string()))
}

fn cmd_doctor(config_path: &Path, json: bool) -> Result<(), SyncCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "sync_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Sync version {}", SYNC_VERSION),
    });

    let config = match SyncConfig::from_file(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!("Configuration valid ({})", config_path.display()),
            });
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            });
            None
        }
    };

    if let Some(config) = &config {
        let enabled: Vec<String> = config
            .enabled_collections()
            .map(|(kind, c)| format!("{kind} -> {}", c.database_id))
            .collect();
        checks.push(if enabled.is_empty() {
            DoctorCheck {
                name: "collections".to_string(),
                status: CheckStatus::Warning,
                message: "No enabled collections".to_string(),
            }
        } else {
            DoctorCheck {
                name: "collections".to_string(),
                status: CheckStatus::Ok,
                message: enabled.join(", "),
            }
        });

        for (name, var) in [
            ("source_token", &config.source.token_env),
            ("destination_token", &config.destination.token_env),
        ] {
            checks.push(match token(var) {
                Ok(_) => DoctorCheck {
                    name: name.to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{var} is set"),
                },
                Err(_) => DoctorCheck {
                    name: name.to_string(),
                    status: CheckStatus::Error,
                    message: format!("{var} is not set"),
                },
            });
        }

        if config.collection(EntityKind::Sleep).is_ok() && config.source.display_name.trim().is_empty() {
            checks.push(DoctorCheck {
                name: "display_name".to_string(),
                status: CheckStatus::Warning,
                message: "source.display_name is empty; sleep days will come back without data".to_string(),
            });
        }
    }

    let log_check = match env::var(LOG_ENV) {
        Ok(level) => DoctorCheck {
            name: "log_filter".to_string(),
            status: CheckStatus::Ok,
            message: format!("{LOG_ENV}={level}"),
        },
        Err(_) => DoctorCheck {
            name: "log_filter".to_string(),
            status: CheckStatus::Ok,
            message: format!("{LOG_ENV} not set, using configured level"),
        },
    };
    checks.push(log_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SYNC_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Flux Sync Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SyncCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_metrics(json: bool) -> Result<(), SyncCliError> {
    let rows: Vec<MetricRow> = EntityKind::ALL
        .iter()
        .flat_map(|kind| {
            kind.metrics().iter().map(move |metric| MetricRow {
                kind: kind.to_string(),
                metric: metric.as_str().to_string(),
                property: metric.default_property().to_string(),
            })
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            println!("{:<10} {:<22} {}", row.kind, row.metric, row.property);
        }
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum SyncCliError {
    Sync(SyncError),
    Json(serde_json::Error),
    MissingToken(String),
    NothingEnabled,
    RunsFailed(usize),
    DoctorFailed,
}

impl From<SyncError> for SyncCliError {
    fn from(e: SyncError) -> Self {
        SyncCliError::Sync(e)
    }
}

impl From<serde_json::Error> for SyncCliError {
    fn from(e: serde_json::Error) -> Self {
        SyncCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SyncCliError> for CliError {
    fn from(e: SyncCliError) -> Self {
        match e {
            SyncCliError::Sync(e @ SyncError::Config(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'flux-sync doctor' for details".to_string()),
            },
            SyncCliError::Sync(e) => CliError {
                code: "SYNC_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            SyncCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            SyncCliError::MissingToken(var) => CliError {
                code: "MISSING_TOKEN".to_string(),
                message: format!("Environment variable {var} is not set"),
                hint: Some("Export the access token or change token_env in the config".to_string()),
            },
            SyncCliError::NothingEnabled => CliError {
                code: "NOTHING_ENABLED".to_string(),
                message: "No enabled collections to sync".to_string(),
                hint: Some("Add a [collections.<kind>] table to the config".to_string()),
            },
            SyncCliError::RunsFailed(count) => CliError {
                code: "RUNS_FAILED".to_string(),
                message: format!("{} run(s) aborted", count),
                hint: Some("See the run report on stdout".to_string()),
            },
            SyncCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more checks failed".to_string(),
                hint: None,
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct SyncReport {
    producer: String,
    version: String,
    dry_run: bool,
    runs: Vec<RunReport>,
}

#[derive(serde::Serialize)]
struct RunReport {
    kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl RunReport {
    fn from_summary(summary: RunSummary) -> Self {
        Self {
            kind: summary.kind,
            summary: Some(summary),
            error: None,
        }
    }

    fn failed(kind: EntityKind, error: &SyncError) -> Self {
        Self {
            kind,
            summary: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(serde::Serialize)]
struct MetricRow {
    kind: String,
    metric: String,
    property: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
