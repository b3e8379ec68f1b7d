//! Portfolio - evidence reconciliation CLI
//!
//! Command-line front end over the Query API: unit completion, the assessor
//! dashboard, recording assessments and compiling portfolio reports.

use clap::{Parser, Subcommand, ValueEnum};
use portfolio_core::{
    error::{PortfolioError, Result},
    AssessmentService, AssessmentStatus, AssessmentUpdate, Catalogue, EngineConfig,
    InMemoryStore, RemoteStore, SiteScope, UnitCompletion,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portfolio")]
#[command(about = "Evidence reconciliation and portfolio compilation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (defaults to <config dir>/portfolio/portfolio.toml)
    #[arg(short, long, global = true, env = "PORTFOLIO_CONFIG")]
    config: Option<PathBuf>,

    /// Catalogue JSON, overriding `catalogue_path` from configuration
    #[arg(long, global = true)]
    catalogue: Option<PathBuf>,

    /// Serve evidence from a JSON fixture instead of the remote store
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show occasion-aware completion of one unit
    Completion {
        /// Candidate site id
        #[arg(short, long)]
        site: String,

        /// Unit code (e.g. NETP3-01)
        #[arg(short, long)]
        unit: String,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show candidates and evidence awaiting assessment
    Dashboard {
        /// Limit to one site (default: all configured sites)
        #[arg(short, long)]
        site: Option<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Record an assessment decision on an evidence file
    Assess {
        #[arg(short, long)]
        site: String,

        /// Evidence file id
        #[arg(short, long)]
        evidence: String,

        /// pending, approved, rejected or needs-revision
        #[arg(long)]
        status: AssessmentStatus,

        /// Assessor name recorded with the decision
        #[arg(short, long)]
        assessor: String,

        /// Feedback for the candidate (omit to clear)
        #[arg(long)]
        feedback: Option<String>,
    },

    /// Compile an HTML portfolio report
    Compile {
        #[arg(short, long)]
        site: String,

        /// Units to include (repeatable; default: every catalogue unit)
        #[arg(short, long)]
        unit: Vec<String>,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn build_service(cli: &Cli) -> Result<AssessmentService> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(path) = &cli.catalogue {
        config.catalogue_path = Some(path.clone());
    }

    match &cli.fixture {
        Some(fixture) => {
            debug!("Using fixture store from {}", fixture.display());
            let catalogue_path = config.catalogue_path.clone().ok_or_else(|| {
                PortfolioError::Config(::config::ConfigError::NotFound(
                    "catalogue_path".to_string(),
                ))
            })?;
            let catalogue = Catalogue::from_file(&catalogue_path)?;
            let json = std::fs::read_to_string(fixture)?;
            let store: Arc<dyn RemoteStore> = Arc::new(InMemoryStore::from_fixture_json(&json)?);
            Ok(AssessmentService::new(&config, catalogue, store))
        }
        None => AssessmentService::from_config(&config),
    }
}

fn occasion_label(approved: Option<bool>) -> &'static str {
    match approved {
        Some(true) => "approved",
        Some(false) => "not approved",
        None => "-",
    }
}

fn print_completion(completion: &UnitCompletion) {
    println!(
        "{} {} on {}: {}/{} criteria complete ({}%)",
        completion.unit_code,
        completion.unit_title,
        completion.site_id,
        completion.progress.completed,
        completion.progress.total,
        completion.progress.percent()
    );
    if completion.progress.scan_incomplete {
        println!("  warning: some folders could not be scanned; results may be incomplete");
    }
    println!();

    for criterion in &completion.criteria {
        let state = if criterion.is_complete {
            "complete"
        } else if !criterion.has_evidence() {
            "no evidence"
        } else {
            "in progress"
        };
        let mut line = format!(
            "  {:<6} [{}] occasion 1: {}",
            criterion.criterion_code,
            state,
            occasion_label(criterion.first_occasion_approved)
        );
        if criterion.requires_two_occasions {
            line.push_str(&format!(
                ", occasion 2: {}",
                occasion_label(criterion.second_occasion_approved)
            ));
        }
        if criterion.scan_incomplete {
            line.push_str(" (scan incomplete)");
        }
        println!("{}", line);
    }

    if !completion.unmatched.is_empty() {
        println!();
        println!("  Unmatched evidence (needs manual review):");
        for item in &completion.unmatched {
            println!("    {} [{}] {}", item.id, item.status, item.remote_path());
        }
    }
    for folder in &completion.malformed_folders {
        println!("  Unrecognised folder name: {}", folder);
    }
    for gap in &completion.gaps {
        println!("  Could not scan {}: {}", gap.path, gap.reason);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Our crates at the requested level, HTTP internals kept quiet
    let filter = EnvFilter::new(format!(
        "portfolio={level},portfolio_core={level},reqwest=warn,hyper=warn",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Keep stdout for command output
        .init();

    debug!("Portfolio v{} starting...", env!("CARGO_PKG_VERSION"));

    let service = build_service(&cli)?;

    match cli.command {
        Commands::Completion { site, unit, format } => {
            let completion = service.get_completion(&site, &unit).await?;
            match format {
                OutputFormat::Json => print_json(&completion)?,
                OutputFormat::Text => print_completion(&completion),
            }
        }
        Commands::Dashboard { site, format } => {
            let scope = site.map(SiteScope::Site).unwrap_or(SiteScope::All);
            let dashboard = service.get_dashboard(&scope).await?;
            match format {
                OutputFormat::Json => print_json(&dashboard)?,
                OutputFormat::Text => {
                    println!(
                        "{} candidate(s), {} item(s) awaiting assessment",
                        dashboard.candidates.len(),
                        dashboard.pending_evidence_count
                    );
                    for site in &dashboard.candidates {
                        println!(
                            "  {:<24} {:<20} {} evidence, {} approved, {} pending{}",
                            site.candidate,
                            site.site_id,
                            site.evidence_count,
                            site.approved_count,
                            site.pending.len(),
                            if site.is_complete() { "" } else { " (incomplete)" }
                        );
                    }
                    if !dashboard.pending_evidence.is_empty() {
                        println!();
                        for pending in &dashboard.pending_evidence {
                            println!(
                                "  {} {} {} ({})",
                                pending.item.uploaded_at.format("%Y-%m-%d"),
                                pending.candidate,
                                pending.item.remote_path(),
                                pending.item.id
                            );
                        }
                    }
                }
            }
        }
        Commands::Assess {
            site,
            evidence,
            status,
            assessor,
            feedback,
        } => {
            let update = AssessmentUpdate {
                status,
                feedback,
                assessor_name: assessor,
            };
            let stored = service.set_assessment(&site, &evidence, update).await?;
            println!(
                "{} is now {}{}",
                stored.remote_path(),
                stored.status,
                stored
                    .assessor_name
                    .as_deref()
                    .map(|name| format!(" ({})", name))
                    .unwrap_or_default()
            );
        }
        Commands::Compile { site, unit, output } => {
            let html = service
                .compile_portfolio(&site, &unit, chrono::Utc::now())
                .await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, html)?;
                    info!("Portfolio written to {}", path.display());
                }
                None => println!("{}", html),
            }
        }
    }

    Ok(())
}
