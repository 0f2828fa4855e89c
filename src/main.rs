//! certops - certificate lifecycle CLI
//!
//! Three command groups over one certificate store: `generate` bootstraps
//! the CA and issues leaves, `validate` checks fleet health with
//! monitoring-friendly output, `rotate` performs backup-protected
//! re-issuance.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use certops::authority;
use certops::config::AppConfig;
use certops::engine::{CryptoEngine, OpensslEngine};
use certops::errors::PkiError;
use certops::expiry::Thresholds;
use certops::hooks::{Notifier, RestartHook};
use certops::issuer;
use certops::rotation::{self, RotationContext, RotationOptions, RotationOutcome};
use certops::san_policy;
use certops::store::CertStore;
use certops::validator;

#[derive(Parser)]
#[command(
    name = "certops",
    version,
    about = "Internal TLS certificate lifecycle manager"
)]
struct Cli {
    /// Certificate store root (overrides config file and CERTOPS_ROOT)
    #[arg(long, global = true, value_name = "DIR")]
    cert_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the root CA and issue per-service leaf certificates
    Generate(GenerateArgs),
    /// Check certificate health across the fleet
    Validate(ValidateArgs),
    /// Rotate certificates approaching expiry, with backup and rollback
    Rotate(RotateArgs),
}

#[derive(Args)]
struct GenerateArgs {
    /// Regenerate existing material; without --service this also replaces
    /// the CA, which breaks the chain of every issued leaf
    #[arg(long)]
    force: bool,
    /// Operate on a single service instead of the whole registry
    #[arg(long, value_name = "NAME")]
    service: Option<String>,
    /// Print details of an issued certificate and exit
    #[arg(long, value_name = "NAME")]
    info: Option<String>,
    /// Verify issued certificates against the CA after generation
    #[arg(long)]
    verify: bool,
}

#[derive(Args)]
struct ValidateArgs {
    /// Check a single service instead of the whole registry
    #[arg(long, value_name = "NAME")]
    service: Option<String>,
    /// Override the warning threshold in days
    #[arg(long, value_name = "N")]
    warning_days: Option<i64>,
    /// Emit a JSON array instead of the human-readable report
    #[arg(long)]
    json: bool,
    /// Emit a single-line monitoring-system summary
    #[arg(long)]
    nagios: bool,
}

#[derive(Args)]
struct RotateArgs {
    /// Report what would rotate without touching the filesystem
    #[arg(long)]
    dry_run: bool,
    /// Rotate a single service instead of the whole registry
    #[arg(long, value_name = "NAME")]
    service: Option<String>,
    /// Rotate regardless of remaining validity
    #[arg(long)]
    force: bool,
    /// Do not run the dependent-service restart hook
    #[arg(long)]
    skip_restart: bool,
    /// Do not snapshot current material first (disables rollback)
    #[arg(long)]
    no_backup: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::load()?;
    if let Some(root) = cli.cert_root {
        config.cert_root = root;
    }
    match cli.command {
        Commands::Generate(args) => cmd_generate(&config, args),
        Commands::Validate(args) => cmd_validate(&config, args),
        Commands::Rotate(args) => cmd_rotate(&config, args),
    }
}

/// Resolve `--service` against the registry, or yield the whole registry.
fn select_services(requested: Option<&str>) -> anyhow::Result<Vec<String>> {
    match requested {
        Some(name) => {
            if !san_policy::is_known(name) {
                return Err(PkiError::UnknownService(name.to_string()).into());
            }
            Ok(vec![name.to_string()])
        }
        None => Ok(san_policy::service_names().map(String::from).collect()),
    }
}

fn cmd_generate(config: &AppConfig, args: GenerateArgs) -> anyhow::Result<ExitCode> {
    let store = CertStore::new(&config.cert_root);
    let engine = OpensslEngine::new();

    if let Some(service) = &args.info {
        print!("{}", issuer::describe(&engine, &store, service)?);
        return Ok(ExitCode::SUCCESS);
    }

    let _lock = store.acquire_lock()?;

    // Only a whole-fleet --force replaces the CA; forcing a single service
    // re-issues that leaf under the existing root.
    let force_ca = args.force && args.service.is_none();
    if force_ca && store.ca_exists() {
        eprintln!(
            "warning: regenerating the root CA: every previously issued leaf \
             certificate will stop verifying until reissued"
        );
    }
    let ca = authority::ensure_ca(&engine, &store, config, force_ca)
        .context("CA bootstrap failed")?;

    let services = select_services(args.service.as_deref())?;
    let mut failures = 0usize;
    for service in &services {
        match issuer::issue(&engine, &store, config, &ca, service, args.force) {
            Ok(leaf) => {
                let days = engine.days_until_expiry(&leaf.certificate).unwrap_or(0);
                println!("✓ {}: certificate ready ({} days remaining)", service, days);
            }
            Err(e) => {
                failures += 1;
                eprintln!("✗ {}: [{}] {}", service, e.code(), e);
            }
        }
    }

    if args.verify {
        for service in &services {
            match verify_one(&engine, &store, &ca, service) {
                Ok(()) => println!("✓ {}: chain verifies against the CA", service),
                Err(e) => {
                    failures += 1;
                    eprintln!("✗ {}: [{}] {}", service, e.code(), e);
                }
            }
        }
    }

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn verify_one(
    engine: &dyn CryptoEngine,
    store: &CertStore,
    ca: &authority::CertificateAuthority,
    service: &str,
) -> Result<(), PkiError> {
    let leaf = issuer::load(store, service)?;
    if !engine.verify_chain(&leaf.certificate, &ca.certificate)? {
        return Err(PkiError::ChainValidation(service.to_string()));
    }
    Ok(())
}

fn cmd_validate(config: &AppConfig, args: ValidateArgs) -> anyhow::Result<ExitCode> {
    let warning_days = args.warning_days.unwrap_or(config.warning_days);
    let thresholds = Thresholds::new(warning_days, config.critical_days)?;

    let store = CertStore::new(&config.cert_root);
    let engine = OpensslEngine::new();
    let services = select_services(args.service.as_deref())?;
    let names: Vec<&str> = services.iter().map(String::as_str).collect();
    let results = validator::validate_all(&engine, &store, &thresholds, &names);

    if args.json {
        println!("{}", validator::render_json(&results)?);
    } else if args.nagios {
        println!("{}", validator::render_nagios(&results));
    } else {
        print!("{}", validator::render_report(&results));
    }

    Ok(ExitCode::from(validator::outcome(&results).exit_code()))
}

fn cmd_rotate(config: &AppConfig, args: RotateArgs) -> anyhow::Result<ExitCode> {
    let store = CertStore::new(&config.cert_root);
    let engine = OpensslEngine::new();
    let thresholds = config.thresholds()?;
    let services = select_services(args.service.as_deref())?;

    // Dry runs mutate nothing, so they skip the single-writer lock
    let _lock = if args.dry_run {
        None
    } else {
        Some(store.acquire_lock()?)
    };
    let ca = authority::load_ca(&store)
        .context("cannot rotate without an existing CA; run `certops generate` first")?;

    let restart = RestartHook::new(config.restart_command.clone());
    let notifier = Notifier::new(config.notify_url.clone());
    let ctx = RotationContext {
        engine: &engine,
        store: &store,
        config,
        ca: &ca,
        thresholds: &thresholds,
        restart: &restart,
        notifier: &notifier,
    };
    let options = RotationOptions {
        force: args.force,
        dry_run: args.dry_run,
        skip_restart: args.skip_restart,
        backup: !args.no_backup,
    };

    let names: Vec<&str> = services.iter().map(String::as_str).collect();
    let reports = rotation::rotate_all(&ctx, &names, &options);
    for report in &reports {
        match &report.outcome {
            RotationOutcome::Skipped { reason } => {
                println!("- {}: skipped ({})", report.service, reason);
            }
            RotationOutcome::Rotated { restarted } => {
                let suffix = if *restarted { ", dependents restarted" } else { "" };
                println!("✓ {}: rotated{}", report.service, suffix);
            }
            RotationOutcome::RolledBack { error } => {
                eprintln!(
                    "✗ {}: re-issuance failed, previous material restored ({})",
                    report.service, error
                );
            }
            RotationOutcome::Failed { error } => {
                eprintln!("✗ {}: failed ({})", report.service, error);
            }
        }
    }

    Ok(ExitCode::from(rotation::exit_code(&reports)))
}
