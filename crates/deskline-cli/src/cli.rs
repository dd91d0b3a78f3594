//! `deskline` - command line tools for the Deskline databases

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use deskline_connection::{
    DatabaseManager, DesklineSettings, Diagnostics, SshTunnel, ValidationReport, validate_statements,
};
use deskline_core::{ConnectionRole, LogicalDatabase, StatementRegistry};
use deskline_drivers::DriverRegistry;

#[derive(Parser)]
#[command(name = "deskline", version, about = "Deskline database tooling")]
struct Cli {
    /// Settings file (defaults to <config dir>/deskline/deskline.toml)
    #[arg(short, long, global = true, env = "DESKLINE_CONFIG")]
    config: Option<PathBuf>,

    /// More detailed console logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write JSON logs to a daily rolling file
    #[arg(long, global = true)]
    json_logs: bool,

    /// Directory for JSON log files
    #[arg(long, global = true, env = "DESKLINE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prepare every registered statement against the live databases
    Validate(ValidateArgs),
    /// Configure the pools and print their state
    Diagnostics(DiagnosticsArgs),
    /// Open an SSH tunnel for an endpoint and keep it up until Ctrl-C
    Tunnel(TunnelArgs),
}

#[derive(Args)]
struct ValidateArgs {
    /// Only validate this database
    #[arg(short, long)]
    database: Option<LogicalDatabase>,

    /// Only validate statements runnable with this role
    #[arg(short, long)]
    role: Option<ConnectionRole>,

    /// Additional statement catalog files
    #[arg(long = "catalog", value_name = "FILE")]
    catalogs: Vec<PathBuf>,
}

#[derive(Args)]
struct DiagnosticsArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TunnelArgs {
    /// Database whose endpoint to tunnel to
    #[arg(short, long)]
    database: LogicalDatabase,

    /// Use the replica endpoint instead of the primary
    #[arg(long)]
    replica: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = logging::LoggingConfig::new(cli.verbose);
    if cli.json_logs {
        log_config = log_config.with_json_logs(cli.log_dir.clone());
    }
    let _log_guard = logging::init(log_config)?;

    let settings = DesklineSettings::load_or_default_path(cli.config.as_deref())?;
    let drivers = DriverRegistry::with_defaults();

    match cli.command {
        Command::Validate(args) => validate(&settings, &drivers, args).await,
        Command::Diagnostics(args) => diagnostics(&settings, &drivers, args).await,
        Command::Tunnel(args) => tunnel(&settings, &drivers, args).await,
    }
}

fn load_registry(settings: &DesklineSettings, extra: &[PathBuf]) -> anyhow::Result<Arc<StatementRegistry>> {
    let registry = StatementRegistry::new();
    for catalog in settings.statement_catalogs.iter().chain(extra) {
        let count = registry
            .load_catalog_file(catalog)
            .with_context(|| format!("failed to load statement catalog {}", catalog.display()))?;
        tracing::info!(path = %catalog.display(), count, "statement catalog loaded");
    }
    Ok(Arc::new(registry))
}

/// Configure a manager for every database present in the settings
async fn configure_managers(
    settings: &DesklineSettings,
    drivers: &DriverRegistry,
    registry: &Arc<StatementRegistry>,
    only: Option<LogicalDatabase>,
) -> anyhow::Result<Vec<DatabaseManager>> {
    let mut managers = Vec::new();
    for database in LogicalDatabase::ALL {
        if only.is_some_and(|only| only != database) {
            continue;
        }
        let Some(section) = settings.database(database) else {
            tracing::warn!(%database, "no settings for database, skipping");
            continue;
        };

        let manager = DatabaseManager::new(database, registry.clone());
        let targets = section.targets(database, drivers)?;
        manager
            .configure(section.pool.clone(), targets)
            .await
            .with_context(|| format!("failed to configure the {} pool", database))?;
        managers.push(manager);
    }
    if managers.is_empty() {
        bail!("no database is configured");
    }
    Ok(managers)
}

async fn shutdown_all(managers: &[DatabaseManager]) {
    for manager in managers {
        manager.shutdown().await;
    }
}

async fn validate(settings: &DesklineSettings, drivers: &DriverRegistry, args: ValidateArgs) -> anyhow::Result<()> {
    let registry = load_registry(settings, &args.catalogs)?;
    let managers = configure_managers(settings, drivers, &registry, args.database).await?;
    let roles: Vec<ConnectionRole> = match args.role {
        Some(role) => vec![role],
        None => ConnectionRole::ALL.to_vec(),
    };

    let mut reports = Vec::new();
    let mut outcome: anyhow::Result<()> = Ok(());
    'databases: for manager in &managers {
        for role in &roles {
            match validate_statements(manager, *role).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    outcome = Err(e).with_context(|| format!("validation of {} aborted", manager.database()));
                    break 'databases;
                }
            }
        }
    }
    shutdown_all(&managers).await;

    println!("{}", validation_table(&reports));
    outcome?;

    let failed: usize = reports.iter().map(|r| r.failed().count()).sum();
    if failed > 0 {
        bail!("{} statement(s) failed validation", failed);
    }
    Ok(())
}

fn validation_table(reports: &[ValidationReport]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Database", "Role", "Id", "Alias", "Result"]);

    for report in reports {
        for outcome in &report.outcomes {
            let result = match &outcome.error {
                None => Cell::new("ok").fg(Color::Green),
                Some(error) => Cell::new(error).fg(Color::Red),
            };
            table.add_row(vec![
                Cell::new(report.database),
                Cell::new(report.role),
                Cell::new(outcome.id.0),
                Cell::new(outcome.alias.as_deref().unwrap_or("")),
                result,
            ]);
        }
    }
    table
}

async fn diagnostics(
    settings: &DesklineSettings,
    drivers: &DriverRegistry,
    args: DiagnosticsArgs,
) -> anyhow::Result<()> {
    let registry = load_registry(settings, &[])?;
    let managers = configure_managers(settings, drivers, &registry, None).await?;

    let mut rows = Vec::new();
    for manager in &managers {
        let health = match manager.health_check().await {
            Ok(status) => status.to_string(),
            Err(e) => format!("unavailable: {}", e),
        };
        let diagnostics = manager.diagnostics();
        diagnostics.log();
        rows.push((diagnostics, health));
    }
    shutdown_all(&managers).await;

    if args.json {
        let json: Vec<_> = rows
            .iter()
            .map(|(diagnostics, health)| {
                serde_json::json!({
                    "diagnostics": diagnostics,
                    "health": health,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{}", diagnostics_table(&rows));
    }
    Ok(())
}

fn diagnostics_table(rows: &[(Diagnostics, String)]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Database",
        "Collection",
        "Total",
        "Idle",
        "In use",
        "Broken",
        "Waiting",
        "Queued jobs",
        "Statements",
        "Health",
    ]);

    for (diagnostics, health) in rows {
        for (key, stats) in diagnostics.collections.iter() {
            table.add_row(vec![
                Cell::new(diagnostics.database),
                Cell::new(key),
                Cell::new(stats.total),
                Cell::new(stats.idle),
                Cell::new(stats.in_use),
                Cell::new(stats.broken),
                Cell::new(diagnostics.waiting),
                Cell::new(diagnostics.queued_jobs),
                Cell::new(diagnostics.statements),
                Cell::new(health),
            ]);
        }
    }
    table
}

async fn tunnel(settings: &DesklineSettings, drivers: &DriverRegistry, args: TunnelArgs) -> anyhow::Result<()> {
    let section = settings
        .database(args.database)
        .with_context(|| format!("no settings for the {} database", args.database))?;
    let endpoint = if args.replica {
        section
            .replica
            .as_ref()
            .with_context(|| format!("the {} database has no replica", args.database))?
    } else {
        &section.primary
    };
    let tunnel_config = endpoint
        .tunnel
        .clone()
        .with_context(|| format!("the {} endpoint has no tunnel configured", args.database))?;

    let port = match endpoint.port {
        0 => drivers
            .require(&section.driver)?
            .default_port()
            .context("no port configured and the driver has no default")?,
        port => port,
    };

    let bastion = format!("{}@{}:{}", tunnel_config.username, tunnel_config.host, tunnel_config.port);
    let mut tunnel = SshTunnel::new(tunnel_config, endpoint.host.clone(), port);
    let mut tunnel = tokio::task::spawn_blocking(move || tunnel.start().map(|_| tunnel))
        .await
        .context("tunnel start task failed")??;

    let local_port = tunnel.local_port().context("tunnel is active without a local port")?;
    println!(
        "Forwarding {}:{} -> {}:{} via {} (Ctrl-C to stop)",
        tunnel.local_host(),
        local_port,
        endpoint.host,
        port,
        bastion
    );

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    tokio::task::spawn_blocking(move || tunnel.stop())
        .await
        .context("tunnel stop task failed")?;
    println!("Tunnel closed");
    Ok(())
}
