//! ECS CA Gateway - command line front end for the Entrust Certificate Services gateway
//!
//! Loads the gateway configuration, initialises logging and runs one gateway
//! operation. Synchronization streams certificate records to stdout as JSON lines.

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config::LogFormat;
use ecs_ca_gateway::models::GenericCertificateRecord;
use ecs_ca_gateway::{config, EcsGateway, GatewayConfig, InMemoryCertificateReader};

/// Capacity of the channel between the synchronizer and the stdout writer
const SINK_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().skip(1).collect();

    // Check for --help flag
    if args.is_empty() || args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    // Check for --version flag
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("ECS CA Gateway {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let mut config = GatewayConfig::load().context("Failed to load configuration")?;
    if args.iter().any(|arg| arg == "--ignore-expired") {
        config.ignore_expired = true;
    }

    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config);

    info!("ECS CA Gateway starting up");
    info!("Using ECS endpoint {}", config.connection.url);

    let positional: Vec<&str> = args
        .iter()
        .filter(|arg| !arg.starts_with("--"))
        .map(String::as_str)
        .collect();

    match positional.as_slice() {
        ["ping"] => {
            let gateway = build_gateway(config)?;
            gateway.ping().await?;
            println!("ECS connection OK");
        }
        ["version"] => {
            let gateway = build_gateway(config)?;
            println!("{}", gateway.application_version().await?);
        }
        ["products"] => {
            let gateway = build_gateway(config)?;
            for product in gateway.get_product_ids().await {
                println!("{}", product);
            }
        }
        ["validate"] => {
            EcsGateway::validate_connection_info(&config).await?;
            println!("Configuration is valid");
        }
        ["record", id] => {
            let gateway = build_gateway(config)?;
            let record = gateway.get_single_record(id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        ["revoke", id, serial, rest @ ..] => {
            let reason = match rest {
                [] => 0,
                [code] => code
                    .parse::<u32>()
                    .with_context(|| format!("Invalid revocation reason code '{}'", code))?,
                _ => bail!("Too many arguments for revoke"),
            };
            let gateway = build_gateway(config)?;
            let status = gateway.revoke(id, serial, reason).await?;
            println!("{} {}", id, status);
        }
        ["sync"] => {
            let full_sync = args.iter().any(|arg| arg == "--full");
            let gateway = build_gateway(config)?;
            run_sync(gateway, full_sync).await?;
        }
        other => {
            print_help();
            bail!("Unknown command: {}", other.join(" "));
        }
    }

    Ok(())
}

fn build_gateway(config: GatewayConfig) -> Result<EcsGateway> {
    let reader = Arc::new(InMemoryCertificateReader::new());
    EcsGateway::new(config, reader).context("Failed to initialize ECS gateway")
}

/// Run one synchronization pass, printing each record as a JSON line
async fn run_sync(gateway: EcsGateway, full_sync: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let (sink, mut records) = mpsc::channel::<GenericCertificateRecord>(SINK_CAPACITY);

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling synchronization");
            ctrl_c.cancel();
        }
    });

    let writer = tokio::spawn(async move {
        let mut written = 0usize;
        while let Some(record) = records.recv().await {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    println!("{}", line);
                    written += 1;
                }
                Err(e) => error!("Failed to serialize record {}: {}", record.ca_request_id, e),
            }
        }
        written
    });

    let result = gateway.synchronize(&sink, None, full_sync, &cancel).await;
    drop(sink);
    let written = writer.await.context("Record writer task failed")?;

    let summary = result?;
    info!("Wrote {} records", written);
    eprintln!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

/// Initialize logging based on configuration
///
/// Returns a guard that must be kept alive for the duration of the program
/// when file logging is enabled.
fn init_logging(config: &GatewayConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use config::LogTarget;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_config = &config.logging;

    // Console logging goes to stderr; stdout carries command output
    let console = matches!(log_config.target, LogTarget::Console | LogTarget::Both);
    let (file_writer, guard) = match log_config.target {
        LogTarget::Console => (None, None),
        LogTarget::File | LogTarget::Both => {
            let (writer, guard) = create_file_writer(log_config);
            (Some(writer), Some(guard))
        }
    };

    let subscriber = tracing_subscriber::registry().with(env_filter);
    match log_config.format {
        LogFormat::Json => subscriber
            .with(console.then(|| fmt::layer().json().with_target(true).with_writer(std::io::stderr)))
            .with(file_writer.map(|w| fmt::layer().json().with_target(true).with_writer(w)))
            .init(),
        LogFormat::Compact => subscriber
            .with(console.then(|| {
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr)
            }))
            .with(file_writer.map(|w| {
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(w)
            }))
            .init(),
        LogFormat::Pretty => subscriber
            .with(console.then(|| {
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
            }))
            .with(file_writer.map(|w| {
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(false)
                    .with_writer(w)
            }))
            .init(),
    }

    guard
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    // Ensure log directory exists
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

fn print_help() {
    println!(
        r#"ECS CA Gateway {}

USAGE:
    ecs-ca-gateway <COMMAND> [OPTIONS]

COMMANDS:
    ping                    Check connectivity and credentials
    version                 Print the ECS API version
    products                List product types with inventory
    validate                Validate the configuration against ECS
    record <ID>             Print the current record of a certificate
                            (tracking id or 0-<thumbprint>)
    revoke <ID> <SERIAL> [REASON]
                            Revoke an issued certificate; REASON is the
                            numeric CRL reason code (default 0)
    sync                    Stream certificate records as JSON lines

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --full                  Emit every certificate during sync
    --ignore-expired        Skip expired certificates during sync

ENVIRONMENT:
    ECS_GATEWAY_CONFIG  Path to configuration file (default: config.yaml)
    ECS_URL, ECS_USERNAME, ECS_PASSWORD
                        Override connection settings
    ECS_CLIENT_CERT, ECS_CLIENT_KEY
                        Client certificate for mutual TLS

CONFIGURATION:
    The gateway looks for configuration files in the following order:
    1. Path specified by ECS_GATEWAY_CONFIG environment variable
    2. ./config.yaml
    3. ./config/config.yaml
    4. /etc/ecs-ca-gateway/config.yaml
    5. <user config dir>/ecs-ca-gateway/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
