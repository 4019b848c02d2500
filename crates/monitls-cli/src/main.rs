//! Monitls CLI
//!
//! A small endpoint that accepts or opens TLS connections the way a
//! monitoring component would, using certificate or PSK authentication.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::Map;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use monitls_core::config::{parse_address, AppConfig, LoggingConfig};
use monitls_core::stats::{StatsBuilder, StatsRegistry};
use monitls_core::tls::{
    init_parent, ConnectRequest, FilePskStore, PskLookup, TlsConnection, TlsContext,
};

/// TLS endpoint for monitoring components.
#[derive(Parser)]
#[command(name = "monitls")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "monitls.yaml")]
    config: String,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept connections as allowed by TLSAccept and echo one line each.
    Listen {
        /// Override listen address.
        #[arg(long)]
        address: Option<String>,
    },
    /// Connect as configured by TLSConnect and exchange one line.
    Connect {
        /// Override connect address.
        #[arg(long)]
        address: Option<String>,

        /// PSK identity to present instead of TLSPSKIdentity.
        #[arg(long, requires = "psk_hex")]
        psk_identity: Option<String>,

        /// PSK as hex digits, used with --psk-identity.
        #[arg(long, requires = "psk_identity")]
        psk_hex: Option<String>,

        /// Line to send.
        #[arg(long, default_value = "ping")]
        message: String,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = AppConfig::from_file(&args.config)?;

    // Apply CLI overrides
    match &args.command {
        Command::Listen {
            address: Some(address),
        } => config.listen = address.clone(),
        Command::Connect {
            address: Some(address),
            ..
        } => config.connect = address.clone(),
        _ => {}
    }

    // Override log level from verbosity flag
    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };

    // Setup tracing
    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        role = %config.role,
        "starting monitls"
    );

    init_parent();

    let mut builder = TlsContext::builder(&config.tls, config.role);
    if let Some(path) = &config.psk_store {
        let store: Arc<dyn PskLookup> = Arc::new(FilePskStore::load(path)?);
        builder = builder.psk_lookup(store);
    }
    let context = Arc::new(TlsContext::init_child_or_exit(builder));

    let result = match args.command {
        Command::Listen { .. } => run_listener(&config, Arc::clone(&context)),
        Command::Connect {
            psk_identity,
            psk_hex,
            message,
            ..
        } => {
            let request = match (psk_identity, psk_hex) {
                (Some(identity), Some(psk_hex)) => ConnectRequest::psk_with(identity, psk_hex),
                _ => {
                    let mode = config
                        .tls
                        .connect_policy()?
                        .context("TLSConnect is not configured")?;
                    ConnectRequest::from_mode(mode)
                }
            };
            run_connect(&config, &context, request, &message)
        }
    };

    if let Ok(context) = Arc::try_unwrap(context) {
        context.teardown();
    }
    result
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

fn run_listener(config: &AppConfig, context: Arc<TlsContext>) -> anyhow::Result<()> {
    let modes = config
        .tls
        .accept_policy()?
        .context("TLSAccept is not configured")?;
    let address = parse_address(&config.listen)?;
    let listener = TcpListener::bind(address)?;

    let mut registry = StatsRegistry::new();
    let stats_context = Arc::clone(&context);
    registry.register(Box::new(
        move |builder: &mut dyn StatsBuilder, _: &monitls_core::TlsConfig| {
            stats_context.append_stats(builder);
        },
    ));
    let registry = Arc::new(registry);

    info!(address = %address, accept = %modes, "listening");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        let context = Arc::clone(&context);
        let registry = Arc::clone(&registry);
        let tls = config.tls.clone();

        thread::spawn(move || {
            match context.accept(stream, modes) {
                Ok(connection) => {
                    if let Err(e) = serve(connection, &peer) {
                        debug!(peer = %peer, error = %e, "connection closed with error");
                    }
                }
                Err(e) => warn!(peer = %peer, error = %e, "cannot accept connection"),
            }

            let mut document = Map::new();
            registry.collect(&mut document, &tls);
            debug!(stats = %serde_json::Value::Object(document), "statistics");
        });
    }

    Ok(())
}

/// Echo one line back to the peer.
fn serve(connection: TlsConnection<TcpStream>, peer: &str) -> anyhow::Result<()> {
    let attributes = connection.attributes().clone();
    info!(
        peer = %peer,
        mode = %attributes.mode(),
        psk_identity = attributes.psk_identity_lossy().as_deref(),
        subject = attributes.subject(),
        "connection accepted"
    );

    let mut reader = BufReader::new(connection);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let mut connection = reader.into_inner();
    connection.write_all(line.as_bytes())?;
    connection.flush()?;
    connection.close();
    Ok(())
}

fn run_connect(
    config: &AppConfig,
    context: &TlsContext,
    request: ConnectRequest,
    message: &str,
) -> anyhow::Result<()> {
    let address = parse_address(&config.connect)?;
    let stream = TcpStream::connect(address)
        .with_context(|| format!("cannot connect to {address}"))?;

    let mut connection = context.connect(stream, request)?;
    info!(
        address = %address,
        mode = %connection.mode(),
        issuer = connection.attributes().issuer(),
        "connected"
    );

    connection.write_all(format!("{message}\n").as_bytes())?;
    connection.flush()?;

    let mut reader = BufReader::new(connection);
    let mut reply = String::new();
    reader.read_line(&mut reply)?;
    println!("{}", reply.trim_end());

    reader.into_inner().close();
    Ok(())
}
