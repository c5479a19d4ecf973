//! tickerlink - command line client for STOMP price feeds

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tickerlink::config::ClientConfig;
use tickerlink::observability::init_default_logging;
use tickerlink::{
    ConnectionStatus, EventKind, EventListener, Headers, InboundMessage, MessageBody,
    MessageHandler, ServiceEvent, TopicBuilder, WebSocketService,
};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const RESET: &str = "\x1b[0m";
const CYAN: &str = "\x1b[36m";

/// Real-time price feed client
#[derive(Parser)]
#[command(name = "tickerlink")]
#[command(about = "Reconnecting STOMP-over-WebSocket client for real-time price feeds")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and print inbound messages until Ctrl-C
    Watch {
        /// ETF code to follow (repeatable)
        #[arg(long = "etf", value_name = "CODE")]
        etfs: Vec<String>,

        /// Stock code to follow (repeatable)
        #[arg(long = "stock", value_name = "CODE")]
        stocks: Vec<String>,

        /// Raw destination to follow (repeatable)
        #[arg(long = "topic", value_name = "DEST")]
        topics: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        format: OutputFormat,
    },
    /// Publish one message, then disconnect
    Send {
        #[arg(short, long)]
        destination: String,

        #[arg(short, long)]
        body: String,

        /// Treat the body as JSON
        #[arg(long)]
        json: bool,

        /// Extra header as name=value (repeatable)
        #[arg(long = "header", value_name = "NAME=VALUE", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(long)]
        show: bool,
    },
}

/// Output formatting options
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Colored header with pretty-printed JSON payload
    Pretty,
    /// Single line per message
    Compact,
    /// One JSON object per line
    Json,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Watch {
            etfs,
            stocks,
            topics,
            format,
        } => {
            let mut destinations: Vec<String> =
                etfs.iter().map(|code| TopicBuilder::etf_price(code)).collect();
            destinations.extend(stocks.iter().map(|code| TopicBuilder::stock_price(code)));
            destinations.extend(topics);
            run_watch(config, destinations, format).await
        }
        Commands::Send {
            destination,
            body,
            json,
            headers,
        } => run_send(config, destination, body, json, headers).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(path: Option<&Path>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ClientConfig::load_from_file(path)?)
        }
        None => {
            for candidate in ["tickerlink.toml", "config/tickerlink.toml"] {
                let path = PathBuf::from(candidate);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ClientConfig::load_from_file(&path)?);
                }
            }
            info!("No configuration file found, using defaults");
            Ok(ClientConfig::default())
        }
    }
}

fn status_logger() -> EventListener {
    EventListener::new(|event| {
        if let ServiceEvent::StatusChange(status) = event {
            info!(status = %status, "Connection status");
        }
    })
}

async fn run_watch(
    config: ClientConfig,
    destinations: Vec<String>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if destinations.is_empty() {
        return Err("nothing to watch: pass --etf, --stock or --topic".into());
    }

    let service = WebSocketService::new(config.service_options())?;
    service.add_event_listener(EventKind::StatusChange, status_logger());
    service.add_event_listener(
        EventKind::Error,
        EventListener::new(|event| {
            if let ServiceEvent::Error(e) = event {
                warn!(error = %e, "Connection error");
            }
        }),
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
    for destination in &destinations {
        let tx = tx.clone();
        let handler = MessageHandler::new(move |message| {
            let _ = tx.send(message.clone());
        });
        service.subscribe(destination.clone(), handler).await?;
        info!(destination = %destination, "Watching");
    }
    drop(tx);

    let mut status = service.status_receiver();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            Some(message) = rx.recv() => println!("{}", format_message(&message, format)),
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow();
                if current == ConnectionStatus::Error {
                    let snapshot = service.snapshot().await?;
                    if !snapshot.reconnect_scheduled {
                        error!("Connection lost and reconnection gave up");
                        service.dispose();
                        return Err("connection permanently lost".into());
                    }
                }
            }
        }
    }

    service.dispose();
    Ok(())
}

async fn run_send(
    config: ClientConfig,
    destination: String,
    body: String,
    json: bool,
    headers: Vec<(String, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = WebSocketService::new(config.service_options())?;
    service.add_event_listener(EventKind::StatusChange, status_logger());

    let body = if json {
        MessageBody::Json(serde_json::from_str(&body)?)
    } else {
        MessageBody::Text(body)
    };
    let headers: Headers = headers.into_iter().collect();

    service.connect().await?;
    let message_id = service
        .send_with_headers(destination.clone(), body, headers)
        .await?;
    info!(destination = %destination, message_id = %message_id, "{}", send_outcome(&message_id));
    println!("{message_id}");

    service.disconnect().await?;
    service.dispose();
    Ok(())
}

/// A `pending-` id means the connection dropped and the message is still queued
fn send_outcome(message_id: &str) -> &'static str {
    if message_id.starts_with("pending-") {
        "Message queued"
    } else {
        "Message sent"
    }
}

fn handle_config_command(
    config: &ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn format_message(message: &InboundMessage, format: OutputFormat) -> String {
    let timestamp = message.received_at.format("%H:%M:%S%.3f");
    let payload = serde_json::from_str::<serde_json::Value>(&message.body).ok();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "timestamp": message.received_at.to_rfc3339(),
                "destination": message.destination,
                "subscription": message.subscription,
                "message_id": message.message_id,
                "payload": payload.unwrap_or_else(|| serde_json::Value::String(message.body.clone())),
            });
            serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Compact => format!(
            "{} {} {}",
            timestamp,
            message.destination,
            message.body.replace('\n', " ").trim()
        ),
        OutputFormat::Pretty => {
            let body = payload
                .and_then(|json| serde_json::to_string_pretty(&json).ok())
                .unwrap_or_else(|| message.body.clone());
            format!("{CYAN}[{}]{RESET} {timestamp}\n{body}", message.destination)
        }
    }
}
