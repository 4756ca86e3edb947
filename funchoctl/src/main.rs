use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use provision_engine::{Provisioner, SystemRunner};
use serde::Serialize;
use shared_utils::config::Config;
use shared_utils::logging::{init_logging, LogOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for tracing::Level {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Trace => tracing::Level::TRACE,
            LogLevelArg::Debug => tracing::Level::DEBUG,
            LogLevelArg::Info => tracing::Level::INFO,
            LogLevelArg::Warn => tracing::Level::WARN,
            LogLevelArg::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = "Examples:\n  funchoctl init\n  funchoctl client add --name laptop --email me@example.com\n  funchoctl client config --id 1 > laptop.ovpn\n  funchoctl sessions --output json\n  funchoctl service restart")]
struct Args {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config.toml",
        env = "FUNCHOVPN_CONFIG"
    )]
    config: PathBuf,

    /// Log level
    #[arg(
        short,
        long,
        value_enum,
        default_value = "info",
        env = "FUNCHOVPN_LOG_LEVEL"
    )]
    log_level: LogLevelArg,

    /// Emit JSON log lines
    #[arg(long, env = "FUNCHOVPN_JSON_LOGS")]
    json_logs: bool,

    /// Output format for command results (table|json)
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize the PKI tree and write the server configuration
    Init,
    /// Regenerate the server configuration from current settings
    Apply,
    /// Manage provisioned clients
    Client {
        #[command(subcommand)]
        action: ClientCmd,
    },
    /// List currently connected sessions
    Sessions,
    /// Show whether the tunnel daemon is running
    Status,
    /// Control the tunnel daemon
    Service {
        #[command(subcommand)]
        action: ServiceCmd,
    },
}

#[derive(Subcommand, Debug)]
enum ClientCmd {
    /// Provision a new client
    Add {
        /// Human label for the client
        #[arg(long)]
        name: String,
        /// Contact address
        #[arg(long)]
        email: Option<String>,
        /// Days until the identity expires
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
    /// List clients with their live connection state
    List,
    /// Revoke a client's certificate and disable it
    Revoke {
        #[arg(long)]
        id: u32,
    },
    /// Revoke and delete a client
    Remove {
        #[arg(long)]
        id: u32,
    },
    /// Print a client's portable configuration
    Config {
        #[arg(long)]
        id: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ServiceCmd {
    Start,
    Stop,
    Restart,
}

#[derive(Serialize)]
struct Message<'a> {
    status: &'a str,
    detail: &'a str,
}

fn print_msg(fmt: OutputFormat, status: &str, detail: &str) {
    match fmt {
        OutputFormat::Table => println!("{status}: {detail}"),
        OutputFormat::Json => {
            let msg = Message { status, detail };
            println!("{}", serde_json::to_string_pretty(&msg).unwrap());
        }
    }
}

fn print_records<T: Serialize>(fmt: OutputFormat, records: &T, table: impl FnOnce()) {
    match fmt {
        OutputFormat::Table => table(),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records).unwrap());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level: tracing::Level = args.log_level.into();
    let _guard = init_logging(LogOptions {
        level,
        json_format: args.json_logs,
        ..Default::default()
    });

    let config = Config::load_or_default(&args.config)?;
    let engine = Provisioner::open(config, Arc::new(SystemRunner::new())).await;

    match args.command {
        Command::Init => {
            engine.initialize().await?;
            engine.apply_server_config().await?;
            print_msg(args.output, "ok", "PKI initialized and server config written");
        }
        Command::Apply => {
            engine.apply_server_config().await?;
            print_msg(
                args.output,
                "ok",
                "server config written; restart the service to pick it up",
            );
        }
        Command::Client { action } => match action {
            ClientCmd::Add {
                name,
                email,
                expires_in_days,
            } => {
                let record = engine.create_client(&name, email, expires_in_days).await?;
                print_records(args.output, &record, || {
                    println!(
                        "client {} ({}) provisioned with address {}",
                        record.id, record.name, record.ip_address
                    );
                });
            }
            ClientCmd::List => {
                let overview = engine.client_overview().await;
                print_records(args.output, &overview, || {
                    println!(
                        "{:<5} {:<20} {:<16} {:<9} {:<10} {:>12} {:>12}",
                        "ID", "NAME", "ADDRESS", "ENABLED", "CONNECTED", "RX BYTES", "TX BYTES"
                    );
                    for entry in &overview {
                        println!(
                            "{:<5} {:<20} {:<16} {:<9} {:<10} {:>12} {:>12}",
                            entry.client.id,
                            entry.client.name,
                            entry.client.ip_address,
                            entry.client.enabled,
                            entry.connected,
                            entry.bytes_received,
                            entry.bytes_sent
                        );
                    }
                });
            }
            ClientCmd::Revoke { id } => {
                engine.revoke_client(id).await?;
                print_msg(args.output, "ok", &format!("client {id} revoked"));
            }
            ClientCmd::Remove { id } => {
                engine.remove_client(id).await?;
                print_msg(args.output, "ok", &format!("client {id} removed"));
            }
            ClientCmd::Config { id } => {
                let rendered = engine.client_config(id).await?;
                // The rendered config goes to stdout untouched so it can
                // be redirected straight into an .ovpn file.
                println!("{rendered}");
            }
        },
        Command::Sessions => {
            let report = engine.sessions().await;
            print_records(args.output, &report, || {
                if report.sessions.is_empty() {
                    println!("no active sessions");
                }
                for session in &report.sessions {
                    println!(
                        "{:<20} {:<24} rx {:>12} tx {:>12} since {}",
                        session.common_name,
                        session.real_address,
                        session.bytes_received,
                        session.bytes_sent,
                        session.connected_since
                    );
                }
                if report.skipped_rows > 0 {
                    println!("({} malformed rows skipped)", report.skipped_rows);
                }
            });
        }
        Command::Status => {
            let active = engine.server_active().await;
            let detail = if active { "active" } else { "inactive" };
            print_msg(args.output, "ok", detail);
        }
        Command::Service { action } => {
            match action {
                ServiceCmd::Start => engine.start_server().await?,
                ServiceCmd::Stop => engine.stop_server().await?,
                ServiceCmd::Restart => engine.restart_server().await?,
            }
            print_msg(args.output, "ok", "service command issued");
        }
    }

    info!("funchoctl command completed");
    Ok(())
}
