use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use mazu_api::{HttpApi, MazuApi};
use mazu_core::{Entity, ErrorFrame};
use mazu_hub::{Channel, ChannelConfig};
use mazu_store::Collection;
use mazu_sync::SyncStore;
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mazuctl", version, about = "Mazu dashboard store from the command line")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Service base URL
    #[arg(long, env = "MAZU_URL", global = true, default_value = "http://127.0.0.1:3000")]
    url: String,

    /// Bearer token; enables the credentialed push session
    #[arg(long, env = "MAZU_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// User name reported to the push channel
    #[arg(long, env = "MAZU_USER", global = true)]
    user: Option<String>,

    /// Client identity reported to the push channel
    #[arg(long, env = "MAZU_CLIENT", global = true)]
    client: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Kind {
    Challenges,
    Teams,
    Exploits,
    ExploitRuns,
    Rounds,
    Jobs,
    Flags,
    Settings,
    Containers,
    WsConnections,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load once and print one collection
    Ls {
        kind: Kind,
        /// Round for jobs/flags (jobs default to the selected round)
        #[arg(long)]
        round: Option<i32>,
    },
    /// Load, follow the push channel and print every collection change
    Watch,
    /// Round commands
    Round {
        #[command(subcommand)]
        action: RoundCmd,
    },
    /// Service version
    Version,
}

#[derive(Subcommand, Debug)]
enum RoundCmd {
    /// Create a new round and print its id
    New,
    Run { id: i32 },
    Rerun { id: i32 },
    /// Re-run jobs of a round that produced no flag
    RerunUnflagged { id: i32 },
    ScheduleUnflagged { id: i32 },
}

fn init_tracing() {
    let env = std::env::var("MAZU_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MAZU_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid MAZU_METRICS_ADDR; expected host:port");
        }
    }
}

fn channel_config(cli: &Cli) -> ChannelConfig {
    let client = cli.client.clone().unwrap_or_else(|| format!("mazuctl-{}", env!("CARGO_PKG_VERSION")));
    let mut cfg = ChannelConfig::new(cli.url.clone(), client).with_token(cli.token.clone()).with_user(cli.user.clone());
    if let Some(ms) = std::env::var("MAZU_RECONNECT_MS").ok().and_then(|s| s.parse::<u64>().ok()) {
        cfg = cfg.with_reconnect_delay(Duration::from_millis(ms));
    }
    cfg
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let api: Arc<dyn MazuApi> = Arc::new(HttpApi::new(cli.url.clone()).with_token(cli.token.clone()));
    let channel = Channel::with_auth_failure(
        channel_config(&cli),
        Arc::new(|frame: ErrorFrame| warn!(message = ?frame.message, code = ?frame.code, "push channel rejected credentials")),
    );
    let store = SyncStore::with_channel(api.clone(), channel);

    match cli.command {
        Commands::Ls { kind, round } => {
            info!(?kind, round = ?round, "ls invoked");
            store.load_all().await.context("initial load")?;
            print_kind(&store, kind, round, cli.output).await?;
        }
        Commands::Watch => {
            store.load_all().await.context("initial load")?;
            report(&store, SyncStore::challenges, cli.output);
            report(&store, SyncStore::teams, cli.output);
            report(&store, SyncStore::exploits, cli.output);
            report(&store, SyncStore::exploit_runs, cli.output);
            report(&store, SyncStore::rounds, cli.output);
            report(&store, SyncStore::jobs, cli.output);
            report(&store, SyncStore::flags, cli.output);
            report(&store, SyncStore::settings, cli.output);
            report(&store, SyncStore::containers, cli.output);
            report(&store, SyncStore::ws_connections, cli.output);
            store.start();
            info!(url = %cli.url, "watching; Ctrl-C to stop");
            signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            store.stop();
        }
        Commands::Round { action } => match action {
            RoundCmd::New => {
                let id = store.create_round().await?;
                match cli.output {
                    Output::Human => println!("round #{} created", id),
                    Output::Json => println!("{}", serde_json::json!({ "id": id })),
                }
            }
            RoundCmd::Run { id } => store.run_round(Some(id)).await?,
            RoundCmd::Rerun { id } => store.rerun_round(Some(id)).await?,
            RoundCmd::RerunUnflagged { id } => store.rerun_unflagged_round(Some(id)).await?,
            RoundCmd::ScheduleUnflagged { id } => store.schedule_unflagged_round(Some(id)).await?,
        },
        Commands::Version => {
            let v = api.version().await?;
            match cli.output {
                Output::Human => println!("{} {}", v.version, v.git_hash.as_deref().unwrap_or("")),
                Output::Json => println!("{}", serde_json::to_string_pretty(&v)?),
            }
        }
    }

    Ok(())
}

/// Print a line every time `pick(store)` publishes a new epoch.
fn report<T: Entity>(store: &Arc<SyncStore>, pick: fn(&SyncStore) -> &Collection<T>, output: Output) {
    let store = Arc::clone(store);
    let mut rx = pick(&store).subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let c = pick(&store);
            match output {
                Output::Human => println!("{:<15} epoch={:<6} len={}", c.name(), c.epoch(), c.len()),
                Output::Json => println!("{}", serde_json::json!({ "collection": c.name(), "epoch": c.epoch(), "len": c.len() })),
            }
        }
    });
}

async fn print_kind(store: &SyncStore, kind: Kind, round: Option<i32>, output: Output) -> Result<()> {
    match kind {
        Kind::Challenges => print_rows(output, "ID   NAME                 ENABLED  AGE", store.challenges().items(), |c| {
            format!("{:<4} {:<20} {:<8} {}", c.id, c.name, c.enabled, render_age(c.created_at))
        }),
        Kind::Teams => print_rows(output, "ID   TEAM        NAME                 IP", store.teams().items(), |t| {
            format!("{:<4} {:<11} {:<20} {}", t.id, t.team_id, t.team_name, t.default_ip.as_deref().unwrap_or("-"))
        }),
        Kind::Exploits => print_rows(output, "ID   CHAL NAME                 IMAGE", store.exploits().items(), |e| {
            format!("{:<4} {:<4} {:<20} {}", e.id, e.challenge_id, e.name, e.docker_image)
        }),
        Kind::ExploitRuns => print_rows(output, "ID   EXPLOIT TEAM SEQ  ENABLED", store.exploit_runs().items(), |r| {
            format!("{:<4} {:<7} {:<4} {:<4} {}", r.id, r.exploit_id, r.team_id, r.sequence, r.enabled)
        }),
        Kind::Rounds => {
            let selected = store.selections().round();
            print_rows(output, "  ID   STATUS     JOBS   AGE", store.rounds().items(), |r| {
                let mark = if Some(r.id) == selected { '*' } else { ' ' };
                let jobs = if r.jobs_ready() { "ready" } else { "wait" };
                format!("{} {:<4} {:<10} {:<6} {}", mark, r.id, r.status, jobs, render_age(r.started_at))
            })
        }
        Kind::Jobs => {
            if round.is_some() {
                store.select_round(round).await?;
            }
            print_rows(output, "ID    ROUND TEAM STATUS     CONTAINER", store.jobs().items(), |j| {
                format!("{:<5} {:<5} {:<4} {:<10} {}", j.id, j.round_id, j.team_id, j.status, j.container_id.as_deref().unwrap_or("-"))
            })
        }
        Kind::Flags => {
            store.load_flags(round).await?;
            print_rows(output, "ID    ROUND CHAL TEAM STATUS     FLAG", store.flags().items(), |f| {
                format!("{:<5} {:<5} {:<4} {:<4} {:<10} {}", f.id, f.round_id, f.challenge_id, f.team_id, f.status, f.flag_value)
            })
        }
        Kind::Settings => print_rows(output, "KEY                  VALUE", store.settings().items(), |s| format!("{:<20} {}", s.key, s.value)),
        Kind::Containers => {
            store.load_containers().await?;
            print_rows(output, "ID            EXPLOIT STATUS     EXECS", store.containers().items(), |c| {
                let short: String = c.id.chars().take(12).collect();
                format!("{:<13} {:<7} {:<10} {}/{}", short, c.exploit_id, c.status, c.running_execs, c.max_execs)
            })
        }
        Kind::WsConnections => {
            store.load_ws_connections().await?;
            print_rows(output, "ID                                   CLIENT           USER", store.ws_connections().items(), |w| {
                format!("{:<36} {:<16} {}", w.id, w.client.as_deref().unwrap_or("-"), w.user.as_deref().unwrap_or("-"))
            })
        }
    }
}

fn print_rows<T: Serialize>(output: Output, header: &str, items: Vec<T>, row: impl Fn(&T) -> String) -> Result<()> {
    match output {
        Output::Human => {
            println!("{}", header);
            for it in &items {
                println!("{}", row(it));
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&items)?),
    }
    Ok(())
}

fn render_age(ts: DateTime<Utc>) -> String {
    let mut secs = (Utc::now() - ts).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}
