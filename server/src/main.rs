use clap::Parser;
use log::info;
use plaza_server::ratelimit::RateLimit;
use plaza_server::{Server, ServerConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Shared token signing secret
    #[clap(long, env = "PLAZA_SECRET", hide_env_values = true)]
    secret: String,
    /// Maximum concurrently joined players
    #[clap(short, long, default_value = "64")]
    max_clients: usize,
    /// Movement tick interval in milliseconds
    #[clap(long, default_value = "50")]
    tick_ms: u64,
    /// Snapshot broadcast interval in milliseconds
    #[clap(long, default_value = "100")]
    snapshot_ms: u64,
    /// Time allowed between connecting and `auth`, in milliseconds
    #[clap(long, default_value = "5000")]
    handshake_timeout_ms: u64,
    /// Time allowed for close frames to flush on shutdown, in milliseconds
    #[clap(long, default_value = "250")]
    shutdown_grace_ms: u64,
    /// Message of the day sent in `welcome`
    #[clap(long, default_value = "Welcome to the plaza!")]
    motd: String,
    /// Instance identifier; random when absent
    #[clap(long)]
    instance_id: Option<String>,
    /// Chat messages allowed per window
    #[clap(long, default_value = "5")]
    chat_limit: usize,
    #[clap(long, default_value = "10000")]
    chat_window_ms: u64,
    /// Emotes allowed per window
    #[clap(long, default_value = "6")]
    emote_limit: usize,
    #[clap(long, default_value = "4000")]
    emote_window_ms: u64,
    /// Comma-separated words masked in chat
    #[clap(long, value_delimiter = ',')]
    blocked_words: Vec<String>,
    /// Default log filter, overridden by RUST_LOG
    #[clap(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::new(self.secret);
        config.host = self.host;
        config.port = self.port;
        config.max_clients = self.max_clients;
        config.tick_interval = Duration::from_millis(self.tick_ms);
        config.snapshot_interval = Duration::from_millis(self.snapshot_ms);
        config.handshake_timeout = Duration::from_millis(self.handshake_timeout_ms);
        config.shutdown_grace = Duration::from_millis(self.shutdown_grace_ms);
        config.motd = self.motd;
        if let Some(instance_id) = self.instance_id {
            config.instance_id = instance_id;
        }
        config.chat_limit = RateLimit {
            max_actions: self.chat_limit,
            window: Duration::from_millis(self.chat_window_ms),
        };
        config.emote_limit = RateLimit {
            max_actions: self.emote_limit,
            window: Duration::from_millis(self.emote_window_ms),
        };
        config.blocked_words = self.blocked_words;
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let server = Server::bind(args.into_config()).await?;
    info!("Press Ctrl+C to stop");

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
