use clap::Parser;
use log::{debug, info, warn};
use plaza_client::wander::Wanderer;
use plaza_client::{plaza_url, ClientEvent, PlazaClient};
use plaza_shared::token::{self, SessionClaims};
use plaza_shared::{ClientMessage, PlazaEvent, ServerMessage, JOIN_SCOPE};
use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Token signing secret shared with the server
    #[arg(long, env = "PLAZA_SECRET", hide_env_values = true)]
    secret: String,

    /// Subject id, also used for the display name
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Session id; random when absent
    #[arg(long)]
    session: Option<String>,

    /// Input messages per second
    #[arg(long, default_value = "20")]
    input_hz: u32,

    /// Seconds between chat messages, 0 to stay quiet
    #[arg(long, default_value = "0")]
    chat_every: u64,

    /// Seed for the wander pattern
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

fn mint_token(args: &Args) -> Result<String, serde_json::Error> {
    let mut rng = rand::thread_rng();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();

    let claims = SessionClaims {
        sub: args.name.clone(),
        sid: args
            .session
            .clone()
            .unwrap_or_else(|| format!("{}-{:08x}", args.name, rng.gen::<u32>())),
        exp: now + 3600,
        nonce: format!("{:016x}", rng.gen::<u64>()),
        scope: Some(vec![JOIN_SCOPE.to_string()]),
        owned: None,
    };
    token::issue(&claims, args.secret.as_bytes())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let token = mint_token(&args)?;

    info!("Connecting to {} as {}", args.server, args.name);
    let mut client = PlazaClient::connect(&plaza_url(&args.server, &token)).await?;

    client
        .send(&ClientMessage::Hello {
            build: Some(env!("CARGO_PKG_VERSION").to_string()),
            device: Some("plaza-bot".to_string()),
            locale: None,
        })
        .await?;
    client.send(&ClientMessage::Auth { token: None }).await?;

    let mut wanderer = Wanderer::new(args.seed);
    let mut inputs = interval(Duration::from_secs_f64(1.0 / f64::from(args.input_hz.max(1))));
    inputs.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut chats = interval(Duration::from_secs(args.chat_every.max(1)));
    chats.tick().await;

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration.unwrap_or(u64::MAX / 4)));
    tokio::pin!(deadline);

    let mut joined = false;
    let mut seq: u64 = 0;
    let started = std::time::Instant::now();

    loop {
        tokio::select! {
            event = client.recv() => match event? {
                ClientEvent::Message(ServerMessage::Joined { you, others }) => {
                    info!("Joined as {} at {:?} with {} others", you.id, you.pos, others.len());
                    joined = true;
                }
                ClientEvent::Message(ServerMessage::State { seq_ack, players, .. }) => {
                    debug!("State: {} players, acked input {}", players.len(), seq_ack);
                }
                ClientEvent::Message(ServerMessage::Event(PlazaEvent::Chat { name, text, .. })) => {
                    info!("<{}> {}", name, text);
                }
                ClientEvent::Message(message) => debug!("{:?}", message),
                ClientEvent::Closed { code, reason } => {
                    warn!("Server closed the connection ({}): {}", code, reason);
                    return Ok(());
                }
            },
            _ = inputs.tick(), if joined => {
                seq += 1;
                client
                    .send(&ClientMessage::Input {
                        seq,
                        ts: started.elapsed().as_secs_f64() * 1000.0,
                        axes: wanderer.next_axes(),
                        emote: wanderer.next_emote().map(String::from),
                    })
                    .await?;
            }
            _ = chats.tick(), if joined && args.chat_every > 0 => {
                client
                    .send(&ClientMessage::Chat { text: format!("hello from {}", args.name) })
                    .await?;
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Disconnecting after {} inputs", seq);
    client.close().await?;
    Ok(())
}
