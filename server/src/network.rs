//! Server network layer: WebSocket acceptance, per-connection socket tasks
//! and the plaza loop that coordinates them with the simulation.

use crate::client_manager::{ConnId, Outbound};
use crate::config::ServerConfig;
use crate::error::{CloseReason, ServerError};
use crate::game::capped_elapsed;
use crate::sanitize::{TextSanitizer, WordFilter};
use crate::session::Plaza;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use plaza_shared::{ClientMessage, TOKEN_QUERY_PARAM};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Largest inbound message or frame accepted from a client.
pub const MAX_INBOUND_FRAME: usize = 16 * 1024;

/// How long a server-closed socket waits for the peer's close reply.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Events sent from socket and timer tasks to the plaza loop
#[derive(Debug)]
pub enum NetworkEvent {
    NewConnection {
        conn_id: ConnId,
        token: Option<String>,
        outbound: Outbound,
    },
    ClientMessage {
        conn_id: ConnId,
        message: ClientMessage,
    },
    ClientDisconnect {
        conn_id: ConnId,
    },
    HandshakeTimeout {
        conn_id: ConnId,
    },
}

/// Bound plaza server. Call [`Server::run`] to start serving.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    sanitizer: Arc<dyn TextSanitizer>,
    count_tx: watch::Sender<usize>,
    count_rx: watch::Receiver<usize>,
}

impl Server {
    /// Validates the configuration and binds the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_address()).await?;
        info!("Plaza {} listening on {}", config.instance_id, listener.local_addr()?);

        let sanitizer: Arc<dyn TextSanitizer> = if config.blocked_words.is_empty() {
            Arc::new(WordFilter::default())
        } else {
            Arc::new(WordFilter::new(&config.blocked_words))
        };
        let (count_tx, count_rx) = watch::channel(0);

        Ok(Server {
            listener,
            config: Arc::new(config),
            sanitizer,
            count_tx,
            count_rx,
        })
    }

    /// Replaces the chat sanitizer.
    pub fn with_sanitizer(mut self, sanitizer: impl TextSanitizer + 'static) -> Self {
        self.sanitizer = Arc::new(sanitizer);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Subscribes to the number of Joined players.
    pub fn player_count(&self) -> watch::Receiver<usize> {
        self.count_rx.clone()
    }

    /// Serves until `shutdown` resolves, then closes every connection.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            config,
            sanitizer,
            count_tx,
            ..
        } = self;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut plaza = Plaza::new(Arc::clone(&config), sanitizer, events_tx.clone(), count_tx);

        let accept_task = tokio::spawn(accept_loop(listener, events_tx));

        let mut ticks = interval(config.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut snapshots = interval(config.snapshot_interval);
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    plaza.handle_event(event);
                }
                _ = ticks.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_tick);
                    if elapsed > config.tick_interval * 2 {
                        debug!(
                            "Slow tick: {:?} elapsed, integrating {:?}",
                            elapsed,
                            capped_elapsed(elapsed)
                        );
                    }
                    plaza.tick(elapsed);
                    last_tick = now;
                }
                _ = snapshots.tick() => {
                    plaza.broadcast_snapshot();
                }
                _ = &mut shutdown => {
                    break;
                }
            }
        }

        accept_task.abort();
        let closed = plaza.shutdown();
        info!("Shutting down, closed {} connections", closed);

        refuse_until(&mut events_rx, tokio::time::sleep(config.shutdown_grace)).await;
        info!("Plaza {} stopped", config.instance_id);
        Ok(())
    }
}

/// Answers connections that registered after the plaza was drained with
/// `server_shutdown`, until `deadline` resolves. Other events are dropped.
async fn refuse_until<F>(events_rx: &mut mpsc::UnboundedReceiver<NetworkEvent>, deadline: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return,
            Some(event) = events_rx.recv() => {
                if let NetworkEvent::NewConnection { conn_id, outbound, .. } = event {
                    debug!("Refusing client {} during shutdown", conn_id);
                    outbound.close(CloseReason::ServerShutdown);
                }
            }
        }
    }
}

fn websocket_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_INBOUND_FRAME),
        max_frame_size: Some(MAX_INBOUND_FRAME),
        ..WebSocketConfig::default()
    }
}

/// Extracts the token from a raw query string such as `token=abc&x=1`.
pub fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut it = pair.splitn(2, '=');
        match (it.next(), it.next()) {
            (Some(key), Some(value)) if key == TOKEN_QUERY_PARAM && !value.is_empty() => {
                Some(value.to_string())
            }
            _ => None,
        }
    })
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<NetworkEvent>) {
    let mut next_id: ConnId = 1;

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let conn_id = next_id;
                next_id += 1;

                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(conn_id, stream, events).await {
                        warn!("Connection {} from {} failed: {}", conn_id, addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Runs one connection: upgrade, register with the plaza loop, then pump
/// frames both ways until either side closes.
async fn handle_connection(
    conn_id: ConnId,
    stream: TcpStream,
    events: mpsc::UnboundedSender<NetworkEvent>,
) -> Result<(), ServerError> {
    let token = Arc::new(OnceLock::new());
    let token_cell = Arc::clone(&token);

    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        move |req: &Request, resp: Response| {
            if let Some(value) = req.uri().query().and_then(token_from_query) {
                let _ = token_cell.set(value);
            }
            Ok(resp)
        },
        Some(websocket_config()),
    )
    .await?;

    let (ws_tx, ws_rx) = ws_stream.split();
    let (outbound, outbound_rx) = Outbound::channel();

    let registered = events.send(NetworkEvent::NewConnection {
        conn_id,
        token: token.get().cloned(),
        outbound,
    });
    if let Err(mpsc::error::SendError(event)) = registered {
        // Plaza loop is gone, so the server is stopping
        if let NetworkEvent::NewConnection { outbound, .. } = event {
            outbound.close(CloseReason::ServerShutdown);
        }
        write_frames(ws_tx, outbound_rx).await;
        return Ok(());
    }

    let mut writer = tokio::spawn(write_frames(ws_tx, outbound_rx));
    let reader = read_frames(conn_id, ws_rx, &events);
    tokio::pin!(reader);

    tokio::select! {
        _ = &mut reader => {}
        _ = &mut writer => {
            if tokio::time::timeout(CLOSE_ACK_TIMEOUT, &mut reader).await.is_err() {
                debug!("Client {} did not acknowledge close", conn_id);
            }
        }
    }

    let _ = events.send(NetworkEvent::ClientDisconnect { conn_id });
    Ok(())
}

async fn read_frames(
    conn_id: ConnId,
    mut ws_rx: SplitStream<WebSocketStream<TcpStream>>,
    events: &mpsc::UnboundedSender<NetworkEvent>,
) {
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientMessage::parse(&text) {
                Some(message) => {
                    if events
                        .send(NetworkEvent::ClientMessage { conn_id, message })
                        .is_err()
                    {
                        break;
                    }
                }
                None => debug!("Dropping malformed message from client {}", conn_id),
            },
            Ok(Message::Binary(_)) => debug!("Dropping binary frame from client {}", conn_id),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error on client {}: {}", conn_id, e);
                break;
            }
        }
    }
}

/// Forwards queued frames to the socket. Stops after a close frame or when
/// the plaza drops the connection's sender.
async fn write_frames(
    mut ws_tx: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound_rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if ws_tx.send(message).await.is_err() || closing {
            return;
        }
    }
    let _ = ws_tx.close().await;
}
