//! TCP Game Server
//!
//! Async TCP server for maze race clients. Accepts framed connections,
//! spawns one reader and one writer task per socket, routes decoded
//! envelopes through the shared registry, and runs the heartbeat sweep.
//!
//! Delivery discipline: handlers run under the registry lock and only
//! queue messages; actual sends happen after the lock is released. A send
//! that fails removes that one target through the teardown cascade and
//! never aborts delivery to the remaining targets.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::network::framing::{read_frame, write_frame};
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::registry::{ConnId, Outbox, Registry};

/// Outbound channel depth per connection. A peer that falls this many
/// messages behind is treated as dead.
const OUTBOUND_BUFFER: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Silence threshold before a connection is reclaimed.
    pub heartbeat_timeout: Duration,
    /// How often the heartbeat sweep runs.
    pub sweep_interval: Duration,
    /// Inclusive odd side-length range for generated mazes.
    pub maze_sizes: (i32, i32),
    /// How many public chat lines are replayed to new logins.
    pub chat_history_limit: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:65432".parse().expect("static address parses"),
            max_connections: 20,
            heartbeat_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            maze_sizes: (21, 29),
            chat_history_limit: 128,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// All shared mutable state, behind the one lock.
    state: Arc<Mutex<Registry>>,
    /// Connection id allocator.
    next_conn: AtomicU64,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Registry::new(config.maze_sizes, config.chat_history_limit);

        Self {
            config,
            state: Arc::new(Mutex::new(registry)),
            next_conn: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Run on an already-bound listener.
    ///
    /// How the bound address reaches clients is a deployment concern (an
    /// external directory holds the address record); the server only logs
    /// it.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), GameServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, version = %self.config.version, "maze race server listening");
        }

        // Spawn heartbeat sweep task
        let sweep_state = self.state.clone();
        let sweep_handle = tokio::spawn(run_sweep_loop(
            sweep_state,
            self.config.heartbeat_timeout,
            self.config.sweep_interval,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let id = ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed));
                            let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
                            let (kill_tx, kill_rx) = oneshot::channel();

                            // The capacity check and the registration share
                            // one lock acquisition, so a burst of accepts
                            // cannot overshoot the cap. A refused socket is
                            // dropped before a worker exists for it, never
                            // accepted and then silently starved.
                            {
                                let mut registry = lock(&self.state);
                                if registry.conn_count() >= self.config.max_connections {
                                    warn!(%addr, "connection limit reached, rejecting");
                                    continue;
                                }
                                registry.register(id, tx, kill_tx);
                            }

                            info!(%addr, %id, "new connection");
                            tokio::spawn(handle_connection(
                                self.state.clone(),
                                stream,
                                id,
                                rx,
                                kill_rx,
                                self.shutdown_tx.subscribe(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        sweep_handle.abort();
        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        lock(&self.state).conn_count()
    }
}

/// Lock the registry. Poisoning would mean a handler panicked while
/// holding the lock, which leaves no state worth limping on with.
fn lock(state: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    state.lock().expect("registry lock poisoned")
}

/// Flush an outbox, with the registry lock released.
///
/// Each target is attempted independently. A failed send (the peer's
/// writer is gone, or its channel is full because it stopped draining)
/// tears down only that target; the cascade's own notifications join the
/// back of the queue so everyone else still hears about it.
fn deliver(state: &Mutex<Registry>, outbox: Outbox) {
    let mut queue: VecDeque<_> = outbox.into();
    while let Some(delivery) = queue.pop_front() {
        if delivery.sender.try_send(delivery.message).is_err() {
            warn!(conn = %delivery.conn, "delivery fault, removing target");
            queue.extend(lock(state).teardown(delivery.conn));
        }
    }
}

/// One connection's reader side.
///
/// Decodes frames sequentially (per-connection message order is
/// preserved), routes each envelope under the registry lock, then flushes
/// the resulting outbox. Exits on framing fault, kill signal, explicit
/// disconnect, or server shutdown; teardown at the bottom is idempotent
/// against whichever path got there first.
async fn handle_connection(
    state: Arc<Mutex<Registry>>,
    stream: TcpStream,
    id: ConnId,
    rx: mpsc::Receiver<ServerMessage>,
    mut kill_rx: oneshot::Receiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(write_half, rx));

    loop {
        tokio::select! {
            _ = &mut kill_rx => {
                debug!(%id, "reader stopped by teardown");
                break;
            }
            _ = shutdown_rx.recv() => break,
            frame = read_frame(&mut read_half) => {
                let bytes = match frame {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!(%id, error = %e, "framing fault");
                        break;
                    }
                };

                // Unknown tags and malformed payloads are ignored; only
                // framing faults are fatal to the connection.
                let message = match serde_json::from_slice::<ClientMessage>(&bytes) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(%id, error = %e, "unroutable envelope ignored");
                        continue;
                    }
                };

                let outbox = lock(&state).route(id, message);
                deliver(&state, outbox);

                if !lock(&state).is_connected(id) {
                    // Explicit disconnect was routed; nothing left to read.
                    break;
                }
            }
        }
    }

    deliver(&state, lock(&state).teardown(id));
    debug!(%id, "connection worker exited");
}

/// One connection's writer side: drain the channel onto the socket.
///
/// Ends when every sender is dropped (teardown removed the registry
/// entry) or a write fails; either way the write half is shut down, which
/// closes the socket once the reader half is gone too.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(message) = rx.recv().await {
        let bytes = match serde_json::to_vec(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to serialize message");
                continue;
            }
        };
        if write_frame(&mut writer, &bytes).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Periodic heartbeat sweep.
///
/// Recomputes the stale set from the live table every tick, so
/// connections added or removed mid-sweep by the workers are handled
/// without coordination beyond the registry lock.
async fn run_sweep_loop(
    state: Arc<Mutex<Registry>>,
    timeout: Duration,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outbox = lock(&state).sweep(timeout);
                deliver(&state, outbox);
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(25);
    const WAIT: Duration = Duration::from_secs(5);

    fn test_config() -> ServerConfig {
        ServerConfig {
            maze_sizes: (9, 9),
            ..Default::default()
        }
    }

    async fn spawn_server(config: ServerConfig) -> (Arc<GameServer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(config));

        let runner = server.clone();
        tokio::spawn(async move {
            runner.run_on(listener).await.unwrap();
        });

        (server, addr)
    }

    async fn send<W: AsyncWrite + Unpin>(socket: &mut W, message: &ClientMessage) {
        let bytes = serde_json::to_vec(message).unwrap();
        write_frame(socket, &bytes).await.unwrap();
    }

    async fn recv<R: AsyncRead + Unpin>(socket: &mut R) -> ServerMessage {
        let bytes = timeout(WAIT, read_frame(socket)).await.unwrap().unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Read messages until one satisfies the predicate, skipping
    /// interleaved presence traffic.
    async fn recv_until<R, F>(socket: &mut R, mut pred: F) -> ServerMessage
    where
        R: AsyncRead + Unpin,
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let message = recv(socket).await;
            if pred(&message) {
                return message;
            }
        }
    }

    async fn login(socket: &mut TcpStream, name: &str) -> ServerMessage {
        send(socket, &ClientMessage::LoginAttempt(name.to_string())).await;
        recv_until(socket, |m| {
            matches!(
                m,
                ServerMessage::LoginSuccessful(_) | ServerMessage::WrongLoginName
            )
        })
        .await
    }

    #[tokio::test]
    async fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(10));
        assert_eq!(config.maze_sizes, (21, 29));
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let (server, _addr) = spawn_server(test_config()).await;
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_login_end_to_end() {
        let (_server, addr) = spawn_server(test_config()).await;

        let mut socket = TcpStream::connect(addr).await.unwrap();
        let reply = login(&mut socket, "alice").await;

        let ServerMessage::LoginSuccessful(snapshot) = reply else {
            panic!("expected login_successful, got {reply:?}");
        };
        assert!(snapshot.players.contains("alice"));
        assert_eq!(snapshot.scores["alice"], 0);
    }

    #[tokio::test]
    async fn test_duplicate_name_then_reuse_after_disconnect() {
        let (_server, addr) = spawn_server(test_config()).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            login(&mut first, "alice").await,
            ServerMessage::LoginSuccessful(_)
        ));

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            login(&mut second, "alice").await,
            ServerMessage::WrongLoginName
        ));

        // First client hangs up; its reader sees EOF and cascades.
        drop(first);

        // The name becomes loginable again once teardown lands.
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let mut retry = TcpStream::connect(addr).await.unwrap();
            if matches!(
                login(&mut retry, "alice").await,
                ServerMessage::LoginSuccessful(_)
            ) {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "name never freed after disconnect"
            );
            tokio::time::sleep(TICK).await;
        }
    }

    #[tokio::test]
    async fn test_capacity_rejection() {
        let config = ServerConfig {
            max_connections: 1,
            ..test_config()
        };
        let (_server, addr) = spawn_server(config).await;

        let mut kept = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            login(&mut kept, "alice").await,
            ServerMessage::LoginSuccessful(_)
        ));

        // The second socket is refused: the server drops it without ever
        // framing a reply, so the client reads EOF.
        let mut refused = TcpStream::connect(addr).await.unwrap();
        let result = timeout(WAIT, read_frame(&mut refused)).await.unwrap();
        assert!(result.is_err(), "over-capacity socket should see EOF");
    }

    #[tokio::test]
    async fn test_heartbeat_echo() {
        let (_server, addr) = spawn_server(test_config()).await;

        let mut socket = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            login(&mut socket, "alice").await,
            ServerMessage::LoginSuccessful(_)
        ));

        send(&mut socket, &ClientMessage::Heartbeat).await;
        let reply = recv_until(&mut socket, |m| matches!(m, ServerMessage::Heartbeat)).await;
        assert!(matches!(reply, ServerMessage::Heartbeat));
    }

    #[tokio::test]
    async fn test_silent_connection_reclaimed() {
        let config = ServerConfig {
            heartbeat_timeout: Duration::from_millis(150),
            sweep_interval: Duration::from_millis(25),
            ..test_config()
        };
        let (server, addr) = spawn_server(config).await;

        let mut silent = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            login(&mut silent, "alice").await,
            ServerMessage::LoginSuccessful(_)
        ));
        assert_eq!(server.connection_count(), 1);

        // Stay silent past the timeout: the sweep closes the socket.
        let result = timeout(WAIT, read_frame(&mut silent)).await.unwrap();
        assert!(result.is_err(), "silent connection should be closed");

        // The presence slot and the name are free again.
        let deadline = tokio::time::Instant::now() + WAIT;
        while server.connection_count() != 0 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(TICK).await;
        }
        let mut fresh = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            login(&mut fresh, "alice").await,
            ServerMessage::LoginSuccessful(_)
        ));
    }

    #[tokio::test]
    async fn test_challenge_accept_end_to_end() {
        let (_server, addr) = spawn_server(test_config()).await;

        let mut alice = TcpStream::connect(addr).await.unwrap();
        let mut bob = TcpStream::connect(addr).await.unwrap();
        assert!(matches!(
            login(&mut alice, "alice").await,
            ServerMessage::LoginSuccessful(_)
        ));
        assert!(matches!(
            login(&mut bob, "bob").await,
            ServerMessage::LoginSuccessful(_)
        ));

        send(&mut alice, &ClientMessage::CreateChallenge("bob".to_string())).await;
        let received = recv_until(&mut bob, |m| {
            matches!(m, ServerMessage::ReceivedChallenge(_))
        })
        .await;
        assert!(matches!(
            received,
            ServerMessage::ReceivedChallenge(from) if from == "alice"
        ));

        send(&mut bob, &ClientMessage::AcceptChallenge("alice".to_string())).await;

        let for_alice = recv_until(&mut alice, |m| {
            matches!(m, ServerMessage::AcceptedChallenge(_))
        })
        .await;
        let for_bob = recv_until(&mut bob, |m| {
            matches!(m, ServerMessage::AcceptedChallenge(_))
        })
        .await;

        let (ServerMessage::AcceptedChallenge(a), ServerMessage::AcceptedChallenge(b)) =
            (for_alice, for_bob)
        else {
            panic!("expected accepted_challenge for both");
        };
        assert_eq!(a.opponent, "bob");
        assert_eq!(b.opponent, "alice");
        assert_eq!(a.goal, b.goal);
        assert_eq!(a.rows, b.rows);

        // A framing fault from one client must not disturb the other.
        alice.write_u32(0).await.unwrap();
        alice.flush().await.unwrap();

        let left = recv_until(&mut bob, |m| matches!(m, ServerMessage::LeftGame(_))).await;
        assert!(matches!(left, ServerMessage::LeftGame(who) if who == "alice"));

        send(&mut bob, &ClientMessage::Heartbeat).await;
        let echo = recv_until(&mut bob, |m| matches!(m, ServerMessage::Heartbeat)).await;
        assert!(matches!(echo, ServerMessage::Heartbeat));
    }
}
