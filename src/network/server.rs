//! WebSocket Game Server
//!
//! Async WebSocket server for match clients.
//! Routes requests to the match engine and forwards snapshot pushes.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::engine::{env_or, MatchEngine, MatchId, MatchOptions};
use crate::game::error::EngineError;
use crate::game::snapshot::Snapshot;
use crate::game::state::{Seat, SubmitResult};
use crate::network::protocol::{
    ClientMessage, ServerMessage, CreateMatchRequest, JoinMatchRequest, SubmitChoiceRequest,
    SeatAssignment, ServerError, ErrorCode,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How often idle matches are swept.
    pub cleanup_interval: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            cleanup_interval: Duration::from_secs(30),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("RPS_BIND_ADDR", defaults.bind_addr),
            max_connections: env_or("RPS_MAX_CONNECTIONS", defaults.max_connections),
            cleanup_interval: Duration::from_secs(
                env_or("RPS_CLEANUP_INTERVAL_SECS", defaults.cleanup_interval.as_secs()).max(1),
            ),
            version: defaults.version,
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

/// The seat a connection plays for.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SeatBinding {
    match_id: MatchId,
    seat: Seat,
}

/// Connected client state.
struct ConnectedClient {
    /// Seat held by this connection, if any.
    binding: Option<SeatBinding>,
    /// Task relaying the bound match's snapshots.
    forwarder: Option<JoinHandle<()>>,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Match engine.
    engine: Arc<MatchEngine>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, engine: Arc<MatchEngine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            engine,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server on an already bound listener.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server v{} listening on {}", self.config.version, listener.local_addr()?);

        // Subscribe before spawning anything so an early shutdown is not missed
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let cleanup_engine = self.engine.clone();
        let cleanup_interval = self.config.cleanup_interval;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_engine, cleanup_interval).await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(Self::reject_connection(stream, addr));
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
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

        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let engine = self.engine.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    binding: None,
                    forwarder: None,
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::error(
                                            ErrorCode::InvalidInput,
                                            format!("Invalid message format: {}", e),
                                        )).await;
                                        continue;
                                    }
                                };

                                Self::handle_client_message(addr, client_msg, &clients, &engine, &msg_tx).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::error(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                )).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Release the seat and remove the client
            Self::release_binding(addr, &clients, &engine).await;
            clients.write().await.remove(&addr);

            // Let queued replies (e.g. Shutdown) drain before the writer stops
            drop(msg_tx);
            let _ = tokio::time::timeout(Duration::from_secs(1), sender_task).await;

            info!("Client {} cleaned up", addr);
        });
    }

    /// Tell an over-limit client why it is being dropped, then close.
    async fn reject_connection(stream: TcpStream, addr: SocketAddr) {
        let mut ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("Handshake with rejected client {} failed: {}", addr, e);
                return;
            }
        };
        let msg = ServerMessage::error(ErrorCode::ServerOverloaded, "Server at capacity");
        if let Ok(text) = msg.to_json() {
            let _ = ws_stream.send(Message::Text(text)).await;
        }
        let _ = ws_stream.close(None).await;
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Clients,
        engine: &Arc<MatchEngine>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::CreateMatch(req) => {
                Self::handle_create(addr, req, clients, engine, sender).await;
            }
            ClientMessage::JoinMatch(req) => {
                Self::handle_join(addr, req, clients, engine, sender).await;
            }
            ClientMessage::SubmitChoice(req) => {
                Self::handle_submit(addr, req, clients, engine, sender).await;
            }
            ClientMessage::GetSnapshot { match_id } => {
                let reply = match engine.get_snapshot(&match_id) {
                    Ok(snapshot) => ServerMessage::Snapshot(snapshot),
                    Err(e) => ServerMessage::Error(ServerError::from(&e)),
                };
                let _ = sender.send(reply).await;
            }
            ClientMessage::Resume { match_id, seat } => {
                Self::handle_resume(addr, match_id, seat, clients, engine, sender).await;
            }
            ClientMessage::Leave => {
                let left = Self::release_binding(addr, clients, engine).await;
                let reply = match left {
                    Some(binding) => ServerMessage::Left { match_id: binding.match_id },
                    None => ServerMessage::error(ErrorCode::NotSeated, "Not seated in any match"),
                };
                let _ = sender.send(reply).await;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis() as u64,
                }).await;
            }
        }
    }

    /// Handle match creation.
    async fn handle_create(
        addr: SocketAddr,
        req: CreateMatchRequest,
        clients: &Clients,
        engine: &Arc<MatchEngine>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let options = MatchOptions {
            match_id: req.match_id,
            win_threshold: req.win_threshold,
        };
        match engine.create_match_with(&req.host_name, options) {
            Ok(match_id) => {
                let binding = SeatBinding { match_id, seat: Seat::Seat1 };
                let assignment = ServerMessage::MatchCreated(binding.assignment());
                Self::bind_seat(addr, binding, assignment, clients, engine, sender).await;
            }
            Err(e) => Self::send_engine_error(addr, &e, sender).await,
        }
    }

    /// Handle join.
    async fn handle_join(
        addr: SocketAddr,
        req: JoinMatchRequest,
        clients: &Clients,
        engine: &Arc<MatchEngine>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match engine.join_match(&req.match_id, &req.guest_name) {
            Ok(seat) => {
                let binding = SeatBinding { match_id: req.match_id, seat };
                let assignment = ServerMessage::MatchJoined(binding.assignment());
                Self::bind_seat(addr, binding, assignment, clients, engine, sender).await;
            }
            Err(e) => Self::send_engine_error(addr, &e, sender).await,
        }
    }

    /// Handle a choice submission from the bound seat.
    async fn handle_submit(
        addr: SocketAddr,
        req: SubmitChoiceRequest,
        clients: &Clients,
        engine: &Arc<MatchEngine>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let bound = {
            let clients = clients.read().await;
            clients.get(&addr).and_then(|c| c.binding.clone())
        };
        let requested = SeatBinding { match_id: req.match_id.clone(), seat: req.seat };
        if bound.as_ref() != Some(&requested) {
            let _ = sender.send(ServerMessage::error(
                ErrorCode::NotSeated,
                format!("Connection does not hold {} in match {}", req.seat, req.match_id),
            )).await;
            return;
        }

        match engine.submit_choice(&req.match_id, req.seat, req.choice) {
            Ok(result) => {
                let _ = sender.send(ServerMessage::ChoiceAccepted {
                    match_id: req.match_id,
                    seat: req.seat,
                    accepted: true,
                    round_resolved: matches!(result, SubmitResult::Resolved(_)),
                }).await;
            }
            Err(e) => Self::send_engine_error(addr, &e, sender).await,
        }
    }

    /// Handle seat resume after reconnect.
    async fn handle_resume(
        addr: SocketAddr,
        match_id: MatchId,
        seat: Seat,
        clients: &Clients,
        engine: &Arc<MatchEngine>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let binding = SeatBinding { match_id, seat };

        // Resuming the seat this connection already holds only re-sends state
        let held = {
            let clients = clients.read().await;
            clients.get(&addr).and_then(|c| c.binding.clone())
        };
        if held.as_ref() == Some(&binding) {
            let reply = match engine.get_snapshot(&binding.match_id) {
                Ok(snapshot) => {
                    let _ = sender.send(ServerMessage::Resumed(binding.assignment())).await;
                    ServerMessage::Snapshot(snapshot)
                }
                Err(e) => ServerMessage::Error(ServerError::from(&e)),
            };
            let _ = sender.send(reply).await;
            return;
        }

        match engine.reconnect_seat(&binding.match_id, binding.seat) {
            Ok(()) => {
                let assignment = ServerMessage::Resumed(binding.assignment());
                Self::bind_seat(addr, binding, assignment, clients, engine, sender).await;
            }
            Err(e) => Self::send_engine_error(addr, &e, sender).await,
        }
    }

    /// Bind a freshly claimed seat to this connection and start relaying its
    /// match's snapshots. Any previous seat is released first.
    async fn bind_seat(
        addr: SocketAddr,
        binding: SeatBinding,
        assignment: ServerMessage,
        clients: &Clients,
        engine: &Arc<MatchEngine>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        Self::release_binding(addr, clients, engine).await;

        // Subscribe before reading so no change falls between the two
        let subscription = engine
            .subscribe(&binding.match_id)
            .and_then(|rx| engine.get_snapshot(&binding.match_id).map(|snapshot| (rx, snapshot)));
        let (rx, initial) = match subscription {
            Ok(pair) => pair,
            Err(e) => {
                Self::send_engine_error(addr, &e, sender).await;
                return;
            }
        };

        let _ = sender.send(assignment).await;

        let forwarder = tokio::spawn(Self::forward_snapshots(
            binding.match_id.clone(),
            rx,
            initial,
            sender.clone(),
        ));

        let mut clients = clients.write().await;
        match clients.get_mut(&addr) {
            Some(client) => {
                debug!("Client {} bound to {} in match {}", addr, binding.seat, binding.match_id);
                client.binding = Some(binding);
                client.forwarder = Some(forwarder);
            }
            None => forwarder.abort(),
        }
    }

    /// Drop this connection's seat, marking it disconnected in the engine.
    async fn release_binding(
        addr: SocketAddr,
        clients: &Clients,
        engine: &Arc<MatchEngine>,
    ) -> Option<SeatBinding> {
        let (binding, forwarder) = {
            let mut clients = clients.write().await;
            let client = clients.get_mut(&addr)?;
            (client.binding.take(), client.forwarder.take())
        };

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }

        let binding = binding?;
        match engine.disconnect_seat(&binding.match_id, binding.seat) {
            Ok(()) | Err(EngineError::NotFound(_)) => {}
            Err(e) => warn!("Failed to release {} in match {}: {}", binding.seat, binding.match_id, e),
        }
        Some(binding)
    }

    /// Relay snapshots for one match to one connection.
    async fn forward_snapshots(
        match_id: MatchId,
        mut rx: broadcast::Receiver<Snapshot>,
        initial: Snapshot,
        sender: mpsc::Sender<ServerMessage>,
    ) {
        if sender.send(ServerMessage::Snapshot(initial)).await.is_err() {
            return;
        }

        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    if sender.send(ServerMessage::Snapshot(snapshot)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Subscriber for match {} skipped {} snapshots", match_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let _ = sender.send(ServerMessage::MatchClosed { match_id }).await;
                    break;
                }
            }
        }
    }

    async fn send_engine_error(
        addr: SocketAddr,
        err: &EngineError,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        if err.is_protocol_violation() {
            debug!("Request from {} rejected: {}", addr, err);
        } else {
            warn!("Request from {} rejected: {}", addr, err);
        }
        let _ = sender.send(ServerMessage::Error(ServerError::from(err))).await;
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(engine: Arc<MatchEngine>, every: Duration) {
        let mut interval = interval(every);

        loop {
            interval.tick().await;

            let expired = engine.sweep_idle(Instant::now());
            if !expired.is_empty() {
                info!("Expired {} idle matches, {} remain", expired.len(), engine.match_count());
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// The engine behind this server.
    pub fn engine(&self) -> &Arc<MatchEngine> {
        &self.engine
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl SeatBinding {
    fn assignment(&self) -> SeatAssignment {
        SeatAssignment {
            match_id: self.match_id.clone(),
            seat: self.seat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.cleanup_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config, Arc::new(MatchEngine::default()));

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.engine().match_count(), 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Arc::new(GameServer::new(ServerConfig::default(), Arc::new(MatchEngine::default())));

        let runner = server.clone();
        let handle = tokio::spawn(async move { runner.serve(listener).await });

        // Give serve() a moment to subscribe
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_forwarder_sends_initial_then_updates() {
        let engine = MatchEngine::default();
        let id = engine.create_match("Alice").unwrap();
        let rx = engine.subscribe(&id).unwrap();
        let initial = engine.get_snapshot(&id).unwrap();
        let (tx, mut out) = mpsc::channel(8);

        let task = tokio::spawn(GameServer::forward_snapshots(id.clone(), rx, initial, tx));
        engine.join_match(&id, "Bob").unwrap();
        engine.close_match(&id).unwrap();

        let first = out.recv().await.unwrap();
        assert!(matches!(first, ServerMessage::Snapshot(ref s) if s.seat2_name.is_none()));
        let second = out.recv().await.unwrap();
        assert!(matches!(second, ServerMessage::Snapshot(ref s) if s.seat2_name.as_deref() == Some("Bob")));
        let third = out.recv().await.unwrap();
        assert!(matches!(third, ServerMessage::MatchClosed { ref match_id } if *match_id == id));

        task.await.unwrap();
    }
}
