//! Gateway main structure
//!
//! The WebSocket server that accepts the controlling client, binds it to the
//! engine and feeds its messages to the router one at a time.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::connection::ConnectionHandle;
use crate::engine::EngineHandle;
use crate::handlers::builtin_router;
use crate::protocol::{outbound, EventMessage};
use crate::router::EventRouter;
use crate::session::{Session, SessionLease, SessionSlot};

/// How long a rejected client gets to acknowledge the close frame.
const REJECT_LINGER: Duration = Duration::from_secs(5);

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address (e.g., "127.0.0.1:3000")
    pub bind: String,
    /// Payload of the `ready` event
    pub greeting: String,
    /// Answer unknown events with a `log` event instead of dropping them
    pub report_unknown_events: bool,
    /// Engine calls running longer than this are logged
    pub slow_call_warn: Duration,
    /// Time a new connection gets to finish the WebSocket upgrade
    pub handshake_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            greeting: "Hello".to_string(),
            report_unknown_events: false,
            slow_call_warn: Duration::from_millis(2000),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// The main Gateway server
#[derive(Debug, Clone)]
pub struct Gateway {
    config: GatewayConfig,
    engine: Arc<EngineHandle>,
    router: Arc<EventRouter>,
    slot: Arc<SessionSlot>,
}

impl Gateway {
    /// Create a gateway serving the builtin events.
    pub fn new(config: GatewayConfig, engine: EngineHandle) -> Self {
        Self {
            config,
            engine: Arc::new(engine),
            router: Arc::new(builtin_router()),
            slot: Arc::new(SessionSlot::new()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn slot(&self) -> &SessionSlot {
        &self.slot
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr: SocketAddr = self.config.bind.parse()?;
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Gateway listening on ws://{}", listener.local_addr()?);

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!("New connection from {}", peer_addr);

            let gateway = self.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway.admit(stream, peer_addr).await {
                    debug!("Connection from {} dropped: {}", peer_addr, e);
                }
            });
        }
    }

    /// Upgrade the stream, then claim the slot or reject the client.
    ///
    /// A connection holds the slot only once its handshake has finished.
    async fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<(), GatewayError> {
        let ws_stream = tokio::time::timeout(self.config.handshake_timeout, accept_async(stream))
            .await
            .map_err(|_| GatewayError::HandshakeTimeout(self.config.handshake_timeout))??;

        let id = Uuid::new_v4().to_string();
        match self.slot.try_claim(id.clone(), peer_addr) {
            Ok(lease) => {
                let span = info_span!("session", id = %id, peer = %peer_addr);
                if let Err(e) = self
                    .handle_connection(ws_stream, peer_addr, lease)
                    .instrument(span)
                    .await
                {
                    error!("Connection error for {}: {}", peer_addr, e);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Rejecting {}: {}", peer_addr, e);
                reject_connection(ws_stream, &e.to_string()).await
            }
        }
    }

    /// Handle the controlling client's connection
    async fn handle_connection(
        &self,
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        lease: SessionLease,
    ) -> Result<(), GatewayError> {
        let (mut sender, mut receiver) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(
            async move {
                while let Some(frame) = rx.recv().await {
                    if let Err(e) = sender.send(frame).await {
                        debug!("Failed to send frame: {}", e);
                        break;
                    }
                }
                let _ = sender.close().await;
            }
            .in_current_span(),
        );

        let conn = ConnectionHandle::new(lease.id().to_string(), addr, tx);
        let session = Session::new(conn.clone(), Arc::clone(&self.engine), Arc::clone(&self.router));
        info!("Client connected");

        session.send(EventMessage::with_data(
            outbound::READY,
            self.config.greeting.clone(),
        ));
        session.log("connected");
        if let Err(e) = self.engine.initialize(conn.clone()).await {
            error!("Engine initialization failed: {}", e);
            session.log(format!("engine initialization failed: {}", e));
        }

        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match EventMessage::decode(&text) {
                    Ok(message) => self.dispatch(&session, message).await,
                    Err(e) => {
                        warn!("Malformed message from {}: {}", addr, e);
                        break;
                    }
                },
                Ok(Message::Binary(_)) => {
                    warn!("Binary frame from {}, closing", addr);
                    break;
                }
                Ok(Message::Ping(data)) => {
                    let _ = conn.send_frame(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    debug!("Close frame from {}", addr);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error on {}: {}", addr, e);
                    break;
                }
            }
        }

        // Slot is free before the writer sends the close frame.
        let held = session.age();
        drop(lease);
        drop(session);
        drop(conn);
        let _ = writer.await;
        info!(
            state = ?self.engine.run_state(),
            "Client disconnected after {}s",
            held.num_seconds()
        );

        Ok(())
    }

    async fn dispatch(&self, session: &Session, message: EventMessage) {
        let EventMessage { event, data } = message;
        debug!("Event '{}'", event);

        match session.dispatch(&event, data).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Ignoring unknown event '{}'", event);
                if self.config.report_unknown_events {
                    session.log(format!("unknown event: {}", event));
                }
            }
            Err(e) => {
                warn!("Handler for '{}' failed: {}", event, e);
                session.log(format!("{} failed: {}", event, e));
            }
        }
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gateway({})", self.config.bind)
    }
}

/// Explain, then close with a policy violation.
async fn reject_connection(
    ws_stream: WebSocketStream<TcpStream>,
    reason: &str,
) -> Result<(), GatewayError> {
    let (mut sender, mut receiver) = ws_stream.split();

    let json = EventMessage::log(reason).encode()?;
    sender.send(Message::Text(json)).await?;
    sender
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: Cow::Owned(reason.to_string()),
        })))
        .await?;

    let _ = tokio::time::timeout(REJECT_LINGER, async {
        while let Some(Ok(_)) = receiver.next().await {}
    })
    .await;
    Ok(())
}

/// Gateway-related errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("WebSocket handshake not finished within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcu_engine::testing::{MemoryChannel, ScriptedEngine};
    use mcu_engine::{ExecutionController, OutputCapture};

    fn gateway(config: GatewayConfig) -> Gateway {
        let channel = MemoryChannel::new();
        let controller = ExecutionController::new(
            ScriptedEngine::new(channel.clone()),
            OutputCapture::new(Arc::new(channel)),
        );
        let engine = EngineHandle::new(controller, config.slow_call_warn);
        Gateway::new(config, engine)
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind, "127.0.0.1:3000");
        assert_eq!(config.greeting, "Hello");
        assert!(!config.report_unknown_events);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builtin_events_registered() {
        let gateway = gateway(GatewayConfig::default());
        assert_eq!(
            gateway.router().events(),
            vec![
                "compile asm",
                "compile c",
                "execute cycle",
                "mcu resume",
                "ping",
                "test"
            ]
        );
        assert!(gateway.slot().is_idle());
        assert_eq!(gateway.to_string(), "Gateway(127.0.0.1:3000)");
    }

    #[tokio::test]
    async fn test_run_rejects_bad_bind() {
        let gateway = gateway(GatewayConfig {
            bind: "not an address".to_string(),
            ..GatewayConfig::default()
        });
        assert!(matches!(
            gateway.run().await,
            Err(GatewayError::AddrParse(_))
        ));
    }
}
