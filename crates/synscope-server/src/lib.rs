//! HTTP + WebSocket server for viewer sessions

pub mod controller;
pub mod handlers;
pub mod router;
pub mod session;
pub mod websocket;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use controller::{Command, Controller, ControllerEvent, Reply};
pub use session::Session;

const EVENT_CAPACITY: usize = 256;

/// Where the server listens.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// State shared by every request handler and viewer connection.
pub struct ServerState {
    pub session: Arc<Session>,
    /// Inbound events for the controller task.
    pub events: mpsc::Sender<ControllerEvent>,
}

impl ServerState {
    /// Fresh state plus the receiving end the controller should drain.
    pub fn new() -> (Self, mpsc::Receiver<ControllerEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CAPACITY);
        let state = ServerState {
            session: Arc::new(Session::new()),
            events,
        };
        (state, rx)
    }
}

pub struct SynscopeServer {
    state: Arc<ServerState>,
    config: ServerConfig,
    controller: Controller,
    rx: mpsc::Receiver<ControllerEvent>,
}

impl SynscopeServer {
    pub fn new(controller: Controller, config: ServerConfig) -> Self {
        let (state, rx) = ServerState::new();
        SynscopeServer {
            state: Arc::new(state),
            config,
            controller,
            rx,
        }
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Serve until the listener fails or the controller stops.
    pub async fn start(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Listening on http://{}", addr);
        tracing::info!("Viewer state channel at ws://{}/ws", addr);

        let controller = tokio::spawn(self.controller.run(Arc::clone(&self.state.session), self.rx));
        let app = router::create_router(Arc::clone(&self.state));

        tokio::select! {
            served = axum::serve(listener, app) => served?,
            stopped = controller => stopped??,
        }
        Ok(())
    }
}
