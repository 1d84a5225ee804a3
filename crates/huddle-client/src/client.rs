//! Application-facing client.
//!
//! `HuddleClient` runs a [`Session`] on a dedicated tokio task. The task is the
//! only owner of the session and the socket: application calls are forwarded
//! as commands, socket signals arrive as tagged events, and timers are the
//! session's own deadlines. Every handler runs to completion before the next
//! one starts, so no session state is ever locked.

use crate::connection::{SocketEvent, SocketHandle, TaggedEvent};
use huddle_core::overlay::BitsRenderer;
use huddle_core::{
    ClientContext, ClientOptions, ConnectionState, DispatchError, Endpoint, EventDispatcher,
    FallbackHandler, GlyphRenderer, NoopOverlay, Session, SessionAction, SessionConfig,
    SubscriptionId, VisualOverlay,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to encode broadcast payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidArgument(#[from] DispatchError),

    #[error("Client session has stopped")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Request from the application to the session task.
#[derive(Debug)]
enum Command {
    Connect(Endpoint),
    Disconnect,
    Broadcast { event: String, data: Value },
}

/// Client for a Huddle engine.
pub struct HuddleClient {
    options: ClientOptions,
    config: SessionConfig,
    dispatcher: Arc<EventDispatcher>,
    overlay: Arc<dyn VisualOverlay>,
    renderer: Arc<dyn GlyphRenderer>,
    fallback: Option<FallbackHandler>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl HuddleClient {
    /// Create a client. Nothing happens on the network until [`connect`].
    ///
    /// [`connect`]: HuddleClient::connect
    pub fn new(options: ClientOptions) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            options,
            config: SessionConfig::default(),
            dispatcher: Arc::new(EventDispatcher::new()),
            overlay: Arc::new(NoopOverlay),
            renderer: Arc::new(BitsRenderer),
            fallback: None,
            state_tx,
            state_rx,
            commands: None,
            task: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<dyn VisualOverlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn GlyphRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Handle inbound values no built-in handler understands.
    pub fn with_fallback(mut self, fallback: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Subscribe to an event (`proximity`, `identify`, a broadcast name, ...).
    pub fn on(
        &self,
        event: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        Ok(self.dispatcher.register(event, callback)?)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unregister(id)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Connect to the engine at `host` (default port 1948).
    ///
    /// Starts the session task on first use; must be called within a Tokio
    /// runtime.
    pub fn connect(&mut self, host: &str, port: Option<u16>) -> Result<()> {
        let endpoint = Endpoint::new(host, port);
        if self.commands.is_none() {
            self.start();
        }
        self.command(Command::Connect(endpoint))
    }

    /// Disconnect and stop reconnecting.
    pub fn disconnect(&self) -> Result<()> {
        if self.commands.is_none() {
            return Ok(());
        }
        self.command(Command::Disconnect)
    }

    /// Broadcast `data` under `event` to every other connected client.
    ///
    /// A payload that cannot be serialized is logged and not sent.
    pub fn broadcast<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<()> {
        let data = serde_json::to_value(data).map_err(|e| {
            error!("Unable to serialize broadcast '{}': {}", event, e);
            ClientError::Encode(e)
        })?;
        self.command(Command::Broadcast {
            event: event.to_string(),
            data,
        })
    }

    /// Disconnect and wait for the session task to finish.
    pub async fn shutdown(mut self) {
        self.commands = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        let commands = self.commands.as_ref().ok_or(ClientError::Closed)?;
        commands.send(command).map_err(|_| ClientError::Closed)
    }

    fn start(&mut self) {
        let context = ClientContext::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.overlay),
            Arc::clone(&self.renderer),
        );
        let mut session = Session::new(self.options.clone(), self.config.clone(), context);
        if let Some(fallback) = &self.fallback {
            session.set_fallback(Arc::clone(fallback));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let driver = SessionDriver::new(session, self.state_tx.clone());
        self.task = Some(tokio::spawn(driver.run(command_rx)));
        self.commands = Some(command_tx);
    }
}

impl Drop for HuddleClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The session task: owns the session and the current socket.
struct SessionDriver {
    session: Session,
    socket: Option<SocketHandle>,
    generation: u64,
    socket_tx: mpsc::UnboundedSender<TaggedEvent>,
    socket_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    state_tx: watch::Sender<ConnectionState>,
    started: Instant,
}

impl SessionDriver {
    fn new(session: Session, state_tx: watch::Sender<ConnectionState>) -> Self {
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        Self {
            session,
            socket: None,
            generation: 0,
            socket_tx,
            socket_rx,
            state_tx,
            started: Instant::now(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self
                .session
                .next_deadline()
                .map(|ms| self.started + Duration::from_millis(ms));

            let actions = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect(endpoint)) => self.session.connect(endpoint),
                    Some(Command::Disconnect) => self.session.disconnect(),
                    Some(Command::Broadcast { event, data }) => self.session.broadcast(&event, data),
                    None => {
                        debug!("Client dropped, stopping session");
                        let actions = self.session.disconnect();
                        self.apply(actions);
                        self.publish_state();
                        return;
                    }
                },
                Some(tagged) = self.socket_rx.recv() => self.on_socket_event(tagged),
                _ = sleep_until(deadline) => {
                    let now_ms = self.now_ms();
                    self.session.tick(now_ms)
                }
            };

            self.apply(actions);
            self.publish_state();
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn on_socket_event(&mut self, tagged: TaggedEvent) -> Vec<SessionAction> {
        let current = self.socket.as_ref().map(SocketHandle::generation);
        if current != Some(tagged.generation) {
            debug!("Ignoring {:?} from stale socket {}", tagged.event, tagged.generation);
            return Vec::new();
        }

        let now_ms = self.now_ms();
        match tagged.event {
            SocketEvent::Opened => self.session.on_open(now_ms),
            SocketEvent::Message(text) => self.session.on_message(&text),
            SocketEvent::Error(message) => {
                self.session.on_error(&message);
                Vec::new()
            }
            SocketEvent::Closed => {
                self.socket = None;
                self.session.on_close(now_ms)
            }
        }
    }

    fn apply(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Open { url } => {
                    if let Some(mut old) = self.socket.take() {
                        old.close();
                    }
                    self.generation += 1;
                    debug!("Opening socket {} to {}", self.generation, url);
                    self.socket = Some(SocketHandle::spawn(
                        self.generation,
                        url,
                        self.socket_tx.clone(),
                    ));
                }
                SessionAction::Close => {
                    if let Some(mut socket) = self.socket.take() {
                        socket.close();
                    }
                }
                SessionAction::Send(text) => match &self.socket {
                    Some(socket) if socket.send(text) => {}
                    _ => warn!("Dropping outbound frame: no open socket"),
                },
            }
        }
    }

    fn publish_state(&self) {
        let state = self.session.state();
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
