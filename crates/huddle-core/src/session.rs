//! Connection lifecycle state machine.
//!
//! `Session` owns every piece of mutable connection state (lifecycle state,
//! identity, timers, multiplexer) and never touches a socket itself. The
//! driver feeds it transport signals and the current time, and performs the
//! returned [`SessionAction`]s in order:
//!
//! ```text
//! Disconnected --connect--> Connecting --open--> Handshaking --handshake sent--> Connected
//!       ^                       ^                      |                              |
//!       |                       |                      +------------close-------------+
//!   disconnect                  |                                     v
//!       |                       +------------reconnect tick----- ReconnectPending
//! ```
//!
//! Time is passed in as milliseconds on a monotonic clock chosen by the
//! driver. All timers are deadlines checked by [`Session::tick`]; the driver
//! should call it no later than [`Session::next_deadline`].

use crate::heartbeat::{Heartbeat, DEFAULT_HEARTBEAT_INTERVAL};
use crate::mux::{FallbackHandler, Multiplexer};
use crate::overlay::ClientContext;
use crate::protocol::{decode, encode, ClientIdentity, ClientOptions, Envelope, Handshake};
use crate::reconnect::{ReconnectConfig, ReconnectState};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Port the engine listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 1948;

/// Delay between the socket opening and the handshake being sent.
pub const DEFAULT_HANDSHAKE_DELAY: Duration = Duration::from_millis(500);

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to be
    Disconnected,
    /// Socket requested, waiting for it to open
    Connecting,
    /// Socket open, handshake scheduled
    Handshaking,
    /// Handshake sent
    Connected,
    /// Socket lost, waiting for the reconnect timer
    ReconnectPending,
}

impl ConnectionState {
    /// Whether a socket is open and writable.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Handshaking | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::ReconnectPending => "reconnect-pending",
        };
        f.write_str(name)
    }
}

/// Where the engine lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Endpoint {
    /// Build an endpoint from a host (optionally prefixed with `ws://` or
    /// `wss://`) and an optional port, defaulting to [`DEFAULT_PORT`].
    pub fn new(host: &str, port: Option<u16>) -> Self {
        let (host, secure) = match host.strip_prefix("wss://") {
            Some(rest) => (rest, true),
            None => (host.strip_prefix("ws://").unwrap_or(host), false),
        };
        Self {
            host: host.trim_end_matches('/').to_string(),
            port: port.unwrap_or(DEFAULT_PORT),
            secure,
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Timing and retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Wait after open before sending the handshake
    pub handshake_delay: Duration,
    /// Interval between keep-alives
    pub heartbeat_interval: Duration,
    /// Reconnect automatically after the socket closes
    pub auto_reconnect: bool,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_delay: DEFAULT_HANDSHAKE_DELAY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            auto_reconnect: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Side effect requested by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a new socket. Any previous socket has already been closed.
    Open { url: String },
    /// Close and release the current socket
    Close,
    /// Write one text frame to the current socket
    Send(String),
}

/// Client side of a Huddle engine connection.
pub struct Session {
    config: SessionConfig,
    options: ClientOptions,
    identity: ClientIdentity,
    state: ConnectionState,
    /// Set by `connect`, cleared by `disconnect`; gates auto-reconnect
    running: bool,
    endpoint: Option<Endpoint>,
    /// Whether the driver currently holds a socket for us
    socket_held: bool,
    handshake_due_at: Option<u64>,
    heartbeat: Heartbeat,
    reconnect: ReconnectState,
    mux: Multiplexer,
}

impl Session {
    pub fn new(options: ClientOptions, config: SessionConfig, context: ClientContext) -> Self {
        Self {
            identity: ClientIdentity::from_options(&options),
            heartbeat: Heartbeat::new(config.heartbeat_interval),
            options,
            config,
            state: ConnectionState::Disconnected,
            running: false,
            endpoint: None,
            socket_held: false,
            handshake_due_at: None,
            reconnect: ReconnectState::new(),
            mux: Multiplexer::new(context),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_identified(&self) -> bool {
        self.mux.is_identified()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_pending()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect.attempts
    }

    pub fn set_fallback(&mut self, fallback: FallbackHandler) {
        self.mux.set_fallback(fallback);
    }

    /// Earliest armed timer, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        [
            self.handshake_due_at,
            self.heartbeat.next_deadline(),
            self.reconnect.next_attempt_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Start connecting to `endpoint`, replacing any current connection.
    pub fn connect(&mut self, endpoint: Endpoint) -> Vec<SessionAction> {
        info!("Connecting to {}", endpoint.url());

        self.running = true;
        self.reconnect.reset();
        self.endpoint = Some(endpoint);

        let mut actions = Vec::new();
        self.leave_open_state();
        self.open_socket(&mut actions);
        actions
    }

    /// Stop for good: cancel timers, close the socket, no more reconnects.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        if self.running || self.state != ConnectionState::Disconnected {
            info!("Disconnecting");
        }

        self.running = false;
        self.reconnect.cancel();
        self.leave_open_state();
        self.mux.hide_glyph();

        let mut actions = Vec::new();
        self.release_socket(&mut actions);
        self.state = ConnectionState::Disconnected;
        actions
    }

    /// The socket opened.
    pub fn on_open(&mut self, now_ms: u64) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connecting {
            warn!("Ignoring open signal in state {}", self.state);
            return Vec::new();
        }

        info!("Huddle connection open");
        self.reconnect.reset();
        self.state = ConnectionState::Handshaking;
        self.handshake_due_at = Some(now_ms + self.config.handshake_delay.as_millis() as u64);
        Vec::new()
    }

    /// A text frame arrived.
    pub fn on_message(&mut self, text: &str) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if text.is_empty() {
            return actions;
        }

        let envelope = decode(text);
        if let Some(reply) = self.mux.handle(envelope, &mut self.identity) {
            self.send(&reply, &mut actions);
        }
        actions
    }

    /// The transport reported an error. Only the following close acts on it.
    pub fn on_error(&mut self, message: &str) {
        error!("Huddle error: {}", message);
    }

    /// The socket closed (or failed to open).
    pub fn on_close(&mut self, now_ms: u64) -> Vec<SessionAction> {
        if self.state == ConnectionState::Disconnected {
            debug!("Ignoring close signal while disconnected");
            return Vec::new();
        }

        info!("Huddle connection closed");
        self.socket_held = false;
        self.leave_open_state();
        self.mux.hide_glyph();

        if self.running && self.config.auto_reconnect {
            self.state = ConnectionState::ReconnectPending;
            if !self.reconnect.is_pending() {
                self.schedule_reconnect(now_ms);
            }
        } else {
            self.state = ConnectionState::Disconnected;
        }
        Vec::new()
    }

    /// Fire every timer due at `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if self.handshake_due_at.is_some_and(|due| now_ms >= due) {
            self.handshake_due_at = None;
            self.send_handshake(now_ms, &mut actions);
        }

        if self.heartbeat.poll(now_ms) && self.state == ConnectionState::Connected {
            let alive = Envelope::alive(self.identity.assigned_id.as_deref());
            self.send(&alive, &mut actions);
        }

        if self.reconnect.should_reconnect(now_ms) {
            self.retry(now_ms, &mut actions);
        }

        actions
    }

    /// Send an application broadcast to the other peers.
    ///
    /// Dropped with a log line unless the session is connected.
    pub fn broadcast(&mut self, event: &str, data: Value) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state != ConnectionState::Connected {
            warn!("Dropping broadcast '{}' while {}", event, self.state);
            return actions;
        }
        self.send(&Envelope::message(event, data), &mut actions);
        actions
    }

    fn send_handshake(&mut self, now_ms: u64, actions: &mut Vec<SessionAction>) {
        let handshake = Handshake::new(&self.identity, &self.options);
        match Envelope::handshake(&handshake) {
            Ok(envelope) => {
                self.send(&envelope, actions);
                self.state = ConnectionState::Connected;
                self.heartbeat.arm(now_ms);
                debug!("Handshake sent as '{}'", self.identity.name);
            }
            Err(e) => error!("Failed to encode handshake: {}", e),
        }
    }

    fn retry(&mut self, now_ms: u64, actions: &mut Vec<SessionAction>) {
        if !self.running {
            self.reconnect.cancel();
            return;
        }

        if self.reconnect.exceeded_max_attempts(&self.config.reconnect) {
            error!(
                "Giving up after {} reconnect attempts",
                self.reconnect.attempts - 1
            );
            self.running = false;
            self.reconnect.cancel();
            self.release_socket(actions);
            self.state = ConnectionState::Disconnected;
            return;
        }

        // A previous attempt may still be hanging in the connecting state.
        self.leave_open_state();
        self.open_socket(actions);
        self.schedule_reconnect(now_ms);
    }

    fn schedule_reconnect(&mut self, now_ms: u64) {
        self.reconnect.schedule_reconnect(now_ms, &self.config.reconnect);
        info!(
            "Scheduled reconnect in {:?} (attempt {})",
            self.reconnect.current_delay, self.reconnect.attempts
        );
    }

    fn open_socket(&mut self, actions: &mut Vec<SessionAction>) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };
        let url = endpoint.url();
        self.release_socket(actions);
        actions.push(SessionAction::Open { url });
        self.socket_held = true;
        self.state = ConnectionState::Connecting;
    }

    fn release_socket(&mut self, actions: &mut Vec<SessionAction>) {
        if self.socket_held {
            actions.push(SessionAction::Close);
            self.socket_held = false;
        }
    }

    /// Disarm everything tied to an open socket.
    fn leave_open_state(&mut self) {
        self.heartbeat.disarm();
        self.handshake_due_at = None;
    }

    fn send(&self, envelope: &Envelope, actions: &mut Vec<SessionAction>) {
        if !self.state.is_open() {
            debug!("Not sending {:?} while {}", envelope.kind, self.state);
            return;
        }
        match encode(envelope) {
            Ok(text) => actions.push(SessionAction::Send(text)),
            Err(e) => error!("Failed to encode {:?}: {}", envelope.kind, e),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("running", &self.running)
            .field("endpoint", &self.endpoint)
            .field("identity", &self.identity)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventDispatcher;
    use crate::mux::tests::RecordingOverlay;
    use crate::overlay::BitsRenderer;
    use serde_json::json;
    use std::sync::Arc;

    fn session_with(config: SessionConfig) -> (Session, Arc<RecordingOverlay>) {
        let overlay = Arc::new(RecordingOverlay::default());
        let context = ClientContext::new(
            Arc::new(EventDispatcher::new()),
            overlay.clone(),
            Arc::new(BitsRenderer),
        );
        let options = ClientOptions::new("tester").with_glyph_id(2);
        (Session::new(options, config, context), overlay)
    }

    fn session() -> Session {
        session_with(SessionConfig::default()).0
    }

    fn localhost() -> Endpoint {
        Endpoint::new("localhost", None)
    }

    fn sent(actions: &[SessionAction]) -> Vec<Value> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Send(text) => Some(serde_json::from_str(text).unwrap()),
                _ => None,
            })
            .collect()
    }

    /// Connect, open at t=0, and send the handshake at t=500.
    fn connected() -> Session {
        let mut session = session();
        session.connect(localhost());
        session.on_open(0);
        session.tick(500);
        assert_eq!(session.state(), ConnectionState::Connected);
        session
    }

    // ==================== Endpoint ====================

    #[test]
    fn test_endpoint_default_port() {
        assert_eq!(localhost().url(), "ws://localhost:1948");
        assert_eq!(Endpoint::new("10.0.0.2", Some(4711)).url(), "ws://10.0.0.2:4711");
    }

    #[test]
    fn test_endpoint_scheme_prefix() {
        let secure = Endpoint::new("wss://engine.local/", None);
        assert!(secure.secure);
        assert_eq!(secure.url(), "wss://engine.local:1948");
        assert_eq!(Endpoint::new("ws://engine.local", Some(80)).url(), "ws://engine.local:80");
    }

    // ==================== Connect & handshake ====================

    #[test]
    fn test_connect_opens_socket() {
        let mut session = session();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        let actions = session.connect(localhost());

        assert_eq!(
            actions,
            vec![SessionAction::Open {
                url: "ws://localhost:1948".into()
            }]
        );
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(session.is_running());
    }

    #[test]
    fn test_reconnect_closes_previous_socket_first() {
        let mut session = session();
        session.connect(localhost());

        let actions = session.connect(Endpoint::new("other", None));

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], SessionAction::Close);
        assert!(matches!(actions[1], SessionAction::Open { .. }));
    }

    #[test]
    fn test_handshake_sent_after_delay() {
        let mut session = session();
        session.connect(localhost());

        assert!(session.on_open(100).is_empty());
        assert_eq!(session.state(), ConnectionState::Handshaking);
        assert!(session.tick(599).is_empty());

        let actions = session.tick(600);
        let frames = sent(&actions);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["Type"], "Handshake");
        assert_eq!(frames[0]["Data"]["Name"], "tester");
        assert_eq!(frames[0]["Data"]["GlyphId"], 2);
        assert_eq!(frames[0]["Data"]["DeviceType"], "unknown");
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_open_outside_connecting_is_ignored() {
        let mut session = session();
        assert!(session.on_open(0).is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    // ==================== Heartbeat ====================

    #[test]
    fn test_heartbeat_carries_assigned_id() {
        let mut session = connected();
        session.on_message(r#"{"Type":"Glyph","Id":"21","GlyphData":"1"}"#);

        // Armed when the handshake went out at t=500.
        assert!(sent(&session.tick(10_499)).is_empty());
        let frames = sent(&session.tick(10_500));
        assert_eq!(frames, vec![json!({"Type": "Alive", "Id": "21"})]);

        let frames = sent(&session.tick(20_500));
        assert_eq!(frames, vec![json!({"Type": "Alive", "Id": "21"})]);
    }

    #[test]
    fn test_no_heartbeat_before_handshake() {
        let config = SessionConfig {
            heartbeat_interval: Duration::from_millis(100),
            ..Default::default()
        };
        let (mut session, _) = session_with(config);
        session.connect(localhost());
        session.on_open(0);

        assert_eq!(session.next_deadline(), Some(500));
        assert!(sent(&session.tick(100)).is_empty());
        assert!(sent(&session.tick(300)).is_empty());

        let frames = sent(&session.tick(500));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["Type"], "Handshake");

        let frames = sent(&session.tick(600));
        assert_eq!(frames, vec![json!({"Type": "Alive", "Id": "undefined"})]);
    }

    #[test]
    fn test_no_heartbeat_after_close() {
        let mut session = connected();
        session.on_close(1_000);

        assert!(sent(&session.tick(10_000)).is_empty());
        assert!(sent(&session.tick(20_000)).is_empty());
    }

    #[test]
    fn test_next_deadline_tracks_timers() {
        let mut session = session();
        assert_eq!(session.next_deadline(), None);

        session.connect(localhost());
        session.on_open(0);
        assert_eq!(session.next_deadline(), Some(500));

        session.tick(500);
        assert_eq!(session.next_deadline(), Some(10_500));

        session.disconnect();
        assert_eq!(session.next_deadline(), None);
    }

    // ==================== Reconnect ====================

    #[test]
    fn test_close_schedules_reconnect() {
        let (mut session, overlay) = session_with(SessionConfig::default());
        session.connect(localhost());
        session.on_open(0);
        session.tick(500);

        session.on_close(1_000);

        assert_eq!(session.state(), ConnectionState::ReconnectPending);
        assert!(session.reconnect_pending());
        assert_eq!(overlay.calls(), vec!["hide"]);

        assert!(session.tick(1_999).is_empty());
        let actions = session.tick(2_000);
        assert_eq!(
            actions,
            vec![SessionAction::Open {
                url: "ws://localhost:1948".into()
            }]
        );
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_retry_timer_recurs_until_open() {
        let mut session = connected();
        session.on_close(1_000);
        session.tick(2_000);

        // The attempt hangs: the next tick closes it and tries again.
        let actions = session.tick(3_000);
        assert_eq!(actions[0], SessionAction::Close);
        assert!(matches!(actions[1], SessionAction::Open { .. }));
        assert_eq!(session.reconnect_attempts(), 3);

        session.on_open(3_100);
        assert!(!session.reconnect_pending());
        assert_eq!(session.reconnect_attempts(), 0);
        assert_eq!(session.state(), ConnectionState::Handshaking);
    }

    #[test]
    fn test_repeated_close_keeps_single_timer() {
        let mut session = connected();
        session.on_close(1_000);
        let first = session.next_deadline();

        // Failed attempt closes again before the timer fires.
        session.tick(2_000);
        session.on_close(2_050);

        assert_eq!(session.reconnect_attempts(), 2);
        assert_eq!(session.next_deadline(), Some(3_000));
        assert_ne!(first, session.next_deadline());
    }

    #[test]
    fn test_exponential_backoff_between_attempts() {
        let config = SessionConfig {
            reconnect: ReconnectConfig::exponential(),
            ..Default::default()
        };
        let (mut session, _) = session_with(config);
        session.connect(localhost());
        session.on_close(0);

        assert_eq!(session.next_deadline(), Some(1_000));
        session.tick(1_000);
        session.on_close(1_010);
        assert_eq!(session.next_deadline(), Some(3_000));
        session.tick(3_000);
        assert_eq!(session.next_deadline(), Some(7_000));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let config = SessionConfig {
            reconnect: ReconnectConfig {
                max_attempts: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut session, _) = session_with(config);
        session.connect(localhost());
        session.on_close(0);

        assert!(matches!(session.tick(1_000)[..], [SessionAction::Open { .. }]));
        session.on_close(1_500);
        let actions = session.tick(2_000);
        assert!(matches!(actions[..], [SessionAction::Open { .. }]));
        session.on_close(2_500);

        assert!(session.tick(3_000).is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_running());
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn test_no_reconnect_when_disabled() {
        let config = SessionConfig {
            auto_reconnect: false,
            ..Default::default()
        };
        let (mut session, _) = session_with(config);
        session.connect(localhost());
        session.on_open(0);

        session.on_close(100);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.reconnect_pending());
    }

    // ==================== Disconnect ====================

    #[test]
    fn test_disconnect_during_reconnect_pending() {
        let mut session = connected();
        session.on_close(1_000);
        assert_eq!(session.state(), ConnectionState::ReconnectPending);

        let actions = session.disconnect();

        assert!(actions.is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.reconnect_pending());
        assert!(session.tick(60_000).is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_closes_open_socket() {
        let mut session = connected();

        assert_eq!(session.disconnect(), vec![SessionAction::Close]);
        assert!(session.on_close(100).is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut session = connected();
        session.disconnect();
        assert!(session.disconnect().is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    // ==================== Messages ====================

    #[test]
    fn test_color_flash_replies_with_acknowledge() {
        let mut session = connected();

        let actions = session.on_message(
            r#"{"Type":"Digital","Data":{"Type":"ShowColor","Value":false}}"#,
        );

        assert_eq!(
            sent(&actions),
            vec![json!({"Type": "Acknowledge", "Data": {"Type": "ShowColor", "Value": false}})]
        );
    }

    #[test]
    fn test_broadcast_requires_connected() {
        let mut session = session();
        assert!(session.broadcast("chat", json!("hi")).is_empty());

        let mut session = connected();
        let frames = sent(&session.broadcast("chat", json!({"text": "hi"})));
        assert_eq!(
            frames,
            vec![json!({"Type": "Message", "Event": "chat", "Data": {"text": "hi"}})]
        );
    }

    #[test]
    fn test_empty_frame_is_ignored() {
        let mut session = connected();
        assert!(session.on_message("").is_empty());
    }
}
