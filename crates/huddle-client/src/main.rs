//! huddle-client: headless client for a Huddle proximity engine.
//!
//! Connects, logs proximity and identification events, and broadcasts
//! lines read from stdin in the form `<event> <json>`.

use anyhow::{Context, Result};
use clap::Parser;
use huddle_client::{HuddleClient, LogOverlay, PgmGlyphRenderer, TextGlyphRenderer};
use huddle_core::device::detect_device_type;
use huddle_core::events::names;
use huddle_core::{ClientOptions, GlyphRenderer, ReconnectConfig, SessionConfig, DEFAULT_PORT};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "huddle-client")]
#[command(about = "Huddle proximity engine client")]
struct Args {
    /// Engine host (a ws:// or wss:// prefix is accepted)
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Engine port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Display name announced in the handshake
    #[arg(short, long)]
    name: Option<String>,

    /// Preferred glyph id
    #[arg(long)]
    glyph_id: Option<i64>,

    /// Device type announced in the handshake
    #[arg(long, conflicts_with = "user_agent")]
    device_type: Option<String>,

    /// Derive the device type from a user-agent string
    #[arg(long)]
    user_agent: Option<String>,

    /// Back off exponentially between reconnect attempts
    #[arg(long)]
    exponential_backoff: bool,

    /// Give up after this many reconnect attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Do not reconnect when the connection drops
    #[arg(long)]
    no_reconnect: bool,

    /// Print assigned glyphs to stdout as text
    #[arg(long)]
    print_glyph: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn options(&self) -> ClientOptions {
        let mut options = match &self.name {
            Some(name) => ClientOptions::new(name.clone()),
            None => ClientOptions::default(),
        };
        if let Some(glyph_id) = self.glyph_id {
            options = options.with_glyph_id(glyph_id);
        }
        if let Some(device_type) = &self.device_type {
            options = options.with_device_type(device_type.clone());
        } else if let Some(user_agent) = &self.user_agent {
            options = options.with_device_type(detect_device_type(user_agent));
        }
        options
    }

    fn session_config(&self) -> SessionConfig {
        let mut reconnect = if self.exponential_backoff {
            ReconnectConfig::exponential()
        } else {
            ReconnectConfig::default()
        };
        reconnect.max_attempts = self.max_attempts;

        SessionConfig {
            auto_reconnect: !self.no_reconnect,
            reconnect,
            ..Default::default()
        }
    }
}

/// Parse a stdin line of the form `<event> <json>`.
///
/// A missing payload broadcasts `null`; a payload that is not JSON is sent
/// as a string.
fn parse_broadcast(line: &str) -> Option<(&str, Value)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (event, payload) = match line.split_once(char::is_whitespace) {
        Some((event, payload)) => (event, payload.trim()),
        None => (line, ""),
    };
    let data = if payload.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.to_string()))
    };
    Some((event, data))
}

fn subscribe(client: &HuddleClient) -> Result<()> {
    client.on(names::PROXIMITY, |data| {
        debug!("Proximity: {}", data);
    })?;
    client.on(names::DISPLAY_MOVE, |data| {
        info!("Display moved: {}", data);
    })?;
    client.on(names::HAND_MOVE, |data| {
        info!("Hand moved: {}", data);
    })?;
    client.on(names::IDENTIFY, |data| {
        debug!("Identify request: {}", data);
    })?;
    client.on(names::DEVICE_FOUND, |_| {
        info!("Device identified by the engine");
    })?;
    client.on(names::DEVICE_LOST, |_| {
        info!("Device lost by the engine");
    })?;
    client.on(names::SHOW_COLOR, |data| {
        info!("Asked to show color: {}", data);
    })?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,huddle_client=debug,huddle_core=debug"
    } else {
        "info,huddle_client=info,huddle_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = args.options();
    info!("Starting huddle-client as '{}' ({})", options.name, options.device_type);

    let renderer: Arc<dyn GlyphRenderer> = if args.print_glyph {
        Arc::new(TextGlyphRenderer)
    } else {
        Arc::new(PgmGlyphRenderer::default())
    };
    let overlay = LogOverlay {
        print_glyph: args.print_glyph,
    };

    let mut client = HuddleClient::new(options)
        .with_config(args.session_config())
        .with_overlay(Arc::new(overlay))
        .with_renderer(renderer)
        .with_fallback(|value| warn!("Unhandled message from engine: {}", value));
    subscribe(&client)?;

    client
        .connect(&args.host, Some(args.port))
        .context("Failed to start session")?;
    info!("Connecting to {}:{}. Press Ctrl+C to stop.", args.host, args.port);

    let mut state = client.watch_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            // Report lifecycle changes
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!("Connection state: {}", current);
            }

            // Broadcast stdin lines
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if let Some((event, data)) = parse_broadcast(&line) {
                            if let Err(e) = client.broadcast(event, &data) {
                                warn!("Broadcast of '{}' failed: {}", event, e);
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    client.disconnect().ok();
    client.shutdown().await;
    Ok(())
}
