//! vc-web: Browser-facing serial console
//!
//! Serves a websocket endpoint that bridges a browser tab to a VMI's serial
//! console, plus the small JSON API the web UI reads its settings from.

pub mod bridge;
pub mod server;
pub mod state;

pub use bridge::{run_socket, serve_console, PeerError, PeerFrame, PeerSink, PeerSource};
pub use server::{router, WebServer};
pub use state::{ServerSettings, SettingsError, TargetError, WebState};
