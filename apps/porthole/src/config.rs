use std::env;
#[cfg(test)]
use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;

use crate::dom::chrome_exclusions;

pub const DEFAULT_SESSION_SERVER: &str = "127.0.0.1:8088";
pub const DEFAULT_POINTER_INTERVAL_MS: u64 = 41;
pub const DEFAULT_SCROLL_INTERVAL_MS: u64 = 80;
pub const DEFAULT_FORM_SETTLE_MS: u64 = 1000;
pub const DEFAULT_CLICK_CHROME_OFFSET: f64 = 60.0;

/// Session runtime configuration.
///
/// Every threshold lives here and is passed down explicitly; nothing deeper
/// in the crate reads the environment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The session server address, `host:port`.
    pub session_server: String,
    /// Pointer conflation window.
    pub pointer_interval: Duration,
    /// Scroll conflation window.
    pub scroll_interval: Duration,
    /// Quiet period before a form edit counts as settled.
    pub form_settle: Duration,
    /// Chrome bar height subtracted from click coordinates.
    pub click_chrome_offset: f64,
    /// Element ids reconciliation must leave alone.
    pub chrome_exclusions: Vec<String>,
    /// Viewport hint forwarded to the page endpoint.
    pub viewport: Option<(u32, u32)>,
}

impl SessionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(server) = env::var("PORTHOLE_SESSION_SERVER") {
            config.set_session_server(server);
        }
        config
    }

    /// Sets the server address. Every override path goes through here so
    /// the normalization applies uniformly.
    pub fn set_session_server(&mut self, server: impl Into<String>) {
        let server = server.into();
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
        self.session_server = if server.starts_with("localhost:") {
            server.replacen("localhost", "127.0.0.1", 1)
        } else {
            server
        };
    }

    /// Base URL for page retrieval.
    pub fn http_base(&self) -> String {
        format!("http://{}", self.session_server)
    }

    /// Mirror channel URL for one session.
    pub fn channel_url(&self, session: &Uuid) -> String {
        format!("ws://{}/{}", self.session_server, session)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_server: DEFAULT_SESSION_SERVER.to_string(),
            pointer_interval: Duration::from_millis(DEFAULT_POINTER_INTERVAL_MS),
            scroll_interval: Duration::from_millis(DEFAULT_SCROLL_INTERVAL_MS),
            form_settle: Duration::from_millis(DEFAULT_FORM_SETTLE_MS),
            click_chrome_offset: DEFAULT_CLICK_CHROME_OFFSET,
            chrome_exclusions: chrome_exclusions(),
            viewport: None,
        }
    }
}
