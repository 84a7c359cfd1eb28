//! Client configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::constants::{
    DEFAULT_FLASH_VER, DEFAULT_MAX_CHANNELS, DEFAULT_WINDOW_ACK_SIZE, RTMP_PORT, RTMP_SCHEME,
};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// RTMP URL to connect to (rtmp://host[:port]/app[/instance])
    pub url: String,

    /// TCP connect plus handshake timeout
    pub connect_timeout: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,

    /// Flash version string sent as `flashVer`
    pub flash_ver: String,

    /// Upper bound on chunk streams opened by this client
    pub max_channels: usize,

    /// Window acknowledgement size announced after a successful connect
    pub window_ack_size: u32,

    /// Pause between the connect result and the window ack size message
    pub connect_settle_delay: Duration,

    /// How long `close()` waits for queued outbound data
    pub close_drain_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
            flash_ver: DEFAULT_FLASH_VER.to_string(),
            max_channels: DEFAULT_MAX_CHANNELS,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            connect_settle_delay: Duration::from_millis(200),
            close_drain_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_channels(mut self, max: usize) -> Self {
        self.max_channels = max;
        self
    }

    pub fn window_ack_size(mut self, size: u32) -> Self {
        self.window_ack_size = size;
        self
    }

    pub fn connect_settle_delay(mut self, delay: Duration) -> Self {
        self.connect_settle_delay = delay;
        self
    }

    pub fn close_drain_timeout(mut self, timeout: Duration) -> Self {
        self.close_drain_timeout = timeout;
        self
    }

    /// Parse URL into components
    pub fn parse_url(&self) -> Result<ParsedUrl> {
        ParsedUrl::parse(&self.url)
    }
}

/// Parsed RTMP URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub instance: Option<String>,
}

impl ParsedUrl {
    /// Parse `rtmp://host[:port]/app[/instance]`
    ///
    /// Any scheme other than `rtmp` is rejected with
    /// [`Error::UnsupportedProtocol`].
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::Config(format!("missing scheme in {:?}", url)))?;

        if !scheme.eq_ignore_ascii_case(RTMP_SCHEME) {
            return Err(Error::UnsupportedProtocol(scheme.to_string()));
        }

        let (host_port, path) = rest
            .split_once('/')
            .ok_or_else(|| Error::Config(format!("missing application in {:?}", url)))?;

        let (host, port) = match host_port.split_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid port {:?}", p)))?;
                (h, port)
            }
            None => (host_port, RTMP_PORT),
        };
        if host.is_empty() {
            return Err(Error::Config(format!("missing host in {:?}", url)));
        }

        let (app, instance) = match path.split_once('/') {
            Some((a, i)) if !i.is_empty() => (a, Some(i.to_string())),
            Some((a, _)) => (a, None),
            None => (path, None),
        };
        if app.is_empty() {
            return Err(Error::Config(format!("missing application in {:?}", url)));
        }

        Ok(ParsedUrl {
            host: host.to_string(),
            port,
            app: app.to_string(),
            instance,
        })
    }

    /// `host:port` for the TCP dial
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
