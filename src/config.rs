//! Configuration types shared by the client, the TCP server, and the
//! WebSocket/message layers on top of it. Kept as plain data + `Default`
//! impls, the way the teacher crate's `config.rs` does it; this version
//! folds in the server-side knobs (§4.5/§6: worker count, timeouts,
//! water marks) and a runtime-settable log verbosity (§6, §9) that the
//! teacher crate left to `env_logger`'s `RUST_LOG` alone.

use rustls::ServerConfig as RustlsConfig;
use std::sync::Arc;
use std::time::Duration;

/// Runtime log verbosity, coarser-grained than `log::LevelFilter` since
/// it groups by *subsystem concern* rather than severity (per §6:
/// "disabled, thread, protocol, application"). Maps onto `log`'s levels;
/// applications that want per-module filtering should bypass this and
/// configure `env_logger` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Disabled,
    /// Server lifecycle: accept, worker spawn/join, shutdown phases.
    Thread,
    /// Handshake, frame, and close-handshake events.
    Protocol,
    /// User callback dispatch and structured message decode outcomes.
    Application,
}

impl LogLevel {
    pub fn as_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Disabled => log::LevelFilter::Off,
            LogLevel::Thread => log::LevelFilter::Info,
            LogLevel::Protocol => log::LevelFilter::Debug,
            LogLevel::Application => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: usize,
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_frame_size: 16 << 20,
            max_message_size: 64 << 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            web_socket_config: WebSocketConfig::default(),
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// One outbound peer declaration (§4.8): a sibling server this server
/// dials out to and treats as an ordinary connection once open.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl PeerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        PeerConfig {
            host: host.into(),
            port,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub web_socket_config: WebSocketConfig,
    pub tls_config: Option<Arc<RustlsConfig>>,
    /// Size of the fixed worker pool (§4.5, default 10; 0 means "use
    /// default").
    pub num_workers: usize,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// Ingress buffer size, in bytes, above which read readiness is
    /// disabled for a connection until it drains back below
    /// `low_water_mark` (§4.5 backpressure).
    pub high_water_mark: usize,
    pub low_water_mark: usize,
    /// Bound on the cross-thread request/response queues (§5); a push
    /// against a full queue fails with `Error::QueueFull` rather than
    /// growing unboundedly.
    pub queue_capacity: usize,
    /// Grace period `stop()` waits for in-flight CLOSE handshakes
    /// before forcing socket teardown (§4.5 cancellation).
    pub shutdown_grace: Duration,
    /// TCP listen backlog (§4.5's server construction parameters), set
    /// via `socket2` before the listener is handed to tokio since
    /// `TcpListener::bind` doesn't expose it.
    pub backlog: u32,
    /// Optional cap on concurrent connections (§4.5); new accepts beyond
    /// this are dropped immediately. `None` means unbounded.
    pub max_connections: Option<usize>,
    pub peers: Vec<PeerConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            web_socket_config: WebSocketConfig::default(),
            tls_config: None,
            num_workers: 10,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            high_water_mark: 1 << 20,
            low_water_mark: 64 << 10,
            queue_capacity: 1024,
            shutdown_grace: Duration::from_secs(5),
            backlog: 1024,
            max_connections: None,
            peers: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Resolves the effective worker count, applying the "0 means
    /// default" rule from §6.
    pub fn effective_num_workers(&self) -> usize {
        if self.num_workers == 0 {
            10
        } else {
            self.num_workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_worker_count_falls_back_to_default() {
        let mut cfg = ServerConfig::default();
        cfg.num_workers = 0;
        assert_eq!(cfg.effective_num_workers(), 10);
    }

    #[test]
    fn log_level_maps_to_increasing_verbosity() {
        assert_eq!(LogLevel::Disabled.as_level_filter(), log::LevelFilter::Off);
        assert!(LogLevel::Application.as_level_filter() > LogLevel::Thread.as_level_filter());
    }
}
