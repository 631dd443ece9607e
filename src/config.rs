//! Transfer configuration.
//!
//! [`TransferConfig`] collects every knob both engines need.  Setters validate
//! their input and return [`ConfigError`] instead of silently clamping, so a
//! bad value is rejected before any datagram is sent.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use crate::packet::MAX_PAYLOAD;

/// Local port used when none is given.
pub const DEFAULT_PORT: u16 = 12987;

/// Window size used in sliding-window mode when none is given.
pub const DEFAULT_WINDOW: u32 = 256;

/// Retransmission interval used when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Upper bound on the window size.
///
/// Ordering comparisons use signed 32-bit distance, which stays unambiguous
/// as long as the window is much smaller than 2^31.
pub const MAX_WINDOW: u32 = 1 << 15;

/// Default retransmission budget per segment.
pub const DEFAULT_MAX_RETRIES: u32 = 20;

/// ARQ discipline.  Encoded as bit 0 of the header flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    StopAndWait,
    SlidingWindow,
}

impl Mode {
    /// Value of the mode bit on the wire.
    pub fn bit(self) -> u8 {
        match self {
            Mode::StopAndWait => 0,
            Mode::SlidingWindow => 1,
        }
    }

    pub fn from_bit(bit: u8) -> Self {
        if bit & 1 == 0 {
            Mode::StopAndWait
        } else {
            Mode::SlidingWindow
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::StopAndWait => write!(f, "stop-and-wait"),
            Mode::SlidingWindow => write!(f, "sliding-window"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stop-and-wait" | "saw" | "0" => Ok(Mode::StopAndWait),
            "sliding-window" | "sw" | "1" => Ok(Mode::SlidingWindow),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Rejected configuration values.  The transfer is never started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port {0} is outside 0..=65535")]
    InvalidPort(i64),
    #[error("could not resolve address `{0}`")]
    UnresolvedAddress(String),
    #[error("timeout must be positive")]
    NonPositiveTimeout,
    #[error("window size {0} is outside 1..=32768")]
    InvalidWindowSize(u32),
    #[error("payload size {0} is outside 1..=1488")]
    InvalidPayloadSize(usize),
    #[error("unknown mode `{0}` (expected stop-and-wait or sliding-window)")]
    UnknownMode(String),
}

/// Validate a port number coming from user input.
pub fn validate_port(port: i64) -> Result<u16, ConfigError> {
    u16::try_from(port).map_err(|_| ConfigError::InvalidPort(port))
}

/// Resolve `host:port`, preferring an IPv4 address since sockets are
/// opened on the IPv4 wildcard.
pub fn resolve_remote(addr: &str) -> Result<SocketAddr, ConfigError> {
    let candidates: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|_| ConfigError::UnresolvedAddress(addr.to_string()))?
        .collect();
    candidates
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| ConfigError::UnresolvedAddress(addr.to_string()))
}

/// Parameters shared by the sender and the receiver engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    mode: Mode,
    window_size: u32,
    timeout: Duration,
    payload_size: usize,
    max_retries: u32,
    max_idle_wait: Option<Duration>,
    linger: Option<Duration>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::new(Mode::SlidingWindow)
    }
}

impl TransferConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            window_size: DEFAULT_WINDOW,
            timeout: DEFAULT_TIMEOUT,
            payload_size: MAX_PAYLOAD,
            max_retries: DEFAULT_MAX_RETRIES,
            max_idle_wait: None,
            linger: None,
        }
    }

    /// Sliding-window size.  Has no effect on the window capacity in
    /// stop-and-wait mode, which is always 1.
    pub fn with_window_size(mut self, window_size: u32) -> Result<Self, ConfigError> {
        if window_size == 0 || window_size > MAX_WINDOW {
            return Err(ConfigError::InvalidWindowSize(window_size));
        }
        self.window_size = window_size;
        Ok(self)
    }

    /// Retransmission interval for every in-flight segment.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout);
        }
        self.timeout = timeout;
        Ok(self)
    }

    /// Maximum payload bytes per data segment.
    pub fn with_payload_size(mut self, payload_size: usize) -> Result<Self, ConfigError> {
        if payload_size == 0 || payload_size > MAX_PAYLOAD {
            return Err(ConfigError::InvalidPayloadSize(payload_size));
        }
        self.payload_size = payload_size;
        Ok(self)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Grace period the sender waits without forward progress before giving up.
    pub fn with_max_idle_wait(mut self, wait: Duration) -> Result<Self, ConfigError> {
        if wait.is_zero() {
            return Err(ConfigError::NonPositiveTimeout);
        }
        self.max_idle_wait = Some(wait);
        Ok(self)
    }

    /// How long the receiver keeps re-acknowledging duplicates after the FIN.
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = Some(linger);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of slots in the window buffer: 1 for stop-and-wait.
    pub fn window_capacity(&self) -> u32 {
        match self.mode {
            Mode::StopAndWait => 1,
            Mode::SlidingWindow => self.window_size,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Defaults to ten retransmission intervals.
    pub fn max_idle_wait(&self) -> Duration {
        self.max_idle_wait.unwrap_or(self.timeout * 10)
    }

    /// Defaults to three retransmission intervals.
    pub fn linger(&self) -> Duration {
        self.linger.unwrap_or(self.timeout * 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_sliding_window() {
        let c = TransferConfig::default();
        assert_eq!(c.mode(), Mode::SlidingWindow);
        assert_eq!(c.window_capacity(), DEFAULT_WINDOW);
        assert_eq!(c.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(c.payload_size(), MAX_PAYLOAD);
        assert_eq!(c.max_idle_wait(), DEFAULT_TIMEOUT * 10);
    }

    #[test]
    fn stop_and_wait_ignores_window_size() {
        let c = TransferConfig::new(Mode::StopAndWait)
            .with_window_size(64)
            .unwrap();
        assert_eq!(c.window_capacity(), 1);
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = TransferConfig::default().with_timeout(Duration::ZERO);
        assert_eq!(err, Err(ConfigError::NonPositiveTimeout));
    }

    #[test]
    fn window_bounds_checked() {
        assert_eq!(
            TransferConfig::default().with_window_size(0),
            Err(ConfigError::InvalidWindowSize(0))
        );
        assert!(TransferConfig::default()
            .with_window_size(MAX_WINDOW + 1)
            .is_err());
        assert!(TransferConfig::default().with_window_size(MAX_WINDOW).is_ok());
    }

    #[test]
    fn payload_bounds_checked() {
        assert!(TransferConfig::default().with_payload_size(0).is_err());
        assert!(TransferConfig::default()
            .with_payload_size(MAX_PAYLOAD + 1)
            .is_err());
        assert_eq!(
            TransferConfig::default()
                .with_payload_size(4)
                .unwrap()
                .payload_size(),
            4
        );
    }

    #[test]
    fn port_validation() {
        assert_eq!(validate_port(0), Ok(0));
        assert_eq!(validate_port(65535), Ok(65535));
        assert_eq!(validate_port(65536), Err(ConfigError::InvalidPort(65536)));
        assert_eq!(validate_port(-1), Err(ConfigError::InvalidPort(-1)));
    }

    #[test]
    fn resolves_literal_address() {
        let addr = resolve_remote("127.0.0.1:32456").unwrap();
        assert_eq!(addr.port(), 32456);
    }

    #[test]
    fn missing_port_is_unresolved() {
        assert!(matches!(
            resolve_remote("127.0.0.1"),
            Err(ConfigError::UnresolvedAddress(_))
        ));
    }

    #[test]
    fn mode_parses_from_cli_names() {
        assert_eq!("stop-and-wait".parse::<Mode>(), Ok(Mode::StopAndWait));
        assert_eq!("Sliding-Window".parse::<Mode>(), Ok(Mode::SlidingWindow));
        assert!("gbn".parse::<Mode>().is_err());
    }

    #[test]
    fn mode_bit_roundtrip() {
        assert_eq!(Mode::from_bit(Mode::StopAndWait.bit()), Mode::StopAndWait);
        assert_eq!(Mode::from_bit(Mode::SlidingWindow.bit()), Mode::SlidingWindow);
    }
}
