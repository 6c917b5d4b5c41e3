use thiserror::Error;

pub type Result<T> = std::result::Result<T, GateKeeperError>;

#[derive(Error, Debug)]
pub enum GateKeeperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Tor SOCKS proxy is not reachable on {host}:{port}. Start Tor or Tor Browser and try again.")]
    ProxyUnreachable { host: String, port: u16 },

    #[error("{0}")]
    VerificationFailed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl GateKeeperError {
    /// True for transport-level failures, including a proxy that could not be reached.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            GateKeeperError::Network(_) | GateKeeperError::ProxyUnreachable { .. }
        )
    }
}
