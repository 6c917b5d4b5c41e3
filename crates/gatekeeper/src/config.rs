use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateKeeperError, Result};

pub const DEFAULT_SOCKS_HOST: &str = "127.0.0.1";
pub const DEFAULT_SOCKS_PORT: u16 = 9150;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

pub const IP_ECHO_URL: &str = "https://api.ipify.org/";
pub const TOR_CHECK_URL: &str = "https://check.torproject.org/api/ip";
pub const GEO_URL_TEMPLATE: &str = "https://ipapi.co/{ip}/json";
pub const SMOKE_TEST_URL: &str = "https://httpbin.org/ip";

/// Remote services the verification flow talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub ip_echo: String,
    pub tor_check: String,
    /// `{ip}` is replaced with the address being looked up.
    pub geo: String,
    pub smoke_test: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            ip_echo: IP_ECHO_URL.to_string(),
            tor_check: TOR_CHECK_URL.to_string(),
            geo: GEO_URL_TEMPLATE.to_string(),
            smoke_test: SMOKE_TEST_URL.to_string(),
        }
    }
}

impl Endpoints {
    pub fn geo_url(&self, ip: &str) -> String {
        self.geo.replace("{ip}", ip)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateKeeperConfig {
    pub socks_host: String,
    pub socks_port: u16,
    pub geo: bool,
    pub timeout_secs: u64,
    pub endpoints: Endpoints,
}

impl Default for GateKeeperConfig {
    fn default() -> Self {
        Self {
            socks_host: DEFAULT_SOCKS_HOST.to_string(),
            socks_port: DEFAULT_SOCKS_PORT,
            geo: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            endpoints: Endpoints::default(),
        }
    }
}

impl GateKeeperConfig {
    /// Defaults overridden by `GATEKEEPER_SOCKS_HOST`, `GATEKEEPER_SOCKS_PORT`,
    /// `GATEKEEPER_GEO` and `GATEKEEPER_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("GATEKEEPER_SOCKS_HOST") {
            config.socks_host = host;
        }

        if let Ok(port) = std::env::var("GATEKEEPER_SOCKS_PORT") {
            config.socks_port = port.parse().map_err(|e| {
                GateKeeperError::Config(format!("Invalid GATEKEEPER_SOCKS_PORT {}: {}", port, e))
            })?;
        }

        if let Ok(geo) = std::env::var("GATEKEEPER_GEO") {
            config.geo = parse_flag(&geo).ok_or_else(|| {
                GateKeeperError::Config(format!("Invalid GATEKEEPER_GEO: {}", geo))
            })?;
        }

        if let Ok(secs) = std::env::var("GATEKEEPER_TIMEOUT_SECS") {
            config.timeout_secs = secs.parse().map_err(|e| {
                GateKeeperError::Config(format!("Invalid GATEKEEPER_TIMEOUT_SECS {}: {}", secs, e))
            })?;
        }

        Ok(config)
    }

    pub fn with_socks_host(mut self, host: impl Into<String>) -> Self {
        self.socks_host = host.into();
        self
    }

    pub fn with_socks_port(mut self, port: u16) -> Self {
        self.socks_port = port;
        self
    }

    pub fn with_geo(mut self, enabled: bool) -> Self {
        self.geo = enabled;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn socks_url(&self) -> String {
        format!("socks5h://{}:{}", self.socks_host, self.socks_port)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
