use std::time::Duration;

use tracing::debug;

use crate::config::{IP_ECHO_URL, TOR_CHECK_URL};
use crate::error::{GateKeeperError, Result};
use crate::session::{HttpRequest, HttpSession};

/// Public address the given session appears to come from.
pub async fn get_public_ip(session: &dyn HttpSession, timeout: Duration) -> Result<String> {
    get_public_ip_from(session, IP_ECHO_URL, timeout).await
}

pub async fn get_public_ip_from(
    session: &dyn HttpSession,
    url: &str,
    timeout: Duration,
) -> Result<String> {
    let response = session
        .execute(HttpRequest::get(url, timeout))
        .await?
        .error_for_status()
        .map_err(|e| GateKeeperError::Network(format!("IP lookup failed: {}", e)))?;

    let body = response
        .text()
        .await
        .map_err(|e| GateKeeperError::Network(format!("Failed to read IP: {}", e)))?;

    Ok(body.trim().to_string())
}

/// Asks the Tor Project whether the session exits through Tor.
///
/// `Err(Network)` means the check service could not be reached at all, which
/// for a proxied session usually means the SOCKS port is closed. `Ok(false)`
/// means it was reached and did not confirm Tor routing.
pub async fn is_tor_exit(session: &dyn HttpSession, timeout: Duration) -> Result<bool> {
    is_tor_exit_at(session, TOR_CHECK_URL, timeout).await
}

pub async fn is_tor_exit_at(
    session: &dyn HttpSession,
    url: &str,
    timeout: Duration,
) -> Result<bool> {
    let response = session
        .execute(HttpRequest::get(url, timeout))
        .await?
        .error_for_status()
        .map_err(|e| GateKeeperError::Network(format!("Tor check failed: {}", e)))?;

    let body = response
        .bytes()
        .await
        .map_err(|e| GateKeeperError::Network(format!("Failed to read Tor check: {}", e)))?;

    Ok(parse_is_tor(&body))
}

fn parse_is_tor(body: &[u8]) -> bool {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(json) => json.get("IsTor").map(is_truthy).unwrap_or(false),
        Err(e) => {
            debug!("Tor check returned non-JSON body: {}", e);
            false
        }
    }
}

/// JSON truthiness: `null`, `false`, zero and empty values are false.
fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;

    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
