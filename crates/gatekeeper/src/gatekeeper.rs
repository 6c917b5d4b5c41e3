//! The verify-before-use state machine.
//!
//! A [`GateKeeper`] only exists once its Tor session has passed verification:
//! construction measures the clearnet address, builds a session through the
//! SOCKS port, asks the Tor Project whether that session exits through Tor and
//! then measures the exit address. Any failure along the way means no value is
//! returned.
//!
//! Rotation follows the same steps against a fresh session and swaps the new
//! session and exit address in together, so callers never see a session that
//! has not been verified.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{Method, Response};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::GateKeeperConfig;
use crate::download::{download, DownloadOptions};
use crate::error::{GateKeeperError, Result};
use crate::geo::geo_lookup_at;
use crate::session::{
    Data, HttpRequest, HttpSession, ReqwestSessionFactory, RequestOptions, SessionFactory,
};
use crate::verify::{get_public_ip_from, is_tor_exit_at};

const VERIFICATION_ABORTED: &str = "Tor verification failed. Execution aborted.";
const ROTATION_ABORTED: &str = "Tor verification failed after rotation.";

/// A verified session and the exit address it was measured with.
struct Circuit {
    session: Arc<dyn HttpSession>,
    exit_ip: String,
}

pub struct GateKeeper {
    config: GateKeeperConfig,
    factory: Arc<dyn SessionFactory>,
    clearnet_ip: String,
    circuit: RwLock<Circuit>,
    rotation: Mutex<()>,
}

impl GateKeeper {
    /// Connects through the SOCKS port in `config` using reqwest sessions.
    pub async fn new(config: GateKeeperConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(ReqwestSessionFactory)).await
    }

    pub async fn with_factory(
        config: GateKeeperConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        info!(
            "GateKeeper boot: acquiring Tor-verified session via {}",
            config.socks_url()
        );

        let clearnet = factory.clearnet()?;
        let clearnet_ip =
            get_public_ip_from(clearnet.as_ref(), &config.endpoints.ip_echo, config.timeout())
                .await?;
        drop(clearnet);

        let circuit = build_circuit(factory.as_ref(), &config, VERIFICATION_ABORTED).await?;
        info!("Tor verified: {} -> {}", clearnet_ip, circuit.exit_ip);

        if config.geo {
            log_location(circuit.session.as_ref(), &config, &circuit.exit_ip).await;
        }

        Ok(Self {
            config,
            factory,
            clearnet_ip,
            circuit: RwLock::new(circuit),
            rotation: Mutex::new(()),
        })
    }

    pub fn clearnet_ip(&self) -> &str {
        &self.clearnet_ip
    }

    pub fn exit_ip(&self) -> String {
        self.read_circuit().exit_ip.clone()
    }

    pub fn tor_exit(&self) -> String {
        self.exit_ip()
    }

    /// The currently verified session.
    pub fn session(&self) -> Arc<dyn HttpSession> {
        self.read_circuit().session.clone()
    }

    pub fn socks_port(&self) -> u16 {
        self.config.socks_port
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub fn geo_enabled(&self) -> bool {
        self.config.geo
    }

    pub fn config(&self) -> &GateKeeperConfig {
        &self.config
    }

    /// Sends one request over the verified session. Options are forwarded
    /// untouched and errors are returned as the session reports them.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let (session, exit_ip) = self.current();
        info!("[Tor {}] {} {}", exit_ip, method, url);
        session
            .execute(HttpRequest::new(method, url, options))
            .await
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::GET, url, options).await
    }

    pub async fn post(
        &self,
        url: &str,
        data: Option<Data>,
        json: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.request(Method::POST, url, with_body(options, data, json))
            .await
    }

    pub async fn put(
        &self,
        url: &str,
        data: Option<Data>,
        json: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<Response> {
        self.request(Method::PUT, url, with_body(options, data, json))
            .await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::DELETE, url, options).await
    }

    pub async fn download(
        &self,
        url: &str,
        target_path: impl AsRef<Path>,
        options: DownloadOptions,
    ) -> Result<u64> {
        let target_path = target_path.as_ref();
        let (session, exit_ip) = self.current();
        info!(
            "[Tor {}] downloading {} -> {}",
            exit_ip,
            url,
            target_path.display()
        );
        download(session.as_ref(), url, target_path, options).await
    }

    /// Replaces the session with a freshly verified one and returns the exit
    /// address afterwards.
    ///
    /// Tor may keep using the same circuit, so an unchanged exit is logged as
    /// a warning and is not an error. If the new session cannot be verified the
    /// current one stays in place.
    pub async fn rotate(&self) -> Result<String> {
        let _rotating = self.rotation.lock().await;
        let old_exit = self.exit_ip();
        info!("[Tor {}] rotating session...", old_exit);

        let circuit = match build_circuit(self.factory.as_ref(), &self.config, ROTATION_ABORTED)
            .await
        {
            Ok(circuit) => circuit,
            Err(e) => {
                warn!("[Tor {}] rotation failed, keeping current session: {}", old_exit, e);
                return Err(e);
            }
        };

        let new_exit = circuit.exit_ip.clone();
        let session = circuit.session.clone();
        let previous = {
            let mut current = self
                .circuit
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *current, circuit)
        };
        drop(previous);

        if new_exit != old_exit {
            info!("Tor exit rotated: {} -> {}", old_exit, new_exit);
            if self.config.geo {
                log_location(session.as_ref(), &self.config, &new_exit).await;
            }
        } else {
            warn!("Tor exit unchanged after rotation attempt: {}", new_exit);
        }

        Ok(new_exit)
    }

    /// Releases the session and its connection pool.
    pub fn close(self) {
        debug!("[Tor {}] closing session", self.exit_ip());
    }

    fn current(&self) -> (Arc<dyn HttpSession>, String) {
        let circuit = self.read_circuit();
        (circuit.session.clone(), circuit.exit_ip.clone())
    }

    fn read_circuit(&self) -> std::sync::RwLockReadGuard<'_, Circuit> {
        self.circuit
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Display for GateKeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<GateKeeper: {} -> tor_exit: {}>",
            self.clearnet_ip,
            self.exit_ip()
        )
    }
}

impl fmt::Debug for GateKeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateKeeper")
            .field("socks_url", &self.config.socks_url())
            .field("clearnet_ip", &self.clearnet_ip)
            .field("exit_ip", &self.exit_ip())
            .finish()
    }
}

/// Builds a Tor session and checks it exits through Tor, without measuring
/// any addresses.
pub async fn verified_tor_session(
    factory: &dyn SessionFactory,
    config: &GateKeeperConfig,
) -> Result<Arc<dyn HttpSession>> {
    let session = factory.tor(&config.socks_url())?;
    verify_session(session.as_ref(), config, VERIFICATION_ABORTED).await?;
    Ok(session)
}

async fn build_circuit(
    factory: &dyn SessionFactory,
    config: &GateKeeperConfig,
    failure: &str,
) -> Result<Circuit> {
    let session = factory.tor(&config.socks_url())?;
    verify_session(session.as_ref(), config, failure).await?;

    let exit_ip =
        get_public_ip_from(session.as_ref(), &config.endpoints.ip_echo, config.timeout()).await?;
    if exit_ip.is_empty() {
        return Err(GateKeeperError::Network(
            "IP echo service returned an empty address".into(),
        ));
    }

    Ok(Circuit { session, exit_ip })
}

async fn verify_session(
    session: &dyn HttpSession,
    config: &GateKeeperConfig,
    failure: &str,
) -> Result<()> {
    match is_tor_exit_at(session, &config.endpoints.tor_check, config.timeout()).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(GateKeeperError::VerificationFailed(failure.to_string())),
        Err(e) if e.is_network() => {
            debug!("Underlying Tor connection error: {}", e);
            Err(GateKeeperError::ProxyUnreachable {
                host: config.socks_host.clone(),
                port: config.socks_port,
            })
        }
        Err(e) => Err(e),
    }
}

async fn log_location(session: &dyn HttpSession, config: &GateKeeperConfig, ip: &str) {
    match geo_lookup_at(session, &config.endpoints.geo_url(ip), ip).await {
        Some(location) => info!("Tor exit location: {}", location),
        None => info!("Tor exit location: Unavailable"),
    }
}

fn with_body(
    mut options: RequestOptions,
    data: Option<Data>,
    json: Option<serde_json::Value>,
) -> RequestOptions {
    if data.is_some() {
        options.data = data;
    }
    if json.is_some() {
        options.json = json;
    }
    options
}
