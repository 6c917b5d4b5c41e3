//! Refuses to send HTTP traffic until the SOCKS route is confirmed to exit through Tor.
//!
//! ```rust,no_run
//! use gatekeeper::{GateKeeper, GateKeeperConfig, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> gatekeeper::Result<()> {
//!     let gk = GateKeeper::new(GateKeeperConfig::default()).await?;
//!     println!("{} -> {}", gk.clearnet_ip(), gk.exit_ip());
//!
//!     // Every request goes through the verified Tor session
//!     let response = gk.get("https://httpbin.org/ip", RequestOptions::new()).await?;
//!     println!("{}", response.status());
//!
//!     gk.rotate().await?;
//!     gk.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod gatekeeper;
pub mod geo;
pub mod session;
pub mod verify;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{Endpoints, GateKeeperConfig, DEFAULT_SOCKS_PORT};
pub use download::DownloadOptions;
pub use error::{GateKeeperError, Result};
pub use gatekeeper::{verified_tor_session, GateKeeper};
pub use geo::{geo_lookup, Location};
pub use session::{
    clearnet_session, tor_session, Data, HttpRequest, HttpSession, ReqwestSessionFactory,
    RequestOptions, SessionFactory,
};
pub use verify::{get_public_ip, is_tor_exit};

pub async fn tor_gatekeeper() -> Result<GateKeeper> {
    GateKeeper::new(GateKeeperConfig::default()).await
}
