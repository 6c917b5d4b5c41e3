use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::info;

use crate::config::GEO_URL_TEMPLATE;
use crate::session::{HttpRequest, HttpSession, RequestOptions};

pub const GEO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub country: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.city, self.country)
    }
}

#[derive(Deserialize)]
struct GeoResponse {
    city: Option<String>,
    country: Option<String>,
}

pub fn user_agent() -> String {
    format!("GateKeeper/{}", env!("CARGO_PKG_VERSION"))
}

/// Best-effort city/country for `ip`. Any failure yields `None`.
pub async fn geo_lookup(session: &dyn HttpSession, ip: &str) -> Option<Location> {
    geo_lookup_at(session, &GEO_URL_TEMPLATE.replace("{ip}", ip), ip).await
}

pub async fn geo_lookup_at(session: &dyn HttpSession, url: &str, ip: &str) -> Option<Location> {
    let options = RequestOptions::new()
        .header("User-Agent", user_agent())
        .timeout(GEO_TIMEOUT);

    let response = match session
        .execute(HttpRequest::new(reqwest::Method::GET, url, options))
        .await
    {
        Ok(response) => response,
        Err(e) => {
            info!("Unable to get geolocation for {}: {}", ip, e);
            return None;
        }
    };

    if response.status() != StatusCode::OK {
        info!(
            "Unable to get geolocation for {}: status {}",
            ip,
            response.status()
        );
        return None;
    }

    let data: GeoResponse = match response.json().await {
        Ok(data) => data,
        Err(e) => {
            info!("Unable to get geolocation for {}: {}", ip, e);
            return None;
        }
    };

    match (data.city, data.country) {
        (Some(city), Some(country)) if !city.is_empty() && !country.is_empty() => {
            Some(Location { city, country })
        }
        _ => {
            info!("Unable to get geolocation for {}: incomplete answer", ip);
            None
        }
    }
}
