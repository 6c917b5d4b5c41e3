//! HTTP sessions and the factory that routes them through the Tor SOCKS port.
//!
//! Everything the gatekeeper sends goes through [`HttpSession::execute`], which
//! keeps the state machine independent of the transport and lets tests swap in
//! a scripted session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Proxy, Response};
use serde::Serialize;

use crate::config::DEFAULT_SOCKS_PORT;
use crate::error::{GateKeeperError, Result};

pub fn default_socks_url() -> String {
    format!("socks5h://127.0.0.1:{}", DEFAULT_SOCKS_PORT)
}

/// Non-JSON request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Form(Vec<(String, String)>),
    Raw(Vec<u8>),
}

/// Pass-through options for a single request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub data: Option<Data>,
    pub json: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.data = Some(Data::Form(fields));
        self
    }

    pub fn body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.data = Some(Data::Raw(bytes.into()));
        self
    }

    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| GateKeeperError::Config(format!("Invalid JSON body: {}", e)))?;
        self.json = Some(value);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub options: RequestOptions,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>, options: RequestOptions) -> Self {
        Self {
            method,
            url: url.into(),
            options,
        }
    }

    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(Method::GET, url, RequestOptions::new().timeout(timeout))
    }
}

#[async_trait]
pub trait HttpSession: Send + Sync {
    /// Sends one request. Transport failures map to `Network`; the response
    /// status is left for the caller to judge.
    async fn execute(&self, request: HttpRequest) -> Result<Response>;
}

/// Creates the sessions the gatekeeper verifies and uses.
pub trait SessionFactory: Send + Sync {
    fn clearnet(&self) -> Result<Arc<dyn HttpSession>>;

    fn tor(&self, socks_url: &str) -> Result<Arc<dyn HttpSession>>;
}

pub struct ReqwestSession {
    client: Client,
}

/// Session whose HTTP and HTTPS traffic both go through `socks_url`.
///
/// Use a `socks5h://` URL so hostnames are resolved by the proxy instead of
/// leaking DNS queries outside Tor.
pub fn tor_session(socks_url: &str) -> Result<ReqwestSession> {
    let proxy = Proxy::all(socks_url)
        .map_err(|e| GateKeeperError::Config(format!("Invalid proxy URL: {}", e)))?;

    let client = Client::builder()
        .proxy(proxy)
        .build()
        .map_err(|e| GateKeeperError::Config(format!("Failed to build client: {}", e)))?;

    Ok(ReqwestSession { client })
}

/// Direct session, used only to measure the clearnet baseline.
pub fn clearnet_session() -> Result<ReqwestSession> {
    let client = Client::builder()
        .no_proxy()
        .build()
        .map_err(|e| GateKeeperError::Config(format!("Failed to build client: {}", e)))?;

    Ok(ReqwestSession { client })
}

#[async_trait]
impl HttpSession for ReqwestSession {
    async fn execute(&self, request: HttpRequest) -> Result<Response> {
        let HttpRequest {
            method,
            url,
            options,
        } = request;

        let mut builder = self.client.request(method.clone(), &url);

        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        match (options.data, options.json) {
            (Some(Data::Form(fields)), _) => builder = builder.form(&fields),
            (Some(Data::Raw(bytes)), _) => builder = builder.body(bytes),
            (None, Some(json)) => builder = builder.json(&json),
            (None, None) => {}
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        builder
            .send()
            .await
            .map_err(|e| GateKeeperError::Network(format!("{} {} failed: {}", method, url, e)))
    }
}

/// Production factory backed by reqwest.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestSessionFactory;

impl SessionFactory for ReqwestSessionFactory {
    fn clearnet(&self) -> Result<Arc<dyn HttpSession>> {
        Ok(Arc::new(clearnet_session()?))
    }

    fn tor(&self, socks_url: &str) -> Result<Arc<dyn HttpSession>> {
        Ok(Arc::new(tor_session(socks_url)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socks_url_resolves_dns_through_proxy() {
        assert_eq!(default_socks_url(), "socks5h://127.0.0.1:9150");
        assert!(tor_session(&default_socks_url()).is_ok());
        assert!(clearnet_session().is_ok());
    }

    #[test]
    fn test_invalid_proxy_url_is_config_error() {
        let err = tor_session("socks5h://127.0.0.1:notaport").err().unwrap();
        assert!(matches!(err, GateKeeperError::Config(_)));
    }

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::new()
            .header("X-Test", "yes")
            .query("q", "tor")
            .json(&serde_json::json!({"a": 1}))
            .unwrap()
            .timeout(Duration::from_secs(5));

        assert_eq!(options.headers, vec![("X-Test".to_string(), "yes".to_string())]);
        assert_eq!(options.query, vec![("q".to_string(), "tor".to_string())]);
        assert_eq!(options.json, Some(serde_json::json!({"a": 1})));
        assert_eq!(options.data, None);
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
    }
}
