//! Scripted sessions for exercising the gatekeeper without a Tor daemon.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Response, StatusCode};

use crate::error::{GateKeeperError, Result};
use crate::session::{HttpRequest, HttpSession, SessionFactory};

type Handler = dyn Fn(&HttpRequest) -> Result<Response> + Send + Sync;

pub fn text_response(status: u16, body: impl Into<String>) -> Response {
    let response = http::Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .body(body.into())
        .unwrap_or_default();
    Response::from(response)
}

pub fn json_response(status: u16, value: serde_json::Value) -> Response {
    let response = http::Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("content-type", "application/json")
        .body(value.to_string())
        .unwrap_or_default();
    Response::from(response)
}

pub fn connection_refused(request: &HttpRequest) -> GateKeeperError {
    GateKeeperError::Network(format!(
        "{} {} failed: connection refused",
        request.method, request.url
    ))
}

/// Session that answers from a closure and records every request it sees.
pub struct FakeSession {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeSession {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<Response> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers the IP echo with `ip` and the Tor check with `is_tor`,
    /// everything else with `200 ok`.
    pub fn tor_exit(ip: &str, is_tor: bool) -> Self {
        let ip = ip.to_string();
        Self::new(move |request| {
            if request.url.contains("check.torproject.org") {
                Ok(json_response(
                    200,
                    serde_json::json!({ "IsTor": is_tor, "IP": ip.as_str() }),
                ))
            } else if request.url.contains("api.ipify.org") {
                Ok(text_response(200, format!("{}\n", ip)))
            } else {
                Ok(text_response(200, "ok"))
            }
        })
    }

    /// Every request fails as if the proxy refused the connection.
    pub fn unreachable() -> Self {
        Self::new(|request| Err(connection_refused(request)))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests().pop()
    }
}

#[async_trait]
impl HttpSession for FakeSession {
    async fn execute(&self, request: HttpRequest) -> Result<Response> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        (self.handler)(&request)
    }
}

/// Hands out a fixed clearnet session and a queue of Tor sessions; the last
/// queued Tor session is reused once the queue runs dry.
pub struct FakeFactory {
    clearnet: Arc<FakeSession>,
    tor: Mutex<VecDeque<Arc<FakeSession>>>,
    socks_urls: Mutex<Vec<String>>,
}

impl FakeFactory {
    pub fn new(clearnet: Arc<FakeSession>, tor: Vec<Arc<FakeSession>>) -> Self {
        Self {
            clearnet,
            tor: Mutex::new(tor.into_iter().collect()),
            socks_urls: Mutex::new(Vec::new()),
        }
    }

    pub fn clearnet_session(&self) -> Arc<FakeSession> {
        self.clearnet.clone()
    }

    /// SOCKS URLs passed to [`SessionFactory::tor`], in call order.
    pub fn socks_urls(&self) -> Vec<String> {
        self.socks_urls.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl SessionFactory for FakeFactory {
    fn clearnet(&self) -> Result<Arc<dyn HttpSession>> {
        Ok(self.clearnet.clone())
    }

    fn tor(&self, socks_url: &str) -> Result<Arc<dyn HttpSession>> {
        if let Ok(mut urls) = self.socks_urls.lock() {
            urls.push(socks_url.to_string());
        }

        let mut queue = self
            .tor
            .lock()
            .map_err(|_| GateKeeperError::Config("fake factory poisoned".into()))?;
        let session = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };

        session
            .map(|s| s as Arc<dyn HttpSession>)
            .ok_or_else(|| GateKeeperError::Config("no fake Tor session queued".into()))
    }
}
