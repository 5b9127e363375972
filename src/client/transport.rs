//! HTTP transport to the remote service

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Method, Proxy};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{AutosignError, Result};
use crate::models::ProxyRecord;

/// Build a client routed through `proxy`, or strictly direct when `None`
pub fn build_http_client(
    proxy: Option<&ProxyRecord>,
    timeout: Duration,
) -> std::result::Result<Client, reqwest::Error> {
    let mut builder = Client::builder().timeout(timeout);

    match proxy {
        Some(record) => {
            let mut proxy = Proxy::all(record.url())?;
            if let Some(creds) = &record.credentials {
                proxy = proxy.basic_auth(&creds.username, &creds.password);
            }
            builder = builder.proxy(proxy);
        }
        None => builder = builder.no_proxy(),
    }

    builder.build()
}

/// One remote call, independent of routing
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    pub path: &'static str,
    pub body: Option<Value>,
    pub token: Option<String>,
}

/// Raw answer of the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

/// Failure of a single remote call before any response was read
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("proxy connection failed: {0}")]
    ProxyConnect(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Map a reqwest failure, attributing connect errors to the proxy when one was used
    pub fn from_reqwest(err: &reqwest::Error, proxied: bool) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() && proxied {
            TransportError::ProxyConnect(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Sends remote requests, optionally through a proxy
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn send(
        &self,
        request: &RemoteRequest,
        proxy: Option<&ProxyRecord>,
    ) -> std::result::Result<RemoteResponse, TransportError>;
}

/// reqwest-backed transport; clients are cached per proxy endpoint
pub struct HttpTransport {
    base_url: String,
    user_agent: String,
    timeout: Duration,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl HttpTransport {
    pub fn new(remote: &RemoteConfig, timeout: Duration) -> Result<Self> {
        let direct = build_http_client(None, timeout)
            .map_err(|e| AutosignError::InvalidConfig(format!("remote client: {}", e)))?;

        Ok(Self {
            base_url: remote.base_url.trim_end_matches('/').to_string(),
            user_agent: remote.user_agent.clone(),
            timeout,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(
        &self,
        proxy: Option<&ProxyRecord>,
    ) -> std::result::Result<Client, TransportError> {
        let Some(record) = proxy else {
            return Ok(self.direct.clone());
        };

        let key = match &record.credentials {
            Some(c) => format!("{}|{}", record.url(), c.username),
            None => record.url(),
        };

        let mut cache = self.proxied.lock();
        if let Some(client) = cache.get(&key) {
            return Ok(client.clone());
        }
        let client = build_http_client(Some(record), self.timeout)
            .map_err(|e| TransportError::ProxyConnect(e.to_string()))?;
        cache.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn send(
        &self,
        request: &RemoteRequest,
        proxy: Option<&ProxyRecord>,
    ) -> std::result::Result<RemoteResponse, TransportError> {
        let client = self.client_for(proxy)?;
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = client
            .request(request.method.clone(), &url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/json;charset=UTF-8",
            );
        if let Some(token) = &request.token {
            builder = builder.header(reqwest::header::AUTHORIZATION, token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(
            url = %url,
            proxy = %proxy.map(|p| p.address()).unwrap_or_else(|| "direct".to_string()),
            "Sending remote request"
        );

        let proxied = proxy.is_some();
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, proxied))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, proxied))?;

        Ok(RemoteResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_http;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};

    fn remote(base_url: String) -> RemoteConfig {
        RemoteConfig {
            base_url,
            user_agent: "autosign-test".to_string(),
            coin_type: "income_wallet".to_string(),
            withdraw_password: String::new(),
        }
    }

    #[tokio::test]
    async fn test_send_direct_forwards_headers_and_body() {
        let addr = spawn_http(Router::new().route(
            "/api/user/sign",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let ua = headers
                    .get("user-agent")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(serde_json::json!({"code": 0, "msg": auth, "data": {"ua": ua, "echo": body}}))
            }),
        ))
        .await;

        let transport =
            HttpTransport::new(&remote(format!("http://{}", addr)), Duration::from_secs(5)).unwrap();
        let request = RemoteRequest {
            method: Method::POST,
            path: "/api/user/sign",
            body: Some(serde_json::json!({})),
            token: Some("tok".to_string()),
        };

        let response = transport.send(&request, None).await.unwrap();
        assert_eq!(response.status, 200);
        let body: Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["msg"], "tok");
        assert_eq!(body["data"]["ua"], "autosign-test");
    }

    #[tokio::test]
    async fn test_send_through_unreachable_proxy_is_proxy_connect() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = HttpTransport::new(
            &remote("http://remote.invalid".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let request = RemoteRequest {
            method: Method::GET,
            path: "/api/assets/myAssets",
            body: None,
            token: None,
        };

        let proxy = ProxyRecord::new("127.0.0.1", dead_port);
        let err = transport.send(&request, Some(&proxy)).await.unwrap_err();
        assert!(matches!(err, TransportError::ProxyConnect(_)));
    }

    #[test]
    fn test_build_http_client_with_credentials() {
        let proxy = ProxyRecord::new("203.0.113.5", 1080)
            .with_scheme(crate::models::ProxyScheme::Socks5)
            .with_credentials("user", "pass");
        assert!(build_http_client(Some(&proxy), Duration::from_secs(1)).is_ok());
        assert!(build_http_client(None, Duration::from_secs(1)).is_ok());
    }
}
