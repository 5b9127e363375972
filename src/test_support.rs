//! Test doubles shared by unit tests

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;

use crate::client::{RemoteRequest, RemoteResponse, RemoteTransport, TransportError};
use crate::error::AcquireError;
use crate::models::ProxyRecord;
use crate::proxy::ProxySource;
use crate::storage::{KeyValueStore, MemoryStore};

/// Serve `router` on an ephemeral loopback port
pub async fn spawn_http(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Proxy source replaying a fixed script, then failing
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<ProxyRecord, AcquireError>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<ProxyRecord, AcquireError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxySource for ScriptedSource {
    async fn acquire(&self) -> Result<ProxyRecord, AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AcquireError::Network("script exhausted".into())))
    }
}

pub type Step = Result<RemoteResponse, TransportError>;

/// Transport replaying scripted responses and recording the route of each call
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    routes: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            routes: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `step`
    pub fn repeating(step: Step) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(step),
            routes: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, step: Step) {
        self.script.lock().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.routes.lock().len()
    }

    /// Proxy address of each call, `None` for direct calls
    pub fn proxies_used(&self) -> Vec<Option<String>> {
        self.routes.lock().clone()
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn send(
        &self,
        _request: &RemoteRequest,
        proxy: Option<&ProxyRecord>,
    ) -> Result<RemoteResponse, TransportError> {
        self.routes.lock().push(proxy.map(|p| p.address()));
        match self.script.lock().pop_front() {
            Some(step) => step,
            None => self
                .fallback
                .clone()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".into()))),
        }
    }
}

/// Transport answering through a closure, for request-dependent behaviour
pub struct FnTransport<F>(pub F);

#[async_trait]
impl<F> RemoteTransport for FnTransport<F>
where
    F: Fn(&RemoteRequest, Option<&ProxyRecord>) -> Step + Send + Sync,
{
    async fn send(
        &self,
        request: &RemoteRequest,
        proxy: Option<&ProxyRecord>,
    ) -> Result<RemoteResponse, TransportError> {
        (self.0)(request, proxy)
    }
}

/// Memory store whose saves can be switched to fail
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn load(&self, key: &str) -> crate::error::Result<Option<Vec<u8>>> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> crate::error::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
        }
        self.inner.save(key, bytes).await
    }
}
