//! In-memory transport fakes for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::aquila::proto::{AquilaRequest, AquilaResponse};
use crate::aquila::transport::{
    AddressProvider, ChannelConnectivity, ConnectivityCallback, Connector, ScoringChannel,
    ScoringStub, SubscriptionId,
};
use crate::error::{AppError, Result};

pub(crate) struct FakeAddressProvider {
    hosts: Vec<String>,
    cursor: AtomicUsize,
    calls: Mutex<Vec<bool>>,
    failures_remaining: AtomicUsize,
}

impl FakeAddressProvider {
    pub(crate) fn new(hosts: &[&str]) -> Self {
        Self {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` lookups.
    pub(crate) fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// The `force_refresh` flag of every lookup so far.
    pub(crate) fn calls(&self) -> Vec<bool> {
        self.calls.lock().clone()
    }
}

impl AddressProvider for FakeAddressProvider {
    fn get_address(&self, force_refresh: bool) -> Result<String> {
        self.calls.lock().push(force_refresh);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Connection("no hosts available".into()));
        }
        if force_refresh {
            self.cursor.fetch_add(1, Ordering::SeqCst);
        }
        let idx = self.cursor.load(Ordering::SeqCst) % self.hosts.len();
        Ok(self.hosts[idx].clone())
    }
}

pub(crate) struct FakeConnector {
    stub: Arc<dyn ScoringStub>,
    auto_ready: bool,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
}

impl FakeConnector {
    /// With `auto_ready`, channels report READY as soon as they are asked to connect.
    pub(crate) fn new(stub: Arc<dyn ScoringStub>, auto_ready: bool) -> Self {
        Self {
            stub,
            auto_ready,
            channels: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn opened(&self) -> usize {
        self.channels.lock().len()
    }

    pub(crate) fn channel(&self, index: usize) -> Arc<FakeChannel> {
        self.channels.lock()[index].clone()
    }
}

impl Connector for FakeConnector {
    fn open(&self, host: &str, port: u16) -> Result<Arc<dyn ScoringChannel>> {
        let channel = Arc::new(FakeChannel {
            target: format!("{}:{}", host, port),
            stub: self.stub.clone(),
            auto_ready: self.auto_ready,
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            retained: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }
}

pub(crate) struct FakeChannel {
    pub(crate) target: String,
    stub: Arc<dyn ScoringStub>,
    auto_ready: bool,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionId, ConnectivityCallback>>,
    /// Every callback ever registered, including unsubscribed ones.
    retained: Mutex<Vec<ConnectivityCallback>>,
    closed: AtomicBool,
}

impl FakeChannel {
    /// Notify current subscribers.
    pub(crate) fn emit(&self, status: ChannelConnectivity) {
        let callbacks: Vec<_> = self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(status);
        }
    }

    /// Notify every callback ever registered, as a late event would.
    pub(crate) fn emit_retained(&self, status: ChannelConnectivity) {
        let callbacks: Vec<_> = self.retained.lock().clone();
        for callback in callbacks {
            callback(status);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl ScoringChannel for FakeChannel {
    fn subscribe(&self, callback: ConnectivityCallback, try_to_connect: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().insert(id, callback.clone());
        self.retained.lock().push(callback.clone());
        if try_to_connect && self.auto_ready {
            callback(ChannelConnectivity::Ready);
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().remove(&id);
    }

    fn stub(&self) -> Arc<dyn ScoringStub> {
        self.stub.clone()
    }

    fn close(&self) {
        self.subscribers.lock().clear();
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Replays queued outcomes, then a fallback response or `Unavailable`.
pub(crate) struct ScriptedStub {
    script: Mutex<VecDeque<Result<AquilaResponse>>>,
    fallback: Mutex<Option<AquilaResponse>>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<usize>>,
}

impl ScriptedStub {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn respond(valence: Vec<f32>, model_version: &str) -> AquilaResponse {
        AquilaResponse {
            valence,
            model_version: model_version.to_string(),
        }
    }

    pub(crate) fn push_ok(&self, response: AquilaResponse) -> &Self {
        self.script.lock().push_back(Ok(response));
        self
    }

    pub(crate) fn push_err(&self, error: AppError) -> &Self {
        self.script.lock().push_back(Err(error));
        self
    }

    pub(crate) fn set_fallback(&self, response: AquilaResponse) {
        *self.fallback.lock() = Some(response);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payload length of every request received.
    pub(crate) fn request_sizes(&self) -> Vec<usize> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ScoringStub for ScriptedStub {
    async fn regress(&self, request: AquilaRequest, _timeout: Duration) -> Result<AquilaResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.image_data.len());

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let next = self.script.lock().pop_front();
        match next {
            Some(outcome) => outcome,
            None => match self.fallback.lock().clone() {
                Some(response) => Ok(response),
                None => Err(AppError::Rpc(tonic::Status::unavailable("scripted outage"))),
            },
        }
    }
}
