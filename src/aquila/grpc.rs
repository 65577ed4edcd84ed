//! tonic-backed implementation of the transport seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::{debug, warn};

use crate::aquila::proto::aquila_service_client::AquilaServiceClient;
use crate::aquila::proto::{AquilaRequest, AquilaResponse};
use crate::aquila::transport::{
    ChannelConnectivity, ConnectivityCallback, Connector, ScoringChannel, ScoringStub,
    SubscriptionId,
};
use crate::error::{AppError, Result};

/// Opens lazy tonic channels with a per-channel concurrency limit.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    connect_timeout: Duration,
    concurrency: usize,
}

impl GrpcConnector {
    pub fn new(connect_timeout: Duration, concurrency: usize) -> Self {
        Self {
            connect_timeout,
            concurrency: concurrency.max(1),
        }
    }
}

impl Connector for GrpcConnector {
    fn open(&self, host: &str, port: u16) -> Result<Arc<dyn ScoringChannel>> {
        let target = format!("http://{}:{}", host, port);
        let endpoint = Endpoint::from_shared(target.clone())
            .map_err(|e| AppError::Connection(format!("invalid endpoint {}: {}", target, e)))?
            .connect_timeout(self.connect_timeout)
            .concurrency_limit(self.concurrency);

        // Lazy: the connection is established by the monitor or the first call.
        let channel = endpoint.connect_lazy();
        debug!("Opened channel to {}", target);
        Ok(Arc::new(GrpcChannel::new(target, endpoint, channel)))
    }
}

/// Connectivity state shared between a channel, its stub and its monitor.
struct ChannelShared {
    target: String,
    status: Mutex<ChannelConnectivity>,
    subscribers: Mutex<HashMap<SubscriptionId, ConnectivityCallback>>,
}

impl ChannelShared {
    /// Record `status` and notify subscribers if it changed.
    fn publish(&self, status: ChannelConnectivity) {
        {
            let mut current = self.status.lock();
            if *current == status {
                return;
            }
            debug!("Channel {} is now {}", self.target, status);
            *current = status;
        }
        let callbacks: Vec<ConnectivityCallback> =
            self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(status);
        }
    }
}

/// A tonic [`Channel`] plus connectivity reporting.
///
/// A monitor task makes one eager connection attempt and reports READY or
/// TRANSIENT_FAILURE; afterwards, calls failing with `Unavailable` report
/// TRANSIENT_FAILURE and successful calls report READY.
pub struct GrpcChannel {
    endpoint: Endpoint,
    client: AquilaServiceClient<Channel>,
    shared: Arc<ChannelShared>,
    next_id: AtomicU64,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl GrpcChannel {
    fn new(target: String, endpoint: Endpoint, channel: Channel) -> Self {
        Self {
            endpoint,
            client: AquilaServiceClient::new(channel),
            shared: Arc::new(ChannelShared {
                target,
                status: Mutex::new(ChannelConnectivity::Connecting),
                subscribers: Mutex::new(HashMap::new()),
            }),
            next_id: AtomicU64::new(1),
            monitor: Mutex::new(None),
        }
    }

    fn start_monitor(&self) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No tokio runtime; {} will connect on first call", self.shared.target);
                return;
            }
        };

        let endpoint = self.endpoint.clone();
        let shared = Arc::downgrade(&self.shared);
        *monitor = Some(runtime.spawn(async move {
            let result = endpoint.connect().await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            match result {
                Ok(_) => shared.publish(ChannelConnectivity::Ready),
                Err(e) => {
                    warn!("Could not reach {}: {}", shared.target, e);
                    shared.publish(ChannelConnectivity::TransientFailure);
                }
            }
        }));
    }
}

impl ScoringChannel for GrpcChannel {
    fn subscribe(&self, callback: ConnectivityCallback, try_to_connect: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.subscribers.lock().insert(id, callback);
        if try_to_connect {
            self.start_monitor();
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.subscribers.lock().remove(&id);
    }

    fn stub(&self) -> Arc<dyn ScoringStub> {
        Arc::new(GrpcStub {
            client: self.client.clone(),
            shared: Arc::downgrade(&self.shared),
        })
    }

    fn close(&self) {
        self.shared.subscribers.lock().clear();
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
        *self.shared.status.lock() = ChannelConnectivity::Shutdown;
        debug!("Closed channel to {}", self.shared.target);
    }
}

impl Drop for GrpcChannel {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.abort();
        }
    }
}

/// `Regress` over a [`GrpcChannel`].
struct GrpcStub {
    client: AquilaServiceClient<Channel>,
    shared: Weak<ChannelShared>,
}

impl GrpcStub {
    fn report(&self, status: ChannelConnectivity) {
        if let Some(shared) = self.shared.upgrade() {
            shared.publish(status);
        }
    }
}

#[async_trait]
impl ScoringStub for GrpcStub {
    async fn regress(&self, request: AquilaRequest, timeout: Duration) -> Result<AquilaResponse> {
        let mut client = self.client.clone();
        let mut request = tonic::Request::new(request);
        request.set_timeout(timeout);

        match client.regress(request).await {
            Ok(response) => {
                self.report(ChannelConnectivity::Ready);
                Ok(response.into_inner())
            }
            Err(status) => {
                if status.code() == Code::Unavailable {
                    self.report(ChannelConnectivity::TransientFailure);
                }
                Err(AppError::Rpc(status))
            }
        }
    }
}
