//! Seams between the connection manager and the RPC transport.
//!
//! The manager never holds a concrete tonic type; it opens channels through a
//! [`Connector`], listens to their connectivity through callbacks and issues
//! calls through a [`ScoringStub`]. Tests swap in in-memory fakes.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::aquila::proto::{AquilaRequest, AquilaResponse};
use crate::error::Result;

/// Connectivity of a channel as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelConnectivity {
    Connecting,
    Ready,
    TransientFailure,
    FatalFailure,
    Shutdown,
}

impl ChannelConnectivity {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::TransientFailure | Self::FatalFailure)
    }
}

impl fmt::Display for ChannelConnectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::TransientFailure => "TRANSIENT_FAILURE",
            Self::FatalFailure => "FATAL_FAILURE",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

/// Invoked by a channel whenever its connectivity changes.
pub type ConnectivityCallback = Arc<dyn Fn(ChannelConnectivity) + Send + Sync>;

/// Handle returned by [`ScoringChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Resolves the host currently serving the model.
pub trait AddressProvider: Send + Sync {
    /// `force_refresh` asks for a different host than last time if one exists.
    fn get_address(&self, force_refresh: bool) -> Result<String>;
}

/// Opens channels to a scoring host.
pub trait Connector: Send + Sync {
    fn open(&self, host: &str, port: u16) -> Result<Arc<dyn ScoringChannel>>;
}

/// A transport-level channel to one host.
pub trait ScoringChannel: Send + Sync {
    /// Register `callback` for connectivity changes. With `try_to_connect`
    /// the channel starts connecting immediately.
    fn subscribe(&self, callback: ConnectivityCallback, try_to_connect: bool) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// Typed client over this channel.
    fn stub(&self) -> Arc<dyn ScoringStub>;

    /// Tear the channel down. No callbacks fire afterwards.
    fn close(&self);
}

/// Typed client for the `Regress` RPC.
#[async_trait]
pub trait ScoringStub: Send + Sync {
    async fn regress(&self, request: AquilaRequest, timeout: Duration) -> Result<AquilaResponse>;
}
