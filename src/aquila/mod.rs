//! Client side of the Aquila scoring service.
//!
//! - `proto`: wire messages and the tonic client
//! - `transport`: seams the connection manager is written against
//! - `grpc`: the tonic implementation of those seams
//! - `connection`: channel lifecycle, readiness and reconnect backoff

pub mod address;
pub mod connection;
pub mod grpc;
pub mod proto;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use address::StaticAddressProvider;
pub use connection::{ConnectionManager, ConnectionManagerBuilder, ConnectionState, ConnectionStats};
pub use grpc::GrpcConnector;
pub use proto::{AquilaRequest, AquilaResponse};
pub use transport::{
    AddressProvider, ChannelConnectivity, ConnectivityCallback, Connector, ScoringChannel,
    ScoringStub, SubscriptionId,
};
