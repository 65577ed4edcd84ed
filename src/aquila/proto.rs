//! Wire types and client for `aquila.AquilaService`.
//!
//! Mirrors what `tonic-build` generates for:
//!
//! ```proto
//! syntax = "proto3";
//! package aquila;
//!
//! message AquilaRequest  { bytes image_data = 1; }
//! message AquilaResponse { repeated float valence = 1; string model_version = 2; }
//!
//! service AquilaService {
//!   rpc Regress (AquilaRequest) returns (AquilaResponse);
//! }
//! ```

/// A flattened 299 x 299 x 3 RGB u8 image.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AquilaRequest {
    #[prost(bytes = "bytes", tag = "1")]
    pub image_data: ::bytes::Bytes,
}

/// Either a single valence score or a full feature vector.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AquilaResponse {
    #[prost(float, repeated, tag = "1")]
    pub valence: ::prost::alloc::vec::Vec<f32>,
    #[prost(string, tag = "2")]
    pub model_version: ::prost::alloc::string::String,
}

/// Generated client implementations.
pub mod aquila_service_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use crate::constants::model::{REGRESS_PATH, SERVICE_NAME};
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct AquilaServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl AquilaServiceClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> AquilaServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        pub async fn regress(
            &mut self,
            request: impl tonic::IntoRequest<super::AquilaRequest>,
        ) -> std::result::Result<tonic::Response<super::AquilaResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(REGRESS_PATH);
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new(SERVICE_NAME, "Regress"));
            self.inner.unary(req, path, codec).await
        }
    }
}
