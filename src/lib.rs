//! The `aquila_client` core library.
//!
//! A resilient client for the remote Aquila image-scoring model. Images are
//! preprocessed into the model's canonical tensor, sent over a managed gRPC
//! connection that reconnects on failure, retried with jittered exponential
//! backoff, and the returned feature vector is turned into a demographic score.

pub mod aquila;
pub mod config;
pub mod constants;
pub mod demographics;
pub mod error;
pub mod predictor;
pub mod reliability;
pub mod vision;
