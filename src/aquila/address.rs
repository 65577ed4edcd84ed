//! Address providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::aquila::transport::AddressProvider;
use crate::error::{AppError, Result};

/// Round-robin over a fixed host list. A forced refresh moves to the next host.
#[derive(Debug)]
pub struct StaticAddressProvider {
    hosts: Vec<String>,
    cursor: AtomicUsize,
}

impl StaticAddressProvider {
    pub fn new(hosts: Vec<String>) -> Result<Self> {
        if hosts.is_empty() {
            return Err(AppError::Config("at least one Aquila host is required".into()));
        }
        Ok(Self {
            hosts,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}

impl AddressProvider for StaticAddressProvider {
    fn get_address(&self, force_refresh: bool) -> Result<String> {
        let idx = if force_refresh {
            self.cursor.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.cursor.load(Ordering::SeqCst)
        };
        let host = self.hosts[idx % self.hosts.len()].clone();
        debug!("Resolved Aquila host {} (refresh: {})", host, force_refresh);
        Ok(host)
    }
}
