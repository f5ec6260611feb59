//! Pre-flight network reachability check
//!
//! A single TCP connect attempt with a short timeout. The pipeline runs this
//! before touching the dataset root and aborts on failure; there is no retry.

use crate::config::ConnectivityConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Something that can tell whether the network is usable
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Succeed if the network is reachable
    ///
    /// # Errors
    /// - `PipelineError::NoConnectivity` when the target cannot be reached
    async fn check(&self) -> Result<()>;
}

/// Probe that opens (and immediately drops) a TCP connection
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    #[must_use]
    pub fn new<S: Into<String>>(address: S, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &ConnectivityConfig) -> Self {
        Self::new(config.address.clone(), config.timeout())
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    fn failure(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::NoConnectivity {
            address: self.address.clone(),
            reason: reason.into(),
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::from_config(&ConnectivityConfig::default())
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn check(&self) -> Result<()> {
        log::debug!(
            "Checking connectivity to {} (timeout {}ms)",
            self.address,
            self.timeout.as_millis()
        );

        match tokio::time::timeout(self.timeout, TcpStream::connect(self.address.as_str())).await {
            Ok(Ok(_stream)) => {
                log::debug!("Connectivity check passed");
                Ok(())
            },
            Ok(Err(e)) => Err(self.failure(e.to_string())),
            Err(_) => Err(self.failure(format!(
                "timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

/// Probe that always succeeds, for offline runs over an existing dataset
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeOnline;

#[async_trait]
impl ConnectivityProbe for AssumeOnline {
    async fn check(&self) -> Result<()> {
        Ok(())
    }
}
