//! Invocation logging
//!
//! [`LoggingHandler`] traces every invocation with its duration and outcome.
//! Facades add it to their handler chains when the process-wide flag is on
//! at construction time; flipping the flag later does not change facades
//! already built.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::ConnectorResult;
use crate::ids::FacadeId;
use crate::proxy::{Invocation, InvocationHandler, InvocationOutput};

static LOGGING_PROXY: AtomicBool = AtomicBool::new(false);

/// Turn invocation logging on or off for facades built from now on.
pub fn set_logging_proxy_enabled(enabled: bool) {
    LOGGING_PROXY.store(enabled, Ordering::SeqCst);
}

/// Check whether new facades get a [`LoggingHandler`].
#[must_use]
pub fn logging_proxy_enabled() -> bool {
    LOGGING_PROXY.load(Ordering::SeqCst)
}

/// Handler tracing each invocation before forwarding it.
pub struct LoggingHandler {
    inner: Arc<dyn InvocationHandler>,
    facade_id: FacadeId,
    connector: String,
}

impl LoggingHandler {
    /// Wrap `inner`, tagging log lines with the facade and connector.
    pub fn new(
        inner: Arc<dyn InvocationHandler>,
        facade_id: FacadeId,
        connector: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            facade_id,
            connector: connector.into(),
        }
    }
}

#[async_trait]
impl InvocationHandler for LoggingHandler {
    async fn invoke(&self, invocation: Invocation<'_>) -> ConnectorResult<InvocationOutput> {
        let method = invocation.method;
        debug!(
            facade_id = %self.facade_id,
            connector = %self.connector,
            method = %method,
            streaming = invocation.is_streaming(),
            "Invocation started"
        );

        let started = Instant::now();
        let result = self.inner.invoke(invocation).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(_) => debug!(
                facade_id = %self.facade_id,
                connector = %self.connector,
                method = %method,
                elapsed_ms,
                "Invocation completed"
            ),
            Err(e) => warn!(
                facade_id = %self.facade_id,
                connector = %self.connector,
                method = %method,
                elapsed_ms,
                error_code = e.error_code(),
                error = %e,
                "Invocation failed"
            ),
        }
        result
    }
}
