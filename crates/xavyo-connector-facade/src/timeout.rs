//! Timeout proxy
//!
//! [`TimeoutHandler`] bounds how long a single-result invocation may run.
//! The invocation runs on its own task inside a cancellation scope; when the
//! deadline passes the caller gets [`ConnectorError::OperationTimeout`], the
//! scope's [`CancellationToken`] is cancelled, and whatever the task produces
//! later is dropped.
//!
//! Cancellation is cooperative. Connectors that want to stop early poll
//! [`current_cancellation`]; the others run to completion in the background.
//!
//! Streaming invocations (search, sync) are forwarded unchanged: they borrow
//! the caller's results handler and cannot be moved off the caller's task,
//! so a configured timeout has no effect on them.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ConnectorError, ConnectorResult};
use crate::proxy::{Invocation, InvocationArgs, InvocationHandler, InvocationOutput};

tokio::task_local! {
    static CANCELLATION: CancellationToken;
}

/// Cancellation token of the timed invocation running on this task, if any.
#[must_use]
pub fn current_cancellation() -> Option<CancellationToken> {
    CANCELLATION.try_with(CancellationToken::clone).ok()
}

/// Handler enforcing a deadline on single-result invocations.
pub struct TimeoutHandler {
    inner: Arc<dyn InvocationHandler>,
    timeout: Duration,
}

impl TimeoutHandler {
    /// Wrap `inner` with a deadline.
    pub fn new(inner: Arc<dyn InvocationHandler>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Configured deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl InvocationHandler for TimeoutHandler {
    async fn invoke(&self, invocation: Invocation<'_>) -> ConnectorResult<InvocationOutput> {
        let method = invocation.method;
        let args = match invocation.args {
            InvocationArgs::Call(args) => args,
            InvocationArgs::Stream(args) => {
                return self.inner.invoke(Invocation::stream(method, args)).await;
            }
        };

        let token = CancellationToken::new();
        // Cancels the scope on every exit, including the caller dropping this future.
        let _cancel_on_exit = token.clone().drop_guard();

        let inner = Arc::clone(&self.inner);
        let mut task = tokio::spawn(CANCELLATION.scope(token, async move {
            inner.invoke(Invocation::call(method, args)).await
        }));

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ConnectorError::internal_with_source(
                format!("invocation of {method} did not complete"),
                join_error,
            )),
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    method = %method,
                    timeout_ms,
                    "Invocation timed out, detaching task"
                );
                Err(ConnectorError::OperationTimeout {
                    operation: method.operation,
                    timeout_ms,
                })
            }
        }
    }
}
