//! Detached background jobs
//!
//! A job runs after the HTTP response is sent. Its result, including a panic,
//! always ends up as the terminal state of its operation.

use super::Broker;
use crate::error::{BrokerResult, GENERIC_FAILURE};
use osb_types::OperationState;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::Instrument;

impl Broker {
    /// Run `job` on the runtime and record its outcome on `operation_id`
    pub(super) fn spawn_job<F>(&self, operation_id: String, job: F) -> JoinHandle<()>
    where
        F: Future<Output = BrokerResult<()>> + Send + 'static,
    {
        let store = self.store.clone();
        let span = tracing::info_span!("job", operation_id = %operation_id);

        tokio::spawn(
            async move {
                // Inner task so a panic surfaces as a JoinError instead of
                // taking the recorder down with it
                let outcome = tokio::spawn(job.in_current_span()).await;

                let (state, description) = match outcome {
                    Ok(Ok(())) => (OperationState::Succeeded, None),
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Background operation failed");
                        (OperationState::Failed, Some(e.description()))
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Background operation aborted");
                        (OperationState::Failed, Some(GENERIC_FAILURE.to_string()))
                    }
                };

                match store.update_operation(&operation_id, state, description).await {
                    Ok(op) => tracing::info!(state = %op.state, "Operation finished"),
                    Err(e) => tracing::error!(error = %e, "Could not record operation outcome"),
                }
            }
            .instrument(span),
        )
    }
}
