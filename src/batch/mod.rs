//! Message Batches: submit, poll, wait, read results, cancel.
//!
//! The manager never caches batch state. Every operation asks the server, and
//! the only invariants checked locally are the ones a single call (or a
//! single [`BatchManager::wait_until_ended`] loop) can observe.
pub mod results;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolViolation, WireError};
use crate::protocol::batch::{
    BatchPage, BatchRequest, BatchResult, CreateBatchBody, DeletedBatch, ListParams,
    MessageBatch, ProcessingStatus,
};
use crate::transport::{decode_json, Transport};

pub use results::{parse_result_line, result_stream};

const BATCHES_PATH: &str = "/v1/messages/batches";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Results of one batch, in file order.
pub type ResultStream = Pin<Box<dyn Stream<Item = Result<BatchResult, WireError>> + Send>>;

/// Drives the lifecycle of message batches over a shared transport.
#[derive(Debug)]
pub struct BatchManager<T> {
    transport: Arc<T>,
    poll_interval: Duration,
}

impl<T> Clone for BatchManager<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            poll_interval: self.poll_interval,
        }
    }
}

impl<T: Transport> BatchManager<T> {
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the interval callers get from [`BatchManager::poll_interval`].
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Configured default interval between polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Submit a batch.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidRequest`] for an empty batch and
    /// [`ProtocolViolation::DuplicateCustomId`] when two requests share a
    /// `custom_id`; neither case reaches the network. Transport, API and
    /// decode errors are propagated.
    pub async fn submit(&self, requests: &[BatchRequest]) -> Result<MessageBatch, WireError> {
        if requests.is_empty() {
            return Err(WireError::InvalidRequest(
                "a batch needs at least one request".to_string(),
            ));
        }
        let mut seen = FxHashSet::default();
        for request in requests {
            if !seen.insert(request.custom_id.as_str()) {
                return Err(ProtocolViolation::DuplicateCustomId(request.custom_id.clone()).into());
            }
        }

        let body = serde_json::to_value(CreateBatchBody { requests })
            .map_err(|err| WireError::InvalidRequest(format!("unserializable batch: {err}")))?;
        let value = self.transport.post_json(BATCHES_PATH, &body).await?;
        let batch: MessageBatch = decode_json(value, "message batch")?;

        let submitted = requests.len() as u64;
        let reported = reported_total(&batch)?;
        if reported != submitted {
            return Err(ProtocolViolation::RequestCountChanged {
                batch_id: batch.id,
                expected: submitted,
                actual: reported,
            }
            .into());
        }
        tracing::info!(batch_id = %batch.id, requests = submitted, "batch submitted");
        Ok(batch)
    }

    /// Fetch the current snapshot of a batch.
    ///
    /// # Errors
    ///
    /// Returns transport, API and decode errors, and
    /// [`ProtocolViolation::RequestCountOverflow`] for counts that cannot be
    /// summed.
    pub async fn poll(&self, batch_id: &str) -> Result<MessageBatch, WireError> {
        let path = batch_path(batch_id)?;
        let value = self.transport.get_json(&path).await?;
        let batch: MessageBatch = decode_json(value, "message batch")?;
        reported_total(&batch)?;
        tracing::debug!(
            batch_id = %batch.id,
            status = %batch.processing_status,
            processing = batch.request_counts.processing,
            "batch polled"
        );
        Ok(batch)
    }

    /// Poll until the batch reports `ended`.
    ///
    /// The token is checked before every poll and raced against every sleep.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Cancelled`] when the token fires,
    /// [`ProtocolViolation::StatusRegression`] or
    /// [`ProtocolViolation::RequestCountChanged`] when consecutive snapshots
    /// disagree, and any poll error unchanged.
    pub async fn wait_until_ended(
        &self,
        batch_id: &str,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<MessageBatch, WireError> {
        let mut previous: Option<MessageBatch> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(WireError::Cancelled);
            }
            let batch = self.poll(batch_id).await?;
            if let Some(previous) = &previous {
                check_progress(previous, &batch)?;
            }
            if batch.is_ended() {
                tracing::info!(
                    batch_id = %batch.id,
                    succeeded = batch.request_counts.succeeded,
                    errored = batch.request_counts.errored,
                    canceled = batch.request_counts.canceled,
                    expired = batch.request_counts.expired,
                    "batch ended"
                );
                return Ok(batch);
            }
            previous = Some(batch);

            tokio::select! {
                () = cancel.cancelled() => return Err(WireError::Cancelled),
                () = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Stream the results of an ended batch in file order.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::ResultsNotReady`] while the batch has no results
    /// URL, and any poll or transport error. Malformed lines are skipped, not
    /// reported.
    pub async fn stream_results(
        &self,
        batch_id: &str,
    ) -> Result<ResultStream, WireError> {
        let batch = self.poll(batch_id).await?;
        let Some(results_url) = batch.results_url else {
            return Err(WireError::ResultsNotReady {
                batch_id: batch.id,
            });
        };
        let body = self.transport.get_stream(&results_url).await?;
        Ok(Box::pin(result_stream(body)))
    }

    /// Request cancellation of an in-progress batch.
    ///
    /// Returns the server's snapshot; the status it reports is not forced
    /// locally.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::CancelNotInProgress`] when a fresh poll
    /// shows the batch is not `in_progress`, and any transport, API or decode
    /// error.
    pub async fn cancel(&self, batch_id: &str) -> Result<MessageBatch, WireError> {
        let current = self.poll(batch_id).await?;
        if current.processing_status != ProcessingStatus::InProgress {
            return Err(ProtocolViolation::CancelNotInProgress {
                batch_id: current.id,
                status: current.processing_status.to_string(),
            }
            .into());
        }

        let path = format!("{}/cancel", batch_path(batch_id)?);
        let value = self
            .transport
            .post_json(&path, &serde_json::Value::Object(serde_json::Map::new()))
            .await?;
        let batch: MessageBatch = decode_json(value, "message batch")?;
        reported_total(&batch)?;
        tracing::info!(batch_id = %batch.id, status = %batch.processing_status, "batch cancel requested");
        Ok(batch)
    }

    /// List batches, most recent first.
    ///
    /// # Errors
    ///
    /// Returns transport, API and decode errors.
    pub async fn list(&self, params: &ListParams) -> Result<BatchPage, WireError> {
        let query = params.to_query();
        let path = if query.is_empty() {
            BATCHES_PATH.to_string()
        } else {
            format!("{BATCHES_PATH}?{query}")
        };
        let value = self.transport.get_json(&path).await?;
        decode_json(value, "batch page")
    }

    /// Delete an ended batch.
    ///
    /// # Errors
    ///
    /// Returns transport, API and decode errors; the server rejects deleting
    /// a batch that is still processing.
    pub async fn delete(&self, batch_id: &str) -> Result<DeletedBatch, WireError> {
        let path = batch_path(batch_id)?;
        let value = self.transport.delete_json(&path).await?;
        let deleted: DeletedBatch = decode_json(value, "deleted batch")?;
        tracing::info!(batch_id = %deleted.id, "batch deleted");
        Ok(deleted)
    }
}

fn reported_total(batch: &MessageBatch) -> Result<u64, ProtocolViolation> {
    batch
        .request_counts
        .total()
        .ok_or_else(|| ProtocolViolation::RequestCountOverflow {
            batch_id: batch.id.clone(),
        })
}

fn batch_path(batch_id: &str) -> Result<String, WireError> {
    if batch_id.is_empty() || batch_id.contains(['/', '?', '#']) {
        return Err(WireError::InvalidRequest(format!(
            "invalid batch id '{batch_id}'"
        )));
    }
    Ok(format!("{BATCHES_PATH}/{batch_id}"))
}

/// Compare two consecutive snapshots of the same batch.
///
/// # Errors
///
/// Returns the violated invariant.
pub fn check_progress(
    previous: &MessageBatch,
    current: &MessageBatch,
) -> Result<(), ProtocolViolation> {
    if !previous
        .processing_status
        .can_advance_to(current.processing_status)
    {
        return Err(ProtocolViolation::StatusRegression {
            batch_id: current.id.clone(),
            from: previous.processing_status.to_string(),
            to: current.processing_status.to_string(),
        });
    }
    let expected = reported_total(previous)?;
    let actual = reported_total(current)?;
    if expected != actual {
        return Err(ProtocolViolation::RequestCountChanged {
            batch_id: current.id.clone(),
            expected,
            actual,
        });
    }
    Ok(())
}
