use std::fmt;

use serde::{Deserialize, Serialize};

use super::messages::{ErrorEnvelope, Message};

/// One request of a batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Caller-assigned correlation key, unique within a batch.
    pub custom_id: String,
    /// Messages API request body, passed through untouched.
    pub params: serde_json::Value,
}

impl BatchRequest {
    #[must_use]
    pub fn new(custom_id: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            custom_id: custom_id.into(),
            params,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct CreateBatchBody<'a> {
    pub requests: &'a [BatchRequest],
}

/// Server-side processing status. Variant order is the only legal direction
/// of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    InProgress,
    Canceling,
    Ended,
}

impl ProcessingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::InProgress => "in_progress",
            ProcessingStatus::Canceling => "canceling",
            ProcessingStatus::Ended => "ended",
        }
    }

    /// Whether a later observation of `next` is consistent with `self`.
    #[must_use]
    pub fn can_advance_to(self, next: ProcessingStatus) -> bool {
        next >= self
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub processing: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub errored: u64,
    #[serde(default)]
    pub canceled: u64,
    #[serde(default)]
    pub expired: u64,
}

impl RequestCounts {
    /// Equals the number of submitted requests at every point of the
    /// batch's life. `None` when the reported counts overflow `u64`.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.processing
            .checked_add(self.succeeded)?
            .checked_add(self.errored)?
            .checked_add(self.canceled)?
            .checked_add(self.expired)
    }
}

/// Snapshot of a batch as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBatch {
    pub id: String,
    pub processing_status: ProcessingStatus,
    pub request_counts: RequestCounts,
    pub created_at: String,
    pub expires_at: String,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub archived_at: Option<String>,
    #[serde(default)]
    pub cancel_initiated_at: Option<String>,
    #[serde(default)]
    pub results_url: Option<String>,
}

impl MessageBatch {
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.processing_status == ProcessingStatus::Ended
    }
}

/// One line of a batch results resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub custom_id: String,
    pub result: BatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchOutcome {
    Succeeded { message: Message },
    Errored { error: ErrorEnvelope },
    Canceled,
    Expired,
}

/// Pagination parameters for listing batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub after_id: Option<String>,
    pub before_id: Option<String>,
}

impl ListParams {
    pub(crate) fn to_query(&self) -> String {
        let mut pairs = url::form_urlencoded::Serializer::new(String::new());
        if let Some(limit) = self.limit {
            pairs.append_pair("limit", &limit.to_string());
        }
        if let Some(after_id) = &self.after_id {
            pairs.append_pair("after_id", after_id);
        }
        if let Some(before_id) = &self.before_id {
            pairs.append_pair("before_id", before_id);
        }
        pairs.finish()
    }
}

/// One page of [`MessageBatch`] snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPage {
    pub data: Vec<MessageBatch>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub first_id: Option<String>,
    #[serde(default)]
    pub last_id: Option<String>,
}

/// Acknowledgement returned when a batch is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedBatch {
    pub id: String,
    #[serde(rename = "type", default)]
    pub deleted_type: String,
}
