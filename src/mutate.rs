use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::gmail::{MailboxApi, UNREAD_LABEL};

/// Concurrent in-flight label mutations per batch.
const MUTATION_POOL_SIZE: usize = 10;

/// Thin wrapper issuing label mutations against the mailbox API.
///
/// Batched variants apply the single-item call across a list with bounded
/// concurrency; items are independent, so one failure never aborts a batch.
/// All failures are logged and never surfaced to the triage state, which is
/// the source of truth the user interacts with.
#[derive(Clone)]
pub struct MutationClient {
    api: Arc<dyn MailboxApi>,
    permits: Arc<Semaphore>,
}

impl MutationClient {
    pub fn new(api: Arc<dyn MailboxApi>) -> Self {
        Self {
            api,
            permits: Arc::new(Semaphore::new(MUTATION_POOL_SIZE)),
        }
    }

    /// Marks one message read by removing the unread label.
    pub async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        self.api
            .modify_labels(id, Vec::new(), vec![UNREAD_LABEL.to_string()])
            .await
    }

    /// Marks one message unread again (undo reversal).
    pub async fn mark_unread(&self, id: &str) -> Result<(), ApiError> {
        self.api
            .modify_labels(id, vec![UNREAD_LABEL.to_string()], Vec::new())
            .await
    }

    /// Marks a list of messages read, at most [`MUTATION_POOL_SIZE`] in flight.
    pub async fn mark_read_batch(&self, ids: Vec<String>) {
        self.apply_batch(ids, true).await;
    }

    /// Marks a list of messages unread, at most [`MUTATION_POOL_SIZE`] in flight.
    pub async fn mark_unread_batch(&self, ids: Vec<String>) {
        self.apply_batch(ids, false).await;
    }

    async fn apply_batch(&self, ids: Vec<String>, mark_read: bool) {
        debug!(
            "dispatching {} mark-{} mutations",
            ids.len(),
            if mark_read { "read" } else { "unread" }
        );

        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            let client = self.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = client.permits.acquire().await else {
                    return;
                };
                let result = if mark_read {
                    client.mark_read(&id).await
                } else {
                    client.mark_unread(&id).await
                };
                if let Err(err) = result {
                    if err.is_auth_expired() {
                        warn!("authentication expired while updating message {id}");
                    } else {
                        warn!("label update failed for message {id}: {err}");
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}
