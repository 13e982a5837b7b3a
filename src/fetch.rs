use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::email::Email;
use crate::error::{ApiError, FetchError};
use crate::gmail::{MailboxApi, MessageRef, RawMessage};
use crate::parser::parse_message;

/// Progress reported to the presentation layer during retrieval.
///
/// `Listing` carries the count of identifiers collected so far (nothing is
/// loaded yet in that phase); `Fetching` carries the completed count, which
/// never decreases across callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Listing { total: usize },
    Fetching { total: usize, loaded: usize },
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Tunables for the retrieval pipeline.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Page size for the listing phase.
    pub page_size: u32,
    /// Size of the detail-fetch worker pool.
    pub workers: usize,
    /// Retries per message after a rate-limit response, before dropping it.
    pub max_retries: u32,
    /// Base backoff delay; also bounds the random jitter.
    pub base_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            workers: 15,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Retrieves and parses every unread inbox message.
///
/// Listing failures are fatal; per-message detail failures only shrink the
/// result. Output order is unspecified (grouping imposes order later).
pub async fn fetch_unread(
    api: Arc<dyn MailboxApi>,
    config: &FetchConfig,
    progress: ProgressFn,
) -> Result<Vec<Email>, FetchError> {
    let refs = list_all_unread(api.as_ref(), config, &progress).await?;
    debug!("listed {} unread messages", refs.len());

    let raw = fetch_details(api, config, refs, &progress).await?;
    let emails: Vec<Email> = raw
        .into_iter()
        .flatten()
        .filter_map(|raw| parse_message(&raw))
        .collect();
    debug!("retrieval finished with {} parsed emails", emails.len());
    Ok(emails)
}

/// Listing phase: follows the continuation token until exhausted.
///
/// Not retried; any failure aborts the whole retrieval.
async fn list_all_unread(
    api: &dyn MailboxApi,
    config: &FetchConfig,
    progress: &ProgressFn,
) -> Result<Vec<MessageRef>, FetchError> {
    let mut refs: Vec<MessageRef> = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = api.list_unread(config.page_size, page_token.take()).await?;
        refs.extend(page.messages);
        progress(Progress::Listing { total: refs.len() });

        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    Ok(refs)
}

/// Detail phase: a fixed pool of workers drains the index space through a
/// shared claim-then-increment cursor, so no index is fetched twice.
async fn fetch_details(
    api: Arc<dyn MailboxApi>,
    config: &FetchConfig,
    refs: Vec<MessageRef>,
    progress: &ProgressFn,
) -> Result<Vec<Option<RawMessage>>, FetchError> {
    let total = refs.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let refs = Arc::new(refs);
    let next_index = Arc::new(AtomicUsize::new(0));
    let auth_expired = Arc::new(AtomicBool::new(false));
    let results: Arc<Mutex<Vec<Option<RawMessage>>>> =
        Arc::new(Mutex::new((0..total).map(|_| None).collect()));
    // Completed-count and callback share one lock so `loaded` is monotone
    // even when workers finish out of index order.
    let completed = Arc::new(Mutex::new(0usize));

    let worker_count = config.workers.min(total).max(1);
    let max_retries = config.max_retries;
    let base_delay = config.base_delay;

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let api = Arc::clone(&api);
        let refs = Arc::clone(&refs);
        let next_index = Arc::clone(&next_index);
        let auth_expired = Arc::clone(&auth_expired);
        let results = Arc::clone(&results);
        let completed = Arc::clone(&completed);
        let progress = Arc::clone(progress);

        handles.push(tokio::spawn(async move {
            loop {
                if auth_expired.load(Ordering::SeqCst) {
                    break;
                }
                let index = next_index.fetch_add(1, Ordering::SeqCst);
                if index >= total {
                    break;
                }

                let id = &refs[index].id;
                match fetch_one(api.as_ref(), id, max_retries, base_delay).await {
                    Ok(raw) => {
                        results.lock().await[index] = Some(raw);
                    }
                    Err(ApiError::AuthExpired) => {
                        auth_expired.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(err) => {
                        warn!("dropping message {id}: {err}");
                    }
                }

                let mut count = completed.lock().await;
                *count += 1;
                progress(Progress::Fetching {
                    total,
                    loaded: *count,
                });
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    if auth_expired.load(Ordering::SeqCst) {
        return Err(FetchError::AuthExpired);
    }

    let mut slots = results.lock().await;
    Ok(std::mem::take(&mut *slots))
}

/// Fetches one message, retrying rate-limit responses with exponential
/// backoff plus jitter. Exhausted retries and other failures drop the item.
async fn fetch_one(
    api: &dyn MailboxApi,
    id: &str,
    max_retries: u32,
    base_delay: Duration,
) -> Result<RawMessage, ApiError> {
    let mut attempt = 0u32;
    loop {
        match api.get_message(id).await {
            Ok(raw) => return Ok(raw),
            Err(ApiError::RateLimited) if attempt < max_retries => {
                let backoff = base_delay * 2u32.pow(attempt);
                let jitter_ms = rand::thread_rng().gen_range(0..=base_delay.as_millis() as u64);
                debug!(
                    "rate limited fetching {id}, retry {} in {:?}",
                    attempt + 1,
                    backoff
                );
                tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
