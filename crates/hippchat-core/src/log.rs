//! Hour-segmented, append-only inbox log on top of an [`ObjectStore`].
//!
//! Each user's inbox container holds one object per UTC hour:
//!
//! ```text
//! inbox-2024030513.log
//! inbox-2024030514.log   <- current hour, appended to
//! ```
//!
//! Segment bodies are newline-delimited JSON message records. Readers follow
//! the log with a millisecond offset compared against each segment's
//! last-modified stamp.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Timelike, Utc};

use crate::config::RetryPolicy;
use crate::error::StoreError;
use crate::store::{
    ObjectStore, ObjectSummary, PutObject, META_APPEND, META_APPEND_ID, META_APPEND_IF_VERSION,
    META_APPEND_VERSION,
};

/// Key prefix shared by all inbox segments.
pub const SEGMENT_PREFIX: &str = "inbox-";

const SEGMENT_SUFFIX: &str = ".log";
const SEGMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// Lines read from the log plus the offset to resume from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailBatch {
    /// Non-empty, trimmed lines in log order
    pub lines: Vec<String>,
    /// Offset (epoch ms) for the next [`InboxLog::tail_since`]
    pub new_offset: i64,
}

/// Segment key for the hour containing `at`.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use hippchat_core::log::segment_key_for;
///
/// let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
/// assert_eq!(segment_key_for(at), "inbox-2024030514.log");
/// ```
pub fn segment_key_for(at: DateTime<Utc>) -> String {
    format!("{}{}{}", SEGMENT_PREFIX, at.format("%Y%m%d%H"), SEGMENT_SUFFIX)
}

/// Start of the hour a segment key names, or `None` for foreign keys.
pub fn parse_segment_key(key: &str) -> Option<DateTime<Utc>> {
    let digits = key.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    if digits.len() != 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = digits[0..4].parse().ok()?;
    let month = digits[4..6].parse().ok()?;
    let day = digits[6..8].parse().ok()?;
    let hour = digits[8..10].parse().ok()?;
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).single()
}

/// Truncate to the start of the UTC hour.
fn hour_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

fn datetime_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Split a segment body into non-empty trimmed lines.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Non-transient errors and the final failed attempt are returned as-is.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    op = label,
                    attempt = attempt + 1,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient store failure, backing off"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                if !e.is_not_found() {
                    tracing::error!(
                        op = label,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Store operation failed"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Append-only inbox log operations.
#[derive(Clone)]
pub struct InboxLog {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl InboxLog {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Append one line to the current hour's segment.
    pub async fn append_line(&self, bucket: &str, line: &str) -> Result<(), StoreError> {
        self.append_line_at(bucket, line, Utc::now()).await
    }

    /// Append one line to the segment for the hour containing `now`.
    ///
    /// The line gets a trailing newline if missing. The append id is chosen
    /// once, so a retried append is recognizable as the same write.
    pub async fn append_line_at(&self, bucket: &str, line: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let bucket = bucket.trim();
        let body = if line.ends_with('\n') {
            line.to_string()
        } else {
            format!("{}\n", line)
        };
        let key = segment_key_for(now);
        let append_id = uuid::Uuid::new_v4().to_string();

        let this = self;
        let (key_ref, body_ref, id_ref) = (key.as_str(), body.as_str(), append_id.as_str());
        with_retries(&self.retry, "append", move || {
            this.append_once(bucket, key_ref, body_ref, id_ref)
        })
        .await?;

        tracing::debug!(bucket, key = %key, append_id = %append_id, bytes = body.len(), "Appended line");
        Ok(())
    }

    async fn append_once(&self, bucket: &str, key: &str, body: &str, append_id: &str) -> Result<(), StoreError> {
        let version = match self.store.head_object(bucket, key).await {
            Ok(head) => head
                .metadata
                .get(META_APPEND_VERSION)
                .cloned()
                .unwrap_or_else(|| "0".to_string()),
            Err(e) if e.is_not_found() => {
                tracing::trace!(bucket, key, "Creating empty segment");
                self.store
                    .put_object(
                        bucket,
                        PutObject::new(key, "").with_content_type(SEGMENT_CONTENT_TYPE),
                    )
                    .await?;
                "0".to_string()
            }
            Err(e) => return Err(e),
        };

        let request = PutObject::new(key, body.to_string())
            .with_content_type(SEGMENT_CONTENT_TYPE)
            .with_metadata(META_APPEND, "true")
            .with_metadata(META_APPEND_IF_VERSION, version)
            .with_metadata(META_APPEND_ID, append_id);
        self.store.put_object(bucket, request).await
    }

    async fn list_segments(&self, bucket: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        let store = &*self.store;
        with_retries(&self.retry, "list", move || store.list_objects(bucket, SEGMENT_PREFIX)).await
    }

    /// Fetch a segment. `Ok(None)` if it does not exist.
    async fn fetch_segment(&self, bucket: &str, key: &str) -> Result<Option<(Vec<String>, i64)>, StoreError> {
        let store = &*self.store;
        match with_retries(&self.retry, "get", move || store.get_object(bucket, key)).await {
            Ok(data) => Ok(Some((split_lines(&data.text()), data.last_modified))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lines from segments modified after `from_offset`.
    pub async fn tail_since(&self, bucket: &str, from_offset: i64) -> Result<TailBatch, StoreError> {
        self.tail_since_at(bucket, from_offset, Utc::now()).await
    }

    /// [`tail_since`](Self::tail_since) with an explicit notion of "now".
    ///
    /// Segments are selected when their hour lies in `[hour(from), hour(now)]`
    /// and their listed last-modified is strictly after `from_offset`. The
    /// current hour's segment is always fetched, since a stale listing may
    /// not show it yet. Missing segments read as empty.
    pub async fn tail_since_at(
        &self,
        bucket: &str,
        from_offset: i64,
        now: DateTime<Utc>,
    ) -> Result<TailBatch, StoreError> {
        let bucket = bucket.trim();
        let since = from_offset.max(0);
        let first_hour = hour_floor(datetime_from_ms(since));
        let last_hour = hour_floor(now);

        let listed = self.list_segments(bucket).await?;
        let mut keys: Vec<(String, i64)> = listed
            .into_iter()
            .filter(|obj| {
                parse_segment_key(&obj.key)
                    .map(|hour| hour >= first_hour && hour <= last_hour)
                    .unwrap_or(false)
            })
            .filter(|obj| obj.last_modified > since)
            .map(|obj| (obj.key, obj.last_modified))
            .collect();
        keys.sort();

        let current_key = segment_key_for(now);
        if !keys.iter().any(|(k, _)| *k == current_key) {
            keys.push((current_key, 0));
        }

        tracing::trace!(bucket, since, segments = keys.len(), "Tailing inbox");

        let mut batch = TailBatch {
            lines: Vec::new(),
            new_offset: since,
        };
        for (key, listed_lm) in keys {
            match self.fetch_segment(bucket, &key).await? {
                Some((lines, fetched_lm)) => {
                    batch.lines.extend(lines);
                    batch.new_offset = batch.new_offset.max(fetched_lm).max(listed_lm);
                }
                None => {
                    tracing::trace!(bucket, key = %key, "Segment not found, treating as empty");
                }
            }
        }
        Ok(batch)
    }

    /// The most recent `max_lines` lines across segments, oldest first.
    ///
    /// Segments are fetched newest-first until enough lines are collected,
    /// then reassembled in chronological order. A segment that fails to
    /// fetch is skipped. The returned offset is the newest last-modified among
    /// listed segments, held just below the oldest segment that failed to
    /// fetch so a later tail picks it up, or 0 when nothing could be fetched.
    pub async fn recent_lines(&self, bucket: &str, max_lines: usize) -> Result<TailBatch, StoreError> {
        let bucket = bucket.trim();
        let mut listed = self.list_segments(bucket).await?;
        if listed.is_empty() {
            return Ok(TailBatch::default());
        }
        listed.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.key.cmp(&a.key))
        });
        let mut new_offset = listed.iter().map(|o| o.last_modified).max().unwrap_or(0);

        let mut chunks: Vec<Vec<String>> = Vec::new();
        let mut total = 0;
        for obj in &listed {
            match self.fetch_segment(bucket, &obj.key).await {
                Ok(Some((lines, _))) => {
                    total += lines.len();
                    chunks.push(lines);
                }
                Ok(None) => {
                    tracing::warn!(bucket, key = %obj.key, "Listed segment disappeared, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(bucket, key = %obj.key, error = %e, "Failed to fetch segment, skipping");
                    new_offset = new_offset.min(obj.last_modified - 1);
                    continue;
                }
            }
            if total >= max_lines {
                break;
            }
        }

        if chunks.is_empty() {
            return Ok(TailBatch::default());
        }

        let mut lines: Vec<String> = chunks.into_iter().rev().flatten().collect();
        if lines.len() > max_lines {
            lines.drain(..lines.len() - max_lines);
        }
        Ok(TailBatch { lines, new_offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    const BUCKET: &str = "chat-bob";

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, h, m, 0).unwrap()
    }

    fn ms(h: u32, m: u32) -> i64 {
        at(h, m).timestamp_millis()
    }

    fn setup() -> (Arc<MemoryObjectStore>, InboxLog) {
        let store = Arc::new(MemoryObjectStore::new());
        let log = InboxLog::new(store.clone(), RetryPolicy::default());
        (store, log)
    }

    #[test]
    fn test_segment_key_format() {
        assert_eq!(segment_key_for(at(14, 30)), "inbox-2024030514.log");
        assert_eq!(
            segment_key_for(Utc.with_ymd_and_hms(2025, 1, 9, 3, 59, 59).unwrap()),
            "inbox-2025010903.log"
        );
    }

    #[test]
    fn test_parse_segment_key() {
        assert_eq!(parse_segment_key("inbox-2024030514.log"), Some(at(14, 0)));
        assert_eq!(parse_segment_key("inbox-2024030514.txt"), None);
        assert_eq!(parse_segment_key("inbox-202403051.log"), None);
        assert_eq!(parse_segment_key("inbox-2024133014.log"), None);
        assert_eq!(parse_segment_key("profile-x.json"), None);
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a\n\n  b  \r\n\n"), vec!["a", "b"]);
        assert!(split_lines("").is_empty());
    }

    #[tokio::test]
    async fn test_append_creates_segment_and_appends() {
        let (store, log) = setup();
        store.create_container(BUCKET).await.unwrap();

        log.append_line_at(BUCKET, "{\"a\":1}", at(14, 1)).await.unwrap();
        log.append_line_at(BUCKET, "{\"a\":2}\n", at(14, 2)).await.unwrap();

        let body = store.object_body(BUCKET, "inbox-2024030514.log").unwrap();
        assert_eq!(body, b"{\"a\":1}\n{\"a\":2}\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_retries_transient_failures() {
        let (store, log) = setup();
        store.create_container(BUCKET).await.unwrap();
        store.inject_failure(StoreError::Network("reset".to_string()));
        store.inject_failure(StoreError::Status {
            status: 503,
            message: "Service Unavailable".to_string(),
        });

        log.append_line_at(BUCKET, "line", at(14, 0)).await.unwrap();
        assert_eq!(
            store.object_body(BUCKET, "inbox-2024030514.log").unwrap(),
            b"line\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_gives_up_after_three_attempts() {
        let (store, log) = setup();
        store.create_container(BUCKET).await.unwrap();
        for _ in 0..3 {
            store.inject_failure(StoreError::Network("down".to_string()));
        }

        let started = tokio::time::Instant::now();
        let err = log.append_line_at(BUCKET, "line", at(14, 0)).await.unwrap_err();
        assert!(err.is_transient());
        // 300ms + 600ms of backoff between the three attempts
        assert_eq!(started.elapsed().as_millis(), 900);
        assert_eq!(store.calls().head, 3);
    }

    #[tokio::test]
    async fn test_append_does_not_retry_permanent_failures() {
        let (store, log) = setup();
        store.create_container(BUCKET).await.unwrap();
        store.inject_failure(StoreError::AccessDenied("bad key".to_string()));

        let err = log.append_line_at(BUCKET, "line", at(14, 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::AccessDenied(_)));
        assert_eq!(store.calls().head, 1);
        assert_eq!(store.calls().put, 0);
    }

    #[tokio::test]
    async fn test_tail_since_selects_newer_segments_in_range() {
        let (store, log) = setup();
        store.insert_at(BUCKET, "inbox-2024030512.log", "late-write\n", ms(14, 20));
        store.insert_at(BUCKET, "inbox-2024030513.log", "old\n", ms(13, 50));
        store.insert_at(BUCKET, "inbox-2024030514.log", "new-1\nnew-2\n", ms(14, 10));

        let batch = log.tail_since_at(BUCKET, ms(13, 55), at(14, 30)).await.unwrap();
        assert_eq!(batch.lines, vec!["new-1", "new-2"]);
        assert_eq!(batch.new_offset, ms(14, 10));
    }

    #[tokio::test]
    async fn test_tail_since_always_fetches_current_hour() {
        let (store, log) = setup();
        // Listed stamp is not newer than the offset, but the current hour is read anyway
        store.insert_at(BUCKET, "inbox-2024030514.log", "current\n", ms(14, 0));

        let batch = log.tail_since_at(BUCKET, ms(14, 5), at(14, 30)).await.unwrap();
        assert_eq!(batch.lines, vec!["current"]);
        assert_eq!(batch.new_offset, ms(14, 5));
    }

    #[tokio::test]
    async fn test_tail_since_missing_current_segment_is_empty() {
        let (store, log) = setup();
        store.create_container(BUCKET).await.unwrap();

        let batch = log.tail_since_at(BUCKET, ms(13, 0), at(14, 30)).await.unwrap();
        assert!(batch.lines.is_empty());
        assert_eq!(batch.new_offset, ms(13, 0));
    }

    #[tokio::test]
    async fn test_tail_since_spans_hours_in_order() {
        let (store, log) = setup();
        store.insert_at(BUCKET, "inbox-2024030512.log", "a\n", ms(12, 59));
        store.insert_at(BUCKET, "inbox-2024030513.log", "b\n", ms(13, 59));
        store.insert_at(BUCKET, "inbox-2024030514.log", "c\n", ms(14, 1));

        let batch = log.tail_since_at(BUCKET, ms(12, 10), at(14, 30)).await.unwrap();
        assert_eq!(batch.lines, vec!["a", "b", "c"]);
        assert_eq!(batch.new_offset, ms(14, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tail_since_propagates_fetch_errors() {
        let (store, log) = setup();
        store.insert_at(BUCKET, "inbox-2024030514.log", "x\n", ms(14, 10));
        store.break_key("inbox-2024030514.log", 500);

        let err = log.tail_since_at(BUCKET, ms(14, 0), at(14, 30)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_recent_lines_chronological_across_segments() {
        let (store, log) = setup();
        store.insert_at(BUCKET, "inbox-2024030512.log", "1\n2\n3\n", ms(12, 59));
        store.insert_at(BUCKET, "inbox-2024030513.log", "4\n5\n6\n", ms(13, 59));
        store.insert_at(BUCKET, "inbox-2024030514.log", "7\n8\n9\n", ms(14, 10));

        let batch = log.recent_lines(BUCKET, 4).await.unwrap();
        assert_eq!(batch.lines, vec!["6", "7", "8", "9"]);
        assert_eq!(batch.new_offset, ms(14, 10));
        // Oldest segment was never needed
        assert_eq!(store.calls().get, 2);

        let all = log.recent_lines(BUCKET, 100).await.unwrap();
        assert_eq!(all.lines, vec!["1", "2", "3", "4", "5", "6", "7", "8", "9"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_lines_skips_failed_segments() {
        let (store, log) = setup();
        store.insert_at(BUCKET, "inbox-2024030513.log", "old\n", ms(13, 59));
        store.insert_at(BUCKET, "inbox-2024030514.log", "broken\n", ms(14, 10));
        store.break_key("inbox-2024030514.log", 500);

        let batch = log.recent_lines(BUCKET, 10).await.unwrap();
        assert_eq!(batch.lines, vec!["old"]);
        // Held below the broken segment
        assert_eq!(batch.new_offset, ms(14, 10) - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_segment_skipped_by_recent_lines_is_tailed_later() {
        let (store, log) = setup();
        store.insert_at(BUCKET, "inbox-2024030512.log", "a\n", ms(12, 59));
        store.insert_at(BUCKET, "inbox-2024030513.log", "lost\n", ms(13, 30));
        store.insert_at(BUCKET, "inbox-2024030514.log", "b\n", ms(14, 10));
        store.break_key("inbox-2024030513.log", 500);

        let batch = log.recent_lines(BUCKET, 10).await.unwrap();
        assert_eq!(batch.lines, vec!["a", "b"]);
        assert_eq!(batch.new_offset, ms(13, 30) - 1);

        store.heal_key("inbox-2024030513.log");
        let tail = log.tail_since_at(BUCKET, batch.new_offset, at(14, 30)).await.unwrap();
        assert!(tail.lines.contains(&"lost".to_string()));
        assert_eq!(tail.new_offset, ms(14, 10));
    }

    #[tokio::test]
    async fn test_recent_lines_empty_inbox() {
        let (store, log) = setup();
        store.create_container(BUCKET).await.unwrap();
        assert_eq!(log.recent_lines(BUCKET, 10).await.unwrap(), TailBatch::default());
    }
}
