//! In-memory backends for deterministic testing.
//!
//! Each backend keeps its state behind an `Arc`, so clones share state: hand
//! one clone to the worker and keep another for assertions.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use verity_db::memory::{InMemoryQueue, InMemoryJobStore, InMemoryStorage};
//!
//! let queue = InMemoryQueue::new();
//! queue.seed("task_queue", [entry.as_str()]);
//! queue.fail_next_leases(2);
//!
//! // ... run a worker against `queue.clone()` ...
//!
//! assert!(queue.snapshot("task_queue:PROGRESSED").is_empty());
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use verity_core::{
    join_object_path, validate_transition, Error, JobRecord, JobRecordStore, JobStatus,
    ObjectStorage, QueueBackend, Result,
};

// =============================================================================
// QUEUE
// =============================================================================

/// Kind of queue operation, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    Lease,
    Remove,
    Push,
    Requeue,
    IncrCounter,
    DeleteCounter,
}

/// In-memory list queue with blocking lease and fault injection.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    pushed: Notify,
}

#[derive(Default)]
struct QueueState {
    lists: HashMap<String, VecDeque<String>>,
    counters: HashMap<String, i64>,
    failures: HashMap<QueueOp, u32>,
    lease_calls: u64,
}

impl QueueState {
    fn check(&mut self, op: QueueOp) -> Result<()> {
        match self.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(Error::Queue(format!("Injected {:?} failure: connection refused", op)))
            }
            _ => Ok(()),
        }
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append entries to the tail of `list`.
    pub fn seed<'a>(&self, list: &str, entries: impl IntoIterator<Item = &'a str>) {
        {
            let mut state = self.inner.state.lock().unwrap();
            let target = state.lists.entry(list.to_string()).or_default();
            target.extend(entries.into_iter().map(str::to_string));
        }
        self.inner.pushed.notify_waiters();
    }

    /// Entries of `list`, head first.
    pub fn snapshot(&self, list: &str) -> Vec<String> {
        let state = self.inner.state.lock().unwrap();
        state
            .lists
            .get(list)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Current value of a counter.
    pub fn counter(&self, key: &str) -> Option<i64> {
        self.inner.state.lock().unwrap().counters.get(key).copied()
    }

    /// Set a counter directly.
    pub fn set_counter(&self, key: &str, value: i64) {
        self.inner
            .state
            .lock()
            .unwrap()
            .counters
            .insert(key.to_string(), value);
    }

    /// Make the next `n` calls of `op` fail as if the backend were unreachable.
    pub fn fail_next(&self, op: QueueOp, n: u32) {
        self.inner.state.lock().unwrap().failures.insert(op, n);
    }

    pub fn fail_next_leases(&self, n: u32) {
        self.fail_next(QueueOp::Lease, n);
    }

    /// Number of lease calls made so far, including failed ones.
    pub fn lease_calls(&self) -> u64 {
        self.inner.state.lock().unwrap().lease_calls
    }

    /// Try to move the head of `ready` to `processing` under the lock.
    fn try_lease(&self, ready: &str, processing: &str) -> Option<String> {
        let mut state = self.inner.state.lock().unwrap();
        let entry = state.lists.get_mut(ready)?.pop_front()?;
        state
            .lists
            .entry(processing.to_string())
            .or_default()
            .push_back(entry.clone());
        Some(entry)
    }
}

fn remove_first(list: &mut VecDeque<String>, entry: &str) -> bool {
    match list.iter().position(|e| e == entry) {
        Some(idx) => {
            list.remove(idx);
            true
        }
        None => false,
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    async fn lease_next(
        &self,
        ready: &str,
        processing: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.lease_calls += 1;
            state.check(QueueOp::Lease)?;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.try_lease(ready, processing) {
                return Ok(Some(entry));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn remove_entry(&self, list: &str, entry: &str) -> Result<bool> {
        let mut state = self.inner.state.lock().unwrap();
        state.check(QueueOp::Remove)?;
        Ok(state
            .lists
            .get_mut(list)
            .map(|l| remove_first(l, entry))
            .unwrap_or(false))
    }

    async fn push_tail(&self, list: &str, entry: &str) -> Result<()> {
        self.inner.state.lock().unwrap().check(QueueOp::Push)?;
        self.seed(list, [entry]);
        Ok(())
    }

    async fn requeue(&self, processing: &str, ready: &str, entry: &str) -> Result<bool> {
        let moved = {
            let mut state = self.inner.state.lock().unwrap();
            state.check(QueueOp::Requeue)?;
            let removed = state
                .lists
                .get_mut(processing)
                .map(|l| remove_first(l, entry))
                .unwrap_or(false);
            if removed {
                state
                    .lists
                    .entry(ready.to_string())
                    .or_default()
                    .push_back(entry.to_string());
            }
            removed
        };
        if moved {
            self.inner.pushed.notify_waiters();
        }
        Ok(moved)
    }

    async fn incr_counter(&self, key: &str) -> Result<i64> {
        let mut state = self.inner.state.lock().unwrap();
        state.check(QueueOp::IncrCounter)?;
        let value = state.counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn delete_counter(&self, key: &str) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        state.check(QueueOp::DeleteCounter)?;
        state.counters.remove(key);
        Ok(())
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.counter(key))
    }

    async fn list_len(&self, list: &str) -> Result<u64> {
        let state = self.inner.state.lock().unwrap();
        Ok(state.lists.get(list).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn list_entries(&self, list: &str) -> Result<Vec<String>> {
        Ok(self.snapshot(list))
    }
}

// =============================================================================
// JOB RECORD STORE
// =============================================================================

/// In-memory job record store that records every status write.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<String, JobRecord>,
    history: Vec<(String, JobStatus)>,
    update_failures: u32,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a QUEUED record with a caller-chosen identifier.
    pub fn insert_with_id(&self, job_id: &str, user_id: &str) {
        let record = JobRecord {
            job_id: job_id.to_string(),
            user_id: user_id.to_string(),
            status: JobStatus::Queued,
            report_path: None,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .unwrap()
            .records
            .insert(job_id.to_string(), record);
    }

    /// Force a record into `status`, bypassing transition checks.
    pub fn force_status(&self, job_id: &str, status: JobStatus) {
        if let Some(record) = self.state.lock().unwrap().records.get_mut(job_id) {
            record.status = status;
        }
    }

    /// Current record for `job_id`.
    pub fn record(&self, job_id: &str) -> Option<JobRecord> {
        self.state.lock().unwrap().records.get(job_id).cloned()
    }

    /// Statuses successfully written for `job_id`, oldest first.
    pub fn history(&self, job_id: &str) -> Vec<JobStatus> {
        self.state
            .lock()
            .unwrap()
            .history
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Make the next `n` status updates fail.
    pub fn fail_next_updates(&self, n: u32) {
        self.state.lock().unwrap().update_failures = n;
    }
}

#[async_trait]
impl JobRecordStore for InMemoryJobStore {
    async fn create_job(&self, user_id: &str) -> Result<String> {
        let job_id = Uuid::now_v7().to_string();
        self.insert_with_id(&job_id, user_id);
        Ok(job_id)
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        report_path: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.update_failures > 0 {
            state.update_failures -= 1;
            return Err(Error::Store(format!(
                "Injected store failure (job_id={})",
                job_id
            )));
        }

        let record = state.records.get_mut(job_id).ok_or_else(|| {
            Error::Store(format!("Job update affected 0 rows (job_id={})", job_id))
        })?;
        validate_transition(job_id, record.status, status)?;

        record.status = status;
        if let Some(path) = report_path {
            record.report_path = Some(path.to_string());
        }
        state.history.push((job_id.to_string(), status));
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.record(job_id))
    }

    async fn list_jobs_for_user(&self, user_id: &str) -> Result<Vec<JobRecord>> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<JobRecord> = state
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        match self.state.lock().unwrap().records.remove(job_id) {
            Some(_) => Ok(()),
            None => Err(Error::Store(format!(
                "Job delete affected 0 rows (job_id={})",
                job_id
            ))),
        }
    }
}

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Kind of storage operation, for call logs and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    Download,
    Upload,
    List,
    Remove,
    SignedUrl,
}

/// One recorded storage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCall {
    pub op: StorageOp,
    pub bucket: String,
    pub path: String,
}

/// In-memory bucket storage with an ordered call log.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    state: Arc<Mutex<StorageState>>,
}

#[derive(Default)]
struct StorageState {
    objects: BTreeMap<(String, String), StoredObject>,
    calls: Vec<StorageCall>,
    failures: HashMap<StorageOp, u32>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

impl StorageState {
    fn record(&mut self, op: StorageOp, bucket: &str, path: &str) -> Result<()> {
        self.calls.push(StorageCall {
            op,
            bucket: bucket.to_string(),
            path: path.to_string(),
        });
        match self.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(Error::Storage(format!("Injected {:?} failure for {}", op, path)))
            }
            _ => Ok(()),
        }
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object without logging a call.
    pub fn put(&self, bucket: &str, path: &str, bytes: impl Into<Vec<u8>>) {
        self.state.lock().unwrap().objects.insert(
            (bucket.to_string(), path.to_string()),
            StoredObject {
                bytes: bytes.into(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    /// Bytes stored at `path`.
    pub fn get(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| o.bytes.clone())
    }

    /// Content type recorded at upload.
    pub fn content_type(&self, bucket: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| o.content_type.clone())
    }

    /// All object paths in `bucket`, sorted.
    pub fn paths(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StorageCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Make the next `n` calls of kind `op` fail.
    pub fn fail_next(&self, op: StorageOp, n: u32) {
        self.state.lock().unwrap().failures.insert(op, n);
    }
}

#[async_trait]
impl ObjectStorage for InMemoryStorage {
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.record(StorageOp::Download, bucket, path)?;
        state
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| o.bytes.clone())
            .ok_or_else(|| Error::Storage(format!("Object not found: {}/{}", bucket, path)))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(StorageOp::Upload, bucket, path)?;
        state.objects.insert(
            (bucket.to_string(), path.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.record(StorageOp::List, bucket, prefix)?;
        let folder = prefix.trim_end_matches('/');
        let probe = join_object_path(folder, "");
        Ok(state
            .objects
            .keys()
            .filter(|(b, p)| {
                b == bucket
                    && p.strip_prefix(probe.as_str())
                        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for path in paths {
            state.record(StorageOp::Remove, bucket, path)?;
            state.objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.record(StorageOp::SignedUrl, bucket, path)?;
        if !state
            .objects
            .contains_key(&(bucket.to_string(), path.to_string()))
        {
            return Err(Error::Storage(format!(
                "Cannot sign missing object: {}/{}",
                bucket, path
            )));
        }
        Ok(format!("memory://{}/{}?ttl={}", bucket, path, ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READY: &str = "task_queue";
    const PROCESSING: &str = "task_queue:PROGRESSED";

    #[tokio::test(start_paused = true)]
    async fn test_lease_is_fifo_and_moves_entry() {
        let queue = InMemoryQueue::new();
        queue.seed(READY, ["a", "b"]);

        let leased = queue
            .lease_next(READY, PROCESSING, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(leased.as_deref(), Some("a"));
        assert_eq!(queue.snapshot(READY), vec!["b"]);
        assert_eq!(queue.snapshot(PROCESSING), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_times_out_when_empty() {
        let queue = InMemoryQueue::new();
        let start = tokio::time::Instant::now();
        let leased = queue
            .lease_next(READY, PROCESSING, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(leased.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_wakes_on_push() {
        let queue = InMemoryQueue::new();
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            producer.push_tail(READY, "late").await.unwrap();
        });

        let leased = queue
            .lease_next(READY, PROCESSING, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(leased.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_injected_lease_failures() {
        let queue = InMemoryQueue::new();
        queue.seed(READY, ["a"]);
        queue.fail_next_leases(1);

        let err = queue
            .lease_next(READY, PROCESSING, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_queue_unavailable());
        assert_eq!(queue.snapshot(READY), vec!["a"]);

        let leased = queue
            .lease_next(READY, PROCESSING, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(leased.as_deref(), Some("a"));
        assert_eq!(queue.lease_calls(), 2);
    }

    #[tokio::test]
    async fn test_injected_requeue_failure_keeps_entry() {
        let queue = InMemoryQueue::new();
        queue.seed(PROCESSING, ["a"]);
        queue.fail_next(QueueOp::Requeue, 1);

        let err = queue.requeue(PROCESSING, READY, "a").await.unwrap_err();
        assert!(err.is_queue_unavailable());
        assert_eq!(queue.snapshot(PROCESSING), vec!["a"]);
        assert!(queue.snapshot(READY).is_empty());

        assert!(queue.requeue(PROCESSING, READY, "a").await.unwrap());
        assert_eq!(queue.snapshot(READY), vec!["a"]);
    }

    #[tokio::test]
    async fn test_injected_counter_failures() {
        let queue = InMemoryQueue::new();
        queue.fail_next(QueueOp::IncrCounter, 1);
        queue.fail_next(QueueOp::DeleteCounter, 1);

        assert!(queue.incr_counter("job_retry:J1").await.is_err());
        assert_eq!(queue.counter("job_retry:J1"), None);
        assert_eq!(queue.incr_counter("job_retry:J1").await.unwrap(), 1);

        assert!(queue.delete_counter("job_retry:J1").await.is_err());
        assert_eq!(queue.counter("job_retry:J1"), Some(1));
    }

    #[tokio::test]
    async fn test_requeue_is_conditional() {
        let queue = InMemoryQueue::new();
        queue.seed(PROCESSING, ["x"]);

        assert!(queue.requeue(PROCESSING, READY, "x").await.unwrap());
        assert!(!queue.requeue(PROCESSING, READY, "x").await.unwrap());
        assert_eq!(queue.snapshot(READY), vec!["x"]);
        assert!(queue.snapshot(PROCESSING).is_empty());
    }

    #[tokio::test]
    async fn test_counters() {
        let queue = InMemoryQueue::new();
        assert_eq!(queue.incr_counter("job_retry:1").await.unwrap(), 1);
        assert_eq!(queue.incr_counter("job_retry:1").await.unwrap(), 2);
        queue.delete_counter("job_retry:1").await.unwrap();
        queue.delete_counter("job_retry:1").await.unwrap();
        assert_eq!(queue.get_counter("job_retry:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_enforces_lifecycle() {
        let store = InMemoryJobStore::new();
        store.insert_with_id("J1", "u1");

        store
            .update_job_status("J1", JobStatus::Progressed, None)
            .await
            .unwrap();
        store
            .update_job_status("J1", JobStatus::Done, Some("u1/J1/report.pdf"))
            .await
            .unwrap();
        let err = store
            .update_job_status("J1", JobStatus::Progressed, None)
            .await
            .unwrap_err();
        assert!(err.is_logic_error());

        assert_eq!(
            store.history("J1"),
            vec![JobStatus::Progressed, JobStatus::Done]
        );
        assert_eq!(
            store.record("J1").unwrap().report_path.as_deref(),
            Some("u1/J1/report.pdf")
        );
    }

    #[tokio::test]
    async fn test_store_missing_job() {
        let store = InMemoryJobStore::new();
        let err = store
            .update_job_status("nope", JobStatus::Progressed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_storage_list_is_direct_children_only() {
        let storage = InMemoryStorage::new();
        storage.put("b", "u1/J1/input/a.png", b"a".to_vec());
        storage.put("b", "u1/J1/input/b.png", b"b".to_vec());
        storage.put("b", "u1/J1/input/deep/c.png", b"c".to_vec());
        storage.put("b", "u1/J1/inputs.json", b"{}".to_vec());

        let listed = storage.list("b", "u1/J1/input/").await.unwrap();
        assert_eq!(listed, vec!["u1/J1/input/a.png", "u1/J1/input/b.png"]);

        let removed = storage.list_and_delete("b", "u1/J1/input").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            storage.paths("b"),
            vec!["u1/J1/input/deep/c.png", "u1/J1/inputs.json"]
        );
    }

    #[tokio::test]
    async fn test_storage_fault_injection_and_call_log() {
        let storage = InMemoryStorage::new();
        storage.fail_next(StorageOp::Upload, 1);

        assert!(storage
            .upload("b", "r.pdf", b"x".to_vec(), "application/pdf")
            .await
            .is_err());
        storage
            .upload("b", "r.pdf", b"x".to_vec(), "application/pdf")
            .await
            .unwrap();
        let url = storage
            .signed_url("b", "r.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(url, "memory://b/r.pdf?ttl=60");

        let ops: Vec<StorageOp> = storage.calls().iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![StorageOp::Upload, StorageOp::Upload, StorageOp::SignedUrl]
        );
        assert_eq!(
            storage.content_type("b", "r.pdf").as_deref(),
            Some("application/pdf")
        );
    }
}
