//! TTL expiry for registered documents.
//!
//! One background task owns the expiry queue and a single timer armed for
//! the soonest deadline:
//!
//! ```text
//! register ──track()──▶ ┌──────────────┐   timer fires   ┌──────────────┐
//! remove ───untrack()─▶ │ ExpiryWorker │ ──────────────▶ │ delete due   │
//!                       │ min-heap     │ ◀── re-arm ──── │ documents    │
//!                       └──────────────┘                 └──────────────┘
//! ```
//!
//! Other components never touch the queue; they send commands over a
//! channel. A new entry that expires before the armed deadline re-arms the
//! timer, so it is never starved behind a later one.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tdrepo_store::DocumentStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};

/// Longest single timer; farther deadlines are reached by re-arming
const MAX_TIMER_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A document identifier paired with the time it expires
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpiryEntry {
    pub expires_at: DateTime<Utc>,
    pub uri: String,
}

impl ExpiryEntry {
    pub fn new(uri: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at,
            uri: uri.into(),
        }
    }
}

/// Snapshot of the scheduler, published after every step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryStatus {
    /// Deadline the timer is armed for; `None` while idle
    pub armed: Option<DateTime<Utc>>,
    /// Documents waiting to expire
    pub pending: usize,
    /// Documents removed by sweeps so far
    pub swept: u64,
}

enum Command {
    Track(ExpiryEntry),
    Untrack(String),
    Shutdown,
}

/// Handle to the expiry task
pub struct ExpiryScheduler {
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ExpiryStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiryScheduler {
    /// Spawn the expiry task on the current tokio runtime
    pub fn start(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ExpiryStatus::default());

        let worker = ExpiryWorker {
            store,
            clock,
            queue: BinaryHeap::new(),
            live: HashMap::new(),
            armed: None,
            swept: 0,
            status: status_tx,
        };
        let task = tokio::spawn(worker.run(rx));
        info!("Expiry scheduler started");

        Self {
            tx,
            status,
            task: Mutex::new(Some(task)),
        }
    }

    /// Schedule `uri` for removal at `expires_at`, replacing any earlier entry
    pub fn track(&self, uri: impl Into<String>, expires_at: DateTime<Utc>) -> Result<()> {
        self.send(Command::Track(ExpiryEntry::new(uri, expires_at)))
    }

    /// Forget `uri`; it will not be swept
    pub fn untrack(&self, uri: impl Into<String>) -> Result<()> {
        self.send(Command::Untrack(uri.into()))
    }

    /// Current status snapshot
    pub fn status(&self) -> ExpiryStatus {
        self.status.borrow().clone()
    }

    /// Deadline the timer is currently armed for
    pub fn armed_deadline(&self) -> Option<DateTime<Utc>> {
        self.status.borrow().armed
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<ExpiryStatus> {
        self.status.clone()
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Expiry task ended abnormally: {}", e);
            }
        }
        info!("Expiry scheduler stopped");
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::Internal("Expiry scheduler is not running".to_string()))
    }
}

/// Owns the queue; runs as a single task so sweeps never overlap
struct ExpiryWorker {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    queue: BinaryHeap<Reverse<ExpiryEntry>>,
    /// Current deadline per tracked URI; queue entries that disagree are stale
    live: HashMap<String, DateTime<Utc>>,
    armed: Option<DateTime<Utc>>,
    swept: u64,
    status: watch::Sender<ExpiryStatus>,
}

impl ExpiryWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Track(entry)) => self.track(entry, timer.as_mut()),
                    Some(Command::Untrack(uri)) => {
                        if self.live.remove(&uri).is_some() {
                            debug!("No longer tracking expiry of {}", uri);
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                () = &mut timer, if self.armed.is_some() => {
                    self.sweep().await;
                    self.rearm(timer.as_mut());
                }
            }
            self.publish();
        }
    }

    fn track(&mut self, entry: ExpiryEntry, timer: Pin<&mut Sleep>) {
        debug!("Tracking expiry of {} at {}", entry.uri, entry.expires_at);
        self.live.insert(entry.uri.clone(), entry.expires_at);

        let earlier = self.armed.map_or(true, |armed| entry.expires_at < armed);
        let deadline = entry.expires_at;
        self.queue.push(Reverse(entry));

        if earlier {
            self.arm(deadline, timer);
        }
    }

    /// Remove every document whose deadline has passed
    async fn sweep(&mut self) {
        let now = self.clock.now();
        let mut due = Vec::new();

        while self
            .queue
            .peek()
            .is_some_and(|Reverse(head)| head.expires_at <= now)
        {
            let Some(Reverse(entry)) = self.queue.pop() else {
                break;
            };
            if self.live.get(&entry.uri) == Some(&entry.expires_at) {
                self.live.remove(&entry.uri);
                due.push(entry.uri);
            }
        }

        if due.is_empty() {
            return;
        }

        debug!("Sweeping {} expired documents", due.len());
        let store = Arc::clone(&self.store);
        let outcome = tokio::task::spawn_blocking(move || {
            due.into_iter()
                .map(|uri| {
                    let result = store.delete_document(&uri);
                    (uri, result)
                })
                .collect::<Vec<_>>()
        })
        .await;

        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                error!("Expiry sweep task failed: {}", e);
                return;
            }
        };

        for (uri, result) in results {
            self.swept += 1;
            match result {
                Ok(true) => info!("Removed expired Thing Description {}", uri),
                Ok(false) => debug!("Expired Thing Description {} was already gone", uri),
                Err(e) => warn!("Failed to remove expired Thing Description {}: {}", uri, e),
            }
        }
    }

    /// Arm for the soonest live entry, or go idle
    fn rearm(&mut self, timer: Pin<&mut Sleep>) {
        while let Some(Reverse(head)) = self.queue.peek() {
            if self.live.get(&head.uri) == Some(&head.expires_at) {
                let deadline = head.expires_at;
                self.arm(deadline, timer);
                return;
            }
            self.queue.pop();
        }
        self.armed = None;
    }

    fn arm(&mut self, deadline: DateTime<Utc>, timer: Pin<&mut Sleep>) {
        let delay = (deadline - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_TIMER_DELAY);
        timer.reset(Instant::now() + delay);
        self.armed = Some(deadline);
    }

    fn publish(&self) {
        self.status.send_replace(ExpiryStatus {
            armed: self.armed,
            pending: self.live.len(),
            swept: self.swept,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use tdrepo_store::{SqliteStore, ThingMetadata};

    fn store_with(uris: &[&str]) -> Arc<SqliteStore> {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        for uri in uris {
            let mut tx = store.begin_write().unwrap();
            tx.put_document(uri, "{}").unwrap();
            tx.put_metadata(
                uri,
                &ThingMetadata {
                    endpoint: "http://example.org/".to_string(),
                    created_at: now,
                    modified_at: now,
                    expires_at: now,
                },
            )
            .unwrap();
            tx.commit().unwrap();
        }
        Arc::new(store)
    }

    async fn wait_until(
        scheduler: &ExpiryScheduler,
        pred: impl FnMut(&ExpiryStatus) -> bool,
    ) -> ExpiryStatus {
        let mut rx = scheduler.subscribe();
        let status = tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(pred))
            .await
            .expect("timed out waiting for expiry status")
            .expect("expiry task stopped");
        status.clone()
    }

    #[test]
    fn test_entries_order_by_deadline() {
        let now = Utc::now();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(ExpiryEntry::new("late", now + chrono::Duration::seconds(50))));
        heap.push(Reverse(ExpiryEntry::new("soon", now + chrono::Duration::seconds(5))));
        heap.push(Reverse(ExpiryEntry::new("mid", now + chrono::Duration::seconds(20))));

        let order: Vec<_> = std::iter::from_fn(|| heap.pop().map(|Reverse(e)| e.uri)).collect();
        assert_eq!(order, vec!["soon", "mid", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_entry_rearms_timer() {
        let store = store_with(&["http://h/td/late", "http://h/td/early"]);
        let clock = Arc::new(TokioClock::default());
        let t0 = clock.now();
        let scheduler = ExpiryScheduler::start(store.clone(), clock.clone());

        let late = t0 + chrono::Duration::seconds(100);
        let early = t0 + chrono::Duration::seconds(10);

        scheduler.track("http://h/td/late", late).unwrap();
        wait_until(&scheduler, |s| s.armed == Some(late)).await;

        scheduler.track("http://h/td/early", early).unwrap();
        let status = wait_until(&scheduler, |s| s.armed == Some(early)).await;
        assert_eq!(status.pending, 2);

        // Fires at the earlier deadline, then re-arms for the later one
        let status = wait_until(&scheduler, |s| s.swept == 1).await;
        assert_eq!(status.armed, Some(late));
        assert!(clock.now() >= early);
        assert!(clock.now() < late);
        assert!(!store.contains("http://h/td/early").unwrap());
        assert!(store.contains("http://h/td/late").unwrap());

        let status = wait_until(&scheduler, |s| s.swept == 2).await;
        assert_eq!(status.armed, None);
        assert_eq!(status.pending, 0);
        assert_eq!(store.count().unwrap(), 0);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_entry_keeps_armed_deadline() {
        let store = store_with(&[]);
        let clock = Arc::new(TokioClock::default());
        let t0 = clock.now();
        let scheduler = ExpiryScheduler::start(store, clock);

        let first = t0 + chrono::Duration::seconds(10);
        scheduler.track("http://h/td/a", first).unwrap();
        scheduler
            .track("http://h/td/b", t0 + chrono::Duration::seconds(60))
            .unwrap();

        let status = wait_until(&scheduler, |s| s.pending == 2).await;
        assert_eq!(status.armed, Some(first));

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_deleted_counts_as_swept() {
        let store = store_with(&[]);
        let clock = Arc::new(TokioClock::default());
        let scheduler = ExpiryScheduler::start(store, clock.clone());

        scheduler
            .track("http://h/td/ghost", clock.now() + chrono::Duration::seconds(1))
            .unwrap();
        let status = wait_until(&scheduler, |s| s.swept == 1).await;
        assert_eq!(status.armed, None);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_untracked_entry_is_not_swept() {
        let store = store_with(&["http://h/td/keep", "http://h/td/go"]);
        let clock = Arc::new(TokioClock::default());
        let t0 = clock.now();
        let scheduler = ExpiryScheduler::start(store.clone(), clock);

        scheduler
            .track("http://h/td/keep", t0 + chrono::Duration::seconds(5))
            .unwrap();
        scheduler
            .track("http://h/td/go", t0 + chrono::Duration::seconds(8))
            .unwrap();
        scheduler.untrack("http://h/td/keep").unwrap();

        wait_until(&scheduler, |s| s.swept == 1).await;
        assert!(store.contains("http://h/td/keep").unwrap());
        assert!(!store.contains("http://h/td/go").unwrap());

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrack_replaces_deadline() {
        let store = store_with(&["http://h/td/a"]);
        let clock = Arc::new(TokioClock::default());
        let t0 = clock.now();
        let scheduler = ExpiryScheduler::start(store.clone(), clock.clone());

        scheduler
            .track("http://h/td/a", t0 + chrono::Duration::seconds(5))
            .unwrap();
        let extended = t0 + chrono::Duration::seconds(50);
        scheduler.track("http://h/td/a", extended).unwrap();

        let status = wait_until(&scheduler, |s| s.swept == 1).await;
        assert_eq!(status.pending, 0);
        assert!(clock.now() >= extended);
        assert!(!store.contains("http://h/td/a").unwrap());

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_track_after_shutdown_fails() {
        let scheduler = ExpiryScheduler::start(store_with(&[]), Arc::new(TokioClock::default()));
        scheduler.shutdown().await;
        assert!(matches!(
            scheduler.track("http://h/td/x", Utc::now()),
            Err(Error::Internal(_))
        ));
    }
}
