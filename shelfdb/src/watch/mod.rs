use crate::error::{Result, ShelfError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

/// The kind of change a write made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "insert",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(EventKind::Insert),
            "update" => Ok(EventKind::Update),
            "delete" => Ok(EventKind::Delete),
            other => Err(ShelfError::Config(format!("unknown event kind '{other}'"))),
        }
    }
}

/// What a watch handler receives. `documents` are post-images for inserts
/// and updates, pre-images for deletes.
#[derive(Debug, Clone, Serialize)]
pub struct WatchData {
    pub collection: String,
    pub event: EventKind,
    pub documents: Vec<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl WatchData {
    /// Deserialize the affected documents into a typed collection's type.
    pub fn documents_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.documents
            .iter()
            .map(|doc| Ok(serde_json::from_value(doc.clone())?))
            .collect()
    }
}

pub type WatchHandler = Arc<dyn Fn(&WatchData) + Send + Sync + 'static>;

/// Handle returned by `watch`, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

#[derive(Clone)]
struct Subscription {
    id: WatchId,
    handler: WatchHandler,
}

#[derive(Default)]
struct Registry {
    wildcard: HashMap<String, Vec<Subscription>>,
    scoped: HashMap<(String, EventKind), Vec<Subscription>>,
}

impl Registry {
    fn matching(&self, collection: &str, event: EventKind) -> Vec<WatchHandler> {
        let wildcard = self.wildcard.get(collection).into_iter().flatten();
        let scoped = self
            .scoped
            .get(&(collection.to_string(), event))
            .into_iter()
            .flatten();
        wildcard.chain(scoped).map(|s| s.handler.clone()).collect()
    }

    fn remove(&mut self, id: WatchId) -> bool {
        let mut removed = false;
        for subs in self.wildcard.values_mut().chain(self.scoped.values_mut()) {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            removed |= subs.len() != before;
        }
        self.wildcard.retain(|_, subs| !subs.is_empty());
        self.scoped.retain(|_, subs| !subs.is_empty());
        removed
    }
}

struct Delivery {
    data: WatchData,
    handlers: Vec<WatchHandler>,
}

/// Fixed set of delivery threads, one channel each.
struct Pool {
    senders: Vec<mpsc::Sender<Delivery>>,
    threads: Vec<JoinHandle<()>>,
}

impl Pool {
    fn start(size: usize) -> Result<Self> {
        let mut senders = Vec::with_capacity(size);
        let mut threads = Vec::with_capacity(size);
        for i in 0..size {
            let (tx, rx) = mpsc::channel::<Delivery>();
            let thread = std::thread::Builder::new()
                .name(format!("shelfdb-watch-{i}"))
                .spawn(move || {
                    for delivery in rx {
                        deliver(&delivery.data, &delivery.handlers);
                    }
                })?;
            senders.push(tx);
            threads.push(thread);
        }
        Ok(Pool { senders, threads })
    }

    /// Events of one collection always land on the same worker.
    fn worker_for(&self, collection: &str) -> &mpsc::Sender<Delivery> {
        let mut hasher = DefaultHasher::new();
        collection.hash(&mut hasher);
        let index = (hasher.finish() % self.senders.len() as u64) as usize;
        &self.senders[index]
    }

    fn join(self) {
        drop(self.senders);
        let current = std::thread::current().id();
        for thread in self.threads {
            // a handler that drops the last store handle runs on a worker
            if thread.thread().id() == current {
                continue;
            }
            if thread.join().is_err() {
                log::error!("watch worker exited with a panic");
            }
        }
    }
}

/// Routes change notifications to registered handlers.
///
/// Documents are only parsed when at least one handler matches the
/// collection and event.
pub(crate) struct Dispatcher {
    enabled: bool,
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    /// `None` delivers inline on the notifying thread.
    pool: Mutex<Option<Pool>>,
    hydrations: AtomicUsize,
}

impl Dispatcher {
    /// Inline delivery, used in sync write mode.
    pub fn inline(enabled: bool) -> Self {
        Dispatcher {
            enabled,
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            pool: Mutex::new(None),
            hydrations: AtomicUsize::new(0),
        }
    }

    /// Delivery on `workers` background threads.
    pub fn pooled(enabled: bool, workers: usize) -> Result<Self> {
        let dispatcher = Self::inline(enabled);
        if enabled {
            *dispatcher.pool.lock() = Some(Pool::start(workers.max(1))?);
        }
        Ok(dispatcher)
    }

    pub fn watch(&self, collection: &str, event: Option<EventKind>, handler: WatchHandler) -> Result<WatchId> {
        if !self.enabled {
            return Err(ShelfError::WatchersDisabled);
        }
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription { id, handler };

        let mut registry = self.registry.write();
        match event {
            None => registry
                .wildcard
                .entry(collection.to_string())
                .or_default()
                .push(subscription),
            Some(kind) => registry
                .scoped
                .entry((collection.to_string(), kind))
                .or_default()
                .push(subscription),
        }
        log::debug!("watch {id:?} registered on '{collection}'");
        Ok(id)
    }

    /// Remove a registration. Returns false when the id is unknown.
    pub fn unwatch(&self, id: WatchId) -> bool {
        self.registry.write().remove(id)
    }

    /// Called after a successful write with the stored JSON text it affected.
    pub fn notify(&self, collection: &str, event: EventKind, documents: &[String]) {
        if !self.enabled || documents.is_empty() {
            return;
        }
        let handlers = self.registry.read().matching(collection, event);
        if handlers.is_empty() {
            return;
        }

        self.hydrations.fetch_add(1, Ordering::Relaxed);
        let mut hydrated = Vec::with_capacity(documents.len());
        for text in documents {
            match serde_json::from_str(text) {
                Ok(value) => hydrated.push(value),
                Err(e) => log::warn!("Skipping unreadable document in '{collection}' {event} event: {e}"),
            }
        }
        let data = WatchData {
            collection: collection.to_string(),
            event,
            documents: hydrated,
            occurred_at: Utc::now(),
        };

        let pool = self.pool.lock();
        match pool.as_ref() {
            Some(pool) => {
                if pool.worker_for(collection).send(Delivery { data, handlers }).is_err() {
                    log::warn!("watch worker for '{collection}' is gone; event dropped");
                }
            }
            None => {
                drop(pool);
                deliver(&data, &handlers);
            }
        }
    }

    /// How many events have been hydrated so far.
    pub fn hydrations(&self) -> usize {
        self.hydrations.load(Ordering::Relaxed)
    }

    /// Stop accepting deliveries and wait for queued ones to finish.
    pub fn shutdown(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.join();
            log::debug!("watch pool stopped");
        }
    }
}

fn deliver(data: &WatchData, handlers: &[WatchHandler]) {
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
            log::error!(
                "watch handler panicked on {} event in '{}'",
                data.event,
                data.collection
            );
        }
    }
}
