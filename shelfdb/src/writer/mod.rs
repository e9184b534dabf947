use crate::config::WriteMode;
use crate::engine::Engine;
use crate::error::{Result, ShelfError};
use crate::table::{self, WriteOp, WriteOutcome};
use crate::watch::Dispatcher;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

/// One queued write: the collection, the operation and where to reply.
struct Task {
    collection: String,
    op: WriteOp,
    reply: mpsc::SyncSender<Result<WriteOutcome>>,
}

enum Message {
    Task(Task),
    /// Everything sent before this marker is executed first.
    Shutdown,
}

/// Serializes every mutating operation of a store.
///
/// In queued mode a single `shelfdb-writer` thread executes tasks in
/// submission order and the caller blocks on its own reply. In sync mode
/// the operation runs on the caller's thread under the engine lock.
pub(crate) struct WriteQueue {
    mode: WriteMode,
    engine: Arc<Engine>,
    dispatcher: Arc<Dispatcher>,
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WriteQueue {
    pub fn start(mode: WriteMode, engine: Arc<Engine>, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let queue = WriteQueue {
            mode,
            engine,
            dispatcher,
            sender: Mutex::new(None),
            thread: Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        if mode == WriteMode::Queued {
            let (tx, rx) = mpsc::channel::<Message>();
            let engine = queue.engine.clone();
            let dispatcher = queue.dispatcher.clone();
            let thread = std::thread::Builder::new()
                .name("shelfdb-writer".into())
                .spawn(move || {
                    for message in rx {
                        match message {
                            Message::Task(task) => {
                                let result = execute(&engine, &dispatcher, &task.collection, &task.op);
                                // the caller may have gone away; nothing to do then
                                let _ = task.reply.send(result);
                            }
                            Message::Shutdown => break,
                        }
                    }
                    log::debug!("writer thread exiting");
                })?;
            *queue.sender.lock() = Some(tx);
            *queue.thread.lock() = Some(thread);
        }
        Ok(queue)
    }

    /// Run `op` against `collection` and wait for its outcome.
    pub fn submit(&self, collection: &str, op: WriteOp) -> Result<WriteOutcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ShelfError::Closed);
        }

        if self.mode == WriteMode::Sync {
            return execute(&self.engine, &self.dispatcher, collection, &op);
        }
        // taken by a shutdown that raced the check above
        let sender = self.sender.lock().clone().ok_or(ShelfError::Closed)?;

        let (reply, rx) = mpsc::sync_channel(1);
        let task = Task {
            collection: collection.to_string(),
            op,
            reply,
        };
        sender.send(Message::Task(task)).map_err(|_| ShelfError::Closed)?;
        // a task that lands behind the shutdown marker is dropped unanswered
        rx.recv().map_err(|_| ShelfError::Closed)?
    }

    /// Drain queued tasks, then stop the writer thread. Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Message::Shutdown);
        }
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                log::error!("writer thread exited with a panic");
            }
        }
    }
}

fn execute(engine: &Engine, dispatcher: &Dispatcher, collection: &str, op: &WriteOp) -> Result<WriteOutcome> {
    let outcome = engine.write(|conn| table::apply(conn, collection, op))?;
    log::debug!(
        "{} on '{collection}': {} document(s) affected",
        op.kind(),
        outcome.affected
    );
    if let Some(event) = outcome.event {
        dispatcher.notify(collection, event, &outcome.documents);
    }
    Ok(outcome)
}
