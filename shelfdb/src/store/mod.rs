mod collection;
mod options;

pub use collection::Collection;
pub use options::{DeleteOptions, FieldTarget, FindOptions, PutResult};

use crate::config::{StoreConfig, WriteMode};
use crate::document::{CollectionSchema, Document};
use crate::engine::Engine;
use crate::error::{Result, ShelfError};
use crate::table::{self, WriteOp};
use crate::watch::Dispatcher;
use crate::writer::WriteQueue;
use parking_lot::RwLock;
use rusqlite::Connection;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// An open document store. Cheap to clone; every clone shares the same
/// connection, writer and watchers. The store shuts down when the last
/// clone (and every `Collection` handed out) is dropped, or on `close`.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    engine: Arc<Engine>,
    dispatcher: Arc<Dispatcher>,
    writer: WriteQueue,
    /// Explicit registrations, by collection name.
    schemas: HashMap<String, CollectionSchema>,
    /// Collections whose table exists.
    collections: RwLock<HashMap<String, Arc<CollectionSchema>>>,
}

/// Config plus explicit collection registrations.
pub struct StoreBuilder {
    config: StoreConfig,
    schemas: Vec<CollectionSchema>,
}

impl StoreBuilder {
    pub fn new(config: StoreConfig) -> Self {
        StoreBuilder {
            config,
            schemas: Vec::new(),
        }
    }

    pub fn write_mode(mut self, mode: WriteMode) -> Self {
        self.config.write_mode = mode;
        self
    }

    pub fn watchers(mut self, enabled: bool) -> Self {
        self.config.watchers = enabled;
        self
    }

    /// Bind `T` to the collection `name`.
    pub fn register<T: Document>(self, name: &str) -> Self {
        self.collection(CollectionSchema::typed::<T>(name))
    }

    pub fn collection(mut self, schema: CollectionSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn open(self) -> Result<Store> {
        let mut schemas: HashMap<String, CollectionSchema> = HashMap::new();
        let mut bound: HashMap<TypeId, String> = HashMap::new();
        for schema in self.schemas {
            if let Some(binding) = schema.binding {
                if let Some(other) = bound.insert(binding.type_id, schema.name.clone()) {
                    return Err(ShelfError::Config(format!(
                        "type '{}' is registered for both '{other}' and '{}'",
                        binding.type_name, schema.name
                    )));
                }
            }
            if schemas.contains_key(&schema.name) {
                return Err(ShelfError::Config(format!(
                    "collection '{}' is registered twice",
                    schema.name
                )));
            }
            schemas.insert(schema.name.clone(), schema);
        }

        let config = self.config;
        let engine = Arc::new(Engine::open(&config.storage)?);
        let dispatcher = Arc::new(match config.write_mode {
            WriteMode::Sync => Dispatcher::inline(config.watchers),
            WriteMode::Queued => Dispatcher::pooled(config.watchers, config.watch_workers)?,
        });
        let writer = WriteQueue::start(config.write_mode, engine.clone(), dispatcher.clone())?;

        log::info!(
            "store opened ({:?}, {:?} writes, {} registered collection(s))",
            config.storage,
            config.write_mode,
            schemas.len()
        );

        Ok(Store {
            inner: Arc::new(StoreInner {
                config,
                engine,
                dispatcher,
                writer,
                schemas,
                collections: RwLock::new(HashMap::new()),
            }),
        })
    }
}

impl Store {
    pub fn open(config: StoreConfig) -> Result<Self> {
        StoreBuilder::new(config).open()
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(StoreConfig::in_memory())
    }

    pub fn builder(config: StoreConfig) -> StoreBuilder {
        StoreBuilder::new(config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Handle to the named collection, creating its table on first use.
    /// Unregistered names become untyped collections keyed by `_id`.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        if let Some(schema) = self.inner.collections.read().get(name) {
            return Ok(Collection::new(self.clone(), schema.clone()));
        }

        let schema = self
            .inner
            .schemas
            .get(name)
            .cloned()
            .unwrap_or_else(|| CollectionSchema::untyped(name));
        schema.validate()?;

        self.inner.writer.submit(
            name,
            WriteOp::CreateCollection {
                id_field: schema.id_field.clone(),
            },
        )?;
        log::debug!("collection '{name}' ready");

        let schema = self
            .inner
            .collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(schema))
            .clone();
        Ok(Collection::new(self.clone(), schema))
    }

    /// The collection `T` was registered for.
    pub fn collection_for<T: Document>(&self) -> Result<Collection> {
        let type_id = TypeId::of::<T>();
        let name = self
            .inner
            .schemas
            .values()
            .find(|s| s.binding.map(|b| b.type_id) == Some(type_id))
            .map(|s| s.name.clone())
            .ok_or_else(|| ShelfError::UnknownType(std::any::type_name::<T>().to_string()))?;
        self.collection(&name)
    }

    /// Collections that currently hold at least one document.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.inner.engine.read(table::collection_names)
    }

    /// Run `f` against the underlying connection, outside the write queue.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        self.inner.engine.read(f)
    }

    /// Drain pending writes and watch deliveries, then release the
    /// connection. Later calls on any handle fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        self.inner.shutdown()
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub(crate) fn writer(&self) -> &WriteQueue {
        &self.inner.writer
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

impl StoreInner {
    fn shutdown(&self) -> Result<()> {
        self.writer.shutdown();
        self.dispatcher.shutdown();
        self.engine.close()
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("error closing store: {e}");
        }
    }
}
