//! Embeddable JSON document store on a single SQLite file.
//!
//! ```ignore
//! let store = Store::builder(StoreConfig::file("db/data.db"))
//!     .register::<Cat>("cats")
//!     .open()?;
//! let cats = store.collection_for::<Cat>()?;
//! cats.save(&mut tyson)?;
//! let seniors: Vec<Cat> = cats.find("age>=10&&(race=Main Coon||race=Siamese)")?;
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod query;
pub mod store;
pub mod watch;

mod engine;
mod table;
mod writer;

pub use config::{Storage, StoreConfig, WriteMode};
pub use document::{CollectionSchema, Document, IdStrategy};
pub use error::{Result, ShelfError};
pub use query::{Filter, FilterExpr, SortDirection, SortSpec};
pub use store::{Collection, DeleteOptions, FieldTarget, FindOptions, PutResult, Store, StoreBuilder};
pub use watch::{EventKind, WatchData, WatchId};
