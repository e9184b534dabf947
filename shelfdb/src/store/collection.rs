use super::options::{DeleteOptions, FieldTarget, FindOptions, PutResult};
use super::Store;
use crate::document::{resolve_json_identity, resolve_typed_identity, CollectionSchema, Document};
use crate::error::{Result, ShelfError};
use crate::query::compile::compile;
use crate::query::{CompiledFilter, FilterInput, JsonPath};
use crate::table::{self, Selection, WriteOp};
use crate::watch::{EventKind, WatchData, WatchId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::TypeId;
use std::sync::Arc;

/// Handle to one collection of a [`Store`].
#[derive(Clone)]
pub struct Collection {
    store: Store,
    schema: Arc<CollectionSchema>,
}

impl Collection {
    pub(super) fn new(store: Store, schema: Arc<CollectionSchema>) -> Self {
        Collection { store, schema }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    fn submit(&self, op: WriteOp) -> Result<table::WriteOutcome> {
        self.store.writer().submit(&self.schema.name, op)
    }

    // ── Key/value ────────────────────────────────────────────────

    /// Raw lookup by storage key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_raw(key)?
            .map(|json| Ok(serde_json::from_str(&json)?))
            .transpose()
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        require("key", key)?;
        self.store.engine().read(|conn| table::get(conn, &self.schema.name, key))
    }

    /// Store `value` under `key`, replacing whatever was there.
    pub fn put<V: Serialize>(&self, key: &str, value: &V) -> Result<PutResult> {
        self.put_op(key, value, false)
    }

    /// Store `value` only when `key` is not taken yet.
    pub fn put_if_absent<V: Serialize>(&self, key: &str, value: &V) -> Result<PutResult> {
        self.put_op(key, value, true)
    }

    fn put_op<V: Serialize>(&self, key: &str, value: &V, if_absent: bool) -> Result<PutResult> {
        require("key", key)?;
        let json = serde_json::to_string(value)?;
        let outcome = self.submit(WriteOp::Put {
            key: key.to_string(),
            json,
            if_absent,
        })?;
        match outcome.documents.first() {
            Some(stored) if outcome.affected > 0 => Ok(PutResult::Stored(serde_json::from_str(stored)?)),
            _ => Ok(PutResult::AlreadyExists),
        }
    }

    /// Delete by storage key. Returns whether a row was removed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        require("key", key)?;
        let selection = Selection::filtered(Some(CompiledFilter::by_key(key)));
        Ok(self.submit(WriteOp::Delete(selection))?.affected > 0)
    }

    // ── Saving documents ─────────────────────────────────────────

    /// Insert or replace a typed document. An identity is generated and
    /// written back into `doc` when it has none. Returns the identity.
    pub fn save<T: Document>(&self, doc: &mut T) -> Result<String> {
        let (id, json) = self.prepare_typed(doc)?;
        self.submit(WriteOp::Save { key: id.clone(), json })?;
        Ok(id)
    }

    /// Insert or replace an untyped JSON object.
    pub fn save_value(&self, doc: &mut serde_json::Value) -> Result<String> {
        let (id, json) = self.prepare_value(doc)?;
        self.submit(WriteOp::Save { key: id.clone(), json })?;
        Ok(id)
    }

    pub fn save_json(&self, json: &str) -> Result<String> {
        let mut doc: serde_json::Value = serde_json::from_str(json)?;
        self.save_value(&mut doc)
    }

    /// Save several typed documents in one transaction.
    pub fn save_many<T: Document>(&self, docs: &mut [T]) -> Result<Vec<String>> {
        let prepared = docs
            .iter_mut()
            .map(|doc| self.prepare_typed(doc))
            .collect::<Result<Vec<_>>>()?;
        self.save_prepared(prepared)
    }

    pub fn save_many_values(&self, docs: &mut [serde_json::Value]) -> Result<Vec<String>> {
        let prepared = docs
            .iter_mut()
            .map(|doc| self.prepare_value(doc))
            .collect::<Result<Vec<_>>>()?;
        self.save_prepared(prepared)
    }

    fn save_prepared(&self, docs: Vec<(String, String)>) -> Result<Vec<String>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let ids = docs.iter().map(|(id, _)| id.clone()).collect();
        self.submit(WriteOp::SaveMany { docs })?;
        Ok(ids)
    }

    fn prepare_typed<T: Document>(&self, doc: &mut T) -> Result<(String, String)> {
        self.check_binding::<T>()?;
        let id = resolve_typed_identity(doc, &self.schema);
        let value = serde_json::to_value(&*doc)?;
        match value.get(&self.schema.id_field) {
            Some(serde_json::Value::String(stored)) if *stored == id => {}
            _ => return Err(ShelfError::IdentityFieldMissing(self.schema.name.clone())),
        }
        Ok((id, serde_json::to_string(&value)?))
    }

    fn prepare_value(&self, doc: &mut serde_json::Value) -> Result<(String, String)> {
        let id = resolve_json_identity(doc, &self.schema)?;
        Ok((id, serde_json::to_string(doc)?))
    }

    fn check_binding<T: Document>(&self) -> Result<()> {
        match self.schema.binding {
            Some(binding) if binding.type_id == TypeId::of::<T>() => Ok(()),
            binding => Err(ShelfError::TypeMismatch {
                collection: self.schema.name.clone(),
                expected: binding
                    .map(|b| b.type_name.to_string())
                    .unwrap_or_else(|| "untyped JSON documents".into()),
                found: std::any::type_name::<T>().to_string(),
            }),
        }
    }

    // ── Reading documents ────────────────────────────────────────

    /// Documents matching `options` (a filter string, a `FilterExpr` or a
    /// full `FindOptions`), deserialized into `T`.
    pub fn find<T: DeserializeOwned>(&self, options: impl Into<FindOptions>) -> Result<Vec<T>> {
        self.find_as_json(options)?
            .iter()
            .map(|json| Ok(serde_json::from_str(json)?))
            .collect()
    }

    /// Like `find` but returns the stored JSON text untouched.
    pub fn find_as_json(&self, options: impl Into<FindOptions>) -> Result<Vec<String>> {
        let options: FindOptions = options.into();
        let selection = options.into_selection()?;
        self.store
            .engine()
            .read(|conn| table::select_values(conn, &self.schema.name, &selection))
    }

    pub fn find_one<T: DeserializeOwned>(&self, options: impl Into<FindOptions>) -> Result<Option<T>> {
        let options: FindOptions = options.into();
        Ok(self.find(options.limit(1))?.into_iter().next())
    }

    pub fn find_by_id<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        require("id", id)?;
        self.get(id)
    }

    pub fn find_by_id_as_json(&self, id: &str) -> Result<Option<String>> {
        require("id", id)?;
        self.get_raw(id)
    }

    pub fn count(&self) -> Result<usize> {
        self.store.engine().read(|conn| table::count(conn, &self.schema.name, None))
    }

    pub fn count_where(&self, filter: impl Into<FilterInput>) -> Result<usize> {
        let filter: FilterInput = filter.into();
        let compiled = compile(&filter.into_expr()?)?;
        self.store
            .engine()
            .read(|conn| table::count(conn, &self.schema.name, Some(&compiled)))
    }

    // ── Deleting documents ───────────────────────────────────────

    /// Delete matching documents. Returns how many were removed.
    pub fn delete(&self, options: impl Into<DeleteOptions>) -> Result<usize> {
        let options: DeleteOptions = options.into();
        let selection = options.into_selection()?;
        Ok(self.submit(WriteOp::Delete(selection))?.affected)
    }

    /// Delete the first match in storage order.
    pub fn delete_one(&self, filter: impl Into<FilterInput>) -> Result<bool> {
        Ok(self.delete(DeleteOptions::new().filter(filter).limit(1))? > 0)
    }

    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        require("id", id)?;
        self.remove(id)
    }

    pub fn delete_doc<T: Document>(&self, doc: &T) -> Result<bool> {
        self.check_binding::<T>()?;
        match doc.id() {
            Some(id) if !id.is_empty() => self.remove(id),
            _ => Err(ShelfError::NullArgument("id")),
        }
    }

    pub fn delete_all(&self) -> Result<usize> {
        self.delete(DeleteOptions::new())
    }

    // ── Field mutation ───────────────────────────────────────────

    /// Set `path` to `value` in the targeted documents that already have
    /// that path. Returns how many documents changed.
    pub fn update_field<V: Serialize>(&self, target: FieldTarget, path: &str, value: &V) -> Result<usize> {
        let op = WriteOp::UpdateField {
            filter: target.compile()?,
            path: field_path(path)?,
            json: serde_json::to_string(value)?,
        };
        Ok(self.submit(op)?.affected)
    }

    pub fn update_field_by_id<V: Serialize>(&self, id: &str, path: &str, value: &V) -> Result<bool> {
        require("id", id)?;
        Ok(self.update_field(FieldTarget::id(id), path, value)? > 0)
    }

    pub fn remove_field(&self, path: &str) -> Result<usize> {
        let op = WriteOp::RemoveField { path: field_path(path)? };
        Ok(self.submit(op)?.affected)
    }

    /// Rename `old_path` to `new_path` across the collection. Fails with
    /// `FieldConflict` when any document already has `new_path`.
    pub fn rename_field(&self, new_path: &str, old_path: &str) -> Result<usize> {
        let op = WriteOp::RenameField {
            new_path: field_path(new_path)?,
            old_path: field_path(old_path)?,
        };
        Ok(self.submit(op)?.affected)
    }

    // ── Watching ─────────────────────────────────────────────────

    /// Call `handler` after every insert, update and delete.
    pub fn watch(&self, handler: impl Fn(&WatchData) + Send + Sync + 'static) -> Result<WatchId> {
        self.store.dispatcher().watch(&self.schema.name, None, Arc::new(handler))
    }

    /// Call `handler` after changes of one kind only.
    pub fn watch_event(
        &self,
        event: EventKind,
        handler: impl Fn(&WatchData) + Send + Sync + 'static,
    ) -> Result<WatchId> {
        self.store
            .dispatcher()
            .watch(&self.schema.name, Some(event), Arc::new(handler))
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        self.store.dispatcher().unwatch(id)
    }
}

fn require(what: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ShelfError::NullArgument(what));
    }
    Ok(())
}

fn field_path(path: &str) -> Result<JsonPath> {
    JsonPath::parse(path).map_err(|reason| ShelfError::malformed_filter(path, reason))
}

#[cfg(test)]
mod tests {
    use crate::config::{StoreConfig, WriteMode};
    use crate::query::Filter;
    use crate::store::{DeleteOptions, FieldTarget, PutResult, Store};
    use crate::watch::{EventKind, WatchData};
    use crate::ShelfError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn store() -> Store {
        Store::builder(StoreConfig::in_memory())
            .write_mode(WriteMode::Sync)
            .open()
            .unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let store = store();
        let kv = store.collection("settings").unwrap();

        assert_eq!(kv.put("theme", &"dark").unwrap(), PutResult::Stored(json!("dark")));
        assert_eq!(kv.put_if_absent("theme", &"light").unwrap(), PutResult::AlreadyExists);
        assert_eq!(kv.get::<String>("theme").unwrap().as_deref(), Some("dark"));
        assert_eq!(kv.put_if_absent("size", &12).unwrap(), PutResult::Stored(json!(12)));

        assert!(kv.remove("theme").unwrap());
        assert!(!kv.remove("theme").unwrap());
        assert_eq!(kv.get::<String>("theme").unwrap(), None);
    }

    #[test]
    fn test_null_arguments() {
        let store = store();
        let items = store.collection("items").unwrap();
        assert!(matches!(items.get_raw(""), Err(ShelfError::NullArgument("key"))));
        assert!(matches!(items.find_by_id::<Value>(""), Err(ShelfError::NullArgument("id"))));
        assert!(matches!(items.delete_by_id(""), Err(ShelfError::NullArgument("id"))));
        assert!(matches!(
            items.save_value(&mut Value::Null),
            Err(ShelfError::NullArgument(_))
        ));
    }

    #[test]
    fn test_untyped_identity() {
        let store = store();
        let items = store.collection("items").unwrap();

        let mut doc = json!({ "title": "first" });
        let id = items.save_value(&mut doc).unwrap();
        assert_eq!(doc["_id"], json!(id));

        let id2 = items.save_json(r#"{"_id":"fixed","title":"second"}"#).unwrap();
        assert_eq!(id2, "fixed");
        let stored: Value = items.find_by_id("fixed").unwrap().unwrap();
        assert_eq!(stored["title"], json!("second"));
        assert_eq!(items.find_by_id_as_json("missing").unwrap(), None);
    }

    #[test]
    fn test_delete_variants() {
        let store = store();
        let items = store.collection("items").unwrap();
        let mut docs: Vec<Value> = (0..10).map(|i| json!({ "n": i })).collect();
        items.save_many_values(&mut docs).unwrap();

        assert!(items.delete_one("n>=5").unwrap());
        assert_eq!(items.count_where("n>=5").unwrap(), 4);

        let removed = items.delete(DeleteOptions::from("n<5").sort("n>").limit(2)).unwrap();
        assert_eq!(removed, 2);
        let mut left: Vec<i64> = items
            .find::<Value>("n<5")
            .unwrap()
            .iter()
            .map(|d| d["n"].as_i64().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, vec![0, 1, 2]);

        assert_eq!(items.delete_all().unwrap(), 7);
        assert_eq!(items.count().unwrap(), 0);
    }

    #[test]
    fn test_field_mutation_events() {
        let store = store();
        let items = store.collection("items").unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        items
            .watch(move |data: &WatchData| sink.lock().push((data.event, data.documents.len())))
            .unwrap();

        let mut docs = vec![
            json!({ "_id": "a", "name": "Tyson", "age": 4 }),
            json!({ "_id": "b", "name": "Loke", "age": 2 }),
        ];
        items.save_many_values(&mut docs).unwrap();

        assert!(items.update_field_by_id("a", "age", &5).unwrap());
        assert!(!items.update_field_by_id("a", "age", &5).unwrap());
        assert_eq!(items.update_field(FieldTarget::filter("age<3"), "name", &"Loki").unwrap(), 1);
        assert_eq!(items.rename_field("years", "age").unwrap(), 2);
        assert!(matches!(
            items.rename_field("name", "years"),
            Err(ShelfError::FieldConflict { .. })
        ));
        assert_eq!(items.remove_field("years").unwrap(), 2);

        let b: Value = items.find_by_id("b").unwrap().unwrap();
        assert_eq!(b, json!({ "_id": "b", "name": "Loki" }));

        assert_eq!(
            *events.lock(),
            vec![
                (EventKind::Insert, 2),
                (EventKind::Update, 1),
                (EventKind::Update, 1),
                (EventKind::Update, 2),
                (EventKind::Update, 2),
            ]
        );
    }

    #[test]
    fn test_unwatch_stops_delivery() {
        let store = store();
        let items = store.collection("items").unwrap();
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let id = items.watch(move |_: &WatchData| *sink.lock() += 1).unwrap();

        items.save_value(&mut json!({ "n": 1 })).unwrap();
        assert!(items.unwatch(id));
        items.save_value(&mut json!({ "n": 2 })).unwrap();
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_bad_field_path() {
        let store = store();
        let items = store.collection("items").unwrap();
        assert!(matches!(
            items.remove_field("a..b"),
            Err(ShelfError::MalformedFilter { .. })
        ));
    }

    #[test]
    fn test_builder_filters_are_validated() {
        let store = store();
        let items = store.collection("items").unwrap();
        items.save_value(&mut json!({ "name": "Tyson" })).unwrap();

        let found: crate::Result<Vec<Value>> = items.find(Filter::regex("name", "("));
        assert!(matches!(found, Err(ShelfError::MalformedFilter { .. })));
        assert!(matches!(
            items.count_where(Filter::eq("bad path", 1)),
            Err(ShelfError::MalformedFilter { .. })
        ));
        assert!(matches!(
            items.delete(Filter::and(Vec::new())),
            Err(ShelfError::MalformedFilter { .. })
        ));
        assert_eq!(items.count().unwrap(), 1);

        let found: Vec<Value> = items.find(Filter::regex("name", "^Ty")).unwrap();
        assert_eq!(found.len(), 1);
    }
}
