// Document identity and collection registration

use crate::error::{Result, ShelfError};
use crate::query::path::is_sql_identifier;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::TypeId;

/// Identity field used by untyped collections.
pub const DEFAULT_ID_FIELD: &str = "_id";

/// A typed document stored in a registered collection.
///
/// `ID_FIELD` names the serialized field that holds the identity; `id` and
/// `set_id` access the same value on the Rust side so a generated identity
/// can be written back into the caller's document.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    const ID_FIELD: &'static str;

    fn id(&self) -> Option<&str>;

    fn set_id(&mut self, id: String);
}

/// How identities are generated for documents saved without one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// 21-character URL-safe random token.
    #[default]
    Nanoid,
    Ulid,
    Uuid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Nanoid => nanoid::nanoid!(),
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// The Rust type a typed collection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeBinding {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl TypeBinding {
    pub fn of<T: 'static>() -> Self {
        TypeBinding {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Explicit registration of a collection: name, identity field and, for
/// typed collections, the bound document type.
#[derive(Debug, Clone)]
pub struct CollectionSchema {
    pub name: String,
    pub id_field: String,
    pub binding: Option<TypeBinding>,
    pub id_strategy: IdStrategy,
}

impl CollectionSchema {
    pub fn typed<T: Document>(name: &str) -> Self {
        CollectionSchema {
            name: name.to_string(),
            id_field: T::ID_FIELD.to_string(),
            binding: Some(TypeBinding::of::<T>()),
            id_strategy: IdStrategy::default(),
        }
    }

    pub fn untyped(name: &str) -> Self {
        CollectionSchema {
            name: name.to_string(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            binding: None,
            id_strategy: IdStrategy::default(),
        }
    }

    pub fn id_field(mut self, field: &str) -> Self {
        self.id_field = field.to_string();
        self
    }

    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Checks run when the collection is first created.
    pub(crate) fn validate(&self) -> Result<()> {
        if !is_sql_identifier(&self.name) {
            return Err(ShelfError::InvalidCollectionName(self.name.clone()));
        }
        if !is_sql_identifier(&self.id_field) {
            return Err(ShelfError::IdentityFieldMissing(self.name.clone()));
        }
        Ok(())
    }
}

/// Read the identity of an untyped JSON document, generating and inserting
/// one when the field is absent or null.
pub(crate) fn resolve_json_identity(
    doc: &mut serde_json::Value,
    schema: &CollectionSchema,
) -> Result<String> {
    let map = match doc {
        serde_json::Value::Null => return Err(ShelfError::NullArgument("document")),
        serde_json::Value::Object(map) => map,
        other => {
            return Err(ShelfError::TypeMismatch {
                collection: schema.name.clone(),
                expected: "a JSON object".into(),
                found: json_type_name(other).into(),
            })
        }
    };

    match map.get(&schema.id_field) {
        Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        None | Some(serde_json::Value::Null) => {
            let id = schema.id_strategy.generate();
            map.insert(schema.id_field.clone(), serde_json::Value::String(id.clone()));
            Ok(id)
        }
        Some(serde_json::Value::String(_)) => Err(ShelfError::NullArgument("identity")),
        Some(other) => Err(ShelfError::TypeMismatch {
            collection: schema.name.clone(),
            expected: format!("a string '{}'", schema.id_field),
            found: json_type_name(other).into(),
        }),
    }
}

/// Identity of a typed document, generated and written back when absent.
pub(crate) fn resolve_typed_identity<T: Document>(doc: &mut T, schema: &CollectionSchema) -> String {
    match doc.id() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let id = schema.id_strategy.generate();
            doc.set_id(id.clone());
            id
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
