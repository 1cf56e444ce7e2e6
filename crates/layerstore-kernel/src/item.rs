//! Item type descriptors.
//!
//! An [`ItemType`] is an immutable schema describing one kind of cached
//! document: how its identity key is extracted, which default values are
//! applied on create, which validation schemas guard writes, and which
//! adapter-routing hints (`meta`) travel with it.
//!
//! Items themselves are opaque JSON documents ([`Item`]).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FieldError, KernelError, Result};

/// A cached document.
pub type Item = Value;

/// Shared handle to a registered item type.
pub type ItemTypeHandle = Arc<ItemType>;

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// Whether an item type supports list semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Many items, fetchable one by one or through list queries.
    Collection,
    /// Singleton per key, no list queries.
    Model,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection => write!(f, "collection"),
            Self::Model => write!(f, "model"),
        }
    }
}

// ---------------------------------------------------------------------------
// Key extraction
// ---------------------------------------------------------------------------

type KeyFn = dyn Fn(&Item) -> Option<String> + Send + Sync;

/// Extracts the identity key of an item.
///
/// Extraction is deterministic and only string or integer field values are
/// usable; anything else means the item has no key.
#[derive(Clone)]
pub enum KeyExtractor {
    /// A single top-level field.
    Field(String),
    /// Several top-level fields, joined with `:`.
    Composite(Vec<String>),
    /// A caller-supplied pure function.
    Custom(Arc<KeyFn>),
}

impl KeyExtractor {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn composite<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Composite(fields.into_iter().map(Into::into).collect())
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Item) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Extract the key, or `None` if the item has no usable key.
    pub fn extract(&self, item: &Item) -> Option<String> {
        match self {
            Self::Field(name) => key_part(item.get(name)?),
            Self::Composite(fields) => {
                let parts = fields
                    .iter()
                    .map(|f| item.get(f).and_then(key_part))
                    .collect::<Option<Vec<_>>>()?;
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(":"))
                }
            }
            Self::Custom(f) => f(item).filter(|k| !k.is_empty()),
        }
    }
}

fn key_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

impl Default for KeyExtractor {
    fn default() -> Self {
        Self::Field("id".to_string())
    }
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.debug_tuple("Field").field(name).finish(),
            Self::Composite(fields) => f.debug_tuple("Composite").field(fields).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// An externally supplied, side-effect free validator.
pub trait ValidationSchema: Send + Sync {
    fn validate(&self, value: &Item) -> std::result::Result<(), Vec<FieldError>>;
}

impl<F> ValidationSchema for F
where
    F: Fn(&Item) -> std::result::Result<(), Vec<FieldError>> + Send + Sync,
{
    fn validate(&self, value: &Item) -> std::result::Result<(), Vec<FieldError>> {
        self(value)
    }
}

/// Requires the listed top-level fields to be present and non-null.
#[derive(Debug, Clone, Default)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl ValidationSchema for RequiredFields {
    fn validate(&self, value: &Item) -> std::result::Result<(), Vec<FieldError>> {
        let Some(obj) = value.as_object() else {
            return Err(vec![FieldError::new("", "must be an object")]);
        };
        let errors: Vec<FieldError> = self
            .fields
            .iter()
            .filter(|f| obj.get(f.as_str()).is_none_or(Value::is_null))
            .map(|f| FieldError::new(f.clone(), "is required"))
            .collect();
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

// ---------------------------------------------------------------------------
// Item type
// ---------------------------------------------------------------------------

/// An immutable item type descriptor.
#[derive(Clone)]
pub struct ItemType {
    name: String,
    kind: ItemKind,
    key: KeyExtractor,
    scope_id: Option<String>,
    defaults: Map<String, Value>,
    create_schema: Option<Arc<dyn ValidationSchema>>,
    update_schema: Option<Arc<dyn ValidationSchema>>,
    item_schema: Option<Arc<dyn ValidationSchema>>,
    meta: BTreeMap<String, Value>,
}

impl ItemType {
    /// Start describing a collection type.
    pub fn collection(name: impl Into<String>) -> ItemTypeBuilder {
        ItemTypeBuilder::new(name.into(), ItemKind::Collection)
    }

    /// Start describing a model type.
    pub fn model(name: impl Into<String>) -> ItemTypeBuilder {
        ItemTypeBuilder::new(name.into(), ItemKind::Model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn key_extractor(&self) -> &KeyExtractor {
        &self.key
    }

    pub fn scope_id(&self) -> Option<&str> {
        self.scope_id.as_deref()
    }

    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    /// Adapter-routing hint (REST path, websocket topic, table name, ...).
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn meta_map(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    /// Extract the identity key of `item`.
    pub fn key_of(&self, item: &Item) -> Result<String> {
        self.key.extract(item).ok_or_else(|| KernelError::MissingKey {
            type_name: self.name.clone(),
        })
    }

    /// Fill in default values for fields the item does not set.
    ///
    /// Non-object items are returned untouched.
    pub fn apply_defaults(&self, mut item: Item) -> Item {
        if let Some(obj) = item.as_object_mut() {
            for (field, value) in &self.defaults {
                obj.entry(field.clone()).or_insert_with(|| value.clone());
            }
        }
        item
    }

    pub fn validate_create(&self, item: &Item) -> Result<()> {
        self.run_schema(self.create_schema.as_deref(), item)
    }

    pub fn validate_update(&self, item: &Item) -> Result<()> {
        self.run_schema(self.update_schema.as_deref(), item)
    }

    /// Validate an inbound item (adapter result or pushed payload).
    pub fn validate_item(&self, item: &Item) -> Result<()> {
        self.run_schema(self.item_schema.as_deref(), item)
    }

    fn run_schema(&self, schema: Option<&dyn ValidationSchema>, item: &Item) -> Result<()> {
        match schema {
            None => Ok(()),
            Some(schema) => schema
                .validate(item)
                .map_err(|errors| KernelError::Validation {
                    type_name: self.name.clone(),
                    errors,
                }),
        }
    }
}

impl fmt::Debug for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("scope_id", &self.scope_id)
            .field("defaults", &self.defaults)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ItemType`].
pub struct ItemTypeBuilder {
    inner: ItemType,
}

impl ItemTypeBuilder {
    fn new(name: String, kind: ItemKind) -> Self {
        Self {
            inner: ItemType {
                name,
                kind,
                key: KeyExtractor::default(),
                scope_id: None,
                defaults: Map::new(),
                create_schema: None,
                update_schema: None,
                item_schema: None,
                meta: BTreeMap::new(),
            },
        }
    }

    /// How to extract the identity key (default: the `id` field).
    pub fn key(mut self, key: KeyExtractor) -> Self {
        self.inner.key = key;
        self
    }

    /// Partition namespace, e.g. one scope per backend.
    pub fn scope(mut self, scope_id: impl Into<String>) -> Self {
        self.inner.scope_id = Some(scope_id.into());
        self
    }

    pub fn default_value(mut self, field: impl Into<String>, value: Value) -> Self {
        self.inner.defaults.insert(field.into(), value);
        self
    }

    pub fn create_schema(mut self, schema: impl ValidationSchema + 'static) -> Self {
        self.inner.create_schema = Some(Arc::new(schema));
        self
    }

    pub fn update_schema(mut self, schema: impl ValidationSchema + 'static) -> Self {
        self.inner.update_schema = Some(Arc::new(schema));
        self
    }

    pub fn item_schema(mut self, schema: impl ValidationSchema + 'static) -> Self {
        self.inner.item_schema = Some(Arc::new(schema));
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inner.meta.insert(key.into(), value);
        self
    }

    pub fn build(self) -> ItemType {
        self.inner
    }
}

impl From<ItemTypeBuilder> for ItemType {
    fn from(builder: ItemTypeBuilder) -> Self {
        builder.build()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
