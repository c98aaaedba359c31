//! Entity descriptors — the explicit replacement for runtime reflection.
//!
//! For every entity type whose fields may be transformed, the host
//! registers an [`EntityDescriptor`] once: the target table (schema
//! optional), and the declared field set with per-field encrypt markers and
//! mask overrides.  The hot path consumes descriptors only; no reflection
//! happens per call.
//!
//! Field *values* are reached through [`FieldAccess`], a structural
//! accessor the host implements per entity type.  Any mechanism producing
//! the declared field set is acceptable.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use dadp_domain::error::{Error, Result};
use dadp_domain::ident;
use dadp_domain::model::{MaskDirective, SchemaEntry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field access
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structural access to an entity's string fields by declared field name.
pub trait FieldAccess {
    /// The current value of a string field, `None` when the field is unset
    /// or not a string.
    fn get_text(&self, field: &str) -> Option<&str>;

    /// Replace a string field's value.  Returns false when the field is
    /// unknown.
    fn set_text(&mut self, field: &str, value: String) -> bool;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name used with [`FieldAccess`].
    pub field: String,
    /// Column name used for policy resolution and schema collection.
    pub column: String,
    /// Whether this field is an encryption target.  The decrypt pass
    /// mirrors the encrypt pass: reads process exactly the fields eligible
    /// on writes.
    pub encrypt: bool,
    /// Request a search-capable ciphertext from the Engine.
    pub for_search: bool,
    /// Per-field mask override, taking precedence over the call-level
    /// default.
    pub mask: Option<MaskDirective>,
}

impl FieldDescriptor {
    /// An encryption-target field whose column name equals the field name.
    pub fn encrypted(name: &str) -> Self {
        Self {
            field: name.to_owned(),
            column: ident::normalize(name),
            encrypt: true,
            for_search: false,
            mask: None,
        }
    }

    /// A declared but untouched field.
    pub fn plain(name: &str) -> Self {
        Self {
            field: name.to_owned(),
            column: ident::normalize(name),
            encrypt: false,
            for_search: false,
            mask: None,
        }
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = ident::normalize(column);
        self
    }

    pub fn with_mask(mut self, mask: MaskDirective) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn searchable(mut self) -> Self {
        self.for_search = true;
        self
    }
}

/// Per-type transformation metadata, computed once and cached by type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub datasource_id: Option<String>,
    pub schema: Option<String>,
    pub table: String,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn new(table: &str) -> Self {
        Self {
            datasource_id: None,
            schema: None,
            table: ident::normalize(table),
            fields: Vec::new(),
        }
    }

    pub fn in_schema(mut self, schema: &str) -> Self {
        self.schema = Some(ident::normalize(schema));
        self
    }

    pub fn with_datasource(mut self, datasource_id: &str) -> Self {
        self.datasource_id = Some(ident::normalize(datasource_id));
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Encryption-target fields, further restricted to a caller-supplied
    /// subset when one is given.
    pub fn targets(&self, restrict: Option<&[String]>) -> Vec<&FieldDescriptor> {
        self.fields
            .iter()
            .filter(|f| f.encrypt)
            .filter(|f| match restrict {
                Some(names) => names.iter().any(|n| n == &f.field),
                None => true,
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of entity descriptors, keyed by concrete type.
///
/// Registration happens at startup; the interception hot path and the
/// schema collector only read.
#[derive(Default)]
pub struct DescriptorRegistry {
    by_type: RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the descriptor for an entity type.
    pub fn register<E: 'static>(&self, descriptor: EntityDescriptor) {
        self.by_type
            .write()
            .insert(TypeId::of::<E>(), Arc::new(descriptor));
    }

    pub fn get<E: 'static>(&self) -> Option<Arc<EntityDescriptor>> {
        self.by_type.read().get(&TypeId::of::<E>()).cloned()
    }

    /// Like [`get`](Self::get), but an unregistered type is an error: the
    /// interception engine refuses to resolve policy without the entity →
    /// table mapping.
    pub fn lookup<E: 'static>(&self) -> Result<Arc<EntityDescriptor>> {
        self.get::<E>()
            .ok_or_else(|| Error::Descriptor(std::any::type_name::<E>().to_owned()))
    }

    pub fn len(&self) -> usize {
        self.by_type.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.read().is_empty()
    }

    /// Collect the locally-known encrypted columns as schema catalog rows.
    pub fn schema_rows(&self) -> Vec<SchemaEntry> {
        let by_type = self.by_type.read();
        let mut rows = Vec::new();
        for descriptor in by_type.values() {
            for field in descriptor.fields.iter().filter(|f| f.encrypt) {
                let mut entry = SchemaEntry::created(
                    descriptor.schema.as_deref().unwrap_or(""),
                    &descriptor.table,
                    &field.column,
                );
                entry.datasource_id = descriptor.datasource_id.clone();
                rows.push(entry);
            }
        }
        rows
    }
}
