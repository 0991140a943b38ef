//! Entity declarations: entity types, modules and the catalog of everything the host registered.
//!
//! Entity types are registered explicitly through builders; nothing is discovered implicitly.

use crate::error::{ConfigError, ResourceException};
use crate::expr::{NativeFunction, Namespace, Term};
use crate::store::Introspect;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Fields every persisted entity carries in addition to its declared ones.
pub const STANDARD_FIELDS: &[&str] = &["active", "created_at", "updated_at", "deleted_at"];

/// Computes a dynamic field from an instance and the request-supplied parameters.
pub type DynamicGetter = Arc<dyn Fn(&Record, &BTreeMap<String, Value>) -> Value + Send + Sync>;

/// Native settable property: stores `value` on the instance in whatever form the entity wants.
pub type PropertySetter = Arc<dyn Fn(&mut Record, Value) -> Result<(), ResourceException> + Send + Sync>;

/// `entity.field` references `references_entity.references_field`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub entity: String,
    pub field: String,
    pub references_entity: String,
    pub references_field: String,
}

pub struct EntityType {
    name: String,
    storage_name: String,
    primary_key: String,
    fields: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
    methods: BTreeMap<String, NativeFunction>,
    dynamic_fields: BTreeMap<String, DynamicGetter>,
    setters: BTreeMap<String, PropertySetter>,
    is_virtual: bool,
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("storage_name", &self.storage_name)
            .field("primary_key", &self.primary_key)
            .field("fields", &self.fields)
            .field("foreign_keys", &self.foreign_keys)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("dynamic_fields", &self.dynamic_fields.keys().collect::<Vec<_>>())
            .field("is_virtual", &self.is_virtual)
            .finish()
    }
}

impl EntityType {
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// Declared, standard or dynamic field.
    pub fn has_field(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f == key) || self.dynamic_fields.contains_key(key)
    }

    pub fn method(&self, name: &str) -> Option<&NativeFunction> {
        self.methods.get(name)
    }

    pub fn dynamic_field(&self, key: &str) -> Option<&DynamicGetter> {
        self.dynamic_fields.get(key)
    }

    pub fn setter(&self, key: &str) -> Option<&PropertySetter> {
        self.setters.get(key)
    }
}

pub struct EntityTypeBuilder {
    inner: EntityType,
}

impl EntityTypeBuilder {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        EntityTypeBuilder {
            inner: EntityType {
                storage_name: name.to_lowercase(),
                name,
                primary_key: "id".into(),
                fields: Vec::new(),
                foreign_keys: Vec::new(),
                methods: BTreeMap::new(),
                dynamic_fields: BTreeMap::new(),
                setters: BTreeMap::new(),
                is_virtual: false,
            },
        }
    }

    pub fn storage_name(mut self, storage_name: impl Into<String>) -> Self {
        self.inner.storage_name = storage_name.into();
        self
    }

    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.inner.primary_key = field.into();
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.inner.fields.contains(&field) {
            self.inner.fields.push(field);
        }
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for f in fields {
            self = self.field(f);
        }
        self
    }

    /// Declares `field` as a foreign key to `entity.references_field` (the field itself is added too).
    pub fn foreign_key(
        mut self,
        field: impl Into<String>,
        references_entity: impl Into<String>,
        references_field: impl Into<String>,
    ) -> Self {
        let field = field.into();
        self.inner.foreign_keys.push(ForeignKey {
            entity: self.inner.name.clone(),
            field: field.clone(),
            references_entity: references_entity.into(),
            references_field: references_field.into(),
        });
        self.field(field)
    }

    pub fn method(mut self, function: NativeFunction) -> Self {
        self.inner.methods.insert(function.name().to_string(), function);
        self
    }

    pub fn dynamic_field<F>(mut self, key: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Record, &BTreeMap<String, Value>) -> Value + Send + Sync + 'static,
    {
        self.inner.dynamic_fields.insert(key.into(), Arc::new(getter));
        self
    }

    pub fn setter<F>(mut self, key: impl Into<String>, setter: F) -> Self
    where
        F: Fn(&mut Record, Value) -> Result<(), ResourceException> + Send + Sync + 'static,
    {
        self.inner.setters.insert(key.into(), Arc::new(setter));
        self
    }

    /// Purely virtual, non-persisted resource: no standard fields, never queried from storage.
    pub fn virtual_resource(mut self) -> Self {
        self.inner.is_virtual = true;
        self
    }

    pub fn build(mut self) -> EntityType {
        let pk = self.inner.primary_key.clone();
        if !self.inner.fields.contains(&pk) {
            self.inner.fields.insert(0, pk);
        }
        if !self.inner.is_virtual {
            for name in STANDARD_FIELDS {
                if !self.inner.fields.iter().any(|f| f == name) {
                    self.inner.fields.push((*name).to_string());
                }
            }
        }
        self.inner
    }
}

/// A named bundle of entity types and symbols the configuration can load or import from.
#[derive(Clone, Debug, Default)]
pub struct Module {
    name: String,
    entities: Vec<Arc<EntityType>>,
    symbols: BTreeMap<String, Term>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn entity(mut self, entity: EntityType) -> Self {
        self.entities.push(Arc::new(entity));
        self
    }

    pub fn symbol(mut self, name: impl Into<String>, term: Term) -> Self {
        self.symbols.insert(name.into(), term);
        self
    }

    pub fn function(self, function: NativeFunction) -> Self {
        let name = function.name().to_string();
        self.symbol(name, Term::Callable(function.into()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entities(&self) -> &[Arc<EntityType>] {
        &self.entities
    }

    /// Exported symbol, or one of the module's entity types by name.
    pub fn lookup(&self, name: &str) -> Option<Term> {
        if let Some(t) = self.symbols.get(name) {
            return Some(t.clone());
        }
        self.entities
            .iter()
            .find(|e| e.name() == name)
            .map(|e| Term::Entity(e.clone()))
    }
}

/// Modules the host makes importable, keyed by dotted path.
#[derive(Clone, Debug, Default)]
pub struct ModuleCatalog {
    modules: BTreeMap<String, Module>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, module: Module) -> Self {
        self.modules.insert(module.name.clone(), module);
        self
    }

    pub fn get(&self, path: &str) -> Option<&Module> {
        self.modules.get(path)
    }

    /// Builds the namespace term for `path`: the module's own symbols plus one nested namespace
    /// per registered descendant segment. `None` when nothing lives under `path`.
    pub fn namespace(&self, path: &str) -> Option<Namespace> {
        let prefix = format!("{}.", path);
        let child_segments: BTreeSet<&str> = self
            .modules
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('.').next())
            .collect();
        let own = self.modules.get(path);
        if own.is_none() && child_segments.is_empty() {
            return None;
        }
        let mut symbols = BTreeMap::new();
        if let Some(module) = own {
            for e in &module.entities {
                symbols.insert(e.name().to_string(), Term::Entity(e.clone()));
            }
            for (k, v) in &module.symbols {
                symbols.insert(k.clone(), v.clone());
            }
        }
        for seg in child_segments {
            if let Some(ns) = self.namespace(&format!("{}{}", prefix, seg)) {
                symbols.insert(seg.to_string(), Term::Namespace(Arc::new(ns)));
            }
        }
        Some(Namespace::new(path, symbols))
    }
}

/// Active mapping of declared entity types, filled from the loaded resource modules.
#[derive(Clone, Debug, Default)]
pub struct EntityCatalog {
    entities: BTreeMap<String, Arc<EntityType>>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity: Arc<EntityType>) -> Result<(), ConfigError> {
        if let Some(existing) = self.entities.get(entity.name()) {
            if Arc::ptr_eq(existing, &entity) {
                return Ok(());
            }
            return Err(ConfigError::NameConflict(entity.name().to_string()));
        }
        tracing::debug!(entity = %entity.name(), "registering entity type");
        self.entities.insert(entity.name().to_string(), entity);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.entities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

impl Introspect for EntityCatalog {
    fn foreign_keys_referencing(&self, entity: &str, field: &str) -> Vec<ForeignKey> {
        self.entities
            .values()
            .flat_map(|e| e.foreign_keys().iter())
            .filter(|fk| fk.references_entity == entity && fk.references_field == field)
            .cloned()
            .collect()
    }

    fn primary_key_field(&self, entity: &str) -> Option<String> {
        self.entities.get(entity).map(|e| e.primary_key().to_string())
    }
}

/// One entity instance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    entity: String,
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(entity: impl Into<String>, fields: Map<String, Value>) -> Self {
        Record {
            entity: entity.into(),
            fields,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Fields as a JSON object, used as the `target` of two-argument auth functions.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shop() -> ModuleCatalog {
        ModuleCatalog::new()
            .register(Module::new("shop").entity(EntityType::builder("Widget").field("name").build()))
            .register(Module::new("shop.auth").symbol("LIMIT", Term::Data(Value::from(3))))
    }

    #[test]
    fn builder_adds_primary_key_and_standard_fields() {
        let e = EntityType::builder("Widget").primary_key("widget_id").field("name").build();
        assert_eq!(e.fields()[0], "widget_id");
        assert!(e.has_field("created_at"));
        assert_eq!(e.storage_name(), "widget");
    }

    #[test]
    fn virtual_entities_have_no_standard_fields() {
        let e = EntityType::builder("Report").virtual_resource().build();
        assert!(!e.has_field("active"));
    }

    #[test]
    fn namespace_nests_submodules() {
        let ns = shop().namespace("shop").unwrap();
        assert!(matches!(ns.get("Widget"), Some(Term::Entity(_))));
        match ns.get("auth") {
            Some(Term::Namespace(inner)) => assert!(inner.get("LIMIT").is_some()),
            other => panic!("expected namespace, got {:?}", other),
        }
        assert!(shop().namespace("nope").is_none());
    }

    #[test]
    fn foreign_keys_are_found_by_referenced_field() {
        let mut catalog = EntityCatalog::new();
        catalog.register(Arc::new(EntityType::builder("User").build())).unwrap();
        catalog
            .register(Arc::new(EntityType::builder("Widget").foreign_key("owner_id", "User", "id").build()))
            .unwrap();
        let fks = catalog.foreign_keys_referencing("User", "id");
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].entity, "Widget");
        assert_eq!(catalog.primary_key_field("Widget").as_deref(), Some("id"));
    }

    #[test]
    fn registering_a_different_entity_under_a_taken_name_conflicts() {
        let mut catalog = EntityCatalog::new();
        catalog.register(Arc::new(EntityType::builder("User").build())).unwrap();
        let err = catalog.register(Arc::new(EntityType::builder("User").build())).unwrap_err();
        assert_eq!(err, ConfigError::NameConflict("User".into()));
    }
}
