//! Construct-once, read-many catalog of parsed resource schemas.

use crate::config::{ActionSpec, ResourceSchema};
use crate::entity::EntityCatalog;
use crate::error::ConfigError;
use crate::expr::Term;
use std::collections::BTreeMap;

/// Mutable while a configuration loads; [`RegistryBuilder::build`] freezes it.
pub struct RegistryBuilder {
    entities: EntityCatalog,
    schemas: Vec<ResourceSchema>,
    symbols: BTreeMap<String, Term>,
}

impl RegistryBuilder {
    pub fn new(entities: EntityCatalog) -> Self {
        RegistryBuilder {
            entities,
            schemas: Vec::new(),
            symbols: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, schema: ResourceSchema) -> Result<(), ConfigError> {
        if self.schemas.iter().any(|s| s.group_name == schema.group_name) {
            return Err(ConfigError::malformed(
                schema.group_name.as_str(),
                "collection is declared twice",
            ));
        }
        if !self.entities.contains(schema.entity_name()) {
            return Err(ConfigError::UnknownClass(schema.entity_name().to_string()));
        }
        self.schemas.push(schema);
        Ok(())
    }

    pub fn symbols(mut self, symbols: BTreeMap<String, Term>) -> Self {
        self.symbols.extend(symbols);
        self
    }

    pub fn build(self) -> RegistryContext {
        let collections = self
            .schemas
            .iter()
            .map(|s| (s.group_name.clone(), s.entity_name().to_string()))
            .collect();
        let schemas = self
            .schemas
            .into_iter()
            .map(|s| (s.entity_name().to_string(), s))
            .collect();
        RegistryContext {
            entities: self.entities,
            schemas,
            collections,
            symbols: self.symbols,
        }
    }
}

/// Frozen registry. Share it behind an `Arc`; nothing here mutates after [`RegistryBuilder::build`].
#[derive(Debug)]
pub struct RegistryContext {
    entities: EntityCatalog,
    schemas: BTreeMap<String, ResourceSchema>,
    /// (collection, entity) in declaration order.
    collections: Vec<(String, String)>,
    symbols: BTreeMap<String, Term>,
}

impl RegistryContext {
    pub fn entities(&self) -> &EntityCatalog {
        &self.entities
    }

    pub fn get_schema(&self, entity: &str) -> Option<&ResourceSchema> {
        self.schemas.get(entity)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|(_, e)| e.as_str())
    }

    /// Root-accessible collection names in declaration order.
    pub fn root_collections(&self) -> Vec<&str> {
        self.collections
            .iter()
            .filter(|(_, e)| self.schemas.get(e).map(|s| s.root_accessible).unwrap_or(false))
            .map(|(c, _)| c.as_str())
            .collect()
    }

    pub fn collection_to_entity(&self, collection: &str) -> Option<&str> {
        self.collections
            .iter()
            .find(|(c, _)| c == collection)
            .map(|(_, e)| e.as_str())
    }

    pub fn schema_for_collection(&self, collection: &str) -> Option<&ResourceSchema> {
        self.collection_to_entity(collection).and_then(|e| self.get_schema(e))
    }

    /// Every enabled action of every resource, grouped by entity in declaration order.
    pub fn action_table(&self) -> Vec<(&str, &ActionSpec)> {
        self.collections
            .iter()
            .filter_map(|(_, e)| self.schemas.get(e))
            .flat_map(|s| s.actions.iter().map(move |a| (s.entity_name(), a)))
            .collect()
    }

    /// Names bound while loading: dependencies plus everything the resolver bound.
    pub fn symbols(&self) -> &BTreeMap<String, Term> {
        &self.symbols
    }
}
