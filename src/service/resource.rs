//! Single-resource operations: create, render, update, delete and instance authorization.

use crate::auth::{self, AuthContext, AuthDecision};
use crate::config::ResourceSchema;
use crate::entity::{Record, STANDARD_FIELDS};
use crate::error::ResourceException;
use crate::expr::{Callable, Term};
use crate::service::validation::{field_context, RequestValidator};
use crate::store::{Constraint, Storage};
use crate::transforms::{datetime_reader, now_timestamp};
use serde_json::{Map, Value};

/// A stored resource reached by traversal, with the schema it is served under.
#[derive(Clone, Debug)]
pub struct Resource<'r> {
    pub schema: &'r ResourceSchema,
    pub record: Record,
}

impl<'r> Resource<'r> {
    pub fn new(schema: &'r ResourceSchema, record: Record) -> Self {
        Resource { schema, record }
    }

    pub fn primary_key(&self) -> Value {
        self.record.get(self.schema.primary_key()).cloned().unwrap_or(Value::Null)
    }

    /// The record as auth functions and handlers see it.
    pub fn as_term(&self) -> Term {
        Term::Data(self.record.to_value())
    }
}

pub struct ResourceService;

impl ResourceService {
    /// Runs `auth` against this instance. Constraints are honored by checking that the record
    /// is among the stored records matching them.
    pub fn authorize(
        resource: &Resource<'_>,
        auth: Option<&Callable>,
        ctx: &AuthContext,
        store: &dyn Storage,
    ) -> Result<(), ResourceException> {
        if Self::permits(resource, auth, ctx, store)? {
            Ok(())
        } else {
            Err(ResourceException::unauthorized_caller())
        }
    }

    fn permits(
        resource: &Resource<'_>,
        auth: Option<&Callable>,
        ctx: &AuthContext,
        store: &dyn Storage,
    ) -> Result<bool, ResourceException> {
        match auth::check(auth, ctx, Some(resource.as_term()))? {
            AuthDecision::Allow => Ok(true),
            AuthDecision::Deny => Ok(false),
            AuthDecision::Constrain(constraints) => Self::matches(resource, constraints, store),
        }
    }

    /// Whether the stored record satisfies every constraint.
    fn matches(resource: &Resource<'_>, constraints: Vec<Constraint>, store: &dyn Storage) -> Result<bool, ResourceException> {
        let entity = resource.schema.entity_name();
        if resource.schema.entity.is_virtual() {
            tracing::warn!(entity = %entity, "auth returned constraints for a virtual resource, allowing");
            return Ok(true);
        }
        let mut scoped = vec![Constraint::eq(entity, resource.schema.primary_key(), resource.primary_key())];
        scoped.extend(constraints);
        Ok(!store.query(entity, &scoped, None)?.is_empty())
    }

    /// Builds a new record from validated create params. Values of attributes go through their
    /// writers; other keys (parent defaults) are stored as given.
    pub fn materialize(
        schema: &ResourceSchema,
        params: Map<String, Value>,
        store: Option<&dyn Storage>,
    ) -> Result<Record, ResourceException> {
        let now = Value::String(now_timestamp());
        let mut record = Record::new(schema.entity_name(), Map::new());
        record.set("active", Value::Bool(true));
        record.set("created_at", now.clone());
        record.set("updated_at", now);
        record.set("deleted_at", Value::Null);
        for (key, value) in params {
            match schema.attribute(&key) {
                Some(attr) => attr.write(&mut record, &value, &field_context(schema, &key, store, None))?,
                None => record.set(key, value),
            }
        }
        Ok(record)
    }

    /// Materializes and saves; returns the new primary key.
    pub fn create(
        schema: &ResourceSchema,
        params: Map<String, Value>,
        store: &dyn Storage,
    ) -> Result<Value, ResourceException> {
        let record = Self::materialize(schema, params, Some(store))?;
        let pk = store.save(record)?;
        tracing::debug!(entity = %schema.entity_name(), id = %pk, "created resource");
        Ok(pk)
    }

    /// JSON view of the record: the standard fields plus every attribute the caller may see.
    /// Attribute auth returning constraints shows the attribute only on matching records.
    pub fn render(resource: &Resource<'_>, ctx: &AuthContext, store: &dyn Storage) -> Result<Value, ResourceException> {
        let mut out = Map::new();
        for field in STANDARD_FIELDS {
            let raw = resource.record.get(field).cloned().unwrap_or(Value::Null);
            let value = if *field == "active" {
                raw
            } else {
                datetime_reader(&raw).unwrap_or(raw)
            };
            out.insert(field.to_string(), value);
        }
        for attr in &resource.schema.attributes {
            if !attr.is_visible(ctx) {
                continue;
            }
            if !Self::permits(resource, attr.auth_fn(), ctx, store)? {
                continue;
            }
            out.insert(attr.key().to_string(), attr.read(&resource.record, &ctx.params)?);
        }
        Ok(Value::Object(out))
    }

    /// Validates every change, then writes them all and touches `updated_at`.
    pub fn update(
        resource: &mut Resource<'_>,
        body: &Map<String, Value>,
        store: &dyn Storage,
    ) -> Result<(), ResourceException> {
        let schema = resource.schema;
        let pk = resource.primary_key();
        let updates = RequestValidator::update_params(schema, body, Some(store), Some(&pk))?;
        for (attr, value) in updates {
            attr.write(
                &mut resource.record,
                &value,
                &field_context(schema, attr.key(), Some(store), Some(&pk)),
            )?;
        }
        resource.record.set("updated_at", Value::String(now_timestamp()));
        store.save(resource.record.clone())?;
        tracing::debug!(entity = %schema.entity_name(), id = %pk, "updated resource");
        Ok(())
    }

    /// Marks the record inactive; it disappears from every collection.
    pub fn soft_delete(resource: &mut Resource<'_>, store: &dyn Storage) -> Result<(), ResourceException> {
        resource.record.set("active", Value::Bool(false));
        resource.record.set("deleted_at", Value::String(now_timestamp()));
        store.save(resource.record.clone())?;
        tracing::debug!(entity = %resource.schema.entity_name(), id = %resource.primary_key(), "deleted resource");
        Ok(())
    }
}
