//! Request body validation for create and update.

use crate::attribute::AttributeSpec;
use crate::config::{ActionSpec, ResourceSchema};
use crate::error::ResourceException;
use crate::store::Storage;
use crate::validators::FieldContext;
use serde_json::{Map, Value};

const NOTHING_MODIFIED: &str = "No data has been modified.";

pub struct RequestValidator;

impl RequestValidator {
    /// Builds the initial field values of a new resource from a create request body.
    ///
    /// `defaults` (supplied by a parent collection) pre-fill the result and are no longer
    /// accepted from the caller. Required fields must be present; every accepted value is
    /// validated. Any key left over is rejected with `unrecognized_fields`.
    pub fn create_params(
        schema: &ResourceSchema,
        create: &ActionSpec,
        mut body: Map<String, Value>,
        defaults: &Map<String, Value>,
        store: Option<&dyn Storage>,
    ) -> Result<Map<String, Value>, ResourceException> {
        let mut params = defaults.clone();
        let accepted = |field: &&String| !defaults.contains_key(field.as_str());

        for field in create.required_fields.iter().filter(accepted) {
            let value = body.remove(field).ok_or_else(|| {
                ResourceException::bad_field(field, format!("The {} field is mandatory.", field))
            })?;
            Self::validate_field(schema, field, &value, store, None)?;
            params.insert(field.clone(), value);
        }
        for field in create.optional_fields.iter().filter(accepted) {
            if let Some(value) = body.remove(field) {
                Self::validate_field(schema, field, &value, store, None)?;
                params.insert(field.clone(), value);
            }
        }

        if !body.is_empty() {
            return Err(ResourceException::bad_request(
                "unrecognized_fields",
                format!(
                    "The following key(s) are not recognized fields for this resource: {}. {}",
                    body.keys().map(String::as_str).collect::<Vec<_>>().join(", "),
                    NOTHING_MODIFIED
                ),
            ));
        }
        Ok(params)
    }

    /// Checks an update body against the writable attributes and validates every value before
    /// anything is written. An empty update is `304`.
    pub fn update_params<'s>(
        schema: &'s ResourceSchema,
        body: &Map<String, Value>,
        store: Option<&dyn Storage>,
        primary_key: Option<&Value>,
    ) -> Result<Vec<(&'s AttributeSpec, Value)>, ResourceException> {
        let unrecognized: Vec<&str> = body
            .keys()
            .filter(|k| !schema.attribute(k).map(AttributeSpec::is_writable).unwrap_or(false))
            .map(String::as_str)
            .collect();
        if !unrecognized.is_empty() {
            return Err(ResourceException::bad_request(
                "unrecognized_fields",
                format!(
                    "The following key(s) are not valid updatable attributes of this resource: {}. {}",
                    unrecognized.join(", "),
                    NOTHING_MODIFIED
                ),
            ));
        }

        let updates: Vec<(&AttributeSpec, Value)> = schema
            .attributes
            .iter()
            .filter_map(|attr| body.get(attr.key()).map(|v| (attr, v.clone())))
            .collect();
        if updates.is_empty() {
            return Err(ResourceException::not_modified());
        }
        for (attr, value) in &updates {
            Self::validate_field(schema, attr.key(), value, store, primary_key)
                .map_err(|e| e.with_suffix(NOTHING_MODIFIED))?;
        }
        Ok(updates)
    }

    fn validate_field(
        schema: &ResourceSchema,
        key: &str,
        value: &Value,
        store: Option<&dyn Storage>,
        primary_key: Option<&Value>,
    ) -> Result<(), ResourceException> {
        let attr = schema.attribute(key).ok_or_else(|| {
            ResourceException::internal(
                "unknown_attribute",
                format!("{} has no attribute {}.", schema.entity_name(), key),
            )
        })?;
        attr.validate(value, &field_context(schema, key, store, primary_key))
    }
}

/// Validation context for `key`, with uniqueness checks against `store` when given.
pub(crate) fn field_context<'a>(
    schema: &'a ResourceSchema,
    key: &'a str,
    store: Option<&'a dyn Storage>,
    primary_key: Option<&'a Value>,
) -> FieldContext<'a> {
    let field = FieldContext::new(key, schema.entity_name());
    match store {
        Some(store) => field.with_store(store, schema.primary_key()).excluding(primary_key),
        None => field,
    }
}
