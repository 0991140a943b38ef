//! One exposed field of a resource.

use crate::auth::{self, AuthContext, AuthDecision};
use crate::entity::{EntityType, Record};
use crate::error::ResourceException;
use crate::expr::{Callable, EvalError, Term};
use crate::transforms::Transform;
use crate::validators::{FieldContext, NoopValidator, Validate};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A request parameter a dynamic attribute depends on.
#[derive(Clone, Debug)]
pub struct DynamicParam {
    pub name: String,
    pub validator: Arc<dyn Validate>,
}

impl DynamicParam {
    pub fn new(name: impl Into<String>) -> Self {
        DynamicParam {
            name: name.into(),
            validator: Arc::new(NoopValidator),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validate>) -> Self {
        self.validator = validator;
        self
    }
}

#[derive(Clone)]
pub struct AttributeSpec {
    key: String,
    validator: Arc<dyn Validate>,
    reader: Option<Transform>,
    writer: Option<Transform>,
    readable: bool,
    writable: bool,
    auth: Option<Callable>,
    owner: Weak<EntityType>,
    dynamic: bool,
    params: Vec<DynamicParam>,
}

impl fmt::Debug for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSpec")
            .field("key", &self.key)
            .field("validator", &self.validator)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("dynamic", &self.dynamic)
            .finish()
    }
}

impl AttributeSpec {
    pub fn new(key: impl Into<String>, owner: &Arc<EntityType>) -> Self {
        AttributeSpec {
            key: key.into(),
            validator: Arc::new(NoopValidator),
            reader: None,
            writer: None,
            readable: true,
            writable: true,
            auth: None,
            owner: Arc::downgrade(owner),
            dynamic: false,
            params: Vec::new(),
        }
    }

    pub fn validator(mut self, validator: Arc<dyn Validate>) -> Self {
        self.validator = validator;
        self
    }

    pub fn reader(mut self, reader: Option<Transform>) -> Self {
        self.reader = reader;
        self
    }

    pub fn writer(mut self, writer: Option<Transform>) -> Self {
        self.writer = writer;
        self
    }

    pub fn readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn auth(mut self, auth: Option<Callable>) -> Self {
        self.auth = auth;
        self
    }

    pub fn dynamic(mut self, params: Vec<DynamicParam>) -> Self {
        self.dynamic = true;
        self.params = params;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn params(&self) -> &[DynamicParam] {
        &self.params
    }

    pub fn auth_fn(&self) -> Option<&Callable> {
        self.auth.as_ref()
    }

    pub fn validator_ref(&self) -> &Arc<dyn Validate> {
        &self.validator
    }

    pub fn owner(&self) -> Result<Arc<EntityType>, ResourceException> {
        self.owner
            .upgrade()
            .ok_or_else(|| ResourceException::internal("owner_released", format!("The owner of {} is gone.", self.key)))
    }

    pub fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        self.validator.validate(value, field)
    }

    /// Stored value → API value. Dynamic attributes take their parameters from `params`.
    pub fn read(&self, record: &Record, params: &BTreeMap<String, String>) -> Result<Value, ResourceException> {
        let raw = match self.owner()?.dynamic_field(&self.key) {
            Some(getter) if self.dynamic => {
                let args: BTreeMap<String, Value> = self
                    .params
                    .iter()
                    .map(|p| {
                        let v = params.get(&p.name).map(|s| Value::String(s.clone())).unwrap_or(Value::Null);
                        (p.name.clone(), v)
                    })
                    .collect();
                getter(record, &args)
            }
            _ => record.get(&self.key).cloned().unwrap_or(Value::Null),
        };
        match &self.reader {
            None => Ok(raw),
            Some(reader) => reader.apply(&raw).map_err(|e| match e {
                EvalError::Raised(e) => e,
                other => ResourceException::internal(
                    "read_error",
                    format!("Could not read the {} field: {}", self.key, other),
                ),
            }),
        }
    }

    /// Validates, applies the writer and commits through the entity's setter when it has one.
    /// Nothing is modified when validation fails.
    pub fn write(&self, record: &mut Record, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        self.validate(value, field)?;
        let stored = match &self.writer {
            None => value.clone(),
            Some(writer) => writer.apply(value).map_err(|e| match e {
                EvalError::Raised(e) => e,
                other => ResourceException::bad_field(&self.key, format!("The {} field is invalid: {}", self.key, other)),
            })?,
        };
        let owner = self.owner()?;
        match owner.setter(&self.key) {
            Some(setter) => setter(record, stored),
            None => {
                record.set(self.key.clone(), stored);
                Ok(())
            }
        }
    }

    pub fn check_auth(&self, ctx: &AuthContext) -> Result<AuthDecision, ResourceException> {
        let owner = self.owner()?;
        auth::check(self.auth.as_ref(), ctx, Some(Term::Entity(owner)))
    }

    /// Readable, every dynamic parameter present and valid, and the attribute's auth passes.
    pub fn is_visible(&self, ctx: &AuthContext) -> bool {
        if !self.readable {
            return false;
        }
        let Ok(owner) = self.owner() else {
            return false;
        };
        for param in &self.params {
            let Some(value) = ctx.param(&param.name) else {
                return false;
            };
            let field = FieldContext::new(&param.name, owner.name());
            if param.validator.validate(&Value::String(value.to_string()), &field).is_err() {
                return false;
            }
        }
        !matches!(self.check_auth(ctx), Ok(AuthDecision::Deny) | Err(_))
    }

    pub fn describe(&self) -> Value {
        json!({
            "key": self.key,
            "validator": format!("{:?}", self.validator),
            "reader": self.reader.as_ref().map(Transform::name),
            "writer": self.writer.as_ref().map(Transform::name),
            "readable": self.readable,
            "mutable": self.writable,
            "auth": self.auth.as_ref().map(Callable::name),
            "dynamic": self.dynamic,
            "params": self.params.iter().map(|p| json!({"name": p.name, "validator": format!("{:?}", p.validator)})).collect::<Vec<_>>(),
        })
    }
}
