//! Resolved resource model: one schema per entity type, frozen after load.

use crate::attribute::AttributeSpec;
use crate::entity::EntityType;
use crate::expr::Callable;
use crate::store::Constraint;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// How a child collection is joined to its parent.
#[derive(Clone, Debug)]
pub enum ChildLink {
    /// `child.foreign_key == parent.pk`.
    Direct { foreign_key: String },
    /// `join.parent_fk == parent.pk` and `join.child_fk == child.pk`.
    ManyToMany {
        join: String,
        parent_fk: String,
        child_fk: String,
    },
    /// Single related resource: `parent.field == child.references_field`.
    ToOne { field: String, references_field: String },
    /// Non-persisted child produced by a method of the parent's entity type.
    Virtual { getter: Callable },
}

impl ChildLink {
    pub fn describe(&self) -> Value {
        match self {
            ChildLink::Direct { foreign_key } => json!({"kind": "direct", "foreign_key": foreign_key}),
            ChildLink::ManyToMany {
                join,
                parent_fk,
                child_fk,
            } => json!({"kind": "many_to_many", "join": join, "parent_fk": parent_fk, "child_fk": child_fk}),
            ChildLink::ToOne {
                field,
                references_field,
            } => json!({"kind": "to_one", "field": field, "references_field": references_field}),
            ChildLink::Virtual { getter } => json!({"kind": "virtual", "getter": getter.name()}),
        }
    }

    /// One resource rather than a collection.
    pub fn is_single(&self) -> bool {
        matches!(self, ChildLink::ToOne { .. } | ChildLink::Virtual { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteBehavior {
    Delete,
    Disassociate,
}

impl DeleteBehavior {
    pub fn as_str(self) -> &'static str {
        match self {
            DeleteBehavior::Delete => "delete",
            DeleteBehavior::Disassociate => "disassociate",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChildSpec {
    pub name: String,
    /// Entity type of the child resources; `None` for virtual children.
    pub entity: Option<String>,
    pub secondary: Option<String>,
    pub link: ChildLink,
    pub defaults: Map<String, Value>,
    /// Child field that receives the parent's primary key on creation.
    pub default_pk: Option<String>,
    pub association_handler: Option<Callable>,
    pub disassociation_handler: Option<Callable>,
    pub delete_behavior: DeleteBehavior,
    pub auth: Option<Callable>,
    pub filters: Map<String, Value>,
}

impl ChildSpec {
    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "references": self.entity,
            "secondary": self.secondary,
            "link": self.link.describe(),
            "defaults": self.defaults,
            "default_pk": self.default_pk,
            "association_handler": self.association_handler.as_ref().map(Callable::name),
            "disassociation_handler": self.disassociation_handler.as_ref().map(Callable::name),
            "delete_behavior": self.delete_behavior.as_str(),
            "auth": self.auth.as_ref().map(Callable::name),
            "filters": self.filters,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ActionSpec {
    pub name: String,
    pub method: String,
    /// URL template with `:param` placeholders.
    pub url: String,
    pub auth: Option<Callable>,
    pub required_fields: Vec<String>,
    pub optional_fields: Vec<String>,
    /// Allowed query parameters (`list`) or declared parameters (custom actions).
    pub params: Vec<String>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        ActionSpec {
            name: name.into(),
            method: method.into(),
            url: url.into(),
            auth: None,
            required_fields: Vec::new(),
            optional_fields: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "method": self.method,
            "url": self.url,
            "auth": self.auth.as_ref().map(Callable::name),
            "required_fields": self.required_fields,
            "optional_fields": self.optional_fields,
            "params": self.params,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActionTable {
    pub list: Option<ActionSpec>,
    pub create: Option<ActionSpec>,
    pub read: Option<ActionSpec>,
    pub update: Option<ActionSpec>,
    pub delete: Option<ActionSpec>,
    pub custom: Vec<ActionSpec>,
}

impl ActionTable {
    /// Enabled actions, standard ones first.
    pub fn iter(&self) -> impl Iterator<Item = &ActionSpec> {
        [&self.list, &self.create, &self.read, &self.update, &self.delete]
            .into_iter()
            .flatten()
            .chain(self.custom.iter())
    }

    pub fn describe(&self) -> Value {
        let describe = |a: &Option<ActionSpec>| a.as_ref().map(ActionSpec::describe).unwrap_or(Value::Null);
        json!({
            "list": describe(&self.list),
            "create": describe(&self.create),
            "read": describe(&self.read),
            "update": describe(&self.update),
            "delete": describe(&self.delete),
            "custom": self.custom.iter().map(ActionSpec::describe).collect::<Vec<_>>(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ResourceSchema {
    pub entity: Arc<EntityType>,
    /// Collection URL segment.
    pub group_name: String,
    pub root_accessible: bool,
    pub attributes: Vec<AttributeSpec>,
    pub children: Vec<ChildSpec>,
    pub auth: Option<Callable>,
    pub actions: ActionTable,
    pub filters: Map<String, Value>,
}

impl ResourceSchema {
    pub fn entity_name(&self) -> &str {
        self.entity.name()
    }

    pub fn primary_key(&self) -> &str {
        self.entity.primary_key()
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.key() == key)
    }

    pub fn attribute_keys(&self) -> Vec<&str> {
        self.attributes.iter().map(AttributeSpec::key).collect()
    }

    pub fn child(&self, name: &str) -> Option<&ChildSpec> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Equality constraints from the `filters` directive.
    pub fn default_constraints(&self) -> Vec<Constraint> {
        self.filters
            .iter()
            .map(|(k, v)| Constraint::eq(self.entity.name(), k.clone(), v.clone()))
            .collect()
    }

    /// Deterministic structural description.
    pub fn describe(&self) -> Value {
        json!({
            "entity": self.entity.name(),
            "group_name": self.group_name,
            "root_accessible": self.root_accessible,
            "primary_key": self.primary_key(),
            "auth": self.auth.as_ref().map(Callable::name),
            "attrs": self.attributes.iter().map(AttributeSpec::describe).collect::<Vec<_>>(),
            "children": self.children.iter().map(ChildSpec::describe).collect::<Vec<_>>(),
            "actions": self.actions.describe(),
            "filters": self.filters,
        })
    }
}
