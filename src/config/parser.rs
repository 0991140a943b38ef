//! Per-entity directive parsing into [`ResourceSchema`]s.

use crate::attribute::{AttributeSpec, DynamicParam};
use crate::config::relations::{infer_collection_link, infer_to_one};
use crate::config::resolved::{ActionSpec, ActionTable, ChildLink, ChildSpec, DeleteBehavior, ResourceSchema};
use crate::config::types::*;
use crate::config::validator::*;
use crate::entity::{EntityCatalog, EntityType};
use crate::error::ConfigError;
use crate::expr::{Callable, Term};
use crate::resolver::SymbolResolver;
use crate::transforms::Transform;
use crate::validators::{FnValidator, Validate};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub struct SchemaParser<'a> {
    entities: &'a EntityCatalog,
    resolver: SymbolResolver<'a>,
}

impl<'a> SchemaParser<'a> {
    pub fn new(entities: &'a EntityCatalog, dependencies: &'a BTreeMap<String, Term>) -> Self {
        SchemaParser {
            entities,
            resolver: SymbolResolver::new(entities, dependencies),
        }
    }

    /// Symbols bound while parsing.
    pub fn into_symbols(self) -> BTreeMap<String, Term> {
        self.resolver.into_bindings()
    }

    /// Parses every collection. The first error aborts the whole parse.
    pub fn parse(&mut self, resources: &Map<String, Value>) -> Result<Vec<ResourceSchema>, ConfigError> {
        let mut schemas = Vec::with_capacity(resources.len());
        let mut exposed = BTreeSet::new();
        for (key, directives) in resources {
            let schema = self.parse_resource(key, directives)?;
            if !exposed.insert(schema.entity_name().to_string()) {
                return Err(ConfigError::malformed(
                    key.as_str(),
                    format!("{} is already exposed by another collection", schema.entity_name()),
                ));
            }
            tracing::debug!(collection = %key, schema = %schema.describe(), "parsed resource");
            schemas.push(schema);
        }
        Ok(schemas)
    }

    fn entity(&self, name: &str) -> Result<Arc<EntityType>, ConfigError> {
        self.entities
            .get(name.trim())
            .cloned()
            .ok_or_else(|| ConfigError::UnknownClass(name.trim().to_string()))
    }

    fn expression(&mut self, owner: &EntityType, value: Option<&Value>, context: &str) -> Result<Option<Term>, ConfigError> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(source)) => match self.resolver.resolve_handler(owner, source)? {
                Term::Data(Value::Null) => Ok(None),
                term => Ok(Some(term)),
            },
            Some(other) => Err(ConfigError::malformed(
                context,
                format!("expected an expression string, found {}", other),
            )),
        }
    }

    fn callable(&mut self, owner: &EntityType, value: Option<&Value>, context: &str) -> Result<Option<Callable>, ConfigError> {
        match self.expression(owner, value, context)? {
            None => Ok(None),
            Some(Term::Callable(c)) => Ok(Some(c)),
            Some(other) => Err(ConfigError::malformed(
                context,
                format!("expected a function, found {}", other.kind()),
            )),
        }
    }

    fn validator(&mut self, owner: &EntityType, value: Option<&Value>, context: &str) -> Result<Option<Arc<dyn Validate>>, ConfigError> {
        let validator: Arc<dyn Validate> = match self.expression(owner, value, context)? {
            None => return Ok(None),
            Some(Term::Validator(v)) => v,
            Some(Term::AttrType(t)) => t.validator().clone(),
            Some(Term::Callable(Callable::Native(f))) if f.is_constructor() => match f.call(&[], &BTreeMap::new()) {
                Ok(Term::Validator(v)) => v,
                Ok(other) => {
                    return Err(ConfigError::malformed(
                        context,
                        format!("{} did not produce a validator but a {}", f.name(), other.kind()),
                    ))
                }
                Err(e) => return Err(ConfigError::malformed(context, e.to_string())),
            },
            Some(Term::Callable(c)) => Arc::new(FnValidator(c)),
            Some(other) => {
                return Err(ConfigError::malformed(
                    context,
                    format!("expected a validator, found {}", other.kind()),
                ))
            }
        };
        Ok(Some(validator))
    }

    fn transform(&mut self, owner: &EntityType, value: Option<&Value>, context: &str) -> Result<Option<Transform>, ConfigError> {
        match self.expression(owner, value, context)? {
            None => Ok(None),
            Some(Term::Transform(t)) => Ok(Some(t)),
            Some(Term::Callable(c)) => Ok(Some(Transform::from_callable(c))),
            Some(other) => Err(ConfigError::malformed(
                context,
                format!("expected a reader or writer function, found {}", other.kind()),
            )),
        }
    }

    fn parse_resource(&mut self, key: &str, value: &Value) -> Result<ResourceSchema, ConfigError> {
        let Value::Object(info) = value else {
            return Err(ConfigError::malformed(key, "resource directives must be a mapping"));
        };
        let class = string_directive(info, "class", key)?.ok_or_else(|| ConfigError::MissingClass(key.to_string()))?;
        let entity = self.entity(class)?;
        let root_accessible = bool_directive(info, "root_accessible", true, key)?;
        let auth = self.callable(&entity, info.get("auth"), &format!("{}.auth", key))?;

        let attributes = match info.get("attrs") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .map(|e| self.parse_attr(key, &entity, e, auth.as_ref()))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(ConfigError::malformed(
                    format!("{}.attrs", key),
                    format!("expected a list, found {}", other),
                ))
            }
        };
        check_unique_keys(entity.name(), attributes.iter().map(AttributeSpec::key))?;

        let children = match info.get("children") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .map(|e| self.parse_child(key, &entity, e, auth.as_ref()))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(ConfigError::malformed(
                    format!("{}.children", key),
                    format!("expected a list, found {}", other),
                ))
            }
        };

        let filters = map_directive(info, "filters", key)?;
        if let Some(field) = filters.keys().find(|f| !entity.has_field(f)) {
            return Err(ConfigError::malformed(
                format!("{}.filters", key),
                format!("{} has no field {}", entity.name(), field),
            ));
        }

        let attr_keys: Vec<&str> = attributes.iter().map(AttributeSpec::key).collect();
        let actions = self.parse_actions(key, &entity, info, auth.as_ref(), &attr_keys)?;

        Ok(ResourceSchema {
            entity,
            group_name: key.to_string(),
            root_accessible,
            attributes,
            children,
            auth,
            actions,
            filters,
        })
    }

    fn parse_attr(
        &mut self,
        key: &str,
        entity: &Arc<EntityType>,
        entry: &Value,
        default_auth: Option<&Callable>,
    ) -> Result<AttributeSpec, ConfigError> {
        let (name, directives) = named_entry(entry, &format!("{}.attrs", key))?;
        if !entity.has_field(name) {
            return Err(ConfigError::malformed(
                format!("{}.attrs", key),
                format!("{} has no field {}", entity.name(), name),
            ));
        }
        let mut attr = AttributeSpec::new(name, entity).auth(default_auth.cloned());
        let Some(d) = directives else {
            return Ok(attr);
        };
        let context = format!("{}.{}", key, name);
        check_directives("attrs", d, ATTR_DIRECTIVES)?;

        match self.expression(entity, d.get("type"), &context)? {
            None => {}
            Some(Term::AttrType(t)) => {
                attr = attr
                    .validator(t.validator().clone())
                    .reader(t.reader().cloned())
                    .writer(t.writer().cloned());
            }
            Some(other) => {
                return Err(ConfigError::malformed(
                    context,
                    format!("type must name an attribute type, found {}", other.kind()),
                ))
            }
        }
        if let Some(v) = self.validator(entity, d.get("validator"), &context)? {
            attr = attr.validator(v);
        }
        if let Some(r) = self.transform(entity, d.get("reader"), &context)? {
            attr = attr.reader(Some(r));
        }
        if let Some(w) = self.transform(entity, d.get("writer"), &context)? {
            attr = attr.writer(Some(w));
        }
        attr = attr
            .writable(bool_directive(d, "mutable", true, &context)?)
            .readable(bool_directive(d, "readable", true, &context)?);
        if let Some(a) = self.callable(entity, d.get("auth"), &context)? {
            attr = attr.auth(Some(a));
        }

        let dynamic = bool_directive(d, "dynamic", false, &context)?;
        let params = match d.get("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|p| self.parse_param(entity, p, &context))
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(ConfigError::malformed(
                    context,
                    format!("params must be a list, found {}", other),
                ))
            }
        };
        if d.contains_key("params") && !dynamic {
            return Err(ConfigError::malformed(
                context,
                "params are declared but the attribute is not dynamic",
            ));
        }
        if dynamic {
            if params.is_empty() {
                tracing::warn!(attribute = %context, "attribute is declared dynamic but has no dynamic params");
            }
            attr = attr.dynamic(params);
        }
        Ok(attr)
    }

    fn parse_param(&mut self, entity: &EntityType, entry: &Value, context: &str) -> Result<DynamicParam, ConfigError> {
        let (name, directives) = named_entry(entry, context)?;
        let mut param = DynamicParam::new(name);
        if let Some(d) = directives {
            check_directives("params", d, &["validator"])?;
            if let Some(v) = self.validator(entity, d.get("validator"), &format!("{}.{}", context, name))? {
                param = param.with_validator(v);
            }
        }
        Ok(param)
    }

    fn parse_child(
        &mut self,
        key: &str,
        parent: &Arc<EntityType>,
        entry: &Value,
        default_auth: Option<&Callable>,
    ) -> Result<ChildSpec, ConfigError> {
        let (name, directives) = named_entry(entry, &format!("{}.children", key))?;
        let mut spec = ChildSpec {
            name: name.to_string(),
            entity: None,
            secondary: None,
            link: ChildLink::Direct {
                foreign_key: String::new(),
            },
            defaults: Map::new(),
            default_pk: None,
            association_handler: None,
            disassociation_handler: None,
            delete_behavior: DeleteBehavior::Delete,
            auth: default_auth.cloned(),
            filters: Map::new(),
        };

        let Some(d) = directives else {
            if let Some((entity, link)) = infer_to_one(parent, name) {
                self.entity(&entity)?;
                spec.entity = Some(entity);
                spec.link = link;
                return Ok(spec);
            }
            if let Some(method) = parent.method(name) {
                spec.link = ChildLink::Virtual {
                    getter: method.clone().into(),
                };
                return Ok(spec);
            }
            return Err(ConfigError::ForeignKey(format!(
                "{} has neither a foreign key nor a method for the child {}",
                parent.name(),
                name
            )));
        };

        let context = format!("{}.{}", key, name);
        check_directives("children", d, CHILD_DIRECTIVES)?;
        let references = string_directive(d, "references", &context)?
            .ok_or_else(|| ConfigError::malformed(context.as_str(), "the references directive is required"))?;
        let child = self.entity(references)?;
        if child.is_virtual() {
            return Err(ConfigError::ForeignKey(format!(
                "{} is virtual and cannot back the child collection {}",
                child.name(),
                context
            )));
        }
        let secondary = string_directive(d, "secondary", &context)?
            .map(|s| self.entity(s))
            .transpose()?;
        let foreign_key = string_directive(d, "foreign_key", &context)?;
        spec.link = infer_collection_link(self.entities, parent, &child, secondary.as_deref(), foreign_key)?;
        spec.entity = Some(child.name().to_string());
        spec.secondary = secondary.map(|s| s.name().to_string());

        spec.defaults = map_directive(d, "defaults", &context)?;
        spec.filters = map_directive(d, "filters", &context)?;
        if let Some(field) = spec
            .defaults
            .keys()
            .chain(spec.filters.keys())
            .find(|f| !child.has_field(f))
        {
            return Err(ConfigError::malformed(
                context,
                format!("{} has no field {}", child.name(), field),
            ));
        }
        spec.default_pk = string_directive(d, "default_pk", &context)?.map(String::from);
        spec.association_handler = self.callable(parent, d.get("association_handler"), &context)?;
        spec.disassociation_handler = self.callable(parent, d.get("disassociation_handler"), &context)?;
        spec.delete_behavior = match string_directive(d, "delete_behavior", &context)? {
            None | Some("delete") => DeleteBehavior::Delete,
            Some("disassociate") => DeleteBehavior::Disassociate,
            Some(other) => {
                return Err(ConfigError::malformed(
                    context,
                    format!("the delete_behavior {} is invalid", other),
                ))
            }
        };
        if spec.delete_behavior == DeleteBehavior::Disassociate && spec.disassociation_handler.is_none() {
            return Err(ConfigError::malformed(
                context,
                "delete_behavior disassociate requires a disassociation_handler",
            ));
        }
        if let Some(auth) = self.callable(parent, d.get("auth"), &context)? {
            spec.auth = Some(auth);
        }
        Ok(spec)
    }

    fn parse_actions(
        &mut self,
        key: &str,
        entity: &EntityType,
        info: &Map<String, Value>,
        default_auth: Option<&Callable>,
        attr_keys: &[&str],
    ) -> Result<ActionTable, ConfigError> {
        let item_url = format!("{}/:{}", key, entity.primary_key());
        let mut table = ActionTable::default();

        if let Some(d) = enabled(info, "list", key)? {
            let context = format!("{}.list", key);
            check_directives("list", &d, LIST_DIRECTIVES)?;
            let mut action = self.standard_action(entity, "list", "GET", key, &d, default_auth, &context)?;
            action.params = string_list(&d, "params", &context)?;
            table.list = Some(action);
        }
        if let Some(d) = enabled(info, "create", key)? {
            let context = format!("{}.create", key);
            check_directives("create", &d, CREATE_DIRECTIVES)?;
            let mut action = self.standard_action(entity, "create", "POST", key, &d, default_auth, &context)?;
            action.required_fields = string_list(&d, "required_fields", &context)?;
            action.optional_fields = string_list(&d, "optional_fields", &context)?;
            check_subset(entity.name(), "required_fields", &action.required_fields, attr_keys)?;
            check_subset(entity.name(), "optional_fields", &action.optional_fields, attr_keys)?;
            table.create = Some(action);
        }
        for (name, method) in [("read", "GET"), ("update", "PATCH"), ("delete", "DELETE")] {
            let Some(d) = enabled(info, name, key)? else {
                continue;
            };
            let context = format!("{}.{}", key, name);
            check_directives(name, &d, ITEM_DIRECTIVES)?;
            let action = self.standard_action(entity, name, method, &item_url, &d, default_auth, &context)?;
            match name {
                "read" => table.read = Some(action),
                "update" => table.update = Some(action),
                _ => table.delete = Some(action),
            }
        }

        for (name, value) in info.iter().filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str())) {
            let context = format!("{}.{}", key, name);
            let Value::Object(d) = value else {
                return Err(ConfigError::malformed(
                    context,
                    format!("custom actions must be mappings, found {}", value),
                ));
            };
            check_directives(name, d, CUSTOM_ACTION_DIRECTIVES)?;
            let method = string_directive(d, "method", &context)?
                .ok_or_else(|| ConfigError::malformed(context.as_str(), "custom actions require a method"))?;
            let url = string_directive(d, "url", &context)?
                .ok_or_else(|| ConfigError::malformed(context.as_str(), "custom actions require a url"))?;
            let mut action = ActionSpec::new(name.as_str(), method.to_uppercase(), url);
            action.params = string_list(d, "params", &context)?;
            action.auth = match self.callable(entity, d.get("auth"), &context)? {
                Some(a) => Some(a),
                None => default_auth.cloned(),
            };
            table.custom.push(action);
        }
        Ok(table)
    }

    #[allow(clippy::too_many_arguments)]
    fn standard_action(
        &mut self,
        entity: &EntityType,
        name: &str,
        method: &str,
        url: &str,
        directives: &Map<String, Value>,
        default_auth: Option<&Callable>,
        context: &str,
    ) -> Result<ActionSpec, ConfigError> {
        let mut action = ActionSpec::new(name, method, url);
        action.auth = match self.callable(entity, directives.get("auth"), context)? {
            Some(a) => Some(a),
            None => default_auth.cloned(),
        };
        Ok(action)
    }
}

/// Absent, `null` and `false` disable an action; `true` and mappings enable it.
fn enabled(info: &Map<String, Value>, action: &str, key: &str) -> Result<Option<Map<String, Value>>, ConfigError> {
    match info.get(action) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
        Some(Value::Bool(true)) => Ok(Some(Map::new())),
        Some(Value::Object(m)) => Ok(Some(m.clone())),
        Some(other) => Err(ConfigError::malformed(
            format!("{}.{}", key, action),
            format!("expected a mapping, a boolean or null, found {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NativeFunction;
    use serde_json::json;

    fn catalog() -> EntityCatalog {
        let mut c = EntityCatalog::new();
        c.register(Arc::new(EntityType::builder("User").fields(["name", "email"]).build()))
            .unwrap();
        c.register(Arc::new(
            EntityType::builder("Widget")
                .fields(["name", "price"])
                .foreign_key("owner_id", "User", "id")
                .method(NativeFunction::new("summary", 1, |args| Ok(args[0].clone())))
                .build(),
        ))
        .unwrap();
        c
    }

    fn parse(resources: Value) -> Result<Vec<ResourceSchema>, ConfigError> {
        let c = catalog();
        let deps = BTreeMap::new();
        let Value::Object(m) = resources else { unreachable!() };
        SchemaParser::new(&c, &deps).parse(&m)
    }

    #[test]
    fn attrs_take_type_defaults_and_overrides() {
        let schemas = parse(json!({
            "widgets": {
                "class": "Widget",
                "attrs": ["name", {"price": {"type": "Float", "validator": "FloatValidator(min=0)", "mutable": false}}],
            }
        }))
        .unwrap();
        let price = schemas[0].attribute("price").unwrap();
        assert!(!price.is_writable());
        assert!(price.describe()["writer"] == json!("float_writer"));
        assert!(price.describe()["validator"].as_str().unwrap().contains("min: Some(0.0)"));
    }

    #[test]
    fn unknown_class_and_missing_class() {
        assert_eq!(
            parse(json!({"gadgets": {"class": "Gadget"}})).unwrap_err(),
            ConfigError::UnknownClass("Gadget".into())
        );
        assert_eq!(
            parse(json!({"gadgets": {}})).unwrap_err(),
            ConfigError::MissingClass("gadgets".into())
        );
    }

    #[test]
    fn params_without_dynamic_is_an_error() {
        let err = parse(json!({
            "widgets": {"class": "Widget", "attrs": [{"price": {"params": ["currency"]}}]}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("not dynamic"));
    }

    #[test]
    fn closed_attr_schema() {
        let err = parse(json!({
            "widgets": {"class": "Widget", "attrs": [{"price": {"colour": "red"}}]}
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnrecognizedDirectives { ref directives, .. } if directives == "colour"));
    }

    #[test]
    fn actions_follow_presence_and_inherit_auth() {
        let schemas = parse(json!({
            "widgets": {
                "class": "Widget",
                "auth": "lambda ctx: ctx.caller_id != None",
                "attrs": ["name"],
                "list": null,
                "create": {"required_fields": ["name"]},
                "read": true,
                "update": false,
                "delete": {"auth": "lambda: False"},
                "recount": {"method": "post", "url": "widgets/:id/recount"},
            }
        }))
        .unwrap();
        let t = &schemas[0].actions;
        assert!(t.list.is_none() && t.update.is_none());
        assert_eq!(t.read.as_ref().unwrap().url, "widgets/:id");
        assert_eq!(
            t.read.as_ref().unwrap().auth.as_ref().unwrap().name(),
            "lambda ctx: ctx.caller_id != None"
        );
        assert_eq!(t.delete.as_ref().unwrap().auth.as_ref().unwrap().name(), "lambda: False");
        assert_eq!(t.custom[0].method, "POST");
    }

    #[test]
    fn children_inherit_auth_unless_overridden() {
        let schemas = parse(json!({
            "users": {
                "class": "User",
                "auth": "lambda: True",
                "children": [
                    {"widgets": {"references": "Widget", "default_pk": "owner_id"}},
                    {"mine": {"references": "Widget", "auth": "lambda ctx: ctx.caller_id == 1"}},
                ],
            }
        }))
        .unwrap();
        let s = &schemas[0];
        assert_eq!(s.child("widgets").unwrap().auth.as_ref().unwrap().name(), "lambda: True");
        assert_eq!(s.child("mine").unwrap().auth.as_ref().unwrap().name(), "lambda ctx: ctx.caller_id == 1");
    }

    #[test]
    fn bare_children_resolve_to_one_or_virtual() {
        let schemas = parse(json!({
            "widgets": {"class": "Widget", "children": ["owner", "summary"]}
        }))
        .unwrap();
        assert!(matches!(schemas[0].child("owner").unwrap().link, ChildLink::ToOne { .. }));
        assert!(matches!(schemas[0].child("summary").unwrap().link, ChildLink::Virtual { .. }));
        assert!(parse(json!({"widgets": {"class": "Widget", "children": ["colour"]}})).is_err());
    }

    #[test]
    fn disassociate_requires_a_handler() {
        let err = parse(json!({
            "users": {"class": "User", "children": [{"widgets": {"references": "Widget", "delete_behavior": "disassociate"}}]}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("disassociation_handler"));
        let err = parse(json!({
            "users": {"class": "User", "children": [{"widgets": {"references": "Widget", "delete_behavior": "purge"}}]}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("purge"));
    }
}
