//! Collections of resources: root collections and the child collections of a resource.

use crate::auth::{self, AuthContext, AuthDecision};
use crate::config::{ChildLink, ChildSpec, DeleteBehavior, ResourceSchema};
use crate::entity::Record;
use crate::error::ResourceException;
use crate::expr::{Callable, EvalError, Term};
use crate::registry::RegistryContext;
use crate::service::query::{ListParams, SortDirection};
use crate::service::resource::{Resource, ResourceService};
use crate::service::validation::RequestValidator;
use crate::store::{Constraint, OrderBy, Storage, Subquery};
use serde_json::{Map, Value};

/// What a child name of a resource leads to.
#[derive(Debug)]
pub enum ChildTarget<'r> {
    Collection(Collection<'r>),
    Resource(Resource<'r>),
    /// Computed by a method of the parent; rendered as returned.
    Virtual(Value),
}

#[derive(Debug)]
pub struct Collection<'r> {
    schema: &'r ResourceSchema,
    parent: Option<Resource<'r>>,
    child: Option<&'r ChildSpec>,
    constraints: Vec<Constraint>,
    order_by: OrderBy,
    defaults: Map<String, Value>,
}

fn call_handler(handler: &Callable, args: Vec<Term>, error_id: &str) -> Result<Term, ResourceException> {
    handler.call_positional(&args).map_err(|e| match e {
        EvalError::Raised(e) => e,
        other => {
            tracing::error!(handler = %handler.name(), error = %other, "handler failed");
            ResourceException::internal(error_id, format!("The {} handler failed: {}", handler.name(), other))
        }
    })
}

/// Arguments for a function that takes up to `args.len()` positional parameters.
fn fit_arity(callable: &Callable, mut args: Vec<Term>) -> Vec<Term> {
    if let Some(n) = callable.arity() {
        args.truncate(n);
    }
    args
}

impl<'r> Collection<'r> {
    /// The root collection named `name`.
    pub fn root(registry: &'r RegistryContext, name: &str) -> Result<Self, ResourceException> {
        let schema = registry
            .schema_for_collection(name)
            .filter(|s| s.root_accessible)
            .ok_or_else(|| {
                ResourceException::not_found(
                    "v0-404",
                    format!(
                        "The root resource type {} could not be found. Available root resource types are: {}",
                        name,
                        registry.root_collections().join(", ")
                    ),
                )
            })?;
        Ok(Self::scoped(schema, None, None, Vec::new()))
    }

    fn scoped(
        schema: &'r ResourceSchema,
        parent: Option<Resource<'r>>,
        child: Option<&'r ChildSpec>,
        mut constraints: Vec<Constraint>,
    ) -> Self {
        let entity = schema.entity_name();
        constraints.push(Constraint::eq(entity, "active", Value::Bool(true)));
        constraints.extend(schema.default_constraints());
        let mut defaults = Map::new();
        if let Some(child) = child {
            constraints.extend(child.filters.iter().map(|(k, v)| Constraint::eq(entity, k.clone(), v.clone())));
            defaults = child.defaults.clone();
            if let (Some(field), Some(parent)) = (&child.default_pk, &parent) {
                defaults.insert(field.clone(), parent.primary_key());
            }
        }
        Collection {
            schema,
            parent,
            child,
            constraints,
            order_by: OrderBy::asc(schema.primary_key()),
            defaults,
        }
    }

    /// The child collection `spec` of `parent`, limited to records linked to it.
    fn child_collection(
        registry: &'r RegistryContext,
        parent: Resource<'r>,
        spec: &'r ChildSpec,
    ) -> Result<Self, ResourceException> {
        let schema = child_schema(registry, spec)?;
        let entity = schema.entity_name();
        let parent_pk = parent.primary_key();
        let link = match &spec.link {
            ChildLink::Direct { foreign_key } => Constraint::eq(entity, foreign_key.clone(), parent_pk),
            ChildLink::ManyToMany {
                join,
                parent_fk,
                child_fk,
            } => Constraint::InSubquery {
                entity: entity.to_string(),
                field: schema.primary_key().to_string(),
                subquery: Box::new(Subquery {
                    entity: join.clone(),
                    select: child_fk.clone(),
                    constraints: vec![Constraint::eq(join.clone(), parent_fk.clone(), parent_pk)],
                }),
            },
            other => {
                return Err(ResourceException::internal(
                    "bad_child_link",
                    format!("{} is not a collection link: {}", spec.name, other.describe()),
                ))
            }
        };
        Ok(Self::scoped(schema, Some(parent), Some(spec), vec![link]))
    }

    pub fn schema(&self) -> &'r ResourceSchema {
        self.schema
    }

    pub fn parent(&self) -> Option<&Resource<'r>> {
        self.parent.as_ref()
    }

    /// Values the collection supplies to every resource created in it.
    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Folds `?q=` filters and sorting into the collection query. Filters and the sort key must
    /// be attributes the caller can see; their auth constraints are folded in too.
    pub fn apply(mut self, params: &ListParams, ctx: &AuthContext) -> Result<Self, ResourceException> {
        let entity = self.schema.entity_name();
        for filter in &params.filters {
            let scope = self.attribute_scope(&filter.key, ctx).ok_or_else(|| {
                ResourceException::bad_request(
                    "bad_query_key",
                    format!("This resource has no filterable attribute \"{}\".", filter.key),
                )
            })?;
            self.constraints.extend(scope);
            self.constraints.push(filter.op.constraint(entity, &filter.key, &filter.value));
        }
        let sort_by = match &params.sort_by {
            Some(key) => {
                let scope = self.attribute_scope(key, ctx).ok_or_else(|| {
                    ResourceException::bad_request(
                        "bad_sort_by",
                        format!("This resource has no sortable attribute \"{}\".", key),
                    )
                })?;
                self.constraints.extend(scope);
                key.clone()
            }
            None => self.schema.primary_key().to_string(),
        };
        self.order_by = match params.sort_dir {
            SortDirection::Ascending => OrderBy::asc(sort_by),
            SortDirection::Descending => OrderBy::desc(sort_by),
        };
        Ok(self)
    }

    /// Constraints a caller must satisfy to use attribute `key`; `None` when it is hidden.
    fn attribute_scope(&self, key: &str, ctx: &AuthContext) -> Option<Vec<Constraint>> {
        let attr = self.schema.attributes.iter().find(|a| a.key() == key && a.is_visible(ctx))?;
        match attr.check_auth(ctx) {
            Ok(AuthDecision::Allow) => Some(Vec::new()),
            Ok(AuthDecision::Constrain(cs)) => Some(cs),
            Ok(AuthDecision::Deny) | Err(_) => None,
        }
    }

    /// Every record the caller may list. A denying list auth yields an empty list; constraints
    /// it returns narrow the query.
    pub fn items(&self, store: &dyn Storage, ctx: &AuthContext) -> Result<Vec<Record>, ResourceException> {
        let list_auth = self.schema.actions.list.as_ref().and_then(|a| a.auth.as_ref());
        let mut constraints = self.constraints.clone();
        match auth::check(list_auth, ctx, Some(Term::Entity(self.schema.entity.clone())))? {
            AuthDecision::Allow => {}
            AuthDecision::Deny => return Ok(Vec::new()),
            AuthDecision::Constrain(cs) => constraints.extend(cs),
        }
        Ok(store.query(self.schema.entity_name(), &constraints, Some(&self.order_by))?)
    }

    /// Renders every listable record.
    pub fn render(&self, store: &dyn Storage, ctx: &AuthContext) -> Result<Vec<Value>, ResourceException> {
        self.items(store, ctx)?
            .into_iter()
            .map(|record| ResourceService::render(&Resource::new(self.schema, record), ctx, store))
            .collect()
    }

    fn find(&self, store: &dyn Storage, id: &Value) -> Result<Option<Record>, ResourceException> {
        let mut constraints = self.constraints.clone();
        constraints.push(Constraint::eq(self.schema.entity_name(), self.schema.primary_key(), id.clone()));
        Ok(store.query(self.schema.entity_name(), &constraints, None)?.into_iter().next())
    }

    fn not_in_collection(id: &Value) -> ResourceException {
        let shown = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ResourceException::not_found(
            "resource_not_found",
            format!("No resource \"{}\" could be found in this collection.", shown),
        )
    }

    /// The member with primary key `id`.
    pub fn get(&self, store: &dyn Storage, id: &Value) -> Result<Resource<'r>, ResourceException> {
        self.find(store, id)?
            .map(|record| Resource::new(self.schema, record))
            .ok_or_else(|| Self::not_in_collection(id))
    }

    pub fn contains(&self, store: &dyn Storage, id: &Value) -> Result<bool, ResourceException> {
        Ok(self.find(store, id)?.is_some())
    }

    /// Adds an existing resource to this collection through the association handler.
    pub fn associate(&self, store: &dyn Storage, id: &Value, ctx: &AuthContext) -> Result<(), ResourceException> {
        let record = store
            .get(self.schema.entity_name(), id)?
            .ok_or_else(|| Self::not_in_collection(id))?;
        let (Some(handler), Some(parent)) = (self.child.and_then(|c| c.association_handler.as_ref()), &self.parent)
        else {
            return Err(Self::not_in_collection(id));
        };
        tracing::debug!(handler = %handler.name(), child = %self.schema.entity_name(), "calling association handler");
        let args = vec![Term::Data(record.to_value()), parent.as_term(), Term::Data(ctx.to_value())];
        call_handler(handler, fit_arity(handler, args), "association_failed")?;
        Ok(())
    }

    /// Validates the body and stores a new member. Returns its primary key.
    pub fn create(
        &self,
        store: &dyn Storage,
        body: Map<String, Value>,
        ctx: &AuthContext,
    ) -> Result<Value, ResourceException> {
        let create = self.schema.actions.create.as_ref().ok_or_else(|| {
            ResourceException::bad_request("bad_verb", "This collection does not accept new resources.")
        })?;
        let scope = auth::require(auth::check(
            create.auth.as_ref(),
            ctx,
            Some(Term::Entity(self.schema.entity.clone())),
        )?)?;
        if !scope.is_empty() {
            tracing::debug!(entity = %self.schema.entity_name(), "create auth returned constraints, allowing");
        }
        let params = RequestValidator::create_params(self.schema, create, body, &self.defaults, Some(store))?;
        ResourceService::create(self.schema, params, store)
    }

    /// Removes `resource` from this collection: disassociates it through the handler, or
    /// soft-deletes it.
    pub fn remove(
        &self,
        store: &dyn Storage,
        mut resource: Resource<'r>,
        ctx: &AuthContext,
    ) -> Result<(), ResourceException> {
        let disassociate = self
            .child
            .filter(|c| c.delete_behavior == DeleteBehavior::Disassociate)
            .and_then(|c| c.disassociation_handler.as_ref());
        match (disassociate, &self.parent) {
            (Some(handler), Some(parent)) => {
                tracing::debug!(handler = %handler.name(), child = %self.schema.entity_name(), "disassociating");
                let args = vec![resource.as_term(), parent.as_term(), Term::Data(ctx.to_value())];
                call_handler(handler, fit_arity(handler, args), "disassociation_failed")?;
                Ok(())
            }
            _ => ResourceService::soft_delete(&mut resource, store),
        }
    }
}

fn child_schema<'r>(registry: &'r RegistryContext, spec: &ChildSpec) -> Result<&'r ResourceSchema, ResourceException> {
    spec.entity
        .as_deref()
        .and_then(|e| registry.get_schema(e))
        .ok_or_else(|| {
            ResourceException::internal(
                "missing_resource_config",
                format!("The child {} does not reference a configured resource.", spec.name),
            )
        })
}

/// Follows the child `name` of `parent` after checking the child's auth against the parent.
pub fn child<'r>(
    registry: &'r RegistryContext,
    store: &dyn Storage,
    parent: Resource<'r>,
    name: &str,
    ctx: &AuthContext,
) -> Result<ChildTarget<'r>, ResourceException> {
    let spec = parent.schema.child(name).ok_or_else(|| {
        ResourceException::not_found(
            "child_not_found",
            format!("No child \"{}\" could be found in this resource.", name),
        )
    })?;
    ResourceService::authorize(&parent, spec.auth.as_ref(), ctx, store)?;
    match &spec.link {
        ChildLink::Direct { .. } | ChildLink::ManyToMany { .. } => {
            Collection::child_collection(registry, parent, spec).map(ChildTarget::Collection)
        }
        ChildLink::ToOne {
            field,
            references_field,
        } => {
            let schema = child_schema(registry, spec)?;
            let key = parent.record.get(field).cloned().unwrap_or(Value::Null);
            let missing = || {
                ResourceException::not_found(
                    "child_not_found",
                    format!("No child \"{}\" could be found in this resource.", name),
                )
            };
            if key.is_null() {
                return Err(missing());
            }
            let record = store
                .query(schema.entity_name(), &[Constraint::eq(schema.entity_name(), references_field.clone(), key)], None)?
                .into_iter()
                .next()
                .ok_or_else(missing)?;
            Ok(ChildTarget::Resource(Resource::new(schema, record)))
        }
        ChildLink::Virtual { getter } => {
            let args = fit_arity(getter, vec![parent.as_term(), Term::Data(ctx.to_value())]);
            let value = call_handler(getter, args, "child_error")?;
            let value = value
                .to_data()
                .map_err(|e| ResourceException::internal("child_error", e.to_string()))?;
            Ok(ChildTarget::Virtual(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_document;
    use crate::entity::{EntityType, Module, ModuleCatalog};
    use crate::expr::NativeFunction;
    use crate::service::query::parse_query;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Fixture {
        registry: RegistryContext,
        store: Arc<MemoryStore>,
        associated: Arc<Mutex<Vec<(Value, Value)>>>,
    }

    fn fixture() -> Fixture {
        let associated = Arc::new(Mutex::new(Vec::new()));
        let log = associated.clone();
        let user = EntityType::builder("User")
            .fields(["name"])
            .method(NativeFunction::new("adopt", 3, move |args| {
                let id = |t: &Term| t.as_data().and_then(|v| v.get("id")).cloned().unwrap_or(Value::Null);
                if let Ok(mut log) = log.lock() {
                    log.push((id(&args[0]), id(&args[1])));
                }
                Ok(Term::Data(Value::Null))
            }))
            .method(NativeFunction::new("greeting", 1, |args| {
                let name = args[0].as_data().and_then(|v| v.get("name")).cloned().unwrap_or(Value::Null);
                Ok(Term::Data(json!({"hello": name})))
            }))
            .build();
        let widget = EntityType::builder("Widget")
            .fields(["name", "price"])
            .foreign_key("owner_id", "User", "id")
            .build();
        let modules = ModuleCatalog::new().register(Module::new("shop").entity(user).entity(widget));
        let registry = load_document(
            json!({
                "resource_modules": ["shop"],
                "resources": {
                    "users": {
                        "class": "User",
                        "attrs": ["name"],
                        "children": [
                            {"widgets": {"references": "Widget", "default_pk": "owner_id", "association_handler": "adopt"}},
                            "greeting",
                        ],
                        "read": {},
                    },
                    "widgets": {
                        "class": "Widget",
                        "attrs": ["name", "price", {"owner_id": {"mutable": false}}],
                        "children": ["owner"],
                        "list": {},
                        "create": {"required_fields": ["name", "price"]},
                        "read": {},
                    },
                }
            }),
            &modules,
        )
        .unwrap();
        let store = Arc::new(MemoryStore::new(registry.entities()));
        Fixture {
            registry,
            store,
            associated,
        }
    }

    fn seed(f: &Fixture) {
        for name in ["ann", "bob"] {
            f.store.save(Record::new("User", json!({"name": name, "active": true}).as_object().cloned().unwrap())).unwrap();
        }
        for (name, price, owner) in [("bolt", 3, 1), ("nut", 1, 1), ("gear", 9, 2)] {
            let fields = json!({"name": name, "price": price, "owner_id": owner, "active": true});
            f.store.save(Record::new("Widget", fields.as_object().cloned().unwrap())).unwrap();
        }
    }

    fn ctx() -> AuthContext {
        AuthContext::anonymous("GET", Default::default())
    }

    fn names(records: &[Record]) -> Vec<&str> {
        records.iter().filter_map(|r| r.get("name").and_then(Value::as_str)).collect()
    }

    #[test]
    fn unknown_root_lists_the_available_ones() {
        let f = fixture();
        let err = Collection::root(&f.registry, "gadgets").unwrap_err();
        assert_eq!((err.status_code(), err.error_id()), (404, "v0-404"));
        assert!(err.message().ends_with("users, widgets"));
    }

    #[test]
    fn root_items_are_filtered_and_sorted() {
        let f = fixture();
        seed(&f);
        let params = ListParams {
            filters: parse_query("price>=2").unwrap(),
            sort_by: Some("price".into()),
            sort_dir: SortDirection::Descending,
        };
        let widgets = Collection::root(&f.registry, "widgets").unwrap().apply(&params, &ctx()).unwrap();
        assert_eq!(names(&widgets.items(f.store.as_ref(), &ctx()).unwrap()), vec!["gear", "bolt"]);
    }

    #[test]
    fn unknown_query_keys_are_rejected() {
        let f = fixture();
        let params = ListParams {
            filters: parse_query("colour=red").unwrap(),
            ..Default::default()
        };
        let err = Collection::root(&f.registry, "widgets").unwrap().apply(&params, &ctx()).unwrap_err();
        assert_eq!(err.error_id(), "bad_query_key");
        let params = ListParams {
            sort_by: Some("colour".into()),
            ..Default::default()
        };
        let err = Collection::root(&f.registry, "widgets").unwrap().apply(&params, &ctx()).unwrap_err();
        assert_eq!(err.error_id(), "bad_sort_by");
    }

    #[test]
    fn child_collection_is_scoped_to_the_parent() {
        let f = fixture();
        seed(&f);
        let users = Collection::root(&f.registry, "users").unwrap();
        let ann = users.get(f.store.as_ref(), &json!(1)).unwrap();
        let ChildTarget::Collection(widgets) = child(&f.registry, f.store.as_ref(), ann, "widgets", &ctx()).unwrap() else {
            panic!("expected a collection");
        };
        assert_eq!(names(&widgets.items(f.store.as_ref(), &ctx()).unwrap()), vec!["bolt", "nut"]);
        assert_eq!(widgets.defaults().get("owner_id"), Some(&json!(1)));
        assert_eq!(widgets.get(f.store.as_ref(), &json!(3)).unwrap_err().error_id(), "resource_not_found");

        let body = json!({"name": "cog", "price": 4}).as_object().cloned().unwrap();
        let id = widgets.create(f.store.as_ref(), body, &ctx()).unwrap();
        assert_eq!(f.store.get("Widget", &id).unwrap().unwrap().get("owner_id"), Some(&json!(1)));
    }

    #[test]
    fn association_calls_the_handler() {
        let f = fixture();
        seed(&f);
        let users = Collection::root(&f.registry, "users").unwrap();
        let ann = users.get(f.store.as_ref(), &json!(1)).unwrap();
        let ChildTarget::Collection(widgets) = child(&f.registry, f.store.as_ref(), ann, "widgets", &ctx()).unwrap() else {
            panic!("expected a collection");
        };
        widgets.associate(f.store.as_ref(), &json!(3), &ctx()).unwrap();
        assert_eq!(f.associated.lock().unwrap().as_slice(), &[(json!(3), json!(1))]);
        assert_eq!(
            widgets.associate(f.store.as_ref(), &json!(99), &ctx()).unwrap_err().error_id(),
            "resource_not_found"
        );
    }

    #[test]
    fn single_children_resolve_to_resources_or_values() {
        let f = fixture();
        seed(&f);
        let widgets = Collection::root(&f.registry, "widgets").unwrap();
        let gear = widgets.get(f.store.as_ref(), &json!(3)).unwrap();
        let ChildTarget::Resource(owner) = child(&f.registry, f.store.as_ref(), gear, "owner", &ctx()).unwrap() else {
            panic!("expected a resource");
        };
        assert_eq!(owner.record.get("name"), Some(&json!("bob")));

        let users = Collection::root(&f.registry, "users").unwrap();
        let ann = users.get(f.store.as_ref(), &json!(1)).unwrap();
        match child(&f.registry, f.store.as_ref(), ann.clone(), "greeting", &ctx()).unwrap() {
            ChildTarget::Virtual(v) => assert_eq!(v, json!({"hello": "ann"})),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            child(&f.registry, f.store.as_ref(), ann, "nothing", &ctx()).unwrap_err().error_id(),
            "child_not_found"
        );
    }

    #[test]
    fn deleted_records_leave_the_collection() {
        let f = fixture();
        seed(&f);
        let widgets = Collection::root(&f.registry, "widgets").unwrap();
        let nut = widgets.get(f.store.as_ref(), &json!(2)).unwrap();
        widgets.remove(f.store.as_ref(), nut, &ctx()).unwrap();
        assert!(!widgets.contains(f.store.as_ref(), &json!(2)).unwrap());
        assert_eq!(names(&widgets.items(f.store.as_ref(), &ctx()).unwrap()), vec!["bolt", "gear"]);
    }
}
