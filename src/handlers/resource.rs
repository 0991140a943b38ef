//! Resource handlers: collections, items, children and child items.
//!
//! The core services are synchronous; handlers resolve the path against the frozen registry,
//! authorize, and call them directly.

use crate::config::ResourceSchema;
use crate::error::ResourceException;
use crate::extractors::Caller;
use crate::registry::RegistryContext;
use crate::response::{resource_created, resource_deleted, resource_updated, success_many, success_one_ok};
use crate::service::{self, ChildTarget, Collection, ListParams, Resource, ResourceService};
use crate::state::AppState;
use crate::store::Storage;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::Method,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};

type ApiResult<T> = Result<T, ResourceException>;

/// Path ids are numbers when they look like one.
fn path_id(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Request body as a JSON object; an empty body is an empty object.
fn body_object(body: &Bytes) -> ApiResult<Map<String, Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ResourceException::bad_request(
            "bad_body",
            "The request body must be a JSON object.",
        )),
    }
}

fn bad_verb(method: &Method, allowed: &[&str]) -> ResourceException {
    let allowed = match allowed {
        [] => "not use".to_string(),
        [only] => format!("only {} to", only),
        [a, b] => format!("only {} or {} to", a, b),
        [init @ .., last] => format!("only {}, or {} to", init.join(", "), last),
    };
    ResourceException::bad_request(
        "bad_verb",
        format!(
            "This URL does not support the use of the HTTP {} verb. You may {} this URL.",
            method, allowed
        ),
    )
}

fn collection_verbs(schema: &ResourceSchema) -> Vec<&'static str> {
    let a = &schema.actions;
    [(a.list.is_some(), "GET"), (a.create.is_some(), "POST")]
        .into_iter()
        .filter_map(|(enabled, verb)| enabled.then_some(verb))
        .collect()
}

fn item_verbs(schema: &ResourceSchema) -> Vec<&'static str> {
    let a = &schema.actions;
    [(a.read.is_some(), "GET"), (a.update.is_some(), "PATCH"), (a.delete.is_some(), "DELETE")]
        .into_iter()
        .filter_map(|(enabled, verb)| enabled.then_some(verb))
        .collect()
}

fn list_collection(collection: Collection<'_>, store: &dyn Storage, caller: &Caller) -> ApiResult<Response> {
    if collection.schema().actions.list.is_none() {
        return Err(bad_verb(&Method::GET, &collection_verbs(collection.schema())));
    }
    let params = ListParams::from_query(&caller.0.params)?;
    let rows = collection.apply(&params, &caller.0)?.render(store, &caller.0)?;
    Ok(success_many(rows).into_response())
}

fn create_in(collection: &Collection<'_>, store: &dyn Storage, caller: &Caller, body: &Bytes) -> ApiResult<Response> {
    if collection.schema().actions.create.is_none() {
        return Err(bad_verb(&Method::POST, &collection_verbs(collection.schema())));
    }
    let id = collection.create(store, body_object(body)?, &caller.0)?;
    Ok(resource_created(id).into_response())
}

fn read_resource(resource: &Resource<'_>, store: &dyn Storage, caller: &Caller) -> ApiResult<Response> {
    let read = resource
        .schema
        .actions
        .read
        .as_ref()
        .ok_or_else(|| bad_verb(&Method::GET, &item_verbs(resource.schema)))?;
    ResourceService::authorize(resource, read.auth.as_ref(), &caller.0, store)?;
    Ok(success_one_ok(ResourceService::render(resource, &caller.0, store)?).into_response())
}

fn update_resource(mut resource: Resource<'_>, store: &dyn Storage, caller: &Caller, body: &Bytes) -> ApiResult<Response> {
    let update = resource
        .schema
        .actions
        .update
        .as_ref()
        .ok_or_else(|| bad_verb(&Method::PATCH, &item_verbs(resource.schema)))?;
    ResourceService::authorize(&resource, update.auth.as_ref(), &caller.0, store)?;
    ResourceService::update(&mut resource, &body_object(body)?, store)?;
    Ok(resource_updated().into_response())
}

fn delete_from<'r>(collection: &Collection<'r>, resource: Resource<'r>, store: &dyn Storage, caller: &Caller) -> ApiResult<Response> {
    let delete = resource
        .schema
        .actions
        .delete
        .as_ref()
        .ok_or_else(|| bad_verb(&Method::DELETE, &item_verbs(resource.schema)))?;
    ResourceService::authorize(&resource, delete.auth.as_ref(), &caller.0, store)?;
    collection.remove(store, resource, &caller.0)?;
    Ok(resource_deleted().into_response())
}

fn child_target<'r>(
    registry: &'r RegistryContext,
    store: &dyn Storage,
    collection: &str,
    id: &str,
    child: &str,
    caller: &Caller,
) -> ApiResult<ChildTarget<'r>> {
    let parent = Collection::root(registry, collection)?.get(store, &path_id(id))?;
    service::child(registry, store, parent, child, &caller.0)
}

fn child_collection<'r>(
    registry: &'r RegistryContext,
    store: &dyn Storage,
    (collection, id, child): (&str, &str, &str),
    child_id: &str,
    caller: &Caller,
) -> ApiResult<Collection<'r>> {
    match child_target(registry, store, collection, id, child, caller)? {
        ChildTarget::Collection(c) => Ok(c),
        _ => Err(ResourceException::not_found(
            "resource_not_found",
            format!("No resource \"{}\" could be found in this collection.", child_id),
        )),
    }
}

/// `GET /`: there is no index; point the caller at the root collections.
pub async fn no_path(State(state): State<AppState>) -> ResourceException {
    let roots = state.registry.root_collections();
    ResourceException::not_found(
        "v0-404",
        format!(
            "You must specify a root resource type (e.g. /{}). Available resource types are: {}",
            roots.first().copied().unwrap_or("resource"),
            roots.join(",")
        ),
    )
}

pub async fn list(State(state): State<AppState>, Path(collection): Path<String>, caller: Caller) -> ApiResult<Response> {
    let root = Collection::root(&state.registry, &collection)?;
    list_collection(root, state.store.as_ref(), &caller)
}

pub async fn create(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    let root = Collection::root(&state.registry, &collection)?;
    create_in(&root, state.store.as_ref(), &caller, &body)
}

pub async fn read(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    caller: Caller,
) -> ApiResult<Response> {
    let store = state.store.as_ref();
    let resource = Collection::root(&state.registry, &collection)?.get(store, &path_id(&id))?;
    read_resource(&resource, store, &caller)
}

pub async fn update(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    let store = state.store.as_ref();
    let resource = Collection::root(&state.registry, &collection)?.get(store, &path_id(&id))?;
    update_resource(resource, store, &caller, &body)
}

pub async fn delete(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    caller: Caller,
) -> ApiResult<Response> {
    let store = state.store.as_ref();
    let root = Collection::root(&state.registry, &collection)?;
    let resource = root.get(store, &path_id(&id))?;
    delete_from(&root, resource, store, &caller)
}

pub async fn child_list(
    State(state): State<AppState>,
    Path((collection, id, child)): Path<(String, String, String)>,
    caller: Caller,
) -> ApiResult<Response> {
    let store = state.store.as_ref();
    match child_target(&state.registry, store, &collection, &id, &child, &caller)? {
        ChildTarget::Collection(c) => list_collection(c, store, &caller),
        ChildTarget::Resource(r) => read_resource(&r, store, &caller),
        ChildTarget::Virtual(value) => Ok(success_one_ok(value).into_response()),
    }
}

pub async fn child_create(
    State(state): State<AppState>,
    Path((collection, id, child)): Path<(String, String, String)>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    let store = state.store.as_ref();
    match child_target(&state.registry, store, &collection, &id, &child, &caller)? {
        ChildTarget::Collection(c) => create_in(&c, store, &caller, &body),
        _ => Err(bad_verb(&Method::POST, &["GET"])),
    }
}

pub async fn child_read(
    State(state): State<AppState>,
    Path((collection, id, child, child_id)): Path<(String, String, String, String)>,
    caller: Caller,
) -> ApiResult<Response> {
    let store = state.store.as_ref();
    let c = child_collection(&state.registry, store, (&collection, &id, &child), &child_id, &caller)?;
    read_resource(&c.get(store, &path_id(&child_id))?, store, &caller)
}

pub async fn child_update(
    State(state): State<AppState>,
    Path((collection, id, child, child_id)): Path<(String, String, String, String)>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    let store = state.store.as_ref();
    let c = child_collection(&state.registry, store, (&collection, &id, &child), &child_id, &caller)?;
    update_resource(c.get(store, &path_id(&child_id))?, store, &caller, &body)
}

/// `PUT` adds an existing resource to the child collection; on a member it updates it.
pub async fn child_associate(
    State(state): State<AppState>,
    Path((collection, id, child, child_id)): Path<(String, String, String, String)>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    let store = state.store.as_ref();
    let c = child_collection(&state.registry, store, (&collection, &id, &child), &child_id, &caller)?;
    let key = path_id(&child_id);
    if c.contains(store, &key)? {
        return update_resource(c.get(store, &key)?, store, &caller, &body);
    }
    c.associate(store, &key, &caller.0)?;
    Ok(resource_updated().into_response())
}

pub async fn child_delete(
    State(state): State<AppState>,
    Path((collection, id, child, child_id)): Path<(String, String, String, String)>,
    caller: Caller,
) -> ApiResult<Response> {
    let store = state.store.as_ref();
    let c = child_collection(&state.registry, store, (&collection, &id, &child), &child_id, &caller)?;
    let resource = c.get(store, &path_id(&child_id))?;
    delete_from(&c, resource, store, &caller)
}

pub async fn collection_fallback(
    State(state): State<AppState>,
    method: Method,
    Path(collection): Path<String>,
) -> ResourceException {
    match Collection::root(&state.registry, &collection) {
        Ok(root) => bad_verb(&method, &collection_verbs(root.schema())),
        Err(e) => e,
    }
}

pub async fn item_fallback(
    State(state): State<AppState>,
    method: Method,
    Path((collection, _id)): Path<(String, String)>,
) -> ResourceException {
    match Collection::root(&state.registry, &collection) {
        Ok(root) => bad_verb(&method, &item_verbs(root.schema())),
        Err(e) => e,
    }
}

pub async fn child_fallback(method: Method) -> ResourceException {
    bad_verb(&method, &["GET", "POST"])
}

pub async fn child_item_fallback(method: Method) -> ResourceException {
    bad_verb(&method, &["GET", "PUT", "PATCH", "DELETE"])
}
