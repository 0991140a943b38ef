//! End-to-end requests against the resource routes, using the example consumer's shop config.

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use resource_sdk::{
    common_routes, load_from_str, resource_routes, AppState, Constraint, EntityType, MemorySessions,
    MemoryStore, Module, ModuleCatalog, NativeFunction, Record, Session, Settings, Storage, Term,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const SHOP: &str = include_str!("../example_consumer/resources.yaml");

fn caller_matches(name: &str, field: &'static str) -> NativeFunction {
    NativeFunction::new(name, 2, move |args| {
        let caller = args[0].as_data().and_then(|ctx| ctx.get("caller_id")).cloned().unwrap_or(Value::Null);
        if let Term::Entity(entity) = &args[1] {
            return Ok(Term::Constraint(Constraint::eq(entity.name(), field, caller)));
        }
        let owner = args[1].as_data().and_then(|t| t.get(field)).cloned();
        Ok(Term::Data(Value::Bool(!caller.is_null() && owner.as_ref() == Some(&caller))))
    })
}

fn modules() -> ModuleCatalog {
    let user = EntityType::builder("User")
        .fields(["name", "email"])
        .method(NativeFunction::new("greeting", 1, |args| {
            let name = args[0].as_data().and_then(|u| u.get("name")).and_then(Value::as_str).unwrap_or("stranger");
            Ok(Term::Data(json!({ "message": format!("Hello, {}!", name) })))
        }))
        .build();
    ModuleCatalog::new()
        .register(
            Module::new("shop")
                .entity(user)
                .entity(
                    EntityType::builder("Widget")
                        .fields(["name", "price", "notes"])
                        .foreign_key("owner_id", "User", "id")
                        .build(),
                )
                .entity(EntityType::builder("Tag").field("label").build())
                .entity(
                    EntityType::builder("WidgetTag")
                        .foreign_key("widget_id", "Widget", "id")
                        .foreign_key("tag_id", "Tag", "id")
                        .build(),
                ),
        )
        .register(
            Module::new("shop.rules")
                .function(caller_matches("is_caller", "id"))
                .function(caller_matches("is_owner", "owner_id")),
        )
}

fn app() -> Router {
    let registry = load_from_str(SHOP, &modules()).unwrap();
    let store = Arc::new(MemoryStore::new(registry.entities()));
    for (entity, fields) in [
        ("User", json!({"name": "Ann", "email": "ann@example.com"})),
        ("User", json!({"name": "Bob", "email": "bob@example.com"})),
        ("Widget", json!({"name": "bolt", "price": 2.5, "owner_id": 1, "notes": "zinc plated"})),
        ("Widget", json!({"name": "gear", "price": 9.0, "owner_id": 1})),
        ("Widget", json!({"name": "cam", "price": 4.0, "owner_id": 2})),
        ("Tag", json!({"label": "hardware"})),
        ("WidgetTag", json!({"widget_id": 1, "tag_id": 1})),
    ] {
        let mut fields = fields.as_object().cloned().unwrap();
        fields.insert("active".into(), json!(true));
        store.save(Record::new(entity, fields)).unwrap();
    }

    let sessions = Arc::new(MemorySessions::new());
    sessions.insert(Session::new("ann", json!(1)));
    let mut stale = Session::new("stale", json!(1));
    stale.updated_at = Utc::now() - Duration::days(2);
    sessions.insert(stale);

    let state = AppState::new(registry, store, sessions, Settings::default());
    Router::new()
        .merge(common_routes(state.clone()))
        .merge(resource_routes(state))
}

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("Authorization", format!("Token {}", token));
    }
    let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
    let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None, None).await
}

#[tokio::test]
async fn root_path_points_at_root_collections() {
    let app = app();
    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorID"], "v0-404");
    assert_eq!(body["statusCode"], 404);
    assert!(body["message"].as_str().unwrap().contains("widgets"));

    let (status, body) = get(&app, "/gadgets").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorID"], "v0-404");
}

#[tokio::test]
async fn health_and_ready() {
    let app = app();
    assert_eq!(get(&app, "/health").await.1, json!({"status": "ok"}));
    let (status, body) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resources"], 3);
    assert_eq!(body["root_collections"], json!(["users", "widgets", "tags"]));
    assert_eq!(get(&app, "/version").await.1["name"], "resource-sdk");
}

#[tokio::test]
async fn list_filters_and_sorts() {
    let app = app();
    let (status, body) = get(&app, "/widgets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 3);
    assert_eq!(body["data"][0]["name"], "bolt");
    assert!(body["data"][0].get("notes").is_none());

    let (_, body) = get(&app, "/widgets?q=price%3E3&sort_by=price&sort_dir=desc").await;
    let names: Vec<&str> = body["data"].as_array().unwrap().iter().map(|w| w["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["gear", "cam"]);

    let (status, body) = get(&app, "/widgets?q=colour:red").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorID"], "bad_query_key");

    let (_, body) = get(&app, "/widgets?q=price").await;
    assert_eq!(body["errorID"], "bad_query");
}

#[tokio::test]
async fn read_shows_owner_only_attributes_to_the_owner() {
    let app = app();
    let (status, body) = get(&app, "/widgets/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "bolt");
    assert!(body["data"].get("notes").is_none());

    let (_, body) = send(&app, Method::GET, "/widgets/1", Some("ann"), None).await;
    assert_eq!(body["data"]["notes"], "zinc plated");

    let (status, body) = get(&app, "/widgets/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorID"], "resource_not_found");
}

#[tokio::test]
async fn create_validates_the_body() {
    let app = app();
    let (status, body) = send(&app, Method::POST, "/widgets", None, Some(json!({"name": "nut", "price": 1}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], 4);

    let (status, body) = send(&app, Method::POST, "/widgets", None, Some(json!({"name": "nut"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorID"], "bad_price");
    assert_eq!(body["message"], "The price field is mandatory.");

    let (_, body) = send(&app, Method::POST, "/widgets", None, Some(json!({"name": "nut", "price": -1}))).await;
    assert_eq!(body["errorID"], "bad_price");

    let (_, body) = send(&app, Method::POST, "/widgets", None, Some(json!({"name": "nut", "price": 1, "colour": "red"}))).await;
    assert_eq!(body["errorID"], "unrecognized_fields");

    let (_, body) = send(&app, Method::POST, "/widgets", None, Some(json!([1, 2]))).await;
    assert_eq!(body["errorID"], "bad_body");
}

#[tokio::test]
async fn update_and_delete_require_the_owner() {
    let app = app();
    let patch = Some(json!({"price": 3}));
    let (status, body) = send(&app, Method::PATCH, "/widgets/1", None, patch.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errorID"], "unauthorized_caller");

    let (status, body) = send(&app, Method::PATCH, "/widgets/1", Some("ann"), patch).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["updated"], true);
    assert_eq!(get(&app, "/widgets/1").await.1["data"]["price"], 3.0);

    let (status, _) = send(&app, Method::PATCH, "/widgets/1", Some("ann"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);

    let (_, body) = send(&app, Method::PATCH, "/widgets/1", Some("ann"), Some(json!({"owner_id": 2}))).await;
    assert_eq!(body["errorID"], "unrecognized_fields");

    let (status, _) = send(&app, Method::DELETE, "/widgets/3", Some("ann"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, Method::DELETE, "/widgets/2", Some("ann"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], true);
    assert_eq!(get(&app, "/widgets").await.1["meta"]["count"], 2);
    assert_eq!(get(&app, "/widgets/2").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_verbs_are_bad_requests() {
    let app = app();
    let (status, body) = send(&app, Method::PUT, "/widgets", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorID"], "bad_verb");
    assert_eq!(
        body["message"],
        "This URL does not support the use of the HTTP PUT verb. You may only GET or POST to this URL."
    );

    let (_, body) = send(&app, Method::DELETE, "/tags/1", None, None).await;
    assert_eq!(body["errorID"], "bad_verb");
    assert!(body["message"].as_str().unwrap().contains("only GET to"));

    let (_, body) = send(&app, Method::POST, "/tags", None, Some(json!({"label": "x"}))).await;
    assert_eq!(body["errorID"], "bad_verb");
}

#[tokio::test]
async fn authorization_header_is_checked() {
    let app = app();
    let req = Request::builder()
        .uri("/widgets")
        .header("Authorization", "Basic abc")
        .body(Body::empty())
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::GET, "/widgets", Some("nope"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorID"], "bad_access_token");

    let (status, body) = send(&app, Method::GET, "/widgets", Some("stale"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorID"], "expired_access_token");
}

#[tokio::test]
async fn children_are_traversable() {
    let app = app();
    let (status, body) = get(&app, "/users/1/widgets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 2);

    let (_, body) = get(&app, "/users/1/greeting").await;
    assert_eq!(body["data"]["message"], "Hello, Ann!");

    let (_, body) = get(&app, "/widgets/3/owner").await;
    assert_eq!(body["data"]["name"], "Bob");

    let (_, body) = get(&app, "/widgets/1/tags").await;
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["data"][0]["label"], "hardware");

    let (status, body) = get(&app, "/widgets/1/parts").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorID"], "child_not_found");

    assert_eq!(get(&app, "/users/1/widgets/3").await.0, StatusCode::NOT_FOUND);
    assert_eq!(get(&app, "/users/2/widgets/3").await.1["data"]["name"], "cam");
}

#[tokio::test]
async fn creating_under_a_parent_fills_the_link() {
    let app = app();
    let (status, body) =
        send(&app, Method::POST, "/users/2/widgets", None, Some(json!({"name": "cog", "price": 3}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_i64().unwrap();

    let (_, body) = get(&app, &format!("/widgets/{}", id)).await;
    assert_eq!(body["data"]["owner_id"], 2);
    assert_eq!(get(&app, "/users/2/widgets").await.1["meta"]["count"], 2);

    let (_, body) = send(
        &app,
        Method::POST,
        "/users/2/widgets",
        None,
        Some(json!({"name": "cog", "price": 3, "owner_id": 1})),
    )
    .await;
    assert_eq!(body["errorID"], "unrecognized_fields");
}
