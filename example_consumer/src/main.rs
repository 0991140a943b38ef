//! Example consumer: a separate Rust project that serves a small shop through resource-sdk.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Then try `curl localhost:3000/widgets` or, as the seeded user,
//! `curl -X PATCH -H 'Authorization: Token demo' -d '{"price": 4}' localhost:3000/widgets/1`.

use axum::Router;
use resource_sdk::{
    common_routes, load_from_path, load_from_str, resource_routes, AppState, Constraint, EntityType,
    MemorySessions, MemoryStore, Module, ModuleCatalog, NativeFunction, Record, Session, Settings, Storage,
    Term,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

const BUILTIN_CONFIG: &str = include_str!("../resources.yaml");

/// `target.<field> == ctx.caller_id`. Against an entity type (list and create) it scopes the
/// caller to their own records instead.
fn caller_matches(name: &str, field: &'static str) -> NativeFunction {
    NativeFunction::new(name, 2, move |args| {
        let caller = args[0].as_data().and_then(|ctx| ctx.get("caller_id")).cloned().unwrap_or(Value::Null);
        if let Term::Entity(entity) = &args[1] {
            return Ok(Term::Constraint(Constraint::eq(entity.name(), field, caller)));
        }
        let owner = args[1].as_data().and_then(|target| target.get(field)).cloned();
        let allowed = !caller.is_null() && owner.as_ref() == Some(&caller);
        Ok(Term::Data(Value::Bool(allowed)))
    })
}

fn modules() -> ModuleCatalog {
    let user = EntityType::builder("User")
        .fields(["name", "email"])
        .method(NativeFunction::new("greeting", 1, |args| {
            let name = args[0].as_data().and_then(|u| u.get("name")).cloned().unwrap_or(Value::Null);
            Ok(Term::Data(json!({ "message": format!("Hello, {}!", name.as_str().unwrap_or("stranger")) })))
        }))
        .build();
    let widget = EntityType::builder("Widget")
        .fields(["name", "price", "notes"])
        .foreign_key("owner_id", "User", "id")
        .build();
    let tag = EntityType::builder("Tag").field("label").build();
    let widget_tag = EntityType::builder("WidgetTag")
        .foreign_key("widget_id", "Widget", "id")
        .foreign_key("tag_id", "Tag", "id")
        .build();

    ModuleCatalog::new()
        .register(Module::new("shop").entity(user).entity(widget).entity(tag).entity(widget_tag))
        .register(
            Module::new("shop.rules")
                .function(caller_matches("is_caller", "id"))
                .function(caller_matches("is_owner", "owner_id")),
        )
}

fn seed(store: &dyn Storage) -> Result<(), Box<dyn std::error::Error>> {
    let rows = [
        ("User", json!({"name": "Ann", "email": "ann@example.com"})),
        ("Widget", json!({"name": "bolt", "price": 2.5, "owner_id": 1, "notes": "zinc plated"})),
        ("Widget", json!({"name": "gear", "price": 9.0, "owner_id": 1})),
        ("Tag", json!({"label": "hardware"})),
        ("WidgetTag", json!({"widget_id": 1, "tag_id": 1})),
    ];
    for (entity, fields) in rows {
        let mut fields = fields.as_object().cloned().unwrap_or_default();
        fields.insert("active".into(), Value::Bool(true));
        store.save(Record::new(entity, fields))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("resource_sdk=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let modules = modules();
    let registry = if settings.config_path.exists() {
        load_from_path(&settings.config_path, &modules)?
    } else {
        tracing::info!(path = %settings.config_path.display(), "config file not found, using the built-in shop");
        load_from_str(BUILTIN_CONFIG, &modules)?
    };

    let store = Arc::new(MemoryStore::new(registry.entities()));
    seed(store.as_ref())?;
    let sessions = Arc::new(MemorySessions::new());
    sessions.insert(Session::new("demo", json!(1)));

    let bind_addr = settings.bind_addr.clone();
    let max_body_bytes = settings.max_body_bytes;
    let state = AppState::new(registry, store, sessions, settings);

    let app = Router::new()
        .merge(common_routes(state.clone()))
        .merge(resource_routes(state))
        .layer(RequestBodyLimitLayer::new(max_body_bytes));

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
