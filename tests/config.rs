//! Loading the example consumer's shop configuration.

use resource_sdk::config::ChildLink;
use resource_sdk::{load_document, load_from_str, ConfigError, EntityType, Module, ModuleCatalog, NativeFunction, Term};
use serde_json::{json, Value};

const SHOP: &str = include_str!("../example_consumer/resources.yaml");

fn allow(name: &str) -> NativeFunction {
    NativeFunction::new(name, 2, |_| Ok(Term::Data(Value::Bool(true))))
}

fn modules() -> ModuleCatalog {
    ModuleCatalog::new()
        .register(
            Module::new("shop")
                .entity(
                    EntityType::builder("User")
                        .fields(["name", "email"])
                        .method(NativeFunction::new("greeting", 1, |_| Ok(Term::Data(json!("hi")))))
                        .build(),
                )
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
        .register(Module::new("shop.rules").function(allow("is_caller")).function(allow("is_owner")))
}

#[test]
fn shop_children_resolve_to_links() {
    let registry = load_from_str(SHOP, &modules()).unwrap();
    assert_eq!(registry.root_collections(), vec!["users", "widgets", "tags"]);

    let users = registry.get_schema("User").unwrap();
    assert!(matches!(
        &users.child("widgets").unwrap().link,
        ChildLink::Direct { foreign_key } if foreign_key == "owner_id"
    ));
    assert!(matches!(users.child("greeting").unwrap().link, ChildLink::Virtual { .. }));

    let widgets = registry.get_schema("Widget").unwrap();
    assert!(matches!(
        &widgets.child("owner").unwrap().link,
        ChildLink::ToOne { field, references_field } if field == "owner_id" && references_field == "id"
    ));
    assert!(matches!(
        &widgets.child("tags").unwrap().link,
        ChildLink::ManyToMany { join, parent_fk, child_fk }
            if join == "WidgetTag" && parent_fk == "widget_id" && child_fk == "tag_id"
    ));
    assert!(!widgets.attribute("owner_id").unwrap().is_writable());
    assert!(widgets.actions.update.as_ref().unwrap().auth.is_some());
    assert!(registry.get_schema("Tag").unwrap().actions.create.is_none());
}

#[test]
fn loading_twice_describes_the_same_model() {
    let a = load_from_str(SHOP, &modules()).unwrap();
    let b = load_from_str(SHOP, &modules()).unwrap();
    for entity in ["User", "Widget", "Tag"] {
        assert_eq!(a.get_schema(entity).unwrap().describe(), b.get_schema(entity).unwrap().describe());
    }
}

#[test]
fn missing_rule_module_fails_to_load() {
    let modules = ModuleCatalog::new().register(Module::new("shop"));
    let err = load_from_str(SHOP, &modules).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownModule(_) | ConfigError::UnknownClass(_)));
}

fn shop_with(second: Value) -> Value {
    json!({
        "resource_modules": ["shop"],
        "resources": {
            "tags": {"class": "Tag", "attrs": ["label"], "create": {"required_fields": ["label"]}},
            "widgets": second,
        }
    })
}

#[test]
fn create_fields_must_be_declared_attributes() {
    let required = shop_with(json!({
        "class": "Widget",
        "attrs": ["name"],
        "create": {"required_fields": ["name", "price"]},
    }));
    match load_document(required, &modules()) {
        Err(ConfigError::UnknownFields { entity, list, fields }) => {
            assert_eq!((entity.as_str(), list, fields.as_str()), ("Widget", "required_fields", "price"));
        }
        other => panic!("expected UnknownFields, got {:?}", other.map(|_| ())),
    }

    let optional = shop_with(json!({
        "class": "Widget",
        "attrs": ["name"],
        "create": {"required_fields": ["name"], "optional_fields": ["notes"]},
    }));
    assert!(matches!(
        load_document(optional, &modules()),
        Err(ConfigError::UnknownFields { list: "optional_fields", .. })
    ));
}

#[test]
fn duplicate_attributes_fail_the_whole_load() {
    let doc = shop_with(json!({
        "class": "Widget",
        "attrs": ["name", {"name": {"type": "String"}}],
        "read": {},
    }));
    match load_document(doc, &modules()) {
        Err(ConfigError::DuplicateAttributes(entity)) => assert_eq!(entity, "Widget"),
        other => panic!("expected DuplicateAttributes, got {:?}", other.map(|_| ())),
    }
}
