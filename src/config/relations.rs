//! Parent → child link inference from declared foreign keys.

use crate::config::resolved::ChildLink;
use crate::entity::{EntityType, ForeignKey};
use crate::error::ConfigError;
use crate::store::Introspect;

/// Foreign keys declared on `on` that reference `target`'s primary key.
fn keys_from<I: Introspect + ?Sized>(catalog: &I, target: &EntityType, on: &str) -> Vec<ForeignKey> {
    let pk = catalog
        .primary_key_field(target.name())
        .unwrap_or_else(|| target.primary_key().to_string());
    catalog
        .foreign_keys_referencing(target.name(), &pk)
        .into_iter()
        .filter(|fk| fk.entity == on)
        .collect()
}

fn exactly_one(mut keys: Vec<ForeignKey>, from: &str, to: &EntityType) -> Result<ForeignKey, ConfigError> {
    match keys.len() {
        0 => Err(ConfigError::ForeignKey(format!(
            "no foreign key in {} references {}.{}",
            from,
            to.name(),
            to.primary_key()
        ))),
        1 => Ok(keys.remove(0)),
        _ => Err(ConfigError::ForeignKey(format!(
            "more than one foreign key links {} and {}",
            from,
            to.name()
        ))),
    }
}

/// Link for a child collection of `child` resources under `parent`.
///
/// Direct foreign keys from child to parent win; several of them need `foreign_key` to pick one.
/// With none, the `secondary` join entity must carry exactly one foreign key to each side.
pub fn infer_collection_link<I: Introspect + ?Sized>(
    catalog: &I,
    parent: &EntityType,
    child: &EntityType,
    secondary: Option<&EntityType>,
    foreign_key: Option<&str>,
) -> Result<ChildLink, ConfigError> {
    let direct = keys_from(catalog, parent, child.name());
    if let Some(wanted) = foreign_key {
        return match direct.iter().find(|fk| fk.field == wanted) {
            Some(fk) => Ok(ChildLink::Direct {
                foreign_key: fk.field.clone(),
            }),
            None => Err(ConfigError::ForeignKey(format!(
                "foreign key {} referencing {} was not found in {}",
                wanted,
                parent.name(),
                child.name()
            ))),
        };
    }
    match direct.len() {
        1 => {
            let fk = &direct[0];
            tracing::debug!(parent = %parent.name(), child = %child.name(), field = %fk.field, "found direct link");
            Ok(ChildLink::Direct {
                foreign_key: fk.field.clone(),
            })
        }
        0 => {
            let Some(join) = secondary else {
                return Err(ConfigError::ForeignKey(format!(
                    "no foreign key in {} references {}.{}; declare a secondary join entity",
                    child.name(),
                    parent.name(),
                    parent.primary_key()
                )));
            };
            let parent_fk = exactly_one(keys_from(catalog, parent, join.name()), join.name(), parent)?;
            let child_fk = exactly_one(keys_from(catalog, child, join.name()), join.name(), child)?;
            tracing::debug!(
                parent = %parent.name(),
                child = %child.name(),
                join = %join.name(),
                "found many-to-many link"
            );
            Ok(ChildLink::ManyToMany {
                join: join.name().to_string(),
                parent_fk: parent_fk.field,
                child_fk: child_fk.field,
            })
        }
        _ => Err(ConfigError::ForeignKey(format!(
            "more than one foreign key links {} and {}; specify foreign_key",
            child.name(),
            parent.name()
        ))),
    }
}

/// Link for a bare child name: a foreign key on the parent named `name` or `name_id`.
/// Returns the referenced entity type name with the link.
pub fn infer_to_one(parent: &EntityType, name: &str) -> Option<(String, ChildLink)> {
    let id_field = format!("{}_id", name);
    parent
        .foreign_keys()
        .iter()
        .find(|fk| fk.field == name || fk.field == id_field)
        .map(|fk| {
            (
                fk.references_entity.clone(),
                ChildLink::ToOne {
                    field: fk.field.clone(),
                    references_field: fk.references_field.clone(),
                },
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityCatalog;
    use std::sync::Arc;

    fn catalog() -> EntityCatalog {
        let mut c = EntityCatalog::new();
        for e in [
            EntityType::builder("User").build(),
            EntityType::builder("Widget")
                .foreign_key("owner_id", "User", "id")
                .foreign_key("maker_id", "User", "id")
                .build(),
            EntityType::builder("Tag").build(),
            EntityType::builder("Order").foreign_key("user_id", "User", "id").build(),
            EntityType::builder("WidgetTag")
                .foreign_key("widget_id", "Widget", "id")
                .foreign_key("tag_id", "Tag", "id")
                .build(),
        ] {
            c.register(Arc::new(e)).unwrap();
        }
        c
    }

    fn get(c: &EntityCatalog, name: &str) -> Arc<EntityType> {
        c.get(name).unwrap().clone()
    }

    #[test]
    fn single_foreign_key_is_a_direct_link() {
        let c = catalog();
        let link = infer_collection_link(&c, &get(&c, "User"), &get(&c, "Order"), None, None).unwrap();
        assert!(matches!(link, ChildLink::Direct { ref foreign_key } if foreign_key == "user_id"));
    }

    #[test]
    fn ambiguous_foreign_keys_need_disambiguation() {
        let c = catalog();
        let (user, widget) = (get(&c, "User"), get(&c, "Widget"));
        assert!(matches!(
            infer_collection_link(&c, &user, &widget, None, None),
            Err(ConfigError::ForeignKey(_))
        ));
        let link = infer_collection_link(&c, &user, &widget, None, Some("maker_id")).unwrap();
        assert!(matches!(link, ChildLink::Direct { ref foreign_key } if foreign_key == "maker_id"));
        assert!(infer_collection_link(&c, &user, &widget, None, Some("nope")).is_err());
    }

    #[test]
    fn many_to_many_goes_through_the_join_entity() {
        let c = catalog();
        let (widget, tag, join) = (get(&c, "Widget"), get(&c, "Tag"), get(&c, "WidgetTag"));
        let link = infer_collection_link(&c, &widget, &tag, Some(&join), None).unwrap();
        match link {
            ChildLink::ManyToMany {
                join,
                parent_fk,
                child_fk,
            } => assert_eq!((join.as_str(), parent_fk.as_str(), child_fk.as_str()), ("WidgetTag", "widget_id", "tag_id")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(infer_collection_link(&c, &widget, &tag, None, None).is_err());
        // Order has no key to Tag.
        assert!(infer_collection_link(&c, &widget, &tag, Some(&get(&c, "Order")), None).is_err());
    }

    #[test]
    fn bare_names_follow_parent_keys() {
        let c = catalog();
        let (entity, link) = infer_to_one(&get(&c, "Widget"), "owner").unwrap();
        assert_eq!(entity, "User");
        assert!(matches!(link, ChildLink::ToOne { ref field, .. } if field == "owner_id"));
        assert!(infer_to_one(&get(&c, "Widget"), "colour").is_none());
    }
}
