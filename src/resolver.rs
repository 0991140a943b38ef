//! Symbol resolution for config expressions.
//!
//! An expression is evaluated against the resolver's own bindings. When evaluation reports a
//! missing name, the name is looked up in the entity types, then the built-in library, then the
//! configured dependencies; the first hit is bound and evaluation is retried. The same name going
//! missing twice in a row means the failure comes from somewhere the bindings cannot reach.

use crate::builtins;
use crate::entity::{EntityCatalog, EntityType};
use crate::error::ConfigError;
use crate::expr::{parse_expression, Callable, EvalError, Interpreter, Term, INTRINSICS};
use std::collections::BTreeMap;

/// Resolves a single expression with no entity types in scope.
pub fn resolve(expression: &str, known_dependencies: &BTreeMap<String, Term>) -> Result<Term, ConfigError> {
    let entities = EntityCatalog::new();
    SymbolResolver::new(&entities, known_dependencies).resolve(expression)
}

/// Dependency names form one flat namespace that must not shadow built-ins, intrinsics or entity
/// types.
pub fn check_dependency_names(
    dependencies: &BTreeMap<String, Term>,
    entities: &EntityCatalog,
) -> Result<(), ConfigError> {
    for name in dependencies.keys() {
        if builtins::is_builtin(name) || INTRINSICS.contains(&name.as_str()) || entities.contains(name) {
            return Err(ConfigError::NameConflict(name.clone()));
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
enum Layer {
    EntityTypes,
    Builtins,
    Dependencies,
}

pub struct SymbolResolver<'a> {
    entities: &'a EntityCatalog,
    dependencies: &'a BTreeMap<String, Term>,
    bindings: BTreeMap<String, Term>,
}

impl<'a> SymbolResolver<'a> {
    pub fn new(entities: &'a EntityCatalog, dependencies: &'a BTreeMap<String, Term>) -> Self {
        SymbolResolver {
            entities,
            dependencies,
            bindings: BTreeMap::new(),
        }
    }

    /// Every name bound so far.
    pub fn bindings(&self) -> &BTreeMap<String, Term> {
        &self.bindings
    }

    pub fn into_bindings(self) -> BTreeMap<String, Term> {
        self.bindings
    }

    fn find(&self, name: &str) -> Option<(Layer, Term)> {
        if let Some(e) = self.entities.get(name) {
            return Some((Layer::EntityTypes, Term::Entity(e.clone())));
        }
        if let Some(t) = builtins::lookup(name) {
            return Some((Layer::Builtins, t));
        }
        self.dependencies.get(name).map(|t| (Layer::Dependencies, t.clone()))
    }

    pub fn resolve(&mut self, source: &str) -> Result<Term, ConfigError> {
        let source = source.trim();
        let expr = parse_expression(source).map_err(|e| ConfigError::Expression {
            source_text: source.to_string(),
            message: e.to_string(),
        })?;
        let mut last_missing: Option<String> = None;
        loop {
            let outcome = Interpreter::new(&self.bindings).evaluate(&expr);
            match outcome {
                Ok(Term::Callable(Callable::Closure(c))) => {
                    return Ok(Term::Callable(c.with_source(source).into()));
                }
                Ok(term) => return Ok(term),
                Err(EvalError::NameNotFound(name)) => {
                    if last_missing.as_deref() == Some(name.as_str()) {
                        return Err(ConfigError::UnresolvedSymbol {
                            symbol: name,
                            expression: source.to_string(),
                        });
                    }
                    if self.bindings.contains_key(&name) {
                        return Err(ConfigError::NameConflict(name));
                    }
                    let Some((layer, term)) = self.find(&name) else {
                        return Err(ConfigError::UnresolvedSymbol {
                            symbol: name,
                            expression: source.to_string(),
                        });
                    };
                    tracing::debug!(symbol = %name, layer = ?layer, "binding symbol");
                    self.bindings.insert(name.clone(), term);
                    last_missing = Some(name);
                }
                Err(e) => {
                    return Err(ConfigError::Expression {
                        source_text: source.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    /// Handlers may name one of the owning entity type's methods directly.
    pub fn resolve_handler(&mut self, owner: &EntityType, source: &str) -> Result<Term, ConfigError> {
        if let Some(method) = owner.method(source.trim()) {
            return Ok(Term::Callable(method.clone().into()));
        }
        self.resolve(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NativeFunction;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn deps(pairs: &[(&str, Term)]) -> BTreeMap<String, Term> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn known_dependency_resolves_to_its_value() {
        let d = deps(&[("Foo", Term::Data(json!(42)))]);
        assert_eq!(resolve("Foo", &d).unwrap().to_data().unwrap(), json!(42));
    }

    #[test]
    fn unknown_name_is_unresolved() {
        let err = resolve("Nope", &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnresolvedSymbol {
                symbol: "Nope".into(),
                expression: "Nope".into()
            }
        );
    }

    #[test]
    fn syntax_errors_are_config_errors() {
        assert!(matches!(
            resolve("lambda x: x ==", &BTreeMap::new()),
            Err(ConfigError::Expression { .. })
        ));
    }

    #[test]
    fn lookup_prefers_entity_types_over_dependencies() {
        let mut entities = EntityCatalog::new();
        entities
            .register(Arc::new(EntityType::builder("Widget").field("owner_id").build()))
            .unwrap();
        let d = deps(&[("Widget", Term::Data(json!("shadow")))]);
        let mut r = SymbolResolver::new(&entities, &d);
        assert!(matches!(r.resolve("Widget").unwrap(), Term::Entity(_)));
        assert!(matches!(r.resolve("Integer").unwrap(), Term::AttrType(_)));
    }

    #[test]
    fn lambda_free_names_are_bound_and_captured() {
        let d = deps(&[("LIMIT", Term::Data(json!(2)))]);
        let f = match resolve("lambda ctx: len(ctx.roles) <= LIMIT", &d).unwrap() {
            Term::Callable(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(f.name(), "lambda ctx: len(ctx.roles) <= LIMIT");
        let out = f.call_positional(&[Term::Data(json!({"roles": ["a", "b", "c"]}))]).unwrap();
        assert_eq!(out.to_data().unwrap(), Value::Bool(false));
    }

    #[test]
    fn repeated_missing_name_stops_the_retry_loop() {
        let broken = NativeFunction::new("broken", 0, |_| Err(EvalError::NameNotFound("helper".into())));
        let d = deps(&[
            ("broken", Term::Callable(broken.into())),
            ("helper", Term::Data(json!(1))),
        ]);
        let err = resolve("broken()", &d).unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedSymbol { ref symbol, .. } if symbol == "helper"));
    }

    #[test]
    fn handler_names_an_owner_method() {
        let owner = EntityType::builder("Widget")
            .method(NativeFunction::new("can_edit", 2, |_| Ok(Term::Data(json!(true)))))
            .build();
        let entities = EntityCatalog::new();
        let d = BTreeMap::new();
        let mut r = SymbolResolver::new(&entities, &d);
        match r.resolve_handler(&owner, "can_edit").unwrap() {
            Term::Callable(c) => assert_eq!(c.arity(), Some(2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn dependency_names_may_not_shadow_builtins() {
        let d = deps(&[("IntegerValidator", Term::Data(json!(1)))]);
        assert_eq!(
            check_dependency_names(&d, &EntityCatalog::new()).unwrap_err(),
            ConfigError::NameConflict("IntegerValidator".into())
        );
        let ok = deps(&[("helpers", Term::Data(json!(1)))]);
        assert!(check_dependency_names(&ok, &EntityCatalog::new()).is_ok());
    }
}
