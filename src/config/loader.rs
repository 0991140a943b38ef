//! Load a configuration document (YAML or JSON) into a frozen registry.

use crate::config::parser::SchemaParser;
use crate::config::types::{DependencyImport, RawConfig};
use crate::entity::{EntityCatalog, ModuleCatalog};
use crate::error::ConfigError;
use crate::expr::Term;
use crate::registry::{RegistryBuilder, RegistryContext};
use crate::resolver::check_dependency_names;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Parses `text` as YAML (a superset of JSON) and loads it.
pub fn load_from_str(text: &str, modules: &ModuleCatalog) -> Result<RegistryContext, ConfigError> {
    let document: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
    load_document(document, modules)
}

/// Reads the file at `path`; `.json` files are parsed as JSON, anything else as YAML.
pub fn load_from_path(path: impl AsRef<Path>, modules: &ModuleCatalog) -> Result<RegistryContext, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    tracing::info!(path = %path.display(), "loading resource configuration");
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let document: Value = serde_json::from_str(&text).map_err(|e| ConfigError::Load(e.to_string()))?;
        return load_document(document, modules);
    }
    load_from_str(&text, modules)
}

pub fn load_document(document: Value, modules: &ModuleCatalog) -> Result<RegistryContext, ConfigError> {
    let raw = RawConfig::from_value(document)?;
    let entities = load_entities(&raw.resource_modules, modules)?;
    let dependencies = load_dependencies(&raw, modules)?;
    check_dependency_names(&dependencies, &entities)?;

    let mut parser = SchemaParser::new(&entities, &dependencies);
    let schemas = parser.parse(&raw.resources)?;
    let symbols = parser.into_symbols();

    let mut builder = RegistryBuilder::new(entities);
    for schema in schemas {
        builder.add(schema)?;
    }
    let registry = builder.symbols(dependencies).symbols(symbols).build();
    tracing::info!(
        resources = %registry.entity_names().collect::<Vec<_>>().join(", "),
        "loaded resources"
    );
    Ok(registry)
}

/// Registers the entity types of every listed module.
pub fn load_entities(names: &[String], modules: &ModuleCatalog) -> Result<EntityCatalog, ConfigError> {
    let mut entities = EntityCatalog::new();
    for name in names {
        let module = modules
            .get(name.trim())
            .ok_or_else(|| ConfigError::UnknownModule(name.clone()))?;
        for entity in module.entities() {
            entities.register(Arc::clone(entity))?;
        }
    }
    Ok(entities)
}

fn bind(dependencies: &mut BTreeMap<String, Term>, name: String, term: Term, spec: &str) {
    if dependencies.contains_key(&name) {
        tracing::warn!(import = %spec, name = %name, "import conflicts with an existing import and overwrites it");
    }
    dependencies.insert(name, term);
}

/// Flat name → term map from the `dependencies` list.
pub fn load_dependencies(raw: &RawConfig, modules: &ModuleCatalog) -> Result<BTreeMap<String, Term>, ConfigError> {
    let mut dependencies = BTreeMap::new();
    for spec in &raw.dependencies {
        match spec.import()? {
            DependencyImport::Module(path) => {
                let root = path.split('.').next().unwrap_or(path.as_str()).to_string();
                if modules.namespace(&path).is_none() {
                    return Err(ConfigError::UnknownModule(path));
                }
                let namespace = modules
                    .namespace(&root)
                    .ok_or_else(|| ConfigError::UnknownModule(root.clone()))?;
                bind(&mut dependencies, root, Term::Namespace(Arc::new(namespace)), &path);
            }
            DependencyImport::Symbols { module, symbols } => {
                let namespace = modules
                    .namespace(&module)
                    .ok_or_else(|| ConfigError::UnknownModule(module.clone()))?;
                for symbol in symbols {
                    let term = namespace.get(&symbol).cloned().ok_or_else(|| ConfigError::UnresolvedSymbol {
                        symbol: symbol.clone(),
                        expression: format!("{}: {}", module, symbol),
                    })?;
                    bind(&mut dependencies, symbol, term, &module);
                }
            }
        }
    }
    Ok(dependencies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityType, Module};
    use crate::expr::NativeFunction;
    use serde_json::json;

    fn modules() -> ModuleCatalog {
        ModuleCatalog::new()
            .register(Module::new("shop").entity(EntityType::builder("Widget").fields(["name"]).build()))
            .register(
                Module::new("shop.rules")
                    .function(NativeFunction::new("always", 0, |_| Ok(Term::Data(json!(true)))))
                    .symbol("LIMIT", Term::Data(json!(3))),
            )
    }

    fn raw(deps: Value) -> RawConfig {
        RawConfig::from_value(json!({"resource_modules": ["shop"], "dependencies": deps, "resources": {}})).unwrap()
    }

    #[test]
    fn dotted_import_binds_the_root_namespace() {
        let deps = load_dependencies(&raw(json!(["shop.rules"])), &modules()).unwrap();
        assert!(matches!(deps.get("shop"), Some(Term::Namespace(_))));
    }

    #[test]
    fn from_import_binds_each_symbol() {
        let deps = load_dependencies(&raw(json!(["shop.rules: always, LIMIT"])), &modules()).unwrap();
        assert!(matches!(deps.get("always"), Some(Term::Callable(_))));
        assert_eq!(deps.get("LIMIT").and_then(Term::as_data), Some(&json!(3)));
        let err = load_dependencies(&raw(json!([{"shop.rules": "missing"}])), &modules()).unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedSymbol { ref symbol, .. } if symbol == "missing"));
    }

    #[test]
    fn unknown_modules_fail() {
        assert_eq!(
            load_dependencies(&raw(json!(["nowhere"])), &modules()).unwrap_err(),
            ConfigError::UnknownModule("nowhere".into())
        );
        assert_eq!(
            load_entities(&["nowhere".into()], &modules()).unwrap_err(),
            ConfigError::UnknownModule("nowhere".into())
        );
    }

    #[test]
    fn yaml_document_loads() {
        let yaml = r#"
resource_modules: [shop]
dependencies:
  - "shop.rules: always"
resources:
  widgets:
    class: Widget
    auth: always
    attrs:
      - name: {type: "String(max_len=20)"}
    list: {}
"#;
        let registry = load_from_str(yaml, &modules()).unwrap();
        assert_eq!(registry.root_collections(), vec!["widgets"]);
        assert!(registry.symbols().contains_key("always"));
    }

    #[test]
    fn loads_from_a_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "resource_modules: [shop]\nresources:\n  widgets:\n    class: Widget\n    read: {{}}").unwrap();
        let registry = load_from_path(file.path(), &modules()).unwrap();
        assert_eq!(registry.collection_to_entity("widgets"), Some("Widget"));

        let err = load_from_path(file.path().with_extension("missing"), &modules()).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
