use crate::loader::{CodeUnit, UnitResolver};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a fresh copy of a unit for every load
pub type UnitFactory = Arc<dyn Fn() -> CodeUnit + Send + Sync>;

/// Resolver backed by named unit factories
#[derive(Clone, Default)]
pub struct UnitRegistry {
    factories: BTreeMap<String, UnitFactory>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, identifier: &str, factory: F) -> &mut Self
    where
        F: Fn() -> CodeUnit + Send + Sync + 'static,
    {
        self.factories
            .insert(identifier.to_string(), Arc::new(factory));
        self
    }

    pub fn with_unit<F>(mut self, identifier: &str, factory: F) -> Self
    where
        F: Fn() -> CodeUnit + Send + Sync + 'static,
    {
        self.register(identifier, factory);
        self
    }

    /// Registered identifiers, sorted
    pub fn identifiers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl UnitResolver for UnitRegistry {
    fn resolve(&self, identifier: &str) -> Result<CodeUnit, String> {
        match self.factories.get(identifier) {
            Some(factory) => Ok(factory()),
            None => Err(format!(
                "no code unit named '{}' (known: {})",
                identifier,
                self.identifiers().join(", ")
            )),
        }
    }
}
