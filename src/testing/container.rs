//! Capability registry for scenario dependencies
//!
//! Scenarios declare the capabilities they need by name; the runner resolves
//! them against a [`Container`] built by the caller. There is no global
//! container.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{Error, Result};

type Shared = Arc<dyn Any + Send + Sync>;

enum Provider {
    /// The same value for every scenario
    Instance(Shared),
    /// A fresh value per resolution
    Factory(Arc<dyn Fn() -> Shared + Send + Sync>),
}

/// Capability name → provider
#[derive(Default)]
pub struct Container {
    providers: HashMap<String, Provider>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared instance for `capability`
    pub fn instance<T: Any + Send + Sync>(mut self, capability: &str, value: T) -> Self {
        self.providers
            .insert(capability.to_string(), Provider::Instance(Arc::new(value)));
        self
    }

    /// Register a factory producing a new value each time `capability` is resolved
    pub fn factory<T, F>(mut self, capability: &str, make: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let make: Arc<dyn Fn() -> Shared + Send + Sync> = Arc::new(move || Arc::new(make()) as Shared);
        self.providers
            .insert(capability.to_string(), Provider::Factory(make));
        self
    }

    /// Resolve every requested capability, failing on the first unknown one
    pub fn resolve<S: AsRef<str>>(&self, requires: &[S]) -> Result<Dependencies> {
        let mut resolved = HashMap::with_capacity(requires.len());
        for capability in requires {
            let capability = capability.as_ref();
            let value = match self.providers.get(capability) {
                Some(Provider::Instance(value)) => Arc::clone(value),
                Some(Provider::Factory(make)) => make(),
                None => return Err(Error::UnresolvedDependency(capability.to_string())),
            };
            resolved.insert(capability.to_string(), value);
        }
        Ok(Dependencies { resolved })
    }
}

/// Capabilities resolved for one scenario
#[derive(Default, Clone)]
pub struct Dependencies {
    resolved: HashMap<String, Shared>,
}

impl Dependencies {
    /// Typed access to a resolved capability
    pub fn get<T: Any + Send + Sync>(&self, capability: &str) -> Result<Arc<T>> {
        let value = self
            .resolved
            .get(capability)
            .ok_or_else(|| Error::UnresolvedDependency(capability.to_string()))?;
        Arc::clone(value)
            .downcast::<T>()
            .map_err(|_| Error::DependencyType {
                capability: capability.to_string(),
                expected: type_name::<T>().to_string(),
            })
    }

    /// A resolved capability as text, when it was registered as a `String`
    pub fn text(&self, capability: &str) -> Option<String> {
        self.resolved
            .get(capability)
            .and_then(|v| v.downcast_ref::<String>())
            .cloned()
    }

    /// Replace `${capability}` placeholders with resolved text capabilities
    ///
    /// Unknown placeholders are left as written.
    pub fn expand(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.text(name) {
                        Some(value) => out.push_str(&value),
                        None => out.push_str(&rest[start..start + 2 + end + 1]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}
