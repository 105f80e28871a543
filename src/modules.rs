//! Named shared values preloaded once at startup and handed to every handler
//! invocation.
//!
//! The embedding program registers factories on a [`ModuleRegistry`]; the
//! configured preload list picks which of them are built. A preload name with
//! no registration is a startup error.

use crate::error::ConfigError;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Module = Arc<dyn Any + Send + Sync>;
type Factory = Box<dyn Fn() -> Module + Send + Sync>;

/// Catalog of modules that may be preloaded
#[derive(Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, Factory>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ModuleRegistry").field("names", &names).finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any earlier registration.
    pub fn register<T, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factories
            .insert(name.into(), Box::new(move || Arc::new(factory()) as Module));
        self
    }

    /// Register an already-built value; every preload shares it.
    pub fn register_value<T>(&mut self, name: impl Into<String>, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        let value: Module = Arc::new(value);
        self.factories
            .insert(name.into(), Box::new(move || Arc::clone(&value)));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the modules named in `names`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownModule`] for the first name with no registration.
    pub fn preload(&self, names: &[String]) -> Result<Modules, ConfigError> {
        let mut loaded = HashMap::with_capacity(names.len());
        for name in names {
            let factory = self
                .factories
                .get(name)
                .ok_or_else(|| ConfigError::UnknownModule { name: name.clone() })?;
            loaded.insert(name.clone(), factory());
        }
        Ok(Modules { loaded })
    }
}

/// Modules loaded at startup, shared read-only by every worker
#[derive(Default)]
pub struct Modules {
    loaded: HashMap<String, Module>,
}

impl fmt::Debug for Modules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Modules").field("loaded", &names).finish()
    }
}

impl Modules {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The module named `name`, if loaded and of type `T`
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let module = Arc::clone(self.loaded.get(name)?);
        module.downcast::<T>().ok()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.loaded.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }
}
