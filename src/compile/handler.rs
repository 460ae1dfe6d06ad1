//! 外部迁移处理器：迁移可以声明一个处理器名，展平时按名实例化。
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::exec::ExecutableNet;
use crate::net::State;

/// Contract of a handler attached to a transition.
///
/// `set_context` and `set_executable_net` are called once, right after
/// flattening; `fire` runs every time the transition fires forward, after
/// the new marking is in place.
pub trait ExternalTransition: Send {
    fn set_context(&mut self, context: &Value);

    fn set_executable_net(&mut self, net: &ExecutableNet);

    fn fire(&mut self, transition: &str, state: &State) -> Result<(), String>;
}

type Factory = Arc<dyn Fn() -> Result<Box<dyn ExternalTransition>, String> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    factory: Factory,
    context: Value,
}

/// Handler factories by name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn ExternalTransition>, String> + Send + Sync + 'static,
    {
        self.register_with_context(name, Value::Null, factory);
    }

    pub fn register_with_context<F>(&mut self, name: impl Into<String>, context: Value, factory: F)
    where
        F: Fn() -> Result<Box<dyn ExternalTransition>, String> + Send + Sync + 'static,
    {
        self.handlers.insert(
            name.into(),
            Registration {
                factory: Arc::new(factory),
                context,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Builds a handler and hands it its context.
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn ExternalTransition>, String> {
        let registration = self
            .handlers
            .get(name)
            .ok_or_else(|| format!("no handler registered under `{name}`"))?;
        let mut handler = (registration.factory)()?;
        handler.set_context(&registration.context);
        Ok(handler)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl ExternalTransition for Noop {
        fn set_context(&mut self, _context: &Value) {}

        fn set_executable_net(&mut self, _net: &ExecutableNet) {}

        fn fire(&mut self, _transition: &str, _state: &State) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn unknown_and_failing_factories_are_errors() {
        let mut registry = HandlerRegistry::new();
        registry.register("noop", || Ok(Box::new(Noop) as Box<dyn ExternalTransition>));
        registry.register("broken", || Err("constructor failed".to_string()));

        assert!(registry.instantiate("noop").is_ok());
        assert_eq!(registry.instantiate("broken").err(), Some("constructor failed".to_string()));
        assert!(registry.instantiate("missing").is_err());
        assert!(registry.contains("noop"));
    }
}
