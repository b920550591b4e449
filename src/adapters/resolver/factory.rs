//! Factory-based handler resolver.
//!
//! Handler types are registered with a factory closure. Each resolution scope
//! calls a factory at most once per handler type and reuses the instance for
//! the rest of the scope, so every message gets fresh handlers.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::subscriptions::{HandlerInstance, HandlerType};
use crate::ports::{HandlerResolver, ResolutionScope};

type Factory = Arc<dyn Fn() -> HandlerInstance + Send + Sync>;

/// Resolver backed by per-type factory closures.
///
/// # Example
///
/// ```ignore
/// let resolver = FactoryResolver::new()
///     .register(|| Billing::new(ledger.clone()))
///     .register_shared(Arc::new(AuditLog::default()));
/// ```
#[derive(Default, Clone)]
pub struct FactoryResolver {
    factories: HashMap<TypeId, Factory>,
}

impl FactoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory producing a new `H` per scope.
    pub fn register<H, F>(mut self, factory: F) -> Self
    where
        H: Any + Send + Sync,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Arc::new(factory()) as HandlerInstance);
        self.factories.insert(TypeId::of::<H>(), factory);
        self
    }

    /// Registers one instance shared by every scope.
    pub fn register_shared<H>(mut self, instance: Arc<H>) -> Self
    where
        H: Any + Send + Sync,
    {
        let factory: Factory = Arc::new(move || instance.clone() as HandlerInstance);
        self.factories.insert(TypeId::of::<H>(), factory);
        self
    }

    /// Whether a factory exists for `handler_type`.
    pub fn is_registered(&self, handler_type: HandlerType) -> bool {
        self.factories.contains_key(&handler_type.id())
    }
}

impl HandlerResolver for FactoryResolver {
    fn begin_scope(&self) -> Box<dyn ResolutionScope> {
        Box::new(FactoryScope {
            factories: self.factories.clone(),
            resolved: HashMap::new(),
        })
    }
}

struct FactoryScope {
    factories: HashMap<TypeId, Factory>,
    resolved: HashMap<TypeId, HandlerInstance>,
}

impl ResolutionScope for FactoryScope {
    fn resolve(&mut self, handler_type: HandlerType) -> Option<HandlerInstance> {
        if let Some(instance) = self.resolved.get(&handler_type.id()) {
            return Some(instance.clone());
        }

        let instance = (self.factories.get(&handler_type.id())?)();
        self.resolved.insert(handler_type.id(), instance.clone());
        Some(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(usize);
    struct Unregistered;

    fn counting_resolver(created: Arc<AtomicUsize>) -> FactoryResolver {
        FactoryResolver::new().register(move || Counter(created.fetch_add(1, Ordering::SeqCst)))
    }

    #[test]
    fn resolves_registered_type() {
        let resolver = counting_resolver(Arc::new(AtomicUsize::new(0)));
        let mut scope = resolver.begin_scope();

        let instance = scope.resolve(HandlerType::of::<Counter>()).unwrap();

        assert!(instance.downcast::<Counter>().is_ok());
    }

    #[test]
    fn unregistered_type_resolves_to_none() {
        let resolver = FactoryResolver::new();
        let mut scope = resolver.begin_scope();

        assert!(scope.resolve(HandlerType::of::<Unregistered>()).is_none());
        assert!(!resolver.is_registered(HandlerType::of::<Unregistered>()));
    }

    #[test]
    fn scope_reuses_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let resolver = counting_resolver(created.clone());
        let mut scope = resolver.begin_scope();

        let first = scope.resolve(HandlerType::of::<Counter>()).unwrap();
        let second = scope.resolve(HandlerType::of::<Counter>()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_scope_gets_a_fresh_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let resolver = counting_resolver(created.clone());

        let a = resolver.begin_scope().resolve(HandlerType::of::<Counter>()).unwrap();
        let b = resolver.begin_scope().resolve(HandlerType::of::<Counter>()).unwrap();

        assert_eq!(a.downcast::<Counter>().unwrap().0, 0);
        assert_eq!(b.downcast::<Counter>().unwrap().0, 1);
    }

    #[test]
    fn shared_instance_is_the_same_across_scopes() {
        let shared = Arc::new(Counter(7));
        let resolver = FactoryResolver::new().register_shared(shared.clone());

        let resolved = resolver
            .begin_scope()
            .resolve(HandlerType::of::<Counter>())
            .unwrap()
            .downcast::<Counter>()
            .unwrap();

        assert!(Arc::ptr_eq(&resolved, &shared));
    }
}
