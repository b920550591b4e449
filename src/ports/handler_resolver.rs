//! HandlerResolver port - Produces handler instances for each message.
//!
//! The bus opens one [`ResolutionScope`] per delivered message, resolves every
//! subscribed handler type from it and drops it after dispatch. Instances
//! resolved from the same scope may be shared; instances from different
//! scopes should not be assumed to be.

use crate::domain::subscriptions::{HandlerInstance, HandlerType};

/// Source of per-message resolution scopes.
pub trait HandlerResolver: Send + Sync {
    fn begin_scope(&self) -> Box<dyn ResolutionScope>;
}

/// Lifetime boundary for handler instances of one message.
pub trait ResolutionScope: Send {
    /// Instance of `handler_type`, or `None` if it is not registered.
    ///
    /// The instance must downcast to the concrete handler type.
    fn resolve(&mut self, handler_type: HandlerType) -> Option<HandlerInstance>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_resolver_object_safe(_: &dyn HandlerResolver) {}

    #[allow(dead_code)]
    fn assert_scope_object_safe(_: &dyn ResolutionScope) {}
}
