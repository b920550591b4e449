//! Handler resolution adapters.

mod factory;

pub use factory::FactoryResolver;
