// vigil-core/src/infrastructure/mod.rs

pub mod adapters;
pub mod binder;
pub mod config;
pub mod error;
pub mod store;
