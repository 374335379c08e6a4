// vigil-core/src/domain/mod.rs

pub mod compiler;
pub mod error;
pub mod scan;

// Re-exports pratiques pour simplifier les imports ailleurs
pub use error::DomainError;
