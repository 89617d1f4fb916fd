// core.rs splits chain responsibilities into submodules: data types, the
// block tree collaborator and validation.
pub mod chain;
pub mod tree;
pub mod validation;

pub use chain::*;
pub use tree::*;
pub use validation::*;
