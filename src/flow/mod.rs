pub mod correlation;
pub mod field;
pub mod matcher;

pub use correlation::CorrelationMethod;
pub use field::{DisplacementVector, VectorField};
pub use matcher::{estimate, BlockMatcher};
