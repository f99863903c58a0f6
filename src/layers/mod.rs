pub mod dense;
pub mod initialization;

pub use dense::{DenseCache, DenseLayer};
pub use initialization::WeightInit;
