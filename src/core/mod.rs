// Core modules shared by every layer: error modeling.
pub mod error;
