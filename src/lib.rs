//! Umbrella crate for query-runner integration tests
pub use queryrunner_core::*;
