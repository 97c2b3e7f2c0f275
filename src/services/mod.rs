//! Request-scoped business logic behind the HTTP handlers.

pub mod aggregator;

pub use aggregator::{AggregateError, Aggregator};
