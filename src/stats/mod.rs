//! Statistics and metrics
//!
//! Provides observability into chunk stream connections.

pub mod metrics;

pub use metrics::ConnectionStats;
