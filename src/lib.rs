//! # pgharness
//!
//! Latency sampling and ORM conformance checks for databases that speak
//! the PostgreSQL wire protocol.
//!
//! ## Latency sampler
//!
//! ```rust,ignore
//! use pgharness::prelude::*;
//!
//! let report = run_client_lib(
//!     "postgres://localhost:5432/bench",
//!     "SELECT col_varchar FROM latency_test WHERE col_bigint=$1",
//!     1000, // operations per client
//!     16,   // clients
//! )
//! .await?;
//!
//! // One sample per query, laid out as client * operations + operation.
//! assert_eq!(report.run_times().len(), 16_000);
//! ```
//!
//! ## Conformance scenarios
//!
//! ```rust,ignore
//! Scenario::NestedTransaction.run("postgres://localhost:5432/db").await?;
//! ```
//!
//! The same scenarios are exported over the C ABI (see [`ffi`]) so a test
//! runner in another language can drive them and read back an error string.

pub mod config;
pub mod conformance;
pub mod error;
pub mod ffi;
pub mod fixtures;
pub mod orm;
pub mod sampler;
pub mod stats;

pub mod prelude {
    pub use crate::config::HarnessConfig;
    pub use crate::conformance::Scenario;
    pub use crate::error::*;
    pub use crate::fixtures::{AllTypes, Blog, User};
    pub use crate::orm::{Model, Orm, SqlValue, Tx};
    pub use crate::sampler::{
        LatencyReport, LatencySampler, PgQueryRunner, QueryRunner, RowTally, WorkerOutcome,
        run_client_lib,
    };
    pub use crate::stats::LatencySummary;
}
