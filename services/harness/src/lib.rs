//! Verification harness for the artifact pipeline.
//!
//! Drives a running ingestion service and processing service over HTTP,
//! measures latencies and writes a JSON results document plus a plain-text
//! summary. See [`runner`] for the sequence of checks.

pub mod cli;
pub mod client;
pub mod report;
pub mod runner;

pub use cli::{Args, RunSettings};
pub use client::{ClientError, Exchange, ServiceClient};
pub use report::{RunResults, TestStatus};
pub use runner::Runner;
