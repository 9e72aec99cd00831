//! Artifact Ingestion Service
//!
//! Publishes artifacts into the shared namespace from three triggers:
//!
//! - `POST /ingest` with `{"key": ...}`: fetch the object from the origin bucket
//! - `POST /ingest` with `{"data": ..., "filename": ...}`: publish the payload itself
//! - `POST /notifications/s3`: publish the object named by an object-created event
//!
//! ```text
//! request ──▶ IngestRequest::parse ──▶ IngestionService ──▶ namespace::publish
//!                                            │                    │
//!                                            ▼                    ▼
//!                                       ObjectStore          IdentityIndex
//! ```
//!
//! A key that is already published is answered from the namespace without
//! touching the object store, and keeps the identifier of its first publish.

pub mod config;
pub mod request;
pub mod routes;
pub mod service;

pub use config::IngestConfig;
pub use request::{IngestRequest, ObjectCreated};
pub use routes::{create_router, AppState};
pub use service::{IngestReceipt, IngestionError, IngestionService};
