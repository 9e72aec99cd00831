//! Artifact Processing Service
//!
//! `POST /predict` with `{"fileId": ..., "model": ...}` loads a published
//! artifact from the shared namespace, computes its digest and writes a
//! result record to `outputs/<fileId>.result`. When archiving is enabled the
//! record is also mirrored to the object store on a best-effort basis.
//!
//! `fileId` may be either a logical key (`models/foo.bin`) or an identifier
//! returned by the ingestion service.

pub mod config;
pub mod request;
pub mod routes;
pub mod service;

pub use config::ProcessorConfig;
pub use request::PredictRequest;
pub use routes::{create_router, AppState};
pub use service::{Archive, ProcessOutcome, ProcessingError, ProcessingService, ResultRecord};
