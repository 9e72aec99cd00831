//! Artifact Storage
//!
//! Shared building blocks for the artifact ingestion and processing services.
//! Both services mount the same namespace and talk to the same object store;
//! this crate owns everything they have in common.
//!
//! ## Architecture
//!
//! ```text
//!  Object store                Shared namespace                 Object store
//! ┌──────────────┐  ingest   ┌───────────────────┐  process   ┌──────────────┐
//! │ origin       │──────────▶│ models/ inputs/   │──────────▶│ outputs/     │
//! │ bucket       │           │ outputs/ .index/  │  (result)  │ (archive)    │
//! └──────────────┘           └───────────────────┘            └──────────────┘
//!        ▲                            ▲
//!        │ inline data                │ atomic publish
//!  ┌─────┴──────┐              ┌──────┴──────┐
//!  │ Ingestion  │              │ Processing  │
//!  │ service    │              │ service     │
//!  └────────────┘              └─────────────┘
//! ```
//!
//! - [`namespace`]: path derivation, layout initialization, atomic publish
//! - [`identity`]: artifact identifiers and the identifier index
//! - [`digest`]: the deterministic artifact summary
//! - [`object_store`]: the object store seam and its S3 implementation
//! - [`http`]: request correlation and the shared error envelope
//! - [`config`] / [`telemetry`]: layered configuration, logging, metrics

pub mod config;
pub mod digest;
pub mod http;
pub mod identity;
pub mod namespace;
pub mod object_store;
pub mod telemetry;

pub use config::{ApiConfig, NamespaceConfig, S3Config, ServiceConfig};
pub use digest::{summarize, ArtifactDigest};
pub use http::{ErrorEnvelope, RequestContext, RequestId};
pub use identity::{fresh_id, replay_id, IdentityIndex};
pub use namespace::{
    ArtifactPath, Category, KeyError, Namespace, NamespaceError, PublishMode, PublishOutcome,
};
pub use object_store::{ObjectStore, ObjectStoreError, S3ObjectStore};
