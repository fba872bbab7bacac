//! galena-triage - Backup extraction and normalization pipeline
//!
//! Turns a readable, already-decrypted mobile backup container (iOS
//! hashed-blob store, Android extraction tree, or a ZIP of either) into
//! a canonical artifact store: contacts, messages, calls, app
//! inventory, permissions, browsing history, photos, and accounts —
//! timestamp-normalized, identity-correlated, and scene-classified.
//!
//! The library surface is [`pipeline::TriagePipeline`] in, an
//! [`store::ArtifactStore`] out; the bundled binary is a thin CLI over
//! exactly that surface.

pub mod adapters;
pub mod classify;
pub mod container;
pub mod correlate;
pub mod pipeline;
pub mod store;

pub use pipeline::{TriagePipeline, TriageRun};
pub use store::{ArtifactFilter, ArtifactStore, SortKey};
