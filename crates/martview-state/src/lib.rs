//! martview-state — metadata store for martview.
//!
//! Backed by [redb](https://docs.rs/redb), persists the derived-view
//! catalog, the operation log, refresh history and data-quality issues.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! The catalog is keyed by view name and is the only table updated in place;
//! the other three are append-mostly and keyed by a `u64` sequence, so
//! iterating them backwards yields most-recent-first.
//!
//! The `MetadataStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::MetadataStore;
pub use types::*;
