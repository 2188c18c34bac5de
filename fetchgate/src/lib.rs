//! Single-flight fetch coalescing and progress tracking.
//!
//! `fetchgate` sits between request handlers and a slow retrieval
//! subsystem. Concurrent requests for the same content under equivalent
//! options share one in-flight fetch; every caller observes its progress
//! through immutable snapshots, awaits completion through waiters, or
//! subscribes to coarse notifications through listeners. Entries persist
//! for a grace period after their last observer leaves so a page reload
//! rejoins the same fetch instead of restarting it.
//!
//! # Architecture
//!
//! ```text
//! handlers ──► FetchRegistry ──► FetchEntry ──► snapshots / waiters / listeners
//!                   │                ▲
//!                   │                │ events
//!              LocalStore      Retriever
//!              ContentFilter
//! ```
//!
//! The local store and content filter resolve fetches without touching the
//! network where possible; the retriever is only consulted when they
//! cannot.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fetchgate::key::ContentKey;
//! use fetchgate::options::FetchOptions;
//! use fetchgate::registry::{FetchRegistry, RegistryConfig};
//! # use fetchgate::{filter::ContentFilter, retriever::Retriever, store::LocalStore};
//! # async fn example(
//! #     store: Arc<dyn LocalStore>,
//! #     filter: Arc<dyn ContentFilter>,
//! #     retriever: Arc<dyn Retriever>,
//! # ) {
//! let registry = FetchRegistry::new(store, filter, retriever, RegistryConfig::default());
//!
//! let entry = registry.join_or_create(
//!     &ContentKey::immutable("CHK@example"),
//!     &FetchOptions::default(),
//! );
//! let snapshot = entry.waiter().join().await;
//! if let Some(payload) = snapshot.payload() {
//!     println!("{} bytes of {}", payload.len(), snapshot.mime().unwrap_or("?"));
//! }
//! # }
//! ```

pub mod entry;
pub mod error;
pub mod filter;
pub mod key;
pub mod mime;
pub mod options;
pub mod payload;
pub mod registry;
pub mod retriever;
pub mod store;

/// Crate version from the package manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
