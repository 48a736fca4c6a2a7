//! Tributary core library: domain types, root settings, root registry, errors.
//!
//! - [`types`]: transactions, change records, patch operations, promotions
//! - [`settings`]: [`RootSettings`] and validation
//! - [`registry`]: load / save / list roots under `~/.tributary/roots`
//! - [`error`]: [`ConfigError`]

pub mod error;
pub mod registry;
pub mod settings;
pub mod types;

pub use error::ConfigError;
pub use settings::{InvalidProperty, RootSettings};
pub use types::{
    normalize_element_path, ChangeKind, ChangeRecord, DepotName, ElementStatus, FeedChange,
    FeedEntry, FeedSide, ModificationBatch, PatchOperation, PendingPromotion, PendingTransaction,
    StreamName, Transaction, TransactionRef, TxId, VersionRecord, VersionRoot,
};
