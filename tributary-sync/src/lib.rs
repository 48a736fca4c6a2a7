//! # tributary-sync
//!
//! Everything between the backend boundary and the build:
//!
//! - [`walker`]: logical changes for a root and range, across the stream hierarchy
//! - [`ancestry`]: "before" versions of changed elements
//! - [`patch`]: full and incremental patches, streamed into a [`PatchSink`]
//! - [`apply`]: a [`DirectorySink`] with hash-gated atomic writes
//! - [`promote`]: promotion of pending transactions after a build
//! - [`watermark`]: last consumed transaction per root
//! - [`content`], [`label`], [`checkout`]: diffs, snapshots, agent checkouts

pub mod ancestry;
pub mod apply;
pub mod checkout;
pub mod content;
pub mod error;
pub mod label;
pub mod patch;
pub mod pipeline;
pub mod promote;
pub mod walker;
pub mod watermark;

pub use apply::{ApplyResult, DirectorySink};
pub use error::SyncError;
pub use patch::{
    build_full_patch, build_full_patch_in, build_incremental_patch, build_patch, PatchSink,
};
pub use pipeline::{collect, Collection};
pub use promote::{promote, promote_after_build, PromoteMode, PromoteOutcome};
pub use walker::collect_changes;
