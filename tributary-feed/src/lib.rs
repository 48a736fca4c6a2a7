//! tributary-feed: the backend boundary.
//!
//! - [`client`]: the [`TransactionFeed`] and [`Provisioner`] traits
//! - [`accurev`]: [`AccuRevCli`], both traits over the `accurev` executable
//! - [`memory`]: [`MemoryFeed`], both traits over scripted in-memory state
//! - [`xml`]: response parsers; [`sanitize`] fixes unescaped `&` first
//! - [`command`]: process spawning and exit-code classification

pub mod accurev;
pub mod client;
pub mod command;
pub mod error;
pub mod memory;
pub mod sanitize;
pub mod stream_table;
pub mod xml;

pub use accurev::AccuRevCli;
pub use client::{History, PromoteOutput, Provisioned, Provisioner, TransactionFeed, WorkspaceKind};
pub use error::FeedError;
pub use memory::MemoryFeed;
pub use stream_table::StreamTable;
