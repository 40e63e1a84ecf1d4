//! histpage-io: Paged, file-backed histogram workspaces.
//!
//! A [`ManagedWorkspace`] keeps only a bounded number of fixed-size
//! [`DataBlock`]s resident. Clean blocks are reloaded from their
//! [`SpectrumSource`]; modified blocks are flushed to a [`BlockStore`]
//! before eviction and reloaded from there afterwards.
//!

mod block;
pub mod cache;
pub mod config;
mod error;
mod lru;
mod shared_x;
pub mod source;
pub mod store;
mod workspace;

pub use block::{BlockPartsMut, DataBlock};
pub use cache::{BlockCache, CacheStats};
pub use config::{MemoryConfig, PagingPlan};
pub use error::{Error, Result};
pub use lru::LruOrder;
pub use shared_x::SharedXTable;
pub use source::{RawCountsFile, RawLayout, SpectrumSource, ZeroSource};
pub use store::{BlockStore, TempBlockStore};
pub use workspace::ManagedWorkspace;
