//! mirror-core: Runtime-free building blocks for a live tree mirror.
//!
//! This crate provides:
//! - The tree mirror and its pure merge functions
//! - Path algebra and the expanded-directory tracker
//! - Block-level change detection (LCS) for highlighting
//! - The push-channel wire protocol and build-version guard
//! - A snapshot store with subscriptions
//! - The `TreeApi` abstraction over the server

pub mod api;
pub mod delta;
pub mod expansion;
pub mod models;
pub mod path;
pub mod protocol;
pub mod store;
pub mod tree;

pub use api::{ApiCall, ApiError, InMemoryTreeApi, TreeApi};
pub use delta::{changed_blocks, BlockSignature};
pub use expansion::ExpandedSet;
pub use models::{CommitInfo, FileContent, GitStatus, RecentFile};
pub use protocol::{PushMessage, VersionCheck, VersionGuard};
pub use store::{Store, Subscription};
pub use tree::{Listing, MergeError, RefreshBatch, TreeMirror, TreeNode};
