//! mirror-client: keeps a lazily-loaded mirror of a server's file tree live.
//!
//! The engine listens on the server's push channel, batches change notifications,
//! refreshes the affected parts of the mirror and publishes one snapshot per change.

pub mod aggregator;
pub mod coalescer;
pub mod config;
pub mod engine;
pub mod highlight;
pub mod http;
pub mod reconciler;
pub mod state;
pub mod timer;
pub mod transport;

use mirror_core::TreeApi;
use std::sync::Arc;

/// The tree API as shared between engine components.
pub type SharedApi = Arc<dyn TreeApi>;

// Re-export key types for convenience
pub use aggregator::{ChangeAggregator, ChangeBatch, PendingChanges};
pub use coalescer::{Fetched, RequestCoalescer};
pub use config::{ConfigError, EngineConfig, ReconnectConfig, ServerConfig};
pub use engine::{EngineExit, LiveEngine};
pub use highlight::BlockHighlighter;
pub use http::HttpTreeApi;
pub use reconciler::TreeReconciler;
pub use state::{RecentState, ViewKind, ViewState};
pub use transport::{ChangeTransport, ConnectionState, TransportEvent, TransportHandle};
