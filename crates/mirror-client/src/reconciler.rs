//! Fetches directory listings and merges them into the published tree mirror.
//!
//! Every merge goes through the pure functions on [`TreeMirror`] and lands in the store as
//! one snapshot, however many listings it combines.

use crate::coalescer::{with_timeout, RequestCoalescer};
use crate::state::ViewState;
use crate::SharedApi;
use futures::future::join_all;
use mirror_core::api::Result;
use mirror_core::path::{self, ROOT};
use mirror_core::tree::MergeError;
use mirror_core::{Listing, RefreshBatch, Store, TreeNode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct TreeReconciler {
    api: SharedApi,
    store: Arc<Store<ViewState>>,
    listings: RequestCoalescer<String, Vec<TreeNode>>,
    timeout: Duration,
}

impl TreeReconciler {
    pub fn new(api: SharedApi, store: Arc<Store<ViewState>>, timeout: Duration) -> Self {
        Self {
            api,
            store,
            listings: RequestCoalescer::new(),
            timeout,
        }
    }

    /// Fetch one level of `dir` (bounded by the listing timeout).
    ///
    /// Non-forced calls share a listing already in flight for the same directory.
    pub async fn fetch_listing(&self, dir: &str, forced: bool) -> Result<Vec<TreeNode>> {
        let dir = path::normalize(dir);
        let api = Arc::clone(&self.api);
        let timeout = self.timeout;
        let target = dir.clone();

        self.listings
            .run(dir, forced, move || async move {
                with_timeout(timeout, api.list(&target)).await
            })
            .await
            .result
    }

    /// Load the children of `dir` and merge them.
    ///
    /// A failed or timed-out fetch resolves the directory to an empty listing so it never
    /// stays unresolved. Returns whether the directory exists in the mirror afterwards.
    pub async fn load_children(&self, dir: &str) -> bool {
        let dir = path::normalize(dir);
        let entries = match self.fetch_listing(&dir, false).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list {}: {}", path::to_wire(&dir), e);
                Vec::new()
            }
        };

        let mut applied = false;
        self.store.update(|state| {
            let tree = match state.tree.with_listing(&dir, entries) {
                Ok(tree) => tree,
                Err(e @ MergeError::ForeignEntry { .. }) => {
                    warn!("Rejecting listing for {}: {}", path::to_wire(&dir), e);
                    state.tree.with_listing(&dir, Vec::new()).ok()?
                }
                Err(e) => {
                    debug!("Dropping listing: {}", e);
                    return None;
                }
            };
            applied = true;
            Some(ViewState {
                tree,
                ..state.clone()
            })
        });
        applied
    }

    /// Re-list the root and every expanded directory in parallel, then apply all results
    /// in one mutation: root first, nested listings by ascending depth.
    ///
    /// A failed fetch keeps the directory's current children, unless it was never
    /// resolved, in which case it becomes empty.
    pub async fn refresh_expanded_subtrees(&self) {
        let expanded = self.store.snapshot().expanded.by_depth();
        debug!("Refreshing root and {} expanded dir(s)", expanded.len());

        let nested = expanded.iter().map(|dir| async move {
            let result = self.fetch_listing(dir, true).await;
            (dir.clone(), result)
        });
        let (root, nested) = futures::join!(self.fetch_listing(ROOT, true), join_all(nested));

        self.store.update(|state| {
            let mut batch = RefreshBatch::default();

            match root {
                Ok(entries) => batch.root = Some(entries),
                Err(e) => {
                    warn!("Failed to refresh root listing: {}", e);
                    if !state.tree.is_populated() {
                        batch.root = Some(Vec::new());
                    }
                }
            }

            for (dir, result) in nested {
                match result {
                    Ok(entries) => batch.nested.push(Listing::new(&dir, entries)),
                    Err(e) => {
                        warn!("Failed to refresh {}: {}", dir, e);
                        if !state.tree.is_loaded(&dir) {
                            batch.nested.push(Listing::new(&dir, Vec::new()));
                        }
                    }
                }
            }

            let (tree, dropped) = state.tree.with_batch(batch);
            for e in dropped {
                debug!("Dropped during refresh: {}", e);
            }
            if tree == state.tree {
                return None;
            }
            Some(ViewState {
                tree,
                ..state.clone()
            })
        });
    }

    /// Load every unloaded directory leading to `target`, one at a time, shallowest first.
    ///
    /// Each directory is merged before the next is requested; the chain stops at the first
    /// directory that cannot be placed in the mirror.
    pub async fn load_ancestor_chain(&self, target: &str) {
        if !self.store.snapshot().tree.is_populated() && !self.load_children(ROOT).await {
            return;
        }

        for dir in path::directory_chain(target) {
            if self.store.snapshot().tree.is_loaded(&dir) {
                continue;
            }
            if !self.load_children(&dir).await {
                debug!("Ancestor {} not found, stopping chain for {}", dir, target);
                break;
            }
        }
    }
}
