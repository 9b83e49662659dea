//! The live engine: owns the published state and wires transport, aggregator,
//! reconciler and coalescer together.

use crate::aggregator::{ChangeAggregator, ChangeBatch};
use crate::coalescer::{retry_once, RequestCoalescer};
use crate::config::EngineConfig;
use crate::highlight::{markdown_blocks, BlockHighlighter};
use crate::reconciler::TreeReconciler;
use crate::state::{ViewKind, ViewState};
use crate::timer::{ScheduledTask, TaskSlot};
use crate::transport::{ChangeTransport, TransportEvent, TransportHandle};
use crate::SharedApi;
use mirror_core::api::ApiError;
use mirror_core::path::{self, ROOT};
use mirror_core::{RecentFile, Store, Subscription};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why [`LiveEngine::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineExit {
    /// `shutdown()` was called
    Shutdown,
    /// The server build changed; the caller must discard this engine and start over
    Reload { previous: String, current: String },
}

pub struct LiveEngine {
    api: SharedApi,
    config: EngineConfig,
    repo: Option<String>,
    store: Arc<Store<ViewState>>,
    reconciler: TreeReconciler,
    recent: RequestCoalescer<(), Vec<RecentFile>>,
    recently_changed: TaskSlot,
    highlighter: BlockHighlighter,
    transport: Mutex<Option<TransportHandle>>,
    /// Set once by `shutdown()`; shared with every transport `run()` creates
    shutdown: Arc<watch::Sender<bool>>,
}

impl LiveEngine {
    /// `repo` filters push notifications on multi-repo servers.
    pub fn new(api: SharedApi, config: EngineConfig, repo: Option<String>) -> Self {
        let store = Arc::new(Store::new(ViewState::default()));
        let reconciler = TreeReconciler::new(
            Arc::clone(&api),
            Arc::clone(&store),
            config.listing_timeout,
        );
        let highlighter = BlockHighlighter::new(Arc::clone(&store), config.highlight_duration);

        Self {
            api,
            config,
            repo,
            store,
            reconciler,
            recent: RequestCoalescer::new(),
            recently_changed: TaskSlot::new(),
            highlighter,
            transport: Mutex::new(None),
            shutdown: Arc::new(watch::channel(false).0),
        }
    }

    pub fn snapshot(&self) -> Arc<ViewState> {
        self.store.snapshot()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&Arc<ViewState>) + Send + Sync + 'static,
    ) -> Subscription<ViewState> {
        self.store.subscribe(callback)
    }

    pub fn reconciler(&self) -> &TreeReconciler {
        &self.reconciler
    }

    pub fn highlighter(&self) -> &BlockHighlighter {
        &self.highlighter
    }

    /// Populate the root listing and the recent-changes list.
    pub async fn initialize(&self) {
        futures::join!(
            self.reconciler.load_children(ROOT),
            self.refresh_recent(false)
        );
    }

    /// Show the document at `path`.
    pub async fn load(&self, path: &str) {
        let path = path::normalize(path);
        self.store.modify(|state| {
            state.current_path = Some(path.clone());
            state.view = ViewKind::File;
            state.file = None;
            state.file_status = None;
            state.directory = None;
            state.highlighted_blocks.clear();
            state.loading = true;
            state.error = None;
        });
        self.reload_file(&path).await;
    }

    /// Show the listing of the directory at `path`.
    pub async fn view_directory(&self, path: &str) {
        let path = path::normalize(path);
        self.store.modify(|state| {
            state.current_path = Some(path.clone());
            state.view = ViewKind::Directory;
            state.file = None;
            state.file_status = None;
            state.highlighted_blocks.clear();
            state.loading = true;
            state.error = None;
        });
        self.relist_directory(&path, false).await;
    }

    /// Full resynchronization: tree, current view and recent changes.
    pub async fn refresh_all(&self) {
        if !self.snapshot().tree.is_populated() {
            self.initialize().await;
        }
        let state = self.snapshot();
        futures::join!(
            self.reconciler.refresh_expanded_subtrees(),
            self.refresh_view(&state),
            self.refresh_recent(true),
        );
    }

    /// Open or close a directory in the tree, loading its children on first open.
    pub async fn toggle_expand(&self, path: &str) {
        let path = path::normalize(path);
        let mut expanded = false;
        self.store.modify(|state| expanded = state.expanded.toggle(&path));

        if expanded && !self.snapshot().tree.is_loaded(&path) {
            self.reconciler.load_children(&path).await;
        }
    }

    /// Reveal `path` in the tree and show it.
    pub async fn navigate_to(&self, path: &str) {
        let path = path::normalize(path);
        if path.is_empty() {
            self.view_directory(ROOT).await;
            return;
        }

        let is_file = match self.snapshot().tree.find(&path) {
            Some(node) => !node.is_dir,
            None => path
                .rsplit('/')
                .next()
                .is_some_and(path::looks_like_file),
        };
        debug!(
            "Navigating to {} ({})",
            path,
            if is_file { "file" } else { "directory" }
        );

        self.store.modify(|state| state.expanded.expand_ancestors(&path));
        if is_file {
            futures::join!(
                self.reconciler.load_ancestor_chain(&path),
                self.load(&path)
            );
        } else {
            futures::join!(
                self.reconciler.load_ancestor_chain(&path),
                self.view_directory(&path)
            );
        }
    }

    /// React to one batch of changed paths.
    pub async fn flush(&self, batch: ChangeBatch) {
        let state = self.snapshot();
        if !state.tree.is_populated() {
            debug!("Tree not populated yet, skipping flush of {} path(s)", batch.len());
            return;
        }
        info!("Applying {} changed path(s)", batch.len());

        self.mark_recently_changed(&batch);

        let reload_file = state.view == ViewKind::File
            && state
                .current_path
                .as_deref()
                .is_some_and(|p| batch.contains(p));
        let relist_dir = state.view == ViewKind::Directory;

        futures::join!(
            async {
                if reload_file {
                    if let Some(path) = &state.current_path {
                        self.reload_file(path).await;
                    }
                }
            },
            async {
                if relist_dir {
                    if let Some(path) = &state.current_path {
                        self.relist_directory(path, true).await;
                    }
                }
            },
            self.reconciler.refresh_expanded_subtrees(),
            self.refresh_recent(true),
        );
    }

    /// Report user activity; reconnects at once while disconnected.
    pub fn notify_activity(&self) {
        if let Some(handle) = self.transport_handle() {
            handle.notify_activity();
        }
    }

    /// Stop the push channel and every pending timer. Also applies to a `run()` that has
    /// not started yet, which then returns at once.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.recently_changed.cancel();
        self.highlighter.reset();
    }

    /// Connect to the push channel at `ws_url` and process notifications until shutdown
    /// or a server build change.
    pub async fn run(&self, ws_url: String) -> EngineExit {
        if *self.shutdown.borrow() {
            debug!("Engine already shut down, not connecting to {}", ws_url);
            return EngineExit::Shutdown;
        }
        let (transport, handle, mut events) = ChangeTransport::with_shutdown(
            ws_url,
            self.config.reconnect.clone(),
            Arc::clone(&self.shutdown),
        );
        *self.transport.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        let _transport = ScheduledTask::spawn(transport.run());

        let (aggregator, changes, mut batches) =
            ChangeAggregator::new(self.config.debounce, self.config.max_wait);
        let _aggregator = ScheduledTask::spawn(aggregator.run());

        let exit = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Opened) => {
                        // Anything sent while disconnected is lost
                        self.refresh_all().await;
                    }
                    Some(TransportEvent::Changed { paths, repo }) => {
                        if self.accepts_repo(repo.as_deref()) {
                            let _ = changes.send(paths);
                        } else {
                            debug!("Ignoring changes for repo {:?}", repo);
                        }
                    }
                    Some(TransportEvent::VersionChanged { previous, current }) => {
                        break EngineExit::Reload { previous, current };
                    }
                    Some(TransportEvent::StateChanged(connection)) => {
                        self.store.modify(|state| state.connection = connection);
                    }
                    None => break EngineExit::Shutdown,
                },
                Some(batch) = batches.recv() => self.flush(batch).await,
            }
        };

        self.transport
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.recently_changed.cancel();
        exit
    }

    fn transport_handle(&self) -> Option<TransportHandle> {
        self.transport
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn accepts_repo(&self, repo: Option<&str>) -> bool {
        match (self.repo.as_deref(), repo) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => true,
        }
    }

    /// Replace the recently-changed set and restart its time-to-live.
    fn mark_recently_changed(&self, batch: &ChangeBatch) {
        let paths = batch.paths.clone();
        self.store.modify(|state| state.recently_changed = paths);

        let store = Arc::clone(&self.store);
        self.recently_changed
            .schedule(self.config.recently_changed_ttl, async move {
                store.update(|state| {
                    if state.recently_changed.is_empty() {
                        return None;
                    }
                    Some(ViewState {
                        recently_changed: Default::default(),
                        ..state.clone()
                    })
                });
            });
    }

    async fn refresh_view(&self, state: &ViewState) {
        let Some(path) = &state.current_path else {
            return;
        };
        match state.view {
            ViewKind::File => self.reload_file(path).await,
            ViewKind::Directory => self.relist_directory(path, true).await,
            ViewKind::None => {}
        }
    }

    /// Fetch content and last commit of `path` and publish them if it is still on screen.
    async fn reload_file(&self, path: &str) {
        let (content, status) = futures::join!(self.api.read(path), self.api.last_commit(path));

        self.store.update(|state| {
            if !state.is_viewing_file(path) {
                debug!("Discarding content for {}, no longer displayed", path);
                return None;
            }
            let mut next = state.clone();
            next.loading = false;
            match content {
                Ok(content) => {
                    let blocks = markdown_blocks(&content.content);
                    self.highlighter.observe(&mut next, path, blocks);
                    next.file = Some(content);
                    next.error = None;
                }
                Err(ApiError::NotFound(_)) => {
                    next.file = None;
                    next.highlighted_blocks.clear();
                    next.error = Some(format!("{} not found", path));
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", path, e);
                    next.error = Some(e.to_string());
                    if state.file.as_ref().is_some_and(|f| f.path != path) {
                        next.file = None;
                    }
                }
            }
            match status {
                Ok(commit) => next.file_status = commit,
                Err(e) => debug!("No status for {}: {}", path, e),
            }
            Some(next)
        });
    }

    /// List `dir` for the directory view and merge the listing into the mirror.
    async fn relist_directory(&self, dir: &str, forced: bool) {
        let result = self.reconciler.fetch_listing(dir, forced).await;

        self.store.update(|state| {
            if state.view != ViewKind::Directory || state.current_path.as_deref() != Some(dir) {
                return None;
            }
            let mut next = state.clone();
            next.loading = false;
            match result {
                Ok(entries) => {
                    if let Ok(tree) = state.tree.with_listing(dir, entries.clone()) {
                        next.tree = tree;
                    }
                    next.directory = Some(entries);
                    next.error = None;
                }
                Err(e) => {
                    warn!("Failed to list {}: {}", path::to_wire(dir), e);
                    next.directory = Some(state.directory.clone().unwrap_or_default());
                    next.error = Some(e.to_string());
                }
            }
            Some(next)
        });
    }

    /// Refresh the recent-changes list, keeping the last good value on failure.
    async fn refresh_recent(&self, forced: bool) {
        let api = Arc::clone(&self.api);
        let limit = self.config.recent_limit;
        let delay = self.config.retry_delay;

        let fetched = self
            .recent
            .run((), forced, move || async move {
                retry_once(delay, || {
                    let api = Arc::clone(&api);
                    async move { api.recent(limit).await }
                })
                .await
            })
            .await;

        self.store.update(|state| {
            if fetched.generation < state.recent.generation {
                debug!(
                    "Discarding recent changes from generation {} (have {})",
                    fetched.generation, state.recent.generation
                );
                return None;
            }
            let mut next = state.clone();
            next.recent.generation = fetched.generation;
            match fetched.result {
                Ok(files) => {
                    next.recent.files = files;
                    next.recent.error = false;
                }
                Err(e) => {
                    warn!("Failed to refresh recent changes: {}", e);
                    next.recent.error = true;
                }
            }
            Some(next)
        });
    }
}
