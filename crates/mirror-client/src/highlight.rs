//! Transient highlight markers for changed content blocks.

use crate::state::ViewState;
use crate::timer::TaskSlot;
use mirror_core::{changed_blocks, BlockSignature, Store};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Last render of the displayed document.
#[derive(Debug, Default)]
struct Baseline {
    document: Option<String>,
    blocks: Vec<BlockSignature>,
}

/// Compares successive renders of the displayed document and marks each block that
/// changed in [`ViewState::highlighted_blocks`], until it expires or is completed.
pub struct BlockHighlighter {
    store: Arc<Store<ViewState>>,
    baseline: Mutex<Baseline>,
    clear: TaskSlot,
    duration: Duration,
}

impl BlockHighlighter {
    pub fn new(store: Arc<Store<ViewState>>, duration: Duration) -> Self {
        Self {
            store,
            baseline: Mutex::new(Baseline::default()),
            clear: TaskSlot::new(),
            duration,
        }
    }

    /// Record a render of `document` into `next`, the state about to be published.
    /// Returns the indices of flagged blocks.
    ///
    /// Call only for renders that are actually published. The first render of a document
    /// is the baseline and flags nothing. The marker set is replaced on every render.
    pub fn observe(
        &self,
        next: &mut ViewState,
        document: &str,
        blocks: Vec<BlockSignature>,
    ) -> Vec<usize> {
        let flagged = {
            let mut baseline = self.baseline.lock().unwrap_or_else(|e| e.into_inner());
            let flagged = if baseline.document.as_deref() == Some(document) {
                changed_blocks(&baseline.blocks, &blocks)
            } else {
                Vec::new()
            };
            baseline.document = Some(document.to_string());
            baseline.blocks = blocks;
            flagged
        };
        next.highlighted_blocks = flagged.iter().copied().collect();

        if flagged.is_empty() {
            self.clear.cancel();
        } else {
            debug!("Highlighting {} block(s) of {}", flagged.len(), document);
            let store = Arc::clone(&self.store);
            self.clear.schedule(self.duration, async move {
                store.update(|state| {
                    if state.highlighted_blocks.is_empty() {
                        return None;
                    }
                    Some(ViewState {
                        highlighted_blocks: Default::default(),
                        ..state.clone()
                    })
                });
            });
        }
        flagged
    }

    /// Remove the marker on block `index` (animation finished). No-op if absent.
    pub fn complete(&self, index: usize) {
        self.store.update(|state| {
            if !state.highlighted_blocks.contains(&index) {
                return None;
            }
            let mut next = state.clone();
            next.highlighted_blocks.remove(&index);
            Some(next)
        });
    }

    /// Blocks currently carrying a marker.
    pub fn markers(&self) -> Vec<usize> {
        self.store.snapshot().highlighted_blocks.iter().copied().collect()
    }

    /// Forget the baseline and drop every marker.
    pub fn reset(&self) {
        self.clear.cancel();
        *self.baseline.lock().unwrap_or_else(|e| e.into_inner()) = Baseline::default();
        self.store.update(|state| {
            if state.highlighted_blocks.is_empty() {
                return None;
            }
            Some(ViewState {
                highlighted_blocks: Default::default(),
                ..state.clone()
            })
        });
    }
}

/// Split markdown into top-level blocks (separated by blank lines, fenced code kept whole)
/// and sign each one.
pub fn markdown_blocks(text: &str) -> Vec<BlockSignature> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        if !in_fence && line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(BlockSignature::of(&current.join("\n")));
                current.clear();
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        blocks.push(BlockSignature::of(&current.join("\n")));
    }
    blocks
}
