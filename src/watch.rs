//! Experimental watch mode (gated by `OSGREP_ENABLE_WATCH`).
//!
//! File events are debounced and collapsed into "run the normal sync
//! again" triggers; watching is never a second state machine.

use std::path::{Component, Path};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::files;

/// Debounce window collapsing event bursts.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// Keeps the underlying OS watcher alive.
pub struct Watcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

/// Watch `root` recursively; each relevant debounced batch sends one
/// trigger. Events under dot-directories (including our own `.osgrep`
/// lock and marker files) are ignored.
pub fn watch(root: &Path, trigger: mpsc::UnboundedSender<()>) -> Result<Watcher> {
    let mut debouncer = new_debouncer(DEBOUNCE, move |events: DebounceEventResult| {
        match events {
            Ok(events) => {
                let relevant = events
                    .iter()
                    .any(|e| e.kind == DebouncedEventKind::Any && is_relevant(&e.path));
                if relevant {
                    let _ = trigger.send(());
                }
            }
            Err(e) => tracing::warn!("watcher error: {e}"),
        }
    })
    .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    debouncer
        .watcher()
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    Ok(Watcher {
        _debouncer: debouncer,
    })
}

fn is_relevant(path: &Path) -> bool {
    let hidden = path.components().any(|c| {
        matches!(c, Component::Normal(name) if name.to_string_lossy().starts_with('.'))
    });
    !hidden && files::is_indexable_file(path)
}
