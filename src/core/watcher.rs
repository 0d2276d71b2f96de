use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Keeps the underlying watcher alive. Dropping it stops change events.
pub struct DirectoryWatcher {
    _inner: RecommendedWatcher,
    watched: Vec<PathBuf>,
    /// Missing roots paired with the existing ancestor watched in their place.
    pending: Vec<(PathBuf, PathBuf)>,
}

impl DirectoryWatcher {
    /// Roots watched recursively.
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// True once a missing root (or a directory on the way to it) has been
    /// created or removed, so the watches should be registered again.
    pub fn is_outdated(&self) -> bool {
        self.pending
            .iter()
            .any(|(root, parent)| nearest_existing(root) != Some(parent.as_path()))
    }
}

/// Closest existing directory at or above `path`.
fn nearest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.is_dir())
}

/// Whether an event can change what the loader would read.
fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Watch each root recursively and push `()` on `tx` for every relevant
/// event. Sends never block; if a signal is already queued the new one is
/// dropped, since the receiver only needs to know that something changed.
///
/// A root that does not exist yet is covered by a non-recursive watch on its
/// nearest existing ancestor. Roots that cannot be watched are logged and
/// skipped. Returns `None` when nothing could be watched.
pub fn watch_roots(roots: &[PathBuf], tx: mpsc::Sender<()>) -> Option<DirectoryWatcher> {
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_relevant(&event) => {
            let _ = tx.try_send(());
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("watch error: {e}"),
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!("file watcher unavailable: {e}");
            return None;
        }
    };

    let mut watched = Vec::new();
    let mut pending: Vec<(PathBuf, PathBuf)> = Vec::new();
    for root in roots {
        if root.is_dir() {
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => {
                    tracing::debug!(root = %root.display(), "watching");
                    watched.push(root.clone());
                }
                Err(e) => tracing::warn!(root = %root.display(), "cannot watch directory: {e}"),
            }
            continue;
        }

        let Some(parent) = nearest_existing(root) else {
            continue;
        };
        let parent = parent.to_path_buf();
        let already = pending.iter().any(|(_, p)| *p == parent);
        if already || watcher.watch(&parent, RecursiveMode::NonRecursive).is_ok() {
            tracing::debug!(
                root = %root.display(),
                parent = %parent.display(),
                "root missing; watching parent"
            );
            pending.push((root.clone(), parent));
        } else {
            tracing::warn!(root = %root.display(), "cannot watch parent of missing directory");
        }
    }

    if watched.is_empty() && pending.is_empty() {
        return None;
    }
    Some(DirectoryWatcher {
        _inner: watcher,
        watched,
        pending,
    })
}
