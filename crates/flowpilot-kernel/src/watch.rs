//! Locale file hot reload.
//!
//! [`LocaleWatcher`] watches a pattern directory and calls
//! [`LocaleStore::reload`] whenever a `.json` or `.toml` file in it is created
//! or modified.  A failed reload is logged and the previous snapshot stays
//! active.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::locale::LocaleStore;

/// Keeps the underlying file watcher alive; dropping it stops reloading.
pub struct LocaleWatcher {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for LocaleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocaleWatcher").field("dir", &self.dir).finish()
    }
}

impl LocaleWatcher {
    /// Start watching `dir` and reload `store` on changes.
    pub fn spawn(dir: impl Into<PathBuf>, store: Arc<LocaleStore>) -> Result<Self> {
        let dir = dir.into();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    && event.paths.iter().any(|p| is_locale_file(p));
                if !relevant {
                    return;
                }
                debug!(paths = ?event.paths, "locale file changed");
                match store.reload() {
                    Ok(snapshot) => info!(
                        locale = snapshot.locale(),
                        epoch = snapshot.epoch(),
                        "locale tables reloaded"
                    ),
                    Err(e) => warn!(error = %e, "locale reload failed, keeping previous tables"),
                }
            }
            Err(e) => error!(error = %e, "locale watcher error"),
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching locale directory");

        Ok(Self {
            dir,
            _watcher: watcher,
        })
    }

    /// The watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn is_locale_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("toml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pattern_files_are_relevant() {
        assert!(is_locale_file(Path::new("/tmp/en-US.json")));
        assert!(is_locale_file(Path::new("zh-CN.toml")));
        assert!(!is_locale_file(Path::new("en-US.json.swp")));
        assert!(!is_locale_file(Path::new("README")));
    }

    #[test]
    fn watcher_starts_on_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("en-US.json"),
            r#"{"scenarios":{"general":{"systemPrompt":"hi"}}}"#,
        )
        .unwrap();
        let source = Arc::new(crate::locale::DirectorySource::new(dir.path()));
        let store = Arc::new(LocaleStore::new(source, "en-US").unwrap());

        let watcher = LocaleWatcher::spawn(dir.path(), Arc::clone(&store)).unwrap();
        assert_eq!(watcher.dir(), dir.path());
    }

    #[test]
    fn watcher_fails_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("en-US.json"), r#"{"scenarios":{}}"#).unwrap();
        let source = Arc::new(crate::locale::DirectorySource::new(dir.path()));
        let store = Arc::new(LocaleStore::new(source, "en-US").unwrap());

        assert!(LocaleWatcher::spawn(dir.path().join("missing"), store).is_err());
    }
}
