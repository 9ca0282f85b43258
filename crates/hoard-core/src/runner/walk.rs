use crate::location::{Folder, Location, Node, NodeMeta};
use crate::control::RunControl;
use glob::Pattern;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Compiled ignore globs. A node is ignored when a pattern matches its name
/// or its full display path.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Pattern>,
}

impl IgnoreSet {
    pub fn new(globs: &[String]) -> Self {
        let patterns = globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_ignored(&self, meta: &NodeMeta) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches(&meta.name) || p.matches(&meta.display_path))
    }
}

/// Progress denominator shared between the counter thread and the runner.
#[derive(Debug, Default)]
pub struct Estimate {
    value: AtomicU64,
    known: AtomicBool,
}

impl Estimate {
    pub fn get(&self) -> Option<u64> {
        if self.known.load(Ordering::Acquire) {
            Some(self.value.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    fn set(&self, total: u64) {
        self.value.store(total, Ordering::Relaxed);
        self.known.store(true, Ordering::Release);
    }
}

/// Count every entry a run over `locations` would record.
///
/// Best effort: errors are logged and the affected subtree is left out. Gives
/// up without publishing when `finished` or a stop is signalled.
pub fn count_entries(
    locations: &[Arc<dyn Location>],
    ignore: &IgnoreSet,
    control: &RunControl,
    finished: &AtomicBool,
    estimate: &Estimate,
) {
    let keep_going = || !control.is_stopped() && !finished.load(Ordering::Relaxed);
    let mut total = 0u64;
    for location in locations {
        match location.root() {
            Ok(root) => {
                total += 1;
                if !count_folder(root.as_ref(), ignore, &keep_going, &mut total) {
                    debug!("Entry counter interrupted");
                    return;
                }
            }
            Err(e) => warn!("Counter could not open {}: {}", location.uri(), e),
        }
    }
    debug!("Entry counter estimated {} entries", total);
    estimate.set(total);
}

fn count_folder<F>(folder: &dyn Folder, ignore: &IgnoreSet, keep_going: &F, total: &mut u64) -> bool
where
    F: Fn() -> bool,
{
    let children = match folder.children() {
        Ok(children) => children,
        Err(e) => {
            warn!("Counter could not list {}: {}", folder.meta().display_path, e);
            return true;
        }
    };
    for child in children {
        if !keep_going() {
            return false;
        }
        if ignore.is_ignored(child.meta()) {
            continue;
        }
        *total += 1;
        if let Node::Folder(sub) = &child {
            if !count_folder(sub.as_ref(), ignore, keep_going, total) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, path: &str) -> NodeMeta {
        NodeMeta {
            name: name.to_string(),
            display_path: path.to_string(),
            hidden: false,
            created: None,
            modified: None,
        }
    }

    #[test]
    fn test_ignore_matches_name_or_path() {
        let ignore = IgnoreSet::new(&[
            "*.tmp".to_string(),
            "/home/*/cache".to_string(),
            "[".to_string(),
        ]);
        assert!(ignore.is_ignored(&meta("draft.tmp", "/home/me/draft.tmp")));
        assert!(ignore.is_ignored(&meta("cache", "/home/me/cache")));
        assert!(!ignore.is_ignored(&meta("notes.txt", "/home/me/notes.txt")));
    }

    #[test]
    fn test_estimate_unknown_until_set() {
        let estimate = Estimate::default();
        assert_eq!(estimate.get(), None);
        estimate.set(42);
        assert_eq!(estimate.get(), Some(42));
    }
}
