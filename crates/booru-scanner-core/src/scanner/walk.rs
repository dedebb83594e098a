use crate::config::AppConfig;
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// Recursive traversal of one scanner root. Returns accepted files in a stable
/// (file-name sorted) order so first-path-wins dedup is deterministic.
/// Unreadable directories are logged and skipped.
pub fn collect_files(root: &Path, config: &AppConfig) -> Vec<PathBuf> {
    let ignore_patterns: Vec<Pattern> = config
        .ignore_patterns
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(entry.path()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !config.is_accepted(entry.path()) {
            debug!("Rejected by extension: {}", entry.path().display());
            continue;
        }
        files.push(entry.into_path());
    }

    files
}
