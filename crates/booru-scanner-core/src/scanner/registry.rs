use crate::consensus::is_valid_tag_name;
use crate::error::Error;
use crate::storage::models::ScannerRecord;
use crate::storage::Database;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// What an operator supplies to create a scanner.
#[derive(Debug, Clone, Default)]
pub struct ScannerSpec {
    pub name: String,
    pub root_path: PathBuf,
    pub owner: Option<String>,
    pub auto_tags: Vec<String>,
    pub failure_tags: Vec<String>,
    /// Empty means "search every registered provider".
    pub provider_ids: Vec<i64>,
    pub auto_prune_results: bool,
}

/// Absolute, symlink-resolved root. Missing paths and non-directories are rejected.
pub fn resolve_root(path: &Path) -> Result<PathBuf, Error> {
    if !path.exists() {
        return Err(Error::Validation(format!(
            "scanner path '{}' does not exist",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(Error::Validation(format!(
            "scanner path '{}' is not a directory",
            path.display()
        )));
    }
    Ok(fs::canonicalize(path)?)
}

/// True when either path is the other or one of its ancestors.
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// First existing scanner (other than `except_id`) whose root overlaps `root`.
fn find_overlapping_scanner(
    db: &Database,
    root: &Path,
    except_id: Option<i64>,
) -> Result<Option<ScannerRecord>, Error> {
    for scanner in db.list_scanners()? {
        if Some(scanner.id) == except_id {
            continue;
        }
        if paths_overlap(root, Path::new(&scanner.root_path)) {
            return Ok(Some(scanner));
        }
    }
    Ok(None)
}

fn check_no_overlap(db: &Database, root: &Path, except_id: Option<i64>) -> Result<(), Error> {
    match find_overlapping_scanner(db, root, except_id)? {
        Some(existing) => Err(Error::Validation(format!(
            "'{}' overlaps scanner '{}' rooted at '{}'",
            root.display(),
            existing.name,
            existing.root_path
        ))),
        None => Ok(()),
    }
}

fn check_tags(kind: &str, tags: &[String]) -> Result<(), Error> {
    match tags.iter().find(|tag| !is_valid_tag_name(tag)) {
        Some(bad) => Err(Error::Validation(format!("invalid {} tag '{}'", kind, bad))),
        None => Ok(()),
    }
}

/// Validate and persist a scanner. Nothing is written on validation failure.
pub fn create_scanner(db: &Database, spec: &ScannerSpec) -> Result<ScannerRecord, Error> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(Error::Validation("scanner name must not be empty".to_string()));
    }
    if db.get_scanner_by_name(name)?.is_some() {
        return Err(Error::Validation(format!("scanner '{}' already exists", name)));
    }
    check_tags("auto", &spec.auto_tags)?;
    check_tags("failure", &spec.failure_tags)?;
    for provider_id in &spec.provider_ids {
        if db.get_provider(*provider_id)?.is_none() {
            return Err(Error::Validation(format!("unknown provider id {}", provider_id)));
        }
    }

    let root = resolve_root(&spec.root_path)?;
    check_no_overlap(db, &root, None)?;

    let root_str = root.to_string_lossy().into_owned();
    let id = db.insert_scanner(
        name,
        &root_str,
        spec.owner.as_deref(),
        spec.auto_prune_results,
        &spec.auto_tags,
        &spec.failure_tags,
        &spec.provider_ids,
    )?;
    info!("Created scanner {} rooted at {}", name, root_str);
    db.get_scanner(id)?
        .ok_or_else(|| Error::NotFound(format!("scanner {}", id)))
}

/// Repoint a scanner, re-running the containment check against every other scanner.
pub fn update_scanner_root(db: &Database, id: i64, new_root: &Path) -> Result<ScannerRecord, Error> {
    let root = resolve_root(new_root)?;
    check_no_overlap(db, &root, Some(id))?;
    let root_str = root.to_string_lossy().into_owned();
    if !db.update_scanner_root(id, &root_str)? {
        return Err(Error::NotFound(format!("scanner {}", id)));
    }
    info!("Scanner {} now rooted at {}", id, root_str);
    db.get_scanner(id)?
        .ok_or_else(|| Error::NotFound(format!("scanner {}", id)))
}

pub fn delete_scanner(db: &Database, id: i64) -> Result<bool, Error> {
    Ok(db.delete_scanner(id)?)
}
