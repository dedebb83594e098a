use crate::progress::ProgressReporter;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

const READ_BUFFER_LENGTH: usize = 64 * 1024; // 64KB

/// A walked file with its digest, or the error that prevented hashing it.
#[derive(Debug)]
pub struct HashedFile {
    pub path: PathBuf,
    pub hash: io::Result<String>,
}

/// Lowercase hex md5 of the file's bytes. Providers index content by md5, so
/// this is the identity used everywhere else.
pub fn content_hash(file: &Path) -> io::Result<String> {
    let mut f = File::open(file)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0; READ_BUFFER_LENGTH];
    loop {
        let bytes_read = f.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Hash every path in parallel. Output order matches input order.
pub fn hash_files(paths: &[PathBuf], reporter: &dyn ProgressReporter) -> Vec<HashedFile> {
    let total = paths.len();
    let hashed = AtomicUsize::new(0);
    paths
        .par_iter()
        .map(|path| {
            let hash = content_hash(path);
            if let Err(e) = &hash {
                tracing::error!("Error hashing file '{}': {}", path.display(), e);
            }
            let done = hashed.fetch_add(1, Ordering::Relaxed) + 1;
            reporter.on_hash_progress(done, total);
            HashedFile {
                path: path.clone(),
                hash,
            }
        })
        .collect()
}

/// Keep the first path seen for each digest; later duplicates are dropped.
pub fn dedupe_by_hash(files: Vec<(PathBuf, String)>) -> Vec<(PathBuf, String)> {
    let mut seen: HashSet<String> = HashSet::new();
    files
        .into_iter()
        .filter(|(_, hash)| seen.insert(hash.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_content_hash_matches_known_md5() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("hello.txt");
        fs::write(&path, "hello world").unwrap();
        assert_eq!(
            content_hash(&path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_content_hash_spans_read_buffers() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("big.bin");
        let data = vec![0x5Au8; READ_BUFFER_LENGTH * 2 + 17];
        fs::write(&path, &data).unwrap();
        assert_eq!(
            content_hash(&path).unwrap(),
            format!("{:x}", md5::compute(&data))
        );
    }

    #[test]
    fn test_hash_files_keeps_order_and_reports_errors() {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("a.png");
        let missing = tmp.path().join("missing.png");
        fs::write(&a, "a").unwrap();

        let results = hash_files(&[a.clone(), missing.clone()], &SilentReporter);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].path, a);
        assert!(results[0].hash.is_ok());
        assert_eq!(results[1].path, missing);
        assert!(results[1].hash.is_err());
    }

    #[test]
    fn test_dedupe_first_path_wins() {
        let files = vec![
            (PathBuf::from("/r/a.png"), "h1".to_string()),
            (PathBuf::from("/r/b.png"), "h2".to_string()),
            (PathBuf::from("/r/c.png"), "h1".to_string()),
        ];
        let unique = dedupe_by_hash(files);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].0, PathBuf::from("/r/a.png"));
        assert_eq!(unique[1].0, PathBuf::from("/r/b.png"));
    }
}
