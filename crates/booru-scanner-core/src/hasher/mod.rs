pub mod md5sum;

pub use md5sum::{content_hash, dedupe_by_hash, hash_files, HashedFile};
