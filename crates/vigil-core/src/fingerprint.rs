//! Content fingerprinting for files and directory trees.
//!
//! Files are streamed through SHA-256 in fixed-size chunks. A directory is
//! fingerprinted by feeding, for every file in its subtree in lexicographic
//! relative-path order, the path bytes followed by the hex digest of that
//! file. The result depends only on relative structure and content, never on
//! the absolute location, the platform path separator, or the order the
//! filesystem happens to return entries in.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Buffer size for streaming reads (64KB)
const BUFFER_SIZE: usize = 64 * 1024;

/// Compute the fingerprint of a file or directory tree.
///
/// Returns `None` when the resource does not exist, is neither a file nor a
/// directory, or cannot be read. Read failures are recovered locally and
/// logged; they never propagate as errors.
pub fn fingerprint(path: &Path) -> Option<String> {
    if path.is_file() {
        fingerprint_file(path)
    } else if path.is_dir() {
        fingerprint_dir(path)
    } else {
        warn!(path = %path.display(), "resource does not exist or has an unsupported type");
        None
    }
}

fn fingerprint_file(path: &Path) -> Option<String> {
    match hash_file(path) {
        Ok(hash) => Some(hash),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read file while hashing");
            None
        }
    }
}

/// Stream a file through SHA-256 and return the lowercase hex digest
fn hash_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        match reader.read(&mut buffer)? {
            0 => break,
            n => hasher.update(&buffer[..n]),
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint a directory tree.
///
/// Files that cannot be read are left out of the digest entirely; the
/// directory fingerprint is still produced. Only a directory whose own
/// listing fails yields `None`.
fn fingerprint_dir(root: &Path) -> Option<String> {
    // An unlistable root makes the whole fingerprint unavailable. Deeper
    // enumeration failures only drop the affected subtree.
    if let Err(err) = std::fs::read_dir(root) {
        warn!(path = %root.display(), error = %err, "failed to enumerate directory");
        return None;
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        files.push((relative_key(rel), entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (key, full_path) in &files {
        match hash_file(full_path) {
            Ok(hash) => {
                hasher.update(key.as_bytes());
                hasher.update(hash.as_bytes());
            }
            Err(err) => {
                // Unreadable files are omitted, path and hash both. Two trees
                // that differ only in an unreadable file therefore hash alike.
                warn!(path = %full_path.display(), error = %err, "skipping unreadable file in directory fingerprint");
            }
        }
    }

    Some(hex::encode(hasher.finalize()))
}

/// Relative path rendered with `/` separators on every platform
fn relative_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
