//! SHA-256 digests of produced files and bundles.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Size and hex SHA-256 of a path.
///
/// Directories (application bundles) hash every file's relative path and
/// contents in sorted order; the size is the sum of file sizes.
pub fn digest_path(path: &Path) -> io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let size = if path.is_dir() {
        let mut files = Vec::new();
        walk(path, &mut files)?;
        files.sort();
        let mut total = 0;
        for file in files {
            let relative = file.strip_prefix(path).unwrap_or(&file);
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            total += hash_file(&file, &mut hasher)?;
        }
        total
    } else {
        hash_file(path, &mut hasher)?
    };
    Ok((size, hex::encode(hasher.finalize())))
}

/// Whether `path` holds something: a non-empty file or a directory with at least one file.
pub fn has_content(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            let mut files = Vec::new();
            walk(path, &mut files).is_ok() && !files.is_empty()
        }
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

fn hash_file(path: &Path, hasher: &mut Sha256) -> io::Result<u64> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok(total)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
