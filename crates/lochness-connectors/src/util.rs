use std::io::Read;
use std::path::{Path, PathBuf};

use lochness_core::{Error, Result};
use md5::{Digest, Md5};
use serde_json::Value;

/// Streams the file through md5; returns the lowercase hex digest.
pub(crate) fn md5_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Required `root` directory from connector metadata.
pub(crate) fn root_dir(metadata: &Value) -> Result<PathBuf> {
    metadata
        .get("root")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| Error::validation("metadata.root must be a non-empty string"))
}

pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn md5_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"a").unwrap();
        assert_eq!(md5_file(&path).unwrap(), "0cc175b9c0f1b6a831c399e269772661");
    }

    #[test]
    fn root_must_be_present() {
        assert!(root_dir(&json!({})).is_err());
        assert!(root_dir(&json!({"root": "  "})).is_err());
        assert_eq!(root_dir(&json!({"root": "/srv"})).unwrap(), PathBuf::from("/srv"));
    }
}
