//! TR-014: BLAKE3 hashing for plan fingerprints and artifact checksums.

use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Hash a byte slice. Returns `"blake3:{hex}"`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(bytes).to_hex())
}

/// Stream a file through BLAKE3. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash of NUL-separated components; order matters.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// First `len` hex chars of the composite hash. Used for synthetic live ids.
pub fn short_id(components: &[&str], len: usize) -> String {
    let full = composite_hash(components);
    full.trim_start_matches("blake3:").chars().take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr014_hash_string() {
        let h1 = hash_string("hello");
        assert_eq!(h1, hash_string("hello"));
        assert_ne!(h1, hash_string("world"));
        assert!(h1.starts_with("blake3:"));
        assert_eq!(h1.len(), 7 + 64);
    }

    #[test]
    fn test_tr014_hash_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.zip");
        std::fs::write(&path, b"artifact-bytes").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"artifact-bytes"));
    }

    #[test]
    fn test_tr014_hash_file_not_found() {
        assert!(hash_file(Path::new("/nonexistent/main.zip")).is_err());
    }

    #[test]
    fn test_tr014_composite_order_sensitive() {
        assert_ne!(composite_hash(&["a", "b"]), composite_hash(&["b", "a"]));
        // Separator keeps ["ab"] distinct from ["a", "b"].
        assert_ne!(composite_hash(&["ab"]), composite_hash(&["a", "b"]));
    }

    #[test]
    fn test_tr014_short_id() {
        let id = short_id(&["table", "main"], 8);
        assert_eq!(id.len(), 8);
        assert_eq!(id, short_id(&["table", "main"], 8));
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
