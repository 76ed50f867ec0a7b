use std::io::{self, Write};
use std::path::Path;

use md5::{Digest, Md5};

/**
    Read a cache file, mapping "not found" to `None`.
*/
pub fn read(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/**
    Write a cache file atomically: the data goes to a temporary file in the
    same directory which is then renamed over `path`. Readers never observe
    a partial file.
*/
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.flush()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Lowercase hex MD5 of `key`, used as a cache file name.
pub fn key_for(key: &str) -> String {
    hex::encode(Md5::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_key() {
        assert_eq!(key_for(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            key_for("https://cdn.example/manifest.mpd"),
            key_for("https://cdn.example/manifest.mpd")
        );
    }

    #[test]
    fn atomic_write_creates_dirs_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(read(&path).unwrap().unwrap(), b"two");
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(&dir.path().join("absent")).unwrap().is_none());
    }
}
