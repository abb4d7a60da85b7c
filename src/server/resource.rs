//! Mirror/sync resource access
//!
//! `a=syncList` lists files under the cache tree so a mirror can diff its
//! copy; `a=get` serves ranged reads. Requested names are relative paths
//! inside the cache directory only; anything that escapes it is refused.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

/// One entry of a sync listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEntry {
    /// Path relative to the cache directory, with `/` separators
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Recursively lists the cache tree for mirror diffing
pub fn sync_list(cache_dir: &Path) -> std::io::Result<Vec<SyncEntry>> {
    let mut entries = Vec::new();
    if cache_dir.exists() {
        walk(cache_dir, cache_dir, &mut entries)?;
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<SyncEntry>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        let name = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");

        if metadata.is_dir() {
            out.push(SyncEntry {
                name,
                size: 0,
                is_dir: true,
            });
            walk(root, &path, out)?;
        } else {
            out.push(SyncEntry {
                name,
                size: metadata.len(),
                is_dir: false,
            });
        }
    }
    Ok(())
}

/// Resolves a requested name inside the cache tree, refusing escapes
fn resolve(cache_dir: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(cache_dir.join(relative))
}

/// Ranged read of one cache file: `length == 0` means "to end of file"
pub fn read_file_range(
    cache_dir: &Path,
    name: &str,
    offset: u64,
    length: u64,
) -> std::io::Result<Vec<u8>> {
    let path = resolve(cache_dir, name).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "path escapes cache dir")
    })?;

    let mut file = fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;

    let mut buf = Vec::new();
    if length == 0 {
        file.read_to_end(&mut buf)?;
    } else {
        buf.resize(length as usize, 0);
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("gen_0")).unwrap();
        fs::write(dir.path().join("gen_0/summaries.bin"), b"0123456789").unwrap();
        fs::write(dir.path().join("top.txt"), b"hello").unwrap();
        dir
    }

    #[test]
    fn test_sync_list_walks_tree() {
        let dir = cache();
        let entries = sync_list(dir.path()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["gen_0", "gen_0/summaries.bin", "top.txt"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].size, 10);
    }

    #[test]
    fn test_ranged_read() {
        let dir = cache();
        assert_eq!(
            read_file_range(dir.path(), "gen_0/summaries.bin", 2, 4).unwrap(),
            b"2345"
        );
        // Zero length reads to end; range past EOF truncates
        assert_eq!(
            read_file_range(dir.path(), "gen_0/summaries.bin", 8, 0).unwrap(),
            b"89"
        );
        assert_eq!(
            read_file_range(dir.path(), "gen_0/summaries.bin", 8, 100).unwrap(),
            b"89"
        );
    }

    #[test]
    fn test_path_escape_refused() {
        let dir = cache();
        assert!(read_file_range(dir.path(), "../outside", 0, 0).is_err());
        assert!(read_file_range(dir.path(), "/etc/hosts", 0, 0).is_err());
    }
}
