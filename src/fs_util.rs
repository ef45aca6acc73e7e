use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::NmdcError;

/// Write `path` through a temp file in the same directory, then persist it
/// over the destination. A failing `write` leaves any existing file untouched.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), NmdcError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), NmdcError>,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|err| NmdcError::Filesystem(err.to_string()))?;

    let temp = tempfile::Builder::new()
        .prefix(".nmdc-export")
        .tempfile_in(&parent)
        .map_err(|err| NmdcError::Filesystem(err.to_string()))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer)?;
        writer
            .flush()
            .map_err(|err| NmdcError::Filesystem(err.to_string()))?;
    }
    temp.persist(path)
        .map_err(|err| NmdcError::Filesystem(format!("{}: {}", path.display(), err.error)))?;
    Ok(())
}

/// Every file below `root`, sorted. Entries whose path is not UTF-8 are skipped.
pub fn walk_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, NmdcError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| NmdcError::Filesystem(format!("{dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| NmdcError::Filesystem(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                tracing::warn!(dir = %dir, "skipping non UTF-8 path");
                continue;
            };
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_write_keeps_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        fs::write(&target, "old").unwrap();

        let result = write_atomic(&target, |writer| {
            writer.write_all(b"partial").unwrap();
            Err(NmdcError::Export("boom".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn writes_into_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("out.json");
        write_atomic(&target, |writer| {
            writer
                .write_all(b"[]")
                .map_err(|err| NmdcError::Filesystem(err.to_string()))
        })
        .unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "[]");
    }

    #[test]
    fn walk_lists_nested_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("b").join("two.gff"), "").unwrap();
        fs::write(root.join("a.gff"), "").unwrap();

        let files = walk_files(&root).unwrap();
        assert_eq!(files, vec![root.join("a.gff"), root.join("b").join("two.gff")]);
    }
}
