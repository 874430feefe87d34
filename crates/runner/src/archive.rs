//! Zip extraction for release, deployment and test archives.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use zip::ZipArchive;

use crate::error::StepError;

/// Extract `archive` into `dest`, overwriting existing files.
pub async fn extract(archive: &Path, dest: &Path) -> Result<(), StepError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
        .await
        .map_err(|e| StepError::io("extraction task failed", std::io::Error::other(e)))?
}

fn extract_blocking(archive: &Path, dest: &Path) -> Result<(), StepError> {
    let file = File::open(archive)
        .map_err(|e| StepError::io(format!("failed to open {}", archive.display()), e))?;
    let extract_err = |source| StepError::Extract { archive: archive.to_path_buf(), source };
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(extract_err)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(extract_err)?;
        // Skip entries that would escape the destination
        let Some(name) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe entry {} in {}", entry.name(), archive.display());
            continue;
        };
        let path = dest.join(name);
        if entry.is_dir() {
            std::fs::create_dir_all(&path)
                .map_err(|e| StepError::io(format!("failed to create {}", path.display()), e))?;
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StepError::io(format!("failed to create {}", parent.display()), e))?;
        }
        if path.is_file() {
            std::fs::remove_file(&path)
                .map_err(|e| StepError::io(format!("failed to replace {}", path.display()), e))?;
        }
        let mut out = File::create(&path)
            .map_err(|e| StepError::io(format!("failed to create {}", path.display()), e))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| StepError::io(format!("failed to write {}", path.display()), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
                    .map_err(|e| StepError::io(format!("failed to chmod {}", path.display()), e))?;
            }
        }
    }
    tracing::debug!("Extracted {} entries from {}", zip.len(), archive.display());
    Ok(())
}

/// Files in `dir` whose names start with `prefix` and end with `suffix`, sorted by name.
pub fn find_files(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<PathBuf>, StepError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| StepError::io(format!("failed to read {}", dir.display()), e))?;
    let mut out = vec![];
    for entry in entries {
        let entry =
            entry.map_err(|e| StepError::io(format!("failed to read {}", dir.display()), e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(prefix) && name.ends_with(suffix) && entry.path().is_file() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}
