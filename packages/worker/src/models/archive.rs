use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Maximum decompressed size per entry (64 MB).
const MAX_ENTRY_SIZE: u64 = 64 * 1024 * 1024;

/// Maximum total decompressed size of one submission (256 MB).
const MAX_TOTAL_SIZE: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Invalid ZIP archive: {0}")]
    Invalid(String),

    #[error("Archive entry '{0}' escapes the target directory")]
    UnsafePath(String),

    #[error("Archive content too large: {0}")]
    TooLarge(String),

    #[error("Failed to write archive entry: {0}")]
    Io(#[from] std::io::Error),
}

/// True for entries created by desktop archivers rather than the author.
pub fn is_platform_metadata(name: &str) -> bool {
    let path = Path::new(name);
    let in_macosx = path
        .components()
        .any(|c| matches!(c, Component::Normal(part) if part == "__MACOSX"));
    let file_name = path.file_name().and_then(|f| f.to_str()).unwrap_or("");
    in_macosx || file_name.starts_with("._") || file_name == ".DS_Store"
}

/// Extract a zip archive into `target`, skipping platform metadata.
///
/// Returns the relative paths of the extracted files.
pub fn extract_zip(data: &[u8], target: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| ArchiveError::Invalid(e.to_string()))?;

    let mut extracted = Vec::new();
    let mut total: u64 = 0;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ArchiveError::Invalid(e.to_string()))?;

        let raw_name = file.name().to_string();
        if is_platform_metadata(&raw_name) {
            debug!(entry = %raw_name, "Skipping platform metadata entry");
            continue;
        }

        let relative = file
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafePath(raw_name.clone()))?;
        let destination = target.join(&relative);

        if file.is_dir() {
            std::fs::create_dir_all(&destination)?;
            continue;
        }

        let mut buf = Vec::new();
        (&mut file).take(MAX_ENTRY_SIZE + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > MAX_ENTRY_SIZE {
            return Err(ArchiveError::TooLarge(format!(
                "entry '{raw_name}' exceeds 64MB"
            )));
        }
        total += buf.len() as u64;
        if total > MAX_TOTAL_SIZE {
            return Err(ArchiveError::TooLarge("archive exceeds 256MB".into()));
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&destination, &buf)?;
        extracted.push(relative);
    }

    Ok(extracted)
}
