use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExportError {
    #[snafu(display("failed to create export directory at {path}"))]
    CreateExportDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to write exported image to {path}"))]
    WriteImage {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Sink for topic image exports.
pub trait ImageSink: Send + Sync {
    fn save_image(&self, name: &str, data: &[u8]) -> ExportResult<PathBuf>;
}

/// Writes exported images under a fixed directory, sanitizing the requested
/// name so callers cannot escape it.
pub struct FsImageSink {
    directory: PathBuf,
}

impl FsImageSink {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl ImageSink for FsImageSink {
    fn save_image(&self, name: &str, data: &[u8]) -> ExportResult<PathBuf> {
        std::fs::create_dir_all(&self.directory).context(CreateExportDirectorySnafu {
            stage: "export-create-directory",
            path: self.directory.display().to_string(),
        })?;

        let path = self.directory.join(sanitize_file_name(name));
        std::fs::write(&path, data).context(WriteImageSnafu {
            stage: "export-write-image",
            path: path.display().to_string(),
        })?;

        Ok(path)
    }
}

fn sanitize_file_name(name: &str) -> String {
    let trimmed = name.trim();
    let base = if trimmed.is_empty() { "export" } else { trimmed };

    base.chars()
        .map(|character| match character {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => character,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_separators_are_neutralized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("trip: day 1?.png"), "trip_ day 1_.png");
        assert_eq!(sanitize_file_name("   "), "export");
    }
}
