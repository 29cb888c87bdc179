//! Firmware image directory
//!
//! Transfers name their file relative to one configured directory. A flash
//! (download) reads an existing image; a read-back (upload) creates a new one
//! and never overwrites.

use common::{Error, Result};
use protocol::{ImageInfo, TransferDirection};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Regular files in the image directory, sorted by name
    ///
    /// A missing directory is an empty listing.
    pub async fn list(&self) -> Result<Vec<ImageInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Image directory {} does not exist", self.root.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut images = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            images.push(ImageInfo {
                filename: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
            });
        }

        images.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(images)
    }

    /// Resolve `filename` for a transfer in `direction`
    pub fn resolve(&self, filename: &str, direction: TransferDirection) -> Result<PathBuf> {
        let relative = Path::new(filename);
        let mut components = relative.components();
        let single_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_name {
            return Err(Error::Validation(format!(
                "Invalid image file name '{}'",
                filename
            )));
        }

        let path = self.root.join(relative);
        match direction {
            TransferDirection::Download if !path.is_file() => Err(Error::Validation(format!(
                "Image '{}' does not exist",
                filename
            ))),
            TransferDirection::Upload if path.exists() => Err(Error::Validation(format!(
                "Image '{}' already exists",
                filename
            ))),
            _ => Ok(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.bin"), [0u8; 16]).unwrap();
        std::fs::write(dir.path().join("a.hex"), b"abc").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let images = ImageStore::new(dir.path()).list().await.unwrap();
        assert_eq!(
            images,
            vec![
                ImageInfo {
                    filename: "a.hex".to_string(),
                    size: 3
                },
                ImageInfo {
                    filename: "b.bin".to_string(),
                    size: 16
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_resolve_direction_rules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fw.bin"), b"fw").unwrap();
        let store = ImageStore::new(dir.path());

        assert_eq!(
            store.resolve("fw.bin", TransferDirection::Download).unwrap(),
            dir.path().join("fw.bin")
        );
        assert!(matches!(
            store.resolve("fw.bin", TransferDirection::Upload),
            Err(Error::Validation(_))
        ));
        assert!(store.resolve("dump.bin", TransferDirection::Upload).is_ok());
        assert!(matches!(
            store.resolve("dump.bin", TransferDirection::Download),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let store = ImageStore::new("/srv/images");
        for name in ["../secret.bin", "/etc/passwd", "a/b.bin", "", "."] {
            assert!(
                matches!(
                    store.resolve(name, TransferDirection::Upload),
                    Err(Error::Validation(_))
                ),
                "{} accepted",
                name
            );
        }
    }
}
