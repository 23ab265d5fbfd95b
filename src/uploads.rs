//! Image uploads for avatars and post covers.
//!
//! Files live under a single uploads root, one directory per kind, and are referenced from the
//! database by their path relative to that root (e.g. `covers/my-post-0190....png`). They are
//! served back at `/uploads/<relative path>`.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Avatar,
    Cover,
}

impl UploadKind {
    pub fn dir(&self) -> &'static str {
        match self {
            UploadKind::Avatar => "avatars",
            UploadKind::Cover => "covers",
        }
    }

    pub fn max_bytes(&self) -> usize {
        match self {
            UploadKind::Avatar => 1024 * 1024,
            UploadKind::Cover => 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("The image must be at most {0}MB.")]
    TooLarge(usize),

    #[error("The uploaded image is empty.")]
    Empty,

    #[error("Invalid image format. Use jpg, jpeg, png or webp.")]
    UnsupportedExtension,

    #[error("The file is not a valid jpg, png or webp image.")]
    UnrecognizedContent,

    #[error("The file extension does not match the image type.")]
    ExtensionMismatch,

    #[error("Could not save the image.")]
    Io(#[from] std::io::Error),
}

/// Image formats accepted for uploads, detected from the file's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }

    fn accepts_extension(&self, ext: &str) -> bool {
        match self {
            ImageFormat::Jpeg => ext == "jpg" || ext == "jpeg",
            ImageFormat::Png => ext == "png",
            ImageFormat::Webp => ext == "webp",
        }
    }
}

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// A file received from a multipart form.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Checks size, extension and content of an upload. Returns the lowercased extension to store
/// the file under.
pub fn validate(kind: UploadKind, file: &IncomingFile) -> Result<String, UploadError> {
    if file.bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    if file.bytes.len() > kind.max_bytes() {
        return Err(UploadError::TooLarge(kind.max_bytes() / (1024 * 1024)));
    }

    let ext = Path::new(&file.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(UploadError::UnsupportedExtension);
    }

    let format = ImageFormat::sniff(&file.bytes).ok_or(UploadError::UnrecognizedContent)?;
    if !format.accepts_extension(&ext) {
        return Err(UploadError::ExtensionMismatch);
    }

    Ok(ext)
}

pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates and writes `file`, returning its path relative to the uploads root.
    /// `stem` prefixes the generated file name.
    pub fn save(&self, kind: UploadKind, file: &IncomingFile, stem: &str) -> Result<String, UploadError> {
        let ext = validate(kind, file)?;

        let dir = self.root.join(kind.dir());
        std::fs::create_dir_all(&dir)?;

        let stem = if stem.is_empty() { "upload" } else { stem };
        let file_name = format!("{}-{}.{}", stem, uuid::Uuid::now_v7().simple(), ext);
        std::fs::write(dir.join(&file_name), &file.bytes)?;

        let relative = format!("{}/{}", kind.dir(), file_name);
        tracing::info!(path = %relative, bytes = file.bytes.len(), "stored upload");
        Ok(relative)
    }

    /// Removes a previously stored file of `kind`. Paths that do not resolve to a regular file
    /// strictly inside that kind's directory are refused. Returns whether a file was removed.
    pub fn delete(&self, kind: UploadKind, relative: &str) -> bool {
        let relative = relative.trim_start_matches(['/', '\\']);
        if relative.is_empty() {
            return false;
        }

        let Ok(base) = self.root.join(kind.dir()).canonicalize() else {
            return false;
        };
        let Ok(full) = self.root.join(relative).canonicalize() else {
            return false;
        };

        if full == base || !full.starts_with(&base) {
            tracing::warn!(path = %relative, "refusing to delete file outside the uploads directory");
            return false;
        }
        if !full.is_file() {
            return false;
        }

        match std::fs::remove_file(&full) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %relative, "failed to delete upload: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];

    fn file(name: &str, bytes: &[u8]) -> IncomingFile {
        IncomingFile {
            file_name: name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn sniffs_supported_formats() {
        assert_eq!(ImageFormat::sniff(PNG), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(JPEG), Some(ImageFormat::Jpeg));
        assert_eq!(
            ImageFormat::sniff(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some(ImageFormat::Webp)
        );
        assert_eq!(ImageFormat::sniff(b"GIF89a"), None);
    }

    #[test]
    fn validate_rejects_bad_uploads() {
        assert!(matches!(
            validate(UploadKind::Cover, &file("a.gif", PNG)),
            Err(UploadError::UnsupportedExtension)
        ));
        assert!(matches!(
            validate(UploadKind::Cover, &file("a.jpg", PNG)),
            Err(UploadError::ExtensionMismatch)
        ));
        assert!(matches!(
            validate(UploadKind::Cover, &file("a.png", b"not an image")),
            Err(UploadError::UnrecognizedContent)
        ));
        assert!(matches!(
            validate(UploadKind::Avatar, &file("a.png", &[])),
            Err(UploadError::Empty)
        ));

        let mut big = PNG.to_vec();
        big.resize(UploadKind::Avatar.max_bytes() + 1, 0);
        assert!(matches!(
            validate(UploadKind::Avatar, &file("a.png", &big)),
            Err(UploadError::TooLarge(1))
        ));
        assert!(validate(UploadKind::Cover, &file("a.png", &big)).is_ok());
        assert_eq!(validate(UploadKind::Cover, &file("Photo.JPEG", JPEG)).unwrap(), "jpeg");
    }

    #[test]
    fn save_then_delete_inside_root() {
        let tmp = TempDir::new().unwrap();
        let store = UploadStore::new(tmp.path().to_path_buf());

        let relative = store.save(UploadKind::Cover, &file("c.png", PNG), "my-post").unwrap();
        assert!(relative.starts_with("covers/my-post-"));
        assert!(relative.ends_with(".png"));
        assert_eq!(std::fs::read(tmp.path().join(&relative)).unwrap(), PNG);

        // Wrong kind directory is refused.
        assert!(!store.delete(UploadKind::Avatar, &relative));
        assert!(store.delete(UploadKind::Cover, &relative));
        assert!(!tmp.path().join(&relative).exists());
        assert!(!store.delete(UploadKind::Cover, &relative));
    }

    #[test]
    fn delete_refuses_paths_escaping_the_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("uploads");
        std::fs::create_dir_all(root.join("covers")).unwrap();
        let outside = tmp.path().join("secret.txt");
        std::fs::write(&outside, b"keep me").unwrap();

        let store = UploadStore::new(root);
        assert!(!store.delete(UploadKind::Cover, "covers/../../secret.txt"));
        assert!(!store.delete(UploadKind::Cover, "../secret.txt"));
        assert!(!store.delete(UploadKind::Cover, "covers"));
        assert!(outside.exists());
    }

    #[cfg(unix)]
    #[test]
    fn delete_refuses_symlinks_out_of_the_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("uploads");
        std::fs::create_dir_all(root.join("covers")).unwrap();
        let outside = tmp.path().join("target.png");
        std::fs::write(&outside, PNG).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("covers/link.png")).unwrap();

        let store = UploadStore::new(root);
        assert!(!store.delete(UploadKind::Cover, "covers/link.png"));
        assert!(outside.exists());
    }
}
