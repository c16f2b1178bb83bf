//! Marker attachment files
//!
//! Uploads are sorted into `images/`, `videos/` and `documents/` under the
//! storage root and published below [`FILES_ROUTE`]. A marker only keeps the
//! public URL; the file is removed when the marker drops it.

use std::path::{Path, PathBuf};

use axum::body::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AttachmentError;
use crate::utils::now_millis;

/// Mount point of the static file service
pub const FILES_ROUTE: &str = "/api/files";

/// Content types accepted for upload
pub const ALLOWED_CONTENT_TYPES: [&str; 11] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/mpeg",
    "video/quicktime",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// Folder an upload is filed under
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Video,
    Document,
}

impl AttachmentKind {
    pub const ALL: [AttachmentKind; 3] = [Self::Image, Self::Video, Self::Document];

    pub fn for_content_type(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            Self::Image
        } else if content_type.starts_with("video/") {
            Self::Video
        } else {
            Self::Document
        }
    }

    pub fn folder(&self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
            Self::Document => "documents",
        }
    }

    fn from_folder(folder: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.folder() == folder)
    }
}

/// A file received with a marker request
#[derive(Clone, Debug)]
pub struct Upload {
    /// Name the client gave the file
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Bytes,
}

impl Upload {
    /// Reject content types outside the whitelist
    pub fn check(&self) -> Result<AttachmentKind, AttachmentError> {
        let content_type = self.content_type.trim().to_ascii_lowercase();
        if ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            Ok(AttachmentKind::for_content_type(&content_type))
        } else {
            Err(AttachmentError::UnsupportedType(self.content_type.clone()))
        }
    }

    /// Extension of the client file name, if it is a plain one
    fn extension(&self) -> Option<String> {
        let ext = Path::new(self.file_name.as_deref()?).extension()?.to_str()?;
        (!ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .then(|| ext.to_ascii_lowercase())
    }
}

/// Attachment files on local disk
#[derive(Clone, Debug)]
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `upload` under a generated name and return its public URL
    pub async fn save(&self, upload: &Upload) -> Result<String, AttachmentError> {
        let kind = upload.check()?;
        let dir = self.root.join(kind.folder());
        tokio::fs::create_dir_all(&dir).await?;

        let mut name = format!("{}-{}", now_millis(), Uuid::new_v4().simple());
        if let Some(ext) = upload.extension() {
            name.push('.');
            name.push_str(&ext);
        }

        tokio::fs::write(dir.join(&name), &upload.bytes).await?;
        debug!(folder = kind.folder(), file = %name, bytes = upload.bytes.len(), "stored attachment");
        Ok(format!("{}/{}/{}", FILES_ROUTE, kind.folder(), name))
    }

    /// Local path behind a URL returned by [`save`](Self::save).
    ///
    /// Anything that does not point straight into one of the attachment
    /// folders yields `None`.
    pub fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix(FILES_ROUTE)?.strip_prefix('/')?;
        let (folder, name) = rest.split_once('/')?;
        let kind = AttachmentKind::from_folder(folder)?;
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.root.join(kind.folder()).join(name))
    }

    /// Best-effort removal of the file behind `url`
    pub async fn remove(&self, url: &str) -> bool {
        let Some(path) = self.path_for_url(url) else {
            debug!(url = %url, "attachment url is not a stored file");
            return false;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed attachment");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove attachment");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(content_type: &str, file_name: &str) -> Upload {
        Upload {
            file_name: Some(file_name.to_string()),
            content_type: content_type.to_string(),
            bytes: Bytes::from_static(b"payload"),
        }
    }

    #[test]
    fn test_folder_by_content_type() {
        assert_eq!(upload("image/png", "a.png").check().unwrap(), AttachmentKind::Image);
        assert_eq!(upload("video/mp4", "a.mp4").check().unwrap(), AttachmentKind::Video);
        assert_eq!(
            upload("application/pdf", "a.pdf").check().unwrap(),
            AttachmentKind::Document
        );
    }

    #[test]
    fn test_unlisted_type_rejected() {
        let err = upload("application/x-sh", "run.sh").check().unwrap_err();
        assert!(matches!(err, AttachmentError::UnsupportedType(t) if t == "application/x-sh"));
    }

    #[tokio::test]
    async fn test_save_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path());

        let url = store.save(&upload("image/jpeg", "Photo.JPG")).await.unwrap();
        assert!(url.starts_with("/api/files/images/"));
        assert!(url.ends_with(".jpg"));

        let path = store.path_for_url(&url).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");

        assert!(store.remove(&url).await);
        assert!(!path.exists());
        assert!(!store.remove(&url).await);
    }

    #[test]
    fn test_foreign_urls_are_not_resolved() {
        let store = AttachmentStore::new("/srv/files");
        assert!(store.path_for_url("https://cdn.example/x.png").is_none());
        assert!(store.path_for_url("/api/files/secrets/x.png").is_none());
        assert!(store.path_for_url("/api/files/images/../../etc/passwd").is_none());
        assert!(store.path_for_url("/api/files/images/..").is_none());
        assert_eq!(
            store.path_for_url("/api/files/videos/1-abc.mp4"),
            Some(PathBuf::from("/srv/files/videos/1-abc.mp4"))
        );
    }
}
