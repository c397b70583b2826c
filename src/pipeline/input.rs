//! Input resolution: turn a job's `image` reference into a local file.
//!
//! The reference is classified exactly once, by prefix, checked in order:
//!
//! | Prefix | Kind | Ownership |
//! |--------|------|-----------|
//! | `data:image` | inline base64 | decoded into an owned temp file |
//! | `http` | remote URL | downloaded into an owned temp file |
//! | anything else | local path | borrowed, never touched |
//!
//! Owned files are `tempfile::NamedTempFile`s carried inside the
//! [`ImageSource`] variant. Dropping the source deletes the file even when a
//! later stage fails or panics; [`ImageSource::release`] deletes it explicitly
//! and reports whether removal worked.

use crate::error::WorkerError;
use crate::pipeline::decode::{decode_data_uri, DATA_URI_PREFIX};
use crate::pipeline::fetch::ImageFetcher;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Suffix given to every temp image, whatever its real format.
pub const TEMP_IMAGE_SUFFIX: &str = ".jpg";

/// How a reference was classified, before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRef<'a> {
    Inline(&'a str),
    Url(&'a str),
    Local(&'a str),
}

impl<'a> ImageRef<'a> {
    pub fn classify(image: &'a str) -> Self {
        if image.starts_with(DATA_URI_PREFIX) {
            ImageRef::Inline(image)
        } else if is_url(image) {
            ImageRef::Url(image)
        } else {
            ImageRef::Local(image)
        }
    }
}

/// Loose URL test: any reference starting with `http`.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http")
}

/// The resolved image, with its ownership.
#[derive(Debug)]
pub enum ImageSource {
    /// Caller-supplied path; never created or deleted here.
    Local(PathBuf),
    /// Decoded inline payload in an owned temp file.
    Inline(NamedTempFile),
    /// Downloaded payload in an owned temp file.
    Downloaded { url: String, file: NamedTempFile },
}

impl ImageSource {
    /// Path to hand to the parser.
    pub fn path(&self) -> &Path {
        match self {
            ImageSource::Local(p) => p,
            ImageSource::Inline(file) => file.path(),
            ImageSource::Downloaded { file, .. } => file.path(),
        }
    }

    /// `true` when the adapter created the file and must delete it.
    pub fn is_owned(&self) -> bool {
        !matches!(self, ImageSource::Local(_))
    }

    /// Where a downloaded image came from.
    pub fn url(&self) -> Option<&str> {
        match self {
            ImageSource::Downloaded { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::Local(_) => "local",
            ImageSource::Inline(_) => "inline",
            ImageSource::Downloaded { .. } => "downloaded",
        }
    }

    /// Delete an owned temp file now. A no-op for local paths.
    pub fn release(self) -> Result<(), WorkerError> {
        let file = match self {
            ImageSource::Local(_) => return Ok(()),
            ImageSource::Inline(file) => file,
            ImageSource::Downloaded { file, .. } => file,
        };
        let path = file.path().to_path_buf();
        file.close()
            .map_err(|source| WorkerError::Cleanup { path: path.clone(), source })?;
        debug!("Removed temporary image {}", path.display());
        Ok(())
    }
}

/// Resolve a reference into an [`ImageSource`].
///
/// Temp files go to `temp_dir` when given, else the system temp directory.
pub async fn resolve_image(
    image: &str,
    fetcher: &dyn ImageFetcher,
    temp_dir: Option<&Path>,
) -> Result<ImageSource, WorkerError> {
    match ImageRef::classify(image) {
        ImageRef::Inline(uri) => {
            let bytes = decode_data_uri(uri)?;
            let file = write_temp_image(&bytes, temp_dir)?;
            debug!("Inline image written to {}", file.path().display());
            Ok(ImageSource::Inline(file))
        }
        ImageRef::Url(url) => {
            let bytes = fetcher.fetch(url).await?;
            let file = write_temp_image(&bytes, temp_dir)?;
            debug!("Downloaded image written to {}", file.path().display());
            Ok(ImageSource::Downloaded {
                url: url.to_string(),
                file,
            })
        }
        ImageRef::Local(path) => {
            debug!("Using local image path: {}", path);
            Ok(ImageSource::Local(PathBuf::from(path)))
        }
    }
}

fn write_temp_image(bytes: &[u8], temp_dir: Option<&Path>) -> Result<NamedTempFile, WorkerError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("dots-ocr-").suffix(TEMP_IMAGE_SUFFIX);
    let mut file = match temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(WorkerError::TempFile)?;

    file.write_all(bytes).map_err(WorkerError::TempFile)?;
    file.flush().map_err(WorkerError::TempFile)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    struct StaticFetcher(Vec<u8>);

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, WorkerError> {
            Ok(self.0.clone())
        }
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            ImageRef::classify("data:image/png;base64,AAAA"),
            ImageRef::Inline("data:image/png;base64,AAAA")
        );
        assert_eq!(
            ImageRef::classify("https://example.com/a.jpg"),
            ImageRef::Url("https://example.com/a.jpg")
        );
        assert_eq!(ImageRef::classify("http://x"), ImageRef::Url("http://x"));
        assert_eq!(ImageRef::classify("/tmp/a.jpg"), ImageRef::Local("/tmp/a.jpg"));
        assert_eq!(ImageRef::classify("a.jpg"), ImageRef::Local("a.jpg"));
        // Only the `data:image` prefix counts as inline.
        assert_eq!(
            ImageRef::classify("data:text/plain,hi"),
            ImageRef::Local("data:text/plain,hi")
        );
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.jpg"));
        assert!(is_url("http://example.com/doc.jpg"));
        assert!(!is_url("/tmp/doc.jpg"));
        assert!(!is_url(""));
    }

    #[tokio::test]
    async fn inline_image_owns_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("data:image/jpeg;base64,{}", STANDARD.encode(b"pixels"));
        let fetcher = StaticFetcher(Vec::new());

        let source = resolve_image(&uri, &fetcher, Some(dir.path())).await.unwrap();
        assert_eq!(source.kind(), "inline");
        assert!(source.is_owned());
        assert!(source.path().starts_with(dir.path()));
        assert_eq!(source.path().extension().unwrap(), "jpg");
        assert_eq!(std::fs::read(source.path()).unwrap(), b"pixels");

        let path = source.path().to_path_buf();
        source.release().unwrap();
        assert!(!path.exists());
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn dropped_source_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher(b"remote".to_vec());

        let source = resolve_image("http://example.test/a.jpg", &fetcher, Some(dir.path()))
            .await
            .unwrap();
        assert_eq!(source.kind(), "downloaded");
        assert_eq!(source.url(), Some("http://example.test/a.jpg"));
        assert_eq!(std::fs::read(source.path()).unwrap(), b"remote");
        drop(source);
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn local_path_is_borrowed() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("page.jpg");
        std::fs::write(&image, b"keep me").unwrap();
        let fetcher = StaticFetcher(Vec::new());

        let source = resolve_image(image.to_str().unwrap(), &fetcher, Some(dir.path()))
            .await
            .unwrap();
        assert!(!source.is_owned());
        assert_eq!(source.path(), image.as_path());
        source.release().unwrap();
        assert!(image.exists(), "local images must never be deleted");
        assert_eq!(dir_entries(dir.path()), 1);
    }

    #[tokio::test]
    async fn bad_inline_payload_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher(Vec::new());
        let err = resolve_image("data:image/jpeg;base64,%%%", &fetcher, Some(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Decode(_)));
        assert_eq!(dir_entries(dir.path()), 0);
    }
}
