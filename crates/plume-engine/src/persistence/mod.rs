//! Turns ephemeral vendor image references into durable URLs.
//!
//! Each reference is persisted on its own: a failing item records an error
//! on its artifact and never aborts the rest of the batch. Remote URLs that
//! cannot be re-hosted fall back to the vendor URL; encoded bytes have no
//! such fallback. A download answered with an HTTP error status is the
//! exception: the source is gone, so the artifact is marked failed.

mod store;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use plume_contracts::{ImageArtifact, ImageReference, SourceKind};
use reqwest::blocking::Client as HttpClient;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::transport::{error_chain_text, truncate_text};

pub use store::{
    store_from_config, HttpBlobStore, LocalDirStore, ObjectStore, PutOptions, StoredObject,
};

pub const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";
/// Artifact error for encoded bytes when no object store is configured.
pub const STORAGE_NOT_CONFIGURED: &str =
    "object storage is not configured; encoded image cannot be hosted";
const ERROR_CHARS: usize = 300;

struct ImageBytes {
    bytes: Vec<u8>,
    content_type: String,
}

enum DownloadError {
    /// The source answered with an error status; the URL is dead.
    Gone(String),
    /// Transport trouble; the URL may still work for the caller.
    Unreachable(anyhow::Error),
}

pub struct ArtifactPipeline {
    store: Option<Arc<dyn ObjectStore>>,
    http: HttpClient,
    download_timeout: Duration,
    concurrency: usize,
}

impl ArtifactPipeline {
    pub fn new(
        store: Option<Arc<dyn ObjectStore>>,
        http: HttpClient,
        download_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            http,
            download_timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub fn is_storage_configured(&self) -> bool {
        self.store.is_some()
    }

    /// Persists every reference, at most `concurrency` at a time. The output
    /// keeps the input order.
    pub fn persist_all(&self, scope: &str, references: Vec<ImageReference>) -> Vec<ImageArtifact> {
        if self.concurrency == 1 || references.len() <= 1 {
            return references
                .into_iter()
                .map(|reference| self.persist(scope, reference))
                .collect();
        }
        let mut artifacts = Vec::with_capacity(references.len());
        for chunk in references.chunks(self.concurrency) {
            let persisted: Vec<ImageArtifact> = thread::scope(|workers| {
                let handles: Vec<_> = chunk
                    .iter()
                    .cloned()
                    .map(|reference| workers.spawn(move || self.persist(scope, reference)))
                    .collect();
                handles
                    .into_iter()
                    .zip(chunk)
                    .map(|(handle, reference)| {
                        handle.join().unwrap_or_else(|_| {
                            let mut artifact = ImageArtifact::pending(reference.clone());
                            artifact.mark_failed("image persistence worker panicked".to_string());
                            artifact
                        })
                    })
                    .collect()
            });
            artifacts.extend(persisted);
        }
        artifacts
    }

    pub fn persist(&self, scope: &str, reference: ImageReference) -> ImageArtifact {
        let mut artifact = ImageArtifact::pending(reference);
        match artifact.source_kind {
            SourceKind::RemoteUrl => self.persist_remote(scope, &mut artifact),
            SourceKind::EncodedBytes => self.persist_encoded(scope, &mut artifact),
        }
        artifact
    }

    fn persist_remote(&self, scope: &str, artifact: &mut ImageArtifact) {
        let Some(store) = self.store.as_deref() else {
            debug!(target: "plume::persist", scope, "storage not configured; keeping vendor url");
            artifact.mark_fallback();
            return;
        };
        let image = match self.download_image(&artifact.raw_value) {
            Ok(image) => image,
            Err(DownloadError::Gone(message)) => {
                warn!(target: "plume::persist", scope, error = %message, "vendor image unavailable");
                artifact.mark_failed(message);
                return;
            }
            Err(DownloadError::Unreachable(err)) => {
                warn!(
                    target: "plume::persist",
                    scope,
                    error = %error_chain_text(&err, ERROR_CHARS),
                    "image download failed; keeping vendor url"
                );
                artifact.mark_fallback();
                return;
            }
        };
        match upload(store, scope, image) {
            Ok((url, content_type)) => artifact.mark_persisted(url, content_type),
            Err(err) => {
                warn!(
                    target: "plume::persist",
                    scope,
                    error = %error_chain_text(&err, ERROR_CHARS),
                    "upload failed; keeping vendor url"
                );
                artifact.mark_fallback();
            }
        }
    }

    fn persist_encoded(&self, scope: &str, artifact: &mut ImageArtifact) {
        let Some(store) = self.store.as_deref() else {
            artifact.mark_failed(STORAGE_NOT_CONFIGURED.to_string());
            return;
        };
        let outcome = decode_encoded(&artifact.raw_value).and_then(|image| upload(store, scope, image));
        match outcome {
            Ok((url, content_type)) => artifact.mark_persisted(url, content_type),
            Err(err) => {
                let message = error_chain_text(&err, ERROR_CHARS);
                warn!(target: "plume::persist", scope, error = %message, "encoded image not persisted");
                artifact.mark_failed(message);
            }
        }
    }

    fn download_image(&self, url: &str) -> Result<ImageBytes, DownloadError> {
        let response = self
            .http
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .context("image download request failed")
            .map_err(DownloadError::Unreachable)?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            let detail = truncate_text(body.trim(), 120);
            return Err(DownloadError::Gone(if detail.is_empty() {
                format!("image download failed ({code})")
            } else {
                format!("image download failed ({code}): {detail}")
            }));
        }
        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(media_type);
        let bytes = response
            .bytes()
            .context("failed reading image bytes")
            .map_err(DownloadError::Unreachable)?
            .to_vec();
        let content_type = header_type
            .or_else(|| sniff_content_type(&bytes))
            .unwrap_or_else(|| DEFAULT_IMAGE_TYPE.to_string());
        Ok(ImageBytes {
            bytes,
            content_type,
        })
    }
}

fn upload(store: &dyn ObjectStore, scope: &str, image: ImageBytes) -> Result<(String, String)> {
    let path = object_path(scope, &image.content_type, timestamp_millis());
    let options = PutOptions {
        content_type: image.content_type.clone(),
    };
    let stored = store
        .put(&path, image.bytes, &options)
        .with_context(|| format!("failed storing {path}"))?;
    debug!(target: "plume::persist", path = %path, "stored image");
    Ok((stored.url, image.content_type))
}

fn decode_encoded(raw: &str) -> Result<ImageBytes> {
    let trimmed = raw.trim();
    let (tag, payload) = match trimmed
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
    {
        Some((tag, payload)) => (media_type(tag), payload),
        None => (None, trimmed),
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .context("encoded image is not valid base64")?;
    if bytes.is_empty() {
        bail!("encoded image is empty");
    }
    let content_type = tag
        .or_else(|| sniff_content_type(&bytes))
        .unwrap_or_else(|| DEFAULT_IMAGE_TYPE.to_string());
    Ok(ImageBytes {
        bytes,
        content_type,
    })
}

/// `image/png; charset=binary` -> `image/png`
fn media_type(raw: &str) -> Option<String> {
    let value = raw.split(';').next()?.trim().to_ascii_lowercase();
    if value.is_empty() || !value.contains('/') {
        return None;
    }
    Some(value)
}

fn sniff_content_type(bytes: &[u8]) -> Option<String> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type().to_string())
}

fn extension_for(content_type: &str) -> String {
    let subtype = content_type
        .split('/')
        .nth(1)
        .unwrap_or_default()
        .split('+')
        .next()
        .unwrap_or_default()
        .trim();
    match subtype {
        "" => "jpg".to_string(),
        "jpeg" | "pjpeg" => "jpg".to_string(),
        other if other.chars().all(|c| c.is_ascii_alphanumeric()) => other.to_string(),
        _ => "bin".to_string(),
    }
}

fn object_path(scope: &str, content_type: &str, millis: u128) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "{scope}/{millis}-{}.{}",
        &id[..8],
        extension_for(content_type)
    )
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::bail;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use plume_contracts::ImageReference;
    use reqwest::blocking::Client as HttpClient;

    use super::{
        decode_encoded, extension_for, object_path, ArtifactPipeline, LocalDirStore, ObjectStore,
        PutOptions, StoredObject,
    };

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl ObjectStore for RecordingStore {
        fn put(&self, path: &str, _bytes: Vec<u8>, options: &PutOptions) -> anyhow::Result<StoredObject> {
            if self.fail {
                bail!("storage quota exceeded");
            }
            if let Ok(mut puts) = self.puts.lock() {
                puts.push((path.to_string(), options.content_type.clone()));
            }
            Ok(StoredObject {
                url: format!("https://store.example/{path}"),
            })
        }
    }

    fn pipeline(store: Option<Arc<dyn ObjectStore>>, concurrency: usize) -> ArtifactPipeline {
        ArtifactPipeline::new(store, HttpClient::new(), Duration::from_secs(5), concurrency)
    }

    #[test]
    fn remote_image_is_downloaded_and_stored() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _img = server
            .mock("GET", "/a.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(PNG_MAGIC)
            .create();
        let temp = tempfile::tempdir()?;
        let store: Arc<dyn ObjectStore> =
            Arc::new(LocalDirStore::new(temp.path(), "https://cdn.example"));
        let artifact = pipeline(Some(store), 1).persist(
            "xai-image",
            ImageReference::url(format!("{}/a.png", server.url())),
        );
        assert!(artifact.is_usable());
        assert!(!artifact.fallback);
        assert_eq!(artifact.content_type.as_deref(), Some("image/png"));
        let url = artifact.persisted_url.unwrap_or_default();
        assert!(url.starts_with("https://cdn.example/xai-image/"));
        assert!(url.ends_with(".png"));
        let relative = url.trim_start_matches("https://cdn.example/");
        assert_eq!(std::fs::read(temp.path().join(relative))?, PNG_MAGIC);
        Ok(())
    }

    #[test]
    fn missing_source_marks_artifact_failed() {
        let mut server = mockito::Server::new();
        let _gone = server.mock("GET", "/gone.png").with_status(404).create();
        let store: Arc<dyn ObjectStore> = Arc::new(RecordingStore::default());
        let artifact = pipeline(Some(store), 1).persist(
            "xai-image",
            ImageReference::url(format!("{}/gone.png", server.url())),
        );
        assert!(!artifact.is_usable());
        assert!(artifact.persisted_url.is_none());
        assert!(artifact
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("(404)"));
    }

    #[test]
    fn upload_failure_falls_back_to_vendor_url() {
        let mut server = mockito::Server::new();
        let _img = server
            .mock("GET", "/a.jpg")
            .with_status(200)
            .with_header("content-type", "image/jpeg")
            .with_body("jpeg")
            .create();
        let store: Arc<dyn ObjectStore> = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::default()
        });
        let url = format!("{}/a.jpg", server.url());
        let artifact = pipeline(Some(store), 1).persist("zhipuai-image", ImageReference::url(&url));
        assert!(artifact.is_usable());
        assert!(artifact.fallback);
        assert_eq!(artifact.persisted_url, Some(url));
    }

    #[test]
    fn unconfigured_storage_passes_urls_and_rejects_bytes() {
        let pipeline = pipeline(None, 3);
        assert!(!pipeline.is_storage_configured());
        let artifacts = pipeline.persist_all(
            "doubao-image",
            vec![
                ImageReference::url("https://vendor.example/a.png"),
                ImageReference::encoded(BASE64.encode(PNG_MAGIC)),
            ],
        );
        assert!(artifacts[0].is_usable());
        assert!(artifacts[0].fallback);
        assert!(!artifacts[1].is_usable());
        assert!(artifacts[1].error.is_some());
    }

    #[test]
    fn encoded_bytes_use_data_uri_tag_or_sniffed_type() -> anyhow::Result<()> {
        let tagged = decode_encoded(&format!("data:image/webp;base64,{}", BASE64.encode(b"RIFF")))?;
        assert_eq!(tagged.content_type, "image/webp");

        let sniffed = decode_encoded(&BASE64.encode(PNG_MAGIC))?;
        assert_eq!(sniffed.content_type, "image/png");

        let unknown = decode_encoded(&BASE64.encode(b"plain bytes"))?;
        assert_eq!(unknown.content_type, "image/jpeg");

        assert!(decode_encoded("not base64!!").is_err());
        assert!(decode_encoded("").is_err());
        Ok(())
    }

    #[test]
    fn batch_keeps_order_and_isolates_failures() {
        let store = Arc::new(RecordingStore::default());
        let shared: Arc<dyn ObjectStore> = store.clone();
        let references = vec![
            ImageReference::encoded(BASE64.encode(PNG_MAGIC)),
            ImageReference::encoded("%%%"),
            ImageReference::encoded(BASE64.encode(PNG_MAGIC)),
            ImageReference::encoded(BASE64.encode(b"GIF89a......")),
        ];
        let artifacts = pipeline(Some(shared), 2).persist_all("tongyi-image", references);
        assert_eq!(artifacts.len(), 4);
        assert!(artifacts[0].is_usable());
        assert!(!artifacts[1].is_usable());
        assert!(artifacts[2].is_usable());
        assert_eq!(artifacts[3].content_type.as_deref(), Some("image/gif"));
        assert_eq!(artifacts[1].raw_value, "%%%");
        assert_eq!(store.puts.lock().map(|puts| puts.len()).unwrap_or(0), 3);
    }

    #[test]
    fn object_paths_are_scoped_and_unique() {
        let first = object_path("xai-image", "image/jpeg", 1_700_000_000_000);
        let second = object_path("xai-image", "image/jpeg", 1_700_000_000_000);
        assert!(first.starts_with("xai-image/1700000000000-"));
        assert!(first.ends_with(".jpg"));
        assert_ne!(first, second);
        assert_eq!(extension_for("image/svg+xml"), "svg");
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for(""), "jpg");
    }
}
