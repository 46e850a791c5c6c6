//! Image asset resolution.
//!
//! An image part only carries an opaque pointer. Turning it into bytes takes
//! two round-trips through an [`AttachmentSource`]: attachment metadata (which
//! holds a signed download URL) and then the download itself. Any failure
//! skips that one image; it never aborts the export.

use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::conversation::ImagePart;
use crate::files::{mime_type_for_extension, sanitize_file_name};

/// Pointer schemes stripped to obtain the raw file id.
const POINTER_SCHEMES: [&str; 2] = ["file-service://", "sediment://"];
/// Query parameter that marks a usable signed URL.
const SIGNATURE_PARAM: &str = "sig";
const FALLBACK_MIME: &str = "application/octet-stream";

/// Category of an attachment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection failure or timeout
    Request,
    /// Response body could not be decoded
    Parse,
    /// No transport available (offline rendering)
    Unavailable,
}

impl fmt::Display for AssetErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetErrorKind::HttpStatus => write!(f, "http_status"),
            AssetErrorKind::Request => write!(f, "request"),
            AssetErrorKind::Parse => write!(f, "parse"),
            AssetErrorKind::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Failure of one attachment round-trip.
#[derive(Debug, Clone)]
pub struct AssetError {
    pub kind: AssetErrorKind,
    pub message: String,
}

impl AssetError {
    pub fn new(kind: AssetErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn http_status(status: u16, url: &str) -> Self {
        Self::new(AssetErrorKind::HttpStatus, format!("HTTP {status} from {url}"))
    }
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AssetError {}

/// Attachment metadata returned by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentMetadata {
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// A downloaded payload.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Transport that resolves attachments; implemented by the HTTP client.
pub trait AttachmentSource {
    /// Fetches attachment metadata for `file_id` within a conversation.
    fn attachment(
        &self,
        conversation_id: &str,
        file_id: &str,
    ) -> impl Future<Output = Result<AttachmentMetadata, AssetError>> + Send;

    /// Downloads the payload behind a signed URL.
    fn download(&self, url: &str) -> impl Future<Output = Result<Download, AssetError>> + Send;
}

/// Source used when no transport is available; every lookup fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSource;

impl AttachmentSource for OfflineSource {
    async fn attachment(
        &self,
        _conversation_id: &str,
        file_id: &str,
    ) -> Result<AttachmentMetadata, AssetError> {
        Err(AssetError::new(
            AssetErrorKind::Unavailable,
            format!("offline; cannot resolve {file_id}"),
        ))
    }

    async fn download(&self, url: &str) -> Result<Download, AssetError> {
        Err(AssetError::new(
            AssetErrorKind::Unavailable,
            format!("offline; cannot download {url}"),
        ))
    }
}

/// A resolved image ready to be embedded and saved.
#[derive(Debug, Clone)]
pub struct ImageReference {
    pub pointer: String,
    pub filename: String,
    pub prompt: Option<String>,
    pub bytes: Bytes,
    pub mime_type: String,
}

impl ImageReference {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Strips a known scheme prefix from an asset pointer.
pub fn file_id_from_pointer(pointer: &str) -> &str {
    POINTER_SCHEMES
        .iter()
        .find_map(|scheme| pointer.strip_prefix(scheme))
        .unwrap_or(pointer)
}

/// Whether a signed download URL carries the signature parameter.
///
/// Only the query is inspected, so host-relative URLs count too.
pub fn has_signature(url: &str) -> bool {
    let query = url.split_once('?').map_or("", |(_, query)| query);
    let query = query.split_once('#').map_or(query, |(query, _)| query);
    url::form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == SIGNATURE_PARAM)
}

/// Resolves image parts for one export, issuing unique prefixed filenames.
pub struct AssetResolver<'a, S> {
    source: &'a S,
    conversation_id: String,
    prefix: String,
    /// Numbers the `image_<n>.webp` fallback; advances once per resolved image.
    counter: usize,
    issued: HashSet<String>,
}

impl<'a, S: AttachmentSource> AssetResolver<'a, S> {
    pub fn new(source: &'a S, conversation_id: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            source,
            conversation_id: conversation_id.into(),
            prefix: prefix.into(),
            counter: 1,
            issued: HashSet::new(),
        }
    }

    /// Marks a filename as taken (e.g. the Markdown document itself).
    pub fn reserve(&mut self, filename: &str) {
        self.issued.insert(filename.to_string());
    }

    /// Resolves one image part, or `None` if it has to be skipped.
    pub async fn resolve(&mut self, part: &ImagePart) -> Option<ImageReference> {
        let file_id = file_id_from_pointer(&part.asset_pointer);

        let metadata = match self.source.attachment(&self.conversation_id, file_id).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(file_id, error = %err, "attachment lookup failed; skipping image");
                return None;
            }
        };

        let Some(url) = metadata
            .download_url
            .as_deref()
            .filter(|url| has_signature(url))
        else {
            info!(
                file_id,
                url = metadata.download_url.as_deref().unwrap_or_default(),
                "download URL has no signature; skipping image"
            );
            return None;
        };

        let download = match self.source.download(url).await {
            Ok(download) => download,
            Err(err) => {
                warn!(file_id, error = %err, "image download failed; skipping image");
                return None;
            }
        };
        debug!(file_id, size = download.bytes.len(), "fetched image");

        let original = metadata
            .file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("image_{}.webp", self.counter), ToString::to_string);
        let filename = self.unique_name(sanitize_file_name(&format!("{}{original}", self.prefix)));
        self.counter += 1;

        let mime_type = mime_type_for_extension(&filename)
            .map(ToString::to_string)
            .or(download.content_type)
            .unwrap_or_else(|| FALLBACK_MIME.to_string());

        Some(ImageReference {
            pointer: part.asset_pointer.clone(),
            filename,
            prompt: part.prompt.clone(),
            bytes: download.bytes,
            mime_type,
        })
    }

    /// Returns `name`, or `stem_<k>.ext` if `name` was already issued.
    fn unique_name(&mut self, name: String) -> String {
        if self.issued.insert(name.clone()) {
            return name;
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (name.clone(), String::new()),
        };
        let mut k = 2;
        loop {
            let candidate = format!("{stem}_{k}{ext}");
            if self.issued.insert(candidate.clone()) {
                return candidate;
            }
            k += 1;
        }
    }
}
