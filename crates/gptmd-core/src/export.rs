//! Export pipeline: one conversation record in, a Markdown document and its
//! image files out.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::assets::{AssetResolver, AttachmentSource};
use crate::config::{Config, ExportOptions, TimeZoneMode};
use crate::conversation::ConversationRecord;
use crate::files::{sanitize_file_name, truncate_with_ellipsis};
use crate::render::{DocumentMeta, render};
use crate::traverse::traverse;
use crate::tree::NodeArena;

/// Timestamp layout embedded in every exported filename.
pub const FILENAME_TIME_FORMAT: &str = "%Y%m%d%H%M%S";
/// Titles longer than this are cut and suffixed with `...`.
pub const MAX_TITLE_CHARS: usize = 60;

const MARKDOWN_MIME: &str = "text/markdown";

/// Conditions that abort a whole export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// The record has no node mapping at all.
    MissingMapping,
    /// No conversation id could be derived from the given input.
    MissingConversationId { input: String },
    /// No access token was supplied by flag, config or environment.
    MissingCredential,
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::MissingMapping => {
                write!(f, "conversation record has no message mapping")
            }
            ExportError::MissingConversationId { input } => {
                write!(f, "could not determine a conversation id from '{input}'")
            }
            ExportError::MissingCredential => write!(
                f,
                "no access token; pass --token, set access_token in config.toml or GPTMD_ACCESS_TOKEN"
            ),
        }
    }
}

impl std::error::Error for ExportError {}

/// One file produced by an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    pub filename: String,
    pub bytes: Bytes,
    pub mime_type: String,
}

/// Result of one export.
#[derive(Debug, Clone)]
pub struct Export {
    pub markdown: String,
    /// The Markdown document first, then every resolved image in document order.
    pub files: Vec<AssetFile>,
}

impl Export {
    pub fn markdown_filename(&self) -> &str {
        self.files.first().map_or("", |f| f.filename.as_str())
    }

    pub fn image_count(&self) -> usize {
        self.files.len().saturating_sub(1)
    }
}

/// Drives traversal and rendering for single conversations.
pub struct ExportPipeline<'a, S> {
    options: ExportOptions,
    filename_prefix: String,
    source: &'a S,
}

impl<'a, S: AttachmentSource> ExportPipeline<'a, S> {
    pub fn new(options: ExportOptions, source: &'a S) -> Self {
        Self {
            options,
            filename_prefix: Config::DEFAULT_FILENAME_PREFIX.to_string(),
            source,
        }
    }

    /// Replaces the literal token that starts every filename.
    #[must_use]
    pub fn with_filename_prefix(mut self, token: impl Into<String>) -> Self {
        self.filename_prefix = token.into();
        self
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Exports `record`.
    ///
    /// Every per-message and per-image problem is logged and skipped; only a
    /// missing mapping or a blank conversation id fail the export.
    ///
    /// # Errors
    /// Returns [`ExportError::MissingMapping`] or
    /// [`ExportError::MissingConversationId`].
    pub async fn export(
        &self,
        record: &ConversationRecord,
        conversation_id: &str,
    ) -> Result<Export, ExportError> {
        let mapping = record.mapping.as_ref().ok_or(ExportError::MissingMapping)?;
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(ExportError::MissingConversationId {
                input: conversation_id.to_string(),
            });
        }

        let prefix = filename_prefix(
            &self.filename_prefix,
            record.created_at().unwrap_or_else(Utc::now),
            self.options.timezone,
        );
        let md_name = markdown_filename(&prefix, record.display_title(), conversation_id);

        let mut resolver = AssetResolver::new(self.source, conversation_id, prefix);
        resolver.reserve(&md_name);

        let traversal = traverse(NodeArena::new(mapping), &self.options, &mut resolver).await;
        let markdown = render(
            &DocumentMeta::from_record(record),
            &traversal.blocks,
            &self.options,
        );

        let mut files = Vec::with_capacity(traversal.images.len() + 1);
        files.push(AssetFile {
            filename: md_name,
            bytes: Bytes::from(markdown.clone()),
            mime_type: MARKDOWN_MIME.to_string(),
        });
        files.extend(traversal.images.into_iter().map(|image| AssetFile {
            filename: image.filename,
            bytes: image.bytes,
            mime_type: image.mime_type,
        }));

        info!(
            conversation = conversation_id,
            nodes = mapping.len(),
            blocks = traversal.blocks.len(),
            images = files.len() - 1,
            "conversation exported"
        );

        Ok(Export { markdown, files })
    }
}

/// `<token>_<YYYYMMDDhhmmss>_`, shared by every file of one export.
pub fn filename_prefix(token: &str, created: DateTime<Utc>, tz: TimeZoneMode) -> String {
    format!("{token}_{}_", tz.format(created, FILENAME_TIME_FORMAT))
}

/// Name of the Markdown document.
pub fn markdown_filename(prefix: &str, title: Option<&str>, conversation_id: &str) -> String {
    match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => {
            let title = truncate_with_ellipsis(title, MAX_TITLE_CHARS);
            sanitize_file_name(&format!("{prefix}{title}.md"))
        }
        None => sanitize_file_name(&format!("{prefix}conversation_{conversation_id}.md")),
    }
}

/// Extracts a conversation id from a bare id or a conversation URL.
///
/// Returns the last non-empty path segment, e.g. `abc` for
/// `https://chatgpt.com/c/abc?model=x`.
pub fn conversation_id_from_url(input: &str) -> Option<String> {
    let input = input.trim();
    if let Ok(url) = url::Url::parse(input)
        && url.has_host()
    {
        return url
            .path_segments()?
            .filter(|s| !s.is_empty())
            .next_back()
            .map(ToString::to_string);
    }

    input
        .split(['?', '#'])
        .next()?
        .split('/')
        .filter(|s| !s.is_empty())
        .next_back()
        .map(ToString::to_string)
}
