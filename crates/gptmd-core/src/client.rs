//! HTTP transport for the ChatGPT backend API.
//!
//! Supplies the conversation record and implements the two-step attachment
//! resolution ([`AttachmentSource`]) used by the exporter.

use std::fmt;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::assets::{AssetError, AssetErrorKind, AttachmentMetadata, AttachmentSource, Download};
use crate::config::Config;
use crate::conversation::ConversationRecord;
use crate::export::ExportError;

pub const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api";
pub const BASE_URL_ENV: &str = "GPTMD_BASE_URL";
pub const ACCESS_TOKEN_ENV: &str = "GPTMD_ACCESS_TOKEN";

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/png,image/*;q=0.8,*/*;q=0.5";
const CLIENT_USER_AGENT: &str = concat!("gptmd/", env!("CARGO_PKG_VERSION"));

/// Session bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Resolves the access token.
///
/// Resolution order:
/// 1. `flag` (command line)
/// 2. `access_token` in config.toml
/// 3. `GPTMD_ACCESS_TOKEN` environment variable
///
/// # Errors
/// Returns [`ExportError::MissingCredential`] if none is set.
pub fn resolve_access_token(flag: Option<&str>, config: &Config) -> Result<AccessToken, ExportError> {
    let env = std::env::var(ACCESS_TOKEN_ENV).ok();
    pick_access_token(flag, config.effective_access_token(), env.as_deref())
}

fn pick_access_token(
    flag: Option<&str>,
    config: Option<&str>,
    env: Option<&str>,
) -> Result<AccessToken, ExportError> {
    [flag, config, env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(AccessToken::new)
        .ok_or(ExportError::MissingCredential)
}

/// Resolves the backend base URL.
///
/// Resolution order:
/// 1. `GPTMD_BASE_URL` env var (if set and non-empty)
/// 2. `config_base_url` (if Some and non-empty)
/// 3. Default: `https://chatgpt.com/backend-api`
///
/// # Errors
/// Returns an error if the chosen URL does not parse.
pub fn resolve_base_url(config_base_url: Option<&str>) -> Result<String> {
    let env = std::env::var(BASE_URL_ENV).ok();
    pick_base_url(env.as_deref(), config_base_url)
}

fn pick_base_url(env: Option<&str>, config: Option<&str>) -> Result<String> {
    let chosen = [env, config]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|u| !u.is_empty());

    match chosen {
        Some(url) => {
            validate_url(url)?;
            Ok(url.trim_end_matches('/').to_string())
        }
        None => Ok(DEFAULT_BASE_URL.to_string()),
    }
}

fn validate_url(url: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid base URL: {url}"))?;
    Ok(())
}

/// ChatGPT backend API client.
pub struct ChatGptClient {
    base_url: String,
    token: AccessToken,
    http: reqwest::Client,
}

impl ChatGptClient {
    /// Creates a client for `base_url` authenticated with `token`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built (e.g. the TLS
    /// backend fails to initialize).
    ///
    /// # Panics
    /// In test builds, panics if `base_url` is the production API.
    /// Point `GPTMD_BASE_URL` or the config at a mock server instead.
    pub fn new(base_url: impl Into<String>, token: AccessToken) -> Result<Self> {
        let base_url = base_url.into();

        #[cfg(test)]
        assert!(
            base_url != DEFAULT_BASE_URL,
            "Tests must not use the production API; found base_url: {base_url}"
        );

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url,
            token,
            http,
        })
    }

    /// Builds a client from config, with an optional command-line token.
    ///
    /// # Errors
    /// Returns an error if no token is available or the base URL is invalid.
    pub fn from_config(config: &Config, token_flag: Option<&str>) -> Result<Self> {
        let token = resolve_access_token(token_flag, config)?;
        let base_url = resolve_base_url(config.effective_base_url())?;
        Self::new(base_url, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token.expose())
    }

    /// Attachment metadata may hand back a path on our own host; those are
    /// resolved against the base URL's origin.
    fn download_url(&self, url: &str) -> Result<url::Url, AssetError> {
        match url::Url::parse(url) {
            Ok(parsed) => Ok(parsed),
            Err(url::ParseError::RelativeUrlWithoutBase) => url::Url::parse(&self.base_url)
                .and_then(|base| base.join(url))
                .map_err(|e| AssetError::new(AssetErrorKind::Parse, format!("{url}: {e}"))),
            Err(e) => Err(AssetError::new(AssetErrorKind::Parse, format!("{url}: {e}"))),
        }
    }

    /// Fetches one conversation record.
    ///
    /// # Errors
    /// Returns an error on transport failure, a non-success status or an
    /// unparseable body.
    pub async fn fetch_conversation(&self, conversation_id: &str) -> Result<ConversationRecord> {
        let url = format!("{}/conversation/{conversation_id}", self.base_url);
        debug!(url = %url, "fetching conversation");

        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await
            .with_context(|| format!("Failed to fetch conversation {conversation_id}"))?;

        let status = response.status();
        if !status.is_success() {
            let hint = match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => " (check the access token)",
                StatusCode::NOT_FOUND => " (unknown conversation id)",
                _ => "",
            };
            anyhow::bail!("HTTP {status} fetching conversation {conversation_id}{hint}");
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read conversation {conversation_id}"))?;
        ConversationRecord::from_json(&body)
            .with_context(|| format!("Failed to parse conversation {conversation_id}"))
    }
}

fn request_error(err: &reqwest::Error) -> AssetError {
    AssetError::new(AssetErrorKind::Request, err.to_string())
}

impl AttachmentSource for ChatGptClient {
    async fn attachment(
        &self,
        conversation_id: &str,
        file_id: &str,
    ) -> Result<AttachmentMetadata, AssetError> {
        let url = format!(
            "{}/conversation/{conversation_id}/attachment/{file_id}/download",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| request_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::http_status(status.as_u16(), &url));
        }

        response
            .json::<AttachmentMetadata>()
            .await
            .map_err(|e| AssetError::new(AssetErrorKind::Parse, e.to_string()))
    }

    async fn download(&self, url: &str) -> Result<Download, AssetError> {
        let url = self.download_url(url)?;
        debug!(url = %url, "downloading asset");
        // Signed URLs are self-authorizing; the bearer token stays on our API.
        let response = self
            .http
            .get(url.clone())
            .header(ACCEPT, IMAGE_ACCEPT)
            .send()
            .await
            .map_err(|e| request_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::http_status(status.as_u16(), url.as_str()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let bytes = response.bytes().await.map_err(|e| request_error(&e))?;

        Ok(Download {
            bytes,
            content_type,
        })
    }
}
