//! Export command: fetch a conversation and write it with its images.

use std::path::Path;

use anyhow::{Context, Result};
use gptmd_core::client::ChatGptClient;
use gptmd_core::config::{Config, ExportOptions};
use gptmd_core::export::{Export, ExportError, ExportPipeline, conversation_id_from_url};
use gptmd_core::persist::{DirectorySink, persist_all};

pub struct ExportRunOptions<'a> {
    /// Conversation id or URL as typed by the user.
    pub conversation: &'a str,
    pub out: Option<&'a Path>,
    pub token: Option<&'a str>,
    pub options: ExportOptions,
    pub config: &'a Config,
}

pub async fn run(opts: ExportRunOptions<'_>) -> Result<()> {
    let conversation_id = conversation_id_from_url(opts.conversation).ok_or_else(|| {
        ExportError::MissingConversationId {
            input: opts.conversation.to_string(),
        }
    })?;

    let client = ChatGptClient::from_config(opts.config, opts.token)?;
    let record = client.fetch_conversation(&conversation_id).await?;

    let export = ExportPipeline::new(opts.options, &client)
        .with_filename_prefix(&opts.config.filename_prefix)
        .export(&record, &conversation_id)
        .await
        .with_context(|| format!("export conversation {conversation_id}"))?;

    let dir = opts
        .out
        .map_or_else(|| opts.config.output_dir(), Path::to_path_buf);
    save(&export, &dir)
}

/// Writes every file of `export` into `dir` and prints where they went.
///
/// All files are attempted; the command fails afterwards if any could not be
/// written.
pub(crate) fn save(export: &Export, dir: &Path) -> Result<()> {
    let report = persist_all(&export.files, &DirectorySink::new(dir));

    for path in &report.saved {
        println!("{}", path.display());
    }
    for (filename, error) in &report.failed {
        eprintln!("Failed to save {filename}: {error}");
    }

    if !report.is_complete() {
        anyhow::bail!(
            "{} of {} files could not be saved to {}",
            report.failed.len(),
            export.files.len(),
            dir.display()
        );
    }
    eprintln!(
        "Exported {} with {} image(s) to {}",
        export.markdown_filename(),
        export.image_count(),
        dir.display()
    );
    Ok(())
}
