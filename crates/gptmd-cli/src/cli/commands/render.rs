//! Render command: export a saved conversation JSON without network access.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use gptmd_core::assets::OfflineSource;
use gptmd_core::config::{Config, ExportOptions};
use gptmd_core::conversation::ConversationRecord;
use gptmd_core::export::ExportPipeline;

pub struct RenderRunOptions<'a> {
    pub file: &'a Path,
    /// Overrides the id stored in the record.
    pub id: Option<&'a str>,
    pub out: Option<&'a Path>,
    pub stdout: bool,
    pub options: ExportOptions,
    pub config: &'a Config,
}

pub async fn run(opts: RenderRunOptions<'_>) -> Result<()> {
    let json = fs::read_to_string(opts.file)
        .with_context(|| format!("read {}", opts.file.display()))?;
    let record = ConversationRecord::from_json(&json)
        .with_context(|| format!("parse conversation from {}", opts.file.display()))?;

    // Falls back to the record's own id, then the file stem.
    let conversation_id = opts
        .id
        .map(ToString::to_string)
        .or_else(|| record.conversation_id.clone())
        .or_else(|| {
            opts.file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    let export = ExportPipeline::new(opts.options, &OfflineSource)
        .with_filename_prefix(&opts.config.filename_prefix)
        .export(&record, &conversation_id)
        .await
        .with_context(|| format!("render {}", opts.file.display()))?;

    if opts.stdout {
        print!("{}", export.markdown);
        if !export.markdown.ends_with('\n') {
            println!();
        }
        return Ok(());
    }

    let dir = opts
        .out
        .map_or_else(|| opts.config.output_dir(), Path::to_path_buf);
    super::export::save(&export, &dir)
}
