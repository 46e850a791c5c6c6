//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gptmd_core::canvas::PendingScope;
use gptmd_core::config::{self, ExportOptions, TimeZoneMode};
use gptmd_core::logging;

mod commands;

#[derive(Parser)]
#[command(name = "gptmd")]
#[command(version)]
#[command(about = "Export ChatGPT conversations to Markdown with their images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Rendering flags shared by `export` and `render`. Each one turns an option
/// on for this run only; unset flags keep the config value.
#[derive(clap::Args, Debug, Clone, Default)]
struct RenderArgs {
    /// Show a timestamp under each message heading
    #[arg(long)]
    timestamps: bool,

    /// Include every role (system, tool, ...) instead of only user/assistant
    #[arg(long = "all-roles")]
    all_roles: bool,

    /// Show image-generation prompts under generated images
    #[arg(long = "image-prompts")]
    image_prompts: bool,

    /// Render roles other than user/assistant as blockquotes
    #[arg(long = "quote-other-roles")]
    quote_other_roles: bool,

    /// Match announced canvas edits to their own document
    #[arg(long = "per-document-canvas")]
    per_document_canvas: bool,

    /// Format timestamps and filenames in UTC instead of local time
    #[arg(long)]
    utc: bool,
}

impl RenderArgs {
    fn apply(&self, mut options: ExportOptions) -> ExportOptions {
        options.show_timestamps |= self.timestamps;
        options.all_roles |= self.all_roles;
        options.show_image_prompts |= self.image_prompts;
        options.quote_other_roles |= self.quote_other_roles;
        if self.per_document_canvas {
            options.pending_scope = PendingScope::PerDocument;
        }
        if self.utc {
            options.timezone = TimeZoneMode::Utc;
        }
        options
    }
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Fetch a conversation and export it with its images
    Export {
        /// Conversation id or URL (e.g. https://chatgpt.com/c/<id>)
        #[arg(value_name = "CONVERSATION")]
        conversation: String,

        /// Output directory (default: config output_dir, else current directory)
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Access token (overrides config and GPTMD_ACCESS_TOKEN)
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Render a saved conversation JSON file offline (images are skipped)
    Render {
        /// Path to the conversation JSON
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Conversation id used for fallback filenames
        #[arg(long, value_name = "ID")]
        id: Option<String>,

        /// Output directory (default: config output_dir, else current directory)
        #[arg(short, long, value_name = "DIR", conflicts_with = "stdout")]
        out: Option<PathBuf>,

        /// Print the Markdown instead of writing files
        #[arg(long)]
        stdout: bool,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Generate a fresh config from Rust defaults (for xtask)
    Generate,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load().context("load config")?;
    let _log_guard = logging::init(&config.logging, cli.verbose).context("init logging")?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli, config).await })
}

async fn dispatch(cli: Cli, config: config::Config) -> Result<()> {
    match cli.command {
        Commands::Export {
            conversation,
            out,
            token,
            render,
        } => {
            commands::export::run(commands::export::ExportRunOptions {
                conversation: &conversation,
                out: out.as_deref(),
                token: token.as_deref(),
                options: render.apply(config.export.clone()),
                config: &config,
            })
            .await
        }
        Commands::Render {
            file,
            id,
            out,
            stdout,
            render,
        } => {
            commands::render::run(commands::render::RenderRunOptions {
                file: &file,
                id: id.as_deref(),
                out: out.as_deref(),
                stdout,
                options: render.apply(config.export.clone()),
                config: &config,
            })
            .await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Generate => commands::config::generate(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_args_only_turn_options_on() {
        let configured = ExportOptions {
            all_roles: true,
            ..Default::default()
        };
        let merged = RenderArgs {
            timestamps: true,
            utc: true,
            ..Default::default()
        }
        .apply(configured);

        assert!(merged.all_roles);
        assert!(merged.show_timestamps);
        assert!(!merged.show_image_prompts);
        assert_eq!(merged.timezone, TimeZoneMode::Utc);
        assert_eq!(merged.pending_scope, PendingScope::Shared);
    }

    #[test]
    fn test_cli_parses_export_flags() {
        let cli = Cli::try_parse_from([
            "gptmd",
            "-vv",
            "export",
            "https://chatgpt.com/c/abc",
            "--out",
            "/tmp/x",
            "--per-document-canvas",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Export {
            conversation,
            out,
            render,
            ..
        } = cli.command
        else {
            panic!("expected export command");
        };
        assert_eq!(conversation, "https://chatgpt.com/c/abc");
        assert_eq!(out, Some(PathBuf::from("/tmp/x")));
        assert!(render.per_document_canvas);
    }

    #[test]
    fn test_render_out_conflicts_with_stdout() {
        let result = Cli::try_parse_from(["gptmd", "render", "c.json", "--out", "d", "--stdout"]);
        assert!(result.is_err());
    }
}
