//! Markdown rendering of traversed blocks.

use chrono::{DateTime, Utc};

use crate::config::{ExportOptions, TimeZoneMode};
use crate::conversation::{ConversationRecord, Role};

/// Format for every timestamp shown inside the document.
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Heading used when the conversation has no usable title.
pub const UNTITLED: &str = "Untitled";

const FENCE: &str = "```";
const QUOTE_PREFIX: &str = "> ";

/// How a block body is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFormat {
    /// Wrapped in a fenced literal block.
    Fenced,
    /// One Markdown line per body line.
    Plain,
    /// Every line prefixed with `> `.
    Quoted,
}

/// One section of the output document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderableBlock {
    pub role: Role,
    pub timestamp: Option<DateTime<Utc>>,
    pub body: String,
    pub format: BlockFormat,
}

impl RenderableBlock {
    pub fn new(
        role: Role,
        timestamp: Option<DateTime<Utc>>,
        body: impl Into<String>,
        quote_other_roles: bool,
    ) -> Self {
        let format = match role {
            Role::User => BlockFormat::Fenced,
            Role::Assistant => BlockFormat::Plain,
            _ if quote_other_roles => BlockFormat::Quoted,
            _ => BlockFormat::Plain,
        };
        Self {
            role,
            timestamp,
            body: body.into(),
            format,
        }
    }
}

/// Document-level metadata shown above the blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMeta {
    pub title: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl DocumentMeta {
    pub fn from_record(record: &ConversationRecord) -> Self {
        Self {
            title: record.display_title().map(ToString::to_string),
            created: record.created_at(),
            updated: record.updated_at(),
        }
    }
}

/// Renders the final Markdown text.
pub fn render(meta: &DocumentMeta, blocks: &[RenderableBlock], options: &ExportOptions) -> String {
    let tz = options.timezone;
    let mut lines: Vec<String> = Vec::new();

    let title = meta
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED);
    lines.push(format!("# {title}"));

    let times: Vec<String> = [("created", meta.created), ("updated", meta.updated)]
        .into_iter()
        .filter_map(|(label, ts)| ts.map(|ts| format!("{label}: {}", display_time(tz, ts))))
        .collect();
    if !times.is_empty() {
        lines.push(times.join(" / "));
        lines.push(String::new());
    }

    for block in blocks {
        lines.push(format!("### {}", block.role.label()));

        if options.show_timestamps
            && let Some(ts) = block.timestamp
        {
            lines.push(format!("({})\n", display_time(tz, ts)));
        }

        match block.format {
            BlockFormat::Fenced => {
                lines.push(FENCE.to_string());
                lines.extend(block.body.split('\n').map(ToString::to_string));
                lines.push(FENCE.to_string());
            }
            BlockFormat::Plain => {
                lines.extend(block.body.split('\n').map(ToString::to_string));
            }
            BlockFormat::Quoted => {
                lines.extend(block.body.split('\n').map(|line| {
                    if line.is_empty() {
                        QUOTE_PREFIX.trim_end().to_string()
                    } else {
                        format!("{QUOTE_PREFIX}{line}")
                    }
                }));
            }
        }

        lines.push("\n---\n".to_string());
    }

    lines.join("\n")
}

fn display_time(tz: TimeZoneMode, ts: DateTime<Utc>) -> String {
    tz.format(ts, DISPLAY_TIME_FORMAT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc_options() -> ExportOptions {
        ExportOptions {
            timezone: TimeZoneMode::Utc,
            ..Default::default()
        }
    }

    fn epoch() -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(0, 0)
    }

    #[test]
    fn test_single_user_block_layout() {
        let meta = DocumentMeta {
            title: Some("T".into()),
            created: epoch(),
            updated: None,
        };
        let blocks = vec![RenderableBlock::new(Role::User, None, "hello", false)];

        let md = render(&meta, &blocks, &utc_options());
        assert_eq!(
            md,
            "# T\ncreated: 1970-01-01 00:00:00\n\n### USER\n```\nhello\n```\n\n---\n"
        );
    }

    #[test]
    fn test_placeholder_title_and_no_meta_line() {
        let md = render(&DocumentMeta::default(), &[], &utc_options());
        assert_eq!(md, "# Untitled");

        let blank = DocumentMeta {
            title: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(render(&blank, &[], &utc_options()), "# Untitled");
    }

    #[test]
    fn test_created_and_updated_line() {
        let meta = DocumentMeta {
            title: Some("T".into()),
            created: epoch(),
            updated: DateTime::from_timestamp(90, 0),
        };
        let md = render(&meta, &[], &utc_options());
        assert_eq!(
            md,
            "# T\ncreated: 1970-01-01 00:00:00 / updated: 1970-01-01 00:01:30\n"
        );
    }

    #[test]
    fn test_assistant_lines_and_timestamp() {
        let options = ExportOptions {
            show_timestamps: true,
            ..utc_options()
        };
        let blocks = vec![
            RenderableBlock::new(Role::Assistant, epoch(), "line 1\nline 2", false),
            RenderableBlock::new(Role::Assistant, None, "no time", false),
        ];
        let md = render(&DocumentMeta::default(), &blocks, &options);
        assert_eq!(
            md,
            "# Untitled\n### ASSISTANT\n(1970-01-01 00:00:00)\n\nline 1\nline 2\n\n---\n\n### ASSISTANT\nno time\n\n---\n"
        );
    }

    #[test]
    fn test_timestamps_hidden_by_default() {
        let blocks = vec![RenderableBlock::new(Role::User, epoch(), "x", false)];
        let md = render(&DocumentMeta::default(), &blocks, &utc_options());
        assert!(!md.contains("(1970"));
    }

    #[test]
    fn test_other_roles_labels_and_quoting() {
        let system = Role::Other("system".into());
        let plain = RenderableBlock::new(system.clone(), None, "be brief", false);
        assert_eq!(plain.format, BlockFormat::Plain);
        let quoted = RenderableBlock::new(system, None, "be brief\n\nok", true);
        assert_eq!(quoted.format, BlockFormat::Quoted);
        // Assistant and user keep their layout even when quoting is on.
        assert_eq!(
            RenderableBlock::new(Role::Assistant, None, "a", true).format,
            BlockFormat::Plain
        );
        assert_eq!(
            RenderableBlock::new(Role::User, None, "u", true).format,
            BlockFormat::Fenced
        );

        let md = render(&DocumentMeta::default(), &[quoted], &utc_options());
        assert_eq!(md, "# Untitled\n### (SYSTEM)\n> be brief\n>\n> ok\n\n---\n");
    }

    #[test]
    fn test_meta_from_record() {
        let record = ConversationRecord {
            title: Some(" Notes ".into()),
            create_time: Some(0.0),
            ..Default::default()
        };
        let meta = DocumentMeta::from_record(&record);
        assert_eq!(meta.title.as_deref(), Some("Notes"));
        assert_eq!(meta.created, epoch());
        assert_eq!(meta.updated, None);
    }
}
