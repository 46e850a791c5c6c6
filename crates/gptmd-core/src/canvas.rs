//! Canvas document replay.
//!
//! An assistant `code` message announces an edit (full replacement text
//! and/or an ordered list of regex patches). The edit stays pending until the
//! next tool message that names a canvas document, which applies it to that
//! document's buffer and clears it.
//!
//! The announcement does not carry a reliable document id, so by default a
//! single pending slot is shared by all documents ([`PendingScope::Shared`]).
//! [`PendingScope::PerDocument`] parks announcements that do name a document
//! under that id instead.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Pattern used when a patch operation omits one.
const DEFAULT_PATTERN: &str = ".*";

/// How announced canvas edits are matched to apply signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PendingScope {
    /// One slot for the whole conversation; any apply signal consumes it.
    #[default]
    Shared,
    /// Announcements naming a document wait for that document's apply signal.
    PerDocument,
}

/// One regex search/replace step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOperation {
    pub pattern: String,
    pub replacement: String,
    /// Replace every non-overlapping match instead of only the first.
    pub multiple: bool,
}

impl PatchOperation {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>, multiple: bool) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            multiple,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            pattern: obj
                .get("pattern")
                .and_then(Value::as_str)
                .filter(|p| !p.is_empty())
                .unwrap_or(DEFAULT_PATTERN)
                .to_string(),
            replacement: obj
                .get("replacement")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            multiple: obj.get("multiple").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    /// Applies this operation to `text`, returning the new text.
    ///
    /// `.` matches newlines. Patterns the `regex` crate rejects (lookaround,
    /// backreferences) are retried with `fancy_regex`. The replacement uses
    /// `$&` / `$1` / `$<name>` / `` $` `` / `$'` / `$$` substitutions.
    ///
    /// # Errors
    /// Returns an error if the pattern does not compile, or if the
    /// backtracking engine gives up while matching.
    pub fn apply(&self, text: &str) -> Result<String, PatchError> {
        let limit = if self.multiple { usize::MAX } else { 1 };
        match self.compile()? {
            Compiled::Linear(regex) => {
                let template = Template::parse(
                    &self.replacement,
                    regex.captures_len() - 1,
                    regex.capture_names().flatten().next().is_some(),
                );
                let matches = regex.captures_iter(text).take(limit).map(Ok);
                substitute(text, &template, matches)
            }
            Compiled::Backtracking(regex) => {
                let template = Template::parse(
                    &self.replacement,
                    regex.captures_len() - 1,
                    regex.capture_names().flatten().next().is_some(),
                );
                let matches = regex
                    .captures_iter(text)
                    .take(limit)
                    .map(|caps| caps.map_err(|err| self.error(err.to_string())));
                substitute(text, &template, matches)
            }
        }
    }

    fn compile(&self) -> Result<Compiled, PatchError> {
        match RegexBuilder::new(&self.pattern)
            .dot_matches_new_line(true)
            .build()
        {
            Ok(regex) => Ok(Compiled::Linear(regex)),
            Err(linear_err) => {
                debug!(pattern = %self.pattern, error = %linear_err, "retrying with backtracking engine");
                fancy_regex::Regex::new(&format!("(?s){}", self.pattern))
                    .map(Compiled::Backtracking)
                    .map_err(|err| self.error(err.to_string()))
            }
        }
    }

    fn error(&self, message: String) -> PatchError {
        PatchError {
            pattern: self.pattern.clone(),
            message,
        }
    }
}

enum Compiled {
    Linear(regex::Regex),
    Backtracking(fancy_regex::Regex),
}

/// A patch pattern that could not be compiled or run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchError {
    pub pattern: String,
    pub message: String,
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid patch pattern `{}`: {}", self.pattern, self.message)
    }
}

impl std::error::Error for PatchError {}

/// Byte spans of capture groups, shared by both regex engines.
trait GroupSpans {
    fn span(&self, index: usize) -> Option<Range<usize>>;
    fn named_span(&self, name: &str) -> Option<Range<usize>>;
}

impl GroupSpans for regex::Captures<'_> {
    fn span(&self, index: usize) -> Option<Range<usize>> {
        self.get(index).map(|m| m.range())
    }

    fn named_span(&self, name: &str) -> Option<Range<usize>> {
        self.name(name).map(|m| m.range())
    }
}

impl GroupSpans for fancy_regex::Captures<'_> {
    fn span(&self, index: usize) -> Option<Range<usize>> {
        self.get(index).map(|m| m.start()..m.end())
    }

    fn named_span(&self, name: &str) -> Option<Range<usize>> {
        self.name(name).map(|m| m.start()..m.end())
    }
}

fn substitute<C: GroupSpans>(
    text: &str,
    template: &Template,
    matches: impl Iterator<Item = Result<C, PatchError>>,
) -> Result<String, PatchError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in matches {
        let caps = caps?;
        let Some(whole) = caps.span(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start]);
        template.expand(text, &whole, &caps, &mut out);
        last = whole.end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[derive(Debug, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Group(usize),
    Named(String),
    Before,
    After,
}

/// A parsed ECMAScript-style replacement string.
#[derive(Debug, PartialEq, Eq)]
struct Template {
    pieces: Vec<Piece>,
}

impl Template {
    /// `groups` is the number of capture groups, not counting the whole match.
    /// `$<name>` stays literal when the pattern has no named groups.
    fn parse(replacement: &str, groups: usize, has_names: bool) -> Self {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut rest = replacement;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let mut push = |piece: Piece, literal: &mut String| {
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(literal)));
                }
                pieces.push(piece);
            };

            let bytes = after.as_bytes();
            rest = match bytes.first() {
                Some(b'$') => {
                    literal.push('$');
                    &after[1..]
                }
                Some(b'&') => {
                    push(Piece::Group(0), &mut literal);
                    &after[1..]
                }
                Some(b'`') => {
                    push(Piece::Before, &mut literal);
                    &after[1..]
                }
                Some(b'\'') => {
                    push(Piece::After, &mut literal);
                    &after[1..]
                }
                Some(d) if d.is_ascii_digit() => {
                    let first = usize::from(d - b'0');
                    let two_digit = bytes
                        .get(1)
                        .filter(|n| n.is_ascii_digit())
                        .map(|n| first * 10 + usize::from(n - b'0'))
                        .filter(|group| (1..=groups).contains(group));
                    if let Some(group) = two_digit {
                        push(Piece::Group(group), &mut literal);
                        &after[2..]
                    } else if (1..=groups).contains(&first) {
                        push(Piece::Group(first), &mut literal);
                        &after[1..]
                    } else {
                        literal.push('$');
                        after
                    }
                }
                Some(b'<') if has_names => match after.find('>') {
                    Some(end) => {
                        push(Piece::Named(after[1..end].to_string()), &mut literal);
                        &after[end + 1..]
                    }
                    None => {
                        literal.push('$');
                        after
                    }
                },
                _ => {
                    literal.push('$');
                    after
                }
            };
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        Self { pieces }
    }

    fn expand(&self, text: &str, whole: &Range<usize>, caps: &impl GroupSpans, out: &mut String) {
        for piece in &self.pieces {
            let span = match piece {
                Piece::Literal(s) => {
                    out.push_str(s);
                    continue;
                }
                Piece::Group(index) => caps.span(*index),
                Piece::Named(name) => caps.named_span(name),
                Piece::Before => Some(0..whole.start),
                Piece::After => Some(whole.end..text.len()),
            };
            if let Some(span) = span {
                out.push_str(&text[span]);
            }
        }
    }
}

/// An announced, not-yet-applied canvas edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingCanvasUpdate {
    /// Full replacement text (`content`).
    pub full_text: Option<String>,
    /// Older payloads carry the replacement under `text`.
    pub legacy_text: Option<String>,
    /// Ordered patch list (`updates`).
    pub patches: Option<Vec<PatchOperation>>,
    /// Target document, when the payload names one.
    pub document_id: Option<String>,
}

/// A code payload that is not a JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasParseError {
    pub message: String,
}

impl fmt::Display for CanvasParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code payload is not a canvas update: {}", self.message)
    }
}

impl std::error::Error for CanvasParseError {}

impl PendingCanvasUpdate {
    /// Parses an assistant code payload.
    ///
    /// # Errors
    /// Returns an error if the payload is not valid JSON or not a JSON object.
    pub fn parse(payload: &str) -> Result<Self, CanvasParseError> {
        let value: Value = serde_json::from_str(payload).map_err(|e| CanvasParseError {
            message: e.to_string(),
        })?;
        let Value::Object(obj) = value else {
            return Err(CanvasParseError {
                message: "expected a JSON object".to_string(),
            });
        };

        let string_field = |key: &str| obj.get(key).and_then(Value::as_str).map(ToString::to_string);

        let patches = obj.get("updates").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let op = PatchOperation::from_value(item);
                    if op.is_none() {
                        warn!(entry = %item, "ignoring canvas update entry that is not an object");
                    }
                    op
                })
                .collect()
        });

        Ok(Self {
            full_text: string_field("content"),
            legacy_text: string_field("text"),
            patches,
            document_id: string_field("textdoc_id")
                .or_else(|| string_field("id"))
                .filter(|id| !id.is_empty()),
        })
    }
}

/// Applies `pending` to `buffer` in place.
///
/// A full replacement (or legacy text) is installed first, then patches run
/// in order, each seeing the previous result. A patch whose pattern does not
/// compile is skipped and leaves the buffer as it was before that patch.
pub fn apply_pending(buffer: &mut String, pending: &PendingCanvasUpdate) {
    if let Some(text) = pending.full_text.as_ref().or(pending.legacy_text.as_ref()) {
        buffer.clone_from(text);
    }

    let Some(patches) = &pending.patches else {
        return;
    };
    for (index, op) in patches.iter().enumerate() {
        match op.apply(buffer) {
            Ok(next) => *buffer = next,
            Err(err) => warn!(index, error = %err, "skipping canvas patch"),
        }
    }
}

/// Pending slot(s) for one export run.
#[derive(Debug)]
enum PendingSlots {
    Shared(Option<PendingCanvasUpdate>),
    PerDocument {
        keyed: HashMap<String, PendingCanvasUpdate>,
        unassigned: Option<PendingCanvasUpdate>,
    },
}

/// Canvas buffers plus pending edits, scoped to a single export run.
#[derive(Debug)]
pub struct CanvasState {
    documents: HashMap<String, String>,
    pending: PendingSlots,
}

impl Default for CanvasState {
    fn default() -> Self {
        Self::new(PendingScope::default())
    }
}

impl CanvasState {
    pub fn new(scope: PendingScope) -> Self {
        let pending = match scope {
            PendingScope::Shared => PendingSlots::Shared(None),
            PendingScope::PerDocument => PendingSlots::PerDocument {
                keyed: HashMap::new(),
                unassigned: None,
            },
        };
        Self {
            documents: HashMap::new(),
            pending,
        }
    }

    /// Records an announced edit, replacing any unconsumed one in the same slot.
    pub fn announce(&mut self, update: PendingCanvasUpdate) {
        match &mut self.pending {
            PendingSlots::Shared(slot) => {
                if slot.is_some() {
                    debug!("replacing unconsumed canvas update");
                }
                *slot = Some(update);
            }
            PendingSlots::PerDocument { keyed, unassigned } => match update.document_id.clone() {
                Some(id) => {
                    keyed.insert(id, update);
                }
                None => *unassigned = Some(update),
            },
        }
    }

    /// Drops the edit that an unparseable announcement would have replaced.
    pub fn discard_pending(&mut self) {
        match &mut self.pending {
            PendingSlots::Shared(slot) => *slot = None,
            PendingSlots::PerDocument { unassigned, .. } => *unassigned = None,
        }
    }

    /// Applies the pending edit for `document_id` (an empty edit if none) and
    /// returns the document's resulting text.
    pub fn apply(&mut self, document_id: &str) -> &str {
        let pending = match &mut self.pending {
            PendingSlots::Shared(slot) => slot.take(),
            PendingSlots::PerDocument { keyed, unassigned } => {
                keyed.remove(document_id).or_else(|| unassigned.take())
            }
        }
        .unwrap_or_default();

        let buffer = self.documents.entry(document_id.to_string()).or_default();
        apply_pending(buffer, &pending);
        buffer.as_str()
    }

    /// Current text of a document; empty for a document never seen.
    pub fn text(&self, document_id: &str) -> &str {
        self.documents.get(document_id).map_or("", String::as_str)
    }

    pub fn has_pending(&self) -> bool {
        match &self.pending {
            PendingSlots::Shared(slot) => slot.is_some(),
            PendingSlots::PerDocument { keyed, unassigned } => {
                !keyed.is_empty() || unassigned.is_some()
            }
        }
    }
}
