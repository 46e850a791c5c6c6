//! Conversation traversal: classifies every visited message and produces the
//! ordered blocks and image assets of one export.
//!
//! Classification, first match wins:
//!
//! 1. assistant `code` payload that parses as a canvas update: announce it, no block
//! 2. tool message naming a canvas document: apply the pending update, emit the document
//! 3. multimodal content: resolve each image, emit one block of image embeds
//! 4. anything else: plain text, subject to role filtering
//!
//! All of this runs sequentially; canvas replay depends on document order.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::assets::{AssetResolver, AttachmentSource, ImageReference};
use crate::canvas::{CanvasState, PendingCanvasUpdate};
use crate::config::ExportOptions;
use crate::conversation::{Content, ContentPart, Message, Role};
use crate::render::RenderableBlock;
use crate::tree::NodeArena;

/// Output of one traversal.
#[derive(Debug, Default)]
pub struct Traversal {
    pub blocks: Vec<RenderableBlock>,
    /// Resolved images in document order.
    pub images: Vec<ImageReference>,
}

/// Walks `arena` in pre-order and builds the export's blocks and images.
pub async fn traverse<S: AttachmentSource>(
    arena: NodeArena<'_>,
    options: &ExportOptions,
    resolver: &mut AssetResolver<'_, S>,
) -> Traversal {
    let mut walk = Walk {
        options,
        canvas: CanvasState::new(options.pending_scope),
        out: Traversal::default(),
    };

    for (id, node) in arena.preorder() {
        let Some(message) = &node.message else {
            debug!(node = id, "node has no message");
            continue;
        };
        walk.visit(id, message, resolver).await;
    }

    if walk.canvas.has_pending() {
        debug!("conversation ended with an unapplied canvas update");
    }
    walk.out
}

struct Walk<'o> {
    options: &'o ExportOptions,
    canvas: CanvasState,
    out: Traversal,
}

impl Walk<'_> {
    async fn visit<S: AttachmentSource>(
        &mut self,
        id: &str,
        message: &Message,
        resolver: &mut AssetResolver<'_, S>,
    ) {
        let role = message.role();

        if *role == Role::Assistant
            && let Content::Code { text, .. } = &message.content
        {
            match PendingCanvasUpdate::parse(text) {
                Ok(update) => {
                    debug!(node = id, "canvas update announced");
                    self.canvas.announce(update);
                }
                Err(err) => {
                    warn!(node = id, error = %err, "rendering code payload as text");
                    self.canvas.discard_pending();
                    self.push(Role::Assistant, message.timestamp(), text);
                }
            }
            return;
        }

        if *role == Role::Tool
            && let Some(document_id) = message.canvas_document_id()
        {
            let text = self.canvas.apply(document_id).to_string();
            debug!(node = id, document = document_id, len = text.len(), "canvas update applied");
            self.push(Role::Assistant, None, &text);
            return;
        }

        if let Content::Multimodal(parts) = &message.content {
            let body = self.resolve_images(parts, resolver).await;
            self.push(Role::Assistant, message.timestamp(), &body);
            return;
        }

        if !self.options.all_roles && !role.is_conversational() {
            debug!(node = id, role = role.as_str(), "role filtered out");
            return;
        }
        self.push(role.clone(), message.timestamp(), &message.content.plain_text());
    }

    async fn resolve_images<S: AttachmentSource>(
        &mut self,
        parts: &[ContentPart],
        resolver: &mut AssetResolver<'_, S>,
    ) -> String {
        let mut body = String::new();
        for part in parts {
            let ContentPart::Image(image) = part else {
                continue;
            };
            let Some(resolved) = resolver.resolve(image).await else {
                continue;
            };

            let _ = write!(
                body,
                "<img src=\"{}\" alt=\"image\" style=\"max-width: {}px;\" />\n\n",
                resolved.filename, self.options.image_max_width
            );
            if self.options.show_image_prompts
                && let Some(prompt) = &resolved.prompt
            {
                let _ = write!(body, "**Prompt**: {prompt}\n\n");
            }
            self.out.images.push(resolved);
        }
        body
    }

    /// Adds a block unless its body is blank.
    fn push(&mut self, role: Role, timestamp: Option<DateTime<Utc>>, body: &str) {
        if body.trim().is_empty() {
            return;
        }
        self.out.blocks.push(RenderableBlock::new(
            role,
            timestamp,
            body,
            self.options.quote_other_roles,
        ));
    }
}
