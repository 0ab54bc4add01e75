// src/session/context.rs — Model input assembly
//
// The model input is rebuilt from the target message's ancestor chain on
// every session: one role-tagged block per ancestor with content, plus
// quote references, image attachments, assistant instructions and tool
// usage hints.

use crate::conversation::{FileRef, MessageId, MessageTree, Role};
use crate::infra::errors::WeftError;
use crate::provider::ContentBlock;
use crate::tenant::Assistant;
use crate::tools::ToolRegistry;

/// The assembled input for one provider call.
#[derive(Debug)]
pub struct AssembledContext {
    /// Blocks in conversation order, root first.
    pub blocks: Vec<ContentBlock>,
    /// Files attached anywhere along the branch, oldest first. These
    /// feed the file search tool.
    pub files: Vec<FileRef>,
    /// Summed tiling estimates of embedded images; charged into the
    /// pre-call reservation since the upstream will bill them as input.
    pub image_tokens: u32,
}

/// Walk the target's ancestor chain and build the provider input.
///
/// Ordering rules: assistant-profile instructions come first; each turn
/// with an active quote gets a system block immediately before it; a user
/// turn's image precedes its text; tool instruction blocks close the
/// input.
pub fn assemble_context(
    tree: &MessageTree,
    target: MessageId,
    assistant: Option<&Assistant>,
    tools: &ToolRegistry,
) -> Result<AssembledContext, WeftError> {
    let chain = tree
        .ancestor_chain(target)
        .ok_or_else(|| WeftError::ParentNotFound {
            id: target.to_string(),
        })?;

    let mut blocks = Vec::new();
    let mut files = Vec::new();
    let mut image_tokens = 0u32;

    // The chain is leaf → root; the model wants root → leaf.
    for id in chain.iter().rev() {
        let message = tree.get(*id).expect("chain nodes exist");

        if let Some(file) = &message.file {
            files.push(file.clone());
        }

        if message.content.is_empty() {
            continue;
        }

        if let Some(quote) = &message.quote {
            blocks.push(ContentBlock::System(format!(
                "The user is referring to this in particular:\n{quote}"
            )));
        }

        if message.role == Role::User {
            if let Some(image) = &message.image {
                let estimate = image_token_estimate(image.width, image.height);
                image_tokens += estimate;
                blocks.push(ContentBlock::InputImage {
                    media_type: image.media_type.clone(),
                    data: image.data.clone(),
                    token_estimate: estimate,
                });
            }
        }

        blocks.push(match message.role {
            Role::Assistant => ContentBlock::OutputText(message.content.clone()),
            Role::User => ContentBlock::InputText(message.content.clone()),
            Role::System => ContentBlock::System(message.content.clone()),
        });
    }

    if let Some(assistant) = assistant {
        if let Some(instructions) = &assistant.instructions {
            if !instructions.is_empty() {
                blocks.insert(0, ContentBlock::System(instructions.clone()));
            }
        }
    }

    for instructions in tools.system_blocks() {
        blocks.push(ContentBlock::System(instructions));
    }

    Ok(AssembledContext {
        blocks,
        files,
        image_tokens,
    })
}

/// Token estimate for an embedded image: scale into a 2048px box, pull
/// the short side to 768px, then count 512px tiles. Capped and
/// approximate, not exact.
pub fn image_token_estimate(width: u32, height: u32) -> u32 {
    let mut w = width.max(1) as f64;
    let mut h = height.max(1) as f64;

    if w > 2048.0 {
        h *= 2048.0 / w;
        w = 2048.0;
    }
    if h > 2048.0 {
        w *= 2048.0 / h;
        h = 2048.0;
    }

    let short = w.min(h);
    if short > 768.0 {
        let scale = 768.0 / short;
        w *= scale;
        h *= scale;
    }

    let tiles = (w / 512.0).ceil() + (h / 512.0).ceil();
    170 * tiles as u32 + 85
}
