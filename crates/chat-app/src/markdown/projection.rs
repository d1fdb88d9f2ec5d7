//! Presentational view of parsed blocks.
//!
//! A pure mapping from [`BlockNode`]s to styled runs that a front-end can draw without
//! knowing anything about markdown.

use super::block::{BlockNode, HeadingLevel, parse};
use super::inline::InlineSpan;

/// Vertical gap drawn for a blank line, in logical pixels.
pub const SPACER_HEIGHT: u16 = 8;

pub const BULLET_GLYPH: &str = "\u{2022}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStyle {
    Plain,
    Strong,
    Monospace,
    Link { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRun {
    pub text: String,
    pub style: RunStyle,
}

impl RenderRun {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: RunStyle::Plain,
        }
    }
}

impl From<&InlineSpan> for RenderRun {
    fn from(span: &InlineSpan) -> Self {
        let style = match span {
            InlineSpan::Bold(_) => RunStyle::Strong,
            InlineSpan::InlineCode(_) => RunStyle::Monospace,
            InlineSpan::Link { url, .. } => RunStyle::Link { url: url.clone() },
            InlineSpan::Plain(_) => RunStyle::Plain,
        };
        Self {
            text: span.visible_text().to_string(),
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStyle {
    Heading(HeadingLevel),
    Paragraph,
    Bullet,
    Numbered,
    Code { language: Option<String> },
    Quote,
    Spacer { height: u16 },
}

/// One drawable block: a style plus its lines of styled runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderBlock {
    pub style: BlockStyle,
    pub lines: Vec<Vec<RenderRun>>,
}

impl RenderBlock {
    /// Visible text of the block, lines joined with `\n`.
    pub fn plain_text(&self) -> String {
        self.lines
            .iter()
            .map(|runs| runs.iter().map(|run| run.text.as_str()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn runs(spans: &[InlineSpan]) -> Vec<RenderRun> {
    spans.iter().map(RenderRun::from).collect()
}

pub fn project_block(block: &BlockNode) -> RenderBlock {
    match block {
        BlockNode::Heading { level, inline } => RenderBlock {
            style: BlockStyle::Heading(*level),
            lines: vec![runs(inline)],
        },
        BlockNode::Paragraph { inline } => RenderBlock {
            style: BlockStyle::Paragraph,
            lines: vec![runs(inline)],
        },
        BlockNode::ListItem { ordered: false, text } => RenderBlock {
            style: BlockStyle::Bullet,
            lines: vec![vec![RenderRun::plain(format!("{BULLET_GLYPH} {text}"))]],
        },
        BlockNode::ListItem { ordered: true, text } => RenderBlock {
            style: BlockStyle::Numbered,
            lines: vec![vec![RenderRun::plain(text.clone())]],
        },
        BlockNode::CodeBlock { language, lines } => RenderBlock {
            style: BlockStyle::Code {
                language: language.clone(),
            },
            lines: lines
                .iter()
                .map(|line| {
                    vec![RenderRun {
                        text: line.clone(),
                        style: RunStyle::Monospace,
                    }]
                })
                .collect(),
        },
        BlockNode::Blockquote { .. } => RenderBlock {
            style: BlockStyle::Quote,
            lines: block
                .inline_lines()
                .iter()
                .map(|spans| runs(spans))
                .collect(),
        },
        BlockNode::Spacer => RenderBlock {
            style: BlockStyle::Spacer {
                height: SPACER_HEIGHT,
            },
            lines: Vec::new(),
        },
    }
}

pub fn project(blocks: &[BlockNode]) -> Vec<RenderBlock> {
    blocks.iter().map(project_block).collect()
}

/// Parses and projects raw message text in one call.
pub fn render_message(text: &str) -> Vec<RenderBlock> {
    project(&parse(text))
}
