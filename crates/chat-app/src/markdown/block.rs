use super::inline::{InlineSpan, tokenize};

const CODE_FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeadingLevel {
    H1,
    H2,
    H3,
}

impl HeadingLevel {
    /// Returns the level as a number from 1 to 6.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::H1 => 1,
            Self::H2 => 2,
            Self::H3 => 3,
        }
    }
}

/// Structural unit of a rendered message, rebuilt from scratch on every parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockNode {
    Heading {
        level: HeadingLevel,
        inline: Vec<InlineSpan>,
    },
    Paragraph {
        inline: Vec<InlineSpan>,
    },
    /// Unordered items keep the text after the marker; ordered items keep the
    /// trimmed line, number included.
    ListItem {
        ordered: bool,
        text: String,
    },
    CodeBlock {
        language: Option<String>,
        lines: Vec<String>,
    },
    /// Quoted lines with the `>` prefix stripped. Inline styling is applied at
    /// projection time, see [`BlockNode::inline_lines`].
    Blockquote {
        lines: Vec<String>,
    },
    Spacer,
}

impl BlockNode {
    /// Per-line inline spans of a blockquote; empty for every other block.
    pub fn inline_lines(&self) -> Vec<Vec<InlineSpan>> {
        match self {
            Self::Blockquote { lines } => lines.iter().map(|line| tokenize(line)).collect(),
            _ => Vec::new(),
        }
    }
}

enum Mode {
    Normal,
    InCodeBlock {
        language: Option<String>,
        lines: Vec<String>,
    },
    InBlockquote {
        lines: Vec<String>,
    },
}

/// Parses a complete message into blocks, one pass over its lines.
///
/// Total: unterminated code blocks and blockquotes are emitted at end of input with
/// whatever they accumulated.
pub fn parse(text: &str) -> Vec<BlockNode> {
    let mut blocks = Vec::new();
    let mut mode = Mode::Normal;

    for line in text.split('\n') {
        let trimmed = line.trim();

        if let Some(fence_rest) = trimmed.strip_prefix(CODE_FENCE) {
            mode = match mode {
                Mode::InCodeBlock { language, lines } => {
                    blocks.push(BlockNode::CodeBlock { language, lines });
                    Mode::Normal
                }
                Mode::InBlockquote { lines } => {
                    blocks.push(BlockNode::Blockquote { lines });
                    open_code_block(fence_rest)
                }
                Mode::Normal => open_code_block(fence_rest),
            };
            continue;
        }

        if let Mode::InCodeBlock { lines, .. } = &mut mode {
            lines.push(line.to_string());
            continue;
        }

        if let Some(quoted) = trimmed.strip_prefix('>') {
            let quoted = quoted.strip_prefix(' ').unwrap_or(quoted).to_string();
            if let Mode::InBlockquote { lines } = &mut mode {
                lines.push(quoted);
            } else {
                mode = Mode::InBlockquote {
                    lines: vec![quoted],
                };
            }
            continue;
        }

        if let Mode::InBlockquote { lines } = std::mem::replace(&mut mode, Mode::Normal) {
            blocks.push(BlockNode::Blockquote { lines });
        }

        blocks.push(classify_line(line, trimmed));
    }

    match mode {
        Mode::InCodeBlock { language, lines } => {
            blocks.push(BlockNode::CodeBlock { language, lines });
        }
        Mode::InBlockquote { lines } => blocks.push(BlockNode::Blockquote { lines }),
        Mode::Normal => {}
    }

    blocks
}

fn open_code_block(fence_rest: &str) -> Mode {
    let language = fence_rest.trim();
    Mode::InCodeBlock {
        language: (!language.is_empty()).then(|| language.to_string()),
        lines: Vec::new(),
    }
}

fn classify_line(line: &str, trimmed: &str) -> BlockNode {
    // Longest heading prefix first so "### " never reads as a level-1 heading.
    let headings = [
        ("### ", HeadingLevel::H3),
        ("## ", HeadingLevel::H2),
        ("# ", HeadingLevel::H1),
    ];
    for (prefix, level) in headings {
        if let Some(content) = line.strip_prefix(prefix) {
            return BlockNode::Heading {
                level,
                inline: tokenize(content),
            };
        }
    }

    if let Some(item) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
    {
        return BlockNode::ListItem {
            ordered: false,
            text: item.to_string(),
        };
    }

    if is_ordered_item(trimmed) {
        return BlockNode::ListItem {
            ordered: true,
            text: trimmed.to_string(),
        };
    }

    if trimmed.is_empty() {
        BlockNode::Spacer
    } else {
        BlockNode::Paragraph {
            inline: tokenize(line),
        }
    }
}

/// Matches `^\d+\.\s`.
fn is_ordered_item(trimmed: &str) -> bool {
    let digits = trimmed.len() - trimmed.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return false;
    }
    let mut after_digits = trimmed[digits..].chars();
    after_digits.next() == Some('.') && after_digits.next().is_some_and(char::is_whitespace)
}
