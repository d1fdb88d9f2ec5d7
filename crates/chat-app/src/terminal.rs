//! ANSI rendering of projected blocks for the terminal front-end.

use crate::markdown::{BlockStyle, RenderBlock, RenderRun, RunStyle};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const UNDERLINE: &str = "\x1b[4m";
const CYAN: &str = "\x1b[36m";
const BLUE: &str = "\x1b[34m";

pub const CODE_GUTTER: &str = "\u{2502} ";
pub const QUOTE_GUTTER: &str = "\u{258c} ";

/// Wraps `text` in the given escape codes and a trailing reset.
fn styled(text: &str, codes: &str) -> String {
    format!("{codes}{text}{RESET}")
}

fn render_run(run: &RenderRun) -> String {
    match &run.style {
        RunStyle::Plain => run.text.clone(),
        RunStyle::Strong => styled(&run.text, BOLD),
        RunStyle::Monospace => styled(&run.text, CYAN),
        RunStyle::Link { url } => format!(
            "{} {}",
            styled(&run.text, &format!("{UNDERLINE}{BLUE}")),
            styled(&format!("({url})"), DIM)
        ),
    }
}

fn render_line(runs: &[RenderRun]) -> String {
    runs.iter().map(render_run).collect()
}

/// Renders one block as terminal lines, without a trailing newline.
pub fn render_block(block: &RenderBlock) -> String {
    match &block.style {
        BlockStyle::Heading(level) => {
            let marker = "#".repeat(usize::from(level.as_u8()));
            let text = block
                .lines
                .iter()
                .map(|runs| render_line(runs))
                .collect::<String>();
            format!("{BOLD}{UNDERLINE}{marker} {text}{RESET}")
        }
        BlockStyle::Paragraph | BlockStyle::Numbered => block
            .lines
            .iter()
            .map(|runs| render_line(runs))
            .collect::<Vec<_>>()
            .join("\n"),
        BlockStyle::Bullet => block
            .lines
            .iter()
            .map(|runs| format!("  {}", render_line(runs)))
            .collect::<Vec<_>>()
            .join("\n"),
        BlockStyle::Code { language } => {
            let mut lines = Vec::with_capacity(block.lines.len() + 1);
            if let Some(language) = language {
                lines.push(styled(language, DIM));
            }
            lines.extend(block.lines.iter().map(|runs| {
                format!("{}{}", styled(CODE_GUTTER, DIM), render_line(runs))
            }));
            lines.join("\n")
        }
        BlockStyle::Quote => block
            .lines
            .iter()
            .map(|runs| format!("{}{}", styled(QUOTE_GUTTER, DIM), render_line(runs)))
            .collect::<Vec<_>>()
            .join("\n"),
        BlockStyle::Spacer { .. } => String::new(),
    }
}

/// Renders every block, one block per line group.
pub fn render_blocks(blocks: &[RenderBlock]) -> String {
    blocks
        .iter()
        .map(render_block)
        .collect::<Vec<_>>()
        .join("\n")
}
