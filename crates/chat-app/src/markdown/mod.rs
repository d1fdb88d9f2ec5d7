/// Block-level parsing of a full message.
pub mod block;
/// Inline styling of a single line.
pub mod inline;
pub mod projection;

pub use block::{BlockNode, HeadingLevel, parse};
pub use inline::{InlineSpan, tokenize};
pub use projection::{
    BlockStyle, RenderBlock, RenderRun, RunStyle, project, project_block, render_message,
};
