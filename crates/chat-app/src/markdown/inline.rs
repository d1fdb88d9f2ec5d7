/// Styled run of text inside one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineSpan {
    Bold(String),
    InlineCode(String),
    Link { label: String, url: String },
    Plain(String),
}

impl InlineSpan {
    /// Text a reader sees for this span, markup removed.
    pub fn visible_text(&self) -> &str {
        match self {
            Self::Bold(text) | Self::InlineCode(text) | Self::Plain(text) => text,
            Self::Link { label, .. } => label,
        }
    }
}

const BOLD_MARKER: &str = "**";
const CODE_MARKER: char = '`';
const MARKER_CHARS: [char; 3] = ['*', '`', '['];

/// Splits one line into inline spans with a single left-to-right scan.
///
/// Never fails: a marker without its closing counterpart stays in the output as plain
/// text. The closing search is a plain forward `find`, so the first closing marker wins
/// even inside what looks like a nested construct.
pub fn tokenize(line: &str) -> Vec<InlineSpan> {
    let mut spans = Vec::new();
    let mut cursor = 0;

    while cursor < line.len() {
        let rest = &line[cursor..];

        if let Some((span, consumed)) = match_bold(rest)
            .or_else(|| match_inline_code(rest))
            .or_else(|| match_link(rest))
        {
            spans.push(span);
            cursor += consumed;
            continue;
        }

        match rest.find(MARKER_CHARS) {
            None => {
                push_plain(&mut spans, rest);
                break;
            }
            Some(0) => {
                // Unmatched marker: every marker is a single ASCII byte.
                push_plain(&mut spans, &rest[..1]);
                cursor += 1;
            }
            Some(next_marker) => {
                push_plain(&mut spans, &rest[..next_marker]);
                cursor += next_marker;
            }
        }
    }

    spans
}

fn match_bold(rest: &str) -> Option<(InlineSpan, usize)> {
    let body = rest.strip_prefix(BOLD_MARKER)?;
    let end = body.find(BOLD_MARKER)?;
    Some((
        InlineSpan::Bold(body[..end].to_string()),
        BOLD_MARKER.len() * 2 + end,
    ))
}

fn match_inline_code(rest: &str) -> Option<(InlineSpan, usize)> {
    let body = rest.strip_prefix(CODE_MARKER)?;
    let end = body.find(CODE_MARKER)?;
    Some((InlineSpan::InlineCode(body[..end].to_string()), end + 2))
}

fn match_link(rest: &str) -> Option<(InlineSpan, usize)> {
    let body = rest.strip_prefix('[')?;
    let label_end = body.find(']')?;
    let target = body[label_end + 1..].strip_prefix('(')?;
    let url_end = target.find(')')?;

    let span = InlineSpan::Link {
        label: body[..label_end].to_string(),
        url: target[..url_end].to_string(),
    };
    // "[" + label + "](" + url + ")"
    Some((span, label_end + url_end + 4))
}

fn push_plain(spans: &mut Vec<InlineSpan>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(InlineSpan::Plain(previous)) = spans.last_mut() {
        previous.push_str(text);
    } else {
        spans.push(InlineSpan::Plain(text.to_string()));
    }
}
