//! Classifier input text.

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The texts surrounding one target.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextParts<'a> {
    pub title: &'a str,
    pub selftext: &'a str,
    pub parent: &'a str,
    pub text: &'a str,
}

impl<'a> ContextParts<'a> {
    /// Submissions have no parent; `text` is the title and body joined.
    pub fn submission(title: &'a str, selftext: &'a str, text: &'a str) -> Self {
        Self {
            title,
            selftext,
            parent: "",
            text,
        }
    }

    pub fn comment(title: &'a str, selftext: &'a str, parent: &'a str, text: &'a str) -> Self {
        Self {
            title,
            selftext,
            parent,
            text,
        }
    }
}

/// `TITLE:` / `SELF:` / `PARENT:` / `TEXT:` lines, empty segments left out.
pub fn build_context(parts: &ContextParts<'_>) -> String {
    let segments = [
        ("TITLE", parts.title),
        ("SELF", parts.selftext),
        ("PARENT", parts.parent),
        ("TEXT", parts.text),
    ];

    segments
        .iter()
        .filter_map(|(tag, raw)| {
            let normalized = normalize_text(raw);
            (!normalized.is_empty()).then(|| format!("{}: {}", tag, normalized))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// What a model actually sees for one ticker.
pub fn model_input(context: &str, ticker: &str) -> String {
    format!("{}\nTICKER: {}", context, ticker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("  a \n\t b  c "), "a b c");
        assert_eq!(normalize_text(" \n "), "");
    }

    #[test]
    fn test_empty_segments_are_left_out() {
        let parts = ContextParts::comment("Title  here", "", "", "buy\nthe dip");
        assert_eq!(build_context(&parts), "TITLE: Title here\nTEXT: buy the dip");

        let parts = ContextParts::comment("T", "S", "P", "X");
        assert_eq!(build_context(&parts), "TITLE: T\nSELF: S\nPARENT: P\nTEXT: X");
    }

    #[test]
    fn test_model_input_appends_ticker() {
        assert_eq!(model_input("TITLE: x", "AAPL"), "TITLE: x\nTICKER: AAPL");
    }
}
