//! Legacy rich-text normalization.
//!
//! Older storefront content was authored with escaped whitespace, square
//! bracket markup and double-encoded HTML entities. [`ContentFormatter`]
//! rewrites that encoding into plain HTML-ish text so templates can render
//! fields without carrying the history around.

/// Normalizer for the legacy storefront text encoding.
///
/// Stateless; the loader holds one and runs every `field()` read through
/// [`ContentFormatter::format`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentFormatter;

impl ContentFormatter {
    /// Runs the full normalization pipeline over a field value.
    ///
    /// Passes run in a fixed order: escaped whitespace first (so markup and
    /// entity scans see real newlines), then bracket markup, then entities,
    /// then blank-line collapsing and an outer trim.
    #[must_use]
    pub fn format(&self, text: &str) -> String {
        let text = unescape_whitespace(text);
        let text = replace_markup(&text);
        let text = decode_entities(&text);
        collapse_blank_lines(&text).trim().to_string()
    }

    /// Returns true if the text carries any marker of the legacy encoding.
    #[must_use]
    pub fn looks_legacy(&self, text: &str) -> bool {
        const MARKERS: &[&str] = &[
            "\\r\\n", "\\n", "\\t", "[b]", "[/b]", "[i]", "[/i]", "[u]", "[/u]", "[br]",
            "[url=", "[/url]", "&amp;", "&lt;", "&gt;", "&quot;", "&#39;", "&nbsp;",
        ];
        MARKERS.iter().any(|marker| text.contains(marker))
    }
}

/// Turns escaped whitespace sequences into the real thing and CRLF into LF.
fn unescape_whitespace(text: &str) -> String {
    text.replace("\\r\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\r\n", "\n")
}

/// Rewrites the legacy square-bracket markup into HTML tags.
fn replace_markup(text: &str) -> String {
    let text = text
        .replace("[b]", "<strong>")
        .replace("[/b]", "</strong>")
        .replace("[i]", "<em>")
        .replace("[/i]", "</em>")
        .replace("[u]", "<u>")
        .replace("[/u]", "</u>")
        .replace("[br]", "<br>")
        .replace("[/url]", "</a>");
    replace_url_tags(&text)
}

/// Expands `[url=X]` into an anchor open tag. An unterminated tag is left
/// in place rather than swallowing the rest of the text.
fn replace_url_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[url=") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + "[url=".len()..];
        match tail.find(']') {
            Some(end) => {
                out.push_str("<a href=\"");
                out.push_str(&tail[..end]);
                out.push_str("\">");
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decodes the entity set the legacy editor produced. `&amp;` runs last so
/// a double-encoded entity decodes by exactly one level.
fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

/// Trims trailing whitespace per line and caps runs of blank lines at one.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}
