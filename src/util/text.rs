use std::borrow::Cow;

/// Reduces an HTML fragment (typically a feed item title) to plain text.
///
/// Tags are removed, character references are decoded, control characters are
/// stripped and runs of whitespace collapse to a single space. The result is
/// trimmed.
///
/// Titles are frequently double-escaped by feed generators (`&amp;lt;b&amp;gt;`
/// arrives at the parser as `&lt;b&gt;`), so entities are decoded before tags
/// are removed, and the decoded text is scanned for tags once more.
///
/// # Examples
///
/// ```
/// use relayfeed::util::strip_html;
///
/// assert_eq!(strip_html("  <em>Rust</em>   1.80 &ndash; released "), "Rust 1.80 – released");
/// assert_eq!(strip_html("&lt;b&gt;Bold&lt;/b&gt; claim"), "Bold claim");
/// ```
pub fn strip_html(s: &str) -> String {
    let without_tags = remove_tags(s);
    let decoded = html_escape::decode_html_entities(&without_tags);
    let cleaned = if decoded.contains('<') {
        Cow::Owned(remove_tags(&decoded))
    } else {
        decoded
    };
    let cleaned = strip_control_chars(&cleaned);

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes everything between `<` and `>` (inclusive). An unterminated `<`
/// is kept as literal text.
fn remove_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        match after.find('>') {
            Some(close) => {
                // Tags separate words ("<br>" / "</p><p>"), so leave a space behind
                out.push(' ');
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(after);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// SEC-001: Strip terminal control characters from text.
///
/// Feed titles are attacker-controlled and end up printed by the CLI, so
/// C0 controls, DEL and ESC are removed. Tab, newline and carriage return are
/// preserved (they are later collapsed as whitespace).
///
/// Returns `Cow::Borrowed` when the input contains no control characters.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\x7f' || (c < ' ' && c != '\t' && c != '\n' && c != '\r');

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_control(*c)).collect())
}
