use std::borrow::Cow;

/// Ellipsis appended when text is cut
const ELLIPSIS: &str = "...";

/// Truncates `s` to at most `max_chars` Unicode scalar values.
///
/// Chat platforms count embed limits in characters, not bytes, so this never
/// splits a code point. When truncation happens the result ends in "..." and
/// still fits in `max_chars`.
///
/// Returns `Cow::Borrowed` when `s` already fits.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    if s.chars().nth(max_chars).is_none() {
        return Cow::Borrowed(s);
    }

    let ellipsis_chars = ELLIPSIS.chars().count();
    if max_chars <= ellipsis_chars {
        return Cow::Owned(s.chars().take(max_chars).collect());
    }

    let keep = max_chars - ellipsis_chars;
    let end = s
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let mut out = String::with_capacity(end + ELLIPSIS.len());
    out.push_str(s[..end].trim_end());
    out.push_str(ELLIPSIS);
    Cow::Owned(out)
}

/// Removes ASCII control characters other than tab, newline and carriage
/// return. Feed text occasionally carries stray NULs and form feeds that
/// chat clients render as boxes.
///
/// Returns `Cow::Borrowed` when there is nothing to strip (the common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_stripped = |c: char| c.is_ascii_control() && !matches!(c, '\t' | '\n' | '\r');

    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }

    Cow::Owned(s.chars().filter(|c| !is_stripped(*c)).collect())
}
