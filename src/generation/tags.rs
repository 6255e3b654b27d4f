//! Tag Protocol Codec
//!
//! Every model call speaks the same plaintext format: `[TAG NAME] free text`, where the
//! content of a tag runs until the next tag marker or the end of the payload. Several
//! records in one payload are separated by a literal `+++` line.
//!
//! Display formatting swaps known tags for glyphs. It is presentation only: structural
//! parsing always runs on the bracketed form, never on a rendered string.

use once_cell::sync::Lazy;
use regex::Regex;

/// Record separator inside a single payload.
pub const SECTION_SEPARATOR: &str = "+++";

/// Tags that carry an argument inside the brackets.
const ARGUMENT_TAGS: &[&str] = &["TAINT"];

/// A tag marker: uppercase words, or an argument tag with its argument (`[TAINT Scene 2]`).
/// Bracketed prose such as `[A letter from Kael]` is not a marker.
static TAG_MARKER: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"\[(?:[A-Z][A-Z ]*[A-Z]|[A-Z]|(?:{})\s+[^\]\n]+)\]",
        ARGUMENT_TAGS.join("|")
    );
    Regex::new(&pattern).expect("valid tag regex")
});

/// A bare tag with no argument, for display substitution.
static BARE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([A-Z][A-Z ]*[A-Z]|[A-Z])\]").expect("valid bare tag regex"));

/// Fixed tag → glyph table. Glyphs are unique, so the mapping is bijective.
pub const TAG_GLYPHS: &[(&str, &str)] = &[
    ("GOAL", "🎯"),
    ("STAKES", "⚖️"),
    ("THEME", "🎭"),
    ("TERMINAL CONDITION", "🏁"),
    ("DIRECTION", "🧭"),
    ("STRUCTURAL GOAL", "🏛️"),
    ("WHY", "💭"),
    ("PREREQUISITE", "🔑"),
    ("LOAD BEARING", "🧱"),
    ("CATEGORY", "🏷️"),
    ("CHARACTER", "👤"),
    ("LOCATION", "📍"),
    ("FACTION", "⚔️"),
    ("SYSTEM", "⚙️"),
    ("SITUATION", "🌪️"),
    ("DESCRIPTION", "📝"),
    ("WANT", "💫"),
    ("NEED", "🫀"),
    ("RELATIONSHIP", "🔗"),
    ("SATISFIES", "✔️"),
    ("PURPOSE", "📌"),
    ("SCENE", "🎬"),
    ("RESOLVED", "✅"),
    ("OPEN", "❓"),
    ("GROUND", "🪨"),
    ("TERMINAL", "🔚"),
    ("FOR SOLVER", "🧩"),
    ("FOR BUILDER", "🔨"),
    ("REJECT", "⛔"),
    ("EXPANSION", "🌱"),
];

fn glyph_for(tag: &str) -> Option<&'static str> {
    TAG_GLYPHS
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|(_, glyph)| *glyph)
}

/// Byte range of the content following the first `[tag]` in `text`, if present.
fn content_span(text: &str, from: usize, tag: &str) -> Option<(usize, usize)> {
    let marker = format!("[{}]", tag);
    let start = from + text[from..].find(&marker)? + marker.len();
    let end = TAG_MARKER
        .find(&text[start..])
        .map(|m| start + m.start())
        .unwrap_or(text.len());
    Some((start, end))
}

/// Extract the content of `tag`: everything after `[tag]` up to the next tag marker or the
/// end of text, trimmed. Absent tags and empty content both yield `None`.
pub fn parse_tag(text: &str, tag: &str) -> Option<String> {
    let (start, end) = content_span(text, 0, tag)?;
    let content = text[start..end].trim();
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

/// Every non-empty occurrence of `tag`, in order.
pub fn parse_tag_all(text: &str, tag: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some((start, end)) = content_span(text, cursor, tag) {
        let content = text[start..end].trim();
        if !content.is_empty() {
            out.push(content.to_string());
        }
        cursor = end;
    }
    out
}

/// Whether `text` carries any tag marker at all.
pub fn has_any_tag(text: &str) -> bool {
    TAG_MARKER.is_match(text)
}

/// Split on a literal separator, trimming and dropping empty sections.
pub fn split_sections(text: &str, separator: &str) -> Vec<String> {
    text.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Replace known bracket tags with their glyph; unknown tags become bold text.
pub fn format_tags_with_emoji(text: &str) -> String {
    BARE_TAG
        .replace_all(text, |caps: &regex::Captures<'_>| match glyph_for(&caps[1]) {
            Some(glyph) => glyph.to_string(),
            None => format!("**{}**", &caps[1]),
        })
        .into_owned()
}

/// Inverse of [`format_tags_with_emoji`] for known tags. Bold text is left alone.
pub fn restore_tags_from_emoji(text: &str) -> String {
    let mut out = text.to_string();
    // Longer glyphs first so a glyph that prefixes another cannot steal its match.
    let mut glyphs: Vec<&(&str, &str)> = TAG_GLYPHS.iter().collect();
    glyphs.sort_by_key(|(_, glyph)| std::cmp::Reverse(glyph.len()));
    for (tag, glyph) in glyphs {
        if out.contains(glyph) {
            out = out.replace(glyph, &format!("[{}]", tag));
        }
    }
    out
}
