//! Tag protocol properties: extraction and display round trips.

use crucible::generation::tags::{
    format_tags_with_emoji, parse_tag, parse_tag_all, restore_tags_from_emoji, TAG_GLYPHS,
};
use proptest::prelude::*;

fn known_tag() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(TAG_GLYPHS.iter().map(|(tag, _)| *tag).collect::<Vec<_>>())
}

proptest! {
    #[test]
    fn test_content_runs_to_the_next_tag(
        first in "[a-z][a-z ]{0,30}",
        second in "[a-z][a-z ]{0,30}",
    ) {
        let text = format!("[SCENE] {}\n[OPEN] {}", first, second);
        prop_assert_eq!(parse_tag(&text, "SCENE"), Some(first.trim().to_string()));
        prop_assert_eq!(parse_tag(&text, "OPEN"), Some(second.trim().to_string()));
    }

    #[test]
    fn test_blank_content_is_absent(spaces in "[ \\n]{0,5}") {
        let text = format!("[GOAL]{}[STAKES] high", spaces);
        prop_assert_eq!(parse_tag(&text, "GOAL"), None);
    }

    #[test]
    fn test_parse_tag_all_finds_every_record(
        items in proptest::collection::vec("[a-z][a-z ]{0,12}", 1..6),
    ) {
        let text: String = items.iter().map(|i| format!("[OPEN] {}\n", i)).collect();
        let expected: Vec<String> = items.iter().map(|i| i.trim().to_string()).collect();
        prop_assert_eq!(parse_tag_all(&text, "OPEN"), expected);
    }

    #[test]
    fn test_emoji_display_round_trips_known_tags(
        records in proptest::collection::vec((known_tag(), "[a-z][a-z ]{0,12}"), 1..6),
    ) {
        let text: String = records
            .iter()
            .map(|(tag, content)| format!("[{}] {}\n", tag, content))
            .collect();
        let shown = format_tags_with_emoji(&text);
        prop_assert!(!shown.contains('['));
        prop_assert_eq!(restore_tags_from_emoji(&shown), text);
    }
}
