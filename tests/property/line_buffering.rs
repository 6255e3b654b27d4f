//! Line buffering is independent of where deltas are cut.

use crucible::generation::stream::{split_logical_lines, LineBuffer};
use proptest::prelude::*;

fn split_at_points(text: &str, mut points: Vec<usize>) -> Vec<String> {
    let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    points.iter_mut().for_each(|p| *p %= boundaries.len().max(1));
    let mut cuts: Vec<usize> = points
        .into_iter()
        .filter_map(|p| boundaries.get(p).copied())
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut deltas = Vec::new();
    let mut start = 0;
    for cut in cuts {
        deltas.push(text[start..cut].to_string());
        start = cut;
    }
    deltas.push(text[start..].to_string());
    deltas
}

fn feed(deltas: &[String]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut buffer = LineBuffer::new();
    let mut collect = |line: &str| lines.push(line.to_string());
    for delta in deltas {
        buffer.push(delta, &mut collect);
    }
    buffer.finish(&mut collect);
    lines
}

proptest! {
    #[test]
    fn test_any_delta_split_yields_the_same_lines(
        text in "[a-z \\[\\]\\n]{0,120}",
        points in proptest::collection::vec(any::<usize>(), 0..12),
    ) {
        let deltas = split_at_points(&text, points);
        prop_assert_eq!(feed(&deltas), split_logical_lines(&text));
    }

    #[test]
    fn test_lines_never_contain_newlines(text in "[a-z\\r\\n]{0,80}") {
        for line in split_logical_lines(&text) {
            prop_assert!(!line.contains('\n'));
        }
    }

    #[test]
    fn test_rejoined_lines_restore_newline_terminated_text(
        lines in proptest::collection::vec("[a-z ]{0,10}", 1..8),
    ) {
        let text: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        prop_assert_eq!(split_logical_lines(&text), lines);
    }
}
