//! Streaming line buffer
//!
//! Deltas arrive at arbitrary boundaries. The buffer hands every complete logical line to a
//! consumer as soon as its newline arrives and keeps the trailing fragment for the next
//! delta. `finish` flushes a non-empty fragment exactly once.

/// Receives logical lines, without their terminator.
pub trait LineConsumer {
    fn consume_line(&mut self, line: &str);
}

impl<F: FnMut(&str)> LineConsumer for F {
    fn consume_line(&mut self, line: &str) {
        self(line)
    }
}

#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and drain every complete line into `consumer`.
    pub fn push<C: LineConsumer + ?Sized>(&mut self, delta: &str, consumer: &mut C) {
        self.pending.push_str(delta);
        let Some(last_newline) = self.pending.rfind('\n') else {
            return;
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        // `complete` ends with '\n', so the final split element is empty and skipped.
        let mut lines = complete.split('\n');
        let mut next = lines.next();
        while let Some(line) = next {
            next = lines.next();
            if next.is_none() {
                break;
            }
            consumer.consume_line(line.strip_suffix('\r').unwrap_or(line));
        }
    }

    /// The retained partial line.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Flush the trailing fragment, if any. Consumes the buffer so it cannot flush twice.
    pub fn finish<C: LineConsumer + ?Sized>(self, consumer: &mut C) {
        let fragment = self.pending.strip_suffix('\r').unwrap_or(&self.pending);
        if !fragment.is_empty() {
            consumer.consume_line(fragment);
        }
    }
}

/// Collect every logical line of `text` the way a stream would deliver it.
pub fn split_logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut buffer = LineBuffer::new();
    let mut collect = |line: &str| lines.push(line.to_string());
    buffer.push(text, &mut collect);
    buffer.finish(&mut collect);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(deltas: &[&str]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut buffer = LineBuffer::new();
        let mut collect = |line: &str| lines.push(line.to_string());
        for delta in deltas {
            buffer.push(delta, &mut collect);
        }
        buffer.finish(&mut collect);
        lines
    }

    #[test]
    fn test_lines_across_deltas() {
        let lines = feed(&["- al", "pha\n- be", "ta\n", "- gam", "ma"]);
        assert_eq!(lines, vec!["- alpha", "- beta", "- gamma"]);
    }

    #[test]
    fn test_blank_lines_are_preserved() {
        assert_eq!(feed(&["a\n\nb\n"]), vec!["a", "", "b"]);
    }

    #[test]
    fn test_crlf_normalized() {
        assert_eq!(feed(&["a\r", "\nb\r\n"]), vec!["a", "b"]);
    }

    #[test]
    fn test_pending_fragment_retained() {
        let mut buffer = LineBuffer::new();
        let mut seen = Vec::new();
        buffer.push("one\ntw", &mut |l: &str| seen.push(l.to_string()));
        assert_eq!(seen, vec!["one"]);
        assert_eq!(buffer.pending(), "tw");
    }

    #[test]
    fn test_empty_fragment_not_flushed() {
        assert_eq!(feed(&["done\n"]), vec!["done"]);
        assert!(feed(&[]).is_empty());
    }
}
