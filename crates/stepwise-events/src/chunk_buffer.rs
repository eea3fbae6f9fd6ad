//! Batches streamed text into readable chunks.
//!
//! Model output arrives a few characters at a time. Pushing every delta into
//! the event store would flood subscribers, so tasks feed deltas through a
//! [`ChunkBuffer`] and only publish at natural boundaries.
//!
//! Sizes are measured in characters, not bytes.

/// Accumulates text and hands completed chunks to a callback.
///
/// With break strings configured, a chunk is emitted once the buffer holds at
/// least `threshold` characters *and* a break string ends at or past that
/// point; the chunk runs up to and including the left-most such break and the
/// remainder stays buffered. Reaching the threshold without a break only
/// flushes when the optional hard limit is reached. Without break strings the
/// whole buffer is emitted as soon as it reaches `threshold` characters.
///
/// The callback receives `(chunk, full_text_so_far)`, where the full text is
/// the concatenation of every chunk emitted so far including this one.
///
/// ```rust
/// use stepwise_events::ChunkBuffer;
///
/// let mut chunks = Vec::new();
/// let mut buffer = ChunkBuffer::new(5, ["\n\n"], |chunk: &str, _full: &str| {
///     chunks.push(chunk.to_string());
/// });
/// buffer.add("hello world\n\nmore");
/// buffer.flush();
/// drop(buffer);
/// assert_eq!(chunks, vec!["hello world\n\n", "more"]);
/// ```
pub struct ChunkBuffer<F>
where
    F: FnMut(&str, &str),
{
    threshold: usize,
    break_on: Vec<String>,
    hard_limit: Option<usize>,
    buffer: String,
    full_text: String,
    flush_count: usize,
    on_flush: F,
}

impl<F> ChunkBuffer<F>
where
    F: FnMut(&str, &str),
{
    /// Empty break strings are ignored.
    pub fn new<I, S>(threshold: usize, break_on: I, on_flush: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            threshold: threshold.max(1),
            break_on: break_on
                .into_iter()
                .map(Into::into)
                .filter(|b: &String| !b.is_empty())
                .collect(),
            hard_limit: None,
            buffer: String::new(),
            full_text: String::new(),
            flush_count: 0,
            on_flush,
        }
    }

    /// Flush everything once `limit` characters are buffered, even without a
    /// break.
    #[must_use]
    pub fn with_hard_limit(mut self, limit: usize) -> Self {
        self.hard_limit = Some(limit.max(1));
        self
    }

    pub fn add(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.buffer.push_str(text);

        loop {
            if self.break_on.is_empty() {
                if self.buffer.chars().count() >= self.threshold {
                    self.emit_all();
                }
                return;
            }

            if let Some(end) = self.break_end() {
                let rest = self.buffer.split_off(end);
                let chunk = std::mem::replace(&mut self.buffer, rest);
                self.emit(&chunk);
                continue;
            }

            if let Some(limit) = self.hard_limit
                && self.buffer.chars().count() >= limit
            {
                self.emit_all();
            }
            return;
        }
    }

    /// Emit whatever is buffered. No-op when empty.
    pub fn flush(&mut self) {
        self.emit_all();
    }

    /// Text added but not yet emitted.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Concatenation of all emitted chunks.
    #[must_use]
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flush_count
    }

    // Byte offset just past the left-most qualifying break, if any.
    fn break_end(&self) -> Option<usize> {
        let threshold_byte = self.threshold_byte()?;
        self.break_on
            .iter()
            .filter_map(|brk| {
                // A qualifying occurrence ends at or past `threshold_byte`, so
                // it cannot start before `threshold_byte - brk.len()`.
                let mut from = threshold_byte.saturating_sub(brk.len());
                while !self.buffer.is_char_boundary(from) {
                    from -= 1;
                }
                self.buffer[from..]
                    .find(brk.as_str())
                    .map(|idx| from + idx + brk.len())
            })
            .min()
    }

    // Byte offset after the first `threshold` characters, or None when the
    // buffer is shorter.
    fn threshold_byte(&self) -> Option<usize> {
        self.buffer
            .char_indices()
            .nth(self.threshold - 1)
            .map(|(idx, ch)| idx + ch.len_utf8())
    }

    fn emit_all(&mut self) {
        let chunk = std::mem::take(&mut self.buffer);
        self.emit(&chunk);
    }

    fn emit(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.full_text.push_str(chunk);
        self.flush_count += 1;
        (self.on_flush)(chunk, &self.full_text);
    }
}

impl<F> std::fmt::Debug for ChunkBuffer<F>
where
    F: FnMut(&str, &str),
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("threshold", &self.threshold)
            .field("break_on", &self.break_on)
            .field("hard_limit", &self.hard_limit)
            .field("pending_chars", &self.buffer.chars().count())
            .field("flush_count", &self.flush_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(
        threshold: usize,
        breaks: &[&str],
        hard_limit: Option<usize>,
        inputs: &[&str],
    ) -> (Vec<String>, Vec<String>, String) {
        let mut chunks = Vec::new();
        let mut fulls = Vec::new();
        let pending;
        {
            let mut buffer = ChunkBuffer::new(threshold, breaks.iter().copied(), |c: &str, f: &str| {
                chunks.push(c.to_string());
                fulls.push(f.to_string());
            });
            if let Some(limit) = hard_limit {
                buffer = buffer.with_hard_limit(limit);
            }
            for input in inputs {
                buffer.add(input);
            }
            pending = buffer.pending().to_string();
        }
        (chunks, fulls, pending)
    }

    #[test]
    fn test_flushes_at_first_break_past_threshold() {
        let head = "a".repeat(150);
        let early = format!("{head}\n\n");
        let middle = "b".repeat(60);
        let tail = "c".repeat(36);
        let text = format!("{early}{middle}\n\n{tail}");
        assert_eq!(text.chars().count(), 250);

        let (chunks, fulls, pending) = collect(200, &["\n\n"], None, &[&text]);
        assert_eq!(chunks, vec![format!("{early}{middle}\n\n")]);
        assert_eq!(fulls, chunks);
        assert_eq!(pending, tail);
    }

    #[test]
    fn test_threshold_without_break_does_not_flush() {
        let text = "x".repeat(500);
        let (chunks, _, pending) = collect(200, &["\n\n"], None, &[&text]);
        assert!(chunks.is_empty());
        assert_eq!(pending.len(), 500);
    }

    #[test]
    fn test_hard_limit_forces_flush() {
        let text = "x".repeat(500);
        let (chunks, _, pending) = collect(200, &["\n\n"], Some(300), &[&text]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 500);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_no_breaks_flushes_whole_buffer_at_threshold() {
        let (chunks, fulls, pending) = collect(4, &[], None, &["ab", "cd", "e", "fgh", "i"]);
        assert_eq!(chunks, vec!["abcd", "efgh"]);
        assert_eq!(fulls, vec!["abcd", "abcdefgh"]);
        assert_eq!(pending, "i");
    }

    #[test]
    fn test_break_split_across_adds() {
        let (chunks, _, pending) = collect(3, &["\n\n"], None, &["abc\n", "\ndef"]);
        assert_eq!(chunks, vec!["abc\n\n"]);
        assert_eq!(pending, "def");
    }

    #[test]
    fn test_multiple_boundaries_in_one_add() {
        let (chunks, _, pending) =
            collect(2, &["\n\n"], None, &["aa\n\nbb\n\ncc\n\nd"]);
        assert_eq!(chunks, vec!["aa\n\n", "bb\n\n", "cc\n\n"]);
        assert_eq!(pending, "d");
    }

    #[test]
    fn test_leftmost_of_several_break_strings() {
        let (chunks, _, _) = collect(2, &["\n\n", ". "], None, &["ab. cd\n\nef"]);
        assert_eq!(chunks[0], "ab. ");
    }

    #[test]
    fn test_multibyte_characters_count_as_one() {
        let (chunks, _, pending) = collect(3, &["\n\n"], None, &["ééé\n\nü"]);
        assert_eq!(chunks, vec!["ééé\n\n"]);
        assert_eq!(pending, "ü");
    }

    #[test]
    fn test_flush_emits_remainder_once() {
        let mut seen = Vec::new();
        let mut buffer = ChunkBuffer::new(100, ["\n\n"], |c: &str, f: &str| {
            seen.push((c.to_string(), f.to_string()));
        });
        buffer.add("partial");
        buffer.flush();
        buffer.flush();
        assert_eq!(buffer.flush_count(), 1);
        assert_eq!(buffer.full_text(), "partial");
        drop(buffer);
        assert_eq!(seen, vec![("partial".to_string(), "partial".to_string())]);
    }

    #[test]
    fn test_empty_break_strings_ignored() {
        let (chunks, _, _) = collect(2, &[""], None, &["abc"]);
        assert_eq!(chunks, vec!["abc"]);
    }

    proptest! {
        #[test]
        fn prop_full_text_equals_input(
            pieces in prop::collection::vec("[a-c\\n. é]{0,12}", 0..30),
            threshold in 1usize..40,
            use_breaks in any::<bool>(),
            hard_limit in prop::option::of(40usize..80),
        ) {
            let breaks: Vec<&str> = if use_breaks { vec!["\n\n", ". "] } else { Vec::new() };
            let mut chunks: Vec<String> = Vec::new();
            let mut last_full = String::new();
            let full;
            {
                let mut buffer = ChunkBuffer::new(threshold, breaks, |c: &str, f: &str| {
                    chunks.push(c.to_string());
                    last_full = f.to_string();
                });
                if let Some(limit) = hard_limit {
                    buffer = buffer.with_hard_limit(limit);
                }
                for piece in &pieces {
                    buffer.add(piece);
                }
                buffer.flush();
                prop_assert!(buffer.pending().is_empty());
                full = buffer.full_text().to_string();
            }

            let input: String = pieces.concat();
            prop_assert_eq!(&full, &input);
            prop_assert_eq!(chunks.concat(), input);
            prop_assert!(chunks.iter().all(|c| !c.is_empty()));
            if !chunks.is_empty() {
                prop_assert_eq!(last_full, full);
            }
        }
    }
}
