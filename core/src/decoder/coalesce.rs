/// Buffers text deltas between frame ticks so the consumer sees at most one
/// text update per tick.
#[derive(Debug, Default)]
pub struct TextCoalescer {
    pending: String,
}

impl TextCoalescer {
    pub fn push(&mut self, chunk: &str) {
        self.pending.push_str(chunk);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain the buffer. `None` when nothing is waiting.
    pub fn take(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Drop buffered text without emitting it. Returns how many bytes were lost.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
