use std::collections::VecDeque;

use crate::models::OutputLine;

pub const DEFAULT_OUTPUT_LINES: usize = 5000;

/// Ring buffer of captured server output. The oldest line is dropped once
/// `capacity` is reached.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<OutputLine>,
    capacity: usize,
    dropped: u64,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LINES)
    }
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: OutputLine) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<OutputLine> {
        self.lines.iter().cloned().collect()
    }

    /// Buffered text, one line per entry.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines discarded to stay within capacity.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputStream;

    #[test]
    fn oldest_lines_are_dropped_at_capacity() {
        let mut buffer = OutputBuffer::new(3);
        for i in 0..5 {
            buffer.push(OutputLine::new(OutputStream::Stdout, format!("line {}", i)));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        assert_eq!(buffer.text(), "line 2\nline 3\nline 4\n");
    }

    #[test]
    fn zero_capacity_keeps_last_line() {
        let mut buffer = OutputBuffer::new(0);
        buffer.push(OutputLine::new(OutputStream::Stderr, "a"));
        buffer.push(OutputLine::new(OutputStream::Stderr, "b"));
        assert_eq!(buffer.text(), "b\n");
    }
}
