//! Newline framing of the `stream-events` byte stream.

use std::string::FromUtf8Error;

use thiserror::Error;

use crate::EVENT_SEPARATOR;

#[derive(Debug, Error)]
#[error("event record is not valid UTF-8")]
pub struct FramingError(#[from] FromUtf8Error);

/// Accumulates raw bytes and hands back complete records.
///
/// A record is everything up to (not including) the next `\n`. Bytes after
/// the last separator stay buffered until a later `feed` completes them.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Remove and return every complete record, in stream order.
    pub fn pop_complete_records(&mut self) -> Result<Vec<String>, FramingError> {
        let Some(last) = self.pending.iter().rposition(|b| *b == EVENT_SEPARATOR) else {
            return Ok(Vec::new());
        };

        let complete: Vec<u8> = self.pending.drain(..=last).collect();
        complete[..complete.len() - 1]
            .split(|b| *b == EVENT_SEPARATOR)
            .map(|record| String::from_utf8(record.to_vec()).map_err(FramingError::from))
            .collect()
    }

    /// Number of buffered bytes not yet part of a complete record.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<String> {
        vec![
            r#"{"type":"comment-added","comment":"LGTM"}"#.to_string(),
            r#"{"type":"patchset-created","patchSet":{"number":"3"}}"#.to_string(),
            r#"{"type":"ref-updated","refUpdate":{"refName":"refs/heads/master"}}"#.to_string(),
            r#"{"type":"change-merged","subject":"Fix café über naïve"}"#.to_string(),
        ]
    }

    fn wire() -> Vec<u8> {
        let mut bytes = Vec::new();
        for record in records() {
            bytes.extend_from_slice(record.as_bytes());
            bytes.push(b'\n');
        }
        bytes
    }

    fn replay(chunk_sizes: impl Iterator<Item = usize>) -> Vec<String> {
        let wire = wire();
        let mut buffer = FrameBuffer::new();
        let mut out = Vec::new();
        let mut offset = 0usize;
        let mut sizes = chunk_sizes;
        while offset < wire.len() {
            let size = sizes.next().unwrap_or(wire.len()).max(1);
            let end = offset.saturating_add(size).min(wire.len());
            buffer.feed(&wire[offset..end]);
            out.extend(buffer.pop_complete_records().unwrap());
            offset = end;
        }
        assert_eq!(buffer.pending_len(), 0);
        out
    }

    #[test]
    fn whole_stream_at_once() {
        assert_eq!(replay(std::iter::once(usize::MAX)), records());
    }

    #[test]
    fn any_chunking_yields_the_same_records() {
        for size in 1..=17 {
            assert_eq!(replay(std::iter::repeat(size)), records(), "chunk size {size}");
        }
        // Uneven chunks that split multi-byte characters and separators.
        let uneven = [3usize, 1, 50, 2, 7, 64, 1, 1, 29, 5, 200];
        assert_eq!(replay(uneven.iter().copied().cycle()), records());
    }

    #[test]
    fn partial_record_is_retained() {
        let mut buffer = FrameBuffer::new();
        buffer.feed(br#"{"a":1}"#);
        assert!(buffer.pop_complete_records().unwrap().is_empty());
        assert_eq!(buffer.pending_len(), 7);

        buffer.feed(b"\n");
        assert_eq!(buffer.pop_complete_records().unwrap(), vec![r#"{"a":1}"#]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn trailing_partial_survives_a_pop() {
        let mut buffer = FrameBuffer::new();
        buffer.feed(b"{\"a\":1}\n{\"b\"");
        assert_eq!(buffer.pop_complete_records().unwrap(), vec![r#"{"a":1}"#]);
        buffer.feed(b":2}\n");
        assert_eq!(buffer.pop_complete_records().unwrap(), vec![r#"{"b":2}"#]);
    }

    #[test]
    fn empty_records_are_reported() {
        let mut buffer = FrameBuffer::new();
        buffer.feed(b"\n\n{}\n");
        assert_eq!(buffer.pop_complete_records().unwrap(), vec!["", "", "{}"]);
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let mut buffer = FrameBuffer::new();
        buffer.feed(&[b'{', 0xff, b'}', b'\n']);
        assert!(buffer.pop_complete_records().is_err());
    }
}
