use serde_json::{Deserializer, Value};
use tracing::debug;

/// Hard cap on one accumulated JSON frame, matching the largest chunk an HTTP
/// client hands over in one write callback.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

/// Outcome of feeding one chunk into a [`JsonAccumulator`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// No frame boundary yet; bytes are buffered.
    Pending,
    /// A boundary was seen and at least one object parsed.
    Complete(Vec<Value>),
    /// A boundary was seen but nothing parsed; the bytes were dropped.
    Discarded,
    /// The chunk would exceed the cap; buffer and chunk were dropped.
    Overflow,
}

/// Recovers JSON objects from an HTTP body delivered in arbitrary chunks.
///
/// A frame is considered complete when the buffered bytes end in `}}`. Meter
/// firmware always closes a nested object last, so this holds for every real
/// payload, but a chunk that happens to end right after an inner `}}` makes the
/// frame parse early and fail. That frame is discarded and the next poll
/// delivers fresh data.
#[derive(Debug)]
pub struct JsonAccumulator {
    buf: Vec<u8>,
    cap: usize,
}

impl Default for JsonAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonAccumulator {
    pub fn new() -> Self {
        Self::with_cap(MAX_FRAME_BYTES)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap.min(MAX_FRAME_BYTES)),
            cap,
        }
    }

    /// Bytes currently buffered.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn push(&mut self, chunk: &[u8]) -> FrameEvent {
        if self.buf.len() + chunk.len() > self.cap {
            debug!(
                buffered = self.buf.len(),
                chunk = chunk.len(),
                cap = self.cap,
                "json frame overflow, resetting"
            );
            self.reset();
            return FrameEvent::Overflow;
        }
        self.buf.extend_from_slice(chunk);
        if self.buf.len() <= 4 || !self.buf.ends_with(b"}}") {
            return FrameEvent::Pending;
        }

        let objects = parse_concatenated(&self.buf);
        self.reset();
        if objects.is_empty() {
            debug!("discarding unparsable json frame");
            FrameEvent::Discarded
        } else {
            FrameEvent::Complete(objects)
        }
    }
}

/// A body may carry several objects back to back; take every leading object
/// that parses and stop at the first error.
fn parse_concatenated(data: &[u8]) -> Vec<Value> {
    let mut out = Vec::new();
    for item in Deserializer::from_slice(data).into_iter::<Value>() {
        match item {
            Ok(v) if v.is_object() => out.push(v),
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "json frame parse stopped");
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frame_completes_once() {
        let mut acc = JsonAccumulator::new();
        let payload = br#"{"a":{"b":1}}"#;

        assert_eq!(acc.push(&payload[..3]), FrameEvent::Pending);
        assert_eq!(acc.push(&payload[3..9]), FrameEvent::Pending);
        match acc.push(&payload[9..]) {
            FrameEvent::Complete(objs) => {
                assert_eq!(objs.len(), 1);
                assert_eq!(objs[0]["a"]["b"], 1);
            }
            other => panic!("expected a complete frame, got {other:?}"),
        }
        assert_eq!(acc.position(), 0);
    }

    #[test]
    fn test_single_closing_brace_never_completes() {
        let mut acc = JsonAccumulator::new();
        assert_eq!(acc.push(br#"{"a":"#), FrameEvent::Pending);
        assert_eq!(acc.push(b"1"), FrameEvent::Pending);
        assert_eq!(acc.push(b"}"), FrameEvent::Pending);
        assert_eq!(acc.position(), 7);
    }

    #[test]
    fn test_overflow_resets_and_recovers() {
        let mut acc = JsonAccumulator::with_cap(64);
        assert_eq!(acc.push(&[b'x'; 40]), FrameEvent::Pending);
        assert_eq!(acc.push(&[b'x'; 40]), FrameEvent::Overflow);
        assert_eq!(acc.position(), 0);

        match acc.push(br#"{"info":{"rssi":-60}}"#) {
            FrameEvent::Complete(objs) => assert_eq!(objs[0]["info"]["rssi"], -60),
            other => panic!("accumulator unusable after overflow: {other:?}"),
        }
    }

    #[test]
    fn test_oversized_stream_never_grows_buffer() {
        let mut acc = JsonAccumulator::new();
        let chunk = [b'a'; 1000];
        for _ in 0..100 {
            acc.push(&chunk);
            assert!(acc.position() <= MAX_FRAME_BYTES);
        }
    }

    #[test]
    fn test_garbage_frame_is_discarded() {
        let mut acc = JsonAccumulator::new();
        assert_eq!(acc.push(b"not json at all }}"), FrameEvent::Discarded);
        assert_eq!(acc.position(), 0);
    }

    #[test]
    fn test_concatenated_objects_in_one_frame() {
        let mut acc = JsonAccumulator::new();
        let body = br#"{"info":{"n":1}}{"info":{"n":2}}"#;
        match acc.push(body) {
            FrameEvent::Complete(objs) => {
                assert_eq!(objs.len(), 2);
                assert_eq!(objs[1]["info"]["n"], 2);
            }
            other => panic!("expected two objects, got {other:?}"),
        }
    }
}
