//! Incremental SSE frame splitting.
//!
//! Bytes arrive from the HTTP body in chunks of arbitrary size. The decoder
//! buffers them and hands out one frame per blank-line delimiter, holding any
//! trailing partial frame until more bytes (or the end of the stream) arrive.
use std::sync::LazyLock;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use memchr::memmem;

use crate::error::WireError;

/// Incremental frame splitter over a byte stream.
///
/// A frame is the text between two consecutive blank-line delimiters
/// (`\n\n` or `\r\n\r\n`); delimiters are not part of the frame and empty
/// frames are never produced.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    scan_from: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scan_from: 0,
        }
    }

    /// Append a transport chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let Some((frame_end, delimiter_len)) =
                find_frame_terminator_from(&self.buffer, self.scan_from)
            else {
                // Keep a small overlap so a delimiter split across chunks is
                // still found on the next scan.
                self.scan_from = self.buffer.len().saturating_sub(3);
                return None;
            };
            let frame = self.buffer.split_to(frame_end).freeze();
            self.buffer.advance(delimiter_len);
            self.scan_from = 0;
            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }

    /// Flush the remainder at end of stream as a final frame.
    ///
    /// The remainder may be a truncated frame; deciding whether it parses is
    /// left to the event parser.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scan_from = 0;
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.split().freeze())
    }

    /// Number of buffered bytes not yet returned as a frame.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
    }
}

#[inline]
fn find_frame_terminator_from(buffer: &[u8], scan_from: usize) -> Option<(usize, usize)> {
    static LF_LF_FINDER: LazyLock<memmem::Finder<'static>> =
        LazyLock::new(|| memmem::Finder::new(b"\n\n"));
    static CRLF_CRLF_FINDER: LazyLock<memmem::Finder<'static>> =
        LazyLock::new(|| memmem::Finder::new(b"\r\n\r\n"));

    let scan_from = scan_from.min(buffer.len());
    let haystack = &buffer[scan_from..];
    let lf_lf_pos = LF_LF_FINDER.find(haystack).map(|rel| scan_from + rel);
    let crlf_crlf_pos = CRLF_CRLF_FINDER.find(haystack).map(|rel| scan_from + rel);

    match (lf_lf_pos, crlf_crlf_pos) {
        (Some(lf_pos), Some(crlf_pos)) => {
            if lf_pos <= crlf_pos {
                Some((lf_pos, 2))
            } else {
                Some((crlf_pos, 4))
            }
        }
        (Some(lf_pos), None) => Some((lf_pos, 2)),
        (None, Some(crlf_pos)) => Some((crlf_pos, 4)),
        (None, None) => None,
    }
}

/// Split a byte stream into raw SSE frames.
///
/// A transport error is yielded once and ends the stream; the partially
/// buffered frame is discarded with it. When the byte stream ends normally, a
/// non-empty remainder is yielded as the last frame.
pub fn frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<Bytes, WireError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<WireError> + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(byte_stream), FrameDecoder::new(), false),
        |(mut stream, mut decoder, mut finished)| async move {
            loop {
                if let Some(frame) = decoder.next_frame() {
                    return Some((Ok(frame), (stream, decoder, finished)));
                }
                if finished {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(err)) => {
                        finished = true;
                        decoder.clear();
                        return Some((Err(err.into()), (stream, decoder, finished)));
                    }
                    None => {
                        finished = true;
                        let frame = decoder.finish()?;
                        return Some((Ok(frame), (stream, decoder, finished)));
                    }
                }
            }
        },
    )
}
