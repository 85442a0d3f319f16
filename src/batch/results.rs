use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::error::WireError;
use crate::protocol::batch::BatchResult;

/// Splits a byte stream into `\n`-terminated lines.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: BytesMut,
    scan_from: usize,
}

impl LineDecoder {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Bytes> {
        let rel = memchr::memchr(b'\n', &self.buffer[self.scan_from..])?;
        let line_end = self.scan_from + rel;
        let mut line = self.buffer.split_to(line_end);
        self.buffer.advance(1);
        self.scan_from = 0;
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(line.freeze())
    }

    fn mark_scanned(&mut self) {
        self.scan_from = self.buffer.len();
    }

    fn finish(&mut self) -> Option<Bytes> {
        self.scan_from = 0;
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.split().freeze())
    }
}

/// Decode one results line. Blank lines and lines that are not a valid
/// result record yield `None`; the latter are logged.
#[must_use]
pub fn parse_result_line(line: &[u8]) -> Option<BatchResult> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<BatchResult>(line) {
        Ok(result) => Some(result),
        Err(err) => {
            tracing::warn!(len = line.len(), error = %err, "skipping malformed batch result line");
            None
        }
    }
}

/// Stream [`BatchResult`] records from a newline-delimited JSON body.
///
/// Records are yielded in file order. A transport error is yielded once and
/// ends the stream.
pub fn result_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<BatchResult, WireError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<WireError> + Send + 'static,
{
    let lines = futures_util::stream::unfold(
        (Box::pin(byte_stream), LineDecoder::default(), false),
        |(mut stream, mut decoder, mut finished)| async move {
            loop {
                if let Some(line) = decoder.next_line() {
                    return Some((Ok(line), (stream, decoder, finished)));
                }
                if finished {
                    return None;
                }
                decoder.mark_scanned();

                match stream.as_mut().next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(err)) => {
                        finished = true;
                        decoder = LineDecoder::default();
                        return Some((Err(err.into()), (stream, decoder, finished)));
                    }
                    None => {
                        finished = true;
                        let line = decoder.finish()?;
                        return Some((Ok(line), (stream, decoder, finished)));
                    }
                }
            }
        },
    );

    lines.filter_map(|line: Result<Bytes, WireError>| async move {
        match line {
            Ok(line) => parse_result_line(&line).map(Ok),
            Err(err) => Some(Err(err)),
        }
    })
}
