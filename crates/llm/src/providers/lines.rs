//! Line framing for streamed response bodies.
//!
//! Network reads split the body at arbitrary byte offsets, including inside
//! a multi-byte UTF-8 character or a JSON line. Bytes are buffered until a
//! full `\n`-terminated line is available and only whole lines are decoded.

use futures::{Stream, StreamExt};
use std::fmt::Display;
use taxbot_core::{AppError, AppResult};

/// Accumulates raw bytes and yields complete lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append `bytes` and return every line completed by them, without the
    /// line terminator.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<AppResult<String>> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode(&line[..pos]));
        }
        lines
    }

    /// Return a final line left without a terminator when the body ends.
    pub(crate) fn finish(&mut self) -> Option<AppResult<String>> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode(&rest))
    }
}

fn decode(line: &[u8]) -> AppResult<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| AppError::Llm(format!("Stream line is not valid UTF-8: {}", e)))
}

/// Turn a byte stream into a stream of decoded lines.
pub(crate) fn byte_lines<S, B, E>(bytes: S) -> impl Stream<Item = AppResult<String>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let body = Box::pin(bytes);
    futures::stream::unfold(
        (body, LineBuffer::default(), false),
        |(mut body, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            let lines = match body.next().await {
                Some(Ok(bytes)) => return Some((buffer.push(bytes.as_ref()), (body, buffer, false))),
                Some(Err(e)) => vec![Err(AppError::Llm(format!("Stream error: {}", e)))],
                None => buffer.finish().into_iter().collect(),
            };
            Some((lines, (body, buffer, true)))
        },
    )
    .flat_map(futures::stream::iter)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_split_across_pushes() {
        let line = "data: 세율\n".as_bytes();
        // Cut after the first byte of the three-byte '세'.
        let cut = "data: ".len() + 1;

        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&line[..cut]).is_empty());
        let lines = buffer.push(&line[cut..]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].as_ref().unwrap(), "data: 세율");
    }

    #[test]
    fn test_crlf_and_trailing_line() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"{\"a\":1}\r\n{\"b\"");
        assert_eq!(lines[0].as_ref().unwrap(), "{\"a\":1}");
        assert!(buffer.push(b":2}").is_empty());
        assert_eq!(buffer.finish().unwrap().unwrap(), "{\"b\":2}");
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn test_invalid_utf8_line_is_llm_error() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(&[0xff, 0xfe, b'\n']);
        assert!(matches!(lines[0], Err(AppError::Llm(_))));
    }

    #[tokio::test]
    async fn test_byte_lines_rejoins_pieces() {
        let pieces: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"first li".to_vec()),
            Ok(b"ne\nsecond".to_vec()),
            Ok(b" line".to_vec()),
        ];
        let lines: Vec<String> = byte_lines(futures::stream::iter(pieces))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["first line", "second line"]);
    }
}
