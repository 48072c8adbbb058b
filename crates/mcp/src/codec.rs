// Newline-delimited message framing
//
// Works like `LinesCodec` but never fails on content: invalid UTF-8 and
// over-long lines come out as frames so the reader can answer or drop them
// and keep going. `FramedRead` ends the stream after any decoder error, so
// only real I/O errors may surface as `Err`.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// One line of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, newline and trailing `\r` stripped
    Message(String),
    /// A line that is not valid UTF-8, decoded lossily for diagnostics
    InvalidUtf8(String),
    /// A line longer than the limit; its bytes are discarded
    Oversized,
}

#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_length: usize,
    /// Bytes already scanned for a newline
    next_index: usize,
    /// Skipping the tail of an oversized line
    discarding: bool,
}

impl MessageCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
            discarding: false,
        }
    }
}

fn frame(line: &[u8]) -> Frame {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match std::str::from_utf8(line) {
        Ok(text) => Frame::Message(text.to_string()),
        Err(_) => Frame::InvalidUtf8(String::from_utf8_lossy(line).into_owned()),
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, std::io::Error> {
        loop {
            // Never look further than one byte past the limit
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.next_index..read_to].iter().position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    return Ok(Some(frame(&line[..end])));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(Some(Frame::Oversized));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, std::io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if self.discarding || buf.is_empty() {
            buf.clear();
            self.discarding = false;
            return Ok(None);
        }
        // Final line without a trailing newline
        let line = buf.split_to(buf.len());
        Ok(Some(frame(&line)))
    }
}
