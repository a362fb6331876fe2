// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Response framing for HTTP/1.1 spoken over a raw tunnel.
//!
//! This library implements the parts of the HTTP/1.1 response message
//! needed to read one response off a socket that no HTTP client owns:
//! * the status line and header section, up to the blank line
//! * bodies delimited by `Content-Length`, by chunked transfer coding,
//!   or by the peer closing the connection
//! * `Content-Encoding: gzip`
//!
//! It is not meant to implement all aspects of RFC 9112. In particular,
//! this library does not implement the following:
//! * header field values folded over multiple lines
//! * limits on the lengths of the header section or header fields
//! * trailer fields after the last chunk (they are skipped)
//!
//! The result does not depend on how the bytes were split across reads.

use crate::error::Error;
use bytes::{Buf, Bytes, BytesMut};
use flate2::read::MultiGzDecoder;
use log::debug;
use std::collections::HashMap;
use std::io::{ErrorKind, Read};

pub type Result<T> = core::result::Result<T, Error>;

const READ_CHUNK_SIZE: usize = 4096;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

/// Header fields with names kept exactly as received. A repeated name
/// overwrites the earlier value.
pub type Headers = HashMap<String, String>;

/// Status line and header fields of a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    /// Parses a header block (status line, header lines, optional blank line).
    pub fn parse(block: &[u8]) -> Result<ResponseHead> {
        let text = String::from_utf8_lossy(block);
        let mut lines = text.split("\r\n");
        let status_line = lines.next().unwrap_or_default();

        // The reason phrase may itself contain spaces.
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let status_code = parts
            .next()
            .and_then(|code| code.trim().parse::<u16>().ok())
            .filter(|_| !version.is_empty())
            .ok_or_else(|| {
                Error::protocol("read-head", format!("malformed status line: {:?}", status_line))
            })?;
        let reason = parts.next().unwrap_or_default().to_string();

        let mut headers = Headers::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() {
                    headers.insert(name.to_string(), value.trim().to_string());
                }
            }
        }

        Ok(ResponseHead { version: version.to_string(), status_code, reason, headers })
    }

    /// Looks up a header, preferring the exact name and falling back to a
    /// case-insensitive match.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn status_line(&self) -> String {
        if self.reason.is_empty() {
            format!("{} {}", self.version, self.status_code)
        } else {
            format!("{} {} {}", self.version, self.status_code, self.reason)
        }
    }

    /// The declared body length, if it parses as a non-negative integer.
    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length").and_then(|value| value.trim().parse::<usize>().ok())
    }

    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding")
            .map_or(false, |value| value.trim().eq_ignore_ascii_case("chunked"))
    }
}

pub(crate) fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .or_else(|| {
            headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value)
        })
        .map(String::as_str)
}

/// A fully read response.
#[derive(Debug)]
pub struct DecodedResponse {
    pub head: ResponseHead,
    pub body: Vec<u8>,
}

/// Reads HTTP responses from a byte stream.
///
/// Bytes read past the end of the header block are kept and count toward
/// the body.
pub struct HttpFramer<R> {
    reader: R,
    buffer: BytesMut,
    eof: bool,
}

impl<R: Read> HttpFramer<R> {
    pub fn new(reader: R) -> Self {
        HttpFramer { reader, buffer: BytesMut::with_capacity(READ_CHUNK_SIZE), eof: false }
    }

    /// Reads one complete response: head, body, content decoding.
    pub fn decode(mut self) -> Result<DecodedResponse> {
        let head = self.read_head()?;
        let body = self.read_body(&head)?;
        let body = decode_content(&head, body)?;
        Ok(DecodedResponse { head, body })
    }

    /// Reads up to and including the blank line ending the header block.
    ///
    /// Fails with `ConnectionError` if the peer closes first.
    pub fn read_head_block(&mut self) -> Result<Bytes> {
        let mut searched = 0;
        loop {
            if let Some(pos) = find(&self.buffer[searched..], HEADER_TERMINATOR) {
                let end = searched + pos + HEADER_TERMINATOR.len();
                return Ok(self.buffer.split_to(end).freeze());
            }
            searched = self.buffer.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
            if self.fill()? == 0 {
                return Err(Error::connection(
                    "read-head",
                    format!(
                        "connection closed after {} bytes, before the end of the header block",
                        self.buffer.len()
                    ),
                ));
            }
        }
    }

    /// Number of bytes read from the stream but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn read_head(&mut self) -> Result<ResponseHead> {
        let block = self.read_head_block()?;
        ResponseHead::parse(&block)
    }

    /// Reads the body that follows `head`, without content decoding.
    pub fn read_body(&mut self, head: &ResponseHead) -> Result<Vec<u8>> {
        if let Some(length) = head.content_length() {
            debug!("Reading {} byte body", length);
            self.read_up_to(length)
        } else if head.is_chunked() {
            debug!("Reading chunked body");
            self.read_chunked()
        } else {
            debug!("Reading body until the connection closes");
            self.read_to_close()
        }
    }

    /// Reads exactly `length` bytes, or fewer if the peer closes early.
    pub fn read_up_to(&mut self, length: usize) -> Result<Vec<u8>> {
        self.fill_to(length)?;
        let take = length.min(self.buffer.len());
        if take < length {
            debug!("Body truncated: expected {} bytes, got {}", length, take);
        }
        Ok(self.buffer.split_to(take).to_vec())
    }

    fn read_chunked(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        loop {
            let Some(line_end) = self.find_line()? else {
                break;
            };
            let line = self.buffer.split_to(line_end + CRLF.len());
            let Some(size) = parse_chunk_size(&line[..line_end]) else {
                debug!("Unparsable chunk size line {:?}", String::from_utf8_lossy(&line));
                break;
            };
            if size == 0 {
                break;
            }
            let Some(wanted) = size.checked_add(CRLF.len()) else {
                debug!("Chunk size {:#x} out of range", size);
                break;
            };
            self.fill_to(wanted)?;
            let take = size.min(self.buffer.len());
            body.extend_from_slice(&self.buffer.split_to(take));
            if take < size {
                break;
            }
            let crlf = CRLF.len().min(self.buffer.len());
            self.buffer.advance(crlf);
        }
        Ok(body)
    }

    fn read_to_close(&mut self) -> Result<Vec<u8>> {
        while self.fill()? > 0 {}
        Ok(self.buffer.split().to_vec())
    }

    /// Returns the offset of the next CRLF, reading more as needed.
    /// `None` means the peer closed before one arrived.
    fn find_line(&mut self) -> Result<Option<usize>> {
        let mut searched = 0;
        loop {
            if let Some(pos) = find(&self.buffer[searched..], CRLF) {
                return Ok(Some(searched + pos));
            }
            searched = self.buffer.len().saturating_sub(CRLF.len() - 1);
            if self.fill()? == 0 {
                return Ok(None);
            }
        }
    }

    fn fill_to(&mut self, wanted: usize) -> Result<()> {
        while self.buffer.len() < wanted {
            if self.fill()? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Reads once from the stream. Returns 0 once the peer has closed.
    fn fill(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = loop {
            match self.reader.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // TLS peers that close without close_notify.
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break 0,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(Error::connection("read", format!("read timed out: {}", e)))
                }
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            self.eof = true;
        } else {
            self.buffer.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }
}

/// Applies `Content-Encoding: gzip`. Other encodings are left as they are.
pub fn decode_content(head: &ResponseHead, body: Vec<u8>) -> Result<Vec<u8>> {
    if head.header("Content-Encoding") != Some("gzip") {
        return Ok(body);
    }
    let mut decoded = Vec::with_capacity(body.len() * 2);
    MultiGzDecoder::new(body.as_slice())
        .read_to_end(&mut decoded)
        .map_err(|e| Error::protocol("content-decoding", format!("invalid gzip body: {}", e)))?;
    Ok(decoded)
}

/// Parses a chunk-size line, ignoring chunk extensions.
fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let line = std::str::from_utf8(line).ok()?;
    let size = line.split(';').next()?.trim();
    if size.is_empty() {
        return None;
    }
    usize::from_str_radix(size, 16).ok()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
