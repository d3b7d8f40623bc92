//! STOMP 1.2 text framing.
//!
//! A frame is `COMMAND EOL *(header EOL) EOL body NUL`, where EOL is `\n` or
//! `\r\n`. Bare EOLs between frames are heart-beats and carry no data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::{Command, Message};

const CONTENT_LENGTH: &str = "content-length";

/// Encode `msg` onto the end of `dst`.
///
/// A `content-length` header is emitted for every non-empty body unless the
/// message already carries one. Header escaping is skipped for `CONNECT` and
/// `CONNECTED` frames as STOMP 1.2 requires.
pub fn encode_frame(msg: &Message, dst: &mut BytesMut) {
    let escape = !matches!(msg.command, Command::Connect | Command::Connected);

    dst.put_slice(msg.command.as_str().as_bytes());
    dst.put_u8(b'\n');

    for (name, value) in msg.headers() {
        put_header_part(dst, name, escape);
        dst.put_u8(b':');
        put_header_part(dst, value, escape);
        dst.put_u8(b'\n');
    }
    if !msg.body.is_empty() && msg.header(CONTENT_LENGTH).is_none() {
        dst.put_slice(format!("{CONTENT_LENGTH}:{}\n", msg.body.len()).as_bytes());
    }

    dst.put_u8(b'\n');
    dst.put_slice(&msg.body);
    dst.put_u8(0);
}

fn put_header_part(dst: &mut BytesMut, part: &str, escape: bool) {
    if !escape {
        dst.put_slice(part.as_bytes());
        return;
    }
    for byte in part.bytes() {
        match byte {
            b'\\' => dst.put_slice(b"\\\\"),
            b'\n' => dst.put_slice(b"\\n"),
            b'\r' => dst.put_slice(b"\\r"),
            b':' => dst.put_slice(b"\\c"),
            other => dst.put_u8(other),
        }
    }
}

/// Drop heart-beat EOLs from the front of `buf`.
pub fn skip_heartbeats(buf: &mut BytesMut) {
    let skip = buf
        .iter()
        .take_while(|&&b| b == b'\n' || b == b'\r')
        .count();
    buf.advance(skip);
}

/// Try to decode one frame from the front of `src`.
///
/// Returns `Ok(None)` when more bytes are needed, or the message together with
/// the number of bytes it occupied. Leading heart-beats must already have been
/// skipped.
///
/// # Errors
///
/// - [`Error::FrameTooLarge`] if the frame exceeds `limits.max_frame_size`
/// - [`Error::InvalidFrame`] for malformed commands, headers or lengths
pub fn decode_frame(src: &[u8], limits: &Limits) -> Result<Option<(Message, usize)>> {
    let Some(header_end) = find_header_end(src) else {
        limits.check_frame_size(src.len())?;
        return Ok(None);
    };
    let (head, body_start) = header_end;

    let head = std::str::from_utf8(&src[..head])
        .map_err(|_| Error::InvalidFrame("frame head is not UTF-8".into()))?;
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let command = Command::parse(lines.next().unwrap_or_default())?;
    let escape = !matches!(command, Command::Connect | Command::Connected);

    let mut message = Message::new(command);
    let mut header_count = 0;
    for line in lines {
        header_count += 1;
        if header_count > limits.max_header_count {
            return Err(Error::InvalidFrame(format!(
                "more than {} headers",
                limits.max_header_count
            )));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidFrame(format!("header without colon: {line:?}")))?;
        let (name, value) = if escape {
            (unescape(name)?, unescape(value)?)
        } else {
            (name.to_string(), value.to_string())
        };
        message = message.with_header(name, value);
    }

    let body_end = match message.header(CONTENT_LENGTH) {
        Some(raw) => {
            let len: usize = raw
                .trim()
                .parse()
                .map_err(|_| Error::InvalidFrame(format!("bad content-length {raw:?}")))?;
            let frame_len = body_start
                .checked_add(len)
                .and_then(|end| end.checked_add(1))
                .ok_or_else(|| Error::InvalidFrame(format!("content-length {len} overflows")))?;
            limits.check_frame_size(frame_len)?;
            if src.len() < frame_len {
                return Ok(None);
            }
            let end = frame_len - 1;
            if src[end] != 0 {
                return Err(Error::InvalidFrame("body not terminated by NUL".into()));
            }
            end
        }
        None => match src[body_start..].iter().position(|&b| b == 0) {
            Some(offset) => body_start + offset,
            None => {
                limits.check_frame_size(src.len())?;
                return Ok(None);
            }
        },
    };
    limits.check_frame_size(body_end + 1)?;

    let body = Bytes::copy_from_slice(&src[body_start..body_end]);
    Ok(Some((message.with_body(body), body_end + 1)))
}

/// Locate the blank line ending the head. Returns the head length (without
/// its final EOL) and the offset where the body starts.
fn find_header_end(src: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < src.len() {
        if src[i] == b'\n' {
            let next = i + 1;
            if src.get(next) == Some(&b'\n') {
                return Some((i, next + 1));
            }
            if src.get(next) == Some(&b'\r') && src.get(next + 1) == Some(&b'\n') {
                return Some((i, next + 2));
            }
        }
        i += 1;
    }
    None
}

fn unescape(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(Error::InvalidFrame(format!(
                    "undefined escape sequence \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
