//! Streaming HTTP/1.x request-head recognizer.
//!
//! Invoked after every read on an HTTP client. Until the CRLFCRLF terminator
//! is buffered it reports [`ParseStatus::NeedMore`]; after that the head is
//! parsed in one pass and completeness depends only on the body-length rule.
//! Re-invocation is cheap and idempotent: a completed request short-circuits,
//! and an incomplete body re-parses the head from scratch so header state
//! never duplicates.

use thiserror::Error;

use crate::config::{MAX_HEADERS, MAX_HEADER_NAME, MAX_HEADER_VALUE, MAX_HOST, MAX_METHOD, MAX_PATH};
use crate::http::{HttpRequest, Method, Version};

#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// Head parsed and the body-length rule is satisfied.
    Complete,
    /// Not enough buffered bytes yet; read again.
    NeedMore,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request head")]
    Malformed,
    #[error("request head exceeds configured limits")]
    TooLarge,
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn skip_ows(data: &[u8], mut pos: usize, end: usize) -> usize {
    while pos < end && (data[pos] == b' ' || data[pos] == b'\t') {
        pos += 1;
    }
    pos
}

fn trim_ows(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }
    s
}

fn to_str(bytes: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(bytes).map_err(|_| ParseError::Malformed)
}

/// Keep at most `max` bytes of `s`, respecting char boundaries.
fn truncated(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn parse_request_line(req: &mut HttpRequest, line: &[u8]) -> Result<(), ParseError> {
    let sp1 = line
        .iter()
        .position(|&b| b == b' ')
        .ok_or(ParseError::Malformed)?;
    let method_bytes = &line[..sp1];
    if method_bytes.is_empty() || method_bytes.len() >= MAX_METHOD {
        return Err(ParseError::Malformed);
    }
    req.method = Method::from_bytes(method_bytes);
    req.method_str = to_str(method_bytes)?.to_string();

    let target_start = skip_ows(line, sp1 + 1, line.len());
    let sp2 = line[target_start..]
        .iter()
        .position(|&b| b == b' ')
        .map(|p| target_start + p)
        .ok_or(ParseError::Malformed)?;
    let path_bytes = &line[target_start..sp2];
    if path_bytes.len() >= MAX_PATH {
        return Err(ParseError::TooLarge);
    }
    req.path = to_str(path_bytes)?.to_string();

    let version_start = skip_ows(line, sp2 + 1, line.len());
    let version = &line[version_start..];
    req.version = if version.eq_ignore_ascii_case(b"HTTP/1.1") {
        Version::Http11
    } else if version.eq_ignore_ascii_case(b"HTTP/1.0") {
        Version::Http10
    } else {
        req.version = Version::Unknown;
        return Err(ParseError::Malformed);
    };
    Ok(())
}

fn parse_header_line(req: &mut HttpRequest, line: &[u8]) -> Result<(), ParseError> {
    if req.headers.len() >= MAX_HEADERS {
        return Err(ParseError::TooLarge);
    }

    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::Malformed)?;
    let name = trim_ows(&line[..colon]);
    if name.is_empty() {
        return Err(ParseError::Malformed);
    }
    if name.len() >= MAX_HEADER_NAME {
        return Err(ParseError::TooLarge);
    }
    let value = trim_ows(&line[colon + 1..]);
    if value.len() >= MAX_HEADER_VALUE {
        return Err(ParseError::TooLarge);
    }

    let name = to_str(name)?;
    let value = to_str(value)?;

    if name.eq_ignore_ascii_case("Host") {
        req.host = truncated(value, MAX_HOST - 1).to_string();
    } else if name.eq_ignore_ascii_case("Content-Length") {
        // Non-numeric lengths are treated as absent; the body-length rule
        // then rejects methods that require one.
        req.content_length = value.parse::<i64>().unwrap_or(-1);
    } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
        let v = value.as_bytes();
        if v.len() >= 7 && v[..7].eq_ignore_ascii_case(b"chunked") {
            req.chunked = true;
        }
    }

    req.headers.push((name.to_string(), value.to_string()));
    Ok(())
}

/// Advance the parse over the currently-buffered prefix of the request.
///
/// `data` is always the full buffered request from offset 0, not a delta.
pub fn parse(req: &mut HttpRequest, data: &[u8]) -> Result<ParseStatus, ParseError> {
    if req.is_complete {
        return Ok(ParseStatus::Complete);
    }

    let head_terminator = match find_head_end(data) {
        Some(pos) => pos,
        None => return Ok(ParseStatus::NeedMore),
    };
    req.head_end = head_terminator + 4;

    // Full re-parse of the head; clears any state left by an earlier call
    // that was still waiting on body bytes.
    req.headers.clear();
    req.host.clear();
    req.content_length = -1;
    req.chunked = false;

    let line_end = find_crlf(data).ok_or(ParseError::Malformed)?;
    parse_request_line(req, &data[..line_end])?;

    let mut cursor = line_end + 2;
    while cursor < head_terminator {
        let rel = find_crlf(&data[cursor..head_terminator + 2]).ok_or(ParseError::Malformed)?;
        if rel == 0 {
            break;
        }
        parse_header_line(req, &data[cursor..cursor + rel])?;
        cursor += rel + 2;
    }

    // Connection header decides keep-alive; the version sets the default.
    let connection = req.header("Connection");
    req.keep_alive = match req.version {
        Version::Http10 => connection.is_some_and(|v| v.eq_ignore_ascii_case("keep-alive")),
        _ => !connection.is_some_and(|v| v.eq_ignore_ascii_case("close")),
    };

    if req.chunked {
        // Head forwarded as-is; chunked body bytes stream opaquely upstream.
        req.total_length = req.head_end;
        req.is_complete = true;
    } else if req.content_length >= 0 {
        let total = req.head_end as u64 + req.content_length as u64;
        req.total_length = usize::try_from(total).map_err(|_| ParseError::Malformed)?;
        if data.len() >= req.total_length {
            req.is_complete = true;
        }
    } else {
        match req.method {
            Method::Get | Method::Head | Method::Delete => {
                req.total_length = req.head_end;
                req.is_complete = true;
            }
            // A body-bearing method without a length is unframeable.
            _ => return Err(ParseError::Malformed),
        }
    }

    if req.is_complete {
        Ok(ParseStatus::Complete)
    } else {
        Ok(ParseStatus::NeedMore)
    }
}
