//! RTSP request parsing (RFC 2326 §6).
//!
//! Requests arrive incrementally over a non-blocking socket, so parsing
//! is split from reading: [`RtspRequest::try_parse`] looks for a
//! complete request (headers terminated by a blank line, plus any
//! `Content-Length` body) at the front of a byte buffer and reports how
//! many bytes it consumed, or `None` if the caller should keep reading.

use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed RTSP request.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, ANNOUNCE, RECORD, ...).
    pub method: String,
    /// Request-URI, e.g. `rtsp://host:port/stream/track1`.
    pub uri: String,
    /// Protocol version (expected `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs; lookup is case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Request body (present on ANNOUNCE, which carries an SDP payload).
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Look up a header value by name (case-insensitive, RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Session id, stripped of any trailing `;timeout=...` parameter.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }

    /// Attempt to parse one complete request from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a full
    /// request (caller should keep reading), `Ok(Some((request,
    /// consumed)))` on success, or an error for a malformed request line
    /// or header — at which point the caller should close the
    /// connection rather than wait for more bytes.
    pub fn try_parse(buf: &[u8]) -> Result<Option<(RtspRequest, usize)>> {
        let Some(header_end) = find_header_terminator(buf) else {
            return Ok(None);
        };

        let head = std::str::from_utf8(&buf[..header_end]).map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;

        let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
        let request_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }
        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        let mut headers = Vec::new();
        for line in lines {
            let colon = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon].trim().to_string();
            let value = line[colon + 1..].trim().to_string();
            headers.push((name, value));
        }

        let body_start = header_end + 4;
        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        if buf.len() < body_start + content_length {
            return Ok(None);
        }

        let body = buf[body_start..body_start + content_length].to_vec();

        Ok(Some((
            RtspRequest {
                method,
                uri,
                version,
                headers,
                body,
            },
            body_start + content_length,
        )))
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options_request() {
        let raw = b"OPTIONS rtsp://localhost:554/live RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let (req, consumed) = RtspRequest::try_parse(raw).unwrap().unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.cseq(), Some("1"));
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn incomplete_request_returns_none() {
        let raw = b"OPTIONS rtsp://localhost/live RTSP/1.0\r\nCSeq: 1\r\n";
        assert!(RtspRequest::try_parse(raw).unwrap().is_none());
    }

    #[test]
    fn waits_for_full_content_length_body() {
        let raw = b"ANNOUNCE rtsp://localhost/live RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 10\r\n\r\nv=0\r\ns=x\r\n";
        // body present but only 9 bytes after header terminator, not 10
        let partial = &raw[..raw.len() - 1];
        assert!(RtspRequest::try_parse(partial).unwrap().is_none());
        let (req, consumed) = RtspRequest::try_parse(raw).unwrap().unwrap();
        assert_eq!(req.body.len(), 10);
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn rejects_malformed_request_line() {
        assert!(RtspRequest::try_parse(b"JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let raw = b"OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let (req, _) = RtspRequest::try_parse(raw).unwrap().unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn session_id_strips_timeout_parameter() {
        let raw = b"PLAY rtsp://localhost RTSP/1.0\r\nSession: abc123;timeout=60\r\n\r\n";
        let (req, _) = RtspRequest::try_parse(raw).unwrap().unwrap();
        assert_eq!(req.session_id(), Some("abc123"));
    }
}
