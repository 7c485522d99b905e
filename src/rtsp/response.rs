//! RTSP response builder (RFC 2326 §7).

use super::request::RtspRequest;

/// Server identification string included in every RTSP response
/// (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = "screen-rtsp/0.1";

/// An RTSP response under construction.
///
/// Every response produced by [`crate::rtsp::connection::RtspConnection`]
/// goes through this builder so the `Server` header and (when the
/// triggering request carried one) the echoed `CSeq` header are never
/// forgotten — both are required on every response per §6.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &'static str) -> Self {
        Self {
            status_code,
            status_text,
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }

    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    pub fn unsupported_transport() -> Self {
        Self::new(461, "Unsupported Transport")
    }

    pub fn server_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    /// Echo the originating request's `CSeq`, when it had one (RFC 2326 §12.17).
    pub fn for_request(mut self, request: &RtspRequest) -> Self {
        if let Some(cseq) = request.cseq() {
            self = self.add_header("CSeq", cseq);
        }
        self
    }

    pub fn add_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: String) -> Self {
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format. `Content-Length` is
    /// computed automatically when a body is present (RFC 2326 §12.14).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        match &self.body {
            Some(body) => {
                out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                out.push_str(body);
            }
            None => out.push_str("\r\n"),
        }
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_no_body() {
        let resp = RtspResponse::ok().add_header("CSeq", "1");
        let s = String::from_utf8(resp.serialize()).unwrap();
        assert!(s.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(s.contains("Server: screen-rtsp/0.1\r\n"));
        assert!(s.contains("CSeq: 1\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn serialize_with_body_sets_content_length() {
        let resp = RtspResponse::ok().with_body("application/sdp", "v=0\r\n".to_string());
        let s = String::from_utf8(resp.serialize()).unwrap();
        assert!(s.contains("Content-Type: application/sdp\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("v=0\r\n"));
    }

    #[test]
    fn for_request_echoes_cseq() {
        let raw = b"OPTIONS rtsp://localhost RTSP/1.0\r\nCSeq: 7\r\n\r\n";
        let (req, _) = RtspRequest::try_parse(raw).unwrap().unwrap();
        let resp = RtspResponse::ok().for_request(&req);
        assert_eq!(resp.headers.iter().find(|(k, _)| k == "CSeq").unwrap().1, "7");
    }

    #[test]
    fn for_request_without_cseq_adds_nothing() {
        let raw = b"OPTIONS rtsp://localhost RTSP/1.0\r\n\r\n";
        let (req, _) = RtspRequest::try_parse(raw).unwrap().unwrap();
        let resp = RtspResponse::ok().for_request(&req);
        assert!(resp.headers.iter().all(|(k, _)| k != "CSeq"));
    }
}
