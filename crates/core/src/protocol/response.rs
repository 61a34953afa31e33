/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Server: ipcam-rtsp/0.1.0\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = concat!("ipcam-rtsp/", env!("CARGO_PKG_VERSION"));

/// Reason phrase for the status codes this server emits (RFC 2326 §7.1.1).
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        454 => "Session Not Found",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// Response with the standard reason phrase for `code`.
    pub fn status(code: u16) -> Self {
        Self::new(code, reason_phrase(code))
    }

    /// 200 OK, success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::status(200)
    }

    /// 400 Bad Request, malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::status(400)
    }

    /// 404 Not Found, the requested stream or track does not exist.
    pub fn not_found() -> Self {
        Self::status(404)
    }

    /// 405 Method Not Allowed, also used for methods invalid in the
    /// current session state.
    pub fn method_not_allowed() -> Self {
        Self::status(405)
    }

    pub fn session_not_found() -> Self {
        Self::status(454)
    }

    pub fn internal_error() -> Self {
        Self::status(500)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Put `CSeq` first, ahead of `Server`.
    pub fn with_cseq(mut self, cseq: &str) -> Self {
        self.headers.insert(0, ("CSeq".to_string(), cseq.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_no_body() {
        let resp = RtspResponse::ok()
            .with_cseq("1")
            .add_header("Public", "OPTIONS");
        let s = resp.serialize();
        assert!(s.starts_with("RTSP/1.0 200 OK\r\nCSeq: 1\r\n"));
        assert!(s.contains(&format!("Server: {SERVER_AGENT}\r\n")));
        assert!(s.contains("Public: OPTIONS\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
        assert!(!s.contains("Content-Length"));
    }

    #[test]
    fn serialize_with_body() {
        let resp = RtspResponse::ok()
            .with_cseq("2")
            .with_body("v=0\r\n".to_string());
        let s = resp.serialize();
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nv=0\r\n"));
    }

    #[test]
    fn status_lines() {
        let cases = [
            (RtspResponse::bad_request(), "RTSP/1.0 400 Bad Request\r\n"),
            (RtspResponse::not_found(), "RTSP/1.0 404 Not Found\r\n"),
            (RtspResponse::method_not_allowed(), "RTSP/1.0 405 Method Not Allowed\r\n"),
            (RtspResponse::session_not_found(), "RTSP/1.0 454 Session Not Found\r\n"),
            (RtspResponse::internal_error(), "RTSP/1.0 500 Internal Server Error\r\n"),
        ];
        for (resp, line) in cases {
            assert!(resp.serialize().starts_with(line));
        }
        assert_eq!(reason_phrase(401), "Unauthorized");
    }
}
