use crate::error::ServiceError;

/// A decoded HTTP/1.1 request.
///
/// Decoding happens on worker threads, after the event loop has framed the
/// raw bytes. Header names are kept with their original casing and looked up
/// with exact-case matching, mirroring the framing layer.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// True iff `Connection: keep-alive` appeared in the headers.
    pub keep_alive: bool,
}

impl HttpRequest {
    /// Decode a framed request.
    ///
    /// # Errors
    /// - `InvalidRequest` if the header block is missing, is not UTF-8, or
    ///   the request line does not have `METHOD PATH VERSION` shape.
    pub fn parse(raw: &[u8]) -> Result<Self, ServiceError> {
        let header_end = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| {
                ServiceError::InvalidRequest("missing header terminator".to_string())
            })?;

        let head = std::str::from_utf8(&raw[..header_end]).map_err(|_| {
            ServiceError::InvalidRequest("header block is not valid utf-8".to_string())
        })?;

        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_ascii_whitespace();
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) => (m, p, v),
            _ => {
                return Err(ServiceError::InvalidRequest(format!(
                    "malformed request line: {:?}",
                    request_line
                )))
            }
        };
        if !version.starts_with("HTTP/") {
            return Err(ServiceError::InvalidRequest(format!(
                "unsupported protocol version: {:?}",
                version
            )));
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.to_string(), value.trim_start().to_string()));
            }
            // Lines without a colon are ignored rather than fatal; the
            // request was already framed successfully.
        }

        let keep_alive = headers
            .iter()
            .any(|(name, value)| name == "Connection" && value == "keep-alive");

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            body: raw[header_end + 4..].to_vec(),
            keep_alive,
        })
    }

    /// Look up a header by exact-case name. First occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}
