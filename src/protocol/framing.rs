use crate::error::ServiceError;

/// Maximum size of the header block, request line included.
/// A buffer that grows past this without a `\r\n\r\n` terminator is not a
/// request we are willing to serve; the connection is closed.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Maximum declared body size: 10MB.
/// This prevents memory exhaustion from malicious or malformed clients.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// One complete request framed out of a connection's read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedRequest {
    /// Raw request bytes: header block, blank line, and body.
    pub data: Vec<u8>,
    /// True iff `Connection: keep-alive` appeared in the header block.
    pub keep_alive: bool,
}

/// Try to frame one complete request out of `buf`.
///
/// Framing rules:
/// - Headers end at the first `\r\n\r\n`.
/// - If a `Content-Length: N` header is present (matched case-sensitively),
///   the request is complete once `header_end + 4 + N` bytes are buffered.
///   Without one the body is empty.
/// - Bytes beyond the framed request stay in `buf` so pipelined requests can
///   be framed on the next call.
///
/// Returns `Ok(None)` while the request is still incomplete. Errors mean the
/// stream is unrecoverable (oversized or malformed framing) and the caller
/// closes the connection.
pub fn next_request(buf: &mut Vec<u8>) -> Result<Option<FramedRequest>, ServiceError> {
    let header_end = match find(buf, b"\r\n\r\n") {
        Some(pos) => pos,
        None => {
            if buf.len() > MAX_HEADER_BYTES {
                return Err(ServiceError::InvalidRequest(format!(
                    "header block exceeds {} bytes without terminator",
                    MAX_HEADER_BYTES
                )));
            }
            return Ok(None);
        }
    };

    let head = &buf[..header_end];
    let content_length = parse_content_length(head)?;

    let total = header_end + 4 + content_length;
    if buf.len() < total {
        // Complete headers, incomplete body. Keep accumulating.
        return Ok(None);
    }

    let keep_alive = find(head, b"Connection: keep-alive").is_some();

    let data = buf[..total].to_vec();
    buf.drain(..total);

    Ok(Some(FramedRequest { data, keep_alive }))
}

/// Parse the `Content-Length` value out of a header block.
///
/// The header name is matched case-sensitively. Absent header means zero.
/// A header with no digits after optional spaces is malformed.
fn parse_content_length(head: &[u8]) -> Result<usize, ServiceError> {
    const NAME: &[u8] = b"Content-Length:";

    let pos = match find(head, NAME) {
        Some(pos) => pos,
        None => return Ok(0),
    };

    let mut i = pos + NAME.len();
    while i < head.len() && head[i] == b' ' {
        i += 1;
    }

    let start = i;
    while i < head.len() && head[i].is_ascii_digit() {
        i += 1;
    }
    if start == i {
        return Err(ServiceError::InvalidRequest(
            "malformed Content-Length header".to_string(),
        ));
    }

    let digits = std::str::from_utf8(&head[start..i])
        .expect("ascii digits are valid utf-8");
    let length: usize = digits.parse().map_err(|_| {
        ServiceError::InvalidRequest("Content-Length out of range".to_string())
    })?;

    if length > MAX_BODY_BYTES {
        return Err(ServiceError::BodyTooLarge(length, MAX_BODY_BYTES));
    }

    Ok(length)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    #[test]
    fn test_frames_request_without_body() {
        let mut b = buf(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let framed = next_request(&mut b).unwrap().unwrap();
        assert!(framed.data.ends_with(b"\r\n\r\n"));
        assert!(!framed.keep_alive);
        assert!(b.is_empty());
    }

    #[test]
    fn test_incomplete_headers_return_none() {
        let mut b = buf(b"POST /metrics HTTP/1.1\r\nContent-Length: 5\r\n");
        assert!(next_request(&mut b).unwrap().is_none());
        // Buffer untouched while incomplete.
        assert!(!b.is_empty());
    }

    #[test]
    fn test_incomplete_body_returns_none() {
        let mut b = buf(b"POST /metrics HTTP/1.1\r\nContent-Length: 10\r\n\r\n12345");
        assert!(next_request(&mut b).unwrap().is_none());

        b.extend_from_slice(b"67890");
        let framed = next_request(&mut b).unwrap().unwrap();
        assert!(framed.data.ends_with(b"1234567890"));
        assert!(b.is_empty());
    }

    #[test]
    fn test_keep_alive_detection_is_exact() {
        let mut b = buf(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        assert!(next_request(&mut b).unwrap().unwrap().keep_alive);

        // Case differences do not match; this mirrors the framing contract.
        let mut b = buf(b"GET / HTTP/1.1\r\nconnection: Keep-Alive\r\n\r\n");
        assert!(!next_request(&mut b).unwrap().unwrap().keep_alive);
    }

    #[test]
    fn test_pipelined_requests_frame_one_at_a_time() {
        let first = b"POST /metrics HTTP/1.1\r\nContent-Length: 2\r\n\r\nab";
        let second = b"GET /health HTTP/1.1\r\n\r\n";
        let mut b = Vec::new();
        b.extend_from_slice(first);
        b.extend_from_slice(second);

        let framed = next_request(&mut b).unwrap().unwrap();
        assert_eq!(framed.data, first.to_vec());

        let framed = next_request(&mut b).unwrap().unwrap();
        assert_eq!(framed.data, second.to_vec());
        assert!(b.is_empty());
        assert!(next_request(&mut b).unwrap().is_none());
    }

    #[test]
    fn test_content_length_allows_leading_spaces() {
        let mut b = buf(b"POST / HTTP/1.1\r\nContent-Length:   3\r\n\r\nxyz");
        let framed = next_request(&mut b).unwrap().unwrap();
        assert!(framed.data.ends_with(b"xyz"));
    }

    #[test]
    fn test_malformed_content_length_is_an_error() {
        let mut b = buf(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n");
        assert!(next_request(&mut b).is_err());
    }

    #[test]
    fn test_oversized_body_is_rejected() {
        let header = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        let mut b = buf(header.as_bytes());
        match next_request(&mut b) {
            Err(ServiceError::BodyTooLarge(len, max)) => {
                assert_eq!(len, MAX_BODY_BYTES + 1);
                assert_eq!(max, MAX_BODY_BYTES);
            }
            other => panic!("expected BodyTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unterminated_oversized_headers_are_rejected() {
        let mut b = vec![b'x'; MAX_HEADER_BYTES + 1];
        assert!(next_request(&mut b).is_err());
    }
}
