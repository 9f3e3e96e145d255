/// An HTTP response carrying a JSON body.
///
/// Responses are built on worker threads and encoded into the byte vector
/// that gets handed back to the event loop; workers never write to sockets.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub keep_alive: bool,
}

impl HttpResponse {
    /// A JSON response. The `Connection` header defaults to `close`; call
    /// `keep_alive` to match the request's connection mode.
    pub fn json(status: u16, body: String) -> Self {
        Self {
            status,
            body,
            keep_alive: false,
        }
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Encode the response, with `Content-Type`, `Content-Length`, and a
    /// `Connection` header reflecting whether the connection stays open.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n{}",
            self.status,
            status_text(self.status),
            self.body.len(),
            if self.keep_alive { "keep-alive" } else { "close" },
            self.body
        )
        .into_bytes()
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
