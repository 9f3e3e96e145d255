/// Wire protocol for the HTTP front end.
///
/// Current scope:
/// - framing: split complete HTTP/1.1 requests out of a connection buffer
/// - request: decode a framed request into method/path/headers/body
/// - response: encode a typed response back into bytes
///
/// The framing layer is what the event loop depends on; request decoding and
/// response encoding run on worker threads.
pub mod framing;
pub mod request;
pub mod response;
