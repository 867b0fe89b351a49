pub mod html;
pub mod http;

pub use http::*;

/// New line sign in the HTTP protocol.
pub const CRLF: &str = "\r\n";
pub const CRLF_BIN: &[u8] = b"\r\n";
/// HTTP signature accepted on both request and status lines.
pub const HTTP_SIGNATURE: &str = "HTTP/1.1";
/// Max header line length.
pub const MAX_HEADER_LENGTH: usize = 4096;
/// Max number of headers per message.
pub const MAX_NUMBER_OF_HEADERS: usize = 100;
