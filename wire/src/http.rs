use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::{CRLF_BIN, HTTP_SIGNATURE, MAX_NUMBER_OF_HEADERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Connect,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Connect => "CONNECT",
        }
    }
}

impl FromStr for Method {
    type Err = WireError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "CONNECT" => Ok(Method::Connect),
            other => Err(WireError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    NotHttp,
    Incomplete,
    UnsupportedMethod(String),
    InvalidUri,
    InvalidHeader,
    TooManyHeaders,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::NotHttp => write!(f, "Not HTTP protocol"),
            WireError::Incomplete => write!(f, "Incomplete HTTP protocol"),
            WireError::UnsupportedMethod(m) => {
                write!(f, "HTTP unsupported method '{}'", m)
            }
            WireError::InvalidUri => write!(f, "Invalid URI"),
            WireError::InvalidHeader => write!(f, "Invalid header received"),
            WireError::TooManyHeaders => write!(f, "Too many headers"),
        }
    }
}

impl std::error::Error for WireError {}

/// Extracts the first CRLF-terminated line from `buf`, draining it together
/// with its terminator. Returns `None` while no full line has arrived.
pub fn read_line(buf: &mut Vec<u8>) -> Option<String> {
    let n = buf.windows(CRLF_BIN.len()).position(|w| w == CRLF_BIN)?;
    let line = String::from_utf8_lossy(&buf[..n]).into_owned();
    buf.drain(..n + CRLF_BIN.len());
    Some(line)
}

/// Validates a request line `METHOD URI HTTP/1.1`.
pub fn check_request(line: &str) -> Result<(Method, String), WireError> {
    let mut comps = line.splitn(3, ' ');
    let method = comps.next().ok_or(WireError::Incomplete)?;
    let uri = comps.next().ok_or(WireError::Incomplete)?;
    let signature = comps.next().ok_or(WireError::Incomplete)?;
    if signature != HTTP_SIGNATURE {
        return Err(WireError::NotHttp);
    }
    let method = method.parse::<Method>()?;
    if uri.is_empty() {
        return Err(WireError::InvalidUri);
    }
    Ok((method, uri.to_string()))
}

/// Validates a status line `HTTP/1.1 <code> <reason>` and returns
/// (code, reason).
pub fn check_response(line: &str) -> Result<(String, String), WireError> {
    let mut comps = line.splitn(3, ' ');
    let signature = comps.next().ok_or(WireError::Incomplete)?;
    if signature != HTTP_SIGNATURE {
        return Err(WireError::NotHttp);
    }
    let code = comps.next().ok_or(WireError::Incomplete)?;
    let reason = comps.next().ok_or(WireError::Incomplete)?;
    Ok((code.to_string(), reason.to_string()))
}

/// Splits a header line at the first ':' into (name, value).
pub fn parse_header(line: &str) -> Result<(String, String), WireError> {
    let n = line.find(':').ok_or(WireError::InvalidHeader)?;
    let name = line[..n].trim_end().to_string();
    let value = line[n + 1..].trim_start().to_string();
    Ok((name, value))
}

/// Parses a header line into `headers`, enforcing the header-count cap.
pub fn update_headers(
    line: &str,
    headers: &mut HashMap<String, String>,
) -> Result<(), WireError> {
    if headers.len() >= MAX_NUMBER_OF_HEADERS {
        return Err(WireError::TooManyHeaders);
    }
    let (name, value) = parse_header(line)?;
    headers.insert(name, value);
    Ok(())
}

/// Serializes headers as `Name: value\r\n` lines, without the terminating
/// empty line. Emission order is unspecified.
pub fn serialize_headers(headers: &HashMap<String, String>) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in headers {
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    out
}

/// Builds a full error response: status line, `Content-Type: text/plain`,
/// and an `Error <code> <message>` body.
pub fn return_status(code: u16, message: &str, extra: &str) -> Vec<u8> {
    format!(
        "{} {} {}\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         Error {} {}\r\n\
         {}",
        HTTP_SIGNATURE, code, message, code, message, extra,
    )
    .into_bytes()
}

/// Splits an absolute-form URI (`http://host[:port]/path`) into
/// (host, port, origin-form path). The path keeps its leading slash; a URI
/// with no path after the authority maps to `/`. Returns `None` when the URI
/// carries no `//`.
pub fn split_absolute_uri(uri: &str) -> Option<(String, u16, String)> {
    let n = uri.find("//")?;
    let rest = &uri[n + 2..];
    let (authority, path) = match rest.find('/') {
        Some(k) => (&rest[..k], &rest[k..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()?),
        None => (authority, 80),
    };
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port, path.to_string()))
}

/// Parses a CONNECT target of the form `host:port`.
pub fn parse_connect_target(uri: &str) -> Option<(String, u16)> {
    let (host, port) = uri.split_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse::<u16>().ok()?))
}

/// Splits a request URI into (path, query); the query is empty when no '?'
/// is present.
pub fn split_uri_query(uri: &str) -> (&str, &str) {
    match uri.split_once('?') {
        Some((path, query)) => (path, query),
        None => (uri, ""),
    }
}

/// Decodes an `application/x-www-form-urlencoded` query string. On repeated
/// keys the first value wins.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        out.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    out
}

/// MIME type from a file extension.
pub fn mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") => "text/html",
        Some("png") => "image/png",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_line_extracts_and_drains() {
        let mut buf = b"GET / HTTP/1.1\r\nHost: a\r\n".to_vec();
        assert_eq!(read_line(&mut buf).unwrap(), "GET / HTTP/1.1");
        assert_eq!(buf, b"Host: a\r\n");
    }

    #[test]
    fn read_line_waits_for_terminator() {
        let mut buf = b"GET / HTT".to_vec();
        assert!(read_line(&mut buf).is_none());
        assert_eq!(buf, b"GET / HTT");
    }

    #[test]
    fn check_request_accepts_get_and_connect() {
        let (method, uri) = check_request("GET http://x.com/ HTTP/1.1").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(uri, "http://x.com/");

        let (method, uri) = check_request("CONNECT x.com:443 HTTP/1.1").unwrap();
        assert_eq!(method, Method::Connect);
        assert_eq!(uri, "x.com:443");
    }

    #[test]
    fn check_request_rejects_other_methods() {
        assert!(matches!(
            check_request("POST /x HTTP/1.1"),
            Err(WireError::UnsupportedMethod(_))
        ));
        assert_eq!(check_request("GET /x HTTP/1.0"), Err(WireError::NotHttp));
        assert_eq!(check_request("GET /x"), Err(WireError::Incomplete));
    }

    #[test]
    fn check_response_splits_status() {
        let (code, reason) = check_response("HTTP/1.1 200 OK").unwrap();
        assert_eq!(code, "200");
        assert_eq!(reason, "OK");
        assert_eq!(check_response("ICY 200 OK"), Err(WireError::NotHttp));
    }

    #[test]
    fn headers_round_trip() {
        let mut headers = HashMap::new();
        update_headers("Host: example.com", &mut headers).unwrap();
        update_headers("Content-Length:  12", &mut headers).unwrap();
        let bytes = serialize_headers(&headers);

        let mut reparsed = HashMap::new();
        let mut buf = bytes.clone();
        while let Some(line) = read_line(&mut buf) {
            update_headers(&line, &mut reparsed).unwrap();
        }
        assert_eq!(headers, reparsed);
        assert_eq!(reparsed.get("Content-Length").unwrap(), "12");
    }

    #[test]
    fn header_count_is_capped() {
        let mut headers = HashMap::new();
        for i in 0..MAX_NUMBER_OF_HEADERS {
            update_headers(&format!("X-{}: v", i), &mut headers).unwrap();
        }
        assert_eq!(
            update_headers("X-Over: v", &mut headers),
            Err(WireError::TooManyHeaders)
        );
    }

    #[test]
    fn split_absolute_uri_defaults_port() {
        let (host, port, path) = split_absolute_uri("http://x.com/a/b").unwrap();
        assert_eq!((host.as_str(), port, path.as_str()), ("x.com", 80, "/a/b"));

        let (host, port, path) = split_absolute_uri("http://x.com:8000").unwrap();
        assert_eq!((host.as_str(), port, path.as_str()), ("x.com", 8000, "/"));

        assert!(split_absolute_uri("x.com/a").is_none());
    }

    #[test]
    fn connect_target_requires_port() {
        assert_eq!(
            parse_connect_target("x.com:443"),
            Some(("x.com".to_string(), 443))
        );
        assert!(parse_connect_target("x.com").is_none());
        assert!(parse_connect_target("x.com:https").is_none());
    }

    #[test]
    fn query_parsing_decodes() {
        let (path, query) = split_uri_query("/manage?url=http%3A%2F%2Fa%2Fb");
        assert_eq!(path, "/manage");
        let params = parse_query(query);
        assert_eq!(params.get("url").unwrap(), "http://a/b");
    }

    #[test]
    fn error_response_shape() {
        let bytes = return_status(500, "Internal Error", "");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 500 Internal Error\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n\r\n"));
        assert!(text.contains("Error 500 Internal Error"));
    }

    #[test]
    fn mime_table() {
        assert_eq!(mime_type(Some("html")), "text/html");
        assert_eq!(mime_type(Some("png")), "image/png");
        assert_eq!(mime_type(Some("txt")), "text/plain");
        assert_eq!(mime_type(Some("css")), "application/octet-stream");
        assert_eq!(mime_type(None), "application/octet-stream");
    }
}
