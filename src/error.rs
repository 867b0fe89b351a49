use core::fmt;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

pub struct ProxyError(pub Box<dyn Error>);

impl Debug for ProxyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\r\x1b[K{}", self)
    }
}

impl Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for ProxyError {}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for ProxyError {
    fn from(e: std::net::AddrParseError) -> Self {
        ProxyError(Box::new(e))
    }
}

impl From<wire::WireError> for ProxyError {
    fn from(e: wire::WireError) -> Self {
        ProxyError(Box::new(e))
    }
}

#[derive(Debug)]
struct Message(String);

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for Message {}

impl From<String> for ProxyError {
    fn from(s: String) -> Self {
        ProxyError(Box::new(Message(s)))
    }
}

impl From<&str> for ProxyError {
    fn from(s: &str) -> Self {
        ProxyError(Box::new(Message(s.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
