use crate::cache::Cache;
use crate::prelude::*;

/// Application-wide collaborators, threaded through every endpoint
/// constructor. The reactor is single-threaded, so shared mutation goes
/// through `RefCell` rather than locks.
#[derive(Clone)]
pub struct AppCtx {
    pub cache: Rc<RefCell<Cache>>,
    pub stats: Rc<RefCell<Stats>>,
    /// Root directory for files served on the management port.
    pub base: PathBuf,
}

/// Per client-facing connection request state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: String,
    pub headers: HashMap<String, String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        // Content-Length is seeded so the body state can read the default
        // without a presence check.
        let headers = HashMap::from([("Content-Length".to_string(), "0".to_string())]);
        Self {
            method: Method::Get,
            uri: String::new(),
            headers,
        }
    }

    /// Declared request body length; absent or malformed reads as zero.
    pub fn content_length(&self) -> usize {
        self.headers
            .get("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_defaults_to_zero() {
        let mut request = RequestContext::new();
        assert_eq!(request.content_length(), 0);
        request
            .headers
            .insert("Content-Length".to_string(), "42".to_string());
        assert_eq!(request.content_length(), 42);
        request
            .headers
            .insert("Content-Length".to_string(), "nope".to_string());
        assert_eq!(request.content_length(), 0);
    }
}
