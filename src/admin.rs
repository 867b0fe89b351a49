use std::fs::File;

use mio::event::Source;

use crate::manage;
use crate::prelude::*;
use crate::reactor::Step;

enum AdminState {
    Request,
    Headers,
    Content,
    ResponseStatus,
    ResponseHeader,
    ResponseContent,
    Closing,
}

/// Management-port connection: parses one request, then either renders the
/// management page (with optional cache invalidation) or streams a file from
/// the configured base directory.
pub struct AdminFront {
    stream: TcpStream,
    received: Vec<u8>,
    to_send: SendBuf,
    state: AdminState,
    request: RequestContext,
    file_name: PathBuf,
    file: Option<File>,
    manage_body: Option<Vec<u8>>,
    remaining: usize,
    ctx: AppCtx,
}

impl AdminFront {
    pub fn new(stream: TcpStream, ctx: AppCtx) -> Self {
        Self {
            stream,
            received: Vec::new(),
            to_send: SendBuf::new(),
            state: AdminState::Request,
            request: RequestContext::new(),
            file_name: PathBuf::new(),
            file: None,
            manage_body: None,
            remaining: 0,
            ctx,
        }
    }

    fn fd(&self) -> i32 {
        self.stream.as_raw_fd()
    }

    fn fail(&mut self, code: u16, message: &str) {
        self.to_send.set(wire::return_status(code, message, ""));
        self.to_send.set_closing();
        self.state = AdminState::Closing;
    }

    fn fill_received(&mut self) -> Result<bool> {
        match recv_block(&mut self.stream)? {
            Recv::Data(bytes) => {
                self.received.extend_from_slice(&bytes);
                Ok(false)
            }
            Recv::Blocked => Ok(false),
            Recv::Eof => {
                self.to_send.set_closing();
                self.state = AdminState::Closing;
                Ok(true)
            }
        }
    }

    fn check_if_maxsize(&mut self) -> Step {
        if self.received.len() > MAX_REQ_SIZE {
            error!("management {}: received buffer reached max size", self.fd());
            self.fail(500, "Internal Error");
        }
        Step::Yield
    }

    fn request_state(&mut self) -> Result<Step> {
        if self.fill_received()? {
            return Ok(Step::Yield);
        }
        let Some(line) = wire::read_line(&mut self.received) else {
            return Ok(self.check_if_maxsize());
        };
        let (method, uri) = match wire::check_request(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("management {}: {}, closing socket", self.fd(), e);
                self.fail(500, "Unsupported http request");
                return Ok(Step::Yield);
            }
        };
        self.request.method = method;
        self.request.uri = uri;

        let (path, query) = wire::split_uri_query(&self.request.uri);
        let params = wire::parse_query(query);
        self.file_name = self.ctx.base.join(normalize_path(path));

        if path == "/manage" {
            if let Some(url) = params.get("url") {
                let mut cache = self.ctx.cache.borrow_mut();
                if url == "all" {
                    cache.delete_all();
                } else if let Err(e) = cache.delete(url) {
                    error!("management {}: deleting {}: {}", self.fd(), url, e);
                }
            }
            self.manage_body = Some(manage::render(&self.ctx));
        } else if path != "/style.css" {
            info!(
                "management {}: {} request, {}",
                self.fd(),
                method,
                self.request.uri
            );
        }
        self.state = AdminState::Headers;
        Ok(Step::Next)
    }

    fn headers_state(&mut self) -> Result<Step> {
        if !contains_crlf(&self.received) && self.fill_received()? {
            return Ok(Step::Yield);
        }
        loop {
            match wire::read_line(&mut self.received) {
                None => return Ok(self.check_if_maxsize()),
                Some(line) if line.is_empty() => {
                    self.remaining = self.request.content_length();
                    self.state = AdminState::Content;
                    return Ok(Step::Next);
                }
                Some(line) => {
                    if let Err(e) = wire::update_headers(&line, &mut self.request.headers) {
                        error!("management {}: {}", self.fd(), e);
                        self.fail(500, "Internal Error");
                        return Ok(Step::Yield);
                    }
                }
            }
        }
    }

    /// Request bodies on the management port are read and discarded.
    fn content_state(&mut self) -> Result<Step> {
        if self.remaining > 0 && !self.received.is_empty() {
            let take = self.received.len().min(self.remaining);
            self.received.drain(..take);
            self.remaining -= take;
        }
        if self.remaining == 0 {
            self.state = AdminState::ResponseStatus;
            return Ok(Step::Next);
        }
        match recv_block(&mut self.stream)? {
            Recv::Eof => {
                self.to_send.set_closing();
                self.state = AdminState::Closing;
                Ok(Step::Next)
            }
            Recv::Blocked => Ok(Step::Yield),
            Recv::Data(bytes) => {
                let take = bytes.len().min(self.remaining);
                self.remaining -= take;
                if self.remaining == 0 {
                    self.state = AdminState::ResponseStatus;
                    Ok(Step::Next)
                } else {
                    Ok(Step::Yield)
                }
            }
        }
    }

    fn response_status_state(&mut self) -> Step {
        self.to_send
            .push(format!("{} 200 OK\r\n", HTTP_SIGNATURE).as_bytes());
        self.state = AdminState::ResponseHeader;
        Step::Next
    }

    fn response_header_state(&mut self) -> Step {
        if let Some(body) = &self.manage_body {
            self.to_send.push(
                format!(
                    "Content-Length: {}\r\nContent-Type: text/html\r\n\r\n",
                    body.len()
                )
                .as_bytes(),
            );
            self.state = AdminState::ResponseContent;
            return Step::Next;
        }
        match File::open(&self.file_name) {
            Ok(file) => {
                let length = file.metadata().map(|m| m.len()).unwrap_or(0);
                let extension = self.file_name.extension().and_then(|e| e.to_str());
                self.to_send.push(
                    format!(
                        "Content-Length: {}\r\nContent-Type: {}\r\n\r\n",
                        length,
                        wire::mime_type(extension)
                    )
                    .as_bytes(),
                );
                self.file = Some(file);
                self.state = AdminState::ResponseContent;
                Step::Next
            }
            Err(e) => {
                error!(
                    "management {}: opening {}: {}",
                    self.fd(),
                    self.file_name.display(),
                    e
                );
                let response = if e.kind() == ErrorKind::NotFound {
                    wire::return_status(404, "File Not Found", &e.to_string())
                } else {
                    wire::return_status(500, "Internal Error", &e.to_string())
                };
                self.to_send.set(response);
                self.to_send.set_closing();
                self.state = AdminState::Closing;
                Step::Next
            }
        }
    }

    fn response_content_state(&mut self) -> Step {
        if let Some(body) = self.manage_body.take() {
            self.to_send.push(&body);
            self.to_send.set_closing();
            self.state = AdminState::Closing;
            return Step::Next;
        }
        let Some(file) = self.file.as_mut() else {
            self.to_send.set_closing();
            self.state = AdminState::Closing;
            return Step::Next;
        };
        while self.to_send.len() < TO_SEND_MAXSIZE {
            let mut chunk = [0u8; BLOCK_SIZE];
            match file.read(&mut chunk) {
                Ok(0) => {
                    self.file = None;
                    self.to_send.set_closing();
                    self.state = AdminState::Closing;
                    return Step::Next;
                }
                Ok(n) => self.to_send.push(&chunk[..n]),
                Err(e) => {
                    error!("management {}: reading file: {}", self.fd(), e);
                    self.to_send
                        .set(wire::return_status(500, "Internal Error", &e.to_string()));
                    self.to_send.set_closing();
                    self.state = AdminState::Closing;
                    return Step::Next;
                }
            }
        }
        Step::Yield
    }
}

impl Pollable for AdminFront {
    fn interest(&self) -> Option<Interest> {
        match self.state {
            AdminState::Request | AdminState::Headers | AdminState::Content => {
                Some(Interest::READABLE)
            }
            AdminState::ResponseStatus
            | AdminState::ResponseHeader
            | AdminState::ResponseContent
            | AdminState::Closing => Some(Interest::WRITABLE),
        }
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        Some(&mut self.stream)
    }

    fn on_read(&mut self, _reg: &mut Registrar) -> Result<Control> {
        loop {
            let step = match self.state {
                AdminState::Request => self.request_state()?,
                AdminState::Headers => self.headers_state()?,
                AdminState::Content => self.content_state()?,
                _ => Step::Yield,
            };
            match step {
                Step::Next => continue,
                Step::Yield => return Ok(Control::Keep),
                Step::Remove => return Ok(Control::Remove),
            }
        }
    }

    fn on_write(&mut self, _reg: &mut Registrar) -> Result<Control> {
        loop {
            let step = match self.state {
                AdminState::ResponseStatus => self.response_status_state(),
                AdminState::ResponseHeader => self.response_header_state(),
                AdminState::ResponseContent => self.response_content_state(),
                _ => Step::Yield,
            };
            match step {
                Step::Next => continue,
                _ => break,
            }
        }
        send_all(&mut self.stream, &mut self.to_send, None)?;
        if self.to_send.is_empty() && matches!(self.state, AdminState::Closing) {
            debug!("management socket {} is closing", self.fd());
            return Ok(Control::Remove);
        }
        Ok(Control::Keep)
    }

    fn on_error(&mut self, _reg: &mut Registrar) -> Result<Control> {
        Ok(Control::Remove)
    }

    fn on_hup(&mut self, _reg: &mut Registrar) -> Result<Control> {
        Ok(Control::Remove)
    }

    fn close(&mut self) {
        debug!("management socket {} closed", self.fd());
    }
}

fn contains_crlf(buf: &[u8]) -> bool {
    buf.windows(CRLF_BIN.len()).any(|w| w == CRLF_BIN)
}

/// Lexically resolves a request path: collapses `.`/empty segments and keeps
/// `..` from climbing above the base directory.
fn normalize_path(path: &str) -> PathBuf {
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            comp => parts.push(comp),
        }
    }
    PathBuf::from(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_paths_under_base() {
        assert_eq!(normalize_path("/index.html"), PathBuf::from("index.html"));
        assert_eq!(normalize_path("/a/./b//c"), PathBuf::from("a/b/c"));
        assert_eq!(normalize_path("/../../etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(normalize_path("/a/../b"), PathBuf::from("b"));
        assert_eq!(normalize_path("/"), PathBuf::from(""));
    }
}
