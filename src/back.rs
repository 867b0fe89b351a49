use std::net::ToSocketAddrs;

use mio::event::Source;

use crate::cache::Cache;
use crate::prelude::*;
use crate::reactor::Step;

enum BackState {
    Status,
    Headers,
    Content,
    Closing,
}

/// Origin-facing half of a proxied request. Created by a ProxyFront on a
/// cache miss: connects, forwards the rewritten request, parses the response
/// and tees it into the front's send buffer and (when cacheable) the cache
/// writer.
pub struct ProxyBack {
    stream: TcpStream,
    received: Vec<u8>,
    /// Request bytes bound for the origin; the front appends here.
    to_send: SharedBuf,
    /// The front's send buffer, where response bytes go.
    front: SharedBuf,
    state: BackState,
    headers: HashMap<String, String>,
    status_line: Vec<u8>,
    request: RequestContext,
    ctx: AppCtx,
    /// Response body bytes still expected under Content-Length.
    remaining: usize,
    /// No usable Content-Length: the body ends when the origin closes.
    eof_terminated: bool,
    /// This connection holds the cache writer for `request.uri`.
    wrote_cache: bool,
}

impl ProxyBack {
    /// Resolves the origin and issues a non-blocking connect. Connection
    /// progress and failures surface as later readiness events.
    pub fn connect(
        host: &str,
        port: u16,
        front: SharedBuf,
        request: RequestContext,
        ctx: AppCtx,
    ) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| format!("no address found for {}:{}", host, port))?;
        let stream = TcpStream::connect(addr)?;
        debug!(
            "proxy back {} connecting to {}:{}",
            stream.as_raw_fd(),
            host,
            port
        );
        Ok(Self {
            stream,
            received: Vec::new(),
            to_send: SendBuf::shared(),
            front,
            state: BackState::Status,
            headers: HashMap::new(),
            status_line: Vec::new(),
            request,
            ctx,
            remaining: 0,
            eof_terminated: false,
            wrote_cache: false,
        })
    }

    /// Handle for the front to queue request bytes on.
    pub fn tx(&self) -> SharedBuf {
        self.to_send.clone()
    }

    fn fd(&self) -> i32 {
        self.stream.as_raw_fd()
    }

    /// One socket read. Returns true when the origin is gone (EOF or a fatal
    /// socket error, both of which end the response).
    fn fill_received(&mut self) -> bool {
        match recv_block(&mut self.stream) {
            Ok(Recv::Data(bytes)) => {
                self.received.extend_from_slice(&bytes);
                false
            }
            Ok(Recv::Blocked) => false,
            Ok(Recv::Eof) => true,
            Err(e) => {
                error!("proxy back {} socket error: {}", self.fd(), e);
                true
            }
        }
    }

    fn check_if_maxsize(&mut self) -> Step {
        if self.received.len() > MAX_REQ_SIZE {
            error!("proxy back {}: received buffer reached max size", self.fd());
            self.front
                .borrow_mut()
                .set(wire::return_status(500, "Internal Error", ""));
            self.state = BackState::Closing;
            return Step::Next;
        }
        Step::Yield
    }

    fn status_state(&mut self) -> Result<Step> {
        if self.fill_received() {
            self.state = BackState::Closing;
            return Ok(Step::Next);
        }
        let Some(line) = wire::read_line(&mut self.received) else {
            return Ok(self.check_if_maxsize());
        };
        match wire::check_response(&line) {
            Ok((code, reason)) => {
                let status = format!("{} {} {}\r\n", HTTP_SIGNATURE, code, reason).into_bytes();
                self.front.borrow_mut().push(&status);
                self.status_line = status;
                self.state = BackState::Headers;
                Ok(Step::Next)
            }
            Err(e) => {
                error!("proxy back {}: {}", self.fd(), e);
                self.front
                    .borrow_mut()
                    .set(wire::return_status(500, "Unsupported http request", ""));
                self.state = BackState::Closing;
                Ok(Step::Next)
            }
        }
    }

    fn headers_state(&mut self) -> Result<Step> {
        if !contains_crlf(&self.received) && self.fill_received() {
            self.state = BackState::Closing;
            return Ok(Step::Next);
        }
        loop {
            match wire::read_line(&mut self.received) {
                None => return Ok(self.check_if_maxsize()),
                Some(line) if line.is_empty() => {
                    if let Some(ttl) = Cache::is_cacheable_response(&self.headers) {
                        let mut cache = self.ctx.cache.borrow_mut();
                        if cache.open_writer(&self.request, ttl) {
                            self.wrote_cache = true;
                            cache.append(&self.request, &self.status_line);
                        }
                    }
                    let header_bytes = wire::serialize_headers(&self.headers);
                    {
                        let mut front = self.front.borrow_mut();
                        front.push(&header_bytes);
                        front.push(CRLF_BIN);
                    }
                    if self.wrote_cache {
                        let mut cache = self.ctx.cache.borrow_mut();
                        cache.append(&self.request, &header_bytes);
                        cache.append(&self.request, CRLF_BIN);
                    }
                    let length = self
                        .headers
                        .get("Content-Length")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    self.eof_terminated = length == 0;
                    self.remaining = length;
                    self.state = BackState::Content;
                    // body bytes may already sit behind the header block
                    if !self.received.is_empty() {
                        let bytes = std::mem::take(&mut self.received);
                        if self.body_chunk(&bytes) {
                            return Ok(self.finish_content());
                        }
                    }
                    return Ok(Step::Next);
                }
                Some(line) => {
                    if let Err(e) = wire::update_headers(&line, &mut self.headers) {
                        error!("proxy back {}: {}", self.fd(), e);
                        self.front
                            .borrow_mut()
                            .set(wire::return_status(500, "Internal Error", ""));
                        self.state = BackState::Closing;
                        return Ok(Step::Next);
                    }
                }
            }
        }
    }

    fn content_state(&mut self) -> Result<Step> {
        match recv_block(&mut self.stream) {
            Err(e) => {
                error!("proxy back {} socket error: {}", self.fd(), e);
                Ok(self.finish_content())
            }
            Ok(Recv::Eof) => Ok(self.finish_content()),
            Ok(Recv::Blocked) => Ok(Step::Yield),
            Ok(Recv::Data(bytes)) => {
                if self.body_chunk(&bytes) {
                    return Ok(self.finish_content());
                }
                Ok(Step::Yield)
            }
        }
    }

    /// Tees one body chunk to the client buffer and the cache writer.
    /// Returns true when the declared length has been reached.
    fn body_chunk(&mut self, bytes: &[u8]) -> bool {
        self.front.borrow_mut().push(bytes);
        if self.wrote_cache {
            self.ctx.cache.borrow_mut().append(&self.request, bytes);
        }
        if !self.eof_terminated {
            self.remaining = self.remaining.saturating_sub(bytes.len());
            if self.remaining == 0 {
                return true;
            }
        }
        false
    }

    /// The response is over (length reached, origin closed, or a fatal
    /// error): release the cache writer and wind down.
    fn finish_content(&mut self) -> Step {
        self.release_writer();
        self.state = BackState::Closing;
        Step::Next
    }

    fn release_writer(&mut self) {
        if self.wrote_cache {
            self.ctx.cache.borrow_mut().finish_writer(&self.request);
            self.wrote_cache = false;
        }
    }

    fn enter_closing(&mut self) -> Control {
        self.release_writer();
        self.front.borrow_mut().set_closing();
        debug!("proxy back socket {} is closing", self.fd());
        Control::Remove
    }
}

impl Pollable for ProxyBack {
    fn interest(&self) -> Option<Interest> {
        let mut want: Option<Interest> = None;
        if matches!(
            self.state,
            BackState::Status | BackState::Headers | BackState::Content
        ) && self.front.borrow().len() <= TO_SEND_MAXSIZE
        {
            want = Some(Interest::READABLE);
        }
        let tx = self.to_send.borrow();
        if !tx.is_empty() || tx.is_closing() || matches!(self.state, BackState::Closing) {
            want = Some(match want {
                Some(interest) => interest | Interest::WRITABLE,
                None => Interest::WRITABLE,
            });
        }
        want
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        Some(&mut self.stream)
    }

    fn on_read(&mut self, _reg: &mut Registrar) -> Result<Control> {
        if self.to_send.borrow().is_closing() {
            self.state = BackState::Closing;
        }
        loop {
            let step = match self.state {
                BackState::Status => self.status_state()?,
                BackState::Headers => self.headers_state()?,
                BackState::Content => self.content_state()?,
                BackState::Closing => return Ok(self.enter_closing()),
            };
            match step {
                Step::Next => continue,
                Step::Yield => return Ok(Control::Keep),
                Step::Remove => return Ok(Control::Remove),
            }
        }
    }

    fn on_write(&mut self, _reg: &mut Registrar) -> Result<Control> {
        if self.to_send.borrow().is_closing() {
            self.state = BackState::Closing;
        }
        if matches!(self.state, BackState::Closing) {
            return Ok(self.enter_closing());
        }
        let mut tx = self.to_send.borrow_mut();
        send_all(&mut self.stream, &mut tx, None)?;
        Ok(Control::Keep)
    }

    fn on_error(&mut self, _reg: &mut Registrar) -> Result<Control> {
        Ok(self.enter_closing())
    }

    fn on_hup(&mut self, _reg: &mut Registrar) -> Result<Control> {
        // origin closed: whatever arrived stands; a truncated cacheable body
        // is kept (the next hit serves the truncated bytes)
        Ok(self.enter_closing())
    }

    fn close(&mut self) {
        self.release_writer();
        self.front.borrow_mut().set_closing();
    }
}

fn contains_crlf(buf: &[u8]) -> bool {
    buf.windows(CRLF_BIN.len()).any(|w| w == CRLF_BIN)
}
