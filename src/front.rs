use mio::event::Source;

use crate::back::ProxyBack;
use crate::prelude::*;
use crate::reactor::Step;
use crate::tunnel::TunnelUp;

enum FrontState {
    Request,
    Headers,
    Content,
    Closing,
}

/// Client-facing proxy connection. Parses the request, decides
/// cache-hit/miss/CONNECT, and pairs with a ProxyBack on a miss. On a hit it
/// streams the cached body itself; no origin connection is opened.
pub struct ProxyFront {
    /// Taken away when the socket is promoted into a CONNECT tunnel.
    stream: Option<TcpStream>,
    received: Vec<u8>,
    /// Bytes for the client; the paired ProxyBack appends response data here.
    to_send: SharedBuf,
    /// The ProxyBack's send buffer, where the rewritten request goes.
    peer: Option<SharedBuf>,
    state: FrontState,
    request: RequestContext,
    /// Serving this connection from the cache reader.
    caching: bool,
    /// Request body bytes still to forward upstream.
    remaining: usize,
    ctx: AppCtx,
}

impl ProxyFront {
    pub fn new(stream: TcpStream, ctx: AppCtx) -> Self {
        Self {
            stream: Some(stream),
            received: Vec::new(),
            to_send: SendBuf::shared(),
            peer: None,
            state: FrontState::Request,
            request: RequestContext::new(),
            caching: false,
            remaining: 0,
            ctx,
        }
    }

    fn fd(&self) -> i32 {
        self.stream.as_ref().map(|s| s.as_raw_fd()).unwrap_or(-1)
    }

    /// Queues a synthetic error response and moves to the final flush.
    fn fail(&mut self, code: u16, message: &str) {
        let mut tx = self.to_send.borrow_mut();
        tx.set(wire::return_status(code, message, ""));
        tx.set_closing();
        drop(tx);
        self.state = FrontState::Closing;
    }

    /// One socket read into the receive buffer. Returns true when the client
    /// has gone away and the connection is winding down.
    fn fill_received(&mut self) -> Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(true);
        };
        match recv_block(stream)? {
            Recv::Data(bytes) => {
                self.received.extend_from_slice(&bytes);
                Ok(false)
            }
            Recv::Blocked => Ok(false),
            Recv::Eof => {
                self.to_send.borrow_mut().set_closing();
                self.state = FrontState::Closing;
                Ok(true)
            }
        }
    }

    fn check_if_maxsize(&mut self) -> Step {
        if self.received.len() > MAX_REQ_SIZE {
            error!("proxy front {}: received buffer reached max size", self.fd());
            self.fail(500, "Internal Error");
        }
        Step::Yield
    }

    fn request_state(&mut self, reg: &mut Registrar) -> Result<Step> {
        if self.fill_received()? {
            return Ok(Step::Yield);
        }
        let Some(line) = wire::read_line(&mut self.received) else {
            return Ok(self.check_if_maxsize());
        };
        let (method, uri) = match wire::check_request(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("proxy front {}: {}, closing socket", self.fd(), e);
                self.fail(500, "Unsupported http request");
                return Ok(Step::Yield);
            }
        };
        info!("proxy front {}: {} request, {}", self.fd(), method, uri);

        if method == Method::Connect {
            return self.promote_tunnel(&uri, reg);
        }

        self.request.method = method;
        self.request.uri = uri;
        let Some((host, port, path)) = wire::split_absolute_uri(&self.request.uri) else {
            error!("proxy front {}: bad request {}", self.fd(), self.request.uri);
            self.fail(400, "Bad request");
            return Ok(Step::Yield);
        };

        let hit = {
            let mut cache = self.ctx.cache.borrow_mut();
            cache.lookup(&self.request) && cache.open_reader(&self.request)
        };
        if hit {
            info!("proxy front {}: found in cache {}", self.fd(), self.request.uri);
            self.caching = true;
            self.state = FrontState::Closing;
            self.refill_from_cache();
            return Ok(Step::Yield);
        }

        match ProxyBack::connect(
            &host,
            port,
            self.to_send.clone(),
            self.request.clone(),
            self.ctx.clone(),
        ) {
            Ok(back) => {
                let peer = back.tx();
                peer.borrow_mut().push(
                    format!("{} {} {}\r\n", self.request.method, path, HTTP_SIGNATURE).as_bytes(),
                );
                self.peer = Some(peer);
                reg.add(Box::new(back));
                self.state = FrontState::Headers;
                Ok(Step::Next)
            }
            Err(e) => {
                error!(
                    "proxy front {}: connect to {}:{} failed: {}",
                    self.fd(),
                    host,
                    port,
                    e
                );
                self.fail(500, "Internal Error");
                Ok(Step::Yield)
            }
        }
    }

    /// CONNECT: hand the accepted socket over to a tunnel pair and leave the
    /// poll set. The tunnel queues the 200/403 handshake itself.
    fn promote_tunnel(&mut self, uri: &str, reg: &mut Registrar) -> Result<Step> {
        let Some((host, port)) = wire::parse_connect_target(uri) else {
            error!("proxy front {}: bad request {}", self.fd(), uri);
            self.fail(400, "Bad request");
            return Ok(Step::Yield);
        };
        let Some(mut stream) = self.stream.take() else {
            return Ok(Step::Remove);
        };
        reg.deregister(&mut stream);
        let (up, down) = TunnelUp::promote(stream, &host, port, self.ctx.clone());
        reg.add(Box::new(up));
        if let Some(down) = down {
            reg.add(Box::new(down));
        }
        self.state = FrontState::Closing;
        Ok(Step::Remove)
    }

    fn headers_state(&mut self) -> Result<Step> {
        if !contains_crlf(&self.received) && self.fill_received()? {
            return Ok(Step::Yield);
        }
        loop {
            match wire::read_line(&mut self.received) {
                None => return Ok(self.check_if_maxsize()),
                Some(line) if line.is_empty() => {
                    if let Some(peer) = &self.peer {
                        let mut peer = peer.borrow_mut();
                        peer.push(&wire::serialize_headers(&self.request.headers));
                        peer.push(CRLF_BIN);
                    }
                    self.remaining = self.request.content_length();
                    // body bytes may already sit behind the header block
                    if self.remaining > 0 && !self.received.is_empty() {
                        let take = self.received.len().min(self.remaining);
                        if let Some(peer) = &self.peer {
                            peer.borrow_mut().push(&self.received[..take]);
                        }
                        self.received.drain(..take);
                        self.remaining -= take;
                    }
                    self.state = FrontState::Content;
                    return Ok(Step::Next);
                }
                Some(line) => {
                    if let Err(e) = wire::update_headers(&line, &mut self.request.headers) {
                        error!("proxy front {}: {}", self.fd(), e);
                        self.fail(500, "Internal Error");
                        return Ok(Step::Yield);
                    }
                }
            }
        }
    }

    fn content_state(&mut self) -> Result<Step> {
        if self.remaining == 0 {
            self.state = FrontState::Closing;
            return Ok(Step::Next);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Step::Yield);
        };
        match recv_block(stream)? {
            Recv::Eof => {
                self.to_send.borrow_mut().set_closing();
                self.state = FrontState::Closing;
                Ok(Step::Next)
            }
            Recv::Blocked => Ok(Step::Yield),
            Recv::Data(bytes) => {
                let take = bytes.len().min(self.remaining);
                if let Some(peer) = &self.peer {
                    peer.borrow_mut().push(&bytes[..take]);
                }
                self.remaining -= take;
                if self.remaining == 0 {
                    self.state = FrontState::Closing;
                    Ok(Step::Next)
                } else {
                    Ok(Step::Yield)
                }
            }
        }
    }

    /// Tops the send buffer up from the cache reader; an exhausted reader
    /// flips the connection to its final flush.
    fn refill_from_cache(&mut self) {
        let len = self.to_send.borrow().len();
        if len >= TO_SEND_MAXSIZE {
            return;
        }
        let chunk = self.ctx.cache.borrow_mut().load_chunk(&self.request, len);
        let mut tx = self.to_send.borrow_mut();
        if chunk.is_empty() {
            tx.set_closing();
        } else {
            tx.push(&chunk);
        }
    }

    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("proxy front socket {} is closing", stream.as_raw_fd());
        }
        if let Some(peer) = &self.peer {
            peer.borrow_mut().set_closing();
        }
    }
}

impl Pollable for ProxyFront {
    fn interest(&self) -> Option<Interest> {
        let mut want: Option<Interest> = None;
        let peer_has_room = self
            .peer
            .as_ref()
            .is_none_or(|peer| peer.borrow().len() <= TO_SEND_MAXSIZE);
        if matches!(
            self.state,
            FrontState::Request | FrontState::Headers | FrontState::Content
        ) && peer_has_room
        {
            want = Some(Interest::READABLE);
        }
        let tx = self.to_send.borrow();
        if !tx.is_empty() || tx.is_closing() {
            want = Some(match want {
                Some(interest) => interest | Interest::WRITABLE,
                None => Interest::WRITABLE,
            });
        }
        want
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        self.stream.as_mut().map(|s| s as &mut dyn Source)
    }

    fn on_read(&mut self, reg: &mut Registrar) -> Result<Control> {
        loop {
            let step = match self.state {
                FrontState::Request => self.request_state(reg)?,
                FrontState::Headers => self.headers_state()?,
                FrontState::Content => self.content_state()?,
                FrontState::Closing => Step::Yield,
            };
            match step {
                Step::Next => continue,
                Step::Yield => return Ok(Control::Keep),
                Step::Remove => return Ok(Control::Remove),
            }
        }
    }

    fn on_write(&mut self, _reg: &mut Registrar) -> Result<Control> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Control::Remove);
        };
        {
            let mut tx = self.to_send.borrow_mut();
            send_all(stream, &mut tx, Some(&*self.ctx.stats))?;
        }
        if self.caching && !self.to_send.borrow().is_closing() {
            self.refill_from_cache();
        }
        let done = {
            let tx = self.to_send.borrow();
            tx.is_empty() && tx.is_closing()
        };
        if done {
            self.shutdown();
            return Ok(Control::Remove);
        }
        Ok(Control::Keep)
    }

    fn on_error(&mut self, _reg: &mut Registrar) -> Result<Control> {
        self.shutdown();
        Ok(Control::Remove)
    }

    fn on_hup(&mut self, _reg: &mut Registrar) -> Result<Control> {
        self.shutdown();
        Ok(Control::Remove)
    }

    fn close(&mut self) {
        self.shutdown();
    }
}

fn contains_crlf(buf: &[u8]) -> bool {
    buf.windows(CRLF_BIN.len()).any(|w| w == CRLF_BIN)
}
