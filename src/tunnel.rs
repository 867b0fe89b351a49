use std::net::ToSocketAddrs;

use mio::event::Source;

use crate::prelude::*;

/// Client half of a CONNECT tunnel, wrapping the accepted proxy socket.
/// Bytes read here go verbatim into the downstream's send buffer and back.
pub struct TunnelUp {
    stream: TcpStream,
    /// Bytes for the client (handshake line, then origin traffic).
    to_send: SharedBuf,
    /// The downstream's send buffer (client traffic bound for the origin).
    peer: SharedBuf,
    ctx: AppCtx,
}

/// Origin half of a CONNECT tunnel.
pub struct TunnelDown {
    stream: TcpStream,
    to_send: SharedBuf,
    /// The upstream's send buffer (origin traffic bound for the client).
    peer: SharedBuf,
}

impl TunnelUp {
    /// Wraps the accepted client socket after a CONNECT request and opens
    /// the origin leg. A failed open answers `403 Forbidden` instead of the
    /// `200` handshake and leaves no downstream to register.
    pub fn promote(
        stream: TcpStream,
        host: &str,
        port: u16,
        ctx: AppCtx,
    ) -> (TunnelUp, Option<TunnelDown>) {
        let to_client = SendBuf::shared();
        let to_origin = SendBuf::shared();
        match open_origin(host, port) {
            Ok(origin) => {
                debug!(
                    "tunnel {} <-> {} established for {}:{}",
                    stream.as_raw_fd(),
                    origin.as_raw_fd(),
                    host,
                    port
                );
                to_client
                    .borrow_mut()
                    .push(b"HTTP/1.1 200 Connection established\r\n\r\n");
                let down = TunnelDown {
                    stream: origin,
                    to_send: to_origin.clone(),
                    peer: to_client.clone(),
                };
                let up = TunnelUp {
                    stream,
                    to_send: to_client,
                    peer: to_origin,
                    ctx,
                };
                (up, Some(down))
            }
            Err(e) => {
                error!("tunnel {}: opening {}:{} failed: {}", stream.as_raw_fd(), host, port, e);
                {
                    let mut tx = to_client.borrow_mut();
                    tx.push(b"HTTP/1.1 403 Forbidden\r\n\r\n");
                    tx.set_closing();
                }
                let up = TunnelUp {
                    stream,
                    to_send: to_client,
                    peer: to_origin,
                    ctx,
                };
                (up, None)
            }
        }
    }
}

fn open_origin(host: &str, port: u16) -> io::Result<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no address for origin"))?;
    TcpStream::connect(addr)
}

/// Shared shape of both tunnel halves: read into the peer's buffer while it
/// has room, flush own buffer, close once drained after a peer signal.
fn tunnel_interest(to_send: &SharedBuf, peer: &SharedBuf) -> Option<Interest> {
    let mut want: Option<Interest> = None;
    if peer.borrow().len() <= TO_SEND_MAXSIZE {
        want = Some(Interest::READABLE);
    }
    let tx = to_send.borrow();
    if !tx.is_empty() || tx.is_closing() {
        want = Some(match want {
            Some(interest) => interest | Interest::WRITABLE,
            None => Interest::WRITABLE,
        });
    }
    want
}

fn tunnel_read(stream: &mut TcpStream, peer: &SharedBuf, label: &str) -> Control {
    if peer.borrow().len() > TO_SEND_MAXSIZE {
        return Control::Keep;
    }
    match recv_block(stream) {
        Ok(Recv::Data(bytes)) => {
            peer.borrow_mut().push(&bytes);
            Control::Keep
        }
        Ok(Recv::Blocked) => Control::Keep,
        Ok(Recv::Eof) => {
            debug!("{} socket {} is closing", label, stream.as_raw_fd());
            peer.borrow_mut().set_closing();
            Control::Remove
        }
        Err(e) => {
            error!("{} {} socket error: {}", label, stream.as_raw_fd(), e);
            peer.borrow_mut().set_closing();
            Control::Remove
        }
    }
}

impl Pollable for TunnelUp {
    fn interest(&self) -> Option<Interest> {
        tunnel_interest(&self.to_send, &self.peer)
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        Some(&mut self.stream)
    }

    fn on_read(&mut self, _reg: &mut Registrar) -> Result<Control> {
        Ok(tunnel_read(&mut self.stream, &self.peer, "tunnel upstream"))
    }

    fn on_write(&mut self, _reg: &mut Registrar) -> Result<Control> {
        {
            let mut tx = self.to_send.borrow_mut();
            send_all(&mut self.stream, &mut tx, Some(&*self.ctx.stats))?;
        }
        let tx = self.to_send.borrow();
        if tx.is_empty() && tx.is_closing() {
            drop(tx);
            self.peer.borrow_mut().set_closing();
            return Ok(Control::Remove);
        }
        Ok(Control::Keep)
    }

    fn on_error(&mut self, _reg: &mut Registrar) -> Result<Control> {
        self.peer.borrow_mut().set_closing();
        Ok(Control::Remove)
    }

    fn on_hup(&mut self, _reg: &mut Registrar) -> Result<Control> {
        self.peer.borrow_mut().set_closing();
        Ok(Control::Remove)
    }

    fn close(&mut self) {
        debug!("tunnel upstream socket {} closed", self.stream.as_raw_fd());
        self.peer.borrow_mut().set_closing();
    }
}

impl Pollable for TunnelDown {
    fn interest(&self) -> Option<Interest> {
        tunnel_interest(&self.to_send, &self.peer)
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        Some(&mut self.stream)
    }

    fn on_read(&mut self, _reg: &mut Registrar) -> Result<Control> {
        Ok(tunnel_read(&mut self.stream, &self.peer, "tunnel downstream"))
    }

    fn on_write(&mut self, _reg: &mut Registrar) -> Result<Control> {
        {
            let mut tx = self.to_send.borrow_mut();
            send_all(&mut self.stream, &mut tx, None)?;
        }
        let tx = self.to_send.borrow();
        if tx.is_empty() && tx.is_closing() {
            drop(tx);
            self.peer.borrow_mut().set_closing();
            return Ok(Control::Remove);
        }
        Ok(Control::Keep)
    }

    fn on_error(&mut self, _reg: &mut Registrar) -> Result<Control> {
        self.peer.borrow_mut().set_closing();
        Ok(Control::Remove)
    }

    fn on_hup(&mut self, _reg: &mut Registrar) -> Result<Control> {
        self.peer.borrow_mut().set_closing();
        Ok(Control::Remove)
    }

    fn close(&mut self) {
        debug!("tunnel downstream socket {} closed", self.stream.as_raw_fd());
        self.peer.borrow_mut().set_closing();
    }
}
