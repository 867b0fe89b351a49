use std::thread;
use std::time::Duration;

use mio::event::Source;

use crate::admin::AdminFront;
use crate::front::ProxyFront;
use crate::prelude::*;

/// Which endpoint a freshly accepted connection becomes.
pub enum ListenerKind {
    Proxy,
    Admin,
}

/// Accepting socket for one of the two listening ports.
pub struct Listener {
    socket: TcpListener,
    kind: ListenerKind,
    ctx: AppCtx,
}

impl Listener {
    /// Binds the port, retrying every 5 seconds while the address is in use.
    pub fn bind(address: &str, port: u16, kind: ListenerKind, ctx: AppCtx) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", address, port).parse()?;
        let socket = loop {
            match TcpListener::bind(addr) {
                Ok(socket) => {
                    println!("Port {} connected", port);
                    break socket;
                }
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    println!("Port {} already in use, trying again in 5 sec", port);
                    thread::sleep(Duration::from_secs(5));
                }
                Err(e) => return Err(e.into()),
            }
        };
        Ok(Self { socket, kind, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Pollable for Listener {
    fn interest(&self) -> Option<Interest> {
        Some(Interest::READABLE)
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        Some(&mut self.socket)
    }

    fn on_read(&mut self, reg: &mut Registrar) -> Result<Control> {
        loop {
            match self.socket.accept() {
                Ok((stream, addr)) => match self.kind {
                    ListenerKind::Proxy => {
                        info!("proxy request accepted from {}", addr);
                        reg.add(Box::new(ProxyFront::new(stream, self.ctx.clone())));
                    }
                    ListenerKind::Admin => {
                        debug!("management request accepted from {}", addr);
                        reg.add(Box::new(AdminFront::new(stream, self.ctx.clone())));
                    }
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Control::Keep)
    }

    fn on_write(&mut self, _reg: &mut Registrar) -> Result<Control> {
        Ok(Control::Keep)
    }

    fn on_error(&mut self, _reg: &mut Registrar) -> Result<Control> {
        Ok(Control::Remove)
    }

    fn on_hup(&mut self, _reg: &mut Registrar) -> Result<Control> {
        Ok(Control::Remove)
    }

    fn close(&mut self) {
        debug!("listener socket {} is closing", self.socket.as_raw_fd());
    }
}
