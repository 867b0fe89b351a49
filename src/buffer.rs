use crate::prelude::*;

/// Outgoing byte queue for one endpoint. The owner drains it on writable
/// events; a paired endpoint appends to it through a shared handle. The
/// `closing` flag is the peer-to-owner signal to flush whatever is queued
/// and then close the socket.
#[derive(Debug, Default)]
pub struct SendBuf {
    data: Vec<u8>,
    closing: bool,
}

pub type SharedBuf = Rc<RefCell<SendBuf>>;

impl SendBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBuf {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Replaces the queued bytes, dropping anything not yet sent.
    pub fn set(&mut self, bytes: Vec<u8>) {
        self.data = bytes;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn set_closing(&mut self) {
        self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }
}

/// One socket read of up to `BLOCK_SIZE` bytes.
pub enum Recv {
    Data(Vec<u8>),
    Eof,
    Blocked,
}

pub fn recv_block(stream: &mut TcpStream) -> io::Result<Recv> {
    let mut buf = [0u8; BLOCK_SIZE];
    match stream.read(&mut buf) {
        Ok(0) => Ok(Recv::Eof),
        Ok(n) => Ok(Recv::Data(buf[..n].to_vec())),
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
            Ok(Recv::Blocked)
        }
        Err(e) => Err(e),
    }
}

/// Sends everything possible from `buf`, draining what was accepted by the
/// socket. `WouldBlock` leaves the remainder for the next writable event.
/// Delivered byte counts are added to `stats` when given.
pub fn send_all(
    stream: &mut TcpStream,
    buf: &mut SendBuf,
    stats: Option<&RefCell<Stats>>,
) -> io::Result<()> {
    while !buf.data.is_empty() {
        match stream.write(&buf.data) {
            Ok(0) => break,
            Ok(n) => {
                if let Some(stats) = stats {
                    stats.borrow_mut().add(n as u64);
                }
                buf.data.drain(..n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_drain() {
        let mut buf = SendBuf::new();
        buf.push(b"abc");
        buf.push(b"def");
        assert_eq!(buf.len(), 6);
        buf.set(b"xyz".to_vec());
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_closing());
        buf.set_closing();
        assert!(buf.is_closing());
    }

    #[test]
    fn shared_handles_alias_one_queue() {
        let a = SendBuf::shared();
        let b = a.clone();
        b.borrow_mut().push(b"hello");
        assert_eq!(a.borrow().len(), 5);
        a.borrow_mut().set_closing();
        assert!(b.borrow().is_closing());
    }
}
