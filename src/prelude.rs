pub use crate::buffer::{Recv, SendBuf, SharedBuf, recv_block, send_all};
pub use crate::context::{AppCtx, RequestContext};
pub use crate::error::Result;
pub use crate::reactor::{Control, Pollable, Reactor, Registrar};
pub use crate::stats::Stats;

pub use mio::{
    Interest, Registry, Token,
    net::{TcpListener, TcpStream},
};
pub use tracing::{debug, error, info};
pub use wire::{CRLF, CRLF_BIN, HTTP_SIGNATURE, MAX_HEADER_LENGTH, MAX_NUMBER_OF_HEADERS, Method};

pub use std::cell::RefCell;
pub use std::collections::HashMap;
pub use std::io::{self, ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::os::fd::AsRawFd;
pub use std::path::{Path, PathBuf};
pub use std::rc::Rc;

/// Block size for reading from files or sockets.
pub const BLOCK_SIZE: usize = 1024;
/// To-send buffer max length.
pub const TO_SEND_MAXSIZE: usize = 4096;
/// Max request length.
pub const MAX_REQ_SIZE: usize = 1000;
/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8080;
/// Default management server port.
pub const DEFAULT_SERVER_PORT: u16 = 9090;
/// Directory under the working directory where cache entries live.
pub const CACHING_PATH: &str = "cache";
