use mio::event::Source;
use mio::{Events, Poll};

use crate::prelude::*;

/// What an endpoint handler asks the reactor to do with it afterwards.
pub enum Control {
    Keep,
    Remove,
}

/// Outcome of one state-machine step: run the next state in the same
/// handler call, wait for more I/O, or leave the poll set.
pub(crate) enum Step {
    Next,
    Yield,
    Remove,
}

/// A registered participant in the reactor: one non-blocking socket plus its
/// per-connection state. Handlers run to completion and never block; an
/// endpoint that cannot make progress simply returns and waits for the next
/// readiness event.
pub trait Pollable {
    /// Desired readiness mask for the coming poll. `None` parks the endpoint
    /// until some other endpoint's progress changes the answer. This is the
    /// backpressure knob: readable only while there is room to accept bytes,
    /// writable only while bytes are queued or a final flush is pending.
    fn interest(&self) -> Option<Interest>;

    /// The socket to (de)register, when the endpoint still owns one.
    fn source(&mut self) -> Option<&mut dyn Source>;

    fn on_read(&mut self, reg: &mut Registrar) -> Result<Control>;
    fn on_write(&mut self, reg: &mut Registrar) -> Result<Control>;
    fn on_error(&mut self, reg: &mut Registrar) -> Result<Control>;
    fn on_hup(&mut self, reg: &mut Registrar) -> Result<Control>;

    /// Releases the socket (and notifies a peer, where one exists). Called by
    /// the reactor in the same iteration the endpoint is removed.
    fn close(&mut self);
}

/// Handed to handlers so they can add endpoints mid-iteration or detach a
/// socket they are about to hand over to a new endpoint.
pub struct Registrar<'a> {
    registry: &'a Registry,
    pending: Vec<Box<dyn Pollable>>,
}

impl Registrar<'_> {
    /// Queues a new endpoint; it is adopted and armed before the next poll.
    pub fn add(&mut self, endpoint: Box<dyn Pollable>) {
        self.pending.push(endpoint);
    }

    /// Removes a socket from the poll set immediately, e.g. before moving it
    /// into a different endpoint.
    pub fn deregister(&mut self, source: &mut dyn Source) {
        let _ = source.deregister(self.registry);
    }
}

struct Entry {
    endpoint: Box<dyn Pollable>,
    armed: Option<Interest>,
}

/// Single-threaded level-triggered readiness loop. Owns every endpoint.
pub struct Reactor {
    poll: Poll,
    entries: HashMap<Token, Entry>,
    next_token: usize,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            entries: HashMap::new(),
            next_token: 0,
        })
    }

    pub fn register(&mut self, endpoint: Box<dyn Pollable>) {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.entries.insert(
            token,
            Entry {
                endpoint,
                armed: None,
            },
        );
    }

    /// Re-submits every endpoint's current interest to the poll. Endpoints
    /// whose mask is empty are taken out of the set until it becomes
    /// non-empty again. Re-registering armed endpoints every iteration also
    /// re-arms mio's edge-triggered delivery, so a still-ready socket wakes
    /// the loop again even when the handler consumed only one block.
    fn arm(&mut self) -> Vec<Token> {
        let registry = self.poll.registry();
        let mut failed = Vec::new();
        for (token, entry) in self.entries.iter_mut() {
            let want = entry.endpoint.interest();
            let outcome = match (entry.armed, want) {
                (None, Some(interest)) => match entry.endpoint.source() {
                    Some(source) => source
                        .register(registry, *token, interest)
                        .map(|()| Some(interest)),
                    None => Ok(None),
                },
                (Some(_), Some(interest)) => match entry.endpoint.source() {
                    Some(source) => source
                        .reregister(registry, *token, interest)
                        .map(|()| Some(interest)),
                    None => Ok(None),
                },
                (Some(_), None) => {
                    if let Some(source) = entry.endpoint.source() {
                        let _ = source.deregister(registry);
                    }
                    Ok(None)
                }
                (None, None) => Ok(None),
            };
            match outcome {
                Ok(armed) => entry.armed = armed,
                Err(e) => {
                    error!("endpoint {}: arming failed: {}", token.0, e);
                    failed.push(*token);
                }
            }
        }
        failed
    }

    fn remove(&mut self, token: Token) {
        if let Some(mut entry) = self.entries.remove(&token) {
            if entry.armed.is_some() {
                if let Some(source) = entry.endpoint.source() {
                    let _ = source.deregister(self.poll.registry());
                }
            }
            entry.endpoint.close();
            debug!("endpoint {} removed from poll", token.0);
        }
    }

    /// The event loop. Each iteration arms interests, polls, and dispatches
    /// exactly one handler per ready token in error/readable/hangup/writable
    /// priority order. A handler error is logged and costs the offending
    /// endpoint its registration; the loop continues.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(256);
        loop {
            for token in self.arm() {
                self.remove(token);
            }

            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            let registry = self.poll.registry();
            let mut registrar = Registrar {
                registry,
                pending: Vec::new(),
            };
            let mut to_remove = Vec::new();

            for event in events.iter() {
                let token = event.token();
                let Some(entry) = self.entries.get_mut(&token) else {
                    continue;
                };
                let endpoint = &mut entry.endpoint;
                let outcome = if event.is_error() {
                    endpoint.on_error(&mut registrar)
                } else if event.is_readable() {
                    endpoint.on_read(&mut registrar)
                } else if event.is_read_closed() && event.is_write_closed() {
                    // a half-closed peer is not a hangup; pending response
                    // bytes still flow on the write side
                    endpoint.on_hup(&mut registrar)
                } else if event.is_writable() {
                    endpoint.on_write(&mut registrar)
                } else {
                    Ok(Control::Keep)
                };
                match outcome {
                    Ok(Control::Keep) => {}
                    Ok(Control::Remove) => to_remove.push(token),
                    Err(e) => {
                        error!("endpoint {}: handler failed: {}", token.0, e);
                        to_remove.push(token);
                    }
                }
            }

            let pending = registrar.pending;
            for endpoint in pending {
                self.register(endpoint);
            }
            for token in to_remove {
                self.remove(token);
            }
        }
    }

    /// Closes every endpoint; used on the way out of a failed run.
    pub fn close_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.endpoint.close();
        }
        self.entries.clear();
    }
}
