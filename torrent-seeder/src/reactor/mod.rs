use std::collections::BTreeMap;
use std::fmt::Display;
use std::io;
use std::time::Duration;

use log::{debug, warn};
use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

/// What the reactor should do with a socket after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// A pollable object driven by the [`Reactor`]. Registration is
/// edge-triggered, so callbacks must read or write until `WouldBlock`.
pub trait Socket: Sized {
    type Context;
    type Error: Display;

    fn source(&mut self) -> &mut dyn Source;

    /// Desired readiness; checked after every callback and before each wait.
    fn interest(&self) -> Interest;

    /// Sockets pushed to `spawn` are registered once the callback returns.
    fn on_readable(
        &mut self,
        token: Token,
        cx: &mut Self::Context,
        spawn: &mut Vec<Self>,
    ) -> Result<Flow, Self::Error>;

    fn on_writable(&mut self, token: Token, cx: &mut Self::Context) -> Result<Flow, Self::Error>;

    fn on_exception(&mut self, _token: Token, _cx: &mut Self::Context) -> Flow {
        Flow::Close
    }

    fn on_register(&mut self, _token: Token, _cx: &mut Self::Context) {}

    fn on_close(&mut self, _token: Token, _cx: &mut Self::Context) {}
}

struct Entry<S> {
    socket: S,
    registered: Interest,
}

#[derive(Debug, Default, Clone, Copy)]
struct Readiness {
    readable: bool,
    writable: bool,
    exception: bool,
}

/// Single threaded readiness loop over a table of sockets ordered by token.
pub struct Reactor<S> {
    poll: Poll,
    events: Events,
    sockets: BTreeMap<Token, Entry<S>>,
    next_token: usize,
}

impl<S: Socket> Reactor<S> {
    pub fn new() -> io::Result<Self> {
        Ok(Reactor {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            sockets: BTreeMap::new(),
            next_token: 0,
        })
    }

    pub fn register(&mut self, mut socket: S, cx: &mut S::Context) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        let interest = socket.interest();
        self.poll
            .registry()
            .register(socket.source(), token, interest)?;
        socket.on_register(token, cx);
        self.sockets.insert(
            token,
            Entry {
                socket,
                registered: interest,
            },
        );
        Ok(token)
    }

    pub fn get(&self, token: Token) -> Option<&S> {
        self.sockets.get(&token).map(|entry| &entry.socket)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut S> {
        self.sockets.get_mut(&token).map(|entry| &mut entry.socket)
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub fn close(&mut self, token: Token, cx: &mut S::Context) {
        if let Some(mut entry) = self.sockets.remove(&token) {
            if let Err(e) = self.poll.registry().deregister(entry.socket.source()) {
                debug!("Deregistering {token:?} failed: {e}");
            }
            entry.socket.on_close(token, cx);
        }
    }

    fn refresh_interest(&mut self, token: Token) -> io::Result<()> {
        let Some(entry) = self.sockets.get_mut(&token) else {
            return Ok(());
        };
        let interest = entry.socket.interest();
        if interest != entry.registered {
            self.poll
                .registry()
                .reregister(entry.socket.source(), token, interest)?;
            entry.registered = interest;
        }
        Ok(())
    }

    /// One pass: refresh interests, wait up to `timeout`, then dispatch
    /// callbacks in ascending token order.
    pub fn poll(&mut self, cx: &mut S::Context, timeout: Option<Duration>) -> io::Result<()> {
        let tokens: Vec<Token> = self.sockets.keys().copied().collect();
        for token in tokens {
            if let Err(e) = self.refresh_interest(token) {
                warn!("Updating interest of {token:?} failed: {e}");
                self.close(token, cx);
            }
        }

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut ready: BTreeMap<Token, Readiness> = BTreeMap::new();
        for event in self.events.iter() {
            let readiness = ready.entry(event.token()).or_default();
            readiness.readable |= event.is_readable() || event.is_read_closed();
            readiness.writable |= event.is_writable();
            readiness.exception |= event.is_error();
        }

        for (token, readiness) in ready {
            self.dispatch(token, readiness, cx);
        }
        Ok(())
    }

    fn dispatch(&mut self, token: Token, readiness: Readiness, cx: &mut S::Context) {
        if readiness.exception {
            let Some(entry) = self.sockets.get_mut(&token) else {
                return;
            };
            if entry.socket.on_exception(token, cx) == Flow::Close {
                self.close(token, cx);
                return;
            }
        }

        if readiness.readable {
            let Some(entry) = self.sockets.get_mut(&token) else {
                return;
            };
            let mut spawned = Vec::new();
            let result = entry.socket.on_readable(token, cx, &mut spawned);
            for socket in spawned {
                if let Err(e) = self.register(socket, cx) {
                    warn!("Registering socket failed: {e}");
                }
            }
            if !self.keep(token, result, cx) {
                return;
            }
        }

        if readiness.writable {
            let Some(entry) = self.sockets.get_mut(&token) else {
                return;
            };
            let result = entry.socket.on_writable(token, cx);
            if !self.keep(token, result, cx) {
                return;
            }
        }

        if let Err(e) = self.refresh_interest(token) {
            warn!("Updating interest of {token:?} failed: {e}");
            self.close(token, cx);
        }
    }

    /// Closes the socket unless the callback asked to continue.
    fn keep(&mut self, token: Token, result: Result<Flow, S::Error>, cx: &mut S::Context) -> bool {
        match result {
            Ok(Flow::Continue) => true,
            Ok(Flow::Close) => {
                self.close(token, cx);
                false
            }
            Err(e) => {
                debug!("Closing {token:?}: {e}");
                self.close(token, cx);
                false
            }
        }
    }
}
