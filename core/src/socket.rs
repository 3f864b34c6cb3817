//! TCP plumbing for `ureq` that a caller can tear down from another thread.
//!
//! `ureq` keeps its sockets private, so a blocked call cannot be interrupted
//! from outside. `AbortableTcpConnector` opens the socket itself, registers
//! a `shutdown` of a cloned handle with the exchange's `AbortSignal`, and
//! hands `ureq` a plain blocking transport over it. TLS is chained on top
//! for `https` URLs.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use ureq::unversioned::transport::{Buffers, ConnectionDetails, LazyBuffers, NextTimeout, Transport};
use ureq::Timeout;

use crate::abort::AbortSignal;

/// First link of the connector chain: a TCP socket bound to an abort signal.
#[derive(Debug)]
pub(crate) struct AbortableTcpConnector {
    abort: Arc<AbortSignal>,
}

impl AbortableTcpConnector {
    pub(crate) fn new(abort: Arc<AbortSignal>) -> Self {
        Self { abort }
    }

    fn register(&self, stream: TcpStream, details: &ConnectionDetails) -> Result<SocketTransport, ureq::Error> {
        let handle = stream.try_clone()?;
        let armed = self.abort.on_abort(move || {
            let _ = handle.shutdown(Shutdown::Both);
        });
        if !armed {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "exchange cancelled").into());
        }
        let config = details.config;
        if config.no_delay() {
            stream.set_nodelay(true)?;
        }
        Ok(SocketTransport {
            stream,
            buffers: LazyBuffers::new(config.input_buffer_size(), config.output_buffer_size()),
            read_timeout: None,
            write_timeout: None,
        })
    }
}

impl ureq::unversioned::transport::Connector<()> for AbortableTcpConnector {
    type Out = SocketTransport;

    fn connect(&self, details: &ConnectionDetails, _chained: Option<()>) -> Result<Option<Self::Out>, ureq::Error> {
        if self.abort.is_aborted() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "exchange cancelled").into());
        }
        let per_addr = details.timeout.not_zero().map(|t| *t);
        let mut last_err = None;
        for addr in &details.addrs {
            let attempt = match per_addr {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    debug!(%addr, "socket connected");
                    return self.register(stream, details).map(Some);
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    last_err = Some(ureq::Error::Timeout(Timeout::Connect));
                }
                Err(e) => last_err = Some(e.into()),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "no address to connect to").into()
        }))
    }
}

/// Blocking HTTP/1.1 transport over a registered socket.
pub(crate) struct SocketTransport {
    stream: TcpStream,
    buffers: LazyBuffers,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

fn update_timeout(
    stream: &TcpStream,
    timeout: NextTimeout,
    previous: &mut Option<Duration>,
    set: fn(&TcpStream, Option<Duration>) -> io::Result<()>,
) -> io::Result<()> {
    let next = timeout.not_zero().map(|t| *t);
    if next != *previous {
        set(stream, next)?;
        *previous = next;
    }
    Ok(())
}

fn io_error(err: io::Error, timeout: NextTimeout) -> ureq::Error {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ureq::Error::Timeout(timeout.reason),
        _ => err.into(),
    }
}

impl Transport for SocketTransport {
    fn buffers(&mut self) -> &mut dyn Buffers {
        &mut self.buffers
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), ureq::Error> {
        update_timeout(&self.stream, timeout, &mut self.write_timeout, TcpStream::set_write_timeout)?;
        let output = &self.buffers.output()[..amount];
        self.stream.write_all(output).map_err(|e| io_error(e, timeout))
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, ureq::Error> {
        update_timeout(&self.stream, timeout, &mut self.read_timeout, TcpStream::set_read_timeout)?;
        let input = self.buffers.input_append_buf();
        let amount = self.stream.read(input).map_err(|e| io_error(e, timeout))?;
        self.buffers.input_appended(amount);
        Ok(amount > 0)
    }

    fn is_open(&mut self) -> bool {
        // Nothing should be waiting on an idle socket; EOF or stray bytes mean closed.
        if self.stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut peek = [0u8; 1];
        let open = matches!(self.stream.read(&mut peek), Err(ref e) if e.kind() == io::ErrorKind::WouldBlock);
        open && self.stream.set_nonblocking(false).is_ok()
    }
}

impl fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTransport")
            .field("peer", &self.stream.peer_addr().ok())
            .finish()
    }
}
