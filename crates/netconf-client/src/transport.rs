// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-level transport seam and the framed message layer on top of it.
//!
//! SSH and TLS transports are expected to plug in behind
//! [TransportStream]; the crate itself ships plain TCP, Unix-socket and
//! in-process duplex streams.

use crate::{
    codec::{FrameCodec, FrameCodecError},
    protocol::NetconfMessage,
};
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::TcpStream,
    os::unix::net::UnixStream,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};
use tokio_util::{
    bytes::BytesMut,
    codec::{Decoder, Encoder},
};

/// Timeout convention shared by every blocking call in the crate:
/// zero milliseconds means try once without blocking, a negative value
/// means block indefinitely.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Timeout {
    /// Try once, do not block.
    NonBlocking,

    /// Block until the operation completes.
    Infinite,

    /// Budget in milliseconds.
    Millis(u64),
}

impl Timeout {
    /// C-style timeout argument: `0` is try-once, negative blocks forever.
    pub const fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            Timeout::Infinite
        } else if ms == 0 {
            Timeout::NonBlocking
        } else {
            Timeout::Millis(ms as u64)
        }
    }

    /// The budget left after deducting the time elapsed since `start`.
    /// An exhausted budget degrades to [Timeout::NonBlocking] so the
    /// caller still gets its final non-blocking attempt.
    pub fn remaining_from(&self, start: Instant) -> Timeout {
        match self {
            Timeout::NonBlocking => Timeout::NonBlocking,
            Timeout::Infinite => Timeout::Infinite,
            Timeout::Millis(ms) => {
                let elapsed = start.elapsed().as_millis() as u64;
                match ms.checked_sub(elapsed) {
                    Some(left) if left > 0 => Timeout::Millis(left),
                    _ => Timeout::NonBlocking,
                }
            }
        }
    }

    /// Whether a budget was given and has run out since `start`.
    pub fn expired_since(&self, start: Instant) -> bool {
        match self {
            Timeout::NonBlocking => true,
            Timeout::Infinite => false,
            Timeout::Millis(ms) => start.elapsed().as_millis() as u64 >= *ms,
        }
    }

    /// Read timeout to install on the underlying stream. Non-blocking
    /// attempts use the shortest timeout the socket layer accepts.
    pub(crate) const fn as_read_timeout(&self) -> Option<Duration> {
        match self {
            Timeout::NonBlocking => Some(Duration::from_millis(1)),
            Timeout::Infinite => None,
            Timeout::Millis(ms) => {
                if *ms == 0 {
                    Some(Duration::from_millis(1))
                } else {
                    Some(Duration::from_millis(*ms))
                }
            }
        }
    }

    /// Wait duration for condition variables. `None` waits forever.
    pub(crate) const fn as_wait_timeout(&self) -> Option<Duration> {
        match self {
            Timeout::NonBlocking => Some(Duration::ZERO),
            Timeout::Infinite => None,
            Timeout::Millis(ms) => Some(Duration::from_millis(*ms)),
        }
    }
}

#[derive(Debug, strum_macros::Display)]
pub enum TransportError {
    #[strum(to_string = "transport I/O error: `{0}`")]
    Io(io::Error),

    #[strum(to_string = "framing error: `{0}`")]
    Codec(FrameCodecError),

    #[strum(to_string = "connection closed by the peer")]
    Closed,
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<FrameCodecError> for TransportError {
    fn from(value: FrameCodecError) -> Self {
        Self::Codec(value)
    }
}

/// Blocking byte stream a NETCONF session can run on.
pub trait TransportStream: Read + Write + Send {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TransportStream for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

impl TransportStream for UnixStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }
}

impl TransportStream for Box<dyn TransportStream> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }
}

#[derive(Debug, Default)]
struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
}

/// One half of an in-process full-duplex byte stream, usable wherever a
/// file-descriptor pair would be handed to the session. The other half is
/// returned by [duplex_pair].
#[derive(Debug)]
pub struct DuplexStream {
    read: Arc<Pipe>,
    write: Arc<Pipe>,
    read_timeout: Option<Duration>,
}

/// Create a connected pair of in-process streams.
pub fn duplex_pair() -> (DuplexStream, DuplexStream) {
    let a = Arc::new(Pipe::default());
    let b = Arc::new(Pipe::default());
    (
        DuplexStream {
            read: Arc::clone(&a),
            write: Arc::clone(&b),
            read_timeout: None,
        },
        DuplexStream {
            read: b,
            write: a,
            read_timeout: None,
        },
    )
}

impl Read for DuplexStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let deadline = self.read_timeout.map(|t| Instant::now() + t);
        let mut state = self
            .read
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "pipe lock poisoned"))?;
        loop {
            if !state.buf.is_empty() {
                let n = out.len().min(state.buf.len());
                for slot in out.iter_mut().take(n) {
                    *slot = state.buf.pop_front().unwrap_or_default();
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state = match deadline {
                None => self
                    .read
                    .readable
                    .wait(state)
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "pipe lock poisoned"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                    }
                    let (state, _) = self
                        .read
                        .readable
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| {
                            io::Error::new(io::ErrorKind::Other, "pipe lock poisoned")
                        })?;
                    state
                }
            };
        }
    }
}

impl Write for DuplexStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self
            .write
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "pipe lock poisoned"))?;
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer end is closed",
            ));
        }
        state.buf.extend(data.iter().copied());
        self.write.readable.notify_all();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransportStream for DuplexStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }
}

impl Drop for DuplexStream {
    fn drop(&mut self) {
        // Signal EOF to the peer
        if let Ok(mut state) = self.write.state.lock() {
            state.closed = true;
        }
        self.write.readable.notify_all();
        if let Ok(mut state) = self.read.state.lock() {
            state.closed = true;
        }
        self.read.readable.notify_all();
    }
}

/// A framed message read from the wire, or a timeout.
#[derive(Debug)]
pub enum MessageEvent {
    Message(NetconfMessage),
    WouldBlock,
}

/// Framed NETCONF transport: a [TransportStream] driven through the
/// [FrameCodec], exposing the blocking `read_msg_poll` / `send_msg`
/// contract the session multiplexer is built on.
pub struct FramedTransport<S> {
    stream: S,
    codec: FrameCodec,
    buf: BytesMut,
}

impl<S: TransportStream> FramedTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            codec: FrameCodec::new(),
            buf: BytesMut::new(),
        }
    }

    pub fn codec_mut(&mut self) -> &mut FrameCodec {
        &mut self.codec
    }

    /// Serialize and write one message.
    pub fn send_msg(&mut self, msg: &NetconfMessage) -> Result<(), TransportError> {
        let mut out = BytesMut::new();
        self.codec.encode(msg, &mut out)?;
        self.stream.write_all(&out)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read one framed message within the given budget. Already-buffered
    /// bytes are drained before touching the wire, so a non-blocking call
    /// can still yield a message.
    pub fn read_msg_poll(&mut self, timeout: Timeout) -> Result<MessageEvent, TransportError> {
        let start = Instant::now();
        loop {
            if let Some(msg) = self.codec.decode(&mut self.buf)? {
                return Ok(MessageEvent::Message(msg));
            }
            let remaining = timeout.remaining_from(start);
            self.stream.set_read_timeout(remaining.as_read_timeout())?;
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    if timeout.expired_since(start) {
                        return Ok(MessageEvent::WouldBlock);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }
}
