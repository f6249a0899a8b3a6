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

//! Client context owning the state that used to be process-wide in
//! classic NETCONF client stacks: the YANG schema search path and the
//! call-home listener binds. Dropping the context releases everything.

use crate::{
    schema::SchemaContext,
    session::{FillOutcome, Session, SessionError},
    transport::{Timeout, TransportStream},
};
use std::{
    io,
    net::{TcpListener, TcpStream},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

/// Poll interval while waiting for a call-home connection.
const CALLHOME_ACCEPT_SLEEP: Duration = Duration::from_millis(10);

struct CallHomeBind {
    address: String,
    port: u16,
    listener: TcpListener,
}

/// NETCONF client context.
#[derive(Default)]
pub struct NetconfClient {
    schema_searchpath: Option<PathBuf>,
    callhome_binds: Vec<CallHomeBind>,
}

impl NetconfClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the fallback YANG schema search directory used by
    /// sessions whose schema context this client creates. `None` clears
    /// it; clearing twice is a no-op.
    pub fn set_schema_searchpath<P: Into<PathBuf>>(&mut self, path: Option<P>) {
        self.schema_searchpath = path.map(Into::into);
    }

    pub fn schema_searchpath(&self) -> Option<&Path> {
        self.schema_searchpath.as_deref()
    }

    /// Establish a session over an already-connected full-duplex stream
    /// (a socket, an SSH/TLS channel adapter, or an in-process pipe
    /// standing in for a file-descriptor pair). Performs the hello
    /// handshake and fills the schema context from the peer capabilities.
    ///
    /// Passing a context shares it with the caller (and possibly other
    /// sessions); it then outlives the session. Without one, a fresh
    /// context rooted at the configured schema search path is created.
    pub fn connect_inout<S: TransportStream + 'static>(
        &self,
        stream: S,
        context: Option<Arc<Mutex<SchemaContext>>>,
    ) -> Result<(Arc<Session>, FillOutcome), SessionError> {
        let (context, shared) = match context {
            Some(context) => (context, true),
            None => (
                Arc::new(Mutex::new(SchemaContext::new(
                    self.schema_searchpath.clone(),
                ))),
                false,
            ),
        };
        Session::connect(Box::new(stream), context, shared)
    }

    /// Connect to a NETCONF server listening on `host:port` over plain
    /// TCP.
    pub fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        context: Option<Arc<Mutex<SchemaContext>>>,
    ) -> Result<(Arc<Session>, FillOutcome), SessionError> {
        tracing::debug!("connecting to {host}:{port}");
        let stream = TcpStream::connect((host, port)).map_err(io_error)?;
        tracing::debug!("successfully connected to {host}:{port}");
        self.connect_inout(stream, context)
    }

    /// Start listening for call-home connections on `address:port`. Port
    /// `0` binds an ephemeral port; the effective one is recorded and
    /// matched by [NetconfClient::del_callhome_bind].
    pub fn add_callhome_bind(&mut self, address: &str, port: u16) -> Result<u16, SessionError> {
        let listener = TcpListener::bind((address, port)).map_err(io_error)?;
        listener.set_nonblocking(true).map_err(io_error)?;
        let port = listener.local_addr().map_err(io_error)?.port();
        tracing::debug!("listening for call-home connections on {address}:{port}");
        self.callhome_binds.push(CallHomeBind {
            address: address.to_string(),
            port,
            listener,
        });
        Ok(port)
    }

    /// Remove call-home binds. `None` acts as a wildcard for the
    /// corresponding field, so `del_callhome_bind(None, None)` removes
    /// them all. Returns whether anything was removed.
    pub fn del_callhome_bind(&mut self, address: Option<&str>, port: Option<u16>) -> bool {
        let before = self.callhome_binds.len();
        self.callhome_binds.retain(|bind| {
            let address_match = address.map_or(true, |a| a == bind.address);
            let port_match = port.map_or(true, |p| p == bind.port);
            !(address_match && port_match)
        });
        before != self.callhome_binds.len()
    }

    pub fn callhome_bind_count(&self) -> usize {
        self.callhome_binds.len()
    }

    /// Wait for a server to call home on any of the bound listeners.
    /// `Ok(None)` means the timeout elapsed without a connection.
    pub fn accept_callhome(
        &self,
        timeout: Timeout,
        context: Option<Arc<Mutex<SchemaContext>>>,
    ) -> Result<Option<(Arc<Session>, FillOutcome)>, SessionError> {
        if self.callhome_binds.is_empty() {
            return Err(SessionError::InvalidArgument(
                "no call-home binds are configured".to_string(),
            ));
        }
        let start = Instant::now();
        loop {
            for bind in &self.callhome_binds {
                match bind.listener.accept() {
                    Ok((stream, peer)) => {
                        tracing::debug!(
                            "accepted a call-home connection from {peer} on {}:{}",
                            bind.address,
                            bind.port
                        );
                        stream.set_nonblocking(false).map_err(io_error)?;
                        let (session, outcome) = self.connect_inout(stream, context)?;
                        if outcome == FillOutcome::Partial {
                            tracing::warn!(
                                "session {}: call-home session established with a partial schema context",
                                session.id()
                            );
                        }
                        return Ok(Some((session, outcome)));
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(io_error(err)),
                }
            }
            if timeout.expired_since(start) {
                return Ok(None);
            }
            thread::sleep(CALLHOME_ACCEPT_SLEEP);
        }
    }
}

fn io_error(err: io::Error) -> SessionError {
    SessionError::Transport(crate::transport::TransportError::Io(err))
}

impl Drop for NetconfClient {
    fn drop(&mut self) {
        if !self.callhome_binds.is_empty() {
            tracing::debug!(
                "closing {} call-home listener(s)",
                self.callhome_binds.len()
            );
        }
        self.callhome_binds.clear();
        self.schema_searchpath = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capabilities::Capability,
        protocol::{Hello, NetconfMessage},
        transport::{FramedTransport, MessageEvent},
    };
    use std::{collections::HashSet, str::FromStr};

    #[test]
    fn test_schema_searchpath_idempotence() {
        let mut client = NetconfClient::new();
        assert!(client.schema_searchpath().is_none());
        client.set_schema_searchpath(Some("/tmp/yang"));
        assert_eq!(
            client.schema_searchpath(),
            Some(Path::new("/tmp/yang"))
        );
        client.set_schema_searchpath(Some("/tmp/other"));
        assert_eq!(
            client.schema_searchpath(),
            Some(Path::new("/tmp/other"))
        );
        client.set_schema_searchpath::<PathBuf>(None);
        assert!(client.schema_searchpath().is_none());
        // Clearing an already-cleared path is safe
        client.set_schema_searchpath::<PathBuf>(None);
        assert!(client.schema_searchpath().is_none());
    }

    #[test]
    fn test_callhome_bind_management() {
        let mut client = NetconfClient::new();
        let port_a = client.add_callhome_bind("127.0.0.1", 0).expect("bind a");
        let port_b = client.add_callhome_bind("127.0.0.1", 0).expect("bind b");
        assert_ne!(port_a, port_b);
        assert_eq!(client.callhome_bind_count(), 2);

        assert!(client.del_callhome_bind(Some("127.0.0.1"), Some(port_a)));
        assert_eq!(client.callhome_bind_count(), 1);
        assert!(!client.del_callhome_bind(Some("127.0.0.1"), Some(port_a)));

        // Wildcard removal
        assert!(client.del_callhome_bind(None, None));
        assert_eq!(client.callhome_bind_count(), 0);
    }

    #[test]
    fn test_accept_callhome_times_out_without_peer() {
        let mut client = NetconfClient::new();
        client.add_callhome_bind("127.0.0.1", 0).expect("bind");
        let result = client
            .accept_callhome(Timeout::Millis(50), None)
            .expect("accept");
        assert!(result.is_none());
    }

    #[test]
    fn test_accept_callhome_without_binds_is_refused() {
        let client = NetconfClient::new();
        assert!(matches!(
            client.accept_callhome(Timeout::NonBlocking, None),
            Err(SessionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_accept_callhome_establishes_session() {
        let mut client = NetconfClient::new();
        let port = client.add_callhome_bind("127.0.0.1", 0).expect("bind");

        // The "server" side of call-home: connect out to the client and
        // then speak NETCONF as usual
        let server = thread::spawn(move || {
            let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
            let mut transport = FramedTransport::new(stream);
            let caps: HashSet<Capability> = HashSet::from([
                Capability::from_str("urn:ietf:params:netconf:base:1.1").unwrap(),
                Capability::from_str("urn:ietf:params:netconf:capability:candidate:1.0")
                    .unwrap(),
            ]);
            transport
                .send_msg(&NetconfMessage::Hello(Hello::new(Some(33), caps)))
                .expect("server hello");
            match transport.read_msg_poll(Timeout::Millis(5_000)) {
                Ok(MessageEvent::Message(NetconfMessage::Hello(_))) => {}
                other => panic!("expected client hello, got {other:?}"),
            }
        });

        let accepted = client
            .accept_callhome(Timeout::Millis(5_000), None)
            .expect("accept")
            .expect("session");
        server.join().expect("server thread");

        let (session, outcome) = accepted;
        assert_eq!(session.id(), 33);
        assert_eq!(outcome, FillOutcome::Complete);
        let ctx = session.context().lock().unwrap();
        assert!(ctx.feature_enabled("ietf-netconf", "candidate"));
    }
}
