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

//! The NETCONF client session: hello handshake, capability-driven schema
//! resolution, and the concurrent RPC/notification multiplexer.
//!
//! Any number of threads may share one [Session]. A timed lock guards the
//! transport and the two pending-message queues; a thread waiting for a
//! specific `message-id` parks messages addressed to other waiters and is
//! woken through the lock when another thread parks one for it.

use crate::{
    capabilities::{BaseVersion, Capability},
    protocol::{Hello, NetconfMessage, Notification, Rpc, RpcReply},
    reply::{classify, Reply, ReplyData},
    rpc::{NetconfRpc, SchemaFormat},
    schema::{ModuleFormat, ModuleSource, SchemaContext, SchemaError, SchemaSource},
    transport::{FramedTransport, MessageEvent, Timeout, TransportError, TransportStream},
};
use std::{
    collections::{HashSet, VecDeque},
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, Weak,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Budget for receiving the peer `<hello>` during session establishment.
const HELLO_TIMEOUT: Timeout = Timeout::Millis(60_000);

/// Receive budget for `<get-schema>` replies during context fill.
const GET_SCHEMA_RECV_TIMEOUT: Timeout = Timeout::Millis(250);

/// Dispatcher thread idle sleep between notification polls.
const NOTIF_DISPATCH_SLEEP: Duration = Duration::from_millis(10);

/// Unclaimed replies parked for another waiter are kept this long before
/// a queue scan drops them.
const REPLY_STALE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, PartialEq, Eq, strum_macros::Display)]
pub enum SessionStatus {
    #[strum(serialize = "starting")]
    Starting,

    #[strum(serialize = "running")]
    Running,

    #[strum(serialize = "closing")]
    Closing,

    #[strum(serialize = "invalid")]
    Invalid,
}

#[derive(Debug, strum_macros::Display)]
pub enum SessionError {
    #[strum(to_string = "invalid argument: {0}")]
    InvalidArgument(String),

    #[strum(to_string = "internal error: {0}")]
    Internal(String),

    /// The timeout elapsed, the caller may retry.
    #[strum(to_string = "operation would block")]
    WouldBlock,

    #[strum(to_string = "invalid session state `{status}`")]
    NotRunning { status: SessionStatus },

    #[strum(to_string = "{0}")]
    Transport(TransportError),

    #[strum(to_string = "protocol error: {0}")]
    Protocol(String),

    #[strum(to_string = "{0}")]
    Schema(SchemaError),
}

impl std::error::Error for SessionError {}

impl From<TransportError> for SessionError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<SchemaError> for SessionError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

/// Result of the capability/schema resolution phase: `Partial` means one
/// or more announced modules could not be loaded and data from them will
/// be ignored; the session is still usable.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    Complete,
    Partial,
}

#[derive(Debug)]
enum LockError {
    WouldBlock,
    Reentrant,
    Poisoned,
}

impl From<LockError> for SessionError {
    fn from(value: LockError) -> Self {
        match value {
            LockError::WouldBlock => SessionError::WouldBlock,
            LockError::Reentrant => {
                SessionError::Internal("session lock already held by this thread".to_string())
            }
            LockError::Poisoned => SessionError::Internal("session lock poisoned".to_string()),
        }
    }
}

struct LockSlot<T> {
    value: Option<T>,
    owner: Option<thread::ThreadId>,
}

/// Non-reentrant timed mutex. Acquisition reports the time it consumed so
/// callers can deduct it from their remaining budget; releasing wakes all
/// waiters so queue scans re-run after a message was parked.
struct TimedLock<T> {
    slot: Mutex<LockSlot<T>>,
    available: Condvar,
}

struct TimedLockGuard<'a, T> {
    lock: &'a TimedLock<T>,
    value: Option<T>,
}

impl<T> TimedLock<T> {
    fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(LockSlot {
                value: Some(value),
                owner: None,
            }),
            available: Condvar::new(),
        }
    }

    fn acquire(&self, timeout: Timeout) -> Result<(TimedLockGuard<'_, T>, Duration), LockError> {
        let start = Instant::now();
        let mut slot = self.slot.lock().map_err(|_| LockError::Poisoned)?;
        if slot.owner == Some(thread::current().id()) {
            return Err(LockError::Reentrant);
        }
        loop {
            if let Some(value) = slot.value.take() {
                slot.owner = Some(thread::current().id());
                return Ok((
                    TimedLockGuard {
                        lock: self,
                        value: Some(value),
                    },
                    start.elapsed(),
                ));
            }
            match timeout.remaining_from(start).as_wait_timeout() {
                None => {
                    slot = self
                        .available
                        .wait(slot)
                        .map_err(|_| LockError::Poisoned)?;
                }
                Some(wait) if wait.is_zero() => return Err(LockError::WouldBlock),
                Some(wait) => {
                    let (next, _) = self
                        .available
                        .wait_timeout(slot, wait)
                        .map_err(|_| LockError::Poisoned)?;
                    slot = next;
                }
            }
        }
    }
}

impl<T> Deref for TimedLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("timed lock guard holds a value")
    }
}

impl<T> DerefMut for TimedLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("timed lock guard holds a value")
    }
}

impl<T> Drop for TimedLockGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            if let Ok(mut slot) = self.lock.slot.lock() {
                slot.value = Some(value);
                slot.owner = None;
            }
            self.lock.available.notify_all();
        }
    }
}

struct QueuedReply {
    reply: RpcReply,
    received_at: Instant,
}

/// Everything guarded by the session lock: exclusive transport use plus
/// the two pending-message queues and the outbound message-id counter.
struct SessionIo {
    transport: FramedTransport<Box<dyn TransportStream>>,
    replies: VecDeque<QueuedReply>,
    notifications: VecDeque<Notification>,
    next_message_id: u64,
}

#[derive(Debug, Copy, Clone)]
enum Want {
    Reply(u64),
    Notification,
}

enum RoutedMessage {
    Reply(RpcReply),
    Notif(Notification),
}

struct DispatcherHandle {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Client side of a NETCONF session.
pub struct Session {
    id: u32,
    status: Mutex<SessionStatus>,
    capabilities: HashSet<Capability>,
    context: Arc<Mutex<SchemaContext>>,
    shared_context: bool,
    io: TimedLock<SessionIo>,
    dispatcher: Mutex<Option<DispatcherHandle>>,
}

impl Session {
    /// Perform the hello handshake over `stream` and resolve the peer
    /// capabilities into the schema context.
    pub(crate) fn connect(
        stream: Box<dyn TransportStream>,
        context: Arc<Mutex<SchemaContext>>,
        shared_context: bool,
    ) -> Result<(Arc<Session>, FillOutcome), SessionError> {
        let mut transport = FramedTransport::new(stream);

        let client_caps = HashSet::from([
            Capability::Base(BaseVersion::V1_0),
            Capability::Base(BaseVersion::V1_1),
        ]);
        transport.send_msg(&NetconfMessage::Hello(Hello::new(None, client_caps)))?;

        let peer_hello = match transport.read_msg_poll(HELLO_TIMEOUT)? {
            MessageEvent::Message(NetconfMessage::Hello(hello)) => hello,
            MessageEvent::Message(_) => {
                return Err(SessionError::Protocol(
                    "expected <hello> from the server".to_string(),
                ))
            }
            MessageEvent::WouldBlock => return Err(SessionError::WouldBlock),
        };
        let id = peer_hello.session_id().ok_or_else(|| {
            SessionError::Protocol("server <hello> without a session-id".to_string())
        })?;
        let capabilities = peer_hello.into_capabilities();

        let chunked = capabilities.contains(&Capability::Base(BaseVersion::V1_1));
        transport.codec_mut().set_chunked(chunked);
        tracing::debug!(
            "session {id}: hello exchanged, {} peer capabilities, chunked framing: {chunked}",
            capabilities.len()
        );

        let session = Arc::new(Session {
            id,
            status: Mutex::new(SessionStatus::Running),
            capabilities,
            context,
            shared_context,
            io: TimedLock::new(SessionIo {
                transport,
                replies: VecDeque::new(),
                notifications: VecDeque::new(),
                next_message_id: 0,
            }),
            dispatcher: Mutex::new(None),
        });

        match session.context_fill() {
            Ok(outcome) => Ok((session, outcome)),
            Err(err) => {
                session.set_status(SessionStatus::Invalid);
                Err(err)
            }
        }
    }

    pub const fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
            .lock()
            .map(|status| *status)
            .unwrap_or(SessionStatus::Invalid)
    }

    pub const fn capabilities(&self) -> &HashSet<Capability> {
        &self.capabilities
    }

    pub const fn context(&self) -> &Arc<Mutex<SchemaContext>> {
        &self.context
    }

    pub const fn shared_context(&self) -> bool {
        self.shared_context
    }

    fn set_status(&self, status: SessionStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        let status = self.status();
        if status == SessionStatus::Running {
            Ok(())
        } else {
            Err(SessionError::NotRunning { status })
        }
    }

    /// Resolve the peer capabilities into the schema context: install the
    /// `<get-schema>` fetcher when the peer supports monitoring, load the
    /// base schema (fatal on failure), enable features keyed on base
    /// capability URIs, then load every announced YANG module.
    fn context_fill(self: &Arc<Self>) -> Result<FillOutcome, SessionError> {
        let mut get_schema_support = self.capabilities.iter().any(|c| c.is_netconf_monitoring());
        let mut prior_resolver: Option<Arc<dyn SchemaSource>> = None;

        {
            let mut ctx = self.lock_context()?;
            if get_schema_support {
                match ctx.load_module("ietf-netconf-monitoring", None) {
                    Ok(()) => {
                        let fetcher: Arc<dyn SchemaSource> = Arc::new(GetSchemaFetcher {
                            session: Arc::downgrade(self),
                        });
                        prior_resolver = ctx.set_resolver(Some(fetcher));
                    }
                    Err(err) => {
                        tracing::warn!(
                            "session {}: loading NETCONF monitoring schema failed, cannot use <get-schema>: {err}",
                            self.id
                        );
                        get_schema_support = false;
                    }
                }
            }

            if let Err(err) = ctx.load_module("ietf-netconf", None) {
                tracing::error!("session {}: loading base NETCONF schema failed", self.id);
                if get_schema_support {
                    ctx.set_resolver(prior_resolver.take());
                }
                return Err(SessionError::Schema(err));
            }
            for cap in &self.capabilities {
                if let Some(feature) = cap.ietf_netconf_feature() {
                    ctx.enable_feature("ietf-netconf", feature)?;
                }
            }
        }

        let mut partial = false;
        for cap in &self.capabilities {
            let yang = match cap {
                Capability::Yang(yang) => yang,
                _ => continue,
            };
            let revision = yang.revision_string();
            let mut ctx = self.lock_context()?;
            let mut loaded = ctx
                .load_module(yang.module_name(), revision.as_deref())
                .is_ok();
            if !loaded && get_schema_support {
                tracing::debug!(
                    "session {}: trying to load the schema `{}` from a different source",
                    self.id,
                    yang.module_name()
                );
                // Temporarily restore whatever resolver was installed
                // before ours and retry through it
                let fetcher = ctx.set_resolver(prior_resolver.take());
                loaded = ctx
                    .load_module(yang.module_name(), revision.as_deref())
                    .is_ok();
                prior_resolver = ctx.set_resolver(fetcher);
            }
            if loaded {
                for feature in yang.features() {
                    if let Err(err) = ctx.enable_feature(yang.module_name(), feature) {
                        tracing::warn!(
                            "session {}: failed to enable feature `{feature}` on `{}`: {err}",
                            self.id,
                            yang.module_name()
                        );
                    }
                }
            } else {
                tracing::warn!(
                    "session {}: failed to load module \"{}\"",
                    self.id,
                    yang.module_name()
                );
                partial = true;
            }
        }

        // Restore a previously installed resolver; with none, the
        // <get-schema> fetcher stays in place for future loads
        if get_schema_support && prior_resolver.is_some() {
            let mut ctx = self.lock_context()?;
            ctx.set_resolver(prior_resolver);
        }

        if partial {
            tracing::warn!(
                "session {}: some modules failed to be loaded, any data from them will be ignored",
                self.id
            );
            Ok(FillOutcome::Partial)
        } else {
            Ok(FillOutcome::Complete)
        }
    }

    fn lock_context(&self) -> Result<std::sync::MutexGuard<'_, SchemaContext>, SessionError> {
        self.context
            .lock()
            .map_err(|_| SessionError::Internal("schema context lock poisoned".to_string()))
    }

    /// Build, validate and send one RPC. Returns the assigned message-id;
    /// the matching reply is collected with [Session::recv_reply].
    pub fn send_rpc(&self, rpc: &NetconfRpc, timeout: Timeout) -> Result<u64, SessionError> {
        self.ensure_running()?;
        {
            let ctx = self.lock_context()?;
            rpc.validate(&ctx)?;
        }
        self.send_rpc_unchecked(rpc, timeout)
    }

    /// Send without consulting the schema context. Used by the
    /// `<get-schema>` fetcher, which runs while the context lock is held
    /// by the load path that invoked it.
    fn send_rpc_unchecked(&self, rpc: &NetconfRpc, timeout: Timeout) -> Result<u64, SessionError> {
        self.ensure_running()?;
        let (mut io, elapsed) = self.io.acquire(timeout)?;
        tracing::trace!(
            "session {}: lock acquired for send in {} ms",
            self.id,
            elapsed.as_millis()
        );
        let message_id = io.next_message_id + 1;
        io.next_message_id = message_id;
        let msg = NetconfMessage::Rpc(Rpc::new(message_id, rpc.clone()));
        if let Err(err) = io.transport.send_msg(&msg) {
            drop(io);
            self.set_status(SessionStatus::Invalid);
            return Err(SessionError::Transport(err));
        }
        Ok(message_id)
    }

    /// Receive the reply matching `message_id` and classify it against
    /// the request that produced it.
    pub fn recv_reply(
        &self,
        rpc: &NetconfRpc,
        message_id: u64,
        timeout: Timeout,
    ) -> Result<Reply, SessionError> {
        if message_id == 0 {
            return Err(SessionError::InvalidArgument(
                "message-id 0 is reserved".to_string(),
            ));
        }
        self.ensure_running()?;
        match self.get_msg(timeout, Want::Reply(message_id))? {
            RoutedMessage::Reply(reply) => {
                classify(reply, rpc).map_err(|err| SessionError::Protocol(err.to_string()))
            }
            RoutedMessage::Notif(_) => Err(SessionError::Internal(
                "router returned a notification for a reply wait".to_string(),
            )),
        }
    }

    /// Receive the next notification.
    pub fn recv_notif(&self, timeout: Timeout) -> Result<Notification, SessionError> {
        self.ensure_running()?;
        match self.get_msg(timeout, Want::Notification)? {
            RoutedMessage::Notif(notif) => Ok(notif),
            RoutedMessage::Reply(_) => Err(SessionError::Internal(
                "router returned a reply for a notification wait".to_string(),
            )),
        }
    }

    /// The message router. Satisfies one caller waiting for either a
    /// specific reply or the next notification: drain the session queues
    /// first, then read from the wire, parking messages addressed to
    /// other waiters, and retry until the budget runs out.
    fn get_msg(&self, timeout: Timeout, want: Want) -> Result<RoutedMessage, SessionError> {
        let start = Instant::now();
        loop {
            let (mut io, elapsed) = self.io.acquire(timeout.remaining_from(start))?;
            tracing::trace!(
                "session {}: lock acquired for receive in {} ms",
                self.id,
                elapsed.as_millis()
            );

            match want {
                Want::Notification => {
                    if let Some(notif) = io.notifications.pop_front() {
                        return Ok(RoutedMessage::Notif(notif));
                    }
                }
                Want::Reply(wanted) => {
                    // Scan the queue: deliver a match, age out stale
                    // entries, keep fresh ones for their own waiters
                    let now = Instant::now();
                    let mut matched = None;
                    let mut idx = 0;
                    while idx < io.replies.len() {
                        if io.replies[idx].reply.message_id() == Some(wanted) {
                            matched = Some(idx);
                            break;
                        }
                        if now.duration_since(io.replies[idx].received_at) > REPLY_STALE_TTL {
                            if let Some(stale) = io.replies.remove(idx) {
                                tracing::warn!(
                                    "session {}: discarding a stale <rpc-reply> with message-id {:?}",
                                    self.id,
                                    stale.reply.message_id()
                                );
                            }
                            continue;
                        }
                        idx += 1;
                    }
                    if let Some(idx) = matched {
                        if let Some(entry) = io.replies.remove(idx) {
                            return Ok(RoutedMessage::Reply(entry.reply));
                        }
                    }
                }
            }

            let event = match io.transport.read_msg_poll(timeout.remaining_from(start)) {
                Ok(event) => event,
                Err(err) => {
                    drop(io);
                    self.set_status(SessionStatus::Invalid);
                    return Err(SessionError::Transport(err));
                }
            };
            let msg = match event {
                MessageEvent::WouldBlock => return Err(SessionError::WouldBlock),
                MessageEvent::Message(msg) => msg,
            };
            match msg {
                NetconfMessage::Hello(_) => {
                    tracing::error!("session {}: received another <hello> message", self.id);
                    return Err(SessionError::Protocol(
                        "received another <hello> message".to_string(),
                    ));
                }
                NetconfMessage::Rpc(_) => {
                    tracing::error!("session {}: received <rpc> from a NETCONF server", self.id);
                    return Err(SessionError::Protocol(
                        "received <rpc> from a NETCONF server".to_string(),
                    ));
                }
                NetconfMessage::RpcReply(reply) => {
                    if let Want::Reply(wanted) = want {
                        if reply.message_id() == Some(wanted) {
                            return Ok(RoutedMessage::Reply(reply));
                        }
                    }
                    if reply.message_id().is_none() {
                        drop(io);
                        tracing::error!(
                            "session {}: received a <rpc-reply> without a message-id, discarding",
                            self.id
                        );
                        return Err(SessionError::Protocol(
                            "<rpc-reply> without a message-id".to_string(),
                        ));
                    }
                    io.replies.push_back(QueuedReply {
                        reply,
                        received_at: Instant::now(),
                    });
                }
                NetconfMessage::Notification(notif) => match want {
                    Want::Notification => return Ok(RoutedMessage::Notif(notif)),
                    Want::Reply(_) => io.notifications.push_back(notif),
                },
            }
            // A message was parked for another waiter. Dropping the guard
            // wakes the lock's waiters so they can drain it, then this
            // thread retries within its remaining budget.
            drop(io);
        }
    }

    /// Spawn the notification dispatcher thread. At most one per session;
    /// the thread pumps notifications into `callback` until the stream
    /// completes, the session dies, or [Session::stop_notifications] is
    /// called.
    pub fn dispatch_notifications<F>(self: &Arc<Self>, callback: F) -> Result<(), SessionError>
    where
        F: Fn(&Session, &Notification) + Send + 'static,
    {
        self.ensure_running()?;
        let mut dispatcher = self
            .dispatcher
            .lock()
            .map_err(|_| SessionError::Internal("dispatcher lock poisoned".to_string()))?;
        if dispatcher.is_some() {
            return Err(SessionError::InvalidArgument(
                "separate notification thread is already running".to_string(),
            ));
        }
        let active = Arc::new(AtomicBool::new(true));
        let thread_active = Arc::clone(&active);
        let weak = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name(format!("nc-notif-{}", self.id))
            .spawn(move || notification_thread(weak, thread_active, callback))
            .map_err(|err| {
                SessionError::Internal(format!("failed to create a new thread ({err})"))
            })?;
        *dispatcher = Some(DispatcherHandle { active, handle });
        Ok(())
    }

    /// Request cooperative termination of the dispatcher thread and wait
    /// for it.
    pub fn stop_notifications(&self) {
        let handle = match self.dispatcher.lock() {
            Ok(mut dispatcher) => dispatcher.take(),
            Err(_) => None,
        };
        if let Some(DispatcherHandle { active, handle }) = handle {
            active.store(false, Ordering::Release);
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_notifications();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("capabilities", &self.capabilities.len())
            .field("shared_context", &self.shared_context)
            .finish()
    }
}

fn notification_thread<F>(session: Weak<Session>, active: Arc<AtomicBool>, callback: F)
where
    F: Fn(&Session, &Notification) + Send + 'static,
{
    while active.load(Ordering::Acquire) {
        let strong = match session.upgrade() {
            Some(strong) => strong,
            None => break,
        };
        match strong.recv_notif(Timeout::NonBlocking) {
            Ok(notif) => {
                callback(&strong, &notif);
                if notif.is_notification_complete() {
                    tracing::debug!(
                        "session {}: notification stream complete, dispatcher exiting",
                        strong.id()
                    );
                    break;
                }
            }
            Err(SessionError::WouldBlock) => {}
            Err(SessionError::Protocol(err)) => {
                tracing::warn!(
                    "session {}: dispatcher dropping an unusable message: {err}",
                    strong.id()
                );
            }
            Err(err) => {
                tracing::warn!(
                    "session {}: notification thread terminating: {err}",
                    strong.id()
                );
                break;
            }
        }
        drop(strong);
        thread::sleep(NOTIF_DISPATCH_SLEEP);
    }
}

/// Module resolver that downloads schemas from the peer with
/// `<get-schema>` over the very session being set up. Holds a weak
/// back-reference: the session owns (or shares) the context that owns
/// this resolver.
struct GetSchemaFetcher {
    session: Weak<Session>,
}

impl SchemaSource for GetSchemaFetcher {
    fn fetch(&self, name: &str, revision: Option<&str>) -> Option<ModuleSource> {
        let session = self.session.upgrade()?;
        let rpc = NetconfRpc::GetSchema {
            identifier: name.into(),
            version: revision.map(Into::into),
            format: Some(SchemaFormat::Yang),
        };
        let message_id = match session.send_rpc_unchecked(&rpc, Timeout::Infinite) {
            Ok(message_id) => message_id,
            Err(err) => {
                tracing::error!(
                    "session {}: failed to send the <get-schema> RPC: {err}",
                    session.id()
                );
                return None;
            }
        };
        match session.recv_reply(&rpc, message_id, GET_SCHEMA_RECV_TIMEOUT) {
            Ok(Reply::Data(ReplyData::Schema(source))) => Some(ModuleSource {
                source,
                format: ModuleFormat::Yang,
            }),
            Ok(Reply::Error(errors)) => {
                tracing::warn!(
                    "session {}: <get-schema> for `{name}` answered with {} rpc-error(s)",
                    session.id(),
                    errors.len()
                );
                None
            }
            Ok(_) => {
                tracing::error!(
                    "session {}: unexpected reply type to a <get-schema> RPC",
                    session.id()
                );
                None
            }
            Err(SessionError::WouldBlock) => {
                tracing::error!(
                    "session {}: timeout for receiving reply to a <get-schema> expired",
                    session.id()
                );
                None
            }
            Err(err) => {
                tracing::error!(
                    "session {}: failed to receive a reply to <get-schema>: {err}",
                    session.id()
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::RpcReplyContent,
        rpc::Datastore,
        transport::{duplex_pair, DuplexStream},
        xml_utils::XmlWriter,
    };
    use quick_xml::events::Event;
    use std::{
        str::FromStr,
        sync::atomic::AtomicUsize,
    };

    const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
    const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
    const WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
    const MONITORING: &str =
        "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring?module=ietf-netconf-monitoring&revision=2010-10-04";

    fn notification_message(body: &str) -> NetconfMessage {
        NetconfMessage::Notification(Notification::new(
            "2025-03-01T00:00:00Z".into(),
            body.into(),
        ))
    }

    /// Spawn a scripted NETCONF server on the far end of an in-process
    /// duplex stream. The server sends its hello, consumes the client
    /// hello, switches framing, then runs the script.
    fn spawn_server<F>(
        caps: &[&str],
        session_id: u32,
        script: F,
    ) -> (DuplexStream, thread::JoinHandle<()>)
    where
        F: FnOnce(&mut FramedTransport<DuplexStream>) + Send + 'static,
    {
        let caps: Vec<String> = caps.iter().map(|c| c.to_string()).collect();
        let (client_end, server_end) = duplex_pair();
        let handle = thread::spawn(move || {
            let mut transport = FramedTransport::new(server_end);
            let chunked = caps.iter().any(|c| c == BASE_1_1);
            let caps: HashSet<Capability> = caps
                .iter()
                .map(|c| Capability::from_str(c).expect("test capability"))
                .collect();
            transport
                .send_msg(&NetconfMessage::Hello(Hello::new(Some(session_id), caps)))
                .expect("server hello");
            match transport.read_msg_poll(Timeout::Millis(5_000)) {
                Ok(MessageEvent::Message(NetconfMessage::Hello(hello))) => {
                    assert_eq!(hello.session_id(), None);
                }
                other => panic!("expected client hello, got {other:?}"),
            }
            transport.codec_mut().set_chunked(chunked);
            script(&mut transport);
        });
        (client_end, handle)
    }

    fn connect(
        client_end: DuplexStream,
    ) -> Result<(Arc<Session>, FillOutcome, Arc<Mutex<SchemaContext>>), SessionError> {
        let ctx = Arc::new(Mutex::new(SchemaContext::new(None)));
        let (session, outcome) = Session::connect(Box::new(client_end), Arc::clone(&ctx), false)?;
        Ok((session, outcome, ctx))
    }

    /// Answer `<get-schema>` requests from a table, rpc-error for unknown
    /// identifiers, until the peer goes away.
    fn serve_schemas(
        transport: &mut FramedTransport<DuplexStream>,
        schemas: &[(&str, &str)],
    ) {
        loop {
            let msg = match transport.read_msg_poll(Timeout::Millis(2_000)) {
                Ok(MessageEvent::Message(msg)) => msg,
                Ok(MessageEvent::WouldBlock) => break,
                Err(_) => break,
            };
            let rpc = match msg {
                NetconfMessage::Rpc(rpc) => rpc,
                other => panic!("server expected <rpc>, got {other:?}"),
            };
            let identifier = match rpc.operation() {
                NetconfRpc::GetSchema { identifier, .. } => identifier.clone(),
                other => panic!("server expected <get-schema>, got {other:?}"),
            };
            let reply = match schemas.iter().find(|(name, _)| *name == identifier.as_ref()) {
                Some((_, schema)) => {
                    let writer = quick_xml::writer::Writer::new(std::io::Cursor::new(Vec::new()));
                    let mut writer = XmlWriter::new(writer, vec![]);
                    let mut data = writer.create_element("data");
                    data.push_attribute((
                        "xmlns",
                        "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring",
                    ));
                    writer.write_event(Event::Start(data.clone())).unwrap();
                    writer
                        .write_event(Event::Text(quick_xml::events::BytesText::new(schema)))
                        .unwrap();
                    writer.write_event(Event::End(data.to_end())).unwrap();
                    let raw =
                        String::from_utf8(writer.into_inner().into_inner()).unwrap();
                    RpcReply::new(Some(rpc.message_id()), RpcReplyContent::Data(raw.into()))
                }
                None => {
                    let raw = error_reply_body();
                    RpcReply::new(Some(rpc.message_id()), raw)
                }
            };
            transport
                .send_msg(&NetconfMessage::RpcReply(reply))
                .expect("server reply");
        }
    }

    fn error_reply_body() -> RpcReplyContent {
        use crate::xml_utils::{XmlDeserialize, XmlParser};
        let input = r#"<rpc-error xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><error-type>application</error-type><error-tag>operation-failed</error-tag><error-severity>error</error-severity></rpc-error>"#;
        let mut reader = quick_xml::NsReader::from_str(input);
        reader.config_mut().trim_text(false);
        let mut parser = XmlParser::new(reader).unwrap();
        let error = crate::protocol::RpcError::xml_deserialize(&mut parser).unwrap();
        RpcReplyContent::Errors(vec![error])
    }

    #[test]
    fn test_hello_without_monitoring() {
        let (client_end, server) =
            spawn_server(&[BASE_1_0, BASE_1_1, WRITABLE_RUNNING], 17, |_| {});
        let (session, outcome, ctx) = connect(client_end).expect("connect");

        assert_eq!(session.id(), 17);
        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(outcome, FillOutcome::Complete);
        let ctx = ctx.lock().unwrap();
        assert!(ctx.has_module("ietf-netconf"));
        assert!(ctx.feature_enabled("ietf-netconf", "writable-running"));
        assert!(!ctx.feature_enabled("ietf-netconf", "candidate"));
        // get-schema support is absent, no fetcher was installed
        assert!(!ctx.has_resolver());
        drop(ctx);
        server.join().expect("server thread");
    }

    #[test]
    fn test_hello_with_unknown_module_and_monitoring() {
        let foo_cap = "http://x.example/yang/foo?module=foo&revision=2020-01-01&features=a,b";
        let (client_end, server) = spawn_server(
            &[BASE_1_1, MONITORING, foo_cap],
            21,
            |transport| {
                serve_schemas(
                    transport,
                    &[(
                        "foo",
                        "module foo { namespace \"urn:x:foo\"; prefix f; feature a; feature b; }",
                    )],
                );
            },
        );
        let (session, outcome, ctx) = connect(client_end).expect("connect");

        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(outcome, FillOutcome::Complete);
        let ctx = ctx.lock().unwrap();
        let module = ctx.get_module("foo").expect("module foo loaded");
        assert_eq!(module.namespace(), Some("urn:x:foo"));
        assert!(ctx.feature_enabled("foo", "a"));
        assert!(ctx.feature_enabled("foo", "b"));
        // Our fetcher stays installed, there was no prior resolver
        assert!(ctx.has_resolver());
        drop(ctx);
        drop(session);
        server.join().expect("server thread");
    }

    #[test]
    fn test_module_load_failure_is_partial() {
        let missing_cap = "http://x.example/yang/ghost?module=ghost";
        let (client_end, server) = spawn_server(&[BASE_1_1, missing_cap], 5, |_| {});
        let (session, outcome, ctx) = connect(client_end).expect("connect");
        assert_eq!(outcome, FillOutcome::Partial);
        assert_eq!(session.status(), SessionStatus::Running);
        assert!(!ctx.lock().unwrap().has_module("ghost"));
        server.join().expect("server thread");
    }

    #[test]
    fn test_reply_mismatch_parking() {
        // Thread A waits for reply 3, thread B for a notification; the
        // wire delivers the notification first, then reply 3. Both must
        // be delivered regardless of which thread reads which message.
        let (client_end, server) = spawn_server(&[BASE_1_1], 9, |transport| {
            transport
                .send_msg(&notification_message("<link-down xmlns=\"urn:ex\"/>"))
                .unwrap();
            transport
                .send_msg(&NetconfMessage::RpcReply(RpcReply::new(
                    Some(3),
                    RpcReplyContent::Ok,
                )))
                .unwrap();
        });
        let (session, _, _) = connect(client_end).expect("connect");
        server.join().expect("server thread");

        let rpc = NetconfRpc::Lock {
            target: Datastore::Running,
        };
        let reply_session = Arc::clone(&session);
        let reply_thread = thread::spawn(move || {
            reply_session.recv_reply(&rpc, 3, Timeout::Millis(2_000))
        });
        let notif_session = Arc::clone(&session);
        let notif_thread =
            thread::spawn(move || notif_session.recv_notif(Timeout::Millis(2_000)));

        let reply = reply_thread.join().expect("reply thread").expect("reply");
        assert_eq!(reply, Reply::Ok);
        let notif = notif_thread.join().expect("notif thread").expect("notif");
        assert!(notif.body().contains("link-down"));
    }

    #[test]
    fn test_unmatched_reply_is_retained_for_its_waiter() {
        let (client_end, server) = spawn_server(&[BASE_1_1], 11, |transport| {
            transport
                .send_msg(&NetconfMessage::RpcReply(RpcReply::new(
                    Some(99),
                    RpcReplyContent::Ok,
                )))
                .unwrap();
            transport
                .send_msg(&NetconfMessage::RpcReply(RpcReply::new(
                    Some(5),
                    RpcReplyContent::Ok,
                )))
                .unwrap();
        });
        let (session, _, _) = connect(client_end).expect("connect");
        server.join().expect("server thread");

        let rpc = NetconfRpc::Discard;
        // Reply 99 is read, parked, and must survive for its own waiter
        let reply = session
            .recv_reply(&rpc, 5, Timeout::Millis(2_000))
            .expect("reply 5");
        assert_eq!(reply, Reply::Ok);
        let reply = session
            .recv_reply(&rpc, 99, Timeout::Millis(2_000))
            .expect("reply 99");
        assert_eq!(reply, Reply::Ok);
    }

    #[test]
    fn test_stale_reply_is_dropped() {
        // The script keeps the far end open while the client scans its
        // queues, so an empty wire reads as would-block, not as EOF
        let (client_end, server) = spawn_server(&[BASE_1_1], 12, |transport| {
            let _ = transport.read_msg_poll(Timeout::Millis(3_000));
        });
        let (session, _, _) = connect(client_end).expect("connect");

        {
            let (mut io, _) = session.io.acquire(Timeout::Infinite).expect("lock");
            io.replies.push_back(QueuedReply {
                reply: RpcReply::new(Some(40), RpcReplyContent::Ok),
                received_at: Instant::now() - (REPLY_STALE_TTL + Duration::from_secs(1)),
            });
        }
        let rpc = NetconfRpc::Discard;
        // The scan for another id ages out the stale entry
        let result = session.recv_reply(&rpc, 41, Timeout::NonBlocking);
        assert!(matches!(result, Err(SessionError::WouldBlock)));
        let result = session.recv_reply(&rpc, 40, Timeout::NonBlocking);
        assert!(matches!(result, Err(SessionError::WouldBlock)));
        drop(session);
        server.join().expect("server thread");
    }

    #[test]
    fn test_message_ids_strictly_increasing_across_threads() {
        const SENDERS: usize = 3;
        const PER_SENDER: usize = 5;
        let (client_end, server) = spawn_server(&[BASE_1_1], 13, |transport| {
            let mut seen = Vec::new();
            for _ in 0..SENDERS * PER_SENDER {
                match transport.read_msg_poll(Timeout::Millis(5_000)) {
                    Ok(MessageEvent::Message(NetconfMessage::Rpc(rpc))) => {
                        seen.push(rpc.message_id());
                    }
                    other => panic!("expected rpc, got {other:?}"),
                }
            }
            for window in seen.windows(2) {
                assert!(
                    window[0] < window[1],
                    "message-ids not strictly increasing: {seen:?}"
                );
            }
        });
        let (session, _, _) = connect(client_end).expect("connect");

        let mut senders = Vec::new();
        for _ in 0..SENDERS {
            let session = Arc::clone(&session);
            senders.push(thread::spawn(move || {
                for _ in 0..PER_SENDER {
                    session
                        .send_rpc(&NetconfRpc::Discard, Timeout::Millis(2_000))
                        .expect("send");
                }
            }));
        }
        for sender in senders {
            sender.join().expect("sender thread");
        }
        server.join().expect("server thread");
    }

    #[test]
    fn test_dispatcher_exits_on_notification_complete() {
        let complete_body =
            "<notificationComplete xmlns=\"urn:ietf:params:xml:ns:netmod:notification\"/>";
        let (client_end, server) = spawn_server(&[BASE_1_1], 14, move |transport| {
            transport
                .send_msg(&notification_message("<ev1 xmlns=\"urn:ex\"/>"))
                .unwrap();
            transport
                .send_msg(&notification_message("<ev2 xmlns=\"urn:ex\"/>"))
                .unwrap();
            transport
                .send_msg(&notification_message(complete_body))
                .unwrap();
        });
        let (session, _, _) = connect(client_end).expect("connect");
        server.join().expect("server thread");

        let count = Arc::new(AtomicUsize::new(0));
        let cb_count = Arc::clone(&count);
        session
            .dispatch_notifications(move |_, _| {
                cb_count.fetch_add(1, Ordering::SeqCst);
            })
            .expect("dispatch");

        // A second dispatcher is refused while one is installed
        assert!(matches!(
            session.dispatch_notifications(|_, _| {}),
            Err(SessionError::InvalidArgument(_))
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        // The stream completed but the session stays usable
        assert_eq!(session.status(), SessionStatus::Running);
        session.stop_notifications();
    }

    #[test]
    fn test_send_rpc_validates_against_context() {
        let (client_end, server) = spawn_server(&[BASE_1_1], 15, |_| {});
        let (session, _, _) = connect(client_end).expect("connect");
        server.join().expect("server thread");

        // get-schema requires the monitoring module, which this peer
        // never announced
        let rpc = NetconfRpc::GetSchema {
            identifier: "foo".into(),
            version: None,
            format: None,
        };
        assert!(matches!(
            session.send_rpc(&rpc, Timeout::Millis(100)),
            Err(SessionError::Schema(SchemaError::ModuleNotFound { .. }))
        ));
    }

    #[test]
    fn test_protocol_violation_on_server_rpc() {
        let (client_end, server) = spawn_server(&[BASE_1_1], 16, |transport| {
            transport
                .send_msg(&NetconfMessage::Rpc(Rpc::new(1, NetconfRpc::Discard)))
                .unwrap();
        });
        let (session, _, _) = connect(client_end).expect("connect");
        server.join().expect("server thread");

        let result = session.recv_notif(Timeout::Millis(2_000));
        assert!(matches!(result, Err(SessionError::Protocol(_))));
    }

    #[test]
    fn test_base_1_0_peer_uses_eom_framing() {
        let (client_end, server) = spawn_server(&[BASE_1_0], 18, |transport| {
            assert!(!transport.codec_mut().is_chunked());
            match transport.read_msg_poll(Timeout::Millis(5_000)) {
                Ok(MessageEvent::Message(NetconfMessage::Rpc(rpc))) => {
                    transport
                        .send_msg(&NetconfMessage::RpcReply(RpcReply::new(
                            Some(rpc.message_id()),
                            RpcReplyContent::Ok,
                        )))
                        .unwrap();
                }
                other => panic!("expected rpc, got {other:?}"),
            }
        });
        let (session, _, _) = connect(client_end).expect("connect");

        let rpc = NetconfRpc::Discard;
        let message_id = session.send_rpc(&rpc, Timeout::Millis(2_000)).expect("send");
        let reply = session
            .recv_reply(&rpc, message_id, Timeout::Millis(2_000))
            .expect("reply");
        assert_eq!(reply, Reply::Ok);
        server.join().expect("server thread");
    }

    #[test]
    fn test_recv_on_invalid_session_is_refused() {
        let (client_end, server) = spawn_server(&[BASE_1_1], 19, |_| {});
        let (session, _, _) = connect(client_end).expect("connect");
        server.join().expect("server thread");

        session.set_status(SessionStatus::Invalid);
        assert!(matches!(
            session.recv_notif(Timeout::NonBlocking),
            Err(SessionError::NotRunning {
                status: SessionStatus::Invalid
            })
        ));
        assert!(matches!(
            session.send_rpc(&NetconfRpc::Discard, Timeout::NonBlocking),
            Err(SessionError::NotRunning { .. })
        ));
    }

    #[test]
    fn test_timed_lock_reports_elapsed_and_try_once() {
        let lock = TimedLock::new(0u32);
        let (guard, elapsed) = lock.acquire(Timeout::NonBlocking).expect("uncontended");
        assert!(elapsed < Duration::from_millis(50));

        // Contended try-once fails from another thread
        let contended = thread::scope(|scope| {
            scope
                .spawn(|| lock.acquire(Timeout::NonBlocking).map(|_| ()))
                .join()
                .expect("thread")
        });
        assert!(matches!(contended, Err(LockError::WouldBlock)));

        // Bounded wait times out while the lock is held
        let contended = thread::scope(|scope| {
            scope
                .spawn(|| {
                    let start = Instant::now();
                    let result = lock.acquire(Timeout::Millis(50)).map(|_| ());
                    (result, start.elapsed())
                })
                .join()
                .expect("thread")
        });
        assert!(matches!(contended.0, Err(LockError::WouldBlock)));
        assert!(contended.1 >= Duration::from_millis(45));

        drop(guard);
        let (_, _) = lock.acquire(Timeout::Millis(50)).expect("released");
    }

    #[test]
    fn test_timed_lock_is_not_reentrant() {
        let lock = TimedLock::new(());
        let _guard = lock.acquire(Timeout::NonBlocking).expect("first");
        assert!(matches!(
            lock.acquire(Timeout::NonBlocking),
            Err(LockError::Reentrant)
        ));
    }

    #[test]
    fn test_timed_lock_wakes_waiter_on_release() {
        let lock = Arc::new(TimedLock::new(0u32));
        let (guard, _) = lock.acquire(Timeout::NonBlocking).expect("held");
        let waiter_lock = Arc::clone(&lock);
        let waiter = thread::spawn(move || {
            waiter_lock
                .acquire(Timeout::Millis(2_000))
                .map(|(guard, _)| *guard)
        });
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        let value = waiter.join().expect("waiter").expect("acquired");
        assert_eq!(value, 0);
    }
}
