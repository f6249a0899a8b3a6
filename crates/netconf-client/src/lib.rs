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

//! Client side of a NETCONF session: hello handshake, capability-driven
//! YANG schema resolution (including `<get-schema>` retrieval over the
//! session being built), and a concurrent RPC/notification multiplexer
//! where any number of threads share one session.

pub mod capabilities;
pub mod client;
pub mod codec;
pub mod protocol;
pub mod reply;
pub mod rpc;
pub mod schema;
pub mod session;
pub mod transport;
pub mod xml_utils;

pub use client::NetconfClient;
pub use reply::{Reply, ReplyData};
pub use rpc::NetconfRpc;
pub use session::{FillOutcome, Session, SessionError, SessionStatus};
pub use transport::Timeout;

/// NETCONF base protocol namespace from [RFC 6241](https://www.rfc-editor.org/rfc/rfc6241.html)
pub(crate) const BASE_NS: &[u8] = b"urn:ietf:params:xml:ns:netconf:base:1.0";

/// `ietf-netconf-monitoring` module namespace from [RFC 6022](https://www.rfc-editor.org/rfc/rfc6022.html)
pub(crate) const MONITORING_NS: &[u8] = b"urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring";

/// `notifications` module namespace from [RFC 5277](https://www.rfc-editor.org/rfc/rfc5277.html)
pub(crate) const NOTIFICATIONS_NS: &[u8] = b"urn:ietf:params:xml:ns:netconf:notification:1.0";

/// `nc-notifications` module namespace from [RFC 5277](https://www.rfc-editor.org/rfc/rfc5277.html)
pub(crate) const NC_NOTIFICATIONS_NS: &[u8] = b"urn:ietf:params:xml:ns:netmod:notification";

/// `ietf-netconf-with-defaults` module namespace from [RFC 6243](https://www.rfc-editor.org/rfc/rfc6243.html)
pub(crate) const WITH_DEFAULTS_NS: &[u8] = b"urn:ietf:params:xml:ns:yang:ietf-netconf-with-defaults";
