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

//! NETCONF message representation in Rust with XML encoding and decoding
//! capabilities.

use crate::{
    capabilities::Capability,
    rpc::NetconfRpc,
    xml_utils::{
        extract_attribute, ParsingError, XmlDeserialize, XmlParser, XmlSerialize, XmlWriter,
    },
    BASE_NS, NC_NOTIFICATIONS_NS, NOTIFICATIONS_NS,
};
use quick_xml::{
    events::{BytesStart, BytesText, Event},
    name::ResolveResult,
    NsReader,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, io, str::FromStr};

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum NetconfMessage {
    Hello(Hello),
    Rpc(Rpc),
    RpcReply(RpcReply),
    Notification(Notification),
}

impl XmlDeserialize<NetconfMessage> for NetconfMessage {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        // Skip XML declaration header if present in the message
        if matches!(parser.peek(), Event::Decl(_)) {
            parser.skip()?;
        }
        parser.skip_text()?;
        match parser.peek() {
            Event::Start(a) => match a.local_name().into_inner() {
                b"hello" => Ok(NetconfMessage::Hello(Hello::xml_deserialize(parser)?)),
                b"rpc" => Ok(NetconfMessage::Rpc(Rpc::xml_deserialize(parser)?)),
                b"rpc-reply" => Ok(NetconfMessage::RpcReply(RpcReply::xml_deserialize(parser)?)),
                b"notification" => Ok(NetconfMessage::Notification(
                    Notification::xml_deserialize(parser)?,
                )),
                _ => Err(ParsingError::InvalidValue(format!(
                    "invalid start value: {}",
                    std::str::from_utf8(a.local_name().into_inner())?
                ))),
            },
            token => Err(ParsingError::WrongToken {
                expecting: "<hello>, <rpc>, <rpc-reply>, or <notification>".to_string(),
                found: token.clone(),
            }),
        }
    }
}

impl XmlSerialize for NetconfMessage {
    fn xml_serialize<T: io::Write>(&self, xml: &mut XmlWriter<T>) -> Result<(), quick_xml::Error> {
        match self {
            NetconfMessage::Hello(hello) => hello.xml_serialize(xml),
            NetconfMessage::Rpc(rpc) => rpc.xml_serialize(xml),
            NetconfMessage::RpcReply(reply) => reply.xml_serialize(xml),
            NetconfMessage::Notification(notif) => notif.xml_serialize(xml),
        }
    }
}

/// ```xml
///  <xs:element name="hello">
///    <xs:complexType>
///      <xs:sequence>
///        <xs:element name="capabilities">
///          <xs:complexType>
///            <xs:sequence>
///              <xs:element name="capability" type="xs:anyURI"
///                          maxOccurs="unbounded"/>
///            </xs:sequence>
///          </xs:complexType>
///        </xs:element>
///        <xs:element name="session-id" type="SessionId"
///                    minOccurs="0"/>
///      </xs:sequence>
///    </xs:complexType>
///  </xs:element>
/// ```
#[derive(PartialEq, Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename = "hello")]
pub struct Hello {
    #[serde(rename = "session-id")]
    session_id: Option<u32>,
    capabilities: HashSet<Capability>,
}

impl Hello {
    pub const fn new(session_id: Option<u32>, capabilities: HashSet<Capability>) -> Self {
        Self {
            session_id,
            capabilities,
        }
    }

    pub const fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub const fn capabilities(&self) -> &HashSet<Capability> {
        &self.capabilities
    }

    pub fn into_capabilities(self) -> HashSet<Capability> {
        self.capabilities
    }
}

impl XmlDeserialize<Hello> for Hello {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<Hello, ParsingError> {
        if matches!(parser.peek(), Event::Decl(_)) {
            parser.skip()?;
        }
        parser.skip_text()?;
        parser.open(Some(BASE_NS), "hello")?;
        parser.skip_text()?;
        parser.open(Some(BASE_NS), "capabilities")?;

        let capabilities = parser.collect_xml_sequence::<Capability>()?;
        parser.close()?;
        let session_id = if parser.maybe_open(Some(BASE_NS), "session-id")?.is_some() {
            let val = parser.tag_string()?.trim().parse::<u32>()?;
            parser.close()?;
            Some(val)
        } else {
            None
        };
        parser.close()?;
        Ok(Hello::new(session_id, HashSet::from_iter(capabilities)))
    }
}

impl XmlSerialize for Hello {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        let hello_start = writer.create_element("hello");
        let capabilities_start = writer.create_element("capabilities");
        writer.write_event(Event::Start(hello_start.clone()))?;
        writer.write_event(Event::Start(capabilities_start.clone()))?;
        for cap in &self.capabilities {
            cap.xml_serialize(writer)?
        }
        writer.write_event(Event::End(capabilities_start.to_end()))?;
        if let Some(session_id) = self.session_id {
            let session_id_start = writer.create_element("session-id");
            writer.write_event(Event::Start(session_id_start.clone()))?;
            writer.write_event(Event::Text(BytesText::new(&session_id.to_string())))?;
            writer.write_event(Event::End(session_id_start.to_end()))?;
        }
        writer.write_event(Event::End(hello_start.to_end()))?;
        Ok(())
    }
}

/// ```xml
/// <xs:simpleType name="messageIdType">
///     <xs:restriction base="xs:string">
///         <xs:maxLength value="4095"/>
///     </xs:restriction>
/// </xs:simpleType>
/// ```
fn extract_message_id(open: &BytesStart<'_>) -> Result<Option<u64>, ParsingError> {
    let msg_id_attr = extract_attribute(open, b"message-id");
    match msg_id_attr {
        None => Ok(None),
        Some(msg_id) => {
            if msg_id.len() > 4095 {
                return Err(ParsingError::InvalidValue(format!(
                    "message-id length: {} is larger than max 4095",
                    msg_id.len()
                )));
            }
            match msg_id.trim().parse::<u64>() {
                Ok(id) => Ok(Some(id)),
                Err(_) => {
                    tracing::warn!("non-numeric message-id attribute `{msg_id}`");
                    Ok(None)
                }
            }
        }
    }
}

/// Arbitrary attributes beyond message-id are ignored
/// ```xml
/// <xs:complexType name="rpcType">
///     <xs:sequence>
///         <xs:element ref="rpcOperation"/>
///     </xs:sequence>
///     <xs:attribute name="message-id" type="messageIdType"
///                   use="required"/>
///     <xs:anyAttribute processContents="lax"/>
/// </xs:complexType>
/// <xs:element name="rpc" type="rpcType"/>
/// ```
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Rpc {
    message_id: u64,
    operation: NetconfRpc,
}

impl Rpc {
    pub const fn new(message_id: u64, operation: NetconfRpc) -> Self {
        Self {
            message_id,
            operation,
        }
    }

    pub const fn message_id(&self) -> u64 {
        self.message_id
    }

    pub const fn operation(&self) -> &NetconfRpc {
        &self.operation
    }
}

impl XmlDeserialize<Rpc> for Rpc {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<Rpc, ParsingError> {
        parser.skip_text()?;
        let open = parser.open(Some(BASE_NS), "rpc")?;
        let message_id = match extract_message_id(
            match &open {
                Event::Start(start) | Event::Empty(start) => start,
                _ => return Err(ParsingError::MissingAttribute("message-id".to_string())),
            },
        )? {
            Some(msg_id) => msg_id,
            None => return Err(ParsingError::MissingAttribute("message-id".to_string())),
        };
        let operation = match NetconfRpc::xml_deserialize(parser) {
            Ok(operation) => operation,
            Err(ParsingError::Recoverable) => {
                let payload = parser.copy_buffer_till(b"rpc")?;
                NetconfRpc::Generic { payload }
            }
            Err(e) => return Err(e),
        };
        parser.close()?;
        Ok(Rpc {
            message_id,
            operation,
        })
    }
}

impl XmlSerialize for Rpc {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        let mut start = writer.create_element("rpc");
        start.push_attribute(("message-id", self.message_id.to_string().as_str()));
        writer.write_event(Event::Start(start.clone()))?;
        self.operation.xml_serialize(writer)?;
        writer.write_event(Event::End(start.to_end()))?;
        Ok(())
    }
}

/// Raw, request-agnostic view of a `<rpc-reply>`. Classification against
/// the originating request happens in [crate::reply].
///
/// ```xml
///   <xs:complexType name="rpcReplyType">
///      <xs:choice>
///        <xs:element name="ok"/>
///        <xs:sequence>
///          <xs:element ref="rpc-error"
///                      minOccurs="0" maxOccurs="unbounded"/>
///          <xs:element ref="rpcResponse"
///                      minOccurs="0" maxOccurs="unbounded"/>
///        </xs:sequence>
///      </xs:choice>
///      <xs:attribute name="message-id" type="messageIdType"
///                    use="optional"/>
///      <xs:anyAttribute processContents="lax"/>
///    </xs:complexType>
///    <xs:element name="rpc-reply" type="rpcReplyType"/>
/// ```
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcReply {
    message_id: Option<u64>,
    content: RpcReplyContent,
}

impl RpcReply {
    pub const fn new(message_id: Option<u64>, content: RpcReplyContent) -> Self {
        Self {
            message_id,
            content,
        }
    }

    pub const fn message_id(&self) -> Option<u64> {
        self.message_id
    }

    pub const fn content(&self) -> &RpcReplyContent {
        &self.content
    }

    pub fn into_content(self) -> RpcReplyContent {
        self.content
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, rename_all = "kebab-case")]
pub enum RpcReplyContent {
    Ok,
    Errors(Vec<RpcError>),
    /// Raw XML of the reply body, kept verbatim until the originating
    /// request selects how to interpret it.
    Data(Box<str>),
}

impl RpcReplyContent {
    pub const fn is_ok(&self) -> bool {
        matches!(self, RpcReplyContent::Ok)
    }

    pub const fn errors(&self) -> Option<&Vec<RpcError>> {
        if let RpcReplyContent::Errors(errors) = self {
            Some(errors)
        } else {
            None
        }
    }
}

impl XmlDeserialize<RpcReply> for RpcReply {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        parser.skip_text()?;
        let rpc_reply = parser.open(Some(BASE_NS), "rpc-reply")?;
        let message_id = match &rpc_reply {
            Event::Start(start) | Event::Empty(start) => extract_message_id(start)?,
            _ => None,
        };
        if parser.maybe_open(Some(BASE_NS), "ok")?.is_some() {
            parser.close()?;
            parser.skip_text()?;
            if !matches!(parser.peek(), Event::End(_)) {
                return Err(ParsingError::InvalidValue(
                    "<rpc-reply> content mismatch: <ok> with trailing siblings".to_string(),
                ));
            }
            parser.close()?;
            return Ok(RpcReply {
                message_id,
                content: RpcReplyContent::Ok,
            });
        }
        let errors: Vec<RpcError> =
            parser.collect_xml_sequence_with_tag(Some(BASE_NS), b"rpc-error")?;
        if !errors.is_empty() {
            parser.skip_text()?;
            if !matches!(parser.peek(), Event::End(_)) {
                return Err(ParsingError::InvalidValue(
                    "<rpc-reply> content mismatch: <rpc-error> mixed with other elements"
                        .to_string(),
                ));
            }
            parser.close()?;
            return Ok(RpcReply {
                message_id,
                content: RpcReplyContent::Errors(errors),
            });
        }
        let raw = parser.copy_buffer_till(b"rpc-reply")?;
        parser.close()?;
        if raw.trim().is_empty() {
            return Err(ParsingError::InvalidValue("an empty <rpc-reply>".to_string()));
        }
        Ok(RpcReply {
            message_id,
            content: RpcReplyContent::Data(raw),
        })
    }
}

impl XmlSerialize for RpcReply {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        let mut start = writer.create_element("rpc-reply");
        if let Some(message_id) = self.message_id {
            start.push_attribute(("message-id", message_id.to_string().as_str()));
        }
        writer.write_event(Event::Start(start.clone()))?;

        match &self.content {
            RpcReplyContent::Ok => {
                let ok_start = writer.create_element("ok");
                writer.write_event(Event::Empty(ok_start))?;
            }
            RpcReplyContent::Errors(errors) => {
                for error in errors {
                    error.xml_serialize(writer)?;
                }
            }
            RpcReplyContent::Data(raw) => {
                writer.write_all(raw.as_bytes())?;
            }
        }

        writer.write_event(Event::End(start.to_end()))?;
        Ok(())
    }
}

/// Structured NETCONF `<rpc-error>` record.
///
/// All fields are optional at the parsing level: unknown child elements
/// and values are logged and ignored, duplicated children are logged and
/// the first occurrence wins. Elements under `<error-info>` living in a
/// foreign namespace are preserved verbatim in `other_info`.
///
/// ```xml
///  <xs:complexType name="rpcErrorType">
///      <xs:sequence>
///          <xs:element name="error-type" type="ErrorType"/>
///          <xs:element name="error-tag" type="ErrorTag"/>
///          <xs:element name="error-severity" type="ErrorSeverity"/>
///          <xs:element name="error-app-tag" type="xs:string"
///                      minOccurs="0"/>
///          <xs:element name="error-path" type="xs:string" minOccurs="0"/>
///          <xs:element name="error-message" minOccurs="0"/>
///          <xs:element name="error-info" type="errorInfoType"
///                      minOccurs="0"/>
///      </xs:sequence>
///  </xs:complexType>
/// ```
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcError {
    error_type: Option<ErrorType>,
    error_tag: Option<ErrorTag>,
    error_severity: Option<ErrorSeverity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_app_tag: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_path: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message_lang: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<Box<str>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    bad_attributes: Vec<Box<str>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    bad_elements: Vec<Box<str>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    bad_namespaces: Vec<Box<str>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    other_info: Vec<Box<str>>,
}

impl RpcError {
    pub const fn error_type(&self) -> Option<ErrorType> {
        self.error_type
    }

    pub const fn error_tag(&self) -> Option<ErrorTag> {
        self.error_tag
    }

    pub const fn error_severity(&self) -> Option<ErrorSeverity> {
        self.error_severity
    }

    pub fn error_app_tag(&self) -> Option<&str> {
        self.error_app_tag.as_deref()
    }

    pub fn error_path(&self) -> Option<&str> {
        self.error_path.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_message_lang(&self) -> Option<&str> {
        self.error_message_lang.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn bad_attributes(&self) -> &[Box<str>] {
        &self.bad_attributes
    }

    pub fn bad_elements(&self) -> &[Box<str>] {
        &self.bad_elements
    }

    pub fn bad_namespaces(&self) -> &[Box<str>] {
        &self.bad_namespaces
    }

    pub fn other_info(&self) -> &[Box<str>] {
        &self.other_info
    }
}

/// Name of the current element if it sits in the given namespace.
fn current_element_local(
    parser: &XmlParser<impl io::BufRead>,
    ns: &[u8],
) -> Option<String> {
    let qname = match parser.peek() {
        Event::Start(bs) | Event::Empty(bs) => bs.name(),
        _ => return None,
    };
    let (extr_ns, local) = parser.ns_reader().resolve_element(qname);
    if extr_ns == ResolveResult::Bound(quick_xml::name::Namespace(ns)) {
        std::str::from_utf8(local.into_inner())
            .ok()
            .map(|s| s.to_string())
    } else {
        None
    }
}

fn read_text_child(
    parser: &mut XmlParser<impl io::BufRead>,
    name: &str,
) -> Result<(Box<str>, Option<Box<str>>), ParsingError> {
    let open = parser.open(Some(BASE_NS), name)?;
    let lang = match &open {
        Event::Start(start) | Event::Empty(start) => extract_attribute(start, b"lang"),
        _ => None,
    };
    let text = if parser.parent_has_child() {
        parser.tag_string()?
    } else {
        "".into()
    };
    parser.close()?;
    Ok((text, lang))
}

macro_rules! set_first {
    ($err:ident . $field:ident, $value:expr, $name:literal) => {
        if $err.$field.is_some() {
            tracing::warn!(concat!("<rpc-error> <", $name, "> duplicated"));
        } else {
            $err.$field = Some($value);
        }
    };
}

impl XmlDeserialize<RpcError> for RpcError {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        let mut err = RpcError::default();
        parser.open(Some(BASE_NS), "rpc-error")?;
        loop {
            parser.skip_text()?;
            if matches!(parser.peek(), Event::End(_)) {
                break;
            }
            if matches!(parser.peek(), Event::Eof) {
                return Err(ParsingError::Eof);
            }
            let local = match current_element_local(parser, BASE_NS) {
                Some(local) => local,
                None => {
                    tracing::warn!("<rpc-error> child without the base namespace, ignoring");
                    parser.skip()?;
                    continue;
                }
            };
            match local.as_str() {
                "error-type" => {
                    let (text, _) = read_text_child(parser, "error-type")?;
                    match ErrorType::from_str(text.trim()) {
                        Ok(value) => set_first!(err.error_type, value, "error-type"),
                        Err(_) => tracing::warn!("<error-type> unknown value `{text}`"),
                    }
                }
                "error-tag" => {
                    let (text, _) = read_text_child(parser, "error-tag")?;
                    match ErrorTag::from_str(text.trim()) {
                        Ok(value) => set_first!(err.error_tag, value, "error-tag"),
                        Err(_) => tracing::warn!("<error-tag> unknown value `{text}`"),
                    }
                }
                "error-severity" => {
                    let (text, _) = read_text_child(parser, "error-severity")?;
                    match ErrorSeverity::from_str(text.trim()) {
                        Ok(value) => set_first!(err.error_severity, value, "error-severity"),
                        Err(_) => tracing::warn!("<error-severity> unknown value `{text}`"),
                    }
                }
                "error-app-tag" => {
                    let (text, _) = read_text_child(parser, "error-app-tag")?;
                    set_first!(err.error_app_tag, text, "error-app-tag");
                }
                "error-path" => {
                    let (text, _) = read_text_child(parser, "error-path")?;
                    set_first!(err.error_path, text, "error-path");
                }
                "error-message" => {
                    let (text, lang) = read_text_child(parser, "error-message")?;
                    if lang.is_none() {
                        tracing::debug!(
                            "<error-message> without the recommended \"xml:lang\" attribute"
                        );
                    }
                    if err.error_message.is_some() {
                        tracing::warn!("<rpc-error> <error-message> duplicated");
                    } else {
                        err.error_message = Some(text);
                        err.error_message_lang = lang;
                    }
                }
                "error-info" => {
                    parser.open(Some(BASE_NS), "error-info")?;
                    loop {
                        parser.skip_text()?;
                        if matches!(parser.peek(), Event::End(_)) {
                            break;
                        }
                        if matches!(parser.peek(), Event::Eof) {
                            return Err(ParsingError::Eof);
                        }
                        match current_element_local(parser, BASE_NS).as_deref() {
                            Some("session-id") => {
                                let (text, _) = read_text_child(parser, "session-id")?;
                                set_first!(err.session_id, text, "session-id");
                            }
                            Some("bad-attribute") => {
                                let (text, _) = read_text_child(parser, "bad-attribute")?;
                                err.bad_attributes.push(text);
                            }
                            Some("bad-element") => {
                                let (text, _) = read_text_child(parser, "bad-element")?;
                                err.bad_elements.push(text);
                            }
                            Some("bad-namespace") => {
                                let (text, _) = read_text_child(parser, "bad-namespace")?;
                                err.bad_namespaces.push(text);
                            }
                            Some(other) => {
                                tracing::warn!("<error-info> unknown child `{other}`, ignoring");
                                parser.skip()?;
                            }
                            None => {
                                // Foreign namespace, keep verbatim
                                err.other_info.push(parser.copy_element()?);
                            }
                        }
                    }
                    parser.close()?;
                }
                other => {
                    tracing::warn!("<rpc-error> unknown child `{other}`, ignoring");
                    parser.skip()?;
                }
            }
        }
        parser.close()?;
        Ok(err)
    }
}

impl XmlSerialize for RpcError {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        let start = writer.create_element("rpc-error");
        writer.write_event(Event::Start(start.clone()))?;

        if let Some(error_type) = self.error_type {
            write_text_element(writer, "error-type", &error_type.to_string())?;
        }
        if let Some(error_tag) = self.error_tag {
            write_text_element(writer, "error-tag", &error_tag.to_string())?;
        }
        if let Some(error_severity) = self.error_severity {
            write_text_element(writer, "error-severity", &error_severity.to_string())?;
        }
        if let Some(app_tag) = &self.error_app_tag {
            write_text_element(writer, "error-app-tag", app_tag)?;
        }
        if let Some(path) = &self.error_path {
            write_text_element(writer, "error-path", path)?;
        }
        if let Some(message) = &self.error_message {
            let mut msg_start = writer.create_element("error-message");
            if let Some(lang) = &self.error_message_lang {
                msg_start.push_attribute(("xml:lang", lang.as_ref()));
            }
            writer.write_event(Event::Start(msg_start.clone()))?;
            writer.write_event(Event::Text(BytesText::new(message)))?;
            writer.write_event(Event::End(msg_start.to_end()))?;
        }

        let has_info = self.session_id.is_some()
            || !self.bad_attributes.is_empty()
            || !self.bad_elements.is_empty()
            || !self.bad_namespaces.is_empty()
            || !self.other_info.is_empty();
        if has_info {
            let info_start = writer.create_element("error-info");
            writer.write_event(Event::Start(info_start.clone()))?;
            if let Some(session_id) = &self.session_id {
                write_text_element(writer, "session-id", session_id)?;
            }
            for attr in &self.bad_attributes {
                write_text_element(writer, "bad-attribute", attr)?;
            }
            for elem in &self.bad_elements {
                write_text_element(writer, "bad-element", elem)?;
            }
            for ns in &self.bad_namespaces {
                write_text_element(writer, "bad-namespace", ns)?;
            }
            for other in &self.other_info {
                writer.write_all(other.as_bytes())?;
            }
            writer.write_event(Event::End(info_start.to_end()))?;
        }

        writer.write_event(Event::End(start.to_end()))?;
        Ok(())
    }
}

pub(crate) fn write_text_element<T: io::Write>(
    writer: &mut XmlWriter<T>,
    name: &str,
    text: &str,
) -> Result<(), quick_xml::Error> {
    let start = writer.create_element(name);
    writer.write_event(Event::Start(start.clone()))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(start.to_end()))?;
    Ok(())
}

/// ```xml
/// <xs:simpleType name="ErrorType">
///     <xs:restriction base="xs:string">
///         <xs:enumeration value="transport"/>
///         <xs:enumeration value="rpc"/>
///         <xs:enumeration value="protocol"/>
///         <xs:enumeration value="application"/>
///     </xs:restriction>
/// </xs:simpleType>
/// ```
#[derive(
    PartialEq,
    Eq,
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    #[strum(serialize = "transport")]
    Transport,
    #[strum(serialize = "rpc")]
    Rpc,
    #[strum(serialize = "protocol")]
    Protocol,
    #[strum(serialize = "application")]
    Application,
}

/// ```xml
/// <xs:simpleType name="ErrorTag">
///     <xs:restriction base="xs:string">
///         <xs:enumeration value="in-use"/>
///         ...
///         <xs:enumeration value="malformed-message"/>
///     </xs:restriction>
/// </xs:simpleType>
/// ```
#[derive(
    PartialEq,
    Eq,
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorTag {
    #[strum(serialize = "in-use")]
    InUse,
    #[strum(serialize = "invalid-value")]
    InvalidValue,
    #[strum(serialize = "too-big")]
    TooBig,
    #[strum(serialize = "missing-attribute")]
    MissingAttribute,
    #[strum(serialize = "bad-attribute")]
    BadAttribute,
    #[strum(serialize = "unknown-attribute")]
    UnknownAttribute,
    #[strum(serialize = "missing-element")]
    MissingElement,
    #[strum(serialize = "bad-element")]
    BadElement,
    #[strum(serialize = "unknown-element")]
    UnknownElement,
    #[strum(serialize = "unknown-namespace")]
    UnknownNamespace,
    #[strum(serialize = "access-denied")]
    AccessDenied,
    #[strum(serialize = "lock-denied")]
    LockDenied,
    #[strum(serialize = "resource-denied")]
    ResourceDenied,
    #[strum(serialize = "rollback-failed")]
    RollbackFailed,
    #[strum(serialize = "data-exists")]
    DataExists,
    #[strum(serialize = "data-missing")]
    DataMissing,
    #[strum(serialize = "operation-not-supported")]
    OperationNotSupported,
    #[strum(serialize = "operation-failed")]
    OperationFailed,
    #[strum(serialize = "partial-operation")]
    PartialOperation,
    #[strum(serialize = "malformed-message")]
    MalformedMessage,
}

/// ```xml
/// <xs:simpleType name="ErrorSeverity">
///     <xs:restriction base="xs:string">
///         <xs:enumeration value="error"/>
///         <xs:enumeration value="warning"/>
///     </xs:restriction>
/// </xs:simpleType>
/// ```
#[derive(
    PartialEq,
    Eq,
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorSeverity {
    #[strum(serialize = "error")]
    Error,
    #[strum(serialize = "warning")]
    Warning,
}

/// Event notification as defined in [RFC 5277](https://www.rfc-editor.org/rfc/rfc5277.html).
///
/// The body is the raw XML of the notification content, with `eventTime`
/// pulled out.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Notification {
    event_time: Box<str>,
    body: Box<str>,
}

impl Notification {
    pub const fn new(event_time: Box<str>, body: Box<str>) -> Self {
        Self { event_time, body }
    }

    pub const fn event_time(&self) -> &str {
        &self.event_time
    }

    pub const fn body(&self) -> &str {
        &self.body
    }

    /// Whether this notification is `nc-notifications:notificationComplete`,
    /// the marker ending a replay subscription stream.
    pub fn is_notification_complete(&self) -> bool {
        let mut reader = NsReader::from_reader(self.body.as_bytes());
        reader.config_mut().trim_text(false);
        let parser = match XmlParser::new(reader) {
            Ok(parser) => parser,
            Err(_) => return false,
        };
        let mut parser = parser;
        if parser.skip_text().is_err() {
            return false;
        }
        parser.is_tag(Some(NC_NOTIFICATIONS_NS), "notificationComplete")
    }
}

impl XmlDeserialize<Notification> for Notification {
    fn xml_deserialize(
        parser: &mut XmlParser<impl io::BufRead>,
    ) -> Result<Notification, ParsingError> {
        parser.skip_text()?;
        parser.open(Some(NOTIFICATIONS_NS), "notification")?;
        let mut event_time: Option<Box<str>> = None;
        let mut body = String::new();
        loop {
            parser.skip_text()?;
            if matches!(parser.peek(), Event::End(_)) {
                break;
            }
            if matches!(parser.peek(), Event::Eof) {
                return Err(ParsingError::Eof);
            }
            if parser.is_tag(Some(NOTIFICATIONS_NS), "eventTime") {
                parser.open(Some(NOTIFICATIONS_NS), "eventTime")?;
                let text = parser.tag_string()?.trim().to_string().into_boxed_str();
                parser.close()?;
                if event_time.is_some() {
                    tracing::warn!("<notification> <eventTime> duplicated");
                } else {
                    event_time = Some(text);
                }
            } else {
                body.push_str(&parser.copy_element()?);
            }
        }
        parser.close()?;
        let event_time = event_time.ok_or_else(|| {
            ParsingError::InvalidValue(
                "notification is missing the \"eventTime\" element".to_string(),
            )
        })?;
        Ok(Notification {
            event_time,
            body: body.into_boxed_str(),
        })
    }
}

impl XmlSerialize for Notification {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        let start = writer.create_element("notification");
        writer.write_event(Event::Start(start.clone()))?;
        write_text_element(writer, "eventTime", &self.event_time)?;
        writer.write_all(self.body.as_bytes())?;
        writer.write_event(Event::End(start.to_end()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capabilities::{BaseVersion, StandardCapability, YangModuleCapability},
        rpc::{Datastore, Filter, NetconfRpc},
        tests::{test_parse_error, test_xml_value},
    };
    use std::str::FromStr;

    #[test]
    fn test_hello() -> Result<(), ParsingError> {
        let input_str = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
    <capabilities>
        <capability>urn:ietf:params:netconf:base:1.1</capability>
        <capability>urn:ietf:params:netconf:capability:startup:1.0</capability>
        <capability>https://example.net/router/2.3/myfeature</capability>
        <capability>urn:example:yang:example-module?module=example-module&amp;revision=2022-12-22</capability>
    </capabilities>
    <session-id>4</session-id>
</hello>"#;
        let expected = Hello::new(
            Some(4),
            HashSet::from([
                Capability::Base(BaseVersion::V1_1),
                Capability::Standard(StandardCapability::Startup),
                Capability::Custom("https://example.net/router/2.3/myfeature".into()),
                Capability::Yang(YangModuleCapability::new(
                    "urn:example:yang:example-module".into(),
                    "example-module".into(),
                    Some(chrono::NaiveDate::from_str("2022-12-22").unwrap()),
                    Box::new([]),
                    Box::new([]),
                )),
            ]),
        );

        test_xml_value(input_str, expected)?;
        Ok(())
    }

    #[test]
    fn test_hello_without_session_id() -> Result<(), ParsingError> {
        let input_str = r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>
      urn:ietf:params:netconf:base:1.1
    </capability>
  </capabilities>
</hello>"#;
        let expected = Hello::new(None, HashSet::from([Capability::Base(BaseVersion::V1_1)]));
        test_xml_value(input_str, expected)?;
        Ok(())
    }

    #[test]
    fn test_rpc_with_typed_operation() -> Result<(), ParsingError> {
        let input_str = r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="101"><lock><target><running/></target></lock></rpc>"#;
        let expected = Rpc::new(
            101,
            NetconfRpc::Lock {
                target: Datastore::Running,
            },
        );
        test_xml_value(input_str, expected)?;
        Ok(())
    }

    #[test]
    fn test_rpc_with_unknown_operation_is_generic() -> Result<(), ParsingError> {
        let input_str = r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="7"><make-tea xmlns="urn:example:tea"><sugar/></make-tea></rpc>"#;
        let mut reader = NsReader::from_str(input_str);
        reader.config_mut().trim_text(false);
        let mut parser = XmlParser::new(reader)?;
        let rpc = Rpc::xml_deserialize(&mut parser)?;
        assert_eq!(rpc.message_id(), 7);
        match rpc.operation() {
            NetconfRpc::Generic { payload } => {
                assert!(payload.contains("make-tea"));
                assert!(payload.contains(r#"xmlns="urn:example:tea""#));
            }
            other => panic!("expected generic operation, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_rpc_requires_message_id() -> Result<(), ParsingError> {
        let input_str = r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><get/></rpc>"#;
        assert!(matches!(
            test_parse_error::<Rpc>(input_str),
            Err(ParsingError::MissingAttribute(_))
        ));
        Ok(())
    }

    #[test]
    fn test_rpc_reply_ok() -> Result<(), ParsingError> {
        let input_str = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="4"><ok/></rpc-reply>"#;
        let expected = RpcReply::new(Some(4), RpcReplyContent::Ok);
        test_xml_value(input_str, expected)?;
        Ok(())
    }

    #[test]
    fn test_rpc_reply_ok_with_sibling_is_error() {
        let input_str = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="4"><ok/><data/></rpc-reply>"#;
        assert!(matches!(
            test_parse_error::<RpcReply>(input_str),
            Err(ParsingError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_rpc_reply_empty_is_error() {
        let input_str = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="4"></rpc-reply>"#;
        assert!(matches!(
            test_parse_error::<RpcReply>(input_str),
            Err(ParsingError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_rpc_reply_without_message_id() -> Result<(), ParsingError> {
        let input_str =
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#;
        let expected = RpcReply::new(None, RpcReplyContent::Ok);
        test_xml_value(input_str, expected)?;
        Ok(())
    }

    #[test]
    fn test_rpc_error_lock_denied() -> Result<(), ParsingError> {
        let input_str = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="3"><rpc-error><error-type>application</error-type><error-tag>lock-denied</error-tag><error-severity>error</error-severity><error-info><session-id>42</session-id></error-info></rpc-error></rpc-reply>"#;
        let mut reader = NsReader::from_str(input_str);
        reader.config_mut().trim_text(false);
        let mut parser = XmlParser::new(reader)?;
        let reply = RpcReply::xml_deserialize(&mut parser)?;
        assert_eq!(reply.message_id(), Some(3));
        let errors = reply.content().errors().expect("expected errors");
        assert_eq!(errors.len(), 1);
        let err = &errors[0];
        assert_eq!(err.error_type(), Some(ErrorType::Application));
        assert_eq!(err.error_tag(), Some(ErrorTag::LockDenied));
        assert_eq!(err.error_severity(), Some(ErrorSeverity::Error));
        assert_eq!(err.session_id(), Some("42"));
        Ok(())
    }

    #[test]
    fn test_rpc_error_duplicate_first_wins_and_foreign_info_kept() -> Result<(), ParsingError> {
        let input_str = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><rpc-error>
            <error-type>protocol</error-type>
            <error-type>application</error-type>
            <error-tag>bad-attribute</error-tag>
            <error-severity>warning</error-severity>
            <error-message xml:lang="en">MTU value 25000 is not within range</error-message>
            <error-info>
                <bad-attribute>message-id</bad-attribute>
                <bad-element>rpc</bad-element>
                <ex:diagnostics xmlns:ex="urn:example:diag">code 7</ex:diagnostics>
            </error-info>
        </rpc-error></rpc-reply>"#;
        let mut reader = NsReader::from_str(input_str);
        reader.config_mut().trim_text(false);
        let mut parser = XmlParser::new(reader)?;
        let reply = RpcReply::xml_deserialize(&mut parser)?;
        let errors = reply.content().errors().expect("expected errors");
        let err = &errors[0];
        assert_eq!(err.error_type(), Some(ErrorType::Protocol));
        assert_eq!(err.error_tag(), Some(ErrorTag::BadAttribute));
        assert_eq!(err.error_severity(), Some(ErrorSeverity::Warning));
        assert_eq!(
            err.error_message(),
            Some("MTU value 25000 is not within range")
        );
        assert_eq!(err.error_message_lang(), Some("en"));
        assert_eq!(err.bad_attributes(), &["message-id".into()]);
        assert_eq!(err.bad_elements(), &["rpc".into()]);
        assert_eq!(err.other_info().len(), 1);
        assert!(err.other_info()[0].contains("code 7"));
        Ok(())
    }

    #[test]
    fn test_rpc_reply_mixed_error_and_data_is_error() {
        let input_str = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><rpc-error><error-type>rpc</error-type><error-tag>too-big</error-tag><error-severity>error</error-severity></rpc-error><data/></rpc-reply>"#;
        assert!(matches!(
            test_parse_error::<RpcReply>(input_str),
            Err(ParsingError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_rpc_reply_data_raw() -> Result<(), ParsingError> {
        let input_str = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="12"><data><top xmlns="urn:example:top"><name>vnf1</name></top></data></rpc-reply>"#;
        let mut reader = NsReader::from_str(input_str);
        reader.config_mut().trim_text(false);
        let mut parser = XmlParser::new(reader)?;
        let reply = RpcReply::xml_deserialize(&mut parser)?;
        assert_eq!(reply.message_id(), Some(12));
        match reply.content() {
            RpcReplyContent::Data(raw) => {
                assert!(raw.starts_with("<data"));
                assert!(raw.contains("vnf1"));
            }
            other => panic!("expected data content, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_error_type_values() -> Result<(), ParsingError> {
        for (text, expected) in [
            ("transport", ErrorType::Transport),
            ("rpc", ErrorType::Rpc),
            ("protocol", ErrorType::Protocol),
            ("application", ErrorType::Application),
        ] {
            assert_eq!(ErrorType::from_str(text), Ok(expected));
            assert_eq!(expected.to_string(), text);
        }
        assert!(ErrorType::from_str("protocol1").is_err());
        Ok(())
    }

    #[test]
    fn test_error_tag_values() {
        for (text, expected) in [
            ("in-use", ErrorTag::InUse),
            ("invalid-value", ErrorTag::InvalidValue),
            ("too-big", ErrorTag::TooBig),
            ("missing-attribute", ErrorTag::MissingAttribute),
            ("bad-attribute", ErrorTag::BadAttribute),
            ("unknown-attribute", ErrorTag::UnknownAttribute),
            ("missing-element", ErrorTag::MissingElement),
            ("bad-element", ErrorTag::BadElement),
            ("unknown-element", ErrorTag::UnknownElement),
            ("unknown-namespace", ErrorTag::UnknownNamespace),
            ("access-denied", ErrorTag::AccessDenied),
            ("lock-denied", ErrorTag::LockDenied),
            ("resource-denied", ErrorTag::ResourceDenied),
            ("rollback-failed", ErrorTag::RollbackFailed),
            ("data-exists", ErrorTag::DataExists),
            ("data-missing", ErrorTag::DataMissing),
            ("operation-not-supported", ErrorTag::OperationNotSupported),
            ("operation-failed", ErrorTag::OperationFailed),
            ("partial-operation", ErrorTag::PartialOperation),
            ("malformed-message", ErrorTag::MalformedMessage),
        ] {
            assert_eq!(ErrorTag::from_str(text), Ok(expected));
            assert_eq!(expected.to_string(), text);
        }
        assert!(ErrorTag::from_str("not valid").is_err());
    }

    #[test]
    fn test_notification_parse() -> Result<(), ParsingError> {
        let input_str = r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><eventTime>2025-03-01T00:01:00Z</eventTime><link-down xmlns="urn:example:events"><if>eth0</if></link-down></notification>"#;
        let mut reader = NsReader::from_str(input_str);
        reader.config_mut().trim_text(false);
        let mut parser = XmlParser::new(reader)?;
        let notif = Notification::xml_deserialize(&mut parser)?;
        assert_eq!(notif.event_time(), "2025-03-01T00:01:00Z");
        assert!(notif.body().contains("link-down"));
        assert!(!notif.is_notification_complete());
        Ok(())
    }

    #[test]
    fn test_notification_missing_event_time_is_error() {
        let input_str = r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><link-down xmlns="urn:example:events"/></notification>"#;
        let mut reader = NsReader::from_str(input_str);
        reader.config_mut().trim_text(false);
        let mut parser = XmlParser::new(reader).unwrap();
        let result = Notification::xml_deserialize(&mut parser);
        assert!(matches!(result, Err(ParsingError::InvalidValue(_))));
    }

    #[test]
    fn test_notification_complete_detection() -> Result<(), ParsingError> {
        let input_str = r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><eventTime>2025-03-01T00:01:00Z</eventTime><notificationComplete xmlns="urn:ietf:params:xml:ns:netmod:notification"/></notification>"#;
        let mut reader = NsReader::from_str(input_str);
        reader.config_mut().trim_text(false);
        let mut parser = XmlParser::new(reader)?;
        let notif = Notification::xml_deserialize(&mut parser)?;
        assert!(notif.is_notification_complete());
        Ok(())
    }

    #[test]
    fn test_rpc_error_serialize_round_trip() -> Result<(), ParsingError> {
        let input_str = r#"<rpc-error xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><error-type>application</error-type><error-tag>lock-denied</error-tag><error-severity>error</error-severity><error-info><session-id>42</session-id></error-info></rpc-error>"#;
        let expected = RpcError {
            error_type: Some(ErrorType::Application),
            error_tag: Some(ErrorTag::LockDenied),
            error_severity: Some(ErrorSeverity::Error),
            session_id: Some("42".into()),
            ..Default::default()
        };
        test_xml_value(input_str, expected)?;
        Ok(())
    }
}
