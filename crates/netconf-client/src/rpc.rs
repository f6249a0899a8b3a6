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

//! Typed NETCONF RPC operations and their XML builders.
//!
//! Every operation defined by [RFC 6241](https://www.rfc-editor.org/rfc/rfc6241.html),
//! plus `<get-schema>` ([RFC 6022](https://www.rfc-editor.org/rfc/rfc6022.html))
//! and `<create-subscription>` ([RFC 5277](https://www.rfc-editor.org/rfc/rfc5277.html)),
//! is a variant of [NetconfRpc]. Each variant declares which modules must
//! be present in the schema context and what shape of reply it produces.

use crate::{
    schema::{SchemaContext, SchemaError},
    xml_utils::{
        extract_attribute, ParsingError, XmlDeserialize, XmlParser, XmlSerialize, XmlWriter,
    },
    BASE_NS, MONITORING_NS, NOTIFICATIONS_NS, WITH_DEFAULTS_NS,
};
use indexmap::IndexMap;
use quick_xml::events::{BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};
use std::{io, str::FromStr};

/// A named configuration datastore.
#[derive(
    Eq,
    PartialEq,
    Debug,
    Copy,
    Clone,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum Datastore {
    #[strum(serialize = "running")]
    Running,

    #[strum(serialize = "startup")]
    Startup,

    #[strum(serialize = "candidate")]
    Candidate,
}

/// Source of configuration data for `<copy-config>` and `<validate>`.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum ConfigSource {
    Datastore(Datastore),

    /// Inline YANG XML config
    Config(Box<str>),

    /// URL pointing at config content
    Url(Box<str>),
}

/// Target of `<copy-config>` and `<delete-config>`.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum ConfigTarget {
    Datastore(Datastore),
    Url(Box<str>),
}

/// The content for the `<edit-config>` operation: inline config when the
/// value starts with `<`, a URL otherwise.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum EditContent {
    Config(Box<str>),
    Url(Box<str>),
}

impl From<&str> for EditContent {
    fn from(value: &str) -> Self {
        if value.starts_with('<') {
            EditContent::Config(value.into())
        } else {
            EditContent::Url(value.into())
        }
    }
}

/// Subtree or XPath filter for `<get>`, `<get-config>` and
/// `<create-subscription>`. A value whose first character is `<` is
/// subtree XML, anything else is an XPath expression.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    Subtree(Box<str>),
    XPath(Box<str>),
}

impl From<&str> for Filter {
    fn from(value: &str) -> Self {
        if value.starts_with('<') {
            Filter::Subtree(value.into())
        } else {
            Filter::XPath(value.into())
        }
    }
}

impl Filter {
    fn xml_deserialize_ns(
        parser: &mut XmlParser<impl io::BufRead>,
        ns: &[u8],
    ) -> Result<Self, ParsingError> {
        parser.skip_text()?;
        let filter_start = parser.open(Some(ns), "filter")?;
        let start = match &filter_start {
            Event::Start(start) | Event::Empty(start) => start,
            _ => {
                return Err(ParsingError::WrongToken {
                    expecting: "<filter>".into(),
                    found: filter_start.clone(),
                })
            }
        };
        let filter_type = extract_attribute(start, b"type").unwrap_or("subtree".into());
        let filter = match filter_type.as_ref() {
            "subtree" => {
                let value = if parser.parent_has_child() {
                    parser.copy_buffer_till(b"filter")?
                } else {
                    "".into()
                };
                Filter::Subtree(value)
            }
            "xpath" => {
                let select = extract_attribute(start, b"select")
                    .ok_or(ParsingError::MissingAttribute("select".into()))?;
                Filter::XPath(select)
            }
            _ => {
                return Err(ParsingError::InvalidValue(format!(
                    "not supported filter type `{filter_type}`, only subtree and xpath are supported"
                )));
            }
        };
        parser.close()?;
        Ok(filter)
    }
}

impl XmlDeserialize<Filter> for Filter {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        Filter::xml_deserialize_ns(parser, BASE_NS)
    }
}

impl XmlSerialize for Filter {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        let mut start = writer.create_element("filter");
        match self {
            Filter::Subtree(value) => {
                start.push_attribute(("type", "subtree"));
                writer.write_event(Event::Start(start.clone()))?;
                writer.write_all(value.as_bytes())?;
            }
            Filter::XPath(value) => {
                start.push_attribute(("type", "xpath"));
                start.push_attribute(("select", value.as_ref()));
                writer.write_event(Event::Start(start.clone()))?;
            }
        }
        writer.write_event(Event::End(start.to_end()))?;
        Ok(())
    }
}

/// With-defaults retrieval mode from [RFC 6243](https://www.rfc-editor.org/rfc/rfc6243.html).
#[derive(
    Eq,
    PartialEq,
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum WithDefaultsMode {
    #[strum(serialize = "report-all")]
    ReportAll,

    #[strum(serialize = "report-all-tagged")]
    ReportAllTagged,

    #[strum(serialize = "trim")]
    Trim,

    #[strum(serialize = "explicit")]
    Explicit,
}

/// The default operation to use for the `<edit-config>` RPC.
#[derive(
    Eq,
    PartialEq,
    Default,
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum DefaultOperation {
    /// The configuration data in the `<config>` parameter is merged with
    /// the configuration at the corresponding level in the target
    /// datastore.
    #[default]
    #[strum(serialize = "merge")]
    Merge,

    /// The configuration data in the `<config>` parameter completely
    /// replaces the configuration in the target datastore.
    #[strum(serialize = "replace")]
    Replace,

    /// The target datastore is unaffected by the configuration in the
    /// `<config>` parameter, unless and until the incoming configuration
    /// data uses the "operation" attribute to request a different
    /// operation.
    #[strum(serialize = "none")]
    None,
}

/// Validation options for the `<edit-config>` RPC.
#[derive(
    Eq,
    PartialEq,
    Default,
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum TestOption {
    #[default]
    #[strum(serialize = "test-then-set")]
    TestThenSet,

    #[strum(serialize = "set")]
    Set,

    #[strum(serialize = "test-only")]
    TestOnly,
}

#[derive(
    Eq,
    PartialEq,
    Default,
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum ErrorOption {
    #[default]
    #[strum(serialize = "stop-on-error")]
    StopOnError,

    #[strum(serialize = "continue-on-error")]
    ContinueOnError,

    #[strum(serialize = "rollback-on-error")]
    RollbackOnError,
}

/// Schema representation format for `<get-schema>`.
#[derive(
    Eq,
    PartialEq,
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum SchemaFormat {
    #[strum(serialize = "xsd")]
    Xsd,

    #[strum(serialize = "yang")]
    Yang,

    #[strum(serialize = "yin")]
    Yin,

    #[strum(serialize = "rng")]
    Rng,

    #[strum(serialize = "rnc")]
    Rnc,
}

/// Shape of the reply an operation produces, selecting the classification
/// path in [crate::reply].
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub enum ReplyShape {
    /// The operation defines no output, a data reply is a protocol error.
    NoOutput,

    /// `<data>` element in the base namespace (`<get>`, `<get-config>`).
    Data,

    /// `<data>` element in the monitoring namespace carrying schema text.
    SchemaText,

    /// The request payload decides (generic operations).
    FromRequest,
}

/// A client NETCONF request as a tagged variant per operation.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum NetconfRpc {
    /// Free-form operation carried verbatim inside `<rpc>`.
    Generic { payload: Box<str> },

    GetConfig {
        source: Datastore,
        filter: Option<Filter>,
        with_defaults: Option<WithDefaultsMode>,
    },

    Get {
        filter: Option<Filter>,
        with_defaults: Option<WithDefaultsMode>,
    },

    EditConfig {
        target: Datastore,
        default_operation: Option<DefaultOperation>,
        test_option: Option<TestOption>,
        error_option: Option<ErrorOption>,
        edit_content: EditContent,
    },

    Copy {
        target: ConfigTarget,
        source: ConfigSource,
        with_defaults: Option<WithDefaultsMode>,
    },

    Delete {
        target: ConfigTarget,
    },

    Lock {
        target: Datastore,
    },

    Unlock {
        target: Datastore,
    },

    Kill {
        session_id: u32,
    },

    Commit {
        confirmed: bool,
        confirm_timeout: Option<u32>,
        persist: Option<Box<str>>,
        persist_id: Option<Box<str>>,
    },

    Discard,

    Cancel {
        persist_id: Option<Box<str>>,
    },

    Validate {
        source: ConfigSource,
    },

    GetSchema {
        identifier: Box<str>,
        version: Option<Box<str>>,
        format: Option<SchemaFormat>,
    },

    Subscribe {
        stream: Option<Box<str>>,
        filter: Option<Filter>,
        start_time: Option<Box<str>>,
        stop_time: Option<Box<str>>,
    },
}

impl NetconfRpc {
    /// The operation element name, for diagnostics.
    pub const fn operation_name(&self) -> &'static str {
        match self {
            NetconfRpc::Generic { .. } => "generic",
            NetconfRpc::GetConfig { .. } => "get-config",
            NetconfRpc::Get { .. } => "get",
            NetconfRpc::EditConfig { .. } => "edit-config",
            NetconfRpc::Copy { .. } => "copy-config",
            NetconfRpc::Delete { .. } => "delete-config",
            NetconfRpc::Lock { .. } => "lock",
            NetconfRpc::Unlock { .. } => "unlock",
            NetconfRpc::Kill { .. } => "kill-session",
            NetconfRpc::Commit { .. } => "commit",
            NetconfRpc::Discard => "discard-changes",
            NetconfRpc::Cancel { .. } => "cancel-commit",
            NetconfRpc::Validate { .. } => "validate",
            NetconfRpc::GetSchema { .. } => "get-schema",
            NetconfRpc::Subscribe { .. } => "create-subscription",
        }
    }

    /// The module the operation is defined in. Generic payloads carry
    /// their own namespace and need no lookup.
    pub const fn required_module(&self) -> Option<&'static str> {
        match self {
            NetconfRpc::Generic { .. } => None,
            NetconfRpc::GetSchema { .. } => Some("ietf-netconf-monitoring"),
            NetconfRpc::Subscribe { .. } => Some("notifications"),
            _ => Some("ietf-netconf"),
        }
    }

    const fn with_defaults(&self) -> Option<WithDefaultsMode> {
        match self {
            NetconfRpc::GetConfig { with_defaults, .. }
            | NetconfRpc::Get { with_defaults, .. }
            | NetconfRpc::Copy { with_defaults, .. } => *with_defaults,
            _ => None,
        }
    }

    pub const fn reply_shape(&self) -> ReplyShape {
        match self {
            NetconfRpc::Generic { .. } => ReplyShape::FromRequest,
            NetconfRpc::GetConfig { .. } | NetconfRpc::Get { .. } => ReplyShape::Data,
            NetconfRpc::GetSchema { .. } => ReplyShape::SchemaText,
            _ => ReplyShape::NoOutput,
        }
    }

    /// Strict validation of the operation against the schema context:
    /// every module the serialized tree will reference must be loaded, and
    /// variant invariants must hold.
    pub fn validate(&self, ctx: &SchemaContext) -> Result<(), SchemaError> {
        if let Some(module) = self.required_module() {
            if !ctx.has_module(module) {
                return Err(SchemaError::ModuleNotFound {
                    module: module.to_string(),
                });
            }
        }
        if self.with_defaults().is_some() && !ctx.has_module("ietf-netconf-with-defaults") {
            return Err(SchemaError::ModuleNotFound {
                module: "ietf-netconf-with-defaults".to_string(),
            });
        }
        match self {
            NetconfRpc::Generic { payload } => {
                if payload.trim().is_empty() {
                    return Err(SchemaError::Validation(
                        "generic operation with an empty payload".to_string(),
                    ));
                }
            }
            NetconfRpc::Kill { session_id } => {
                if *session_id == 0 {
                    return Err(SchemaError::Validation(
                        "kill-session requires a non-zero session-id".to_string(),
                    ));
                }
            }
            NetconfRpc::Commit {
                confirmed,
                confirm_timeout,
                persist,
                persist_id,
            } => {
                if persist.is_some() && persist_id.is_some() {
                    return Err(SchemaError::Validation(
                        "commit cannot carry both persist and persist-id".to_string(),
                    ));
                }
                if !confirmed && (confirm_timeout.is_some() || persist.is_some()) {
                    return Err(SchemaError::Validation(
                        "confirm-timeout and persist require a confirmed commit".to_string(),
                    ));
                }
            }
            NetconfRpc::GetSchema { identifier, .. } => {
                if identifier.trim().is_empty() {
                    return Err(SchemaError::Validation(
                        "get-schema requires a non-empty identifier".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn write_datastore<T: io::Write>(
    writer: &mut XmlWriter<T>,
    ds: Datastore,
) -> Result<(), quick_xml::Error> {
    Ok(writer.write_event(Event::Empty(BytesStart::new(ds.to_string())))?)
}

fn serialize_source_datastore<T: io::Write>(
    writer: &mut XmlWriter<T>,
    ds: Datastore,
) -> Result<(), quick_xml::Error> {
    let start = writer.create_element("source");
    writer.write_event(Event::Start(start.clone()))?;
    write_datastore(writer, ds)?;
    writer.write_event(Event::End(start.to_end()))?;
    Ok(())
}

fn serialize_target_datastore<T: io::Write>(
    writer: &mut XmlWriter<T>,
    ds: Datastore,
) -> Result<(), quick_xml::Error> {
    let start = writer.create_element("target");
    writer.write_event(Event::Start(start.clone()))?;
    write_datastore(writer, ds)?;
    writer.write_event(Event::End(start.to_end()))?;
    Ok(())
}

impl XmlSerialize for ConfigSource {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        let start = writer.create_element("source");
        writer.write_event(Event::Start(start.clone()))?;
        match self {
            ConfigSource::Datastore(ds) => write_datastore(writer, *ds)?,
            ConfigSource::Config(config) => {
                let config_start = writer.create_element("config");
                writer.write_event(Event::Start(config_start.clone()))?;
                writer.write_all(config.as_bytes())?;
                writer.write_event(Event::End(config_start.to_end()))?;
            }
            ConfigSource::Url(url) => {
                crate::protocol::write_text_element(writer, "url", url)?;
            }
        }
        writer.write_event(Event::End(start.to_end()))?;
        Ok(())
    }
}

impl XmlSerialize for ConfigTarget {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        let start = writer.create_element("target");
        writer.write_event(Event::Start(start.clone()))?;
        match self {
            ConfigTarget::Datastore(ds) => write_datastore(writer, *ds)?,
            ConfigTarget::Url(url) => {
                crate::protocol::write_text_element(writer, "url", url)?;
            }
        }
        writer.write_event(Event::End(start.to_end()))?;
        Ok(())
    }
}

fn serialize_with_defaults<T: io::Write>(
    writer: &mut XmlWriter<T>,
    mode: WithDefaultsMode,
) -> Result<(), quick_xml::Error> {
    let mut ns_added = false;
    if writer.get_namespace_prefix(WITH_DEFAULTS_NS).is_none() {
        ns_added = true;
        writer.push_namespace_binding(IndexMap::from([(WITH_DEFAULTS_NS, "".to_string())]));
    }
    let start = writer.create_ns_element(WITH_DEFAULTS_NS, "with-defaults")?;
    writer.write_event(Event::Start(start.clone()))?;
    writer.write_event(Event::Text(BytesText::new(&mode.to_string())))?;
    writer.write_event(Event::End(start.to_end()))?;
    if ns_added {
        writer.pop_namespace_binding();
    }
    Ok(())
}

impl XmlSerialize for NetconfRpc {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        match self {
            NetconfRpc::Generic { payload } => {
                writer.write_all(payload.as_bytes())?;
            }
            NetconfRpc::GetConfig {
                source,
                filter,
                with_defaults,
            } => {
                let start = writer.create_element("get-config");
                writer.write_event(Event::Start(start.clone()))?;
                serialize_source_datastore(writer, *source)?;
                if let Some(filter) = filter {
                    filter.xml_serialize(writer)?;
                }
                if let Some(mode) = with_defaults {
                    serialize_with_defaults(writer, *mode)?;
                }
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::Get {
                filter,
                with_defaults,
            } => {
                let start = writer.create_element("get");
                writer.write_event(Event::Start(start.clone()))?;
                if let Some(filter) = filter {
                    filter.xml_serialize(writer)?;
                }
                if let Some(mode) = with_defaults {
                    serialize_with_defaults(writer, *mode)?;
                }
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::EditConfig {
                target,
                default_operation,
                test_option,
                error_option,
                edit_content,
            } => {
                let start = writer.create_element("edit-config");
                writer.write_event(Event::Start(start.clone()))?;
                serialize_target_datastore(writer, *target)?;
                if let Some(default_operation) = default_operation {
                    crate::protocol::write_text_element(
                        writer,
                        "default-operation",
                        &default_operation.to_string(),
                    )?;
                }
                if let Some(test_option) = test_option {
                    crate::protocol::write_text_element(
                        writer,
                        "test-option",
                        &test_option.to_string(),
                    )?;
                }
                if let Some(error_option) = error_option {
                    crate::protocol::write_text_element(
                        writer,
                        "error-option",
                        &error_option.to_string(),
                    )?;
                }
                match edit_content {
                    EditContent::Config(config) => {
                        let config_start = writer.create_element("config");
                        writer.write_event(Event::Start(config_start.clone()))?;
                        writer.write_all(config.as_bytes())?;
                        writer.write_event(Event::End(config_start.to_end()))?;
                    }
                    EditContent::Url(url) => {
                        crate::protocol::write_text_element(writer, "url", url)?;
                    }
                }
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::Copy {
                target,
                source,
                with_defaults,
            } => {
                let start = writer.create_element("copy-config");
                writer.write_event(Event::Start(start.clone()))?;
                target.xml_serialize(writer)?;
                source.xml_serialize(writer)?;
                if let Some(mode) = with_defaults {
                    serialize_with_defaults(writer, *mode)?;
                }
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::Delete { target } => {
                let start = writer.create_element("delete-config");
                writer.write_event(Event::Start(start.clone()))?;
                target.xml_serialize(writer)?;
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::Lock { target } => {
                let start = writer.create_element("lock");
                writer.write_event(Event::Start(start.clone()))?;
                serialize_target_datastore(writer, *target)?;
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::Unlock { target } => {
                let start = writer.create_element("unlock");
                writer.write_event(Event::Start(start.clone()))?;
                serialize_target_datastore(writer, *target)?;
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::Kill { session_id } => {
                let start = writer.create_element("kill-session");
                writer.write_event(Event::Start(start.clone()))?;
                crate::protocol::write_text_element(
                    writer,
                    "session-id",
                    &session_id.to_string(),
                )?;
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::Commit {
                confirmed,
                confirm_timeout,
                persist,
                persist_id,
            } => {
                let start = writer.create_element("commit");
                writer.write_event(Event::Start(start.clone()))?;
                if *confirmed {
                    writer.write_event(Event::Empty(BytesStart::new("confirmed")))?;
                }
                if let Some(timeout) = confirm_timeout {
                    crate::protocol::write_text_element(
                        writer,
                        "confirm-timeout",
                        &timeout.to_string(),
                    )?;
                }
                if let Some(persist) = persist {
                    crate::protocol::write_text_element(writer, "persist", persist)?;
                }
                if let Some(persist_id) = persist_id {
                    crate::protocol::write_text_element(writer, "persist-id", persist_id)?;
                }
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::Discard => {
                let start = writer.create_element("discard-changes");
                writer.write_event(Event::Empty(start))?;
            }
            NetconfRpc::Cancel { persist_id } => {
                let start = writer.create_element("cancel-commit");
                writer.write_event(Event::Start(start.clone()))?;
                if let Some(persist_id) = persist_id {
                    crate::protocol::write_text_element(writer, "persist-id", persist_id)?;
                }
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::Validate { source } => {
                let start = writer.create_element("validate");
                writer.write_event(Event::Start(start.clone()))?;
                source.xml_serialize(writer)?;
                writer.write_event(Event::End(start.to_end()))?;
            }
            NetconfRpc::GetSchema {
                identifier,
                version,
                format,
            } => {
                let mut ns_added = false;
                if writer.get_namespace_prefix(MONITORING_NS).is_none() {
                    ns_added = true;
                    writer.push_namespace_binding(IndexMap::from([(
                        MONITORING_NS,
                        "".to_string(),
                    )]));
                }
                let start = writer.create_ns_element(MONITORING_NS, "get-schema")?;
                writer.write_event(Event::Start(start.clone()))?;

                let identifier_start = writer.create_ns_element(MONITORING_NS, "identifier")?;
                writer.write_event(Event::Start(identifier_start.clone()))?;
                writer.write_event(Event::Text(BytesText::new(identifier)))?;
                writer.write_event(Event::End(identifier_start.to_end()))?;

                if let Some(version) = version {
                    let version_start = writer.create_ns_element(MONITORING_NS, "version")?;
                    writer.write_event(Event::Start(version_start.clone()))?;
                    writer.write_event(Event::Text(BytesText::new(version)))?;
                    writer.write_event(Event::End(version_start.to_end()))?;
                }

                if let Some(format) = format {
                    let format_start = writer.create_ns_element(MONITORING_NS, "format")?;
                    writer.write_event(Event::Start(format_start.clone()))?;
                    writer.write_event(Event::Text(BytesText::new(&format.to_string())))?;
                    writer.write_event(Event::End(format_start.to_end()))?;
                }
                writer.write_event(Event::End(start.to_end()))?;
                if ns_added {
                    writer.pop_namespace_binding();
                }
            }
            NetconfRpc::Subscribe {
                stream,
                filter,
                start_time,
                stop_time,
            } => {
                let mut ns_added = false;
                if writer.get_namespace_prefix(NOTIFICATIONS_NS).is_none() {
                    ns_added = true;
                    writer.push_namespace_binding(IndexMap::from([(
                        NOTIFICATIONS_NS,
                        "".to_string(),
                    )]));
                }
                let start = writer.create_ns_element(NOTIFICATIONS_NS, "create-subscription")?;
                writer.write_event(Event::Start(start.clone()))?;
                if let Some(stream) = stream {
                    let stream_start = writer.create_ns_element(NOTIFICATIONS_NS, "stream")?;
                    writer.write_event(Event::Start(stream_start.clone()))?;
                    writer.write_event(Event::Text(BytesText::new(stream)))?;
                    writer.write_event(Event::End(stream_start.to_end()))?;
                }
                if let Some(filter) = filter {
                    filter.xml_serialize(writer)?;
                }
                if let Some(start_time) = start_time {
                    let time_start = writer.create_ns_element(NOTIFICATIONS_NS, "startTime")?;
                    writer.write_event(Event::Start(time_start.clone()))?;
                    writer.write_event(Event::Text(BytesText::new(start_time)))?;
                    writer.write_event(Event::End(time_start.to_end()))?;
                }
                if let Some(stop_time) = stop_time {
                    let time_start = writer.create_ns_element(NOTIFICATIONS_NS, "stopTime")?;
                    writer.write_event(Event::Start(time_start.clone()))?;
                    writer.write_event(Event::Text(BytesText::new(stop_time)))?;
                    writer.write_event(Event::End(time_start.to_end()))?;
                }
                writer.write_event(Event::End(start.to_end()))?;
                if ns_added {
                    writer.pop_namespace_binding();
                }
            }
        }
        Ok(())
    }
}

fn deserialize_datastore_in(
    parser: &mut XmlParser<impl io::BufRead>,
    wrapper: &str,
) -> Result<Datastore, ParsingError> {
    parser.skip_text()?;
    parser.open(Some(BASE_NS), wrapper)?;
    let ds = if parser.maybe_open(Some(BASE_NS), "candidate")?.is_some() {
        Datastore::Candidate
    } else if parser.maybe_open(Some(BASE_NS), "running")?.is_some() {
        Datastore::Running
    } else if parser.maybe_open(Some(BASE_NS), "startup")?.is_some() {
        Datastore::Startup
    } else {
        return Err(ParsingError::WrongToken {
            expecting: "<candidate/>, <running/>, <startup/>".into(),
            found: parser.peek().clone(),
        });
    };
    // close the datastore leaf
    parser.close()?;
    // close the wrapper
    parser.close()?;
    Ok(ds)
}

impl XmlDeserialize<ConfigSource> for ConfigSource {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        parser.skip_text()?;
        parser.open(Some(BASE_NS), "source")?;
        let value = if parser.maybe_open(Some(BASE_NS), "candidate")?.is_some() {
            parser.close()?;
            ConfigSource::Datastore(Datastore::Candidate)
        } else if parser.maybe_open(Some(BASE_NS), "running")?.is_some() {
            parser.close()?;
            ConfigSource::Datastore(Datastore::Running)
        } else if parser.maybe_open(Some(BASE_NS), "startup")?.is_some() {
            parser.close()?;
            ConfigSource::Datastore(Datastore::Startup)
        } else if parser.maybe_open(Some(BASE_NS), "url")?.is_some() {
            let url = parser.tag_string()?;
            parser.close()?;
            ConfigSource::Url(url)
        } else if parser.maybe_open(Some(BASE_NS), "config")?.is_some() {
            let config = if parser.parent_has_child() {
                parser.copy_buffer_till(b"config")?
            } else {
                "".into()
            };
            parser.close()?;
            ConfigSource::Config(config)
        } else {
            return Err(ParsingError::WrongToken {
                expecting: "<candidate/>, <running/>, <startup/>, <url>, or <config>".into(),
                found: parser.peek().clone(),
            });
        };
        parser.close()?;
        Ok(value)
    }
}

impl XmlDeserialize<ConfigTarget> for ConfigTarget {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        parser.skip_text()?;
        parser.open(Some(BASE_NS), "target")?;
        let value = if parser.maybe_open(Some(BASE_NS), "candidate")?.is_some() {
            parser.close()?;
            ConfigTarget::Datastore(Datastore::Candidate)
        } else if parser.maybe_open(Some(BASE_NS), "running")?.is_some() {
            parser.close()?;
            ConfigTarget::Datastore(Datastore::Running)
        } else if parser.maybe_open(Some(BASE_NS), "startup")?.is_some() {
            parser.close()?;
            ConfigTarget::Datastore(Datastore::Startup)
        } else if parser.maybe_open(Some(BASE_NS), "url")?.is_some() {
            let url = parser.tag_string()?;
            parser.close()?;
            ConfigTarget::Url(url)
        } else {
            return Err(ParsingError::WrongToken {
                expecting: "<candidate/>, <running/>, <startup/>, or <url>".into(),
                found: parser.peek().clone(),
            });
        };
        parser.close()?;
        Ok(value)
    }
}

fn maybe_filter(
    parser: &mut XmlParser<impl io::BufRead>,
    ns: &[u8],
) -> Result<Option<Filter>, ParsingError> {
    parser.skip_text()?;
    if parser.is_tag(Some(ns), "filter") {
        Ok(Some(Filter::xml_deserialize_ns(parser, ns)?))
    } else {
        Ok(None)
    }
}

fn maybe_with_defaults(
    parser: &mut XmlParser<impl io::BufRead>,
) -> Result<Option<WithDefaultsMode>, ParsingError> {
    if parser
        .maybe_open(Some(WITH_DEFAULTS_NS), "with-defaults")?
        .is_some()
    {
        let text = parser.tag_string()?;
        parser.close()?;
        let mode = WithDefaultsMode::from_str(text.trim()).map_err(|_| {
            ParsingError::InvalidValue(format!("unknown with-defaults mode `{text}`"))
        })?;
        Ok(Some(mode))
    } else {
        Ok(None)
    }
}

fn maybe_text_child(
    parser: &mut XmlParser<impl io::BufRead>,
    ns: &[u8],
    name: &str,
) -> Result<Option<Box<str>>, ParsingError> {
    if parser.maybe_open(Some(ns), name)?.is_some() {
        let text = parser.tag_string()?.trim().to_string().into_boxed_str();
        parser.close()?;
        Ok(Some(text))
    } else {
        Ok(None)
    }
}

impl NetconfRpc {
    fn parse_get_config(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        let source = deserialize_datastore_in(parser, "source")?;
        let filter = maybe_filter(parser, BASE_NS)?;
        let with_defaults = maybe_with_defaults(parser)?;
        parser.close()?;
        Ok(NetconfRpc::GetConfig {
            source,
            filter,
            with_defaults,
        })
    }

    fn parse_get(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        let filter = maybe_filter(parser, BASE_NS)?;
        let with_defaults = maybe_with_defaults(parser)?;
        parser.close()?;
        Ok(NetconfRpc::Get {
            filter,
            with_defaults,
        })
    }

    fn parse_edit_config(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        let target = deserialize_datastore_in(parser, "target")?;
        let default_operation =
            match maybe_text_child(parser, BASE_NS, "default-operation")? {
                Some(text) => Some(DefaultOperation::from_str(&text).map_err(|_| {
                    ParsingError::InvalidValue(format!("unknown default-operation `{text}`"))
                })?),
                None => None,
            };
        let test_option = match maybe_text_child(parser, BASE_NS, "test-option")? {
            Some(text) => Some(TestOption::from_str(&text).map_err(|_| {
                ParsingError::InvalidValue(format!("unknown test-option `{text}`"))
            })?),
            None => None,
        };
        let error_option = match maybe_text_child(parser, BASE_NS, "error-option")? {
            Some(text) => Some(ErrorOption::from_str(&text).map_err(|_| {
                ParsingError::InvalidValue(format!("unknown error-option `{text}`"))
            })?),
            None => None,
        };
        parser.skip_text()?;
        let edit_content = if parser.maybe_open(Some(BASE_NS), "url")?.is_some() {
            let url = parser.tag_string()?;
            parser.close()?;
            EditContent::Url(url)
        } else if parser.maybe_open(Some(BASE_NS), "config")?.is_some() {
            let config = if parser.parent_has_child() {
                parser.copy_buffer_till(b"config")?
            } else {
                "".into()
            };
            parser.close()?;
            EditContent::Config(config)
        } else {
            return Err(ParsingError::WrongToken {
                expecting: "<url> or <config>".into(),
                found: parser.peek().clone(),
            });
        };
        parser.close()?;
        Ok(NetconfRpc::EditConfig {
            target,
            default_operation,
            test_option,
            error_option,
            edit_content,
        })
    }

    fn parse_copy_config(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        let target = ConfigTarget::xml_deserialize(parser)?;
        let source = ConfigSource::xml_deserialize(parser)?;
        let with_defaults = maybe_with_defaults(parser)?;
        parser.close()?;
        Ok(NetconfRpc::Copy {
            target,
            source,
            with_defaults,
        })
    }

    fn parse_commit(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        let confirmed = if parser.maybe_open(Some(BASE_NS), "confirmed")?.is_some() {
            parser.close()?;
            true
        } else {
            false
        };
        let confirm_timeout = match maybe_text_child(parser, BASE_NS, "confirm-timeout")? {
            Some(text) => Some(text.parse::<u32>()?),
            None => None,
        };
        let persist = maybe_text_child(parser, BASE_NS, "persist")?;
        let persist_id = maybe_text_child(parser, BASE_NS, "persist-id")?;
        parser.close()?;
        Ok(NetconfRpc::Commit {
            confirmed,
            confirm_timeout,
            persist,
            persist_id,
        })
    }

    fn parse_get_schema(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        parser.skip_text()?;
        parser.open(Some(MONITORING_NS), "identifier")?;
        let identifier = parser.tag_string()?.trim().to_string().into_boxed_str();
        parser.close()?;
        let version = maybe_text_child(parser, MONITORING_NS, "version")?;
        let format = match maybe_text_child(parser, MONITORING_NS, "format")? {
            Some(text) => Some(SchemaFormat::from_str(&text).map_err(|_| {
                ParsingError::InvalidValue(format!("unknown YANG schema format `{text}`"))
            })?),
            None => None,
        };
        parser.close()?;
        Ok(NetconfRpc::GetSchema {
            identifier,
            version,
            format,
        })
    }

    fn parse_subscribe(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        let stream = maybe_text_child(parser, NOTIFICATIONS_NS, "stream")?;
        let filter = maybe_filter(parser, NOTIFICATIONS_NS)?;
        let start_time = maybe_text_child(parser, NOTIFICATIONS_NS, "startTime")?;
        let stop_time = maybe_text_child(parser, NOTIFICATIONS_NS, "stopTime")?;
        parser.close()?;
        Ok(NetconfRpc::Subscribe {
            stream,
            filter,
            start_time,
            stop_time,
        })
    }
}

impl XmlDeserialize<NetconfRpc> for NetconfRpc {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<Self, ParsingError> {
        parser.skip_text()?;
        if parser.maybe_open(Some(BASE_NS), "get-config")?.is_some() {
            return Self::parse_get_config(parser);
        }
        if parser.maybe_open(Some(BASE_NS), "edit-config")?.is_some() {
            return Self::parse_edit_config(parser);
        }
        if parser.maybe_open(Some(BASE_NS), "copy-config")?.is_some() {
            return Self::parse_copy_config(parser);
        }
        if parser.maybe_open(Some(BASE_NS), "delete-config")?.is_some() {
            let target = ConfigTarget::xml_deserialize(parser)?;
            parser.close()?;
            return Ok(NetconfRpc::Delete { target });
        }
        if parser.maybe_open(Some(BASE_NS), "get")?.is_some() {
            return Self::parse_get(parser);
        }
        if parser.maybe_open(Some(BASE_NS), "lock")?.is_some() {
            let target = deserialize_datastore_in(parser, "target")?;
            parser.close()?;
            return Ok(NetconfRpc::Lock { target });
        }
        if parser.maybe_open(Some(BASE_NS), "unlock")?.is_some() {
            let target = deserialize_datastore_in(parser, "target")?;
            parser.close()?;
            return Ok(NetconfRpc::Unlock { target });
        }
        if parser.maybe_open(Some(BASE_NS), "kill-session")?.is_some() {
            let session_id = match maybe_text_child(parser, BASE_NS, "session-id")? {
                Some(text) => text.parse::<u32>()?,
                None => {
                    return Err(ParsingError::InvalidValue(
                        "kill-session without a session-id".to_string(),
                    ))
                }
            };
            parser.close()?;
            return Ok(NetconfRpc::Kill { session_id });
        }
        if parser.maybe_open(Some(BASE_NS), "commit")?.is_some() {
            return Self::parse_commit(parser);
        }
        if parser
            .maybe_open(Some(BASE_NS), "discard-changes")?
            .is_some()
        {
            parser.close()?;
            return Ok(NetconfRpc::Discard);
        }
        if parser.maybe_open(Some(BASE_NS), "cancel-commit")?.is_some() {
            let persist_id = maybe_text_child(parser, BASE_NS, "persist-id")?;
            parser.close()?;
            return Ok(NetconfRpc::Cancel { persist_id });
        }
        if parser.maybe_open(Some(BASE_NS), "validate")?.is_some() {
            let source = ConfigSource::xml_deserialize(parser)?;
            parser.close()?;
            return Ok(NetconfRpc::Validate { source });
        }
        if parser
            .maybe_open(Some(MONITORING_NS), "get-schema")?
            .is_some()
        {
            return Self::parse_get_schema(parser);
        }
        if parser
            .maybe_open(Some(NOTIFICATIONS_NS), "create-subscription")?
            .is_some()
        {
            return Self::parse_subscribe(parser);
        }
        // Unknown operation, the caller falls back to a raw copy
        Err(ParsingError::Recoverable)
    }
}
