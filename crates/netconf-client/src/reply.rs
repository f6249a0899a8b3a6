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

//! Classification of a raw `<rpc-reply>` against the request that
//! produced it.
//!
//! A structured `<rpc-error>` reply is a successful classification, not a
//! session error: servers answer bad requests with it in-band.

use crate::{
    protocol::{RpcError, RpcReply, RpcReplyContent},
    rpc::{NetconfRpc, ReplyShape},
    xml_utils::{ParsingError, XmlParser},
    BASE_NS, MONITORING_NS,
};
use quick_xml::NsReader;
use serde::{Deserialize, Serialize};

pub(crate) fn decode_html_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#60;", "<")
        .replace("&#62;", ">")
        .replace("&amp;", "&")
        .replace("&#38;", "&")
}

/// Typed reply to a [NetconfRpc].
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Ok,
    Error(Vec<RpcError>),
    Data(ReplyData),
}

impl Reply {
    pub const fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok)
    }

    pub const fn errors(&self) -> Option<&Vec<RpcError>> {
        if let Reply::Error(errors) = self {
            Some(errors)
        } else {
            None
        }
    }

    pub const fn data(&self) -> Option<&ReplyData> {
        if let Reply::Data(data) = self {
            Some(data)
        } else {
            None
        }
    }
}

/// Output data of an operation that defines one.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum ReplyData {
    /// Raw XML tree. For `<get>`/`<get-config>` these are the children of
    /// the `<data>` element; for generic operations the reply body
    /// verbatim.
    Tree(Box<str>),

    /// Schema text returned by `<get-schema>`.
    Schema(Box<str>),
}

#[derive(Debug, strum_macros::Display)]
pub enum ReplyClassifyError {
    #[strum(to_string = "unexpected data reply to a `{operation}` request")]
    UnexpectedData { operation: &'static str },

    #[strum(to_string = "malformed reply body: `{0}`")]
    Malformed(ParsingError),
}

impl std::error::Error for ReplyClassifyError {}

impl From<ParsingError> for ReplyClassifyError {
    fn from(value: ParsingError) -> Self {
        Self::Malformed(value)
    }
}

fn parser_over(raw: &str) -> Result<XmlParser<&[u8]>, ParsingError> {
    let mut reader = NsReader::from_reader(raw.as_bytes());
    reader.config_mut().trim_text(false);
    XmlParser::new(reader)
}

/// Children of the `<data>` element in the base namespace, the output of
/// `<get>` and `<get-config>`.
fn extract_data_children(raw: &str) -> Result<Box<str>, ParsingError> {
    let mut parser = parser_over(raw)?;
    parser.skip_text()?;
    parser.open(Some(BASE_NS), "data")?;
    if !parser.parent_has_child() {
        parser.close()?;
        return Ok("".into());
    }
    let children = parser.copy_buffer_till(b"data")?;
    parser.close()?;
    Ok(children)
}

/// Schema text carried by the monitoring `<data>` element, the output of
/// `<get-schema>`.
fn extract_schema_text(raw: &str) -> Result<Box<str>, ParsingError> {
    let mut parser = parser_over(raw)?;
    parser.skip_text()?;
    parser.open(Some(MONITORING_NS), "data")?;
    let text = if parser.parent_has_child() {
        parser.tag_string()?
    } else {
        "".into()
    };
    parser.close()?;
    Ok(decode_html_entities(&text).into_boxed_str())
}

/// Classify a raw reply using the reply shape declared by the originating
/// request.
pub fn classify(reply: RpcReply, rpc: &NetconfRpc) -> Result<Reply, ReplyClassifyError> {
    match reply.into_content() {
        RpcReplyContent::Ok => Ok(Reply::Ok),
        RpcReplyContent::Errors(errors) => Ok(Reply::Error(errors)),
        RpcReplyContent::Data(raw) => match rpc.reply_shape() {
            ReplyShape::NoOutput => Err(ReplyClassifyError::UnexpectedData {
                operation: rpc.operation_name(),
            }),
            ReplyShape::Data => Ok(Reply::Data(ReplyData::Tree(extract_data_children(&raw)?))),
            ReplyShape::SchemaText => {
                Ok(Reply::Data(ReplyData::Schema(extract_schema_text(&raw)?)))
            }
            ReplyShape::FromRequest => Ok(Reply::Data(ReplyData::Tree(raw))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::{ErrorSeverity, ErrorTag, ErrorType},
        rpc::{Datastore, Filter},
        xml_utils::XmlDeserialize,
    };

    fn reply_from(input: &str) -> RpcReply {
        let mut parser = parser_over(input).unwrap();
        RpcReply::xml_deserialize(&mut parser).unwrap()
    }

    #[test]
    fn test_classify_ok() {
        let reply = reply_from(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="1"><ok/></rpc-reply>"#,
        );
        let rpc = NetconfRpc::Lock {
            target: Datastore::Running,
        };
        assert_eq!(classify(reply, &rpc).unwrap(), Reply::Ok);
    }

    #[test]
    fn test_classify_rpc_error() {
        let reply = reply_from(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="1"><rpc-error><error-type>application</error-type><error-tag>lock-denied</error-tag><error-severity>error</error-severity><error-info><session-id>42</session-id></error-info></rpc-error></rpc-reply>"#,
        );
        let rpc = NetconfRpc::Lock {
            target: Datastore::Running,
        };
        let classified = classify(reply, &rpc).unwrap();
        let errors = classified.errors().expect("expected error reply");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type(), Some(ErrorType::Application));
        assert_eq!(errors[0].error_tag(), Some(ErrorTag::LockDenied));
        assert_eq!(errors[0].error_severity(), Some(ErrorSeverity::Error));
        assert_eq!(errors[0].session_id(), Some("42"));
    }

    #[test]
    fn test_classify_get_config_data_children() {
        let reply = reply_from(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="2"><data><top xmlns="urn:example:top"><name>vnf1</name></top></data></rpc-reply>"#,
        );
        let rpc = NetconfRpc::GetConfig {
            source: Datastore::Running,
            filter: Some(Filter::from("/t:top")),
            with_defaults: None,
        };
        match classify(reply, &rpc).unwrap() {
            Reply::Data(ReplyData::Tree(tree)) => {
                assert!(tree.starts_with("<top "));
                assert!(tree.contains("vnf1"));
                assert!(!tree.contains("<data"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_get_empty_data() {
        let reply = reply_from(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="2"><data/></rpc-reply>"#,
        );
        let rpc = NetconfRpc::Get {
            filter: None,
            with_defaults: None,
        };
        assert_eq!(
            classify(reply, &rpc).unwrap(),
            Reply::Data(ReplyData::Tree("".into()))
        );
    }

    #[test]
    fn test_classify_get_schema_text() {
        let reply = reply_from(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="5"><data xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring">module foo { namespace "urn:foo"; prefix f; leaf a { type string; } }</data></rpc-reply>"#,
        );
        let rpc = NetconfRpc::GetSchema {
            identifier: "foo".into(),
            version: None,
            format: None,
        };
        match classify(reply, &rpc).unwrap() {
            Reply::Data(ReplyData::Schema(schema)) => {
                assert!(schema.starts_with("module foo"));
                assert!(schema.contains("namespace \"urn:foo\""));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_unexpected_data_for_no_output_operation() {
        let reply = reply_from(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="9"><data/></rpc-reply>"#,
        );
        let rpc = NetconfRpc::Discard;
        assert!(matches!(
            classify(reply, &rpc),
            Err(ReplyClassifyError::UnexpectedData {
                operation: "discard-changes"
            })
        ));
    }

    #[test]
    fn test_classify_generic_keeps_raw_body() {
        let reply = reply_from(
            r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="4"><result xmlns="urn:example:tea">ready</result></rpc-reply>"#,
        );
        let rpc = NetconfRpc::Generic {
            payload: r#"<make-tea xmlns="urn:example:tea"/>"#.into(),
        };
        match classify(reply, &rpc).unwrap() {
            Reply::Data(ReplyData::Tree(tree)) => {
                assert!(tree.contains("<result"));
                assert!(tree.contains("ready"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_decode_html_entities() {
        assert_eq!(
            decode_html_entities("&lt;module&gt; &quot;x&quot; &amp;&#62;"),
            "<module> \"x\" &>"
        );
    }
}
