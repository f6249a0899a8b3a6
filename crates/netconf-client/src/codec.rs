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

//! Codec to read and write NETCONF messages in accordance with
//! [RFC 6242](https://datatracker.ietf.org/doc/html/rfc6242).
//!
//! The `<hello>` exchange always uses the `]]>]]>` end-of-message
//! delimiter. Afterwards the codec switches to chunked framing when both
//! peers announced base:1.1, and stays with end-of-message framing for
//! base:1.0-only peers.

use crate::{
    protocol::NetconfMessage,
    xml_utils::{ParsingError, XmlDeserialize, XmlParser, XmlSerialize, XmlWriter},
    BASE_NS, NOTIFICATIONS_NS,
};
use quick_xml::NsReader;
use tokio_util::{
    bytes::{Buf, BytesMut},
    codec::{Decoder, Encoder},
};

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";
const EOM_TERMINATOR: &str = "]]>]]>";
const CHUNK_START: &str = "\n#";
const MESSAGE_TERMINATOR: &str = "\n##\n";

/// Maximum chunk size as per RFC 6242
const MAX_CHUNK_SIZE: usize = 4294967295;

/// Maximum length of the chunk size field in characters
const MAX_CHUNK_SIZE_LEN: usize = 10;

#[derive(Debug, strum_macros::Display)]
pub enum FrameCodecError {
    #[strum(to_string = "std::io:Error: `{0}`")]
    IO(std::io::Error),

    #[strum(to_string = "UTF decoding error: `{0}`")]
    Utf(std::str::Utf8Error),

    #[strum(to_string = "Integer decoding error: `{0}`")]
    Int(std::num::ParseIntError),

    #[strum(to_string = "NETCONF XML parsing error: `{0}`")]
    Parsing(ParsingError),

    #[strum(to_string = "XML encoding error: `{0}`")]
    Serialization(quick_xml::Error),
}

impl std::error::Error for FrameCodecError {}

impl From<std::io::Error> for FrameCodecError {
    fn from(err: std::io::Error) -> FrameCodecError {
        FrameCodecError::IO(err)
    }
}

impl From<std::str::Utf8Error> for FrameCodecError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Utf(value)
    }
}

impl From<std::num::ParseIntError> for FrameCodecError {
    fn from(value: std::num::ParseIntError) -> Self {
        Self::Int(value)
    }
}

impl From<ParsingError> for FrameCodecError {
    fn from(value: ParsingError) -> Self {
        Self::Parsing(value)
    }
}

impl From<quick_xml::Error> for FrameCodecError {
    fn from(value: quick_xml::Error) -> Self {
        Self::Serialization(value)
    }
}

impl PartialEq for FrameCodecError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::IO(_), Self::IO(_)) => true,
            (Self::Utf(v1), Self::Utf(v2)) => v1.eq(v2),
            (Self::Int(v1), Self::Int(v2)) => v1.eq(v2),
            (Self::Parsing(v1), Self::Parsing(v2)) => v1.eq(v2),
            _ => false,
        }
    }
}

/// NETCONF message framing codec.
#[derive(Debug)]
pub struct FrameCodec {
    in_hello: bool,
    chunked: bool,
    buf: BytesMut,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            in_hello: true,
            chunked: false,
            buf: BytesMut::new(),
        }
    }

    /// Switch to chunked framing. Called once after the hello exchange
    /// when both peers announced base:1.1.
    pub fn set_chunked(&mut self, chunked: bool) {
        self.chunked = chunked;
    }

    pub const fn is_chunked(&self) -> bool {
        self.chunked
    }

    fn parse_message(data: &[u8]) -> Result<NetconfMessage, FrameCodecError> {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!("parsing netconf message: `{:?}`", std::str::from_utf8(data));
        }
        let reader = NsReader::from_reader(data);
        let mut xml_parser = XmlParser::new(reader)?;
        Ok(NetconfMessage::xml_deserialize(&mut xml_parser)?)
    }

    /// End-of-message framing: scan for `]]>]]>` and parse what precedes
    /// it.
    fn decode_eom(&mut self, src: &mut BytesMut) -> Result<Option<NetconfMessage>, FrameCodecError> {
        if src.len() < EOM_TERMINATOR.len() {
            return Ok(None);
        }
        let pos = src
            .windows(EOM_TERMINATOR.len())
            .position(|w| w == EOM_TERMINATOR.as_bytes());
        let pos = match pos {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let data = src.split_to(pos + EOM_TERMINATOR.len());
        let data = &data[..pos];
        let parsed = Self::parse_message(data)?;
        Ok(Some(parsed))
    }

    fn decode_chunked(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<NetconfMessage>, FrameCodecError> {
        loop {
            // A complete message may already sit in the reassembly buffer
            if !self.buf.is_empty() && src.starts_with(MESSAGE_TERMINATOR.as_bytes()) {
                let data = self.buf.split();
                src.advance(MESSAGE_TERMINATOR.len());
                return Ok(Some(Self::parse_message(&data)?));
            }

            // Check if we have enough data for the chunk start plus size
            if src.len() < CHUNK_START.len() + MAX_CHUNK_SIZE_LEN + 1 {
                return Ok(None);
            }
            // Verify the chunk start sequence
            if !src.starts_with(CHUNK_START.as_bytes()) {
                return Err(FrameCodecError::IO(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Expected chunk start sequence or message terminator",
                )));
            }

            // Find the end of the chunk size field. RFC 6242 caps the size
            // at 4294967295, so the field cannot exceed 10 characters plus
            // the newline.
            let size_start = CHUNK_START.len();
            let size_end = src[size_start..size_start + MAX_CHUNK_SIZE_LEN + 1]
                .iter()
                .position(|&b| b == b'\n');
            let size_end = match size_end {
                Some(pos) => size_start + pos,
                None => {
                    return Err(FrameCodecError::IO(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "Chunk size is not properly terminated with a newline",
                    )))
                }
            };

            let chunk_size_slice = &src[size_start..size_end];
            let chunk_size_str = std::str::from_utf8(chunk_size_slice)?;
            let chunk_size = chunk_size_str.parse::<usize>()?;

            if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
                return Err(FrameCodecError::IO(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid chunk size: {chunk_size}"),
                )));
            }

            // Check if we have the complete chunk
            let chunk_start_pos = size_end + 1;
            if src.len() < chunk_start_pos + chunk_size {
                return Ok(None);
            }

            let chunk_data = &src[chunk_start_pos..chunk_start_pos + chunk_size];
            self.buf.extend_from_slice(chunk_data);
            src.advance(chunk_start_pos + chunk_size);

            if src.starts_with(MESSAGE_TERMINATOR.as_bytes()) {
                let data = self.buf.split();
                src.advance(MESSAGE_TERMINATOR.len());
                return Ok(Some(Self::parse_message(&data)?));
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = NetconfMessage;
    type Error = FrameCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.in_hello {
            let decoded = self.decode_eom(src)?;
            if decoded.is_some() {
                self.in_hello = false;
            }
            return Ok(decoded);
        }
        if self.chunked {
            self.decode_chunked(src)
        } else {
            self.decode_eom(src)
        }
    }
}

impl Encoder<&NetconfMessage> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, item: &NetconfMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let buf = std::io::Cursor::new(Vec::new());
        let writer = quick_xml::writer::Writer::new(buf);
        let root_ns = match item {
            NetconfMessage::Notification(_) => NOTIFICATIONS_NS,
            _ => BASE_NS,
        };
        let mut xml_writer = XmlWriter::new(
            writer,
            vec![(
                "xmlns".to_string(),
                String::from_utf8_lossy(root_ns).to_string(),
            )],
        );
        item.xml_serialize(&mut xml_writer)?;
        let buf = xml_writer.into_inner().into_inner();
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!("serialized payload: `{}`", std::str::from_utf8(&buf)?);
        }
        let eom = matches!(item, NetconfMessage::Hello(_)) || !self.chunked;
        if eom {
            dst.extend_from_slice(XML_HEADER.as_bytes());
            dst.extend_from_slice(&buf);
            dst.extend_from_slice(EOM_TERMINATOR.as_bytes());
        } else {
            let size = buf.len();
            dst.extend_from_slice(format!("{CHUNK_START}{size}\n").as_bytes());
            dst.extend_from_slice(&buf);
            dst.extend_from_slice(MESSAGE_TERMINATOR.as_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capabilities::{BaseVersion, Capability, StandardCapability},
        protocol::{Hello, Rpc, RpcReply, RpcReplyContent},
        rpc::{Datastore, NetconfRpc},
    };
    use std::collections::HashSet;

    #[test]
    fn test_hello_decoding() {
        let hello_str = r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>
      urn:ietf:params:netconf:base:1.1
    </capability>
    <capability>
      urn:ietf:params:netconf:capability:startup:1.0
    </capability>
  </capabilities>
  <session-id>4</session-id>
</hello>
]]>]]>"#;
        let expected = NetconfMessage::Hello(Hello::new(
            Some(4),
            HashSet::from([
                Capability::Base(BaseVersion::V1_1),
                Capability::Standard(StandardCapability::Startup),
            ]),
        ));
        let mut buf = BytesMut::from(hello_str);
        let mut codec = FrameCodec::new();
        let result = codec.decode(&mut buf);
        assert_eq!(result, Ok(Some(expected)));
    }

    #[test]
    fn test_hello_transition_with_chunks_decoding() {
        let input = r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>
      urn:ietf:params:netconf:base:1.1
    </capability>
  </capabilities>
  <session-id>4</session-id>
</hello>
]]>]]>
#4
<rpc
#18
 message-id="102"

#103
     xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <lock><target><running/></target></lock>
</rpc>
##
"#;
        let hello_expected = Ok(Some(NetconfMessage::Hello(Hello::new(
            Some(4),
            HashSet::from([Capability::Base(BaseVersion::V1_1)]),
        ))));
        let rpc_expected = Ok(Some(NetconfMessage::Rpc(Rpc::new(
            102,
            NetconfRpc::Lock {
                target: Datastore::Running,
            },
        ))));
        let mut buf = BytesMut::from(input);
        let mut codec = FrameCodec::new();

        let hello_parsed = codec.decode(&mut buf);
        assert_eq!(hello_parsed, hello_expected);

        codec.set_chunked(true);
        let rpc_parsed = codec.decode(&mut buf);
        assert_eq!(rpc_parsed, rpc_expected);

        let eof_parsed = codec.decode(&mut buf);
        assert_eq!(eof_parsed, Ok(None));
    }

    #[test]
    fn test_chunked_message_terminator_arriving_late() {
        // Deliver the terminator in a separate read to check the
        // reassembly buffer survives across decode calls
        let chunk = "\n#91\n<rpc-reply message-id=\"1\" xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\"";
        let rest = "><ok/></rpc-reply>";
        let mut codec = FrameCodec::new();
        codec.in_hello = false;
        codec.set_chunked(true);

        let mut buf = BytesMut::from(format!("{chunk}{rest}").as_str());
        assert_eq!(codec.decode(&mut buf), Ok(None));
        buf.extend_from_slice(MESSAGE_TERMINATOR.as_bytes());
        let expected = NetconfMessage::RpcReply(RpcReply::new(Some(1), RpcReplyContent::Ok));
        assert_eq!(codec.decode(&mut buf), Ok(Some(expected)));
    }

    #[test]
    fn test_eom_framing_after_hello() {
        let input = r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
  </capabilities>
  <session-id>9</session-id>
</hello>
]]>]]><rpc-reply message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>]]>]]>"#;
        let mut buf = BytesMut::from(input);
        let mut codec = FrameCodec::new();

        let hello = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(hello, NetconfMessage::Hello(_)));

        // base:1.0 peer, stay with end-of-message framing
        let reply = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            reply,
            NetconfMessage::RpcReply(RpcReply::new(Some(1), RpcReplyContent::Ok))
        );
    }

    #[test]
    fn test_encode_hello_uses_eom() {
        let hello = NetconfMessage::Hello(Hello::new(
            None,
            HashSet::from([Capability::Base(BaseVersion::V1_1)]),
        ));
        let mut codec = FrameCodec::new();
        codec.set_chunked(true);
        let mut dst = BytesMut::new();
        codec.encode(&hello, &mut dst).unwrap();
        let out = String::from_utf8(dst.to_vec()).unwrap();
        assert!(out.starts_with(XML_HEADER));
        assert!(out.ends_with(EOM_TERMINATOR));
    }

    #[test]
    fn test_encode_decode_chunked_round_trip() {
        let msg = NetconfMessage::Rpc(Rpc::new(
            7,
            NetconfRpc::Lock {
                target: Datastore::Running,
            },
        ));
        let mut codec = FrameCodec::new();
        codec.in_hello = false;
        codec.set_chunked(true);
        let mut wire = BytesMut::new();
        codec.encode(&msg, &mut wire).unwrap();
        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_encode_decode_eom_round_trip() {
        let msg = NetconfMessage::Rpc(Rpc::new(
            8,
            NetconfRpc::Get {
                filter: None,
                with_defaults: None,
            },
        ));
        let mut codec = FrameCodec::new();
        codec.in_hello = false;
        let mut wire = BytesMut::new();
        codec.encode(&msg, &mut wire).unwrap();
        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_invalid_chunk_start_is_error() {
        let mut codec = FrameCodec::new();
        codec.in_hello = false;
        codec.set_chunked(true);
        let mut buf = BytesMut::from("garbage data that is long enough to scan");
        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(FrameCodecError::IO(_))));
    }
}
