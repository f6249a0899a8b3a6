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

//! Low-level XML parsing and writing utils shared by the whole crate.

use indexmap::IndexMap;
use quick_xml::{
    events::{BytesStart, Event},
    name::{Namespace, ResolveResult},
    reader::NsReader,
};
use std::{fmt, io};

/// XML Serialization trait
pub trait XmlSerialize {
    fn xml_serialize<T: io::Write>(&self, xml: &mut XmlWriter<T>) -> Result<(), quick_xml::Error>;
}

/// XML Deserialization trait
pub trait XmlDeserialize<T: Sized> {
    fn xml_deserialize(parser: &mut XmlParser<impl io::BufRead>) -> Result<T, ParsingError>;
}

#[derive(Debug, strum_macros::Display)]
pub enum ParsingError {
    #[strum(to_string = "std::io:Error: `{0}`")]
    StdIo(io::Error),

    /// Recoverable probe failure, the caller may retry a different element
    Recoverable,

    /// Unexpected XML token found
    WrongToken {
        expecting: String,
        found: Event<'static>,
    },

    MissingAttribute(String),

    /// Invalid value error when converting from XML provided value to Rust
    /// type
    InvalidValue(String),

    /// Error when trying to skip a node
    SkipError(String),

    Utf8Error(std::str::Utf8Error),

    QuickXml(quick_xml::Error),

    Int(std::num::ParseIntError),

    #[strum(to_string = "Found EOF while expecting data")]
    Eof,

    EncodingError(quick_xml::encoding::EncodingError),
}

impl PartialEq for ParsingError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::StdIo(left), Self::StdIo(right)) => left.to_string() == right.to_string(),
            (Self::Recoverable, Self::Recoverable) => true,
            (
                Self::WrongToken {
                    expecting: left_exp,
                    found: left_found,
                },
                Self::WrongToken {
                    expecting: right_exp,
                    found: right_found,
                },
            ) => left_exp == right_exp && left_found == right_found,
            (Self::MissingAttribute(left), Self::MissingAttribute(right)) => left == right,
            (Self::InvalidValue(left), Self::InvalidValue(right)) => left == right,
            (Self::SkipError(left), Self::SkipError(right)) => left == right,
            (Self::Utf8Error(left), Self::Utf8Error(right)) => left == right,
            (Self::QuickXml(left), Self::QuickXml(right)) => left.to_string() == right.to_string(),
            (Self::Int(left), Self::Int(right)) => left == right,
            (Self::Eof, Self::Eof) => true,
            (Self::EncodingError(left), Self::EncodingError(right)) => left == right,
            _ => false,
        }
    }
}

impl std::error::Error for ParsingError {}

impl From<quick_xml::Error> for ParsingError {
    fn from(value: quick_xml::Error) -> Self {
        Self::QuickXml(value)
    }
}

impl From<std::str::Utf8Error> for ParsingError {
    fn from(value: std::str::Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<std::num::ParseIntError> for ParsingError {
    fn from(value: std::num::ParseIntError) -> Self {
        Self::Int(value)
    }
}

impl From<io::Error> for ParsingError {
    fn from(value: io::Error) -> Self {
        Self::StdIo(value)
    }
}

impl From<quick_xml::encoding::EncodingError> for ParsingError {
    fn from(value: quick_xml::encoding::EncodingError) -> Self {
        Self::EncodingError(value)
    }
}

/// Extract a single attribute value by its local name from a start tag.
pub fn extract_attribute(start: &BytesStart<'_>, attribute_name: &[u8]) -> Option<Box<str>> {
    for attr in start.attributes().flatten() {
        if attr.key.local_name().into_inner() == attribute_name {
            if let Ok(value) = attr.unescape_value() {
                return Some(value.to_string().into_boxed_str());
            }
        }
    }
    None
}

/// What kind of element is currently open. `Empty` elements have no
/// children, so probing and text accumulation short-circuit on them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum OpenElement {
    Container,
    Empty,
}

/// Transform an XML stream of characters into Rust objects.
///
/// The parser is a one-event look-ahead cursor over a namespace-aware
/// reader, with an explicit stack of currently open elements maintained by
/// [XmlParser::open] / [XmlParser::close].
pub struct XmlParser<R: Sized> {
    ns_reader: NsReader<R>,
    current: Event<'static>,
    open_stack: Vec<OpenElement>,
    buf: Vec<u8>,
}

impl<R: io::BufRead> XmlParser<R> {
    pub fn new(mut ns_reader: NsReader<R>) -> Result<Self, ParsingError> {
        let mut buf: Vec<u8> = vec![];
        let current = ns_reader.read_event_into(&mut buf)?.into_owned();
        Ok(Self {
            ns_reader,
            current,
            open_stack: vec![],
            buf,
        })
    }

    pub const fn ns_reader(&self) -> &NsReader<R> {
        &self.ns_reader
    }

    /// Advance the cursor by one event, returning the event that was
    /// current before the call.
    fn next(&mut self) -> Result<Event<'static>, ParsingError> {
        self.buf.clear();
        let evt = self.ns_reader.read_event_into(&mut self.buf)?.into_owned();
        Ok(std::mem::replace(&mut self.current, evt))
    }

    pub const fn peek(&self) -> &Event<'static> {
        &self.current
    }

    /// Skip a whole node at the current level.
    pub fn skip(&mut self) -> Result<Event<'static>, ParsingError> {
        match &self.current {
            Event::Start(b) => {
                let _span = self
                    .ns_reader
                    .read_to_end_into(b.to_end().name(), &mut self.buf)?;
                self.next()
            }
            Event::End(e) => Err(ParsingError::SkipError(format!(
                "Cannot skip a closing tag, call close() to close </{}>",
                std::str::from_utf8(e.name().local_name().into_inner())?
            ))),
            Event::Eof => Err(ParsingError::Eof),
            _ => self.next(),
        }
    }

    pub fn skip_text(&mut self) -> Result<(), ParsingError> {
        while let Event::Text(_) = self.peek() {
            self.skip()?;
        }
        Ok(())
    }

    /// Check if the cursor stands on the desired tag.
    pub fn is_tag(&self, ns: Option<&[u8]>, key: &str) -> bool {
        let qname = match self.peek() {
            Event::Start(bs) | Event::Empty(bs) => bs.name(),
            Event::End(be) => be.name(),
            _ => return false,
        };

        let (extr_ns, local) = self.ns_reader.resolve_element(qname);

        if local.into_inner() != key.as_bytes() {
            return false;
        }

        match extr_ns {
            ResolveResult::Bound(v) => Some(v.into_inner()) == ns,
            ResolveResult::Unbound => ns.is_none(),
            _ => false,
        }
    }

    /// Enter the element `key`, failing with [ParsingError::WrongToken] if
    /// the cursor stands on anything else.
    pub fn open(&mut self, ns: Option<&[u8]>, key: &str) -> Result<Event<'static>, ParsingError> {
        let evt = match self.peek() {
            Event::Empty(_) if self.is_tag(ns, key) => {
                self.open_stack.push(OpenElement::Empty);
                return Ok(self.current.clone());
            }
            Event::Start(_) if self.is_tag(ns, key) => self.next()?,
            e => {
                return Err(ParsingError::WrongToken {
                    expecting: format!("<{key}>"),
                    found: e.clone().into_owned(),
                });
            }
        };
        self.open_stack.push(OpenElement::Container);
        Ok(evt)
    }

    /// Probe for an optional element: enters it when present, leaves the
    /// cursor untouched and returns `None` when the next element is
    /// something else.
    pub fn maybe_open(
        &mut self,
        ns: Option<&[u8]>,
        key: &str,
    ) -> Result<Option<Event<'static>>, ParsingError> {
        self.skip_text()?;
        match self.open(ns, key) {
            Ok(v) => Ok(Some(v)),
            Err(ParsingError::WrongToken { .. }) | Err(ParsingError::Recoverable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[inline]
    pub fn parent_has_child(&self) -> bool {
        matches!(self.open_stack.last(), Some(OpenElement::Container) | None)
    }

    /// Accumulate the text content of the currently open element. Character
    /// references and CDATA sections are decoded into the accumulator. An
    /// element with no text yields an empty string.
    pub fn tag_string(&mut self) -> Result<Box<str>, ParsingError> {
        if !self.parent_has_child() {
            return Err(ParsingError::Recoverable);
        }
        let mut accumulator = String::new();
        loop {
            match self.peek() {
                Event::CData(unescaped) => {
                    let decoded = unescaped.decode()?;
                    accumulator.push_str(decoded.as_ref());
                    self.next()?
                }
                Event::Text(escaped) => {
                    let decoded = escaped.decode()?;
                    accumulator.push_str(decoded.as_ref());
                    self.next()?
                }
                Event::GeneralRef(general_ref) => {
                    let decoded = general_ref.decode()?;
                    let replaced = match decoded.as_ref() {
                        "quot" => "\"",
                        "apos" => "'",
                        "amp" => "&",
                        "lt" => "<",
                        "gt" => ">",
                        _ => decoded.as_ref(),
                    };
                    accumulator.push_str(replaced);
                    self.next()?
                }
                Event::End(_) | Event::Start(_) | Event::Empty(_) => {
                    return Ok(accumulator.into());
                }
                Event::Eof => return Err(ParsingError::Eof),
                _ => self.next()?,
            };
        }
    }

    /// Leave the currently open element, skipping whatever content is left
    /// inside it.
    pub fn close(&mut self) -> Result<Event<'static>, ParsingError> {
        match self.open_stack.pop() {
            Some(OpenElement::Empty) => return self.next(),
            Some(OpenElement::Container) => {}
            None => {
                return Err(ParsingError::SkipError(
                    "close() called with no open element".to_string(),
                ))
            }
        }
        loop {
            match self.peek() {
                Event::End(_) => return self.next(),
                Event::Eof => return Err(ParsingError::Eof),
                _ => self.skip()?,
            };
        }
    }

    /// Copy raw XML events until the end tag `tag` is reached (the end tag
    /// itself is not consumed).
    ///
    /// The first start tag of the copied fragment gets an explicit `xmlns`
    /// attribute resolved from the parser context when it does not carry
    /// one already, so the fragment stays valid when detached from the
    /// enclosing document.
    pub fn copy_buffer_till(&mut self, tag: &'_ [u8]) -> Result<Box<str>, ParsingError> {
        let cursor = io::Cursor::new(vec![]);
        let mut writer = quick_xml::writer::Writer::new(cursor);
        let mut wrote_ns = false;
        loop {
            if let Event::End(b) = self.peek() {
                if b.local_name().into_inner() == tag {
                    break;
                }
            }
            if let Event::Eof = self.peek() {
                return Err(ParsingError::Eof);
            }
            if !wrote_ns {
                if let Event::Start(a) = &mut self.current {
                    let has_xmlns = a
                        .attributes()
                        .flatten()
                        .any(|x| x.key.local_name().into_inner() == b"xmlns");
                    if !has_xmlns {
                        let (ns, _) = self.ns_reader.resolve(a.name(), false);
                        if let ResolveResult::Bound(ns) = ns {
                            a.push_attribute((&b"xmlns"[..], ns.0));
                        }
                    }
                    wrote_ns = true;
                    writer.write_event(Event::Start(a.clone()))?;
                } else {
                    writer.write_event(self.current.clone())?;
                }
            } else {
                writer.write_event(self.current.clone())?;
            }
            self.next()?;
        }
        let ret = std::str::from_utf8(&writer.into_inner().into_inner())?.to_string();
        Ok(ret.into())
    }

    /// Copy the single element the cursor stands on, including its end tag,
    /// and move past it. Used to preserve foreign-namespace content
    /// verbatim.
    pub fn copy_element(&mut self) -> Result<Box<str>, ParsingError> {
        match self.peek() {
            Event::Empty(_) => {
                let cursor = io::Cursor::new(vec![]);
                let mut writer = quick_xml::writer::Writer::new(cursor);
                writer.write_event(self.current.clone())?;
                self.next()?;
                let ret = std::str::from_utf8(&writer.into_inner().into_inner())?.to_string();
                Ok(ret.into())
            }
            Event::Start(start) => {
                let name = start.local_name().into_inner().to_vec();
                let cursor = io::Cursor::new(vec![]);
                let mut writer = quick_xml::writer::Writer::new(cursor);
                let mut depth = 0usize;
                loop {
                    match self.peek() {
                        Event::Start(s) => {
                            if s.local_name().into_inner() == name.as_slice() {
                                depth += 1;
                            }
                            writer.write_event(self.current.clone())?;
                            self.next()?;
                        }
                        Event::End(e) => {
                            writer.write_event(self.current.clone())?;
                            let matches = e.local_name().into_inner() == name.as_slice();
                            self.next()?;
                            if matches {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                        }
                        Event::Eof => return Err(ParsingError::Eof),
                        _ => {
                            writer.write_event(self.current.clone())?;
                            self.next()?;
                        }
                    }
                }
                let ret = std::str::from_utf8(&writer.into_inner().into_inner())?.to_string();
                Ok(ret.into())
            }
            e => Err(ParsingError::WrongToken {
                expecting: "an element".to_string(),
                found: e.clone().into_owned(),
            }),
        }
    }

    /// Deserialize all elements inside an XML sequence, until the end tag
    /// of the element opened before calling this method is reached.
    pub fn collect_xml_sequence<N: XmlDeserialize<N> + fmt::Debug + Sync>(
        &mut self,
    ) -> Result<Vec<N>, ParsingError> {
        if !self.parent_has_child() {
            return Ok(vec![]);
        }
        let mut acc = Vec::new();
        loop {
            self.skip_text()?;
            let ret = N::xml_deserialize(self);
            match ret {
                Err(ParsingError::WrongToken { .. }) | Err(ParsingError::Recoverable) => {
                    match self.peek() {
                        Event::End(_) => return Ok(acc),
                        _ => {
                            self.skip()?;
                        }
                    }
                }
                Ok(v) => acc.push(v),
                Err(e) => return Err(e),
            }
        }
    }

    /// Like [XmlParser::collect_xml_sequence], but stops at the first
    /// element that does not match `(ns, tag)` instead of skipping it.
    pub fn collect_xml_sequence_with_tag<N: XmlDeserialize<N> + fmt::Debug + Sync>(
        &mut self,
        ns: Option<&'_ [u8]>,
        tag: &'_ [u8],
    ) -> Result<Vec<N>, ParsingError> {
        let mut acc = Vec::new();
        let resolved_ns = if let Some(ns) = ns {
            ResolveResult::Bound(Namespace(ns))
        } else {
            ResolveResult::Unbound
        };
        if !self.parent_has_child() {
            return Ok(acc);
        }
        loop {
            self.skip_text()?;
            match &self.current {
                Event::Start(e) | Event::Empty(e) => {
                    let (n, l) = self.ns_reader.resolve(e.name(), false);
                    if !(n == resolved_ns && l.into_inner() == tag) {
                        return Ok(acc);
                    }
                }
                _ => return Ok(acc),
            }
            let ret = N::xml_deserialize(self);
            match ret {
                Err(ParsingError::Recoverable) => match self.peek() {
                    Event::End(_) => return Ok(acc),
                    _ => {
                        self.skip()?;
                    }
                },
                Ok(v) => acc.push(v),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Transform Rust objects into an XML stream of characters.
///
/// The writer applies a set of namespace declarations to the first created
/// element (the message root), and keeps a stack of prefixed-namespace
/// bindings for elements living outside the default namespace (monitoring,
/// notifications, with-defaults).
pub struct XmlWriter<T: io::Write> {
    inner: quick_xml::writer::Writer<T>,
    root_ns: Vec<(String, String)>,
    bindings: Vec<IndexMap<Vec<u8>, BindingState>>,
}

#[derive(Debug, Clone)]
struct BindingState {
    prefix: String,
    declared: bool,
}

impl<T: io::Write> XmlWriter<T> {
    pub const fn new(inner: quick_xml::writer::Writer<T>, root_ns: Vec<(String, String)>) -> Self {
        Self {
            inner,
            root_ns,
            bindings: Vec::new(),
        }
    }

    /// Create an element in the default namespace. The root namespace
    /// declarations are attached to the first element created through the
    /// writer.
    pub fn create_element(&mut self, name: &str) -> BytesStart<'static> {
        let mut start = BytesStart::new(name.to_string());
        if !self.root_ns.is_empty() {
            start.extend_attributes(self.root_ns.iter().map(|(k, n)| (k.as_str(), n.as_str())));
            self.root_ns.clear()
        }
        start
    }

    /// Returns the prefix bound to `ns`, if any binding for it is active.
    pub fn get_namespace_prefix(&self, ns: &[u8]) -> Option<&str> {
        for frame in self.bindings.iter().rev() {
            if let Some(state) = frame.get(ns) {
                return Some(state.prefix.as_str());
            }
        }
        None
    }

    /// Push a frame of namespace-to-prefix bindings. An empty prefix binds
    /// the default namespace. The matching `xmlns` attributes are emitted
    /// on the next element created in each namespace.
    pub fn push_namespace_binding(&mut self, bindings: IndexMap<&[u8], String>) {
        let frame = bindings
            .into_iter()
            .map(|(ns, prefix)| {
                (
                    ns.to_vec(),
                    BindingState {
                        prefix,
                        declared: false,
                    },
                )
            })
            .collect();
        self.bindings.push(frame);
    }

    pub fn pop_namespace_binding(&mut self) {
        self.bindings.pop();
    }

    /// Create an element inside a bound namespace. The `xmlns` declaration
    /// is attached the first time the binding is used.
    pub fn create_ns_element(
        &mut self,
        ns: &[u8],
        name: &str,
    ) -> Result<BytesStart<'static>, quick_xml::Error> {
        let state = self
            .bindings
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_mut(ns));
        let state = match state {
            Some(state) => state,
            None => {
                return Err(quick_xml::Error::Io(std::sync::Arc::new(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "no namespace binding pushed for `{}`",
                        String::from_utf8_lossy(ns)
                    ),
                ))));
            }
        };
        let mut start = if state.prefix.is_empty() {
            BytesStart::new(name.to_string())
        } else {
            BytesStart::new(format!("{}:{}", state.prefix, name))
        };
        if !state.declared {
            let attr_name = if state.prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{}", state.prefix)
            };
            start.push_attribute((attr_name.as_bytes(), ns));
            state.declared = true;
        }
        Ok(start)
    }

    pub fn write_event<'a, E: Into<Event<'a>>>(&mut self, event: E) -> io::Result<()> {
        self.inner.write_event(event.into())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.get_mut().write_all(buf)
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
