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

//! NETCONF capability URIs exchanged in the `<hello>` message, as defined
//! in [RFC 6241](https://www.rfc-editor.org/rfc/rfc6241.html) and the
//! [IANA NETCONF Capability URNs registry](https://www.iana.org/assignments/netconf-capability-urns/netconf-capability-urns.xhtml).

use crate::{
    xml_utils::{ParsingError, XmlDeserialize, XmlParser, XmlSerialize, XmlWriter},
    BASE_NS, MONITORING_NS,
};
use quick_xml::events::{BytesText, Event};
use serde::{Deserialize, Serialize};
use std::{fmt, io, str::FromStr};

const CAP_WRITABLE: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
const CAP_CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
const CAP_CONFIRMED_COMMIT_1_0: &str = "urn:ietf:params:netconf:capability:confirmed-commit:1.0";
const CAP_CONFIRMED_COMMIT_1_1: &str = "urn:ietf:params:netconf:capability:confirmed-commit:1.1";
const CAP_ROLLBACK_ON_ERROR: &str = "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
const CAP_VALIDATE_1_0: &str = "urn:ietf:params:netconf:capability:validate:1.0";
const CAP_VALIDATE_1_1: &str = "urn:ietf:params:netconf:capability:validate:1.1";
const CAP_STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
const CAP_URL: &str = "urn:ietf:params:netconf:capability:url:1.0";
const CAP_XPATH: &str = "urn:ietf:params:netconf:capability:xpath:1.0";
const CAP_NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";
const CAP_INTERLEAVE: &str = "urn:ietf:params:netconf:capability:interleave:1.0";
const CAP_WITH_DEFAULTS: &str = "urn:ietf:params:netconf:capability:with-defaults:1.0";
const CAP_BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
const CAP_BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

/// NETCONF capability advertised in a `<hello>` message.
///
/// Base and YANG-module capabilities are modeled separately from the other
/// standard URNs because the session bring-up treats them specially: base
/// capabilities select framing and `ietf-netconf` features, YANG-module
/// capabilities drive schema loading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum Capability {
    #[strum(serialize = "{0}")]
    Base(BaseVersion),

    #[strum(serialize = "{0}")]
    Standard(StandardCapability),

    #[strum(serialize = "{0}")]
    Yang(YangModuleCapability),

    #[strum(serialize = "{0}")]
    Custom(Box<str>),
}

#[derive(Debug, Clone, PartialEq, Eq, strum_macros::Display)]
pub enum CapabilityParsingError {
    #[strum(to_string = "URL scheme `{0}` for the :url capability is not recognized")]
    InvalidUrlScheme(String),

    #[strum(to_string = "URL scheme for the :url capability is not defined")]
    UrlSchemeIsNotDefined,

    #[strum(to_string = "YANG module capability `{0}` could not be parsed")]
    InvalidYangUrnSchema(String),
}

impl std::error::Error for CapabilityParsingError {}

impl From<CapabilityParsingError> for ParsingError {
    fn from(value: CapabilityParsingError) -> Self {
        Self::InvalidValue(value.to_string())
    }
}

impl FromStr for Capability {
    type Err = CapabilityParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CAP_BASE_1_0 => Ok(Capability::Base(BaseVersion::V1_0)),
            CAP_BASE_1_1 => Ok(Capability::Base(BaseVersion::V1_1)),
            CAP_WRITABLE => Ok(Capability::Standard(StandardCapability::WritableRunning)),
            CAP_CANDIDATE => Ok(Capability::Standard(StandardCapability::Candidate)),
            CAP_CONFIRMED_COMMIT_1_0 => Ok(Capability::Standard(
                StandardCapability::ConfirmedCommitV1_0,
            )),
            CAP_CONFIRMED_COMMIT_1_1 => Ok(Capability::Standard(
                StandardCapability::ConfirmedCommitV1_1,
            )),
            CAP_ROLLBACK_ON_ERROR => Ok(Capability::Standard(StandardCapability::RollbackOnError)),
            CAP_VALIDATE_1_0 => Ok(Capability::Standard(StandardCapability::ValidateV1_0)),
            CAP_VALIDATE_1_1 => Ok(Capability::Standard(StandardCapability::ValidateV1_1)),
            CAP_STARTUP => Ok(Capability::Standard(StandardCapability::Startup)),
            CAP_XPATH => Ok(Capability::Standard(StandardCapability::Xpath)),
            CAP_NOTIFICATION => Ok(Capability::Standard(StandardCapability::Notification)),
            CAP_INTERLEAVE => Ok(Capability::Standard(StandardCapability::Interleave)),
            CAP_WITH_DEFAULTS => Ok(Capability::Standard(StandardCapability::WithDefaults)),
            cap if cap.starts_with(CAP_URL) => {
                let schemes_str = cap
                    .strip_prefix(CAP_URL)
                    .and_then(|x| x.strip_prefix("?scheme="))
                    .ok_or(CapabilityParsingError::UrlSchemeIsNotDefined)?;
                let mut schemes = Vec::new();
                for scheme in schemes_str.split(',') {
                    schemes.push(UrlScheme::from_str(scheme).map_err(|_| {
                        CapabilityParsingError::InvalidUrlScheme(scheme.to_string())
                    })?);
                }
                Ok(Capability::Standard(StandardCapability::Url(UrlSchemes(
                    schemes.into_boxed_slice(),
                ))))
            }
            cap if cap.starts_with("urn")
                || cap.starts_with("http://")
                || cap.starts_with("https://") =>
            {
                let (urn, params) = if let Some((urn, params)) = cap.split_once('?') {
                    (urn, params)
                } else {
                    return Ok(Capability::Custom(s.into()));
                };

                let mut module_name = None;
                let mut revision = None;
                let mut features = Vec::new();
                let mut deviations = Vec::new();

                for param in params.split('&') {
                    if let Some((key, value)) = param.split_once('=') {
                        match key {
                            "module" => module_name = Some(value.into()),
                            "revision" => {
                                revision =
                                    Some(chrono::NaiveDate::from_str(value).map_err(|err| {
                                        CapabilityParsingError::InvalidYangUrnSchema(
                                            err.to_string(),
                                        )
                                    })?)
                            }
                            "features" => {
                                features = value.split(',').map(|f| f.into()).collect();
                            }
                            "deviations" => {
                                deviations = value.split(',').map(|d| d.into()).collect();
                            }
                            _ => {
                                return Ok(Capability::Custom(s.into()));
                            }
                        }
                    }
                }

                let module_name: Box<str> = module_name
                    .ok_or_else(|| CapabilityParsingError::InvalidYangUrnSchema(cap.to_string()))?;
                Ok(Capability::Yang(YangModuleCapability::new(
                    urn.into(),
                    module_name,
                    revision,
                    features.into_boxed_slice(),
                    deviations.into_boxed_slice(),
                )))
            }
            _ => Ok(Capability::Custom(s.into())),
        }
    }
}

impl Capability {
    /// Whether this capability announces the `ietf-netconf-monitoring`
    /// module, which carries the `<get-schema>` operation.
    pub fn is_netconf_monitoring(&self) -> bool {
        match self {
            Capability::Yang(yang) => yang.urn().as_bytes() == MONITORING_NS,
            Capability::Custom(urn) => urn.as_bytes().starts_with(MONITORING_NS),
            _ => false,
        }
    }

    /// The `ietf-netconf` feature keyed on this base capability URI, if
    /// any. Only the 1.1 flavors of confirmed-commit and validate carry
    /// the feature.
    pub const fn ietf_netconf_feature(&self) -> Option<&'static str> {
        match self {
            Capability::Standard(standard) => match standard {
                StandardCapability::WritableRunning => Some("writable-running"),
                StandardCapability::Candidate => Some("candidate"),
                StandardCapability::ConfirmedCommitV1_1 => Some("confirmed-commit"),
                StandardCapability::RollbackOnError => Some("rollback-on-error"),
                StandardCapability::ValidateV1_1 => Some("validate"),
                StandardCapability::Startup => Some("startup"),
                StandardCapability::Url(_) => Some("url"),
                StandardCapability::Xpath => Some("xpath"),
                _ => None,
            },
            _ => None,
        }
    }
}

impl XmlDeserialize<Capability> for Capability {
    fn xml_deserialize(
        parser: &mut XmlParser<impl io::BufRead>,
    ) -> Result<Capability, ParsingError> {
        parser.open(Some(BASE_NS), "capability")?;
        let body = parser.tag_string()?;
        let cap = Capability::from_str(body.trim())?;
        parser.close()?;
        Ok(cap)
    }
}

impl XmlSerialize for Capability {
    fn xml_serialize<T: io::Write>(
        &self,
        writer: &mut XmlWriter<T>,
    ) -> Result<(), quick_xml::Error> {
        let start = writer.create_element("capability");
        let end = start.to_end();
        writer.write_event(Event::Start(start.clone()))?;
        writer.write_event(Event::Text(BytesText::new(&self.to_string())))?;
        writer.write_event(Event::End(end))?;
        Ok(())
    }
}

/// NETCONF base protocol version
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum BaseVersion {
    #[strum(serialize = "urn:ietf:params:netconf:base:1.0")]
    V1_0,
    #[strum(serialize = "urn:ietf:params:netconf:base:1.1")]
    V1_1,
}

/// Standard NETCONF capability URNs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum StandardCapability {
    #[strum(serialize = "urn:ietf:params:netconf:capability:writable-running:1.0")]
    WritableRunning,

    #[strum(serialize = "urn:ietf:params:netconf:capability:candidate:1.0")]
    Candidate,

    #[strum(serialize = "urn:ietf:params:netconf:capability:confirmed-commit:1.0")]
    ConfirmedCommitV1_0,

    #[strum(serialize = "urn:ietf:params:netconf:capability:confirmed-commit:1.1")]
    ConfirmedCommitV1_1,

    #[strum(serialize = "urn:ietf:params:netconf:capability:rollback-on-error:1.0")]
    RollbackOnError,

    #[strum(serialize = "urn:ietf:params:netconf:capability:validate:1.0")]
    ValidateV1_0,

    #[strum(serialize = "urn:ietf:params:netconf:capability:validate:1.1")]
    ValidateV1_1,

    #[strum(serialize = "urn:ietf:params:netconf:capability:startup:1.0")]
    Startup,

    #[strum(to_string = "urn:ietf:params:netconf:capability:url:1.0?scheme={0}")]
    Url(UrlSchemes),

    #[strum(serialize = "urn:ietf:params:netconf:capability:xpath:1.0")]
    Xpath,

    #[strum(serialize = "urn:ietf:params:netconf:capability:notification:1.0")]
    Notification,

    #[strum(serialize = "urn:ietf:params:netconf:capability:interleave:1.0")]
    Interleave,

    #[strum(serialize = "urn:ietf:params:netconf:capability:with-defaults:1.0")]
    WithDefaults,
}

/// Comma-joined list of URL schemes carried by the :url capability query
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UrlSchemes(pub Box<[UrlScheme]>);

impl fmt::Display for UrlSchemes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scheme in self.0.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{scheme}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum UrlScheme {
    #[strum(serialize = "http")]
    Http,

    #[strum(serialize = "https")]
    Https,

    #[strum(serialize = "ftp")]
    Ftp,

    #[strum(serialize = "sftp")]
    Sftp,

    #[strum(serialize = "file")]
    File,

    #[strum(serialize = "scp")]
    Scp,
}

/// YANG module capability with revision, features and deviations encoded
/// in the URI query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YangModuleCapability {
    urn: Box<str>,
    module_name: Box<str>,
    revision: Option<chrono::NaiveDate>,
    features: Box<[Box<str>]>,
    deviations: Box<[Box<str>]>,
}

impl YangModuleCapability {
    pub const fn new(
        urn: Box<str>,
        module_name: Box<str>,
        revision: Option<chrono::NaiveDate>,
        features: Box<[Box<str>]>,
        deviations: Box<[Box<str>]>,
    ) -> Self {
        Self {
            urn,
            module_name,
            revision,
            features,
            deviations,
        }
    }

    pub const fn urn(&self) -> &'_ str {
        &self.urn
    }

    pub const fn module_name(&self) -> &'_ str {
        &self.module_name
    }

    pub const fn revision(&self) -> Option<chrono::NaiveDate> {
        self.revision
    }

    pub fn revision_string(&self) -> Option<String> {
        self.revision.map(|rev| rev.format("%Y-%m-%d").to_string())
    }

    pub fn features(&self) -> &[Box<str>] {
        &self.features
    }

    pub fn deviations(&self) -> &[Box<str>] {
        &self.deviations
    }
}

impl fmt::Display for YangModuleCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.urn)?;

        let mut params = Vec::with_capacity(self.features.len() + self.deviations.len() + 2);

        params.push(format!("module={}", self.module_name));

        if let Some(ref rev) = self.revision {
            params.push(format!("revision={rev}"));
        }

        if !self.features.is_empty() {
            params.push(format!("features={}", self.features.join(",")));
        }

        if !self.deviations.is_empty() {
            params.push(format!("deviations={}", self.deviations.join(",")));
        }

        if !params.is_empty() {
            write!(f, "?{}", params.join("&"))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::test_xml_value;
    use std::{str::FromStr, string::ToString};

    #[test]
    fn test_base_capability() -> Result<(), ParsingError> {
        let base_1_0_str = "urn:ietf:params:netconf:base:1.0";
        let base_1_1_str = "urn:ietf:params:netconf:base:1.1";
        let cap_base_1_0_str = r#"<capability xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">urn:ietf:params:netconf:base:1.0</capability>"#;
        let cap_base_1_1_str = r#"<capability xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">urn:ietf:params:netconf:base:1.1</capability>"#;

        let cap_base_1_0 = Capability::Base(BaseVersion::V1_0);
        let cap_base_1_1 = Capability::Base(BaseVersion::V1_1);

        assert_eq!(cap_base_1_0.to_string(), base_1_0_str);
        assert_eq!(cap_base_1_1.to_string(), base_1_1_str);
        assert_eq!(Capability::from_str(base_1_0_str), Ok(cap_base_1_0.clone()));
        assert_eq!(Capability::from_str(base_1_1_str), Ok(cap_base_1_1.clone()));
        test_xml_value(cap_base_1_0_str, cap_base_1_0)?;
        test_xml_value(cap_base_1_1_str, cap_base_1_1)?;
        Ok(())
    }

    #[test]
    fn test_writable_running() -> Result<(), ParsingError> {
        let writable_running_str = "urn:ietf:params:netconf:capability:writable-running:1.0";
        let cap_writable_running_str = r#"<capability xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">urn:ietf:params:netconf:capability:writable-running:1.0</capability>"#;

        let cap_writable_running = Capability::Standard(StandardCapability::WritableRunning);

        assert_eq!(cap_writable_running.to_string(), writable_running_str);
        assert_eq!(
            Capability::from_str(writable_running_str),
            Ok(cap_writable_running.clone())
        );
        test_xml_value(cap_writable_running_str, cap_writable_running)?;
        Ok(())
    }

    #[test]
    fn test_url_capability_scheme_list() -> Result<(), ParsingError> {
        let url_str = "urn:ietf:params:netconf:capability:url:1.0?scheme=http,ftp,file";
        let cap = Capability::from_str(url_str).unwrap();
        assert_eq!(
            cap,
            Capability::Standard(StandardCapability::Url(UrlSchemes(Box::new([
                UrlScheme::Http,
                UrlScheme::Ftp,
                UrlScheme::File
            ]))))
        );
        assert_eq!(cap.to_string(), url_str);

        assert_eq!(
            Capability::from_str("urn:ietf:params:netconf:capability:url:1.0?scheme=gopher"),
            Err(CapabilityParsingError::InvalidUrlScheme("gopher".to_string()))
        );
        assert_eq!(
            Capability::from_str("urn:ietf:params:netconf:capability:url:1.0"),
            Err(CapabilityParsingError::UrlSchemeIsNotDefined)
        );
        Ok(())
    }

    #[test]
    fn test_yang_urn_with_features_and_deviations() -> Result<(), ParsingError> {
        let input = r#"<capability xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">urn:ietf:params:xml:ns:yang:ietf-interfaces?module=ietf-interfaces&amp;revision=2018-02-20&amp;features=arbitrary-names,if-mib&amp;deviations=example-interfaces-deviations</capability>"#;
        let expected = Capability::Yang(YangModuleCapability::new(
            "urn:ietf:params:xml:ns:yang:ietf-interfaces".into(),
            "ietf-interfaces".into(),
            Some(chrono::NaiveDate::from_str("2018-02-20").unwrap()),
            Box::new(["arbitrary-names".into(), "if-mib".into()]),
            Box::new(["example-interfaces-deviations".into()]),
        ));

        test_xml_value(input, expected)?;
        Ok(())
    }

    #[test]
    fn test_yang_https_urn() -> Result<(), ParsingError> {
        let input = r#"<capability xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">http://openconfig.net/yang/alarms?module=openconfig-alarms&amp;revision=2018-01-16&amp;deviations=example-openconfig-alarms-deviation</capability>"#;
        let expected = Capability::Yang(YangModuleCapability::new(
            "http://openconfig.net/yang/alarms".into(),
            "openconfig-alarms".into(),
            Some(chrono::NaiveDate::from_str("2018-01-16").unwrap()),
            Box::new([]),
            Box::new(["example-openconfig-alarms-deviation".into()]),
        ));

        test_xml_value(input, expected)?;
        Ok(())
    }

    #[test]
    fn test_monitoring_detection() {
        let with_params = Capability::from_str(
            "urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring?module=ietf-netconf-monitoring&revision=2010-10-04",
        )
        .unwrap();
        assert!(with_params.is_netconf_monitoring());

        let bare = Capability::from_str("urn:ietf:params:xml:ns:yang:ietf-netconf-monitoring")
            .unwrap();
        assert!(bare.is_netconf_monitoring());

        let other = Capability::from_str("urn:ietf:params:netconf:base:1.0").unwrap();
        assert!(!other.is_netconf_monitoring());
    }

    #[test]
    fn test_ietf_netconf_feature_mapping() {
        let mapped = [
            (CAP_WRITABLE, "writable-running"),
            (CAP_CANDIDATE, "candidate"),
            (CAP_CONFIRMED_COMMIT_1_1, "confirmed-commit"),
            (CAP_ROLLBACK_ON_ERROR, "rollback-on-error"),
            (CAP_VALIDATE_1_1, "validate"),
            (CAP_STARTUP, "startup"),
            (CAP_XPATH, "xpath"),
        ];
        for (uri, feature) in mapped {
            let cap = Capability::from_str(uri).unwrap();
            assert_eq!(cap.ietf_netconf_feature(), Some(feature), "{uri}");
        }
        let url = Capability::from_str("urn:ietf:params:netconf:capability:url:1.0?scheme=file")
            .unwrap();
        assert_eq!(url.ietf_netconf_feature(), Some("url"));

        // The 1.0 flavors do not enable the 1.1 features
        for uri in [CAP_CONFIRMED_COMMIT_1_0, CAP_VALIDATE_1_0, CAP_BASE_1_0] {
            let cap = Capability::from_str(uri).unwrap();
            assert_eq!(cap.ietf_netconf_feature(), None, "{uri}");
        }
    }

    #[test]
    fn test_custom_capability_round_trip() -> Result<(), ParsingError> {
        let input = r#"<capability xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">https://example.net/router/2.3/myfeature</capability>"#;
        let expected = Capability::Custom("https://example.net/router/2.3/myfeature".into());
        test_xml_value(input, expected)?;
        Ok(())
    }
}
