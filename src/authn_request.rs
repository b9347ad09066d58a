use std::{fmt::Display, str::FromStr};

use base64::{prelude::BASE64_STANDARD, Engine};
use deflate::deflate_bytes;
use time::OffsetDateTime;
use tracing::debug;
use yaserde::YaSerialize;

use crate::{
    idp_metadata::IdpMetadata, sp_metadata::SpMetadata, utils::random_string, SamlError,
    DATE_TIME_FORMAT,
};

#[derive(YaSerialize)]
#[yaserde(
  namespaces = {
    "samlp" = "urn:oasis:names:tc:SAML:2.0:protocol",
    "saml" = "urn:oasis:names:tc:SAML:2.0:assertion",
  },
  prefix = "samlp",
  rename = "AuthnRequest"
)]
struct AuthnRequestXml {
    #[yaserde(attribute = true, rename = "ID")]
    id: String,
    #[yaserde(attribute = true, rename = "Version")]
    version: String,
    #[yaserde(attribute = true, rename = "IssueInstant")]
    issue_instant: String,
    #[yaserde(attribute = true, rename = "Destination")]
    destination: String,
    #[yaserde(attribute = true, rename = "ProtocolBinding")]
    protocol_binding: String,
    #[yaserde(attribute = true, rename = "AssertionConsumerServiceURL")]
    assertion_consumer_service_url: String,
    #[yaserde(rename = "Issuer", prefix = "saml")]
    issuer: Issuer,
    #[yaserde(rename = "Subject", prefix = "saml")]
    subject: Option<Subject>,
    #[yaserde(rename = "NameIDPolicy", prefix = "samlp")]
    name_id_policy: NameIdPolicy,
    #[yaserde(rename = "RequestedAuthnContext", prefix = "samlp")]
    requested_authn_context: Option<RequestedAuthnContext>,
}

#[derive(YaSerialize)]
struct Issuer {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct NameIdPolicy {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(attribute = true, rename = "AllowCreate")]
    allow_create: bool,
}

#[derive(YaSerialize)]
struct Subject {
    #[yaserde(rename = "NameID", prefix = "saml")]
    name_id: NameId,
}

#[derive(YaSerialize)]
struct NameId {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct RequestedAuthnContext {
    #[yaserde(attribute = true, rename = "Comparison")]
    comparison: String,
    #[yaserde(rename = "AuthnContextClassRef", prefix = "saml")]
    class_refs: Vec<AuthnContextClassRef>,
}

#[derive(YaSerialize)]
struct AuthnContextClassRef {
    #[yaserde(text = true)]
    content: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolBinding {
    Post,
    #[default]
    Redirect,
}

impl Display for ProtocolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ProtocolBinding::Post => write!(f, "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"),
            ProtocolBinding::Redirect => {
                write!(f, "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect")
            }
        }
    }
}

impl FromStr for ProtocolBinding {
    type Err = SamlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" => Ok(ProtocolBinding::Post),
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" => Ok(ProtocolBinding::Redirect),
            other => Err(SamlError::UnsupportedBinding(other.to_string())),
        }
    }
}

/// An outgoing `samlp:AuthnRequest`, ready to be handed to a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    pub id: String,
    pub issue_instant: OffsetDateTime,
    pub issuer: String,
    pub destination: String,
    pub protocol_binding: ProtocolBinding,
    pub consumer_url: String,
    pub name_format: String,
    pub allow_create: bool,
    pub subject: Option<String>,
    pub authn_context_class_refs: Vec<String>,
    pub relay_state: Option<String>,
}

impl AuthnRequest {
    pub fn to_xml(&self) -> Result<String, SamlError> {
        let req = AuthnRequestXml {
            id: self.id.clone(),
            version: "2.0".to_string(),
            issue_instant: self
                .issue_instant
                .format(&DATE_TIME_FORMAT)
                .map_err(|_| SamlError::Encoding)?,
            destination: self.destination.clone(),
            protocol_binding: self.protocol_binding.to_string(),
            assertion_consumer_service_url: self.consumer_url.clone(),
            issuer: Issuer {
                format: "urn:oasis:names:tc:SAML:2.0:nameid-format:entity".to_string(),
                content: self.issuer.clone(),
            },
            subject: self.subject.as_ref().map(|subject| Subject {
                name_id: NameId {
                    format: self.name_format.clone(),
                    content: subject.clone(),
                },
            }),
            name_id_policy: NameIdPolicy {
                format: self.name_format.clone(),
                allow_create: self.allow_create,
            },
            requested_authn_context: (!self.authn_context_class_refs.is_empty()).then(|| {
                RequestedAuthnContext {
                    comparison: "exact".to_string(),
                    class_refs: self
                        .authn_context_class_refs
                        .iter()
                        .map(|class_ref| AuthnContextClassRef {
                            content: class_ref.clone(),
                        })
                        .collect(),
                }
            }),
        };
        yaserde::ser::to_string(&req).map_err(|_| SamlError::Encoding)
    }

    /// Deflated and base64 encoded, as carried by the HTTP-Redirect binding.
    pub fn encode_deflated(&self) -> Result<String, SamlError> {
        let xml = self.to_xml()?;
        let compressed = deflate_bytes(xml.as_bytes());
        Ok(BASE64_STANDARD.encode(compressed))
    }

    /// Plain base64, as carried by the HTTP-POST binding.
    pub fn encode_plain(&self) -> Result<String, SamlError> {
        Ok(BASE64_STANDARD.encode(self.to_xml()?))
    }
}

#[derive(Default)]
pub struct AuthnRequestBuilder {
    id: Option<String>,
    issue_instant: Option<OffsetDateTime>,
    issuer: Option<String>,
    destination: Option<String>,
    protocol_binding: ProtocolBinding,
    consumer_url: Option<String>,
    name_format: Option<String>,
    deny_create: bool,
    subject: Option<String>,
    authn_context_class_refs: Vec<String>,
    relay_state: Option<String>,
}

impl AuthnRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(self, id: &str) -> Self {
        AuthnRequestBuilder {
            id: Some(id.into()),
            ..self
        }
    }

    pub fn auto_id(self) -> Self {
        AuthnRequestBuilder {
            id: Some(format!("_id{}", random_string(32))),
            ..self
        }
    }

    pub fn issue_instant(self, instant: OffsetDateTime) -> Self {
        AuthnRequestBuilder {
            issue_instant: Some(instant),
            ..self
        }
    }

    pub fn issued_now(self) -> Self {
        AuthnRequestBuilder {
            issue_instant: Some(OffsetDateTime::now_utc()),
            ..self
        }
    }

    pub fn issuer(self, issuer: &str) -> Self {
        AuthnRequestBuilder {
            issuer: Some(issuer.into()),
            ..self
        }
    }

    pub fn destination(self, destination: &str) -> Self {
        AuthnRequestBuilder {
            destination: Some(destination.into()),
            ..self
        }
    }

    pub fn protocol_binding(self, binding: ProtocolBinding) -> Self {
        AuthnRequestBuilder {
            protocol_binding: binding,
            ..self
        }
    }

    pub fn consumer_url(self, url: &str) -> Self {
        AuthnRequestBuilder {
            consumer_url: Some(url.into()),
            ..self
        }
    }

    pub fn name_format(self, format: &str) -> Self {
        AuthnRequestBuilder {
            name_format: Some(format.into()),
            ..self
        }
    }

    pub fn allow_create(self, allow: bool) -> Self {
        AuthnRequestBuilder {
            deny_create: !allow,
            ..self
        }
    }

    pub fn subject(self, subject: &str) -> Self {
        AuthnRequestBuilder {
            subject: Some(subject.into()),
            ..self
        }
    }

    pub fn authn_context_class_refs(self, class_refs: &[String]) -> Self {
        AuthnRequestBuilder {
            authn_context_class_refs: class_refs.to_vec(),
            ..self
        }
    }

    pub fn relay_state(self, relay_state: &str) -> Self {
        AuthnRequestBuilder {
            relay_state: Some(relay_state.into()),
            ..self
        }
    }

    pub fn build(self) -> Result<AuthnRequest, SamlError> {
        Ok(AuthnRequest {
            id: self.id.ok_or(SamlError::IncompleteRequest("ID"))?,
            issue_instant: self
                .issue_instant
                .ok_or(SamlError::IncompleteRequest("IssueInstant"))?,
            issuer: self.issuer.ok_or(SamlError::IncompleteRequest("Issuer"))?,
            destination: self
                .destination
                .ok_or(SamlError::IncompleteRequest("Destination"))?,
            protocol_binding: self.protocol_binding,
            consumer_url: self
                .consumer_url
                .ok_or(SamlError::IncompleteRequest("AssertionConsumerServiceURL"))?,
            name_format: self
                .name_format
                .ok_or(SamlError::IncompleteRequest("NameIDPolicy"))?,
            allow_create: !self.deny_create,
            subject: self.subject,
            authn_context_class_refs: self.authn_context_class_refs,
            relay_state: self.relay_state,
        })
    }
}

/// Starts an `AuthnRequest` from `sp` to `idp`.
///
/// The request asks for the SP's configured authentication context and for the
/// response to come back over HTTP-POST. Consumer URL, subject, relay state and
/// destination are left for the caller.
pub fn build_authn_request(sp: &SpMetadata, idp: &IdpMetadata) -> AuthnRequestBuilder {
    debug!(sp = %sp.entity_id, idp = %idp.entity_id, "building AuthnRequest");
    AuthnRequestBuilder::new()
        .auto_id()
        .issued_now()
        .issuer(&sp.entity_id)
        .protocol_binding(ProtocolBinding::Post)
        .name_format(crate::NAME_ID_FORMAT_UNSPECIFIED)
        .allow_create(false)
        .authn_context_class_refs(&sp.authn_context_class_ref)
}
