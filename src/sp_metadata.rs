use serde::{Deserialize, Serialize};
use yaserde::YaSerialize;

use crate::SamlError;

/// The requesting side of the SFO exchange, stashed with the pipeline state so
/// the response can be validated against the same configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpMetadata {
    pub entity_id: String,
    #[serde(rename = "AuthnContextClassRef")]
    pub authn_context_class_ref: Vec<String>,
    pub acs_url: String,
}

#[derive(YaSerialize)]
#[yaserde(
  namespaces = {
    "md" = "urn:oasis:names:tc:SAML:2.0:metadata",
  },
  prefix = "md"
)]
struct EntityDescriptor {
    #[yaserde(attribute = true, rename = "entityID")]
    entity_id: String,
    #[yaserde(rename = "SPSSODescriptor", prefix = "md")]
    sp_sso_descriptor: SPSSODescriptor,
}

#[derive(YaSerialize)]
struct SPSSODescriptor {
    #[yaserde(attribute = true, rename = "AuthnRequestsSigned")]
    authn_requests_signed: bool,
    #[yaserde(attribute = true, rename = "WantAssertionsSigned")]
    want_assertions_signed: bool,
    #[yaserde(attribute = true, rename = "protocolSupportEnumeration")]
    protocol_support_enumeration: String,
    #[yaserde(rename = "NameIDFormat", prefix = "md")]
    name_id_format: NameIdFormat,
    #[yaserde(rename = "AssertionConsumerService", prefix = "md")]
    assertion_consumer_service: AssertionConsumerService,
}

#[derive(YaSerialize)]
struct NameIdFormat {
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct AssertionConsumerService {
    #[yaserde(attribute = true, rename = "Binding")]
    binding: String,
    #[yaserde(attribute = true, rename = "Location")]
    location: String,
    #[yaserde(attribute = true)]
    index: u32,
}

#[derive(Default)]
pub struct SpMetadataBuilder {
    entity_id: Option<String>,
    acs_url: Option<String>,
    name_id_format: Option<String>,
}

impl SpMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_id(self, entity_id: &str) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..self
        }
    }

    pub fn acs_url(self, acs_url: &str) -> Self {
        Self {
            acs_url: Some(acs_url.into()),
            ..self
        }
    }

    pub fn name_id_format(self, name_id_format: &str) -> Self {
        Self {
            name_id_format: Some(name_id_format.into()),
            ..self
        }
    }

    pub fn build(self) -> Result<String, SamlError> {
        let metadata = EntityDescriptor {
            entity_id: self.entity_id.ok_or(SamlError::InvalidMetadata)?,
            sp_sso_descriptor: SPSSODescriptor {
                authn_requests_signed: false,
                want_assertions_signed: true,
                protocol_support_enumeration: "urn:oasis:names:tc:SAML:2.0:protocol".into(),
                name_id_format: NameIdFormat {
                    content: self.name_id_format.ok_or(SamlError::InvalidMetadata)?,
                },
                assertion_consumer_service: AssertionConsumerService {
                    binding: "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST".into(),
                    location: self.acs_url.ok_or(SamlError::InvalidMetadata)?,
                    index: 0,
                },
            },
        };
        yaserde::ser::to_string(&metadata).map_err(|_| SamlError::Encoding)
    }
}

impl From<&SpMetadata> for SpMetadataBuilder {
    fn from(sp: &SpMetadata) -> Self {
        SpMetadataBuilder::new()
            .entity_id(&sp.entity_id)
            .acs_url(&sp.acs_url)
            .name_id_format(crate::NAME_ID_FORMAT_UNSPECIFIED)
    }
}

#[cfg(test)]
mod tests {
    use crate::NAME_ID_FORMAT_UNSPECIFIED;

    use super::*;

    #[test]
    fn can_build_sp_metadata() {
        let xml = SpMetadataBuilder::new()
            .entity_id("entity_id")
            .acs_url("https://foo.com/acs")
            .name_id_format(NAME_ID_FORMAT_UNSPECIFIED)
            .build()
            .unwrap();
        assert!(xml.contains(r#"entityID="entity_id""#));
        assert!(xml.contains(r#"Location="https://foo.com/acs""#));
        assert!(xml.contains("bindings:HTTP-POST"));
    }

    #[test]
    fn entity_id_is_required() {
        assert!(SpMetadataBuilder::new()
            .acs_url("https://foo.com/acs")
            .name_id_format(NAME_ID_FORMAT_UNSPECIFIED)
            .build()
            .is_err());
    }

    #[test]
    fn stashed_form_keeps_class_ref_key() {
        let sp = SpMetadata {
            entity_id: "https://sp.example".into(),
            authn_context_class_ref: vec!["urn:loa2".into()],
            acs_url: "https://sp.example/acs".into(),
        };
        let value = serde_json::to_value(&sp).unwrap();
        assert_eq!(value["AuthnContextClassRef"][0], "urn:loa2");
        assert_eq!(serde_json::from_value::<SpMetadata>(value).unwrap(), sp);
    }
}
