use std::collections::HashMap;

use libxml::{parser::Parser as XmlParser, xpath::Context};
use parking_lot::RwLock;

use crate::{
    authn_request::ProtocolBinding,
    utils::{decode_xml_base64, NS_METADATA, NS_XMLDSIG},
    SamlError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct IdpMetadata {
    pub entity_id: String,
    pub signing_certificate: Vec<u8>,
    pub sso_bindings: HashMap<ProtocolBinding, String>,
    /// Where users enroll or review their second-factor tokens.
    pub selfservice_url: Option<String>,
}

impl IdpMetadata {
    pub fn new(entity_id: &str, signing_certificate: Vec<u8>) -> Self {
        Self {
            entity_id: entity_id.into(),
            signing_certificate,
            sso_bindings: HashMap::new(),
            selfservice_url: None,
        }
    }

    pub fn with_sso_endpoint(mut self, binding: ProtocolBinding, location: &str) -> Self {
        self.sso_bindings.insert(binding, location.into());
        self
    }

    pub fn with_selfservice_url(mut self, url: &str) -> Self {
        self.selfservice_url = Some(url.into());
        self
    }

    pub fn sso_endpoint(&self, binding: ProtocolBinding) -> Option<&str> {
        self.sso_bindings.get(&binding).map(String::as_str)
    }
}

pub fn parse_idp_metadata(input: &[u8]) -> Result<IdpMetadata, SamlError> {
    let parser = XmlParser::default();

    let document = parser.parse_string(input).map_err(SamlError::InvalidXml)?;

    let context = Context::new(&document).map_err(|_| SamlError::XPath)?;
    context
        .register_namespace("md", NS_METADATA)
        .map_err(|_| SamlError::XPath)?;
    context
        .register_namespace("ds", NS_XMLDSIG)
        .map_err(|_| SamlError::XPath)?;

    let entity_id = context
        .findvalue("//md:EntityDescriptor/@entityID", None)
        .map_err(|_| SamlError::InvalidMetadata)?;
    if entity_id.is_empty() {
        return Err(SamlError::InvalidMetadata);
    }

    let encoded_certificate = context
    .findvalue("//md:EntityDescriptor/md:IDPSSODescriptor/md:KeyDescriptor[@use=\"signing\"]/ds:KeyInfo/ds:X509Data/ds:X509Certificate/text()", None)
    .map_err(|_| SamlError::InvalidMetadata)?;
    let signing_certificate =
        decode_xml_base64(&encoded_certificate).map_err(|_| SamlError::InvalidMetadata)?;

    let sso_nodes = context
        .evaluate("//md:EntityDescriptor/md:IDPSSODescriptor/md:SingleSignOnService")
        .map_err(|_| SamlError::InvalidMetadata)?
        .get_nodes_as_vec();

    let mut sso_bindings = HashMap::new();
    for sso_node in sso_nodes {
        if let Ok(binding) = sso_node
            .get_attribute("Binding")
            .ok_or(SamlError::InvalidMetadata)?
            .parse()
        {
            let location = sso_node
                .get_attribute("Location")
                .ok_or(SamlError::InvalidMetadata)?;
            sso_bindings.insert(binding, location);
        }
    }

    Ok(IdpMetadata {
        entity_id,
        signing_certificate,
        sso_bindings,
        selfservice_url: None,
    })
}

/// Lookup of remote IdP metadata (the `saml20-idp-remote` set) by entity id.
pub trait MetadataSource: Send + Sync {
    fn lookup_idp(&self, entity_id: &str) -> Option<IdpMetadata>;
}

/// In-memory metadata set. Entries may be replaced or removed at runtime.
#[derive(Debug, Default)]
pub struct MetadataStore {
    idps: RwLock<HashMap<String, IdpMetadata>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, metadata: IdpMetadata) {
        self.idps.write().insert(metadata.entity_id.clone(), metadata);
    }

    /// Parses an `md:EntityDescriptor` and adds it, returning the entity id.
    pub fn insert_xml(
        &self,
        input: &[u8],
        selfservice_url: Option<&str>,
    ) -> Result<String, SamlError> {
        let mut metadata = parse_idp_metadata(input)?;
        metadata.selfservice_url = selfservice_url.map(Into::into);
        let entity_id = metadata.entity_id.clone();
        self.insert(metadata);
        Ok(entity_id)
    }

    pub fn remove(&self, entity_id: &str) -> Option<IdpMetadata> {
        self.idps.write().remove(entity_id)
    }
}

impl MetadataSource for MetadataStore {
    fn lookup_idp(&self, entity_id: &str) -> Option<IdpMetadata> {
        self.idps.read().get(entity_id).cloned()
    }
}
