use base64::{prelude::BASE64_STANDARD, Engine};
use libxml::{
    tree::{Document, Node},
    xpath::{Context, Object},
};
use rand::distributions::{Alphanumeric, DistString};

use crate::SamlError;

pub const NS_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const NS_METADATA: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub const NS_XMLDSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

pub fn random_string(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

/// `_` followed by 40 hex characters, 160 bits of randomness.
pub fn random_id() -> String {
    format!("_{}", hex::encode(rand::random::<[u8; 20]>()))
}

pub fn single_node(object: &Object) -> Result<Node, SamlError> {
    let mut nodes = object.get_nodes_as_vec();
    if nodes.len() != 1 {
        return Err(SamlError::InvalidAssertion);
    }
    Ok(nodes.remove(0))
}

pub fn decode_xml_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let stripped = input.replace([' ', '\n', '\r', '\t'], "");
    BASE64_STANDARD.decode(stripped)
}

/// XPath context with the protocol (`saml2p`) and assertion (`saml2`) prefixes bound.
pub fn protocol_context(document: &Document) -> Result<Context, SamlError> {
    let context = Context::new(document).map_err(|_| SamlError::XPath)?;
    context
        .register_namespace("saml2p", NS_PROTOCOL)
        .map_err(|_| SamlError::XPath)?;
    context
        .register_namespace("saml2", NS_ASSERTION)
        .map_err(|_| SamlError::XPath)?;
    Ok(context)
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_unique_and_prefixed() {
        let a = random_id();
        let b = random_id();
        assert_ne!(a, b);
        assert!(a.starts_with('_'));
        assert_eq!(a.len(), 41);
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn decodes_wrapped_base64() {
        assert_eq!(decode_xml_base64("aGVs\nbG8=\r\n").unwrap(), b"hello");
    }
}
