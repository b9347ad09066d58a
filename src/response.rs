use libxml::{parser::Parser as XmlParser, tree::Node, xpath::Context};
use time::{format_description::well_known::Iso8601, OffsetDateTime};
use xmlsec::{XmlSecDocumentExt as _, XmlSecKey, XmlSecKeyFormat, XmlSecSignatureContext};

use crate::{
    idp_metadata::IdpMetadata,
    sp_metadata::SpMetadata,
    utils::{
        decode_xml_base64, protocol_context, single_node, NS_ASSERTION, NS_PROTOCOL, NS_XMLDSIG,
    },
    SamlError, STATUS_SUCCESS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlStatus {
    pub code: String,
    pub sub_code: Option<String>,
    pub message: Option<String>,
}

impl SamlStatus {
    pub fn is_success(&self) -> bool {
        self.code == STATUS_SUCCESS
    }
}

/// A decoded `samlp:Response`, not yet validated.
#[derive(Debug, Clone)]
pub struct SamlResponse {
    pub id: String,
    pub issuer: String,
    pub in_response_to: Option<String>,
    pub relay_state: Option<String>,
    pub status: SamlStatus,
    pub xml: Vec<u8>,
}

/// Non-success status reported by the IdP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    pub status: String,
    pub sub_status: Option<String>,
    pub message: Option<String>,
}

impl From<&SamlStatus> for StatusError {
    fn from(status: &SamlStatus) -> Self {
        Self {
            status: status.code.clone(),
            sub_status: status.sub_code.clone(),
            message: status.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub issuer: String,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Success(Vec<Assertion>),
    StatusFailure(StatusError),
}

/// Validates response content (status, signature, conditions) for a given SP/IdP pair.
pub trait ResponseProcessor: Send + Sync {
    fn process_response(
        &self,
        sp: &SpMetadata,
        idp: &IdpMetadata,
        response: &SamlResponse,
    ) -> Result<ResponseOutcome, SamlError>;
}

// Trimmed; an empty node set reads as `None`.
fn find_optional(context: &Context, xpath: &str, node: Option<&Node>) -> Option<String> {
    let value = context.findvalue(xpath, node).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn decode_response(input: &str) -> Result<Vec<u8>, SamlError> {
    decode_xml_base64(input).map_err(|_| SamlError::InvalidResponse)
}

pub fn parse_response(input: &[u8], relay_state: Option<String>) -> Result<SamlResponse, SamlError> {
    let parser = XmlParser::default();

    let document = parser.parse_string(input).map_err(SamlError::InvalidXml)?;
    let root = document
        .get_root_element()
        .ok_or(SamlError::InvalidResponse)?;
    if root.get_name() != "Response"
        || !root
            .get_namespace()
            .is_some_and(|ns| ns.get_href() == NS_PROTOCOL)
    {
        return Err(SamlError::InvalidResponse);
    }

    let context = protocol_context(&document)?;

    // Not trimmed: the issuer check is exact.
    let issuer = context
        .findvalue("/saml2p:Response/saml2:Issuer/text()", None)
        .ok()
        .filter(|issuer| !issuer.is_empty())
        .ok_or(SamlError::InvalidIssuer)?;
    let code = find_optional(
        &context,
        "/saml2p:Response/saml2p:Status/saml2p:StatusCode/@Value",
        None,
    )
    .ok_or(SamlError::InvalidResponse)?;
    let sub_code = find_optional(
        &context,
        "/saml2p:Response/saml2p:Status/saml2p:StatusCode/saml2p:StatusCode/@Value",
        None,
    );
    let message = find_optional(
        &context,
        "/saml2p:Response/saml2p:Status/saml2p:StatusMessage/text()",
        None,
    );

    Ok(SamlResponse {
        id: root.get_attribute("ID").ok_or(SamlError::InvalidResponse)?,
        issuer,
        in_response_to: root.get_attribute("InResponseTo"),
        relay_state,
        status: SamlStatus {
            code,
            sub_code,
            message,
        },
        xml: input.to_vec(),
    })
}

fn check_conditions(
    context: &Context,
    assertion: &Node,
    now: OffsetDateTime,
    audience: &str,
) -> Result<(), SamlError> {
    let condition_node = single_node(
        &context
            .node_evaluate("./saml2:Conditions", assertion)
            .map_err(|_| SamlError::InvalidAssertion)?,
    )?;

    if let Some(not_before) = find_optional(context, "./@NotBefore", Some(&condition_node)) {
        let not_before = OffsetDateTime::parse(&not_before, &Iso8601::DEFAULT)
            .map_err(|_| SamlError::InvalidCondition)?;
        if now < not_before {
            return Err(SamlError::ConditionNotMet);
        }
    }

    if let Some(not_on_or_after) =
        find_optional(context, "./@NotOnOrAfter", Some(&condition_node))
    {
        let not_on_or_after = OffsetDateTime::parse(&not_on_or_after, &Iso8601::DEFAULT)
            .map_err(|_| SamlError::InvalidCondition)?;
        if now >= not_on_or_after {
            return Err(SamlError::ConditionNotMet);
        }
    }

    if let Some(audience_restriction) = find_optional(
        context,
        "./saml2:AudienceRestriction/saml2:Audience/text()",
        Some(&condition_node),
    ) {
        if audience != audience_restriction {
            return Err(SamlError::ConditionNotMet);
        }
    }

    Ok(())
}

/// Verifies the signature on the response or on its assertion, then the
/// assertion conditions, returning the subject NameID.
pub fn validate_response(
    input: &[u8],
    cert: &[u8],
    now: OffsetDateTime,
    audience: &str,
) -> Result<String, SamlError> {
    let parser = XmlParser::default();

    let document = parser.parse_string(input).map_err(SamlError::InvalidXml)?;
    let root = document
        .get_root_element()
        .ok_or(SamlError::InvalidResponse)?;

    let key = XmlSecKey::from_memory(cert, XmlSecKeyFormat::CertDer, None)
        .map_err(|_| SamlError::InvalidMetadata)?;

    let mut sigctx = XmlSecSignatureContext::new();
    sigctx.insert_key(key);

    document
        .specify_idattr(
            "//saml2p:Response",
            "ID",
            Some(&[("saml2p", NS_PROTOCOL)]),
        )
        .map_err(|_| SamlError::InvalidSignature)?;
    document
        .specify_idattr(
            "//saml2:Assertion",
            "ID",
            Some(&[("saml2", NS_ASSERTION)]),
        )
        .map_err(|_| SamlError::InvalidAssertion)?;

    let valid = sigctx
        .verify_document(&document)
        .map_err(|_| SamlError::InvalidSignature)?;

    if !valid {
        return Err(SamlError::InvalidSignature);
    }

    let context = protocol_context(&document)?;
    context
        .register_namespace("ds", NS_XMLDSIG)
        .map_err(|_| SamlError::XPath)?;

    let assertion = single_node(
        &context
            .evaluate("/saml2p:Response/saml2:Assertion")
            .map_err(|_| SamlError::InvalidAssertion)?,
    )?;

    // xmlsec verified the first signature in document order. It must cover
    // the response itself or the assertion read below.
    let reference = context
        .evaluate("(//ds:Signature)[1]/ds:SignedInfo/ds:Reference")
        .map_err(|_| SamlError::InvalidSignature)
        .and_then(|object| single_node(&object).map_err(|_| SamlError::InvalidSignature))?;
    let signed_id = reference
        .get_attribute("URI")
        .and_then(|uri| uri.strip_prefix('#').map(str::to_string))
        .ok_or(SamlError::InvalidSignature)?;
    let is_signed =
        |node: &Node| node.get_attribute("ID").as_deref() == Some(signed_id.as_str());
    if !is_signed(&root) && !is_signed(&assertion) {
        return Err(SamlError::InvalidSignature);
    }

    check_conditions(&context, &assertion, now, audience)?;

    find_optional(
        &context,
        "./saml2:Subject/saml2:NameID/text()",
        Some(&assertion),
    )
    .ok_or(SamlError::InvalidAssertion)
}

/// Response processor backed by XML signature verification against the IdP's signing certificate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignedResponseProcessor;

impl ResponseProcessor for SignedResponseProcessor {
    fn process_response(
        &self,
        sp: &SpMetadata,
        idp: &IdpMetadata,
        response: &SamlResponse,
    ) -> Result<ResponseOutcome, SamlError> {
        if !response.status.is_success() {
            return Ok(ResponseOutcome::StatusFailure(StatusError::from(
                &response.status,
            )));
        }

        let subject = validate_response(
            &response.xml,
            &idp.signing_certificate,
            OffsetDateTime::now_utc(),
            &sp.entity_id,
        )?;

        Ok(ResponseOutcome::Success(vec![Assertion {
            issuer: response.issuer.clone(),
            subject,
        }]))
    }
}
