use libxml::parser::XmlParseError;

mod acs;
mod authn_request;
mod binding;
mod config;
mod error;
mod filter;
mod idp_metadata;
mod response;
mod sp_metadata;
mod state;
mod status_page;
mod utils;

pub use acs::{AcsHandler, AcsOutcome};
pub use authn_request::{build_authn_request, AuthnRequest, AuthnRequestBuilder, ProtocolBinding};
pub use binding::{current_binding, Dispatch, InboundMessage, InboundRequest, Method};
pub use config::{ModuleUrls, SfoConfig};
pub use error::StepUpError;
pub use filter::{FilterOutcome, StepUpFilter};
pub use idp_metadata::{parse_idp_metadata, IdpMetadata, MetadataSource, MetadataStore};
pub use response::{
    decode_response, parse_response, validate_response, Assertion, ResponseOutcome,
    ResponseProcessor, SamlResponse, SamlStatus, SignedResponseProcessor, StatusError,
};
pub use sp_metadata::{SpMetadata, SpMetadataBuilder};
pub use state::{
    InMemoryStateStore, Pipeline, PipelineState, RequesterMetadata, StateError, StateStore,
    DEFAULT_STATE_TTL,
};
pub use status_page::{StatusCategory, StatusPage};
use time::format_description::well_known::iso8601::{self, TimePrecision};

pub const NAME_ID_FORMAT_UNSPECIFIED: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
pub const STATUS_RESPONDER: &str = "urn:oasis:names:tc:SAML:2.0:status:Responder";
pub const STATUS_AUTHN_FAILED: &str = "urn:oasis:names:tc:SAML:2.0:status:AuthnFailed";
pub const STATUS_NO_AUTHN_CONTEXT: &str = "urn:oasis:names:tc:SAML:2.0:status:NoAuthnContext";

/// Namespace tag under which suspended pipeline state is stashed.
pub const STATE_STAGE: &str = "stepupsfo:pre";

/// Subject identifiers handed to the SFO IdP must carry this prefix.
pub const SUBJECT_PREFIX: &str = "urn:collab:person:";

// xs:dateTime isn't actually ISO8601, because implementors often don't support higher precisions.
pub const DATE_TIME_FORMAT: iso8601::Iso8601<
    {
        iso8601::Config::DEFAULT
            .set_time_precision(TimePrecision::Second {
                decimal_digits: None,
            })
            .encode()
    },
> = iso8601::Iso8601;

#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    #[error("invalid SAML response")]
    InvalidResponse,
    #[error("invalid XML: {0:?}")]
    InvalidXml(XmlParseError),
    #[error("XPath evaluation failed")]
    XPath,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("invalid assertion")]
    InvalidAssertion,
    #[error("response has no issuer")]
    InvalidIssuer,
    #[error("invalid metadata")]
    InvalidMetadata,
    #[error("invalid condition")]
    InvalidCondition,
    #[error("assertion conditions not met")]
    ConditionNotMet,
    #[error("unsupported binding {0:?}")]
    UnsupportedBinding(String),
    #[error("no SAML message in request")]
    MissingMessage,
    #[error("could not encode message")]
    Encoding,
    #[error("AuthnRequest is missing {0}")]
    IncompleteRequest(&'static str),
}
