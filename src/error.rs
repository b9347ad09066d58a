use crate::{state::StateError, SamlError};

#[derive(Debug, thiserror::Error)]
pub enum StepUpError {
    #[error("invalid SFO configuration: {0}")]
    Config(String),

    #[error("could not find the metadata of an IdP with entity ID {0:?}")]
    ConfigMetadataMissing(String),

    #[error("subject attribute {0:?} not found in attributes")]
    MissingAttribute(String),

    #[error("subject id {0:?} does not start with urn:collab:person:")]
    InvalidSubjectFormat(String),

    #[error("only HTTP-POST binding supported for SFO")]
    UnsupportedBinding,

    #[error("invalid message received to SFO AssertionConsumerService endpoint: {0}")]
    UnexpectedMessageType(String),

    #[error("no suspended authentication for relay state {0:?}")]
    CorrelationNotFound(String),

    #[error("response issuer {actual:?} does not match the SFO IdP {expected:?} the request was sent to")]
    IssuerMismatch { expected: String, actual: String },

    #[error("could not find the metadata of SFO IdP with entity ID {0:?}")]
    MetadataMissing(String),

    #[error(transparent)]
    Saml(#[from] SamlError),

    #[error(transparent)]
    State(StateError),
}

impl From<StateError> for StepUpError {
    fn from(error: StateError) -> Self {
        match error {
            StateError::NotFound(handle) => StepUpError::CorrelationNotFound(handle),
            other => StepUpError::State(other),
        }
    }
}

impl StepUpError {
    /// The message presented by the client was malformed for this endpoint.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            StepUpError::UnsupportedBinding | StepUpError::UnexpectedMessageType(_)
        )
    }

    pub fn http_status(&self) -> u16 {
        if self.is_bad_request() {
            400
        } else {
            500
        }
    }
}
