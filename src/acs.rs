//! The receiving half: the assertion consumer endpoint for SFO responses.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    authn_request::ProtocolBinding,
    binding::{current_binding, InboundMessage, InboundRequest},
    error::StepUpError,
    idp_metadata::MetadataSource,
    response::{ResponseOutcome, ResponseProcessor},
    state::{Pipeline, StateStore},
    status_page::StatusPage,
    STATE_STAGE,
};

#[derive(Debug)]
pub enum AcsOutcome<C> {
    /// The suspended pipeline took over; `C` is what it handed back for the host.
    Resumed(C),
    /// The SFO IdP reported a non-success status.
    StatusPage(StatusPage),
}

pub struct AcsHandler<P> {
    metadata: Arc<dyn MetadataSource>,
    store: Arc<dyn StateStore>,
    processor: Arc<dyn ResponseProcessor>,
    pipeline: P,
}

impl<P: Pipeline> AcsHandler<P> {
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        store: Arc<dyn StateStore>,
        processor: Arc<dyn ResponseProcessor>,
        pipeline: P,
    ) -> Self {
        Self {
            metadata,
            store,
            processor,
            pipeline,
        }
    }

    pub fn handle_response(
        &self,
        request: &InboundRequest,
    ) -> Result<AcsOutcome<P::Continuation>, StepUpError> {
        debug!("SFO - receiving response");

        let binding = current_binding(request).map_err(|_| StepUpError::UnsupportedBinding)?;
        if binding != ProtocolBinding::Post {
            return Err(StepUpError::UnsupportedBinding);
        }

        let response = match binding.receive(request)? {
            InboundMessage::Response(response) => response,
            InboundMessage::Other(name) => return Err(StepUpError::UnexpectedMessageType(name)),
        };

        info!(
            issuer = %response.issuer,
            in_response_to = ?response.in_response_to,
            "SFO - received response"
        );
        debug!(relay_state = ?response.relay_state, "SFO - received response");

        let handle = response
            .relay_state
            .as_deref()
            .filter(|handle| !handle.is_empty())
            .ok_or_else(|| StepUpError::CorrelationNotFound(String::new()))?;
        let state = self.store.load_state(handle, STATE_STAGE)?;

        let (Some(sp_metadata), Some(idp_entity_id)) =
            (state.sfo_sp_metadata.clone(), state.sfo_idp_entity_id.clone())
        else {
            return Err(StepUpError::CorrelationNotFound(handle.into()));
        };

        if idp_entity_id != response.issuer {
            warn!(
                expected = %idp_entity_id,
                issuer = %response.issuer,
                "SFO - response issuer does not match the SFO IdP"
            );
            return Err(StepUpError::IssuerMismatch {
                expected: idp_entity_id,
                actual: response.issuer,
            });
        }

        let idp_metadata = self
            .metadata
            .lookup_idp(&idp_entity_id)
            .ok_or(StepUpError::MetadataMissing(idp_entity_id))?;

        match self
            .processor
            .process_response(&sp_metadata, &idp_metadata, &response)?
        {
            ResponseOutcome::StatusFailure(status) => {
                debug!(status = %status.status, sub_status = ?status.sub_status, "SFO - status response received, showing error page");
                Ok(AcsOutcome::StatusPage(StatusPage::new(
                    &status,
                    idp_metadata.selfservice_url.as_deref(),
                )))
            }
            ResponseOutcome::Success(assertions) => {
                debug!(
                    assertions = assertions.len(),
                    "SFO - successful response received, resume processing"
                );
                Ok(AcsOutcome::Resumed(self.pipeline.resume_processing(state)))
            }
        }
    }
}
