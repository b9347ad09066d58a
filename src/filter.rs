//! The delegating half: suspends the pipeline and sends the user to the SFO IdP.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    authn_request::{build_authn_request, AuthnRequest, ProtocolBinding},
    binding::Dispatch,
    config::{ModuleUrls, SfoConfig},
    error::StepUpError,
    idp_metadata::{IdpMetadata, MetadataSource},
    sp_metadata::{SpMetadata, SpMetadataBuilder},
    state::{PipelineState, StateStore},
    SamlError, STATE_STAGE, SUBJECT_PREFIX,
};

#[derive(Debug)]
#[must_use]
pub enum FilterOutcome {
    /// Step-up bypassed; the pipeline carries on with the state unchanged.
    Continue,
    /// The pipeline is suspended. The host emits `dispatch` and ends the request.
    Delegated {
        request: AuthnRequest,
        dispatch: Dispatch,
    },
}

pub struct StepUpFilter {
    subject_attribute: String,
    skip_entities: Vec<String>,
    sp_metadata: SpMetadata,
    idp_metadata: IdpMetadata,
    sso_location: String,
    store: Arc<dyn StateStore>,
}

impl StepUpFilter {
    pub fn new(
        config: SfoConfig,
        urls: &ModuleUrls,
        metadata: &dyn MetadataSource,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, StepUpError> {
        config.validate()?;

        let idp_metadata = metadata
            .lookup_idp(&config.idp_entity_id)
            .ok_or_else(|| StepUpError::ConfigMetadataMissing(config.idp_entity_id.clone()))?;
        let sso_location = idp_metadata
            .sso_endpoint(ProtocolBinding::Redirect)
            .ok_or_else(|| {
                StepUpError::Config(format!(
                    "SFO IdP {:?} has no HTTP-Redirect SingleSignOnService",
                    idp_metadata.entity_id
                ))
            })?
            .to_string();

        let sp_metadata = SpMetadata {
            entity_id: config.entity_id.unwrap_or_else(|| urls.metadata_url()),
            authn_context_class_ref: vec![config.loa],
            acs_url: urls.acs_url(),
        };

        Ok(Self {
            subject_attribute: config.subject_attribute,
            skip_entities: config.skip_entities,
            sp_metadata,
            idp_metadata,
            sso_location,
            store,
        })
    }

    pub fn sp_metadata(&self) -> &SpMetadata {
        &self.sp_metadata
    }

    /// SP metadata describing this module's ACS endpoint, for registration at the SFO IdP.
    pub fn sp_metadata_xml(&self) -> Result<String, SamlError> {
        SpMetadataBuilder::from(&self.sp_metadata).build()
    }

    fn skip_entity(&self, state: &PipelineState) -> Option<&str> {
        self.skip_entities
            .iter()
            .find(|skip| {
                *skip == state.sp_entity_id() || state.requester_ids.iter().any(|id| id == *skip)
            })
            .map(String::as_str)
    }

    pub fn process(&self, state: &mut PipelineState) -> Result<FilterOutcome, StepUpError> {
        if let Some(skip) = self.skip_entity(state) {
            info!(entity = %skip, "SFO - skipping SFO for entity");
            return Ok(FilterOutcome::Continue);
        }

        state.sfo_sp_metadata = Some(self.sp_metadata.clone());
        state.sfo_idp_entity_id = Some(self.idp_metadata.entity_id.clone());
        // The state is stashed before the subject is checked; a rejected
        // subject leaves its entry to expire in the store.
        let handle = self.store.save_state(state, STATE_STAGE)?;

        let subject = state
            .attributes
            .get(&self.subject_attribute)
            .and_then(|values| values.first())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| StepUpError::MissingAttribute(self.subject_attribute.clone()))?;
        if !subject.starts_with(SUBJECT_PREFIX) {
            return Err(StepUpError::InvalidSubjectFormat(subject.clone()));
        }

        let request = build_authn_request(&self.sp_metadata, &self.idp_metadata)
            .consumer_url(&self.sp_metadata.acs_url)
            .subject(subject)
            .relay_state(&handle)
            .destination(&self.sso_location)
            .build()?;

        debug!(
            subject = %subject,
            idp = %self.idp_metadata.entity_id,
            id = %request.id,
            "Sending SAML 2 SFO AuthnRequest"
        );

        let dispatch = ProtocolBinding::Redirect.send(&request)?;
        Ok(FilterOutcome::Delegated { request, dispatch })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{idp_metadata::MetadataStore, state::InMemoryStateStore};

    const IDP: &str = "https://idp.example/sfo";

    fn metadata() -> MetadataStore {
        let store = MetadataStore::new();
        store.insert(
            IdpMetadata::new(IDP, vec![])
                .with_sso_endpoint(ProtocolBinding::Post, "https://idp.example/sfo/post")
                .with_sso_endpoint(ProtocolBinding::Redirect, "https://idp.example/sfo/redirect"),
        );
        store
    }

    fn config() -> SfoConfig {
        SfoConfig::from_value(json!({
            "subjectattribute": "urn:mace:dir:attribute-def:eduPersonPrincipalName",
            "idpEntityid": IDP,
            "loa": "http://example.org/assurance/loa2",
        }))
        .unwrap()
    }

    fn filter() -> StepUpFilter {
        StepUpFilter::new(
            config(),
            &ModuleUrls::new("https://proxy.example"),
            &metadata(),
            Arc::new(InMemoryStateStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn sp_metadata_takes_loa_and_module_urls() {
        let filter = filter();
        let sp = filter.sp_metadata();
        assert_eq!(sp.entity_id, "https://proxy.example/stepupsfo/metadata");
        assert_eq!(sp.acs_url, "https://proxy.example/stepupsfo/acs");
        assert_eq!(
            sp.authn_context_class_ref,
            vec!["http://example.org/assurance/loa2".to_string()]
        );
        let xml = filter.sp_metadata_xml().unwrap();
        assert!(xml.contains("https://proxy.example/stepupsfo/acs"));
    }

    #[test]
    fn entityid_overrides_issuer() {
        let mut config = config();
        config.entity_id = Some("https://proxy.example/sfo-sp".into());
        let filter = StepUpFilter::new(
            config,
            &ModuleUrls::new("https://proxy.example"),
            &metadata(),
            Arc::new(InMemoryStateStore::new()),
        )
        .unwrap();
        assert_eq!(filter.sp_metadata().entity_id, "https://proxy.example/sfo-sp");
    }

    #[test]
    fn idp_without_redirect_endpoint_is_rejected() {
        let metadata = MetadataStore::new();
        metadata.insert(
            IdpMetadata::new(IDP, vec![])
                .with_sso_endpoint(ProtocolBinding::Post, "https://idp.example/sfo/post"),
        );
        let result = StepUpFilter::new(
            config(),
            &ModuleUrls::new("https://proxy.example"),
            &metadata,
            Arc::new(InMemoryStateStore::new()),
        );
        assert!(matches!(result, Err(StepUpError::Config(_))));
    }

    const SUBJECT_ATTRIBUTE: &str = "urn:mace:dir:attribute-def:eduPersonPrincipalName";

    fn filter_with_store(config: SfoConfig) -> (StepUpFilter, Arc<InMemoryStateStore>) {
        let store = Arc::new(InMemoryStateStore::new());
        let filter = StepUpFilter::new(
            config,
            &ModuleUrls::new("https://proxy.example"),
            &metadata(),
            store.clone(),
        )
        .unwrap();
        (filter, store)
    }

    fn skipping(entities: &[&str]) -> SfoConfig {
        let mut config = config();
        config.skip_entities = entities.iter().map(|e| e.to_string()).collect();
        config
    }

    #[test]
    fn skips_listed_sp_without_touching_state() {
        let (filter, store) = filter_with_store(skipping(&["https://skipped.example"]));
        let mut state = PipelineState::new("https://skipped.example")
            .with_attribute(SUBJECT_ATTRIBUTE, &["urn:collab:person:abc123"]);
        let before = state.clone();

        assert!(matches!(
            filter.process(&mut state).unwrap(),
            FilterOutcome::Continue
        ));
        assert_eq!(state, before);
        assert!(store.is_empty());
    }

    #[test]
    fn skips_listed_requester() {
        let (filter, store) = filter_with_store(skipping(&["https://requester.example"]));
        let mut state = PipelineState::new("https://sp.example")
            .with_requester_id("https://other.example")
            .with_requester_id("https://requester.example");
        let before = state.clone();

        assert!(matches!(
            filter.process(&mut state).unwrap(),
            FilterOutcome::Continue
        ));
        assert_eq!(state, before);
        assert!(store.is_empty());
    }

    #[test]
    fn skip_list_does_not_match_other_entities() {
        let (filter, store) = filter_with_store(skipping(&["https://skipped.example"]));
        let mut state = PipelineState::new("https://sp.example")
            .with_attribute(SUBJECT_ATTRIBUTE, &["urn:collab:person:abc123"]);
        assert!(matches!(
            filter.process(&mut state).unwrap(),
            FilterOutcome::Delegated { .. }
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn bad_subject_is_rejected_after_stashing() {
        let (filter, store) = filter_with_store(config());
        let mut state = PipelineState::new("https://sp.example")
            .with_attribute(SUBJECT_ATTRIBUTE, &["alice@example.org"]);

        let err = filter.process(&mut state).unwrap_err();
        assert!(matches!(err, StepUpError::InvalidSubjectFormat(subject) if subject == "alice@example.org"));
        assert_eq!(store.len(), 1);
        assert!(state.correlation_handle.is_some());
    }

    #[test]
    fn missing_subject_is_rejected_after_stashing() {
        let (filter, store) = filter_with_store(config());
        let mut state = PipelineState::new("https://sp.example");

        let err = filter.process(&mut state).unwrap_err();
        assert!(matches!(err, StepUpError::MissingAttribute(name) if name == SUBJECT_ATTRIBUTE));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn builds_redirect_request_for_subject() {
        let (filter, _store) = filter_with_store(config());
        let mut state = PipelineState::new("https://sp.example")
            .with_attribute(SUBJECT_ATTRIBUTE, &["urn:collab:person:abc123", "ignored"]);

        let FilterOutcome::Delegated { request, dispatch } = filter.process(&mut state).unwrap()
        else {
            panic!("expected delegation");
        };
        assert_eq!(request.subject.as_deref(), Some("urn:collab:person:abc123"));
        assert_eq!(request.destination, "https://idp.example/sfo/redirect");
        assert_eq!(request.consumer_url, "https://proxy.example/stepupsfo/acs");
        assert_eq!(request.issuer, "https://proxy.example/stepupsfo/metadata");
        assert_eq!(
            request.authn_context_class_refs,
            vec!["http://example.org/assurance/loa2".to_string()]
        );
        assert_eq!(request.relay_state, state.correlation_handle);
        assert!(dispatch
            .location()
            .unwrap()
            .starts_with("https://idp.example/sfo/redirect?SAMLRequest="));
    }

    #[test]
    fn stashed_state_round_trips() {
        let (filter, store) = filter_with_store(config());
        let mut state = PipelineState::new("https://sp.example")
            .with_attribute(SUBJECT_ATTRIBUTE, &["urn:collab:person:abc123"]);
        state.extra.insert("Source".into(), json!({"entityid": "https://home.example"}));

        let _ = filter.process(&mut state).unwrap();
        let handle = state.correlation_handle.clone().unwrap();
        let loaded = store.load_state(&handle, STATE_STAGE).unwrap();

        assert_eq!(loaded, state);
        assert_eq!(loaded.sfo_sp_metadata.as_ref(), Some(filter.sp_metadata()));
        assert_eq!(loaded.sfo_idp_entity_id.as_deref(), Some(IDP));
    }

    #[test]
    fn each_process_stashes_under_a_new_handle() {
        let (filter, store) = filter_with_store(config());
        let mut first = PipelineState::new("https://sp.example")
            .with_attribute(SUBJECT_ATTRIBUTE, &["urn:collab:person:abc123"]);
        let mut second = first.clone();
        let _ = filter.process(&mut first).unwrap();
        let _ = filter.process(&mut second).unwrap();
        assert_ne!(first.correlation_handle, second.correlation_handle);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn unknown_sfo_idp_fails_construction() {
        let mut config = config();
        config.idp_entity_id = "https://unknown.example".into();
        let result = StepUpFilter::new(
            config,
            &ModuleUrls::new("https://proxy.example"),
            &metadata(),
            Arc::new(InMemoryStateStore::new()),
        );
        assert!(matches!(
            result,
            Err(StepUpError::ConfigMetadataMissing(id)) if id == "https://unknown.example"
        ));
    }

    #[test]
    fn empty_first_value_is_missing() {
        let mut state = PipelineState::new("https://sp.example")
            .with_attribute(SUBJECT_ATTRIBUTE, &[""]);
        assert!(matches!(
            filter().process(&mut state),
            Err(StepUpError::MissingAttribute(_))
        ));
    }
}
