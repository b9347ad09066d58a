use crate::{
    response::StatusError, utils::html_escape, STATUS_AUTHN_FAILED, STATUS_NO_AUTHN_CONTEXT,
    STATUS_RESPONDER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    AuthnFailed,
    /// The user has no token registered at the requested level.
    NoAuthnContext,
    Unexpected,
}

/// Explanation shown when the SFO IdP answers with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPage {
    pub status: String,
    pub sub_status: String,
    pub status_message: String,
    pub selfservice_url: String,
}

impl StatusPage {
    pub fn new(error: &StatusError, selfservice_url: Option<&str>) -> Self {
        Self {
            status: error.status.clone(),
            sub_status: error.sub_status.clone().unwrap_or_default(),
            status_message: error.message.clone().unwrap_or_default(),
            selfservice_url: selfservice_url.unwrap_or_default().into(),
        }
    }

    pub fn category(&self) -> StatusCategory {
        if self.status != STATUS_RESPONDER {
            return StatusCategory::Unexpected;
        }
        match self.sub_status.as_str() {
            STATUS_AUTHN_FAILED => StatusCategory::AuthnFailed,
            STATUS_NO_AUTHN_CONTEXT => StatusCategory::NoAuthnContext,
            _ => StatusCategory::Unexpected,
        }
    }

    fn status_line(&self) -> String {
        format!(
            "<p><small>{} {}</small></p>",
            html_escape(&self.status),
            html_escape(&self.sub_status)
        )
    }

    pub fn render(&self) -> String {
        let body = match self.category() {
            StatusCategory::AuthnFailed => format!(
                "<p>Authentication not successful:<br/><br/>\n<strong>{}</strong></p>\n\n{}",
                html_escape(&self.status_message),
                self.status_line()
            ),
            StatusCategory::NoAuthnContext => format!(
                "<p>You could not be authenticated at the requested level.<br/>\n{}</p>\n\n\
                 <p>Do you have a token registered with the required level?<br/><br/>\n\
                 Please go to the <a href=\"{}\">Selfservice Registration Portal</a>\n\
                 to review or enroll your token.</p>\n\n{}",
                html_escape(&self.status_message),
                html_escape(&self.selfservice_url),
                self.status_line()
            ),
            StatusCategory::Unexpected => format!(
                "<p>Unexpected error occurred while performing second factor authentication.<br/><br/>\n\
                 {}<br/>\n{}<br/>\n{}</p>\n\n\
                 <p>Please try again or contact your support desk.</p>",
                html_escape(&self.status),
                html_escape(&self.sub_status),
                html_escape(&self.status_message)
            ),
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <title>Second factor authentication</title>
</head>
<body>
<h1>Error while performing second factor authentication</h1>

{body}
</body>
</html>"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(sub_status: &str, message: &str) -> StatusPage {
        StatusPage::new(
            &StatusError {
                status: STATUS_RESPONDER.into(),
                sub_status: Some(sub_status.into()),
                message: Some(message.into()),
            },
            Some("https://selfservice.example/register"),
        )
    }

    #[test]
    fn authn_failed_shows_message() {
        let page = page(STATUS_AUTHN_FAILED, "denied");
        assert_eq!(page.category(), StatusCategory::AuthnFailed);
        let html = page.render();
        assert!(html.contains("Authentication not successful"));
        assert!(html.contains("<strong>denied</strong>"));
        assert!(html.contains(STATUS_RESPONDER));
        assert!(html.contains(STATUS_AUTHN_FAILED));
        assert!(!html.contains("selfservice.example"));
    }

    #[test]
    fn no_authn_context_links_selfservice() {
        let page = page(STATUS_NO_AUTHN_CONTEXT, "level too low");
        assert_eq!(page.category(), StatusCategory::NoAuthnContext);
        let html = page.render();
        assert!(html.contains(r#"href="https://selfservice.example/register""#));
        assert!(html.contains("level too low"));
    }

    #[test]
    fn other_status_lists_everything() {
        let page = page("urn:oasis:names:tc:SAML:2.0:status:RequestDenied", "<nope>");
        assert_eq!(page.category(), StatusCategory::Unexpected);
        let html = page.render();
        assert!(html.contains(STATUS_RESPONDER));
        assert!(html.contains("urn:oasis:names:tc:SAML:2.0:status:RequestDenied"));
        assert!(html.contains("&lt;nope&gt;"));
    }

    #[test]
    fn requester_status_is_unexpected() {
        let page = StatusPage::new(
            &StatusError {
                status: "urn:oasis:names:tc:SAML:2.0:status:Requester".into(),
                sub_status: Some(STATUS_AUTHN_FAILED.into()),
                message: None,
            },
            None,
        );
        assert_eq!(page.category(), StatusCategory::Unexpected);
        assert_eq!(page.selfservice_url, "");
    }
}
