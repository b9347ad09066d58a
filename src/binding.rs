//! HTTP bindings for SAML protocol messages.
//!
//! Sending produces a [`Dispatch`]: the redirect or auto-submitting form the
//! host must hand to the user agent. Once a flow has dispatched, the current
//! request is finished; the conversation continues at the other party.

use std::fmt::Display;

use libxml::parser::Parser as XmlParser;
use serde::Deserialize;
use tracing::debug;

use crate::{
    authn_request::{AuthnRequest, ProtocolBinding},
    response::{decode_response, parse_response, SamlResponse},
    utils::{html_escape, NS_PROTOCOL},
    SamlError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// The parts of an inbound HTTP request a binding looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: Method,
    /// Raw query string, without the leading `?`.
    pub query: String,
    /// `application/x-www-form-urlencoded` body.
    pub body: String,
}

impl InboundRequest {
    pub fn get(query: &str) -> Self {
        Self {
            method: Method::Get,
            query: query.into(),
            body: String::new(),
        }
    }

    pub fn post(body: &str) -> Self {
        Self {
            method: Method::Post,
            query: String::new(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MessageParams {
    #[serde(rename = "SAMLRequest")]
    saml_request: Option<String>,
    #[serde(rename = "SAMLResponse")]
    saml_response: Option<String>,
    #[serde(rename = "RelayState")]
    relay_state: Option<String>,
}

impl MessageParams {
    fn parse(input: &str) -> Self {
        serde_urlencoded::from_str(input).unwrap_or_default()
    }

    fn message(&self) -> Option<&str> {
        self.saml_response
            .as_deref()
            .or(self.saml_request.as_deref())
    }
}

/// Determines which binding carried the SAML message in `request`.
pub fn current_binding(request: &InboundRequest) -> Result<ProtocolBinding, SamlError> {
    match request.method {
        Method::Get if MessageParams::parse(&request.query).message().is_some() => {
            Ok(ProtocolBinding::Redirect)
        }
        Method::Post if MessageParams::parse(&request.body).message().is_some() => {
            Ok(ProtocolBinding::Post)
        }
        method => Err(SamlError::UnsupportedBinding(format!(
            "{method} request without a SAML message"
        ))),
    }
}

/// A decoded inbound protocol message.
#[derive(Debug)]
pub enum InboundMessage {
    Response(SamlResponse),
    /// Any other message, by root element name.
    Other(String),
}

/// What the host must emit to carry an outgoing message to its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a dispatch has to be emitted to the user agent"]
pub enum Dispatch {
    Redirect {
        location: String,
    },
    AutoPost {
        action: String,
        fields: Vec<(String, String)>,
    },
}

impl Dispatch {
    pub fn status_code(&self) -> u16 {
        match self {
            Dispatch::Redirect { .. } => 302,
            Dispatch::AutoPost { .. } => 200,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Dispatch::Redirect { location } => Some(location),
            Dispatch::AutoPost { .. } => None,
        }
    }

    pub fn to_html(&self) -> String {
        match self {
            Dispatch::Redirect { location } => format!(
                r#"<!DOCTYPE html>
<html>
<head>
    <meta http-equiv="refresh" content="0;URL='{0}'"/>
</head>
<body>
    <p><a href="{0}">Continue</a></p>
</body>
</html>"#,
                html_escape(location)
            ),
            Dispatch::AutoPost { action, fields } => {
                let inputs = fields
                    .iter()
                    .map(|(name, value)| {
                        format!(
                            r#"<input type="hidden" name="{}" value="{}"/>"#,
                            html_escape(name),
                            html_escape(value)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n        ");
                format!(
                    r#"<!DOCTYPE html>
<html>
<head>
    <title>SAML SSO</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="POST" action="{}">
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
                    html_escape(action),
                    inputs
                )
            }
        }
    }
}

impl ProtocolBinding {
    /// Encodes `request` for this binding, addressed to its destination.
    pub fn send(self, request: &AuthnRequest) -> Result<Dispatch, SamlError> {
        let mut fields = Vec::with_capacity(2);
        let encoded = match self {
            ProtocolBinding::Redirect => request.encode_deflated()?,
            ProtocolBinding::Post => request.encode_plain()?,
        };
        fields.push(("SAMLRequest".to_string(), encoded));
        if let Some(relay_state) = &request.relay_state {
            fields.push(("RelayState".to_string(), relay_state.clone()));
        }

        debug!(binding = %self, destination = %request.destination, id = %request.id, "sending AuthnRequest");

        match self {
            ProtocolBinding::Redirect => {
                let query = serde_urlencoded::to_string(&fields).map_err(|_| SamlError::Encoding)?;
                let separator = if request.destination.contains('?') { '&' } else { '?' };
                Ok(Dispatch::Redirect {
                    location: format!("{}{}{}", request.destination, separator, query),
                })
            }
            ProtocolBinding::Post => Ok(Dispatch::AutoPost {
                action: request.destination.clone(),
                fields,
            }),
        }
    }

    /// Decodes the message carried by `request`. Only HTTP-POST is supported.
    pub fn receive(self, request: &InboundRequest) -> Result<InboundMessage, SamlError> {
        if self != ProtocolBinding::Post || request.method != Method::Post {
            return Err(SamlError::UnsupportedBinding(self.to_string()));
        }

        let params = MessageParams::parse(&request.body);
        let encoded = params.message().ok_or(SamlError::MissingMessage)?;
        let xml = decode_response(encoded)?;

        let document = XmlParser::default()
            .parse_string(&xml)
            .map_err(SamlError::InvalidXml)?;
        let root = document
            .get_root_element()
            .ok_or(SamlError::InvalidResponse)?;
        let in_protocol_ns = root
            .get_namespace()
            .is_some_and(|ns| ns.get_href() == NS_PROTOCOL);
        let name = root.get_name();

        if in_protocol_ns && name == "Response" {
            let response = parse_response(&xml, params.relay_state)?;
            Ok(InboundMessage::Response(response))
        } else {
            Ok(InboundMessage::Other(name))
        }
    }
}
