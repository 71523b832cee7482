//! SAML 2.0 service-provider client (HTTP-Redirect SSO, HTTP-POST ACS).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use warden_core::{Metadata, token};

use super::{
    ExternalIdentity, IdentityProvider, LoginInitiation, LoginResponse, ProviderKind,
    ProviderOptions,
};
use crate::error::{IdentityError, IdentityResult};
use crate::http::{HttpClient, METADATA_TIMEOUT};

const SUCCESS_STATUS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
const EMAIL_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";
const EMAIL_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
const GIVEN_NAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname";
const SURNAME_CLAIM: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname";

/// Outstanding AuthnRequests expire after fifteen minutes.
const REQUEST_TTL_MINUTES: i64 = 15;
/// IdP metadata is cached for up to a day.
const METADATA_TTL_HOURS: i64 = 24;

/// Configuration for a SAML identity provider.
#[derive(Debug, Clone)]
pub struct SamlProviderConfig {
    pub id: String,
    pub name: String,
    /// Our SP entity id
    pub entity_id: String,
    /// Our assertion consumer service URL
    pub acs_url: String,
    pub idp_metadata_url: String,
    pub name_id_format: String,
    pub want_assertions_signed: bool,
    pub auto_provision_users: bool,
    pub sync_profile: bool,
}

impl SamlProviderConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        entity_id: impl Into<String>,
        acs_url: impl Into<String>,
        idp_metadata_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_id: entity_id.into(),
            acs_url: acs_url.into(),
            idp_metadata_url: idp_metadata_url.into(),
            name_id_format: EMAIL_NAME_ID_FORMAT.to_string(),
            want_assertions_signed: false,
            auto_provision_users: false,
            sync_profile: false,
        }
    }
}

struct CachedMetadata {
    sso_url: String,
    certificate: Option<String>,
    fetched_at: DateTime<Utc>,
}

struct PendingRequest {
    expires_at: DateTime<Utc>,
}

/// SAML 2.0 provider client.
pub struct SamlProvider {
    config: SamlProviderConfig,
    http: Arc<dyn HttpClient>,
    metadata: RwLock<Option<CachedMetadata>>,
    pending: RwLock<HashMap<String, PendingRequest>>,
}

impl SamlProvider {
    pub fn new(config: SamlProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            config,
            http,
            metadata: RwLock::new(None),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// The IdP SSO endpoint, from cached metadata (refetched past 24h).
    async fn sso_url(&self) -> IdentityResult<String> {
        {
            let cached = self.metadata.read().await;
            if let Some(metadata) = cached.as_ref()
                && Utc::now() - metadata.fetched_at < Duration::hours(METADATA_TTL_HOURS)
            {
                return Ok(metadata.sso_url.clone());
            }
        }

        debug!(
            target: "warden::identity",
            provider = %self.config.id,
            url = %self.config.idp_metadata_url,
            "refreshing IdP metadata"
        );
        let response = self
            .http
            .get(&self.config.idp_metadata_url, &[], METADATA_TIMEOUT)
            .await?;
        if !response.is_success() {
            return Err(IdentityError::Upstream(response.upstream_error()));
        }
        let (sso_url, certificate) = parse_idp_metadata(&response.text())?;
        let url = sso_url.clone();
        *self.metadata.write().await = Some(CachedMetadata {
            sso_url,
            certificate,
            fetched_at: Utc::now(),
        });
        Ok(url)
    }

    /// Signing certificate from the cached metadata, for callers that
    /// verify assertion signatures out of band.
    pub async fn idp_certificate(&self) -> Option<String> {
        self.metadata
            .read()
            .await
            .as_ref()
            .and_then(|metadata| metadata.certificate.clone())
    }

    fn authn_request_xml(&self, request_id: &str, destination: &str) -> String {
        let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{request_id}" Version="2.0" IssueInstant="{issue_instant}" Destination="{destination}" AssertionConsumerServiceURL="{acs}" ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"><saml:Issuer>{issuer}</saml:Issuer><samlp:NameIDPolicy Format="{name_id_format}" AllowCreate="true"/></samlp:AuthnRequest>"#,
            acs = self.config.acs_url,
            issuer = self.config.entity_id,
            name_id_format = self.config.name_id_format,
        )
    }
}

#[async_trait]
impl IdentityProvider for SamlProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Saml
    }

    fn options(&self) -> ProviderOptions {
        ProviderOptions {
            auto_provision_users: self.config.auto_provision_users,
            sync_profile: self.config.sync_profile,
        }
    }

    async fn begin_login(&self) -> IdentityResult<LoginInitiation> {
        let sso_url = self.sso_url().await?;
        let request_id = format!("id{}", Uuid::new_v4());
        let relay_state = token::urlsafe(32);
        let encoded = STANDARD.encode(self.authn_request_xml(&request_id, &sso_url));

        let expires_at = Utc::now() + Duration::minutes(REQUEST_TTL_MINUTES);
        {
            let mut pending = self.pending.write().await;
            pending.retain(|_, request| request.expires_at > Utc::now());
            pending.insert(request_id.clone(), PendingRequest { expires_at });
        }

        Ok(LoginInitiation {
            login_url: format!(
                "{sso_url}?SAMLRequest={}&RelayState={}",
                urlencoding::encode(&encoded),
                urlencoding::encode(&relay_state),
            ),
            state: request_id,
            expires_at,
        })
    }

    async fn complete_login(&self, response: &LoginResponse) -> IdentityResult<ExternalIdentity> {
        let encoded = response.require("SAMLResponse")?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| IdentityError::MalformedResponse(format!("invalid base64: {e}")))?;
        let xml = String::from_utf8(decoded)
            .map_err(|e| IdentityError::MalformedResponse(format!("invalid utf-8: {e}")))?;

        let parsed = parse_saml_response(&xml)?;

        if parsed.status_value.as_deref() != Some(SUCCESS_STATUS) {
            return Err(IdentityError::SamlStatus(
                parsed.status_message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        // Correlate with an outstanding AuthnRequest; anything else is a
        // replay.
        let in_response_to = parsed.in_response_to.ok_or(IdentityError::SamlReplay)?;
        let request = self.pending.write().await.remove(&in_response_to);
        let Some(request) = request else {
            warn!(
                target: "warden::identity",
                provider = %self.config.id,
                in_response_to = %in_response_to,
                "SAML response does not match a pending request"
            );
            return Err(IdentityError::SamlReplay);
        };
        if Utc::now() >= request.expires_at {
            return Err(IdentityError::SamlRequestExpired);
        }

        if !parsed.assertion_present {
            return Err(IdentityError::MalformedResponse(
                "no assertion found in SAML response".into(),
            ));
        }
        if self.config.want_assertions_signed && !parsed.assertion_signed {
            return Err(IdentityError::UnsignedAssertion);
        }

        let name_id = parsed.name_id.ok_or_else(|| {
            IdentityError::MalformedResponse("no NameID found in subject".into())
        })?;

        let first = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|key| parsed.attributes.get(*key))
                .and_then(|values| values.first().cloned())
        };
        let email = first(&["email", "mail", EMAIL_CLAIM]).or_else(|| {
            (self.config.name_id_format == EMAIL_NAME_ID_FORMAT && name_id.contains('@'))
                .then(|| name_id.clone())
        });

        let mut raw = Metadata::new();
        for (name, values) in &parsed.attributes {
            raw.insert(name.clone(), json!(values));
        }
        if let Some(format) = &parsed.name_id_format {
            raw.insert("name_id_format".to_string(), json!(format));
        }

        Ok(ExternalIdentity {
            external_id: name_id,
            username: first(&["uid", "username"]),
            email,
            first_name: first(&["givenName", GIVEN_NAME_CLAIM]),
            last_name: first(&["surname", "sn", SURNAME_CLAIM]),
            raw,
        })
    }
}

#[derive(Debug, Default)]
struct ParsedSamlResponse {
    in_response_to: Option<String>,
    status_value: Option<String>,
    status_message: Option<String>,
    assertion_present: bool,
    assertion_signed: bool,
    name_id: Option<String>,
    name_id_format: Option<String>,
    attributes: HashMap<String, Vec<String>>,
}

enum Capture {
    StatusMessage,
    NameId,
    AttributeValue,
}

/// Pull the fields we act on out of a SAML Response document. Matching is
/// on local names, so any namespace prefixes parse.
fn parse_saml_response(xml: &str) -> IdentityResult<ParsedSamlResponse> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedSamlResponse::default();
    let mut capture: Option<Capture> = None;
    let mut in_assertion = false;
    let mut current_attribute: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(element)) | Ok(XmlEvent::Empty(element)) => {
                let name = element.name();
                let attr = |wanted: &[u8]| -> Option<String> {
                    element.attributes().flatten().find_map(|a| {
                        (a.key.local_name().as_ref() == wanted)
                            .then(|| String::from_utf8_lossy(&a.value).into_owned())
                    })
                };
                match name.local_name().as_ref() {
                    b"Response" => {
                        parsed.in_response_to = attr(b"InResponseTo");
                    }
                    b"StatusCode" => {
                        // The outermost StatusCode is authoritative
                        if parsed.status_value.is_none() {
                            parsed.status_value = attr(b"Value");
                        }
                    }
                    b"StatusMessage" => capture = Some(Capture::StatusMessage),
                    b"Assertion" => {
                        parsed.assertion_present = true;
                        in_assertion = true;
                    }
                    b"Signature" if in_assertion => parsed.assertion_signed = true,
                    b"NameID" => {
                        parsed.name_id_format = attr(b"Format").or(parsed.name_id_format.take());
                        capture = Some(Capture::NameId);
                    }
                    b"Attribute" => current_attribute = attr(b"Name"),
                    b"AttributeValue" => capture = Some(Capture::AttributeValue),
                    _ => {}
                }
            }
            Ok(XmlEvent::Text(text)) => {
                if let Some(kind) = capture.take() {
                    let value = text
                        .unescape()
                        .map_err(|e| IdentityError::MalformedResponse(e.to_string()))?
                        .into_owned();
                    match kind {
                        Capture::StatusMessage => parsed.status_message = Some(value),
                        Capture::NameId => parsed.name_id = Some(value),
                        Capture::AttributeValue => {
                            if let Some(attribute) = &current_attribute {
                                parsed
                                    .attributes
                                    .entry(attribute.clone())
                                    .or_default()
                                    .push(value);
                            }
                        }
                    }
                }
            }
            Ok(XmlEvent::End(element)) => match element.name().local_name().as_ref() {
                b"Assertion" => in_assertion = false,
                b"Attribute" => current_attribute = None,
                b"StatusMessage" | b"NameID" | b"AttributeValue" => capture = None,
                _ => {}
            },
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(IdentityError::MalformedResponse(e.to_string())),
            _ => {}
        }
    }
    Ok(parsed)
}

/// Extract the HTTP-Redirect SSO endpoint (and signing certificate) from an
/// IdP metadata document.
fn parse_idp_metadata(xml: &str) -> IdentityResult<(String, Option<String>)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut redirect_location: Option<String> = None;
    let mut any_location: Option<String> = None;
    let mut certificate: Option<String> = None;
    let mut capture_certificate = false;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(element)) | Ok(XmlEvent::Empty(element)) => {
                let name = element.name();
                match name.local_name().as_ref() {
                    b"SingleSignOnService" => {
                        let mut binding = None;
                        let mut location = None;
                        for attribute in element.attributes().flatten() {
                            let value = String::from_utf8_lossy(&attribute.value).into_owned();
                            match attribute.key.local_name().as_ref() {
                                b"Binding" => binding = Some(value),
                                b"Location" => location = Some(value),
                                _ => {}
                            }
                        }
                        if let Some(location) = location {
                            if binding.as_deref().is_some_and(|b| b.contains("HTTP-Redirect")) {
                                redirect_location.get_or_insert(location);
                            } else {
                                any_location.get_or_insert(location);
                            }
                        }
                    }
                    b"X509Certificate" => capture_certificate = certificate.is_none(),
                    _ => {}
                }
            }
            Ok(XmlEvent::Text(text)) => {
                if capture_certificate {
                    capture_certificate = false;
                    certificate = Some(
                        text.unescape()
                            .map_err(|e| IdentityError::MalformedResponse(e.to_string()))?
                            .split_whitespace()
                            .collect::<String>(),
                    );
                }
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(IdentityError::MalformedResponse(e.to_string())),
            _ => {}
        }
    }

    redirect_location
        .or(any_location)
        .map(|sso_url| (sso_url, certificate))
        .ok_or_else(|| {
            IdentityError::MalformedResponse("metadata lacks a SingleSignOnService endpoint".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use std::time::Duration as StdDuration;

    const METADATA_XML: &str = r#"<?xml version="1.0"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://idp.example.com">
  <md:IDPSSODescriptor>
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data><ds:X509Certificate>MIIC CERT DATA</ds:X509Certificate></ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.com/sso/post"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.com/sso/redirect"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#;

    struct MetadataHttp;

    #[async_trait]
    impl HttpClient for MetadataHttp {
        async fn get(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _timeout: StdDuration,
        ) -> IdentityResult<HttpResponse> {
            Ok(HttpResponse {
                status: 200,
                body: METADATA_XML.as_bytes().to_vec(),
            })
        }

        async fn post_form(
            &self,
            _url: &str,
            _form: &[(String, String)],
            _headers: &[(String, String)],
            _timeout: StdDuration,
        ) -> IdentityResult<HttpResponse> {
            unreachable!("SAML flow never posts")
        }
    }

    fn response_xml(in_response_to: &str, signed: bool) -> String {
        let signature = if signed {
            r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignatureValue>sig</ds:SignatureValue></ds:Signature>"#
        } else {
            ""
        };
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="rsp1" InResponseTo="{in_response_to}">
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:Assertion ID="a1">{signature}
    <saml:Subject>
      <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">carol@ex.com</saml:NameID>
    </saml:Subject>
    <saml:AttributeStatement>
      <saml:Attribute Name="givenName"><saml:AttributeValue>Carol</saml:AttributeValue></saml:Attribute>
      <saml:Attribute Name="surname"><saml:AttributeValue>Jones</saml:AttributeValue></saml:Attribute>
      <saml:Attribute Name="memberOf">
        <saml:AttributeValue>staff</saml:AttributeValue>
        <saml:AttributeValue>admins</saml:AttributeValue>
      </saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#
        )
    }

    fn provider(want_signed: bool) -> SamlProvider {
        let mut config = SamlProviderConfig::new(
            "corp_saml",
            "Corporate IdP",
            "https://app.example.com",
            "https://app.example.com/acs",
            "https://idp.example.com/metadata",
        );
        config.want_assertions_signed = want_signed;
        SamlProvider::new(config, Arc::new(MetadataHttp))
    }

    #[tokio::test]
    async fn login_url_uses_redirect_binding_from_metadata() {
        let provider = provider(false);
        let initiation = provider.begin_login().await.unwrap();
        assert!(initiation.login_url.starts_with("https://idp.example.com/sso/redirect?SAMLRequest="));
        assert!(initiation.login_url.contains("&RelayState="));
        assert!(initiation.state.starts_with("id"));
    }

    #[tokio::test]
    async fn response_round_trip_extracts_identity() {
        let provider = provider(false);
        let initiation = provider.begin_login().await.unwrap();

        let encoded = STANDARD.encode(response_xml(&initiation.state, false));
        let identity = provider
            .complete_login(&LoginResponse::new([("SAMLResponse", encoded.as_str())]))
            .await
            .unwrap();

        assert_eq!(identity.external_id, "carol@ex.com");
        assert_eq!(identity.email.as_deref(), Some("carol@ex.com"));
        assert_eq!(identity.first_name.as_deref(), Some("Carol"));
        assert_eq!(identity.last_name.as_deref(), Some("Jones"));
        assert_eq!(identity.raw["memberOf"], json!(["staff", "admins"]));
    }

    #[tokio::test]
    async fn replayed_response_is_rejected() {
        let provider = provider(false);
        let initiation = provider.begin_login().await.unwrap();
        let encoded = STANDARD.encode(response_xml(&initiation.state, false));
        let response = LoginResponse::new([("SAMLResponse", encoded.as_str())]);

        provider.complete_login(&response).await.unwrap();
        let err = provider.complete_login(&response).await.unwrap_err();
        assert!(matches!(err, IdentityError::SamlReplay));

        // A response correlated to nothing is a replay too
        let forged = STANDARD.encode(response_xml("id-forged", false));
        let err = provider
            .complete_login(&LoginResponse::new([("SAMLResponse", forged.as_str())]))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::SamlReplay));
    }

    #[tokio::test]
    async fn unsigned_assertion_is_rejected_when_signatures_are_required() {
        let provider = provider(true);
        let initiation = provider.begin_login().await.unwrap();
        let encoded = STANDARD.encode(response_xml(&initiation.state, false));
        let err = provider
            .complete_login(&LoginResponse::new([("SAMLResponse", encoded.as_str())]))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::UnsignedAssertion));

        let initiation = provider.begin_login().await.unwrap();
        let encoded = STANDARD.encode(response_xml(&initiation.state, true));
        provider
            .complete_login(&LoginResponse::new([("SAMLResponse", encoded.as_str())]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failure_status_is_surfaced() {
        let provider = provider(false);
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="r" InResponseTo="id1">
  <samlp:Status>
    <samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Responder"/>
    <samlp:StatusMessage>Authentication cancelled</samlp:StatusMessage>
  </samlp:Status>
</samlp:Response>"#;
        let encoded = STANDARD.encode(xml);
        let err = provider
            .complete_login(&LoginResponse::new([("SAMLResponse", encoded.as_str())]))
            .await
            .unwrap_err();
        match err {
            IdentityError::SamlStatus(message) => assert_eq!(message, "Authentication cancelled"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn metadata_parser_prefers_redirect_binding() {
        let (sso, certificate) = parse_idp_metadata(METADATA_XML).unwrap();
        assert_eq!(sso, "https://idp.example.com/sso/redirect");
        assert_eq!(certificate.as_deref(), Some("MIICCERTDATA"));
    }
}
