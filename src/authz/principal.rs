//! Resolves the calling principal from inbound request metadata.
//!
//! Credentials are three-segment JWTs whose signatures were already verified
//! by the platform in front of this service; only the payload segment is
//! decoded here. The trust chain, in order:
//!
//! 1. A direct credential (`authorization`, then `x-serverless-authorization`).
//! 2. No direct credential: the deployment calling itself, as super admin.
//! 3. The identity-aware proxy's service account: trust the proxy's assertion.
//! 4. A super admin: trust a forwarded credential when one is present.

use axum::http::HeaderMap;
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};

use crate::authz::errors::AuthzError;
use crate::authz::types::{Policy, Principal};

pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const SERVERLESS_AUTHORIZATION_HEADER: &str = "x-serverless-authorization";
pub const IAP_JWT_ASSERTION_HEADER: &str = "x-goog-iap-jwt-assertion";
/// Set by this service when calling a downstream peer on behalf of its caller.
pub const FORWARDED_AUTHORIZATION_HEADER: &str = "x-warden-forwarded-authorization";
/// Set by an upstream API gateway on behalf of the external caller.
pub const GATEWAY_FORWARDED_AUTHORIZATION_HEADER: &str = "x-forwarded-authorization";

const DIRECT_HEADERS: [&str; 2] = [AUTHORIZATION_HEADER, SERVERLESS_AUTHORIZATION_HEADER];
const FORWARDED_HEADERS: [&str; 2] = [
    FORWARDED_AUTHORIZATION_HEADER,
    GATEWAY_FORWARDED_AUTHORIZATION_HEADER,
];

pub const IAP_SERVICE_ACCOUNT_SUFFIX: &str = "@gcp-sa-iap.iam.gserviceaccount.com";
pub const SERVICE_ACCOUNT_SUFFIX: &str = ".gserviceaccount.com";

/// Who this deployment is, and how to treat calls without credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// The service's own identity (email). Calls resolving to it are super admin.
    #[serde(default)]
    pub deployment_identity: Option<String>,
    /// Resolve a missing credential to an anonymous principal instead of failing
    #[serde(default)]
    pub skip_auth_when_missing: bool,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    policy: Option<Policy>,
}

pub struct PrincipalResolver<'a> {
    identity: &'a IdentityConfig,
}

impl<'a> PrincipalResolver<'a> {
    pub fn new(identity: &'a IdentityConfig) -> Self {
        Self { identity }
    }

    pub fn resolve(&self, metadata: &HeaderMap) -> Result<Principal, AuthzError> {
        let principal = match first_bearer(metadata, &DIRECT_HEADERS)? {
            Some((_, token)) => self.from_token(token)?,
            None => match self.deployment_principal() {
                Some(principal) => principal,
                None => return self.missing("no credential in request metadata"),
            },
        };

        let principal = if principal.email.ends_with(IAP_SERVICE_ACCOUNT_SUFFIX) {
            match header_str(metadata, IAP_JWT_ASSERTION_HEADER)? {
                Some(assertion) => {
                    tracing::debug!("resolving caller from identity-aware proxy assertion");
                    self.from_token(strip_bearer(assertion).unwrap_or(assertion))?
                }
                None => return self.missing("identity-aware proxy call without assertion"),
            }
        } else {
            principal
        };

        if principal.is_super_admin {
            if let Some((header, token)) = first_bearer(metadata, &FORWARDED_HEADERS)? {
                tracing::debug!(header, "resolving caller from forwarded credential");
                return self.from_token(token);
            }
        }

        Ok(principal)
    }

    fn from_token(&self, token: &str) -> Result<Principal, AuthzError> {
        let claims = decode_payload(token)?;
        let subject_id = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthzError::MalformedCredential("missing `sub` claim".into()))?;
        let email = claims.email.unwrap_or_default();
        Ok(self.principal(token.to_string(), subject_id, email, claims.policy))
    }

    fn deployment_principal(&self) -> Option<Principal> {
        let identity = self.identity.deployment_identity.as_deref()?;
        Some(self.principal(
            String::new(),
            identity.to_string(),
            identity.to_string(),
            None,
        ))
    }

    fn principal(
        &self,
        raw_credential: String,
        subject_id: String,
        email: String,
        policy: Option<Policy>,
    ) -> Principal {
        let is_service_account = email.ends_with(SERVICE_ACCOUNT_SUFFIX);
        let is_super_admin = !email.is_empty()
            && self.identity.deployment_identity.as_deref() == Some(email.as_str());
        let policy_member = if is_service_account {
            format!("serviceAccount:{email}")
        } else {
            format!("user:{subject_id}")
        };
        Principal {
            raw_credential,
            subject_id,
            email,
            is_service_account,
            is_super_admin,
            policy_member,
            policy,
        }
    }

    fn missing(&self, reason: &str) -> Result<Principal, AuthzError> {
        if self.identity.skip_auth_when_missing {
            tracing::debug!(reason, "continuing as anonymous principal");
            Ok(Principal::anonymous())
        } else {
            Err(AuthzError::Unauthenticated(reason.to_string()))
        }
    }
}

fn header_str<'m>(metadata: &'m HeaderMap, name: &str) -> Result<Option<&'m str>, AuthzError> {
    let Some(value) = metadata.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AuthzError::MalformedCredential(format!("`{name}` is not valid ASCII")))?
        .trim();
    Ok((!value.is_empty()).then_some(value))
}

/// First header in `names` carrying a bearer credential, with its token.
fn first_bearer<'m>(
    metadata: &'m HeaderMap,
    names: &[&'static str],
) -> Result<Option<(&'static str, &'m str)>, AuthzError> {
    for &name in names {
        if let Some(value) = header_str(metadata, name)? {
            let token = strip_bearer(value).ok_or_else(|| {
                AuthzError::MalformedCredential(format!("`{name}` is not a bearer credential"))
            })?;
            return Ok(Some((name, token)));
        }
    }
    Ok(None)
}

fn strip_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn decode_payload(token: &str) -> Result<Claims, AuthzError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthzError::MalformedCredential(
            "expected a three-segment token".into(),
        ));
    };
    if payload.is_empty() {
        return Err(AuthzError::MalformedCredential("empty token payload".into()));
    }
    let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('=')).map_err(|e| {
        AuthzError::MalformedCredential(format!("token payload is not base64url: {e}"))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthzError::MalformedCredential(format!("token payload is not JSON: {e}")))
}

/// Encode an unsigned token carrying `payload`, for tests and local tooling.
pub fn encode_unsigned_token(payload: &serde_json::Value) -> String {
    let header = Base64UrlUnpadded::encode_string(br#"{"alg":"none","typ":"JWT"}"#);
    let body = Base64UrlUnpadded::encode_string(payload.to_string().as_bytes());
    format!("{header}.{body}.sig")
}
