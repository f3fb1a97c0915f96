use axum::http::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use warden::authz::loader::compile_catalog;
use warden::authz::principal::{encode_unsigned_token, IdentityConfig, AUTHORIZATION_HEADER};
use warden::authz::types::{GroupDef, MethodDef, ParsedCatalog, Policy, RoleDef};
use warden::authz::AuthzState;

pub const DEPLOYMENT_SA: &str = "warden@shipping.iam.gserviceaccount.com";

/// Builder for unsigned bearer tokens
pub struct TokenBuilder {
    claims: serde_json::Map<String, Value>,
}

impl TokenBuilder {
    pub fn user(sub: &str) -> Self {
        let mut claims = serde_json::Map::new();
        claims.insert("sub".into(), json!(sub));
        Self { claims }
    }

    pub fn service_account(email: &str) -> Self {
        Self::user(&format!("sa-{email}")).with_email(email)
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.claims.insert("email".into(), json!(email));
        self
    }

    pub fn with_policy(mut self, policy: &Policy) -> Self {
        self.claims.insert(
            "policy".into(),
            serde_json::to_value(policy).expect("policy serializes"),
        );
        self
    }

    pub fn token(&self) -> String {
        encode_unsigned_token(&Value::Object(self.claims.clone()))
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token())
    }

    /// Metadata carrying this token in the `authorization` header
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION_HEADER,
            HeaderValue::from_str(&self.bearer()).expect("valid header"),
        );
        headers
    }
}

/// Builder for compiled catalogs
pub struct CatalogBuilder {
    parsed: ParsedCatalog,
    identity: IdentityConfig,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self {
            parsed: ParsedCatalog::default(),
            identity: IdentityConfig {
                deployment_identity: Some(DEPLOYMENT_SA.to_string()),
                skip_auth_when_missing: false,
            },
        }
    }

    /// The shipping catalog used across these tests:
    /// viewer < editor < admin, plus an open `roles/authenticated`.
    pub fn shipping() -> Self {
        Self::new()
            .role("roles/viewer", &["shipments.get", "shipments.list"], &[])
            .role("roles/editor", &["shipments.create", "shipments.update"], &["roles/viewer"])
            .role("roles/admin", &["shipments.delete"], &["roles/editor"])
            .open_role("roles/authenticated", &["shippers.list"])
            .method("/shipping.v1.ShipmentService/GetShipment", "shipments.get")
            .method("/shipping.v1.ShipmentService/CreateShipment", "shipments.create")
    }

    pub fn role(mut self, name: &str, permissions: &[&str], extends: &[&str]) -> Self {
        self.parsed.roles.push(RoleDef {
            name: name.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            extends: extends.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        });
        self
    }

    pub fn open_role(mut self, name: &str, permissions: &[&str]) -> Self {
        self.parsed.roles.push(RoleDef {
            name: name.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            granted_to_all_users: true,
            ..Default::default()
        });
        self
    }

    pub fn method(mut self, method: &str, permission: &str) -> Self {
        self.parsed.methods.push(MethodDef {
            method: method.to_string(),
            permission: permission.to_string(),
        });
        self
    }

    pub fn group(mut self, kind: &str, id: &str, members: &[&str]) -> Self {
        self.parsed.groups.push(GroupDef {
            kind: kind.to_string(),
            id: id.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    pub fn without_deployment_identity(mut self) -> Self {
        self.identity.deployment_identity = None;
        self
    }

    pub fn skip_auth_when_missing(mut self) -> Self {
        self.identity.skip_auth_when_missing = true;
        self
    }

    pub fn build(self) -> AuthzState {
        compile_catalog(vec![self.parsed], self.identity).expect("Failed to compile catalog")
    }
}
