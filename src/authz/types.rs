use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reference to a binding member: "kind:id" e.g. "domain:example.com"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberRef<'a> {
    pub kind: &'a str,
    pub id: &'a str,
}

impl<'a> MemberRef<'a> {
    pub fn parse(s: &'a str) -> Option<Self> {
        let (kind, id) = s.split_once(':')?;
        if kind.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self { kind, id })
    }
}

impl std::fmt::Display for MemberRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A role as declared in the catalog, before inheritance is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDef {
    pub name: String,
    /// Permissions granted directly by this role
    pub permissions: Vec<String>,
    /// Other role names this role extends (inherits from)
    pub extends: Vec<String>,
    /// Resource types whose policies may bind this role
    pub resource_types: Vec<String>,
    /// Granted to every authenticated principal without a membership check
    pub granted_to_all_users: bool,
}

/// Maps a fully-qualified method name to the permission it requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    pub method: String,
    pub permission: String,
}

/// A statically declared group, e.g. `group "team:payments"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDef {
    pub kind: String,
    pub id: String,
    pub members: Vec<String>,
}

/// Intermediate result from parsing a single KDL catalog file.
#[derive(Debug, Clone, Default)]
pub struct ParsedCatalog {
    pub roles: Vec<RoleDef>,
    pub methods: Vec<MethodDef>,
    pub groups: Vec<GroupDef>,
}

/// A role paired with the members holding it on a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl PolicyBinding {
    pub fn new<I, S>(role: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.to_string(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// The resource policy: every role binding attached to one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub bindings: Vec<PolicyBinding>,
}

impl Policy {
    pub fn new(bindings: Vec<PolicyBinding>) -> Self {
        Self { bindings }
    }
}

/// The authenticated caller of one inbound call.
#[derive(Clone, Default, PartialEq, Serialize)]
pub struct Principal {
    /// The credential the principal was resolved from, forwarded on outgoing calls
    #[serde(skip)]
    pub raw_credential: String,
    pub subject_id: String,
    pub email: String,
    pub is_service_account: bool,
    pub is_super_admin: bool,
    /// Canonical identity used for binding comparisons: "user:<sub>" or "serviceAccount:<email>"
    pub policy_member: String,
    /// Policy carried inside the credential payload, if any
    #[serde(skip)]
    pub policy: Option<Policy>,
}

impl Principal {
    /// The principal used when authentication is skipped for a call with no credential.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.policy_member.is_empty()
    }
}

// The raw credential is a bearer token; keep it out of logs.
impl std::fmt::Debug for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Principal")
            .field("subject_id", &self.subject_id)
            .field("email", &self.email)
            .field("is_service_account", &self.is_service_account)
            .field("is_super_admin", &self.is_super_admin)
            .field("policy_member", &self.policy_member)
            .field("has_policy", &self.policy.is_some())
            .finish_non_exhaustive()
    }
}

/// Why an authorization request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// No role in the catalog grants the permission
    UnknownPermission,
    /// The principal is not a member of any binding for a granting role
    NoMatchingMembership,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationResult {
    pub granted: bool,
    /// Roles held by the principal that grant the permission
    pub matched_roles: BTreeSet<String>,
    /// Every catalog role that would have granted the permission
    pub granting_roles: BTreeSet<String>,
    pub principal: Principal,
    pub denial: Option<DenialReason>,
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    /// e.g. "shipments.get"; derived from `method` when absent
    #[serde(default)]
    pub permission: Option<String>,
    /// e.g. "/shipments.v1.ShipmentService/GetShipment"
    #[serde(default)]
    pub method: Option<String>,
    /// Resource names, used only to render denials
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub granted: bool,
    pub matched_roles: Vec<String>,
    pub principal: Principal,
}

#[derive(Debug, Deserialize)]
pub struct IntrospectRequest {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

#[derive(Debug, Serialize)]
pub struct IntrospectResponse {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GrantingRolesResponse {
    pub roles: Vec<String>,
    pub resource_types: Vec<String>,
}
