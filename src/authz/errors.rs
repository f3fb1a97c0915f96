use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

/// Error type returned by caller-supplied group resolvers and policy readers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to load role catalog `{path}`")]
    #[diagnostic(
        code(warden::authz::catalog_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    CatalogLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid role catalog: {0}")]
    #[diagnostic(
        code(warden::authz::invalid_catalog),
        help("Each catalog file must contain valid `role`, `method`, or `group` KDL nodes")
    )]
    InvalidCatalog(String),

    #[error("Undefined role `{0}`")]
    #[diagnostic(
        code(warden::authz::undefined_role),
        help("Define the role with: role \"<name>\" {{ permissions {{ ... }} }}")
    )]
    UndefinedRole(String),

    #[error("Cyclic role inheritance detected: {0}")]
    #[diagnostic(
        code(warden::authz::cyclic_roles),
        help("Check the `extends` lists in your role definitions for circular references")
    )]
    CyclicRoleInheritance(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(warden::authz::kdl_parse),
        help("Check your KDL file syntax; see https://kdl.dev for the specification")
    )]
    KdlParse(String),

    #[error("Group kind `{0}` is reserved")]
    #[diagnostic(
        code(warden::authz::reserved_group_kind),
        help("`user`, `serviceAccount` and `domain` are resolved by the engine itself")
    )]
    ReservedGroupKind(String),

    #[error("A group resolver for kind `{0}` is already registered")]
    #[diagnostic(code(warden::authz::duplicate_group_resolver))]
    DuplicateGroupResolver(String),

    #[error("Unauthenticated: {0}")]
    #[diagnostic(code(warden::authz::unauthenticated))]
    Unauthenticated(String),

    #[error("Malformed credential: {0}")]
    #[diagnostic(code(warden::authz::malformed_credential))]
    MalformedCredential(String),

    #[error(
        "Permission denied: missing `{permission}`{} (granted by roles: {})",
        on_resources(.resources),
        join(.roles)
    )]
    #[diagnostic(code(warden::authz::permission_denied))]
    PermissionDenied {
        permission: String,
        roles: Vec<String>,
        resources: Vec<String>,
    },

    #[error("Permission denied: no role grants `{permission}`{}", on_resources(.resources))]
    #[diagnostic(
        code(warden::authz::unknown_permission),
        help("Add the permission to a role in the catalog")
    )]
    UnknownPermission {
        permission: String,
        resources: Vec<String>,
    },

    #[error("Group membership resolution failed for `{member}`")]
    #[diagnostic(code(warden::authz::group_resolver))]
    GroupResolver {
        member: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to read policy of `{resource}`")]
    #[diagnostic(code(warden::authz::policy_reader))]
    PolicyReader {
        resource: String,
        #[source]
        source: BoxError,
    },

    #[error("No permission declared for method `{0}`")]
    #[diagnostic(
        code(warden::authz::unknown_method),
        help("Declare it with: method \"<full method>\" permission=\"<permission>\"")
    )]
    UnknownMethod(String),

    #[error("Bad request: {0}")]
    #[diagnostic(code(warden::authz::bad_request))]
    BadRequest(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(warden::authz::io))]
    Io(#[from] std::io::Error),
}

fn join(items: &[String]) -> String {
    items.join(", ")
}

fn on_resources(resources: &[String]) -> String {
    if resources.is_empty() {
        String::new()
    } else {
        format!(" on `{}`", resources.join(", "))
    }
}

impl AuthzError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthzError::Unauthenticated(_) | AuthzError::MalformedCredential(_) => {
                StatusCode::UNAUTHORIZED
            }
            AuthzError::PermissionDenied { .. } | AuthzError::UnknownPermission { .. } => {
                StatusCode::FORBIDDEN
            }
            AuthzError::InvalidCatalog(_)
            | AuthzError::KdlParse(_)
            | AuthzError::UnknownMethod(_)
            | AuthzError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => "unauthenticated",
            StatusCode::FORBIDDEN => "permission_denied",
            StatusCode::BAD_REQUEST => "invalid_argument",
            _ => "internal",
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal errors may name the member being resolved; keep that server-side.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "authorization failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        let body = json!({ "error": self.kind(), "message": message });
        (status, Json(body)).into_response()
    }
}
