use crate::authz::errors::AuthzError;
use crate::authz::types::*;
use kdl::KdlDocument;

/// Parse a KDL role catalog into typed definitions.
pub fn parse_kdl_document(source: &str) -> Result<ParsedCatalog, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut catalog = ParsedCatalog::default();

    for node in doc.nodes() {
        match node.name().value() {
            "role" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidCatalog(
                        "role node requires a string argument (e.g. role \"roles/viewer\")".into(),
                    )
                })?;

                let mut role = RoleDef {
                    name,
                    ..Default::default()
                };

                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "permissions" => {
                                role.permissions = dash_list(child);
                            }
                            "extends" => {
                                role.extends = dash_list(child);
                            }
                            "resource-types" => {
                                role.resource_types = dash_list(child);
                            }
                            "granted-to-all-users" => {
                                role.granted_to_all_users = true;
                            }
                            other => {
                                return Err(AuthzError::InvalidCatalog(format!(
                                    "unexpected child `{other}` in role `{}` (expected `permissions`, `extends`, `resource-types` or `granted-to-all-users`)",
                                    role.name
                                )));
                            }
                        }
                    }
                }

                catalog.roles.push(role);
            }
            "method" => {
                let method = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidCatalog(
                        "method node requires a string argument (e.g. method \"/pkg.Service/Get\" permission=\"pkg.get\")"
                            .into(),
                    )
                })?;

                let permission = node
                    .get("permission")
                    .and_then(|v| v.as_string())
                    .ok_or_else(|| {
                        AuthzError::InvalidCatalog(format!(
                            "method `{method}` missing `permission` property"
                        ))
                    })?
                    .to_string();

                catalog.methods.push(MethodDef { method, permission });
            }
            "group" => {
                let group = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidCatalog(
                        "group node requires a string argument (e.g. group \"team:payments\")"
                            .into(),
                    )
                })?;

                let member = MemberRef::parse(&group).ok_or_else(|| {
                    AuthzError::InvalidCatalog(format!(
                        "invalid group `{group}` (expected \"kind:id\")"
                    ))
                })?;

                let mut members = Vec::new();
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "members" => {
                                members = dash_list(child);
                            }
                            other => {
                                return Err(AuthzError::InvalidCatalog(format!(
                                    "unexpected child `{other}` in group `{group}` (expected `members`)"
                                )));
                            }
                        }
                    }
                }

                catalog.groups.push(GroupDef {
                    kind: member.kind.to_string(),
                    id: member.id.to_string(),
                    members,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(catalog)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// permissions {
///     - "shipments.get"
///     - "shipments.list"
/// }
/// ```
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
