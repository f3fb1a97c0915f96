use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::authz::catalog::parse_kdl_document;
use crate::authz::errors::AuthzError;
use crate::authz::graph::RoleGraph;
use crate::authz::membership::StaticGroupResolver;
use crate::authz::principal::IdentityConfig;
use crate::authz::types::*;
use crate::authz::AuthzState;

/// Load a `.kdl` catalog file, or every `.kdl` file in a directory, and
/// compile it into a single immutable `AuthzState`.
pub fn load_catalog(path: &Path, identity: IdentityConfig) -> Result<AuthzState, AuthzError> {
    let files = if path.is_file() {
        vec![path.to_path_buf()]
    } else if path.is_dir() {
        let mut files: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "kdl").unwrap_or(false))
            .collect();
        files.sort();
        files
    } else {
        return Err(AuthzError::InvalidCatalog(format!(
            "catalog path `{}` does not exist",
            path.display()
        )));
    };

    let mut all_parsed = Vec::with_capacity(files.len());
    for file in &files {
        let contents =
            std::fs::read_to_string(file).map_err(|source| AuthzError::CatalogLoadError {
                path: file.display().to_string(),
                source,
            })?;
        all_parsed.push(parse_kdl_document(&contents)?);
    }

    let state = compile_catalog(all_parsed, identity)?;

    tracing::info!(
        files = files.len(),
        roles = state.graph.role_count(),
        permissions = state.graph.permission_count(),
        open_roles = state.graph.open_roles().len(),
        methods = state.methods.len(),
        "Loaded role catalog"
    );

    Ok(state)
}

/// Merge and compile parsed catalogs into a single `AuthzState`.
pub fn compile_catalog(
    parsed: Vec<ParsedCatalog>,
    identity: IdentityConfig,
) -> Result<AuthzState, AuthzError> {
    let mut roles = Vec::new();
    let mut methods = Vec::new();
    let mut groups = Vec::new();

    for p in parsed {
        roles.extend(p.roles);
        methods.extend(p.methods);
        groups.extend(p.groups);
    }

    let graph = RoleGraph::build(roles)?;
    let mut state = AuthzState::new(graph, identity).with_methods(methods)?;

    // One static resolver per declared group kind
    let mut by_kind: BTreeMap<String, StaticGroupResolver> = BTreeMap::new();
    for group in groups {
        by_kind
            .entry(group.kind)
            .or_default()
            .add_members(&group.id, group.members);
    }
    for (kind, resolver) in by_kind {
        state.register_group_resolver(&kind, Arc::new(resolver))?;
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_parsed() -> ParsedCatalog {
        ParsedCatalog {
            roles: vec![
                RoleDef {
                    name: "roles/viewer".into(),
                    permissions: vec!["shipments.get".into()],
                    ..Default::default()
                },
                RoleDef {
                    name: "roles/editor".into(),
                    permissions: vec!["shipments.create".into()],
                    extends: vec!["roles/viewer".into()],
                    ..Default::default()
                },
            ],
            methods: vec![MethodDef {
                method: "/shipments.v1.ShipmentService/GetShipment".into(),
                permission: "shipments.get".into(),
            }],
            groups: vec![GroupDef {
                kind: "team".into(),
                id: "payments".into(),
                members: vec!["user:42".into()],
            }],
        }
    }

    #[test]
    fn test_compile_basic() {
        let state = compile_catalog(vec![make_parsed()], IdentityConfig::default()).unwrap();
        assert_eq!(state.graph.role_count(), 2);
        assert_eq!(
            state.method_permission("/shipments.v1.ShipmentService/GetShipment"),
            Some("shipments.get")
        );
        assert!(state.groups.get("team").is_some());
    }

    #[test]
    fn test_method_requiring_ungranted_permission() {
        let mut parsed = make_parsed();
        parsed.methods.push(MethodDef {
            method: "/shipments.v1.ShipmentService/DeleteShipment".into(),
            permission: "shipments.delete".into(),
        });
        let err = compile_catalog(vec![parsed], IdentityConfig::default()).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidCatalog(_)));
    }

    #[test]
    fn test_reserved_group_kind_rejected() {
        let mut parsed = make_parsed();
        parsed.groups.push(GroupDef {
            kind: "domain".into(),
            id: "example.com".into(),
            members: vec![],
        });
        let err = compile_catalog(vec![parsed], IdentityConfig::default()).unwrap_err();
        assert!(matches!(err, AuthzError::ReservedGroupKind(_)));
    }

    #[test]
    fn test_merge_multiple_files() {
        let p1 = make_parsed();
        let p2 = ParsedCatalog {
            roles: vec![RoleDef {
                name: "roles/admin".into(),
                permissions: vec!["shipments.delete".into()],
                extends: vec!["roles/editor".into()],
                ..Default::default()
            }],
            groups: vec![GroupDef {
                kind: "team".into(),
                id: "ops".into(),
                members: vec!["user:7".into()],
            }],
            ..Default::default()
        };

        let state = compile_catalog(vec![p1, p2], IdentityConfig::default()).unwrap();
        assert_eq!(state.graph.role_count(), 3);
        let admin = state.graph.permissions_of("roles/admin").unwrap();
        assert!(admin.contains("shipments.get"));
        assert!(admin.contains("shipments.delete"));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(
            dir.path().join("shipments.kdl"),
            r#"
role "roles/viewer" {
    permissions {
        - "shipments.get"
    }
}

role "roles/editor" {
    extends {
        - "roles/viewer"
    }
    permissions {
        - "shipments.create"
    }
}

method "/shipments.v1.ShipmentService/GetShipment" permission="shipments.get"
"#,
        )
        .unwrap();

        std::fs::write(
            dir.path().join("teams.kdl"),
            r#"
group "team:payments" {
    members {
        - "user:42"
    }
}
"#,
        )
        .unwrap();

        std::fs::write(dir.path().join("README.md"), "not a catalog").unwrap();

        let state = load_catalog(dir.path(), IdentityConfig::default()).unwrap();
        assert_eq!(state.graph.role_count(), 2);
        assert_eq!(state.methods.len(), 1);
        assert!(state.groups.get("team").is_some());
    }

    #[test]
    fn test_load_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.kdl");
        std::fs::write(
            &path,
            r#"
role "roles/viewer" {
    permissions {
        - "shipments.get"
    }
}
"#,
        )
        .unwrap();
        let state = load_catalog(&path, IdentityConfig::default()).unwrap();
        assert_eq!(state.graph.role_count(), 1);
    }

    #[test]
    fn test_load_cyclic_catalog() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cycle.kdl"),
            r#"
role "a" {
    extends {
        - "b"
    }
}
role "b" {
    extends {
        - "a"
    }
}
"#,
        )
        .unwrap();
        let err = load_catalog(dir.path(), IdentityConfig::default()).unwrap_err();
        assert!(matches!(err, AuthzError::CyclicRoleInheritance(_)));
    }

    #[test]
    fn test_bundled_catalog_compiles() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("catalog");
        let state = load_catalog(&path, IdentityConfig::default()).unwrap();
        assert!(state.graph.is_open_role("roles/authenticated"));
        assert!(state
            .graph
            .permissions_of("roles/shipments.admin")
            .unwrap()
            .contains("shipments.shipments.get"));
        assert!(state.groups.get("team").is_some());
    }

    #[test]
    fn test_load_nonexistent_path() {
        let err = load_catalog(Path::new("/nonexistent/path"), IdentityConfig::default())
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidCatalog(_)));
    }
}
