pub mod catalog;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod loader;
pub mod membership;
pub mod principal;
pub mod request;
pub mod types;
pub mod web;

use std::collections::HashMap;
use std::sync::Arc;

use errors::AuthzError;
use graph::RoleGraph;
use membership::{GroupRegistry, GroupResolver};
use principal::IdentityConfig;
use types::MethodDef;

/// Process-wide authorization configuration: the compiled role catalog, the
/// group resolvers, and the deployment identity.
/// Immutable once shared; configuration changes require a service reload.
#[derive(Debug)]
pub struct AuthzState {
    pub graph: RoleGraph,
    pub groups: GroupRegistry,
    pub identity: IdentityConfig,
    /// full method name -> permission it requires
    pub methods: HashMap<String, String>,
}

impl AuthzState {
    pub fn new(graph: RoleGraph, identity: IdentityConfig) -> Self {
        Self {
            graph,
            groups: GroupRegistry::default(),
            identity,
            methods: HashMap::new(),
        }
    }

    /// Add method permissions. Every permission must be granted by some role.
    pub fn with_methods(mut self, methods: Vec<MethodDef>) -> Result<Self, AuthzError> {
        for def in methods {
            if !self.graph.grants_permission(&def.permission) {
                return Err(AuthzError::InvalidCatalog(format!(
                    "method `{}` requires `{}`, which no role grants",
                    def.method, def.permission
                )));
            }
            self.methods.insert(def.method, def.permission);
        }
        Ok(self)
    }

    pub fn register_group_resolver(
        &mut self,
        kind: &str,
        resolver: Arc<dyn GroupResolver>,
    ) -> Result<(), AuthzError> {
        self.groups.register(kind, resolver)
    }

    pub fn method_permission(&self, method: &str) -> Option<&str> {
        self.methods.get(method).map(String::as_str)
    }
}
