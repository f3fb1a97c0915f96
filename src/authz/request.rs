//! Per-call authorization facade.
//!
//! A `RequestAuthorizer` is created once per inbound call and dropped with it.
//! It owns the call's principal, membership cache, and policy cache; none of
//! these may outlive the call or be shared with another call.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::authz::engine::PolicyEngine;
use crate::authz::errors::{AuthzError, BoxError};
use crate::authz::membership::MembershipCache;
use crate::authz::principal::{PrincipalResolver, FORWARDED_AUTHORIZATION_HEADER};
use crate::authz::types::{AuthorizationResult, Policy, Principal};
use crate::authz::AuthzState;

/// Request-scoped call state threaded through nested internal calls.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    metadata: HeaderMap,
    method: Option<String>,
    claimed: bool,
}

impl CallContext {
    pub fn new(metadata: HeaderMap) -> Self {
        Self {
            metadata,
            method: None,
            claimed: false,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Whether an enclosing call already took responsibility for authorization.
    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// A copy of this context marked as authorized. There is no way back.
    pub fn claimed(&self) -> Self {
        Self {
            claimed: true,
            ..self.clone()
        }
    }
}

/// Reads the policy attached to a resource from the caller's storage.
#[async_trait]
pub trait PolicyReader: Send + Sync {
    async fn read(&self, ctx: &CallContext, resource: &str) -> Result<Policy, BoxError>;
}

/// Resource name -> policy, for the lifetime of one call.
///
/// Each resource holds a once-cell, so concurrent checks within one call
/// share a single read. Failed reads leave the cell empty.
#[derive(Debug, Default)]
pub struct PolicyCache {
    policies: DashMap<String, Arc<OnceCell<Arc<Policy>>>>,
}

impl PolicyCache {
    pub fn get(&self, resource: &str) -> Option<Arc<Policy>> {
        self.policies
            .get(resource)
            .and_then(|cell| cell.get().cloned())
    }

    pub fn len(&self) -> usize {
        self.policies
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, resource: &str) -> Arc<OnceCell<Arc<Policy>>> {
        if let Some(cell) = self.policies.get(resource) {
            return cell.clone();
        }
        self.policies
            .entry(resource.to_string())
            .or_default()
            .clone()
    }
}

pub struct RequestAuthorizer {
    state: Arc<AuthzState>,
    ctx: CallContext,
    principal: Principal,
    required: bool,
    memberships: MembershipCache,
    policies: PolicyCache,
    /// (permission, resources) -> granted
    decisions: DashMap<(String, Vec<String>), bool>,
}

impl RequestAuthorizer {
    /// Resolve the caller and decide whether this call needs authorization.
    /// Returns the context to hand to nested calls, marked as claimed.
    pub fn new_for_call(
        state: Arc<AuthzState>,
        ctx: &CallContext,
    ) -> Result<(Self, CallContext), AuthzError> {
        let principal = PrincipalResolver::new(&state.identity).resolve(ctx.metadata())?;
        let required = !(principal.is_super_admin || ctx.is_claimed());
        tracing::debug!(
            member = %principal.policy_member,
            super_admin = principal.is_super_admin,
            claimed = ctx.is_claimed(),
            required,
            "resolved caller"
        );
        let authorizer = Self {
            state,
            ctx: ctx.clone(),
            principal,
            required,
            memberships: MembershipCache::new(),
            policies: PolicyCache::default(),
            decisions: DashMap::new(),
        };
        Ok((authorizer, ctx.claimed()))
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn authorization_required(&self) -> bool {
        self.required
    }

    pub fn policy_cache(&self) -> &PolicyCache {
        &self.policies
    }

    pub fn membership_cache(&self) -> &MembershipCache {
        &self.memberships
    }

    /// Full decision for `permission`, evaluated even when authorization is
    /// not required for this call.
    pub async fn authorize(
        &self,
        permission: &str,
        policies: &[Policy],
    ) -> Result<AuthorizationResult, AuthzError> {
        PolicyEngine::new(&self.state)
            .authorize(
                &self.ctx,
                &self.principal,
                permission,
                policies,
                &self.memberships,
            )
            .await
    }

    pub async fn has_permission(
        &self,
        permission: &str,
        policies: &[Policy],
    ) -> Result<bool, AuthzError> {
        if !self.required {
            return Ok(true);
        }
        Ok(self.authorize(permission, policies).await?.granted)
    }

    pub async fn require_permission(
        &self,
        permission: &str,
        policies: &[Policy],
        resources: &[String],
    ) -> Result<(), AuthzError> {
        if !self.required {
            return Ok(());
        }
        self.authorize(permission, policies)
            .await?
            .into_grant(permission, resources)
            .map(|_| ())
    }

    /// The permission required by the current call's method.
    pub fn method_permission(&self) -> Result<&str, AuthzError> {
        let method = self
            .ctx
            .method()
            .ok_or_else(|| AuthzError::UnknownMethod("<none>".into()))?;
        self.state
            .method_permission(method)
            .ok_or_else(|| AuthzError::UnknownMethod(method.to_string()))
    }

    pub async fn has_method_access(&self, policies: &[Policy]) -> Result<bool, AuthzError> {
        let permission = self.method_permission()?;
        self.has_permission(permission, policies).await
    }

    pub async fn require_method_access(
        &self,
        policies: &[Policy],
        resources: &[String],
    ) -> Result<(), AuthzError> {
        let permission = self.method_permission()?;
        self.require_permission(permission, policies, resources).await
    }

    /// Policy of `resource`, read through `reader` at most once per call.
    pub async fn policy(
        &self,
        resource: &str,
        reader: &dyn PolicyReader,
    ) -> Result<Arc<Policy>, AuthzError> {
        let cell = self.policies.cell(resource);
        let policy = cell
            .get_or_try_init(|| async {
                reader
                    .read(&self.ctx, resource)
                    .await
                    .map(Arc::new)
                    .map_err(|source| AuthzError::PolicyReader {
                        resource: resource.to_string(),
                        source,
                    })
            })
            .await?;
        Ok(Arc::clone(policy))
    }

    async fn decide_on_resources(
        &self,
        permission: &str,
        resources: &[String],
        reader: &dyn PolicyReader,
    ) -> Result<AuthorizationResult, AuthzError> {
        let mut policies = Vec::with_capacity(resources.len());
        for resource in resources {
            policies.push(self.policy(resource, reader).await?);
        }
        let result = PolicyEngine::new(&self.state)
            .authorize(
                &self.ctx,
                &self.principal,
                permission,
                policies.iter().map(|p| p.as_ref()),
                &self.memberships,
            )
            .await?;
        self.decisions.insert(
            (permission.to_string(), resources.to_vec()),
            result.granted,
        );
        Ok(result)
    }

    /// Whether the caller holds `permission` on any of `resources`, reading
    /// their policies through `reader`.
    pub async fn has_permission_on_resources(
        &self,
        permission: &str,
        resources: &[String],
        reader: &dyn PolicyReader,
    ) -> Result<bool, AuthzError> {
        if !self.required {
            return Ok(true);
        }
        let key = (permission.to_string(), resources.to_vec());
        if let Some(granted) = self.decisions.get(&key) {
            return Ok(*granted);
        }
        Ok(self
            .decide_on_resources(permission, resources, reader)
            .await?
            .granted)
    }

    pub async fn require_permission_on_resources(
        &self,
        permission: &str,
        resources: &[String],
        reader: &dyn PolicyReader,
    ) -> Result<(), AuthzError> {
        if !self.has_permission_on_resources(permission, resources, reader).await? {
            // Denied: re-run to build the structured denial (cached policies, cached memberships).
            self.decide_on_resources(permission, resources, reader)
                .await?
                .into_grant(permission, resources)?;
        }
        Ok(())
    }

    pub async fn roles(&self, policies: &[Policy]) -> Result<BTreeSet<String>, AuthzError> {
        PolicyEngine::new(&self.state)
            .roles_of(&self.ctx, &self.principal, policies, &self.memberships)
            .await
    }

    pub async fn permissions(&self, policies: &[Policy]) -> Result<BTreeSet<String>, AuthzError> {
        PolicyEngine::new(&self.state)
            .permissions_of(&self.ctx, &self.principal, policies, &self.memberships)
            .await
    }

    /// Put the caller's credential on an outgoing call, replacing whatever a
    /// shared context left in the forwarded-credential header.
    pub fn forward_credentials(&self, outgoing: &mut HeaderMap) -> Result<(), AuthzError> {
        outgoing.remove(FORWARDED_AUTHORIZATION_HEADER);
        if self.principal.raw_credential.is_empty() {
            return Ok(());
        }
        let value = HeaderValue::from_str(&format!("Bearer {}", self.principal.raw_credential))
            .map_err(|_| {
                AuthzError::MalformedCredential("credential is not a valid header value".into())
            })?;
        outgoing.insert(FORWARDED_AUTHORIZATION_HEADER, value);
        Ok(())
    }
}
