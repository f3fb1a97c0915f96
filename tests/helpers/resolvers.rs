use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use warden::authz::errors::BoxError;
use warden::authz::membership::GroupResolver;
use warden::authz::request::CallContext;
use warden::authz::types::Principal;

/// Group resolver that records how often it is consulted.
/// Each lookup sleeps briefly so concurrent checks overlap.
#[derive(Clone, Default)]
pub struct CountingResolver {
    members: Arc<HashSet<String>>,
    calls: Arc<AtomicUsize>,
}

impl CountingResolver {
    /// `members` holds "<group id>/<policy member>" pairs.
    pub fn with_members(members: &[(&str, &str)]) -> Self {
        Self {
            members: Arc::new(
                members
                    .iter()
                    .map(|(id, member)| format!("{id}/{member}"))
                    .collect(),
            ),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupResolver for CountingResolver {
    async fn is_member(
        &self,
        _ctx: &CallContext,
        _kind: &str,
        id: &str,
        principal: &Principal,
    ) -> Result<bool, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(self
            .members
            .contains(&format!("{id}/{}", principal.policy_member)))
    }
}
