//! Caller identity passed explicitly into every operation

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authenticated owner of contracts and alerts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request context
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self { principal: None }
    }

    pub fn for_principal(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
        }
    }

    pub fn require_principal(&self) -> CoreResult<&Principal> {
        match &self.principal {
            Some(p) if !p.id().is_empty() => Ok(p),
            _ => Err(CoreError::Unauthenticated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_is_unauthenticated() {
        let ctx = RequestContext::anonymous();
        assert!(matches!(ctx.require_principal(), Err(CoreError::Unauthenticated)));
    }

    #[test]
    fn test_empty_principal_is_unauthenticated() {
        let ctx = RequestContext::for_principal(Principal::new(""));
        assert!(ctx.require_principal().is_err());
    }

    #[test]
    fn test_principal_resolves() {
        let ctx = RequestContext::for_principal(Principal::new("u1"));
        assert_eq!(ctx.require_principal().unwrap().id(), "u1");
    }
}
