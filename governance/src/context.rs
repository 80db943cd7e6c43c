//! Request-scoped identity and correlation

use crate::error::{GovernanceError, Result};
use crate::types::Address;
use tracing::{info_span, warn, Span};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Authenticated caller, if the transport established one
    pub identity: Option<Address>,
    pub correlation_id: Uuid,
}

impl RequestContext {
    /// Context for internal callers such as the scheduler
    pub fn system() -> Self {
        Self {
            identity: None,
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn authenticated(identity: Address) -> Self {
        Self {
            identity: Some(identity),
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// The acting address must be the authenticated caller when there is one
    pub fn ensure_actor(&self, actor: &Address) -> Result<()> {
        match &self.identity {
            Some(identity) if identity != actor => {
                warn!(
                    correlation_id = %self.correlation_id,
                    identity = %identity,
                    actor = %actor,
                    "identity_mismatch"
                );
                Err(GovernanceError::Unauthorized(format!(
                    "caller {} cannot act as {}",
                    identity, actor
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn span(&self, verb: &'static str) -> Span {
        info_span!(
            "governance",
            verb,
            correlation_id = %self.correlation_id,
            identity = self.identity.as_ref().map(Address::as_str).unwrap_or("system"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().unwrap()
    }

    #[test]
    fn test_identity_must_match_actor() {
        let ctx = RequestContext::authenticated(addr(1));
        assert!(ctx.ensure_actor(&addr(1)).is_ok());
        assert!(matches!(
            ctx.ensure_actor(&addr(2)),
            Err(GovernanceError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_system_context_acts_for_anyone() {
        let ctx = RequestContext::system();
        assert!(ctx.ensure_actor(&addr(2)).is_ok());

        let id = Uuid::new_v4();
        assert_eq!(ctx.with_correlation_id(id).correlation_id, id);
    }
}
