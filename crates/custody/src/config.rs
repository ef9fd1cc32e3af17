use common::{Money, UserId};

use crate::retry::RetryPolicy;

/// Commission credited to a seller when one of their sales is paid off.
pub const DEFAULT_COMMISSION: Money = Money::from_units(300);

/// Ledger-wide settings. Built by the caller; this crate reads no
/// environment.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub commission_per_sale: Money,
    /// Receives every Interim settlement.
    pub supervisor: UserId,
    /// Performs and receives every Final settlement.
    pub owner: UserId,
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            commission_per_sale: DEFAULT_COMMISSION,
            supervisor: UserId::new("supervisor"),
            owner: UserId::new("owner"),
            retry: RetryPolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn new(supervisor: UserId, owner: UserId) -> Self {
        Self {
            supervisor,
            owner,
            ..Default::default()
        }
    }

    pub fn with_commission(mut self, commission_per_sale: Money) -> Self {
        self.commission_per_sale = commission_per_sale;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_commission_is_three_hundred() {
        let config = LedgerConfig::default();
        assert_eq!(config.commission_per_sale.cents(), 30_000);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn builder_overrides() {
        let config = LedgerConfig::new(UserId::new("carmen"), UserId::new("boss"))
            .with_commission(Money::from_units(150));
        assert_eq!(config.supervisor, UserId::new("carmen"));
        assert_eq!(config.owner, UserId::new("boss"));
        assert_eq!(config.commission_per_sale, Money::from_units(150));
    }
}
