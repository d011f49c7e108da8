//! Balance glue for the resolution sink: the user's balance, the house
//! reserve, and the max stake the house can cover (reserve / 2, since a
//! win pays out double).

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider};
use alloy::transports::TransportError;

#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub user: U256,
    pub house: U256,
    pub max_stake: U256,
}

impl std::fmt::Display for BalanceSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "user {} / house {} / max stake {}",
            format_ether(self.user),
            format_ether(self.house),
            format_ether(self.max_stake)
        )
    }
}

pub struct BalanceWatcher {
    provider: DynProvider,
    user: Address,
    house: Address,
}

impl BalanceWatcher {
    pub fn new(provider: DynProvider, user: Address, house: Address) -> Self {
        Self {
            provider,
            user,
            house,
        }
    }

    pub async fn refresh(&self) -> Result<BalanceSnapshot, TransportError> {
        let user = self.provider.get_balance(self.user).await?;
        let house = self.provider.get_balance(self.house).await?;
        Ok(BalanceSnapshot {
            user,
            house,
            max_stake: house / U256::from(2),
        })
    }
}
