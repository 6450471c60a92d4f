//! # System Constants
//!
//! Cache namespaces and the trading defaults applied when an account has not
//! configured a value.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache namespaces. Each namespace has a fixed lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// Critical settings, persistent (no TTL), write-through
    Settings,
    /// Ephemeral conversation state, TTL equal to remaining lifetime
    Conversation,
    /// Pre-rendered settings summary, derived from `Settings`
    SettingsSummary,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Settings => "settings",
            CacheNamespace::Conversation => "conversation",
            CacheNamespace::SettingsSummary => "settings_summary",
        }
    }

    /// Namespaces whose entries embed critical settings and must be dropped
    /// after every settings mutation
    pub fn derived_from_settings() -> &'static [CacheNamespace] {
        &[CacheNamespace::SettingsSummary]
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defaults applied by the transaction parameter resolver
pub mod defaults {
    use super::Decimal;

    /// Priority fee in gwei
    pub const GAS_PRICE: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
    /// Slippage tolerance in percent
    pub const SLIPPAGE: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
    /// Auto-buy amount in native units (0.1)
    pub const AUTO_BUY_AMOUNT: Decimal = Decimal::from_parts(1, 0, 0, false, 1);
    pub const BUY_AMOUNTS: &str = "0.1,0.5,1";
    pub const SELL_PERCENTAGES: &str = "25,50,100";

    pub const MAX_SLIPPAGE: Decimal = Decimal::ONE_HUNDRED;
}
