//! # Transaction Parameter Resolver
//!
//! Maps a transaction category to the subset of critical settings it needs,
//! filling unset fields with system defaults. Reads go through the critical
//! settings cache, so a resolved parameter set always reflects the durable
//! store.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::defaults;
use crate::error::{Result, SettingsError};
use crate::models::{parse_decimal_list, AccountSettings};
use crate::settings::{CriticalSettingsCache, IntegrityReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    Buy,
    Sell,
    AutoBuy,
}

impl TransactionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCategory::Buy => "buy",
            TransactionCategory::Sell => "sell",
            TransactionCategory::AutoBuy => "auto_buy",
        }
    }
}

impl fmt::Display for TransactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionCategory {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(TransactionCategory::Buy),
            "sell" => Ok(TransactionCategory::Sell),
            "auto_buy" | "auto-buy" | "autobuy" => Ok(TransactionCategory::AutoBuy),
            other => Err(SettingsError::Validation(format!(
                "unknown transaction category '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyParams {
    pub gas_price: Decimal,
    pub slippage: Decimal,
    pub quick_amounts: Vec<Decimal>,
    pub fast_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellParams {
    pub gas_price: Decimal,
    pub slippage: Decimal,
    pub quick_percentages: Vec<Decimal>,
    pub fast_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBuyParams {
    pub amount: Decimal,
    pub gas_price: Decimal,
    pub slippage: Decimal,
    pub fast_mode: bool,
}

/// Parameters for one transaction, defaults applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum TransactionParams {
    Buy(BuyParams),
    Sell(SellParams),
    AutoBuy(AutoBuyParams),
}

impl TransactionParams {
    /// `None` for auto-buy when the account has it switched off
    pub fn from_settings(settings: &AccountSettings, category: TransactionCategory) -> Option<Self> {
        match category {
            TransactionCategory::Buy => Some(TransactionParams::Buy(BuyParams {
                gas_price: settings.buy_gas_price.unwrap_or(defaults::GAS_PRICE),
                slippage: settings.buy_slippage.unwrap_or(defaults::SLIPPAGE),
                quick_amounts: quick_list(
                    settings.account_id,
                    "buy_amounts",
                    settings.buy_amounts.as_deref(),
                    defaults::BUY_AMOUNTS,
                ),
                fast_mode: settings.fast_mode,
            })),
            TransactionCategory::Sell => Some(TransactionParams::Sell(SellParams {
                gas_price: settings.sell_gas_price.unwrap_or(defaults::GAS_PRICE),
                slippage: settings.sell_slippage.unwrap_or(defaults::SLIPPAGE),
                quick_percentages: quick_list(
                    settings.account_id,
                    "sell_percentages",
                    settings.sell_percentages.as_deref(),
                    defaults::SELL_PERCENTAGES,
                ),
                fast_mode: settings.fast_mode,
            })),
            TransactionCategory::AutoBuy if settings.auto_buy_enabled => {
                Some(TransactionParams::AutoBuy(AutoBuyParams {
                    amount: settings.auto_buy_amount.unwrap_or(defaults::AUTO_BUY_AMOUNT),
                    gas_price: settings.auto_buy_gas_price.unwrap_or(defaults::GAS_PRICE),
                    slippage: settings.auto_buy_slippage.unwrap_or(defaults::SLIPPAGE),
                    fast_mode: settings.fast_mode,
                }))
            }
            TransactionCategory::AutoBuy => None,
        }
    }

    pub fn category(&self) -> TransactionCategory {
        match self {
            TransactionParams::Buy(_) => TransactionCategory::Buy,
            TransactionParams::Sell(_) => TransactionCategory::Sell,
            TransactionParams::AutoBuy(_) => TransactionCategory::AutoBuy,
        }
    }

    pub fn gas_price(&self) -> Decimal {
        match self {
            TransactionParams::Buy(p) => p.gas_price,
            TransactionParams::Sell(p) => p.gas_price,
            TransactionParams::AutoBuy(p) => p.gas_price,
        }
    }

    pub fn slippage(&self) -> Decimal {
        match self {
            TransactionParams::Buy(p) => p.slippage,
            TransactionParams::Sell(p) => p.slippage,
            TransactionParams::AutoBuy(p) => p.slippage,
        }
    }
}

/// Parse a stored quick-button list. Values are validated on write, so a
/// parse failure here means the row was edited out of band.
fn quick_list(account_id: i64, field: &str, raw: Option<&str>, default: &str) -> Vec<Decimal> {
    if let Some(raw) = raw {
        match parse_decimal_list(raw) {
            Ok(values) if !values.is_empty() => return values,
            Ok(_) => {}
            Err(e) => warn!(
                account_id = account_id,
                field = field,
                error = %e,
                "Stored quick list unparseable, using defaults"
            ),
        }
    }
    parse_decimal_list(default).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ParameterResolver {
    settings: Arc<CriticalSettingsCache>,
}

impl ParameterResolver {
    pub fn new(settings: Arc<CriticalSettingsCache>) -> Self {
        Self { settings }
    }

    /// Resolve parameters on the fast path: one cache read, durable store
    /// on miss. `None` if the account has no record, or auto-buy is off.
    pub async fn resolve(
        &self,
        account_id: i64,
        category: TransactionCategory,
    ) -> Result<Option<TransactionParams>> {
        let Some(settings) = self.settings.read(account_id).await? else {
            debug!(account_id = account_id, category = %category, "No settings record");
            return Ok(None);
        };
        Ok(TransactionParams::from_settings(&settings, category))
    }

    /// Validate the cached settings against the durable store before
    /// resolving. Used immediately before executing a transaction.
    pub async fn validate_readiness(
        &self,
        account_id: i64,
        category: TransactionCategory,
    ) -> Result<Option<TransactionParams>> {
        match self.settings.check_integrity(account_id).await? {
            // repopulated from the durable row just now
            IntegrityReport::Missing => {}
            report if !report.is_consistent() => {
                warn!(
                    account_id = account_id,
                    category = %category,
                    "Settings failed integrity check before transaction, refreshing"
                );
                self.settings.emergency_refresh(account_id).await?;
            }
            _ => {}
        }
        self.resolve(account_id, category).await
    }
}
