use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::constants::defaults;
use crate::error::{Result, SettingsError};
use crate::utils::serde::deserialize_present_option;

/// Names of the trading-critical columns, in comparison order
pub const CRITICAL_FIELDS: [&str; 11] = [
    "buy_gas_price",
    "buy_slippage",
    "sell_gas_price",
    "sell_slippage",
    "auto_buy_enabled",
    "auto_buy_amount",
    "auto_buy_gas_price",
    "auto_buy_slippage",
    "buy_amounts",
    "sell_percentages",
    "fast_mode",
];

/// Trading-critical settings of one account.
/// Maps to the critical columns of the `account_settings` table.
///
/// This type is also the persistent cache entry. It has no field for wallet
/// material, and the durable queries select only these columns, so secrets
/// cannot reach the cache. Every key must be present when read back from the
/// cache; a partial entry fails to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AccountSettings {
    pub account_id: i64,
    #[serde(deserialize_with = "deserialize_present_option")]
    pub buy_gas_price: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_present_option")]
    pub buy_slippage: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_present_option")]
    pub sell_gas_price: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_present_option")]
    pub sell_slippage: Option<Decimal>,
    pub auto_buy_enabled: bool,
    #[serde(deserialize_with = "deserialize_present_option")]
    pub auto_buy_amount: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_present_option")]
    pub auto_buy_gas_price: Option<Decimal>,
    #[serde(deserialize_with = "deserialize_present_option")]
    pub auto_buy_slippage: Option<Decimal>,
    /// Comma separated amounts for quick-buy buttons, e.g. `"0.1,0.5,1"`
    #[serde(deserialize_with = "deserialize_present_option")]
    pub buy_amounts: Option<String>,
    /// Comma separated percentages for quick-sell buttons, e.g. `"25,50,100"`
    #[serde(deserialize_with = "deserialize_present_option")]
    pub sell_percentages: Option<String>,
    pub fast_mode: bool,
}

/// One critical field whose cached value differs from the durable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub cached: String,
    pub durable: String,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: cached={} durable={}", self.field, self.cached, self.durable)
    }
}

fn render<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "null".to_string())
}

impl AccountSettings {
    /// A record with every optional field unset
    pub fn unset(account_id: i64) -> Self {
        Self {
            account_id,
            buy_gas_price: None,
            buy_slippage: None,
            sell_gas_price: None,
            sell_slippage: None,
            auto_buy_enabled: false,
            auto_buy_amount: None,
            auto_buy_gas_price: None,
            auto_buy_slippage: None,
            buy_amounts: None,
            sell_percentages: None,
            fast_mode: false,
        }
    }

    /// Rendered critical values, aligned with [`CRITICAL_FIELDS`]
    fn field_values(&self) -> [String; 11] {
        [
            render(&self.buy_gas_price),
            render(&self.buy_slippage),
            render(&self.sell_gas_price),
            render(&self.sell_slippage),
            self.auto_buy_enabled.to_string(),
            render(&self.auto_buy_amount),
            render(&self.auto_buy_gas_price),
            render(&self.auto_buy_slippage),
            render(&self.buy_amounts),
            render(&self.sell_percentages),
            self.fast_mode.to_string(),
        ]
    }

    /// Field-by-field comparison of `self` (cached) against `durable`.
    ///
    /// Decimals compare by value, so `1.50` and `1.5` are equal.
    pub fn diff(&self, durable: &AccountSettings) -> Vec<FieldMismatch> {
        let equal = [
            self.buy_gas_price == durable.buy_gas_price,
            self.buy_slippage == durable.buy_slippage,
            self.sell_gas_price == durable.sell_gas_price,
            self.sell_slippage == durable.sell_slippage,
            self.auto_buy_enabled == durable.auto_buy_enabled,
            self.auto_buy_amount == durable.auto_buy_amount,
            self.auto_buy_gas_price == durable.auto_buy_gas_price,
            self.auto_buy_slippage == durable.auto_buy_slippage,
            self.buy_amounts == durable.buy_amounts,
            self.sell_percentages == durable.sell_percentages,
            self.fast_mode == durable.fast_mode,
        ];

        let cached_values = self.field_values();
        let durable_values = durable.field_values();

        CRITICAL_FIELDS
            .iter()
            .zip(equal)
            .zip(cached_values.into_iter().zip(durable_values))
            .filter(|((_, is_equal), _)| !is_equal)
            .map(|((field, _), (cached, durable))| FieldMismatch {
                field: *field,
                cached,
                durable,
            })
            .collect()
    }

    /// Merge an update into this record
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(v) = update.buy_gas_price {
            self.buy_gas_price = Some(v);
        }
        if let Some(v) = update.buy_slippage {
            self.buy_slippage = Some(v);
        }
        if let Some(v) = update.sell_gas_price {
            self.sell_gas_price = Some(v);
        }
        if let Some(v) = update.sell_slippage {
            self.sell_slippage = Some(v);
        }
        if let Some(v) = update.auto_buy_enabled {
            self.auto_buy_enabled = v;
        }
        if let Some(v) = update.auto_buy_amount {
            self.auto_buy_amount = Some(v);
        }
        if let Some(v) = update.auto_buy_gas_price {
            self.auto_buy_gas_price = Some(v);
        }
        if let Some(v) = update.auto_buy_slippage {
            self.auto_buy_slippage = Some(v);
        }
        if let Some(v) = &update.buy_amounts {
            self.buy_amounts = Some(v.clone());
        }
        if let Some(v) = &update.sell_percentages {
            self.sell_percentages = Some(v.clone());
        }
        if let Some(v) = update.fast_mode {
            self.fast_mode = v;
        }
    }
}

/// Partial update of critical settings. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub buy_gas_price: Option<Decimal>,
    pub buy_slippage: Option<Decimal>,
    pub sell_gas_price: Option<Decimal>,
    pub sell_slippage: Option<Decimal>,
    pub auto_buy_enabled: Option<bool>,
    pub auto_buy_amount: Option<Decimal>,
    pub auto_buy_gas_price: Option<Decimal>,
    pub auto_buy_slippage: Option<Decimal>,
    pub buy_amounts: Option<String>,
    pub sell_percentages: Option<String>,
    pub fast_mode: Option<bool>,
}

impl SettingsUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buy_gas_price(mut self, value: Decimal) -> Self {
        self.buy_gas_price = Some(value);
        self
    }

    pub fn buy_slippage(mut self, value: Decimal) -> Self {
        self.buy_slippage = Some(value);
        self
    }

    pub fn sell_gas_price(mut self, value: Decimal) -> Self {
        self.sell_gas_price = Some(value);
        self
    }

    pub fn sell_slippage(mut self, value: Decimal) -> Self {
        self.sell_slippage = Some(value);
        self
    }

    pub fn auto_buy_enabled(mut self, value: bool) -> Self {
        self.auto_buy_enabled = Some(value);
        self
    }

    pub fn auto_buy_amount(mut self, value: Decimal) -> Self {
        self.auto_buy_amount = Some(value);
        self
    }

    pub fn auto_buy_gas_price(mut self, value: Decimal) -> Self {
        self.auto_buy_gas_price = Some(value);
        self
    }

    pub fn auto_buy_slippage(mut self, value: Decimal) -> Self {
        self.auto_buy_slippage = Some(value);
        self
    }

    pub fn buy_amounts(mut self, value: impl Into<String>) -> Self {
        self.buy_amounts = Some(value.into());
        self
    }

    pub fn sell_percentages(mut self, value: impl Into<String>) -> Self {
        self.sell_percentages = Some(value.into());
        self
    }

    pub fn fast_mode(mut self, value: bool) -> Self {
        self.fast_mode = Some(value);
        self
    }

    /// Names of the fields this update touches
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let present = [
            self.buy_gas_price.is_some(),
            self.buy_slippage.is_some(),
            self.sell_gas_price.is_some(),
            self.sell_slippage.is_some(),
            self.auto_buy_enabled.is_some(),
            self.auto_buy_amount.is_some(),
            self.auto_buy_gas_price.is_some(),
            self.auto_buy_slippage.is_some(),
            self.buy_amounts.is_some(),
            self.sell_percentages.is_some(),
            self.fast_mode.is_some(),
        ];
        CRITICAL_FIELDS
            .iter()
            .zip(present)
            .filter_map(|(field, is_present)| is_present.then_some(*field))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Reject values that must never reach a transaction
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(SettingsError::Validation("update contains no fields".to_string()));
        }

        for (name, gas) in [
            ("buy_gas_price", self.buy_gas_price),
            ("sell_gas_price", self.sell_gas_price),
            ("auto_buy_gas_price", self.auto_buy_gas_price),
        ] {
            if let Some(gas) = gas {
                if gas <= Decimal::ZERO {
                    return Err(SettingsError::Validation(format!(
                        "{name} must be greater than zero, got {gas}"
                    )));
                }
            }
        }

        for (name, slippage) in [
            ("buy_slippage", self.buy_slippage),
            ("sell_slippage", self.sell_slippage),
            ("auto_buy_slippage", self.auto_buy_slippage),
        ] {
            if let Some(slippage) = slippage {
                if slippage < Decimal::ZERO || slippage > defaults::MAX_SLIPPAGE {
                    return Err(SettingsError::Validation(format!(
                        "{name} must be between 0 and {}, got {slippage}",
                        defaults::MAX_SLIPPAGE
                    )));
                }
            }
        }

        if let Some(amount) = self.auto_buy_amount {
            if amount < Decimal::ZERO {
                return Err(SettingsError::Validation(format!(
                    "auto_buy_amount must not be negative, got {amount}"
                )));
            }
        }

        if let Some(amounts) = &self.buy_amounts {
            parse_decimal_list(amounts)
                .map_err(|e| SettingsError::Validation(format!("buy_amounts: {e}")))?;
        }

        if let Some(percentages) = &self.sell_percentages {
            let values = parse_decimal_list(percentages)
                .map_err(|e| SettingsError::Validation(format!("sell_percentages: {e}")))?;
            if let Some(too_large) = values.iter().find(|v| **v > Decimal::ONE_HUNDRED) {
                return Err(SettingsError::Validation(format!(
                    "sell_percentages: {too_large} exceeds 100"
                )));
            }
        }

        Ok(())
    }
}

/// Parse a formatted button list such as `"0.1, 0.5,1"`.
///
/// Entries must be non-negative decimals; empty lists are rejected.
pub fn parse_decimal_list(raw: &str) -> std::result::Result<Vec<Decimal>, String> {
    let values = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let value = Decimal::from_str(part).map_err(|_| format!("'{part}' is not a number"))?;
            if value < Decimal::ZERO {
                return Err(format!("'{part}' is negative"));
            }
            Ok(value)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if values.is_empty() {
        return Err("list is empty".to_string());
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn sample(account_id: i64) -> AccountSettings {
        AccountSettings {
            account_id,
            buy_gas_price: Some(dec!(12)),
            buy_slippage: Some(dec!(15)),
            sell_gas_price: Some(dec!(8)),
            sell_slippage: None,
            auto_buy_enabled: true,
            auto_buy_amount: Some(dec!(0.25)),
            auto_buy_gas_price: None,
            auto_buy_slippage: Some(dec!(20)),
            buy_amounts: Some("0.1,0.5,1".to_string()),
            sell_percentages: None,
            fast_mode: false,
        }
    }

    #[test]
    fn test_diff_identical_is_empty() {
        assert!(sample(1).diff(&sample(1)).is_empty());
    }

    #[test]
    fn test_diff_reports_field_names_and_values() {
        let cached = sample(1);
        let mut durable = sample(1);
        durable.buy_slippage = Some(dec!(7));
        durable.fast_mode = true;

        let mismatches = cached.diff(&durable);
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].field, "buy_slippage");
        assert_eq!(mismatches[0].cached, "15");
        assert_eq!(mismatches[0].durable, "7");
        assert_eq!(mismatches[1].field, "fast_mode");
    }

    #[test]
    fn test_diff_treats_decimal_scale_as_equal() {
        let cached = sample(1);
        let mut durable = sample(1);
        durable.buy_gas_price = Some(dec!(12.00));
        assert!(cached.diff(&durable).is_empty());
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let mut settings = sample(1);
        settings.apply(&SettingsUpdate::new().buy_slippage(dec!(7)).fast_mode(true));

        assert_eq!(settings.buy_slippage, Some(dec!(7)));
        assert!(settings.fast_mode);
        assert_eq!(settings.buy_gas_price, Some(dec!(12)));
        assert_eq!(settings.auto_buy_amount, Some(dec!(0.25)));
    }

    #[test]
    fn test_cache_entry_missing_field_fails_to_deserialize() {
        let mut value = serde_json::to_value(sample(42)).unwrap();
        value.as_object_mut().unwrap().remove("buy_gas_price");
        assert!(serde_json::from_value::<AccountSettings>(value).is_err());
    }

    #[test]
    fn test_cache_entry_round_trip_keeps_nulls() {
        let settings = sample(42);
        let json = serde_json::to_string(&settings).unwrap();
        let back: AccountSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
        assert_eq!(back.sell_slippage, None);
    }

    #[test]
    fn test_validate_rejects_out_of_range_slippage() {
        let err = SettingsUpdate::new().buy_slippage(dec!(101)).validate().unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)));
        assert!(SettingsUpdate::new().sell_slippage(dec!(-1)).validate().is_err());
        assert!(SettingsUpdate::new().buy_slippage(dec!(100)).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_gas_and_empty_update() {
        assert!(SettingsUpdate::new().buy_gas_price(dec!(0)).validate().is_err());
        assert!(SettingsUpdate::new().validate().is_err());
    }

    #[test]
    fn test_validate_checks_button_lists() {
        assert!(SettingsUpdate::new().buy_amounts("0.1, 0.5,1").validate().is_ok());
        assert!(SettingsUpdate::new().buy_amounts("0.1,abc").validate().is_err());
        assert!(SettingsUpdate::new().sell_percentages("25,150").validate().is_err());
        assert!(SettingsUpdate::new().sell_percentages(" , ").validate().is_err());
    }

    #[test]
    fn test_changed_fields() {
        let update = SettingsUpdate::new().buy_slippage(dec!(7)).auto_buy_enabled(false);
        assert_eq!(update.changed_fields(), vec!["buy_slippage", "auto_buy_enabled"]);
    }

    fn arb_decimal() -> impl Strategy<Value = Option<Decimal>> {
        proptest::option::of((0u32..100_000u32).prop_map(|v| Decimal::new(v as i64, 2)))
    }

    fn arb_settings() -> impl Strategy<Value = AccountSettings> {
        (
            arb_decimal(),
            arb_decimal(),
            arb_decimal(),
            arb_decimal(),
            any::<bool>(),
            arb_decimal(),
            any::<bool>(),
        )
            .prop_map(
                |(buy_gas, buy_slip, sell_gas, auto_amount, auto_enabled, auto_slip, fast)| {
                    AccountSettings {
                        account_id: 1,
                        buy_gas_price: buy_gas,
                        buy_slippage: buy_slip,
                        sell_gas_price: sell_gas,
                        sell_slippage: None,
                        auto_buy_enabled: auto_enabled,
                        auto_buy_amount: auto_amount,
                        auto_buy_gas_price: None,
                        auto_buy_slippage: auto_slip,
                        buy_amounts: None,
                        sell_percentages: Some("25,50,100".to_string()),
                        fast_mode: fast,
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn prop_diff_empty_iff_equal(a in arb_settings(), b in arb_settings()) {
            prop_assert_eq!(a.diff(&b).is_empty(), a == b);
        }

        #[test]
        fn prop_applied_update_is_reflected(mut base in arb_settings(), slip in 0u32..=100u32, fast in any::<bool>()) {
            let update = SettingsUpdate::new().buy_slippage(Decimal::from(slip)).fast_mode(fast);
            base.apply(&update);
            prop_assert_eq!(base.buy_slippage, Some(Decimal::from(slip)));
            prop_assert_eq!(base.fast_mode, fast);
        }
    }
}
