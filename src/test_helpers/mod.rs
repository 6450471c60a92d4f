// Test Helpers Module - in-memory collaborators
//
// In-memory implementations of the durable store and the remote cache so the
// cache-consistency logic can be exercised without PostgreSQL or Redis.
// Both support failure injection.

pub mod memory_cache;
pub mod memory_store;

pub use memory_cache::InMemoryCacheBackend;
pub use memory_store::{HeldLoad, InMemoryDurableStore};

use rust_decimal::Decimal;

use crate::models::AccountSettings;

/// A fully populated settings record for tests
pub fn sample_settings(account_id: i64) -> AccountSettings {
    AccountSettings {
        account_id,
        buy_gas_price: Some(Decimal::new(15, 0)),
        buy_slippage: Some(Decimal::new(12, 0)),
        sell_gas_price: Some(Decimal::new(20, 0)),
        sell_slippage: Some(Decimal::new(18, 0)),
        auto_buy_enabled: true,
        auto_buy_amount: Some(Decimal::new(25, 2)),
        auto_buy_gas_price: Some(Decimal::new(30, 0)),
        auto_buy_slippage: Some(Decimal::new(25, 0)),
        buy_amounts: Some("0.2,0.5,2".to_string()),
        sell_percentages: Some("10,50,100".to_string()),
        fast_mode: false,
    }
}
