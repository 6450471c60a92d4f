pub mod account_settings;
pub mod conversation_state;

pub use account_settings::{
    parse_decimal_list, AccountSettings, FieldMismatch, SettingsUpdate, CRITICAL_FIELDS,
};
pub use conversation_state::ConversationState;
