/*!
 * Serde helpers shared by the cached record types.
 */

use serde::{Deserialize, Deserializer};

/// Deserialize an `Option<T>` whose key must be present.
///
/// Plain `Option<T>` fields silently become `None` when the key is missing.
/// Cached records must be field-complete, so a missing key has to fail
/// deserialization (and the entry is then treated as malformed) while an
/// explicit `null` still maps to `None`.
///
/// # Usage with serde
///
/// ```rust
/// use serde::Deserialize;
/// use settings_core::utils::serde::deserialize_present_option;
///
/// #[derive(Deserialize)]
/// struct Entry {
///     #[serde(deserialize_with = "deserialize_present_option")]
///     slippage: Option<String>,
/// }
///
/// assert!(serde_json::from_str::<Entry>(r#"{"slippage": null}"#).is_ok());
/// assert!(serde_json::from_str::<Entry>(r#"{}"#).is_err());
/// ```
pub fn deserialize_present_option<'de, D, T>(
    deserializer: D,
) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}
