//! Contact address normalization shared by selection and dispatch.

use crate::config::AddressingConfig;

/// Normalize a raw phone number into a transport address.
///
/// Strips every non-digit character. If the digits do not already start
/// with the configured country code and are no longer than a local
/// number, the country code is prepended. Returns `None` when no digits
/// remain.
pub fn normalize_address(raw: &str, config: &AddressingConfig) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    if !digits.starts_with(&config.country_code) && digits.len() <= config.local_number_max_len {
        return Some(format!("{}{}", config.country_code, digits));
    }

    Some(digits)
}
