// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `driver_info` fields that Ironic never returns in the clear.

use serde_json::Map;
use serde_json::Value;
use std::fmt;

/// What Ironic reports in place of a sensitive value.
pub const MASKED_VALUE: &str = "******";

pub static SENSITIVE_DRIVER_INFO_KEYS: &[&str] = &[
    "ipmi_password",
    "ilo_password",
    "snmp_auth_prot_password",
    "snmp_auth_priv_password",
    "drac_password",
    "redfish_password",
];

pub fn is_sensitive(key: &str) -> bool {
    SENSITIVE_DRIVER_INFO_KEYS.contains(&key)
}

/// Whether `value` is Ironic's mask for the sensitive field `key`.
pub fn is_masked(key: &str, value: &Value) -> bool {
    is_sensitive(key) && value.as_str() == Some(MASKED_VALUE)
}

/// Returns a copy of `driver_info` with every sensitive value masked.
pub fn redact_driver_info(
    driver_info: &Map<String, Value>,
) -> Map<String, Value> {
    driver_info
        .iter()
        .map(|(key, value)| {
            let value = if is_sensitive(key) {
                Value::String(MASKED_VALUE.to_string())
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect()
}

/// Formats `driver_info` for logs with sensitive values masked.
pub struct RedactedDriverInfo<'a>(pub &'a Map<String, Value>);

impl fmt::Display for RedactedDriverInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(redact_driver_info(self.0)))
    }
}

impl fmt::Debug for RedactedDriverInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
