//! Terminal credentials in the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the kernel keyring. Onboarding writes these entries; this
//! crate only reads them while resolving [`crate::config::ClientConfig`].

use keyring::Entry;
use tracing::warn;

const SERVICE_NAME: &str = "the-small-pos";

pub const KEY_ADMIN_URL: &str = "admin_dashboard_url";
pub const KEY_TERMINAL_ID: &str = "terminal_id";
pub const KEY_API_KEY: &str = "pos_api_key";

/// Retrieve a single credential. Returns `None` when the entry does not
/// exist or the platform store is unavailable.
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) if !pw.trim().is_empty() => Some(pw),
        Ok(_) | Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}
