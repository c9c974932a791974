//! Version tokens and the update decision.
//!
//! Versions are single decimal tokens ("1", "2", "2.5"), not semantic versions.
//! When both sides parse as numbers they compare numerically; otherwise any
//! difference counts as "newer".

use tracing::debug;

/// Version assumed when nothing has been installed yet
pub const UNKNOWN_VERSION: &str = "0";

fn as_number(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Returns true if `online` should replace `installed`
pub fn update_needed(installed: &str, online: &str) -> bool {
    match (as_number(installed), as_number(online)) {
        (Some(i), Some(o)) => o > i,
        _ => {
            debug!(
                "Non-numeric version comparison: installed={:?} online={:?}",
                installed, online
            );
            installed != online
        }
    }
}

/// Whether a token may be embedded in a cache file name
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token != "."
        && token != ".."
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}
