//! Local hostname resolution.
//!
//! Series registered without a `host` tag are tagged with the local hostname. The operating system is queried at most
//! once per process, the first time a hostname is needed, and the outcome (success or failure) is cached.

use std::sync::OnceLock;

use snafu::Snafu;
use tracing::debug;

static OS_HOSTNAME: OnceLock<Result<String, String>> = OnceLock::new();

/// Failed to resolve the local hostname.
#[derive(Debug, Snafu)]
#[snafu(display("Failed to resolve local hostname: {}", reason))]
pub struct HostnameError {
    reason: String,
}

/// Returns the normalized hostname of the local machine.
///
/// # Errors
///
/// If the operating system could not provide a hostname, or provided an empty one, an error will be returned. Failures
/// are cached like successes, so later calls return the same error without querying again.
pub fn os_hostname() -> Result<String, HostnameError> {
    OS_HOSTNAME
        .get_or_init(resolve_os_hostname)
        .clone()
        .map_err(|reason| HostnameSnafu { reason }.build())
}

fn resolve_os_hostname() -> Result<String, String> {
    let raw = ::hostname::get().map_err(|e| e.to_string())?;
    let hostname = normalize_hostname(&raw.to_string_lossy());
    if hostname.is_empty() {
        return Err("operating system reported an empty hostname".to_string());
    }

    debug!(%hostname, "Resolved local hostname.");
    Ok(hostname)
}

/// Normalizes a hostname for use as the `host` tag.
///
/// The hostname is lower-cased and cut down to its first DNS label, so `Web01.Example.COM` becomes `web01`.
pub fn normalize_hostname(raw: &str) -> String {
    raw.trim().split('.').next().unwrap_or_default().to_lowercase()
}
