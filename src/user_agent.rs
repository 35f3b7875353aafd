//! User-Agent string shared by every transfer client.

/// Project URL for User-Agent identification (RFC 9308 good citizenship).
const PROJECT_UA_URL: &str = "https://github.com/fierce/isofetch";

/// Default User-Agent for probe and transfer requests.
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("isofetch/{version} (+{PROJECT_UA_URL})")
}
