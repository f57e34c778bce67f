use std::time::Duration;

pub const CONNECTOR_ID: &str = "CONNECTOR_ID";

pub fn get_connector_id() -> Option<String> {
    std::env::var(CONNECTOR_ID).ok().filter(|id| !id.is_empty())
}

pub const NOTIFY_WEBHOOK_URL: &str = "NOTIFY_WEBHOOK_URL";

pub fn get_notify_webhook() -> Option<String> {
    std::env::var(NOTIFY_WEBHOOK_URL)
        .ok()
        .filter(|url| !url.is_empty())
}

/// Milliseconds of a duration, saturating instead of truncating silently
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
