use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_NAME_LEN: usize = 24;

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Derives a display name from a subject id.
///
/// Keeps ASCII alphanumerics, `_` and `-`, capped at 24 characters. Subjects
/// with nothing usable fall back to `Guest`.
pub fn display_name(subject: &str) -> String {
    let name: String = subject
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_NAME_LEN)
        .collect();

    if name.is_empty() {
        "Guest".to_string()
    } else {
        name
    }
}

/// Trims `text` and caps it at `max_chars` characters (not bytes).
pub fn trim_and_cap(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

/// Random 12-character lowercase hex id.
pub fn random_instance_id() -> String {
    let value: u64 = rand::thread_rng().gen();
    format!("{:012x}", value & 0xffff_ffff_ffff)
}
