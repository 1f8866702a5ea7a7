use std::time::Duration;

/// Read an environment variable, treating blank values as unset.
pub fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a humantime duration (`"30s"`, `"1m 30s"`, `"250ms"`).
pub fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw.trim())
}
