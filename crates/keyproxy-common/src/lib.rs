//! Small shared primitives with no async runtime dependency.
//!
//! Kept deliberately thin: everything here is either a pure function or a
//! type with no behavior, so every other crate in the workspace can depend
//! on it without pulling in tokio.

use time::OffsetDateTime;

/// Stable short identifier derived from credential secret material.
///
/// Two credentials with the same `(secret, salt)` pair always hash to the
/// same value; this is used as the primary handle for a credential in logs
/// and APIs instead of the raw secret. `salt` is the organization id for
/// OpenAI clones (see spec.md §3's multi-org clone invariant) or empty for
/// everything else.
pub fn stable_hash(secret: &str, salt: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"\0");
    hasher.update(salt.as_bytes());
    hasher.finalize().to_hex()[..16].to_string()
}

/// Current wall-clock time, centralized so tests can see where "now" is read.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Parse a comma-separated environment variable into a de-duplicated list,
/// collapsing duplicates by trimmed value (spec.md §6: "duplicates are
/// collapsed by hash before insertion" — here by the raw value, which is the
/// pre-hash form of the same rule).
pub fn parse_csv_env(value: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in value.split(',') {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hash_is_deterministic_and_salt_sensitive() {
        let a = stable_hash("sk-abc", "");
        let b = stable_hash("sk-abc", "");
        let c = stable_hash("sk-abc", "org_b");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn parse_csv_env_dedupes_and_trims() {
        let items = parse_csv_env(" sk-a ,sk-b,sk-a,, sk-c");
        assert_eq!(items, vec!["sk-a", "sk-b", "sk-c"]);
    }
}
