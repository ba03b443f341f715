/// Coarse model-family grouping used to match a request's model id against a
/// credential's `model_families` set (spec.md §3 `familyOf(model)`).
///
/// Each provider groups its own model ids differently, so each gets its own
/// small mapping function rather than a single shared regex.
pub fn openai_family_of(model: &str) -> String {
    let m = model.to_ascii_lowercase();
    if m.starts_with("gpt-image") {
        "gpt-image".to_string()
    } else if m.starts_with("gpt-5") {
        "gpt5".to_string()
    } else if m.starts_with("o1") {
        "o1".to_string()
    } else if m.starts_with("o3") {
        "o3".to_string()
    } else if m.starts_with("o4-mini") {
        "o4-mini".to_string()
    } else if m.starts_with("dall-e") {
        "dall-e".to_string()
    } else if m.starts_with("chatgpt") {
        "chatgpt".to_string()
    } else if m.starts_with("text-embedding") {
        "text-embedding".to_string()
    } else if m.starts_with("codex") {
        "codex".to_string()
    } else if m.starts_with("gpt-4o") {
        "gpt4o".to_string()
    } else {
        strip_snapshot_suffix(&m)
    }
}

pub fn anthropic_family_of(model: &str) -> String {
    let m = model.to_ascii_lowercase();
    for family in ["claude-opus", "claude-sonnet", "claude-haiku"] {
        if m.starts_with(family) {
            return family.to_string();
        }
    }
    strip_snapshot_suffix(&m)
}

pub fn google_family_of(model: &str) -> String {
    let m = model.to_ascii_lowercase();
    if m.contains("imagen") {
        return "imagen".to_string();
    }
    if m.contains("gemini-2.5-pro") {
        return "gemini-pro".to_string();
    }
    strip_snapshot_suffix(&m)
}

/// Identity mapping (lowercased) for the simple single-family providers.
pub fn generic_family_of(model: &str) -> String {
    model.to_ascii_lowercase()
}

/// Drop a trailing `-YYYYMMDD`/date snapshot or `@location` suffix so
/// `claude-opus-4-5-20250101` and `claude-opus-4-5` land in the same family.
fn strip_snapshot_suffix(model: &str) -> String {
    let without_location = model.split('@').next().unwrap_or(model);
    match without_location.rfind('-') {
        Some(idx) if without_location[idx + 1..].chars().all(|c| c.is_ascii_digit()) && without_location[idx + 1..].len() >= 6 => {
            without_location[..idx].to_string()
        }
        _ => without_location.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_groups_known_prefixes() {
        assert_eq!(openai_family_of("gpt-image-1"), "gpt-image");
        assert_eq!(openai_family_of("o3-mini"), "o3");
        assert_eq!(openai_family_of("gpt-4o-mini"), "gpt4o");
    }

    #[test]
    fn strips_dated_snapshot_suffix() {
        assert_eq!(strip_snapshot_suffix("claude-opus-4-5-20250101"), "claude-opus-4-5");
        assert_eq!(strip_snapshot_suffix("claude-opus-4-5"), "claude-opus-4-5");
    }

    #[test]
    fn anthropic_groups_by_model_line() {
        assert_eq!(anthropic_family_of("claude-sonnet-4-5-20250929"), "claude-sonnet");
        assert_eq!(anthropic_family_of("claude-opus-4-5"), "claude-opus");
    }
}
