use std::cmp::Ordering;

use time::OffsetDateTime;

use crate::credential::CredentialMeta;

/// Tie-break order for selecting among eligible credentials (spec.md §4.5):
///
/// 1. trial credentials before paid ones (cheapest to burn through first)
/// 2. oldest `last_used` first (LRU), `None` counts as oldest
/// 3. hash, for a fully deterministic result when the above all tie
///
/// Generic over the concrete per-provider struct `T` so one function serves
/// every provider's `select`. `meta_of` extracts the common fields; `is_trial`
/// lets providers without a trial concept just pass `|_| false`.
pub fn pick_prioritized<'a, T>(
    candidates: impl Iterator<Item = &'a T>,
    meta_of: impl Fn(&'a T) -> &'a CredentialMeta,
    is_trial: impl Fn(&'a T) -> bool,
) -> Option<&'a T> {
    candidates.min_by(|a, b| provider_cmp(meta_of(a), is_trial(a), meta_of(b), is_trial(b)))
}

fn provider_cmp(a: &CredentialMeta, a_trial: bool, b: &CredentialMeta, b_trial: bool) -> Ordering {
    b_trial
        .cmp(&a_trial)
        .then_with(|| last_used_rank(a).cmp(&last_used_rank(b)))
        .then_with(|| a.hash.cmp(&b.hash))
}

/// `None` (never used) sorts before any concrete instant.
fn last_used_rank(meta: &CredentialMeta) -> OffsetDateTime {
    meta.last_used.unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{AnthropicCredential, OpenAiCredential};

    #[test]
    fn trial_beats_paid_regardless_of_usage() {
        let mut trial = OpenAiCredential::new("sk-trial", None);
        trial.is_trial = true;
        trial.meta.prompt_count = 1000;

        let mut paid = OpenAiCredential::new("sk-paid", None);
        paid.meta.prompt_count = 0;

        let creds = vec![paid, trial];
        let picked = pick_prioritized(creds.iter(), |c| &c.meta, |c| c.is_trial).unwrap();
        assert!(picked.is_trial);
    }

    #[test]
    fn full_tie_is_broken_by_hash() {
        let a = AnthropicCredential::new("sk-a");
        let b = AnthropicCredential::new("sk-b");
        let expected = if a.meta.hash < b.meta.hash { a.meta.hash.clone() } else { b.meta.hash.clone() };

        let creds = vec![b, a];
        let picked = pick_prioritized(creds.iter(), |c| &c.meta, |_| false).unwrap();
        assert_eq!(picked.meta.hash, expected);
    }

    #[test]
    fn never_used_counts_as_oldest() {
        let fresh = AnthropicCredential::new("sk-a");
        let mut recently_used = AnthropicCredential::new("sk-b");
        recently_used.meta.last_used = Some(OffsetDateTime::now_utc());

        let creds = vec![recently_used, fresh];
        let picked = pick_prioritized(creds.iter(), |c| &c.meta, |_| false).unwrap();
        assert!(picked.meta.last_used.is_none());
    }

    #[test]
    fn empty_iterator_returns_none() {
        let empty: Vec<AnthropicCredential> = vec![];
        assert!(pick_prioritized(empty.iter(), |c| &c.meta, |_| false).is_none());
    }
}
