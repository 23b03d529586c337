//! `nicerId` (SPEC_FULL.md GLOSSARY, §4.9): a lowercase-alphanumeric random
//! identifier suitable as an Azure resource name, drawn from a secure
//! random source.

use uuid::Uuid;

/// Concatenate a couple of random UUIDs, downcase, and strip everything
/// that isn't alphanumeric, then truncate to `max_len`.
pub fn nicer_id(max_len: usize) -> String {
    let raw: String = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    cleaned.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nicer_id_is_lowercase_alphanumeric_and_bounded() {
        let id = nicer_id(15);
        assert!(id.len() <= 15);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
