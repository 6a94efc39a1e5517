/// Canonical column name: surrounding whitespace trimmed, lower-cased.
///
/// Idempotent, so already-normalized names pass through unchanged.
pub fn normalize_field_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}
