//! Boundary validators shared by the gateway and planners.

/// Slugs reserved for internal routes — rejected on create.
const RESERVED_SLUGS: &[&str] = &["admin", "system", "default"];

/// Accepts canonical 8-4-4-4-12 hex UUIDs, mixed case allowed.
pub fn is_valid_uuid(s: &str) -> bool {
    let segments: Vec<&str> = s.split('-').collect();
    if segments.len() != 5 {
        return false;
    }
    let expected = [8, 4, 4, 4, 12];
    segments
        .iter()
        .zip(expected)
        .all(|(seg, len)| seg.len() == len && seg.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Validate a personality slug: 1..=64 chars, lowercase alphanumeric and
/// single hyphens, not reserved.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() || slug.len() > 64 {
        return Err(format!("slug length must be 1..=64, got {}", slug.len()));
    }
    if RESERVED_SLUGS.contains(&slug) {
        return Err(format!("slug '{slug}' is reserved"));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err("slug must not start or end with a hyphen".to_string());
    }
    if slug.contains("--") {
        return Err("slug must not contain consecutive hyphens".to_string());
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("slug must be lowercase alphanumeric with hyphens".to_string());
    }
    Ok(())
}

/// Retention bound for result cleanup: whole days in [1, 365].
pub fn validate_days_to_keep(raw: &str) -> Result<u32, String> {
    let days: u32 = raw
        .parse()
        .map_err(|_| format!("daysToKeep must be an integer, got '{raw}'"))?;
    if !(1..=365).contains(&days) {
        return Err(format!("daysToKeep must be in [1, 365], got {days}"));
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_accepts_canonical_and_mixed_case() {
        assert!(is_valid_uuid("123e4567-e89b-12d3-a456-426614174000"));
        assert!(is_valid_uuid("123E4567-E89B-12d3-A456-426614174000"));
    }

    #[test]
    fn uuid_rejects_malformed() {
        // No hyphens.
        assert!(!is_valid_uuid("123e4567e89b12d3a456426614174000"));
        // Wrong segment lengths.
        assert!(!is_valid_uuid("123e456-e89b-12d3-a456-426614174000"));
        assert!(!is_valid_uuid("123e4567-e89b-12d3-a456-42661417400"));
        // Non-hex chars.
        assert!(!is_valid_uuid("123e4567-e89b-12d3-a456-42661417400g"));
        assert!(!is_valid_uuid(""));
    }

    #[test]
    fn slug_accepts_normal_names() {
        assert!(validate_slug("luna").is_ok());
        assert!(validate_slug("bot-2000").is_ok());
        assert!(validate_slug("a").is_ok());
    }

    #[test]
    fn slug_rejects_bad_shapes() {
        assert!(validate_slug("").is_err());
        assert!(validate_slug(&"x".repeat(65)).is_err());
        assert!(validate_slug("Luna").is_err());
        assert!(validate_slug("-luna").is_err());
        assert!(validate_slug("luna-").is_err());
        assert!(validate_slug("lu--na").is_err());
        assert!(validate_slug("lu_na").is_err());
    }

    #[test]
    fn slug_rejects_reserved() {
        for name in ["admin", "system", "default"] {
            assert!(validate_slug(name).is_err(), "{name} should be reserved");
        }
    }

    #[test]
    fn days_to_keep_bounds() {
        assert_eq!(validate_days_to_keep("1"), Ok(1));
        assert_eq!(validate_days_to_keep("365"), Ok(365));
        assert!(validate_days_to_keep("0").is_err());
        assert!(validate_days_to_keep("366").is_err());
        assert!(validate_days_to_keep("invalid").is_err());
    }
}
