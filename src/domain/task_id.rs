//! Task identifier generation.
//!
//! `task_id` is conventionally `<site_id>-YYYYMMDD-HHMMSS-<rand4>`: a
//! globally-unique, sortable-by-creation-time string that still reads as
//! something a human can eyeball in a log line.

use chrono::{DateTime, Utc};

/// Builds a task id from a site id and timestamp. `rand4` is a
/// zero-padded four-digit suffix, not cryptographic — it only needs to
/// disambiguate two tasks for the same site admitted within the same
/// second.
#[must_use]
pub fn generate(site_id: &str, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d-%H%M%S");
    let rand4 = fastrand::u16(0..10_000);
    format!("{site_id}-{stamp}-{rand4:04}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn includes_site_id_and_timestamp() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 0).unwrap();
        let id = generate("site_a", now);
        assert!(id.starts_with("site_a-20260801-123000-"));
    }

    #[test]
    fn suffix_is_four_digits() {
        let now = Utc::now();
        let id = generate("site_a", now);
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    proptest! {
        #[test]
        fn generated_id_always_embeds_site_id_and_a_four_digit_suffix(
            site_id in "[a-z][a-z0-9_]{0,10}",
            offset_secs in 0i64..1_000_000_000,
        ) {
            let now = Utc.timestamp_opt(offset_secs, 0).unwrap();
            let id = generate(&site_id, now);

            let expected_prefix = format!("{site_id}-{}", now.format("%Y%m%d-%H%M%S"));
            prop_assert!(id.starts_with(&expected_prefix));

            let suffix = id.rsplit('-').next().unwrap();
            prop_assert_eq!(suffix.len(), 4);
            prop_assert!(suffix.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
