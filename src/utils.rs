//! Shared utility functions.

/// Format bytes in human-readable form.
///
/// # Examples
///
/// ```
/// use vigil::utils::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 bytes");
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(1048576), "1.0 MB");
/// ```
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;
    const TB: u64 = 1024 * 1024 * 1024 * 1024;

    if bytes == 0 {
        "0 bytes".to_string()
    } else if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

/// Format a duration in human-readable form.
///
/// # Examples
///
/// ```
/// use chrono::Duration;
/// use vigil::utils::format_duration;
///
/// assert_eq!(format_duration(Duration::seconds(30)), "30s");
/// assert_eq!(format_duration(Duration::seconds(90)), "1m 30s");
/// assert_eq!(format_duration(Duration::seconds(3660)), "1h 1m");
/// assert_eq!(format_duration(Duration::seconds(90000)), "1d 1h");
/// ```
pub fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(30)), "30s");
        assert_eq!(format_duration(chrono::Duration::seconds(90)), "1m 30s");
        assert_eq!(format_duration(chrono::Duration::seconds(3660)), "1h 1m");
        assert_eq!(format_duration(chrono::Duration::seconds(90000)), "1d 1h");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 bytes");
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_bytes(1024 * 1024 * 1024 * 1024), "1.00 TB");
    }
}

#[cfg(test)]
mod property_tests {
    //! Property-based tests for utility functions.
    //!
    //! These verify the formatters never panic and always produce
    //! non-empty, unit-suffixed output for any valid input.

    use proptest::prelude::*;

    use super::{format_bytes, format_duration};

    /// Strategy for generating duration in seconds.
    ///
    /// `chrono::Duration::seconds()` can overflow near i64::MAX nanoseconds,
    /// so we limit to a safe range (~10,000 years).
    fn seconds() -> impl Strategy<Value = i64> {
        0i64..=315_360_000_000i64
    }

    proptest! {
        #[test]
        fn format_bytes_never_panics(bytes in any::<u64>()) {
            let out = format_bytes(bytes);
            prop_assert!(!out.is_empty());
        }

        #[test]
        fn format_bytes_has_unit_suffix(bytes in any::<u64>()) {
            let out = format_bytes(bytes);
            prop_assert!(
                out.ends_with("bytes")
                    || out.ends_with("KB")
                    || out.ends_with("MB")
                    || out.ends_with("GB")
                    || out.ends_with("TB")
            );
        }

        #[test]
        fn format_duration_never_panics(secs in seconds()) {
            let out = format_duration(chrono::Duration::seconds(secs));
            prop_assert!(!out.is_empty());
        }
    }
}
