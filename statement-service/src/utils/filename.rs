use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("unsafe filename pattern is valid"));

/// Width of the `original_filename` column.
pub const ORIGINAL_FILENAME_MAX_CHARS: usize = 255;

/// Longest name `secure_filename` returns. Leaves room for the stored-name
/// prefix within the 255-byte limit of the column and common filesystems.
pub const SECURE_FILENAME_MAX_CHARS: usize = 200;

const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "AUX", "COM1", "COM2", "COM3", "COM4", "LPT1", "LPT2", "LPT3", "PRN", "NUL",
];

/// Reduce a client-supplied filename to a safe, flat ASCII name.
///
/// Path separators become spaces, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped and leading/trailing `.` and `_`
/// are trimmed. Long names are shortened to `SECURE_FILENAME_MAX_CHARS`,
/// keeping a short extension. May return an empty string.
pub fn secure_filename(filename: &str) -> String {
    let flattened = filename.replace(['/', '\\'], " ");
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = UNSAFE_CHARS.replace_all(&joined, "");
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c == '_').to_string();

    let stem = trimmed.split('.').next().unwrap_or_default().to_ascii_uppercase();
    let safe = if WINDOWS_DEVICE_NAMES.contains(&stem.as_str()) {
        format!("_{}", trimmed)
    } else {
        trimmed
    };
    cap_length(safe, SECURE_FILENAME_MAX_CHARS)
}

// Input is ASCII here, so byte and character counts agree.
fn cap_length(name: String, max: usize) -> String {
    if name.len() <= max {
        return name;
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.len() < 16 => {
            format!("{}.{}", &stem[..max - ext.len() - 1], ext)
        }
        _ => name[..max].to_string(),
    }
}

/// `YYYYMMDD_HHMMSS_<8 hex>_<secure name>`, unique even for same-second uploads.
pub fn stored_filename(original: &str, at: DateTime<Utc>) -> String {
    let safe = secure_filename(original);
    let safe = if safe.is_empty() { "upload".to_string() } else { safe };
    let token = Uuid::new_v4().simple().to_string();

    format!("{}_{}_{}", at.format("%Y%m%d_%H%M%S"), &token[..8], safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn strips_paths_and_unsafe_characters() {
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("My Statement (Jan).pdf"), "My_Statement_Jan.pdf");
        assert_eq!(secure_filename("C:\\Users\\me\\scan.PNG"), "C_Users_me_scan.PNG");
        assert_eq!(secure_filename("relevé.pdf"), "relev.pdf");
    }

    #[test]
    fn handles_degenerate_names() {
        assert_eq!(secure_filename("..."), "");
        assert_eq!(secure_filename("__init__.pdf"), "init__.pdf");
        assert_eq!(secure_filename("con.pdf"), "_con.pdf");
    }

    #[test]
    fn long_names_are_capped_keeping_extension() {
        let long = format!("{}.pdf", "a".repeat(400));
        let safe = secure_filename(&long);
        assert_eq!(safe.len(), SECURE_FILENAME_MAX_CHARS);
        assert!(safe.ends_with("a.pdf"));

        let no_ext = secure_filename(&"b".repeat(300));
        assert_eq!(no_ext.len(), SECURE_FILENAME_MAX_CHARS);

        let stored = stored_filename(&long, Utc::now());
        assert!(stored.len() <= 255);
        assert!(stored.ends_with(".pdf"));
    }

    #[test]
    fn stored_name_is_timestamped_and_unique() {
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 9, 15, 0).unwrap();
        let a = stored_filename("march statement.pdf", at);
        let b = stored_filename("march statement.pdf", at);

        assert!(a.starts_with("20240131_091500_"));
        assert!(a.ends_with("_march_statement.pdf"));
        assert_ne!(a, b);
        assert!(stored_filename("???", at).ends_with("_upload"));
    }
}
