//! Utility functions for the upload service
//!
//! MIME normalization and allow-list matching, filename sanitization and
//! candidate naming, and byte-size formatting for log lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// MIME type normalization and allow-list matching
pub mod file_type {
    /// MIME type assumed when a part does not declare one
    pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

    /// Reduce a declared content type to its lowercase essence (`type/subtype`).
    ///
    /// Parameters such as `charset` are dropped. Values that do not parse as a
    /// MIME type are trimmed and lowercased so they still compare predictably.
    pub fn normalize_mime_type(declared: Option<&str>) -> String {
        let raw = match declared.map(str::trim) {
            Some(value) if !value.is_empty() => value,
            _ => return DEFAULT_MIME_TYPE.to_string(),
        };

        match raw.parse::<mime::Mime>() {
            Ok(parsed) => parsed.essence_str().to_ascii_lowercase(),
            Err(_) => raw.to_ascii_lowercase(),
        }
    }

    /// Check if a normalized MIME type is allowed
    pub fn is_allowed_file_type(mime_type: &str, allowed_types: &[String]) -> bool {
        allowed_types.iter().any(|allowed| {
            // Exact match
            if allowed == mime_type {
                return true;
            }

            // Wildcard match (e.g., "image/*")
            if let Some(prefix) = allowed.strip_suffix('*') {
                return prefix.ends_with('/') && mime_type.starts_with(prefix);
            }

            false
        })
    }

    /// Normalize configured allow-list entries the way declared types are normalized.
    ///
    /// Blank entries are dropped; `type/*` wildcards are kept as wildcards.
    pub fn normalize_allow_list(allowed_types: &[String]) -> Vec<String> {
        allowed_types
            .iter()
            .map(|allowed| allowed.trim())
            .filter(|allowed| !allowed.is_empty())
            .map(|allowed| match allowed.strip_suffix("/*") {
                Some(top_level) => format!("{}/*", top_level.trim().to_ascii_lowercase()),
                None => normalize_mime_type(Some(allowed)),
            })
            .collect()
    }

    /// Content type to serve a stored file with
    pub fn guess_from_name(filename: &str) -> String {
        mime_guess::from_path(filename)
            .first_or_octet_stream()
            .to_string()
    }
}

/// Path and filename utilities
pub mod path {
    use super::*;

    /// Prefix shared by every staging file inside the storage directory
    pub const TEMP_UPLOAD_PREFIX: &str = ".upload-";
    /// Suffix shared by every staging file inside the storage directory
    pub const TEMP_UPLOAD_SUFFIX: &str = ".part";

    /// Name used when nothing usable survives sanitization
    pub const FALLBACK_NAME: &str = "upload";

    /// Longest sanitized name; leaves room for a `-NNNN` collision suffix
    pub const MAX_NAME_LENGTH: usize = 240;

    static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

    const RESERVED_NAMES: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];

    /// Sanitize an untrusted filename into a single safe path component.
    ///
    /// Only the final component survives (both `/` and `\` count as
    /// separators), so traversal sequences and absolute paths collapse to a
    /// plain name. The result is never empty, never starts with a dot and
    /// only contains `[A-Za-z0-9._-]`.
    pub fn sanitize_filename(filename: &str) -> String {
        let last_component = filename
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or_default();

        let trimmed = last_component
            .trim()
            .trim_end_matches(|c| c == '.' || c == ' ');
        let replaced = UNSAFE_CHARS.replace_all(trimmed, "_");
        let replaced = replaced.trim_start_matches('.');

        if replaced.is_empty() {
            return FALLBACK_NAME.to_string();
        }

        let mut sanitized = replaced.to_string();

        let (stem, _) = split_extension(&sanitized);
        if RESERVED_NAMES.contains(&stem.to_ascii_uppercase().as_str()) {
            sanitized.insert(0, '_');
        }

        truncate_preserving_extension(&sanitized, MAX_NAME_LENGTH)
    }

    /// Split `name` into stem and extension (without the dot)
    pub fn split_extension(name: &str) -> (&str, Option<&str>) {
        match name.rfind('.') {
            Some(index) if index > 0 && index < name.len() - 1 => {
                (&name[..index], Some(&name[index + 1..]))
            }
            _ => (name, None),
        }
    }

    /// Candidate stored name for the given collision attempt.
    ///
    /// Attempt zero is the sanitized name itself; later attempts append
    /// `-<attempt>` to the stem, shortening the stem so the result stays
    /// within [`MAX_NAME_LENGTH`]. Every candidate is a fixed point of
    /// [`sanitize_filename`].
    pub fn candidate_name(sanitized: &str, attempt: u32) -> String {
        if attempt == 0 {
            return sanitized.to_string();
        }

        let suffix = format!("-{}", attempt);

        let (stem, extension) = match split_extension(sanitized) {
            (stem, Some(extension)) if extension.len() + suffix.len() + 2 <= MAX_NAME_LENGTH => {
                (stem, Some(extension))
            }
            _ => (sanitized, None),
        };

        let budget = MAX_NAME_LENGTH
            - suffix.len()
            - extension.map(|e| e.len() + 1).unwrap_or(0);
        let stem = &stem[..budget.min(stem.len())];

        match extension {
            Some(extension) => format!("{}{}.{}", stem, suffix, extension),
            None => format!("{}{}", stem, suffix),
        }
    }

    /// Name of a fresh staging file
    pub fn temp_upload_name(id: &uuid::Uuid) -> String {
        format!("{}{}{}", TEMP_UPLOAD_PREFIX, id.simple(), TEMP_UPLOAD_SUFFIX)
    }

    /// Whether a directory entry is a staging file rather than a stored upload
    pub fn is_temp_upload_name(name: &str) -> bool {
        name.starts_with(TEMP_UPLOAD_PREFIX) && name.ends_with(TEMP_UPLOAD_SUFFIX)
    }

    /// Whether `name` could have been produced by [`sanitize_filename`]
    pub fn is_stored_name(name: &str) -> bool {
        !name.is_empty() && !is_temp_upload_name(name) && sanitize_filename(name) == name
    }

    fn truncate_preserving_extension(name: &str, max_length: usize) -> String {
        if name.len() <= max_length {
            return name.to_string();
        }

        // Sanitized names are ASCII, so byte slicing is safe here.
        match split_extension(name) {
            (stem, Some(extension)) if extension.len() + 2 <= max_length => {
                let keep = max_length - extension.len() - 1;
                format!("{}.{}", &stem[..keep.min(stem.len())], extension)
            }
            _ => name[..max_length].trim_end_matches('.').to_string(),
        }
    }
}

/// Size formatting utilities
pub mod size {
    /// Format bytes into human-readable string
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

        if bytes == 0 {
            return "0 B".to_string();
        }

        let unit_index = (bytes as f64).log10() as usize / 3;
        let unit_index = unit_index.min(UNITS.len() - 1);

        let size = bytes as f64 / 1000_f64.powi(unit_index as i32);

        if size >= 100.0 {
            format!("{:.0} {}", size, UNITS[unit_index])
        } else if size >= 10.0 {
            format!("{:.1} {}", size, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}
