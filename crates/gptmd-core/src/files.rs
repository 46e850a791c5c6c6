//! Filename, path and MIME helpers shared by the exporter and the CLI.

use std::path::PathBuf;

/// Characters that cannot appear in a downloaded filename.
const ILLEGAL_FILENAME_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Replaces every character that is illegal in filenames with `_`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if ILLEGAL_FILENAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Cuts `s` to at most `max_chars` characters, appending `...` when cut.
#[must_use]
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

/// Expands a leading `~/` to the home directory. Other paths are returned
/// unchanged, as is `~/...` when no home directory is known.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Returns MIME type inferred from the file extension for exported formats.
#[must_use]
pub fn mime_type_for_extension(path: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())?;

    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "md" => Some("text/markdown"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_every_illegal_char() {
        assert_eq!(
            sanitize_file_name(r#"a\b/c:d*e?f"g<h>i|j"#),
            "a_b_c_d_e_f_g_h_i_j"
        );
        assert_eq!(sanitize_file_name("plain name.md"), "plain name.md");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_with_ellipsis("héllo", 3), "hél...");
        assert_eq!(truncate_with_ellipsis("short", 60), "short");
        let exact = "x".repeat(60);
        assert_eq!(truncate_with_ellipsis(&exact, 60), exact);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/tmp/out"), PathBuf::from("/tmp/out"));
        assert_eq!(expand_home("out/~/x"), PathBuf::from("out/~/x"));
        assert_eq!(expand_home("~user/x"), PathBuf::from("~user/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/exports"), home.join("exports"));
        }
    }

    #[test]
    fn test_mime_type_for_extension() {
        assert_eq!(mime_type_for_extension("a.PNG"), Some("image/png"));
        assert_eq!(mime_type_for_extension("a.webp"), Some("image/webp"));
        assert_eq!(mime_type_for_extension("notes.md"), Some("text/markdown"));
        assert_eq!(mime_type_for_extension("archive.zip"), None);
        assert_eq!(mime_type_for_extension("noext"), None);
    }
}
