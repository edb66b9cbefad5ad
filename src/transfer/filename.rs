//! File names derived from page titles and download URLs.

use std::sync::LazyLock;

use regex::Regex;

use super::layout::MAX_PATH;

/// Characters no shell accepts in a file name, plus control characters.
static ILLEGAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f\x7f]"#).expect("static regex"));

/// Make `name` safe to create on disk: illegal characters become `_`,
/// surrounding whitespace and dots are trimmed, and the result is capped
/// below `MAX_PATH` while keeping the extension.
pub fn sanitize(name: &str) -> String {
    let replaced = ILLEGAL.replace_all(name, "_");
    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    cap_length(trimmed, MAX_PATH - 1)
}

fn cap_length(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= 16 => name.split_at(dot),
        _ => (name, ""),
    };
    let keep = max_chars.saturating_sub(ext.chars().count());
    let mut out: String = stem.chars().take(keep).collect();
    out.push_str(ext);
    out
}

/// `<title>.url`, sanitized. `None` when nothing usable is left.
pub fn shortcut_file_name(title: &str) -> Option<String> {
    let title = title.trim();
    if title.is_empty() {
        return None;
    }
    let name = sanitize(&format!("{title}.url"));
    if name.is_empty() || name == "url" || name.starts_with(".url") {
        None
    } else {
        Some(name)
    }
}

/// Shortcut name used when the page has no usable title.
pub const UNTITLED_SHORTCUT: &str = "Untitled.url";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_characters_are_replaced() {
        assert_eq!(sanitize("a/b\\c:d*e?.txt"), "a_b_c_d_e_.txt");
        assert_eq!(sanitize("  ..hidden.  "), "hidden");
        assert_eq!(sanitize("tab\there"), "tab_here");
    }

    #[test]
    fn long_names_keep_their_extension() {
        let long = format!("{}.png", "n".repeat(400));
        let capped = sanitize(&long);
        assert_eq!(capped.chars().count(), MAX_PATH - 1);
        assert!(capped.ends_with(".png"));
    }

    #[test]
    fn shortcut_names_from_titles() {
        assert_eq!(
            shortcut_file_name("Rust: A Language").as_deref(),
            Some("Rust_ A Language.url")
        );
        assert_eq!(shortcut_file_name("   "), None);
        assert_eq!(shortcut_file_name("..."), None);
    }
}
