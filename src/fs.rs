//! Filesystem helpers.

use eyre::{Result, WrapErr};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Max length (in characters) of a cover title.
pub const MAX_TITLE_LEN: usize = 100;

// Linux only is not that restrictive, but Windows is another story...
// See https://docs.microsoft.com/en-us/windows/win32/fileio/naming-a-file
static ILLEGAL_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[/\?<>\\:\*\|"]"#).expect("invalid chars regexp")
});
static ILLEGAL_TRAILING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\. ]+$").expect("invalid trailing regex"));
static LINE_BREAKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\r\n]+").expect("invalid line breaks regex"));

/// Clean a name to safely use it as directory name.
pub fn sanitize_name(name: &str) -> String {
    let name = LINE_BREAKS.replace_all(name, " ");
    let name = ILLEGAL_TRAILING.replace(name.trim(), "");

    ILLEGAL_CHARS.replace_all(&name, "_").into_owned()
}

/// Clean a cover title to safely use it as a file name.
///
/// The result is at most [`MAX_TITLE_LEN`] characters long, `None` is
/// returned if nothing usable is left.
pub fn sanitize_title(title: &str) -> Option<String> {
    let title = sanitize_name(title)
        .chars()
        .take(MAX_TITLE_LEN)
        .collect::<String>();
    // Truncation may have exposed trailing spaces.
    let title = ILLEGAL_TRAILING.replace(title.trim(), "");

    (!title.is_empty()).then(|| title.into_owned())
}

/// Generic name for a cover without a usable title.
pub fn cover_name(timestamp: u128, index: usize) -> String {
    format!("cover_{timestamp}_{index}")
}

/// Milliseconds elapsed since the UNIX epoch.
pub fn timestamp() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis())
}

/// Recursively create a directory and all of its parent if necessary.
pub fn mkdir_p(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("mkdir_p {}", path.display()))
}

/// Write a file atomically (using a tempfile + atomic rename).
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".part");
    let tmp_path = PathBuf::from(tmp_path);

    fs::write(&tmp_path, data)
        .with_context(|| format!("write {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("rename to {}", path.display()))?;

    Ok(())
}

/// Returns `path` if free, otherwise the first free `name (N).ext` variant.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|i| path.with_file_name(format!("{stem} ({i}){extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_trailing() {
        let expected = "foo";

        assert_eq!(sanitize_name("foo   "), expected);
        assert_eq!(sanitize_name("foo."), expected);
        assert_eq!(sanitize_name("foo. ."), expected);
        assert_eq!(sanitize_name("foo. . "), expected);
    }

    #[test]
    fn test_sanitize_invalid() {
        let expected = "foo_bar";

        assert_eq!(sanitize_name("foo/bar/"), "foo_bar_");
        assert_eq!(sanitize_name("foo:bar"), expected);
        assert_eq!(sanitize_name("foo?bar"), expected);
        assert_eq!(sanitize_name("foo|bar"), expected);
        assert_eq!(sanitize_name("foo*bar"), expected);
        assert_eq!(sanitize_name("foo>bar"), expected);
        assert_eq!(sanitize_name("foo<bar"), expected);
        assert_eq!(sanitize_name("foo\\bar"), expected);
        assert_eq!(sanitize_name("foo\"bar"), expected);
    }

    #[test]
    fn test_sanitize_author() {
        assert_eq!(sanitize_name("  Jane/Doe\n"), "Jane_Doe");
    }

    #[test]
    fn test_title_line_breaks() {
        assert_eq!(
            sanitize_title("first line\r\nsecond\nthird").as_deref(),
            Some("first line second third")
        );
        assert_eq!(sanitize_title(" My Cover! ").as_deref(), Some("My Cover!"));
    }

    #[test]
    fn test_title_bounded() {
        let title = format!("{}?{}", "界".repeat(80), "a".repeat(80));

        let res = sanitize_title(&title).expect("title");

        assert_eq!(res.chars().count(), MAX_TITLE_LEN);
        assert!(!res.contains(['\\', '/', ':', '*', '?', '"', '<', '>', '|']));
        assert_eq!(res.chars().nth(80), Some('_'));
    }

    #[test]
    fn test_title_truncation_trailing_space() {
        let title = format!("{} tail", "a".repeat(MAX_TITLE_LEN - 1));

        let res = sanitize_title(&title).expect("title");

        assert_eq!(res, "a".repeat(MAX_TITLE_LEN - 1));
    }

    #[test]
    fn test_title_empty() {
        assert_eq!(sanitize_title(""), None);
        assert_eq!(sanitize_title(" \n\t "), None);
        assert_eq!(sanitize_title("..."), None);
    }

    #[test]
    fn test_cover_name() {
        assert_eq!(cover_name(1_700_000_000_000, 3), "cover_1700000000000_3");
    }

    #[test]
    fn test_unique_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cover.png");

        assert_eq!(unique_path(&path), path);

        atomic_write(&path, b"a").expect("write");
        assert_eq!(unique_path(&path), dir.path().join("cover (1).png"));

        atomic_write(&dir.path().join("cover (1).png"), b"b").expect("write");
        assert_eq!(unique_path(&path), dir.path().join("cover (2).png"));
    }

    #[test]
    fn test_atomic_write_leaves_no_part_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.b.jpg");

        atomic_write(&path, b"data").expect("write");

        assert_eq!(fs::read(&path).expect("read"), b"data");
        assert!(!dir.path().join("a.b.jpg.part").exists());
    }
}
