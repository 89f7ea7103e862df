//! Filename templates: strftime patterns plus a running-index placeholder.
//!
//! The placeholder is `#`, optionally followed by `:` and a width of up to two
//! digits. A width starting with `0` pads with zeros, otherwise with spaces:
//!
//! - `live-#.ts` with index 7 renders `live-7.ts`
//! - `live-#:04.ts` with index 7 renders `live-0007.ts`
//! - `live-#3.ts` with index 7 renders `live-  7.ts`

use std::fmt::{Display, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, TimeZone};
use regex::{Captures, Regex};

use crate::error::{Result, SyncError};

static INDEX_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(#)(:?)(\d{0,2})").expect("index placeholder pattern is valid")
});

/// Expands strftime specifiers of `pattern` at `ts`. Unknown specifiers are an
/// error rather than a panic.
pub fn strftime<Tz>(pattern: &str, ts: &DateTime<Tz>) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut out = String::with_capacity(pattern.len() + 16);
    write!(out, "{}", ts.format(pattern))
        .map_err(|_| SyncError::template(pattern, "unsupported strftime specifier"))?;
    Ok(out)
}

fn substitute_index(rendered: &str, index: u64) -> String {
    INDEX_PLACEHOLDER
        .replace_all(rendered, |caps: &Captures<'_>| {
            let width = caps.get(3).map_or("", |m| m.as_str());
            match width.parse::<usize>() {
                Ok(w) if width.starts_with('0') => format!("{index:0w$}"),
                Ok(w) => format!("{index:w$}"),
                Err(_) => index.to_string(),
            }
        })
        .into_owned()
}

/// Renders `pattern` at `ts` with `index`, relative to no root.
pub fn render<Tz>(pattern: &str, ts: &DateTime<Tz>, index: u64) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let expanded = strftime(pattern, ts)?;
    Ok(substitute_index(&expanded, index))
}

/// Renders `pattern` and joins it onto `root`.
pub fn render_path<Tz>(root: &Path, pattern: &str, ts: &DateTime<Tz>, index: u64) -> Result<PathBuf>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    Ok(root.join(render(pattern, ts, index)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap()
    }

    #[test]
    fn renders_zero_padded_index() {
        let name = render("%Y/%m/%d/%H/live-#:04.ts", &ts(), 7).unwrap();
        assert_eq!(name, "2024/03/09/07/live-0007.ts");
    }

    #[test]
    fn renders_bare_and_space_padded_index() {
        assert_eq!(render("seg-#.ts", &ts(), 42).unwrap(), "seg-42.ts");
        assert_eq!(render("seg-#3.ts", &ts(), 7).unwrap(), "seg-  7.ts");
    }

    #[test]
    fn pattern_without_placeholder_ignores_index() {
        let name = render("%Y/%m/%d/%H/index.m3u8", &ts(), 0).unwrap();
        assert_eq!(name, "2024/03/09/07/index.m3u8");
    }

    #[test]
    fn joins_onto_root() {
        let path = render_path(Path::new("/srv/rec"), "%H%M%S.ts", &ts(), 1).unwrap();
        assert_eq!(path, PathBuf::from("/srv/rec/070503.ts"));
    }

    #[test]
    fn unknown_specifier_is_an_error() {
        assert!(render("%Q-#.ts", &ts(), 1).is_err());
    }
}
