//! Code normalization for unit and criteria identifiers
//!
//! Evidence folders encode catalogue codes in their names: `1.1` becomes
//! `1_1`, `NETP3-01` becomes `netp3_01`, and combined folders join several
//! criteria (`1_1_1_2_1_3`). Every match between a folder and the catalogue
//! goes through the functions in this module.

use crate::error::{PortfolioError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// A single folder-safe token segment
static SEGMENT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+$").expect("segment pattern is valid"));

/// Convert a human-entered code into its folder-safe token.
///
/// Lowercases and replaces `.` and `-` with `_`. Idempotent.
///
/// # Examples
/// ```
/// use portfolio_core::utils::codes::normalize;
///
/// assert_eq!(normalize("1.1"), "1_1");
/// assert_eq!(normalize("NETP3-01"), "netp3_01");
/// assert_eq!(normalize(&normalize("NETP3-01")), "netp3_01");
/// ```
pub fn normalize(code: &str) -> String {
    code.trim()
        .chars()
        .map(|c| match c {
            '.' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Alphanumeric-only spelling of a code (`NETP3-01` -> `netp301`)
pub fn compact(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Whether code `a` matches token `b`.
///
/// True when both normalize to the same token, or when `b` is a combined
/// token whose `_`-delimited segments, taken in groups the size of `a`,
/// contain `a`. Grouping keeps `1.1` from matching `1_10` or the middle of
/// `1_2_1_3`.
pub fn tokens_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }

    let needle: Vec<&str> = a.split('_').collect();
    let haystack: Vec<&str> = b.split('_').collect();
    if needle.len() >= haystack.len() || haystack.len() % needle.len() != 0 {
        return false;
    }

    haystack
        .chunks(needle.len())
        .any(|chunk| chunk == needle.as_slice())
}

/// Whether a folder name refers to the given unit code.
///
/// Accepts the underscored spelling, the alphanumeric-only spelling, and
/// folders that embed the unit token as a run of `_`-delimited segments at
/// any offset (`Unit_NETP3-01`, `netp3_01_evidence`). Unlike
/// [`tokens_match`], the run is not aligned to the code's length.
pub fn unit_folder_matches(unit_code: &str, folder_name: &str) -> bool {
    let unit_compact = compact(unit_code);
    if !unit_compact.is_empty() && unit_compact == compact(folder_name) {
        return true;
    }

    let unit = normalize(unit_code);
    let folder = normalize(folder_name);
    if unit.is_empty() || folder.is_empty() {
        return false;
    }
    let needle: Vec<&str> = unit.split('_').collect();
    let haystack: Vec<&str> = folder.split('_').collect();
    haystack
        .windows(needle.len())
        .any(|window| window == needle.as_slice())
}

/// Recover the criteria codes encoded in a criteria folder name.
///
/// Purely numeric names are read as `major_minor` pairs (`1_1_1_2` is
/// `1.1` and `1.2`); a single numeric segment is one code. Names with
/// letters are one code in token form. Anything else, including names with
/// no digits at all, is malformed.
pub fn split_criteria_folder(name: &str) -> Result<Vec<String>> {
    let token = normalize(name);
    let segments: Vec<&str> = token.split('_').collect();

    if token.is_empty() || segments.iter().any(|s| !SEGMENT_PATTERN.is_match(s)) {
        return Err(PortfolioError::MalformedFolderName(name.to_string()));
    }
    if !token.chars().any(|c| c.is_ascii_digit()) {
        return Err(PortfolioError::MalformedFolderName(name.to_string()));
    }

    let all_numeric = segments
        .iter()
        .all(|s| s.chars().all(|c| c.is_ascii_digit()));

    if !all_numeric {
        return Ok(vec![token]);
    }

    match segments.len() {
        1 => Ok(vec![segments[0].to_string()]),
        n if n % 2 == 0 => Ok(segments
            .chunks(2)
            .map(|pair| format!("{}.{}", pair[0], pair[1]))
            .collect()),
        _ => Err(PortfolioError::MalformedFolderName(name.to_string())),
    }
}

/// Folder name for a set of criteria codes (`["1.1", "1.2"]` -> `1_1_1_2`)
pub fn criteria_folder_name<S: AsRef<str>>(codes: &[S]) -> String {
    codes
        .iter()
        .map(|c| normalize(c.as_ref()))
        .collect::<Vec<_>>()
        .join("_")
}
