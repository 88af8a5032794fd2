//! # Filename Normalizer
//!
//! Repairs remote filenames whose accented characters were mis-decoded on the
//! way from the legacy system (UTF-8 bytes read as Windows-1252 or Latin-1,
//! sometimes twice).
//!
//! ## Overview
//!
//! - [`normalize_filename`] maps a corrupted remote name to the name used as the
//!   local storage key. Mappings are applied in table order, longest sequences
//!   first; unmatched input is returned unchanged.
//! - [`alternative_remote_names`] produces the ordered list of remote names to
//!   try when a fetch by the listed name reports "not found".
//!
//! ## Usage
//!
//! ```
//! use core_sync::normalizer::{alternative_remote_names, normalize_filename};
//!
//! assert_eq!(normalize_filename("MÃ¼ller.XML"), "Müller.XML");
//! assert_eq!(normalize_filename("Mueller.XML"), "Mueller.XML");
//!
//! let candidates = alternative_remote_names("Müller.XML");
//! assert_eq!(candidates.first().map(String::as_str), Some("MÃ¼ller.XML"));
//! ```

use std::borrow::Cow;

/// UTF-8 mis-decoded as Windows-1252, then encoded and mis-decoded again
const DOUBLE_ENCODED: &[(&str, &str)] = &[
    ("ÃƒÂ¤", "ä"),
    ("ÃƒÂ¶", "ö"),
    ("ÃƒÂ¼", "ü"),
    ("Ãƒâ€ž", "Ä"),
    ("Ãƒâ€“", "Ö"),
    ("ÃƒÅ“", "Ü"),
    ("ÃƒÅ¸", "ß"),
    ("ÃƒÂ©", "é"),
    ("ÃƒÂ¨", "è"),
    ("ÃƒÂª", "ê"),
    ("ÃƒÂ«", "ë"),
    ("ÃƒÂ\u{a0}", "à"),
    ("ÃƒÂ¢", "â"),
    ("ÃƒÂ§", "ç"),
    ("ÃƒÂ´", "ô"),
    ("ÃƒÂ»", "û"),
    ("ÃƒÂ¹", "ù"),
    ("ÃƒÂ®", "î"),
    ("ÃƒÂ¯", "ï"),
    ("Ãƒâ€°", "É"),
    ("ÃƒË†", "È"),
];

/// UTF-8 mis-decoded as Windows-1252
const WINDOWS_1252: &[(&str, &str)] = &[
    ("Ã¤", "ä"),
    ("Ã¶", "ö"),
    ("Ã¼", "ü"),
    ("Ã„", "Ä"),
    ("Ã–", "Ö"),
    ("Ãœ", "Ü"),
    ("ÃŸ", "ß"),
    ("Ã©", "é"),
    ("Ã¨", "è"),
    ("Ãª", "ê"),
    ("Ã«", "ë"),
    ("Ã\u{a0}", "à"),
    ("Ã¢", "â"),
    ("Ã§", "ç"),
    ("Ã´", "ô"),
    ("Ã»", "û"),
    ("Ã¹", "ù"),
    ("Ã®", "î"),
    ("Ã¯", "ï"),
    ("Ã‰", "É"),
    ("Ãˆ", "È"),
];

/// UTF-8 mis-decoded as Latin-1 where it differs from Windows-1252
const LATIN_1: &[(&str, &str)] = &[
    ("Ã\u{84}", "Ä"),
    ("Ã\u{96}", "Ö"),
    ("Ã\u{9c}", "Ü"),
    ("Ã\u{9f}", "ß"),
    ("Ã\u{89}", "É"),
    ("Ã\u{88}", "È"),
];

/// Corrupted-sequence to correct-character mappings in application order.
pub fn mappings() -> impl Iterator<Item = &'static (&'static str, &'static str)> {
    DOUBLE_ENCODED.iter().chain(WINDOWS_1252).chain(LATIN_1)
}

/// Repair a remote filename for use as a local storage key.
///
/// Pure and idempotent: `normalize_filename(normalize_filename(x)) ==
/// normalize_filename(x)`.
pub fn normalize_filename(name: &str) -> String {
    let mut result = Cow::Borrowed(name);
    for (corrupted, correct) in mappings() {
        if result.contains(corrupted) {
            result = Cow::Owned(result.replace(corrupted, correct));
        }
    }
    result.into_owned()
}

/// A strategy producing one candidate remote name.
type Strategy = fn(&str) -> Option<String>;

/// Candidate strategies, in the order they are tried.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("windows-1252", windows_1252_corruption),
    ("latin-1", latin_1_corruption),
    ("normalized", forward_normalization),
    ("byte-redecode", byte_redecode),
    ("url-decode", url_decode),
];

/// Ordered alternative names to try when `original` is not found remotely.
///
/// Candidates equal to `original`, or to an earlier candidate, are dropped.
pub fn alternative_remote_names(original: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for (_, strategy) in STRATEGIES {
        if let Some(candidate) = strategy(original) {
            if candidate != original && !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }
    candidates
}

/// Correct characters rewritten to the Windows-1252 corruption the remote
/// side may actually hold.
fn windows_1252_corruption(name: &str) -> Option<String> {
    let mut result = name.to_string();
    for (corrupted, correct) in WINDOWS_1252 {
        if result.contains(correct) {
            result = result.replace(correct, corrupted);
        }
    }
    Some(result)
}

/// Every non-ASCII character spelled as its UTF-8 bytes read as Latin-1.
fn latin_1_corruption(name: &str) -> Option<String> {
    if name.is_ascii() {
        return None;
    }
    let mut result = String::with_capacity(name.len() * 2);
    let mut buf = [0u8; 4];
    for c in name.chars() {
        if c.is_ascii() {
            result.push(c);
        } else {
            result.extend(c.encode_utf8(&mut buf).bytes().map(char::from));
        }
    }
    Some(result)
}

fn forward_normalization(name: &str) -> Option<String> {
    Some(normalize_filename(name))
}

/// Reinterpret a name made only of code points up to U+00FF as UTF-8 bytes.
fn byte_redecode(name: &str) -> Option<String> {
    let bytes = name
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

fn url_decode(name: &str) -> Option<String> {
    if !name.contains('%') {
        return None;
    }
    urlencoding::decode(name).ok().map(Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repairs_windows_1252_corruption() {
        assert_eq!(normalize_filename("MÃ¼ller.XML"), "Müller.XML");
        assert_eq!(normalize_filename("BÃ¤ckerei GrÃ¶ÃŸer.XML"), "Bäckerei Größer.XML");
        assert_eq!(normalize_filename("Ãœbersicht.xml"), "Übersicht.xml");
        assert_eq!(normalize_filename("CafÃ© crÃ¨me.xml"), "Café crème.xml");
    }

    #[test]
    fn test_repairs_double_encoding_before_single() {
        assert_eq!(normalize_filename("MÃƒÂ¼ller.XML"), "Müller.XML");
        assert_eq!(normalize_filename("StraÃƒÅ¸e.XML"), "Straße.XML");
    }

    #[test]
    fn test_repairs_latin_1_corruption() {
        assert_eq!(normalize_filename("\u{c3}\u{9c}bersicht.xml"), "Übersicht.xml");
        assert_eq!(normalize_filename("Stra\u{c3}\u{9f}e.xml"), "Straße.xml");
    }

    #[test]
    fn test_unmatched_input_unchanged() {
        assert_eq!(normalize_filename("4711.XML"), "4711.XML");
        assert_eq!(normalize_filename("Müller.XML"), "Müller.XML");
        assert_eq!(normalize_filename(""), "");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let inputs = [
            "MÃ¼ller.XML",
            "MÃƒÂ¼ller.XML",
            "Stra\u{c3}\u{9f}e.xml",
            "Ã‰cole Ã\u{a0} Paris.xml",
            "plain.xml",
            "ÃÃ¤¤",
        ];
        for input in inputs {
            let once = normalize_filename(input);
            assert_eq!(normalize_filename(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn test_every_mapping_round_trips() {
        for (corrupted, correct) in mappings() {
            assert_eq!(normalize_filename(corrupted), *correct);
        }
    }

    #[test]
    fn test_alternatives_for_correct_name() {
        let candidates = alternative_remote_names("Müller.XML");
        assert_eq!(candidates[0], "MÃ¼ller.XML");
        // Latin-1 spelling of ü equals its Windows-1252 spelling, so it is
        // deduplicated; no other strategy changes the name.
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_alternatives_distinguish_latin_1() {
        let candidates = alternative_remote_names("Übersicht.xml");
        assert_eq!(candidates, vec!["Ãœbersicht.xml", "\u{c3}\u{9c}bersicht.xml"]);
    }

    #[test]
    fn test_alternatives_include_forward_and_byte_redecode() {
        let candidates = alternative_remote_names("MÃ¼ller.XML");
        assert!(candidates.contains(&"Müller.XML".to_string()));
        // Forward normalization and byte re-decoding agree here; only one survives.
        assert_eq!(
            candidates.iter().filter(|c| c.as_str() == "Müller.XML").count(),
            1
        );
    }

    #[test]
    fn test_alternatives_url_decode() {
        let candidates = alternative_remote_names("M%C3%BCller.XML");
        assert_eq!(candidates, vec!["Müller.XML"]);
    }

    #[test]
    fn test_ascii_name_has_no_alternatives() {
        assert!(alternative_remote_names("4711.XML").is_empty());
    }
}
