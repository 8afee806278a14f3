//! ASCII sanitization for text crossing subprocess boundaries.
//!
//! Every prompt written to an LLM CLI and every byte read back passes
//! through [`sanitize`]. Characters above code point 127 are mapped
//! through a fixed replacement table; anything unmapped becomes `?`.
//! Replacements are themselves pure ASCII, so sanitization is idempotent.

/// A single non-ASCII occurrence found by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Byte offset of the offending character
    pub offset: usize,
    /// The offending character
    pub character: char,
}

/// Map a single non-ASCII character to its ASCII replacement, if the
/// fixed table knows it.
fn replacement(c: char) -> Option<&'static str> {
    let mapped = match c {
        '\u{2192}' | '\u{27A1}' | '\u{21D2}' => "->",
        '\u{2190}' | '\u{21D0}' => "<-",
        '\u{2191}' => "^",
        '\u{2193}' => "v",
        '\u{2713}' | '\u{2714}' | '\u{2705}' => "[PASS]",
        '\u{2717}' | '\u{2718}' | '\u{274C}' => "[FAIL]",
        '\u{26A0}' => "[WARN]",
        '\u{2022}' | '\u{25CF}' | '\u{25AA}' => "*",
        '\u{2018}' | '\u{2019}' => "'",
        '\u{201C}' | '\u{201D}' => "\"",
        '\u{2013}' | '\u{2014}' | '\u{2212}' => "-",
        '\u{2026}' => "...",
        '\u{00D7}' => "x",
        '\u{00F7}' => "/",
        '\u{2264}' => "<=",
        '\u{2265}' => ">=",
        '\u{2260}' => "!=",
        '\u{00A0}' | '\u{2009}' | '\u{200A}' | '\u{2002}' | '\u{2003}' => " ",
        '\u{00A9}' => "(c)",
        '\u{00AE}' => "(r)",
        '\u{2122}' => "(tm)",
        '\u{00B0}' => "deg",
        '\u{00B5}' => "u",
        _ => return None,
    };
    Some(mapped)
}

/// Reduce `text` to 7-bit ASCII through the fixed replacement table.
///
/// Unmapped characters above code point 127 become `?`. The result
/// contains only ASCII, and `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() {
            out.push(c);
        } else if let Some(mapped) = replacement(c) {
            out.push_str(mapped);
        } else {
            out.push('?');
        }
    }
    out
}

/// Check `text` for non-ASCII characters without modifying it.
///
/// Returns `(true, [])` for clean input, otherwise `(false, violations)`
/// with one entry per offending character.
pub fn validate(text: &str) -> (bool, Vec<Violation>) {
    let violations: Vec<Violation> = text
        .char_indices()
        .filter(|(_, c)| !c.is_ascii())
        .map(|(offset, character)| Violation { offset, character })
        .collect();

    (violations.is_empty(), violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let input = "plain ASCII stays untouched: fn main() { 1 + 2 }";
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn test_replacement_table() {
        assert_eq!(sanitize("a \u{2192} b"), "a -> b");
        assert_eq!(sanitize("\u{2713} done"), "[PASS] done");
        assert_eq!(sanitize("\u{2717} broken"), "[FAIL] broken");
        assert_eq!(sanitize("\u{201C}quoted\u{201D}"), "\"quoted\"");
        assert_eq!(sanitize("wait\u{2026}"), "wait...");
        assert_eq!(sanitize("3 \u{00D7} 4"), "3 x 4");
    }

    #[test]
    fn test_unmapped_becomes_question_mark() {
        assert_eq!(sanitize("caf\u{00E9}"), "caf?");
        assert_eq!(sanitize("\u{4E2D}\u{6587}"), "??");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "a \u{2192} b \u{2713} caf\u{00E9} \u{201C}hi\u{201D} \u{4E2D}",
            "already clean",
            "\u{2026}\u{2022}\u{26A0}",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once);
            assert!(once.is_ascii());
        }
    }

    #[test]
    fn test_validate_reports_offsets() {
        let (ok, violations) = validate("ok");
        assert!(ok);
        assert!(violations.is_empty());

        let (ok, violations) = validate("a\u{2192}b");
        assert!(!ok);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].offset, 1);
        assert_eq!(violations[0].character, '\u{2192}');
    }
}
