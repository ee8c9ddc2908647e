//! Output canonicalization used for judging.
//!
//! Two outputs are considered equal when they differ only in line terminators
//! (`\r\n`, `\r`, `\n`), in whitespace at the end of a line, or in blank lines
//! at the very end. Internal blank lines and everything else are significant.

/// Splits `text` into lines on `\n`, `\r\n` and lone `\r`.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
        .flat_map(|l| l.strip_suffix('\r').unwrap_or(l).split('\r'))
}

fn canonical_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = split_lines(text).map(str::trim_end).collect();
    while lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Canonical form of `text`.
/// ```
/// use crosscheck_core::normalize::normalize;
///
/// assert_eq!(normalize("1\n2\r\n"), "1\n2");
/// assert_eq!(normalize("1\n2\n\n\n"), "1\n2");
/// ```
pub fn normalize(text: &str) -> String {
    canonical_lines(text).join("\n")
}

/// Whether `a` and `b` have the same canonical form.
pub fn compare(a: &str, b: &str) -> bool {
    canonical_lines(a) == canonical_lines(b)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiff<'a> {
    /// 1-based
    pub line_no: usize,
    pub actual: Option<&'a str>,
    pub expected: Option<&'a str>,
}

/// Line-by-line differences after canonicalization. A side that ran out of
/// lines is reported as `None`.
pub fn diff_lines<'a>(actual: &'a str, expected: &'a str) -> Vec<LineDiff<'a>> {
    let actual = canonical_lines(actual);
    let expected = canonical_lines(expected);
    let n = actual.len().max(expected.len());

    (0..n)
        .filter_map(|i| {
            let a = actual.get(i).copied();
            let e = expected.get(i).copied();
            (a != e).then_some(LineDiff {
                line_no: i + 1,
                actual: a,
                expected: e,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "\n",
        "5\n",
        "1\n2\r\n",
        "1\n2\n\n\n",
        "a  \n\n b\t\r\n\r\n",
        "x\r\ry\rz",
        "  lead\n\n\ninner\n",
        "\r\n\r\n",
        "tail   ",
    ];

    #[test]
    fn normalize_is_idempotent() {
        for s in SAMPLES {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "input={:?}", s);
        }
    }

    #[test]
    fn line_endings_and_trailing_blank_lines_are_ignored() {
        assert_eq!(normalize("1\n2\r\n"), "1\n2");
        assert_eq!(normalize("1\n2\n\n\n"), "1\n2");
        assert_eq!(normalize("1\r2\r"), "1\n2");
        assert!(compare("1\n2\r\n", "1\n2\n\n\n"));
    }

    #[test]
    fn trailing_whitespace_per_line_is_ignored() {
        assert_eq!(normalize("a  \nb\t\n"), "a\nb");
        assert!(compare("a \nb", "a\nb   \n"));
    }

    #[test]
    fn internal_blank_lines_and_leading_space_are_kept() {
        assert_eq!(normalize("a\n\n\nb\n"), "a\n\n\nb");
        assert!(!compare("a\n\nb", "a\nb"));
        assert!(!compare(" a", "a"));
    }

    #[test]
    fn comparison_is_case_sensitive() {
        assert!(!compare("Hello", "hello"));
    }

    #[test]
    fn blank_output_equals_empty() {
        assert_eq!(normalize("\n\n"), "");
        assert!(compare("", "\r\n  \n"));
        assert!(diff_lines("", "\n").is_empty());
    }

    #[test]
    fn compare_is_symmetric() {
        for a in SAMPLES {
            for b in SAMPLES {
                assert_eq!(compare(a, b), compare(b, a), "a={:?} b={:?}", a, b);
            }
        }
    }

    #[test]
    fn compare_agrees_with_normalize() {
        for a in SAMPLES {
            for b in SAMPLES {
                assert_eq!(compare(a, b), normalize(a) == normalize(b));
            }
        }
    }

    #[test]
    fn crlf_split_matches_sequential_replacement() {
        // "\r\r\n" is one lone CR followed by CRLF
        assert_eq!(normalize("a\r\r\nb"), "a\n\nb");
    }

    #[test]
    fn diff_reports_changed_and_missing_lines() {
        let d = diff_lines("1\n2\n3\n", "1\nX\n3\n4\n");
        assert_eq!(
            d,
            vec![
                LineDiff {
                    line_no: 2,
                    actual: Some("2"),
                    expected: Some("X"),
                },
                LineDiff {
                    line_no: 4,
                    actual: None,
                    expected: Some("4"),
                },
            ]
        );
        assert!(diff_lines("5\r\n", "5 \n\n").is_empty());
    }
}
