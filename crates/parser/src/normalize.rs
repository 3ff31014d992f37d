//! Deterministic whitespace normalization.
//!
//! The stage order is pinned and frozen by tests:
//!   1. strip a leading BOM,
//!   2. unify CRLF/CR to LF,
//!   3. trim trailing whitespace per line (leading whitespace preserved),
//!   4. collapse runs of three or more blank lines to exactly two,
//!   5. preserve the trailing-newline state of the input.
//!
//! Normalization is idempotent: `normalize(normalize(x)) == normalize(x)`.

const BOM: char = '\u{feff}';

pub fn normalize(text: &str) -> String {
    let without_bom = text.strip_prefix(BOM).unwrap_or(text);
    let unified = without_bom.replace("\r\n", "\n").replace('\r', "\n");
    let had_trailing_newline = unified.ends_with('\n');

    let trimmed_lines: Vec<&str> = unified.split('\n').map(str::trim_end).collect();

    // A blank line is one that is empty after the trailing-whitespace trim.
    let mut out_lines: Vec<&str> = Vec::with_capacity(trimmed_lines.len());
    let mut blank_run = 0usize;
    for line in trimmed_lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out_lines.push(line);
    }

    // `split('\n')` on a trailing-newline input yields a final empty element;
    // rebuild so the trailing-newline state matches the input exactly.
    let mut result = out_lines.join("\n");
    if had_trailing_newline {
        while result.ends_with('\n') {
            result.pop();
        }
        result.push('\n');
    } else {
        while result.ends_with('\n') {
            result.pop();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_bom() {
        assert_eq!(normalize("\u{feff}hello"), "hello");
    }

    #[test]
    fn bom_not_at_start_is_kept() {
        assert_eq!(normalize("a\u{feff}b"), "a\u{feff}b");
    }

    #[test]
    fn crlf_and_cr_become_lf() {
        assert_eq!(normalize("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn trailing_whitespace_trimmed_leading_kept() {
        assert_eq!(normalize("  indented   \nplain\t"), "  indented\nplain");
    }

    #[test]
    fn collapses_three_plus_blank_lines_to_two() {
        assert_eq!(normalize("a\n\n\n\n\nb"), "a\n\n\nb");
        assert_eq!(normalize("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn whitespace_only_lines_count_as_blank() {
        assert_eq!(normalize("a\n \n\t\n   \nb"), "a\n\n\nb");
    }

    #[test]
    fn trailing_newline_is_preserved() {
        assert_eq!(normalize("a\n"), "a\n");
        assert_eq!(normalize("a"), "a");
        assert_eq!(normalize("a\n\n\n\n"), "a\n");
    }

    // Idempotence over a grab bag of shapes.
    #[test]
    fn normalize_is_idempotent() {
        let cases = [
            "\u{feff}a\r\n\r\n\r\n\r\nb  \n",
            "plain",
            "",
            "\n\n\n\n",
            "  lead\ttrail  \r\nnext\r",
            "unicode e\u{301} combining\n\n\n\nmarks\n",
        ];
        for case in cases {
            let once = normalize(case);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {case:?}");
        }
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(normalize(""), "");
    }
}
