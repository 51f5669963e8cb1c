use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::error::AppError;

/// Forbidden-word patterns, matched case-insensitively on word boundaries.
/// `18+` keeps only the leading boundary since `+` is not a word character.
const FORBIDDEN_PATTERNS: &[&str] = &[
    r"\bseks\b",
    r"\bporno\b",
    r"\bnude\b",
    r"\berotic\b",
    r"\bdewasa\b",
    r"\b18\+",
    r"\bxxx\b",
    r"\bnaked\b",
    r"\bvulgar\b",
    r"\bgenital\b",
];

static FORBIDDEN: Lazy<Vec<Regex>> = Lazy::new(|| {
    FORBIDDEN_PATTERNS
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .unwrap_or_else(|e| panic!("bad forbidden pattern {}: {}", p, e))
        })
        .collect()
});

/// Rejects text containing any forbidden keyword. The message stays generic;
/// the matched word is never revealed.
pub fn check(text: &str) -> Result<(), AppError> {
    for pattern in FORBIDDEN.iter() {
        if pattern.is_match(text) {
            return Err(AppError::field_error(
                "content",
                "Content contains inappropriate language.",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(text: &str) -> bool {
        check(text).is_err()
    }

    #[test]
    fn rejects_forbidden_words() {
        assert!(rejected("ini konten porno banget"));
        assert!(rejected("nude"));
        assert!(rejected("some vulgar words"));
        assert!(rejected("konten 18+ dilarang"));
    }

    #[test]
    fn rejects_any_case() {
        assert!(rejected("PORNO"));
        assert!(rejected("NaKeD"));
        assert!(rejected("Seks bebas"));
    }

    #[test]
    fn word_boundary_does_not_match_substrings() {
        // "seksi" contains "seks" but not on a word boundary
        assert!(check("acara seksi dokumentasi").is_ok());
        assert!(check("xxxl shirt").is_ok());
    }

    #[test]
    fn accepts_clean_text() {
        assert!(check("aspirasi untuk kampus yang lebih baik").is_ok());
        assert!(check("").is_ok());
    }

    #[test]
    fn message_is_generic() {
        let err = check("porno").unwrap_err();
        match err {
            AppError::Validation(fields) => {
                let msgs = fields.get("content").expect("content field");
                assert_eq!(msgs, &vec!["Content contains inappropriate language.".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
