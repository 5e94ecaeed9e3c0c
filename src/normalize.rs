//! Term normalization for ingredient and excipient names.
//!
//! Terms are transliterated to ASCII, stripped of non-breaking and repeated
//! whitespace, and case-folded when the store-wide policy asks for it.
//! Normalizing a normalized term is a no-op.

use deunicode::deunicode;

use crate::models::CasePolicy;

/// Replace non-breaking spaces and trim. Used for free-text attributes,
/// which keep their script and case.
pub fn clean_text(text: &str) -> String {
    text.replace('\u{a0}', " ").trim().to_string()
}

/// Pure, idempotent canonicalizer for index terms and codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermNormalizer {
    case_policy: CasePolicy,
}

impl TermNormalizer {
    pub fn new(case_policy: CasePolicy) -> Self {
        Self { case_policy }
    }

    pub fn case_policy(&self) -> CasePolicy {
        self.case_policy
    }

    /// Canonical form of a single term.
    pub fn normalize(&self, raw: &str) -> String {
        let ascii = deunicode(&raw.replace('\u{a0}', " "));
        let collapsed = ascii.split_whitespace().collect::<Vec<_>>().join(" ");
        match self.case_policy {
            CasePolicy::Preserve => collapsed,
            CasePolicy::Lower => collapsed.to_lowercase(),
        }
    }

    /// Split a delimiter-joined field into distinct normalized terms, in
    /// first-seen order. Empty pieces are dropped.
    pub fn split_terms(&self, field: &str, delimiter: char) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for piece in field.split(delimiter) {
            let term = self.normalize(piece);
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }

    /// Normalize an already-split term list the same way `split_terms` does.
    pub fn normalize_terms<S: AsRef<str>>(&self, terms: &[S]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(terms.len());
        for raw in terms {
            let term = self.normalize(raw.as_ref());
            if !term.is_empty() && !out.contains(&term) {
                out.push(term);
            }
        }
        out
    }
}
