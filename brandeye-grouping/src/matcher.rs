//! OCR tokens to brand resolution

use crate::brand_db::BrandDatabase;
use crate::error::GroupingError;
use crate::providers::OcrOutcome;
use crate::text::{normalize_text, token_alias_similarity};
use brandeye_core::OcrToken;
use std::sync::Arc;

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;
pub const DEFAULT_MIN_TOKEN_CONFIDENCE: f32 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched { brand: String, score: f64 },
    /// `best_score` is the highest similarity seen, 0.0 when there was nothing to compare
    Unmatched { best_score: f64 },
}

impl MatchOutcome {
    pub fn brand(&self) -> Option<&str> {
        match self {
            MatchOutcome::Matched { brand, .. } => Some(brand),
            MatchOutcome::Unmatched { .. } => None,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            MatchOutcome::Matched { score, .. } => *score,
            MatchOutcome::Unmatched { best_score } => *best_score,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Resolves a detection's OCR tokens against the brand catalogue.
#[derive(Debug, Clone)]
pub struct BrandMatcher {
    db: Arc<BrandDatabase>,
    threshold: f64,
    min_token_confidence: f32,
}

impl BrandMatcher {
    pub fn new(db: Arc<BrandDatabase>, threshold: f64) -> Result<Self, GroupingError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(GroupingError::InvalidInput(format!(
                "match threshold {} outside [0, 1]",
                threshold
            )));
        }
        Ok(Self {
            db,
            threshold,
            min_token_confidence: DEFAULT_MIN_TOKEN_CONFIDENCE,
        })
    }

    pub fn with_min_token_confidence(mut self, min_token_confidence: f32) -> Self {
        self.min_token_confidence = min_token_confidence;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn database(&self) -> &Arc<BrandDatabase> {
        &self.db
    }

    /// Scores at the threshold are accepted.
    pub fn accepts(&self, score: f64) -> bool {
        score >= self.threshold
    }

    /// Best (entry index, score) over all tokens and aliases. Earlier brands win ties.
    fn best_candidate(&self, tokens: &[OcrToken]) -> Option<(usize, f64)> {
        let normalized: Vec<String> = tokens
            .iter()
            .filter(|t| t.confidence >= self.min_token_confidence)
            .map(|t| normalize_text(&t.text))
            .filter(|t| !t.is_empty())
            .collect();
        if normalized.is_empty() {
            return None;
        }

        let mut best: Option<(usize, f64)> = None;
        for (idx, entry) in self.db.entries().iter().enumerate() {
            let brand_score = entry
                .aliases
                .iter()
                .flat_map(|alias| normalized.iter().map(move |t| token_alias_similarity(t, alias)))
                .fold(0.0_f64, f64::max);

            match best {
                Some((_, score)) if brand_score <= score => {}
                _ => best = Some((idx, brand_score)),
            }
        }
        best
    }

    pub fn match_tokens(&self, tokens: &[OcrToken]) -> MatchOutcome {
        match self.best_candidate(tokens) {
            Some((idx, score)) if self.accepts(score) => MatchOutcome::Matched {
                brand: self.db.entries()[idx].name.clone(),
                score,
            },
            Some((_, score)) => MatchOutcome::Unmatched { best_score: score },
            None => MatchOutcome::Unmatched { best_score: 0.0 },
        }
    }

    /// OCR failures never fail matching; they only leave the detection unmatched.
    pub fn match_outcome(&self, outcome: &OcrOutcome) -> MatchOutcome {
        match outcome {
            OcrOutcome::Present(tokens) => self.match_tokens(tokens),
            OcrOutcome::Degraded { tokens, .. } => self.match_tokens(tokens),
            OcrOutcome::Absent { .. } => MatchOutcome::Unmatched { best_score: 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brand_db::BrandEntry;

    fn small_db() -> Arc<BrandDatabase> {
        Arc::new(
            BrandDatabase::new(vec![
                BrandEntry::new("Kotex", ["kotex"], "feminine_care"),
                BrandEntry::new("Molto", ["molto"], "laundry"),
            ])
            .unwrap(),
        )
    }

    fn tokens(texts: &[&str]) -> Vec<OcrToken> {
        texts.iter().map(|t| OcrToken::new(*t, 0.9)).collect()
    }

    #[test]
    fn test_exact_and_case_insensitive() {
        let matcher = BrandMatcher::new(small_db(), 0.6).unwrap();
        let upper = matcher.match_tokens(&tokens(&["KOTEX"]));
        let lower = matcher.match_tokens(&tokens(&["kotex"]));
        assert_eq!(upper, lower);
        assert_eq!(upper.brand(), Some("Kotex"));
        assert_eq!(upper.score(), 1.0);
    }

    #[test]
    fn test_token_window_match() {
        let matcher = BrandMatcher::new(small_db(), 0.6).unwrap();
        assert_eq!(matcher.match_tokens(&tokens(&["Kotex Soft"])).brand(), Some("Kotex"));
    }

    #[test]
    fn test_threshold_boundary() {
        let matcher = BrandMatcher::new(small_db(), 0.6).unwrap();
        // "melta" vs "molto": two substitutions over five chars
        let outcome = matcher.match_tokens(&tokens(&["melta"]));
        assert_eq!(outcome, MatchOutcome::Matched { brand: "Molto".to_string(), score: 0.6 });

        assert!(matcher.accepts(0.6));
        assert!(!matcher.accepts(0.599));
    }

    #[test]
    fn test_below_threshold_unmatched() {
        let matcher = BrandMatcher::new(small_db(), 0.6).unwrap();
        let outcome = matcher.match_tokens(&tokens(&["zzzzz"]));
        assert!(!outcome.is_matched());
        assert!(outcome.score() < 0.6);
    }

    #[test]
    fn test_tie_goes_to_first_brand() {
        let db = Arc::new(
            BrandDatabase::new(vec![
                BrandEntry::new("Alpha", ["same"], "x"),
                BrandEntry::new("Beta", ["same"], "x"),
            ])
            .unwrap(),
        );
        let matcher = BrandMatcher::new(db, 0.6).unwrap();
        assert_eq!(matcher.match_tokens(&tokens(&["same"])).brand(), Some("Alpha"));
    }

    #[test]
    fn test_best_brand_across_tokens() {
        let matcher = BrandMatcher::new(small_db(), 0.6).unwrap();
        let outcome = matcher.match_tokens(&tokens(&["kotx", "molto"]));
        assert_eq!(outcome.brand(), Some("Molto"));
    }

    #[test]
    fn test_empty_tokens_unmatched() {
        let matcher = BrandMatcher::new(small_db(), 0.6).unwrap();
        assert_eq!(matcher.match_tokens(&[]), MatchOutcome::Unmatched { best_score: 0.0 });
        assert!(!matcher.match_tokens(&tokens(&["", "  ", "®"])).is_matched());
    }

    #[test]
    fn test_low_confidence_tokens_ignored() {
        let matcher = BrandMatcher::new(small_db(), 0.6).unwrap();
        let weak = vec![OcrToken::new("Kotex", 0.1)];
        assert!(!matcher.match_tokens(&weak).is_matched());

        let lenient = matcher.with_min_token_confidence(0.0);
        assert!(lenient.match_tokens(&weak).is_matched());
    }

    #[test]
    fn test_absent_ocr_unmatched() {
        let matcher = BrandMatcher::new(small_db(), 0.6).unwrap();
        let outcome = matcher.match_outcome(&OcrOutcome::absent("timeout"));
        assert!(!outcome.is_matched());

        let degraded = OcrOutcome::Degraded {
            tokens: tokens(&["molto"]),
            reason: "dropped 1 of 2 tokens".to_string(),
        };
        assert_eq!(matcher.match_outcome(&degraded).brand(), Some("Molto"));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        assert!(BrandMatcher::new(small_db(), 1.5).is_err());
        assert!(BrandMatcher::new(small_db(), -0.1).is_err());
    }

    #[test]
    fn test_builtin_catalogue_product_line_tie() {
        // "Kotex Ultra" is an alias of Kotex and contains "ultra"; Kotex comes first
        let matcher = BrandMatcher::new(Arc::new(BrandDatabase::builtin()), 0.6).unwrap();
        assert_eq!(matcher.match_tokens(&tokens(&["KOTEX ULTRA"])).brand(), Some("Kotex"));
        assert_eq!(matcher.match_tokens(&tokens(&["Head & Shoulders"])).brand(), Some("Head & Shoulders"));
    }
}
