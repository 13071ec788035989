//! Turns retrieved evidence into a confident / qualified / refuse verdict.
//!
//! Five weighted factors, each in [0, 1], are summed into one score. Two
//! overrides run before the threshold table: no evidence at all always
//! refuses, and a citation lookup that found no exact citation refuses below
//! a stricter bar.

use serde::Serialize;
use tracing::debug;

use crate::config::ConfidenceConfig;
use crate::models::{KnowledgeMatch, QuestionType, Recommendation};

pub const CITATION_WEIGHT: f64 = 0.35;
pub const SOURCE_COUNT_WEIGHT: f64 = 0.20;
pub const RELEVANCE_WEIGHT: f64 = 0.25;
pub const NUMERIC_WEIGHT: f64 = 0.10;
pub const CURRENCY_WEIGHT: f64 = 0.10;

/// Numeric factor for question types that are not about a specific figure
const NEUTRAL_NUMERIC: f64 = 0.7;
const INEXACT_NUMERIC: f64 = 0.2;

const NO_MATCHES_REASON: &str = "No relevant provisions were found for this question.";

const QUALIFIED_PREFIX: &str =
    "Based on the provisions I found, though I could not confirm every detail: ";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceFactor {
    pub name: &'static str,
    pub weight: f64,
    pub score: f64,
    /// User-facing explanation of this factor's score
    pub reason: String,
}

impl ConfidenceFactor {
    fn new(name: &'static str, weight: f64, score: f64, reason: impl Into<String>) -> Self {
        Self {
            name,
            weight,
            score: score.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }

    pub fn contribution(&self) -> f64 {
        self.weight * self.score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceResult {
    pub score: f64,
    pub recommendation: Recommendation,
    pub factors: Vec<ConfidenceFactor>,
    pub refusal_reason: Option<String>,
}

impl ConfidenceResult {
    /// Lowest-scoring factor; heavier factors win ties
    pub fn weakest(&self) -> Option<&ConfidenceFactor> {
        self.factors.iter().min_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| b.weight.total_cmp(&a.weight))
        })
    }

    /// Final user-facing text for a generated answer under this verdict
    pub fn render(&self, generated: &str) -> String {
        match self.recommendation {
            Recommendation::Confident => generated.to_string(),
            Recommendation::Qualified => format!("{}{}", QUALIFIED_PREFIX, generated),
            Recommendation::Refuse => format!(
                "I can't answer that with enough confidence. {}",
                self.refusal_reason.as_deref().unwrap_or(NO_MATCHES_REASON)
            ),
        }
    }
}

pub struct ConfidenceEvaluator {
    config: ConfidenceConfig,
}

impl ConfidenceEvaluator {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, question_type: QuestionType, matches: &[KnowledgeMatch]) -> ConfidenceResult {
        let supporting: Vec<&KnowledgeMatch> = matches
            .iter()
            .filter(|m| m.relevance >= self.config.min_supporting_relevance)
            .collect();

        let factors = vec![
            citation_factor(&supporting),
            source_count_factor(supporting.len()),
            relevance_factor(matches),
            numeric_factor(question_type, &supporting),
            currency_factor(&supporting),
        ];
        let score = factors
            .iter()
            .map(ConfidenceFactor::contribution)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        let mut result = ConfidenceResult {
            score,
            recommendation: Recommendation::Refuse,
            factors,
            refusal_reason: None,
        };

        let has_exact_citation = matches.iter().any(|m| m.exact_citation);
        result.recommendation = if matches.is_empty() {
            result.refusal_reason = Some(NO_MATCHES_REASON.to_string());
            Recommendation::Refuse
        } else if question_type.is_citation_lookup()
            && !has_exact_citation
            && score < self.config.citation_lookup_min_score
        {
            Recommendation::Refuse
        } else if score >= self.config.confident_threshold {
            Recommendation::Confident
        } else if score >= self.config.qualified_threshold {
            Recommendation::Qualified
        } else {
            Recommendation::Refuse
        };

        if result.recommendation == Recommendation::Refuse && result.refusal_reason.is_none() {
            result.refusal_reason = result.weakest().map(|f| f.reason.clone());
        }

        debug!(
            "Confidence {:.3} -> {} ({:?}, {} matches, {} supporting)",
            result.score,
            result.recommendation.as_str(),
            question_type,
            matches.len(),
            supporting.len()
        );
        result
    }
}

impl Default for ConfidenceEvaluator {
    fn default() -> Self {
        Self::new(ConfidenceConfig::default())
    }
}

fn citation_factor(supporting: &[&KnowledgeMatch]) -> ConfidenceFactor {
    if supporting.iter().any(|m| m.exact_citation) {
        return ConfidenceFactor::new("citation", CITATION_WEIGHT, 1.0, "An exact citation matched.");
    }

    let best = supporting
        .iter()
        .map(|m| m.match_type.citation_weight() * m.relevance)
        .fold(0.0_f64, f64::max);

    let reason = if best > 0.0 {
        "No provision matched the question's citation exactly."
    } else {
        "No provision could be tied to the question."
    };
    ConfidenceFactor::new("citation", CITATION_WEIGHT, best, reason)
}

fn source_count_factor(count: usize) -> ConfidenceFactor {
    let (score, reason) = match count {
        0 => (0.0, NO_MATCHES_REASON),
        1 => (0.4, "Only one provision supports this answer."),
        2 => (0.7, "Only two provisions support this answer."),
        _ => (1.0, "Several provisions support this answer."),
    };
    ConfidenceFactor::new("source_count", SOURCE_COUNT_WEIGHT, score, reason)
}

fn relevance_factor(matches: &[KnowledgeMatch]) -> ConfidenceFactor {
    let mut scores: Vec<f64> = matches.iter().map(|m| m.relevance.clamp(0.0, 1.0)).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    scores.truncate(3);

    let mean = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    let reason = if mean >= 0.6 {
        "The retrieved provisions are closely related to the question."
    } else {
        "The provisions found are only loosely related to the question."
    };
    ConfidenceFactor::new("relevance", RELEVANCE_WEIGHT, mean, reason)
}

fn numeric_factor(question_type: QuestionType, supporting: &[&KnowledgeMatch]) -> ConfidenceFactor {
    if !question_type.is_numeric() {
        return ConfidenceFactor::new(
            "numerical_accuracy",
            NUMERIC_WEIGHT,
            NEUTRAL_NUMERIC,
            "The question does not hinge on a specific figure.",
        );
    }

    if supporting.iter().any(|m| m.exact_numeric) {
        ConfidenceFactor::new(
            "numerical_accuracy",
            NUMERIC_WEIGHT,
            1.0,
            "The exact figure appears in a supporting provision.",
        )
    } else {
        ConfidenceFactor::new(
            "numerical_accuracy",
            NUMERIC_WEIGHT,
            INEXACT_NUMERIC,
            "I could not find the exact figure in the provisions.",
        )
    }
}

fn currency_factor(supporting: &[&KnowledgeMatch]) -> ConfidenceFactor {
    if supporting.is_empty() {
        return ConfidenceFactor::new(
            "currency",
            CURRENCY_WEIGHT,
            0.0,
            "No current provision supports this answer.",
        );
    }

    let current = supporting.iter().filter(|m| m.is_current()).count();
    let ratio = current as f64 / supporting.len() as f64;
    let reason = if current == supporting.len() {
        "All supporting provisions are in force."
    } else {
        "Some supporting provisions may have been superseded or repealed."
    };
    ConfidenceFactor::new("currency", CURRENCY_WEIGHT, ratio, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchType, ProvisionStatus};

    fn evaluator() -> ConfidenceEvaluator {
        ConfidenceEvaluator::default()
    }

    fn keyword(citation: &str, relevance: f64) -> KnowledgeMatch {
        KnowledgeMatch::new(citation, relevance, MatchType::Keyword)
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = CITATION_WEIGHT + SOURCE_COUNT_WEIGHT + RELEVANCE_WEIGHT + NUMERIC_WEIGHT + CURRENCY_WEIGHT;
        assert!((total - 1.0).abs() < 1e-9);

        let result = evaluator().evaluate(QuestionType::General, &[keyword("Reg 1", 0.9)]);
        let weights: f64 = result.factors.iter().map(|f| f.weight).sum();
        assert!((weights - 1.0).abs() < 1e-9);
        assert_eq!(result.factors.len(), 5);
    }

    #[test]
    fn test_zero_matches_refuse_with_reason() {
        let result = evaluator().evaluate(QuestionType::General, &[]);
        assert_eq!(result.recommendation, Recommendation::Refuse);
        let reason = result.refusal_reason.unwrap();
        assert!(reason.to_lowercase().contains("no relevant provisions"));
    }

    #[test]
    fn test_strong_evidence_is_confident() {
        let matches = vec![
            keyword("Reg 12(3)", 0.92).exact_citation(),
            keyword("Reg 12(4)", 0.85),
            keyword("Reg 13", 0.8),
        ];
        let result = evaluator().evaluate(QuestionType::General, &matches);
        assert_eq!(result.recommendation, Recommendation::Confident);
        assert!(result.refusal_reason.is_none());
        assert!(result.score >= 0.6);
    }

    #[test]
    fn test_single_moderate_match_is_qualified() {
        // citation 0.6*0.7=0.42, count 0.4, relevance 0.7, numeric 0.7, currency 1.0
        let result = evaluator().evaluate(QuestionType::General, &[keyword("Reg 5", 0.7)]);
        let expected = 0.35 * 0.42 + 0.2 * 0.4 + 0.25 * 0.7 + 0.1 * 0.7 + 0.1 * 1.0;
        assert!((result.score - expected).abs() < 1e-9);
        assert_eq!(result.recommendation, Recommendation::Qualified);
        assert!(result.render("Five days.").ends_with("Five days."));
        assert_ne!(result.render("Five days."), "Five days.");
    }

    #[test]
    fn test_uniformly_low_relevance_refuses_via_score() {
        let matches = vec![keyword("Reg 1", 0.1), keyword("Reg 2", 0.15), keyword("Reg 3", 0.05)];
        let result = evaluator().evaluate(QuestionType::General, &matches);
        assert_eq!(result.recommendation, Recommendation::Refuse);
        assert!(result.score < 0.4);
        assert!(result.refusal_reason.is_some());
    }

    #[test]
    fn test_more_supporting_matches_never_lower_the_score() {
        for question_type in [QuestionType::General, QuestionType::Deadline, QuestionType::Definition] {
            let mut previous = 0.0;
            for n in 1..=3 {
                let matches: Vec<_> = (0..n).map(|i| keyword(&format!("Reg {}", i), 0.6)).collect();
                let score = evaluator().evaluate(question_type, &matches).score;
                assert!(score >= previous, "{:?}: {} matches scored {} < {}", question_type, n, score, previous);
                previous = score;
            }
        }
    }

    #[test]
    fn test_numeric_factor_is_type_aware() {
        let matches = vec![keyword("Reg 9", 0.8)];
        let general = evaluator().evaluate(QuestionType::Procedure, &matches);
        let numeric = |r: &ConfidenceResult| {
            r.factors
                .iter()
                .find(|f| f.name == "numerical_accuracy")
                .map(|f| f.score)
        };
        assert_eq!(numeric(&general), Some(0.7));

        let penalty = evaluator().evaluate(QuestionType::PenaltyAmount, &matches);
        assert_eq!(numeric(&penalty), Some(0.2));

        let exact = vec![keyword("Reg 9", 0.8).exact_numeric()];
        let penalty_exact = evaluator().evaluate(QuestionType::PenaltyAmount, &exact);
        assert_eq!(numeric(&penalty_exact), Some(1.0));
    }

    #[test]
    fn test_citation_lookup_without_exact_citation_uses_stricter_bar() {
        // Scores in [0.4, 0.5): qualified for general, refused for citation lookup
        let matches = vec![KnowledgeMatch::new("Reg 2", 0.55, MatchType::Semantic)];
        let general = evaluator().evaluate(QuestionType::General, &matches);
        assert!(general.score >= 0.4 && general.score < 0.5, "score {}", general.score);
        assert_eq!(general.recommendation, Recommendation::Qualified);

        let lookup = evaluator().evaluate(QuestionType::CitationLookup, &matches);
        assert_eq!(lookup.recommendation, Recommendation::Refuse);
        assert_eq!(
            lookup.refusal_reason.as_deref(),
            Some("No provision matched the question's citation exactly.")
        );

        let exact = vec![KnowledgeMatch::new("Reg 2", 0.55, MatchType::Citation).exact_citation()];
        let lookup_exact = evaluator().evaluate(QuestionType::CitationLookup, &exact);
        assert_ne!(lookup_exact.recommendation, Recommendation::Refuse);
    }

    #[test]
    fn test_superseded_provisions_lower_currency() {
        let matches = vec![
            keyword("Reg 1", 0.8),
            keyword("Reg 2", 0.8).with_status(ProvisionStatus::Repealed),
        ];
        let result = evaluator().evaluate(QuestionType::General, &matches);
        let currency = result.factors.iter().find(|f| f.name == "currency").map(|f| f.score);
        assert_eq!(currency, Some(0.5));
    }

    #[test]
    fn test_refusal_names_the_weakest_factor() {
        let matches = vec![keyword("Reg 1", 0.35).with_status(ProvisionStatus::Superseded)];
        let result = evaluator().evaluate(QuestionType::General, &matches);
        assert_eq!(result.recommendation, Recommendation::Refuse);
        let weakest = result.weakest().map(|f| f.name);
        assert_eq!(weakest, Some("currency"));
        assert_eq!(
            result.refusal_reason.as_deref(),
            Some("Some supporting provisions may have been superseded or repealed.")
        );
        assert!(result.render("ignored").contains("superseded"));
    }
}
