/// Question Classifier
/// Detects what kind of regulatory question is being asked (citation lookup,
/// numeric facts, definitions, procedures) and whether it leans on the
/// previous exchange.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::models::QuestionType;
use crate::utils::normalize::normalize_question;

/// References such as "section 12(3)", "reg. 4A", "article 9", "§ 204"
static CITATION_REFERENCES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b(section|sec\.?|s\.)\s*\d+[a-z]?(\s*\(\w+\))*",
        r"\b(regulation|reg\.?|rule|article|art\.?|schedule|paragraph|para\.?|clause)\s*\d+[a-z]?(\s*\(\w+\))*",
        r"§+\s*\d+",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

const CITATION_PHRASES: &[&str] = &[
    "which section",
    "which regulation",
    "which rule",
    "what section",
    "what regulation",
    "what rule",
    "cite",
    "citation for",
    "where does it say",
];

const PENALTY_PHRASES: &[&str] = &[
    "penalty",
    "penalties",
    "fine",
    "fines",
    "fined",
    "sanction",
    "sanctions",
    "how much do i pay",
    "how much will i pay",
    "surcharge",
];

const DEADLINE_PHRASES: &[&str] = &[
    "deadline",
    "due",
    "due date",
    "when must",
    "when do i have to",
    "by when",
    "how many days",
    "how long do i have",
    "time limit",
    "within how",
];

const THRESHOLD_PHRASES: &[&str] = &[
    "threshold",
    "minimum",
    "maximum",
    "at least",
    "more than",
    "less than",
    "exceed",
    "exceeds",
    "limit",
    "how many employees",
    "cap",
];

const DEFINITION_PREFIXES: &[&str] = &["define", "what is a", "what is an", "what are", "who is a", "who counts as"];

const DEFINITION_PHRASES: &[&str] = &["definition of", "meaning of", "what does", "defined as", "mean"];

const PROCEDURE_PHRASES: &[&str] = &[
    "how do i",
    "how can i",
    "how to",
    "steps",
    "process",
    "procedure",
    "apply for",
    "register",
    "submit",
    "what form",
];

const FOLLOW_UP_PREFIXES: &[&str] = &[
    "and",
    "also",
    "what about",
    "how about",
    "what if",
    "then",
    "so",
    "but",
];

const REFERENTIAL_WORDS: &[&str] = &["it", "that", "this", "those", "they", "them", "its", "there"];

/// Referential follow-ups are only recognised in short questions
const FOLLOW_UP_MAX_WORDS: usize = 8;

pub struct QuestionClassifier;

impl QuestionClassifier {
    /// Classify a question by pattern matching
    pub fn classify(question: &str) -> QuestionType {
        let lower = question.to_lowercase();
        let text = normalize_question(question);

        // Pattern 1: explicit provision references or "which section" style asks
        if let Some(re) = CITATION_REFERENCES.iter().find(|re| re.is_match(&lower)) {
            debug!("Detected CitationLookup: matched /{}/", re.as_str());
            return QuestionType::CitationLookup;
        }
        if let Some(p) = find_phrase(&text, CITATION_PHRASES) {
            debug!("Detected CitationLookup: matched '{}'", p);
            return QuestionType::CitationLookup;
        }

        // Pattern 2: numeric facts, most specific first
        if let Some(p) = find_phrase(&text, PENALTY_PHRASES) {
            debug!("Detected PenaltyAmount: matched '{}'", p);
            return QuestionType::PenaltyAmount;
        }
        if let Some(p) = find_phrase(&text, DEADLINE_PHRASES) {
            debug!("Detected Deadline: matched '{}'", p);
            return QuestionType::Deadline;
        }
        if let Some(p) = find_phrase(&text, THRESHOLD_PHRASES) {
            debug!("Detected Threshold: matched '{}'", p);
            return QuestionType::Threshold;
        }

        // Pattern 3: procedures before definitions ("how do i register" is not a definition)
        if let Some(p) = find_phrase(&text, PROCEDURE_PHRASES) {
            debug!("Detected Procedure: matched '{}'", p);
            return QuestionType::Procedure;
        }
        if let Some(p) = DEFINITION_PREFIXES
            .iter()
            .find(|p| starts_with_phrase(&text, p))
            .or_else(|| DEFINITION_PHRASES.iter().find(|p| contains_phrase(&text, p)))
        {
            debug!("Detected Definition: matched '{}'", p);
            return QuestionType::Definition;
        }

        debug!("Defaulting to General question type");
        QuestionType::General
    }

    /// Whether the question continues the previous exchange. Never true
    /// without prior history.
    pub fn is_follow_up(question: &str, has_history: bool) -> bool {
        if !has_history {
            return false;
        }

        let text = normalize_question(question);
        if text.is_empty() {
            return false;
        }

        if let Some(p) = FOLLOW_UP_PREFIXES.iter().find(|p| starts_with_phrase(&text, p)) {
            debug!("Detected follow-up: leading '{}'", p);
            return true;
        }

        let words: Vec<&str> = text.split(' ').collect();
        if words.len() <= FOLLOW_UP_MAX_WORDS && words.iter().any(|w| REFERENTIAL_WORDS.contains(w)) {
            // A short question naming its own provision stands on its own
            let lower = question.to_lowercase();
            if !CITATION_REFERENCES.iter().any(|re| re.is_match(&lower)) {
                debug!("Detected follow-up: short referential question");
                return true;
            }
        }

        false
    }
}

fn find_phrase<'a>(text: &str, phrases: &[&'a str]) -> Option<&'a str> {
    phrases.iter().copied().find(|p| contains_phrase(text, p))
}

/// Whole-word containment on normalized text
fn contains_phrase(text: &str, phrase: &str) -> bool {
    format!(" {} ", text).contains(&format!(" {} ", phrase))
}

fn starts_with_phrase(text: &str, phrase: &str) -> bool {
    text == phrase || text.starts_with(&format!("{} ", phrase))
}
