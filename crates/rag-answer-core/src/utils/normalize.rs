use sha2::{Digest, Sha256};

/// Canonical form of a question used for cache and dedup keys:
/// lowercase, punctuation removed, whitespace collapsed to single spaces.
pub fn normalize_question(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 (hex) of the normalized question.
pub fn question_hash(text: &str) -> String {
    let normalized = normalize_question(text);
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}

/// Hash of a question asked within `scope` (a conversation topic). `None`
/// gives the plain `question_hash`. Normalized text never contains `|`, so
/// scope and question cannot bleed into each other.
pub fn scoped_question_hash(question: &str, scope: Option<&str>) -> String {
    match scope {
        None => question_hash(question),
        Some(scope) => {
            let scoped = format!("{}|{}", normalize_question(scope), normalize_question(question));
            hex::encode(Sha256::digest(scoped.as_bytes()))
        }
    }
}
