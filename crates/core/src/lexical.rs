use crate::store::SearchUnit;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

pub const HEADING_WEIGHT: f64 = 1.0;
pub const BODY_WEIGHT: f64 = 0.7;
pub const TAG_WEIGHT: f64 = 0.5;
/// Weight of a term found only in the owning deck's title or summary.
pub const DECK_WEIGHT: f64 = 0.3;

/// Longest term list sent to the store; later terms are ignored.
pub const MAX_QUERY_TERMS: usize = 32;

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for",
    "from", "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "our", "show", "that",
    "the", "this", "to", "we", "what", "when", "where", "which", "who", "why", "with", "you",
];

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Words that refer to the deck itself rather than to its content.
const DECK_SCOPE_WORDS: &[&str] = &[
    "deck", "decks", "presentation", "presentations", "slide", "slides", "talk",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token) || DECK_SCOPE_WORDS.contains(&token)
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("token pattern is valid"))
}

/// Lowercase alphanumeric runs, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    token_pattern()
        .find_iter(&text.to_lowercase())
        .map(|token| token.as_str().to_string())
        .collect()
}

/// Distinct query tokens with stopwords removed, at most [`MAX_QUERY_TERMS`]. A
/// query made only of stopwords keeps its tokens so it can still match something.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let tokens: Vec<String> = tokenize(query)
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect();

    let meaningful: Vec<String> = tokens
        .iter()
        .filter(|token| !is_stopword(token))
        .cloned()
        .collect();

    let mut terms = if meaningful.is_empty() {
        tokens
    } else {
        meaningful
    };
    terms.truncate(MAX_QUERY_TERMS);
    terms
}

/// True for questions about a deck as a whole, such as "what is this deck about?":
/// every token is a stopword and at least one of them names the deck.
pub fn is_overview_query(query: &str) -> bool {
    let tokens = tokenize(query);
    tokens
        .iter()
        .any(|token| DECK_SCOPE_WORDS.contains(&token.as_str()))
        && tokens.iter().all(|token| is_stopword(token))
}

/// Coverage-weighted lexical score in [0, 1]: each term contributes the weight of
/// the strongest field containing it, averaged over all terms.
pub fn lexical_score(terms: &[String], unit: &SearchUnit) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }

    let heading = unit.heading.to_lowercase();
    let body: Vec<String> = unit.body.iter().map(|field| field.to_lowercase()).collect();
    let tags: Vec<String> = unit.tags.iter().map(|field| field.to_lowercase()).collect();
    let deck = [unit.deck_title.to_lowercase(), unit.deck_summary.to_lowercase()];

    let total: f64 = terms
        .iter()
        .map(|term| {
            if heading.contains(term.as_str()) {
                HEADING_WEIGHT
            } else if body.iter().any(|field| field.contains(term.as_str())) {
                BODY_WEIGHT
            } else if tags.iter().any(|field| field.contains(term.as_str())) {
                TAG_WEIGHT
            } else if deck.iter().any(|field| field.contains(term.as_str())) {
                DECK_WEIGHT
            } else {
                0.0
            }
        })
        .sum();

    (total / terms.len() as f64).clamp(0.0, 1.0)
}
