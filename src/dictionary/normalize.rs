//! Term normalization shared by dictionary keys and user phrases.
//!
//! Both sides of every comparison go through [`normalize_term`], so the
//! rules only need to be consistent, not linguistically perfect.

use inflector::Inflector;

/// Irregular plurals that show up in analytics vocabulary.
static IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("analysis", "analyses"),
    ("criterion", "criteria"),
    ("medium", "media"),
    ("index", "indices"),
    ("currency", "currencies"),
];

/// Singularize a word, handling irregulars first then falling back to inflector.
///
/// # Examples
/// ```ignore
/// assert_eq!(singularize("deposits"), "deposit");
/// assert_eq!(singularize("countries"), "country");
/// assert_eq!(singularize("bonus"), "bonus");
/// ```
pub fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();

    for (singular, plural) in IRREGULAR_PLURALS {
        if lower == *plural || lower == *singular {
            return singular.to_string();
        }
    }

    // acronyms and words inflector would mangle
    if lower.len() <= 3 || lower.ends_with("ss") || lower.ends_with("us") || lower.ends_with("is")
    {
        return lower;
    }

    lower.to_singular()
}

/// Split `NetRevenue` / `GGRValue` style identifiers into words.
fn split_camel(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower)
            {
                out.push(' ');
            }
        }
        out.push(c);
    }
    out
}

/// Lowercase, split camel case, strip punctuation, collapse whitespace and
/// singularize the last word.
pub fn normalize_term(term: &str) -> String {
    let spaced: String = split_camel(term)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut words: Vec<String> = spaced.split_whitespace().map(String::from).collect();
    if let Some(last) = words.pop() {
        words.push(singularize(&last));
    }
    words.join(" ")
}

/// Whole-word containment on normalized text.
pub fn contains_word(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    format!(" {} ", text).contains(&format!(" {} ", phrase))
}
