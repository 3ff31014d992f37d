//! Constraint pattern compilation and matching.

use regex::Regex;

use loreguard_rules::Constraint;

/// A compiled validation pattern: `/.../` delimiters mark a case-insensitive
/// regex, anything else is an ordinal case-insensitive substring match.
#[derive(Debug)]
pub enum Pattern {
    Literal(String),
    Regex(Regex),
}

impl Pattern {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Literal(literal) => text.to_lowercase().contains(&literal.to_lowercase()),
            Self::Regex(regex) => regex.is_match(text),
        }
    }

    /// The source text, for reporting and escalation.
    pub fn source(&self) -> String {
        match self {
            Self::Literal(literal) => literal.clone(),
            Self::Regex(regex) => format!("/{}/", regex.as_str().trim_start_matches("(?i)")),
        }
    }
}

/// Directive vocabulary stripped from descriptions before keyword extraction.
/// Without this, "do not mention the secret" would enforce "not" (matching
/// "cannot") and "mention" rather than just "secret".
const DIRECTIVE_STOPWORDS: &[&str] = &[
    "the", "and", "for", "you", "your", "not", "never", "must", "should", "shall", "may", "can",
    "cannot", "will", "would", "dont", "don", "doesnt", "wont", "mention", "mentioning", "say",
    "saying", "talk", "talking", "speak", "speaking", "about", "avoid", "discuss", "discussing",
    "reveal", "revealing", "refer", "referring", "any", "all", "are", "this", "that", "these",
    "those", "with", "into", "when", "where", "how", "what", "who", "them", "they", "their",
    "does", "please", "ever", "under", "circumstances",
];

/// Build the effective patterns for a constraint.
///
/// Explicit `validation_patterns` win. Otherwise: quoted strings from the
/// description, and failing that, description keywords of length >= 3 minus
/// the directive stopwords.
pub fn effective_patterns(constraint: &Constraint) -> Vec<Pattern> {
    if !constraint.validation_patterns.is_empty() {
        return constraint
            .validation_patterns
            .iter()
            .map(|raw| compile_pattern(raw))
            .collect();
    }

    let quoted = quoted_strings(&constraint.description);
    if !quoted.is_empty() {
        return quoted.into_iter().map(Pattern::Literal).collect();
    }

    description_keywords(&constraint.description)
        .into_iter()
        .map(Pattern::Literal)
        .collect()
}

fn compile_pattern(raw: &str) -> Pattern {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('/') && trimmed.ends_with('/') {
        let body = &trimmed[1..trimmed.len() - 1];
        match Regex::new(&format!("(?i){body}")) {
            Ok(regex) => return Pattern::Regex(regex),
            Err(error) => {
                tracing::warn!(pattern = %raw, error = %error,
                    "invalid constraint regex; treating as literal");
            }
        }
    }
    Pattern::Literal(trimmed.to_string())
}

fn quoted_strings(description: &str) -> Vec<String> {
    let mut out = Vec::new();
    for quote in ['"', '\''] {
        let mut rest = description;
        while let Some(start) = rest.find(quote) {
            let after = &rest[start + 1..];
            let Some(end) = after.find(quote) else { break };
            let inner = &after[..end];
            if !inner.trim().is_empty() {
                out.push(inner.trim().to_string());
            }
            rest = &after[end + 1..];
        }
    }
    out
}

fn description_keywords(description: &str) -> Vec<String> {
    let mut keywords: Vec<String> = description
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() >= 3 && !DIRECTIVE_STOPWORDS.contains(word))
        .map(str::to_string)
        .collect();
    keywords.dedup();
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreguard_rules::Severity;

    fn constraint(description: &str, patterns: Vec<&str>) -> Constraint {
        Constraint::new("c", description, Severity::Hard)
            .with_patterns(patterns.into_iter().map(str::to_string).collect())
    }

    #[test]
    fn explicit_literal_patterns_win() {
        let patterns = effective_patterns(&constraint("irrelevant words", vec!["dragon"]));
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].matches("A DRAGON appears"));
        assert!(!patterns[0].matches("a wyvern appears"));
    }

    #[test]
    fn slash_delimited_is_regex_case_insensitive() {
        let patterns = effective_patterns(&constraint("", vec![r"/secret\s+code/"]));
        assert!(patterns[0].matches("the Secret  Code is hidden"));
        assert!(!patterns[0].matches("secretcode"));
    }

    #[test]
    fn invalid_regex_degrades_to_literal() {
        let patterns = effective_patterns(&constraint("", vec!["/[unclosed/"]));
        assert!(matches!(patterns[0], Pattern::Literal(_)));
    }

    #[test]
    fn quoted_strings_extracted_from_description() {
        let patterns = effective_patterns(&constraint(
            "never mention the phrase \"crimson key\" to anyone",
            vec![],
        ));
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].matches("Where is the Crimson Key?"));
    }

    #[test]
    fn keywords_skip_directive_stopwords() {
        let patterns = effective_patterns(&constraint("do not mention secret", vec![]));
        let sources: Vec<String> = patterns.iter().map(Pattern::source).collect();
        assert_eq!(sources, vec!["secret"]);
        // "cannot" must not trip the "not" stopword-derived pattern.
        assert!(!patterns.iter().any(|p| p.matches("I cannot speak of that.")));
        assert!(patterns.iter().any(|p| p.matches("The secret is X.")));
    }
}
