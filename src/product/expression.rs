//! Name references inside band maths expressions.
//!
//! Expressions are never evaluated here. They are only scanned for whole-word
//! occurrences of node names to keep products referentially intact.

use regex::Regex;

/// Matcher for whole-identifier occurrences of one name.
///
/// A name is delimited by the start or end of the expression or by any
/// character that cannot be part of an identifier (word characters and `.`).
#[derive(Debug, Clone)]
pub struct NameReference {
    name: String,
    pattern: Regex,
}

impl NameReference {
    /// Build the matcher, `None` for an empty name.
    pub fn new(name: &str) -> Option<Self> {
        if name.is_empty() {
            return None;
        }
        let source = format!(r"(?:^|[^\w.]){}(?:$|[^\w.])", regex::escape(name));
        match Regex::new(&source) {
            Ok(pattern) => Some(Self {
                name: name.to_string(),
                pattern,
            }),
            Err(e) => {
                log::warn!("Cannot build reference pattern for '{}': {}", name, e);
                None
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `expression` mentions the name. Blank expressions mention nothing.
    pub fn is_referenced_in(&self, expression: &str) -> bool {
        !expression.trim().is_empty() && self.pattern.is_match(expression)
    }
}

/// Whether `expression` mentions `name` as a whole identifier.
///
/// Empty or blank expressions reference nothing.
pub fn is_name_referenced(expression: &str, name: &str) -> bool {
    NameReference::new(name).is_some_and(|reference| reference.is_referenced_in(expression))
}

/// The subset of `names` mentioned in `expression`, in the order given.
pub fn referenced_names<'a>(expression: &str, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    names
        .into_iter()
        .filter(|name| is_name_referenced(expression, name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_word_matching() {
        assert!(is_name_referenced("radiance_1 * 2", "radiance_1"));
        assert!(is_name_referenced("(b1 + b2) / 2", "b2"));
        assert!(!is_name_referenced("radiance_10 * 2", "radiance_1"));
        assert!(!is_name_referenced("xb1", "b1"));
        assert!(!is_name_referenced("   ", "b1"));
        assert!(!is_name_referenced("b1 > 0", ""));
    }

    #[test]
    fn test_names_are_escaped() {
        assert!(is_name_referenced("a.b + 1", "a.b"));
        assert!(!is_name_referenced("axb + 1", "a.b"));
    }

    #[test]
    fn test_names_with_non_word_edges() {
        assert!(is_name_referenced("$1 + 2", "$1"));
        assert!(is_name_referenced("(b-1) * 2", "b-1"));
        assert!(!is_name_referenced("a$1 + 2", "$1"));
        assert!(!is_name_referenced("x.a.b > 0", "a.b"));
    }

    #[test]
    fn test_reference_is_reusable() {
        let reference = NameReference::new("b4").unwrap();
        assert_eq!(reference.name(), "b4");
        assert!(reference.is_referenced_in("b4 > 0"));
        assert!(reference.is_referenced_in("b3 + b4"));
        assert!(!reference.is_referenced_in("b44"));
        assert!(!reference.is_referenced_in(""));
        assert!(NameReference::new("").is_none());
    }

    #[test]
    fn test_referenced_names() {
        let found = referenced_names("nd_flags == 0 && b3 > 0.1", ["b3", "b4", "nd_flags"]);
        assert_eq!(found, vec!["b3", "nd_flags"]);
    }
}
