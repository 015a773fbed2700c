use regex::{Regex, RegexSet};

use crate::prelude::*;

/// Matches resource identifiers against the known client tokens.
///
/// Tokens are searched as regular expressions anywhere in the identifier. When more than one
/// token matches, the one listed first wins, no matter how specific the later ones are.
#[derive(Debug, Clone)]
pub struct PatternResolver {
    tokens: Vec<String>,
    patterns: RegexSet,
}

impl PatternResolver {
    /// Builds the resolver. Blank tokens are dropped since they would match everything.
    /// A token that isn't a valid regular expression is matched as plain text.
    pub fn new<I, S>(tokens: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(Into::into)
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty())
            .collect();

        let expressions: Vec<String> = tokens
            .iter()
            .map(|token| match Regex::new(token) {
                Ok(_) => token.clone(),
                Err(_) => {
                    tracing::warn!(
                        token = %token,
                        "client token is not a valid pattern, matching it literally"
                    );
                    regex::escape(token)
                }
            })
            .collect();

        let patterns = RegexSet::new(&expressions)
            .into_diagnostic()
            .wrap_err("Failed to compile the client token list")?;

        Ok(PatternResolver { tokens, patterns })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn resolve(&self, resource_id: &str) -> Option<&str> {
        // Set matches iterate in ascending pattern index, which is the list order.
        let first = self.patterns.matches(resource_id).into_iter().next()?;

        self.tokens.get(first).map(String::as_str)
    }
}
