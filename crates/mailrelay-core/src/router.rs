//! Recipient routing: first active rule whose pattern matches wins.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::store::{Rule, RuleStore};
use crate::{Error, Result};

/// Checks that a rule pattern compiles.
///
/// # Errors
///
/// Returns [`Error::InvalidPattern`] with the compiler diagnostic.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    Regex::new(pattern).map(drop).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Rules whose pattern does not compile, with the diagnostic.
#[must_use]
pub fn invalid_rules(rules: &[Rule]) -> Vec<(&Rule, String)> {
    rules
        .iter()
        .filter_map(|rule| {
            Regex::new(&rule.pattern)
                .err()
                .map(|err| (rule, err.to_string()))
        })
        .collect()
}

/// Matches recipients against the active rule set.
///
/// Patterns are compiled once and cached by text. A pattern that fails to
/// compile never matches; it is logged the first time it is seen and
/// reported by [`Router::invalid_patterns`].
pub struct Router {
    store: Arc<dyn RuleStore>,
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl Router {
    /// Creates a router reading rules from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Finds the rule for `recipient`, reading the current rule set.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules cannot be loaded.
    pub async fn route(&self, recipient: &str) -> Result<Option<Rule>> {
        let rules = self.store.active_rules().await?;
        Ok(self.match_first(&rules, recipient).cloned())
    }

    /// First rule in slice order whose pattern matches anywhere in
    /// `recipient`.
    pub fn match_first<'r>(&self, rules: &'r [Rule], recipient: &str) -> Option<&'r Rule> {
        let mut compiled = self.lock();

        // Forget patterns of rules that were edited or deleted.
        let active: HashSet<&str> = rules.iter().map(|r| r.pattern.as_str()).collect();
        compiled.retain(|pattern, _| active.contains(pattern.as_str()));

        for rule in rules {
            let regex = compiled
                .entry(rule.pattern.clone())
                .or_insert_with(|| compile(rule));
            if regex.as_ref().is_some_and(|re| re.is_match(recipient)) {
                debug!(rule = %rule.id, recipient, "Recipient matched rule");
                return Some(rule);
            }
        }
        None
    }

    /// Patterns seen so far that do not compile.
    #[must_use]
    pub fn invalid_patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, regex)| regex.is_none())
            .map(|(pattern, _)| pattern.clone())
            .collect();
        patterns.sort();
        patterns
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Option<Regex>>> {
        self.compiled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn compile(rule: &Rule) -> Option<Regex> {
    match Regex::new(&rule.pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(rule = %rule.id, pattern = %rule.pattern, "Rule pattern does not compile: {e}");
            None
        }
    }
}
