//! Ordered decision lists
//!
//! A decision list is a table of `(predicate, label)` rows evaluated top to
//! bottom; the first predicate that holds decides the label, and a fallback
//! label covers inputs no row matches. Weak labeling, vegetation health and
//! moisture status are all expressed this way so the precedence is visible
//! in one place.

/// One row of a decision list
pub struct Rule<I, L> {
    pub name: &'static str,
    pub predicate: fn(&I) -> bool,
    pub label: L,
}

impl<I, L: Clone> Clone for Rule<I, L> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            predicate: self.predicate,
            label: self.label.clone(),
        }
    }
}

impl<I, L: std::fmt::Debug> std::fmt::Debug for Rule<I, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("label", &self.label)
            .finish()
    }
}

/// First-match-wins table of rules with a fallback label
#[derive(Debug, Clone)]
pub struct DecisionList<I, L> {
    rules: Vec<Rule<I, L>>,
    fallback: L,
}

impl<I, L: Copy> DecisionList<I, L> {
    pub fn new(fallback: L) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Append a rule; it only fires when every earlier rule fails
    pub fn rule(mut self, name: &'static str, predicate: fn(&I) -> bool, label: L) -> Self {
        self.rules.push(Rule {
            name,
            predicate,
            label,
        });
        self
    }

    pub fn rules(&self) -> &[Rule<I, L>] {
        &self.rules
    }

    pub fn fallback(&self) -> L {
        self.fallback
    }

    pub fn evaluate(&self, input: &I) -> L {
        self.matching_rule(input)
            .map_or(self.fallback, |rule| rule.label)
    }

    /// The rule that decides `input`, `None` when the fallback applies
    pub fn matching_rule(&self, input: &I) -> Option<&Rule<I, L>> {
        self.rules.iter().find(|rule| (rule.predicate)(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_table() -> DecisionList<f64, i8> {
        DecisionList::<f64, i8>::new(0)
            .rule("positive", |x| *x > 0.0, 1)
            .rule("large_positive", |x| *x > 10.0, 2)
            .rule("negative", |x| *x < 0.0, -1)
    }

    #[test]
    fn test_first_match_wins() {
        let table = sign_table();
        // "large_positive" is shadowed by the earlier "positive" rule
        assert_eq!(table.evaluate(&50.0), 1);
        assert_eq!(table.matching_rule(&50.0).map(|r| r.name), Some("positive"));
        assert_eq!(table.evaluate(&-3.0), -1);
    }

    #[test]
    fn test_fallback() {
        let table = sign_table();
        assert_eq!(table.evaluate(&0.0), 0);
        assert!(table.matching_rule(&f64::NAN).is_none());
    }
}
