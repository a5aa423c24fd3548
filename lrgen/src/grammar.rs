#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

/// A symbol of a grammar: a terminal lexeme, a non-terminal name, or the
/// end-of-input marker.
#[derive(Clone, Hash, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Symbol<T, NT> {
    Terminal(T),
    NonTerminal(NT),
    Eof,
}

impl<T, NT> fmt::Display for Symbol<T, NT>
where
    T: fmt::Debug,
    NT: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Terminal(t) => write!(f, "{:?}", t),
            Symbol::NonTerminal(nt) => write!(f, "{}", nt),
            Symbol::Eof => write!(f, "$"),
        }
    }
}

/// A numbered rule (or production) of a grammar, of the form `lhs → rhs`
#[derive(Hash, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rule<T, NT> {
    pub id: usize,
    pub lhs: NT,
    pub rhs: Vec<Symbol<T, NT>>,
}

impl<T, NT> Rule<T, NT>
where
    T: fmt::Debug,
    NT: fmt::Display,
{
    /// Renders the rule, placing `•` before the `dot`-th body symbol when one
    /// is given.
    pub(crate) fn render_with_dot(&self, dot: Option<usize>) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        write!(out, "{} →", self.lhs).unwrap();
        if self.rhs.is_empty() && dot.is_none() {
            out.push_str(" ε");
            return out;
        }
        for (i, symbol) in self.rhs.iter().enumerate() {
            if dot == Some(i) {
                out.push_str(" •");
            }
            write!(out, " {}", symbol).unwrap();
        }
        if dot == Some(self.rhs.len()) {
            out.push_str(" •");
        }
        out
    }
}

impl<T, NT> fmt::Display for Rule<T, NT>
where
    T: fmt::Debug,
    NT: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_with_dot(None))
    }
}

/// Structural defects that make table construction impossible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("the grammar has no rules")]
    EmptyGrammar,
    #[error("rule {rule} uses the end-of-input marker in its body")]
    EndOfInputInRule { rule: usize },
    #[error("start symbol {symbol} must have exactly one production")]
    AmbiguousStartSymbol { symbol: String },
    #[error("rule {rule} refers to the start symbol in its body")]
    StartSymbolInRuleBody { rule: usize },
    #[error("rule {rule} refers to {symbol}, which has no production")]
    UndefinedNonTerminal { rule: usize, symbol: String },
}

/// An ordered, append-only collection of rules.
///
/// The first registered rule is the target rule: its left-hand side wraps the
/// real start symbol, and its completion yields the unique accepting state of
/// the generated table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grammar<T, NT>
where
    NT: PartialEq + Eq + Hash,
{
    rules: Vec<Rule<T, NT>>,
    productions: IndexMap<NT, Vec<usize>>,
}

impl<T, NT> Grammar<T, NT>
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash,
{
    pub fn new() -> Self {
        Grammar {
            rules: Vec::new(),
            productions: IndexMap::new(),
        }
    }

    /// Appends a rule and returns its id. Ids are dense, assigned in
    /// registration order, and never reused.
    pub fn define_rule(&mut self, lhs: NT, rhs: Vec<Symbol<T, NT>>) -> usize {
        let id = self.rules.len();
        self.productions
            .entry(lhs.clone())
            .or_insert_with(Vec::new)
            .push(id);
        self.rules.push(Rule { id, lhs, rhs });
        id
    }

    pub fn rules(&self) -> &[Rule<T, NT>] {
        &self.rules
    }

    pub fn rule(&self, id: usize) -> &Rule<T, NT> {
        &self.rules[id]
    }

    /// The augmented start rule, always rule 0.
    pub fn target_rule(&self) -> &Rule<T, NT> {
        &self.rules[0]
    }

    /// Ids of the rules deriving `nt`, in registration order.
    pub fn productions_of(&self, nt: &NT) -> Option<&[usize]> {
        self.productions.get(nt).map(|ids| ids.as_slice())
    }

    /// Non-terminals with at least one production, in registration order.
    pub fn non_terminals(&self) -> impl Iterator<Item = &NT> {
        self.productions.keys()
    }

    /// Terminals in order of first appearance across rule bodies.
    pub fn terminals(&self) -> IndexSet<T> {
        let mut terminals = IndexSet::new();
        for rule in &self.rules {
            for symbol in &rule.rhs {
                if let Symbol::Terminal(t) = symbol {
                    terminals.insert(t.clone());
                }
            }
        }
        terminals
    }
}

impl<T, NT> Grammar<T, NT>
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash + fmt::Display,
{
    /// Checks the invariants that do not depend on reachability. A
    /// non-terminal without productions is only an error once the closure
    /// computation actually reaches it.
    pub fn validate(&self) -> Result<(), GrammarError> {
        if self.rules.is_empty() {
            return Err(GrammarError::EmptyGrammar);
        }
        for rule in &self.rules {
            if rule.rhs.iter().any(|s| matches!(s, Symbol::Eof)) {
                return Err(GrammarError::EndOfInputInRule { rule: rule.id });
            }
        }
        let start = &self.rules[0].lhs;
        if self.productions[start].len() != 1 {
            return Err(GrammarError::AmbiguousStartSymbol {
                symbol: start.to_string(),
            });
        }
        for rule in &self.rules {
            let uses_start = rule.rhs.iter().any(|s| match s {
                Symbol::NonTerminal(nt) => nt == start,
                _ => false,
            });
            if uses_start {
                return Err(GrammarError::StartSymbolInRuleBody { rule: rule.id });
            }
        }
        Ok(())
    }
}

impl<T, NT> Default for Grammar<T, NT>
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, NT> fmt::Display for Grammar<T, NT>
where
    T: fmt::Debug,
    NT: PartialEq + Eq + Hash + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            writeln!(f, "{}: {}", rule.id, rule)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Grammar, GrammarError, Symbol};

    fn nt(name: &'static str) -> Symbol<char, &'static str> {
        Symbol::NonTerminal(name)
    }
    fn term(c: char) -> Symbol<char, &'static str> {
        Symbol::Terminal(c)
    }

    #[test]
    fn rule_ids_follow_registration_order() {
        let mut g = Grammar::new();
        assert_eq!(g.define_rule("S", vec![nt("A")]), 0);
        assert_eq!(g.define_rule("A", vec![term('a')]), 1);
        assert_eq!(g.define_rule("A", vec![term('b')]), 2);
        assert_eq!(g.target_rule().id, 0);
        assert_eq!(g.rule(2).lhs, "A");
    }

    #[test]
    fn productions_are_grouped_by_left_hand_side() {
        let mut g = Grammar::new();
        g.define_rule("S", vec![nt("A")]);
        g.define_rule("A", vec![term('a')]);
        g.define_rule("A", vec![term('b')]);
        assert_eq!(g.productions_of(&"A"), Some(&[1, 2][..]));
        assert_eq!(g.productions_of(&"B"), None);
        let nts: Vec<_> = g.non_terminals().copied().collect();
        assert_eq!(nts, vec!["S", "A"]);
    }

    #[test]
    fn terminals_keep_first_appearance_order() {
        let mut g = Grammar::new();
        g.define_rule("S", vec![nt("A"), term('z')]);
        g.define_rule("A", vec![term('a'), term('z'), term('b')]);
        let terminals: Vec<_> = g.terminals().into_iter().collect();
        assert_eq!(terminals, vec!['z', 'a', 'b']);
    }

    #[test]
    fn empty_grammar_is_rejected() {
        let g: Grammar<char, &'static str> = Grammar::new();
        assert_eq!(g.validate(), Err(GrammarError::EmptyGrammar));
    }

    #[test]
    fn end_of_input_cannot_appear_in_a_body() {
        let mut g = Grammar::new();
        g.define_rule("S", vec![nt("A")]);
        g.define_rule("A", vec![term('a'), Symbol::Eof]);
        assert_eq!(g.validate(), Err(GrammarError::EndOfInputInRule { rule: 1 }));
    }

    #[test]
    fn start_symbol_must_have_a_single_production() {
        let mut g = Grammar::new();
        g.define_rule("S", vec![term('a')]);
        g.define_rule("S", vec![term('b')]);
        assert_eq!(
            g.validate(),
            Err(GrammarError::AmbiguousStartSymbol {
                symbol: "S".to_string()
            })
        );
    }

    #[test]
    fn start_symbol_cannot_appear_in_a_body() {
        let mut g = Grammar::new();
        g.define_rule("S", vec![nt("S"), term('x')]);
        assert_eq!(
            g.validate(),
            Err(GrammarError::StartSymbolInRuleBody { rule: 0 })
        );
    }

    #[test]
    fn display_dumps_numbered_rules() {
        let mut g = Grammar::new();
        g.define_rule("S", vec![nt("L")]);
        g.define_rule("L", vec![]);
        g.define_rule("L", vec![nt("L"), term('x')]);
        assert_eq!(g.to_string(), "0: S → L\n1: L → ε\n2: L → L 'x'\n");
    }
}
