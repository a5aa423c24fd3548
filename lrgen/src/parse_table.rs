use crate::grammar::{Grammar, GrammarError, Symbol};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

/// What the driving parser must do for a given `(state, symbol)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Action {
    /// Consume the lookahead and move to the given state.
    Shift(usize),
    /// Move to the given state after a reduction produced this non-terminal.
    Goto(usize),
    /// Pop the body of the given rule off the parse stack and push its
    /// left-hand side.
    Reduce(usize),
    /// The input is a complete derivation of the target rule.
    Accept,
    /// The input cannot be derived from the grammar.
    Error,
}

/// A rule paired with a progress marker: `dot` counts the body symbols
/// already recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Item {
    pub rule: usize,
    pub dot: usize,
}

impl Item {
    fn advanced(self) -> Item {
        Item {
            rule: self.rule,
            dot: self.dot + 1,
        }
    }

    fn next_symbol<'a, T, NT>(&self, grammar: &'a Grammar<T, NT>) -> Option<&'a Symbol<T, NT>>
    where
        T: Clone + PartialEq + Eq + Hash,
        NT: Clone + PartialEq + Eq + Hash,
    {
        grammar.rule(self.rule).rhs.get(self.dot)
    }
}

/// A closure-complete set of items, one node of the parsing automaton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSet {
    pub id: usize,
    kernel: IndexSet<Item>,
    closure: IndexSet<Item>,
}

impl ItemSet {
    pub fn kernel(&self) -> impl Iterator<Item = Item> + '_ {
        self.kernel.iter().copied()
    }

    /// All items of the set, kernel first, then closure additions in the
    /// order they were reached.
    pub fn items(&self) -> impl Iterator<Item = Item> + '_ {
        self.closure.iter().copied()
    }

    pub fn contains(&self, item: &Item) -> bool {
        self.closure.contains(item)
    }

    pub fn len(&self) -> usize {
        self.closure.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closure.is_empty()
    }

    /// Renders the set one item per line, closure-only items prefixed with
    /// `+` to tell them apart from the kernel.
    pub fn render<T, NT>(&self, grammar: &Grammar<T, NT>) -> String
    where
        T: Clone + PartialEq + Eq + Hash + fmt::Debug,
        NT: Clone + PartialEq + Eq + Hash + fmt::Display,
    {
        self.closure
            .iter()
            .map(|item| {
                let line = grammar.rule(item.rule).render_with_dot(Some(item.dot));
                if self.kernel.contains(item) {
                    line
                } else {
                    format!(" + {}", line)
                }
            })
            .join("\n")
    }
}

/// The transition function of the automaton, defined exactly for the symbols
/// some item of the source state has its dot before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationTable<T, NT>
where
    T: PartialEq + Eq + Hash,
    NT: PartialEq + Eq + Hash,
{
    transitions: IndexMap<(usize, Symbol<T, NT>), usize>,
}

impl<T, NT> TranslationTable<T, NT>
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash,
{
    pub fn get(&self, state: usize, symbol: &Symbol<T, NT>) -> Option<usize> {
        self.transitions.get(&(state, symbol.clone())).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Symbol<T, NT>, usize)> + '_ {
        self.transitions
            .iter()
            .map(|(key, target)| (key.0, &key.1, *target))
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// Expands a kernel to its closure: whenever an item's dot sits before a
/// non-terminal, every production of that non-terminal joins the set with its
/// dot at the start. Newly reached items are added a round at a time, in rule
/// order.
fn closure<T, NT>(
    grammar: &Grammar<T, NT>,
    kernel: &IndexSet<Item>,
) -> Result<IndexSet<Item>, GrammarError>
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash + fmt::Display,
{
    let mut closed = kernel.clone();
    let mut frontier: Vec<Item> = kernel.iter().copied().collect();
    loop {
        let mut fresh = Vec::new();
        for item in &frontier {
            if let Some(Symbol::NonTerminal(nt)) = item.next_symbol(grammar) {
                let productions = grammar.productions_of(nt).ok_or_else(|| {
                    GrammarError::UndefinedNonTerminal {
                        rule: item.rule,
                        symbol: nt.to_string(),
                    }
                })?;
                for &rule in productions {
                    let start = Item { rule, dot: 0 };
                    if !closed.contains(&start) && !fresh.contains(&start) {
                        fresh.push(start);
                    }
                }
            }
        }
        if fresh.is_empty() {
            return Ok(closed);
        }
        fresh.sort();
        closed.extend(fresh.iter().copied());
        frontier = fresh;
    }
}

fn canonical_key(closure: &IndexSet<Item>) -> Vec<Item> {
    let mut key: Vec<Item> = closure.iter().copied().collect();
    key.sort();
    key
}

/// Builds the canonical collection of item sets reachable from the target
/// rule, together with the transitions discovered along the way.
///
/// State ids are dense and assigned in discovery order: state 0 is the
/// closure of the target item, and remaining states are numbered depth
/// first. Two kernels reaching the same closure share one state.
pub fn canonical_collection<T, NT>(
    grammar: &Grammar<T, NT>,
) -> Result<(Vec<ItemSet>, TranslationTable<T, NT>), GrammarError>
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash + fmt::Display,
{
    grammar.validate()?;

    let mut kernel = IndexSet::new();
    kernel.insert(Item { rule: 0, dot: 0 });
    let closed = closure(grammar, &kernel)?;

    let mut ids: HashMap<Vec<Item>, usize> = HashMap::new();
    ids.insert(canonical_key(&closed), 0);
    let mut sets = vec![ItemSet {
        id: 0,
        kernel,
        closure: closed,
    }];
    let mut transitions = IndexMap::new();
    let mut pending = vec![0];

    while let Some(from) = pending.pop() {
        let items: Vec<Item> = sets[from].closure.iter().copied().collect();

        let mut moves: IndexMap<Symbol<T, NT>, IndexSet<Item>> = IndexMap::new();
        for item in items {
            if let Some(symbol) = item.next_symbol(grammar) {
                moves
                    .entry(symbol.clone())
                    .or_insert_with(IndexSet::new)
                    .insert(item.advanced());
            }
        }

        for (symbol, kernel) in moves {
            let closed = closure(grammar, &kernel)?;
            let key = canonical_key(&closed);
            let to = match ids.get(&key) {
                Some(&id) => id,
                None => {
                    let id = sets.len();
                    ids.insert(key, id);
                    sets.push(ItemSet {
                        id,
                        kernel,
                        closure: closed,
                    });
                    pending.push(id);
                    id
                }
            };
            transitions.insert((from, symbol), to);
        }
    }

    Ok((sets, TranslationTable { transitions }))
}

/// A symbol occurrence tagged with the transition that consumes it, so the
/// same non-terminal met in different automaton contexts is tracked
/// separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TaggedSymbol<T, NT> {
    symbol: Symbol<T, NT>,
    from: usize,
    /// `None` only for the start symbol, which no transition consumes.
    to: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExtendedRule<T, NT> {
    /// Id of the original rule this refines.
    rule: usize,
    lhs: TaggedSymbol<T, NT>,
    rhs: Vec<TaggedSymbol<T, NT>>,
    /// State reached once the whole body has been recognized.
    end_state: usize,
}

/// Refines the grammar by the automaton: every state contributes one rule per
/// production it begins recognizing, with each symbol occurrence tagged by
/// the transition that walks over it.
fn extend_grammar<T, NT>(
    grammar: &Grammar<T, NT>,
    sets: &[ItemSet],
    transitions: &TranslationTable<T, NT>,
) -> Vec<ExtendedRule<T, NT>>
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash,
{
    let mut extended = Vec::new();
    for set in sets {
        for item in set.items().filter(|item| item.dot == 0) {
            let rule = grammar.rule(item.rule);
            let mut state = set.id;
            let mut rhs = Vec::with_capacity(rule.rhs.len());
            for symbol in &rule.rhs {
                // The transition exists for every symbol the dot walks over.
                let to = transitions.get(state, symbol).unwrap();
                rhs.push(TaggedSymbol {
                    symbol: symbol.clone(),
                    from: state,
                    to: Some(to),
                });
                state = to;
            }
            let lhs = TaggedSymbol {
                symbol: Symbol::NonTerminal(rule.lhs.clone()),
                from: set.id,
                to: transitions.get(set.id, &Symbol::NonTerminal(rule.lhs.clone())),
            };
            extended.push(ExtendedRule {
                rule: item.rule,
                lhs,
                rhs,
                end_state: state,
            });
        }
    }
    extended
}

type FirstSets<T, NT> = HashMap<TaggedSymbol<T, NT>, (IndexSet<T>, bool)>;
type FollowSets<T, NT> = HashMap<TaggedSymbol<T, NT>, IndexSet<Option<T>>>;

/// FIRST of every tagged non-terminal, paired with its nullability.
fn first_sets<T, NT>(extended: &[ExtendedRule<T, NT>]) -> FirstSets<T, NT>
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash,
{
    let mut firsts: FirstSets<T, NT> = HashMap::new();
    for rule in extended {
        firsts
            .entry(rule.lhs.clone())
            .or_insert_with(|| (IndexSet::new(), false));
    }
    loop {
        let mut changed = false;
        for rule in extended {
            let (first, nullable) = first_of_seq(&rule.rhs, &firsts);
            let entry = firsts.get_mut(&rule.lhs).unwrap();
            for t in first {
                changed |= entry.0.insert(t);
            }
            if nullable && !entry.1 {
                entry.1 = true;
                changed = true;
            }
        }
        if !changed {
            return firsts;
        }
    }
}

/// Terminals that can begin a derivation of `seq`, and whether `seq` can
/// derive the empty string. A nullable symbol lets the computation continue
/// with the symbol after it.
fn first_of_seq<T, NT>(
    seq: &[TaggedSymbol<T, NT>],
    firsts: &FirstSets<T, NT>,
) -> (IndexSet<T>, bool)
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash,
{
    let mut first = IndexSet::new();
    for tagged in seq {
        match &tagged.symbol {
            Symbol::Terminal(t) => {
                first.insert(t.clone());
                return (first, false);
            }
            Symbol::Eof => return (first, false),
            Symbol::NonTerminal(_) => {
                let nullable = match firsts.get(tagged) {
                    Some((set, nullable)) => {
                        first.extend(set.iter().cloned());
                        *nullable
                    }
                    None => false,
                };
                if !nullable {
                    return (first, false);
                }
            }
        }
    }
    (first, true)
}

/// FOLLOW sets over the refined grammar. `None` stands for the end of the
/// input; only the start symbol is seeded with it.
fn follow_sets<T, NT>(extended: &[ExtendedRule<T, NT>]) -> FollowSets<T, NT>
where
    T: Clone + PartialEq + Eq + Hash,
    NT: Clone + PartialEq + Eq + Hash,
{
    let firsts = first_sets(extended);

    let mut follows: FollowSets<T, NT> = HashMap::new();
    for rule in extended {
        let entry = follows.entry(rule.lhs.clone()).or_insert_with(IndexSet::new);
        if rule.rule == 0 {
            entry.insert(None);
        }
    }

    loop {
        let mut changed = false;
        for rule in extended {
            for (i, tagged) in rule.rhs.iter().enumerate() {
                if !matches!(tagged.symbol, Symbol::NonTerminal(_)) {
                    continue;
                }
                let (first, nullable) = first_of_seq(&rule.rhs[i + 1..], &firsts);
                let inherited = if nullable {
                    follows.get(&rule.lhs).cloned().unwrap_or_default()
                } else {
                    IndexSet::new()
                };
                let entry = follows.entry(tagged.clone()).or_insert_with(IndexSet::new);
                for t in first {
                    changed |= entry.insert(Some(t));
                }
                for lookahead in inherited {
                    changed |= entry.insert(lookahead);
                }
            }
        }
        if !changed {
            return follows;
        }
    }
}

/// Two live actions claiming the same table cell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error(
        "state {state}: shift/reduce conflict on {symbol}: \
         shift to state {shift} or reduce by rule {reduce}"
    )]
    ShiftReduce {
        state: usize,
        symbol: String,
        shift: usize,
        reduce: usize,
    },
    #[error("state {state}: reduce/reduce conflict on {symbol} between rules {first} and {second}")]
    ReduceReduce {
        state: usize,
        symbol: String,
        first: usize,
        second: usize,
    },
}

/// Every conflict found across the whole table, reported in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport(pub Vec<Conflict>);

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join("\n"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error("the grammar is not deterministic:\n{0}")]
    Conflicts(ConflictReport),
    #[error("no state completes the target rule")]
    MissingAcceptState,
}

/// The complete `(state, symbol) → action` mapping driving a shift-reduce
/// parser. Built once from a grammar, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTable<T, NT>
where
    T: PartialEq + Eq + Hash,
    NT: PartialEq + Eq + Hash,
{
    actions: IndexMap<(usize, Symbol<T, NT>), Action>,
    state_count: usize,
}

impl<T, NT> ActionTable<T, NT>
where
    T: Clone + PartialEq + Eq + Hash + fmt::Debug,
    NT: Clone + PartialEq + Eq + Hash + fmt::Display,
{
    /// Runs the whole pipeline: canonical collection, grammar refinement,
    /// FOLLOW computation, then table assembly. Every conflict found while
    /// filling the table is gathered before failing.
    pub fn build(grammar: &Grammar<T, NT>) -> Result<Self, BuildError> {
        let (sets, transitions) = canonical_collection(grammar)?;
        let extended = extend_grammar(grammar, &sets, &transitions);
        let follows = follow_sets(&extended);

        let mut actions = IndexMap::new();
        for (from, symbol, to) in transitions.iter() {
            let action = match symbol {
                Symbol::NonTerminal(_) => Action::Goto(to),
                Symbol::Terminal(_) | Symbol::Eof => Action::Shift(to),
            };
            actions.insert((from, symbol.clone()), action);
        }

        let done = Item {
            rule: 0,
            dot: grammar.target_rule().rhs.len(),
        };
        let mut accepts = false;
        for set in &sets {
            if set.contains(&done) {
                actions.insert((set.id, Symbol::Eof), Action::Accept);
                accepts = true;
            }
        }
        if !accepts {
            return Err(BuildError::MissingAcceptState);
        }

        // Lookaheads of extended rules refining the same rule and completing
        // in the same state are merged before installation.
        let mut reductions: IndexMap<(usize, usize), IndexSet<Option<T>>> = IndexMap::new();
        for rule in &extended {
            if rule.rule == 0 {
                continue;
            }
            reductions
                .entry((rule.end_state, rule.rule))
                .or_insert_with(IndexSet::new)
                .extend(follows[&rule.lhs].iter().cloned());
        }

        let mut conflicts = Vec::new();
        for ((state, rule), lookaheads) in reductions {
            for lookahead in lookaheads {
                let symbol = match lookahead {
                    Some(t) => Symbol::Terminal(t),
                    None => Symbol::Eof,
                };
                match actions.get(&(state, symbol.clone())).copied() {
                    Some(Action::Shift(shift)) => conflicts.push(Conflict::ShiftReduce {
                        state,
                        symbol: symbol.to_string(),
                        shift,
                        reduce: rule,
                    }),
                    Some(Action::Reduce(other)) if other != rule => {
                        conflicts.push(Conflict::ReduceReduce {
                            state,
                            symbol: symbol.to_string(),
                            first: other,
                            second: rule,
                        })
                    }
                    // The accepting state stands for a reduction by the
                    // target rule.
                    Some(Action::Accept) => conflicts.push(Conflict::ReduceReduce {
                        state,
                        symbol: symbol.to_string(),
                        first: 0,
                        second: rule,
                    }),
                    Some(Action::Reduce(_)) | Some(Action::Goto(_)) | Some(Action::Error) => {}
                    None => {
                        actions.insert((state, symbol), Action::Reduce(rule));
                    }
                }
            }
        }
        if !conflicts.is_empty() {
            return Err(BuildError::Conflicts(ConflictReport(conflicts)));
        }

        Ok(ActionTable {
            actions,
            state_count: sets.len(),
        })
    }

    /// The single query surface: exactly one action per `(state, symbol)`
    /// pair, with [`Action::Error`] standing in for empty cells.
    pub fn get_action(&self, state: usize, symbol: &Symbol<T, NT>) -> Action {
        self.actions
            .get(&(state, symbol.clone()))
            .copied()
            .unwrap_or(Action::Error)
    }

    pub fn state_count(&self) -> usize {
        self.state_count
    }
}

#[cfg(feature = "print_table")]
impl<T, NT> ActionTable<T, NT>
where
    T: Clone + PartialEq + Eq + Hash + fmt::Debug,
    NT: Clone + PartialEq + Eq + Hash + fmt::Display,
{
    /// Prints the action table and the goto table to stdout.
    pub fn print_tables(&self) {
        use prettytable::{Attr, Cell, Row, Table};

        let mut terminals = IndexSet::new();
        let mut non_terminals = IndexSet::new();
        for ((_, symbol), action) in &self.actions {
            match action {
                Action::Goto(_) => {
                    non_terminals.insert(symbol.clone());
                }
                _ => {
                    terminals.insert(symbol.clone());
                }
            }
        }

        let mut action_table = Table::new();
        let mut header = vec![Cell::new("Action")
            .with_style(Attr::Bold)
            .with_style(Attr::Italic(true))];
        header.extend(
            terminals
                .iter()
                .map(|s| Cell::new(&s.to_string()).with_style(Attr::Bold)),
        );
        action_table.add_row(Row::new(header));

        let mut goto_table = Table::new();
        let mut header = vec![Cell::new("Goto")
            .with_style(Attr::Bold)
            .with_style(Attr::Italic(true))];
        header.extend(
            non_terminals
                .iter()
                .map(|s| Cell::new(&s.to_string()).with_style(Attr::Bold)),
        );
        goto_table.add_row(Row::new(header));

        for state in 0..self.state_count {
            let mut row = vec![Cell::new(&state.to_string())];
            for symbol in &terminals {
                row.push(match self.get_action(state, symbol) {
                    Action::Shift(to) => Cell::new(&format!("s{}", to)),
                    Action::Reduce(rule) => Cell::new(&format!("r{}", rule)),
                    Action::Accept => Cell::new("acc"),
                    _ => Cell::new(""),
                });
            }
            action_table.add_row(Row::new(row));

            let mut row = vec![Cell::new(&state.to_string())];
            for symbol in &non_terminals {
                row.push(match self.get_action(state, symbol) {
                    Action::Goto(to) => Cell::new(&to.to_string()),
                    _ => Cell::new(""),
                });
            }
            goto_table.add_row(Row::new(row));
        }

        action_table.printstd();
        goto_table.printstd();
    }
}
