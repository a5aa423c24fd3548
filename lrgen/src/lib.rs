//! Generation of deterministic shift-reduce parsing tables from declarative
//! context-free grammars.
//!
//! A [`Grammar`] is a list of numbered rules whose first entry is the target
//! rule. [`ActionTable::build`] turns it into the canonical collection of
//! automaton states, refines the grammar by transition context to compute
//! precise reduce lookaheads, and assembles the `(state, symbol) → action`
//! table a driving parser consumes through [`ActionTable::get_action`].

pub mod grammar;
pub mod parse_table;

pub use grammar::{Grammar, GrammarError, Rule, Symbol};
pub use parse_table::{
    canonical_collection, Action, ActionTable, BuildError, Conflict, ConflictReport, Item,
    ItemSet, TranslationTable,
};
