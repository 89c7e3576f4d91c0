//! symmatch - pattern matching and term rewriting core
//!
//! This library implements the rule-application core of a symbolic
//! computation engine: given a subject expression and a rule pattern it
//! decides whether the pattern matches, binds pattern variables, and
//! produces the substituted replacement. The matcher performs full
//! backtracking search over associative (flat), symmetric (commutative),
//! repeated and optional sub-patterns.
//!
//! # Architecture
//!
//! Matching is split into four cooperating pieces (`engine` module):
//!
//! 1. **Analysis** (`engine::analyze`) - computes how many flattened
//!    sibling arguments each sub-pattern may consume and in which order
//!    candidate counts should be tried (greedy or lazy).
//!
//! 2. **Specificity ordering** (`engine::compare`) - a total order over
//!    patterns used to sort a symbol's rewrite rules so the most
//!    specific rule is attempted first.
//!
//! 3. **Matching** (`engine::matcher`) - the recursive backtracking
//!    matcher over a working pattern that is progressively rewritten to
//!    `Found` markers as variables bind; each bind is validated by
//!    re-matching the whole pattern against the top subject.
//!
//! 4. **Substitution** (`engine::subst`, internal) - instantiates the
//!    rule's right-hand side from the bindings, splicing sequences into
//!    parent argument lists, alpha-renaming scoped bodies to avoid
//!    capture, resolving `OptionValue` forms and evaluating a trailing
//!    `Condition` that can still veto the match.
//!
//! The expression model (`expr` module) is an immutable, reference
//! counted tree with structural equality; the host evaluator is reached
//! only through the `engine::EvalContext` trait (symbol attributes,
//! embedded test evaluation, cooperative abort).
//!
//! # Example
//!
//! ```rust
//! use symmatch::{heads, pattern_match, Expr, StaticContext};
//!
//! // f(x: ~) applied to f(21), rewriting to Times(x, 2)
//! let ctx = StaticContext::new();
//! let subject = Expr::call_to("f", vec![Expr::int(21)]);
//! let pattern = Expr::call_to(
//!     "f",
//!     vec![Expr::call_to(
//!         heads::PATTERN,
//!         vec![
//!             Expr::symbol("x"),
//!             Expr::call_to(heads::SINGLE_MATCH, vec![]),
//!         ],
//!     )],
//! );
//! let mut rhs = Some(Expr::call_to(
//!     "Times",
//!     vec![Expr::symbol("x"), Expr::int(2)],
//! ));
//!
//! assert!(pattern_match(&ctx, &subject, &pattern, &mut rhs));
//! assert_eq!(
//!     rhs.unwrap(),
//!     Expr::call_to("Times", vec![Expr::int(21), Expr::int(2)]),
//! );
//! ```

pub mod engine;
pub mod expr;

pub use engine::{
    is_constant_pattern, pattern_compare, pattern_match, validate_pattern, EvalContext,
    StaticContext,
};
pub use expr::{heads, Attributes, Call, Expr};
