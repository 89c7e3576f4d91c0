//! Collaborator seam between the matching core and its host evaluator.
//!
//! The matcher itself never parses, stores or evaluates general
//! expressions. Everything it needs from the surrounding engine is
//! behind [`EvalContext`]: symbol attribute bits, evaluation of the
//! test/condition forms embedded in patterns, and the cooperative
//! abort flag polled after each such evaluation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::expr::{Attributes, Expr};

/// Services the matcher consumes from its host.
pub trait EvalContext {
    /// Snapshot of a symbol's attribute bits.
    ///
    /// Read once per matching step; the returned value stays in use for
    /// that step even if the host changes the attributes concurrently.
    fn attributes(&self, symbol: &str) -> Attributes;

    /// Evaluate an embedded form: a `TestPattern` predicate call, a
    /// `Condition` guard, an `Optional` positional `Default(h, i, n)`
    /// query, or a substituted right-hand side carrying a trailing
    /// condition.
    fn evaluate(&self, expr: Expr) -> Expr;

    /// Cooperative cancellation. Polled after each [`evaluate`] call;
    /// when true, the matcher unwinds promptly instead of continuing
    /// combinatorial search.
    ///
    /// [`evaluate`]: EvalContext::evaluate
    fn is_aborting(&self) -> bool {
        false
    }
}

/// Minimal [`EvalContext`] backed by a static attribute table and an
/// optional evaluator callback.
///
/// Suitable for embedding the matcher without a full evaluator (patterns
/// without `TestPattern`/`Condition` never call the evaluator) and for
/// tests, which install a small callback and share the abort flag.
#[derive(Default)]
pub struct StaticContext {
    attributes: HashMap<String, Attributes>,
    evaluator: Option<Box<dyn Fn(Expr) -> Expr + Send + Sync>>,
    aborting: Arc<AtomicBool>,
}

impl StaticContext {
    pub fn new() -> Self {
        StaticContext::default()
    }

    /// Declare a symbol's attributes, replacing any previous declaration.
    pub fn declare(&mut self, symbol: &str, attributes: Attributes) {
        self.attributes.insert(symbol.to_string(), attributes);
    }

    /// Install the evaluator callback used for embedded forms.
    pub fn with_evaluator(
        mut self,
        evaluator: impl Fn(Expr) -> Expr + Send + Sync + 'static,
    ) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    /// Shared handle to the abort flag; setting it to true cancels any
    /// match currently using this context.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.aborting.clone()
    }
}

impl EvalContext for StaticContext {
    fn attributes(&self, symbol: &str) -> Attributes {
        self.attributes
            .get(symbol)
            .copied()
            .unwrap_or(Attributes::NONE)
    }

    fn evaluate(&self, expr: Expr) -> Expr {
        match &self.evaluator {
            Some(evaluator) => evaluator(expr),
            None => expr,
        }
    }

    fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::Relaxed)
    }
}
