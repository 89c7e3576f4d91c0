//! Immutable expression model shared by the matcher, comparator and
//! substitution engine.
//!
//! An [`Expr`] is either atomic (symbol, integer, string) or compound
//! (a head expression applied to an ordered argument list). Compound
//! nodes are reference counted, so cloning an expression is cheap and
//! rewritten trees share all unmodified subtrees with their originals.
//!
//! Equality is structural, and the derived total order (atoms before
//! compounds, then by content) is the structural order used by the
//! pattern comparator for tie-breaking.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

/// Well-known head symbols recognized by the matching engine.
///
/// The `Internal.*` names are synthetic markers produced by the engine
/// itself and are never expected to occur in user-built patterns.
pub mod heads {
    pub const ALTERNATIVES: &str = "Alternatives";
    pub const ASSIGN: &str = "Assign";
    pub const ASSIGN_DELAYED: &str = "AssignDelayed";
    pub const AUTOMATIC: &str = "Automatic";
    pub const CONDITION: &str = "Condition";
    pub const DEFAULT: &str = "Default";
    pub const EVALUATION_SEQUENCE: &str = "EvaluationSequence";
    pub const EXCEPT: &str = "Except";
    pub const FUNCTION: &str = "Function";
    pub const HOLD_PATTERN: &str = "HoldPattern";
    pub const INFINITY: &str = "Infinity";
    pub const KEY_VALUE_PATTERN: &str = "KeyValuePattern";
    pub const LIST: &str = "List";
    pub const LITERAL: &str = "Literal";
    pub const LOCAL: &str = "Local";
    pub const LONGEST: &str = "Longest";
    pub const OPTIONAL: &str = "Optional";
    pub const OPTIONS_PATTERN: &str = "OptionsPattern";
    pub const OPTION_VALUE: &str = "OptionValue";
    pub const PATTERN: &str = "Pattern";
    pub const PATTERN_SEQUENCE: &str = "PatternSequence";
    pub const RANGE: &str = "Range";
    pub const REPEATED: &str = "Repeated";
    pub const RULE: &str = "Rule";
    pub const RULE_DELAYED: &str = "RuleDelayed";
    pub const SEQUENCE: &str = "Sequence";
    pub const SHORTEST: &str = "Shortest";
    pub const SINGLE_MATCH: &str = "SingleMatch";
    pub const TEST_PATTERN: &str = "TestPattern";
    pub const TRUE: &str = "True";
    pub const WITH: &str = "With";

    /// Marker for an already-bound pattern occurrence in the working
    /// pattern: `Internal.Found(value)` or `Internal.Found(value, sub)`.
    pub const FOUND: &str = "Internal.Found";
    /// Sequence-splice marker: wraps zero or more values that expand in
    /// place when substituted into a parent argument list.
    pub const SPLICE: &str = "Internal.Sequence";
    /// Marked form of a trailing right-hand-side condition, handed to the
    /// evaluator and unwrapped afterwards.
    pub const GUARDED: &str = "Internal.Condition";
}

/// Attribute bits of a head symbol, as reported by the
/// [`EvalContext`](crate::engine::EvalContext) collaborator.
///
/// The bits are read as a snapshot once per matching step; a concurrent
/// change of a symbol's attributes mid-match is a best-effort race and
/// must never corrupt matcher state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attributes(u8);

impl Attributes {
    pub const NONE: Attributes = Attributes(0);
    /// `f(a, f(b, c))` is flattened to `f(a, b, c)`; matching such heads
    /// may consume a contiguous sub-range of siblings.
    pub const ASSOCIATIVE: Attributes = Attributes(1);
    /// Argument order is irrelevant; matching may consume any
    /// non-overlapping subset of siblings per pattern slot.
    pub const SYMMETRIC: Attributes = Attributes(2);
    /// `f(x)` and bare `x` match interchangeably against a pattern with
    /// head `f`.
    pub const ONE_IDENTITY: Attributes = Attributes(4);

    pub fn contains(self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Attributes {
    type Output = Attributes;

    fn bitor(self, rhs: Attributes) -> Attributes {
        Attributes(self.0 | rhs.0)
    }
}

/// A compound expression: a head applied to an ordered argument list.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Call {
    pub head: Expr,
    pub args: Vec<Expr>,
}

/// A symbolic expression.
///
/// Atoms are symbols, integers and strings; everything else is a [`Call`].
/// The derived order sorts atoms before compounds and is total, which is
/// all the comparator requires of the structural order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expr {
    /// A symbol such as `Plus` or a pattern-variable name.
    Symbol(Arc<str>),
    /// A machine integer literal.
    Int(i64),
    /// A string literal.
    Str(Arc<str>),
    /// A compound expression `head(arg1, ..., argN)`, length >= 0.
    Call(Arc<Call>),
}

impl Expr {
    pub fn symbol(name: impl Into<Arc<str>>) -> Expr {
        Expr::Symbol(name.into())
    }

    pub fn int(value: i64) -> Expr {
        Expr::Int(value)
    }

    pub fn string(value: impl Into<Arc<str>>) -> Expr {
        Expr::Str(value.into())
    }

    pub fn call(head: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call(Arc::new(Call { head, args }))
    }

    /// Shorthand for a compound with a symbolic head.
    pub fn call_to(head: &str, args: Vec<Expr>) -> Expr {
        Expr::call(Expr::symbol(head), args)
    }

    /// A sequence-splice wrapping the given values.
    pub fn splice(items: Vec<Expr>) -> Expr {
        Expr::call_to(heads::SPLICE, items)
    }

    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            Expr::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_symbol(&self, name: &str) -> bool {
        matches!(self, Expr::Symbol(s) if &**s == name)
    }

    pub fn as_call(&self) -> Option<&Call> {
        match self {
            Expr::Call(call) => Some(call),
            _ => None,
        }
    }

    /// The head of a compound expression, `None` for atoms.
    pub fn head(&self) -> Option<&Expr> {
        self.as_call().map(|call| &call.head)
    }

    /// Number of arguments; atoms have length 0.
    pub fn length(&self) -> usize {
        self.as_call().map_or(0, |call| call.args.len())
    }

    /// The `i`-th argument (0-based), `None` for atoms or out of range.
    pub fn arg(&self, i: usize) -> Option<&Expr> {
        self.as_call().and_then(|call| call.args.get(i))
    }

    /// Argument slice; empty for atoms.
    pub fn args(&self) -> &[Expr] {
        match self {
            Expr::Call(call) => &call.args,
            _ => &[],
        }
    }

    /// True for a compound whose head is the symbol `head`.
    pub fn is_call_to(&self, head: &str) -> bool {
        self.as_call().is_some_and(|call| call.head.is_symbol(head))
    }

    /// The compound's [`Call`] if its head is the symbol `head` and its
    /// argument count is `len`.
    pub fn call_of_len(&self, head: &str, len: usize) -> Option<&Call> {
        self.as_call()
            .filter(|call| call.head.is_symbol(head) && call.args.len() == len)
    }

    pub fn is_splice(&self) -> bool {
        self.is_call_to(heads::SPLICE)
    }

    pub fn is_empty_splice(&self) -> bool {
        self.call_of_len(heads::SPLICE, 0).is_some()
    }

    /// Structural head used by typed `SingleMatch`: the head expression
    /// for compounds, the type symbol for atoms.
    pub fn structural_head(&self) -> Expr {
        match self {
            Expr::Symbol(_) => Expr::symbol("Symbol"),
            Expr::Int(_) => Expr::symbol("Integer"),
            Expr::Str(_) => Expr::symbol("String"),
            Expr::Call(call) => call.head.clone(),
        }
    }

    /// A copy of this compound with a different head; atoms are wrapped
    /// as `head()` with no arguments.
    pub fn with_head(&self, head: Expr) -> Expr {
        match self.as_call() {
            Some(call) => Expr::call(head, call.args.to_vec()),
            None => Expr::call(head, Vec::new()),
        }
    }

    /// True when both expressions are the same node, not merely equal.
    ///
    /// Compounds compare by allocation identity; atoms fall back to
    /// structural equality (they carry no identity of their own).
    pub fn same_node(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Call(a), Expr::Call(b)) => Arc::ptr_eq(a, b),
            _ => self == other,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Symbol(name) => write!(f, "{}", name),
            Expr::Int(value) => write!(f, "{}", value),
            Expr::Str(value) => write!(f, "\"{}\"", value),
            Expr::Call(call) => {
                write!(f, "{}({})", call.head, call.args.iter().format(", "))
            }
        }
    }
}
