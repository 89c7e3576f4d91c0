// Matching engine: analysis, specificity ordering, the backtracking
// matcher and the binding/substitution machinery behind it.
//
// The public surface is small: `pattern_match` decides a match and
// instantiates a replacement, `pattern_compare` orders rules by
// specificity, `is_constant_pattern` flags hash-dispatch eligibility
// and `validate_pattern` rejects unusable patterns up front.

pub mod analyze;
pub mod compare;
pub mod context;
pub mod matcher;
mod subst;

pub use analyze::{analyze, AnalyzeScope, Multiplicity, UNBOUNDED};
pub use compare::{is_constant_pattern, pattern_compare};
pub use context::{EvalContext, StaticContext};
pub use matcher::{pattern_match, validate_pattern};
