//! Multiplicity analysis: how many flattened sibling arguments a
//! sub-pattern may consume, and in which order candidate counts should
//! be tried.
//!
//! The matcher consults this before each pattern slot of a compound.
//! `min`/`max` bound the argument window (with [`UNBOUNDED`] as the
//! saturation sentinel), `longest` selects greedy versus lazy count
//! order, `no_sequence` asks for consumed ranges to stay under the
//! enclosing associative head instead of being splice-wrapped, and
//! `prefer_nonempty` makes a lazy optional slot try a present argument
//! before its default.

use smallvec::SmallVec;

use crate::expr::{heads, Expr};

/// Saturation sentinel for "no upper bound".
pub const UNBOUNDED: usize = usize::MAX;

/// Result of analyzing one sub-pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Multiplicity {
    pub min: usize,
    pub max: usize,
    pub no_sequence: bool,
    pub longest: bool,
    pub prefer_nonempty: bool,
}

impl Default for Multiplicity {
    fn default() -> Self {
        Multiplicity {
            min: 1,
            max: 1,
            no_sequence: false,
            longest: true,
            prefer_nonempty: false,
        }
    }
}

/// Context the analysis runs in: the head of the compound currently
/// being matched and whether that head is associative.
#[derive(Clone, Copy, Default)]
pub struct AnalyzeScope<'a> {
    pub parent_head: Option<&'a Expr>,
    pub associative: bool,
}

fn saturating_mul(a: usize, b: usize) -> usize {
    if a == UNBOUNDED || b == UNBOUNDED {
        // 0 * unbounded stays 0
        if a == 0 || b == 0 {
            return 0;
        }
        return UNBOUNDED;
    }
    a.checked_mul(b).unwrap_or(UNBOUNDED)
}

fn saturating_add(a: usize, b: usize) -> usize {
    a.checked_add(b).unwrap_or(UNBOUNDED)
}

/// Extract a `(min, max)` repetition window from a `Repeated` range
/// argument: `Range(a, b)` with integer/`Infinity`/`Automatic` bounds,
/// a bare non-negative integer `n` meaning exactly `n`, or `Infinity`.
///
/// Returns `None` for anything else; callers degrade that to non-match.
pub(crate) fn extract_range(range: &Expr, default_min: usize, default_max: usize) -> Option<(usize, usize)> {
    fn bound(expr: &Expr, default: usize) -> Option<usize> {
        if expr.is_symbol(heads::AUTOMATIC) {
            return Some(default);
        }
        if expr.is_symbol(heads::INFINITY) {
            return Some(UNBOUNDED);
        }
        match expr {
            Expr::Int(n) if *n >= 0 => Some(*n as usize),
            _ => None,
        }
    }

    if let Some(call) = range.call_of_len(heads::RANGE, 2) {
        let min = bound(&call.args[0], default_min)?;
        let max = bound(&call.args[1], default_max)?;
        return Some((min, max));
    }

    let n = bound(range, default_max)?;
    Some((n, n))
}

/// Analyze one sub-pattern bottom-up, mirroring the matcher's case
/// dispatch over recognized heads.
pub fn analyze(pat: &Expr, scope: AnalyzeScope<'_>) -> Multiplicity {
    let mut out = Multiplicity::default();

    let Some(call) = pat.as_call() else {
        return out;
    };
    let len = call.args.len();
    let Some(head) = call.head.symbol_name() else {
        return out;
    };

    match head {
        heads::REPEATED if len == 2 => {
            let inner_scope = AnalyzeScope {
                parent_head: scope.parent_head,
                associative: false,
            };
            out = analyze(&call.args[0], inner_scope);

            let (rep_min, rep_max) =
                extract_range(&call.args[1], 1, UNBOUNDED).unwrap_or((1, UNBOUNDED));
            out.min = saturating_mul(out.min, rep_min);
            out.max = saturating_mul(out.max, rep_max);
            out.no_sequence = false;
        }
        heads::PATTERN if len == 2 => {
            out = analyze(&call.args[1], scope);
        }
        heads::FOUND if len == 1 || len == 2 => {
            // An already-bound occurrence consumes exactly what was bound.
            let value = &call.args[0];
            if let Some(value_head) = value.head() {
                if scope.associative && Some(value_head) == scope.parent_head {
                    out.min = value.length();
                    out.max = value.length();
                    out.no_sequence = true;
                } else if value.is_splice() {
                    out.min = value.length();
                    out.max = value.length();
                }
            }
        }
        heads::TEST_PATTERN if len == 2 => {
            out = analyze(&call.args[0], scope);
        }
        heads::HOLD_PATTERN if len == 1 => {
            out = analyze(&call.args[0], scope);
        }
        heads::ALTERNATIVES if len > 0 => {
            let mut min = UNBOUNDED;
            let mut max = 0;
            for branch in &call.args {
                let branch_out = analyze(branch, scope);
                min = min.min(branch_out.min);
                max = max.max(branch_out.max);
            }
            out.min = min;
            out.max = max;
        }
        heads::PATTERN_SEQUENCE => {
            out.min = 0;
            out.max = 0;
            for element in &call.args {
                let element_out = analyze(element, scope);
                out.min = saturating_add(out.min, element_out.min);
                out.max = saturating_add(out.max, element_out.max);
            }
        }
        heads::LITERAL => {
            out.min = len;
            out.max = len;
        }
        heads::OPTIONS_PATTERN if len <= 1 => {
            out.min = 0;
            out.max = UNBOUNDED;
        }
        heads::SINGLE_MATCH if len <= 1 && scope.associative => {
            // A bare blank under a flat head consumes as few flattened
            // siblings as possible.
            out.max = UNBOUNDED;
            out.no_sequence = true;
            out.longest = false;
        }
        heads::OPTIONAL if len == 1 || len == 2 => {
            out.min = 0;
            out.prefer_nonempty = true;
        }
        heads::LONGEST if len == 1 => {
            out = analyze(&call.args[0], scope);
            out.longest = true;
        }
        heads::SHORTEST if len == 1 => {
            out = analyze(&call.args[0], scope);
            out.longest = false;
        }
        heads::EXCEPT if len == 2 => {
            out = analyze(&call.args[1], scope);
        }
        _ => {}
    }

    out
}

/// Candidate consumed-counts for one pattern slot, in preference order.
///
/// Greedy slots run `max..=min`; lazy optional slots try present
/// arguments `1..max` before falling back to the empty count; everything
/// else runs `min..=max`. The final element is the preferred boundary:
/// the matcher commits eagerly when it succeeds there, skipping the
/// redundant retry.
pub(crate) fn candidate_counts(m: &Multiplicity) -> SmallVec<[usize; 8]> {
    let mut counts = SmallVec::new();
    if m.min > m.max {
        return counts;
    }
    debug_assert!(m.max != UNBOUNDED, "candidate_counts needs a clamped window");

    if m.longest {
        let mut n = m.max;
        loop {
            counts.push(n);
            if n == m.min {
                break;
            }
            n -= 1;
        }
    } else if m.prefer_nonempty && m.min == 0 {
        counts.extend(1..m.max);
        counts.push(0);
    } else {
        counts.extend(m.min..=m.max);
    }
    counts
}
