//! The recursive backtracking matcher.
//!
//! A single [`pattern_match`] call owns a [`MatchState`]: the working
//! pattern (progressively rewritten to `Found` markers as variables
//! bind), the variable bindings, the deferred option sets, and the
//! bookkeeping for associative windows and symmetric argument usage.
//!
//! Matching is a three-valued search. `Local` reports leaf success that
//! the caller still has to sequence with sibling slots; `NoMatch` lets
//! the caller try other candidate counts, subsets or branches; `Global`
//! means a nested binding was validated by re-matching the whole
//! pattern against the top subject, so every ancestor stops searching
//! and unwinds immediately.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::engine::analyze::{analyze, candidate_counts, extract_range, AnalyzeScope, Multiplicity, UNBOUNDED};
use crate::engine::compare::is_constant_pattern;
use crate::engine::context::EvalContext;
use crate::engine::subst;
use crate::expr::{heads, Attributes, Call, Expr};

/// Hard bound on match recursion; deeper branches degrade to non-match
/// instead of exhausting the stack.
const MAX_MATCH_DEPTH: usize = 1024;

/// Tri-state result of one matching step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatchKind {
    /// No match at this level; the caller may try other candidates.
    NoMatch,
    /// This atom matched; continue the normal sibling search.
    Local,
    /// A nested binding re-ran and fully validated the top-level match;
    /// unwind without further search.
    Global,
}

use MatchKind::{Global, Local, NoMatch};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ArgUse {
    Free,
    Used,
    Testing,
}

#[derive(Clone)]
struct Binding {
    name: Expr,
    value: Expr,
    /// The sub-pattern the name first matched with; an equal later
    /// occurrence skips the redundant re-match.
    first_pattern: Option<Expr>,
}

/// Per-call mutable state, created fresh by [`pattern_match`] and
/// restored around every speculative bind.
struct MatchState<'a> {
    ctx: &'a dyn EvalContext,
    /// Working pattern; rewritten to `Found` markers as variables bind.
    pattern: Expr,
    /// The top subject expression; never mutated.
    subject: Expr,
    /// Head of the compound currently being matched.
    current_head: Option<Expr>,
    bindings: SmallVec<[Binding; 8]>,
    /// Deferred `OptionsPattern` sets: (function head, rule set).
    options: SmallVec<[(Expr, Expr); 2]>,
    /// Consumed range of the top subject under an associative head,
    /// 1-based inclusive.
    assoc_start: usize,
    assoc_end: usize,
    /// Final argument usage of the top subject under a symmetric head.
    arg_usage: Vec<ArgUse>,
    associative: bool,
    symmetric: bool,
    depth: usize,
}

/// Match `pattern` against `subject`.
///
/// On success, `rhs` (if present) is replaced by the fully substituted
/// and condition-validated replacement; on failure both `rhs` and
/// `subject` are left untouched.
pub fn pattern_match(
    ctx: &dyn EvalContext,
    subject: &Expr,
    pattern: &Expr,
    rhs: &mut Option<Expr>,
) -> bool {
    let mut state = MatchState {
        ctx,
        pattern: pattern.clone(),
        subject: subject.clone(),
        current_head: None,
        bindings: SmallVec::new(),
        options: SmallVec::new(),
        assoc_start: 1,
        assoc_end: usize::MAX,
        arg_usage: Vec::new(),
        associative: false,
        symmetric: false,
        depth: 0,
    };

    let subject_len = subject.length();
    if let Some(head) = subject.head().and_then(Expr::symbol_name) {
        let attrs = ctx.attributes(head);
        state.associative = attrs.contains(Attributes::ASSOCIATIVE);
        if attrs.contains(Attributes::SYMMETRIC) {
            // Everything counts as consumed until the combinatorial
            // matcher records an actual usage vector; a match that
            // succeeds without one (constant equality, a whole-subject
            // binding) leaves no arguments over.
            match usage_scratch(subject_len, ArgUse::Used) {
                Some(usage) => state.arg_usage = usage,
                None => return false,
            }
            state.symmetric = true;
        }
    }

    let top_pattern = state.pattern.clone();
    let top_subject = state.subject.clone();
    let kind = match_atom(&mut state, &top_pattern, &top_subject, 0, 0);

    if kind == NoMatch || ctx.is_aborting() {
        return false;
    }

    let Some(template) = rhs.as_ref() else {
        return true;
    };
    let mut out = template.clone();

    if !state.bindings.is_empty() {
        let pairs: Vec<(Expr, Expr)> = state
            .bindings
            .iter()
            .map(|binding| (binding.name.clone(), binding.value.clone()))
            .collect();
        out = subst::replace_symbols(&out, &pairs);
    }

    if !state.options.is_empty() {
        let default_head = subject.head().cloned();
        out = subst::replace_option_value(&out, default_head.as_ref(), &state.options);
    }

    if subst::mark_trailing_condition(&mut out) {
        out = ctx.evaluate(out);
        let unwrapped = match out.call_of_len(heads::GUARDED, 2) {
            Some(guard) => {
                if !guard.args[1].is_symbol(heads::TRUE) {
                    // Structurally matched, but the trailing guard vetoed it.
                    return false;
                }
                Some(guard.args[0].clone())
            }
            None => None,
        };
        if let Some(body) = unwrapped {
            out = body;
        }
    }

    if out.is_splice() {
        out = out.with_head(Expr::symbol(heads::SEQUENCE));
    }

    if state.symmetric {
        if state.arg_usage.len() == subject_len
            && state.arg_usage.iter().any(|use_| *use_ == ArgUse::Free)
        {
            let mut args = Vec::with_capacity(subject_len);
            let mut placed = false;
            for (i, arg) in subject.args().iter().enumerate() {
                if state.arg_usage[i] == ArgUse::Free {
                    args.push(arg.clone());
                } else if !placed {
                    args.push(out.clone());
                    placed = true;
                }
            }
            out = Expr::call(subject.head().expect("symmetric subject is a compound").clone(), args);
        }
    } else if state.associative
        && state.assoc_start <= state.assoc_end
        && (state.assoc_start > 1 || state.assoc_end < subject_len)
    {
        let mut args = Vec::with_capacity(subject_len);
        for (i, arg) in subject.args().iter().enumerate() {
            let pos = i + 1;
            if pos == state.assoc_start {
                args.push(out.clone());
            } else if pos < state.assoc_start || pos > state.assoc_end {
                args.push(arg.clone());
            }
        }
        out = Expr::call(subject.head().expect("associative subject is a compound").clone(), args);
    }

    *rhs = Some(out);
    true
}

/// Check that every `Pattern(name, sub)` node names a symbol; anything
/// else cannot bind and makes the whole pattern unusable.
pub fn validate_pattern(pattern: &Expr) -> bool {
    let Some(call) = pattern.as_call() else {
        return true;
    };
    if call.head.is_symbol(heads::PATTERN) && call.args.len() == 2 {
        if call.args[0].symbol_name().is_none() {
            debug!("invalid pattern variable name in {}", pattern);
            return false;
        }
        return validate_pattern(&call.args[1]);
    }
    validate_pattern(&call.head) && call.args.iter().all(validate_pattern)
}

fn usage_scratch(len: usize, fill: ArgUse) -> Option<Vec<ArgUse>> {
    let mut usage = Vec::new();
    if usage.try_reserve_exact(len).is_err() {
        debug!("failed to allocate usage scratch ({} slots)", len);
        return None;
    }
    usage.resize(len, fill);
    Some(usage)
}

fn is_top_subject(state: &MatchState, func: &Expr) -> bool {
    func.same_node(&state.subject)
}

fn is_rule(expr: &Expr) -> bool {
    expr.call_of_len(heads::RULE, 2).is_some() || expr.call_of_len(heads::RULE_DELAYED, 2).is_some()
}

fn is_option_set(expr: &Expr) -> bool {
    if is_rule(expr) {
        return true;
    }
    let Some(call) = expr.as_call() else {
        return false;
    };
    call.head.is_symbol(heads::LIST) && call.args.iter().all(is_option_set)
}

fn match_atom(
    state: &mut MatchState,
    pat: &Expr,
    arg: &Expr,
    index_of_arg: usize,
    count_of_arg: usize,
) -> MatchKind {
    if state.depth >= MAX_MATCH_DEPTH {
        debug!("match recursion limit reached; treating branch as non-match");
        return NoMatch;
    }
    state.depth += 1;
    let kind = dispatch_atom(state, pat, arg, index_of_arg, count_of_arg);
    state.depth -= 1;
    kind
}

fn dispatch_atom(
    state: &mut MatchState,
    pat: &Expr,
    arg: &Expr,
    index_of_arg: usize,
    count_of_arg: usize,
) -> MatchKind {
    if pat == arg && is_constant_pattern(pat) {
        return Local;
    }

    let Some(call) = pat.as_call() else {
        return NoMatch;
    };
    let len = call.args.len();
    let head = call.head.symbol_name().unwrap_or("");

    match head {
        heads::SINGLE_MATCH if len == 0 => Local,
        heads::SINGLE_MATCH if len == 1 => {
            if call.args[0] == arg.structural_head() {
                Local
            } else {
                NoMatch
            }
        }
        heads::CONDITION if len == 2 => {
            match_condition(state, call, arg, index_of_arg, count_of_arg)
        }
        heads::TEST_PATTERN if len == 2 => {
            match_test_pattern(state, call, arg, index_of_arg, count_of_arg)
        }
        heads::REPEATED if len == 2 => {
            match_repeated_pattern(state, call, arg, index_of_arg, count_of_arg)
        }
        heads::PATTERN if len == 2 => {
            match_named_pattern(state, pat, arg, index_of_arg, count_of_arg)
        }
        heads::OPTIONAL if len == 1 || len == 2 => {
            match_optional(state, pat, arg, index_of_arg, count_of_arg)
        }
        heads::HOLD_PATTERN | heads::LONGEST | heads::SHORTEST if len == 1 => {
            match_atom(state, &call.args[0], arg, index_of_arg, count_of_arg)
        }
        heads::ALTERNATIVES => {
            for branch in &call.args {
                let kind = match_atom(state, branch, arg, index_of_arg, count_of_arg);
                if kind != NoMatch {
                    return kind;
                }
            }
            NoMatch
        }
        heads::OPTIONS_PATTERN if len <= 1 => match_options_pattern(state, pat, arg),
        heads::LITERAL => match_literal(call, arg),
        heads::PATTERN_SEQUENCE => match_pattern_sequence(state, pat, arg),
        heads::EXCEPT if len == 1 || len == 2 => {
            match_except(state, call, arg, index_of_arg, count_of_arg)
        }
        heads::KEY_VALUE_PATTERN if len <= 1 => match_key_value(state, call, arg),
        heads::FOUND if len == 1 || len == 2 => {
            if &call.args[0] == arg {
                Local
            } else {
                NoMatch
            }
        }
        _ => match_other_function(state, pat, arg),
    }
}

fn match_condition(
    state: &mut MatchState,
    call: &Call,
    arg: &Expr,
    index_of_arg: usize,
    count_of_arg: usize,
) -> MatchKind {
    let kind = match_atom(state, &call.args[0], arg, index_of_arg, count_of_arg);
    if kind != Local {
        return kind;
    }

    // Bound names were substituted into the guard when they bound, so it
    // is a plain value expression by now.
    let verdict = state.ctx.evaluate(call.args[1].clone());
    if state.ctx.is_aborting() {
        return Global;
    }
    if verdict.is_symbol(heads::TRUE) {
        Local
    } else {
        NoMatch
    }
}

fn match_test_pattern(
    state: &mut MatchState,
    call: &Call,
    arg: &Expr,
    index_of_arg: usize,
    count_of_arg: usize,
) -> MatchKind {
    let kind = match_atom(state, &call.args[0], arg, index_of_arg, count_of_arg);
    if kind != Local {
        return kind;
    }

    // A consumed sequence becomes the predicate's argument list.
    let test = if arg.is_splice() {
        arg.with_head(call.args[1].clone())
    } else {
        Expr::call(call.args[1].clone(), vec![arg.clone()])
    };
    let verdict = state.ctx.evaluate(test);
    if state.ctx.is_aborting() {
        return Global;
    }
    if verdict.is_symbol(heads::TRUE) {
        Local
    } else {
        NoMatch
    }
}

fn match_repeated_pattern(
    state: &mut MatchState,
    call: &Call,
    arg: &Expr,
    index_of_arg: usize,
    count_of_arg: usize,
) -> MatchKind {
    let Some((min, max)) = extract_range(&call.args[1], 1, UNBOUNDED) else {
        return NoMatch;
    };
    if min > max {
        return NoMatch;
    }
    if max == 0 {
        return if arg.is_empty_splice() { Local } else { NoMatch };
    }

    let sub = &call.args[0];
    if !arg.is_splice() {
        if min > 1 {
            return NoMatch;
        }
        return match_atom(state, sub, arg, index_of_arg, count_of_arg);
    }

    let arg_len = arg.length();
    if arg_len < min || arg_len > max {
        return NoMatch;
    }
    match_repeated(state, sub, arg)
}

fn match_repeated(state: &mut MatchState, sub: &Expr, seq: &Expr) -> MatchKind {
    let mut shape = analyze(sub, AnalyzeScope::default());
    if shape.max == 0 {
        return if seq.length() == 0 { Local } else { NoMatch };
    }
    if shape.min == 0 {
        shape.min = 1;
    }
    trace!("match_repeated: {} against {}", sub, seq);
    match_repeated_left(state, sub, seq, shape, 0)
}

fn match_repeated_left(
    state: &mut MatchState,
    sub: &Expr,
    seq: &Expr,
    shape: Multiplicity,
    start: usize,
) -> MatchKind {
    let flen = seq.length();
    let mut func_i = start;

    'next_chunk: loop {
        if func_i >= flen {
            return Local;
        }

        let mut clamped = shape;
        let avail = flen - func_i;
        if clamped.max > avail {
            clamped.max = avail;
        }

        let counts = candidate_counts(&clamped);
        for (pos, &n) in counts.iter().enumerate() {
            let is_last = pos + 1 == counts.len();
            let chunk = splice_range(seq, func_i, n);
            let kind = match_atom(state, sub, &chunk, func_i + 1, flen);
            if kind == Global {
                return Global;
            }
            if kind == Local {
                if is_last && func_i + n < flen {
                    func_i += n;
                    continue 'next_chunk;
                }
                let deeper = match_repeated_left(state, sub, seq, shape, func_i + n);
                if deeper != NoMatch {
                    return deeper;
                }
            }
        }
        return NoMatch;
    }
}

fn splice_range(seq: &Expr, start: usize, n: usize) -> Expr {
    if n == 1 {
        seq.args()[start].clone()
    } else {
        Expr::splice(seq.args()[start..start + n].to_vec())
    }
}

fn match_named_pattern(
    state: &mut MatchState,
    pat: &Expr,
    arg: &Expr,
    index_of_arg: usize,
    count_of_arg: usize,
) -> MatchKind {
    let call = pat.as_call().expect("named pattern is a compound");
    let name = &call.args[0];
    if name.symbol_name().is_none() {
        debug!("ignoring pattern with invalid name: {}", pat);
        return NoMatch;
    }
    let sub = &call.args[1];

    if let Some(existing) = state.bindings.iter().rev().find(|b| &b.name == name) {
        // A bound name is fixed for the rest of the attempt: the value
        // must recur, and an identical sub-pattern need not re-match.
        let bound_value = existing.value.clone();
        let first_pattern = existing.first_pattern.clone();
        if arg != &bound_value {
            return NoMatch;
        }
        if first_pattern.as_ref() == Some(sub) {
            return Local;
        }
        return match_atom(state, sub, arg, index_of_arg, count_of_arg);
    }

    let kind = match_atom(state, sub, arg, index_of_arg, count_of_arg);
    if kind != Local {
        return kind;
    }

    // First binding of this name: record it, rewrite this occurrence to
    // a Found marker and re-validate the whole pattern from the top,
    // since the name may occur elsewhere.
    state.bindings.push(Binding {
        name: name.clone(),
        value: arg.clone(),
        first_pattern: Some(sub.clone()),
    });
    let old_pattern = state.pattern.clone();
    let marker = subst::found_marker(arg.clone(), Some(sub.clone()));
    state.pattern = subst::bind_occurrence(&old_pattern, pat, &marker, Some((name, arg)));

    let top_pattern = state.pattern.clone();
    let top_subject = state.subject.clone();
    if match_atom(state, &top_pattern, &top_subject, 0, 0) != NoMatch {
        return Global;
    }

    state.pattern = old_pattern;
    state.bindings.pop();
    NoMatch
}

fn match_optional(
    state: &mut MatchState,
    pat: &Expr,
    arg: &Expr,
    index_of_arg: usize,
    count_of_arg: usize,
) -> MatchKind {
    let call = pat.as_call().expect("optional pattern is a compound");
    let name = &call.args[0];
    if name.symbol_name().is_none() {
        debug!("ignoring optional with invalid name: {}", pat);
        return NoMatch;
    }

    // An empty consumed sequence takes the declared default, or asks the
    // evaluator for the positional Default(head, i, n) value.
    let value = if arg.is_empty_splice() {
        if call.args.len() == 2 {
            call.args[1].clone()
        } else {
            let head = state
                .current_head
                .clone()
                .unwrap_or_else(|| Expr::symbol(heads::AUTOMATIC));
            state.ctx.evaluate(Expr::call_to(
                heads::DEFAULT,
                vec![head, Expr::int(index_of_arg as i64), Expr::int(count_of_arg as i64)],
            ))
        }
    } else {
        arg.clone()
    };

    if let Some(existing) = state.bindings.iter().rev().find(|b| &b.name == name) {
        return if existing.value == value { Local } else { NoMatch };
    }

    state.bindings.push(Binding {
        name: name.clone(),
        value: value.clone(),
        first_pattern: None,
    });
    let old_pattern = state.pattern.clone();
    // The marker records what was consumed, which for a defaulted
    // optional is the empty sequence, not the default value.
    let marker = subst::found_marker(arg.clone(), None);
    state.pattern = subst::bind_occurrence(&old_pattern, pat, &marker, Some((name, &value)));

    let top_pattern = state.pattern.clone();
    let top_subject = state.subject.clone();
    if match_atom(state, &top_pattern, &top_subject, 0, 0) != NoMatch {
        return Global;
    }

    state.pattern = old_pattern;
    state.bindings.pop();
    NoMatch
}

fn match_options_pattern(state: &mut MatchState, pat: &Expr, arg: &Expr) -> MatchKind {
    let Some(arg_call) = arg.as_call() else {
        return NoMatch;
    };
    let fits = if is_rule(arg) {
        true
    } else if arg.is_splice() || arg_call.head.is_symbol(heads::LIST) {
        arg_call.args.iter().all(is_option_set)
    } else {
        false
    };
    if !fits {
        return NoMatch;
    }

    let call = pat.as_call().expect("options pattern is a compound");
    let fn_head = if call.args.is_empty() {
        state
            .current_head
            .clone()
            .unwrap_or_else(|| Expr::symbol(heads::AUTOMATIC))
    } else {
        call.args[0].clone()
    };

    // Defer the option set for OptionValue resolution and re-validate
    // the rest of the pattern, exactly like a variable binding.
    state.options.push((fn_head, arg.clone()));
    let old_pattern = state.pattern.clone();
    let marker = subst::found_marker(arg.clone(), None);
    state.pattern = subst::bind_occurrence(&old_pattern, pat, &marker, None);

    let top_pattern = state.pattern.clone();
    let top_subject = state.subject.clone();
    if match_atom(state, &top_pattern, &top_subject, 0, 0) != NoMatch {
        return Global;
    }

    state.pattern = old_pattern;
    state.options.pop();
    NoMatch
}

fn match_literal(call: &Call, arg: &Expr) -> MatchKind {
    if arg.is_splice() {
        if arg.length() != call.args.len() {
            return NoMatch;
        }
        if call.args.iter().zip(arg.args()).all(|(p, a)| p == a) {
            return Local;
        }
        return NoMatch;
    }
    if call.args.len() == 1 && call.args[0] == *arg {
        return Local;
    }
    NoMatch
}

fn match_pattern_sequence(state: &mut MatchState, pat: &Expr, arg: &Expr) -> MatchKind {
    let func = if arg.is_splice() {
        arg.clone()
    } else {
        Expr::splice(vec![arg.clone()])
    };
    trace!("match_pattern_sequence: {} against {}", pat, func);
    let Some(data) = MatchFunc::new(state, pat.clone(), func, Attributes::NONE) else {
        return NoMatch;
    };
    match_func_left(state, &data, 0, 0)
}

fn match_except(
    state: &mut MatchState,
    call: &Call,
    arg: &Expr,
    index_of_arg: usize,
    count_of_arg: usize,
) -> MatchKind {
    let kind = match_atom(state, &call.args[0], arg, index_of_arg, count_of_arg);
    if kind == Global {
        return Global;
    }
    if kind == Local {
        return NoMatch;
    }
    if call.args.len() == 2 {
        return match_atom(state, &call.args[1], arg, index_of_arg, count_of_arg);
    }
    Local
}

fn match_key_value(state: &mut MatchState, call: &Call, arg: &Expr) -> MatchKind {
    let Some(arg_call) = arg.as_call() else {
        return NoMatch;
    };
    if !arg_call.head.is_symbol(heads::LIST) || !arg_call.args.iter().all(is_rule) {
        return NoMatch;
    }
    if call.args.is_empty() {
        return Local;
    }

    let rule_pats: Vec<Expr> = if is_rule(&call.args[0]) {
        vec![call.args[0].clone()]
    } else if call.args[0].is_call_to(heads::LIST) {
        call.args[0].args().to_vec()
    } else {
        return NoMatch;
    };
    if rule_pats.is_empty() {
        return Local;
    }

    let arg_len = arg_call.args.len();
    if arg_len == 0 {
        let empty = Expr::splice(Vec::new());
        for rule_pat in &rule_pats {
            let kind = match_atom(state, rule_pat, &empty, 1, 0);
            if kind != Local {
                return kind;
            }
        }
        return Local;
    }

    if arg_len < rule_pats.len() {
        let seq = Expr::call_to(heads::PATTERN_SEQUENCE, rule_pats.clone());
        if analyze(&seq, AnalyzeScope::default()).min > arg_len {
            return NoMatch;
        }
    }

    let Some(mut usage) = usage_scratch(arg_len, ArgUse::Free) else {
        return NoMatch;
    };
    let mut first_free = 0;
    for rule_pat in &rule_pats {
        while first_free < arg_len && usage[first_free] == ArgUse::Used {
            first_free += 1;
        }
        let mut matched = false;
        for arg_i in first_free..arg_len {
            if usage[arg_i] != ArgUse::Free {
                continue;
            }
            usage[arg_i] = ArgUse::Testing;
            let kind = match_atom(state, rule_pat, &arg_call.args[arg_i], arg_i + 1, arg_len);
            match kind {
                Global => return Global,
                Local => {
                    usage[arg_i] = ArgUse::Used;
                    matched = true;
                    break;
                }
                NoMatch => usage[arg_i] = ArgUse::Free,
            }
        }
        if !matched {
            return NoMatch;
        }
    }
    Local
}

fn match_other_function(state: &mut MatchState, pat: &Expr, arg: &Expr) -> MatchKind {
    let call = pat.as_call().expect("generic pattern is a compound");
    let attrs = call
        .head
        .symbol_name()
        .map(|name| state.ctx.attributes(name))
        .unwrap_or(Attributes::NONE);

    if attrs.contains(Attributes::ONE_IDENTITY) {
        if arg.as_call().is_some() {
            let kind = match_func(state, pat, arg);
            if kind != NoMatch {
                return kind;
            }
        }
        let wrapped = Expr::call(call.head.clone(), vec![arg.clone()]);
        return match_func(state, pat, &wrapped);
    }

    if arg.as_call().is_none() {
        return NoMatch;
    }
    match_func(state, pat, arg)
}

/// Precomputed data for matching one compound pattern against one
/// compound subject: attribute snapshot of the pattern head and the
/// analyzed multiplicity of each pattern slot.
struct MatchFunc {
    pat: Expr,
    func: Expr,
    shapes: Vec<Multiplicity>,
    associative: bool,
    one_identity: bool,
}

impl MatchFunc {
    fn new(state: &MatchState, pat: Expr, func: Expr, attrs: Attributes) -> Option<MatchFunc> {
        let associative = attrs.contains(Attributes::ASSOCIATIVE);
        let scope = AnalyzeScope {
            parent_head: state.current_head.as_ref(),
            associative,
        };

        let mut total_min = 0usize;
        let mut total_max = 0usize;
        let shapes: Vec<Multiplicity> = pat
            .args()
            .iter()
            .map(|slot| {
                let shape = analyze(slot, scope);
                total_min = total_min.checked_add(shape.min).unwrap_or(UNBOUNDED);
                total_max = total_max.checked_add(shape.max).unwrap_or(UNBOUNDED);
                shape
            })
            .collect();

        if !associative {
            let flen = func.length();
            if total_max < flen || total_min > flen {
                return None;
            }
        }

        Some(MatchFunc {
            pat,
            func,
            shapes,
            associative,
            one_identity: attrs.contains(Attributes::ONE_IDENTITY),
        })
    }
}

fn match_func(state: &mut MatchState, pat: &Expr, func: &Expr) -> MatchKind {
    let pat_call = pat.as_call().expect("pattern is a compound");
    let func_call = func.as_call().expect("subject is a compound");

    let old_head = state.current_head.replace(func_call.head.clone());
    let flen = func_call.args.len();

    let mut kind = match_atom(state, &pat_call.head, &func_call.head, 0, flen);
    if kind == Local {
        trace!("match_func: {} against {}", pat, func);
        let attrs = pat_call
            .head
            .symbol_name()
            .map(|name| state.ctx.attributes(name))
            .unwrap_or(Attributes::NONE);

        if !state.symmetric && state.associative && is_top_subject(state, func) {
            state.assoc_start = 1;
        }

        kind = match MatchFunc::new(state, pat.clone(), func.clone(), attrs) {
            Some(data) => {
                if attrs.contains(Attributes::SYMMETRIC) {
                    match_func_symmetric(state, &data)
                } else {
                    match_func_left(state, &data, 0, 0)
                }
            }
            None => NoMatch,
        };
    }

    state.current_head = old_head;
    kind
}

/// Positional matching for non-symmetric heads, left to right with
/// per-slot candidate counts; for a flat top-level subject the whole
/// match window may slide right over leading unconsumed arguments.
fn match_func_left(
    state: &mut MatchState,
    data: &MatchFunc,
    start_slot: usize,
    start_arg: usize,
) -> MatchKind {
    let plen = data.pat.length();
    let flen = data.func.length();
    let mut pat_i = start_slot;
    let mut func_i = start_arg;
    // Window restarts are owned by the invocation that begins at slot 0.
    let mut window_start: Option<usize> = if start_slot == 0 { Some(start_arg) } else { None };

    'next_slot: loop {
        if pat_i >= plen {
            if state.associative && is_top_subject(state, &data.func) {
                state.assoc_end = func_i;
                return if state.assoc_start <= state.assoc_end {
                    Local
                } else {
                    NoMatch
                };
            }
            return if func_i >= flen { Local } else { NoMatch };
        }

        'restart_slot: loop {
            let patarg = data.pat.args()[pat_i].clone();
            let shape = data.shapes[pat_i];

            'next_funcarg: loop {
                let mut clamped = shape;
                let avail = flen.saturating_sub(func_i);
                if clamped.max > avail {
                    clamped.max = avail;
                }

                let counts = candidate_counts(&clamped);
                for (pos, &n) in counts.iter().enumerate() {
                    let is_last = pos + 1 == counts.len();
                    let arg = materialize_range(data, func_i, n, clamped.no_sequence);
                    let kind = match_atom(state, &patarg, &arg, func_i + 1, flen);
                    if kind == Global {
                        return Global;
                    }
                    if kind == Local {
                        if is_last {
                            // The preferred boundary count: commit without
                            // a redundant sibling retry.
                            pat_i += 1;
                            func_i += n;
                            continue 'next_slot;
                        }
                        let deeper = match_func_left(state, data, pat_i + 1, func_i + n);
                        if deeper != NoMatch {
                            return deeper;
                        }
                    }
                }

                if state.associative
                    && is_top_subject(state, &data.func)
                    && func_i.checked_add(shape.min).is_some_and(|need| need <= flen)
                {
                    if pat_i == 0 {
                        func_i += 1;
                        state.assoc_start = func_i + 1;
                        window_start = Some(func_i);
                        continue 'next_funcarg;
                    }
                    if let Some(window) = window_start {
                        let next = window + 1;
                        window_start = Some(next);
                        state.assoc_start = next + 1;
                        func_i = next;
                        pat_i = 0;
                        continue 'restart_slot;
                    }
                }

                return NoMatch;
            }
        }
    }
}

fn materialize_range(data: &MatchFunc, start: usize, n: usize, no_sequence: bool) -> Expr {
    let items = &data.func.args()[start..start + n];
    if no_sequence {
        if n == 1 && data.one_identity {
            items[0].clone()
        } else {
            Expr::call(
                data.func.head().expect("compound subject").clone(),
                items.to_vec(),
            )
        }
    } else if n == 1 {
        items[0].clone()
    } else {
        Expr::splice(items.to_vec())
    }
}

/// Combinatorial matching for symmetric heads: each pattern slot
/// consumes a subset of the still-unused subject arguments, enumerated
/// lexicographically, with full backtracking across slots.
fn match_func_symmetric(state: &mut MatchState, data: &MatchFunc) -> MatchKind {
    let flen = data.func.length();
    let Some(mut usage) = usage_scratch(flen, ArgUse::Free) else {
        return NoMatch;
    };

    trace!("match_func_symmetric: {} against {}", data.pat, data.func);
    let kind = match_symmetric_slot(state, data, 0, &mut usage);
    if kind != Local {
        return kind;
    }

    if is_top_subject(state, &data.func) {
        if state.symmetric && state.arg_usage.len() == flen {
            state.arg_usage.copy_from_slice(&usage);
        } else {
            // The subject head was symmetric when matching began but its
            // snapshot here disagrees; leftover bookkeeping is skipped.
            debug!("symmetric attribute changed mid-match; skipping usage bookkeeping");
        }
        return Local;
    }
    // A nested symmetric compound has no leftover slot to return
    // unmatched arguments through.
    if usage.iter().any(|use_| *use_ == ArgUse::Free) {
        return NoMatch;
    }
    Local
}

fn match_symmetric_slot(
    state: &mut MatchState,
    data: &MatchFunc,
    slot: usize,
    usage: &mut Vec<ArgUse>,
) -> MatchKind {
    let plen = data.pat.length();
    let flen = data.func.length();
    if slot >= plen {
        return Local;
    }

    let patarg = data.pat.args()[slot].clone();
    let shape = data.shapes[slot];
    let mut clamped = shape;
    if clamped.max > flen {
        clamped.max = flen;
    }

    for &n in candidate_counts(&clamped).iter() {
        let kind = try_symmetric_subsets(state, data, slot, n, clamped.no_sequence, usage, &patarg);
        if kind != NoMatch {
            return kind;
        }
    }

    // A flat OneIdentity head still accepts a bare single argument even
    // when the analyzed window excludes 1.
    if data.associative && data.one_identity && shape.min > 1 && shape.max >= shape.min {
        let kind = try_symmetric_subsets(state, data, slot, 1, shape.no_sequence, usage, &patarg);
        if kind != NoMatch {
            return kind;
        }
    }

    NoMatch
}

fn try_symmetric_subsets(
    state: &mut MatchState,
    data: &MatchFunc,
    slot: usize,
    n: usize,
    no_sequence: bool,
    usage: &mut Vec<ArgUse>,
    patarg: &Expr,
) -> MatchKind {
    let Some(mut subset) = Subset::first(usage, n) else {
        return NoMatch;
    };
    loop {
        let arg = materialize_subset(data, &subset.indices, no_sequence);
        let kind = match_atom(state, patarg, &arg, 1, data.func.length());
        if kind == Global {
            subset.mark(usage, ArgUse::Free);
            return Global;
        }
        if kind == Local {
            subset.mark(usage, ArgUse::Used);
            let deeper = match_symmetric_slot(state, data, slot + 1, usage);
            if deeper != NoMatch {
                return deeper;
            }
            subset.mark(usage, ArgUse::Testing);
        }
        if !subset.next(usage) {
            return NoMatch;
        }
    }
}

fn materialize_subset(data: &MatchFunc, indices: &[usize], no_sequence: bool) -> Expr {
    if indices.len() == 1 && (!no_sequence || data.one_identity) {
        return data.func.args()[indices[0]].clone();
    }
    let items: Vec<Expr> = indices
        .iter()
        .map(|&i| data.func.args()[i].clone())
        .collect();
    if no_sequence {
        Expr::call(data.func.head().expect("compound subject").clone(), items)
    } else {
        Expr::splice(items)
    }
}

/// Lexicographic cursor over `n`-subsets of the free cells of a usage
/// array. Cells of the current subset are held at `Testing`; advancing
/// or exhausting the cursor releases them.
struct Subset {
    indices: SmallVec<[usize; 8]>,
}

impl Subset {
    /// The first subset: the lowest `n` free cells, ascending.
    fn first(usage: &mut [ArgUse], n: usize) -> Option<Subset> {
        let mut indices: SmallVec<[usize; 8]> = SmallVec::with_capacity(n);
        let mut j = 0;
        for _ in 0..n {
            while j < usage.len() && usage[j] != ArgUse::Free {
                j += 1;
            }
            if j == usage.len() {
                for &idx in &indices {
                    usage[idx] = ArgUse::Free;
                }
                return None;
            }
            usage[j] = ArgUse::Testing;
            indices.push(j);
            j += 1;
        }
        Some(Subset { indices })
    }

    fn mark(&self, usage: &mut [ArgUse], value: ArgUse) {
        for &idx in &self.indices {
            usage[idx] = value;
        }
    }

    /// Advance to the lexicographic successor, releasing the marks when
    /// the enumeration is exhausted.
    fn next(&mut self, usage: &mut [ArgUse]) -> bool {
        let n = self.indices.len();
        self.mark(usage, ArgUse::Free);
        if n == 0 {
            return false;
        }

        let free_after = |usage: &[ArgUse], from: usize| -> Option<usize> {
            (from..usage.len()).find(|&j| usage[j] == ArgUse::Free)
        };

        let mut i = n;
        while i > 0 {
            i -= 1;
            if let Some(candidate) = free_after(usage, self.indices[i] + 1) {
                // Tentatively advance position i, then repack the tail
                // onto the earliest free cells after it.
                let mut packed: SmallVec<[usize; 8]> = SmallVec::with_capacity(n - i);
                packed.push(candidate);
                let mut from = candidate + 1;
                let mut complete = true;
                for _ in i + 1..n {
                    match free_after(usage, from) {
                        Some(cell) => {
                            packed.push(cell);
                            from = cell + 1;
                        }
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                if complete {
                    for (k, &cell) in packed.iter().enumerate() {
                        self.indices[i + k] = cell;
                    }
                    self.mark(usage, ArgUse::Testing);
                    return true;
                }
            }
        }
        false
    }
}
