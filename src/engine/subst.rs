//! Binding and substitution: rewriting the working pattern when a
//! variable binds, and instantiating a rule's right-hand side once the
//! match succeeds.
//!
//! All rewriting here is persistent: a rewrite returns a new expression
//! sharing every untouched subtree with its input, so the matcher can
//! snapshot the working pattern before a speculative bind and restore it
//! on backtrack by dropping the rewritten copy.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::expr::{heads, Expr};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh temporary symbol derived from `base`, unique process-wide.
pub(crate) fn fresh_symbol(base: &str) -> Expr {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    Expr::symbol(format!("{}${}", base, n))
}

fn is_scoping_head(head: &Expr) -> bool {
    head.is_symbol(heads::FUNCTION) || head.is_symbol(heads::LOCAL) || head.is_symbol(heads::WITH)
}

/// Structural containment of `target` anywhere in `object`.
pub(crate) fn contains(object: &Expr, target: &Expr) -> bool {
    if object == target {
        return true;
    }
    let Some(call) = object.as_call() else {
        return false;
    };
    contains(&call.head, target) || call.args.iter().any(|arg| contains(arg, target))
}

fn contains_any_name(object: &Expr, bindings: &[(Expr, Expr)]) -> bool {
    if object.symbol_name().is_some() {
        return bindings.iter().any(|(name, _)| name == object);
    }
    let Some(call) = object.as_call() else {
        return false;
    };
    contains_any_name(&call.head, bindings)
        || call.args.iter().any(|arg| contains_any_name(arg, bindings))
}

/// Splice any sequence-marker arguments into the parent argument list.
fn flatten_spliced_args(args: Vec<Expr>) -> Vec<Expr> {
    if !args.iter().any(Expr::is_splice) {
        return args;
    }
    let mut flat = Vec::with_capacity(args.len());
    for arg in args {
        if arg.is_splice() {
            flat.extend(arg.args().iter().cloned());
        } else {
            flat.push(arg);
        }
    }
    flat
}

fn rename_def_target(target: &Expr, renames: &mut Vec<(Expr, Expr)>) -> Expr {
    if let Some(name) = target.symbol_name() {
        let fresh = fresh_symbol(name);
        renames.push((target.clone(), fresh.clone()));
        return fresh;
    }
    if let Some(list) = target.as_call() {
        if list.head.is_symbol(heads::LIST) {
            let args = list
                .args
                .iter()
                .map(|item| rename_def_target(item, renames))
                .collect();
            return Expr::call(list.head.clone(), args);
        }
    }
    target.clone()
}

fn rename_def(def: &Expr, renames: &mut Vec<(Expr, Expr)>) -> Expr {
    if let Some(call) = def.as_call() {
        if call.args.len() == 2
            && (call.head.is_symbol(heads::ASSIGN) || call.head.is_symbol(heads::ASSIGN_DELAYED))
        {
            let lhs = rename_def_target(&call.args[0], renames);
            return Expr::call(call.head.clone(), vec![lhs, call.args[1].clone()]);
        }
    }
    rename_def_target(def, renames)
}

/// Rename the locally bound symbols of a `Function`/`Local`/`With`
/// expression to fresh temporaries, in the definition list and the body.
///
/// Definition right-hand sides are left alone; they refer to the outer
/// scope.
pub(crate) fn alpha_rename_locals(local_expr: &Expr) -> Expr {
    let Some(call) = local_expr.as_call() else {
        return local_expr.clone();
    };
    if call.args.is_empty() {
        return local_expr.clone();
    }

    let mut renames = Vec::new();
    let mut args = call.args.to_vec();
    let defs = &call.args[0];
    if let Some(list) = defs.as_call().filter(|c| c.head.is_symbol(heads::LIST)) {
        let new_defs = list
            .args
            .iter()
            .map(|def| rename_def(def, &mut renames))
            .collect();
        args[0] = Expr::call(list.head.clone(), new_defs);
    } else {
        args[0] = rename_def(defs, &mut renames);
    }

    for item in args.iter_mut().skip(1) {
        for (old, fresh) in &renames {
            *item = replace_local(item, old, fresh);
        }
    }

    Expr::call(call.head.clone(), args)
}

/// Substitute one symbol by a value, alpha-renaming any nested scoping
/// construct that mentions it, and splicing sequence markers into parent
/// argument lists.
pub(crate) fn replace_local(object: &Expr, name: &Expr, value: &Expr) -> Expr {
    if object == name {
        return value.clone();
    }
    let Some(call) = object.as_call() else {
        return object.clone();
    };

    let (head, args) =
        if is_scoping_head(&call.head) && call.args.len() > 1 && contains(object, name) {
            let renamed = alpha_rename_locals(object);
            let renamed_call = renamed.as_call().expect("scoping form is a compound");
            let args: Vec<Expr> = renamed_call
                .args
                .iter()
                .map(|arg| replace_local(arg, name, value))
                .collect();
            (renamed_call.head.clone(), args)
        } else {
            let head = replace_local(&call.head, name, value);
            let args = call
                .args
                .iter()
                .map(|arg| replace_local(arg, name, value))
                .collect();
            (head, args)
        };

    Expr::call(head, flatten_spliced_args(args))
}

/// Instantiate a right-hand-side template with the completed bindings.
///
/// Bound names are replaced by their values; sequence-splice values
/// expand into the parent argument list; scoping constructs mentioning a
/// bound name are alpha-renamed first so the substitution cannot capture
/// their local variables.
pub(crate) fn replace_symbols(object: &Expr, bindings: &[(Expr, Expr)]) -> Expr {
    if object.symbol_name().is_some() {
        if let Some((_, value)) = bindings.iter().rev().find(|(name, _)| name == object) {
            return value.clone();
        }
        return object.clone();
    }
    let Some(call) = object.as_call() else {
        return object.clone();
    };

    let (head, args) = if is_scoping_head(&call.head)
        && call.args.len() > 1
        && contains_any_name(object, bindings)
    {
        let renamed = alpha_rename_locals(object);
        let renamed_call = renamed.as_call().expect("scoping form is a compound");
        let args: Vec<Expr> = renamed_call
            .args
            .iter()
            .map(|arg| replace_symbols(arg, bindings))
            .collect();
        (renamed_call.head.clone(), args)
    } else {
        let head = replace_symbols(&call.head, bindings);
        let args = call
            .args
            .iter()
            .map(|arg| replace_symbols(arg, bindings))
            .collect();
        (head, args)
    };

    Expr::call(head, flatten_spliced_args(args))
}

/// Replace one exact node of the working pattern by a `Found` marker,
/// substituting the newly bound name into every `Condition` guard along
/// the way (guards are evaluated, not pattern-matched, so they carry
/// values instead of pattern variables).
pub(crate) fn bind_occurrence(
    pattern: &Expr,
    target: &Expr,
    replacement: &Expr,
    binding: Option<(&Expr, &Expr)>,
) -> Expr {
    let pair: Option<Vec<(Expr, Expr)>> =
        binding.map(|(name, value)| vec![(name.clone(), value.clone())]);
    let mut replaced = false;
    let out = bind_walk(pattern, target, replacement, pair.as_deref(), &mut replaced);
    if !replaced {
        debug!("bind target not found in working pattern: {}", target);
    }
    out.unwrap_or_else(|| pattern.clone())
}

/// Returns `None` when the subtree is unchanged, so untouched subtrees
/// keep their identity across binds.
fn bind_walk(
    expr: &Expr,
    target: &Expr,
    replacement: &Expr,
    binding: Option<&[(Expr, Expr)]>,
    replaced: &mut bool,
) -> Option<Expr> {
    if !*replaced && expr.same_node(target) {
        *replaced = true;
        return Some(replacement.clone());
    }
    let call = expr.as_call()?;

    if let Some(cond) = expr.call_of_len(heads::CONDITION, 2) {
        let sub = bind_walk(&cond.args[0], target, replacement, binding, replaced);
        let test = binding
            .map(|pair| replace_symbols(&cond.args[1], pair))
            .filter(|test| test != &cond.args[1]);
        if sub.is_none() && test.is_none() {
            return None;
        }
        let sub = sub.unwrap_or_else(|| cond.args[0].clone());
        let test = test.unwrap_or_else(|| cond.args[1].clone());
        return Some(Expr::call(cond.head.clone(), vec![sub, test]));
    }

    let head = bind_walk(&call.head, target, replacement, binding, replaced);
    let mut args: Option<Vec<Expr>> = None;
    for (i, arg) in call.args.iter().enumerate() {
        if let Some(new_arg) = bind_walk(arg, target, replacement, binding, replaced) {
            args.get_or_insert_with(|| call.args.to_vec())[i] = new_arg;
        }
    }
    if head.is_none() && args.is_none() {
        return None;
    }
    let head = head.unwrap_or_else(|| call.head.clone());
    let args = args.unwrap_or_else(|| call.args.to_vec());
    Some(Expr::call(head, args))
}

/// Rewrite `OptionValue(...)` forms in an instantiated right-hand side
/// using the option sets collected during matching.
///
/// `OptionValue(name)` resolves against `default_fn` (the matched
/// subject's head); `OptionValue(fn, name)` against `fn`. A resolved
/// form becomes `OptionValue(fn, rules, name)` with the matched rule set
/// re-headed as a list.
pub(crate) fn replace_option_value(
    body: &Expr,
    default_fn: Option<&Expr>,
    options: &[(Expr, Expr)],
) -> Expr {
    let Some(call) = body.as_call() else {
        return body.clone();
    };

    let len = call.args.len();
    if call.head.is_symbol(heads::OPTION_VALUE) && (len == 1 || len == 2) {
        let current_fn = if len == 1 {
            default_fn.cloned()
        } else {
            Some(call.args[0].clone())
        };
        if let Some(current_fn) = current_fn {
            // Most recently collected option set wins.
            for (fn_head, rules) in options.iter().rev() {
                if fn_head == &current_fn && rules.as_call().is_some() {
                    let rules = if rules.is_splice() {
                        rules.with_head(Expr::symbol(heads::LIST))
                    } else {
                        rules.clone()
                    };
                    let name = call.args[len - 1].clone();
                    return Expr::call_to(heads::OPTION_VALUE, vec![current_fn, rules, name]);
                }
            }
        }
    }

    let head = replace_option_value(&call.head, default_fn, options);
    let args = call
        .args
        .iter()
        .map(|arg| replace_option_value(arg, default_fn, options))
        .collect();
    Expr::call(head, args)
}

/// Detect a trailing `Condition(body, test)` in a substituted right-hand
/// side, possibly nested at the tail of `EvaluationSequence`/`Local`/
/// `With`, and mark it with the internal guard head for the evaluator.
pub(crate) fn mark_trailing_condition(rhs: &mut Expr) -> bool {
    let Some(call) = rhs.as_call() else {
        return false;
    };
    let len = call.args.len();

    if len == 2 && (call.head.is_symbol(heads::CONDITION) || call.head.is_symbol(heads::GUARDED)) {
        *rhs = rhs.with_head(Expr::symbol(heads::GUARDED));
        return true;
    }

    if len > 0
        && (call.head.is_symbol(heads::EVALUATION_SEQUENCE)
            || call.head.is_symbol(heads::LOCAL)
            || call.head.is_symbol(heads::WITH))
    {
        let mut last = call.args[len - 1].clone();
        if mark_trailing_condition(&mut last) {
            let mut args = call.args.to_vec();
            args[len - 1] = last;
            *rhs = Expr::call(call.head.clone(), args);
            return true;
        }
    }

    false
}

/// Convenience for the matcher: the `Found` marker recording a bound
/// occurrence.
pub(crate) fn found_marker(value: Expr, sub: Option<Expr>) -> Expr {
    let mut args = vec![value];
    args.extend(sub);
    Expr::call_to(heads::FOUND, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, Expr)]) -> Vec<(Expr, Expr)> {
        pairs
            .iter()
            .map(|(name, value)| (Expr::symbol(*name), value.clone()))
            .collect()
    }

    #[test]
    fn test_replace_symbols_simple() {
        let body = Expr::call_to("Times", vec![Expr::symbol("x"), Expr::int(2)]);
        let out = replace_symbols(&body, &bindings(&[("x", Expr::int(21))]));
        assert_eq!(out, Expr::call_to("Times", vec![Expr::int(21), Expr::int(2)]));
    }

    #[test]
    fn test_replace_symbols_splices_sequences() {
        let body = Expr::call_to("f", vec![Expr::symbol("rest"), Expr::int(9)]);
        let seq = Expr::splice(vec![Expr::int(1), Expr::int(2)]);
        let out = replace_symbols(&body, &bindings(&[("rest", seq)]));
        assert_eq!(
            out,
            Expr::call_to("f", vec![Expr::int(1), Expr::int(2), Expr::int(9)])
        );
    }

    #[test]
    fn test_replace_symbols_avoids_capture() {
        // With(x := 1, Plus(x, y)) with y -> x must rename the inner x.
        let def = Expr::call_to(heads::ASSIGN, vec![Expr::symbol("x"), Expr::int(1)]);
        let body = Expr::call_to("Plus", vec![Expr::symbol("x"), Expr::symbol("y")]);
        let with = Expr::call_to(heads::WITH, vec![def, body]);

        let out = replace_symbols(&with, &bindings(&[("y", Expr::symbol("x"))]));

        let call = out.as_call().unwrap();
        let new_def = call.args[0].as_call().unwrap();
        let renamed = &new_def.args[0];
        assert_ne!(renamed, &Expr::symbol("x"), "local x must be renamed");
        let new_body = call.args[1].as_call().unwrap();
        assert_eq!(new_body.args[0], *renamed, "body keeps its local variable");
        assert_eq!(new_body.args[1], Expr::symbol("x"), "substituted value stays free");
    }

    #[test]
    fn test_replace_symbols_leaves_unrelated_scopes_alone() {
        let def = Expr::call_to(heads::ASSIGN, vec![Expr::symbol("a"), Expr::int(1)]);
        let body = Expr::call_to("Plus", vec![Expr::symbol("a"), Expr::int(2)]);
        let with = Expr::call_to(heads::WITH, vec![def, body]);
        let out = replace_symbols(&with, &bindings(&[("y", Expr::int(3))]));
        assert_eq!(out, with);
    }

    #[test]
    fn test_bind_occurrence_replaces_exact_node_once() {
        let blank = Expr::call_to(heads::SINGLE_MATCH, vec![]);
        let named = Expr::call_to(heads::PATTERN, vec![Expr::symbol("x"), blank.clone()]);
        let twin = Expr::call_to(heads::PATTERN, vec![Expr::symbol("x"), blank]);
        let pattern = Expr::call_to("f", vec![named.clone(), twin.clone()]);

        // Target the second occurrence by node identity even though the
        // first is structurally equal.
        let target = &pattern.args()[1];
        let marker = found_marker(Expr::int(7), None);
        let out = bind_occurrence(&pattern, target, &marker, None);

        assert_eq!(out.args()[0], named);
        assert_eq!(out.args()[1], marker);
    }

    #[test]
    fn test_bind_occurrence_substitutes_condition_guards() {
        let blank = Expr::call_to(heads::SINGLE_MATCH, vec![]);
        let named = Expr::call_to(heads::PATTERN, vec![Expr::symbol("x"), blank.clone()]);
        let guard = Expr::call_to("Greater", vec![Expr::symbol("x"), Expr::int(0)]);
        let cond = Expr::call_to(heads::CONDITION, vec![blank, guard]);
        let pattern = Expr::call_to("f", vec![named.clone(), cond]);

        let target = &pattern.args()[0];
        let marker = found_marker(Expr::int(7), None);
        let name = Expr::symbol("x");
        let value = Expr::int(7);
        let out = bind_occurrence(&pattern, target, &marker, Some((&name, &value)));

        let new_cond = out.args()[1].call_of_len(heads::CONDITION, 2).unwrap();
        assert_eq!(
            new_cond.args[1],
            Expr::call_to("Greater", vec![Expr::int(7), Expr::int(0)])
        );
    }

    #[test]
    fn test_replace_option_value() {
        let options = vec![(
            Expr::symbol("Plot"),
            Expr::splice(vec![Expr::call_to(
                heads::RULE,
                vec![Expr::symbol("Color"), Expr::symbol("Red")],
            )]),
        )];
        let body = Expr::call_to(heads::OPTION_VALUE, vec![Expr::symbol("Color")]);
        let plot = Expr::symbol("Plot");
        let out = replace_option_value(&body, Some(&plot), &options);

        let call = out.as_call().unwrap();
        assert_eq!(call.args.len(), 3);
        assert_eq!(call.args[0], Expr::symbol("Plot"));
        assert!(call.args[1].is_call_to(heads::LIST));
        assert_eq!(call.args[2], Expr::symbol("Color"));
    }

    #[test]
    fn test_mark_trailing_condition_direct_and_nested() {
        let mut rhs = Expr::call_to(
            heads::CONDITION,
            vec![Expr::int(1), Expr::symbol(heads::TRUE)],
        );
        assert!(mark_trailing_condition(&mut rhs));
        assert!(rhs.is_call_to(heads::GUARDED));

        let inner = Expr::call_to(
            heads::CONDITION,
            vec![Expr::int(1), Expr::symbol(heads::TRUE)],
        );
        let mut nested = Expr::call_to(
            heads::EVALUATION_SEQUENCE,
            vec![Expr::int(0), inner],
        );
        assert!(mark_trailing_condition(&mut nested));
        assert!(nested.args()[1].is_call_to(heads::GUARDED));

        let mut plain = Expr::call_to("f", vec![Expr::int(1)]);
        assert!(!mark_trailing_condition(&mut plain));
    }
}
