//! Shared utilities for the integration tests: expression builders for
//! the recognized pattern forms and a small evaluator callback covering
//! the forms the matcher hands to its host (comparison predicates,
//! positional defaults, marked trailing conditions).
#![allow(dead_code)]

use symmatch::{heads, Expr, StaticContext};

pub fn sym(name: &str) -> Expr {
    Expr::symbol(name)
}

pub fn int(value: i64) -> Expr {
    Expr::int(value)
}

pub fn string(value: &str) -> Expr {
    Expr::string(value)
}

pub fn call(head: &str, args: Vec<Expr>) -> Expr {
    Expr::call_to(head, args)
}

pub fn list(args: Vec<Expr>) -> Expr {
    Expr::call_to(heads::LIST, args)
}

/// `~` - matches any single expression.
pub fn blank() -> Expr {
    Expr::call_to(heads::SINGLE_MATCH, vec![])
}

/// `~:type` - matches a single expression with the given head.
pub fn typed_blank(ty: &str) -> Expr {
    Expr::call_to(heads::SINGLE_MATCH, vec![sym(ty)])
}

/// `name: pat`
pub fn named(name: &str, sub: Expr) -> Expr {
    Expr::call_to(heads::PATTERN, vec![sym(name), sub])
}

/// `name: ~`
pub fn var(name: &str) -> Expr {
    named(name, blank())
}

pub fn optional(name: &str) -> Expr {
    Expr::call_to(heads::OPTIONAL, vec![sym(name)])
}

pub fn optional_with(name: &str, default: Expr) -> Expr {
    Expr::call_to(heads::OPTIONAL, vec![sym(name), default])
}

pub fn range(min: Expr, max: Expr) -> Expr {
    Expr::call_to(heads::RANGE, vec![min, max])
}

pub fn infinity() -> Expr {
    sym(heads::INFINITY)
}

pub fn repeated(sub: Expr, rep_range: Expr) -> Expr {
    Expr::call_to(heads::REPEATED, vec![sub, rep_range])
}

/// `sub..` - one or more repetitions.
pub fn repeated_some(sub: Expr) -> Expr {
    repeated(sub, range(int(1), infinity()))
}

/// `sub...` - zero or more repetitions.
pub fn repeated_any(sub: Expr) -> Expr {
    repeated(sub, range(int(0), infinity()))
}

pub fn alternatives(branches: Vec<Expr>) -> Expr {
    Expr::call_to(heads::ALTERNATIVES, branches)
}

pub fn condition(sub: Expr, guard: Expr) -> Expr {
    Expr::call_to(heads::CONDITION, vec![sub, guard])
}

pub fn test_pattern(sub: Expr, predicate: Expr) -> Expr {
    Expr::call_to(heads::TEST_PATTERN, vec![sub, predicate])
}

pub fn pattern_sequence(elements: Vec<Expr>) -> Expr {
    Expr::call_to(heads::PATTERN_SEQUENCE, elements)
}

pub fn except(no: Expr) -> Expr {
    Expr::call_to(heads::EXCEPT, vec![no])
}

pub fn except_but(no: Expr, but: Expr) -> Expr {
    Expr::call_to(heads::EXCEPT, vec![no, but])
}

pub fn literal(value: Expr) -> Expr {
    Expr::call_to(heads::LITERAL, vec![value])
}

pub fn hold_pattern(sub: Expr) -> Expr {
    Expr::call_to(heads::HOLD_PATTERN, vec![sub])
}

pub fn longest(sub: Expr) -> Expr {
    Expr::call_to(heads::LONGEST, vec![sub])
}

pub fn shortest(sub: Expr) -> Expr {
    Expr::call_to(heads::SHORTEST, vec![sub])
}

pub fn options_pattern() -> Expr {
    Expr::call_to(heads::OPTIONS_PATTERN, vec![])
}

pub fn key_value_pattern(rules: Vec<Expr>) -> Expr {
    Expr::call_to(heads::KEY_VALUE_PATTERN, vec![list(rules)])
}

pub fn rule(lhs: Expr, rhs: Expr) -> Expr {
    Expr::call_to(heads::RULE, vec![lhs, rhs])
}

pub fn option_value(name: Expr) -> Expr {
    Expr::call_to(heads::OPTION_VALUE, vec![name])
}

/// Evaluator callback covering the embedded forms used by the tests:
/// integer comparisons and parity predicates, positional defaults for
/// `Plus`/`Times`, and the marked trailing-condition form (test
/// evaluated, body held).
pub fn eval_builtins(expr: Expr) -> Expr {
    let Some(call) = expr.as_call() else {
        return expr;
    };
    let head = call.head.symbol_name().unwrap_or("");
    let len = call.args.len();

    match head {
        "Greater" | "GreaterEqual" | "Less" | "LessEqual" | "Equal" | "Unequal" if len == 2 => {
            let a = eval_builtins(call.args[0].clone());
            let b = eval_builtins(call.args[1].clone());
            if let (Expr::Int(a), Expr::Int(b)) = (&a, &b) {
                let verdict = match head {
                    "Greater" => a > b,
                    "GreaterEqual" => a >= b,
                    "Less" => a < b,
                    "LessEqual" => a <= b,
                    "Equal" => a == b,
                    _ => a != b,
                };
                return bool_symbol(verdict);
            }
            expr.clone()
        }
        "EvenQ" | "OddQ" if len == 1 => {
            let value = eval_builtins(call.args[0].clone());
            if let Expr::Int(n) = value {
                return bool_symbol((n % 2 == 0) == (head == "EvenQ"));
            }
            expr.clone()
        }
        heads::GUARDED if len == 2 => {
            let test = eval_builtins(call.args[1].clone());
            Expr::call_to(heads::GUARDED, vec![call.args[0].clone(), test])
        }
        heads::EVALUATION_SEQUENCE if len > 0 => {
            let mut last = expr.clone();
            for arg in &call.args {
                last = eval_builtins(arg.clone());
            }
            last
        }
        heads::DEFAULT if len == 3 => match call.args[0].symbol_name() {
            Some("Plus") => int(0),
            Some("Times") => int(1),
            _ => expr.clone(),
        },
        _ => expr.clone(),
    }
}

pub fn bool_symbol(value: bool) -> Expr {
    sym(if value { heads::TRUE } else { "False" })
}

/// Install the trace subscriber once; run with RUST_LOG-style filtering
/// via `tracing_subscriber` to watch the matcher's search.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A context with the builtin test evaluator installed and no attributes
/// declared; tests declare what they need.
pub fn context() -> StaticContext {
    init_logging();
    StaticContext::new().with_evaluator(eval_builtins)
}

/// Match and return the instantiated replacement for `template`.
pub fn rewrite(
    ctx: &StaticContext,
    subject: &Expr,
    pattern: &Expr,
    template: Expr,
) -> Option<Expr> {
    let mut rhs = Some(template);
    if symmatch::pattern_match(ctx, subject, pattern, &mut rhs) {
        rhs
    } else {
        None
    }
}
