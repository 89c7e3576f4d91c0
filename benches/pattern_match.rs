//! Benchmarks for the core matching algorithm in isolation: no rule
//! store, no evaluator round-trips (the contexts here never evaluate),
//! just the backtracking search itself.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use symmatch::{heads, pattern_match, Attributes, Expr, StaticContext};

fn sym(name: &str) -> Expr {
    Expr::symbol(name)
}

fn int(value: i64) -> Expr {
    Expr::int(value)
}

fn call(head: &str, args: Vec<Expr>) -> Expr {
    Expr::call_to(head, args)
}

fn blank() -> Expr {
    Expr::call_to(heads::SINGLE_MATCH, vec![])
}

fn var(name: &str) -> Expr {
    Expr::call_to(heads::PATTERN, vec![sym(name), blank()])
}

fn repeated_any() -> Expr {
    Expr::call_to(
        heads::REPEATED,
        vec![
            blank(),
            Expr::call_to(heads::RANGE, vec![int(0), sym(heads::INFINITY)]),
        ],
    )
}

/// Baseline: a constant pattern against an equal subject.
fn bench_constant_match(c: &mut Criterion) {
    let ctx = StaticContext::new();
    let subject = call("f", vec![int(1), int(2), int(3)]);
    let pattern = subject.clone();

    c.bench_function("constant_match", |b| {
        b.iter(|| {
            let mut rhs = None;
            black_box(pattern_match(&ctx, black_box(&subject), black_box(&pattern), &mut rhs))
        })
    });
}

/// One variable binding plus the global re-validation it triggers.
fn bench_single_binding(c: &mut Criterion) {
    let ctx = StaticContext::new();
    let subject = call("f", vec![int(42)]);
    let pattern = call("f", vec![var("x")]);

    c.bench_function("single_binding", |b| {
        b.iter(|| {
            let mut rhs = Some(sym("x"));
            black_box(pattern_match(&ctx, black_box(&subject), black_box(&pattern), &mut rhs))
        })
    });
}

/// Positional matching with a variable count of pattern variables.
fn bench_variable_count_scaling(c: &mut Criterion) {
    let ctx = StaticContext::new();
    let mut group = c.benchmark_group("variable_count");
    for count in [2usize, 4, 8] {
        let subject = call("f", (0..count as i64).map(int).collect());
        let pattern = call(
            "f",
            (0..count).map(|i| var(&format!("x{}", i))).collect(),
        );
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let mut rhs = None;
                black_box(pattern_match(&ctx, black_box(&subject), black_box(&pattern), &mut rhs))
            })
        });
    }
    group.finish();
}

/// Sliding-window search over a flat (associative) head.
fn bench_associative_window(c: &mut Criterion) {
    let mut ctx = StaticContext::new();
    ctx.declare("Plus", Attributes::ASSOCIATIVE | Attributes::ONE_IDENTITY);

    let subject = call("Plus", (1..=10).map(int).collect());
    let pattern = call(
        "Plus",
        vec![
            var("x"),
            Expr::call_to(heads::PATTERN, vec![sym("rest"), repeated_any()]),
        ],
    );

    c.bench_function("associative_window", |b| {
        b.iter(|| {
            let mut rhs = None;
            black_box(pattern_match(&ctx, black_box(&subject), black_box(&pattern), &mut rhs))
        })
    });
}

/// Combinatorial subset search over a symmetric head.
fn bench_symmetric_subsets(c: &mut Criterion) {
    let mut ctx = StaticContext::new();
    ctx.declare("f", Attributes::SYMMETRIC);

    let mut group = c.benchmark_group("symmetric_subsets");
    for count in [3usize, 5, 7] {
        let subject = call("f", (0..count as i64).map(int).collect());
        let pattern = call(
            "f",
            (0..count).map(|i| var(&format!("x{}", i))).collect(),
        );
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let mut rhs = None;
                black_box(pattern_match(&ctx, black_box(&subject), black_box(&pattern), &mut rhs))
            })
        });
    }
    group.finish();
}

/// Greedy repeated run against a failing tail, forcing backtracking.
fn bench_repeated_backtracking(c: &mut Criterion) {
    let ctx = StaticContext::new();
    let mut args: Vec<Expr> = (0..12).map(|_| Expr::string("a")).collect();
    args.push(Expr::string("b"));
    let subject = call("StringExpr", args);
    let pattern = call(
        "StringExpr",
        vec![
            Expr::call_to(
                heads::PATTERN,
                vec![
                    sym("x"),
                    Expr::call_to(
                        heads::REPEATED,
                        vec![
                            Expr::string("a"),
                            Expr::call_to(heads::RANGE, vec![int(1), sym(heads::INFINITY)]),
                        ],
                    ),
                ],
            ),
            Expr::string("b"),
        ],
    );

    c.bench_function("repeated_backtracking", |b| {
        b.iter(|| {
            let mut rhs = None;
            black_box(pattern_match(&ctx, black_box(&subject), black_box(&pattern), &mut rhs))
        })
    });
}

criterion_group!(
    benches,
    bench_constant_match,
    bench_single_binding,
    bench_variable_count_scaling,
    bench_associative_window,
    bench_symmetric_subsets,
    bench_repeated_backtracking,
);

criterion_main!(benches);
