//! Pattern specificity order.
//!
//! [`pattern_compare`] defines the total order used to sort a symbol's
//! rewrite rules so that the most specific rule is attempted first:
//! `Less` means "more specific, try earlier". The ordering follows a
//! fixed case list over the recognized pattern heads; ties between
//! named patterns are broken by per-call occurrence counts of the
//! variable names, so a rule that repeats a name (and therefore
//! constrains more) sorts earlier.
//!
//! [`is_constant_pattern`] reports whether a pattern denotes exactly one
//! literal value, which makes it eligible for hash-dispatch in a rule
//! store.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::expr::{heads, Expr};

/// Per-call comparison state: occurrence counts of pattern-variable
/// names on each side, keyed by the name expression.
#[derive(Default)]
struct CompareState {
    counts1: HashMap<Expr, usize>,
    counts2: HashMap<Expr, usize>,
}

/// Count an occurrence of `name`, returning how often it was seen before.
fn bump_count(counts: &mut HashMap<Expr, usize>, name: &Expr) -> usize {
    let entry = counts.entry(name.clone()).or_insert(0);
    let old = *entry;
    *entry += 1;
    old
}

fn blank() -> Expr {
    Expr::call_to(heads::SINGLE_MATCH, vec![])
}

fn is_rule(expr: &Expr) -> bool {
    expr.call_of_len(heads::RULE, 2).is_some() || expr.call_of_len(heads::RULE_DELAYED, 2).is_some()
}

/// Normalized rule-pattern list of a `KeyValuePattern`, or `None` when
/// the argument is neither a rule nor a list.
fn key_value_rules(call: &crate::expr::Call) -> Option<Vec<Expr>> {
    if call.args.is_empty() {
        return Some(Vec::new());
    }
    let arg = &call.args[0];
    if is_rule(arg) {
        return Some(vec![arg.clone()]);
    }
    if arg.is_call_to(heads::LIST) {
        return Some(arg.args().to_vec());
    }
    None
}

/// Compare two patterns by specificity; `Less` sorts earlier.
pub fn pattern_compare(pat1: &Expr, pat2: &Expr) -> Ordering {
    let mut state = CompareState::default();
    compare(pat1, pat2, &mut state)
}

fn compare(pat1: &Expr, pat2: &Expr, state: &mut CompareState) -> Ordering {
    let head1 = pat1.head().and_then(Expr::symbol_name).unwrap_or("");
    let head2 = pat2.head().and_then(Expr::symbol_name).unwrap_or("");
    let len1 = pat1.length();
    let len2 = pat2.length();

    // PatternSequence(...): shorter sequences are more specific; equal
    // lengths compare element-wise.
    if head1 == heads::PATTERN_SEQUENCE {
        if head2 == heads::PATTERN_SEQUENCE {
            match len1.cmp(&len2) {
                Ordering::Equal => {}
                other => return other,
            }
            for (p1, p2) in pat1.args().iter().zip(pat2.args()) {
                match compare(p1, p2, state) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            return Ordering::Equal;
        }
        match len1 {
            0 => return Ordering::Less,
            1 => return compare(&pat1.args()[0], pat2, state),
            _ => return Ordering::Greater,
        }
    }
    if head2 == heads::PATTERN_SEQUENCE {
        match len2 {
            0 => return Ordering::Greater,
            1 => return compare(pat1, &pat2.args()[0], state),
            _ => return Ordering::Less,
        }
    }

    // Repeated(pat, range): inner patterns first, then ranges by larger
    // minimum, smaller span, larger maximum.
    if head1 == heads::REPEATED && len1 == 2 {
        if head2 == heads::REPEATED && len2 == 2 {
            match compare(&pat1.args()[0], &pat2.args()[0], state) {
                Ordering::Equal => {}
                other => return other,
            }

            let range1 = super::analyze::extract_range(&pat1.args()[1], 1, usize::MAX);
            let range2 = super::analyze::extract_range(&pat2.args()[1], 1, usize::MAX);
            if let (Some((min1, max1)), Some((min2, max2))) = (range1, range2) {
                return min2
                    .cmp(&min1)
                    .then(max1.saturating_sub(min1).cmp(&max2.saturating_sub(min2)))
                    .then(max2.cmp(&max1));
            }
            return pat1.cmp(pat2);
        }
        return match compare(&pat1.args()[0], pat2, state) {
            Ordering::Equal => Ordering::Greater,
            other => other,
        };
    }
    if head2 == heads::REPEATED && len2 == 2 {
        return match compare(pat1, &pat2.args()[0], state) {
            Ordering::Equal => Ordering::Less,
            other => other,
        };
    }

    // constants < SingleMatch(type) < SingleMatch()
    if head1 == heads::SINGLE_MATCH {
        if head2 == heads::SINGLE_MATCH {
            if len1 == 0 {
                return if len2 == 0 {
                    Ordering::Equal
                } else {
                    Ordering::Greater
                };
            }
            if len2 == 0 {
                return Ordering::Less;
            }
            if len1 == 1 && len2 == 1 {
                return pat1.args()[0].cmp(&pat2.args()[0]);
            }
        } else {
            return Ordering::Greater;
        }
    } else if head2 == heads::SINGLE_MATCH {
        return Ordering::Less;
    }

    // TestPattern(pat, fn) and Condition(pat, cond): inner patterns
    // first; Condition sorts before TestPattern on ties.
    let is_guard1 = (head1 == heads::TEST_PATTERN || head1 == heads::CONDITION) && len1 == 2;
    let is_guard2 = (head2 == heads::TEST_PATTERN || head2 == heads::CONDITION) && len2 == 2;
    if is_guard1 {
        if is_guard2 {
            match compare(&pat1.args()[0], &pat2.args()[0], state) {
                Ordering::Equal => {}
                other => return other,
            }
            if head1 == head2 {
                return pat1.args()[1].cmp(&pat2.args()[1]);
            }
            return if head1 == heads::CONDITION {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }
        return match compare(&pat1.args()[0], pat2, state) {
            Ordering::Equal => Ordering::Less,
            other => other,
        };
    }
    if is_guard2 {
        return match compare(pat1, &pat2.args()[0], state) {
            Ordering::Equal => Ordering::Greater,
            other => other,
        };
    }

    // Longest/Shortest/HoldPattern are transparent for ordering.
    if (head1 == heads::LONGEST || head1 == heads::SHORTEST || head1 == heads::HOLD_PATTERN)
        && len1 == 1
    {
        return compare(&pat1.args()[0], pat2, state);
    }
    if (head2 == heads::LONGEST || head2 == heads::SHORTEST || head2 == heads::HOLD_PATTERN)
        && len2 == 1
    {
        return compare(pat1, &pat2.args()[0], state);
    }

    // Alternatives(...): fewer branches are more specific; equal branch
    // counts compare element-wise.
    if head1 == heads::ALTERNATIVES {
        if head2 == heads::ALTERNATIVES {
            match len1.cmp(&len2) {
                Ordering::Equal => {}
                other => return other,
            }
            for (p1, p2) in pat1.args().iter().zip(pat2.args()) {
                match compare(p1, p2, state) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            return Ordering::Equal;
        }
        match len1 {
            0 => return Ordering::Less,
            1 => return compare(&pat1.args()[0], pat2, state),
            _ => return Ordering::Greater,
        }
    }
    if head2 == heads::ALTERNATIVES {
        match len2 {
            0 => return Ordering::Greater,
            1 => return compare(pat1, &pat2.args()[0], state),
            _ => return Ordering::Less,
        }
    }

    // Optional(name), Optional(name, default): occurrence counts of the
    // name, then arity (no default is more specific), then defaults.
    if head1 == heads::OPTIONAL && (len1 == 1 || len1 == 2) {
        if head2 == heads::OPTIONAL && (len2 == 1 || len2 == 2) {
            let count1 = bump_count(&mut state.counts1, &pat1.args()[0]);
            let count2 = bump_count(&mut state.counts2, &pat2.args()[0]);
            if count1 > count2 {
                return Ordering::Less;
            }
            if count1 < count2 {
                return Ordering::Greater;
            }
            match len1.cmp(&len2) {
                Ordering::Equal => {}
                other => return other,
            }
            if len1 == 2 {
                return pat1.args()[1].cmp(&pat2.args()[1]);
            }
            return Ordering::Equal;
        }
        bump_count(&mut state.counts1, &pat1.args()[0]);
        return match compare(&blank(), pat2, state) {
            Ordering::Equal => Ordering::Greater,
            other => other,
        };
    }
    if head2 == heads::OPTIONAL && (len2 == 1 || len2 == 2) {
        bump_count(&mut state.counts2, &pat2.args()[0]);
        return match compare(pat1, &blank(), state) {
            Ordering::Equal => Ordering::Less,
            other => other,
        };
    }

    // Pattern(name, pat): occurrence counts of the name, then the
    // sub-patterns.
    if head1 == heads::PATTERN && len1 == 2 {
        if head2 == heads::PATTERN && len2 == 2 {
            let count1 = bump_count(&mut state.counts1, &pat1.args()[0]);
            let count2 = bump_count(&mut state.counts2, &pat2.args()[0]);
            if count1 > count2 {
                return Ordering::Less;
            }
            if count1 < count2 {
                return Ordering::Greater;
            }
            return compare(&pat1.args()[1], &pat2.args()[1], state);
        }
        let cmp = compare(&pat1.args()[1], pat2, state);
        bump_count(&mut state.counts1, &pat1.args()[0]);
        return match cmp {
            Ordering::Equal => Ordering::Less,
            other => other,
        };
    }
    if head2 == heads::PATTERN && len2 == 2 {
        let cmp = compare(pat1, &pat2.args()[1], state);
        bump_count(&mut state.counts2, &pat2.args()[0]);
        return match cmp {
            Ordering::Equal => Ordering::Greater,
            other => other,
        };
    }

    // Except(no), Except(no, but): the effective `but` patterns first
    // (absent `but` counts as SingleMatch()); on a tie the exclusions
    // compare with reversed sign, so excluding less sorts earlier.
    if head1 == heads::EXCEPT && (len1 == 1 || len1 == 2) {
        let but1 = if len1 == 2 {
            pat1.args()[1].clone()
        } else {
            blank()
        };
        if head2 == heads::EXCEPT && (len2 == 1 || len2 == 2) {
            let but2 = if len2 == 2 {
                pat2.args()[1].clone()
            } else {
                blank()
            };
            return match compare(&but1, &but2, state) {
                Ordering::Equal => compare(&pat1.args()[0], &pat2.args()[0], state).reverse(),
                other => other,
            };
        }
        return match compare(&but1, pat2, state) {
            Ordering::Equal => Ordering::Less,
            other => other,
        };
    }
    if head2 == heads::EXCEPT && (len2 == 1 || len2 == 2) {
        let but2 = if len2 == 2 {
            pat2.args()[1].clone()
        } else {
            blank()
        };
        return match compare(pat1, &but2, state) {
            Ordering::Equal => Ordering::Greater,
            other => other,
        };
    }

    // KeyValuePattern: longer rule lists are more specific; any
    // KeyValuePattern sorts after non-KeyValuePattern patterns.
    if head1 == heads::KEY_VALUE_PATTERN && len1 <= 1 {
        if let Some(rules1) = pat1.as_call().and_then(key_value_rules) {
            if head2 == heads::KEY_VALUE_PATTERN && len2 <= 1 {
                if let Some(rules2) = pat2.as_call().and_then(key_value_rules) {
                    if rules1.len() == rules2.len() {
                        for (p1, p2) in rules1.iter().zip(&rules2) {
                            match compare(p1, p2, state) {
                                Ordering::Equal => {}
                                other => return other,
                            }
                        }
                        return Ordering::Equal;
                    }
                    return if rules1.len() > rules2.len() {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    };
                }
            }
        }
        return Ordering::Greater;
    }
    if head2 == heads::KEY_VALUE_PATTERN && len2 <= 1 {
        return Ordering::Less;
    }

    // Literal(x) compares as the wrapped value.
    if head1 == heads::LITERAL && len1 == 1 {
        let p2 = if head2 == heads::LITERAL && len2 == 1 {
            &pat2.args()[0]
        } else {
            pat2
        };
        return pat1.args()[0].cmp(p2);
    }
    if head2 == heads::LITERAL && len2 == 1 {
        return pat1.cmp(&pat2.args()[0]);
    }

    // Atoms compare structurally; an atom is more specific than any
    // compound.
    if pat1.as_call().is_none() {
        if pat2.as_call().is_none() {
            return pat1.cmp(pat2);
        }
        return Ordering::Less;
    }
    if pat2.as_call().is_none() {
        return Ordering::Greater;
    }

    // Generic compounds: more arguments are more specific, then compare
    // head and arguments left to right.
    match len2.cmp(&len1) {
        Ordering::Equal => {}
        other => return other,
    }
    match compare(pat1.head().unwrap(), pat2.head().unwrap(), state) {
        Ordering::Equal => {}
        other => return other,
    }
    for (p1, p2) in pat1.args().iter().zip(pat2.args()) {
        match compare(p1, p2, state) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// True iff the pattern denotes exactly one literal value, making it
/// eligible for hash-dispatch in a rule store.
pub fn is_constant_pattern(pattern: &Expr) -> bool {
    let Some(call) = pattern.as_call() else {
        return true;
    };
    let len = call.args.len();

    if let Some(head) = call.head.symbol_name() {
        let special = match head {
            heads::CONDITION | heads::TEST_PATTERN | heads::PATTERN | heads::REPEATED => len == 2,
            heads::HOLD_PATTERN | heads::LONGEST | heads::SHORTEST => len == 1,
            heads::OPTIONAL | heads::EXCEPT => len == 1 || len == 2,
            heads::SINGLE_MATCH | heads::OPTIONS_PATTERN | heads::KEY_VALUE_PATTERN => len <= 1,
            heads::ALTERNATIVES | heads::PATTERN_SEQUENCE => true,
            heads::FOUND | heads::SPLICE => true,
            _ => false,
        };
        if special {
            return false;
        }
    }

    is_constant_pattern(&call.head) && call.args.iter().all(is_constant_pattern)
}
