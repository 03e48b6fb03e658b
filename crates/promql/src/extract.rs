//! Time series dependency extraction.

use crate::ast::Expr;
use crate::{parse_expr, ParseError};
use std::collections::BTreeSet;

/// Series Prometheus injects for every scrape target; it is always present
/// while the target is scraped, so an absence alert for it is meaningless.
pub const SCRAPE_HEALTH_METRIC: &str = "up";

const ABSENT_CALL: &str = "absent(";

/// Collect every metric name referenced by a selector anywhere in `expr`.
#[must_use]
pub fn selector_names(expr: &Expr) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    walk(expr, &mut found);
    found
}

fn walk(expr: &Expr, found: &mut BTreeSet<String>) {
    match expr {
        Expr::NumberLiteral(_) | Expr::StringLiteral(_) => {}
        Expr::VectorSelector(selector) => {
            if let Some(name) = selector.name.as_ref().filter(|name| !name.is_empty()) {
                found.insert(name.clone());
            }
        }
        Expr::MatrixSelector(matrix) => {
            if let Some(name) = matrix.selector.name.as_ref().filter(|name| !name.is_empty()) {
                found.insert(name.clone());
            }
        }
        Expr::Subquery(subquery) => walk(&subquery.expr, found),
        Expr::Call(call) => {
            for arg in &call.args {
                walk(arg, found);
            }
        }
        Expr::Aggregate(aggregate) => {
            if let Some(param) = &aggregate.param {
                walk(param, found);
            }
            walk(&aggregate.expr, found);
        }
        Expr::Binary(binary) => {
            walk(&binary.lhs, found);
            walk(&binary.rhs, found);
        }
        Expr::Unary(unary) => walk(&unary.expr, found),
        Expr::Paren(inner) => walk(inner, found),
    }
}

/// Metric names an alerting expression depends on, excluding the scrape
/// health metric and metrics the expression already guards with `absent()`.
///
/// The returned set is sorted and may be empty.
///
/// # Errors
/// Returns a [`ParseError`] if `expression` is not valid PromQL.
pub fn metric_names(expression: &str) -> Result<BTreeSet<String>, ParseError> {
    let expr = parse_expr(expression)?;
    let mut names = selector_names(&expr);
    names.retain(|name| name != SCRAPE_HEALTH_METRIC && !is_guarded_by_absent(expression, name));
    Ok(names)
}

/// Whether the raw expression text contains `absent(<metric>` for exactly this
/// metric name. Whitespace between the parenthesis and the name is allowed.
#[must_use]
pub fn is_guarded_by_absent(expression: &str, metric: &str) -> bool {
    expression.match_indices(ABSENT_CALL).any(|(index, _)| {
        let preceded_by_name_char = expression[..index]
            .chars()
            .next_back()
            .is_some_and(is_metric_name_char);
        if preceded_by_name_char {
            // e.g. `foo_absent(` is not a call to absent()
            return false;
        }

        let rest = expression[index + ABSENT_CALL.len()..].trim_start();
        rest.strip_prefix(metric)
            .is_some_and(|tail| !tail.chars().next().is_some_and(is_metric_name_char))
    })
}

fn is_metric_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(expression: &str) -> Vec<String> {
        metric_names(expression).unwrap().into_iter().collect()
    }

    #[test]
    fn already_guarded_metric_is_excluded() {
        assert!(names("absent(foo_bar) or foo_bar > 0").is_empty());
    }

    #[test]
    fn plain_comparison_yields_metric() {
        assert_eq!(names("foo_bar > 0"), vec!["foo_bar"]);
    }

    #[test]
    fn scrape_health_metric_is_excluded() {
        assert!(names("up").is_empty());
        assert!(names("up{job=\"node\"} == 0").is_empty());
    }

    #[test]
    fn duplicates_collapse_and_order_is_sorted() {
        assert_eq!(
            names("rate(zeta_total[5m]) / rate(alpha_total[5m]) > rate(zeta_total[1h])"),
            vec!["alpha_total", "zeta_total"]
        );
    }

    #[test]
    fn walks_every_node_kind() {
        let expression = r#"
            sum by (job) (rate(a_total[5m]))
              / on(job) group_left
            topk(3, b_gauge offset 1h)
            and
            -max_over_time(c_gauge[1h:5m])
            unless
            label_replace(d_info, "x", "$1", "y", "(.*)")
            or
            (e:recorded:rate5m)
        "#;
        assert_eq!(
            names(expression),
            vec!["a_total", "b_gauge", "c_gauge", "d_info", "e:recorded:rate5m"]
        );
    }

    #[test]
    fn nameless_selectors_contribute_nothing() {
        assert!(names(r#"{job="api"} > 0"#).is_empty());
    }

    #[test]
    fn literal_only_expression_has_no_dependencies() {
        assert!(names("vector(1)").is_empty());
        assert!(names("1 > bool 0").is_empty());
    }

    #[test]
    fn guard_matches_exact_name_only() {
        assert!(is_guarded_by_absent("absent(foo) or foo > 1", "foo"));
        assert!(is_guarded_by_absent("absent( foo{job=\"x\"})", "foo"));
        assert!(!is_guarded_by_absent("absent(foo_bar) or foo > 1", "foo"));
        assert!(!is_guarded_by_absent("my_absent(foo)", "foo"));
        assert_eq!(names("absent(foo_bar) or foo > 1"), vec!["foo"]);
    }

    #[test]
    fn absent_over_time_does_not_guard() {
        assert_eq!(
            names("absent_over_time(foo[5m]) or foo > 1"),
            vec!["foo"]
        );
    }

    #[test]
    fn invalid_expression_is_a_parse_error() {
        let err = metric_names("foo >").unwrap_err();
        assert!(err.to_string().starts_with("parse error at char"));
    }

    #[test]
    fn hostile_expressions_are_parse_errors() {
        assert!(metric_names("rate(foo[1e30]) > 0").is_err());
        assert!(metric_names("foo offset 1e30 > 0").is_err());
        let nested = format!("{}foo{}", "(".repeat(5_000), ")".repeat(5_000));
        assert!(metric_names(&nested).is_err());
    }

    #[test]
    fn escaped_label_values_parse() {
        assert_eq!(names(r#"foo{a="\x41", b="\u00e9"} > 0"#), vec!["foo"]);
    }
}
