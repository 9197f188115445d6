//! Transition evaluation (§4.G): iterate branches in declaration order,
//! the first whose operator applied to `(output, when)` returns true
//! wins. Numeric comparators coerce both sides.

use super::types::{Branch, DataValue, Operator, Transition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub goto: String,
    pub alert: bool,
}

/// Evaluates `transition` against `output`. `label`, when present, is a
/// transition label carried alongside the output (a hook's returned
/// `transition`, or a `parse_transition` task's raw text) — `equals`
/// branches match against it instead of `output`'s template string.
/// Returns `None` if no branch matches — callers surface that as "no
/// transition matched" (§4.G).
pub fn evaluate(transition: &Transition, output: &DataValue, label: Option<&str>) -> Option<TransitionOutcome> {
    for branch in &transition.branches {
        if operator_matches(branch.operator, output, branch.when.as_deref(), label) {
            return Some(TransitionOutcome {
                goto: branch.goto.clone(),
                alert: branch.alert_on_match,
            });
        }
    }
    None
}

/// Matches only `equals` branches against an error-carried transition
/// label (a hook protocol status code). Other operators don't apply —
/// there is no coerced output to compare against on an error path.
pub fn evaluate_error_label(transition: &Transition, label: &str) -> Option<TransitionOutcome> {
    transition.branches.iter().find_map(|branch| {
        if branch.operator == Operator::Equals && branch.when.as_deref() == Some(label) {
            Some(TransitionOutcome {
                goto: branch.goto.clone(),
                alert: branch.alert_on_match,
            })
        } else {
            None
        }
    })
}

fn operator_matches(operator: Operator, output: &DataValue, when: Option<&str>, label: Option<&str>) -> bool {
    match operator {
        Operator::Default => true,
        Operator::Equals => {
            let Some(when) = when else { return false };
            if let Some(label) = label {
                label == when
            } else {
                output.as_template_string() == when
            }
        }
        Operator::Contains => {
            let Some(when) = when else { return false };
            output.as_template_string().contains(when)
        }
        Operator::StartsWith => {
            let Some(when) = when else { return false };
            output.as_template_string().starts_with(when)
        }
        Operator::GreaterThan => numeric_compare(output, when, |a, b| a > b),
        Operator::LessThan => numeric_compare(output, when, |a, b| a < b),
        Operator::Between => {
            let Some(when) = when else { return false };
            let Some((lo, hi)) = when.split_once(',') else {
                return false;
            };
            let (Ok(lo), Ok(hi)) = (lo.trim().parse::<f64>(), hi.trim().parse::<f64>()) else {
                return false;
            };
            let Some(actual) = as_f64(output) else {
                return false;
            };
            actual >= lo && actual <= hi
        }
    }
}

fn numeric_compare(output: &DataValue, when: Option<&str>, cmp: impl Fn(f64, f64) -> bool) -> bool {
    let Some(when) = when else { return false };
    let Ok(threshold) = when.trim().parse::<f64>() else {
        return false;
    };
    let Some(actual) = as_f64(output) else {
        return false;
    };
    cmp(actual, threshold)
}

fn as_f64(value: &DataValue) -> Option<f64> {
    match value {
        DataValue::Int(i) => Some(*i as f64),
        DataValue::Float(f) => Some(*f),
        DataValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::END;

    fn branch(operator: Operator, when: Option<&str>, goto: &str) -> Branch {
        Branch {
            operator,
            when: when.map(str::to_string),
            goto: goto.to_string(),
            alert_on_match: false,
        }
    }

    #[test]
    fn first_matching_branch_in_declaration_order_wins() {
        let transition = Transition {
            branches: vec![
                branch(Operator::Equals, Some("a"), "task_a"),
                branch(Operator::Default, None, END),
            ],
            on_failure: None,
        };
        let outcome = evaluate(&transition, &DataValue::String("a".to_string()), None).unwrap();
        assert_eq!(outcome.goto, "task_a");
    }

    #[test]
    fn default_branch_matches_unconditionally() {
        let transition = Transition {
            branches: vec![branch(Operator::Default, None, END)],
            on_failure: None,
        };
        let outcome = evaluate(&transition, &DataValue::String("whatever".to_string()), None).unwrap();
        assert_eq!(outcome.goto, END);
    }

    #[test]
    fn no_matching_branch_returns_none() {
        let transition = Transition {
            branches: vec![branch(Operator::Equals, Some("a"), "task_a")],
            on_failure: None,
        };
        assert!(evaluate(&transition, &DataValue::String("b".to_string()), None).is_none());
    }

    #[test]
    fn numeric_comparators_coerce_both_sides() {
        let transition = Transition {
            branches: vec![branch(Operator::GreaterThan, Some("5"), "big")],
            on_failure: None,
        };
        let outcome = evaluate(&transition, &DataValue::String("10".to_string()), None).unwrap();
        assert_eq!(outcome.goto, "big");
    }

    #[test]
    fn between_operator_checks_inclusive_range() {
        let transition = Transition {
            branches: vec![branch(Operator::Between, Some("1,10"), "in_range")],
            on_failure: None,
        };
        assert!(evaluate(&transition, &DataValue::Int(10), None).is_some());
        assert!(evaluate(&transition, &DataValue::Int(11), None).is_none());
    }

    #[test]
    fn alert_on_match_is_carried_through() {
        let mut b = branch(Operator::Default, None, END);
        b.alert_on_match = true;
        let transition = Transition {
            branches: vec![b],
            on_failure: None,
        };
        let outcome = evaluate(&transition, &DataValue::Bool(true), None).unwrap();
        assert!(outcome.alert);
    }

    #[test]
    fn equals_branch_prefers_the_label_over_the_json_output() {
        let transition = Transition {
            branches: vec![
                branch(Operator::Equals, Some("not_found"), "handle_404"),
                branch(Operator::Default, None, END),
            ],
            on_failure: None,
        };
        let output = DataValue::Json(serde_json::json!({"unrelated": true}));
        let outcome = evaluate(&transition, &output, Some("not_found")).unwrap();
        assert_eq!(outcome.goto, "handle_404");
    }

    #[test]
    fn evaluate_error_label_ignores_non_equals_branches() {
        let transition = Transition {
            branches: vec![
                branch(Operator::StartsWith, Some("4"), "client_error"),
                branch(Operator::Equals, Some("404"), "not_found"),
            ],
            on_failure: None,
        };
        let outcome = evaluate_error_label(&transition, "404").unwrap();
        assert_eq!(outcome.goto, "not_found");
    }

    #[test]
    fn evaluate_error_label_returns_none_without_a_matching_equals_branch() {
        let transition = Transition {
            branches: vec![branch(Operator::Default, None, END)],
            on_failure: None,
        };
        assert!(evaluate_error_label(&transition, "500").is_none());
    }
}
