//! Minimal `{{.name}}` template substitution (§4.G step 1). Deliberately
//! not a general templating engine — §9 calls it "a single flat mapping"
//! with "a simple `{{.name}}` substitution", so this stays a handwritten
//! scanner rather than pulling in a Jinja-style engine for one
//! substitution rule.

use std::collections::HashMap;

/// Expands every `{{.name}}` occurrence in `template` using `vars`.
/// Unknown variable names expand to an empty string rather than erroring —
/// a chain author typo shows up as a blank in the rendered prompt, which
/// is visible in the capture trace's `input_snapshot`.
pub fn expand(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{.") {
        out.push_str(&rest[..start]);
        let after_marker = &rest[start + 3..];
        match after_marker.find("}}") {
            Some(end) => {
                let name = after_marker[..end].trim();
                if let Some(value) = vars.get(name) {
                    out.push_str(value);
                }
                rest = &after_marker[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variable() {
        let mut vars = HashMap::new();
        vars.insert("input".to_string(), "hello".to_string());
        assert_eq!(expand("say {{.input}} now", &vars), "say hello now");
    }

    #[test]
    fn unknown_variable_expands_to_empty() {
        let vars = HashMap::new();
        assert_eq!(expand("say {{.missing}} now", &vars), "say  now");
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let vars = HashMap::new();
        assert_eq!(expand("plain text", &vars), "plain text");
    }

    #[test]
    fn multiple_placeholders_all_substitute() {
        let mut vars = HashMap::new();
        vars.insert("a".to_string(), "1".to_string());
        vars.insert("b".to_string(), "2".to_string());
        assert_eq!(expand("{{.a}}-{{.b}}", &vars), "1-2");
    }
}
