//! `{{key}}` placeholder substitution for manifest templates.

use std::collections::BTreeMap;

use crate::error::{DeployError, DeployResult};

/// Fill every `{{key}}` in `template` from `vars`.
///
/// Whitespace inside the braces is ignored. An unknown key or an unclosed
/// placeholder is a configuration error; nothing is left half-rendered.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> DeployResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| DeployError::Configuration(format!("unclosed placeholder near {:?}", snippet(after))))?;
        let key = after[..end].trim();
        let value = vars
            .get(key)
            .ok_or_else(|| DeployError::Configuration(format!("template references unknown key {key:?}")))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn snippet(s: &str) -> &str {
    let end = s.char_indices().nth(20).map(|(i, _)| i).unwrap_or(s.len());
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitutes_known_keys() {
        let rendered = render(
            "image: {{image}}\nhost: {{ databaseEndpoint }}\n",
            &vars(&[("image", "repo/web:v2"), ("databaseEndpoint", "db.internal")]),
        )
        .unwrap();
        assert_eq!(rendered, "image: repo/web:v2\nhost: db.internal\n");
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        let text = "kind: Deployment\nspec: {}\n";
        assert_eq!(render(text, &BTreeMap::new()).unwrap(), text);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = render("x: {{missing}}", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(msg) if msg.contains("missing")));
    }

    #[test]
    fn unclosed_placeholder_is_rejected() {
        let err = render("x: {{image", &vars(&[("image", "a")])).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }
}
