//! Model stylesheets: declarative attribute assignment by selector.
//!
//! A stylesheet is an ordered list of `selector { attr: value; ... }`
//! rules carried in the graph-level `model_stylesheet` attribute.
//! Selectors are `*` (universal), a bare shape name, `.class`, `#id`, or
//! a compound like `box.critical`. Comma-separated selector lists share
//! one declaration block.
//!
//! Resolution: higher specificity wins (`id > class > shape > universal`);
//! ties go to the later rule in source order. A node-local attribute set
//! explicitly in the graph source always wins over any stylesheet value.

use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::graph::AttrValue;

/// One simple selector component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Universal,
    Shape(String),
    Class(String),
    Id(String),
    /// Conjunction of simple selectors, e.g. `box.critical`.
    Compound(Vec<Selector>),
}

impl Selector {
    /// CSS-style specificity triple: (ids, classes, shapes).
    pub fn specificity(&self) -> (u32, u32, u32) {
        match self {
            Selector::Universal => (0, 0, 0),
            Selector::Shape(_) => (0, 0, 1),
            Selector::Class(_) => (0, 1, 0),
            Selector::Id(_) => (1, 0, 0),
            Selector::Compound(parts) => parts.iter().fold((0, 0, 0), |acc, part| {
                let (i, c, s) = part.specificity();
                (acc.0 + i, acc.1 + c, acc.2 + s)
            }),
        }
    }

    pub fn matches(&self, shape: &str, id: &str, classes: &[String]) -> bool {
        match self {
            Selector::Universal => true,
            Selector::Shape(name) => name == shape,
            Selector::Class(name) => classes.iter().any(|class| class == name),
            Selector::Id(name) => name == id,
            Selector::Compound(parts) => parts.iter().all(|part| part.matches(shape, id, classes)),
        }
    }
}

/// A selector plus its declarations, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub selector: Selector,
    pub declarations: Vec<(String, AttrValue)>,
}

/// A compiled stylesheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelStylesheet {
    rules: Vec<Rule>,
}

impl ModelStylesheet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Parse `selector { attr: value; ... }` blocks.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Vec::new();
        let mut rest = text.trim();

        while !rest.is_empty() {
            let Some(open) = rest.find('{') else {
                if rest.trim().is_empty() {
                    break;
                }
                return Err(PipelineError::Validation(format!(
                    "stylesheet: expected '{{' after selector near '{}'",
                    rest.trim()
                )));
            };
            let selector_text = rest[..open].trim();
            let after_open = &rest[open + 1..];
            let Some(close) = after_open.find('}') else {
                return Err(PipelineError::Validation(
                    "stylesheet: unterminated declaration block".to_string(),
                ));
            };
            let block = &after_open[..close];
            rest = after_open[close + 1..].trim_start();

            let declarations = parse_declarations(block)?;
            for selector_part in selector_text.split(',') {
                let selector = parse_selector(selector_part.trim())?;
                rules.push(Rule {
                    selector,
                    declarations: declarations.clone(),
                });
            }
        }

        Ok(Self { rules })
    }

    /// Resolve the effective stylesheet attributes for one node.
    ///
    /// Matching rules apply lowest-specificity first so that later, more
    /// specific declarations overwrite earlier ones.
    pub fn resolve(
        &self,
        shape: &str,
        id: &str,
        classes: &[String],
    ) -> BTreeMap<String, AttrValue> {
        let mut matched: Vec<(usize, &Rule)> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.selector.matches(shape, id, classes))
            .collect();
        matched.sort_by_key(|(order, rule)| (rule.selector.specificity(), *order));

        let mut resolved = BTreeMap::new();
        for (_, rule) in matched {
            for (name, value) in &rule.declarations {
                resolved.insert(name.clone(), value.clone());
            }
        }
        resolved
    }
}

fn parse_selector(text: &str) -> Result<Selector> {
    if text.is_empty() {
        return Err(PipelineError::Validation(
            "stylesheet: empty selector".to_string(),
        ));
    }
    if text == "*" {
        return Ok(Selector::Universal);
    }

    fn flush(
        parts: &mut Vec<Selector>,
        kind: char,
        current: &mut String,
        text: &str,
    ) -> Result<()> {
        if current.is_empty() {
            if kind != 's' {
                return Err(PipelineError::Validation(format!(
                    "stylesheet: dangling '{kind}' in selector '{text}'"
                )));
            }
            return Ok(());
        }
        let part = match kind {
            '.' => Selector::Class(std::mem::take(current)),
            '#' => Selector::Id(std::mem::take(current)),
            _ => Selector::Shape(std::mem::take(current)),
        };
        parts.push(part);
        Ok(())
    }

    let mut parts: Vec<Selector> = Vec::new();
    let mut current = String::new();
    let mut kind = 's'; // 's' shape, '.' class, '#' id

    for ch in text.chars() {
        match ch {
            '.' | '#' => {
                flush(&mut parts, kind, &mut current, text)?;
                kind = ch;
            }
            _ if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' => current.push(ch),
            _ => {
                return Err(PipelineError::Validation(format!(
                    "stylesheet: unexpected character '{ch}' in selector '{text}'"
                )));
            }
        }
    }
    flush(&mut parts, kind, &mut current, text)?;

    match parts.len() {
        0 => Err(PipelineError::Validation(format!(
            "stylesheet: empty selector '{text}'"
        ))),
        1 => Ok(parts.into_iter().next().unwrap()),
        _ => Ok(Selector::Compound(parts)),
    }
}

fn parse_declarations(block: &str) -> Result<Vec<(String, AttrValue)>> {
    let mut declarations = Vec::new();
    for entry in block.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((name, value)) = entry.split_once(':') else {
            return Err(PipelineError::Validation(format!(
                "stylesheet: expected 'name: value' in '{entry}'"
            )));
        };
        declarations.push((name.trim().to_string(), AttrValue::parse(value.trim())));
    }
    Ok(declarations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn parses_blocks_and_selector_lists() {
        let sheet = ModelStylesheet::parse(
            "* { llm_model: default-model }\n\
             box, hexagon { reasoning_effort: low }\n\
             .critical { reasoning_effort: high; max_retries: 5 }\n\
             #review { llm_model: review-model }",
        )
        .unwrap();
        assert_eq!(sheet.rules().len(), 5);
    }

    #[test]
    fn specificity_id_over_class_over_shape_over_universal() {
        let sheet = ModelStylesheet::parse(
            "* { m: u }\nbox { m: shape }\n.c { m: class }\n#n { m: id }",
        )
        .unwrap();

        let resolved = sheet.resolve("box", "n", &classes(&["c"]));
        assert_eq!(resolved["m"], AttrValue::from("id"));

        let resolved = sheet.resolve("box", "other", &classes(&["c"]));
        assert_eq!(resolved["m"], AttrValue::from("class"));

        let resolved = sheet.resolve("box", "other", &[]);
        assert_eq!(resolved["m"], AttrValue::from("shape"));

        let resolved = sheet.resolve("diamond", "other", &[]);
        assert_eq!(resolved["m"], AttrValue::from("u"));
    }

    #[test]
    fn source_order_breaks_ties_later_wins() {
        let sheet = ModelStylesheet::parse(".a { m: first }\n.a { m: second }").unwrap();
        let resolved = sheet.resolve("box", "n", &classes(&["a"]));
        assert_eq!(resolved["m"], AttrValue::from("second"));
    }

    #[test]
    fn compound_selectors_require_all_parts() {
        let sheet = ModelStylesheet::parse("box.critical { m: both }").unwrap();
        assert!(sheet
            .resolve("box", "n", &classes(&["critical"]))
            .contains_key("m"));
        assert!(sheet.resolve("box", "n", &[]).is_empty());
        assert!(sheet
            .resolve("hexagon", "n", &classes(&["critical"]))
            .is_empty());

        // Compound beats either part alone.
        let sheet =
            ModelStylesheet::parse("box.critical { m: both }\n.critical { m: class }").unwrap();
        let resolved = sheet.resolve("box", "n", &classes(&["critical"]));
        assert_eq!(resolved["m"], AttrValue::from("both"));
    }

    #[test]
    fn typed_values_parse() {
        let sheet = ModelStylesheet::parse("* { max_retries: 5; allow_partial: true; name: x }")
            .unwrap();
        let resolved = sheet.resolve("box", "n", &[]);
        assert_eq!(resolved["max_retries"], AttrValue::Int(5));
        assert_eq!(resolved["allow_partial"], AttrValue::Bool(true));
        assert_eq!(resolved["name"], AttrValue::from("x"));
    }

    #[test]
    fn malformed_sheets_error() {
        assert!(ModelStylesheet::parse("box m: x }").is_err());
        assert!(ModelStylesheet::parse("box { m: x").is_err());
        assert!(ModelStylesheet::parse("box { m }").is_err());
    }
}
