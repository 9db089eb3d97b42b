//! Parsed search filters and candidate re-matching.
//!
//! The planner consults indexes to produce candidate entries; every
//! candidate is then re-checked here against the full tree, because
//! index lookups are allowed to over-match (truncated keys, skipped
//! intersections). This module is the ground truth for what a filter
//! means.

use crate::dn::Dn;
use crate::message::Message;
use crate::schema::{attr_is_dn, Schema};
use faro_types::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FilterTree {
    Equality { attr: String, value: Vec<u8> },
    Present { attr: String },
    Substring { attr: String, pattern: String },
    Greater { attr: String, value: Vec<u8> },
    Less { attr: String, value: Vec<u8> },
    Approx { attr: String, value: Vec<u8> },
    Extended { attr: String, rule: String, value: Vec<u8> },
    And(Vec<FilterTree>),
    Or(Vec<FilterTree>),
    Not(Box<FilterTree>),
}

impl FilterTree {
    pub fn equality(attr: &str, value: &[u8]) -> Self {
        FilterTree::Equality {
            attr: attr.to_string(),
            value: value.to_vec(),
        }
    }

    pub fn present(attr: &str) -> Self {
        FilterTree::Present {
            attr: attr.to_string(),
        }
    }
}

/// Does the entry name fall within the requested scope?
pub fn match_scope(dn: &Dn, base: &Dn, scope: Scope) -> bool {
    match scope {
        Scope::Base => dn == base,
        Scope::OneLevel => dn.parent().as_ref() == Some(base),
        Scope::Subtree => dn.is_descendant_of(base),
    }
}

/// Evaluate the filter tree against a message, scope checks excluded.
pub fn match_message(schema: &Schema, msg: &Message, tree: &FilterTree) -> Result<bool> {
    match tree {
        FilterTree::Equality { attr, value } => {
            if attr_is_dn(attr) {
                return Ok(match Dn::parse(&String::from_utf8_lossy(value)) {
                    Ok(target) => msg.dn == target,
                    Err(_) => false,
                });
            }
            let syntax = schema.syntax_for(attr);
            let Ok(wanted) = syntax.canonicalise(value) else {
                return Ok(false);
            };
            let Some(el) = msg.find_element(attr) else {
                return Ok(false);
            };
            for stored in &el.values {
                if let Ok(canon) = syntax.canonicalise(stored) {
                    if canon == wanted {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        FilterTree::Present { attr } => {
            if attr_is_dn(attr) {
                return Ok(true);
            }
            Ok(msg.find_element(attr).is_some())
        }
        FilterTree::Substring { attr, pattern } => {
            let Some(el) = msg.find_element(attr) else {
                return Ok(false);
            };
            let pattern = pattern.to_ascii_lowercase();
            for stored in &el.values {
                let text = String::from_utf8_lossy(stored).trim().to_ascii_lowercase();
                if wildcard_match(&pattern, &text) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        FilterTree::Greater { attr, value } => ordered_match(schema, msg, attr, value, false),
        FilterTree::Less { attr, value } => ordered_match(schema, msg, attr, value, true),
        FilterTree::Approx { attr, value } => {
            match_message(schema, msg, &FilterTree::equality(attr, value))
        }
        FilterTree::Extended { .. } => Ok(false),
        FilterTree::And(children) => {
            for child in children {
                if !match_message(schema, msg, child)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        FilterTree::Or(children) => {
            for child in children {
                if match_message(schema, msg, child)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        FilterTree::Not(inner) => Ok(!match_message(schema, msg, inner)?),
    }
}

fn ordered_match(
    schema: &Schema,
    msg: &Message,
    attr: &str,
    value: &[u8],
    less: bool,
) -> Result<bool> {
    let syntax = schema.syntax_for(attr);
    let Ok(wanted) = syntax.canonicalise(value) else {
        return Ok(false);
    };
    let Some(el) = msg.find_element(attr) else {
        return Ok(false);
    };
    for stored in &el.values {
        if let Ok(canon) = syntax.canonicalise(stored) {
            let ok = if less { canon <= wanted } else { canon >= wanted };
            if ok {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Glob match with `*` as the only metacharacter.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star, mut mark) = (None, 0usize);
    while ti < t.len() {
        if pi < p.len() && (p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
