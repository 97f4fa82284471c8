//! Minimal CSS selector engine
//!
//! Supported grammar: compound selectors made of an optional tag name (or
//! `*`), `.class` and `[attr]` / `[attr="value"]` parts, joined by the
//! descendant (whitespace) and child (`>`) combinators.

use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

use super::{Document, ElementData, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected character '{found}' at position {position}")]
    UnexpectedChar { found: char, position: usize },
    #[error("selector ended unexpectedly")]
    UnexpectedEnd,
    #[error("missing name at position {0}")]
    MissingName(usize),
    #[error("combinator is not followed by a selector")]
    DanglingCombinator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeMatch {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeMatch>,
}

impl Compound {
    fn matches(&self, element: &ElementData) -> bool {
        if let Some(tag) = &self.tag {
            if &element.tag != tag {
                return false;
            }
        }
        if !self
            .classes
            .iter()
            .all(|class| element.classes.iter().any(|c| c == class))
        {
            return false;
        }
        self.attributes.iter().all(|attr| {
            match (element.attributes.get(&attr.name), &attr.value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
    }
}

/// A parsed selector. Parse once, query many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    parts: Vec<Compound>,
    // combinators[i] joins parts[i] and parts[i + 1]
    combinators: Vec<Combinator>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut chars = input.char_indices().peekable();
        let mut parts = Vec::new();
        let mut combinators = Vec::new();
        let mut pending_child = false;

        loop {
            skip_whitespace(&mut chars);
            let Some(&(position, c)) = chars.peek() else {
                break;
            };

            if c == '>' {
                if parts.is_empty() || pending_child {
                    return Err(SelectorError::UnexpectedChar { found: c, position });
                }
                chars.next();
                pending_child = true;
                continue;
            }

            let compound = parse_compound(&mut chars)?;
            if !parts.is_empty() {
                combinators.push(if pending_child {
                    Combinator::Child
                } else {
                    Combinator::Descendant
                });
            }
            pending_child = false;
            parts.push(compound);
        }

        if pending_child {
            return Err(SelectorError::DanglingCombinator);
        }
        if parts.is_empty() {
            return Err(SelectorError::Empty);
        }

        Ok(Self { parts, combinators })
    }

    pub(super) fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.matches_part(doc, node, self.parts.len() - 1)
    }

    fn matches_part(&self, doc: &Document, node: NodeId, index: usize) -> bool {
        let Some(element) = doc.element(node) else {
            return false;
        };
        if !self.parts[index].matches(element) {
            return false;
        }
        if index == 0 {
            return true;
        }

        match self.combinators[index - 1] {
            Combinator::Child => doc
                .parent(node)
                .is_some_and(|parent| self.matches_part(doc, parent, index - 1)),
            Combinator::Descendant => {
                let mut ancestor = doc.parent(node);
                while let Some(id) = ancestor {
                    if self.matches_part(doc, id, index - 1) {
                        return true;
                    }
                    ancestor = doc.parent(id);
                }
                false
            }
        }
    }
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|&(_, c)| c.is_whitespace()).is_some() {}
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_name(chars: &mut Peekable<CharIndices<'_>>) -> String {
    let mut name = String::new();
    while let Some((_, c)) = chars.next_if(|&(_, c)| is_name_char(c)) {
        name.push(c);
    }
    name
}

fn read_required_name(chars: &mut Peekable<CharIndices<'_>>) -> Result<String, SelectorError> {
    let position = chars.peek().map(|&(p, _)| p);
    let name = read_name(chars);
    if name.is_empty() {
        return Err(match position {
            Some(p) => SelectorError::MissingName(p),
            None => SelectorError::UnexpectedEnd,
        });
    }
    Ok(name)
}

fn parse_compound(chars: &mut Peekable<CharIndices<'_>>) -> Result<Compound, SelectorError> {
    let mut compound = Compound::default();
    let mut consumed = false;

    if chars.next_if(|&(_, c)| c == '*').is_some() {
        consumed = true;
    } else if chars.peek().is_some_and(|&(_, c)| is_name_char(c)) {
        compound.tag = Some(read_name(chars).to_ascii_lowercase());
        consumed = true;
    }

    while let Some(&(position, c)) = chars.peek() {
        match c {
            '.' => {
                chars.next();
                compound.classes.push(read_required_name(chars)?);
            }
            '[' => {
                chars.next();
                compound.attributes.push(parse_attribute(chars)?);
            }
            c if c.is_whitespace() || c == '>' => break,
            found => return Err(SelectorError::UnexpectedChar { found, position }),
        }
        consumed = true;
    }

    if !consumed {
        return Err(SelectorError::UnexpectedEnd);
    }
    Ok(compound)
}

fn parse_attribute(chars: &mut Peekable<CharIndices<'_>>) -> Result<AttributeMatch, SelectorError> {
    skip_whitespace(chars);
    let name = read_required_name(chars)?;
    skip_whitespace(chars);

    let value = match chars.next() {
        Some((_, ']')) => return Ok(AttributeMatch { name, value: None }),
        Some((_, '=')) => {
            skip_whitespace(chars);
            match chars.peek().copied() {
                Some((_, quote @ ('"' | '\''))) => {
                    chars.next();
                    let mut value = String::new();
                    loop {
                        match chars.next() {
                            Some((_, c)) if c == quote => break,
                            Some((_, c)) => value.push(c),
                            None => return Err(SelectorError::UnexpectedEnd),
                        }
                    }
                    value
                }
                Some(_) => read_required_name(chars)?,
                None => return Err(SelectorError::UnexpectedEnd),
            }
        }
        Some((position, found)) => return Err(SelectorError::UnexpectedChar { found, position }),
        None => return Err(SelectorError::UnexpectedEnd),
    };

    skip_whitespace(chars);
    match chars.next() {
        Some((_, ']')) => Ok(AttributeMatch {
            name,
            value: Some(value),
        }),
        Some((position, found)) => Err(SelectorError::UnexpectedChar { found, position }),
        None => Err(SelectorError::UnexpectedEnd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_container(doc: &mut Document, id: &str) -> (NodeId, NodeId) {
        let container = doc.create_element("div");
        doc.set_attribute(container, "data-device-status", "");
        doc.set_attribute(container, "data-device-id", id);
        let badge = doc.create_element("span");
        doc.set_class_name(badge, "badge status-badge");
        doc.append_child(container, badge);
        let root = doc.root();
        doc.append_child(root, container);
        (container, badge)
    }

    #[test]
    fn test_attribute_selectors() {
        let mut doc = Document::new();
        let (first, _) = device_container(&mut doc, "7");
        let (second, _) = device_container(&mut doc, "12");

        let any = Selector::parse("[data-device-status]").unwrap();
        assert_eq!(doc.query_selector_all(doc.root(), &any), vec![first, second]);

        let one = Selector::parse("div[data-device-status][data-device-id=\"12\"]").unwrap();
        assert_eq!(doc.query_selector_all(doc.root(), &one), vec![second]);

        let unquoted = Selector::parse("[data-device-id=7]").unwrap();
        assert_eq!(doc.query_selector_all(doc.root(), &unquoted), vec![first]);
    }

    #[test]
    fn test_class_and_combinators() {
        let mut doc = Document::new();
        let (container, badge) = device_container(&mut doc, "1");

        let descendant = Selector::parse("[data-device-status] .status-badge").unwrap();
        assert_eq!(doc.query_selector(doc.root(), &descendant), Some(badge));

        let child = Selector::parse("body > div > span.badge").unwrap();
        assert_eq!(doc.query_selector(doc.root(), &child), Some(badge));

        let wrong_child = Selector::parse("body > span").unwrap();
        assert_eq!(doc.query_selector(doc.root(), &wrong_child), None);

        assert!(doc.matches(container, &Selector::parse("*").unwrap()));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Selector::parse("   "), Err(SelectorError::Empty));
        assert_eq!(Selector::parse("tr >"), Err(SelectorError::DanglingCombinator));
        assert_eq!(Selector::parse("[data-x"), Err(SelectorError::UnexpectedEnd));
        assert_eq!(Selector::parse("."), Err(SelectorError::UnexpectedEnd));
        assert!(matches!(
            Selector::parse("> tr"),
            Err(SelectorError::UnexpectedChar { found: '>', position: 0 })
        ));
        assert!(matches!(
            Selector::parse("tr#main"),
            Err(SelectorError::UnexpectedChar { found: '#', position: 2 })
        ));
    }
}
