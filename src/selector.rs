// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Path selectors over nested JSON data.
//!
//! A selector is a compiled dot/bracket path such as `.htr_system.setup.power_limit`
//! or `.nodes[0].addr`. The grammar is:
//!
//! ```text
//! selector := "." | segment+
//! segment  := "." identifier index*      (the first segment may omit the identifier)
//! index    := "[" digit+ "]"
//! ```
//!
//! Evaluation never fails: a missing key, an out-of-range index, or a step
//! applied to the wrong kind of value simply yields `None`.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use smartbox::selector::Selector;
//!
//! let selector = Selector::parse(".foo[1]").unwrap();
//! let data = json!({"foo": ["bar", "baz"]});
//! assert_eq!(selector.evaluate(&data), Some(&json!("baz")));
//!
//! let missing = json!({"fooboo": "bar"});
//! assert_eq!(Selector::parse(".foo").unwrap().evaluate(&missing), None);
//! ```

use std::fmt;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

use serde_json::Value;

use crate::error::SelectorError;

/// A single step of a compiled selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Look up a key in a mapping.
    Field(String),
    /// Take an element of a sequence.
    Index(usize),
}

/// A compiled, immutable path selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    steps: Vec<Step>,
}

impl Selector {
    /// Compiles a selector expression.
    ///
    /// # Errors
    ///
    /// Returns a [`SelectorError`] for empty input, a missing root `.`, empty
    /// segments, unbalanced brackets, non-integer indexes, or characters that
    /// cannot appear in a field name.
    pub fn parse(expr: &str) -> Result<Self, SelectorError> {
        if expr.is_empty() {
            return Err(SelectorError::Empty);
        }
        let mut chars = expr.char_indices().peekable();
        let mut dot_position = match chars.next() {
            Some((position, '.')) => position,
            _ => return Err(SelectorError::MissingRoot),
        };

        let mut steps = Vec::new();
        let mut first = true;
        loop {
            let field = take_identifier(&mut chars);
            if field.is_empty() {
                match chars.peek() {
                    Some((_, '[')) | None if first => {}
                    _ => {
                        return Err(SelectorError::EmptySegment {
                            position: dot_position,
                        });
                    }
                }
            } else {
                steps.push(Step::Field(field));
            }

            while let Some(&(position, '[')) = chars.peek() {
                chars.next();
                steps.push(Step::Index(take_index(&mut chars, position)?));
            }

            match chars.next() {
                None => break,
                Some((position, '.')) => {
                    dot_position = position;
                    first = false;
                }
                Some((position, ']')) => return Err(SelectorError::UnbalancedBracket { position }),
                Some((position, character)) => {
                    return Err(SelectorError::UnexpectedCharacter {
                        position,
                        character,
                    });
                }
            }
        }

        Ok(Self {
            source: expr.to_string(),
            steps,
        })
    }

    /// Resolves the selector against `data`.
    ///
    /// Returns `None` when any step cannot be followed.
    #[must_use]
    pub fn evaluate<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        self.steps
            .iter()
            .try_fold(data, |current, step| match step {
                Step::Field(name) => current.as_object()?.get(name),
                Step::Index(index) => current.as_array()?.get(*index),
            })
    }

    /// Returns the compiled steps.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns the selector text it was compiled from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns `true` for the root selector `.`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }
}

fn take_identifier(chars: &mut Peekable<CharIndices<'_>>) -> String {
    let mut identifier = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            identifier.push(c);
            chars.next();
        } else {
            break;
        }
    }
    identifier
}

/// Reads `digits]` after an opening bracket at `open`.
fn take_index(chars: &mut Peekable<CharIndices<'_>>, open: usize) -> Result<usize, SelectorError> {
    let mut text = String::new();
    loop {
        match chars.next() {
            Some((_, ']')) => break,
            Some((_, '[')) | None => return Err(SelectorError::UnbalancedBracket { position: open }),
            Some((_, c)) => text.push(c),
        }
    }
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SelectorError::InvalidIndex {
            position: open,
            text,
        });
    }
    text.parse().map_err(|_| SelectorError::InvalidIndex {
        position: open,
        text,
    })
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expr: &str, data: &Value) -> Option<Value> {
        Selector::parse(expr).unwrap().evaluate(data).cloned()
    }

    #[test]
    fn field_lookup() {
        assert_eq!(eval(".foo", &json!({"foo": "bar"})), Some(json!("bar")));
    }

    #[test]
    fn field_prefix_is_not_a_match() {
        assert_eq!(eval(".foo", &json!({"fooboo": "bar"})), None);
    }

    #[test]
    fn indexed_field() {
        assert_eq!(
            eval(".foo[1]", &json!({"foo": ["bar", "baz"]})),
            Some(json!("baz"))
        );
    }

    #[test]
    fn nested_fields() {
        let data = json!({"htr_system": {"setup": {"power_limit": 0}}});
        assert_eq!(
            eval(".htr_system.setup.power_limit", &data),
            Some(json!(0))
        );
        assert_eq!(eval(".htr_system.setup.unmatched", &data), None);
    }

    #[test]
    fn root_selector_returns_whole_value() {
        let data = json!({"away_status": {"away": true}});
        let selector = Selector::parse(".").unwrap();
        assert!(selector.is_root());
        assert_eq!(selector.evaluate(&data), Some(&data));
    }

    #[test]
    fn root_index() {
        assert_eq!(eval(".[0]", &json!(["a", "b"])), Some(json!("a")));
    }

    #[test]
    fn chained_indexes() {
        let data = json!({"grid": [[1, 2], [3, 4]]});
        assert_eq!(eval(".grid[1][0]", &data), Some(json!(3)));
    }

    #[test]
    fn index_out_of_range_is_not_a_match() {
        assert_eq!(eval(".foo[2]", &json!({"foo": ["bar", "baz"]})), None);
    }

    #[test]
    fn wrong_shape_is_not_a_match() {
        assert_eq!(eval(".foo[0]", &json!({"foo": {"0": "x"}})), None);
        assert_eq!(eval(".foo.bar", &json!({"foo": ["bar"]})), None);
        assert_eq!(eval(".foo", &json!("scalar")), None);
    }

    #[test]
    fn explicit_null_resolves() {
        assert_eq!(eval(".foo", &json!({"foo": null})), Some(Value::Null));
    }

    #[test]
    fn parse_steps() {
        let selector = Selector::parse(".body.foo[1]").unwrap();
        assert_eq!(
            selector.steps(),
            &[
                Step::Field("body".to_string()),
                Step::Field("foo".to_string()),
                Step::Index(1),
            ]
        );
        assert_eq!(selector.to_string(), ".body.foo[1]");
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Selector::parse(""), Err(SelectorError::Empty));
        assert_eq!(Selector::parse("foo"), Err(SelectorError::MissingRoot));
        assert_eq!(
            Selector::parse(".foo..bar"),
            Err(SelectorError::EmptySegment { position: 4 })
        );
        assert_eq!(
            Selector::parse(".foo."),
            Err(SelectorError::EmptySegment { position: 4 })
        );
        assert_eq!(
            Selector::parse(".foo[1"),
            Err(SelectorError::UnbalancedBracket { position: 4 })
        );
        assert_eq!(
            Selector::parse(".foo]"),
            Err(SelectorError::UnbalancedBracket { position: 4 })
        );
        assert_eq!(
            Selector::parse(".foo[x]"),
            Err(SelectorError::InvalidIndex {
                position: 4,
                text: "x".to_string()
            })
        );
        assert!(matches!(
            Selector::parse(".foo[-1]"),
            Err(SelectorError::InvalidIndex { .. })
        ));
        assert!(matches!(
            Selector::parse(".foo[]"),
            Err(SelectorError::InvalidIndex { .. })
        ));
        assert_eq!(
            Selector::parse(".foo bar"),
            Err(SelectorError::UnexpectedCharacter {
                position: 4,
                character: ' '
            })
        );
    }

    #[test]
    fn from_str() {
        let selector: Selector = ".away_status".parse().unwrap();
        assert_eq!(selector.as_str(), ".away_status");
    }
}
