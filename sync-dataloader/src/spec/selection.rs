use std::rc::Rc;

use apollo_parser::cst;
use apollo_parser::cst::CstNode;
use serde_json_bytes::ByteString;

use crate::error::SpecError;
use crate::graphql::Location;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// A field selected by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// The alias if there is one, the field name otherwise.
    pub response_key: ByteString,
    pub name: ByteString,
    pub arguments: Vec<(ByteString, InputValue)>,
    /// Empty for leaf fields.
    pub selection_set: Rc<[Selection]>,
    pub location: Option<Location>,
}

/// An argument value as written in the query, before variables are substituted.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Variable(String),
    Constant(Value),
    List(Vec<InputValue>),
    Object(Vec<(ByteString, InputValue)>),
}

impl Selection {
    /// Creates a leaf field selection.
    pub fn field(name: impl Into<ByteString>) -> Self {
        let name = name.into();
        Self {
            response_key: name.clone(),
            name,
            arguments: Vec::new(),
            selection_set: Rc::from(Vec::new()),
            location: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<ByteString>) -> Self {
        self.response_key = alias.into();
        self
    }

    pub fn argument(mut self, name: impl Into<ByteString>, value: InputValue) -> Self {
        self.arguments.push((name.into(), value));
        self
    }

    pub fn selection_set(mut self, selection_set: Vec<Selection>) -> Self {
        self.selection_set = Rc::from(selection_set);
        self
    }

    /// Evaluates the arguments against the request variables.
    ///
    /// Arguments bound to a variable that was not provided are left out.
    pub fn argument_values(&self, variables: &Object) -> Object {
        self.arguments
            .iter()
            .filter_map(|(name, value)| Some((name.clone(), value.evaluate(variables)?)))
            .collect()
    }

    // Spec: https://spec.graphql.org/draft/#Field
    pub(crate) fn from_cst(selection: cst::Selection, source: &str) -> Result<Self, SpecError> {
        let field = match selection {
            cst::Selection::Field(field) => field,
            cst::Selection::FragmentSpread(spread) => {
                return Err(SpecError::UnsupportedSelection(format!(
                    "fragment spread `{}`",
                    spread.syntax().text().to_string().trim()
                )))
            }
            cst::Selection::InlineFragment(_) => {
                return Err(SpecError::UnsupportedSelection(
                    "inline fragment".to_string(),
                ))
            }
        };

        let name = field
            .name()
            .ok_or_else(|| SpecError::ParsingError("missing field name".to_string()))?
            .text()
            .to_string();
        let alias = field
            .alias()
            .and_then(|alias| alias.name())
            .map(|name| name.text().to_string());

        let arguments = field
            .arguments()
            .iter()
            .flat_map(|arguments| arguments.arguments())
            .map(|argument| {
                let name = argument
                    .name()
                    .ok_or_else(|| SpecError::ParsingError("missing argument name".to_string()))?
                    .text()
                    .to_string();
                let value = argument
                    .value()
                    .ok_or_else(|| SpecError::ParsingError(format!("missing value for `{name}`")))?;
                Ok((ByteString::from(name), InputValue::from_cst(&value)?))
            })
            .collect::<Result<Vec<_>, SpecError>>()?;

        let selection_set = field
            .selection_set()
            .iter()
            .flat_map(|selection_set| selection_set.selections())
            .map(|selection| Selection::from_cst(selection, source))
            .collect::<Result<Vec<_>, _>>()?;

        let offset: usize = field.syntax().text_range().start().into();
        Ok(Self {
            response_key: ByteString::from(alias.unwrap_or_else(|| name.clone())),
            name: ByteString::from(name),
            arguments,
            selection_set: Rc::from(selection_set),
            location: Some(location(source, offset)),
        })
    }
}

impl InputValue {
    /// Returns `None` for a variable missing from `variables`.
    pub fn evaluate(&self, variables: &Object) -> Option<Value> {
        match self {
            InputValue::Variable(name) => variables.get(name.as_str()).cloned(),
            InputValue::Constant(value) => Some(value.clone()),
            InputValue::List(values) => Some(Value::Array(
                values
                    .iter()
                    .map(|value| value.evaluate(variables).unwrap_or_default())
                    .collect(),
            )),
            InputValue::Object(fields) => Some(Value::Object(
                fields
                    .iter()
                    .filter_map(|(name, value)| Some((name.clone(), value.evaluate(variables)?)))
                    .collect(),
            )),
        }
    }

    pub(crate) fn from_cst(value: &cst::Value) -> Result<Self, SpecError> {
        let invalid = || {
            SpecError::ParsingError(format!(
                "invalid value `{}`",
                value.syntax().text().to_string().trim()
            ))
        };
        Ok(match value {
            cst::Value::Variable(variable) => InputValue::Variable(
                variable
                    .name()
                    .ok_or_else(invalid)?
                    .text()
                    .to_string(),
            ),
            cst::Value::ListValue(list) => InputValue::List(
                list.values()
                    .map(|value| InputValue::from_cst(&value))
                    .collect::<Result<_, _>>()?,
            ),
            cst::Value::ObjectValue(object) => InputValue::Object(
                object
                    .object_fields()
                    .map(|field| match (field.name(), field.value()) {
                        (Some(name), Some(value)) => Ok((
                            ByteString::from(name.text().to_string()),
                            InputValue::from_cst(&value)?,
                        )),
                        _ => Err(invalid()),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            constant => InputValue::Constant(parse_constant(constant).ok_or_else(invalid)?),
        })
    }
}

/// Parses a value that contains no variable.
pub(crate) fn parse_constant(value: &cst::Value) -> Option<Value> {
    match value {
        cst::Value::Variable(_) => None,
        cst::Value::StringValue(s) => Some(String::from(s).into()),
        cst::Value::FloatValue(f) => f64::try_from(f).ok().map(Value::from),
        // Out of range for Int, kept as a float for custom scalars
        cst::Value::IntValue(i) => i32::try_from(i)
            .map(Value::from)
            .or_else(|_| f64::try_from(i).map(Value::from))
            .ok(),
        cst::Value::BooleanValue(b) => {
            match (b.true_token().is_some(), b.false_token().is_some()) {
                (true, false) => Some(Value::Bool(true)),
                (false, true) => Some(Value::Bool(false)),
                _ => None,
            }
        }
        cst::Value::NullValue(_) => Some(Value::Null),
        cst::Value::EnumValue(e) => e.name().map(|n| n.text().to_string().into()),
        cst::Value::ListValue(l) => l
            .values()
            .map(|v| parse_constant(&v))
            .collect::<Option<_>>()
            .map(Value::Array),
        cst::Value::ObjectValue(o) => o
            .object_fields()
            .map(|field| match (field.name(), field.value()) {
                (Some(name), Some(value)) => {
                    parse_constant(&value).map(|v| (name.text().to_string().into(), v))
                }
                _ => None,
            })
            .collect::<Option<_>>()
            .map(Value::Object),
    }
}

/// Converts a byte offset into a 1-based line and column, skipping ignored tokens first.
pub(crate) fn location(source: &str, offset: usize) -> Location {
    let offset = offset.min(source.len());
    let skipped = source[offset..]
        .char_indices()
        .find(|(_, c)| !(c.is_whitespace() || *c == ',' || *c == '\u{feff}'))
        .map(|(index, _)| offset + index)
        .unwrap_or(source.len());

    let before = &source[..skipped];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|index| index + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    Location {
        line: line as u32,
        column: column as u32,
    }
}
