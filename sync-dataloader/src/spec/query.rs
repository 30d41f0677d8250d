//! Query parsing.

use std::rc::Rc;

use apollo_parser::cst;
use serde_json_bytes::ByteString;

use super::selection::parse_constant;
use super::Selection;
use crate::configuration::Configuration;
use crate::error::SpecError;
use crate::json_ext::Object;

/// A parsed query document.
#[derive(Debug, Clone)]
pub struct Query {
    string: String,
    operations: Vec<Operation>,
}

/// Operation kinds that can be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

#[derive(Debug, Clone)]
pub struct Operation {
    name: Option<String>,
    kind: OperationKind,
    selection_set: Rc<[Selection]>,
    /// Default values of the declared variables.
    variable_defaults: Object,
}

impl Query {
    /// Parses `query`, keeping only what execution needs.
    ///
    /// Fragments are not supported and subscriptions are rejected.
    pub fn parse(query: impl Into<String>, configuration: &Configuration) -> Result<Self, SpecError> {
        let string = query.into();

        let parser = apollo_parser::Parser::new(string.as_str())
            .recursion_limit(configuration.parser.recursion_limit);
        let tree = parser.parse();

        // Trace log recursion limit data
        let recursion_limit = tree.recursion_limit();
        tracing::trace!(?recursion_limit, "recursion limit data");

        let errors = tree
            .errors()
            .map(|err| err.message().to_string())
            .collect::<Vec<_>>();

        if !errors.is_empty() {
            let errors = errors.join(", ");
            failfast_debug!("parsing error(s): {}", errors);
            return Err(SpecError::ParsingError(errors));
        }

        let document = tree.document();
        let operations = document
            .definitions()
            .map(|definition| match definition {
                cst::Definition::OperationDefinition(operation) => {
                    Operation::from_cst(operation, &string).map(Some)
                }
                cst::Definition::FragmentDefinition(_) => Err(SpecError::UnsupportedSelection(
                    "fragment definition".to_string(),
                )),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        if operations.is_empty() {
            return Err(SpecError::NoOperation);
        }

        Ok(Query { string, operations })
    }

    pub fn as_str(&self) -> &str {
        &self.string
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Selects the operation to execute.
    ///
    /// Without a name, the document must contain exactly one operation.
    pub fn operation(&self, operation_name: Option<&str>) -> Result<&Operation, SpecError> {
        match operation_name {
            Some(name) => self
                .operations
                .iter()
                .find(|operation| operation.name.as_deref() == Some(name))
                .ok_or_else(|| SpecError::UnknownOperation(name.to_string())),
            None => match self.operations.as_slice() {
                [operation] => Ok(operation),
                [] => Err(SpecError::NoOperation),
                _ => Err(SpecError::AmbiguousOperation),
            },
        }
    }
}

impl Operation {
    // Spec: https://spec.graphql.org/draft/#sec-Language.Operations
    fn from_cst(operation: cst::OperationDefinition, source: &str) -> Result<Self, SpecError> {
        let name = operation.name().map(|x| x.text().to_string());

        let kind = match operation.operation_type() {
            None => OperationKind::Query,
            Some(operation_type) if operation_type.query_token().is_some() => OperationKind::Query,
            Some(operation_type) if operation_type.mutation_token().is_some() => {
                OperationKind::Mutation
            }
            Some(_) => return Err(SpecError::SubscriptionNotSupported),
        };

        let selection_set = operation
            .selection_set()
            .ok_or_else(|| SpecError::ParsingError("missing selection set".to_string()))?
            .selections()
            .map(|selection| Selection::from_cst(selection, source))
            .collect::<Result<Vec<_>, _>>()?;

        let variable_defaults = operation
            .variable_definitions()
            .iter()
            .flat_map(|x| x.variable_definitions())
            .filter_map(|definition| {
                let name = definition.variable()?.name()?.text().to_string();
                let default = definition
                    .default_value()
                    .and_then(|v| v.value())
                    .and_then(|value| parse_constant(&value))?;
                Some((ByteString::from(name), default))
            })
            .collect();

        Ok(Operation {
            name,
            kind,
            selection_set: Rc::from(selection_set),
            variable_defaults,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn selection_set(&self) -> &Rc<[Selection]> {
        &self.selection_set
    }

    /// Fills in declared defaults for the variables the request left out.
    pub fn variables(&self, provided: &Object) -> Object {
        let mut variables = provided.clone();
        for (name, default) in self.variable_defaults.iter() {
            if !variables.contains_key(name.as_str()) {
                variables.insert(name.clone(), default.clone());
            }
        }
        variables
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;
    use test_log::test;

    use super::*;
    use crate::graphql::Location;
    use crate::spec::InputValue;

    fn parse(query: &str) -> Result<Query, SpecError> {
        Query::parse(query, &Configuration::default())
    }

    #[test]
    fn parses_aliases_arguments_and_locations() {
        let query = parse(
            r#"
        query {
            users {
                name
                bestFriend {
                    name
                }
            }
            name1: name(key: "1")
        }
        "#,
        )
        .unwrap();
        let operation = query.operation(None).unwrap();
        assert_eq!(operation.kind(), OperationKind::Query);

        let users = &operation.selection_set()[0];
        assert_eq!(users.response_key.as_str(), "users");
        assert_eq!(users.location, Some(Location { line: 3, column: 13 }));
        let best_friend = &users.selection_set[1];
        assert_eq!(best_friend.name.as_str(), "bestFriend");
        assert_eq!(best_friend.location, Some(Location { line: 5, column: 17 }));
        assert_eq!(best_friend.selection_set.len(), 1);

        let name = &operation.selection_set()[1];
        assert_eq!(name.response_key.as_str(), "name1");
        assert_eq!(name.name.as_str(), "name");
        assert_eq!(
            name.arguments,
            vec![("key".into(), InputValue::Constant(json!("1")))]
        );
    }

    #[test]
    fn selects_operations_by_name() {
        let query = parse(
            r#"
            query First { a }
            mutation Second($id: ID = "4", $flag: Boolean) { b(id: $id, flag: $flag) }
            "#,
        )
        .unwrap();
        assert_eq!(query.operation(None).unwrap_err(), SpecError::AmbiguousOperation);
        assert_eq!(
            query.operation(Some("Third")).unwrap_err(),
            SpecError::UnknownOperation("Third".to_string())
        );

        let second = query.operation(Some("Second")).unwrap();
        assert_eq!(second.kind(), OperationKind::Mutation);
        let provided = json!({ "flag": true }).as_object().unwrap().clone();
        assert_eq!(
            crate::json_ext::Value::Object(second.variables(&provided)),
            json!({ "flag": true, "id": "4" })
        );
    }

    #[test]
    fn rejects_unsupported_documents() {
        assert!(matches!(
            parse("{ users { ...UserFields } } fragment UserFields on User { name }"),
            Err(SpecError::UnsupportedSelection(_))
        ));
        assert!(matches!(
            parse("{ users { ... on User { name } } }"),
            Err(SpecError::UnsupportedSelection(_))
        ));
        assert_eq!(
            parse("subscription { events }").unwrap_err(),
            SpecError::SubscriptionNotSupported
        );
        assert!(matches!(parse("{ users { name }"), Err(SpecError::ParsingError(_))));
        assert_eq!(parse("type User { id: ID }").unwrap_err(), SpecError::NoOperation);
    }

    #[test]
    fn recursion_limit_comes_from_configuration() {
        let configuration = Configuration::builder().recursion_limit(3).build();
        let deep = "{ a { b { c { d { e } } } } }";
        assert!(matches!(
            Query::parse(deep, &configuration),
            Err(SpecError::ParsingError(_))
        ));
        assert!(Query::parse(deep, &Configuration::default()).is_ok());
    }
}
