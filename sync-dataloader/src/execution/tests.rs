use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use test_log::test;

use super::*;
use crate::configuration::Configuration;
use crate::json_ext::ValueExt;
use crate::loader::BatchLoader;
use crate::spec::FieldDefinition;

fn ty(reference: &str) -> FieldType {
    reference.parse().unwrap()
}

fn run(executor: &Executor, query: &str) -> Response {
    let query = Query::parse(query, &Configuration::default()).unwrap();
    executor
        .execute(&query, None, &Object::new(), &json!({}))
        .unwrap()
}

fn assert_data(response: &Response, expected: Value) {
    let data = response.data.as_ref().expect("response has data");
    assert!(
        data.eq_and_ordered(&expected),
        "data {data} does not match {expected}"
    );
}

#[test]
fn immediate_values_and_typename() {
    let schema = Schema::builder()
        .object_type(
            ObjectType::new("Query")
                .field(FieldDefinition::new("hello", FieldType::String).resolve(
                    |_, info| {
                        let name = info.argument("name").and_then(|v| v.as_str()).unwrap_or("world");
                        Ok(Value::from(format!("hello {name}")).into())
                    },
                ))
                .field(
                    FieldDefinition::new("hidden", FieldType::String)
                        .resolve(|_, _| Ok(Resolved::Undefined)),
                ),
        )
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let response = run(
        &executor,
        r#"{ __typename hello greet: hello(name: "grace") hidden unknown }"#,
    );
    assert!(response.errors.is_empty());
    assert_data(
        &response,
        json!({ "__typename": "Query", "hello": "hello world", "greet": "hello grace" }),
    );
}

#[test]
fn pending_field_keeps_its_position() {
    let pending: Rc<RefCell<Option<Deferred<Value>>>> = Default::default();
    let scope = BatchScope::new();
    let slot = pending.clone();
    let settle_scope = scope.clone();
    let schema = Schema::builder()
        .object_type(
            ObjectType::new("Query")
                .field(
                    FieldDefinition::new("x", FieldType::String)
                        .resolve(|_, _| Ok(Value::from("x").into())),
                )
                .field(FieldDefinition::new("y", FieldType::String).resolve(move |_, _| {
                    let deferred = Deferred::new();
                    *slot.borrow_mut() = Some(deferred.clone());
                    let settle = deferred.clone();
                    settle_scope.add_callback(move || settle.set_result(Value::from("y")))?;
                    Ok(deferred.into())
                }))
                .field(
                    FieldDefinition::new("z", FieldType::String)
                        .resolve(|_, _| Ok(Value::from("z").into())),
                ),
        )
        .build();
    let executor = Executor::new(schema, scope);
    let response = run(&executor, "{ x y z }");
    assert_data(&response, json!({ "x": "x", "y": "y", "z": "z" }));
    assert!(pending.borrow().as_ref().unwrap().is_done());
}

#[test]
fn default_resolver_reads_properties() {
    let schema = Schema::builder()
        .object_type(ObjectType::new("Query").field(
            FieldDefinition::new("user", FieldType::named("User")).resolve(|_, _| {
                Ok(json!({ "name": "Laura", "age": 33, "role": "ADMIN" }).into())
            }),
        ))
        .object_type(
            ObjectType::new("User")
                .field(FieldDefinition::new("name", FieldType::String))
                .field(FieldDefinition::new("age", FieldType::Int))
                .field(FieldDefinition::new("email", FieldType::String))
                .field(FieldDefinition::new("role", FieldType::named("Role"))),
        )
        .enum_type("Role", vec!["ADMIN".to_string()])
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let response = run(&executor, "{ user { name age email role __typename } }");
    assert!(response.errors.is_empty());
    assert_data(
        &response,
        json!({
            "user": {
                "name": "Laura",
                "age": 33,
                "email": null,
                "role": "ADMIN",
                "__typename": "User",
            }
        }),
    );
}

#[test]
fn resolver_errors_are_isolated() {
    let schema = Schema::builder()
        .object_type(
            ObjectType::new("Query")
                .field(
                    FieldDefinition::new("broken", FieldType::String)
                        .resolve(|_, _| Err(FieldError::new("broken field").into())),
                )
                .field(
                    FieldDefinition::new("fine", FieldType::String)
                        .resolve(|_, _| Ok(Value::from("fine").into())),
                ),
        )
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let response = run(&executor, "{\n  broken\n  fine\n}");
    assert_data(&response, json!({ "broken": null, "fine": "fine" }));
    assert_eq!(
        response.errors,
        vec![graphql::Error::builder()
            .message("broken field")
            .location(Location { line: 2, column: 3 })
            .path(Path::from("broken"))
            .build()]
    );
}

#[test]
fn null_in_non_null_field_bubbles_to_nullable_parent() {
    let schema = Schema::builder()
        .object_type(
            ObjectType::new("Query")
                .field(
                    FieldDefinition::new("user", FieldType::named("User"))
                        .resolve(|_, _| Ok(json!({ "name": null }).into())),
                )
                .field(
                    FieldDefinition::new("other", FieldType::String)
                        .resolve(|_, _| Ok(Value::from("still here").into())),
                ),
        )
        .object_type(
            ObjectType::new("User")
                .field(FieldDefinition::new("id", FieldType::Id))
                .field(FieldDefinition::new("name", ty("String!"))),
        )
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let response = run(&executor, "{ user { id name } other }");
    assert_data(&response, json!({ "user": null, "other": "still here" }));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].message,
        "Cannot return null for non-nullable field User.name."
    );
    assert_eq!(response.errors[0].path, Some(Path::from("user/name")));
}

#[test]
fn non_null_root_field_nulls_data() {
    let schema = Schema::builder()
        .object_type(ObjectType::new("Query").field(
            FieldDefinition::new("required", ty("String!"))
                .resolve(|_, _| Err(FieldError::new("gone").into())),
        ))
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let response = run(&executor, "{ required }");
    assert_eq!(response.data, Some(Value::Null));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "gone");
    assert_eq!(response.errors[0].path, Some(Path::from("required")));
}

#[test]
fn non_null_items_null_the_list() {
    let schema = Schema::builder()
        .object_type(
            ObjectType::new("Query")
                .field(
                    FieldDefinition::new("strict", ty("[Int!]"))
                        .resolve(|_, _| Ok(json!([1, null, 3]).into())),
                )
                .field(
                    FieldDefinition::new("loose", ty("[Int]"))
                        .resolve(|_, _| Ok(json!([1, "x", 3]).into())),
                ),
        )
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let response = run(&executor, "{ strict loose }");
    assert_data(&response, json!({ "strict": null, "loose": [1, null, 3] }));
    assert_eq!(
        response
            .errors
            .iter()
            .map(|error| (error.message.as_str(), error.path.clone().unwrap().to_string()))
            .collect::<Vec<_>>(),
        vec![
            ("Cannot return null for non-nullable field Query.strict.", "strict/1".to_string()),
            ("Int cannot represent value: \"x\"", "loose/1".to_string()),
        ]
    );
}

#[test]
fn non_iterable_list_value() {
    let schema = Schema::builder()
        .object_type(ObjectType::new("Query").field(
            FieldDefinition::new("users", ty("[String]")).resolve(|_, _| Ok(json!("nope").into())),
        ))
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let response = run(&executor, "{ users }");
    assert_data(&response, json!({ "users": null }));
    assert_eq!(
        response.errors[0].message,
        "Expected Iterable, but did not find one for field 'Query.users'."
    );
}

#[test]
fn unsettled_values_fail_the_execution() {
    let items: Rc<RefCell<Vec<Deferred<Value>>>> = Default::default();
    let created = items.clone();
    let schema = Schema::builder()
        .object_type(ObjectType::new("Query").field(
            FieldDefinition::new("numbers", ty("[Int]")).resolve(move |_, _| {
                let values: Vec<Deferred<Value>> = (0..3).map(|_| Deferred::new()).collect();
                *created.borrow_mut() = values.clone();
                Ok(values.into())
            }),
        ))
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let query = Query::parse("{ numbers }", &Configuration::default()).unwrap();

    // nothing is queued to settle the items
    assert_eq!(
        executor.execute(&query, None, &Object::new(), &Value::Null),
        Err(ExecutionError::IncompleteExecution)
    );
    assert_eq!(items.borrow().len(), 3);
    assert!(items.borrow().iter().all(|item| !item.is_done()));
}

#[test]
fn items_settled_in_reverse_order() {
    let scope = BatchScope::new();
    let callback_scope = scope.clone();
    let schema = Schema::builder()
        .object_type(ObjectType::new("Query").field(
            FieldDefinition::new("numbers", ty("[Int]")).resolve(move |_, _| {
                let values: Vec<Deferred<Value>> = (0..3).map(|_| Deferred::new()).collect();
                let settle = values.clone();
                callback_scope.add_callback(move || {
                    for (index, value) in settle.iter().enumerate().rev() {
                        value.set_result(Value::from(index))?;
                    }
                    Ok(())
                })?;
                Ok(values.into())
            }),
        ))
        .build();
    let executor = Executor::new(schema, scope);
    let response = run(&executor, "{ numbers }");
    assert_data(&response, json!({ "numbers": [0, 1, 2] }));
}

#[test]
fn contract_errors_abort_execution() {
    let active = BatchScope::new();
    let elsewhere = BatchScope::new();
    let loader: BatchLoader<String, Value> = BatchLoader::new(&elsewhere, |keys: &[String]| {
        Ok(keys.iter().map(|key| Ok(Value::from(key.as_str()))).collect())
    });
    let schema = Schema::builder()
        .object_type(ObjectType::new("Query").field(
            FieldDefinition::new("name", FieldType::String)
                .resolve(move |_, _| Ok(loader.load("1".to_string())?.into())),
        ))
        .build();
    let executor = Executor::new(schema, active);
    let query = Query::parse("{ name }", &Configuration::default()).unwrap();
    assert_eq!(
        executor.execute(&query, None, &Object::new(), &Value::Null),
        Err(ExecutionError::no_active_scope())
    );
    assert!(!executor.scope().is_active());
}

#[test]
fn unknown_operation_is_reported_in_the_response() {
    let schema = Schema::builder().object_type(ObjectType::new("Query")).build();
    let executor = Executor::new(schema, BatchScope::new());
    let query = Query::parse("query A { a } query B { b }", &Configuration::default()).unwrap();
    let response = executor
        .execute(&query, Some("C"), &Object::new(), &Value::Null)
        .unwrap();
    assert_eq!(response.data, None);
    assert_eq!(response.errors[0].message, "unknown operation named 'C'");

    let mutation = Query::parse("mutation { a }", &Configuration::default()).unwrap();
    let response = executor
        .execute(&mutation, None, &Object::new(), &Value::Null)
        .unwrap();
    assert_eq!(
        response.errors[0].message,
        "Schema is not configured for mutations."
    );
}

#[test]
fn variables_reach_resolvers() {
    let schema = Schema::builder()
        .object_type(ObjectType::new("Query").field(
            FieldDefinition::new("echo", FieldType::String)
                .resolve(|_, info| Ok(info.argument("value").cloned().unwrap_or_default().into())),
        ))
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let query = Query::parse(
        r#"query Echo($value: String = "default") { a: echo(value: $value) b: echo }"#,
        &Configuration::default(),
    )
    .unwrap();

    let response = executor
        .execute(&query, None, &Object::new(), &Value::Null)
        .unwrap();
    assert_data(&response, json!({ "a": "default", "b": null }));

    let variables = json!({ "value": "given" }).as_object().unwrap().clone();
    let response = executor
        .execute(&query, Some("Echo"), &variables, &Value::Null)
        .unwrap();
    assert_data(&response, json!({ "a": "given", "b": null }));
}

#[test]
fn deferred_null_is_kept_but_undefined_is_omitted() {
    let schema = Schema::builder()
        .object_type(
            ObjectType::new("Query")
                .field(
                    FieldDefinition::new("later", FieldType::String)
                        .resolve(|_, _| Ok(Deferred::ready(Value::Null).into())),
                )
                .field(
                    FieldDefinition::new("never", FieldType::String)
                        .resolve(|_, _| Ok(Resolved::Undefined)),
                ),
        )
        .build();
    let executor = Executor::new(schema, BatchScope::new());
    let response = run(&executor, "{ later never }");
    assert!(response.errors.is_empty());
    assert_data(&response, json!({ "later": null }));
}
