//! Field tree execution over deferred values.
//!
//! The executor walks the selection set depth first on a single call stack. Resolvers may return
//! a [`Deferred`] value instead of a concrete one: the field then reserves its slot in the result
//! and resumes from the callback that settles the value. The whole walk runs inside a
//! [`BatchScope`], whose drain runs the batch loads the walk queued, which settle the deferred
//! values, which resume the walk, until no deferred work is left.

mod frame;
#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json_bytes::ByteString;

use self::frame::CompletionFrame;
use crate::deferred::Deferred;
use crate::deferred::Resolution;
use crate::error::ExecutionError;
use crate::error::FieldError;
use crate::graphql;
use crate::graphql::Location;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::scope::BatchScope;
use crate::spec::FieldType;
use crate::spec::ObjectType;
use crate::spec::OperationKind;
use crate::spec::Query;
use crate::spec::Schema;
use crate::spec::Selection;
use crate::spec::TYPENAME;

/// What a resolver produced for a field.
#[derive(Clone)]
pub enum Resolved {
    Value(Value),
    /// Leaves the field out of the response.
    Undefined,
    /// A value that settles later. It always settles to a value, so a field can only be left
    /// out by returning [`Resolved::Undefined`] directly; a deferred `null` stays `null`.
    Deferred(Deferred<Value>),
    /// A list whose items may be deferred.
    List(Vec<Resolved>),
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolved::Undefined => f.write_str("Undefined"),
            Resolved::Deferred(deferred) => f.debug_tuple("Deferred").field(deferred).finish(),
            Resolved::List(items) => f.debug_tuple("List").field(items).finish(),
        }
    }
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        Resolved::Value(value)
    }
}

impl From<Deferred<Value>> for Resolved {
    fn from(deferred: Deferred<Value>) -> Self {
        Resolved::Deferred(deferred)
    }
}

impl<T: Into<Resolved>> From<Vec<T>> for Resolved {
    fn from(items: Vec<T>) -> Self {
        Resolved::List(items.into_iter().map(Into::into).collect())
    }
}

/// Information about the field being resolved.
#[derive(Clone, Debug)]
pub struct ResolveInfo {
    pub field_name: ByteString,
    pub parent_type: String,
    pub return_type: FieldType,
    pub path: Path,
    /// Argument values, with variables substituted.
    pub arguments: Object,
}

impl ResolveInfo {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }
}

/// Resolves the raw value of a field from its parent value.
pub trait Resolver {
    fn resolve(&self, source: &Value, info: &ResolveInfo) -> Result<Resolved, ExecutionError>;
}

impl<F> Resolver for F
where
    F: Fn(&Value, &ResolveInfo) -> Result<Resolved, ExecutionError>,
{
    fn resolve(&self, source: &Value, info: &ResolveInfo) -> Result<Resolved, ExecutionError> {
        self(source, info)
    }
}

/// Reads the property named like the field from the parent object.
pub fn default_resolver(source: &Value, info: &ResolveInfo) -> Resolved {
    source
        .as_object()
        .and_then(|object| object.get(info.field_name.as_str()))
        .cloned()
        .unwrap_or_default()
        .into()
}

/// The outcome of completing a field, a list item or an object.
#[derive(Clone, Debug)]
pub(crate) enum Completed {
    Value(Value),
    /// The field is left out of its parent object.
    Omitted,
    /// A non-null position could not be filled: the error travels up to the closest nullable
    /// position, which records it and becomes null.
    Bubble(graphql::Error),
}

struct ExecutionContext {
    schema: Rc<Schema>,
    variables: Object,
    errors: RefCell<Vec<graphql::Error>>,
}

impl ExecutionContext {
    fn record(&self, error: graphql::Error) {
        self.errors.borrow_mut().push(error);
    }
}

/// The field being completed, shared by the callbacks that resume it.
struct FieldContext {
    parent_type: String,
    field_name: ByteString,
    selection_set: Rc<[Selection]>,
    location: Option<Location>,
}

/// Executes queries against a schema, batching the loads made by resolvers.
#[derive(Clone, Debug)]
pub struct Executor {
    schema: Rc<Schema>,
    scope: BatchScope,
}

impl Executor {
    /// `scope` must be the scope the resolvers' loaders were created with.
    pub fn new(schema: Schema, scope: BatchScope) -> Self {
        Self {
            schema: Rc::new(schema),
            scope,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn scope(&self) -> &BatchScope {
        &self.scope
    }

    /// Executes an operation of `query`.
    ///
    /// Field errors end up in the response next to the partial data. Contract errors, and
    /// deferred values that never settle, fail the whole execution.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn execute(
        &self,
        query: &Query,
        operation_name: Option<&str>,
        variables: &Object,
        root_value: &Value,
    ) -> Result<Response, ExecutionError> {
        let operation = match query.operation(operation_name) {
            Ok(operation) => operation,
            Err(error) => {
                return Ok(Response::builder()
                    .error(
                        graphql::Error::builder()
                            .message(error.to_string())
                            .extension("code", "GRAPHQL_VALIDATION_FAILED")
                            .build(),
                    )
                    .build())
            }
        };
        let root_type = match operation.kind() {
            OperationKind::Query => self.schema.query_type(),
            OperationKind::Mutation => self.schema.mutation_type(),
        };
        let Some(root_type) = root_type else {
            let kind = match operation.kind() {
                OperationKind::Query => "queries",
                OperationKind::Mutation => "mutations",
            };
            return Ok(Response::builder()
                .error(
                    graphql::Error::builder()
                        .message(format!("Schema is not configured for {kind}."))
                        .build(),
                )
                .build());
        };

        let context = Rc::new(ExecutionContext {
            schema: self.schema.clone(),
            variables: operation.variables(variables),
            errors: RefCell::new(Vec::new()),
        });

        let root = self.scope.run(|| {
            Ok(execute_fields(
                &context,
                root_type,
                root_value,
                operation.selection_set(),
                &Path::empty(),
            ))
        })?;

        let data = match root.settled() {
            Resolution::Ready(Completed::Value(data)) => data,
            Resolution::Ready(Completed::Omitted) => Value::Null,
            Resolution::Ready(Completed::Bubble(error)) => {
                context.record(error);
                Value::Null
            }
            Resolution::Failed(error) => return Err(error),
            Resolution::Pending(_) => {
                failfast_error!("deferred execution failed to complete");
                return Err(ExecutionError::IncompleteExecution);
            }
        };

        let errors = context.errors.take();
        tracing::debug!(errors = errors.len(), "execution finished");
        Ok(Response::builder().data(data).errors(errors).build())
    }
}

fn execute_fields(
    context: &Rc<ExecutionContext>,
    object_type: &ObjectType,
    source: &Value,
    selection_set: &Rc<[Selection]>,
    path: &Path,
) -> Resolution<Completed> {
    let frame = CompletionFrame::object();
    for selection in selection_set.iter() {
        let field_path = path.join(&selection.response_key);
        let resolution = execute_field(context, object_type, source, selection, field_path);
        if !frame.push(Some(selection.response_key.clone()), resolution) {
            break;
        }
    }
    frame.seal()
}

fn execute_field(
    context: &Rc<ExecutionContext>,
    parent_type: &ObjectType,
    source: &Value,
    selection: &Selection,
    path: Path,
) -> Resolution<Completed> {
    if selection.name.as_str() == TYPENAME {
        return Resolution::Ready(Completed::Value(parent_type.name().into()));
    }
    let Some(definition) = parent_type.field_definition(selection.name.as_str()) else {
        return Resolution::Ready(Completed::Omitted);
    };

    let return_type = definition.field_type().clone();
    let info = ResolveInfo {
        field_name: selection.name.clone(),
        parent_type: parent_type.name().to_string(),
        return_type: return_type.clone(),
        path: path.clone(),
        arguments: selection.argument_values(&context.variables),
    };
    let resolved = match definition.resolver_ref() {
        Some(resolver) => resolver.resolve(source, &info),
        None => Ok(default_resolver(source, &info)),
    };

    let field = Rc::new(FieldContext {
        parent_type: info.parent_type,
        field_name: info.field_name,
        selection_set: selection.selection_set.clone(),
        location: selection.location,
    });
    let boundary = located(context, &return_type, path.clone(), field.location);
    match resolved {
        Ok(Resolved::Undefined) => Resolution::Ready(Completed::Omitted),
        Ok(resolved) => complete_value(context, &return_type, &field, path, resolved).chain(boundary),
        Err(error) => Resolution::Failed(error).chain(boundary),
    }
}

/// Catches the field errors of one field or list item.
///
/// The error is located at `path`. A nullable position records it and becomes null; a non-null
/// one passes it up to its parent.
fn located(
    context: &Rc<ExecutionContext>,
    ty: &FieldType,
    path: Path,
    location: Option<Location>,
) -> impl FnOnce(Result<Completed, ExecutionError>) -> Resolution<Completed> + 'static {
    let context = context.clone();
    let non_null = ty.is_non_null();
    move |outcome| {
        let error = match outcome {
            Ok(Completed::Bubble(error)) => error,
            Ok(completed) => return Resolution::Ready(completed),
            Err(ExecutionError::Field(error)) => {
                graphql::Error::from_field_error(error, Some(path), location.into_iter().collect())
            }
            Err(error) => return Resolution::Failed(error),
        };
        if non_null {
            Resolution::Ready(Completed::Bubble(error))
        } else {
            context.record(error);
            Resolution::Ready(Completed::Value(Value::Null))
        }
    }
}

fn complete_value(
    context: &Rc<ExecutionContext>,
    ty: &FieldType,
    field: &Rc<FieldContext>,
    path: Path,
    resolved: Resolved,
) -> Resolution<Completed> {
    let resolved = match resolved {
        Resolved::Deferred(deferred) => {
            let context = context.clone();
            let ty = ty.clone();
            let field = field.clone();
            return Resolution::Pending(deferred).chain(move |outcome| match outcome {
                Ok(value) => complete_value(&context, &ty, &field, path, Resolved::Value(value)),
                Err(error) => Resolution::Failed(error),
            });
        }
        Resolved::Undefined => Resolved::Value(Value::Null),
        resolved => resolved,
    };

    match ty {
        FieldType::NonNull(inner) => {
            let message = format!(
                "Cannot return null for non-nullable field {}.{}.",
                field.parent_type,
                field.field_name.as_str()
            );
            complete_value(context, inner, field, path, resolved).chain(move |outcome| match outcome {
                Ok(Completed::Value(Value::Null)) => {
                    Resolution::Failed(FieldError::new(message).into())
                }
                outcome => outcome.into(),
            })
        }
        _ if matches!(resolved, Resolved::Value(Value::Null)) => {
            Resolution::Ready(Completed::Value(Value::Null))
        }
        FieldType::List(item_type) => {
            let items: Vec<Resolved> = match resolved {
                Resolved::List(items) => items,
                Resolved::Value(Value::Array(values)) => {
                    values.into_iter().map(Resolved::Value).collect()
                }
                _ => {
                    return Resolution::Failed(
                        FieldError::new(format!(
                            "Expected Iterable, but did not find one for field '{}.{}'.",
                            field.parent_type,
                            field.field_name.as_str()
                        ))
                        .into(),
                    )
                }
            };
            complete_list(context, item_type, field, &path, items)
        }
        FieldType::Named(name) => {
            let Resolved::Value(value) = resolved else {
                return Resolution::Failed(
                    FieldError::new(format!("Expected a value of type \"{name}\" but got a list."))
                        .into(),
                );
            };
            if let Some(object_type) = context.schema.object_type(name) {
                return execute_fields(context, object_type, &value, &field.selection_set, &path);
            }
            complete_named_leaf(&context.schema, name, value).into()
        }
        leaf => {
            let Resolved::Value(value) = resolved else {
                return Resolution::Failed(
                    FieldError::new(format!("Expected a value of type \"{leaf}\" but got a list."))
                        .into(),
                );
            };
            coerce_scalar(leaf, value).map(Completed::Value).map_err(Into::into).into()
        }
    }
}

fn complete_list(
    context: &Rc<ExecutionContext>,
    item_type: &FieldType,
    field: &Rc<FieldContext>,
    path: &Path,
    items: Vec<Resolved>,
) -> Resolution<Completed> {
    let frame = CompletionFrame::list(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let item_path = path.join(index);
        let boundary = located(context, item_type, item_path.clone(), field.location);
        let resolution = complete_value(context, item_type, field, item_path, item).chain(boundary);
        if !frame.push(None, resolution) {
            break;
        }
    }
    frame.seal()
}

fn complete_named_leaf(
    schema: &Schema,
    name: &str,
    value: Value,
) -> Result<Completed, ExecutionError> {
    if let Some(values) = schema.enum_values(name) {
        return match value.as_str() {
            Some(variant) if values.contains(variant) => Ok(Completed::Value(value)),
            _ => Err(FieldError::new(format!(
                "Enum \"{name}\" cannot represent value: {value}"
            ))
            .into()),
        };
    }
    if schema.is_custom_scalar(name) {
        return Ok(Completed::Value(value));
    }
    Err(FieldError::new(format!("Unknown type \"{name}\".")).into())
}

// Spec: https://spec.graphql.org/draft/#sec-Scalars
fn coerce_scalar(ty: &FieldType, value: Value) -> Result<Value, FieldError> {
    let coerced = match (ty, &value) {
        (FieldType::String, Value::String(_)) => Some(value.clone()),
        (FieldType::String, Value::Number(number)) => Some(number.to_string().into()),
        (FieldType::String, Value::Bool(b)) => Some(b.to_string().into()),

        (FieldType::Int, Value::Number(number)) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            })
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::from),
        (FieldType::Int, Value::Bool(b)) => Some(Value::from(i32::from(*b))),
        (FieldType::Int, Value::String(s)) => s
            .as_str()
            .parse::<i32>()
            .ok()
            .map(Value::from),

        (FieldType::Float, Value::Number(number)) => number.as_f64().map(Value::from),
        (FieldType::Float, Value::Bool(b)) => Some(Value::from(if *b { 1.0 } else { 0.0 })),
        (FieldType::Float, Value::String(s)) => s
            .as_str()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::from),

        (FieldType::Id, Value::String(_)) => Some(value.clone()),
        (FieldType::Id, Value::Number(number)) if number.is_i64() || number.is_u64() => {
            Some(number.to_string().into())
        }

        (FieldType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (FieldType::Boolean, Value::Number(number)) => number.as_f64().map(|f| Value::Bool(f != 0.0)),
        _ => None,
    };

    coerced.ok_or_else(|| FieldError::new(format!("{ty} cannot represent value: {value}")))
}
