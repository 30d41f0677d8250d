use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;

use derivative::Derivative;
use indexmap::IndexMap;

use super::FieldType;
use crate::error::ExecutionError;
use crate::execution::ResolveInfo;
use crate::execution::Resolved;
use crate::execution::Resolver;
use crate::json_ext::Value;

/// The object types the executor walks, and the resolvers attached to their fields.
#[derive(Debug, Clone)]
pub struct Schema {
    query_type: String,
    mutation_type: Option<String>,
    object_types: HashMap<String, ObjectType>,
    enums: HashMap<String, HashSet<String>>,
    custom_scalars: HashSet<String>,
}

#[buildstructor::buildstructor]
impl Schema {
    /// Builder methods:
    ///
    /// * `.object_type(ObjectType)`, may be called multiple times.
    /// * `.query_type(impl Into<String>)`, defaults to `Query`.
    /// * `.mutation_type(impl Into<String>)`
    /// * `.enum_type(impl Into<String>, Vec<String>)` for an enum and its values.
    /// * `.custom_scalar(impl Into<String>)`
    #[builder(visibility = "pub")]
    fn new(
        query_type: Option<String>,
        mutation_type: Option<String>,
        object_types: Vec<ObjectType>,
        enum_types: HashMap<String, Vec<String>>,
        custom_scalars: HashSet<String>,
    ) -> Self {
        Self {
            query_type: query_type.unwrap_or_else(|| "Query".to_string()),
            mutation_type,
            object_types: object_types
                .into_iter()
                .map(|object_type| (object_type.name.clone(), object_type))
                .collect(),
            enums: enum_types
                .into_iter()
                .map(|(name, values)| (name, values.into_iter().collect()))
                .collect(),
            custom_scalars,
        }
    }

    pub fn query_type(&self) -> Option<&ObjectType> {
        self.object_types.get(&self.query_type)
    }

    pub fn mutation_type(&self) -> Option<&ObjectType> {
        self.mutation_type
            .as_ref()
            .and_then(|name| self.object_types.get(name))
    }

    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.object_types.get(name)
    }

    /// Returns the values of an enum type.
    pub fn enum_values(&self, name: &str) -> Option<&HashSet<String>> {
        self.enums.get(name)
    }

    pub fn is_custom_scalar(&self, name: &str) -> bool {
        self.custom_scalars.contains(name)
    }
}

/// An object type: a name and its fields, in declaration order.
#[derive(Debug, Clone)]
pub struct ObjectType {
    name: String,
    fields: IndexMap<String, FieldDefinition>,
}

impl ObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Adds a field, replacing any field with the same name.
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_definition(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.values()
    }
}

/// A field of an object type.
///
/// Fields without a resolver read the property of the parent value named like the field.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct FieldDefinition {
    name: String,
    field_type: FieldType,
    #[derivative(Debug = "ignore")]
    resolver: Option<Rc<dyn Resolver>>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            resolver: None,
        }
    }

    /// Resolves the field with a closure.
    pub fn resolve<F>(self, resolve: F) -> Self
    where
        F: Fn(&Value, &ResolveInfo) -> Result<Resolved, ExecutionError> + 'static,
    {
        self.resolver(resolve)
    }

    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Some(Rc::new(resolver));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub(crate) fn resolver_ref(&self) -> Option<&Rc<dyn Resolver>> {
        self.resolver.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_schema() {
        let schema = Schema::builder()
            .object_type(
                ObjectType::new("Query")
                    .field(FieldDefinition::new("users", "[User]".parse().unwrap())),
            )
            .object_type(
                ObjectType::new("User")
                    .field(FieldDefinition::new("name", FieldType::String))
                    .field(FieldDefinition::new("role", FieldType::named("Role")))
                    .field(FieldDefinition::new("id", FieldType::non_null(FieldType::Id))),
            )
            .enum_type("Role", vec!["ADMIN".to_string(), "USER".to_string()])
            .custom_scalar("DateTime")
            .build();

        assert_eq!(schema.query_type().unwrap().name(), "Query");
        assert!(schema.mutation_type().is_none());
        let user = schema.object_type("User").unwrap();
        let names: Vec<_> = user.fields().map(FieldDefinition::name).collect();
        assert_eq!(names, vec!["name", "role", "id"]);
        assert!(schema.enum_values("Role").unwrap().contains("ADMIN"));
        assert!(schema.is_custom_scalar("DateTime"));
        assert!(user.field_definition("name").unwrap().resolver_ref().is_none());
    }

    #[test]
    fn root_types_are_looked_up_by_name() {
        let schema = Schema::builder()
            .query_type("Root")
            .mutation_type("Mutation")
            .object_type(ObjectType::new("Root"))
            .build();
        assert_eq!(schema.query_type().unwrap().name(), "Root");
        // declared but never defined
        assert!(schema.mutation_type().is_none());
        assert!(Schema::builder().build().query_type().is_none());
    }
}
