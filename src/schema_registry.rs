use async_trait::async_trait;
use graphql_parser::parse_schema;
use graphql_parser::schema::{Definition, Type, TypeDefinition as AstTypeDefinition, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::SubgraphConfig;
use crate::error::SchemaError;

const BUILTIN_SCALARS: [&str; 5] = ["ID", "String", "Int", "Float", "Boolean"];

/// Ordered field names that identify an entity instance within its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKey(pub Vec<String>);

impl EntityKey {
    pub fn fields(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Scalar,
    Enum,
    InputObject,
}

/// The named inner type of a field plus whether any list wrapper applies.
/// Nullability is irrelevant to planning and is not tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
    pub name: String,
    pub is_list: bool,
}

#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    /// The one subgraph that resolves this field. Entity key fields keep
    /// the first declaring subgraph here but are marked `shared` and may
    /// be fetched wherever the entity is resolvable.
    pub owner_subgraph: String,
    pub shared: bool,
}

#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldDefinition>,
    pub entity_key: Option<EntityKey>,
    /// Subgraphs that declare this type with its key and can resolve it
    /// by reference through `_entities`.
    pub resolvable_in: Vec<String>,
    /// Concrete object types behind an interface or union.
    pub possible_types: Vec<String>,
}

impl TypeDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_entity(&self) -> bool {
        self.entity_key.is_some()
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }
}

/// The composed supergraph: the union of all subgraph schema fragments
/// plus field ownership and entity key metadata. Immutable once built;
/// handed out as an `Arc` snapshot so reloads never expose a partially
/// composed schema to in-flight operations.
#[derive(Debug, Clone)]
pub struct SupergraphSchema {
    pub subgraphs: HashMap<String, SubgraphConfig>,
    pub types: HashMap<String, TypeDefinition>,
}

impl SupergraphSchema {
    pub fn type_def(&self, type_name: &str) -> Result<&TypeDefinition, SchemaError> {
        self.types
            .get(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))
    }

    pub fn field(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Result<&FieldDefinition, SchemaError> {
        self.type_def(type_name)?
            .field(field_name)
            .ok_or_else(|| SchemaError::UnknownField {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            })
    }

    pub fn resolve_field_owner(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Result<&str, SchemaError> {
        Ok(&self.field(type_name, field_name)?.owner_subgraph)
    }

    pub fn entity_key_for(&self, type_name: &str) -> Result<&EntityKey, SchemaError> {
        self.type_def(type_name)?
            .entity_key
            .as_ref()
            .ok_or_else(|| SchemaError::NotAnEntity(type_name.to_string()))
    }

    /// Whether `subgraph` declares `type_name` as an entity and can
    /// answer an `_entities` reference for it.
    pub fn resolvable_in(&self, type_name: &str, subgraph: &str) -> bool {
        self.types
            .get(type_name)
            .map(|t| t.resolvable_in.iter().any(|s| s == subgraph))
            .unwrap_or(false)
    }

    pub fn subgraph_url(&self, subgraph: &str) -> Option<&str> {
        self.subgraphs.get(subgraph).map(|s| s.url.as_str())
    }

    fn is_scalar_like(&self, type_name: &str) -> bool {
        if BUILTIN_SCALARS.contains(&type_name) {
            return true;
        }
        matches!(
            self.types.get(type_name).map(|t| t.kind),
            Some(TypeKind::Scalar) | Some(TypeKind::Enum)
        )
    }
}

#[async_trait]
pub trait SchemaRegistry {
    async fn register_subgraph(&self, subgraph: SubgraphConfig) -> Result<(), SchemaError>;
    async fn snapshot(&self) -> Result<Arc<SupergraphSchema>, SchemaError>;
}

/// Registry composing the supergraph from registered subgraph fragments.
/// Composition is lazy: registering invalidates the cached snapshot, the
/// next `snapshot()` call rebuilds and atomically publishes it.
pub struct InMemorySchemaRegistry {
    // Registration order is preserved so composition (and therefore
    // field ownership tie-breaks) is deterministic across restarts.
    subgraphs: RwLock<Vec<SubgraphConfig>>,
    composed: RwLock<Option<Arc<SupergraphSchema>>>,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        InMemorySchemaRegistry {
            subgraphs: RwLock::new(Vec::new()),
            composed: RwLock::new(None),
        }
    }

    fn compose(subgraphs: &[SubgraphConfig]) -> Result<SupergraphSchema, SchemaError> {
        let mut schema = SupergraphSchema {
            subgraphs: subgraphs
                .iter()
                .map(|s| (s.name.clone(), s.clone()))
                .collect(),
            types: HashMap::new(),
        };
        // Interface name -> implementing object types, gathered as we go.
        let mut implementations: HashMap<String, Vec<String>> = HashMap::new();

        for subgraph in subgraphs {
            let document = parse_schema::<String>(&subgraph.schema).map_err(|e| {
                SchemaError::ParseFailure {
                    subgraph: subgraph.name.clone(),
                    message: e.to_string(),
                }
            })?;

            for definition in &document.definitions {
                let Definition::TypeDefinition(typedef) = definition else {
                    continue;
                };
                match typedef {
                    AstTypeDefinition::Object(obj) => {
                        let key = parse_key_directive(&obj.directives);
                        let entry = schema
                            .types
                            .entry(obj.name.clone())
                            .or_insert_with(|| TypeDefinition {
                                name: obj.name.clone(),
                                kind: TypeKind::Object,
                                fields: Vec::new(),
                                entity_key: None,
                                resolvable_in: Vec::new(),
                                possible_types: Vec::new(),
                            });

                        if let Some(key) = key {
                            match &entry.entity_key {
                                None => entry.entity_key = Some(key),
                                Some(existing) if *existing != key => {
                                    return Err(SchemaError::InvalidEntityKey {
                                        type_name: obj.name.clone(),
                                        reason: format!(
                                            "subgraph {} declares key {:?} but {:?} was declared earlier",
                                            subgraph.name, key.0, existing.0
                                        ),
                                    });
                                }
                                Some(_) => {}
                            }
                            entry.resolvable_in.push(subgraph.name.clone());
                        }

                        let key_fields: Vec<String> = entry
                            .entity_key
                            .as_ref()
                            .map(|k| k.0.clone())
                            .unwrap_or_default();

                        for field in &obj.fields {
                            let is_key_field = key_fields.iter().any(|k| k == &field.name);
                            match entry.fields.iter_mut().find(|f| f.name == field.name) {
                                Some(existing) => {
                                    if !is_key_field {
                                        return Err(SchemaError::CompositionConflict {
                                            type_name: obj.name.clone(),
                                            field_name: field.name.clone(),
                                            first: existing.owner_subgraph.clone(),
                                            second: subgraph.name.clone(),
                                        });
                                    }
                                    existing.shared = true;
                                }
                                None => {
                                    entry.fields.push(FieldDefinition {
                                        name: field.name.clone(),
                                        field_type: flatten_type(&field.field_type),
                                        owner_subgraph: subgraph.name.clone(),
                                        shared: is_key_field,
                                    });
                                }
                            }
                        }

                        for interface in &obj.implements_interfaces {
                            let implementors =
                                implementations.entry(interface.clone()).or_default();
                            if !implementors.contains(&obj.name) {
                                implementors.push(obj.name.clone());
                            }
                        }
                    }
                    AstTypeDefinition::Interface(iface) => {
                        let entry = schema
                            .types
                            .entry(iface.name.clone())
                            .or_insert_with(|| TypeDefinition {
                                name: iface.name.clone(),
                                kind: TypeKind::Interface,
                                fields: Vec::new(),
                                entity_key: None,
                                resolvable_in: Vec::new(),
                                possible_types: Vec::new(),
                            });
                        for field in &iface.fields {
                            if entry.field(&field.name).is_none() {
                                entry.fields.push(FieldDefinition {
                                    name: field.name.clone(),
                                    field_type: flatten_type(&field.field_type),
                                    owner_subgraph: subgraph.name.clone(),
                                    shared: true,
                                });
                            }
                        }
                    }
                    AstTypeDefinition::Union(union_type) => {
                        let entry = schema
                            .types
                            .entry(union_type.name.clone())
                            .or_insert_with(|| TypeDefinition {
                                name: union_type.name.clone(),
                                kind: TypeKind::Union,
                                fields: Vec::new(),
                                entity_key: None,
                                resolvable_in: Vec::new(),
                                possible_types: Vec::new(),
                            });
                        for member in &union_type.types {
                            if !entry.possible_types.contains(member) {
                                entry.possible_types.push(member.clone());
                            }
                        }
                    }
                    AstTypeDefinition::Scalar(scalar) => {
                        schema
                            .types
                            .entry(scalar.name.clone())
                            .or_insert_with(|| TypeDefinition {
                                name: scalar.name.clone(),
                                kind: TypeKind::Scalar,
                                fields: Vec::new(),
                                entity_key: None,
                                resolvable_in: Vec::new(),
                                possible_types: Vec::new(),
                            });
                    }
                    AstTypeDefinition::Enum(enum_type) => {
                        schema
                            .types
                            .entry(enum_type.name.clone())
                            .or_insert_with(|| TypeDefinition {
                                name: enum_type.name.clone(),
                                kind: TypeKind::Enum,
                                fields: Vec::new(),
                                entity_key: None,
                                resolvable_in: Vec::new(),
                                possible_types: Vec::new(),
                            });
                    }
                    AstTypeDefinition::InputObject(input) => {
                        schema
                            .types
                            .entry(input.name.clone())
                            .or_insert_with(|| TypeDefinition {
                                name: input.name.clone(),
                                kind: TypeKind::InputObject,
                                fields: Vec::new(),
                                entity_key: None,
                                resolvable_in: Vec::new(),
                                possible_types: Vec::new(),
                            });
                    }
                }
            }
        }

        for (interface, implementors) in implementations {
            if let Some(entry) = schema.types.get_mut(&interface) {
                entry.possible_types = implementors;
            }
        }

        validate_entity_keys(&schema)?;
        Ok(schema)
    }
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register_subgraph(&self, subgraph: SubgraphConfig) -> Result<(), SchemaError> {
        let mut subgraphs = self.subgraphs.write().await;
        match subgraphs.iter_mut().find(|s| s.name == subgraph.name) {
            Some(existing) => *existing = subgraph,
            None => subgraphs.push(subgraph),
        }
        drop(subgraphs);

        let mut composed = self.composed.write().await;
        *composed = None;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Arc<SupergraphSchema>, SchemaError> {
        let composed = self.composed.read().await;
        if let Some(schema) = &*composed {
            return Ok(Arc::clone(schema));
        }
        drop(composed);

        let subgraphs = self.subgraphs.read().await;
        let schema = Arc::new(Self::compose(&subgraphs)?);
        drop(subgraphs);

        let mut composed = self.composed.write().await;
        *composed = Some(Arc::clone(&schema));
        Ok(schema)
    }
}

/// Reads `@key(fields: "a b c")` off an object type. Composite key
/// selections are out of scope; the fields argument is a flat list of
/// field names.
fn parse_key_directive<'a>(
    directives: &[graphql_parser::schema::Directive<'a, String>],
) -> Option<EntityKey> {
    directives
        .iter()
        .find(|d| d.name == "key")
        .and_then(|d| {
            d.arguments
                .iter()
                .find(|(name, _)| name == "fields")
                .map(|(_, value)| value)
        })
        .and_then(|value| match value {
            Value::String(fields) => {
                let names: Vec<String> =
                    fields.split_whitespace().map(str::to_string).collect();
                if names.is_empty() {
                    None
                } else {
                    Some(EntityKey(names))
                }
            }
            _ => None,
        })
}

fn flatten_type<'a>(field_type: &Type<'a, String>) -> FieldType {
    fn walk<'a>(t: &Type<'a, String>, is_list: bool) -> FieldType {
        match t {
            Type::NamedType(name) => FieldType {
                name: name.clone(),
                is_list,
            },
            Type::ListType(inner) => walk(inner, true),
            Type::NonNullType(inner) => walk(inner, is_list),
        }
    }
    walk(field_type, false)
}

fn validate_entity_keys(schema: &SupergraphSchema) -> Result<(), SchemaError> {
    for typedef in schema.types.values() {
        let Some(key) = &typedef.entity_key else {
            continue;
        };
        for key_field in key.fields() {
            let Some(field) = typedef.field(key_field) else {
                return Err(SchemaError::InvalidEntityKey {
                    type_name: typedef.name.clone(),
                    reason: format!("key field {} is not declared on the type", key_field),
                });
            };
            if !schema.is_scalar_like(&field.field_type.name) {
                return Err(SchemaError::InvalidEntityKey {
                    type_name: typedef.name.clone(),
                    reason: format!(
                        "key field {} has non-scalar type {}",
                        key_field, field.field_type.name
                    ),
                });
            }
        }
    }
    Ok(())
}
