//! Query layer over a fixed schema.
//!
//! Introspection (`__schema`, `__type`) always resolves in full. Data fields
//! need an authenticated viewer, and fields tagged with a required scope
//! need that scope on the viewer's token. A denied field resolves to null
//! and contributes an entry to `errors`; the rest of the query still runs.

pub mod parser;
pub mod schema;

use serde_json::{Map, Value, json};

use crate::error::Result;
use crate::scopes;
use parser::Field;
use schema::TypeDef;

const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
const FORBIDDEN: &str = "FORBIDDEN";
const VALIDATION_FAILED: &str = "GRAPHQL_VALIDATION_FAILED";

/// Caller identity taken from a verified bearer token.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub client_id: String,
    pub client_name: Option<String>,
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// `{"data": ...}` plus `errors` when any field failed.
    pub response: Value,
    /// Whether the query touched `__schema` or `__type`.
    pub introspected: bool,
}

/// Parse and execute `query`. Only syntax errors fail the whole request.
pub fn execute(query: &str, viewer: Option<&Viewer>) -> Result<QueryOutcome> {
    let document = parser::parse(query)?;
    let mut exec = Executor { viewer, errors: Vec::new(), introspected: false };

    let mut data = Map::new();
    for field in &document.selection {
        let mut path = vec![Value::from(field.response_key())];
        let value = exec.root_field(field, &mut path);
        data.insert(field.response_key().to_string(), value);
    }

    let mut response = json!({ "data": data });
    if !exec.errors.is_empty() {
        response["errors"] = Value::Array(exec.errors);
    }
    tracing::debug!(
        operation = document.operation_name.as_deref().unwrap_or("anonymous"),
        introspected = exec.introspected,
        "query executed"
    );
    Ok(QueryOutcome { response, introspected: exec.introspected })
}

struct Executor<'a> {
    viewer: Option<&'a Viewer>,
    errors: Vec<Value>,
    introspected: bool,
}

impl Executor<'_> {
    fn error(&mut self, message: impl Into<String>, path: &[Value], code: &str) {
        self.errors.push(json!({
            "message": message.into(),
            "path": path,
            "extensions": { "code": code },
        }));
    }

    fn root_field(&mut self, field: &Field, path: &mut Vec<Value>) -> Value {
        match field.name.as_str() {
            "__typename" => Value::from(schema::QUERY.name),
            "__schema" => {
                self.introspected = true;
                self.project(&schema::schema_object(), field, path)
            }
            "__type" => {
                self.introspected = true;
                let Some(name) = field.argument("name").and_then(|v| v.as_str()) else {
                    self.error("__type requires a name argument", path, VALIDATION_FAILED);
                    return Value::Null;
                };
                match schema::find_type(name) {
                    Some(def) => self.project(&schema::type_object(def), field, path),
                    None => Value::Null,
                }
            }
            name => {
                let Some(def) = schema::QUERY.field(name) else {
                    self.error(
                        format!("Cannot query field \"{name}\" on type \"Query\"."),
                        path,
                        VALIDATION_FAILED,
                    );
                    return Value::Null;
                };
                let Some(viewer) = self.viewer else {
                    self.error("Authentication required", path, UNAUTHENTICATED);
                    return Value::Null;
                };
                if let Some(required) = def.required_scope {
                    if !scopes::has_scope(&viewer.scope, required) {
                        tracing::debug!(client_id = %viewer.client_id, field = name, "scope denied");
                        self.error(format!("Requires scope: {required}"), path, FORBIDDEN);
                        return Value::Null;
                    }
                }
                match name {
                    "me" => {
                        let me = typed_object(&schema::VIEWER, [
                            ("clientId", Value::from(viewer.client_id.as_str())),
                            ("clientName", Value::from(viewer.client_name.clone())),
                            ("scope", Value::from(viewer.scope.as_str())),
                        ]);
                        self.project(&me, field, path)
                    }
                    "adminSecrets" => {
                        let secrets: Vec<Value> = schema::ADMIN_SECRETS
                            .iter()
                            .map(|(id, value)| {
                                typed_object(&schema::ADMIN_SECRET_TYPE, [
                                    ("id", Value::from(*id)),
                                    ("value", Value::from(*value)),
                                    ("scopeRequired", Value::from(required_scope(def))),
                                ])
                            })
                            .collect();
                        self.project(&Value::Array(secrets), field, path)
                    }
                    _ => Value::Null,
                }
            }
        }
    }

    /// Shape `value` by the field's selection set. Objects must carry a
    /// `__typename` entry; selecting a key they lack is a validation error.
    fn project(&mut self, value: &Value, field: &Field, path: &mut Vec<Value>) -> Value {
        match value {
            Value::Null => Value::Null,
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        path.push(Value::from(i));
                        let projected = self.project(item, field, path);
                        path.pop();
                        projected
                    })
                    .collect(),
            ),
            Value::Object(object) => {
                if field.selection.is_empty() {
                    self.error(
                        format!("Field \"{}\" must have a selection of subfields.", field.name),
                        path,
                        VALIDATION_FAILED,
                    );
                    return Value::Null;
                }
                let type_name = object.get("__typename").and_then(Value::as_str).unwrap_or("Object");
                let mut out = Map::new();
                for child in &field.selection {
                    path.push(Value::from(child.response_key()));
                    let projected = match object.get(&child.name) {
                        Some(inner) => self.project(inner, child, path),
                        None => {
                            self.error(
                                format!("Cannot query field \"{}\" on type \"{type_name}\".", child.name),
                                path,
                                VALIDATION_FAILED,
                            );
                            Value::Null
                        }
                    };
                    path.pop();
                    out.insert(child.response_key().to_string(), projected);
                }
                Value::Object(out)
            }
            scalar => {
                if !field.selection.is_empty() {
                    self.error(
                        format!("Field \"{}\" must not have a selection since it is a leaf.", field.name),
                        path,
                        VALIDATION_FAILED,
                    );
                    return Value::Null;
                }
                scalar.clone()
            }
        }
    }
}

fn required_scope(def: &schema::FieldDef) -> &'static str {
    def.required_scope.unwrap_or(scopes::USER_READ)
}

fn typed_object<const N: usize>(def: &TypeDef, entries: [(&str, Value); N]) -> Value {
    let mut object = Map::new();
    object.insert("__typename".to_string(), Value::from(def.name));
    for (key, value) in entries {
        debug_assert!(def.field(key).is_some(), "{}.{key} not in schema", def.name);
        object.insert(key.to_string(), value);
    }
    Value::Object(object)
}
