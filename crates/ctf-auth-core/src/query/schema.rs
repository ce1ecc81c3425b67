//! Static schema description and its introspection rendering.

use serde_json::{Value, json};

use crate::scopes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Scalar,
}

impl TypeKind {
    fn as_str(self) -> &'static str {
        match self {
            TypeKind::Object => "OBJECT",
            TypeKind::Scalar => "SCALAR",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TypeRef {
    Named(&'static str),
    List(&'static TypeRef),
    NonNull(&'static TypeRef),
}

#[derive(Debug)]
pub struct ArgDef {
    pub name: &'static str,
    pub ty: TypeRef,
    pub description: Option<&'static str>,
}

#[derive(Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub description: Option<&'static str>,
    pub ty: TypeRef,
    /// Scope the caller's token must carry for the field to resolve.
    pub required_scope: Option<&'static str>,
}

#[derive(Debug)]
pub struct TypeDef {
    pub name: &'static str,
    pub kind: TypeKind,
    pub description: Option<&'static str>,
    pub fields: &'static [FieldDef],
}

#[derive(Debug)]
pub struct DirectiveDef {
    pub name: &'static str,
    pub description: Option<&'static str>,
    pub locations: &'static [&'static str],
    pub args: &'static [ArgDef],
}

const STRING: TypeRef = TypeRef::Named("String");
const NON_NULL_STRING: TypeRef = TypeRef::NonNull(&STRING);
const NON_NULL_ID: TypeRef = TypeRef::NonNull(&TypeRef::Named("ID"));
const ADMIN_SECRET: TypeRef = TypeRef::NonNull(&TypeRef::Named("AdminSecret"));

pub const QUERY: TypeDef = TypeDef {
    name: "Query",
    kind: TypeKind::Object,
    description: None,
    fields: &[
        FieldDef {
            name: "me",
            description: Some("The client identified by the bearer token."),
            ty: TypeRef::Named("Viewer"),
            required_scope: None,
        },
        FieldDef {
            name: "adminSecrets",
            description: Some("Administrative secrets. @requireScope(scope: \"ADMIN_SECRETS\")"),
            ty: TypeRef::List(&ADMIN_SECRET),
            required_scope: Some(scopes::ADMIN_SECRETS),
        },
    ],
};

pub const VIEWER: TypeDef = TypeDef {
    name: "Viewer",
    kind: TypeKind::Object,
    description: Some("A registered OAuth client."),
    fields: &[
        FieldDef { name: "clientId", description: None, ty: NON_NULL_STRING, required_scope: None },
        FieldDef { name: "clientName", description: None, ty: STRING, required_scope: None },
        FieldDef {
            name: "scope",
            description: Some("Scope carried by the presented access token."),
            ty: NON_NULL_STRING,
            required_scope: None,
        },
    ],
};

pub const ADMIN_SECRET_TYPE: TypeDef = TypeDef {
    name: "AdminSecret",
    kind: TypeKind::Object,
    description: Some("Secret material reserved for administrators."),
    fields: &[
        FieldDef { name: "id", description: None, ty: NON_NULL_ID, required_scope: None },
        FieldDef { name: "value", description: None, ty: NON_NULL_STRING, required_scope: None },
        FieldDef { name: "scopeRequired", description: None, ty: NON_NULL_STRING, required_scope: None },
    ],
};

static SCALARS: [TypeDef; 3] = [
    TypeDef { name: "String", kind: TypeKind::Scalar, description: None, fields: &[] },
    TypeDef { name: "ID", kind: TypeKind::Scalar, description: None, fields: &[] },
    TypeDef { name: "Boolean", kind: TypeKind::Scalar, description: None, fields: &[] },
];

pub const REQUIRE_SCOPE: DirectiveDef = DirectiveDef {
    name: "requireScope",
    description: Some("Resolves the field only for tokens carrying the given scope."),
    locations: &["FIELD_DEFINITION"],
    args: &[ArgDef { name: "scope", ty: NON_NULL_STRING, description: None }],
};

/// Secrets behind `Query.adminSecrets`.
pub const ADMIN_SECRETS: [(&str, &str); 2] = [("1", "database_password_123"), ("2", "api_key_secret")];

pub fn types() -> impl Iterator<Item = &'static TypeDef> {
    const OBJECTS: [&TypeDef; 3] = [&QUERY, &VIEWER, &ADMIN_SECRET_TYPE];
    OBJECTS.into_iter().chain(SCALARS.iter())
}

pub fn find_type(name: &str) -> Option<&'static TypeDef> {
    types().find(|t| t.name == name)
}

impl TypeDef {
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// --- Introspection rendering ---

/// The `__schema` object. Unauthenticated callers see all of it.
pub fn schema_object() -> Value {
    json!({
        "__typename": "__Schema",
        "description": null,
        "queryType": type_object(&QUERY),
        "mutationType": null,
        "subscriptionType": null,
        "types": types().map(type_object).collect::<Vec<_>>(),
        "directives": [directive_object(&REQUIRE_SCOPE)],
    })
}

/// A full `__Type` object for a named type.
pub fn type_object(def: &TypeDef) -> Value {
    let fields = match def.kind {
        TypeKind::Object => Value::Array(def.fields.iter().map(field_object).collect()),
        TypeKind::Scalar => Value::Null,
    };
    let interfaces = match def.kind {
        TypeKind::Object => json!([]),
        TypeKind::Scalar => Value::Null,
    };
    json!({
        "__typename": "__Type",
        "kind": def.kind.as_str(),
        "name": def.name,
        "description": def.description,
        "fields": fields,
        "interfaces": interfaces,
        "possibleTypes": null,
        "enumValues": null,
        "inputFields": null,
        "ofType": null,
        "specifiedByURL": null,
    })
}

fn field_object(def: &FieldDef) -> Value {
    json!({
        "__typename": "__Field",
        "name": def.name,
        "description": def.description,
        "args": [],
        "type": type_ref_object(&def.ty),
        "isDeprecated": false,
        "deprecationReason": null,
    })
}

fn arg_object(def: &ArgDef) -> Value {
    json!({
        "__typename": "__InputValue",
        "name": def.name,
        "description": def.description,
        "type": type_ref_object(&def.ty),
        "defaultValue": null,
        "isDeprecated": false,
        "deprecationReason": null,
    })
}

fn directive_object(def: &DirectiveDef) -> Value {
    json!({
        "__typename": "__Directive",
        "name": def.name,
        "description": def.description,
        "locations": def.locations,
        "args": def.args.iter().map(arg_object).collect::<Vec<_>>(),
        "isRepeatable": false,
    })
}

/// Type references stop at the named type; only `kind`, `name` and
/// `ofType` carry data there.
fn type_ref_object(ty: &TypeRef) -> Value {
    let (kind, name, of_type) = match ty {
        TypeRef::Named(name) => {
            let kind = find_type(name).map_or(TypeKind::Object, |t| t.kind);
            (kind.as_str(), Value::from(*name), Value::Null)
        }
        TypeRef::List(inner) => ("LIST", Value::Null, type_ref_object(inner)),
        TypeRef::NonNull(inner) => ("NON_NULL", Value::Null, type_ref_object(inner)),
    };
    json!({
        "__typename": "__Type",
        "kind": kind,
        "name": name,
        "description": null,
        "fields": null,
        "interfaces": null,
        "possibleTypes": null,
        "enumValues": null,
        "inputFields": null,
        "ofType": of_type,
        "specifiedByURL": null,
    })
}
