//! Attributes attached to fields (`@id`, `@default(...)`) and models (`@@index([...])`).

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// An attribute argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// A string literal.
    String(String),
    /// An integer literal.
    Int(i64),
    /// A float literal.
    Float(f64),
    /// A boolean literal.
    Boolean(bool),
    /// An identifier/constant reference (e.g., an enum value or `Cascade`).
    Ident(SmolStr),
    /// A function call (e.g., `now()`, `autoincrement()`).
    Function(SmolStr, Vec<AttributeValue>),
    /// An array of values.
    Array(Vec<AttributeValue>),
    /// A list of field references (e.g., `[authorId]`).
    FieldRefList(Vec<SmolStr>),
}

impl AttributeValue {
    /// Try to get the value as a string.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get the value as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get the value as an identifier.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Self::Ident(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as a list of field names.
    ///
    /// Accepts both `FieldRefList` and arrays of identifiers or strings, which
    /// is how parsers commonly hand back `[a, b]`.
    pub fn as_field_list(&self) -> Option<Vec<SmolStr>> {
        match self {
            Self::FieldRefList(fields) => Some(fields.clone()),
            Self::Array(items) => items
                .iter()
                .map(|item| match item {
                    Self::Ident(s) => Some(s.clone()),
                    Self::String(s) => Some(SmolStr::new(s)),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

/// An attribute argument (named or positional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeArgument {
    /// Argument name (None for positional arguments).
    pub name: Option<SmolStr>,
    /// Argument value.
    pub value: AttributeValue,
}

impl AttributeArgument {
    /// Create a positional argument.
    pub fn positional(value: AttributeValue) -> Self {
        Self { name: None, value }
    }

    /// Create a named argument.
    pub fn named(name: impl Into<SmolStr>, value: AttributeValue) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }

    /// Check if this is a positional argument.
    pub fn is_positional(&self) -> bool {
        self.name.is_none()
    }
}

/// An attribute applied to a field or model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name (without `@`/`@@` prefix).
    pub name: SmolStr,
    /// Attribute arguments.
    #[serde(default)]
    pub args: Vec<AttributeArgument>,
}

impl Attribute {
    /// Create a new attribute.
    pub fn new(name: impl Into<SmolStr>, args: Vec<AttributeArgument>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Create an attribute with no arguments.
    pub fn simple(name: impl Into<SmolStr>) -> Self {
        Self::new(name, vec![])
    }

    /// Get the attribute name as a string.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Check if this attribute has the given name.
    pub fn is(&self, name: &str) -> bool {
        self.name.as_str() == name
    }

    /// Get the first positional argument.
    pub fn first_arg(&self) -> Option<&AttributeValue> {
        self.args
            .iter()
            .find(|a| a.is_positional())
            .map(|a| &a.value)
    }

    /// Get a named argument by name.
    pub fn get_arg(&self, name: &str) -> Option<&AttributeValue> {
        self.args
            .iter()
            .find(|a| a.name.as_deref() == Some(name))
            .map(|a| &a.value)
    }
}

/// Structured view of a field's attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldAttributes {
    /// This field is the primary key.
    pub is_id: bool,
    /// This field has a unique constraint.
    pub is_unique: bool,
    /// Default value expression.
    pub default: Option<AttributeValue>,
    /// Database column name mapping.
    pub map: Option<String>,
    /// Relation attribute details.
    pub relation: Option<RelationAttribute>,
}

/// Relation attribute details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationAttribute {
    /// Relation name (for disambiguation).
    pub name: Option<String>,
    /// Fields on this model that reference the other model.
    pub fields: Vec<SmolStr>,
    /// Fields on the other model being referenced.
    pub references: Vec<SmolStr>,
    /// On delete action.
    pub on_delete: Option<ReferentialAction>,
    /// On update action.
    pub on_update: Option<ReferentialAction>,
}

impl RelationAttribute {
    /// Parse a `@relation(...)` attribute.
    pub fn from_attribute(attr: &Attribute) -> Self {
        let mut rel = Self {
            name: attr.first_arg().and_then(|v| v.as_string()).map(String::from),
            ..Default::default()
        };

        if let Some(fields) = attr.get_arg("fields").and_then(|v| v.as_field_list()) {
            rel.fields = fields;
        }
        if let Some(refs) = attr.get_arg("references").and_then(|v| v.as_field_list()) {
            rel.references = refs;
        }
        rel.on_delete = attr.get_arg("onDelete").and_then(ReferentialAction::from_value);
        rel.on_update = attr.get_arg("onUpdate").and_then(ReferentialAction::from_value);

        rel
    }

    /// Whether this side of the relation owns the foreign key columns.
    pub fn owns_foreign_key(&self) -> bool {
        !self.fields.is_empty() && !self.references.is_empty()
    }
}

/// Referential actions for relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferentialAction {
    /// Cascade the operation.
    Cascade,
    /// Restrict the operation (error if references exist).
    Restrict,
    /// No action (deferred check).
    NoAction,
    /// Set to null.
    SetNull,
    /// Set to default value.
    SetDefault,
}

impl ReferentialAction {
    /// Parse from either the schema spelling (`SetNull`) or the SQL spelling (`SET NULL`).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "cascade" => Some(Self::Cascade),
            "restrict" => Some(Self::Restrict),
            "noaction" => Some(Self::NoAction),
            "setnull" => Some(Self::SetNull),
            "setdefault" => Some(Self::SetDefault),
            _ => None,
        }
    }

    fn from_value(value: &AttributeValue) -> Option<Self> {
        value
            .as_ident()
            .or_else(|| value.as_string())
            .and_then(Self::from_str)
    }

    /// Get the SQL spelling of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

impl std::fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model-level `@@index` or `@@unique` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexAttribute {
    /// Indexed fields, in declaration order.
    pub fields: Vec<SmolStr>,
    /// Explicit index name, if given with `name:` or `map:`.
    pub name: Option<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexAttribute {
    /// Parse an `@@index`/`@@unique` attribute. Returns `None` for other attributes
    /// and for declarations without a field list.
    pub fn from_attribute(attr: &Attribute) -> Option<Self> {
        let declared_unique = match attr.name() {
            "index" => false,
            "unique" => true,
            _ => return None,
        };

        let fields = attr
            .get_arg("fields")
            .or_else(|| attr.first_arg())
            .and_then(|v| v.as_field_list())?;

        let name = attr
            .get_arg("name")
            .or_else(|| attr.get_arg("map"))
            .and_then(|v| v.as_string())
            .map(String::from);

        let unique = declared_unique
            || attr
                .get_arg("unique")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

        Some(Self {
            fields,
            name,
            unique,
        })
    }
}
