//! Declaration types: how a domain type describes its own shape to the registry.

use crate::case::to_dash_case;

/// A domain type that can be registered.
///
/// ```ignore
/// struct Example;
///
/// impl Entity for Example {
///     const TABLE: &'static str = "examples";
///     const TITLE: &'static str = "Example";
///
///     fn attributes() -> Vec<Attribute> {
///         vec![
///             Attribute::new("id", Kind::Uuid).tag("pk"),
///             Attribute::new("name", Kind::Text).tag("unique;sort;filter").validate("required,max=64"),
///             Attribute::new("category", Kind::entity::<Category>()).tag("filter"),
///         ]
///     }
/// }
/// ```
pub trait Entity {
    const TABLE: &'static str;
    const TITLE: &'static str;

    /// Attributes in declaration order.
    fn attributes() -> Vec<Attribute>;

    fn declaration() -> Declaration {
        Declaration {
            table: Self::TABLE,
            title: Self::TITLE,
            attributes: Self::attributes(),
        }
    }
}

/// Collected shape of one entity type.
#[derive(Clone, Debug)]
pub struct Declaration {
    pub table: &'static str,
    pub title: &'static str,
    pub attributes: Vec<Attribute>,
}

/// Handle to an entity type usable before that type is registered.
#[derive(Clone, Copy)]
pub struct EntityRef {
    pub table: &'static str,
    pub declare: fn() -> Declaration,
}

impl EntityRef {
    pub fn of<T: Entity>() -> Self {
        EntityRef {
            table: T::TABLE,
            declare: T::declaration,
        }
    }

    /// Model code derived from the table name.
    pub fn code(&self) -> String {
        to_dash_case(self.table)
    }
}

impl std::fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRef").field("table", &self.table).finish()
    }
}

/// Static kind of an attribute.
#[derive(Clone, Debug)]
pub enum Kind {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Time,
    Json,
    /// Reference to a file held by the media service.
    Media,
    /// Reference to another registered entity.
    Entity(EntityTarget),
    /// Sequence of the inner kind.
    List(Box<Kind>),
}

#[derive(Clone, Debug)]
pub enum EntityTarget {
    Type(EntityRef),
    Code(String),
}

impl Kind {
    pub fn entity<T: Entity>() -> Self {
        Kind::Entity(EntityTarget::Type(EntityRef::of::<T>()))
    }

    /// Reference an entity by model code only; it must be registered in the same batch.
    pub fn entity_code(code: impl Into<String>) -> Self {
        Kind::Entity(EntityTarget::Code(code.into()))
    }

    pub fn list(inner: Kind) -> Self {
        Kind::List(Box::new(inner))
    }
}

/// One declared attribute: name, static kind and the raw annotation strings.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: String,
    pub kind: Kind,
    pub tags: String,
    pub constraints: Option<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Attribute {
            name: name.into(),
            kind,
            tags: String::new(),
            constraints: None,
        }
    }

    /// Semicolon-separated `key[:value]` annotation.
    pub fn tag(mut self, tags: impl Into<String>) -> Self {
        self.tags = tags.into();
        self
    }

    /// Comma-separated structural constraints, e.g. `required,max=64,dive,uuid`.
    pub fn validate(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }
}
