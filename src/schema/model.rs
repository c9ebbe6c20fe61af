//! Runtime schema: models, fields and associations after registration.

use serde::Serialize;

/// Index of a model inside its [`Registry`](crate::schema::Registry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub(crate) usize);

/// Views a field can be hidden from or disabled in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Create,
    Update,
    List,
}

impl View {
    pub fn parse(s: &str) -> Option<View> {
        match s.trim() {
            "create" => Some(View::Create),
            "update" => Some(View::Update),
            "list" => Some(View::List),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewSet {
    pub create: bool,
    pub update: bool,
    pub list: bool,
}

impl ViewSet {
    pub const NONE: ViewSet = ViewSet {
        create: false,
        update: false,
        list: false,
    };
    pub const EDIT: ViewSet = ViewSet {
        create: true,
        update: true,
        list: false,
    };

    pub fn contains(&self, view: View) -> bool {
        match view {
            View::Create => self.create,
            View::Update => self.update,
            View::List => self.list,
        }
    }

    pub fn insert(&mut self, view: View) {
        match view {
            View::Create => self.create = true,
            View::Update => self.update = true,
            View::List => self.list = true,
        }
    }
}

/// Static value type of a field (element type when the field is multiple).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Time,
    Json,
    Media,
    Association,
}

impl FieldKind {
    /// Name used by view and validation descriptors.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Bool => "boolean",
            FieldKind::Int => "integer",
            FieldKind::Float => "number",
            FieldKind::Text => "string",
            FieldKind::Uuid => "uuid",
            FieldKind::Time => "time",
            FieldKind::Json => "json",
            FieldKind::Media => "media",
            FieldKind::Association => "association",
        }
    }

    /// PostgreSQL type for casts and DDL.
    pub fn pg_type(&self) -> &'static str {
        match self {
            FieldKind::Bool => "boolean",
            FieldKind::Int => "bigint",
            FieldKind::Float => "double precision",
            FieldKind::Text => "text",
            FieldKind::Uuid | FieldKind::Media => "uuid",
            FieldKind::Time => "timestamptz",
            FieldKind::Json => "jsonb",
            FieldKind::Association => "text",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
    ManyToMany,
}

/// A resolved relationship from one field to another model.
#[derive(Clone, Debug)]
pub struct Association {
    pub kind: AssociationKind,
    pub target: ModelId,
    pub target_code: String,
    /// belongsTo: column on the owning table. hasOne/hasMany: column on the target table.
    /// manyToMany: owning column referenced by the join table.
    pub foreign_key: String,
    /// Column the foreign key points at.
    pub reference: String,
    pub join_table: Option<String>,
    pub join_foreign_key: Option<String>,
    pub join_reference: Option<String>,
    pub join_sort: Option<String>,
}

/// Media references are `{id: uuid}` objects checked by the media service.
pub const MEDIA_KEY: &str = "id";

#[derive(Clone, Debug)]
pub struct Field {
    /// Owning model.
    pub model: ModelId,
    pub name: String,
    pub code: String,
    pub column: String,
    pub title: String,
    pub kind: FieldKind,
    pub multiple: bool,
    pub primary: bool,
    pub sortable: bool,
    pub filterable: bool,
    pub unique: bool,
    pub hidden: ViewSet,
    pub disabled: ViewSet,
    pub widget: String,
    pub precision: Option<u32>,
    pub step: Option<f64>,
    pub position: Option<u32>,
    pub block: Option<String>,
    /// Declaration order inside the model.
    pub index: usize,
    pub constraints: Option<String>,
    /// Filled by the registry link pass for association fields.
    pub association: Option<Association>,
}

impl Field {
    pub fn is_media(&self) -> bool {
        self.kind == FieldKind::Media
    }

    pub fn is_time(&self) -> bool {
        self.kind == FieldKind::Time
    }

    pub fn is_association(&self) -> bool {
        self.kind == FieldKind::Association
    }

    /// Reference-valued: coerced through `{pk: id}` expansion.
    pub fn is_reference(&self) -> bool {
        self.is_media() || self.is_association()
    }

    /// Eligible for free-text search.
    pub fn is_searchable(&self) -> bool {
        !self.is_reference() && self.kind != FieldKind::Json
    }

    /// Has a column on the owning table.
    pub fn is_stored(&self) -> bool {
        match &self.association {
            Some(a) => a.kind == AssociationKind::BelongsTo,
            None => !self.is_association(),
        }
    }

    /// Column holding this field's value on the owning table.
    pub fn storage_column(&self) -> &str {
        match &self.association {
            Some(a) if a.kind == AssociationKind::BelongsTo => &a.foreign_key,
            _ => &self.column,
        }
    }

    pub fn association(&self) -> Option<&Association> {
        self.association.as_ref()
    }
}

#[derive(Clone, Debug)]
pub struct Model {
    pub id: ModelId,
    pub code: String,
    pub title: String,
    pub table: String,
    /// Display order (positioned fields first).
    pub fields: Vec<Field>,
    pub(crate) pk: usize,
}

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

impl Model {
    pub fn primary_key(&self) -> &Field {
        &self.fields[self.pk]
    }

    pub fn field(&self, code: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.code == code)
    }

    pub fn field_by_column(&self, column: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// Fields in declaration order.
    pub fn declared_fields(&self) -> Vec<&Field> {
        let mut fields: Vec<&Field> = self.fields.iter().collect();
        fields.sort_by_key(|f| f.index);
        fields
    }

    pub fn updated_at(&self) -> Option<&Field> {
        self.field_by_column(UPDATED_AT)
    }

    pub fn created_at(&self) -> Option<&Field> {
        self.field_by_column(CREATED_AT)
    }

    pub fn has_media(&self) -> bool {
        self.fields.iter().any(Field::is_media)
    }
}
