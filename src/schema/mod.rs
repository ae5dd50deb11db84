//! Schema model - tables, views, and relationships the translator targets.
//!
//! A [`SchemaModel`] is immutable once built. Everything derived from the
//! raw definition (lookup indexes, the relationship graph, each table's
//! primary date column, the content fingerprint) is computed in
//! [`SchemaModel::new`]; refreshing the schema means building a new model and
//! swapping it into a [`SchemaHandle`].
//!
//! # Example
//!
//! ```ignore
//! let model = SchemaModel::from_toml_str(include_str!("schema.toml"))?;
//! let path = model.find_join_path("GameActivity", "Player", &joined, TieBreak::PreferJoined, 6);
//! ```

mod graph;
mod handle;
mod provider;

pub use graph::{JoinPath, JoinStep, RelationshipGraph, TieBreak};
pub use handle::{SchemaHandle, SchemaSnapshot};
pub use provider::{SchemaProvider, StaticSchemaProvider, TomlSchemaProvider};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::compute_hash;

/// Errors raised while building or loading a schema model.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Duplicate table or view name: {0}")]
    DuplicateName(String),

    #[error("Relationship {relationship} references unknown table '{table}'")]
    UnknownRelationshipTable { relationship: String, table: String },

    #[error("Relationship {relationship} references unknown column '{column}'")]
    UnknownRelationshipColumn { relationship: String, column: String },

    #[error("View '{view}' references unknown source '{source_name}'")]
    UnknownViewSource { view: String, source_name: String },

    #[error("Invalid field reference '{0}': expected Table.Column")]
    InvalidFieldRef(String),

    #[error("Failed to parse schema definition: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read schema definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema provider failed: {0}")]
    Provider(String),
}

pub type SchemaResult<T> = Result<T, SchemaError>;

// ============================================================================
// Columns and types
// ============================================================================

/// Logical column type, parsed leniently from SQL type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Unknown,
}

impl DataType {
    /// Parse a SQL type name (`nvarchar(50)`, `int`, `datetime2`, `bit`, ...).
    pub fn parse(sql_type: &str) -> Self {
        let lower = sql_type.trim().to_lowercase();
        let base = lower.split('(').next().unwrap_or("").trim();
        match base {
            "string" | "text" | "varchar" | "nvarchar" | "char" | "nchar" | "uuid"
            | "uniqueidentifier" => DataType::String,
            "integer" | "int" | "bigint" | "smallint" | "tinyint" => DataType::Integer,
            "decimal" | "numeric" | "money" | "float" | "real" | "double" | "currency" => {
                DataType::Decimal
            }
            "boolean" | "bool" | "bit" => DataType::Boolean,
            "date" => DataType::Date,
            "timestamp" | "datetime" | "datetime2" | "datetimeoffset" | "timestamptz" => {
                DataType::Timestamp
            }
            _ => DataType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::Unknown => "unknown",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        DataType::parse(&s)
    }
}

impl From<DataType> for String {
    fn from(t: DataType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a physical column: `Table.Column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldRef {
    pub table: String,
    pub column: String,
}

impl FieldRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parse `Table.Column`.
    pub fn parse(s: &str) -> SchemaResult<Self> {
        match s.trim().rsplit_once('.') {
            Some((table, column)) if !table.is_empty() && !column.is_empty() => {
                Ok(Self::new(table.trim(), column.trim()))
            }
            _ => Err(SchemaError::InvalidFieldRef(s.to_string())),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}

impl TryFrom<String> for FieldRef {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        FieldRef::parse(&s)
    }
}

impl From<FieldRef> for String {
    fn from(f: FieldRef) -> Self {
        f.qualified_name()
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// A column on a table or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default = "unknown_type")]
    pub data_type: DataType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub foreign_key: bool,
}

fn unknown_type() -> DataType {
    DataType::Unknown
}

fn default_true() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            foreign_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn foreign_key(mut self) -> Self {
        self.foreign_key = true;
        self
    }
}

// ============================================================================
// Tables, views, relationships
// ============================================================================

/// Role of a table in the star schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Fact,
    Dimension,
    #[default]
    Regular,
}

/// A secondary index, used only for descriptive index hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
}

/// A base table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub kind: TableKind,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    /// Derived: the column time-range filters apply to.
    #[serde(skip)]
    date_column: Option<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, kind: TableKind) -> Self {
        Self {
            name: name.into(),
            schema: None,
            kind,
            columns: Vec::new(),
            indexes: Vec::new(),
            date_column: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_index(mut self, name: &str, columns: &[&str]) -> Self {
        self.indexes.push(Index {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// The first date/timestamp column, set when the schema model is built.
    pub fn date_column(&self) -> Option<&str> {
        self.date_column.as_deref()
    }

    pub fn is_fact(&self) -> bool {
        self.kind == TableKind::Fact
    }
}

/// A view column and the base column it projects (if any).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewColumn {
    pub name: String,
    #[serde(default)]
    pub source: Option<FieldRef>,
}

/// A view, optionally materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub columns: Vec<ViewColumn>,
    #[serde(default)]
    pub materialized: bool,
    #[serde(default)]
    pub source_tables: Vec<String>,
    /// Source fields the view is grouped by. Empty means row grain.
    #[serde(default)]
    pub group_by: Vec<FieldRef>,
    /// Refresh schedule or policy, informational.
    #[serde(default)]
    pub refresh: Option<String>,
}

impl View {
    /// The view column projecting `source`, if any.
    pub fn column_for(&self, source: &FieldRef) -> Option<&ViewColumn> {
        self.columns.iter().find(|c| {
            c.source.as_ref().is_some_and(|s| {
                s.table.eq_ignore_ascii_case(&source.table)
                    && s.column.eq_ignore_ascii_case(&source.column)
            })
        })
    }

    pub fn is_aggregated(&self) -> bool {
        !self.group_by.is_empty()
    }
}

/// Cardinality of a relationship, read left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    #[default]
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    /// Swap sides.
    pub fn reverse(self) -> Self {
        match self {
            Cardinality::OneToMany => Cardinality::ManyToOne,
            Cardinality::ManyToOne => Cardinality::OneToMany,
            other => other,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::OneToOne => write!(f, "1:1"),
            Cardinality::OneToMany => write!(f, "1:N"),
            Cardinality::ManyToOne => write!(f, "N:1"),
            Cardinality::ManyToMany => write!(f, "N:N"),
        }
    }
}

/// A join relationship between two tables. Traversable in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl Relationship {
    pub fn new(from: &str, from_column: &str, to: &str, to_column: &str) -> Self {
        Self {
            from_table: from.into(),
            from_column: from_column.into(),
            to_table: to.into(),
            to_column: to_column.into(),
            cardinality: Cardinality::ManyToOne,
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    fn label(&self) -> String {
        format!(
            "{}.{} -> {}.{}",
            self.from_table, self.from_column, self.to_table, self.to_column
        )
    }
}

// ============================================================================
// Schema model
// ============================================================================

/// Serializable schema metadata, the input to [`SchemaModel::new`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub views: Vec<View>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// Validated, immutable schema model.
#[derive(Debug, Clone)]
pub struct SchemaModel {
    definition: SchemaDefinition,
    /// lowercase table name -> index into `definition.tables`
    table_index: HashMap<String, usize>,
    /// lowercase view name -> index into `definition.views`
    view_index: HashMap<String, usize>,
    graph: RelationshipGraph,
    fingerprint: String,
}

impl SchemaModel {
    /// Validate a definition and derive lookup structures.
    pub fn new(mut definition: SchemaDefinition) -> SchemaResult<Self> {
        let mut table_index = HashMap::new();
        let mut view_index = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (i, table) in definition.tables.iter_mut().enumerate() {
            let key = table.name.to_lowercase();
            if !seen.insert(key.clone()) {
                return Err(SchemaError::DuplicateName(table.name.clone()));
            }
            table.date_column = table
                .columns
                .iter()
                .find(|c| c.data_type.is_temporal())
                .map(|c| c.name.clone());
            table_index.insert(key, i);
        }

        for (i, view) in definition.views.iter().enumerate() {
            let key = view.name.to_lowercase();
            if !seen.insert(key.clone()) {
                return Err(SchemaError::DuplicateName(view.name.clone()));
            }
            view_index.insert(key, i);
        }

        let lookup = |name: &str| table_index.get(&name.to_lowercase()).copied();

        for rel in &definition.relationships {
            for (table, column) in [
                (&rel.from_table, &rel.from_column),
                (&rel.to_table, &rel.to_column),
            ] {
                let idx = lookup(table).ok_or_else(|| SchemaError::UnknownRelationshipTable {
                    relationship: rel.label(),
                    table: table.clone(),
                })?;
                if definition.tables[idx].column(column).is_none() {
                    return Err(SchemaError::UnknownRelationshipColumn {
                        relationship: rel.label(),
                        column: format!("{}.{}", table, column),
                    });
                }
            }
        }

        for view in &definition.views {
            for source in &view.source_tables {
                if lookup(source).is_none() {
                    return Err(SchemaError::UnknownViewSource {
                        view: view.name.clone(),
                        source_name: source.clone(),
                    });
                }
            }
            let sources = view
                .columns
                .iter()
                .filter_map(|c| c.source.as_ref())
                .chain(view.group_by.iter());
            for field in sources {
                let known = lookup(&field.table)
                    .is_some_and(|idx| definition.tables[idx].column(&field.column).is_some());
                if !known {
                    return Err(SchemaError::UnknownViewSource {
                        view: view.name.clone(),
                        source_name: field.qualified_name(),
                    });
                }
            }
        }

        let graph = RelationshipGraph::build(&definition.tables, &definition.relationships);
        let fingerprint = compute_hash(&definition)
            .map_err(|e| SchemaError::Provider(format!("fingerprint: {}", e)))?;

        Ok(Self {
            definition,
            table_index,
            view_index,
            graph,
            fingerprint,
        })
    }

    /// Parse and validate a TOML schema definition.
    pub fn from_toml_str(content: &str) -> SchemaResult<Self> {
        let definition: SchemaDefinition = toml::from_str(content)?;
        Self::new(definition)
    }

    pub fn definition(&self) -> &SchemaDefinition {
        &self.definition
    }

    pub fn tables(&self) -> &[Table] {
        &self.definition.tables
    }

    pub fn views(&self) -> &[View] {
        &self.definition.views
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.definition.relationships
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.table_index
            .get(&name.to_lowercase())
            .map(|&i| &self.definition.tables[i])
    }

    pub fn view(&self, name: &str) -> Option<&View> {
        self.view_index
            .get(&name.to_lowercase())
            .map(|&i| &self.definition.views[i])
    }

    pub fn column(&self, field: &FieldRef) -> Option<&Column> {
        self.table(&field.table)?.column(&field.column)
    }

    /// Rewrite a field reference to the declared spelling of its table and
    /// column, or `None` if it does not exist.
    pub fn canonical_field(&self, field: &FieldRef) -> Option<FieldRef> {
        let table = self.table(&field.table)?;
        let column = table.column(&field.column)?;
        Some(FieldRef::new(table.name.clone(), column.name.clone()))
    }

    pub fn materialized_views(&self) -> impl Iterator<Item = &View> {
        self.definition.views.iter().filter(|v| v.materialized)
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    /// Shortest relationship path between two tables, bounded by `max_depth`.
    pub fn find_join_path(
        &self,
        from: &str,
        to: &str,
        joined: &BTreeSet<String>,
        tie_break: TieBreak,
        max_depth: usize,
    ) -> Option<JoinPath> {
        let from = &self.table(from)?.name;
        let to = &self.table(to)?.name;
        self.graph
            .shortest_path(from, to, joined, tie_break, max_depth)
    }

    /// SHA-256 over the serialized definition.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}
