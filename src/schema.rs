//! Table schemas and the symbolic database.
//!
//! Every operator allocates a fresh [TableSchema] with a monotonically
//! assigned table id; base tables come from the user-provided [TableDef]
//! list. A schema records its row bound, lineage, ancestry and the operator
//! labels anchored to it: everything the search engine needs to map unsat
//! cores back to choice vectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ast::Expr;
use crate::error::Error;
use crate::smt::term::TableId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SqlType {
    Int,
    BigInt,
    Varchar,
    Date,
    Time,
    Bool,
    Float,
}

impl SqlType {
    /// Accepts the schema-JSON type tags; anything char-ish is a varchar and
    /// unknown tags default to int, matching how model values are decoded.
    pub fn parse(tag: &str) -> SqlType {
        let tag = tag.trim().to_ascii_lowercase();
        if tag.contains("char") || tag == "text" {
            return SqlType::Varchar;
        }
        match tag.as_str() {
            "bigint" => SqlType::BigInt,
            "date" | "datetime" => SqlType::Date,
            "time" => SqlType::Time,
            "bool" | "boolean" => SqlType::Bool,
            "float" | "double" | "decimal" | "numeric" => SqlType::Float,
            _ => SqlType::Int,
        }
    }
}

/// Which operator produced a derived table. Consulted when sizing choice
/// vectors (grouped tables carry two of them) and when deciding whether the
/// final output comparison is list- or bag-semantic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Lineage {
    /// Declared in the schema (or an alias of such a table).
    Base,
    Filtered,
    Joined,
    Grouped,
    /// A grouped table whose columns were filled in by the projection pass.
    GroupedProjected,
    Projected,
    Distinct,
    Sorted,
    Union,
    /// Scratch tables (for example disambiguation group representatives).
    Helper,
}

impl Lineage {
    pub fn is_base(self) -> bool {
        matches!(self, Lineage::Base)
    }

    pub fn is_grouped(self) -> bool {
        matches!(self, Lineage::Grouped | Lineage::GroupedProjected)
    }

    pub fn is_sorted(self) -> bool {
        matches!(self, Lineage::Sorted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub column_id: usize,
    pub column_name: String,
    pub column_type: SqlType,
    pub table_name: Option<String>,
    /// The name this column had before a projection aliased it; ORDER BY and
    /// HAVING may still refer to it.
    pub name_before_project: Option<String>,
}

impl ColumnSchema {
    pub fn new(column_id: usize, name: &str, ty: SqlType, table: Option<&str>) -> Self {
        ColumnSchema {
            column_id,
            column_name: name.to_string(),
            column_type: ty,
            table_name: table.map(str::to_string),
            name_before_project: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table_id: TableId,
    pub table_name: String,
    pub bound: usize,
    pub columns: Vec<ColumnSchema>,
    pub lineage: Lineage,
    /// Input table ids, in operator order (left before right for joins).
    pub ancestors: Vec<TableId>,
    /// Query scope this table is visible in; `None` means every scope.
    pub scope: Option<usize>,
    /// Operator labels whose choice vector lives on this table.
    pub op_labels: Vec<String>,
    /// For aliased base tables: the table whose cells this one shares.
    pub backing: Option<TableId>,
    /// Set on `Sorted` outputs; drives the list-semantics output comparison.
    pub sort_exprs: Option<Vec<Expr>>,
}

impl TableSchema {
    pub fn new(table_id: TableId, name: &str, bound: usize, lineage: Lineage) -> Self {
        TableSchema {
            table_id,
            table_name: name.to_string(),
            bound,
            columns: Vec::new(),
            lineage,
            ancestors: Vec::new(),
            scope: None,
            op_labels: Vec::new(),
            backing: None,
            sort_exprs: None,
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Length of this table's choice vector. Grouped tables interleave a
    /// group-formation half and a HAVING half.
    pub fn choice_len(&self) -> usize {
        if self.lineage.is_grouped() {
            self.bound * 2
        } else {
            self.bound
        }
    }

    /// Resolves an attribute name (`c` or `t.c`, case-insensitive) to a
    /// column. Unqualified names must match uniquely; projection aliases are
    /// consulted through `name_before_project` when nothing matches directly.
    pub fn resolve(&self, name: &str) -> Result<&ColumnSchema, Error> {
        let lowered = name.to_ascii_lowercase();
        let (qualifier, attr) = match lowered.split_once('.') {
            Some((t, c)) => (Some(t), c),
            None => (None, lowered.as_str()),
        };

        let mut matches = self.columns.iter().filter(|column| {
            let table_ok = match (qualifier, &column.table_name) {
                (None, _) | (_, None) => true,
                (Some(q), Some(t)) => q.eq_ignore_ascii_case(t),
            };
            table_ok && column.column_name.eq_ignore_ascii_case(attr)
        });

        if let Some(first) = matches.next() {
            if qualifier.is_none() && matches.next().is_some() {
                return Err(Error::ambiguous(name));
            }
            return Ok(first);
        }

        // ORDER BY / HAVING may use the pre-projection name of an aliased
        // column.
        for column in &self.columns {
            if let Some(before) = &column.name_before_project {
                if before.eq_ignore_ascii_case(&lowered) {
                    return Ok(column);
                }
            }
        }

        Err(Error::not_found(name, "attribute")
            .with_help(format!("table {} (T{})", self.table_name, self.table_id)))
    }
}

/// The symbolic database: every base and derived table registered so far.
/// Table ids are never reused within a session.
#[derive(Debug, Default)]
pub struct Database {
    schemas: BTreeMap<TableId, TableSchema>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, schema: TableSchema) {
        self.schemas.insert(schema.table_id, schema);
    }

    pub fn table(&self, id: TableId) -> &TableSchema {
        self.schemas
            .get(&id)
            .unwrap_or_else(|| panic!("table id {id} is not registered"))
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut TableSchema {
        self.schemas
            .get_mut(&id)
            .unwrap_or_else(|| panic!("table id {id} is not registered"))
    }

    /// The table whose `cell`/`null` symbols this table reads. Aliased base
    /// tables share cells with their original.
    pub fn cells_of(&self, id: TableId) -> TableId {
        self.table(id).backing.unwrap_or(id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.schemas.values()
    }

    /// Case-insensitive lookup within a query scope (tables without a scope
    /// tag are visible everywhere).
    pub fn find_by_name(&self, name: &str, scope: Option<usize>) -> Result<&TableSchema, Error> {
        self.schemas
            .values()
            .find(|t| {
                t.table_name.eq_ignore_ascii_case(name)
                    && (t.scope.is_none() || t.scope == scope)
            })
            .ok_or_else(|| Error::not_found(name, "table"))
    }
}

// ---------------------------------------------------------------------------
// Schema input format

/// One table of the input schema, in the JSON shape described in the README:
/// `{TableName, PKeys: [...], FKeys: [...], Others: [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(rename = "TableName")]
    pub name: String,
    #[serde(rename = "PKeys", default)]
    pub primary_keys: Vec<ColumnDef>,
    #[serde(rename = "FKeys", default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
    #[serde(rename = "Others", default)]
    pub others: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(rename = "Name")]
    pub name: String,
    /// A type tag (`int`, `varchar`, `date`, ...) or `enum,v1,v2,...` which
    /// expands to a varchar column plus an enum constraint.
    #[serde(rename = "Type")]
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    #[serde(rename = "FName")]
    pub name: String,
    /// Index of the referenced table within the schema array.
    #[serde(rename = "PTable")]
    pub parent_table: TableIndex,
    #[serde(rename = "PName")]
    pub parent_name: String,
    #[serde(rename = "Type", default)]
    pub ty: Option<String>,
}

/// The reference format writes the parent-table index either as a number or
/// as a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableIndex {
    Index(usize),
    Text(String),
}

impl TableIndex {
    pub fn resolve(&self) -> Result<usize, Error> {
        match self {
            TableIndex::Index(i) => Ok(*i),
            TableIndex::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::simple(format!("invalid table index `{s}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employees() -> TableSchema {
        let mut t = TableSchema::new(0, "employees", 2, Lineage::Base);
        t.columns = vec![
            ColumnSchema::new(0, "emp_id", SqlType::Int, Some("employees")),
            ColumnSchema::new(1, "name", SqlType::Varchar, Some("employees")),
            ColumnSchema::new(2, "age", SqlType::Int, Some("employees")),
        ];
        t
    }

    #[test]
    fn resolves_qualified_and_unqualified_names() {
        let t = employees();
        assert_eq!(t.resolve("age").unwrap().column_id, 2);
        assert_eq!(t.resolve("Employees.EMP_ID").unwrap().column_id, 0);
        assert!(t.resolve("salary").is_err());
    }

    #[test]
    fn unqualified_duplicates_are_ambiguous() {
        let mut t = employees();
        t.columns
            .push(ColumnSchema::new(3, "age", SqlType::Int, Some("other")));
        assert!(t.resolve("age").is_err());
        assert_eq!(t.resolve("other.age").unwrap().column_id, 3);
    }

    #[test]
    fn resolves_pre_projection_names() {
        let mut t = employees();
        t.columns[2].column_name = "years".to_string();
        t.columns[2].name_before_project = Some("age".to_string());
        assert_eq!(t.resolve("age").unwrap().column_id, 2);
    }

    #[test]
    fn grouped_tables_have_double_choice_vectors() {
        let mut t = employees();
        assert_eq!(t.choice_len(), 2);
        t.lineage = Lineage::Grouped;
        assert_eq!(t.choice_len(), 4);
    }

    #[test]
    fn scoped_lookup() {
        let mut db = Database::new();
        let mut a = employees();
        a.scope = Some(0);
        db.add_table(a);
        assert!(db.find_by_name("employees", Some(0)).is_ok());
        assert!(db.find_by_name("employees", Some(1)).is_err());
    }

    #[test]
    fn type_tags() {
        assert_eq!(SqlType::parse("VARCHAR"), SqlType::Varchar);
        assert_eq!(SqlType::parse("nchar(10)"), SqlType::Varchar);
        assert_eq!(SqlType::parse("bigint"), SqlType::BigInt);
        assert_eq!(SqlType::parse("mystery"), SqlType::Int);
    }

    #[test]
    fn table_index_accepts_numbers_and_strings() {
        let idx: TableIndex = serde_json::from_str("1").unwrap();
        assert_eq!(idx.resolve().unwrap(), 1);
        let idx: TableIndex = serde_json::from_str("\"2\"").unwrap();
        assert_eq!(idx.resolve().unwrap(), 2);
    }
}
