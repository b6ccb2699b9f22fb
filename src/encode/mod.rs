//! Symbolic encoding of queries and constraints.
//!
//! A [Session] holds everything one `check`/`disambiguate` call mutates: the
//! symbolic database, the intern tables and the formula manager. Encoders
//! translate AST operators into labeled assertions through it; the session is
//! discarded afterwards, so consecutive checks never share table ids or
//! interned strings.

pub(crate) mod agg;
pub(crate) mod approx;
pub(crate) mod constraints;
pub(crate) mod distinct;
pub(crate) mod expr;
pub(crate) mod filter;
pub(crate) mod group_by;
pub(crate) mod group_expr;
pub(crate) mod init;
pub(crate) mod join;
pub(crate) mod order_by;
pub(crate) mod project;
pub(crate) mod query;
pub(crate) mod scan;
pub(crate) mod union;

pub use init::Budgets;

use anyhow::Result;

use crate::constraint::Constraint;
use crate::error::Error;
use crate::interner::StringInterner;
use crate::schema::{ColumnSchema, Database, Lineage, SqlType, TableDef, TableSchema};
use crate::smt::term::{TableId, Term};
use crate::smt::FormulaManager;

pub(crate) struct Session {
    pub db: Database,
    pub interner: StringInterner,
    pub formulas: FormulaManager,
    /// Per-table row bound for base tables.
    pub bound: usize,
    pub budgets: Budgets,
    /// Scope tag of the query currently being encoded.
    pub curr_query: Option<usize>,
    /// Ids of the declared schema tables, in declaration order.
    pub base_tables: Vec<TableId>,
    pub constraints: Vec<Constraint>,
    next_table_id: TableId,
}

impl Session {
    /// Loads the schema into fresh base tables, derives the implied
    /// primary-key/foreign-key/enum constraints and asserts the whole
    /// integrity-constraint conjunction under the `ic` label.
    pub fn new(
        schema: &[TableDef],
        constraints: &[Constraint],
        bound: usize,
        budgets: Budgets,
    ) -> Result<Self> {
        let mut sess = Session {
            db: Database::new(),
            interner: StringInterner::new(),
            formulas: FormulaManager::new(),
            bound,
            budgets,
            curr_query: None,
            base_tables: Vec::new(),
            constraints: constraints.to_vec(),
            next_table_id: 0,
        };
        sess.load_schema(schema)?;
        let ic = constraints::encode_integrity_constraints(&mut sess)?;
        sess.formulas.append(ic, Some("ic"));
        Ok(sess)
    }

    pub fn next_table_id(&mut self) -> TableId {
        let id = self.next_table_id;
        self.next_table_id += 1;
        id
    }

    fn load_schema(&mut self, schema: &[TableDef]) -> Result<()> {
        use crate::constraint::{ColumnRef, ConstraintValue};

        let mut implied = Vec::new();
        for def in schema {
            let table_id = self.next_table_id();
            let table_name = def.name.to_ascii_lowercase();
            let mut table = TableSchema::new(table_id, &table_name, self.bound, Lineage::Base);

            let mut push_column = |table: &mut TableSchema, name: &str, ty_tag: &str| {
                let name = name.to_ascii_lowercase();
                if table.columns.iter().any(|c| c.column_name == name) {
                    return;
                }
                let ty = if let Some(values) = ty_tag.strip_prefix("enum,") {
                    implied.push(Constraint::Enum {
                        column: ColumnRef {
                            table: table_name.clone(),
                            column: name.clone(),
                        },
                        values: values
                            .split(',')
                            .map(|v| ConstraintValue::Str(v.trim().to_string()))
                            .collect(),
                    });
                    SqlType::Varchar
                } else {
                    SqlType::parse(ty_tag)
                };
                let id = table.columns.len();
                table
                    .columns
                    .push(ColumnSchema::new(id, &name, ty, Some(&table_name)));
            };

            for col in &def.primary_keys {
                push_column(&mut table, &col.name, &col.ty);
            }
            for fkey in &def.foreign_keys {
                // the column type comes from the referenced primary key
                let parent_index = fkey.parent_table.resolve()?;
                let parent = schema
                    .get(parent_index)
                    .ok_or_else(|| Error::not_found(parent_index.to_string(), "table index"))?;
                let ty_tag = parent
                    .primary_keys
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&fkey.parent_name))
                    .map(|c| c.ty.as_str())
                    .or(fkey.ty.as_deref())
                    .unwrap_or("int");
                push_column(&mut table, &fkey.name, ty_tag);
            }
            for col in &def.others {
                push_column(&mut table, &col.name, &col.ty);
            }

            self.base_tables.push(table_id);
            self.db.add_table(table);
        }

        // schema-implied key constraints
        for def in schema {
            let table_name = def.name.to_ascii_lowercase();
            if !def.primary_keys.is_empty() {
                implied.push(Constraint::Primary {
                    columns: def
                        .primary_keys
                        .iter()
                        .map(|c| ColumnRef {
                            table: table_name.clone(),
                            column: c.name.to_ascii_lowercase(),
                        })
                        .collect(),
                });
            }
            for fkey in &def.foreign_keys {
                let parent_index = fkey.parent_table.resolve()?;
                let parent = schema
                    .get(parent_index)
                    .ok_or_else(|| Error::not_found(parent_index.to_string(), "table index"))?;
                implied.push(Constraint::ForeignKey {
                    from: ColumnRef {
                        table: table_name.clone(),
                        column: fkey.name.to_ascii_lowercase(),
                    },
                    to: ColumnRef {
                        table: parent.name.to_ascii_lowercase(),
                        column: fkey.parent_name.to_ascii_lowercase(),
                    },
                });
            }
        }
        self.constraints.extend(implied);
        Ok(())
    }

    /// `to := from`, equating both the value and the null bit. Reads resolve
    /// through table backing so aliases share cells with their original.
    pub fn copy_cell(
        &self,
        from: (TableId, usize, usize),
        to: (TableId, usize, usize),
    ) -> Term {
        let src = self.db.cells_of(from.0);
        let dst = self.db.cells_of(to.0);
        Term::and(vec![
            Term::null(dst, to.1, to.2).eq(Term::null(src, from.1, from.2)),
            Term::cell(dst, to.1, to.2).eq(Term::cell(src, from.1, from.2)),
        ])
    }

    pub fn cell(&self, table: TableId, row: usize, col: usize) -> Term {
        Term::cell(self.db.cells_of(table), row, col)
    }

    pub fn null(&self, table: TableId, row: usize, col: usize) -> Term {
        Term::null(self.db.cells_of(table), row, col)
    }
}

/// Looks up the under-approximation budget assigned to an operator label.
pub(crate) fn budget_of(sess: &Session, label: &Option<String>) -> Result<usize, Error> {
    let label = label
        .as_deref()
        .ok_or_else(|| Error::internal("operator was not initialized"))?;
    sess.formulas
        .under_config
        .get(label)
        .copied()
        .ok_or_else(|| Error::internal(format!("no budget for `{label}`")))
}

/// The label assigned to an operator node by the initializer.
pub(crate) fn label_of(label: &Option<String>) -> Result<&str, Error> {
    label
        .as_deref()
        .ok_or_else(|| Error::internal("operator was not initialized"))
}
