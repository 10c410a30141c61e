//! Schema Descriptor
//!
//! Static description of the tables the planner may query. Built once at
//! startup, validated, then shared read-only (`Arc<SchemaDescriptor>`).

use crate::error::{PlannerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Text,
    Integer,
    Real,
    /// Money stored as text, e.g. `"$1,234.56"`
    Currency,
    /// Fiscal year stored as text, e.g. `"2025"`
    Year,
    Date,
}

impl SemanticType {
    /// Usable as an aggregation measure
    pub fn is_measure(&self) -> bool {
        matches!(self, SemanticType::Integer | SemanticType::Real | SemanticType::Currency)
    }

    /// SQLite column affinity used when creating tables
    pub fn sqlite_affinity(&self) -> &'static str {
        match self {
            SemanticType::Integer => "INTEGER",
            SemanticType::Real => "REAL",
            _ => "TEXT",
        }
    }

    pub fn prompt_label(&self) -> &'static str {
        match self {
            SemanticType::Text => "TEXT",
            SemanticType::Integer => "INTEGER",
            SemanticType::Real => "REAL",
            SemanticType::Currency => "TEXT, currency like \"$1,234.56\"",
            SemanticType::Year => "TEXT, year like \"2025\"",
            SemanticType::Date => "TEXT, date like \"2025-01-31\"",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub semantic_type: SemanticType,
    #[serde(default)]
    pub description: String,
    /// Words a user might say instead of the column name
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ColumnDef {
    pub fn new(name: &str, semantic_type: SemanticType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            semantic_type,
            description: description.to_string(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Numeric SQL expression for this column (currency text is cast)
    pub fn numeric_expr(&self) -> String {
        match self.semantic_type {
            SemanticType::Currency => format!(
                "CAST(REPLACE(REPLACE({}, '$', ''), ',', '') AS REAL)",
                self.name
            ),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Topic words that point at this table
    #[serde(default)]
    pub keywords: Vec<String>,
    pub columns: Vec<ColumnDef>,
    /// Measure used when a question names none
    #[serde(default)]
    pub primary_measure: Option<String>,
    /// Field order of the source export, used when a CSV has no usable
    /// header. Names that are not columns mark fields that are dropped.
    #[serde(default)]
    pub source_columns: Vec<String>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn measure(&self) -> Option<&ColumnDef> {
        match &self.primary_measure {
            Some(name) => self.column(name),
            None => self.columns.iter().find(|c| c.semantic_type.is_measure()),
        }
    }

    pub fn year_column(&self) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.semantic_type == SemanticType::Year)
    }

    /// Position of each column in a headerless export
    pub fn source_positions(&self) -> Vec<Option<usize>> {
        if self.source_columns.is_empty() {
            return (0..self.columns.len()).map(Some).collect();
        }
        self.columns
            .iter()
            .map(|c| {
                self.source_columns
                    .iter()
                    .position(|s| s.eq_ignore_ascii_case(&c.name))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    tables: Vec<TableDef>,
    #[serde(default)]
    default_table: Option<String>,
}

/// Immutable set of known tables; order is the selection priority
#[derive(Debug, Clone, Serialize)]
pub struct SchemaDescriptor {
    tables: Vec<TableDef>,
    default_table: Option<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl SchemaDescriptor {
    pub fn new(tables: Vec<TableDef>, default_table: Option<String>) -> Result<Self> {
        if tables.is_empty() {
            return Err(PlannerError::Schema("schema has no tables".to_string()));
        }

        let mut index = HashMap::new();
        for (idx, table) in tables.iter().enumerate() {
            check_identifier(&table.name)?;
            if index.insert(table.name.to_lowercase(), idx).is_some() {
                return Err(PlannerError::Schema(format!("duplicate table: {}", table.name)));
            }
            if table.columns.is_empty() {
                return Err(PlannerError::Schema(format!("table {} has no columns", table.name)));
            }

            let mut seen = HashSet::new();
            for column in &table.columns {
                check_identifier(&column.name)?;
                if !seen.insert(column.name.to_lowercase()) {
                    return Err(PlannerError::Schema(format!(
                        "duplicate column {}.{}",
                        table.name, column.name
                    )));
                }
            }

            let mut sourced = HashSet::new();
            for source in &table.source_columns {
                if table.has_column(source) && !sourced.insert(source.to_lowercase()) {
                    return Err(PlannerError::Schema(format!(
                        "column {}.{} appears twice in source_columns",
                        table.name, source
                    )));
                }
            }

            if let Some(measure) = &table.primary_measure {
                match table.column(measure) {
                    Some(c) if c.semantic_type.is_measure() => {}
                    Some(_) => {
                        return Err(PlannerError::Schema(format!(
                            "primary measure {}.{} is not numeric",
                            table.name, measure
                        )))
                    }
                    None => {
                        return Err(PlannerError::Schema(format!(
                            "primary measure {}.{} does not exist",
                            table.name, measure
                        )))
                    }
                }
            }
        }

        if let Some(default) = &default_table {
            if !index.contains_key(&default.to_lowercase()) {
                return Err(PlannerError::Schema(format!(
                    "default table {} is not in the schema",
                    default
                )));
            }
        }

        Ok(Self {
            tables,
            default_table,
            index,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: SchemaFile = serde_json::from_str(json)?;
        Self::new(file.tables, file.default_table)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PlannerError::Schema(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.index
            .get(&name.to_lowercase())
            .map(|&idx| &self.tables[idx])
    }

    pub fn is_known_table(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn default_table(&self) -> Option<&TableDef> {
        self.default_table.as_deref().and_then(|name| self.table(name))
    }

    /// Position in the tie-break order (lower wins)
    pub fn priority(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_lowercase()).copied()
    }

    /// North Carolina vendor payment and budget tables
    pub fn state_finance() -> Self {
        use SemanticType::*;

        let vendor_payments = TableDef {
            name: "vendor_payments".to_string(),
            description: "Actual payments made by state agencies to vendors".to_string(),
            keywords: ["vendor", "payment", "paid", "spending", "spent", "recipient", "payee", "contractor"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            columns: vec![
                ColumnDef::new("fiscal_year", Year, "Fiscal year of the payment")
                    .with_aliases(&["year", "fy"]),
                ColumnDef::new("payment", Currency, "Payment amount")
                    .with_aliases(&["amount", "spending", "spent", "paid", "money", "cost"]),
                ColumnDef::new("vendor_recipient", Text, "Vendor name")
                    .with_aliases(&["vendor", "recipient", "payee", "company", "contractor"]),
                ColumnDef::new("agency_description", Text, "Agency name")
                    .with_aliases(&["agency", "department", "dept"]),
                ColumnDef::new("account_description", Text, "What the payment was for")
                    .with_aliases(&["account", "purpose", "item", "service"]),
                ColumnDef::new("major_category", Text, "Spending category")
                    .with_aliases(&["category", "type"]),
                ColumnDef::new("budget_fund", Text, "Fund type").with_aliases(&["fund"]),
                ColumnDef::new("budget_code", Text, "Budget code").with_aliases(&["code"]),
                ColumnDef::new("report_title", Text, "Report title"),
                ColumnDef::new("description", Text, "Payment description"),
            ],
            primary_measure: Some("payment".to_string()),
            source_columns: [
                "fiscal_year_numeric", "budget_fund", "fiscal_year", "payment", "vendor_recipient",
                "account_description", "major_category", "budget_code", "report_title", "description",
                "agency_description",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        };

        let budget = TableDef {
            name: "budget".to_string(),
            description: "Planned budget allocations and appropriations by committee and agency"
                .to_string(),
            keywords: ["budget", "appropriation", "allocation", "allocated", "committee", "planned", "receipt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            columns: vec![
                ColumnDef::new("fiscal_year", Year, "Fiscal year of the budget")
                    .with_aliases(&["year", "fy"]),
                ColumnDef::new("committee", Text, "Appropriations committee"),
                ColumnDef::new("agency", Text, "Agency name").with_aliases(&["department", "dept"]),
                ColumnDef::new("budget_code", Text, "Budget code").with_aliases(&["code"]),
                ColumnDef::new("account_group", Text, "Account group").with_aliases(&["account"]),
                ColumnDef::new("budget_fund_code", Text, "Budget fund code").with_aliases(&["fund"]),
                ColumnDef::new("expenditures", Currency, "Budgeted expenditures")
                    .with_aliases(&["expenditure", "expense", "cost"]),
                ColumnDef::new("receipts", Currency, "Budgeted receipts")
                    .with_aliases(&["revenue", "income"]),
                ColumnDef::new("net_appropriations", Currency, "Net appropriations")
                    .with_aliases(&["appropriation", "allocation", "allocated"]),
                ColumnDef::new("budget_type", Text, "Budget type"),
                ColumnDef::new("fund_type", Text, "Fund type"),
            ],
            primary_measure: Some("expenditures".to_string()),
            source_columns: [
                "committee", "agency", "budget_code", "account_group", "budget_fund_code", "expenditures",
                "receipts", "net_appropriations", "budget_type", "fund_type", "fiscal_year",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        };

        // Built from constants that satisfy every check in `new`.
        let tables = vec![vendor_payments, budget];
        let index = tables
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.name.to_lowercase(), idx))
            .collect();
        Self {
            tables,
            default_table: Some("vendor_payments".to_string()),
            index,
        }
    }
}

fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(PlannerError::Schema(format!("invalid identifier: {:?}", name)))
    }
}
