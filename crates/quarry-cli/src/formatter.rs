//! Output formatters for query results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use quarry_core::metamodel::{AttributeKind, EntityDescriptor};
use quarry_core::results::AttributeValue;
use quarry_core::sql::{JdbcOperation, ParameterBinder};
use quarry_core::{EntityRef, ResultItem, Tuple, Value};
use quarry_lang::Parameter;
use std::sync::Arc;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format query result rows.
    fn format_rows(&self, rows: &[Tuple]) -> String;

    /// Format the row count of an update or delete.
    fn format_update(&self, affected: usize) -> String;

    /// Format translated SQL and its parameter binders.
    fn format_translation(&self, operation: &JdbcOperation) -> String;

    /// Format mapped entities.
    fn format_entities(&self, entities: &[Arc<EntityDescriptor>]) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// Column headers: the selection alias, else its position.
fn headers(rows: &[Tuple]) -> Vec<String> {
    rows.first()
        .map(|row| {
            row.aliases()
                .iter()
                .enumerate()
                .map(|(i, alias)| alias.clone().unwrap_or_else(|| format!("#{}", i + 1)))
                .collect()
        })
        .unwrap_or_default()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn item_text(item: &ResultItem) -> String {
    match item {
        ResultItem::Value(v) => value_text(v),
        ResultItem::Entity(e) => e
            .try_borrow()
            .map(|e| e.describe())
            .unwrap_or_else(|_| "<borrowed>".to_string()),
        ResultItem::Embeddable(None) => String::new(),
        ResultItem::Embeddable(Some(e)) => e
            .values
            .iter()
            .map(|(name, v)| format!("{}={}", name, value_text(v)))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int32(i) => serde_json::Value::from(*i),
        Value::Int64(i) | Value::Timestamp(i) => serde_json::Value::from(*i),
        Value::Float64(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        other => serde_json::Value::String(other.to_string()),
    }
}

/// Basic and embedded state of an entity; associations appear as the
/// identifier of their target.
fn entity_to_json(entity: &EntityRef) -> serde_json::Value {
    let Ok(entity) = entity.try_borrow() else {
        return serde_json::Value::Null;
    };
    if !entity.is_initialized() {
        return serde_json::Value::String(entity.describe());
    }
    let mut obj = serde_json::Map::new();
    obj.insert(
        "@entity".to_string(),
        serde_json::Value::String(entity.entity_name().to_string()),
    );
    for attribute in &entity.descriptor().attributes {
        let value = match entity.get(&attribute.name) {
            Ok(AttributeValue::Basic(v)) => value_to_json(v),
            Ok(AttributeValue::Embedded(Some(e))) => serde_json::Value::Object(
                e.values
                    .iter()
                    .map(|(name, v)| (name.clone(), value_to_json(v)))
                    .collect(),
            ),
            Ok(AttributeValue::Reference(Some(target))) => target
                .try_borrow()
                .ok()
                .and_then(|t| t.identifier().map(|id| serde_json::Value::String(id.to_string())))
                .unwrap_or(serde_json::Value::Null),
            Ok(AttributeValue::Collection(_)) => continue,
            _ => serde_json::Value::Null,
        };
        obj.insert(attribute.name.clone(), value);
    }
    serde_json::Value::Object(obj)
}

fn item_to_json(item: &ResultItem) -> serde_json::Value {
    match item {
        ResultItem::Value(v) => value_to_json(v),
        ResultItem::Entity(e) => entity_to_json(e),
        ResultItem::Embeddable(_) => serde_json::Value::String(item_text(item)),
    }
}

fn binder_text(binder: &ParameterBinder) -> String {
    match binder {
        ParameterBinder::Query { parameter, ty } => {
            let name = match parameter {
                Parameter::Named(name) => format!(":{}", name),
                Parameter::Positional(position) => format!("?{}", position),
            };
            match ty {
                Some(ty) => format!("{} ({})", name, ty),
                None => name,
            }
        }
        ParameterBinder::Literal(value) => format!("literal {}", value),
    }
}

fn attribute_text(kind: &AttributeKind) -> (String, String) {
    match kind {
        AttributeKind::Basic {
            column,
            basic_type,
            table,
        } => (
            basic_type.to_string(),
            match table {
                Some(table) => format!("{}.{}", table, column),
                None => column.clone(),
            },
        ),
        AttributeKind::Embedded {
            embeddable,
            column_prefix,
        } => (format!("embedded {}", embeddable), format!("{}*", column_prefix)),
        AttributeKind::ToOne {
            target,
            join_column,
            fetch,
        } => (format!("to-one {} ({:?})", target, fetch), join_column.clone()),
        AttributeKind::ToMany {
            target,
            key_column,
            fetch,
        } => (
            format!("to-many {} ({:?})", target, fetch),
            format!("{} on target", key_column),
        ),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_rows(&self, rows: &[Tuple]) -> String {
        if rows.is_empty() {
            return "No results".to_string();
        }
        let mut table = Table::new();
        table.set_header(headers(rows));
        for row in rows {
            table.add_row(row.items().iter().map(|item| Cell::new(item_text(item))));
        }
        format!("{}\n({} row{})", table, rows.len(), if rows.len() == 1 { "" } else { "s" })
    }

    fn format_update(&self, affected: usize) -> String {
        format!("{} row(s) affected", affected)
    }

    fn format_translation(&self, operation: &JdbcOperation) -> String {
        let mut output = operation.sql.clone();
        if !operation.parameter_binders.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["#", "Binder"]);
            for (i, binder) in operation.parameter_binders.iter().enumerate() {
                table.add_row(vec![(i + 1).to_string(), binder_text(binder)]);
            }
            output.push_str("\n\n");
            output.push_str(&table.to_string());
        }
        output
    }

    fn format_entities(&self, entities: &[Arc<EntityDescriptor>]) -> String {
        let mut output = String::new();
        for entity in entities {
            if !output.is_empty() {
                output.push_str("\n\n");
            }
            output.push_str(&format!("{} ({})", entity.name, entity.table_names().join(", ")));
            let mut table = Table::new();
            table.set_header(vec!["Attribute", "Type", "Column"]);
            for attribute in &entity.attributes {
                let (ty, column) = attribute_text(&attribute.kind);
                let name = if entity.is_identifier_attribute(&attribute.name) {
                    format!("{} (id)", attribute.name)
                } else {
                    attribute.name.clone()
                };
                table.add_row(vec![name, ty, column]);
            }
            output.push('\n');
            output.push_str(&table.to_string());
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_rows(&self, rows: &[Tuple]) -> String {
        let headers = headers(rows);
        let array: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                if row.len() == 1 {
                    return item_to_json(&row.items()[0]);
                }
                let obj: serde_json::Map<String, serde_json::Value> = headers
                    .iter()
                    .cloned()
                    .zip(row.items().iter().map(item_to_json))
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::to_string_pretty(&array).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_update(&self, affected: usize) -> String {
        serde_json::json!({ "affected": affected }).to_string()
    }

    fn format_translation(&self, operation: &JdbcOperation) -> String {
        let binders: Vec<String> = operation.parameter_binders.iter().map(binder_text).collect();
        serde_json::to_string_pretty(&serde_json::json!({
            "sql": operation.sql,
            "parameters": binders,
            "tables": operation.affected_tables,
        }))
        .unwrap_or_else(|_| "{}".to_string())
    }

    fn format_entities(&self, entities: &[Arc<EntityDescriptor>]) -> String {
        let array: Vec<serde_json::Value> = entities
            .iter()
            .map(|entity| {
                serde_json::json!({
                    "name": entity.name,
                    "tables": entity.table_names(),
                    "identifier": entity.identifier,
                    "attributes": entity.attributes,
                    "abstract": entity.is_abstract,
                    "cacheable": entity.cacheable,
                })
            })
            .collect();
        serde_json::to_string_pretty(&array).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }
}

/// CSV formatter.
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_rows(&self, rows: &[Tuple]) -> String {
        let mut lines = Vec::with_capacity(rows.len() + 1);
        lines.push(
            headers(rows)
                .iter()
                .map(|h| escape_csv(h))
                .collect::<Vec<_>>()
                .join(","),
        );
        for row in rows {
            lines.push(
                row.items()
                    .iter()
                    .map(|item| escape_csv(&item_text(item)))
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        lines.join("\n")
    }

    fn format_update(&self, affected: usize) -> String {
        format!("affected\n{}", affected)
    }

    fn format_translation(&self, operation: &JdbcOperation) -> String {
        let mut output = format!("sql\n{}", escape_csv(&operation.sql));
        for binder in &operation.parameter_binders {
            output.push('\n');
            output.push_str(&escape_csv(&binder_text(binder)));
        }
        output
    }

    fn format_entities(&self, entities: &[Arc<EntityDescriptor>]) -> String {
        let mut output = String::from("entity,attribute,type,column");
        for entity in entities {
            for attribute in &entity.attributes {
                let (ty, column) = attribute_text(&attribute.kind);
                output.push_str(&format!(
                    "\n{},{},{},{}",
                    escape_csv(&entity.name),
                    escape_csv(&attribute.name),
                    escape_csv(&ty),
                    escape_csv(&column)
                ));
            }
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// Quote a CSV field when it contains a separator, quote or newline.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
