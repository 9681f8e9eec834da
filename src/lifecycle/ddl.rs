//! SQL text for table lifecycle statements.

use crate::schema::TableSchema;

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `CREATE TABLE` for a declared table, columns in declaration order.
pub fn create_table_sql(schema: &TableSchema, if_not_exists: bool) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| format!("    {} {}", quote_ident(&c.name), c.storage_type.sql_name()))
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "CREATE TABLE {}{} (\n{columns}\n)",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote_ident(&schema.name)
    )
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn truncate_table_sql(table: &str) -> String {
    format!("TRUNCATE TABLE {}", quote_ident(table))
}

pub fn count_rows_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(table))
}
