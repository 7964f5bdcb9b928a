//! query_schema.rs: The schema contract for invoice analytics.
//!
//! The three tables below are the only ones the model may reference. The
//! text is injected verbatim into every SQL-synthesis and chart-shaping
//! prompt, and the same DDL bootstraps a local SQLite store.

use rusqlite::Connection;

/// SQLite schema for the invoicing database.
/// Used as context for LLM text-to-SQL generation.
pub const INVOICE_SCHEMA: &str = r#"
-- Table: customers (billed parties)
CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    address TEXT,
    phone TEXT,
    email TEXT,
    tax_id TEXT,
    created_at TEXT NOT NULL,        -- ISO 8601 UTC, e.g. '2026-02-23T18:05:30Z'
    updated_at TEXT NOT NULL
);

-- Table: invoices (one row per issued invoice)
CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_number TEXT NOT NULL UNIQUE,
    invoice_date TEXT NOT NULL,      -- 'YYYY-MM-DD'
    due_date TEXT,                   -- 'YYYY-MM-DD'
    customer_id INTEGER NOT NULL,
    subtotal REAL NOT NULL DEFAULT 0,
    discount REAL NOT NULL DEFAULT 0,
    tax REAL NOT NULL DEFAULT 0,
    shipping REAL NOT NULL DEFAULT 0,
    total REAL NOT NULL DEFAULT 0,   -- subtotal - discount + tax + shipping
    payment_terms TEXT,              -- e.g. 'Net 30'
    payment_method TEXT,             -- e.g. 'Bank Transfer', 'Credit Card', 'Cash'
    bank_details TEXT,               -- JSON object, opaque key-value map
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (customer_id) REFERENCES customers(id)
);

-- Table: invoice_items (line items of an invoice)
CREATE TABLE IF NOT EXISTS invoice_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_id INTEGER NOT NULL,
    description TEXT NOT NULL,
    quantity REAL NOT NULL,
    unit_price REAL NOT NULL,
    line_total REAL NOT NULL,        -- always quantity * unit_price
    created_at TEXT NOT NULL,
    FOREIGN KEY (invoice_id) REFERENCES invoices(id) ON DELETE CASCADE
);
"#;

/// Tables the generated SQL is allowed to reference.
pub const ALLOWED_TABLES: [&str; 3] = ["customers", "invoices", "invoice_items"];

const SCHEMA_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices (customer_id);
    CREATE INDEX IF NOT EXISTS idx_invoices_date     ON invoices (invoice_date);
    CREATE INDEX IF NOT EXISTS idx_items_invoice     ON invoice_items (invoice_id);
";

/// System prompt for text-to-SQL generation.
/// Constrains LLM output to a single SQLite SELECT statement.
pub fn build_text_to_sql_prompt(schema: &str) -> String {
    format!(
        r#"You are a SQLite query generator for an invoicing system.

Given the database schema below, convert the user's natural language question into a single SQLite SELECT query.

SCHEMA:
```sql
{schema}
```

RULES:
- Output ONLY the SQL query, nothing else
- No markdown, no explanation, no backticks
- Only SELECT queries (never INSERT, UPDATE, DELETE, DROP)
- Use only the tables {tables} and their columns
- Join invoices to customers on invoices.customer_id = customers.id
- Join invoice_items to invoices on invoice_items.invoice_id = invoices.id
- Dates are TEXT 'YYYY-MM-DD'; use strftime('%Y-%m', invoice_date) for monthly grouping
- Give every aggregate a readable alias, e.g. COUNT(*) AS count, SUM(total) AS total_amount
- Prefer few rows: aggregate with GROUP BY when the question asks for a breakdown
- Default LIMIT 50 unless the user specifies otherwise"#,
        schema = schema,
        tables = ALLOWED_TABLES.join(", ")
    )
}

/// Create the contract tables in `conn` if they are missing.
pub fn bootstrap_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(INVOICE_SCHEMA)?;
    conn.execute_batch(SCHEMA_INDEXES)?;
    Ok(())
}
