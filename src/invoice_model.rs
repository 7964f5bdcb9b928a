//! invoice_model.rs: Invoice records and their write-side invariants.
//!
//! Analytics never writes. Rows it reads are created here, by the CLI
//! `seed` command and by test fixtures.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::query_schema::bootstrap_schema;

/// Allowed gap between `total` and `subtotal - discount + tax + shipping`.
pub const TOTAL_TOLERANCE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error("customer {0} does not exist")]
    UnknownCustomer(i64),
    #[error("total {total:.2} does not match expected {expected:.2}")]
    TotalMismatch { total: f64, expected: f64 },
    #[error("invoice {0} needs an invoice number")]
    MissingNumber(String),
    #[error("invalid amount in field '{0}'")]
    InvalidAmount(&'static str),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub tax_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub customer_id: i64,
    pub subtotal: f64,
    pub discount: f64,
    pub tax: f64,
    pub shipping: f64,
    pub total: f64,
    pub payment_terms: Option<String>,
    pub payment_method: Option<String>,
    pub bank_details: Option<BTreeMap<String, String>>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: i64,
    pub invoice_id: i64,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub line_total: f64,
    pub created_at: String,
}

/// Line item as supplied by a caller; `line_total` is always derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoiceItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub customer_id: i64,
    pub subtotal: f64,
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub tax: f64,
    #[serde(default)]
    pub shipping: f64,
    pub total: f64,
    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub bank_details: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<NewInvoiceItem>,
}

pub fn line_total(quantity: f64, unit_price: f64) -> f64 {
    quantity * unit_price
}

pub fn expected_total(subtotal: f64, discount: f64, tax: f64, shipping: f64) -> f64 {
    subtotal - discount + tax + shipping
}

impl NewInvoice {
    /// Amounts must be finite and the total must add up.
    pub fn check_totals(&self) -> Result<(), InvoiceError> {
        for (name, amount) in [
            ("subtotal", self.subtotal),
            ("discount", self.discount),
            ("tax", self.tax),
            ("shipping", self.shipping),
            ("total", self.total),
        ] {
            if !amount.is_finite() {
                return Err(InvoiceError::InvalidAmount(name));
            }
        }

        let expected = expected_total(self.subtotal, self.discount, self.tax, self.shipping);
        if (self.total - expected).abs() > TOTAL_TOLERANCE {
            return Err(InvoiceError::TotalMismatch { total: self.total, expected });
        }
        Ok(())
    }
}

pub struct InvoiceStore {
    conn: Connection,
}

impl InvoiceStore {
    /// Open (or create) the database file and make sure the tables exist.
    pub fn open(path: &Path) -> Result<Self, InvoiceError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        bootstrap_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn insert_customer(&self, customer: &NewCustomer) -> Result<i64, InvoiceError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO customers (name, address, phone, email, tax_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                customer.name,
                customer.address,
                customer.phone,
                customer.email,
                customer.tax_id,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert an invoice and its items in one transaction.
    pub fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<i64, InvoiceError> {
        if invoice.invoice_number.trim().is_empty() {
            return Err(InvoiceError::MissingNumber(invoice.invoice_date.to_string()));
        }
        invoice.check_totals()?;
        for item in &invoice.items {
            if !item.quantity.is_finite() || !item.unit_price.is_finite() {
                return Err(InvoiceError::InvalidAmount("items"));
            }
        }

        let bank_details = invoice
            .bank_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM customers WHERE id = ?1",
                params![invoice.customer_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(InvoiceError::UnknownCustomer(invoice.customer_id));
        }

        tx.execute(
            "INSERT INTO invoices
             (invoice_number, invoice_date, due_date, customer_id, subtotal, discount, tax,
              shipping, total, payment_terms, payment_method, bank_details, notes,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                invoice.invoice_number.trim(),
                invoice.invoice_date.to_string(),
                invoice.due_date.map(|d| d.to_string()),
                invoice.customer_id,
                invoice.subtotal,
                invoice.discount,
                invoice.tax,
                invoice.shipping,
                invoice.total,
                invoice.payment_terms,
                invoice.payment_method,
                bank_details,
                invoice.notes,
                now,
            ],
        )?;
        let invoice_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO invoice_items
                 (invoice_id, description, quantity, unit_price, line_total, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for item in &invoice.items {
                stmt.execute(params![
                    invoice_id,
                    item.description,
                    item.quantity,
                    item.unit_price,
                    line_total(item.quantity, item.unit_price),
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(invoice_id)
    }

    pub fn get_invoice(&self, id: i64) -> Result<Option<Invoice>, InvoiceError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, invoice_number, invoice_date, due_date, customer_id, subtotal, discount,
                        tax, shipping, total, payment_terms, payment_method, bank_details, notes,
                        created_at, updated_at
                 FROM invoices WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                        [row.get::<_, f64>(5)?, row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, Option<String>>(11)?,
                        row.get::<_, Option<String>>(12)?,
                        row.get::<_, Option<String>>(13)?,
                        row.get::<_, String>(14)?,
                        row.get::<_, String>(15)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, number, date, due, customer_id, amounts, terms, method, bank, notes, created, updated)) = row
        else {
            return Ok(None);
        };

        let bank_details = bank.as_deref().map(serde_json::from_str).transpose()?;
        Ok(Some(Invoice {
            id,
            invoice_number: number,
            invoice_date: parse_date(&date)?,
            due_date: due.as_deref().map(parse_date).transpose()?,
            customer_id,
            subtotal: amounts[0],
            discount: amounts[1],
            tax: amounts[2],
            shipping: amounts[3],
            total: amounts[4],
            payment_terms: terms,
            payment_method: method,
            bank_details,
            notes,
            created_at: created,
            updated_at: updated,
        }))
    }

    pub fn items_for(&self, invoice_id: i64) -> Result<Vec<InvoiceItem>, InvoiceError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, invoice_id, description, quantity, unit_price, line_total, created_at
             FROM invoice_items WHERE invoice_id = ?1 ORDER BY id",
        )?;
        let items = stmt
            .query_map(params![invoice_id], |row| {
                Ok(InvoiceItem {
                    id: row.get(0)?,
                    invoice_id: row.get(1)?,
                    description: row.get(2)?,
                    quantity: row.get(3)?,
                    unit_price: row.get(4)?,
                    line_total: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

fn parse_date(text: &str) -> Result<NaiveDate, InvoiceError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| {
        InvoiceError::Database(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
    })
}

/// Small dataset for `seed` and for trying questions locally.
pub fn demo_invoices(customer_ids: &[i64]) -> Vec<NewInvoice> {
    if customer_ids.is_empty() {
        return Vec::new();
    }
    let methods = ["Bank Transfer", "Credit Card", "Bank Transfer", "Cash", "Credit Card", "Bank Transfer"];
    methods
        .iter()
        .enumerate()
        .map(|(i, method)| {
            let qty = (i + 1) as f64;
            let items = vec![
                NewInvoiceItem { description: "Consulting hours".into(), quantity: qty * 2.0, unit_price: 120.0 },
                NewInvoiceItem { description: "Hosting".into(), quantity: 1.0, unit_price: 45.0 },
            ];
            let subtotal: f64 = items.iter().map(|it| line_total(it.quantity, it.unit_price)).sum();
            let discount = if i % 2 == 0 { 25.0 } else { 0.0 };
            let tax = ((subtotal - discount) * 0.08 * 100.0).round() / 100.0;
            let shipping = if i % 3 == 0 { 15.0 } else { 0.0 };
            NewInvoice {
                invoice_number: format!("INV-2026-{:03}", i + 1),
                invoice_date: NaiveDate::from_ymd_opt(2026, (i % 12) as u32 + 1, 10).unwrap_or(NaiveDate::MIN),
                due_date: NaiveDate::from_ymd_opt(2026, (i % 12) as u32 + 2, 10),
                customer_id: customer_ids[i % customer_ids.len()],
                subtotal,
                discount,
                tax,
                shipping,
                total: expected_total(subtotal, discount, tax, shipping),
                payment_terms: Some("Net 30".into()),
                payment_method: Some(method.to_string()),
                bank_details: None,
                notes: None,
                items,
            }
        })
        .collect()
}
