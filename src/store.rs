//! Durable per-code counts.
//!
//! The reader treats this as a narrow write-only sink: `increment` on every
//! entry event, `record_exit` on every exit. The read side (readings list,
//! aggregated report, product registry) exists for the control surface and
//! the report CLI; the core never reads counts back to decide behavior.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{now_s, open_db_connection};

const UNIDENTIFIED: &str = "unidentified";

/// One counted code: how many times it entered, and when it was last seen.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reading {
    pub id: i64,
    pub code: String,
    pub description: String,
    pub quantity: i64,
    pub recorded_at: u64,
}

/// Aggregated report row: total quantity per description.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportRow {
    pub description: String,
    pub quantity: i64,
}

/// Registry entry mapping a code to a human description.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    pub code: String,
    pub description: String,
    pub registered_at: u64,
}

/// Exit marker written for every exit event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitMarker {
    pub code: String,
    pub recorded_at: u64,
}

pub trait CountStore {
    /// Create-or-increment the count for a code. The description comes from
    /// the product registry when the code is registered, otherwise a fixed
    /// placeholder. At-least-once from the reader's perspective.
    fn increment(&mut self, code: &str) -> Result<Reading>;

    /// Record that a code stopped being present.
    fn record_exit(&mut self, code: &str) -> Result<()>;

    fn readings(&self) -> Result<Vec<Reading>>;

    /// Total quantity per description, largest first.
    fn report(&self) -> Result<Vec<ReportRow>>;

    fn product(&self, code: &str) -> Result<Option<Product>>;

    fn register_product(&mut self, code: &str, description: &str) -> Result<Product>;

    fn products(&self) -> Result<Vec<Product>>;

    fn exits(&self) -> Result<Vec<ExitMarker>>;
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub struct SqliteCountStore {
    conn: Connection,
}

impl SqliteCountStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS readings (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              code TEXT NOT NULL,
              description TEXT NOT NULL DEFAULT 'unidentified',
              quantity INTEGER NOT NULL DEFAULT 1,
              recorded_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS products (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              code TEXT NOT NULL UNIQUE,
              description TEXT NOT NULL,
              registered_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exits (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              code TEXT NOT NULL,
              recorded_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_readings_code ON readings(code);
            CREATE INDEX IF NOT EXISTS idx_readings_recorded ON readings(recorded_at);
            CREATE INDEX IF NOT EXISTS idx_exits_code ON exits(code);
            "#,
        )?;
        Ok(())
    }

    fn description_for(&self, code: &str) -> Result<String> {
        let registered: Option<String> = self
            .conn
            .query_row(
                "SELECT description FROM products WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;
        Ok(registered.unwrap_or_else(|| UNIDENTIFIED.to_string()))
    }

    fn reading_by_id(&self, id: i64) -> Result<Reading> {
        let reading = self.conn.query_row(
            "SELECT id, code, description, quantity, recorded_at FROM readings WHERE id = ?1",
            params![id],
            |row| {
                Ok(Reading {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    description: row.get(2)?,
                    quantity: row.get(3)?,
                    recorded_at: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;
        Ok(reading)
    }
}

impl CountStore for SqliteCountStore {
    fn increment(&mut self, code: &str) -> Result<Reading> {
        let description = self.description_for(code)?;
        let recorded_at = now_s()? as i64;

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM readings WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                self.conn.execute(
                    "UPDATE readings SET quantity = quantity + 1, description = ?1, \
                     recorded_at = ?2 WHERE id = ?3",
                    params![description, recorded_at, id],
                )?;
                id
            }
            None => {
                self.conn.execute(
                    "INSERT INTO readings(code, description, quantity, recorded_at) \
                     VALUES (?1, ?2, 1, ?3)",
                    params![code, description, recorded_at],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        self.reading_by_id(id)
    }

    fn record_exit(&mut self, code: &str) -> Result<()> {
        let recorded_at = now_s()? as i64;
        self.conn.execute(
            "INSERT INTO exits(code, recorded_at) VALUES (?1, ?2)",
            params![code, recorded_at],
        )?;
        Ok(())
    }

    fn readings(&self) -> Result<Vec<Reading>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, code, description, quantity, recorded_at FROM readings \
             ORDER BY recorded_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Reading {
                id: row.get(0)?,
                code: row.get(1)?,
                description: row.get(2)?,
                quantity: row.get(3)?,
                recorded_at: row.get::<_, i64>(4)? as u64,
            })
        })?;
        let mut readings = Vec::new();
        for reading in rows {
            readings.push(reading?);
        }
        Ok(readings)
    }

    fn report(&self) -> Result<Vec<ReportRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT description, SUM(quantity) AS total FROM readings \
             GROUP BY description ORDER BY total DESC, description ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ReportRow {
                description: row.get(0)?,
                quantity: row.get(1)?,
            })
        })?;
        let mut report = Vec::new();
        for row in rows {
            report.push(row?);
        }
        Ok(report)
    }

    fn product(&self, code: &str) -> Result<Option<Product>> {
        let product = self
            .conn
            .query_row(
                "SELECT id, code, description, registered_at FROM products WHERE code = ?1",
                params![code],
                |row| {
                    Ok(Product {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        description: row.get(2)?,
                        registered_at: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(product)
    }

    fn register_product(&mut self, code: &str, description: &str) -> Result<Product> {
        let code = code.trim();
        let description = description.trim();
        if code.is_empty() || description.is_empty() {
            return Err(anyhow!("product code and description must be non-empty"));
        }
        if self.product(code)?.is_some() {
            return Err(anyhow!("product code already registered: {}", code));
        }
        let registered_at = now_s()? as i64;
        self.conn.execute(
            "INSERT INTO products(code, description, registered_at) VALUES (?1, ?2, ?3)",
            params![code, description, registered_at],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(Product {
            id,
            code: code.to_string(),
            description: description.to_string(),
            registered_at: registered_at as u64,
        })
    }

    fn products(&self) -> Result<Vec<Product>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, code, description, registered_at FROM products \
             ORDER BY registered_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Product {
                id: row.get(0)?,
                code: row.get(1)?,
                description: row.get(2)?,
                registered_at: row.get::<_, i64>(3)? as u64,
            })
        })?;
        let mut products = Vec::new();
        for product in rows {
            products.push(product?);
        }
        Ok(products)
    }

    fn exits(&self) -> Result<Vec<ExitMarker>> {
        let mut stmt = self
            .conn
            .prepare("SELECT code, recorded_at FROM exits ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(ExitMarker {
                code: row.get(0)?,
                recorded_at: row.get::<_, i64>(1)? as u64,
            })
        })?;
        let mut exits = Vec::new();
        for marker in rows {
            exits.push(marker?);
        }
        Ok(exits)
    }
}

// ----------------------------------------------------------------------------
// In-memory store for tests
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryCountStore {
    readings: BTreeMap<String, Reading>,
    products: BTreeMap<String, Product>,
    exit_markers: Vec<ExitMarker>,
    next_id: i64,
}

impl InMemoryCountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl CountStore for InMemoryCountStore {
    fn increment(&mut self, code: &str) -> Result<Reading> {
        let description = self
            .products
            .get(code)
            .map(|product| product.description.clone())
            .unwrap_or_else(|| UNIDENTIFIED.to_string());
        let recorded_at = now_s()?;

        if let Some(reading) = self.readings.get_mut(code) {
            reading.quantity += 1;
            reading.description = description;
            reading.recorded_at = recorded_at;
            return Ok(reading.clone());
        }

        let id = self.next_id();
        let reading = Reading {
            id,
            code: code.to_string(),
            description,
            quantity: 1,
            recorded_at,
        };
        self.readings.insert(code.to_string(), reading.clone());
        Ok(reading)
    }

    fn record_exit(&mut self, code: &str) -> Result<()> {
        let recorded_at = now_s()?;
        self.exit_markers.push(ExitMarker {
            code: code.to_string(),
            recorded_at,
        });
        Ok(())
    }

    fn readings(&self) -> Result<Vec<Reading>> {
        let mut readings: Vec<Reading> = self.readings.values().cloned().collect();
        readings.sort_by(|a, b| {
            b.recorded_at
                .cmp(&a.recorded_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(readings)
    }

    fn report(&self) -> Result<Vec<ReportRow>> {
        let mut totals: BTreeMap<String, i64> = BTreeMap::new();
        for reading in self.readings.values() {
            *totals.entry(reading.description.clone()).or_insert(0) += reading.quantity;
        }
        let mut report: Vec<ReportRow> = totals
            .into_iter()
            .map(|(description, quantity)| ReportRow {
                description,
                quantity,
            })
            .collect();
        report.sort_by(|a, b| {
            b.quantity
                .cmp(&a.quantity)
                .then_with(|| a.description.cmp(&b.description))
        });
        Ok(report)
    }

    fn product(&self, code: &str) -> Result<Option<Product>> {
        Ok(self.products.get(code).cloned())
    }

    fn register_product(&mut self, code: &str, description: &str) -> Result<Product> {
        let code = code.trim();
        let description = description.trim();
        if code.is_empty() || description.is_empty() {
            return Err(anyhow!("product code and description must be non-empty"));
        }
        if self.products.contains_key(code) {
            return Err(anyhow!("product code already registered: {}", code));
        }
        let id = self.next_id();
        let product = Product {
            id,
            code: code.to_string(),
            description: description.to_string(),
            registered_at: now_s()?,
        };
        self.products.insert(code.to_string(), product.clone());
        Ok(product)
    }

    fn products(&self) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = self.products.values().cloned().collect();
        products.sort_by(|a, b| {
            b.registered_at
                .cmp(&a.registered_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(products)
    }

    fn exits(&self) -> Result<Vec<ExitMarker>> {
        Ok(self.exit_markers.clone())
    }
}
