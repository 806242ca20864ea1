//! SQLite forecast repository
//!
//! One table per forecast source, keyed by `(IssueTime, PeriodEnd)`. The
//! table layout is fixed by the first forecast loaded into it.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::forecast::{format_timestamp, parse_timestamp, Forecast};
use crate::error::{ForecastError, ForecastResult};

/// SQLite limits bound parameters per statement
const MAX_BINDS: usize = 999;

/// A row binds IssueTime, PeriodEnd and every column
fn check_row_width(table: &str, columns: usize) -> ForecastResult<()> {
    if columns + 2 > MAX_BINDS {
        return Err(ForecastError::Storage(format!(
            "table {table}: {columns} columns exceed the {} values SQLite binds per statement",
            MAX_BINDS - 2
        )));
    }
    Ok(())
}

/// Issue time reported for a table that does not exist yet
pub fn no_issue_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Result of loading a forecast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Inserted { rows: usize, columns: usize },
    /// The issue time was already stored
    Skipped,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Open (or create) the database file, retrying while it is locked
    pub async fn connect(path: &Path) -> ForecastResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));

        let mut attempt = 0;
        let mut delay = Duration::from_millis(500);
        let pool = loop {
            attempt += 1;
            match SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options.clone())
                .await
            {
                Ok(pool) => break pool,
                Err(e) if attempt >= 3 => {
                    return Err(ForecastError::Storage(format!(
                        "cannot open database '{}' after {attempt} attempts: {e}",
                        path.display()
                    )));
                }
                Err(e) => {
                    warn!(
                        "Database open attempt {}/3 failed: {}. Retrying in {:?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        };
        debug!(path = %path.display(), "Opened forecast database");
        Ok(Self { pool })
    }

    pub async fn table_exists(&self, table: &str) -> ForecastResult<bool> {
        let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn table_columns(&self, table: &str) -> ForecastResult<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(ForecastError::from))
            .collect()
    }

    async fn create_table(&self, table: &str, columns: &[String]) -> ForecastResult<()> {
        let mut sql = format!(
            "CREATE TABLE {} (\"IssueTime\" text, \"PeriodEnd\" text",
            quote(table)
        );
        for c in columns {
            sql.push_str(&format!(", {} real", quote(c)));
        }
        sql.push_str(", PRIMARY KEY(\"IssueTime\", \"PeriodEnd\"))");
        sqlx::query(&sql).execute(&self.pool).await?;
        info!(table, columns = columns.len(), "Created forecast table");
        Ok(())
    }

    /// Store a forecast in `forecast.sql_table`.
    ///
    /// Columns unknown to an existing table are dropped with a warning.
    pub async fn load_forecast(&self, forecast: &Forecast) -> ForecastResult<LoadOutcome> {
        let table = forecast.sql_table.as_str();
        let issue_time = forecast.issue_time_str();
        let names = forecast.table.names();

        let columns: Vec<String> = if self.table_exists(table).await? {
            let existing = self.table_columns(table).await?;
            let (known, new): (Vec<String>, Vec<String>) =
                names.into_iter().partition(|c| existing.contains(c));
            if !new.is_empty() {
                warn!(
                    table,
                    issue_time = %issue_time,
                    new_columns = ?new,
                    "New columns in incoming data are not stored"
                );
            }
            known
        } else {
            check_row_width(table, names.len())?;
            self.create_table(table, &names).await?;
            names
        };
        check_row_width(table, columns.len())?;

        let exists = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE \"IssueTime\" = ? LIMIT 1",
            quote(table)
        ))
        .bind(&issue_time)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_some() {
            info!(table, issue_time = %issue_time, "IssueTime already stored, nothing added");
            return Ok(LoadOutcome::Skipped);
        }

        let values: Vec<&[f64]> = columns
            .iter()
            .filter_map(|c| forecast.table.column(c))
            .collect();
        let index = forecast.table.index();
        let rows_per_insert = MAX_BINDS / (columns.len() + 2);

        let mut tx = self.pool.begin().await?;
        for chunk in (0..index.len()).collect::<Vec<_>>().chunks(rows_per_insert) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} (\"IssueTime\", \"PeriodEnd\"",
                quote(table)
            ));
            for c in &columns {
                qb.push(", ").push(quote(c));
            }
            qb.push(") ");
            qb.push_values(chunk, |mut b, &row| {
                b.push_bind(issue_time.clone())
                    .push_bind(format_timestamp(&index[row]));
                for v in &values {
                    let v = v[row];
                    b.push_bind(if v.is_nan() { None } else { Some(v) });
                }
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(table, rows = index.len(), "Stored forecast");
        Ok(LoadOutcome::Inserted {
            rows: index.len(),
            columns: columns.len(),
        })
    }

    /// Latest stored issue time, 1990-01-01 when the table does not exist
    pub async fn last_issue_time(&self, table: &str) -> ForecastResult<DateTime<Utc>> {
        if !self.table_exists(table).await? {
            return Ok(no_issue_time());
        }
        let row = sqlx::query(&format!(
            "SELECT max(\"IssueTime\") AS last FROM {}",
            quote(table)
        ))
        .fetch_one(&self.pool)
        .await?;
        match row.try_get::<Option<String>, _>("last")? {
            None => Ok(no_issue_time()),
            Some(s) => parse_timestamp(&s).ok_or_else(|| {
                ForecastError::Storage(format!("invalid IssueTime '{s}' in table {table}"))
            }),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
