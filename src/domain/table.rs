//! Column-oriented time series table keyed by period end (UTC).
//!
//! Every forecast source produces one of these; the PV model appends its
//! output columns and the storage sinks write it out unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};

/// One named column of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

/// Table of `f64` columns sharing a `PeriodEnd` index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastTable {
    index: Vec<DateTime<Utc>>,
    columns: Vec<Column>,
}

impl ForecastTable {
    /// Create an empty table with the given index
    pub fn new(index: Vec<DateTime<Utc>>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    /// Build a table from unordered rows, sorting by period end.
    ///
    /// Duplicate period ends are rejected.
    pub fn from_rows(
        names: &[String],
        mut rows: Vec<(DateTime<Utc>, Vec<f64>)>,
    ) -> ForecastResult<Self> {
        rows.sort_by_key(|(t, _)| *t);
        if let Some(w) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(ForecastError::parse(format!(
                "duplicate PeriodEnd {}",
                w[0].0
            )));
        }
        let mut table = Self::new(rows.iter().map(|(t, _)| *t).collect());
        for (i, name) in names.iter().enumerate() {
            let values = rows
                .iter()
                .map(|(_, r)| r.get(i).copied().unwrap_or(f64::NAN))
                .collect();
            table.insert(name, values)?;
        }
        Ok(table)
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    fn column_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.values)
    }

    /// Insert or replace a column
    pub fn insert(&mut self, name: &str, values: Vec<f64>) -> ForecastResult<()> {
        if values.len() != self.index.len() {
            return Err(ForecastError::model(format!(
                "column '{name}' has {} values, index has {}",
                values.len(),
                self.index.len()
            )));
        }
        match self.column_mut(name) {
            Some(existing) => *existing = values,
            None => self.columns.push(Column {
                name: name.to_string(),
                values,
            }),
        }
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(c) = self.columns.iter_mut().find(|c| c.name == from) {
            c.name = to.to_string();
        }
    }

    /// Multiply a column in place
    pub fn scale(&mut self, name: &str, factor: f64) {
        if let Some(values) = self.column_mut(name) {
            values.iter_mut().for_each(|v| *v *= factor);
        }
    }

    /// Keep only the columns accepted by `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.columns.retain(|c| keep(&c.name));
    }

    pub fn drop_column(&mut self, name: &str) {
        self.retain(|c| c != name);
    }

    /// Append the columns of `other` (same index required); existing names are replaced
    pub fn merge(&mut self, other: &ForecastTable) -> ForecastResult<()> {
        if self.index != other.index {
            return Err(ForecastError::model(
                "cannot merge tables with different PeriodEnd index",
            ));
        }
        for c in &other.columns {
            self.insert(&c.name, c.values.clone())?;
        }
        Ok(())
    }

    /// Element-wise add the listed columns of `other` onto `self`
    pub fn add_columns(&mut self, other: &ForecastTable, names: &[String]) -> ForecastResult<()> {
        if self.index != other.index {
            return Err(ForecastError::model(
                "cannot add tables with different PeriodEnd index",
            ));
        }
        for name in names {
            let src = other
                .column(name)
                .ok_or_else(|| ForecastError::model(format!("missing column '{name}'")))?
                .to_vec();
            let dst = self
                .column_mut(name)
                .ok_or_else(|| ForecastError::model(format!("missing column '{name}'")))?;
            dst.iter_mut().zip(src).for_each(|(a, b)| *a += b);
        }
        Ok(())
    }

    /// Restrict to rows whose period end is present in both tables
    pub fn inner_join(&self, other: &ForecastTable) -> ForecastTable {
        let keep: Vec<usize> = self
            .index
            .iter()
            .enumerate()
            .filter(|(_, t)| other.index.binary_search(t).is_ok())
            .map(|(i, _)| i)
            .collect();
        let mut out = ForecastTable::new(keep.iter().map(|&i| self.index[i]).collect());
        for c in &self.columns {
            out.columns.push(Column {
                name: c.name.clone(),
                values: keep.iter().map(|&i| c.values[i]).collect(),
            });
        }
        out
    }

    /// Row values for the given columns at position `row`
    pub fn row(&self, row: usize, names: &[String]) -> Vec<f64> {
        names
            .iter()
            .map(|n| self.column(n).map_or(f64::NAN, |v| v[row]))
            .collect()
    }
}
