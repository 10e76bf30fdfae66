//! Brokerage holdings loaded from a directory of CSV exports.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use signalist_models::Holding;
use tracing::{debug, info};

use crate::error::HoldingsError;

const TICKER_HEADERS: &[&str] = &["ticker", "symbol"];
const QUANTITY_HEADERS: &[&str] = &["quantity", "shares", "qty"];
const COST_HEADERS: &[&str] = &["cost_basis", "cost basis", "costbasis", "total cost"];
const ACQUIRED_HEADERS: &[&str] = &["acquired_on", "acquired", "date acquired", "purchase date"];

struct Columns {
    ticker: usize,
    quantity: usize,
    cost_basis: usize,
    acquired_on: Option<usize>,
}

impl Columns {
    fn resolve(file: &str, headers: &csv::StringRecord) -> Result<Self, HoldingsError> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        let require = |names: &[&str]| {
            find(names).ok_or_else(|| HoldingsError::MalformedRow {
                file: file.to_string(),
                line: 1,
                reason: format!("missing required column '{}'", names[0]),
            })
        };

        Ok(Self {
            ticker: require(TICKER_HEADERS)?,
            quantity: require(QUANTITY_HEADERS)?,
            cost_basis: require(COST_HEADERS)?,
            acquired_on: find(ACQUIRED_HEADERS),
        })
    }
}

/// Reads every `*.csv` file in a directory, in file-name order.
#[derive(Debug, Clone)]
pub struct HoldingsLoader {
    dir: PathBuf,
}

impl HoldingsLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// CSV files in the directory, sorted by path. Subdirectories are ignored.
    pub fn csv_files(&self) -> Result<Vec<PathBuf>, HoldingsError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| HoldingsError::Directory {
            path: self.dir.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| HoldingsError::Directory {
                    path: self.dir.clone(),
                    source,
                })?
                .path();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if is_csv && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Parse every holding from every CSV file. The first malformed row aborts the load.
    pub fn load(&self) -> Result<Vec<Holding>, HoldingsError> {
        let mut holdings = Vec::new();
        let files = self.csv_files()?;
        for path in &files {
            let parsed = parse_file(path)?;
            debug!(file = %path.display(), rows = parsed.len(), "Parsed holdings file");
            holdings.extend(parsed);
        }
        info!(
            dir = %self.dir.display(),
            files = files.len(),
            holdings = holdings.len(),
            "Loaded holdings"
        );
        Ok(holdings)
    }

    /// Holdings for one ticker only (case-insensitive).
    pub fn load_for(&self, ticker: &str) -> Result<Vec<Holding>, HoldingsError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|h| h.ticker.eq_ignore_ascii_case(ticker))
            .collect())
    }
}

fn parse_file(path: &Path) -> Result<Vec<Holding>, HoldingsError> {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let csv_err = |source| HoldingsError::Csv {
        file: file.clone(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    let columns = Columns::resolve(&file, &headers)?;

    let mut holdings = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        let malformed = |reason: String| HoldingsError::MalformedRow {
            file: file.clone(),
            line,
            reason,
        };

        let ticker = record.get(columns.ticker).unwrap_or("").to_uppercase();
        if ticker.is_empty() {
            return Err(malformed("empty ticker".into()));
        }
        let quantity = parse_decimal(record.get(columns.quantity))
            .map_err(|e| malformed(format!("quantity: {e}")))?;
        let cost_basis = parse_decimal(record.get(columns.cost_basis))
            .map_err(|e| malformed(format!("cost_basis: {e}")))?;
        if quantity.is_sign_negative() {
            return Err(malformed(format!("negative quantity {quantity}")));
        }
        let acquired_on = match columns.acquired_on.and_then(|i| record.get(i)) {
            None | Some("") => None,
            Some(raw) => Some(parse_date(raw).map_err(|e| malformed(format!("acquired_on: {e}")))?),
        };

        holdings.push(Holding {
            ticker,
            quantity,
            cost_basis,
            acquired_on,
            source_file: file.clone(),
        });
    }

    Ok(holdings)
}

/// Accepts plain decimals plus brokerage formatting such as `$1,234.50`.
fn parse_decimal(raw: Option<&str>) -> Result<Decimal, String> {
    let raw = raw.unwrap_or("").trim();
    if raw.is_empty() {
        return Err("missing value".into());
    }
    let cleaned: String = raw.chars().filter(|c| *c != '$' && *c != ',').collect();
    Decimal::from_str(&cleaned).map_err(|e| format!("'{raw}' is not a number ({e})"))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .map_err(|_| format!("'{raw}' is not a date (expected YYYY-MM-DD or MM/DD/YYYY)"))
}
