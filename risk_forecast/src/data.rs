//! Regional panel data handling
//!
//! Raw input arrives as a polars [`DataFrame`] ([`PanelTable`]). Column
//! aliases are resolved exactly once into a [`ResolvedSchema`]; the typed
//! [`Panel`] built from it is what every downstream component consumes.

use crate::config::{PipelineConfig, SchemaConfig};
use crate::error::{PipelineError, Result};
use crate::horizon::Horizon;
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Calendar month key of the panel's time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Create a period, rejecting months outside 1..=12
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(PipelineError::Schema(format!(
                "Month must be between 1 and 12, got {}",
                month
            )));
        }
        Ok(Self { year, month })
    }

    /// Period containing a calendar date
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    /// Months since year zero; consecutive periods differ by one
    pub fn index(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    /// Period `months` later (negative for earlier)
    pub fn offset(self, months: i64) -> Self {
        let index = self.index() + months;
        Self {
            year: index.div_euclid(12) as i32,
            month: (index.rem_euclid(12) + 1) as u32,
        }
    }

    /// Parse any accepted period spelling
    pub fn parse(raw: &str) -> Option<Self> {
        parse_period_date(raw).map(Self::from_date)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Period::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid period '{}'", raw)))
    }
}

/// Parse a raw period value into a calendar date
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYY-MM`, `YYYY/MM`, `YYYYMM` and
/// timestamps whose first ten characters are a date. Month-only values map
/// to the first day of the month.
pub fn parse_period_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed
        .split(|c| c == 'T' || c == ' ')
        .next()
        .unwrap_or(trimmed);

    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            return Some(date);
        }
    }
    for (format, sep) in [("%Y-%m-%d", '-'), ("%Y/%m/%d", '/')] {
        let padded = format!("{}{}01", date_part, sep);
        if let Ok(date) = NaiveDate::parse_from_str(&padded, format) {
            return Some(date);
        }
    }
    if date_part.len() == 6 && date_part.chars().all(|c| c.is_ascii_digit()) {
        let year: i32 = date_part[..4].parse().ok()?;
        let month: u32 = date_part[4..].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, 1);
    }
    None
}

/// Realized outcome values carried by one observation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcomes {
    /// Base outcome observed at this period
    pub base: Option<f64>,
    /// Explicit labels `y_h1..y_h3`, each already denoting period `t + h`
    pub explicit: [Option<f64>; 3],
}

impl Outcomes {
    /// Explicit label for a horizon
    pub fn explicit(&self, horizon: Horizon) -> Option<f64> {
        self.explicit[horizon.periods() as usize - 1]
    }
}

/// One raw panel row
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub region: String,
    /// Date exactly as parsed from the period column
    pub date: NaiveDate,
    pub period: Period,
    /// Signal values in [`Panel::signal_names`] order; NaN marks a missing value
    pub signals: Vec<f64>,
    pub outcomes: Outcomes,
}

/// Which outcome columns the input provides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSources {
    pub base: Option<String>,
    pub explicit: BTreeMap<Horizon, String>,
}

/// Canonical column mapping, resolved once from aliases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSchema {
    pub region_column: String,
    pub period_column: String,
    pub signal_columns: Vec<String>,
    pub outcomes: OutcomeSources,
}

/// Find a column by exact name, then case-insensitively
fn find_column(columns: &[&str], wanted: &str) -> Option<String> {
    columns
        .iter()
        .find(|c| **c == wanted)
        .or_else(|| columns.iter().find(|c| c.eq_ignore_ascii_case(wanted)))
        .map(|c| c.to_string())
}

/// Resolve an identifier column from an explicit name or a list of aliases
fn resolve_key_column(
    columns: &[&str],
    explicit: &Option<String>,
    aliases: &[String],
    role: &str,
) -> Result<String> {
    if let Some(name) = explicit {
        return find_column(columns, name).ok_or_else(|| {
            PipelineError::Schema(format!("Configured {} column '{}' not found", role, name))
        });
    }
    aliases
        .iter()
        .find_map(|alias| find_column(columns, alias))
        .ok_or_else(|| {
            PipelineError::Schema(format!(
                "No {} column found; looked for {:?} in {:?}",
                role, aliases, columns
            ))
        })
}

impl ResolvedSchema {
    /// Map raw column names onto the canonical schema
    pub fn resolve(columns: &[&str], config: &PipelineConfig) -> Result<Self> {
        let SchemaConfig {
            region_column,
            period_column,
            region_aliases,
            period_aliases,
        } = &config.schema;

        let region_column = resolve_key_column(columns, region_column, region_aliases, "region")?;
        let period_column = resolve_key_column(columns, period_column, period_aliases, "period")?;
        if region_column == period_column {
            return Err(PipelineError::Schema(format!(
                "Column '{}' cannot be both region and period",
                region_column
            )));
        }

        let mut signal_columns = Vec::with_capacity(config.features.candidates.len());
        let mut missing = Vec::new();
        for candidate in &config.features.candidates {
            match find_column(columns, candidate) {
                Some(found) => signal_columns.push(found),
                None => missing.push(candidate.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(PipelineError::Schema(format!(
                "Signal columns not found: {:?}",
                missing
            )));
        }

        let base = find_column(columns, &config.targets.base_column);
        let explicit = Horizon::ALL
            .iter()
            .filter_map(|&h| {
                find_column(columns, &config.targets.explicit_column(h)).map(|c| (h, c))
            })
            .collect();

        Ok(Self {
            region_column,
            period_column,
            signal_columns,
            outcomes: OutcomeSources { base, explicit },
        })
    }
}

/// Raw tabular input backed by a polars DataFrame
#[derive(Debug, Clone)]
pub struct PanelTable {
    df: DataFrame,
}

/// Data loader for panel tables
#[derive(Debug)]
pub struct DataLoader;

impl DataLoader {
    /// Load a panel table from a CSV file
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<PanelTable> {
        let file = File::open(path)?;
        let df = CsvReader::new(file)
            .infer_schema(None)
            .has_header(true)
            .finish()?;

        Ok(PanelTable::new(df))
    }

    /// Load a panel table from a Parquet file
    pub fn from_parquet<P: AsRef<Path>>(path: P) -> Result<PanelTable> {
        let file = File::open(path)?;
        let df = ParquetReader::new(file).finish()?;

        Ok(PanelTable::new(df))
    }

    /// Load by file extension: `.parquet` or `.pq` as Parquet, anything else as CSV
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<PanelTable> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") || ext.eq_ignore_ascii_case("pq") => {
                Self::from_parquet(path)
            }
            _ => Self::from_csv(path),
        }
    }

    /// Wrap an existing DataFrame
    pub fn from_dataframe(df: DataFrame) -> PanelTable {
        PanelTable::new(df)
    }
}

impl PanelTable {
    pub fn new(df: DataFrame) -> Self {
        Self { df }
    }

    /// Get the DataFrame
    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    /// Column names in input order
    pub fn column_names(&self) -> Vec<&str> {
        self.df.get_column_names()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.df.height()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Column as text; non-text columns are cast
    pub fn text_column(&self, name: &str) -> Result<Vec<Option<String>>> {
        let series = self
            .df
            .column(name)
            .map_err(|e| PipelineError::Schema(format!("Column '{}' not found: {}", name, e)))?
            .cast(&DataType::Utf8)?;
        Ok(series
            .utf8()?
            .into_iter()
            .map(|v| v.map(|s| s.to_string()))
            .collect())
    }

    /// Column as floats; unparseable values become missing
    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let series = self
            .df
            .column(name)
            .map_err(|e| PipelineError::Schema(format!("Column '{}' not found: {}", name, e)))?
            .cast(&DataType::Float64)?;
        Ok(series
            .f64()?
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect())
    }

    /// Convert every row into a typed observation
    pub fn observations(&self, schema: &ResolvedSchema) -> Result<Vec<Observation>> {
        let regions = self.text_column(&schema.region_column)?;
        let periods = self.text_column(&schema.period_column)?;
        let signals = schema
            .signal_columns
            .iter()
            .map(|c| self.numeric_column(c))
            .collect::<Result<Vec<_>>>()?;
        let base = match &schema.outcomes.base {
            Some(column) => Some(self.numeric_column(column)?),
            None => None,
        };
        let mut explicit: [Option<Vec<Option<f64>>>; 3] = [None, None, None];
        for (horizon, column) in &schema.outcomes.explicit {
            explicit[horizon.periods() as usize - 1] = Some(self.numeric_column(column)?);
        }

        let mut observations = Vec::with_capacity(self.len());
        for row in 0..self.len() {
            let region = regions[row]
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| {
                    PipelineError::Schema(format!(
                        "Row {}: missing value in region column '{}'",
                        row, schema.region_column
                    ))
                })?
                .to_string();

            let raw_period = periods[row].as_deref().unwrap_or("");
            let date = parse_period_date(raw_period).ok_or_else(|| {
                PipelineError::Schema(format!(
                    "Row {} (region '{}'): cannot parse period '{}' in column '{}'",
                    row, region, raw_period, schema.period_column
                ))
            })?;

            let mut outcomes = Outcomes {
                base: base.as_ref().and_then(|col| col[row]),
                explicit: [None, None, None],
            };
            for (slot, column) in outcomes.explicit.iter_mut().zip(explicit.iter()) {
                *slot = column.as_ref().and_then(|col| col[row]);
            }

            observations.push(Observation {
                region,
                date,
                period: Period::from_date(date),
                signals: signals.iter().map(|col| col[row].unwrap_or(f64::NAN)).collect(),
                outcomes,
            });
        }

        Ok(observations)
    }
}

/// Typed, validated region/period panel
///
/// Observations are grouped by region and strictly increasing in period
/// within each region. Only [`crate::validate::DatasetValidator`] builds one
/// from raw input.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    signal_names: Vec<String>,
    sources: OutcomeSources,
    regions: BTreeMap<String, Vec<Observation>>,
}

impl Panel {
    /// Group observations by region, sorting each region by date
    pub(crate) fn group(
        signal_names: Vec<String>,
        sources: OutcomeSources,
        observations: Vec<Observation>,
    ) -> Self {
        let mut regions: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for obs in observations {
            regions.entry(obs.region.clone()).or_default().push(obs);
        }
        for rows in regions.values_mut() {
            rows.sort_by_key(|o| o.date);
        }
        Self {
            signal_names,
            sources,
            regions,
        }
    }

    /// Signal names in the order of [`Observation::signals`]
    pub fn signal_names(&self) -> &[String] {
        &self.signal_names
    }

    /// Outcome columns present in the input
    pub fn sources(&self) -> &OutcomeSources {
        &self.sources
    }

    /// Regions with their period-sorted observations
    pub fn regions(&self) -> impl Iterator<Item = (&str, &[Observation])> {
        self.regions
            .iter()
            .map(|(name, rows)| (name.as_str(), rows.as_slice()))
    }

    /// Number of regions
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Observations of one region
    pub fn observations(&self, region: &str) -> Option<&[Observation]> {
        self.regions.get(region).map(|rows| rows.as_slice())
    }

    /// Observation of a region at a period
    pub fn find(&self, region: &str, period: Period) -> Option<&Observation> {
        let rows = self.regions.get(region)?;
        rows.binary_search_by_key(&period, |o| o.period)
            .ok()
            .map(|idx| &rows[idx])
    }

    /// Latest period observed for a region
    pub fn latest_period(&self, region: &str) -> Option<Period> {
        self.regions.get(region)?.last().map(|o| o.period)
    }

    /// Total number of observations
    pub fn len(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    /// Check if the panel holds no observations
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The panel as it was known at `period`: later observations removed
    pub fn as_of(&self, period: Period) -> Self {
        let regions = self
            .regions
            .iter()
            .map(|(name, rows)| {
                let kept: Vec<Observation> =
                    rows.iter().filter(|o| o.period <= period).cloned().collect();
                (name.clone(), kept)
            })
            .filter(|(_, rows)| !rows.is_empty())
            .collect();
        Self {
            signal_names: self.signal_names.clone(),
            sources: self.sources.clone(),
            regions,
        }
    }
}
