//! Readers for the solver's JSON reports.
//!
//! Two shapes are in circulation and are kept apart on purpose:
//!
//! * the *incumbent* format: a final `Solution` record plus numbered
//!   intermediate records `Solution1`, `Solution2`, ... in discovery order;
//! * the *output* format: a single `Output` object carrying `Value` and
//!   `Bound`, where `Value` may be the string `"inf"` for unsolved runs.

use crate::load_json_file;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::path::Path;

const FINAL_KEY: &str = "Solution";
const UNSOLVED: &str = "inf";

#[derive(Debug, Clone)]
pub struct IncumbentReport {
    doc: Map<String, Value>,
}

/// A borrowed view of one `Solution*` record. Index 0 is the final record.
#[derive(Debug, Clone, Copy)]
pub struct SolutionRecord<'a> {
    pub index: usize,
    fields: &'a Map<String, Value>,
}

impl<'a> SolutionRecord<'a> {
    fn key(&self) -> String {
        if self.index == 0 {
            FINAL_KEY.to_string()
        } else {
            format!("{}{}", FINAL_KEY, self.index)
        }
    }

    fn field(&self, name: &str) -> Result<&'a Value> {
        self.fields
            .get(name)
            .ok_or_else(|| anyhow!("missing {}.{}", self.key(), name))
    }

    pub fn value(&self) -> Result<&'a Value> {
        self.field("Value")
    }

    pub fn time(&self) -> Result<&'a Value> {
        self.field("Time")
    }
}

impl IncumbentReport {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(doc) => Ok(Self { doc }),
            other => Err(anyhow!(
                "solver report must be a JSON object, found {}",
                json_kind(&other)
            )),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_value(load_json_file(path)?)
            .with_context(|| format!("solver report {}", path.display()))
    }

    fn record(&self, index: usize) -> Option<Result<SolutionRecord<'_>>> {
        let key = if index == 0 {
            FINAL_KEY.to_string()
        } else {
            format!("{}{}", FINAL_KEY, index)
        };
        self.doc.get(&key).map(|v| match v {
            Value::Object(fields) => Ok(SolutionRecord { index, fields }),
            other => Err(anyhow!("{} must be an object, found {}", key, json_kind(other))),
        })
    }

    pub fn final_record(&self) -> Result<SolutionRecord<'_>> {
        self.record(0)
            .unwrap_or_else(|| Err(anyhow!("missing {} record", FINAL_KEY)))
    }

    /// Intermediate records `Solution1, Solution2, ...`, probed lazily and
    /// stopping at the first absent index.
    pub fn incumbents(&self) -> impl Iterator<Item = Result<SolutionRecord<'_>>> + '_ {
        (1..).map_while(move |k| self.record(k))
    }

    /// Highest contiguous intermediate record, if any.
    pub fn best_incumbent(&self) -> Result<Option<SolutionRecord<'_>>> {
        let mut best = None;
        for record in self.incumbents() {
            best = Some(record?);
        }
        Ok(best)
    }

    /// `(value, time to best, time to end)` as they appear in the report.
    /// Without any intermediate record, time to best is the final time.
    pub fn summary_fields(&self) -> Result<(String, String, String)> {
        let last = self.final_record()?;
        let time_to_end = render(last.time()?);
        let time_to_best = match self.best_incumbent()? {
            Some(best) => render(best.time()?),
            None => time_to_end.clone(),
        };
        Ok((render(last.value()?), time_to_best, time_to_end))
    }
}

/// `Output.Value` / `Output.Bound` as reported: numbers, numeric strings or
/// the unsolved marker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Reported {
    Number(Number),
    Text(String),
}

impl Reported {
    fn is_unsolved(&self) -> bool {
        matches!(self, Reported::Text(s) if s.trim() == UNSOLVED)
    }

    fn as_integer(&self, what: &str) -> Result<i64> {
        match self {
            Reported::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .ok_or_else(|| anyhow!("{} is not an integer: {}", what, n)),
            Reported::Text(s) => s
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{} is not an integer: '{}'", what, s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OutputSection {
    #[serde(rename = "Value")]
    value: Reported,
    #[serde(rename = "Bound", default)]
    bound: Option<Reported>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputReport {
    #[serde(rename = "Output")]
    output: OutputSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimality {
    /// `Value` was `"inf"`: no feasible solution was reported.
    Unsolved,
    Optimal { value: i64 },
    Open { value: i64, bound: i64 },
}

impl OutputReport {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_value(load_json_file(path)?)
            .with_context(|| format!("solver report {}", path.display()))
    }

    pub fn optimality(&self) -> Result<Optimality> {
        if self.output.value.is_unsolved() {
            return Ok(Optimality::Unsolved);
        }
        let bound = self
            .output
            .bound
            .as_ref()
            .ok_or_else(|| anyhow!("missing Output.Bound"))?
            .as_integer("Output.Bound")?;
        let value = self.output.value.as_integer("Output.Value")?;
        if bound == value {
            Ok(Optimality::Optimal { value })
        } else {
            Ok(Optimality::Open { value, bound })
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
