use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, warn};

use super::crawler::DiscoveredFile;
use super::enrich::EnrichOutcome;

/// Normalized video record handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub pageid: i64,
    pub title: String,
    pub canonicaltitle: String,
    pub url: String,
    pub descriptionurl: String,
    pub width: u32,
    pub height: u32,
    /// Seconds.
    #[serde(default)]
    pub duration: f64,
    /// Bytes.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumburl: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordRejected {
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("page is missing upstream")]
    MissingPage,
    #[error("no page in response")]
    NoPages,
    #[error("field `{0}` missing or mistyped")]
    MissingField(&'static str),
}

/// Where the page envelope sits in a metadata response.
enum Shape<'a> {
    /// `{query?: {pages: {<id>: page} | [page]}}`
    Nested(Vec<&'a Map<String, Value>>),
    /// The page object itself, or its videoinfo fields already flattened.
    Flat(&'a Map<String, Value>),
}

fn detect_shape(value: &Value) -> Result<Shape<'_>, RecordRejected> {
    let obj = value.as_object().ok_or(RecordRejected::NotAnObject)?;
    let scope = obj.get("query").and_then(Value::as_object).unwrap_or(obj);
    let shape = match scope.get("pages") {
        Some(Value::Object(pages)) => Shape::Nested(pages.values().filter_map(Value::as_object).collect()),
        Some(Value::Array(pages)) => Shape::Nested(pages.iter().filter_map(Value::as_object).collect()),
        _ => Shape::Flat(obj),
    };
    Ok(shape)
}

/// Pick the page for `file` out of a nested response: the one whose title
/// matches, else the first present page.
fn select_page<'a>(
    pages: &[&'a Map<String, Value>],
    file: &DiscoveredFile,
) -> Result<&'a Map<String, Value>, RecordRejected> {
    if pages.is_empty() {
        return Err(RecordRejected::NoPages);
    }
    let present: Vec<_> = pages
        .iter()
        .copied()
        .filter(|p| !p.contains_key("missing") && !p.contains_key("invalid"))
        .collect();
    present
        .iter()
        .copied()
        .find(|p| p.get("title").and_then(Value::as_str) == Some(file.title.as_str()))
        .or_else(|| present.first().copied())
        .ok_or(RecordRejected::MissingPage)
}

fn str_field(map: &Map<String, Value>, key: &'static str) -> Result<String, RecordRejected> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(RecordRejected::MissingField(key))
}

fn uint_field(map: &Map<String, Value>, key: &'static str) -> Result<u64, RecordRejected> {
    map.get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
        .ok_or(RecordRejected::MissingField(key))
}

fn dimension(map: &Map<String, Value>, key: &'static str) -> Result<u32, RecordRejected> {
    uint_field(map, key)
        .and_then(|v| u32::try_from(v).map_err(|_| RecordRejected::MissingField(key)))
}

/// Turn one metadata response into a record. `file` supplies `pageid`
/// and `title` when the response has no page envelope.
pub fn normalize(value: &Value, file: &DiscoveredFile) -> Result<MediaRecord, RecordRejected> {
    let page = match detect_shape(value)? {
        Shape::Nested(pages) => select_page(&pages, file)?,
        Shape::Flat(page) => page,
    };
    let info = page
        .get("videoinfo")
        .and_then(Value::as_array)
        .and_then(|infos| infos.first())
        .and_then(Value::as_object)
        .unwrap_or(page);

    let pageid = page
        .get("pageid")
        .and_then(Value::as_i64)
        .or(file.pageid)
        .ok_or(RecordRejected::MissingField("pageid"))?;
    let title = page
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| file.title.clone());

    Ok(MediaRecord {
        pageid,
        title,
        canonicaltitle: str_field(info, "canonicaltitle")?,
        url: str_field(info, "url")?,
        descriptionurl: str_field(info, "descriptionurl")?,
        width: dimension(info, "width")?,
        height: dimension(info, "height")?,
        duration: info.get("duration").and_then(Value::as_f64).unwrap_or(0.0),
        size: uint_field(info, "size")?,
        thumburl: info.get("thumburl").and_then(Value::as_str).map(str::to_string),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateReport {
    pub records: Vec<MediaRecord>,
    /// Outcomes whose metadata fetch failed.
    pub failed: usize,
    /// Responses that did not normalize.
    pub dropped: usize,
}

impl AggregateReport {
    pub fn push(&mut self, outcome: &EnrichOutcome) {
        let value = match &outcome.result {
            Ok(value) => value,
            Err(err) => {
                error!(file = %outcome.file.title, error = %err, "metadata unavailable; file skipped");
                self.failed += 1;
                return;
            }
        };
        match normalize(value, &outcome.file) {
            Ok(record) => self.records.push(record),
            Err(reason) => {
                warn!(file = %outcome.file.title, reason = %reason, "metadata record dropped");
                self.dropped += 1;
            }
        }
    }
}

pub fn aggregate_report(outcomes: &[EnrichOutcome]) -> AggregateReport {
    let mut report = AggregateReport::default();
    for outcome in outcomes {
        report.push(outcome);
    }
    report
}

/// Records for every outcome that normalizes, in input order.
pub fn aggregate(outcomes: &[EnrichOutcome]) -> Vec<MediaRecord> {
    aggregate_report(outcomes).records
}
