//! Core domain model for the Hotelbeds content sync: entity catalog, record normalization, watermarks.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

pub const CRATE_NAME: &str = "hbc-core";

/// Namespace prefix applied to every destination table.
pub const TABLE_PREFIX: &str = "hotelbeds";

/// Bookkeeping table holding one watermark row per synced table.
pub const WATERMARK_TABLE: &str = "hotelbeds_last_updated_time";

/// Wire format of watermark dates (`lastUpdateTime` query parameter).
pub const WATERMARK_DATE_FORMAT: &str = "%Y-%m-%d";

/// Endpoints whose payload array is keyed by a camelCase name instead of the trailing path segment.
const RESPONSE_KEY_ALIASES: &[(&str, &str)] = &[
    ("facilitygroups", "facilityGroups"),
    ("imagetypes", "imageTypes"),
    ("facilitytypologies", "facilityTypologies"),
    ("groupcategories", "groupCategories"),
    ("boardgroups", "boardGroups"),
    ("ratecomments", "rateComments"),
];

const CATALOG: &[(&str, &str)] = &[
    ("locations/countries", "countries"),
    ("locations/destinations", "destinations"),
    ("types/rooms", "rooms"),
    ("types/boards", "boards"),
    ("types/boardgroups", "boardgroups"),
    ("types/accommodations", "accommodations"),
    ("types/categories", "categories"),
    ("types/chains", "chains"),
    ("types/classifications", "classifications"),
    ("types/facilities", "facilities"),
    ("types/facilitygroups", "facilitygroups"),
    ("types/facilitytypologies", "facilitytypologies"),
    ("types/groupcategories", "groupcategories"),
    ("types/issues", "issues"),
    ("types/languages", "languages"),
    ("types/promotions", "promotions"),
    ("types/segments", "segments"),
    ("types/imagetypes", "imagetypes"),
    ("types/currencies", "currencies"),
    ("types/terminals", "terminals"),
    ("types/ratecomments", "ratecomments"),
    ("hotels", "hotels"),
];

/// One upstream data type and the table it lands in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub endpoint: String,
    pub table: String,
    pub response_key: String,
}

impl EntityDescriptor {
    pub fn new(endpoint: impl Into<String>, table: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let response_key = response_key_for(&endpoint);
        Self {
            endpoint,
            table: table.into(),
            response_key,
        }
    }

    /// Destination table name including the namespace prefix.
    pub fn qualified_table(&self) -> String {
        prefixed_table_name(&self.table)
    }
}

/// The fixed (endpoint -> table) catalog, in sync order.
pub fn catalog() -> Vec<EntityDescriptor> {
    CATALOG
        .iter()
        .map(|(endpoint, table)| EntityDescriptor::new(*endpoint, *table))
        .collect()
}

/// Key under which the upstream nests the record array for `endpoint`.
pub fn response_key_for(endpoint: &str) -> String {
    let tail = endpoint
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(endpoint);
    RESPONSE_KEY_ALIASES
        .iter()
        .find(|(segment, _)| *segment == tail)
        .map(|(_, alias)| (*alias).to_string())
        .unwrap_or_else(|| tail.to_string())
}

pub fn prefixed_table_name(table: &str) -> String {
    let prefix = format!("{TABLE_PREFIX}_");
    if table.starts_with(&prefix) {
        table.to_string()
    } else {
        format!("{prefix}{table}")
    }
}

/// Lowercase, spaces to underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Raw upstream record as delivered in one page.
pub type Record = Map<String, Value>;

/// Scalar cell value after flattening; nested structure is carried as serialized JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Nested(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Text form written to the loosely-typed destination columns.
    pub fn to_sql_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Number(n) => Some(n.to_string()),
            FieldValue::Text(s) | FieldValue::Nested(s) => Some(s.clone()),
        }
    }
}

impl From<&Value> for FieldValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => FieldValue::Number(n.clone()),
            Value::String(s) => FieldValue::Text(s.clone()),
            // Map keys are ordered, so the serialized form is canonical.
            nested @ (Value::Array(_) | Value::Object(_)) => {
                FieldValue::Nested(nested.to_string())
            }
        }
    }
}

/// A page of records flattened into a uniform row shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
}

impl NormalizedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Flatten records into rows over the union of their (normalized) field names.
///
/// Columns keep first-appearance order. A column with no non-null value anywhere in the
/// batch is dropped. When two raw names normalize to the same column, the first non-null
/// value in the record wins.
pub fn normalize_records(records: &[Record]) -> NormalizedBatch {
    let mut columns: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut populated: Vec<bool> = Vec::new();

    for record in records {
        for (name, value) in record {
            let column = normalize_column_name(name);
            if column.is_empty() {
                continue;
            }
            let idx = *index.entry(column.clone()).or_insert_with(|| {
                columns.push(column);
                populated.push(false);
                columns.len() - 1
            });
            if !value.is_null() {
                populated[idx] = true;
            }
        }
    }

    let mut kept_slot: Vec<Option<usize>> = Vec::with_capacity(columns.len());
    let mut kept_columns = Vec::new();
    for (column, has_value) in columns.into_iter().zip(populated) {
        if has_value {
            kept_slot.push(Some(kept_columns.len()));
            kept_columns.push(column);
        } else {
            kept_slot.push(None);
        }
    }

    let rows = records
        .iter()
        .map(|record| {
            let mut row = vec![FieldValue::Null; kept_columns.len()];
            for (name, value) in record {
                let Some(&idx) = index.get(&normalize_column_name(name)) else {
                    continue;
                };
                if let Some(slot) = kept_slot[idx] {
                    if row[slot].is_null() {
                        row[slot] = FieldValue::from(value);
                    }
                }
            }
            row
        })
        .collect();

    NormalizedBatch {
        columns: kept_columns,
        rows,
    }
}

/// Last successful sync date for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub table_name: String,
    pub last_updated: NaiveDate,
}

/// Table name -> last successful sync date.
pub type Watermarks = BTreeMap<String, NaiveDate>;

pub fn format_watermark(date: NaiveDate) -> String {
    date.format(WATERMARK_DATE_FORMAT).to_string()
}
