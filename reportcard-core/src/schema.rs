use once_cell::sync::Lazy;
use serde_json::Value;

/// JSON Schema describing the report card catalog document (Draft 2020-12).
pub static CATALOG_SCHEMA_JSON: &str = include_str!("../../schemas/report-cards.schema.json");

/// Lazily parsed schema to make programmatic access ergonomic.
pub static CATALOG_SCHEMA_VALUE: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(CATALOG_SCHEMA_JSON)
        .expect("embedded report card schema must be valid JSON")
});

/// Returns a borrowed reference to the parsed catalog schema.
pub fn catalog_schema() -> &'static Value {
    &CATALOG_SCHEMA_VALUE
}
