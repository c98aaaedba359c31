//! Identifier normalization and canonical policy keys.
//!
//! All identifiers are lower-cased on write and on lookup, on every database
//! vendor.  Policy keys are authored in a vendor-agnostic form, so upstream
//! collectors must produce lower-cased identifiers and the fold here is a
//! no-op in the common path.

/// Normalize a database identifier: trim and ASCII lower-case.
pub fn normalize(ident: &str) -> String {
    ident.trim().to_ascii_lowercase()
}

/// Catalog key for a schema entry: `schema.table.column`, or `table.column`
/// when no schema is known.
pub fn schema_key(schema: &str, table: &str, column: &str) -> String {
    let schema = normalize(schema);
    let table = normalize(table);
    let column = normalize(column);
    if schema.is_empty() {
        format!("{table}.{column}")
    } else {
        format!("{schema}.{table}.{column}")
    }
}

/// Canonical mapping key, most specific form first:
/// `datasource:schema.table.column`, then `schema.table.column`, then
/// `table.column`.
pub fn mapping_key(
    datasource_id: Option<&str>,
    schema: Option<&str>,
    table: &str,
    column: &str,
) -> String {
    let ds = datasource_id.map(normalize).unwrap_or_default();
    let schema = schema.map(normalize).unwrap_or_default();
    let table = normalize(table);
    let column = normalize(column);

    if !ds.is_empty() {
        let tail = if schema.is_empty() {
            format!("{table}.{column}")
        } else {
            format!("{schema}.{table}.{column}")
        };
        return format!("{ds}:{tail}");
    }
    if !schema.is_empty() {
        return format!("{schema}.{table}.{column}");
    }
    format!("{table}.{column}")
}

/// Lookup candidates for a column, most specific first.  Resolution tries
/// each in order and stops at the first hit.
pub fn lookup_keys(
    datasource_id: Option<&str>,
    schema: Option<&str>,
    table: &str,
    column: &str,
) -> Vec<String> {
    let ds = datasource_id.map(normalize).unwrap_or_default();
    let schema = schema.map(normalize).unwrap_or_default();
    let table = normalize(table);
    let column = normalize(column);

    let mut keys = Vec::with_capacity(3);
    if !ds.is_empty() && !schema.is_empty() {
        keys.push(format!("{ds}:{schema}.{table}.{column}"));
    }
    if !schema.is_empty() {
        keys.push(format!("{schema}.{table}.{column}"));
    }
    keys.push(format!("{table}.{column}"));
    keys
}
