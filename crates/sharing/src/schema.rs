// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Schema compatibility between a planned scan and the live table.
//!
//! A scan plan snapshots the table schema at planning time. By the time the
//! scan resolves, the shared table may have evolved. Additive evolution is
//! harmless; the plan simply does not project the new fields. A field that
//! disappeared or narrowed invalidates the plan and the query must be
//! re-planned against the current schema.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{Error, ErrorKind, Result};

/// One field of a struct-type schema, as found on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchemaField {
    /// Field name.
    pub name: String,
    /// Field type; kept as raw JSON so nested struct/array/map types
    /// compare structurally.
    #[serde(rename = "type")]
    pub field_type: JsonValue,
    /// Whether the field may hold nulls.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct StructSchema {
    #[serde(rename = "type")]
    kind: String,
    fields: Vec<SchemaField>,
}

/// Parses a struct-type schema JSON string into its field list.
pub fn parse_struct_schema(schema_string: &str) -> Result<Vec<SchemaField>> {
    let schema: StructSchema = serde_json::from_str(schema_string).map_err(|err| {
        Error::new(ErrorKind::DataInvalid, "malformed table schema").with_source(err)
    })?;
    if schema.kind != "struct" {
        return Err(Error::new(
            ErrorKind::DataInvalid,
            format!("expected a struct schema, got `{}`", schema.kind),
        ));
    }
    Ok(schema.fields)
}

/// Checks that a table's live schema can still serve a plan built against
/// `planned`.
///
/// With `structural` matching enabled, every planned field must still exist
/// with an identical type, and a field the plan relies on being
/// non-nullable must not have become nullable; fields added live are always
/// fine. With structural matching disabled, incompatibilities are logged
/// and tolerated.
pub fn ensure_read_compatible(planned: &str, live: &str, structural: bool) -> Result<()> {
    if planned == live {
        return Ok(());
    }

    match check_fields(planned, live) {
        Ok(()) => Ok(()),
        Err(err) if structural => Err(err),
        Err(err) => {
            warn!(error = %err, "live table schema drifted from the planned schema");
            Ok(())
        }
    }
}

fn check_fields(planned: &str, live: &str) -> Result<()> {
    let planned_fields = parse_struct_schema(planned)?;
    let live_fields = parse_struct_schema(live)?;

    let live_by_name: HashMap<&str, &SchemaField> = live_fields
        .iter()
        .map(|field| (field.name.as_str(), field))
        .collect();

    for planned_field in &planned_fields {
        let Some(live_field) = live_by_name.get(planned_field.name.as_str()) else {
            return Err(Error::new(
                ErrorKind::SchemaMismatch,
                format!(
                    "field `{}` is missing from the current table schema; re-plan the query",
                    planned_field.name
                ),
            ));
        };

        if live_field.field_type != planned_field.field_type {
            return Err(Error::new(
                ErrorKind::SchemaMismatch,
                format!(
                    "field `{}` changed type from {} to {}; re-plan the query",
                    planned_field.name, planned_field.field_type, live_field.field_type
                ),
            ));
        }

        if !planned_field.nullable && live_field.nullable {
            return Err(Error::new(
                ErrorKind::SchemaMismatch,
                format!(
                    "field `{}` became nullable; re-plan the query",
                    planned_field.name
                ),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(fields: &str) -> String {
        format!(r#"{{"type":"struct","fields":[{fields}]}}"#)
    }

    const ID: &str = r#"{"name":"id","type":"integer","nullable":false}"#;
    const NAME: &str = r#"{"name":"name","type":"string","nullable":true}"#;
    const EXTRA: &str = r#"{"name":"extra","type":"double","nullable":true}"#;

    #[test]
    fn test_identical_schemas_are_compatible() {
        let planned = schema(&format!("{ID},{NAME}"));
        ensure_read_compatible(&planned, &planned, true).unwrap();
    }

    #[test]
    fn test_added_field_is_compatible() {
        let planned = schema(&format!("{ID},{NAME}"));
        let live = schema(&format!("{ID},{NAME},{EXTRA}"));
        ensure_read_compatible(&planned, &live, true).unwrap();
    }

    #[test]
    fn test_removed_field_is_rejected_structurally() {
        let planned = schema(&format!("{ID},{NAME}"));
        let live = schema(ID);
        let err = ensure_read_compatible(&planned, &live, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert!(err.message().contains("`name`"));
    }

    #[test]
    fn test_type_change_is_rejected_structurally() {
        let planned = schema(ID);
        let live = schema(r#"{"name":"id","type":"long","nullable":false}"#);
        let err = ensure_read_compatible(&planned, &live, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert!(err.message().contains("changed type"));
    }

    #[test]
    fn test_narrowed_nullability_is_rejected_structurally() {
        let planned = schema(ID);
        let live = schema(r#"{"name":"id","type":"integer","nullable":true}"#);
        let err = ensure_read_compatible(&planned, &live, true).unwrap_err();
        assert!(err.message().contains("became nullable"));
    }

    #[test]
    fn test_live_non_nullable_is_fine_for_nullable_plan() {
        let planned = schema(NAME);
        let live = schema(r#"{"name":"name","type":"string","nullable":false}"#);
        ensure_read_compatible(&planned, &live, true).unwrap();
    }

    #[test]
    fn test_drift_is_tolerated_without_structural_matching() {
        let planned = schema(&format!("{ID},{NAME}"));
        let live = schema(ID);
        ensure_read_compatible(&planned, &live, false).unwrap();
    }

    #[test]
    fn test_nested_struct_types_compare_structurally() {
        let nested =
            r#"{"name":"address","type":{"type":"struct","fields":[{"name":"zip","type":"string","nullable":true}]},"nullable":true}"#;
        let planned = schema(nested);
        ensure_read_compatible(&planned, &planned, true).unwrap();

        let changed =
            r#"{"name":"address","type":{"type":"struct","fields":[{"name":"zip","type":"integer","nullable":true}]},"nullable":true}"#;
        let live = schema(changed);
        let err = ensure_read_compatible(&planned, &live, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn test_non_struct_schema_is_data_invalid() {
        let err = parse_struct_schema(r#"{"type":"map","fields":[]}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
    }
}
