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

//! Translation of predicate trees into the wire predicate grammar.
//!
//! Pushdown is an optimization hint, not a correctness requirement: a shape
//! the grammar cannot express is dropped from the hint rather than failing
//! the scan, and the engine re-filters locally. Dropping a conjunct of an
//! `and` only widens the returned file set, so partial conversion is allowed
//! there; under `or` and `not`, a partial conversion would change meaning,
//! so those require every child to convert.

use serde_json::{Value as JsonValue, json};
use tracing::debug;

use crate::expr::Expr;

/// Translates one predicate tree into wire JSON.
///
/// Returns `None` when the tree (or a meaning-changing part of it) falls
/// outside the wire grammar.
pub fn to_wire_json(expr: &Expr) -> Option<JsonValue> {
    let translated = convert(expr, false);
    if translated.is_none() {
        debug!(
            predicate = %expr.canonical_form(),
            "predicate not expressible in the wire grammar, dropping hint"
        );
    }
    translated
}

fn convert(expr: &Expr, strict: bool) -> Option<JsonValue> {
    match expr {
        Expr::Compare { op, left, right } => {
            // The grammar compares a column against a literal; anything else
            // (column vs column, nested expressions) is not expressible.
            let column_literal = matches!(
                (left.as_ref(), right.as_ref()),
                (Expr::Column { .. }, Expr::Literal { .. })
                    | (Expr::Literal { .. }, Expr::Column { .. })
            );
            if !column_literal {
                return None;
            }
            let left = convert_operand(left)?;
            let right = convert_operand(right)?;
            Some(json!({
                "op": op.as_wire_str(),
                "children": [left, right],
            }))
        }
        Expr::And(children) => {
            let converted: Vec<JsonValue> = if strict {
                // Under NOT, dropping a conjunct would invert into a wider
                // negation; every child must convert.
                children
                    .iter()
                    .map(|child| convert(child, true))
                    .collect::<Option<Vec<_>>>()?
            } else {
                children
                    .iter()
                    .filter_map(|child| convert(child, false))
                    .collect()
            };
            match converted.len() {
                0 => None,
                1 => Some(converted.into_iter().next().expect("len checked")),
                _ => Some(json!({"op": "and", "children": converted})),
            }
        }
        Expr::Or(children) => {
            // A dropped disjunct would narrow the result set; all or nothing.
            let converted: Vec<JsonValue> = children
                .iter()
                .map(|child| convert(child, strict))
                .collect::<Option<Vec<_>>>()?;
            Some(json!({"op": "or", "children": converted}))
        }
        Expr::Not(child) => {
            let converted = convert(child, true)?;
            Some(json!({"op": "not", "children": [converted]}))
        }
        Expr::IsNull(child) => {
            let column = convert_column(child)?;
            Some(json!({"op": "isNull", "children": [column]}))
        }
        Expr::In { column, list } => {
            let mut children = Vec::with_capacity(list.len() + 1);
            children.push(convert_column(column)?);
            for item in list {
                children.push(convert_literal(item)?);
            }
            Some(json!({"op": "in", "children": children}))
        }
        // A bare operand is not a predicate.
        Expr::Column { .. } | Expr::Literal { .. } => None,
    }
}

fn convert_operand(expr: &Expr) -> Option<JsonValue> {
    match expr {
        Expr::Column { .. } => convert_column(expr),
        Expr::Literal { .. } => convert_literal(expr),
        _ => None,
    }
}

fn convert_column(expr: &Expr) -> Option<JsonValue> {
    let Expr::Column { name, value_type } = expr else {
        return None;
    };
    Some(json!({
        "op": "column",
        "name": name,
        "valueType": value_type.as_wire_str(),
    }))
}

fn convert_literal(expr: &Expr) -> Option<JsonValue> {
    let Expr::Literal { value, value_type } = expr else {
        return None;
    };
    Some(json!({
        "op": "literal",
        "value": value,
        "valueType": value_type.as_wire_str(),
    }))
}

/// Builds the predicate hint sent alongside a file-listing request.
///
/// With hints disabled nothing is sent. In V1 only partition predicates are
/// translated and data predicates are ignored. In V2 both sides translate
/// independently; two non-empty sides are joined under a synthetic
/// top-level `and`, a single non-empty side is emitted unwrapped.
pub fn predicate_hints(
    partition_predicates: &[Expr],
    data_predicates: &[Expr],
    hints_enabled: bool,
    v2_enabled: bool,
) -> Option<JsonValue> {
    if !hints_enabled {
        return None;
    }

    let partition = convert_side(partition_predicates);
    if !v2_enabled {
        return partition;
    }

    let data = convert_side(data_predicates);
    match (partition, data) {
        (Some(partition), Some(data)) => Some(json!({
            "op": "and",
            "children": [partition, data],
        })),
        (Some(single), None) | (None, Some(single)) => Some(single),
        (None, None) => None,
    }
}

/// Translates one side (partition or data) of the hint. Multiple predicates
/// are implicitly conjunctive.
fn convert_side(predicates: &[Expr]) -> Option<JsonValue> {
    match predicates {
        [] => None,
        [single] => to_wire_json(single),
        many => to_wire_json(&Expr::And(many.to_vec())),
    }
}
