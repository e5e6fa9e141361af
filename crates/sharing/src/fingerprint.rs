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

//! Deterministic fingerprints of scan parameters.
//!
//! The fingerprint is the cache-partition key: it must capture exactly the
//! query axes that change the returned file set. Two scans that differ in
//! predicates, limit, or version must land in different partitions; two
//! scans that only differ in how their predicate trees were constructed
//! must land in the same one. Change-range scans hash the version range
//! alone: the server returns the full action set for the range regardless
//! of predicates, so folding predicates in would fragment the cache across
//! requests that are served identically.

use std::fmt;

use sha2::{Digest as _, Sha256};

use crate::expr::Expr;
use crate::scan::VersionSelector;

/// A 64-hex-character digest of a scan's semantically-relevant parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    /// Fingerprints a point-in-time scan.
    ///
    /// Covers the canonical predicate forms (order-independent), the row
    /// limit, and the version selector.
    pub fn of_scan(
        predicates: &[Expr],
        limit: Option<u64>,
        version: &VersionSelector,
    ) -> QueryFingerprint {
        // The predicate sequence is implicitly conjunctive, so its order
        // must not matter.
        let mut forms: Vec<String> = predicates.iter().map(Expr::canonical_form).collect();
        forms.sort_unstable();

        let mut parts = vec![format!("predicates:{}", forms.len())];
        parts.extend(forms);
        parts.push(match limit {
            Some(limit) => format!("limit:{limit}"),
            None => "limit:none".to_string(),
        });
        parts.push(format!("version:{}", version.fingerprint_part()));

        QueryFingerprint(digest_parts(&parts))
    }

    /// Fingerprints a change-range (CDF) scan from the range alone.
    pub fn of_change_range(start_version: i64, end_version: i64) -> QueryFingerprint {
        QueryFingerprint(digest_parts(&[
            "cdf".to_string(),
            start_version.to_string(),
            end_version.to_string(),
        ]))
    }

    /// The digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for QueryFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hashes parts with length framing so that field boundaries cannot
/// collide (`["ab","c"]` and `["a","bc"]` digest differently).
fn digest_parts<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize())
}
