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

//! Client configuration.
//!
//! Behavior of the sharing client is driven by a small set of feature flags
//! and cache tuning knobs. Configuration can be built programmatically or
//! parsed from a string-property map; invalid property values fall back to
//! the documented defaults rather than failing.

use std::collections::HashMap;
use std::time::Duration;

/// Property to enable/disable sending predicate hints to the server.
///
/// When set to "false", no predicate JSON is ever produced. Default: "true"
pub const PREDICATE_HINTS_ENABLED: &str = "sharing.client.predicate-hints-enabled";

/// Property selecting the second-generation predicate combination rule.
///
/// When enabled, partition and data predicates are translated independently
/// and combined under a synthetic `and` node. Default: "false"
pub const PREDICATE_V2_ENABLED: &str = "sharing.client.predicate-v2-enabled";

/// Property to enable/disable the process-wide pre-signed URL cache.
///
/// When disabled, scan resolution never populates the cache and every read
/// issues a fresh signed-URL call. Default: "true"
pub const URL_CACHE_ENABLED: &str = "sharing.client.url-cache-enabled";

/// Property governing how aggressively a changed remote schema is rejected.
///
/// When enabled, a live schema that dropped or narrowed a planned field
/// fails the scan; additive changes are always tolerated. Default: "false"
pub const STRUCTURAL_SCHEMA_MATCH_ENABLED: &str =
    "sharing.client.structural-schema-match-enabled";

/// Property selecting when signed URLs are fetched: "on-resolve" (eager)
/// or "on-read" (lazy). Default: "on-resolve"
pub const URL_CACHE_POPULATION: &str = "sharing.client.url-cache.population";

/// Property to set the maximum number of cached signed URLs.
///
/// Least-recently-used entries are evicted past this bound. Default: 10000
pub const URL_CACHE_MAX_ENTRIES: &str = "sharing.client.url-cache.max-entries";

/// Property to set the refresh skew in milliseconds: a cached URL within
/// this margin of its expiration is treated as stale. Default: 60000
pub const URL_CACHE_REFRESH_SKEW_MS: &str = "sharing.client.url-cache.refresh-skew-ms";

/// Property to set how long a reader waits on an in-flight refresh of the
/// same batch before surfacing a timeout, in milliseconds. Default: 30000
pub const URL_CACHE_REFRESH_TIMEOUT_MS: &str = "sharing.client.url-cache.refresh-timeout-ms";

/// Default maximum number of cached signed URLs.
pub const DEFAULT_URL_CACHE_MAX_ENTRIES: u64 = 10_000;

/// Default refresh skew: 60 seconds.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);

/// Default refresh wait timeout: 30 seconds.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// When the URL cache for a scan is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePopulation {
    /// Sign the whole file batch while resolving the scan.
    OnResolve,
    /// Defer signing until the first read misses the cache.
    OnRead,
}

impl CachePopulation {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "on-resolve" | "eager" => Some(CachePopulation::OnResolve),
            "on-read" | "lazy" => Some(CachePopulation::OnRead),
            _ => None,
        }
    }
}

/// Configuration for the sharing client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whether predicate hints are sent at all.
    pub predicate_hints_enabled: bool,
    /// Whether the V2 predicate combination rule is used.
    pub predicate_v2_enabled: bool,
    /// Whether the pre-signed URL cache is used.
    pub url_cache_enabled: bool,
    /// Whether a dropped/narrowed remote schema field fails the scan.
    pub structural_schema_match_enabled: bool,
    /// Eager or lazy URL cache population.
    pub cache_population: CachePopulation,
    /// Maximum number of cached signed URLs.
    pub max_cached_urls: u64,
    /// Entries within this margin of expiry are refreshed before use.
    pub refresh_skew: Duration,
    /// Upper bound on waiting for an in-flight batch refresh.
    pub refresh_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            predicate_hints_enabled: true,
            predicate_v2_enabled: false,
            url_cache_enabled: true,
            structural_schema_match_enabled: false,
            cache_population: CachePopulation::OnResolve,
            max_cached_urls: DEFAULT_URL_CACHE_MAX_ENTRIES,
            refresh_skew: DEFAULT_REFRESH_SKEW,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Creates configuration from a string-property map.
    ///
    /// Unknown properties and invalid values are ignored and defaults apply.
    pub fn from_properties(props: &HashMap<String, String>) -> Self {
        let defaults = Self::default();

        let bool_prop = |key: &str, default: bool| {
            props.get(key).and_then(|v| parse_bool(v)).unwrap_or(default)
        };
        let millis_prop = |key: &str, default: Duration| {
            props
                .get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            predicate_hints_enabled: bool_prop(
                PREDICATE_HINTS_ENABLED,
                defaults.predicate_hints_enabled,
            ),
            predicate_v2_enabled: bool_prop(PREDICATE_V2_ENABLED, defaults.predicate_v2_enabled),
            url_cache_enabled: bool_prop(URL_CACHE_ENABLED, defaults.url_cache_enabled),
            structural_schema_match_enabled: bool_prop(
                STRUCTURAL_SCHEMA_MATCH_ENABLED,
                defaults.structural_schema_match_enabled,
            ),
            cache_population: props
                .get(URL_CACHE_POPULATION)
                .and_then(|v| CachePopulation::parse(v))
                .unwrap_or(defaults.cache_population),
            max_cached_urls: props
                .get(URL_CACHE_MAX_ENTRIES)
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_cached_urls),
            refresh_skew: millis_prop(URL_CACHE_REFRESH_SKEW_MS, defaults.refresh_skew),
            refresh_timeout: millis_prop(URL_CACHE_REFRESH_TIMEOUT_MS, defaults.refresh_timeout),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "on" => Some(true),
        "false" | "f" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets whether predicate hints are sent at all.
    pub fn predicate_hints_enabled(mut self, enabled: bool) -> Self {
        self.config.predicate_hints_enabled = enabled;
        self
    }

    /// Sets whether the V2 predicate combination rule is used.
    pub fn predicate_v2_enabled(mut self, enabled: bool) -> Self {
        self.config.predicate_v2_enabled = enabled;
        self
    }

    /// Sets whether the pre-signed URL cache is used.
    pub fn url_cache_enabled(mut self, enabled: bool) -> Self {
        self.config.url_cache_enabled = enabled;
        self
    }

    /// Sets whether a dropped/narrowed remote schema field fails the scan.
    pub fn structural_schema_match_enabled(mut self, enabled: bool) -> Self {
        self.config.structural_schema_match_enabled = enabled;
        self
    }

    /// Sets eager or lazy URL cache population.
    pub fn cache_population(mut self, population: CachePopulation) -> Self {
        self.config.cache_population = population;
        self
    }

    /// Sets the maximum number of cached signed URLs.
    pub fn max_cached_urls(mut self, max: u64) -> Self {
        self.config.max_cached_urls = max;
        self
    }

    /// Sets the refresh skew.
    pub fn refresh_skew(mut self, skew: Duration) -> Self {
        self.config.refresh_skew = skew;
        self
    }

    /// Sets the in-flight refresh wait timeout.
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.config.refresh_timeout = timeout;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
