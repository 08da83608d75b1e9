use std::collections::HashMap;
use std::sync::RwLock;

use globset::{Glob, GlobMatcher};
use tracing::debug;
use unsbridge_domain::{AssetAddress, AssetUri};

use crate::error::AddressError;

/// One location in the hierarchy as configured. `asset` may be left out, in
/// which case it is derived from the asset URI's last path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpec {
    pub enterprise: String,
    pub site: String,
    pub area: String,
    pub line: String,
    pub asset: Option<String>,
}

impl AddressSpec {
    fn to_address(&self, uri: &AssetUri) -> Result<AssetAddress, AddressError> {
        let asset = match &self.asset {
            Some(a) => a.clone(),
            None => uri.short_name(),
        };
        Ok(AssetAddress::new(
            self.enterprise.clone(),
            self.site.clone(),
            self.area.clone(),
            self.line.clone(),
            asset,
        )?)
    }
}

/// An ordered glob rule: first match wins.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub pattern: String,
    pub spec: AddressSpec,
}

/// The three-tier mapping: exact asset table, ordered glob patterns, default.
#[derive(Debug, Clone)]
pub struct MappingRules {
    pub exact: HashMap<String, AddressSpec>,
    pub patterns: Vec<PatternRule>,
    pub default_spec: AddressSpec,
}

struct CompiledPattern {
    matcher: GlobMatcher,
    spec: AddressSpec,
}

/// Resolves asset URIs to hierarchy addresses. Resolution is total — the
/// default rule always applies — and memoized for the process lifetime, so
/// repeated calls for the same URI return the identical address.
pub struct AddressResolver {
    exact: HashMap<String, AddressSpec>,
    patterns: Vec<CompiledPattern>,
    default_spec: AddressSpec,
    cache: RwLock<HashMap<String, AssetAddress>>,
}

impl AddressResolver {
    /// Compile the rule set. Fails fast on malformed globs or mapping
    /// segments that are not topic-safe, so `resolve` never can.
    pub fn new(rules: MappingRules) -> Result<Self, AddressError> {
        for spec in rules
            .exact
            .values()
            .chain(rules.patterns.iter().map(|p| &p.spec))
            .chain(std::iter::once(&rules.default_spec))
        {
            // Probe with a fixed URI; only the configured segments matter here.
            spec.to_address(&AssetUri::new("urn:probe"))?;
        }
        let patterns = rules
            .patterns
            .into_iter()
            .map(|rule| {
                let matcher = Glob::new(&rule.pattern)
                    .map_err(|source| AddressError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })?
                    .compile_matcher();
                Ok(CompiledPattern { matcher, spec: rule.spec })
            })
            .collect::<Result<Vec<_>, AddressError>>()?;
        Ok(Self {
            exact: rules.exact,
            patterns,
            default_spec: rules.default_spec,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve a URI to its address: exact table, then first glob match,
    /// then the default. Exactly one always succeeds.
    pub fn resolve(&self, uri: &AssetUri) -> AssetAddress {
        if let Some(hit) = self.cache.read().expect("resolver cache poisoned").get(uri.as_str()) {
            return hit.clone();
        }
        let spec = self
            .exact
            .get(uri.as_str())
            .or_else(|| {
                self.patterns
                    .iter()
                    .find(|p| p.matcher.is_match(uri.as_str()))
                    .map(|p| &p.spec)
            })
            .unwrap_or(&self.default_spec);
        // Segments were validated at construction; only the derived asset
        // name could still misbehave, and short_name() is topic-safe.
        let address = spec
            .to_address(uri)
            .expect("validated mapping produced unsafe address");
        debug!(uri = %uri, address = %address, "resolved asset address");
        self.cache
            .write()
            .expect("resolver cache poisoned")
            .insert(uri.as_str().to_string(), address.clone());
        address
    }
}
