//! Site-fare lookup
//!
//! Resolves (city, mode, origin, destination) to a base fare. Pure
//! read path; the rule set is reference data pushed in by the admin
//! collaborator and reloaded wholesale.
//!
//! # Missing-route policy
//!
//! 1. Explicit rule for the directed route
//! 2. Configured flat fare for the mode
//! 3. [`Error::FareUnavailable`] — settlement must not guess

use crate::{
    config::FlatFareConfig,
    types::{CityCode, SiteFareRule, SiteId, TransitMode},
    Error, Result,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Key for one directed route
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    city: CityCode,
    mode: TransitMode,
    from_site: SiteId,
    to_site: SiteId,
}

/// Fare lookup table
pub struct SiteFareTable {
    /// Directed route rules
    rules: RwLock<HashMap<RouteKey, Decimal>>,

    /// Flat fallbacks per mode
    flat_fares: FlatFareConfig,
}

impl SiteFareTable {
    /// Create an empty table with flat-fare fallbacks
    pub fn new(flat_fares: FlatFareConfig) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            flat_fares,
        }
    }

    /// Replace the rule set wholesale
    pub fn load_rules(&self, rules: Vec<SiteFareRule>) {
        let mut table = HashMap::with_capacity(rules.len());
        for rule in rules {
            table.insert(
                RouteKey {
                    city: rule.city,
                    mode: rule.mode,
                    from_site: rule.from_site,
                    to_site: rule.to_site,
                },
                rule.fare,
            );
        }

        let count = table.len();
        *self.rules.write() = table;
        tracing::info!(rules = count, "Fare rules loaded");
    }

    /// Number of loaded route rules
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Resolve the base fare for a directed route
    pub fn lookup_fare(
        &self,
        city: &CityCode,
        mode: TransitMode,
        from_site: &SiteId,
        to_site: &SiteId,
    ) -> Result<Decimal> {
        let key = RouteKey {
            city: city.clone(),
            mode,
            from_site: from_site.clone(),
            to_site: to_site.clone(),
        };

        if let Some(fare) = self.rules.read().get(&key) {
            return Ok(*fare);
        }

        let flat = match mode {
            TransitMode::Subway => self.flat_fares.subway,
            TransitMode::Bus => self.flat_fares.bus,
        };

        flat.ok_or_else(|| Error::FareUnavailable {
            city: city.to_string(),
            mode: mode.to_string(),
            from_site: from_site.to_string(),
            to_site: to_site.to_string(),
        })
    }
}
