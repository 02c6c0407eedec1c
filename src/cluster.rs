use crate::continent::ContinentResolver;
use crate::geo::{GeoBounds, GeoPoint};
use crate::record::ValidatedRecord;
use std::collections::BTreeMap;

/// Aggregation granularity, finest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Region,
    Country,
    Continent,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Region, Tier::Country, Tier::Continent];

    /// Radius (screen pixels) within which markers of this tier are grouped
    pub fn cluster_radius_px(self) -> u32 {
        match self {
            Tier::Region => 80,
            Tier::Country | Tier::Continent => 120,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::Region => "region",
            Tier::Country => "country",
            Tier::Continent => "continent",
        }
    }
}

/// Aggregate over every record sharing a tier and key
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub tier: Tier,
    pub key: String,
    pub member_count: u64,
    pub aggregate_population: u64,
    pub bounds: GeoBounds,
}

impl Cluster {
    fn new(tier: Tier, key: String, position: GeoPoint) -> Self {
        Self {
            tier,
            key,
            member_count: 0,
            aggregate_population: 0,
            bounds: GeoBounds::from_point(position),
        }
    }

    fn add(&mut self, position: GeoPoint, population: u64) {
        self.member_count += 1;
        self.aggregate_population = self.aggregate_population.saturating_add(population);
        self.bounds.extend(position);
    }

    /// Marker text: the aggregate population, empty when there is none
    pub fn label(&self) -> String {
        if self.aggregate_population == 0 {
            String::new()
        } else {
            format_population(self.aggregate_population)
        }
    }
}

/// Group digits in threes separated by spaces: 1234567 -> "1 234 567"
pub fn format_population(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// Owner of the three cluster tiers.
///
/// Clusters are created lazily on first member and only ever grow; the only
/// way to remove one is [`ClusterIndex::reset`], which clears every tier.
/// Maps are ordered so that iteration, and therefore selection output, is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterIndex {
    resolver: ContinentResolver,
    regions: BTreeMap<String, Cluster>,
    countries: BTreeMap<String, Cluster>,
    continents: BTreeMap<String, Cluster>,
}

impl ClusterIndex {
    pub fn new(resolver: ContinentResolver) -> Self {
        Self {
            resolver,
            ..Self::default()
        }
    }

    /// Add a record to all three tiers. Returns false for excluded records,
    /// which leave the index untouched.
    pub fn apply(&mut self, validated: &ValidatedRecord) -> bool {
        if !validated.is_countable() {
            return false;
        }
        let record = &validated.record;
        let country = record.country_code.as_str();
        // Decided now and never revisited, even if a mapping arrives later
        let continent = self.resolver.resolve(country).to_string();

        bump(&mut self.regions, Tier::Region, country, record.position, record.population);
        bump(&mut self.countries, Tier::Country, country, record.position, record.population);
        bump(&mut self.continents, Tier::Continent, &continent, record.position, record.population);
        true
    }

    /// Drop every cluster in every tier. The resolver is kept.
    pub fn reset(&mut self) {
        self.regions.clear();
        self.countries.clear();
        self.continents.clear();
    }

    /// Replace the resolver used for records applied from now on
    pub fn install_resolver(&mut self, resolver: ContinentResolver) {
        self.resolver = resolver;
    }

    pub fn resolver(&self) -> &ContinentResolver {
        &self.resolver
    }

    /// Read-only view of one tier
    pub fn tier(&self, tier: Tier) -> &BTreeMap<String, Cluster> {
        match tier {
            Tier::Region => &self.regions,
            Tier::Country => &self.countries,
            Tier::Continent => &self.continents,
        }
    }

    pub fn get(&self, tier: Tier, key: &str) -> Option<&Cluster> {
        self.tier(tier).get(key)
    }

    pub fn clusters(&self, tier: Tier) -> impl Iterator<Item = &Cluster> {
        self.tier(tier).values()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.countries.is_empty() && self.continents.is_empty()
    }
}

fn bump(
    tier_map: &mut BTreeMap<String, Cluster>,
    tier: Tier,
    key: &str,
    position: GeoPoint,
    population: u64,
) {
    match tier_map.get_mut(key) {
        Some(cluster) => cluster.add(position, population),
        None => {
            let mut cluster = Cluster::new(tier, key.to_string(), position);
            cluster.add(position, population);
            tier_map.insert(key.to_string(), cluster);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::city;
    use crate::record::SPURIOUS_FEATURE_CODE;
    use std::collections::HashMap;

    fn mapping() -> ContinentResolver {
        ContinentResolver::from_mapping(HashMap::from([
            ("US".to_string(), "NA".to_string()),
            ("CA".to_string(), "NA".to_string()),
            ("FR".to_string(), "EU".to_string()),
        ]))
    }

    #[test]
    fn test_apply_updates_all_tiers() {
        let mut index = ClusterIndex::new(mapping());
        index.apply(&city("A", 10.0, 10.0, 1000, "US"));
        index.apply(&city("B", 12.0, 12.0, 2000, "US"));

        for tier in [Tier::Region, Tier::Country] {
            let us = index.get(tier, "US").unwrap();
            assert_eq!(us.member_count, 2);
            assert_eq!(us.aggregate_population, 3000);
            assert_eq!(us.tier, tier);
        }
        let na = index.get(Tier::Continent, "NA").unwrap();
        assert_eq!(na.aggregate_population, 3000);
        assert!(index.get(Tier::Continent, "US").is_none());
    }

    #[test]
    fn test_excluded_records_are_skipped() {
        let mut index = ClusterIndex::new(mapping());
        assert!(!index.apply(&city("A", 10.0, 10.0, 0, "US")));

        let mut pplx = city("B", 10.0, 10.0, 500, "US");
        pplx.record.feature_code = SPURIOUS_FEATURE_CODE.to_string();
        let pplx = ValidatedRecord::classify(pplx.record);
        assert!(!index.apply(&pplx));

        assert!(index.is_empty());
    }

    #[test]
    fn test_bounds_cover_members() {
        let mut index = ClusterIndex::new(mapping());
        let records = [
            city("A", 40.7, -74.0, 8_000_000, "US"),
            city("B", 34.0, -118.2, 4_000_000, "US"),
            city("C", 61.2, -149.9, 290_000, "US"),
        ];
        for r in &records {
            index.apply(r);
        }
        for tier in Tier::ALL {
            for cluster in index.clusters(tier) {
                for r in &records {
                    assert!(cluster.bounds.contains(r.record.position));
                }
            }
        }
    }

    #[test]
    fn test_continent_equals_sum_of_countries() {
        let mut index = ClusterIndex::new(mapping());
        index.apply(&city("A", 40.7, -74.0, 100, "US"));
        index.apply(&city("B", 45.4, -75.7, 200, "CA"));
        index.apply(&city("C", 48.8, 2.3, 300, "FR"));
        index.apply(&city("D", -33.9, 151.2, 400, "AU"));

        for continent in index.clusters(Tier::Continent) {
            let sum: u64 = index
                .clusters(Tier::Country)
                .filter(|c| index.resolver().resolve(&c.key) == continent.key)
                .map(|c| c.aggregate_population)
                .sum();
            assert_eq!(continent.aggregate_population, sum, "continent {}", continent.key);
        }
        // Unmapped AU is its own continent
        assert_eq!(index.get(Tier::Continent, "AU").unwrap().aggregate_population, 400);
    }

    #[test]
    fn test_unresolved_continent_keys_match_countries() {
        let mut index = ClusterIndex::new(ContinentResolver::unresolved());
        index.apply(&city("A", 40.7, -74.0, 100, "US"));
        index.apply(&city("C", 48.8, 2.3, 300, "FR"));

        let countries: Vec<_> = index.tier(Tier::Country).keys().collect();
        let continents: Vec<_> = index.tier(Tier::Continent).keys().collect();
        assert_eq!(countries, continents);
    }

    #[test]
    fn test_late_resolver_does_not_reconcile() {
        let mut index = ClusterIndex::new(ContinentResolver::unresolved());
        index.apply(&city("A", 40.7, -74.0, 100, "US"));
        index.install_resolver(mapping());
        index.apply(&city("B", 34.0, -118.2, 50, "US"));

        assert_eq!(index.get(Tier::Continent, "US").unwrap().aggregate_population, 100);
        assert_eq!(index.get(Tier::Continent, "NA").unwrap().aggregate_population, 50);
        assert_eq!(index.get(Tier::Country, "US").unwrap().aggregate_population, 150);
    }

    #[test]
    fn test_reset_clears_every_tier() {
        let mut index = ClusterIndex::new(mapping());
        index.apply(&city("A", 40.7, -74.0, 100, "US"));
        index.reset();
        assert!(index.is_empty());
        assert!(index.resolver().is_ready());
    }

    #[test]
    fn test_labels() {
        assert_eq!(format_population(0), "0");
        assert_eq!(format_population(999), "999");
        assert_eq!(format_population(1000), "1 000");
        assert_eq!(format_population(12_345_678), "12 345 678");

        let mut index = ClusterIndex::new(mapping());
        index.apply(&city("A", 40.7, -74.0, 8_336_817, "US"));
        assert_eq!(index.get(Tier::Country, "US").unwrap().label(), "8 336 817");
    }
}
