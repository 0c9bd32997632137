//! Cross-source deduplication.
//!
//! Candidates are grouped into canonical leads by the first identity rule
//! that links them to an existing candidate:
//!
//! 1. equal normalized `(email, phone)`, when both are present
//! 2. equal normalized `(name, address)`, when both are present
//! 3. token-set similarity of normalized names at or above the threshold, in the same city
//!
//! The groups are the connected components of that relation, kept in a
//! union-find over every admitted candidate. A candidate that links two
//! groups joins them, so the final partition does not depend on arrival
//! order. Only which candidate's fields were seen first does.

use leadscout_core::{CanonicalLead, DedupConfig, LeadCandidate};
use std::collections::{BTreeMap, HashMap, HashSet};

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Started a new canonical lead
    New {
        /// Identity key of the new lead
        key: String,
    },
    /// Joined an existing canonical lead
    Merged {
        /// Identity key of the lead it joined
        key: String,
    },
    /// Linked several leads, which were combined into the oldest of them
    Combined {
        /// Identity key of the surviving lead
        key: String,
        /// Identity keys that no longer exist
        absorbed: Vec<String>,
    },
    /// Would have started a new lead, but new leads were not being admitted
    Dropped,
}

/// Running counts of the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Candidates offered to the engine
    pub candidates: usize,
    /// Candidates that joined an existing lead
    pub merged: usize,
    /// Leads absorbed into another lead when a candidate linked them
    pub absorbed: usize,
    /// Candidates refused because they would have started a new lead
    pub dropped: usize,
}

impl DedupStats {
    /// Candidates and leads that turned out to be duplicates.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.merged + self.absorbed
    }
}

struct Record {
    candidate: LeadCandidate,
    name_tokens: Vec<String>,
}

struct Cluster {
    created: usize,
    lead: CanonicalLead,
}

/// The in-job identity index.
pub struct DedupEngine {
    threshold: f64,
    suffixes: HashSet<String>,
    records: Vec<Record>,
    parent: Vec<usize>,
    by_contact: HashMap<String, usize>,
    by_name_address: HashMap<String, usize>,
    by_city: HashMap<String, Vec<usize>>,
    clusters: HashMap<usize, Cluster>,
    keys: BTreeMap<String, usize>,
    created: usize,
    stats: DedupStats,
}

impl std::fmt::Debug for DedupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupEngine")
            .field("threshold", &self.threshold)
            .field("leads", &self.clusters.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl DedupEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            threshold: config.fuzzy_threshold,
            suffixes: config
                .business_suffixes
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            records: Vec::new(),
            parent: Vec::new(),
            by_contact: HashMap::new(),
            by_name_address: HashMap::new(),
            by_city: HashMap::new(),
            clusters: HashMap::new(),
            keys: BTreeMap::new(),
            created: 0,
            stats: DedupStats::default(),
        }
    }

    /// Rebuild the index from candidates admitted earlier, in their original order.
    #[must_use]
    pub fn replay<'a>(
        config: &DedupConfig,
        candidates: impl IntoIterator<Item = &'a LeadCandidate>,
    ) -> Self {
        let mut engine = Self::new(config);
        for candidate in candidates {
            engine.merge(candidate.clone(), true);
        }
        engine
    }

    /// Merge every candidate and return the canonical leads.
    #[must_use]
    pub fn merge_all(
        config: &DedupConfig,
        candidates: impl IntoIterator<Item = LeadCandidate>,
    ) -> Vec<CanonicalLead> {
        let mut engine = Self::new(config);
        for candidate in candidates {
            engine.merge(candidate, true);
        }
        engine.leads().cloned().collect()
    }

    /// Offer one candidate.
    ///
    /// With `admit_new` false, a candidate that matches no existing lead is
    /// dropped instead of starting a new one.
    pub fn merge(&mut self, candidate: LeadCandidate, admit_new: bool) -> MergeOutcome {
        self.stats.candidates += 1;

        let name_tokens = name_tokens(&candidate.name, &self.suffixes);
        let contact_key = contact_key(&candidate);
        let name_address_key = name_address_key(&candidate, &name_tokens);
        let city = normalize_city(&candidate.city);

        let mut linked = Vec::new();
        if let Some(idx) = contact_key.as_ref().and_then(|k| self.by_contact.get(k)) {
            linked.push(*idx);
        }
        if let Some(idx) = name_address_key
            .as_ref()
            .and_then(|k| self.by_name_address.get(k))
        {
            linked.push(*idx);
        }
        if !name_tokens.is_empty() && !city.is_empty() {
            if let Some(same_city) = self.by_city.get(&city) {
                linked.extend(same_city.iter().copied().filter(|&idx| {
                    token_set_ratio(&name_tokens, &self.records[idx].name_tokens) >= self.threshold
                }));
            }
        }

        let mut roots: Vec<usize> = linked.into_iter().map(|idx| self.find(idx)).collect();
        roots.sort_by_key(|root| self.clusters.get(root).map_or(usize::MAX, |c| c.created));
        roots.dedup();

        if roots.is_empty() && !admit_new {
            self.stats.dropped += 1;
            return MergeOutcome::Dropped;
        }

        let idx = self.records.len();
        let key = identity_key(
            contact_key.as_deref(),
            name_address_key.as_deref(),
            &city,
            &name_tokens,
        );
        self.records.push(Record {
            candidate,
            name_tokens,
        });
        self.parent.push(idx);
        if let Some(k) = contact_key {
            self.by_contact.entry(k).or_insert(idx);
        }
        if let Some(k) = name_address_key {
            self.by_name_address.entry(k).or_insert(idx);
        }
        if !self.records[idx].name_tokens.is_empty() && !city.is_empty() {
            self.by_city.entry(city).or_default().push(idx);
        }

        let Some((&survivor, others)) = roots.split_first() else {
            let key = self.unique_key(key, idx);
            let lead = CanonicalLead::from_candidate(key.clone(), &self.records[idx].candidate);
            self.clusters.insert(
                idx,
                Cluster {
                    created: self.created,
                    lead,
                },
            );
            self.created += 1;
            self.keys.insert(key.clone(), idx);
            return MergeOutcome::New { key };
        };

        let mut absorbed = Vec::with_capacity(others.len());
        for &other in others {
            if let Some(cluster) = self.clusters.remove(&other) {
                self.keys.remove(&cluster.lead.identity_key);
                if let Some(target) = self.clusters.get_mut(&survivor) {
                    target.lead.absorb_lead(&cluster.lead);
                }
                absorbed.push(cluster.lead.identity_key);
            }
            self.parent[other] = survivor;
        }
        self.parent[idx] = survivor;

        let Some(target) = self.clusters.get_mut(&survivor) else {
            return MergeOutcome::Dropped;
        };
        target.lead.absorb(&self.records[idx].candidate);
        let key = target.lead.identity_key.clone();

        self.stats.merged += 1;
        if absorbed.is_empty() {
            MergeOutcome::Merged { key }
        } else {
            self.stats.absorbed += absorbed.len();
            MergeOutcome::Combined { key, absorbed }
        }
    }

    fn unique_key(&self, key: String, idx: usize) -> String {
        if self.keys.contains_key(&key) {
            format!("{key}#{idx}")
        } else {
            key
        }
    }

    fn find(&mut self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            let grandparent = self.parent[self.parent[idx]];
            self.parent[idx] = grandparent;
            idx = grandparent;
        }
        idx
    }

    fn root(&self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            idx = self.parent[idx];
        }
        idx
    }

    /// Number of canonical leads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether no lead has been formed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Running counts.
    #[must_use]
    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    /// The canonical lead with this identity key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CanonicalLead> {
        let root = self.keys.get(key)?;
        self.clusters.get(root).map(|c| &c.lead)
    }

    /// Canonical leads ordered by identity key.
    pub fn leads(&self) -> impl Iterator<Item = &CanonicalLead> + '_ {
        self.keys
            .values()
            .filter_map(|root| self.clusters.get(root).map(|c| &c.lead))
    }

    /// Admitted candidates, in arrival order.
    pub fn candidates(&self) -> impl Iterator<Item = &LeadCandidate> + '_ {
        self.records.iter().map(|r| &r.candidate)
    }

    /// Candidates that make up the lead with this identity key.
    #[must_use]
    pub fn members(&self, key: &str) -> Vec<&LeadCandidate> {
        let Some(&root) = self.keys.get(key) else {
            return Vec::new();
        };
        (0..self.records.len())
            .filter(|&idx| self.root(idx) == root)
            .map(|idx| &self.records[idx].candidate)
            .collect()
    }
}

fn identity_key(
    contact: Option<&str>,
    name_address: Option<&str>,
    city: &str,
    name_tokens: &[String],
) -> String {
    if let Some(k) = contact {
        return format!("ep:{k}");
    }
    if let Some(k) = name_address {
        return format!("na:{k}");
    }
    format!("nm:{city}|{}", name_tokens.concat())
}

fn contact_key(candidate: &LeadCandidate) -> Option<String> {
    let email = candidate.email.as_deref().map(normalize_email)?;
    let phone = candidate.phone.as_deref().map(normalize_phone)?;
    if email.is_empty() || phone.is_empty() {
        return None;
    }
    Some(format!("{email}|{phone}"))
}

fn name_address_key(candidate: &LeadCandidate, name_tokens: &[String]) -> Option<String> {
    let address = normalize_compact(&candidate.address);
    if name_tokens.is_empty() || address.is_empty() {
        return None;
    }
    Some(format!("{}|{address}", name_tokens.concat()))
}

/// Lower-cased email with surrounding whitespace removed.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Digits of a phone number.
#[must_use]
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Lower-cased alphanumerics with punctuation and whitespace removed.
#[must_use]
pub fn normalize_compact(text: &str) -> String {
    words(text).collect()
}

fn normalize_city(city: &str) -> String {
    normalize_compact(city)
}

/// Distinct lower-cased name words, minus business suffixes, sorted.
#[must_use]
pub fn name_tokens(name: &str, suffixes: &HashSet<String>) -> Vec<String> {
    let mut tokens: Vec<String> = words(name).filter(|w| !suffixes.contains(w)).collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Token-set similarity of two sorted, distinct token lists, in `[0, 1]`.
///
/// The shared tokens are compared against each side's full token set and the
/// best `normalized_levenshtein` score wins, so word order and extra
/// descriptive words count for little.
#[must_use]
pub fn token_set_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a_set: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b_set: HashSet<&str> = b.iter().map(String::as_str).collect();
    let shared: Vec<&str> = a.iter().map(String::as_str).filter(|t| b_set.contains(t)).collect();
    let only_a: Vec<&str> = a.iter().map(String::as_str).filter(|t| !b_set.contains(t)).collect();
    let only_b: Vec<&str> = b.iter().map(String::as_str).filter(|t| !a_set.contains(t)).collect();

    let join = |parts: &[&[&str]]| -> String {
        parts
            .iter()
            .flat_map(|p| p.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    };
    let base = join(&[&shared]);
    let with_a = join(&[&shared, &only_a]);
    let with_b = join(&[&shared, &only_b]);

    let mut best = strsim::normalized_levenshtein(&with_a, &with_b);
    if !shared.is_empty() {
        best = best
            .max(strsim::normalized_levenshtein(&base, &with_a))
            .max(strsim::normalized_levenshtein(&base, &with_b));
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadscout_core::SourceId;
    use std::collections::BTreeSet;

    fn config() -> DedupConfig {
        DedupConfig::default()
    }

    fn cand(source: &str, name: &str, address: &str) -> LeadCandidate {
        LeadCandidate::new(SourceId::new(source).expect("valid source id"), name)
            .with_address(address)
            .with_location("Lahore", "Pakistan")
            .with_niche("coffee shop")
    }

    fn partition(engine: &DedupEngine) -> BTreeSet<BTreeSet<String>> {
        engine
            .leads()
            .map(|lead| {
                engine
                    .members(&lead.identity_key)
                    .into_iter()
                    .map(|c| format!("{}/{}", c.source, c.name))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_email_and_phone_match_across_formats() {
        let a = cand("maps", "Espresso Lab", "")
            .with_email("Hello@EspressoLab.pk ")
            .with_phone("+92 (42) 111-222");
        let b = cand("yelp", "The Espresso Laboratory", "Gulberg III")
            .with_email("hello@espressolab.pk")
            .with_phone("92 42 111 222");

        let mut engine = DedupEngine::new(&config());
        assert!(matches!(engine.merge(a, true), MergeOutcome::New { .. }));
        let outcome = engine.merge(b, true);
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                key: "ep:hello@espressolab.pk|9242111222".to_string()
            }
        );

        let lead = engine.get("ep:hello@espressolab.pk|9242111222").expect("lead");
        assert_eq!(lead.merge_sources.len(), 2);
        assert!((lead.confidence_score - 0.75).abs() < f64::EPSILON);
        // First non-empty wins.
        assert_eq!(lead.name, "Espresso Lab");
        assert_eq!(lead.address, "Gulberg III");
    }

    #[test]
    fn test_name_address_ignores_case_punctuation_and_suffixes() {
        let mut engine = DedupEngine::new(&config());
        engine.merge(cand("maps", "Cuppa Co.", "12-B, M.M. Alam Road"), true);
        let outcome = engine.merge(cand("yelp", "CUPPA", "12B MM Alam Road"), true);
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                key: "na:cuppa|12bmmalamroad".to_string()
            }
        );
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_fuzzy_match_requires_same_city() {
        let mut engine = DedupEngine::new(&config());
        engine.merge(cand("maps", "Gloria Jeans Coffees", "DHA Phase 5"), true);
        engine.merge(cand("yelp", "Gloria Jeans", ""), true);
        assert_eq!(engine.len(), 1);

        let elsewhere = cand("yelp", "Gloria Jeans", "").with_location("Karachi", "Pakistan");
        assert!(matches!(engine.merge(elsewhere, true), MergeOutcome::New { .. }));
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn test_distinct_names_stay_apart() {
        let mut engine = DedupEngine::new(&config());
        engine.merge(cand("maps", "Espresso Coffee", ""), true);
        engine.merge(cand("maps", "Coffee Planet", ""), true);
        engine.merge(cand("maps", "Tim Hortons", ""), true);
        assert_eq!(engine.len(), 3);
    }

    #[test]
    fn test_bridge_candidate_combines_leads() {
        let a = cand("maps", "Butlers", "").with_email("info@butlers.pk").with_phone("111");
        let b = cand("yelp", "Chaye Khana", "5 Main Market");
        let bridge = cand("directory", "Chaye Khana", "5 Main Market")
            .with_email("info@butlers.pk")
            .with_phone("111");

        let mut engine = DedupEngine::new(&config());
        engine.merge(a, true);
        engine.merge(b, true);
        assert_eq!(engine.len(), 2);

        let outcome = engine.merge(bridge, true);
        assert_eq!(
            outcome,
            MergeOutcome::Combined {
                key: "ep:info@butlers.pk|111".to_string(),
                absorbed: vec!["na:chayekhana|5mainmarket".to_string()],
            }
        );
        assert_eq!(engine.len(), 1);
        assert!(engine.get("na:chayekhana|5mainmarket").is_none());
        assert_eq!(engine.stats().duplicates(), 2);
    }

    #[test]
    fn test_partition_is_order_independent() {
        let candidates = vec![
            cand("maps", "Butlers", "").with_email("info@butlers.pk").with_phone("111"),
            cand("yelp", "Chaye Khana", "5 Main Market"),
            cand("directory", "Chaye Khana", "5 Main Market")
                .with_email("info@butlers.pk")
                .with_phone("111"),
            cand("maps", "Gloria Jeans Coffees", ""),
            cand("yelp", "Gloria Jeans", "Mall 1"),
            cand("maps", "Coffee Planet", ""),
            cand("yelp", "coffee planet llc", ""),
            cand("maps", "Tim Hortons", "Packages Mall"),
        ];

        let expected = partition(&DedupEngine::replay(&config(), &candidates));
        assert_eq!(expected.len(), 4);

        for shift in 1..candidates.len() {
            let mut rotated = candidates.clone();
            rotated.rotate_left(shift);
            assert_eq!(partition(&DedupEngine::replay(&config(), &rotated)), expected);

            rotated.reverse();
            assert_eq!(partition(&DedupEngine::replay(&config(), &rotated)), expected);
        }
    }

    #[test]
    fn test_dropped_when_not_admitting() {
        let mut engine = DedupEngine::new(&config());
        engine.merge(cand("maps", "Cuppa", "1 Road"), true);

        assert_eq!(
            engine.merge(cand("maps", "Other Place", "2 Road"), false),
            MergeOutcome::Dropped
        );
        // Duplicates still merge when new leads are refused.
        assert!(matches!(
            engine.merge(cand("yelp", "Cuppa", "1 Road"), false),
            MergeOutcome::Merged { .. }
        ));
        assert_eq!(engine.stats().dropped, 1);
        assert_eq!(engine.candidates().count(), 2);
    }

    #[test]
    fn test_replay_reproduces_keys() {
        let candidates = vec![
            cand("maps", "Cuppa", "1 Road"),
            cand("yelp", "Cuppa", "1 Road"),
            cand("maps", "Tim Hortons", ""),
        ];
        let mut live = DedupEngine::new(&config());
        for c in candidates.clone() {
            live.merge(c, true);
        }
        let replayed = DedupEngine::replay(&config(), live.candidates());

        let live_keys: Vec<_> = live.leads().map(|l| l.identity_key.clone()).collect();
        let replayed_keys: Vec<_> = replayed.leads().map(|l| l.identity_key.clone()).collect();
        assert_eq!(live_keys, replayed_keys);
        assert_eq!(DedupEngine::merge_all(&config(), candidates).len(), 2);
    }

    #[test]
    fn test_token_set_ratio() {
        let suffixes = config().business_suffixes.into_iter().collect();
        let t = |s: &str| name_tokens(s, &suffixes);

        assert!((token_set_ratio(&t("Cafe Aylanto"), &t("aylanto cafe")) - 1.0).abs() < 1e-9);
        assert!(token_set_ratio(&t("Coffee Planet Ltd"), &t("Coffee Planet")) > 0.99);
        assert!(token_set_ratio(&t("Espresso Coffee"), &t("Coffee Planet")) < 0.85);
        assert!(token_set_ratio(&t("Tim Hortons"), &t("Timhortons")) < 0.85);
        assert_eq!(token_set_ratio(&[], &t("Cafe")), 0.0);
    }
}
