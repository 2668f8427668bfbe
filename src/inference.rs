//! Cross-source relationship inference.
//!
//! Some relationships cannot be derived from a single record because the two
//! endpoints come from different sources and share no resolution key: a CVE
//! names affected products, an asset lists installed software. Link rules
//! are symmetric predicates over a pair of entities, evaluated whenever
//! either side is written, so the inferred edge set does not depend on which
//! source was ingested first.

use crate::models::{Entity, EntityType, Relationship, RelationshipType};

/// Matching strings shorter than this never count as a product match.
const MIN_PRODUCT_LEN: usize = 3;

/// A rule inferring `from -[relationship_type]-> to` edges.
#[derive(Clone, Copy)]
pub struct LinkRule {
    pub relationship_type: RelationshipType,
    pub from: EntityType,
    pub to: EntityType,
    pub weight: f32,
    matches: fn(&Entity, &Entity) -> bool,
}

impl LinkRule {
    /// Builds the edge if `from` and `to` satisfy the rule.
    pub fn apply(&self, from: &Entity, to: &Entity) -> Option<Relationship> {
        if from.entity_type != self.from || to.entity_type != self.to {
            return None;
        }
        if from.entity_id == to.entity_id || !(self.matches)(from, to) {
            return None;
        }
        Some(
            Relationship::new(self.relationship_type, &from.entity_id, &to.entity_id)
                .with_weight(self.weight),
        )
    }
}

impl std::fmt::Debug for LinkRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from, self.relationship_type, self.to)
    }
}

pub const LINK_RULES: [LinkRule; 3] = [
    LinkRule {
        relationship_type: RelationshipType::Affects,
        from: EntityType::Cve,
        to: EntityType::Asset,
        weight: 0.8,
        matches: cve_affects_asset,
    },
    LinkRule {
        relationship_type: RelationshipType::RunsOn,
        from: EntityType::LogEvent,
        to: EntityType::Asset,
        weight: 1.0,
        matches: event_runs_on_asset,
    },
    LinkRule {
        relationship_type: RelationshipType::Configures,
        from: EntityType::CloudConfig,
        to: EntityType::Asset,
        weight: 1.0,
        matches: config_applies_to_asset,
    },
];

/// Which side of a rule an entity type plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    From,
    To,
}

/// Rules an entity of `entity_type` participates in, with its side and the
/// counterpart type to look up.
pub fn rules_for(entity_type: EntityType) -> Vec<(LinkRule, Side, EntityType)> {
    LINK_RULES
        .iter()
        .filter_map(|rule| {
            if rule.from == entity_type {
                Some((*rule, Side::From, rule.to))
            } else if rule.to == entity_type {
                Some((*rule, Side::To, rule.from))
            } else {
                None
            }
        })
        .collect()
}

/// Infers every edge between `entity` and the given counterparts.
pub fn infer(
    rule: &LinkRule,
    side: Side,
    entity: &Entity,
    counterparts: &[Entity],
) -> Vec<Relationship> {
    counterparts
        .iter()
        .filter_map(|other| match side {
            Side::From => rule.apply(entity, other),
            Side::To => rule.apply(other, entity),
        })
        .collect()
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn product_matches(product: &str, installed: &str) -> bool {
    let (product, installed) = (normalize(product), normalize(installed));
    if product.len() < MIN_PRODUCT_LEN || installed.len() < MIN_PRODUCT_LEN {
        return false;
    }
    product == installed || installed.contains(&product) || product.contains(&installed)
}

fn cve_affects_asset(cve: &Entity, asset: &Entity) -> bool {
    let Some(products) = cve.attribute("affected_products") else {
        return false;
    };
    let installed: Vec<&str> = ["software", "os"]
        .iter()
        .filter_map(|key| asset.attribute(key))
        .flat_map(|value| value.as_strings())
        .collect();

    products
        .as_strings()
        .iter()
        .any(|product| installed.iter().any(|item| product_matches(product, item)))
}

fn same_asset(reference: Option<&str>, asset: &Entity) -> bool {
    let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
        return false;
    };
    ["asset_id", "hostname"]
        .iter()
        .filter_map(|key| asset.text(key))
        .any(|candidate| candidate.eq_ignore_ascii_case(reference))
}

fn event_runs_on_asset(event: &Entity, asset: &Entity) -> bool {
    same_asset(event.text("asset_ref"), asset)
}

fn config_applies_to_asset(config: &Entity, asset: &Entity) -> bool {
    same_asset(config.text("resource_id"), asset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttributeStamp, AttributeValue, SourceKind};

    const STAMP: AttributeStamp = AttributeStamp {
        observed_at: None,
        source: SourceKind::Assets,
    };

    fn entity(id: &str, t: EntityType, attrs: &[(&str, AttributeValue)]) -> Entity {
        let mut e = Entity::new(id, t);
        for (k, v) in attrs {
            e.set(k, v.clone(), STAMP);
        }
        e
    }

    #[test]
    fn test_affects_matches_software_version() {
        let cve = entity(
            "cve:CVE-2024-1234",
            EntityType::Cve,
            &[(
                "affected_products",
                AttributeValue::List(vec!["nginx 1.18".into()]),
            )],
        );
        let web = entity(
            "asset:web01",
            EntityType::Asset,
            &[(
                "software",
                AttributeValue::List(vec!["NGINX  1.18".into()]),
            )],
        );
        let db = entity(
            "asset:db01",
            EntityType::Asset,
            &[("software", AttributeValue::List(vec!["postgres 15".into()]))],
        );

        let (rule, side, counterpart) = rules_for(EntityType::Cve)[0];
        assert_eq!(side, Side::From);
        assert_eq!(counterpart, EntityType::Asset);

        let edges = infer(&rule, side, &cve, &[web.clone(), db]);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_entity_id, "asset:web01");
        assert_eq!(edges[0].weight, 0.8);

        // Evaluated from the asset's side the same edge appears
        let (rule, side, _) = rules_for(EntityType::Asset)
            .into_iter()
            .find(|(r, _, _)| r.relationship_type == RelationshipType::Affects)
            .unwrap();
        let reverse = infer(&rule, side, &web, &[cve]);
        assert_eq!(reverse, edges);
    }

    #[test]
    fn test_runs_on_by_asset_id_or_hostname() {
        let event = entity(
            "log:E1",
            EntityType::LogEvent,
            &[("asset_ref", AttributeValue::Text("A-1".into()))],
        );
        let asset = entity(
            "asset:web01",
            EntityType::Asset,
            &[
                ("asset_id", AttributeValue::Text("a-1".into())),
                ("hostname", AttributeValue::Text("web01".into())),
            ],
        );
        assert!(LINK_RULES[1].apply(&event, &asset).is_some());
    }

    #[test]
    fn test_short_product_names_never_match() {
        assert!(!product_matches("os", "macos 14"));
        assert!(product_matches("openssl", "openssl 3.0.2"));
    }
}
