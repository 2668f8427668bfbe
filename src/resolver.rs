//! Entity resolution: canonical identity and deterministic merging.
//!
//! Every entity type declares a resolution key. The canonical id is
//! `<type prefix>:<normalized key>`, so resolution is a pure function of the
//! candidate and never depends on what was ingested before.
//!
//! Merging keeps, per attribute, the value with the greatest
//! `(stamp, rendered value)` pair. Taking a maximum is commutative,
//! associative and idempotent, which is what makes ingestion order
//! irrelevant to the final graph.

use std::cmp::Ordering;

use crate::error::{AppError, ResolutionConflict};
use crate::models::{AttributeStamp, AttributeValue, Entity, EntityType, SourceKind};

/// Stamp assumed for attributes persisted without one.
const UNSTAMPED: AttributeStamp = AttributeStamp {
    observed_at: None,
    source: SourceKind::Logs,
};

/// Returns the normalized resolution key for an entity, if its key
/// attributes are present.
pub fn resolution_key(entity: &Entity) -> Option<String> {
    let text = |key: &str| {
        entity
            .text(key)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match entity.entity_type {
        EntityType::Cve => text("cve_id").map(|id| id.to_uppercase()),
        EntityType::Asset => text("hostname")
            .map(|h| h.to_lowercase())
            .or_else(|| text("asset_id").map(|id| format!("id:{}", id.to_lowercase())))
            .or_else(|| text("ip_address").map(|ip| format!("ip:{}", ip))),
        EntityType::LogEvent => text("event_id"),
        EntityType::CloudConfig => text("config_id").or_else(|| {
            let resource = text("resource_id")?;
            Some(match text("setting_name") {
                Some(setting) => format!("{}/{}", resource, setting),
                None => resource,
            })
        }),
        EntityType::SignInEvent => text("log_id").or_else(|| {
            let user = text("username")?.to_lowercase();
            let ip = text("source_ip")?;
            let at = entity
                .timestamp()
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_default();
            Some(format!("{}@{}@{}", user, at, ip))
        }),
        EntityType::UserRole => text("role_id").map(|id| id.to_lowercase()),
        EntityType::Permission => text("permission_id"),
        EntityType::User => text("username").map(|u| u.to_lowercase()),
        EntityType::IpAddress => text("ip_address"),
    }
}

/// Canonical id for an entity, e.g. `asset:web01`.
pub fn canonical_id(entity: &Entity) -> Option<String> {
    resolution_key(entity).map(|key| format!("{}:{}", entity.entity_type.id_prefix(), key))
}

/// Result of folding a candidate into the stored entity.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub entity: Entity,
    pub conflicts: Vec<ResolutionConflict>,
    /// The stored entity differs from what was there before.
    pub changed: bool,
}

/// Resolves candidates to canonical entities and merges observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityResolver;

impl EntityResolver {
    pub fn new() -> Self {
        Self
    }

    /// Returns the canonical entity id for a candidate.
    pub fn resolve(&self, candidate: &Entity) -> Result<String, AppError> {
        canonical_id(candidate).ok_or_else(|| {
            AppError::Validation(format!(
                "{} candidate has no resolution key",
                candidate.entity_type
            ))
        })
    }

    /// Merges `candidate` into `existing` (the entity currently stored under
    /// the candidate's canonical id, if any).
    pub fn merge(
        &self,
        existing: Option<Entity>,
        mut candidate: Entity,
    ) -> Result<MergeOutcome, AppError> {
        let entity_id = self.resolve(&candidate)?;
        candidate.entity_id = entity_id.clone();

        let Some(mut merged) = existing else {
            candidate.refresh_embedding_text();
            return Ok(MergeOutcome {
                entity: candidate,
                conflicts: Vec::new(),
                changed: true,
            });
        };

        if merged.entity_type != candidate.entity_type {
            return Err(AppError::Validation(format!(
                "{} resolves to {} but stored entity is {}",
                candidate.entity_type, entity_id, merged.entity_type
            )));
        }

        let before = merged.clone();
        let mut conflicts = Vec::new();

        for (key, value) in candidate.attributes {
            let stamp = candidate.stamps.get(&key).copied().unwrap_or(UNSTAMPED);
            let Some(current) = merged.attributes.get(&key).cloned() else {
                merged.set(&key, value, stamp);
                continue;
            };
            let current_stamp = merged.stamps.get(&key).copied().unwrap_or(UNSTAMPED);

            if current == value {
                merged.stamps.insert(key, current_stamp.max(stamp));
                continue;
            }

            let candidate_wins = precedence(&value, stamp, &current, current_stamp).is_gt();
            let (kept, discarded) = if candidate_wins {
                (value.clone(), current)
            } else {
                (current, value.clone())
            };
            let conflict = ResolutionConflict {
                entity_id: entity_id.clone(),
                attribute: key.clone(),
                kept: kept.to_string(),
                discarded: discarded.to_string(),
            };
            tracing::warn!(conflict = %conflict, "Resolution conflict");
            conflicts.push(conflict);

            if candidate_wins {
                merged.set(&key, value, stamp);
            }
        }

        merged.source_refs.extend(candidate.source_refs);
        merged.refresh_embedding_text();

        let changed = merged != before;
        Ok(MergeOutcome {
            entity: merged,
            conflicts,
            changed,
        })
    }
}

/// Total order over competing observations of one attribute.
fn precedence(
    a: &AttributeValue,
    a_stamp: AttributeStamp,
    b: &AttributeValue,
    b_stamp: AttributeStamp,
) -> Ordering {
    a_stamp
        .cmp(&b_stamp)
        .then_with(|| a.to_string().cmp(&b.to_string()))
        .then_with(|| format!("{:?}", a).cmp(&format!("{:?}", b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceRef;
    use chrono::DateTime;

    fn stamp(secs: Option<i64>, source: SourceKind) -> AttributeStamp {
        AttributeStamp {
            observed_at: secs.and_then(|s| DateTime::from_timestamp(s, 0)),
            source,
        }
    }

    fn asset(hostname: &str, os: &str, at: Option<i64>, record: &str) -> Entity {
        let mut e = Entity::new("", EntityType::Asset);
        let s = stamp(at, SourceKind::Assets);
        e.set("hostname", AttributeValue::Text(hostname.into()), s);
        e.set("os", AttributeValue::Text(os.into()), s);
        e.source_refs
            .insert(SourceRef::new(SourceKind::Assets, record));
        e
    }

    #[test]
    fn test_canonical_ids() {
        let host = asset("WEB01", "linux", None, "a1");
        assert_eq!(canonical_id(&host).as_deref(), Some("asset:web01"));

        let mut cve = Entity::new("", EntityType::Cve);
        cve.set(
            "cve_id",
            AttributeValue::Text("cve-2024-1234".into()),
            UNSTAMPED,
        );
        assert_eq!(canonical_id(&cve).as_deref(), Some("cve:CVE-2024-1234"));

        let mut by_id = Entity::new("", EntityType::Asset);
        by_id.set("asset_id", AttributeValue::Text("A-7".into()), UNSTAMPED);
        assert_eq!(canonical_id(&by_id).as_deref(), Some("asset:id:a-7"));
    }

    #[test]
    fn test_asset_key_precedence() {
        let mut both = asset("web01", "linux", None, "a1");
        both.set("asset_id", AttributeValue::Text("A-7".into()), UNSTAMPED);
        both.set("ip_address", AttributeValue::Text("10.0.0.5".into()), UNSTAMPED);
        assert_eq!(canonical_id(&both).as_deref(), Some("asset:web01"));

        let mut id_and_ip = Entity::new("", EntityType::Asset);
        id_and_ip.set("asset_id", AttributeValue::Text("A-7".into()), UNSTAMPED);
        id_and_ip.set("ip_address", AttributeValue::Text("10.0.0.5".into()), UNSTAMPED);
        assert_eq!(canonical_id(&id_and_ip).as_deref(), Some("asset:id:a-7"));

        let mut ip_only = Entity::new("", EntityType::Asset);
        ip_only.set("ip_address", AttributeValue::Text("10.0.0.5".into()), UNSTAMPED);
        assert_eq!(canonical_id(&ip_only).as_deref(), Some("asset:ip:10.0.0.5"));

        // No alias table: the same machine seen only by id stays separate
        assert_ne!(canonical_id(&id_and_ip), canonical_id(&both));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let resolver = EntityResolver::new();
        let empty = Entity::new("", EntityType::User);
        assert!(resolver.resolve(&empty).is_err());
    }

    #[test]
    fn test_newer_observation_wins() {
        let resolver = EntityResolver::new();
        let old = resolver
            .merge(None, asset("web01", "ubuntu 20.04", Some(100), "a1"))
            .unwrap()
            .entity;
        let outcome = resolver
            .merge(Some(old), asset("web01", "ubuntu 22.04", Some(200), "a2"))
            .unwrap();

        assert_eq!(outcome.entity.text("os"), Some("ubuntu 22.04"));
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.entity.source_refs.len(), 2);
        assert!(outcome.changed);
    }

    #[test]
    fn test_merge_is_commutative() {
        let resolver = EntityResolver::new();
        let a = asset("web01", "ubuntu 20.04", Some(100), "a1");
        let b = asset("web01", "ubuntu 22.04", Some(100), "a2");

        let ab = resolver
            .merge(Some(resolver.merge(None, a.clone()).unwrap().entity), b.clone())
            .unwrap()
            .entity;
        let ba = resolver
            .merge(Some(resolver.merge(None, b).unwrap().entity), a)
            .unwrap()
            .entity;

        assert_eq!(ab, ba);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let resolver = EntityResolver::new();
        let a = asset("web01", "linux", Some(100), "a1");
        let once = resolver.merge(None, a.clone()).unwrap().entity;
        let twice = resolver.merge(Some(once.clone()), a).unwrap();

        assert_eq!(twice.entity, once);
        assert!(!twice.changed);
        assert!(twice.conflicts.is_empty());
    }
}
