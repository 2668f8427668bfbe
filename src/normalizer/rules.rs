//! One normalization rule per source type.

use chrono::{DateTime, Utc};

use super::fields::{normalize_severity, normalize_status, RecordFields};
use crate::error::MalformedRecord;
use crate::models::{
    AttributeStamp, AttributeValue, Entity, EntityType, Relationship, RelationshipType, SourceRef,
};
use crate::resolver::canonical_id;

/// Entities and relationships implied by a single raw record.
#[derive(Debug, Default)]
pub struct RecordGraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl RecordGraph {
    fn push(&mut self, entity: Entity) -> String {
        let id = entity.entity_id.clone();
        self.entities.push(entity);
        id
    }

    fn link(&mut self, rel: RelationshipType, from: &str, to: &str, at: Option<DateTime<Utc>>) {
        self.relationships
            .push(Relationship::new(rel, from, to).observed(at));
    }
}

const USER_ALIASES: [&str; 5] = ["user_principal_name", "upn", "username", "user", "user_id"];

/// Accumulates attributes for one entity under a single observation stamp.
struct Draft {
    entity: Entity,
    stamp: AttributeStamp,
}

impl Draft {
    fn new(
        entity_type: EntityType,
        fields: &RecordFields<'_>,
        record_ref: &str,
        observed_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut entity = Entity::new("", entity_type);
        entity
            .source_refs
            .insert(SourceRef::new(fields.source(), record_ref));
        Self {
            entity,
            stamp: AttributeStamp {
                observed_at,
                source: fields.source(),
            },
        }
    }

    fn set(&mut self, key: &str, value: Option<AttributeValue>) -> &mut Self {
        if let Some(value) = value {
            self.entity.set(key, value, self.stamp);
        }
        self
    }

    fn text(&mut self, key: &str, value: Option<String>) -> &mut Self {
        self.set(key, value.map(AttributeValue::Text))
    }

    /// Assigns the canonical id and renders the embedding text.
    fn finish(mut self, fields: &RecordFields<'_>) -> Result<Entity, MalformedRecord> {
        self.entity.entity_id = canonical_id(&self.entity).ok_or_else(|| {
            fields.malformed(
                "key",
                format!("does not identify a {}", self.entity.entity_type),
            )
        })?;
        self.entity.refresh_embedding_text();
        Ok(self.entity)
    }
}

/// Record reference: natural id when present, else the batch position.
fn record_ref(fields: &RecordFields<'_>, natural: Option<&str>) -> String {
    natural
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", fields.index()))
}

fn user_stub(
    fields: &RecordFields<'_>,
    record: &str,
    username: String,
    user_id: Option<String>,
    at: Option<DateTime<Utc>>,
) -> Result<Entity, MalformedRecord> {
    let mut draft = Draft::new(EntityType::User, fields, record, at);
    draft.text("username", Some(username)).text("user_id", user_id);
    draft.finish(fields)
}

fn ip_stub(
    fields: &RecordFields<'_>,
    record: &str,
    ip: String,
    at: Option<DateTime<Utc>>,
) -> Result<Entity, MalformedRecord> {
    let mut draft = Draft::new(EntityType::IpAddress, fields, record, at);
    draft.text("ip_address", Some(ip));
    draft.finish(fields)
}

fn role_stub(
    fields: &RecordFields<'_>,
    record: &str,
    role_id: String,
    role_name: Option<String>,
    at: Option<DateTime<Utc>>,
) -> Result<Entity, MalformedRecord> {
    let mut draft = Draft::new(EntityType::UserRole, fields, record, at);
    draft.text("role_id", Some(role_id)).text("role_name", role_name);
    draft.finish(fields)
}

pub fn cve(fields: &RecordFields<'_>) -> Result<RecordGraph, MalformedRecord> {
    let cve_id = fields.required_text(&["cve_id", "id", "cve"])?.to_uppercase();
    let published = fields.timestamp(&["published_date", "published"])?;
    let cvss = fields.float(&["cvss_score", "cvss"])?;

    let mut draft = Draft::new(EntityType::Cve, fields, &cve_id, published);
    draft
        .text("cve_id", Some(cve_id.clone()))
        .text(
            "severity",
            fields.text(&["severity"]).map(|s| normalize_severity(&s)),
        )
        .set("cvss_score", cvss.map(AttributeValue::Float))
        .text("description", fields.text(&["description", "summary"]))
        .set(
            "affected_products",
            fields
                .list(&["affected_products", "affected_product", "products"])
                .map(AttributeValue::List),
        )
        .set("published_date", published.map(AttributeValue::Timestamp))
        .text(
            "remediation_status",
            fields.text(&["remediation_status", "status"]),
        );

    let mut graph = RecordGraph::default();
    graph.push(draft.finish(fields)?);
    Ok(graph)
}

pub fn asset(fields: &RecordFields<'_>) -> Result<RecordGraph, MalformedRecord> {
    let hostname = fields.text(&["hostname", "host", "name"]);
    let asset_id = fields.text(&["asset_id", "id"]);
    let ip = fields.ip(&["ip_address", "ip"])?;
    if hostname.is_none() && asset_id.is_none() && ip.is_none() {
        return Err(fields.malformed("hostname", "is missing (no hostname, asset_id or ip_address)"));
    }
    let scanned = fields.timestamp(&["last_scan_date", "last_seen"])?;
    let record = record_ref(fields, asset_id.as_deref().or(hostname.as_deref()));
    let owner = fields.text(&["owner"]);

    let mut draft = Draft::new(EntityType::Asset, fields, &record, scanned);
    draft
        .text("hostname", hostname)
        .text("asset_id", asset_id)
        .text("ip_address", ip.clone())
        .text("asset_type", fields.text(&["asset_type", "type"]))
        .text("os", fields.text(&["os", "operating_system"]))
        .set(
            "software",
            fields
                .list(&["software", "installed_software", "applications"])
                .map(AttributeValue::List),
        )
        .text("owner", owner.clone())
        .text("department", fields.text(&["department"]))
        .text(
            "criticality",
            fields.text(&["criticality"]).map(|c| normalize_severity(&c)),
        )
        .set("last_scan_date", scanned.map(AttributeValue::Timestamp));

    let mut graph = RecordGraph::default();
    let asset_id = graph.push(draft.finish(fields)?);

    if let Some(owner) = owner {
        let user = graph.push(user_stub(fields, &record, owner, None, scanned)?);
        graph.link(RelationshipType::Owns, &user, &asset_id, None);
    }
    if let Some(ip) = ip {
        let address = graph.push(ip_stub(fields, &record, ip, scanned)?);
        if address != asset_id {
            graph.link(RelationshipType::HasAddress, &asset_id, &address, None);
        }
    }
    Ok(graph)
}

pub fn log_event(fields: &RecordFields<'_>) -> Result<RecordGraph, MalformedRecord> {
    let event_id = fields.required_text(&["event_id", "id"])?;
    let event_type = fields.required_text(&["event_type", "type"])?;
    let at = fields.timestamp(&["timestamp", "time"])?;
    let user = fields.text(&["user", "username"]);

    let mut draft = Draft::new(EntityType::LogEvent, fields, &event_id, at);
    draft
        .text("event_id", Some(event_id.clone()))
        .text("event_type", Some(event_type))
        .set("timestamp", at.map(AttributeValue::Timestamp))
        .text(
            "severity",
            fields.text(&["severity"]).map(|s| normalize_severity(&s)),
        )
        .text("source", fields.text(&["source"]))
        .text("user", user.clone())
        .text("asset_ref", fields.text(&["asset_id", "asset", "hostname"]))
        .text("description", fields.text(&["description", "message"]))
        .text("raw_log", fields.text(&["raw_log"]));

    let mut graph = RecordGraph::default();
    let event = graph.push(draft.finish(fields)?);

    if let Some(user) = user {
        let user = graph.push(user_stub(fields, &event_id, user, None, at)?);
        graph.link(RelationshipType::Triggered, &user, &event, at);
    }
    Ok(graph)
}

pub fn cloud_config(fields: &RecordFields<'_>) -> Result<RecordGraph, MalformedRecord> {
    let resource_id = fields.required_text(&["resource_id", "resource"])?;
    let config_id = fields.text(&["config_id", "id"]);
    let compliant = fields.boolean(&["compliant", "is_compliant"])?;
    let record = record_ref(fields, config_id.as_deref());

    let mut draft = Draft::new(EntityType::CloudConfig, fields, &record, None);
    draft
        .text("config_id", config_id)
        .text("resource_id", Some(resource_id))
        .text("cloud_provider", fields.text(&["cloud_provider", "provider"]))
        .text("resource_type", fields.text(&["resource_type"]))
        .text("setting_name", fields.text(&["setting_name", "setting"]))
        .text("setting_value", fields.text(&["setting_value", "value"]))
        .set("compliant", compliant.map(AttributeValue::Bool))
        .text(
            "risk_level",
            fields.text(&["risk_level", "severity"]).map(|r| normalize_severity(&r)),
        );

    let mut graph = RecordGraph::default();
    graph.push(draft.finish(fields)?);
    Ok(graph)
}

pub fn sign_in(fields: &RecordFields<'_>) -> Result<RecordGraph, MalformedRecord> {
    let username = fields.required_text(&USER_ALIASES)?;
    let ip = fields
        .ip(&["source_ip", "ip_address", "ip"])?
        .ok_or_else(|| fields.malformed("source_ip", "is missing"))?;
    let status = normalize_status(&fields.required_text(&["status", "result", "outcome"])?);
    let at = fields.timestamp(&["timestamp", "time"])?;
    let user_id = fields
        .text(&["user_id"])
        .filter(|id| !id.eq_ignore_ascii_case(&username));
    let log_id = fields.text(&["log_id", "id"]);
    let record = record_ref(fields, log_id.as_deref());

    let mut draft = Draft::new(EntityType::SignInEvent, fields, &record, at);
    draft
        .text("log_id", log_id)
        .text("username", Some(username.clone()))
        .text("source_ip", Some(ip.clone()))
        .text("status", Some(status))
        .set("timestamp", at.map(AttributeValue::Timestamp))
        .text("location", fields.text(&["location", "country"]))
        .text("device", fields.text(&["device", "user_agent"]))
        .set(
            "mfa_used",
            fields.boolean(&["mfa_used", "mfa"])?.map(AttributeValue::Bool),
        )
        .set(
            "risk_score",
            fields.float(&["risk_score"])?.map(AttributeValue::Float),
        );

    let mut graph = RecordGraph::default();
    let event = graph.push(draft.finish(fields)?);
    let user = graph.push(user_stub(fields, &record, username, user_id, at)?);
    let address = graph.push(ip_stub(fields, &record, ip, at)?);

    graph.link(RelationshipType::SignedIn, &user, &event, at);
    graph.link(RelationshipType::OriginatedFrom, &event, &address, at);
    graph.link(RelationshipType::LoggedInFrom, &user, &address, at);
    Ok(graph)
}

pub fn user_role(fields: &RecordFields<'_>) -> Result<RecordGraph, MalformedRecord> {
    let username = fields.required_text(&USER_ALIASES)?;
    let role_id = fields.required_text(&["role_id", "role"])?;
    let assigned = fields.timestamp(&["assigned_date", "assigned_at"])?;
    let user_id = fields
        .text(&["user_id"])
        .filter(|id| !id.eq_ignore_ascii_case(&username));
    let record = record_ref(fields, fields.text(&["assignment_id", "id"]).as_deref());

    let mut graph = RecordGraph::default();
    let role = graph.push(role_stub(
        fields,
        &record,
        role_id,
        fields.text(&["role_name"]),
        assigned,
    )?);
    let user = graph.push(user_stub(fields, &record, username, user_id, assigned)?);
    graph.link(RelationshipType::HasRole, &user, &role, assigned);
    Ok(graph)
}

pub fn role_permission(fields: &RecordFields<'_>) -> Result<RecordGraph, MalformedRecord> {
    let permission_id = fields.required_text(&["permission_id", "id"])?;
    let role_id = fields.required_text(&["role_id", "role"])?;
    let action = fields.required_text(&["action"])?;

    let mut draft = Draft::new(EntityType::Permission, fields, &permission_id, None);
    draft
        .text("permission_id", Some(permission_id.clone()))
        .text("action", Some(action))
        .text("resource_type", fields.text(&["resource_type", "resource"]))
        .text("scope", fields.text(&["scope"]))
        .text(
            "risk_level",
            fields.text(&["risk_level"]).map(|r| normalize_severity(&r)),
        );

    let mut graph = RecordGraph::default();
    let permission = graph.push(draft.finish(fields)?);
    let role = graph.push(role_stub(
        fields,
        &permission_id,
        role_id,
        fields.text(&["role_name"]),
        None,
    )?);
    graph.link(RelationshipType::GrantsPermission, &role, &permission, None);
    Ok(graph)
}
