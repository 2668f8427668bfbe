//! Serializes a retrieval context into bounded text for answer generation.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::{
    ContextItem, Entity, EntityType, Relationship, RetrievalContext, RetrievalStatus,
    RetrievedItem,
};

const RELATIONSHIPS_HEADING: &str = "Relationships";

/// The serialized context and what made it in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledContext {
    pub text: String,
    /// Items rendered, in rank order.
    pub included: usize,
    /// Lower-ranked items left out to respect the budget.
    pub dropped: usize,
    /// Labels of the rendered entities, in rank order.
    pub sources: Vec<String>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.included == 0
    }
}

/// Renders retrieved items grouped by entity type with provenance hints.
///
/// Items are admitted in score order and the first item that would push the
/// text past `max_chars` ends the selection, so the output is always the
/// highest-ranked items rendered whole.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    max_chars: usize,
}

impl ContextAssembler {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn assemble(&self, context: &RetrievalContext) -> AssembledContext {
        let note = match &context.status {
            RetrievalStatus::Degraded { unavailable } => Some(format!(
                "Note: partial context, unavailable stores: {}",
                unavailable
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            _ => None,
        };

        let mut selected: Vec<&RetrievedItem> = Vec::new();
        // The note stands on its own when no item fits.
        let mut text = match note.as_deref() {
            Some(note) => {
                let bare = render(&[], Some(note));
                if bare.chars().count() <= self.max_chars {
                    bare
                } else {
                    String::new()
                }
            }
            None => String::new(),
        };
        for item in &context.items {
            selected.push(item);
            let candidate = render(&selected, note.as_deref());
            if candidate.chars().count() > self.max_chars {
                selected.pop();
                break;
            }
            text = candidate;
        }

        let sources = selected
            .iter()
            .filter_map(|item| item.entity())
            .map(label)
            .collect();
        let assembled = AssembledContext {
            text,
            included: selected.len(),
            dropped: context.items.len() - selected.len(),
            sources,
        };
        if assembled.dropped > 0 {
            tracing::debug!(
                query_id = %context.query_id,
                included = assembled.included,
                dropped = assembled.dropped,
                max_chars = self.max_chars,
                "Context truncated"
            );
        }
        assembled
    }
}

/// Short label naming an entity, e.g. `Asset web01`.
pub fn label(entity: &Entity) -> String {
    format!("{} {}", entity.entity_type, entity.display_name())
}

fn render(items: &[&RetrievedItem], note: Option<&str>) -> String {
    // Sections appear in the order their best item ranks
    let mut sections: Vec<Option<EntityType>> = Vec::new();
    for item in items {
        let section = item.entity_type();
        if section.is_some() && !sections.contains(&section) {
            sections.push(section);
        }
    }
    if items.iter().any(|item| item.entity().is_none()) {
        sections.push(None);
    }

    let mut out = String::new();
    if let Some(note) = note {
        out.push_str(note);
        out.push_str("\n\n");
    }
    for section in sections {
        let heading = section.map_or(RELATIONSHIPS_HEADING, |t| t.heading());
        out.push_str("## ");
        out.push_str(heading);
        out.push('\n');
        for item in items.iter().filter(|item| item.entity_type() == section) {
            match &item.item {
                ContextItem::Entity(entity) => render_entity(&mut out, entity, item),
                ContextItem::Relationship(rel) => render_relationship(&mut out, rel),
            }
        }
        out.push('\n');
    }
    out.truncate(out.trim_end().len());
    out
}

fn render_entity(out: &mut String, entity: &Entity, item: &RetrievedItem) {
    let mut lines = entity.embedding_text.lines();
    let title = lines.next().unwrap_or(&entity.entity_id);
    out.push_str(&format!(
        "- {} [{}] (relevance {:.2})\n",
        title, entity.entity_id, item.score
    ));

    let details: Vec<&str> = lines.filter(|l| !l.trim().is_empty()).collect();
    if !details.is_empty() {
        out.push_str("  ");
        out.push_str(&details.join("; "));
        out.push('\n');
    }

    let origins: BTreeSet<String> = entity.source_refs.iter().map(|r| r.to_string()).collect();
    if !origins.is_empty() {
        out.push_str("  sources: ");
        out.push_str(&origins.into_iter().collect::<Vec<_>>().join(", "));
        out.push('\n');
    }
    if !item.path.is_empty() {
        out.push_str("  via: ");
        out.push_str(&item.path.describe());
        out.push('\n');
    }
}

fn render_relationship(out: &mut String, rel: &Relationship) {
    out.push_str(&format!("- {}", rel));
    if rel.weight < 1.0 {
        out.push_str(&format!(" (confidence {:.2})", rel.weight));
    }
    if let Some(at) = rel.observed_at {
        out.push_str(&format!(" observed {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    out.push('\n');
}
