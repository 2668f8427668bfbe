//! Breadth-first expansion shared by every graph store.
//!
//! Levels are expanded one at a time, so the first level at which an entity
//! appears is its shortest distance. Among equally short paths the one with
//! the lexicographically smallest relationship type sequence wins, then the
//! smallest sequence of visited ids, which makes the result independent of
//! storage order.

use std::collections::{BTreeMap, HashMap};

use crate::error::AppError;
use crate::graph::store::{EdgeFilter, GraphStore, Neighbor};
use crate::models::{PathStep, Relationship};

type PathKey = (Vec<&'static str>, Vec<String>);

fn path_key(path: &[PathStep]) -> PathKey {
    (
        path.iter()
            .map(|s| s.relationship.relationship_type.as_str())
            .collect(),
        path.iter().map(|s| s.reached().to_string()).collect(),
    )
}

fn step_from(relationship: &Relationship, from: &str) -> PathStep {
    PathStep {
        relationship: relationship.clone(),
        reversed: relationship.source_entity_id != from,
    }
}

fn offer(best: &mut BTreeMap<String, Vec<PathStep>>, entity_id: &str, path: Vec<PathStep>) {
    match best.get(entity_id) {
        Some(current) if path_key(current) <= path_key(&path) => {}
        _ => {
            best.insert(entity_id.to_string(), path);
        }
    }
}

/// Whether arriving at an already visited entity closes a cycle through the
/// start, given the path here and the path that visited it.
fn closes_cycle(path: &[PathStep], back: &[PathStep], edge: &Relationship) -> bool {
    match (path.first(), back.first()) {
        (Some(a), Some(b)) => a.relationship.key() != b.relationship.key(),
        // Back at the start: any edge but the one we left by
        (Some(a), None) => a.relationship.key() != edge.key(),
        _ => false,
    }
}

/// `path` followed by `back` walked in reverse.
fn close_cycle(path: &[PathStep], edge: PathStep, back: &[PathStep]) -> Vec<PathStep> {
    let mut cycle = path.to_vec();
    cycle.push(edge);
    cycle.extend(back.iter().rev().map(|s| PathStep {
        relationship: s.relationship.clone(),
        reversed: !s.reversed,
    }));
    cycle
}

pub(crate) async fn expand<S: GraphStore + ?Sized>(
    store: &S,
    start: &str,
    edge_types: &EdgeFilter,
    max_hops: usize,
) -> Result<Vec<Neighbor>, AppError> {
    let mut visited: HashMap<String, Vec<PathStep>> =
        HashMap::from([(start.to_string(), Vec::new())]);
    let mut frontier: Vec<(String, Vec<PathStep>)> = vec![(start.to_string(), Vec::new())];
    let mut found = Vec::new();
    let mut cycle: Option<Vec<PathStep>> = None;

    for hop in 1..=max_hops {
        let mut reached: BTreeMap<String, Vec<PathStep>> = BTreeMap::new();

        for (node, path) in &frontier {
            for edge in store.incident_edges(node, edge_types).await? {
                let next = edge.other_end(node).to_string();
                let step = step_from(&edge, node);

                match visited.get(&next) {
                    None => {
                        let mut extended = path.clone();
                        extended.push(step);
                        offer(&mut reached, &next, extended);
                    }
                    Some(back) if closes_cycle(path, back, &edge) => {
                        let candidate = close_cycle(path, step, back);
                        let shorter = candidate.len() <= max_hops
                            && cycle.as_ref().map_or(true, |current| {
                                (candidate.len(), path_key(&candidate))
                                    < (current.len(), path_key(current))
                            });
                        if shorter {
                            cycle = Some(candidate);
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        frontier.clear();
        for (entity_id, path) in reached {
            found.push(Neighbor {
                entity_id: entity_id.clone(),
                hop,
                path: path.clone(),
            });
            visited.insert(entity_id.clone(), path.clone());
            frontier.push((entity_id, path));
        }

        if frontier.is_empty() {
            break;
        }
    }

    if let Some(path) = cycle {
        found.push(Neighbor {
            entity_id: start.to_string(),
            hop: path.len(),
            path,
        });
    }
    Ok(found)
}
