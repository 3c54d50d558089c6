//! Merges brand matches and appearance clusters into one partition

use crate::clusterer::EmbeddingClusterer;
use crate::error::GroupingError;
use crate::matcher::MatchOutcome;
use brandeye_core::{Detection, EmbeddingVector, Group, GroupedDetection};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub groups: Vec<Group>,
    /// Same order as the input detections
    pub detections: Vec<GroupedDetection>,
}

impl Assembly {
    pub fn empty() -> Self {
        Self {
            groups: Vec::new(),
            detections: Vec::new(),
        }
    }
}

/// Indices of detections without a brand, ascending
pub fn unmatched_indices(matches: &[MatchOutcome]) -> Vec<usize> {
    matches
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.is_matched())
        .map(|(idx, _)| idx)
        .collect()
}

/// Every detection in exactly one group, ids 0..len with no gaps, no empty group.
pub fn verify_partition(groups: &[Group], detection_count: usize) -> Result<(), GroupingError> {
    let mut owner: Vec<Option<usize>> = vec![None; detection_count];
    for (position, group) in groups.iter().enumerate() {
        if group.id != position {
            return Err(GroupingError::InvariantViolation(format!(
                "group at position {} has id {}",
                position, group.id
            )));
        }
        if group.members.is_empty() {
            return Err(GroupingError::InvariantViolation(format!("group {} is empty", group.id)));
        }
        for &member in &group.members {
            match owner.get(member) {
                None => {
                    return Err(GroupingError::InvariantViolation(format!(
                        "group {} references detection {} of {}",
                        group.id, member, detection_count
                    )))
                }
                Some(Some(other)) => {
                    return Err(GroupingError::InvariantViolation(format!(
                        "detection {} is in groups {} and {}",
                        member, other, group.id
                    )))
                }
                Some(None) => owner[member] = Some(group.id),
            }
        }
    }
    if let Some(missing) = owner.iter().position(Option::is_none) {
        return Err(GroupingError::InvariantViolation(format!(
            "detection {} is not in any group",
            missing
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GroupAssembler {
    clusterer: EmbeddingClusterer,
}

impl GroupAssembler {
    pub fn new(clusterer: EmbeddingClusterer) -> Self {
        Self { clusterer }
    }

    /// Brand groups first, in order of first appearance, then appearance clusters of
    /// the unmatched detections in discovery order.
    ///
    /// `unmatched_embeddings` holds one vector per unmatched detection, in the order of
    /// [`unmatched_indices`].
    pub fn assemble(
        &self,
        detections: Vec<Detection>,
        matches: &[MatchOutcome],
        unmatched_embeddings: &[EmbeddingVector],
    ) -> Result<Assembly, GroupingError> {
        if matches.len() != detections.len() {
            return Err(GroupingError::InvalidInput(format!(
                "{} match results for {} detections",
                matches.len(),
                detections.len()
            )));
        }
        let unmatched = unmatched_indices(matches);
        if unmatched_embeddings.len() != unmatched.len() {
            return Err(GroupingError::InvalidInput(format!(
                "{} embeddings for {} unmatched detections",
                unmatched_embeddings.len(),
                unmatched.len()
            )));
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut by_brand: HashMap<&str, usize> = HashMap::new();
        for (idx, outcome) in matches.iter().enumerate() {
            if let Some(brand) = outcome.brand() {
                let id = match by_brand.get(brand) {
                    Some(&id) => id,
                    None => {
                        let id = groups.len();
                        groups.push(Group {
                            id,
                            name: brand.to_string(),
                            brand: Some(brand.to_string()),
                            members: Vec::new(),
                        });
                        by_brand.insert(brand, id);
                        id
                    }
                };
                groups[id].members.push(idx);
            }
        }

        for cluster in self.clusterer.partition(unmatched_embeddings)? {
            let id = groups.len();
            groups.push(Group {
                id,
                name: format!("Group {}", id),
                brand: None,
                members: cluster.into_iter().map(|local| unmatched[local]).collect(),
            });
        }

        verify_partition(&groups, detections.len())?;

        let mut assignment: Vec<usize> = vec![0; detections.len()];
        for group in &groups {
            for &member in &group.members {
                assignment[member] = group.id;
            }
        }

        let grouped = detections
            .into_iter()
            .zip(assignment)
            .map(|(detection, group_id)| {
                let group = &groups[group_id];
                detection.into_grouped(group_id, group.brand.clone(), group.name.clone())
            })
            .collect();

        Ok(Assembly {
            groups,
            detections: grouped,
        })
    }
}
