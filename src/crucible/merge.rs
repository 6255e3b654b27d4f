//! World Merge
//!
//! Deduplicates derived elements across goals. Identity is (category, lowercase name); the
//! first occurrence keeps its fields and every goal that names the same element adds one
//! `goal_purposes` entry instead of a duplicate.

use super::types::{ElementCategory, MergedElement, WorldElement};
use std::collections::{BTreeMap, HashMap};

/// Merge `elements` in order, keeping only those `include` accepts.
pub fn merge_elements<F>(elements: &[WorldElement], include: F) -> Vec<MergedElement>
where
    F: Fn(&WorldElement) -> bool,
{
    let mut merged: Vec<MergedElement> = Vec::new();
    let mut name_index: HashMap<(ElementCategory, String), usize> = HashMap::new();

    for element in elements.iter().filter(|e| include(e)) {
        let key = (element.category, element.name.trim().to_lowercase());
        let at = *name_index.entry(key).or_insert_with(|| {
            merged.push(MergedElement {
                category: element.category,
                name: element.name.trim().to_string(),
                content: element.content.clone(),
                want: element.want.clone(),
                need: element.need.clone(),
                relationship: element.relationship.clone(),
                satisfies: Vec::new(),
                goal_purposes: BTreeMap::new(),
            });
            merged.len() - 1
        });

        let target = &mut merged[at];
        for prerequisite in &element.satisfies {
            if !target.satisfies.contains(prerequisite) {
                target.satisfies.push(prerequisite.clone());
            }
        }
        if let Some(goal_id) = &element.goal_id {
            let rationale = element
                .purpose
                .clone()
                .unwrap_or_else(|| element.content.clone());
            target.goal_purposes.entry(goal_id.clone()).or_insert(rationale);
        }
    }

    merged
}

/// Group merged elements by category, preserving order within each group.
pub fn group_by_category(merged: &[MergedElement]) -> BTreeMap<ElementCategory, Vec<MergedElement>> {
    let mut groups: BTreeMap<ElementCategory, Vec<MergedElement>> = BTreeMap::new();
    for element in merged {
        groups
            .entry(element.category)
            .or_default()
            .push(element.clone());
    }
    groups
}
