//! Director Oversight
//!
//! A side generation that reviews the recent chain. Its guidance replaces whatever guidance
//! the chain had; `[TAINT Scene N]` flags a beat without removing it; `[REJECT]` pops the
//! last beat and undoes its constraint effects.

use super::parse::ParsedDirector;
use super::types::{Beat, CrucibleChain, DirectorGuidance};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorReport {
    pub guidance_replaced: bool,
    /// The beat removed by `[REJECT]`, if there was one to remove
    pub rejected: Option<Beat>,
    /// 0-based indices of beats newly tainted
    pub tainted: Vec<usize>,
}

/// Whether the director should run before the next beat.
pub fn is_due(chain: &CrucibleChain, interval: usize) -> bool {
    interval > 0 && !chain.beats.is_empty() && chain.beats_since_director >= interval
}

/// Apply parsed director output to `chain`. Taints refer to scene numbers as they stood
/// before any rejection in the same output.
pub fn apply_director(chain: &mut CrucibleChain, parsed: ParsedDirector) -> DirectorReport {
    let mut report = DirectorReport::default();

    for scene in &parsed.taints {
        let Some(index) = scene.checked_sub(1) else {
            debug!(goal_id = %chain.goal_id, scene, "Ignoring taint of scene 0");
            continue;
        };
        match chain.beats.get_mut(index) {
            Some(beat) => {
                beat.tainted = true;
                report.tainted.push(index);
            }
            None => debug!(goal_id = %chain.goal_id, scene, "Ignoring taint of missing scene"),
        }
    }

    if parsed.reject {
        report.rejected = chain.pop_beat();
        match &report.rejected {
            Some(beat) => info!(goal_id = %chain.goal_id, scene = %beat.scene, "Director rejected last beat"),
            None => debug!(goal_id = %chain.goal_id, "Director rejection on empty chain ignored"),
        }
    }

    if parsed.has_guidance() {
        chain.guidance = Some(DirectorGuidance {
            solver: parsed.solver,
            builder: parsed.builder,
            at_beat_index: chain.beats.len(),
        });
        report.guidance_replaced = true;
    }

    chain.beats_since_director = 0;
    report
}
