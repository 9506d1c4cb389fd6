//! Per-rack replica planning.
//!
//! The DataCenter spec only carries a total. These helpers turn that total
//! into per-rack counts while keeping every change to a single rack.

use crate::names::Rack;
use std::collections::BTreeMap;

/// Spread `replicas` over `racks`; the remainder goes to the first racks.
pub fn initial_distribution(replicas: i32, racks: usize) -> Vec<i32> {
    if racks == 0 {
        return Vec::new();
    }
    let replicas = replicas.max(0);
    let racks_i32 = racks as i32;
    let base = replicas / racks_i32;
    let remainder = (replicas % racks_i32) as usize;
    (0..racks)
        .map(|idx| if idx < remainder { base + 1 } else { base })
        .collect()
}

/// Rack to grow: fewest existing replicas, lowest index on ties.
pub fn pick_scale_up_rack<'a, I>(candidates: I) -> Option<&'a Rack>
where
    I: IntoIterator<Item = (&'a Rack, i32)>,
{
    candidates
        .into_iter()
        .min_by(|(ra, a), (rb, b)| a.cmp(b).then(ra.index.cmp(&rb.index)))
        .map(|(rack, _)| rack)
}

/// Rack to shrink: most existing replicas, highest index on ties.
pub fn pick_scale_down_rack<'a, I>(candidates: I) -> Option<&'a Rack>
where
    I: IntoIterator<Item = (&'a Rack, i32)>,
{
    candidates
        .into_iter()
        .max_by(|(ra, a), (rb, b)| a.cmp(b).then(ra.index.cmp(&rb.index)))
        .map(|(rack, _)| rack)
}

/// Desired count per rack given what already runs.
///
/// Every rack keeps its existing count except at most one, which moves one
/// step toward `target`.
pub fn plan_desired(existing: &BTreeMap<Rack, i32>, target: i32) -> BTreeMap<Rack, i32> {
    let mut desired = existing.clone();
    let total: i32 = existing.values().sum();
    let target = target.max(0);

    let picked = if total < target {
        pick_scale_up_rack(existing.iter().map(|(r, n)| (r, *n))).map(|r| (r.clone(), 1))
    } else if total > target {
        pick_scale_down_rack(
            existing
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(r, n)| (r, *n)),
        )
        .map(|r| (r.clone(), -1))
    } else {
        None
    };

    if let Some((rack, delta)) = picked {
        if let Some(count) = desired.get_mut(&rack) {
            *count += delta;
        }
    }
    desired
}
