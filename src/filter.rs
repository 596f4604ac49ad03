//! Redundancy filter over a contig pair's alignments.
//!
//! The chain search rediscovers parts of the same homology from different
//! windows, so within each contig pair the filter drops alignments that
//! another alignment dominates: identical endpoints with more differences,
//! a shared endpoint with a shorter extent, or containment (within a small
//! slack) by an alignment whose b-trajectory never crosses its own.

use anyhow::Result;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::las::Overlap;
use crate::types::TRACE_SPACING;

/// Containment slack in bases for the second elimination pass.
const CONTAIN_SLACK: u32 = 10;

/// Cross-thread filter statistics (reported under `-v`).
pub struct FilterStats {
    pub loaded: AtomicU64,
    pub eliminated: AtomicU64,
    pub kept: AtomicU64,
}

impl FilterStats {
    pub fn new() -> Self {
        FilterStats {
            loaded: AtomicU64::new(0),
            eliminated: AtomicU64::new(0),
            kept: AtomicU64::new(0),
        }
    }

    pub fn print_summary(&self) {
        eprintln!(
            "  {} alignments filtered to {} ({} redundant)",
            self.loaded.load(Ordering::Relaxed),
            self.kept.load(Ordering::Relaxed),
            self.eliminated.load(Ordering::Relaxed),
        );
    }
}

impl Default for FilterStats {
    fn default() -> Self {
        Self::new()
    }
}

/// B-coordinate of a path at every trace boundary strictly inside its
/// a-range: entry `i` is the b-position at a-coordinate `first + i·T`.
fn boundary_bs(o: &Overlap) -> (i64, Vec<i64>) {
    let t = TRACE_SPACING as i64;
    let first = (o.path.abpos as i64) / t * t + t;
    let mut bs = Vec::new();
    let mut b = o.path.bbpos as i64;
    let mut a = first;
    for pair in o.path.trace.chunks(2) {
        b += pair[1] as i64;
        // Segment ends on a real boundary for every pair but the last.
        if a < o.path.aepos as i64 {
            bs.push(b);
            a += t;
        }
    }
    (first, bs)
}

/// Walk two paths' traces across the overlap of their a-ranges.
///
/// Returns the signed b-offset difference of minimum magnitude and, when
/// the trajectories cross, the a-coordinate where they do.
pub fn entwine(a: &Overlap, b: &Overlap) -> (i64, Option<i64>) {
    let t = TRACE_SPACING as i64;
    let (fa, bsa) = boundary_bs(a);
    let (fb, bsb) = boundary_bs(b);

    let lo = fa.max(fb);
    let hi = (fa + t * bsa.len() as i64).min(fb + t * bsb.len() as i64);

    let mut min_diff = i64::MAX;
    let mut where_at = None;
    let mut prev_sign = 0i64;
    let mut m = lo;
    while m < hi {
        let da = bsa[((m - fa) / t) as usize];
        let db = bsb[((m - fb) / t) as usize];
        let diff = da - db;
        if diff.abs() < min_diff.abs() || min_diff == i64::MAX {
            min_diff = diff;
        }
        // Touching (zero) is not a crossing; only a sign change is.
        let sign = diff.signum();
        if sign != 0 && prev_sign != 0 && sign != prev_sign {
            where_at = Some(m);
        }
        if sign != 0 {
            prev_sign = sign;
        }
        m += t;
    }
    if min_diff == i64::MAX {
        min_diff = 0;
    }
    (min_diff, where_at)
}

fn a_overlaps(x: &Overlap, y: &Overlap) -> bool {
    x.path.abpos < y.path.aepos && y.path.abpos < x.path.aepos
}

fn b_overlaps(x: &Overlap, y: &Overlap) -> bool {
    x.path.bbpos < y.path.bepos && y.path.bbpos < x.path.bepos
}

/// True when `x` spans `y` on both genomes within the containment slack.
fn contains(x: &Overlap, y: &Overlap) -> bool {
    x.path.abpos <= y.path.abpos + CONTAIN_SLACK
        && x.path.aepos + CONTAIN_SLACK >= y.path.aepos
        && x.path.bbpos <= y.path.bbpos + CONTAIN_SLACK
        && x.path.bepos + CONTAIN_SLACK >= y.path.bepos
}

/// Filter one contig pair's alignments, returning survivors in a-begin
/// order.
fn filter_group(ovls: &[Overlap]) -> Vec<Overlap> {
    let n = ovls.len();
    let mut perm: Vec<usize> = (0..n).collect();
    perm.sort_by_key(|&i| {
        let p = &ovls[i].path;
        (p.abpos, p.aepos, p.bbpos, p.bepos)
    });
    let mut elim = vec![false; n];

    // Endpoint dominance.
    for jj in (0..n).rev() {
        let ai = perm[jj];
        for &bi in &perm[jj + 1..] {
            if ovls[bi].path.abpos > ovls[ai].path.aepos {
                break;
            }
            if elim[ai] {
                break;
            }
            if elim[bi] {
                continue;
            }
            let (pa, pb) = (&ovls[ai].path, &ovls[bi].path);
            let same_start = pa.abpos == pb.abpos && pa.bbpos == pb.bbpos;
            let same_end = pa.aepos == pb.aepos && pa.bepos == pb.bepos;
            if same_start && same_end {
                let victim = if pa.diffs <= pb.diffs { bi } else { ai };
                elim[victim] = true;
            } else if same_start {
                let victim = if pa.alen() >= pb.alen() { bi } else { ai };
                elim[victim] = true;
            } else if same_end {
                let victim = if pa.alen() >= pb.alen() { bi } else { ai };
                elim[victim] = true;
            }
        }
    }

    // Containment, unless the trajectories genuinely cross.
    for jj in 0..n {
        let ai = perm[jj];
        for &bi in &perm[jj + 1..] {
            if ovls[bi].path.abpos >= ovls[ai].path.aepos {
                break;
            }
            if elim[ai] {
                break;
            }
            if elim[bi] {
                continue;
            }
            if !a_overlaps(&ovls[ai], &ovls[bi]) || !b_overlaps(&ovls[ai], &ovls[bi]) {
                continue;
            }
            let (_min_diff, crossing) = entwine(&ovls[ai], &ovls[bi]);
            if crossing.is_some() {
                continue;
            }
            if contains(&ovls[ai], &ovls[bi]) {
                elim[bi] = true;
            } else if contains(&ovls[bi], &ovls[ai]) {
                elim[ai] = true;
            }
        }
    }

    perm.into_iter()
        .filter(|&i| !elim[i])
        .map(|i| ovls[i].clone())
        .collect()
}

/// Filter a whole per-thread alignment file's worth of overlaps, grouped
/// by (a-contig, b-contig, orientation) in first-seen order.
pub fn filter_alignments(ovls: Vec<Overlap>, stats: &FilterStats) -> Result<Vec<Overlap>> {
    stats.loaded.fetch_add(ovls.len() as u64, Ordering::Relaxed);
    let mut groups: IndexMap<(u32, u32, u32), Vec<Overlap>> = IndexMap::new();
    for o in ovls {
        groups.entry((o.acont, o.bcont, o.flags)).or_default().push(o);
    }

    let mut out = Vec::new();
    for (_, group) in groups {
        let nin = group.len();
        let survivors = filter_group(&group);
        stats
            .eliminated
            .fetch_add((nin - survivors.len()) as u64, Ordering::Relaxed);
        stats.kept.fetch_add(survivors.len() as u64, Ordering::Relaxed);
        out.extend(survivors);
    }
    Ok(out)
}
