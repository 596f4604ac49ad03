//! Banded local alignment behind the oracle seam.
//!
//! The chain search only depends on the [`LocalAligner`] trait: given two
//! base strings, a diagonal band, and an anti-diagonal anchor, produce a
//! trace-encoded local alignment or nothing. The bundled [`BandedAligner`]
//! anchors on the band's mid diagonal, then extends forward and backward
//! with a banded edit DP. At every `TRACE_SPACING` a-boundary the frontier
//! is pinched to its best cell, which keeps memory at O(band) and makes the
//! recorded per-segment (diffs, b-length) pairs exact for the returned path.

use crate::types::TRACE_SPACING;

/// Band and anchor for one aligner invocation, in the frame of the base
/// strings handed over (diagonal = a-position − b-position).
#[derive(Debug, Clone, Copy)]
pub struct AlignSpec {
    pub band_lo: i64,
    pub band_hi: i64,
    /// Anchor anti-diagonal (a-position + b-position).
    pub anti: i64,
}

/// A trace-encoded local alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlnPath {
    pub abpos: u32,
    pub aepos: u32,
    pub bbpos: u32,
    pub bepos: u32,
    /// Total differences along the path.
    pub diffs: u32,
    /// Per-`TRACE_SPACING`-segment (diff count, b-length) byte pairs.
    pub trace: Vec<u8>,
}

impl AlnPath {
    pub fn alen(&self) -> u32 {
        self.aepos - self.abpos
    }

    /// Fraction of columns that are differences.
    pub fn diff_fraction(&self) -> f64 {
        let alen = self.alen();
        if alen == 0 {
            1.0
        } else {
            self.diffs as f64 / alen as f64
        }
    }
}

/// The seam the chain search talks through.
pub trait LocalAligner {
    fn align(&mut self, a: &[u8], b: &[u8], spec: &AlignSpec) -> Option<AlnPath>;
}

const MATCH_SCORE: i32 = 1;
const DIFF_SCORE: i32 = -2;
const XDROP: i32 = 60;
const NEG: i32 = i32::MIN / 4;

/// One direction's extension result.
struct Ext {
    rows: usize,
    cols: usize,
    diffs: u32,
    /// Boundary-aligned (diffs, b-length) pairs from the anchor outward,
    /// final partial segment last.
    pairs: Vec<(u32, u32)>,
}

/// Banded X-drop extender; owns its frontier scratch.
pub struct BandedAligner {
    score: Vec<i32>,
    diffs: Vec<u32>,
    next: Vec<i32>,
    next_diffs: Vec<u32>,
}

impl BandedAligner {
    pub fn new() -> BandedAligner {
        BandedAligner {
            score: Vec::new(),
            diffs: Vec::new(),
            next: Vec::new(),
            next_diffs: Vec::new(),
        }
    }

    /// Extend from `(sa, sb)`; `back` runs toward smaller coordinates.
    /// `rlo..=rhi` is the band on i−j in extension-local coordinates.
    fn extend(&mut self, a: &[u8], b: &[u8], sa: usize, sb: usize, rlo: i64, rhi: i64, back: bool) -> Ext {
        let alen = if back { sa } else { a.len() - sa };
        let blen = if back { sb } else { b.len() - sb };
        let ach = |i: usize| if back { a[sa - 1 - i] } else { a[sa + i] };
        let bch = |j: usize| if back { b[sb - 1 - j] } else { b[sb + j] };
        let abs_a = |i: usize| if back { sa - i } else { sa + i };

        let w = (rhi - rlo + 1) as usize;
        self.score.clear();
        self.score.resize(w, NEG);
        self.diffs.clear();
        self.diffs.resize(w, 0);
        self.next.clear();
        self.next.resize(w, NEG);
        self.next_diffs.clear();
        self.next_diffs.resize(w, 0);

        let k0 = (-rlo) as usize; // index of diagonal i - j = 0
        self.score[k0] = 0;

        let tspace = TRACE_SPACING as usize;
        let mut pairs: Vec<(u32, u32)> = Vec::new();
        let mut mark_diffs = 0u32;
        let mut mark_j = 0usize;

        let mut best_score = 0i32;
        let mut best = (0usize, 0usize, 0u32, 0usize); // (i, j, diffs, pairs done)

        let mut i = 0usize;
        while i < alen {
            // Row i -> i+1: diagonal and deletion steps.
            for kx in 0..w {
                let kdiag = rlo + kx as i64;
                let j = i as i64 - kdiag; // source column for the diagonal step
                let mut s = NEG;
                let mut d = 0u32;
                if self.score[kx] > NEG && j >= 0 && (j as usize) < blen {
                    let m = ach(i) == bch(j as usize);
                    s = self.score[kx] + if m { MATCH_SCORE } else { DIFF_SCORE };
                    d = self.diffs[kx] + !m as u32;
                }
                if kx > 0 && self.score[kx - 1] > NEG {
                    let del = self.score[kx - 1] + DIFF_SCORE;
                    if del > s {
                        s = del;
                        d = self.diffs[kx - 1] + 1;
                    }
                }
                self.next[kx] = s;
                self.next_diffs[kx] = d;
            }
            // In-row insertions, high diagonal to low.
            for kx in (1..w).rev() {
                if self.next[kx] > NEG {
                    let ins = self.next[kx] + DIFF_SCORE;
                    if ins > self.next[kx - 1] {
                        self.next[kx - 1] = ins;
                        self.next_diffs[kx - 1] = self.next_diffs[kx] + 1;
                    }
                }
            }
            std::mem::swap(&mut self.score, &mut self.next);
            std::mem::swap(&mut self.diffs, &mut self.next_diffs);
            i += 1;

            // X-drop pruning and best tracking.
            let mut row_best = NEG;
            let mut row_kx = 0usize;
            for kx in 0..w {
                let kdiag = rlo + kx as i64;
                let j = i as i64 - kdiag;
                if j < 0 || j as usize > blen {
                    self.score[kx] = NEG;
                    continue;
                }
                if self.score[kx] > row_best {
                    row_best = self.score[kx];
                    row_kx = kx;
                }
            }
            if row_best <= NEG {
                break;
            }
            if row_best > best_score {
                best_score = row_best;
                let j = (i as i64 - (rlo + row_kx as i64)) as usize;
                best = (i, j, self.diffs[row_kx], pairs.len());
            }
            if row_best < best_score - XDROP {
                break;
            }
            for kx in 0..w {
                if self.score[kx] > NEG && self.score[kx] < best_score - XDROP {
                    self.score[kx] = NEG;
                }
            }

            // Pinch the frontier at trace boundaries so every surviving
            // path crosses them at the recorded cell.
            if abs_a(i) % tspace == 0 && i < alen {
                let j = (i as i64 - (rlo + row_kx as i64)) as usize;
                pairs.push((self.diffs[row_kx] - mark_diffs, (j - mark_j) as u32));
                mark_diffs = self.diffs[row_kx];
                mark_j = j;
                for kx in 0..w {
                    if kx != row_kx {
                        self.score[kx] = NEG;
                    }
                }
            }
        }

        let (bi, bj, bdiffs, npairs) = best;
        pairs.truncate(npairs);
        let (last_d, last_j) = pairs
            .iter()
            .fold((0u32, 0u32), |(d, j), &(pd, pj)| (d + pd, j + pj));
        pairs.push((bdiffs - last_d, bj as u32 - last_j));
        Ext {
            rows: bi,
            cols: bj,
            diffs: bdiffs,
            pairs,
        }
    }
}

impl Default for BandedAligner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAligner for BandedAligner {
    fn align(&mut self, a: &[u8], b: &[u8], spec: &AlignSpec) -> Option<AlnPath> {
        let alen = a.len() as i64;
        let blen = b.len() as i64;
        let dm = (spec.band_lo + spec.band_hi) / 2;

        // Anchor on the mid diagonal at the anti-diagonal, clamped into
        // both sequences.
        let a_min = dm.max(0);
        let a_max = alen.min(blen + dm);
        if a_min > a_max {
            return None;
        }
        let a0 = ((spec.anti + dm) / 2).clamp(a_min, a_max);
        let b0 = a0 - dm;

        // Band on i - j, local to each extension direction.
        let f = self.extend(
            a,
            b,
            a0 as usize,
            b0 as usize,
            spec.band_lo - dm,
            spec.band_hi - dm,
            false,
        );
        let r = self.extend(
            a,
            b,
            a0 as usize,
            b0 as usize,
            dm - spec.band_hi,
            dm - spec.band_lo,
            true,
        );

        let abpos = (a0 as usize - r.rows) as u32;
        let aepos = (a0 as usize + f.rows) as u32;
        let bbpos = (b0 as usize - r.cols) as u32;
        let bepos = (b0 as usize + f.cols) as u32;
        if aepos == abpos {
            return None;
        }

        // Assemble the ascending trace: backward pairs reversed, merged
        // with the forward side at the anchor's segment when the anchor is
        // not itself on a boundary.
        let mut segs: Vec<(u32, u32)> = r.pairs.iter().rev().copied().collect();
        let mut fwd = f.pairs;
        if a0 % TRACE_SPACING as i64 != 0 && !segs.is_empty() {
            let last = segs.len() - 1;
            let first = fwd.remove(0);
            segs[last].0 += first.0;
            segs[last].1 += first.1;
        }
        segs.extend(fwd);
        // Zero-width edge segments appear when an extension dies exactly on
        // a boundary; drop them.
        segs.retain(|&(d, l)| d > 0 || l > 0);
        if segs.is_empty() {
            segs.push((0, 0));
        }

        let diffs = f.diffs + r.diffs;
        debug_assert_eq!(segs.iter().map(|s| s.0).sum::<u32>(), diffs);
        debug_assert_eq!(segs.iter().map(|s| s.1).sum::<u32>(), bepos - bbpos);

        let mut trace = Vec::with_capacity(2 * segs.len());
        for (d, l) in segs {
            trace.push(d.min(255) as u8);
            trace.push(l.min(255) as u8);
        }

        Some(AlnPath {
            abpos,
            aepos,
            bbpos,
            bepos,
            diffs,
            trace,
        })
    }
}
