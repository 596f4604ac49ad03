//! Chain search over sorted seed shards.
//!
//! Within one contig pair the sorted records fall into diagonal buckets. A
//! chain may drift across at most two adjacent buckets, so the search walks
//! bucket runs pairwise: the run on the current bucket and the run on its
//! upper neighbor form one inspection window, merged by b-post. A window
//! whose lower bucket was already the upper half of the previous window and
//! whose neighbor run is empty holds only chains seen before and is
//! skipped.

use anyhow::Result;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::align::{AlignSpec, LocalAligner};
use crate::config::RunConfig;
use crate::index::{AssemblyReader, GenomeIndex};
use crate::las::{LasWriter, Overlap, COMP_FLAG};
use crate::seeds::record::bpost_of;
use crate::seeds::{SeedLayout, SortedShard};
use crate::types::{Orient, BAND_PAD};

/// Cross-thread chain statistics (reported under `-v`).
pub struct ChainStats {
    pub chains: AtomicU64,
    pub passed: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
    pub written: AtomicU64,
}

impl ChainStats {
    pub fn new() -> Self {
        ChainStats {
            chains: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            written: AtomicU64::new(0),
        }
    }

    pub fn print_summary(&self) {
        eprintln!(
            "  {} chains, {} past coverage, {} suppressed, {} aligner rejects, {} alignments",
            self.chains.load(Ordering::Relaxed),
            self.passed.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.written.load(Ordering::Relaxed),
        );
    }
}

impl Default for ChainStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Loaded b-contigs kept around while a worker crosses a-contigs.
const BCACHE_CAP: usize = 16;

struct ChainWorker<'a, A: LocalAligner> {
    cfg: &'a RunConfig,
    layout: &'a SeedLayout,
    idx2: &'a GenomeIndex,
    orient: Orient,
    breader: AssemblyReader<'a>,
    bcache: AHashMap<u32, Vec<u8>>,
    aligner: &'a mut A,
    out: &'a mut LasWriter,
    stats: &'a ChainStats,
    /// Current chain: (raw a-post, b-post, lcp, exact diag).
    seeds: Vec<(u64, u64, u32, u64)>,
    /// B-side spans scratch for the coverage check.
    bspans: Vec<(u64, u32)>,
}

/// Walk the worker's a-contig buckets of one sorted shard, chaining and
/// aligning every contig pair.
#[allow(clippy::too_many_arguments)]
pub fn chain_worker<A: LocalAligner>(
    cfg: &RunConfig,
    layout: &SeedLayout,
    idx1: &GenomeIndex,
    idx2: &GenomeIndex,
    orient: Orient,
    shard: &SortedShard,
    slots: Range<usize>,
    aligner: &mut A,
    out: &mut LasWriter,
    stats: &ChainStats,
) -> Result<()> {
    let mut areader = idx1.assembly.reader()?;
    let mut w = ChainWorker {
        cfg,
        layout,
        idx2,
        orient,
        breader: idx2.assembly.reader()?,
        bcache: AHashMap::new(),
        aligner,
        out,
        stats,
        seeds: Vec::new(),
        bspans: Vec::new(),
    };

    let swide = layout.swide;
    for slot in slots {
        let lo = shard.bounds[slot] as usize;
        let hi = shard.bounds[slot + 1] as usize;
        if lo == hi {
            continue;
        }
        let acont = shard.contigs[slot];
        let abases = areader.load(acont, orient.is_comp())?;
        let region = &shard.data[lo * swide..hi * swide];

        let nrec = hi - lo;
        let mut i = 0;
        while i < nrec {
            let bcont = layout.sort_bcont(&region[i * swide..]);
            let mut j = i + 1;
            while j < nrec && layout.sort_bcont(&region[j * swide..]) == bcont {
                j += 1;
            }
            w.align_contigs(&region[i * swide..j * swide], acont, &abases, bcont)?;
            i = j;
        }
    }
    Ok(())
}

impl<A: LocalAligner> ChainWorker<'_, A> {
    fn ensure_bcontig(&mut self, bcont: u32) -> Result<()> {
        if !self.bcache.contains_key(&bcont) {
            if self.bcache.len() >= BCACHE_CAP {
                self.bcache.clear();
            }
            let bases = self.breader.load(bcont, false)?;
            self.bcache.insert(bcont, bases);
        }
        Ok(())
    }

    /// Sweep one contig pair's records by diagonal-bucket windows.
    fn align_contigs(&mut self, recs: &[u8], acont: u32, abases: &[u8], bcont: u32) -> Result<()> {
        let swide = self.layout.swide;
        let n = recs.len() / swide;
        let blen = self.idx2.assembly.contig_len(bcont);

        // Frame a-end of the last accepted alignment; chains ending at or
        // before it would only rediscover it.
        let mut alast: i64 = -1;

        let mut b = 0usize;
        let mut prev_upper: Option<u64> = None;
        while b < n {
            let d = self.layout.sort_bucket(&recs[b * swide..]);
            let mut m = b + 1;
            while m < n && self.layout.sort_bucket(&recs[m * swide..]) == d {
                m += 1;
            }
            let mut e = m;
            while e < n && self.layout.sort_bucket(&recs[e * swide..]) == d + 1 {
                e += 1;
            }
            let aux = e > m;
            let new = prev_upper != Some(d);
            if new || aux {
                self.inspect(recs, b, m, e, acont, abases, bcont, blen, &mut alast)?;
            }
            if aux {
                prev_upper = Some(d + 1);
                b = m;
            } else {
                prev_upper = None;
                b = e;
            }
        }
        Ok(())
    }

    /// Merge the window's two bucket runs by b-post and chain the result.
    #[allow(clippy::too_many_arguments)]
    fn inspect(
        &mut self,
        recs: &[u8],
        lo: usize,
        mid: usize,
        hi: usize,
        acont: u32,
        abases: &[u8],
        bcont: u32,
        blen: u64,
        alast: &mut i64,
    ) -> Result<()> {
        let layout = self.layout;
        let swide = layout.swide;
        let field = |i: usize| {
            let r = &recs[i * swide..(i + 1) * swide];
            (
                layout.sort_apost(r),
                layout.sort_diag(r),
                layout.sort_lcp(r) as u32,
            )
        };
        // Merge key: b-post up to a per-window constant, valid for both
        // orientations.
        let jkey = |i: usize| {
            let (apost, diag, _) = field(i);
            apost as i64 - diag as i64
        };

        self.seeds.clear();
        let mut cov = 0u64;
        let mut lps = 0i64;
        let mut last_apost = i64::MIN;

        let mut p = lo;
        let mut q = mid;
        while p < mid || q < hi {
            let take_p = q >= hi || (p < mid && jkey(p) <= jkey(q));
            let r = if take_p { p } else { q };
            let (apost, diag, lcp) = field(r);

            if last_apost != i64::MIN && apost as i64 - last_apost > self.cfg.chain_break as i64 {
                self.flush_chain(cov, acont, abases, bcont, blen, alast)?;
                self.seeds.clear();
                cov = 0;
                lps = 0;
            }

            // A-coverage: union of lcp projections on the a-axis.
            let aend = (apost + lcp as u64) as i64;
            if self.seeds.is_empty() || apost as i64 >= lps {
                cov += lcp as u64;
            } else if aend > lps {
                cov += (aend - lps) as u64;
            }
            lps = lps.max(aend);
            last_apost = apost as i64;

            let bpost = bpost_of(self.orient, apost, diag, blen);
            self.seeds.push((apost, bpost, lcp, diag));

            if take_p {
                p += 1;
            } else {
                q += 1;
            }
        }
        self.flush_chain(cov, acont, abases, bcont, blen, alast)?;
        self.seeds.clear();
        Ok(())
    }

    /// Apply the coverage filters to the accumulated chain and hand it to
    /// the aligner.
    fn flush_chain(
        &mut self,
        cov: u64,
        acont: u32,
        abases: &[u8],
        bcont: u32,
        blen: u64,
        alast: &mut i64,
    ) -> Result<()> {
        if self.seeds.is_empty() {
            return Ok(());
        }
        self.stats.chains.fetch_add(1, Ordering::Relaxed);
        if cov < self.cfg.chain_min as u64 {
            return Ok(());
        }

        // B-side coverage over the same union rule.
        self.bspans.clear();
        self.bspans
            .extend(self.seeds.iter().map(|&(_, bpost, lcp, _)| (bpost, lcp)));
        self.bspans.sort_unstable();
        let mut jcov = 0u64;
        let mut jlps = 0u64;
        for &(bpost, lcp) in &self.bspans {
            let bend = bpost + lcp as u64;
            if bend > jlps {
                jcov += bend - jlps.max(bpost);
                jlps = bend;
            }
        }
        if jcov < self.cfg.chain_min as u64 {
            return Ok(());
        }
        self.stats.passed.fetch_add(1, Ordering::Relaxed);

        let k = self.layout.kmer as i64;
        let alen = abases.len() as i64;
        let alenk = alen - k;

        // Everything below runs in the aligner's frame: forward a for the
        // normal family, reverse-complemented a against forward b for comp.
        let frame_a = |apost: u64| match self.orient {
            Orient::Normal => apost as i64,
            Orient::Comp => alenk - apost as i64,
        };
        let frame_diag = |diag: u64| match self.orient {
            Orient::Normal => diag as i64 - blen as i64,
            Orient::Comp => alenk - diag as i64,
        };

        let fend = self
            .seeds
            .iter()
            .map(|&(apost, _, lcp, _)| frame_a(apost) + lcp as i64)
            .max()
            .unwrap();
        if fend <= *alast {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let mut dgmin = i64::MAX;
        let mut dgmax = i64::MIN;
        for &(_, _, _, diag) in &self.seeds {
            let fd = frame_diag(diag);
            dgmin = dgmin.min(fd);
            dgmax = dgmax.max(fd);
        }
        let (mid_apost, mid_bpost, _, _) = self.seeds[self.seeds.len() / 2];
        let anti = frame_a(mid_apost) + mid_bpost as i64;

        let spec = AlignSpec {
            band_lo: dgmin - BAND_PAD as i64,
            band_hi: dgmax + BAND_PAD as i64,
            anti,
        };
        self.ensure_bcontig(bcont)?;
        let bbases = &self.bcache[&bcont];
        let path = self.aligner.align(abases, bbases, &spec);

        match path {
            Some(path)
                if path.alen() >= self.cfg.align_min
                    && path.diff_fraction() <= self.cfg.max_diff_fraction() =>
            {
                *alast = (*alast).max(path.aepos as i64);
                let flags = if self.orient.is_comp() { COMP_FLAG } else { 0 };
                self.out.put(&Overlap {
                    flags,
                    acont,
                    bcont,
                    path,
                })?;
                self.stats.written.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
