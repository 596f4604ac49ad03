//! Adaptive-seed merger: the synchronized walk of the two k-mer tables.
//!
//! Worker `t` owns shard rows `[t·nsqrt, (t+1)·nsqrt)` of both tables. The
//! shards cut the panel space at the same boundaries in both indices, so
//! every match of 12 or more bases falls inside exactly one worker's range
//! and workers never coordinate.
//!
//! For each first-table entry the worker maintains the run of second-table
//! cache entries matching each prefix length, reusing runs up to the entry's
//! stored lcp and narrowing one base at a time past it. The run at the
//! maximal matched length is the seed's b-side; its position count decides
//! whether anything is emitted.

use anyhow::{ensure, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::RunConfig;
use crate::index::{GenomeIndex, PostStream};
use crate::seeds::record::SeedLayout;
use crate::types::{base_at, MIN_PLEN, PANEL_BASES, POST_BUF_LEN, POST_BUF_MASK};

/// Seeds emitted per (orientation family, a-contig) by one worker; the
/// sort stage turns these into bucket boundaries.
pub type SeedCounts = [Vec<u64>; 2];

/// Cross-thread merge statistics (reported under `-v`).
pub struct MergeStats {
    /// Total seed pairs emitted.
    pub nseeds: AtomicU64,
    /// A-side positions that produced at least one seed.
    pub napos: AtomicU64,
    /// Sum of `lcp × pairs` over emissions.
    pub lcp_mass: AtomicU64,
    /// Seed pairs per matched prefix length.
    hist: Vec<AtomicU64>,
}

impl MergeStats {
    pub fn new() -> Self {
        MergeStats {
            nseeds: AtomicU64::new(0),
            napos: AtomicU64::new(0),
            lcp_mass: AtomicU64::new(0),
            hist: (0..256).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn record(&self, plen: usize, npairs: u64, napos: u64) {
        self.nseeds.fetch_add(npairs, Ordering::Relaxed);
        self.napos.fetch_add(napos, Ordering::Relaxed);
        self.lcp_mass.fetch_add(plen as u64 * npairs, Ordering::Relaxed);
        self.hist[plen].fetch_add(npairs, Ordering::Relaxed);
    }

    /// Print the seed summary for `-v` runs.
    pub fn print_summary(&self) {
        let nseeds = self.nseeds.load(Ordering::Relaxed);
        let napos = self.napos.load(Ordering::Relaxed);
        let mass = self.lcp_mass.load(Ordering::Relaxed);
        eprintln!("  {} adaptive seeds from {} a-positions", nseeds, napos);
        if nseeds > 0 {
            eprintln!("  mean seed length {:.1}", mass as f64 / nseeds as f64);
            let mut lo = usize::MAX;
            let mut hi = 0;
            for (l, c) in self.hist.iter().enumerate() {
                if c.load(Ordering::Relaxed) > 0 {
                    lo = lo.min(l);
                    hi = hi.max(l);
                }
            }
            for l in lo..=hi {
                let c = self.hist[l].load(Ordering::Relaxed);
                if c > 0 {
                    eprintln!("    {:>4}: {}", l, c);
                }
            }
        }
    }
}

impl Default for MergeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Circular buffer over the second position list.
///
/// Holds the window `[vlow, vhgh)` of global entries, at most
/// `POST_BUF_LEN`. The first `freq` slots are mirrored past the end so any
/// emitted range (at most `freq` entries) reads as one contiguous slice
/// even when it wraps.
struct PostBuf {
    stream: PostStream,
    buf: Vec<u64>,
    overflow: usize,
    vlow: u64,
    vhgh: u64,
}

impl PostBuf {
    fn new(stream: PostStream, overflow: usize) -> PostBuf {
        PostBuf {
            stream,
            buf: vec![0; POST_BUF_LEN + overflow],
            overflow,
            vlow: 0,
            vhgh: 0,
        }
    }

    /// Contiguous view of global entries `[i0, i1)`; `i1 - i0` must not
    /// exceed the overflow region.
    fn slice(&mut self, i0: u64, i1: u64) -> Result<&[u64]> {
        debug_assert!((i1 - i0) as usize <= self.overflow);
        if i0 < self.vlow || i1 > self.vhgh {
            self.load(i0, i1)?;
        }
        let s = i0 as usize & POST_BUF_MASK;
        Ok(&self.buf[s..s + (i1 - i0) as usize])
    }

    fn load(&mut self, i0: u64, i1: u64) -> Result<()> {
        if i0 < self.vlow || i0 > self.vhgh {
            // The window moved past this range (a re-match widened the run
            // backwards) or jumped a panel; restart it here.
            self.stream.seek(i0)?;
            self.vlow = i0;
            self.vhgh = i0;
        }
        while self.vhgh < i1 {
            ensure!(self.stream.advance()?, "position list ended before its k-mer table");
            let v = self.stream.entry();
            let slot = self.vhgh as usize & POST_BUF_MASK;
            self.buf[slot] = v;
            if slot < self.overflow {
                self.buf[POST_BUF_LEN + slot] = v;
            }
            self.vhgh += 1;
        }
        if self.vhgh - self.vlow > POST_BUF_LEN as u64 {
            self.vlow = self.vhgh - POST_BUF_LEN as u64;
        }
        Ok(())
    }
}

/// Narrow a cache run sharing `pos` prefix bases to the sub-run whose base
/// at `pos` equals `b`. The base is non-decreasing across the run.
fn narrow(cache: &[u8], kbyte: usize, lo: usize, hi: usize, pos: usize, b: u8) -> (usize, usize) {
    let base = |i: usize| base_at(&cache[i * kbyte..(i + 1) * kbyte], pos);
    let mut l = lo;
    let mut r = hi;
    while l < r {
        let m = (l + r) / 2;
        if base(m) < b {
            l = m + 1;
        } else {
            r = m;
        }
    }
    let nlo = l;
    let mut r = hi;
    while l < r {
        let m = (l + r) / 2;
        if base(m) <= b {
            l = m + 1;
        } else {
            r = m;
        }
    }
    (nlo, l)
}

/// Run the merge over worker `worker`'s shard rows, appending pair records
/// to `sinks[2·part + family]` and returning the per-(family, a-contig)
/// seed counts.
#[allow(clippy::too_many_arguments)]
pub fn merge_worker(
    cfg: &RunConfig,
    layout: &SeedLayout,
    idx1: &GenomeIndex,
    idx2: &GenomeIndex,
    select: &[usize],
    worker: usize,
    sinks: &mut [BufWriter<File>],
    stats: &MergeStats,
) -> Result<SeedCounts> {
    let nsqrt = idx1.nsqrt;
    let s0 = worker * nsqrt;
    let s1 = s0 + nsqrt;
    let k = layout.kmer as usize;
    let kbyte = idx2.kbyte;
    let nc1 = idx1.assembly.ncontigs();

    let mut t1 = idx1.ktab_stream(s0, s1)?;
    let mut t2 = idx2.ktab_stream(s0, s1)?;
    let mut p1 = idx1.post_stream()?;
    p1.seek(idx1.post_base(s0))?;
    let mut pbuf = PostBuf::new(idx2.post_stream()?, cfg.freq);

    // Cache of second-table entries sharing the current panel prefix, with
    // cumulative position counts mapping cache runs onto the position list.
    let mut cache: Vec<u8> = Vec::new();
    let mut coff: Vec<u64> = Vec::new();
    let mut cache_panel: i32 = -1;
    let mut t2_live = t2.advance()?;
    let mut p2base = idx2.post_base(s0);

    // runs[i] = cache run matching the current k-mer to MIN_PLEN + i bases.
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut apos: Vec<u64> = Vec::new();
    let mut counts: SeedCounts = [vec![0u64; nc1], vec![0u64; nc1]];
    let mut rec = vec![0u8; layout.pair_width];

    while t1.advance()? {
        let cnt1 = t1.count();
        let pan = t1.panel() as i32;
        if pan != cache_panel {
            // Skip-load: walk T2 past every smaller panel, accumulating
            // position counts so the position list is jumped once.
            while t2_live && (t2.panel() as i32) < pan {
                p2base += t2.count() as u64;
                t2_live = t2.advance()?;
            }
            cache.clear();
            coff.clear();
            coff.push(p2base);
            while t2_live && t2.panel() as i32 == pan {
                cache.extend_from_slice(t2.kmer());
                p2base += t2.count() as u64;
                coff.push(p2base);
                t2_live = t2.advance()?;
            }
            cache_panel = pan;
            runs.clear();
        } else {
            // Runs up to the stored lcp still match this entry.
            let lcp1 = t1.lcp();
            let keep = if lcp1 == 0xFF {
                0
            } else {
                (lcp1 as usize).saturating_sub(MIN_PLEN - 1)
            };
            runs.truncate(keep);
        }

        let ncache = cache.len() / kbyte;
        let (mut lo, mut hi, mut l) = match runs.last() {
            Some(&(lo, hi)) => (lo, hi, MIN_PLEN + runs.len() - 1),
            None => (0, ncache, PANEL_BASES),
        };
        while l < k && lo < hi {
            let b = base_at(t1.kmer(), l);
            let (nlo, nhi) = narrow(&cache, kbyte, lo, hi, l, b);
            if nlo == nhi {
                break;
            }
            lo = nlo;
            hi = nhi;
            l += 1;
            if l >= MIN_PLEN {
                runs.push((lo, hi));
            }
        }

        let mut emitted = false;
        if l >= MIN_PLEN && lo < hi {
            let freq = coff[hi] - coff[lo];
            if freq > 0 && freq <= cfg.freq as u64 {
                apos.clear();
                for _ in 0..cnt1 {
                    ensure!(p1.advance()?, "position list ended before its k-mer table");
                    apos.push(p1.entry());
                }
                let bslice = pbuf.slice(coff[lo], coff[hi])?;
                for &a_raw in &apos {
                    let (_apost, acont, aflag) = idx1.decode_post(a_raw);
                    let part = select[acont as usize];
                    for &b_raw in bslice {
                        let (_bpost, _bcont, bflag) = idx2.decode_post(b_raw);
                        let fam = (aflag != bflag) as usize;
                        layout.pack_pair(&mut rec, l as u8, a_raw, b_raw);
                        sinks[2 * part + fam]
                            .write_all(&rec)
                            .context("Failed to write seed scratch file")?;
                        counts[fam][acont as usize] += 1;
                    }
                }
                stats.record(l, cnt1 as u64 * freq, cnt1 as u64);
                emitted = true;
            }
        }
        if !emitted {
            for _ in 0..cnt1 {
                ensure!(p1.advance()?, "position list ended before its k-mer table");
            }
        }
    }

    for sink in sinks.iter_mut() {
        sink.flush().context("Failed to flush seed scratch file")?;
    }
    Ok(counts)
}
