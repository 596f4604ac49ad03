//! Seed shard re-import and sort.
//!
//! The merger's pair records for one (orientation family, contig part) are
//! re-imported into an in-memory array of fixed-width sort records, placed
//! directly into their a-contig bucket, then radix-sorted per bucket into
//! (b-contig, diagonal, a-post) order.

use anyhow::{ensure, Context, Result};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use crate::index::GenomeIndex;
use crate::seeds::record::{diagonal, SeedLayout};
use crate::types::Orient;

/// One sorted shard: every seed of a (family, part) pair, bucketed by
/// a-contig.
pub struct SortedShard {
    /// Sort records, `layout.swide` bytes each.
    pub data: Vec<u8>,
    /// A-contigs of this part, in bucket order.
    pub contigs: Vec<u32>,
    /// Record-index boundary of each a-contig bucket (`contigs.len() + 1`).
    pub bounds: Vec<u64>,
}

impl SortedShard {
    pub fn nrecs(&self) -> u64 {
        *self.bounds.last().unwrap_or(&0)
    }
}

/// Read the per-worker scratch files of one (family, part) shard set,
/// unlinking each after it is consumed, and return the sorted record array.
///
/// `counts[w][slot]` is the number of seeds worker `w` emitted for the
/// part's `slot`-th contig in this family (the merger's bucket counters).
pub fn import_and_sort(
    layout: &SeedLayout,
    idx1: &GenomeIndex,
    idx2: &GenomeIndex,
    orient: Orient,
    files: &[PathBuf],
    counts: &[Vec<u64>],
    part_contigs: &[u32],
) -> Result<SortedShard> {
    let swide = layout.swide;
    let nslots = part_contigs.len();
    let k = layout.kmer as u64;

    // Bucket layout: slot-major, worker-minor, so each file lands in
    // disjoint runs and buckets stay contiguous.
    let mut bounds = Vec::with_capacity(nslots + 1);
    let mut cursors = vec![vec![0u64; files.len()]; nslots];
    let mut acc = 0u64;
    for slot in 0..nslots {
        bounds.push(acc);
        for (w, wc) in counts.iter().enumerate() {
            cursors[slot][w] = acc;
            acc += wc[slot];
        }
    }
    bounds.push(acc);

    let mut slot_of = vec![usize::MAX; idx1.assembly.ncontigs()];
    for (slot, &c) in part_contigs.iter().enumerate() {
        slot_of[c as usize] = slot;
    }

    let mut data = vec![0u8; (acc as usize) * swide];
    let mut rec = vec![0u8; layout.pair_width];

    for (w, path) in files.iter().enumerate() {
        let file = File::open(path)
            .with_context(|| format!("Failed to open seed scratch file {}", path.display()))?;
        let mut reader = BufReader::with_capacity(1 << 20, file);
        loop {
            match reader.read_exact(&mut rec) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to read {}", path.display()))
                }
            }
            let (lcp, a_raw, b_raw) = layout.unpack_pair(&rec);
            let (mut apost, acont, aflag) = idx1.decode_post(a_raw);
            let (bpost, bcont, _bflag) = idx2.decode_post(b_raw);
            let blen = idx2.assembly.contig_len(bcont);
            debug_assert!(bpost <= blen, "b-post outside its contig");

            let diag = diagonal(orient, apost, bpost, blen);
            if orient == Orient::Normal && aflag {
                // Both k-mers were read on the reverse strand: the matched
                // prefix starts k - lcp into the forward window.
                apost += k - lcp as u64;
            }

            let slot = slot_of[acont as usize];
            ensure!(slot != usize::MAX, "seed for a contig outside its part");
            let at = cursors[slot][w];
            ensure!(at < bounds[slot + 1], "seed scratch file longer than its counters");
            cursors[slot][w] += 1;
            let off = (at as usize) * swide;
            layout.pack_sort(&mut data[off..off + swide], lcp, apost, diag, bcont);
        }
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to unlink {}", path.display()))?;
    }
    for slot in 0..nslots {
        let end = cursors[slot].last().copied().unwrap_or(bounds[slot + 1]);
        ensure!(
            end == bounds[slot + 1],
            "seed scratch files shorter than their counters"
        );
    }

    // Sort each a-contig bucket independently.
    let key_offsets = layout.sort_key_offsets();
    let mut regions: Vec<&mut [u8]> = Vec::with_capacity(nslots);
    let mut rest = data.as_mut_slice();
    for slot in 0..nslots {
        let width = ((bounds[slot + 1] - bounds[slot]) as usize) * swide;
        let (region, tail) = std::mem::take(&mut rest).split_at_mut(width);
        regions.push(region);
        rest = tail;
    }
    regions
        .into_par_iter()
        .for_each(|region| radix_sort(region, swide, &key_offsets));

    Ok(SortedShard {
        data,
        contigs: part_contigs.to_vec(),
        bounds,
    })
}

/// LSD radix sort of fixed-width records over the given key byte offsets,
/// least significant first. Constant key bytes are skipped.
pub(crate) fn radix_sort(data: &mut [u8], width: usize, key_offsets: &[usize]) {
    let n = data.len() / width;
    if n < 2 {
        return;
    }
    let mut aux = vec![0u8; data.len()];
    let mut flipped = false;
    for &ko in key_offsets {
        let scattered = if flipped {
            scatter_pass(&aux, data, width, ko)
        } else {
            scatter_pass(data, &mut aux, width, ko)
        };
        if scattered {
            flipped = !flipped;
        }
    }
    if flipped {
        data.copy_from_slice(&aux);
    }
}

/// One counting-sort pass on key byte `ko`. Returns `false` (no scatter)
/// when every record carries the same byte.
fn scatter_pass(src: &[u8], dst: &mut [u8], width: usize, ko: usize) -> bool {
    let n = src.len() / width;
    let mut counts = [0usize; 256];
    for i in 0..n {
        counts[src[i * width + ko] as usize] += 1;
    }
    if counts.iter().any(|&c| c == n) {
        return false;
    }
    let mut offsets = [0usize; 256];
    let mut acc = 0usize;
    for (o, &c) in offsets.iter_mut().zip(counts.iter()) {
        *o = acc;
        acc += c;
    }
    for i in 0..n {
        let rec = &src[i * width..(i + 1) * width];
        let b = rec[ko] as usize;
        let at = offsets[b];
        offsets[b] += 1;
        dst[at * width..(at + 1) * width].copy_from_slice(rec);
    }
    true
}
