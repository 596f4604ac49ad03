//! Test-only writer for tiny index trees.
//!
//! Builds the `.ktab`/`.post`/`.dam`/`.bps` family for a handful of short
//! contigs so the merge, sort, and chain stages can be exercised without the
//! external index builder.

use anyhow::{ensure, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::index::{ktab, post};
use crate::types::{bytes_for, panel_of, NPANELS};

/// A genome given as 2-bit base codes per contig.
pub struct TestGenome {
    pub contigs: Vec<Vec<u8>>,
}

impl TestGenome {
    pub fn from_strs(contigs: &[&str]) -> TestGenome {
        TestGenome {
            contigs: contigs
                .iter()
                .map(|s| s.bytes().map(base_code).collect())
                .collect(),
        }
    }
}

fn base_code(c: u8) -> u8 {
    match c {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => panic!("unexpected base {}", c as char),
    }
}

fn pack(bases: &[u8]) -> Vec<u8> {
    let mut packed = vec![0u8; bases.len().div_ceil(4)];
    for (i, &b) in bases.iter().enumerate() {
        packed[i >> 2] |= b << (6 - 2 * (i & 3));
    }
    packed
}

fn w32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn w64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a complete index for `genome` under `dir/name` and return the root
/// path the pipeline opens.
pub fn write_index(
    dir: &Path,
    name: &str,
    genome: &TestGenome,
    kmer: u32,
    nsqrt: usize,
    freq: u32,
) -> Result<PathBuf> {
    let root = dir.join(name);
    let k = kmer as usize;
    let kbyte = (k + 3) / 4;
    let nthr = nsqrt * nsqrt;
    ensure!(NPANELS % nthr == 0, "shard grid must divide the panel space");
    let panels_per_shard = NPANELS / nthr;

    // Enumerate every k-mer window on both strands. Positions are always
    // forward-strand start coordinates; the flag says which strand the
    // k-mer was read on.
    let mut occs: Vec<(Vec<u8>, u32, u64, bool)> = Vec::new();
    for (ci, contig) in genome.contigs.iter().enumerate() {
        if contig.len() < k {
            continue;
        }
        for pos in 0..=(contig.len() - k) {
            let window = &contig[pos..pos + k];
            occs.push((pack(window), ci as u32, pos as u64, false));
            let mut rc = window.to_vec();
            crate::types::reverse_complement(&mut rc);
            occs.push((pack(&rc), ci as u32, pos as u64, true));
        }
    }
    occs.sort();

    // Group into table entries.
    let mut entries: Vec<(Vec<u8>, Vec<(u32, u64, bool)>)> = Vec::new();
    for (packed, contig, pos, flag) in occs {
        match entries.last_mut() {
            Some((key, posts)) if *key == packed => posts.push((contig, pos, flag)),
            _ => entries.push((packed, vec![(contig, pos, flag)])),
        }
    }
    for (_, posts) in &entries {
        ensure!(posts.len() <= 255, "fixture k-mer count overflows the count byte");
    }

    let nctg = genome.contigs.len();
    let maxpos = genome.contigs.iter().map(|c| c.len() as u64).max().unwrap_or(0);
    let cbyte = bytes_for((nctg as u64 * 2).saturating_sub(1)).max(1);
    let pbyte = bytes_for(maxpos) + cbyte;
    let post_bits = 8 * (pbyte - cbyte);
    let flag_bit = 8 * cbyte - 1;

    // Shard boundaries over the panel space.
    let shard_of = |packed: &[u8]| panel_of(packed) as usize / panels_per_shard;
    let mut shard_nels = vec![0u64; nthr];
    let mut post_shard_nels = vec![0u64; nthr];
    for (packed, posts) in &entries {
        let s = shard_of(packed);
        shard_nels[s] += 1;
        post_shard_nels[s] += posts.len() as u64;
    }
    let mut neps = Vec::with_capacity(nthr);
    let mut acc = 0u64;
    for p in 0..nthr {
        acc += post_shard_nels[p];
        neps.push(acc);
    }

    // Stubs.
    let mut w = BufWriter::new(File::create(super::suffixed(&root, ".ktab"))?);
    w32(&mut w, kmer)?;
    w32(&mut w, nsqrt as u32)?;
    w32(&mut w, freq)?;
    w64(&mut w, entries.len() as u64)?;
    for &n in &shard_nels {
        w64(&mut w, n)?;
    }
    w.flush()?;

    let mut w = BufWriter::new(File::create(super::suffixed(&root, ".post"))?);
    w32(&mut w, pbyte as u32)?;
    w32(&mut w, cbyte as u32)?;
    w32(&mut w, nsqrt as u32)?;
    w64(&mut w, maxpos)?;
    w32(&mut w, freq)?;
    w32(&mut w, nctg as u32)?;
    for ci in 0..nctg {
        w32(&mut w, ci as u32)?;
    }
    for &n in &neps {
        w64(&mut w, n)?;
    }
    w.flush()?;

    // Shards.
    let mut idx = 0usize;
    for p in 0..nthr {
        let mut kw = BufWriter::new(File::create(super::shard_path(&root, ".ktab", p))?);
        w32(&mut kw, kmer)?;
        w32(&mut kw, freq)?;
        w64(&mut kw, shard_nels[p])?;

        let mut pw = BufWriter::new(File::create(super::shard_path(&root, ".post", p))?);
        w64(&mut pw, post_shard_nels[p])?;

        let mut prev: Option<&[u8]> = None;
        for _ in 0..shard_nels[p] {
            let (packed, posts) = &entries[idx];
            idx += 1;
            let lcp = match prev {
                None => 0xFF,
                Some(prev) => {
                    let mut l = 0u8;
                    while (l as usize) < k
                        && crate::types::base_at(prev, l as usize)
                            == crate::types::base_at(packed, l as usize)
                    {
                        l += 1;
                    }
                    l
                }
            };
            prev = Some(packed);

            kw.write_all(packed)?;
            kw.write_all(&[posts.len() as u8, lcp])?;

            for &(contig, pos, flag) in posts {
                let raw = (((contig as u64) | ((flag as u64) << flag_bit)) << post_bits) | pos;
                let mut buf = vec![0u8; pbyte];
                crate::types::put_le(&mut buf, pbyte, raw);
                pw.write_all(&buf)?;
            }
        }
        kw.flush()?;
        pw.flush()?;
    }
    debug_assert_eq!(idx, entries.len());

    // Assembly.
    let mut gw = BufWriter::new(File::create(super::suffixed(&root, ".dam"))?);
    w32(&mut gw, nctg as u32)?;
    let mut boff = 0u64;
    for contig in &genome.contigs {
        w64(&mut gw, contig.len() as u64)?;
        w64(&mut gw, boff)?;
        boff += contig.len().div_ceil(4) as u64;
    }
    gw.flush()?;

    let mut bw = BufWriter::new(File::create(super::suffixed(&root, ".bps"))?);
    for contig in &genome.contigs {
        bw.write_all(&pack(contig))?;
    }
    bw.flush()?;

    // Keep the shard header constants honest.
    debug_assert_eq!(ktab::SHARD_HEADER, 16);
    debug_assert_eq!(post::SHARD_HEADER, 8);

    Ok(root)
}
