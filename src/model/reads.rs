// Copyright 2016-2019 Tony Kuo.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::Path;

use anyhow::{Context, Result};
use bio::stats::LogProb;
use itertools::Itertools;
use rust_htslib::bam::record::Aux;
use rust_htslib::bam::{self, Read as BamRead};

/// Highest quality value representable in the probability tables.
pub const MAX_QUAL: u8 = 49;

/// Filtering and decoding policy for BAM fetches.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOptions {
    /// Primary alignments only.
    pub pao: bool,
    /// Ignore soft-clipped bases.
    pub isc: bool,
    /// Ignore marked duplicates.
    pub nodup: bool,
    /// Derive splice positions from RNA-seq N operations.
    pub splice: bool,
    /// Quality scores are phred64 encoded.
    pub phred64: bool,
}

/// A decoded alignment record, scoped to one hypothesis-set evaluation.
#[derive(Clone, Debug)]
pub struct Read {
    pub name: String,
    pub tid: i32,
    pub chrom: String,
    /// 0-based leftmost position, soft-clip compensated unless `isc`.
    pub pos: i64,
    /// End of the aligned span (all non-insertion operations).
    pub end: i64,
    /// Number of bases kept after the soft-clip policy.
    pub length: usize,
    /// Query length inferred from the CIGAR.
    pub inferred_length: i64,
    /// Uppercase IUPAC bases.
    pub seq: Vec<u8>,
    /// Phred qualities, clamped to the table range.
    pub qual: Vec<u8>,
    pub cigar: Vec<(u32, char)>,
    /// Read indices at which a reference jump applies (N operations).
    pub splice_pos: Vec<i64>,
    /// Jump lengths, aligned with `splice_pos`.
    pub splice_offset: Vec<i64>,
    pub flag: u16,
    pub is_dup: bool,
    pub is_reverse: bool,
    pub is_secondary: bool,
    pub is_read2: bool,
    /// Secondary alignments as reported by the mapper.
    pub xa: Option<String>,
    /// Number of reported hits.
    pub nh: i64,
    // scratch recording the best-scoring combination for this read
    pub prgu: LogProb,
    pub prgv: LogProb,
    pub pout: LogProb,
    pub best_set: usize,
}

impl Read {
    /// A plain full-length match at `pos`, mainly useful for tests.
    pub fn new(name: &str, chrom: &str, pos: i64, seq: &[u8], qual: &[u8]) -> Self {
        assert_eq!(seq.len(), qual.len());
        Read {
            name: name.to_owned(),
            tid: 0,
            chrom: chrom.to_owned(),
            pos,
            end: pos + seq.len() as i64,
            length: seq.len(),
            inferred_length: seq.len() as i64,
            seq: seq.to_ascii_uppercase(),
            qual: qual.to_vec(),
            cigar: vec![(seq.len() as u32, 'M')],
            splice_pos: Vec::new(),
            splice_offset: Vec::new(),
            flag: 0,
            is_dup: false,
            is_reverse: false,
            is_secondary: false,
            is_read2: false,
            xa: None,
            nh: 1,
            prgu: LogProb::ln_zero(),
            prgv: LogProb::ln_zero(),
            pout: LogProb::ln_zero(),
            best_set: 0,
        }
    }

    pub fn cigar_string(&self) -> String {
        self.cigar
            .iter()
            .map(|(len, op)| format!("{}{}", len, op))
            .collect()
    }

    pub fn flag_string(&self) -> String {
        const NAMES: [(u16, &str); 12] = [
            (0x1, "PAIRED"),
            (0x2, "PROPER_PAIR"),
            (0x4, "UNMAP"),
            (0x8, "MUNMAP"),
            (0x10, "REVERSE"),
            (0x20, "MREVERSE"),
            (0x40, "READ1"),
            (0x80, "READ2"),
            (0x100, "SECONDARY"),
            (0x200, "QCFAIL"),
            (0x400, "DUP"),
            (0x800, "SUPPLEMENTARY"),
        ];
        let s = NAMES
            .iter()
            .filter(|(bit, _)| self.flag & bit != 0)
            .map(|(_, name)| *name)
            .join(",");
        if s.is_empty() {
            "NONE".to_owned()
        } else {
            s
        }
    }
}

fn consumes_query(op: char) -> bool {
    matches!(op, 'M' | 'I' | 'S' | '=' | 'X')
}

/// Decode one BAM record according to the fetch policy. Returns `None` for
/// records that are unmapped or filtered out.
fn decode(record: &bam::Record, chrom: &str, opts: ReadOptions) -> Option<Read> {
    if record.tid() < 0 || record.is_unmapped() {
        return None;
    }
    let is_dup = record.is_duplicate();
    let is_secondary = record.is_secondary() || record.is_supplementary();
    if (opts.nodup && is_dup) || (opts.pao && is_secondary) {
        return None;
    }

    let mut pos = record.pos();
    let mut end = pos;
    let mut start_align = false;
    let mut s_offset = 0usize; // leading soft clip
    let mut e_offset = 0usize; // trailing soft clip
    let mut qpos = 0i64; // query bases consumed, for splice positions
    let mut inferred_length = 0i64;
    let mut cigar = Vec::new();
    let mut splice_pos = Vec::new();
    let mut splice_offset = Vec::new();
    for op in record.cigar().iter() {
        let len = op.len() as i64;
        let ch = op.char();
        cigar.push((op.len(), ch));

        match ch {
            'M' | '=' | 'X' => start_align = true,
            'S' if !start_align => s_offset = len as usize,
            'S' => e_offset = len as usize,
            _ => {}
        }
        if opts.splice && ch == 'N' {
            splice_pos.push(if opts.isc { qpos - s_offset as i64 } else { qpos });
            splice_offset.push(len);
        }
        if consumes_query(ch) {
            qpos += len;
            inferred_length += len;
        }
        if ch != 'I' {
            end += len;
        }
    }

    if !opts.isc {
        // compensate for the soft clip in the mapped position
        pos -= s_offset as i64;
        s_offset = 0;
        e_offset = 0;
    } else {
        end -= e_offset as i64;
    }

    let seq_bytes = record.seq().as_bytes();
    let qual_bytes = record.qual();
    let length = record.seq_len().saturating_sub(s_offset + e_offset);
    let mut seq = Vec::with_capacity(length);
    let mut qual = Vec::with_capacity(length);
    for i in 0..length {
        seq.push(seq_bytes[i + s_offset].to_ascii_uppercase());
        let q = i64::from(qual_bytes[i + s_offset]) - if opts.phred64 { 31 } else { 0 };
        qual.push(q.max(0).min(i64::from(MAX_QUAL)) as u8);
    }

    let xa = match record.aux(b"XA") {
        Ok(Aux::String(s)) => Some(s.to_owned()),
        _ => None,
    };
    let nh = match record.aux(b"NH") {
        Ok(aux) => aux_integer(&aux).unwrap_or(1),
        Err(_) => 1,
    };

    Some(Read {
        name: String::from_utf8_lossy(record.qname()).into_owned(),
        tid: record.tid(),
        chrom: chrom.to_owned(),
        pos,
        end,
        length,
        inferred_length,
        seq,
        qual,
        cigar,
        splice_pos,
        splice_offset,
        flag: record.flags(),
        is_dup,
        is_reverse: record.is_reverse(),
        is_secondary,
        is_read2: record.is_last_in_template(),
        xa,
        nh,
        prgu: LogProb::ln_zero(),
        prgv: LogProb::ln_zero(),
        pout: LogProb::ln_zero(),
        best_set: 0,
    })
}

fn aux_integer(aux: &Aux) -> Option<i64> {
    match *aux {
        Aux::I8(v) => Some(i64::from(v)),
        Aux::U8(v) => Some(i64::from(v)),
        Aux::I16(v) => Some(i64::from(v)),
        Aux::U16(v) => Some(i64::from(v)),
        Aux::I32(v) => Some(i64::from(v)),
        Aux::U32(v) => Some(i64::from(v)),
        _ => None,
    }
}

/// Fetch and decode the reads overlapping `(pos1, pos2)` (1-based, inclusive).
///
/// Each call opens its own handle; BAM indexes are not safely shareable
/// across threads, so the handle and iterator live only for this fetch.
/// A contig absent from the BAM header yields an empty window.
pub fn fetch_reads(
    bam_path: &Path,
    chrom: &str,
    pos1: i64,
    pos2: i64,
    opts: ReadOptions,
) -> Result<Vec<Read>> {
    let mut bam = bam::IndexedReader::from_path(bam_path)
        .with_context(|| format!("failed to open BAM file {}", bam_path.display()))?;
    let tid = match bam.header().tid(chrom.as_bytes()) {
        Some(tid) => tid,
        None => return Ok(Vec::new()),
    };
    bam.fetch((tid as i32, pos1 - 1, pos2))?;

    let mut reads = Vec::new();
    for result in bam.records() {
        let record = result?;
        if let Some(read) = decode(&record, chrom, opts) {
            reads.push(read);
        }
    }
    Ok(reads)
}

/// End of the rightmost read overlapping `(pos1, pos2)`: the maximum
/// `pos + l_qseq` over the window, or `None` when no read overlaps.
pub fn last_aligned_end(
    bam_path: &Path,
    chrom: &str,
    pos1: i64,
    pos2: i64,
) -> Result<Option<i64>> {
    let mut bam = bam::IndexedReader::from_path(bam_path)
        .with_context(|| format!("failed to open BAM file {}", bam_path.display()))?;
    let tid = match bam.header().tid(chrom.as_bytes()) {
        Some(tid) => tid,
        None => return Ok(None),
    };
    bam.fetch((tid as i32, pos1 - 1, pos2))?;

    let mut last = None;
    for result in bam.records() {
        let record = result?;
        let end = record.pos() + record.seq_len() as i64;
        if last.map_or(true, |e| end > e) {
            last = Some(end);
        }
    }
    Ok(last)
}
