// Copyright 2016-2019 Tony Kuo.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-hypothesis-set evaluation and the worker pool driving it: enumerate
//! allele combinations, score every overlapping read under each hypothesis,
//! mix in the paralogous and heterozygous models, and aggregate marginal or
//! maximum-likelihood calls.

use std::collections::BinaryHeap;
use std::f64::consts::{LN_10, LN_2};
use std::fmt::Write as FmtWrite;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use bio::stats::LogProb;
use itertools::Itertools;
use lazy_static::lazy_static;
use log::info;
use ordered_float::NotNan;
use regex::Regex;

use crate::model::likelihood::{self, QualModel, ReadProbMatrix};
use crate::model::reads::{self, Read, ReadOptions};
use crate::model::{self, GroupMode, Variant};
use crate::reference;
use crate::utils;

lazy_static! {
    // heterozygous allele-frequency mixture weights
    static ref LOG_50: LogProb = LogProb(0.5f64.ln());
    static ref LOG_10: LogProb = LogProb(0.1f64.ln());
    static ref LOG_90: LogProb = LogProb(0.9f64.ln());
    // one secondary alignment locus, e.g. chr8,+42860367,97M3S,3
    static ref XA_ENTRY: Regex =
        Regex::new("(?P<chrom>[^,;]+),(?P<pos>[+-]?[0-9]+),(?:[0-9]+[MIDNSHP=X])+,[0-9]+")
            .unwrap();
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub group_mode: GroupMode,
    pub reads: ReadOptions,
    pub nthread: usize,
    /// Maximum number of combinations scored per hypothesis set.
    pub maxh: usize,
    /// Report the maximum likelihood hypothesis instead of marginals.
    pub mvh: bool,
    pub verbose: bool,
    /// Accepted for compatibility; the SNV fast path already avoids
    /// materialising alternative sequences.
    pub lowmem: bool,
    pub bisulfite: bool,
    pub dp: bool,
    pub gap_op: f64,
    pub gap_ex: f64,
    /// Prior bias towards non-homozygous alternative hypotheses.
    pub hetbias: f64,
    /// Prior probability that a read originates outside the reference.
    pub omega: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            group_mode: GroupMode::Distance {
                distlim: 10,
                maxdist: 0,
            },
            reads: ReadOptions::default(),
            nthread: 1,
            maxh: 1024,
            mvh: false,
            verbose: false,
            lowmem: false,
            bisulfite: false,
            dp: false,
            gap_op: 6.0,
            gap_ex: 1.0,
            hetbias: 0.5,
            omega: 1e-5,
        }
    }
}

/// Per-combination accumulators over the read window.
struct Stats {
    combo: Vec<usize>,
    /// ln P(read | alt or het) per read, aligned with the window; -inf for
    /// reads that do not span the combination.
    read_prgv: Vec<LogProb>,
    prob_ref: LogProb,
    prob_alt: LogProb,
    prob_het: LogProb,
    /// `ln_add_exp(alt, het)`: all alt-supporting evidence.
    prob_mut: LogProb,
    ref_count: u32,
    alt_count: u32,
    seen: u32,
}

impl Stats {
    fn new(combo: Vec<usize>, nreads: usize) -> Self {
        Stats {
            combo,
            read_prgv: Vec::with_capacity(nreads),
            prob_ref: LogProb::ln_one(),
            prob_alt: LogProb::ln_one(),
            prob_het: LogProb::ln_one(),
            prob_mut: LogProb::ln_one(),
            ref_count: 0,
            alt_count: 0,
            seen: 0,
        }
    }
}

/// The maximum over allele frequencies {0.5, 0.1, 0.9} of the explicit
/// heterozygous mixture ln(mu e^v + (1-mu) e^u).
fn het_mixture(prgu: LogProb, prgv: LogProb) -> LogProb {
    let mut phet = (*LOG_50 + prgv).ln_add_exp(*LOG_50 + prgu);
    let phet10 = (*LOG_10 + prgv).ln_add_exp(*LOG_90 + prgu);
    let phet90 = (*LOG_90 + prgv).ln_add_exp(*LOG_10 + prgu);
    if phet10 > phet {
        phet = phet10;
    }
    if phet90 > phet {
        phet = phet90;
    }
    phet
}

/// Neighbor combinations: append each not-yet-included variant index greater
/// than the last element, so combinations stay sorted and are derived
/// exactly once.
fn derive_combos(combo: &[usize], n: usize) -> Vec<Vec<usize>> {
    let last = *combo.last().unwrap();
    ((last + 1)..n)
        .map(|j| {
            let mut c = combo.to_vec();
            c.push(j);
            c
        })
        .collect()
}

fn merge(acc: Option<LogProb>, p: LogProb) -> Option<LogProb> {
    Some(match acc {
        None => p,
        Some(a) => a.ln_add_exp(p),
    })
}

/// The evaluation engine: immutable tables, priors and flags, shared by all
/// worker threads.
pub struct Caller {
    bam: PathBuf,
    reference: Arc<reference::Buffer>,
    settings: Settings,
    quals: QualModel,
    ref_prior: LogProb,
    alt_prior: LogProb,
    het_prior: LogProb,
    lg_omega: f64,
}

impl Caller {
    pub fn new(bam: PathBuf, reference: Arc<reference::Buffer>, settings: Settings) -> Self {
        let ref_prior = LogProb(0.5f64.ln());
        let alt_prior = LogProb((0.5 * (1.0 - settings.hetbias)).ln());
        let het_prior = LogProb((0.5 * settings.hetbias).ln());
        let lg_omega = settings.omega.ln() - (1.0 - settings.omega).ln();
        Caller {
            bam,
            reference,
            settings,
            quals: QualModel::new(),
            ref_prior,
            alt_prior,
            het_prior,
            lg_omega,
        }
    }

    /// Group the candidate list, evaluate every hypothesis set on a pool of
    /// worker threads and write the naturally sorted result lines.
    pub fn process(&self, var_list: &[Variant], out: &mut dyn Write) -> Result<()> {
        let var_sets = model::group_variants(var_list, self.settings.group_mode, &self.bam)?;
        match self.settings.group_mode {
            GroupMode::ShareFirst => {
                info!("Variants with shared reads to first in set: {} entries", var_sets.len())
            }
            GroupMode::ShareAny => {
                info!("Variants with shared reads to any in set: {} entries", var_sets.len())
            }
            GroupMode::Distance { distlim, maxdist } => info!(
                "Variants within {} (max window: {}) bp: {} entries",
                distlim,
                maxdist,
                var_sets.len()
            ),
        }
        info!("Start: {} threads on {}", self.settings.nthread, self.bam.display());

        let total = var_sets.len();
        let queue = Mutex::new(var_sets);
        let results = Mutex::new(Vec::with_capacity(total));

        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.settings.nthread.max(1))
                .map(|_| scope.spawn(|| self.worker(&queue, &results, total)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("worker thread panicked"))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut results = results.into_inner().unwrap();
        results.sort_by(|a, b| utils::natural_cmp(a, b));
        writeln!(out, "# SEQ\tPOS\tREF\tALT\tReads\tRefReads\tAltReads\tProb\tOdds\tSet")?;
        for line in &results {
            out.write_all(line.as_bytes())?;
        }
        out.flush()?;
        info!("Done: {}", self.bam.display());
        Ok(())
    }

    fn worker(
        &self,
        queue: &Mutex<Vec<Vec<Variant>>>,
        results: &Mutex<Vec<String>>,
        total: usize,
    ) -> Result<()> {
        let chunk = total / 10;
        loop {
            let set = queue.lock().unwrap().pop();
            let set = match set {
                Some(set) => set,
                None => return Ok(()),
            };
            if let Some(outstr) = self.evaluate(&set)? {
                let mut results = results.lock().unwrap();
                if !self.settings.verbose
                    && chunk > 10
                    && results.len() > 10
                    && results.len() % chunk == 0
                {
                    info!("Progress: {} / {}", results.len(), total);
                }
                results.push(outstr);
            }
        }
    }

    /// Evaluate one hypothesis set against its read window. An empty window
    /// is not an error; the set is skipped.
    fn evaluate(&self, set: &[Variant]) -> Result<Option<String>> {
        let refseq = self.reference.seq(&set[0].chrom)?;
        let reads = reads::fetch_reads(
            &self.bam,
            &set[0].chrom,
            set[0].pos,
            set[set.len() - 1].pos,
            self.settings.reads,
        )?;
        if reads.is_empty() {
            return Ok(None);
        }
        self.evaluate_reads(set, &refseq, reads).map(Some)
    }

    /// Enumerate combinations: every singleton, then the most promising
    /// frontier first until `maxh` combinations have been scored.
    fn enumerate_stats(
        &self,
        set: &[Variant],
        refseq: &[u8],
        reads: &mut [Read],
    ) -> Result<Vec<Stats>> {
        let mut stats = Vec::new();
        for i in 0..set.len() {
            let mut stat = Stats::new(vec![i], reads.len());
            self.calc_likelihood(&mut stat, set, refseq, reads, stats.len())?;
            stats.push(stat);
        }
        if set.len() > 1 {
            let mut heap: BinaryHeap<(NotNan<f64>, usize)> = BinaryHeap::new();
            for (i, stat) in stats.iter().enumerate() {
                heap.push((NotNan::new(*stat.prob_mut).unwrap(), i));
            }
            'frontier: loop {
                if stats.len() >= self.settings.maxh {
                    break;
                }
                let seti = match heap.pop() {
                    Some((_, seti)) => seti,
                    None => break,
                };
                for combo in derive_combos(&stats[seti].combo, set.len()) {
                    if stats.len() >= self.settings.maxh {
                        break 'frontier;
                    }
                    let mut stat = Stats::new(combo, reads.len());
                    self.calc_likelihood(&mut stat, set, refseq, reads, stats.len())?;
                    heap.push((NotNan::new(*stat.prob_mut).unwrap(), stats.len()));
                    stats.push(stat);
                }
            }
        }
        Ok(stats)
    }

    fn evaluate_reads(
        &self,
        set: &[Variant],
        refseq: &[u8],
        mut reads: Vec<Read>,
    ) -> Result<String> {
        let nreads = reads.len();
        let stats = self.enumerate_stats(set, refseq, &mut reads)?;

        // combinations best explaining at least 10% of the reads are
        // haplotype candidates for the non-reference mixture
        let mut votes = vec![0usize; stats.len()];
        for read in &reads {
            if read.prgv > LogProb::ln_zero() {
                votes[read.best_set] += 1;
            }
        }
        let haplotypes: Vec<usize> = (0..stats.len())
            .filter(|&i| votes[i] as f64 / nreads as f64 >= 0.1)
            .collect();
        let pairs: Vec<(usize, usize)> = haplotypes.iter().copied().tuple_combinations().collect();

        let mut prhap = Vec::with_capacity(pairs.len());
        for &(x, y) in &pairs {
            let mut p = LogProb::ln_one();
            for readi in 0..nreads {
                let px = stats[x].read_prgv[readi];
                let py = stats[y].read_prgv[readi];
                if px == LogProb::ln_zero() && py == LogProb::ln_zero() {
                    continue;
                }
                // equal prior to ref: this assumes heterozygous non-reference
                p = p + het_mixture(px, py);
            }
            prhap.push(p);
        }

        let mut total = LogProb::ln_zero();
        for stat in &stats {
            total = total.ln_add_exp(stat.prob_ref).ln_add_exp(stat.prob_mut);
        }
        for &p in &prhap {
            total = total.ln_add_exp(p);
        }

        let mut output = String::new();
        if self.settings.mvh {
            // the single combination with the highest evidence ratio
            let mut max_seti = 0;
            let mut best = stats[0].prob_mut - stats[0].prob_ref;
            for (seti, stat) in stats.iter().enumerate().skip(1) {
                let r = stat.prob_mut - stat.prob_ref;
                if r > best {
                    best = r;
                    max_seti = seti;
                }
            }
            let stat = &stats[max_seti];
            let combo_vars: Vec<Variant> =
                stat.combo.iter().map(|&vi| set[vi].clone()).collect();
            write_variant(
                &mut output,
                &combo_vars,
                0,
                i64::from(stat.seen),
                i64::from(stat.ref_count),
                i64::from(stat.alt_count),
                total.ln_add_exp(stat.prob_ref),
                stat.prob_mut,
                stat.prob_ref,
            );
        } else {
            // marginal probabilities and likelihood ratios per variant
            for i in 0..set.len() {
                let mut has_alt: Option<LogProb> = None;
                let mut not_alt: Option<LogProb> = None;
                let mut seen = -1i64;
                let mut acount = -1i64;
                let mut rcount = -1i64;
                for stat in &stats {
                    let r = stat.prob_mut - stat.prob_ref;
                    if stat.combo.binary_search(&i).is_ok() {
                        has_alt = merge(has_alt, r);
                        if i64::from(stat.seen) > seen {
                            seen = i64::from(stat.seen);
                        }
                        if i64::from(stat.alt_count) > acount {
                            acount = i64::from(stat.alt_count);
                            rcount = i64::from(stat.ref_count);
                        }
                    } else {
                        not_alt = merge(not_alt, r);
                    }
                }
                for (pi, &(x, y)) in pairs.iter().enumerate() {
                    let covers = stats[x].combo.binary_search(&i).is_ok()
                        || stats[y].combo.binary_search(&i).is_ok();
                    if covers {
                        has_alt = merge(has_alt, prhap[pi]);
                    } else {
                        not_alt = merge(not_alt, prhap[pi]);
                    }
                }
                write_variant(
                    &mut output,
                    set,
                    i,
                    seen,
                    rcount,
                    acount,
                    total,
                    has_alt.unwrap_or_else(LogProb::ln_one),
                    not_alt.unwrap_or_else(LogProb::ln_one),
                );
            }
        }

        if self.settings.verbose {
            self.write_verbose(&reads, &stats, set);
        }
        Ok(output)
    }

    /// Score one combination over the read window.
    fn calc_likelihood(
        &self,
        stat: &mut Stats,
        set: &[Variant],
        refseq: &[u8],
        reads: &mut [Read],
        seti: usize,
    ) -> Result<()> {
        let has_indel = stat.combo.iter().any(|&vi| set[vi].is_indel());
        let altseq = if has_indel || self.settings.dp {
            Some(likelihood::construct_altseq(refseq, &stat.combo, set)?)
        } else {
            None
        };

        let first = set[stat.combo[0]].pos;
        let last = set[*stat.combo.last().unwrap()].pos;

        for read in reads.iter_mut() {
            // the read must cross all variants in the combination
            if read.pos > first || read.end < last {
                stat.read_prgv.push(LogProb::ln_zero());
                continue;
            }
            stat.seen += 1;

            let matrix =
                ReadProbMatrix::new(read, &self.quals, self.settings.dp, self.settings.bisulfite);
            let elsewhere = likelihood::prob_elsewhere(&matrix, read.inferred_length);

            let (mut prgu, mut prgv) = if has_indel {
                let alt = altseq.as_ref().unwrap();
                (
                    likelihood::prob_anchored(
                        &matrix,
                        refseq,
                        read.pos,
                        &read.splice_pos,
                        &read.splice_offset,
                    ),
                    likelihood::prob_anchored(
                        &matrix,
                        alt,
                        read.pos,
                        &read.splice_pos,
                        &read.splice_offset,
                    ),
                )
            } else if self.settings.dp {
                let alt = altseq.as_ref().unwrap();
                (
                    likelihood::prob_dp(
                        &matrix,
                        refseq,
                        read.pos,
                        &read.splice_pos,
                        &read.splice_offset,
                        self.settings.gap_op,
                        self.settings.gap_ex,
                    ),
                    likelihood::prob_dp(
                        &matrix,
                        alt,
                        read.pos,
                        &read.splice_pos,
                        &read.splice_offset,
                        self.settings.gap_op,
                        self.settings.gap_ex,
                    ),
                )
            } else {
                likelihood::prob_snps(
                    &matrix,
                    &stat.combo,
                    set,
                    refseq,
                    read.pos,
                    &read.splice_pos,
                    &read.splice_offset,
                )
            };
            let mut pout = elsewhere;

            if let Some(xa) = read.xa.clone() {
                // each reported secondary locus makes an outside origin more
                // likely; non-overlapping loci also explain the read itself,
                // under reference and alternative alike
                for entry in XA_ENTRY.captures_iter(&xa) {
                    pout = pout.ln_add_exp(elsewhere);
                    let xa_chrom = &entry["chrom"];
                    let xa_pos: i64 = entry["pos"].parse()?;
                    let locus = xa_pos.abs() - 1;
                    let overlaps =
                        xa_chrom == read.chrom && (locus - read.pos).abs() < read.length as i64;
                    if !overlaps {
                        let xa_seq = self.reference.seq(xa_chrom)?;
                        let p = if (xa_pos < 0) != read.is_reverse {
                            let rc = matrix.reverse_complement();
                            likelihood::prob_anchored(
                                &rc,
                                &xa_seq,
                                locus,
                                &read.splice_pos,
                                &read.splice_offset,
                            )
                        } else {
                            likelihood::prob_anchored(
                                &matrix,
                                &xa_seq,
                                locus,
                                &read.splice_pos,
                                &read.splice_offset,
                            )
                        };
                        prgu = prgu.ln_add_exp(p);
                        prgv = prgv.ln_add_exp(p);
                    }
                }
            } else if read.nh > 1 {
                // scale by the number of reported hits
                let n = ((read.nh - 1) as f64).ln();
                let readprobability = LogProb(*prgu + n);
                pout = pout.ln_add_exp(LogProb(*elsewhere + n));
                prgu = prgu.ln_add_exp(readprobability);
                prgv = prgv.ln_add_exp(readprobability);
            }

            // mixture with the outside-paralog prior
            let pout = LogProb(*pout + self.lg_omega);
            let prgu = pout.ln_add_exp(prgu);
            let prgv = pout.ln_add_exp(prgv);

            if prgv > read.prgv {
                read.best_set = seti;
                read.prgu = prgu;
                read.prgv = prgv;
                read.pout = pout;
            }

            let phet = het_mixture(prgu, prgv);

            let prgu = prgu + self.ref_prior;
            let prgv = prgv + self.alt_prior;
            let phet = phet + self.het_prior;
            stat.prob_ref = stat.prob_ref + prgu;
            stat.prob_alt = stat.prob_alt + prgv;
            stat.prob_het = stat.prob_het + phet;
            stat.read_prgv.push(prgv.ln_add_exp(phet));

            // count a read only when the hypotheses are unambiguous and the
            // winner beats the outside origin
            if prgv > prgu && *prgv - *prgu > LN_2 && *prgv - *pout > LN_2 {
                stat.alt_count += 1;
            } else if prgu > prgv && *prgu - *prgv > LN_2 && *prgu - *pout > LN_2 {
                stat.ref_count += 1;
            }
        }
        stat.prob_mut = stat.prob_alt.ln_add_exp(stat.prob_het);
        Ok(())
    }

    fn write_verbose(&self, reads: &[Read], stats: &[Stats], set: &[Variant]) {
        let stderr = io::stderr();
        for read in reads {
            if read.prgv == LogProb::ln_zero() {
                continue; // never scored by any combination
            }
            let mut handle = stderr.lock();
            let combo_str: String = stats[read.best_set]
                .combo
                .iter()
                .map(|&vi| {
                    let v = &set[vi];
                    format!("{},{},{},{};", v.chrom, v.pos, v.ref_allele, v.alt_allele)
                })
                .collect();
            let multimap = match &read.xa {
                Some(xa) => xa.clone(),
                None => read.nh.to_string(),
            };
            let _ = writeln!(
                handle,
                "{}\t{}\t{}\t{:.6}\t{:.6}\t{:.6}\t{}\t{}\t{}\t[{}]",
                read.name,
                read.chrom,
                read.pos,
                *read.prgu,
                *read.prgv,
                *read.pout,
                read.cigar_string(),
                multimap,
                read.flag_string(),
                combo_str
            );
        }
    }
}

fn write_variant(
    out: &mut String,
    var_set: &[Variant],
    i: usize,
    nreads: i64,
    not_alt_count: i64,
    has_alt_count: i64,
    total: LogProb,
    has_alt: LogProb,
    not_alt: LogProb,
) {
    let prob = (*has_alt - *total) / LN_10;
    let odds = (*has_alt - *not_alt) / LN_10;
    let v = &var_set[i];
    let _ = write!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:e}\t{:.6}\t",
        v.chrom, v.pos, v.ref_allele, v.alt_allele, nreads, not_alt_count, has_alt_count, prob, odds
    );
    out.push('[');
    if var_set.len() > 1 {
        for v in var_set {
            let _ = write!(out, "{},{},{},{};", v.chrom, v.pos, v.ref_allele, v.alt_allele);
        }
    }
    out.push_str("]\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write_test_fasta(dir: &Path, records: &[(&str, &str)]) -> PathBuf {
        let fasta_path = dir.join("ref.fa");
        let mut fasta = String::new();
        let mut fai = String::new();
        let mut offset = 0usize;
        for (name, seq) in records {
            fasta.push_str(&format!(">{}\n{}\n", name, seq));
            offset += name.len() + 2;
            fai.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                name,
                seq.len(),
                offset,
                seq.len(),
                seq.len() + 1
            ));
            offset += seq.len() + 1;
        }
        fs::write(&fasta_path, fasta).unwrap();
        fs::write(dir.join("ref.fa.fai"), fai).unwrap();
        fasta_path
    }

    fn test_caller(dir: &Path, records: &[(&str, &str)], settings: Settings) -> Caller {
        let fasta = write_test_fasta(dir, records);
        let reference = Arc::new(reference::Buffer::from_path(&fasta).unwrap());
        Caller::new(PathBuf::from("unused.bam"), reference, settings)
    }

    fn fields(line: &str) -> Vec<String> {
        line.trim_end().split('\t').map(String::from).collect()
    }

    fn read30(name: &str, pos: i64, seq: &[u8]) -> Read {
        Read::new(name, "chr1", pos, seq, &vec![30; seq.len()])
    }

    #[test]
    fn test_derive_combos_sorted_unique() {
        let combos = derive_combos(&[1], 4);
        assert_eq!(combos, vec![vec![1, 2], vec![1, 3]]);
        let combos = derive_combos(&[0, 2], 4);
        assert_eq!(combos, vec![vec![0, 2, 3]]);
        assert!(derive_combos(&[3], 4).is_empty());
    }

    #[test]
    fn test_enumerator_covers_all_subsets() {
        let dir = tempfile::tempdir().unwrap();
        let caller = test_caller(dir.path(), &[("chr1", "ACGTACGTAC")], Settings::default());
        let set = vec![
            Variant::new("chr1", 3, "G", "A"),
            Variant::new("chr1", 4, "T", "C"),
            Variant::new("chr1", 6, "C", "G"),
        ];
        let mut reads = vec![read30("r1", 0, b"ACGTACGTAC")];
        let stats = caller
            .enumerate_stats(&set, b"ACGTACGTAC", &mut reads)
            .unwrap();
        // all 2^3 - 1 nonempty subsets, each sorted ascending, no duplicates
        assert_eq!(stats.len(), 7);
        let mut combos: Vec<Vec<usize>> = stats.iter().map(|s| s.combo.clone()).collect();
        for combo in &combos {
            assert!(combo.windows(2).all(|w| w[0] < w[1]));
        }
        combos.sort();
        combos.dedup();
        assert_eq!(combos.len(), 7);
    }

    #[test]
    fn test_enumerator_bounded_by_maxh() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            maxh: 4,
            ..Settings::default()
        };
        let caller = test_caller(dir.path(), &[("chr1", "ACGTACGTAC")], settings);
        let set = vec![
            Variant::new("chr1", 3, "G", "A"),
            Variant::new("chr1", 4, "T", "C"),
            Variant::new("chr1", 6, "C", "G"),
        ];
        let mut reads = vec![read30("r1", 0, b"ACGTACGTAC")];
        let stats = caller
            .enumerate_stats(&set, b"ACGTACGTAC", &mut reads)
            .unwrap();
        assert_eq!(stats.len(), 4);
    }

    #[test]
    fn test_pure_reference_support() {
        let dir = tempfile::tempdir().unwrap();
        let caller = test_caller(dir.path(), &[("chr1", "ACGT")], Settings::default());
        let set = vec![Variant::new("chr1", 3, "G", "A")];
        let reads = vec![read30("r1", 0, b"ACGT")];
        let out = caller.evaluate_reads(&set, b"ACGT", reads).unwrap();
        let f = fields(&out);
        assert_eq!(&f[0..4], &["chr1", "3", "G", "A"]);
        assert_eq!(f[4], "1"); // reads seen
        assert_eq!(f[5], "1"); // ref reads
        assert_eq!(f[6], "0"); // alt reads
        let odds: f64 = f[8].parse().unwrap();
        assert!(odds < 0.0);
        assert_eq!(f[9], "[]");
    }

    #[test]
    fn test_pure_alt_support() {
        let dir = tempfile::tempdir().unwrap();
        let caller = test_caller(dir.path(), &[("chr1", "ACGT")], Settings::default());
        let set = vec![Variant::new("chr1", 3, "G", "A")];
        let reads = vec![read30("r1", 0, b"ACAT")];
        let out = caller.evaluate_reads(&set, b"ACGT", reads).unwrap();
        let f = fields(&out);
        assert_eq!(f[5], "0");
        assert_eq!(f[6], "1");
        let odds: f64 = f[8].parse().unwrap();
        assert!(odds > 0.0);
    }

    #[test]
    fn test_low_quality_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        let caller = test_caller(dir.path(), &[("chr1", "ACGT")], Settings::default());
        let set = vec![Variant::new("chr1", 3, "G", "A")];
        let reads = vec![Read::new("r1", "chr1", 0, b"ACAT", &[2, 2, 2, 2])];
        let out = caller.evaluate_reads(&set, b"ACGT", reads).unwrap();
        let f = fields(&out);
        // neither hypothesis wins by more than ln 2
        assert_eq!(f[5], "0");
        assert_eq!(f[6], "0");
    }

    #[test]
    fn test_non_spanning_read_not_seen() {
        let dir = tempfile::tempdir().unwrap();
        let caller = test_caller(dir.path(), &[("chr1", "ACGTACGTACGTACGT")], Settings::default());
        let set = vec![Variant::new("chr1", 12, "T", "A")];
        // the read ends well before the variant
        let reads = vec![read30("r1", 0, b"ACGT")];
        let out = caller
            .evaluate_reads(&set, b"ACGTACGTACGTACGT", reads)
            .unwrap();
        let f = fields(&out);
        assert_eq!(f[4], "0");
        assert_eq!(f[5], "0");
        assert_eq!(f[6], "0");
    }

    #[test]
    fn test_paralog_dominance_with_xa() {
        let dir = tempfile::tempdir().unwrap();
        let mut chr2 = "T".repeat(100);
        chr2.push_str("ACGT");
        chr2.push_str(&"T".repeat(6));
        let caller = test_caller(
            dir.path(),
            &[("chr1", "ACGT"), ("chr2", &chr2)],
            Settings::default(),
        );
        let set = vec![Variant::new("chr1", 3, "G", "A")];
        let mut read = read30("r1", 0, b"ACGT");
        read.xa = Some("chr2,+101,4M,0;".to_owned());
        let out = caller.evaluate_reads(&set, b"ACGT", vec![read]).unwrap();
        let f = fields(&out);
        // the secondary locus explains the read under both hypotheses, so
        // the alternative gains nothing and the odds stay near zero
        assert_eq!(f[6], "0");
        let odds: f64 = f[8].parse().unwrap();
        assert!(odds.abs() < 0.5, "odds = {}", odds);
    }

    #[test]
    fn test_mvh_reports_joint_combination() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            mvh: true,
            ..Settings::default()
        };
        let caller = test_caller(dir.path(), &[("chr1", "ACGT")], settings);
        let set = vec![
            Variant::new("chr1", 3, "G", "A"),
            Variant::new("chr1", 4, "T", "A"),
        ];
        let reads = vec![
            read30("r1", 0, b"ACAA"),
            read30("r2", 0, b"ACAA"),
            read30("r3", 0, b"ACAA"),
            read30("r4", 0, b"ACGT"),
        ];
        let out = caller.evaluate_reads(&set, b"ACGT", reads).unwrap();
        assert_eq!(out.lines().count(), 1);
        let f = fields(&out);
        assert_eq!(&f[0..4], &["chr1", "3", "G", "A"]);
        // the joint hypothesis wins and lists both variants
        assert!(f[9].contains("chr1,3,G,A;"));
        assert!(f[9].contains("chr1,4,T,A;"));
    }

    #[test]
    fn test_deletion_through_altseq_path() {
        let dir = tempfile::tempdir().unwrap();
        let caller = test_caller(dir.path(), &[("chr1", "ACGT")], Settings::default());
        let set = vec![Variant::new("chr1", 3, "G", "-")];
        let reads = vec![read30("r1", 0, b"ACGT"), read30("r2", 0, b"ACT")];
        let out = caller.evaluate_reads(&set, b"ACGT", reads).unwrap();
        let f = fields(&out);
        assert_eq!(f[4], "2");
        assert_eq!(f[5], "1");
        assert_eq!(f[6], "1");
    }

    #[test]
    fn test_count_bounds_hold() {
        let dir = tempfile::tempdir().unwrap();
        let caller = test_caller(dir.path(), &[("chr1", "ACGT")], Settings::default());
        let set = vec![Variant::new("chr1", 3, "G", "A")];
        let reads = vec![
            read30("r1", 0, b"ACGT"),
            read30("r2", 0, b"ACAT"),
            Read::new("r3", "chr1", 0, b"ACAT", &[2, 2, 2, 2]),
        ];
        let out = caller.evaluate_reads(&set, b"ACGT", reads).unwrap();
        let f = fields(&out);
        let seen: u32 = f[4].parse().unwrap();
        let rcount: u32 = f[5].parse().unwrap();
        let acount: u32 = f[6].parse().unwrap();
        assert!(rcount + acount <= seen);
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_het_mixture_is_symmetric_and_bounded() {
        let u = LogProb(-3.0);
        let v = LogProb(-9.0);
        let m = het_mixture(u, v);
        // the 0.9 weight on the larger side dominates
        assert!(*m <= *u && *m >= *v);
        let m2 = het_mixture(v, u);
        approx::assert_relative_eq!(*m, *m2, epsilon = 1e-12);
    }
}
