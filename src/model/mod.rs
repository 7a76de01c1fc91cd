// Copyright 2016-2019 Tony Kuo.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

pub mod likelihood;
pub mod reads;

use std::io::BufRead;
use std::path::Path;

use anyhow::Result;

use crate::errors;
use crate::utils;

/// A candidate variant. Positions are 1-based; the empty allele is `-`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant {
    pub chrom: String,
    pub pos: i64,
    pub ref_allele: String,
    pub alt_allele: String,
}

impl Variant {
    pub fn new(chrom: &str, pos: i64, ref_allele: &str, alt_allele: &str) -> Self {
        Variant {
            chrom: chrom.to_owned(),
            pos,
            ref_allele: ref_allele.to_owned(),
            alt_allele: alt_allele.to_owned(),
        }
    }

    /// True unless this is a same-length substitution.
    pub fn is_indel(&self) -> bool {
        self.ref_allele.starts_with('-')
            || self.alt_allele.starts_with('-')
            || self.ref_allele.len() != self.alt_allele.len()
    }
}

/// How nearby candidate variants are grouped into hypothesis sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupMode {
    /// Variants within `distlim` of their predecessor (and within `maxdist`
    /// of the first in the set, when nonzero) form one set.
    Distance { distlim: i64, maxdist: i64 },
    /// Variants reachable by the last read overlapping the first in the set.
    ShareFirst,
    /// Variants reachable by the last read overlapping the current tail.
    ShareAny,
}

/// Read candidate variants from VCF text.
///
/// Only fields 1 (chrom), 2 (pos), 4 (ref) and 5 (alt) are used.
/// Comma-separated multi-allelic entries expand to the cross-product of
/// ref and alt tokens; alt tokens `.`, `*` and `<*:DEL>` are skipped.
/// The list is returned in natural chromosome order, then position.
pub fn read_vcf<R: BufRead>(reader: R) -> Result<Vec<Variant>> {
    let mut var_list = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let bad_record = || errors::Error::BadRecord { line: line.clone() };

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(bad_record().into());
        }
        let chrom = fields[0];
        let pos: i64 = fields[1].parse().map_err(|_| bad_record())?;
        let (ref_field, alt_field) = (fields[3], fields[4]);
        if utils::has_digits(ref_field) || utils::has_digits(alt_field) {
            return Err(bad_record().into());
        }

        for ref_token in ref_field.split(',') {
            for alt_token in alt_field.split(',') {
                if alt_token.starts_with('.')
                    || alt_token.starts_with('*')
                    || alt_token == "<*:DEL>"
                {
                    continue;
                }
                var_list.push(Variant::new(chrom, pos, ref_token, alt_token));
            }
        }
    }
    var_list.sort_by(|a, b| {
        utils::natural_cmp(&a.chrom, &b.chrom).then(a.pos.cmp(&b.pos))
    });
    Ok(var_list)
}

/// Group the sorted variant list into hypothesis sets, then split
/// heterozygous non-reference entries into separate sets.
pub fn group_variants(
    var_list: &[Variant],
    mode: GroupMode,
    bam_path: &Path,
) -> Result<Vec<Vec<Variant>>> {
    let mut var_sets: Vec<Vec<Variant>> = Vec::new();
    let mut i = 0;
    while i < var_list.len() {
        let mut curr = vec![var_list[i].clone()];
        let mut j = i + 1;
        match mode {
            GroupMode::Distance { distlim, maxdist } => {
                while distlim > 0
                    && j < var_list.len()
                    && var_list[j].chrom == var_list[j - 1].chrom
                    && (var_list[j].pos - var_list[j - 1].pos).abs() <= distlim
                {
                    if maxdist > 0 && (var_list[j].pos - var_list[i].pos).abs() > maxdist {
                        break;
                    }
                    curr.push(var_list[j].clone());
                    j += 1;
                }
            }
            GroupMode::ShareFirst => {
                let head = &var_list[i];
                let last = reads::last_aligned_end(bam_path, &head.chrom, head.pos, head.pos)?;
                while j < var_list.len() && var_list[j].chrom == head.chrom {
                    match last {
                        Some(end) if var_list[j].pos <= end => {
                            curr.push(var_list[j].clone());
                            j += 1;
                        }
                        _ => break,
                    }
                }
            }
            GroupMode::ShareAny => {
                while j < var_list.len() && var_list[j].chrom == var_list[i].chrom {
                    let tail = curr.last().unwrap();
                    let last =
                        reads::last_aligned_end(bam_path, &tail.chrom, tail.pos, tail.pos)?;
                    match last {
                        Some(end) if var_list[j].pos <= end => {
                            curr.push(var_list[j].clone());
                            j += 1;
                        }
                        _ => break,
                    }
                }
            }
        }
        i = j;
        var_sets.push(curr);
    }
    split_hetero_sets(&mut var_sets);
    Ok(var_sets)
}

/// Heterozygous non-reference variants as separate entries: deduplicate
/// identical variants, explode sets whose entries all share one position
/// into singletons, and fork sets with adjacent same-position entries so
/// that both allele assignments are tested. Repeats until stable.
fn split_hetero_sets(var_sets: &mut Vec<Vec<Variant>>) {
    let mut changed = true;
    while changed {
        changed = false;
        let mut i = 0;
        while i < var_sets.len() {
            if var_sets[i].len() == 1 {
                i += 1;
                continue;
            }

            let mut all_same_pos = true;
            {
                let curr_set = &mut var_sets[i];
                let mut j = 0;
                while j + 1 < curr_set.len() {
                    if curr_set[j] == curr_set[j + 1] {
                        curr_set.remove(j + 1);
                    } else if curr_set[j].pos != curr_set[j + 1].pos {
                        all_same_pos = false;
                    }
                    j += 1;
                }
            }

            if all_same_pos {
                // alternative alleles of one locus, not a combination
                while var_sets[i].len() > 1 {
                    let v = var_sets[i].pop().unwrap();
                    var_sets.push(vec![v]);
                }
            } else {
                let mut j = 0;
                while j + 1 < var_sets[i].len() {
                    if var_sets[i][j].pos == var_sets[i][j + 1].pos {
                        changed = true;
                        let mut dup = var_sets[i].clone();
                        dup.remove(j + 1);
                        var_sets[i].remove(j);
                        var_sets.push(dup);
                    }
                    j += 1;
                }
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn var(chrom: &str, pos: i64, r: &str, a: &str) -> Variant {
        Variant::new(chrom, pos, r, a)
    }

    #[test]
    fn test_read_vcf_basic() {
        let vcf = "## header\n\
                   #CHROM\tPOS\tID\tREF\tALT\n\
                   chr1\t100\t.\tA\tT\n\
                   chr1\t50\trs1\tG\tC\n";
        let vars = read_vcf(Cursor::new(vcf)).unwrap();
        assert_eq!(vars, vec![var("chr1", 50, "G", "C"), var("chr1", 100, "A", "T")]);
    }

    #[test]
    fn test_read_vcf_multiallelic_cross_product() {
        let vcf = "chr1\t10\t.\tA,AC\tT,G\n";
        let vars = read_vcf(Cursor::new(vcf)).unwrap();
        assert_eq!(
            vars,
            vec![
                var("chr1", 10, "A", "T"),
                var("chr1", 10, "A", "G"),
                var("chr1", 10, "AC", "T"),
                var("chr1", 10, "AC", "G"),
            ]
        );
    }

    #[test]
    fn test_read_vcf_skips_null_alts() {
        let vcf = "chr1\t10\t.\tA\t.,*,<*:DEL>,T\n";
        let vars = read_vcf(Cursor::new(vcf)).unwrap();
        assert_eq!(vars, vec![var("chr1", 10, "A", "T")]);
    }

    #[test]
    fn test_read_vcf_empty_allele() {
        let vcf = "chr1\t10\t.\tG\t-\n";
        let vars = read_vcf(Cursor::new(vcf)).unwrap();
        assert_eq!(vars, vec![var("chr1", 10, "G", "-")]);
        assert!(vars[0].is_indel());
    }

    #[test]
    fn test_read_vcf_rejects_digits_in_alleles() {
        let vcf = "chr1\t10\t.\tA1\tT\n";
        assert!(read_vcf(Cursor::new(vcf)).is_err());
    }

    #[test]
    fn test_read_vcf_natural_sort() {
        let vcf = "chr10\t5\t.\tA\tT\nchr2\t7\t.\tC\tG\n";
        let vars = read_vcf(Cursor::new(vcf)).unwrap();
        assert_eq!(vars[0].chrom, "chr2");
        assert_eq!(vars[1].chrom, "chr10");
    }

    fn group_by_distance(vars: &[Variant], distlim: i64, maxdist: i64) -> Vec<Vec<Variant>> {
        // distance grouping never opens the BAM
        group_variants(
            vars,
            GroupMode::Distance { distlim, maxdist },
            Path::new("unused.bam"),
        )
        .unwrap()
    }

    #[test]
    fn test_distance_grouping() {
        let vars = vec![
            var("chr1", 10, "A", "T"),
            var("chr1", 15, "C", "G"),
            var("chr1", 40, "G", "A"),
            var("chr2", 41, "T", "C"),
        ];
        let sets = group_by_distance(&vars, 10, 0);
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0].len(), 2);
        assert_eq!(sets[1], vec![var("chr1", 40, "G", "A")]);
        assert_eq!(sets[2], vec![var("chr2", 41, "T", "C")]);
    }

    #[test]
    fn test_distance_grouping_maxdist_window() {
        let vars = vec![
            var("chr1", 10, "A", "T"),
            var("chr1", 18, "C", "G"),
            var("chr1", 26, "G", "A"),
        ];
        // without maxdist all three chain together; maxdist=10 cuts the chain
        assert_eq!(group_by_distance(&vars, 10, 0).len(), 1);
        let sets = group_by_distance(&vars, 10, 10);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].len(), 2);
    }

    #[test]
    fn test_split_same_position_alleles_into_singletons() {
        let mut sets = vec![vec![
            var("chr1", 10, "A", "T"),
            var("chr1", 10, "A", "G"),
            var("chr1", 10, "A", "C"),
        ]];
        split_hetero_sets(&mut sets);
        assert_eq!(sets.len(), 3);
        assert!(sets.iter().all(|s| s.len() == 1));
    }

    #[test]
    fn test_split_deduplicates() {
        let mut sets = vec![vec![
            var("chr1", 10, "A", "T"),
            var("chr1", 10, "A", "T"),
            var("chr1", 12, "C", "G"),
        ]];
        split_hetero_sets(&mut sets);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].len(), 2);
    }

    #[test]
    fn test_split_forks_adjacent_same_position() {
        let mut sets = vec![vec![
            var("chr1", 10, "A", "T"),
            var("chr1", 10, "A", "G"),
            var("chr1", 12, "C", "G"),
        ]];
        split_hetero_sets(&mut sets);
        // both allele assignments of the pos-10 pair are tested
        assert_eq!(sets.len(), 2);
        for set in &sets {
            assert_eq!(set.len(), 2);
            assert_eq!(set[1], var("chr1", 12, "C", "G"));
            let positions: Vec<i64> = set.iter().map(|v| v.pos).collect();
            assert_eq!(positions, vec![10, 12]);
        }
        assert_ne!(sets[0][0], sets[1][0]);
    }
}
