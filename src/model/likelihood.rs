// Copyright 2016-2019 Tony Kuo.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Probabilistic alignment kernel: quality score tables, the nucleotide code
//! map, per-read probability matrices, the position-anchored and
//! dynamic-programming likelihoods, the SNV fast path, alternative sequence
//! construction, and the paralogous "elsewhere" term.

use bio::stats::LogProb;
use lazy_static::lazy_static;

use crate::errors;
use crate::model::reads::Read;
use crate::model::Variant;

/// Number of nucleotide codes in a probability row.
pub const NT_CODES: usize = 17;

/// Factor accounting for longer reads lowering the probability of a match
/// to an outside paralogous source.
const ALPHA: f64 = 1.3;

lazy_static! {
    static ref LN_ALPHA: f64 = ALPHA.ln();
}

/// Base sets of the nucleotide codes (A=1, C=2, G=4, T=8). The table is
/// symmetric under complement: code `j` complements code `16 - j`, with
/// slots 9 and 10 mirroring W and S so the property holds for all rows.
const CODE_MASK: [u8; NT_CODES] = [
    0b0001, // 0  A
    0b0010, // 1  C
    0b1011, // 2  H = A,C,T
    0b1110, // 3  B = C,G,T
    0b0101, // 4  R = A,G
    0b1100, // 5  K = G,T
    0b0110, // 6  S = C,G
    0b1001, // 7  W = A,T
    0b1111, // 8  N
    0b1001, // 9  W
    0b0110, // 10 S
    0b0011, // 11 M = A,C
    0b1010, // 12 Y = C,T
    0b0111, // 13 V = A,C,G
    0b1101, // 14 D = A,G,T
    0b0100, // 15 G
    0b1000, // 16 T
];

/// Map an IUPAC letter to its code index. Unknown letters count as N.
pub fn nt_index(base: u8) -> usize {
    match base.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'H' => 2,
        b'B' => 3,
        b'R' => 4,
        b'K' => 5,
        b'S' => 6,
        b'W' => 7,
        b'M' => 11,
        b'Y' => 12,
        b'V' => 13,
        b'D' => 14,
        b'G' => 15,
        b'T' | b'U' => 16,
        _ => 8,
    }
}

/// Phred quality to ln probability lookup tables.
///
/// For `q >= 1`, `a = -q ln10 / 10`, `p_match = ln(1 - exp(a))` and
/// `p_mismatch = a - ln 3`; `q = 0` uses `a = -0.01`. The DP variant shifts
/// each quality's pair so the match entry anchors at 2.0, compensating the
/// gap open/extend costs of the alignment scores.
pub struct QualModel {
    pub p_match: [f64; 50],
    pub p_mismatch: [f64; 50],
    pub dp_match: [f64; 50],
    pub dp_mismatch: [f64; 50],
}

impl QualModel {
    pub fn new() -> Self {
        let mut model = QualModel {
            p_match: [0.0; 50],
            p_mismatch: [0.0; 50],
            dp_match: [0.0; 50],
            dp_mismatch: [0.0; 50],
        };
        for q in 0..50 {
            let a = if q == 0 {
                -0.01
            } else {
                -(q as f64) / 10.0 * std::f64::consts::LN_10
            };
            model.p_match[q] = (1.0 - a.exp()).ln();
            model.p_mismatch[q] = a - 3f64.ln();
            model.dp_match[q] = 2.0;
            model.dp_mismatch[q] = 2.0 + model.p_mismatch[q] - model.p_match[q];
        }
        model
    }
}

impl Default for QualModel {
    fn default() -> Self {
        QualModel::new()
    }
}

/// Per-read probability matrix: one row per read position holding the ln
/// probability of observing the read base given each reference code.
pub struct ReadProbMatrix {
    rows: Vec<[f64; NT_CODES]>,
    pub is_match: Vec<f64>,
    pub no_match: Vec<f64>,
}

impl ReadProbMatrix {
    pub fn new(read: &Read, quals: &QualModel, dp: bool, bisulfite: bool) -> Self {
        let mut rows = Vec::with_capacity(read.length);
        let mut is_match = Vec::with_capacity(read.length);
        let mut no_match = Vec::with_capacity(read.length);
        for (&base, &q) in read.seq.iter().zip(read.qual.iter()) {
            let q = q as usize;
            let (is, no) = if dp {
                (quals.dp_match[q], quals.dp_mismatch[q])
            } else {
                (quals.p_match[q], quals.p_mismatch[q])
            };
            is_match.push(is);
            no_match.push(no);

            let obs = CODE_MASK[nt_index(base)];
            let mut row = [0.0; NT_CODES];
            for (code, entry) in row.iter_mut().enumerate() {
                let mask = CODE_MASK[code];
                let k = mask.count_ones();
                let m = (mask & obs).count_ones();
                *entry = if m == 0 {
                    no
                } else if m == k {
                    is
                } else {
                    // ambiguity codes split the match mass proportionally
                    let frac = f64::from(m) / f64::from(k);
                    (frac * is.exp() + (1.0 - frac) * no.exp()).ln()
                };
            }
            if bisulfite {
                if !read.is_reverse && base.to_ascii_uppercase() == b'T' {
                    row[nt_index(b'C')] = is; // unconverted C reads as T
                } else if read.is_reverse && base.to_ascii_uppercase() == b'A' {
                    row[nt_index(b'G')] = is;
                }
            }
            rows.push(row);
        }
        ReadProbMatrix {
            rows,
            is_match,
            no_match,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Matrix of the reverse-complemented read: row order reversed and each
    /// code swapped with its complement, exploiting the symmetry of the code
    /// table. Used for secondary loci on the opposite strand.
    pub fn reverse_complement(&self) -> Self {
        let rows = self
            .rows
            .iter()
            .rev()
            .map(|row| {
                let mut rc = [0.0; NT_CODES];
                for (j, entry) in rc.iter_mut().enumerate() {
                    *entry = row[NT_CODES - 1 - j];
                }
                rc
            })
            .collect();
        ReadProbMatrix {
            rows,
            is_match: self.is_match.iter().rev().copied().collect(),
            no_match: self.no_match.iter().rev().copied().collect(),
        }
    }
}

/// ln P(read | seq, anchor): sum the matrix entry of the reference base under
/// each read position, starting at the mapped position. Splice jumps skip
/// intron regions; positions outside the sequence contribute the mismatch
/// probability.
pub fn prob_anchored(
    matrix: &ReadProbMatrix,
    seq: &[u8],
    pos: i64,
    splice_pos: &[i64],
    splice_offset: &[i64],
) -> LogProb {
    let mut p = 0.0;
    let mut jump = 0i64;
    let mut s = 0;
    for i in 0..matrix.len() {
        while s < splice_pos.len() && splice_pos[s] == i as i64 {
            jump += splice_offset[s];
            s += 1;
        }
        let g = pos + i as i64 + jump;
        p += if g < 0 || g >= seq.len() as i64 {
            matrix.no_match[i]
        } else {
            matrix.rows[i][nt_index(seq[g as usize])]
        };
    }
    LogProb(p)
}

/// Fast path for combinations of equal-length substitutions: compute both
/// ln P(read | ref) and ln P(read | alt) in one anchored pass by swapping
/// only the affected reference bases.
pub fn prob_snps(
    matrix: &ReadProbMatrix,
    combo: &[usize],
    variants: &[Variant],
    seq: &[u8],
    pos: i64,
    splice_pos: &[i64],
    splice_offset: &[i64],
) -> (LogProb, LogProb) {
    let mut prgu = 0.0;
    let mut prgv = 0.0;
    let mut jump = 0i64;
    let mut s = 0;
    for i in 0..matrix.len() {
        while s < splice_pos.len() && splice_pos[s] == i as i64 {
            jump += splice_offset[s];
            s += 1;
        }
        let g = pos + i as i64 + jump;
        if g < 0 || g >= seq.len() as i64 {
            prgu += matrix.no_match[i];
            prgv += matrix.no_match[i];
            continue;
        }
        let ref_base = seq[g as usize];
        let mut alt_base = ref_base;
        for &vi in combo {
            let v = &variants[vi];
            let start = v.pos - 1;
            if g >= start && g < start + v.ref_allele.len() as i64 {
                alt_base = v.alt_allele.as_bytes()[(g - start) as usize];
                break;
            }
        }
        prgu += matrix.rows[i][nt_index(ref_base)];
        prgv += matrix.rows[i][nt_index(alt_base)];
    }
    (LogProb(prgu), LogProb(prgv))
}

/// Semi-global alignment score of the read against a window around the
/// anchor, with affine gaps. The result is the ln-sum of the scores over the
/// final read row, so every placement within the window contributes. Splice
/// segments are aligned independently and summed.
pub fn prob_dp(
    matrix: &ReadProbMatrix,
    seq: &[u8],
    pos: i64,
    splice_pos: &[i64],
    splice_offset: &[i64],
    gap_op: f64,
    gap_ex: f64,
) -> LogProb {
    let mut total = 0.0;
    let mut seg_start = 0usize;
    let mut anchor = pos;
    for k in 0..=splice_pos.len() {
        let seg_end = if k < splice_pos.len() {
            (splice_pos[k].max(0) as usize).min(matrix.len())
        } else {
            matrix.len()
        };
        if seg_end > seg_start {
            total += dp_segment(
                matrix,
                seg_start,
                seg_end,
                seq,
                anchor + seg_start as i64,
                gap_op,
                gap_ex,
            );
        }
        if k < splice_pos.len() {
            anchor += splice_offset[k];
        }
        seg_start = seg_end;
    }
    LogProb(total)
}

fn ln_add(a: f64, b: f64) -> f64 {
    *LogProb(a).ln_add_exp(LogProb(b))
}

fn dp_segment(
    matrix: &ReadProbMatrix,
    r0: usize,
    r1: usize,
    seq: &[u8],
    anchor: i64,
    gap_op: f64,
    gap_ex: f64,
) -> f64 {
    let read_len = r1 - r0;
    let w0 = (anchor - read_len as i64).max(0);
    let w1 = (anchor + 2 * read_len as i64).min(seq.len() as i64);
    if w0 >= w1 {
        // window entirely outside the sequence
        return matrix.no_match[r0..r1].iter().sum();
    }
    let n = (w1 - w0) as usize;
    let neg_inf = f64::NEG_INFINITY;

    // band rows over the window; reference gaps at both ends are free
    let mut m_prev = vec![0.0; n + 1];
    let mut x_prev = vec![neg_inf; n + 1];
    let mut y_prev = vec![neg_inf; n + 1];
    for i in 1..=read_len {
        let mut m_cur = vec![neg_inf; n + 1];
        let mut x_cur = vec![neg_inf; n + 1];
        let mut y_cur = vec![neg_inf; n + 1];
        x_cur[0] = ln_add(m_prev[0] - gap_op, x_prev[0] - gap_ex);
        for j in 1..=n {
            let emit = matrix.rows[r0 + i - 1][nt_index(seq[(w0 as usize) + j - 1])];
            m_cur[j] = emit + ln_add(ln_add(m_prev[j - 1], x_prev[j - 1]), y_prev[j - 1]);
            x_cur[j] = ln_add(m_prev[j] - gap_op, x_prev[j] - gap_ex);
            y_cur[j] = ln_add(m_cur[j - 1] - gap_op, y_cur[j - 1] - gap_ex);
        }
        m_prev = m_cur;
        x_prev = x_cur;
        y_prev = y_cur;
    }

    let mut result = neg_inf;
    for j in 0..=n {
        result = ln_add(result, ln_add(m_prev[j], x_prev[j]));
    }
    result
}

/// Apply a combination of variants to the reference window. Common prefixes
/// of ref and alt alleles are stripped, `-` encodes the empty allele, and a
/// running offset keeps later variant coordinates aligned after indels.
pub fn construct_altseq(
    refseq: &[u8],
    combo: &[usize],
    variants: &[Variant],
) -> Result<Vec<u8>, errors::Error> {
    let mut altseq = refseq.to_vec();
    let mut offset: i64 = 0;
    for &vi in combo {
        let v = &variants[vi];
        let out_of_bounds = || errors::Error::OutOfBounds {
            chrom: v.chrom.clone(),
            pos: v.pos,
        };
        let mut pos = v.pos - 1 + offset;
        if pos < 0 || pos > altseq.len() as i64 {
            return Err(out_of_bounds());
        }

        let (var_ref, var_alt) = if v.ref_allele.starts_with('-') {
            (&b""[..], v.alt_allele.as_bytes())
        } else if v.alt_allele.starts_with('-') {
            (v.ref_allele.as_bytes(), &b""[..])
        } else {
            let mut r = v.ref_allele.as_bytes();
            let mut a = v.alt_allele.as_bytes();
            while !r.is_empty() && !a.is_empty() && r[0] == a[0] {
                r = &r[1..];
                a = &a[1..];
                pos += 1;
            }
            (r, a)
        };

        let start = pos as usize;
        if start + var_ref.len() > altseq.len() {
            return Err(out_of_bounds());
        }
        altseq.splice(start..start + var_ref.len(), var_alt.iter().copied());
        offset += var_alt.len() as i64 - var_ref.len() as i64;
    }
    Ok(altseq)
}

/// Probability that the read originates from an unobserved paralogous locus:
/// the bulk of the distribution is the perfect-match configuration plus the
/// edit-distance-one configurations, discounted by `ALPHA` per base the read
/// is longer than its inferred length.
pub fn prob_elsewhere(matrix: &ReadProbMatrix, inferred_length: i64) -> LogProb {
    let a: f64 = matrix.is_match.iter().sum();
    let deltas: Vec<LogProb> = matrix
        .is_match
        .iter()
        .zip(matrix.no_match.iter())
        .map(|(&is, &no)| LogProb(no - is))
        .collect();
    let hamming1 = if deltas.is_empty() {
        LogProb::ln_zero()
    } else {
        LogProb::ln_sum_exp(&deltas)
    };
    let p = LogProb(a).ln_add_exp(LogProb(a + *hamming1));
    LogProb(*p - *LN_ALPHA * (matrix.len() as i64 - inferred_length) as f64)
}
