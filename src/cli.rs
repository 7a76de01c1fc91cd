// Copyright 2016-2019 Tony Kuo.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use structopt::StructOpt;

use crate::calling;
use crate::model::{self, GroupMode};
use crate::model::reads::ReadOptions;
use crate::reference;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "eagle",
    about = "Explicitly test the alternative variant hypothesis against the reference hypothesis, given read alignments.",
    setting = structopt::clap::AppSettings::ColoredHelp,
)]
pub struct Eagle {
    #[structopt(
        short = "v",
        long = "vcf",
        parse(from_os_str),
        help = "Variants VCF file (if omitted, read from STDIN)."
    )]
    pub vcf: Option<PathBuf>,
    #[structopt(
        short = "a",
        long = "bam",
        parse(from_os_str),
        help = "Alignment data BAM file, ref-coord sorted with BAI index file."
    )]
    pub bam: PathBuf,
    #[structopt(
        short = "r",
        long = "ref",
        parse(from_os_str),
        help = "Reference sequence, FASTA file with FAI index file."
    )]
    pub reference: PathBuf,
    #[structopt(
        short = "o",
        long = "out",
        parse(from_os_str),
        help = "Output file (if omitted, write to STDOUT)."
    )]
    pub out: Option<PathBuf>,
    #[structopt(short = "t", long = "nthread", default_value = "1", help = "Number of threads.")]
    pub nthread: usize,
    #[structopt(
        short = "s",
        long = "sharedr",
        default_value = "0",
        help = "Group nearby variants that share a read, 0:distance based/off, 1:shared with first, 2:shared with any."
    )]
    pub sharedr: u8,
    #[structopt(
        short = "n",
        long = "distlim",
        default_value = "10",
        help = "Group nearby variants within n bases, 0:off."
    )]
    pub distlim: i64,
    #[structopt(
        short = "w",
        long = "maxdist",
        default_value = "0",
        help = "Maximum number of bases between any two variants in a set of hypotheses, 0:off."
    )]
    pub maxdist: i64,
    #[structopt(
        short = "m",
        long = "maxh",
        default_value = "1024",
        help = "Maximum number of combinations in the set of hypotheses, instead of all 2^n."
    )]
    pub maxh: usize,
    #[structopt(
        long,
        help = "Output the maximum likelihood hypothesis in the set instead of marginal probabilities."
    )]
    pub mvh: bool,
    #[structopt(long, help = "Primary alignments only.")]
    pub pao: bool,
    #[structopt(long, help = "Ignore soft-clipped bases.")]
    pub isc: bool,
    #[structopt(long, help = "Ignore marked duplicate reads (based on SAM flag).")]
    pub nodup: bool,
    #[structopt(long, help = "RNA-seq spliced reads.")]
    pub splice: bool,
    #[structopt(long = "bs", help = "Bisulfite treated reads.")]
    pub bisulfite: bool,
    #[structopt(
        long,
        help = "Use dynamic programming to calculate likelihood instead of the basic model."
    )]
    pub dp: bool,
    #[structopt(
        long = "gap_op",
        default_value = "6",
        help = "DP gap open penalty. Recommend 2 for long reads with indel errors."
    )]
    pub gap_op: f64,
    #[structopt(long = "gap_ex", default_value = "1", help = "DP gap extend penalty.")]
    pub gap_ex: f64,
    #[structopt(
        long,
        help = "Verbose mode, output likelihoods for each read seen for each hypothesis to STDERR."
    )]
    pub verbose: bool,
    #[structopt(
        long,
        help = "Low memory usage mode, the default mode for SNPs; may be slightly slower for indels but uses less memory."
    )]
    pub lowmem: bool,
    #[structopt(long, help = "Read quality scores are in phred64.")]
    pub phred64: bool,
    #[structopt(
        long,
        default_value = "0.5",
        help = "Prior probability bias towards non-homozygous mutations, between [0,1]."
    )]
    pub hetbias: f64,
    #[structopt(
        long,
        default_value = "1e-5",
        help = "Prior probability of originating from outside paralogous source, between [0,1]."
    )]
    pub omega: f64,
    #[structopt(
        long,
        help = "Wrapper for read classification settings: --omega=1.0e-40 --isc --mvh --verbose --lowmem."
    )]
    pub rc: bool,
}

impl Eagle {
    /// Resolve defaults and presets the way out-of-range values are
    /// tolerated on the command line, and assemble the engine settings.
    fn settings(&mut self) -> calling::Settings {
        if self.nthread < 1 {
            self.nthread = 1;
        }
        if self.sharedr > 2 {
            self.sharedr = 0;
        }
        if self.distlim < 0 {
            self.distlim = 10;
        }
        if self.maxdist < 0 {
            self.maxdist = 0;
        }
        if self.gap_op <= 0.0 {
            self.gap_op = 6.0;
        }
        if self.gap_ex <= 0.0 {
            self.gap_ex = 1.0;
        }
        if self.hetbias < 0.0 || self.hetbias > 1.0 {
            self.hetbias = 0.5;
        }
        if self.omega < 0.0 || self.omega > 1.0 {
            self.omega = 1e-5;
        }
        if self.rc {
            self.omega = 1e-40;
            self.isc = true;
            self.mvh = true;
            self.verbose = true;
            self.lowmem = true;
        }

        let group_mode = match self.sharedr {
            1 => GroupMode::ShareFirst,
            2 => GroupMode::ShareAny,
            _ => GroupMode::Distance {
                distlim: self.distlim,
                maxdist: self.maxdist,
            },
        };
        calling::Settings {
            group_mode,
            reads: ReadOptions {
                pao: self.pao,
                isc: self.isc,
                nodup: self.nodup,
                splice: self.splice,
                phred64: self.phred64,
            },
            nthread: self.nthread,
            maxh: self.maxh,
            mvh: self.mvh,
            verbose: self.verbose,
            lowmem: self.lowmem,
            bisulfite: self.bisulfite,
            dp: self.dp,
            gap_op: self.gap_op,
            gap_ex: self.gap_ex,
            hetbias: self.hetbias,
            omega: self.omega,
        }
    }
}

pub fn run(mut opt: Eagle) -> Result<()> {
    let settings = opt.settings();

    let var_list = match &opt.vcf {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open VCF file {}", path.display()))?;
            model::read_vcf(BufReader::new(file))?
        }
        None => model::read_vcf(io::stdin().lock())?,
    };
    info!(
        "Read VCF: {}, {} entries",
        opt.vcf
            .as_ref()
            .map_or_else(|| "stdin".to_owned(), |p| p.display().to_string()),
        var_list.len()
    );

    let reference = Arc::new(reference::Buffer::from_path(&opt.reference)?);
    let caller = calling::Caller::new(opt.bam.clone(), reference, settings);

    match &opt.out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to open output file {}", path.display()))?;
            caller.process(&var_list, &mut BufWriter::new(file))?;
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            caller.process(&var_list, &mut handle)?;
            handle.flush()?;
        }
    }
    Ok(())
}
