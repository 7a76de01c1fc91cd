use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("bad fields in VCF record: {line}")]
    BadRecord { line: String },
    #[error("variant at {chrom}:{pos} is out of bounds in the reference")]
    OutOfBounds { chrom: String, pos: i64 },
    #[error("contig {contig} not found in the reference")]
    MissingReference { contig: String },
}
