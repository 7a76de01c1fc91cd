// Copyright 2016-2019 Tony Kuo.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use bio::io::fasta;

use crate::errors;

/// Process-wide cache of reference sequences, keyed by contig name.
///
/// Hypothesis sets repeatedly query the same contig and FASTA random access is
/// expensive, so sequences are fetched lazily once, uppercased and kept for
/// the lifetime of the process. Entries are never evicted or mutated after
/// insertion; readers receive a reference-counted snapshot and release the
/// lock before doing any computation.
pub struct Buffer {
    inner: Mutex<Inner>,
}

struct Inner {
    reader: fasta::IndexedReader<fs::File>,
    sequences: HashMap<String, Arc<Vec<u8>>>,
}

impl Buffer {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = fasta::IndexedReader::from_file(&path.as_ref()).with_context(|| {
            format!(
                "failed to open FASTA index for {}",
                path.as_ref().display()
            )
        })?;
        Ok(Buffer {
            inner: Mutex::new(Inner {
                reader,
                sequences: HashMap::new(),
            }),
        })
    }

    /// Fetch the sequence of the given contig, loading it on first use.
    pub fn seq(&self, name: &str) -> Result<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(seq) = inner.sequences.get(name) {
            return Ok(Arc::clone(seq));
        }

        if !inner.reader.index.sequences().iter().any(|s| s.name == name) {
            return Err(errors::Error::MissingReference {
                contig: name.to_owned(),
            }
            .into());
        }
        let mut seq = Vec::new();
        inner.reader.fetch_all(name)?;
        inner.reader.read(&mut seq)?;
        seq.make_ascii_uppercase();

        let seq = Arc::new(seq);
        inner
            .sequences
            .insert(name.to_owned(), Arc::clone(&seq));
        Ok(seq)
    }
}
