//! Corpus and resource loading for alphabet construction.
//!
//! Training data is CoNLL-U. Word clusters use the Brown cluster output
//! format (`bitstring<TAB>word<TAB>count`). Pretrained embeddings use the
//! word2vec text format, with or without its `count dim` header line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};
use twpipe_core::AlphabetCollection;

/// Column holding the word form.
const FORM_COLUMN: usize = 1;

/// Column holding the universal part-of-speech tag.
const UPOS_COLUMN: usize = 3;

const CONLLU_COLUMNS: usize = 10;

/// Counts gathered while scanning a corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub sentences: usize,
    pub tokens: usize,
}

/// Adds the forms, characters and tags of a CoNLL-U corpus to `alphabets`.
///
/// Multiword token ranges (`1-2`) and empty nodes (`1.1`) are skipped.
pub fn scan_conllu<R: BufRead>(
    reader: R,
    alphabets: &mut AlphabetCollection,
) -> Result<CorpusStats> {
    let mut stats = CorpusStats::default();
    let mut in_sentence = false;

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();

        if line.is_empty() {
            if in_sentence {
                stats.sentences += 1;
                in_sentence = false;
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != CONLLU_COLUMNS {
            bail!(
                "line {}: expected {CONLLU_COLUMNS} tab-separated columns, found {}",
                number + 1,
                columns.len()
            );
        }

        let id = columns[0];
        if id.contains('-') || id.contains('.') {
            continue;
        }

        let form = columns[FORM_COLUMN];
        alphabets.words.insert(form);
        for ch in form.chars() {
            let mut buf = [0u8; 4];
            alphabets.chars.insert(ch.encode_utf8(&mut buf));
        }
        alphabets.tags.insert(columns[UPOS_COLUMN]);

        stats.tokens += 1;
        in_sentence = true;
    }

    if in_sentence {
        stats.sentences += 1;
    }
    Ok(stats)
}

/// Scans the CoNLL-U file at `path`, see [`scan_conllu`].
pub fn load_conllu<P: AsRef<Path>>(
    path: P,
    alphabets: &mut AlphabetCollection,
) -> Result<CorpusStats> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening corpus {}", path.display()))?;
    let stats = scan_conllu(BufReader::new(file), alphabets)
        .with_context(|| format!("reading corpus {}", path.display()))?;
    info!(
        path = %path.display(),
        sentences = stats.sentences,
        tokens = stats.tokens,
        chars = alphabets.chars.len(),
        words = alphabets.words.len(),
        tags = alphabets.tags.len(),
        "[data] corpus scanned"
    );
    Ok(stats)
}

/// Adds the cluster identifiers of a Brown cluster file to `alphabets`.
/// Returns the number of words assigned to a cluster.
pub fn scan_clusters<R: BufRead>(reader: R, alphabets: &mut AlphabetCollection) -> Result<usize> {
    let mut words = 0;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut columns = line.split('\t');
        match (columns.next(), columns.next()) {
            (Some(cluster), Some(_word)) if !cluster.is_empty() => {
                alphabets.clusters.insert(cluster);
                words += 1;
            }
            _ => bail!("line {}: expected `cluster<TAB>word`", number + 1),
        }
    }
    Ok(words)
}

/// Scans the cluster file at `path`, see [`scan_clusters`].
pub fn load_clusters<P: AsRef<Path>>(path: P, alphabets: &mut AlphabetCollection) -> Result<usize> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening clusters {}", path.display()))?;
    let words = scan_clusters(BufReader::new(file), alphabets)
        .with_context(|| format!("reading clusters {}", path.display()))?;
    info!(
        path = %path.display(),
        words,
        clusters = alphabets.clusters.len(),
        "[data] word clusters loaded"
    );
    Ok(words)
}

/// Width of the vectors in a word2vec text file.
pub fn embedding_dim<R: BufRead>(reader: R) -> Result<u32> {
    let Some(line) = reader.lines().next().transpose()? else {
        bail!("empty embedding file");
    };
    let fields: Vec<&str> = line.split_whitespace().collect();

    // `count dim` header
    if let [count, dim] = fields.as_slice() {
        if count.parse::<u64>().is_ok() {
            return dim
                .parse()
                .with_context(|| format!("malformed embedding header {line:?}"));
        }
    }

    match fields.len() {
        0 | 1 => bail!("first embedding line carries no vector"),
        n => {
            debug!(dim = n - 1, "[data] embedding file without header");
            Ok(u32::try_from(n - 1)?)
        }
    }
}

/// Reads the vector width of the embedding file at `path`.
pub fn load_embedding_dim<P: AsRef<Path>>(path: P) -> Result<u32> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening embeddings {}", path.display()))?;
    embedding_dim(BufReader::new(file))
        .with_context(|| format!("reading embeddings {}", path.display()))
}
