//! The sketching pipeline : one finalized sketch per logical input.
//!
//! A logical input is a string possibly joining several physical files
//! with [crate::sketchio::FNAME_SEP] ; all of them feed one sketch.
//! Inputs are dispatched to the rayon pool one at a time (the dynamic
//! schedule) after an optional presort by decreasing aggregate file size
//! so the longest inputs start first. Each worker owns its sequence
//! reader, its encoder and, when filtering is on, its count-min table
//! seeded from the worker index and the run seed, cleared between inputs.
//!
//! Sketch contents therefore depend only on input bytes, parameters and
//! seeds : worker assignment moves work around but never changes what a
//! sketch holds.

use std::sync::Mutex;

use log::{debug, info};
use rayon::prelude::*;

use crate::base::encoder::build_encoder;
use crate::error::SketchError;
use crate::params::{Filtering, SketchParams};
use crate::sketching::countmin::CountMin;
use crate::sketching::KmerSketcher;
use crate::sketchio::{read_sketch_file, sketch_file_exists, sketch_file_name, write_sketch_file, FNAME_SEP};

/// run options that do not influence sketch contents
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// load cached sketches when present, write them when absent
    pub cache: bool,
    /// gzip compress written sketch files
    pub gzip: bool,
    /// directory prefix for sketch file locations
    pub prefix: String,
    /// extra suffix in sketch file names
    pub suffix: String,
    /// inputs are themselves serialized sketches
    pub presketched: bool,
    pub filtering: Filtering,
    /// kmers below this estimated frequency never reach the sketch
    pub min_count: u64,
    pub cm_nhashes: u32,
    /// log2 of count-min columns, 0 derives it from the largest input
    pub cm_log2: u32,
    /// presort inputs by decreasing size for load balance
    pub sort_by_size: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            cache: false,
            gzip: false,
            prefix: String::new(),
            suffix: String::new(),
            presketched: false,
            filtering: Filtering::None,
            min_count: 30,
            cm_nhashes: 4,
            cm_log2: 0,
            sort_by_size: true,
        }
    }
}

/// does the path look like fastq data ? case sensitive, anywhere in the path
pub fn fname_is_fastq(path: &str) -> bool {
    path.contains(".fq") || path.contains(".fastq")
}

/// aggregate byte size of a logical input, 0 for unreadable sub paths
pub fn input_size(input: &str) -> u64 {
    input
        .split(FNAME_SEP)
        .filter(|s| !s.is_empty())
        .map(|sub| std::fs::metadata(sub).map(|m| m.len()).unwrap_or(0))
        .sum()
}

/// sort inputs by decreasing aggregate size. The caller keeps the sorted
/// order for labels so matrix rows and inputs stay aligned.
pub fn sort_inputs_by_size(inputs: &mut [String]) {
    inputs.sort_by_key(|input| std::cmp::Reverse(input_size(input)));
}

/// count-min column budget from the largest input, as a log2
fn derive_cm_log2(inputs: &[String]) -> u32 {
    let max_size = inputs.iter().map(|i| input_size(i)).max().unwrap_or(0);
    // +2 accounts for compressed inputs holding more kmers than bytes
    let lg = 64 - max_size.max(2).leading_zeros() + 2;
    lg.clamp(10, 31)
}

/// build one finalized sketch per logical input, in input order.
/// Any failed input aborts the run once in-flight inputs are done, with
/// every failure reported.
pub fn sketch_inputs<S: KmerSketcher>(
    inputs: &[String],
    params: &SketchParams,
    opts: &PipelineOptions,
) -> Result<Vec<S::Final>, SketchError> {
    params.validate()?;
    if inputs.is_empty() {
        return Err(SketchError::Config("no input paths".to_string()));
    }
    let use_cm = opts.filtering != Filtering::None && !opts.presketched;
    if opts.cm_log2 > 31 {
        return Err(SketchError::Config(format!(
            "cm_log2 {} out of range [1,31]",
            opts.cm_log2
        )));
    }
    let cm_log2 = if opts.cm_log2 > 0 {
        opts.cm_log2
    } else {
        derive_cm_log2(inputs)
    };
    let nb_workers = rayon::current_num_threads();
    let cms: Vec<Mutex<CountMin>> = if use_cm {
        (0..nb_workers as u64)
            .map(|w| {
                Mutex::new(CountMin::new(
                    cm_log2,
                    opts.cm_nhashes,
                    opts.min_count,
                    (w ^ params.get_run_seed()).wrapping_mul(1337),
                ))
            })
            .collect()
    } else {
        Vec::new()
    };
    info!(
        "sketching {} inputs on {} workers, filtering {:?}",
        inputs.len(),
        nb_workers,
        opts.filtering
    );
    //
    let results: Vec<Result<S::Final, SketchError>> = inputs
        .par_iter()
        .map(|input| sketch_one::<S>(input, params, opts, &cms))
        .collect();
    //
    let mut sketches = Vec::with_capacity(inputs.len());
    let mut failures = Vec::new();
    for (input, res) in inputs.iter().zip(results) {
        match res {
            Ok(s) => sketches.push(s),
            Err(e @ SketchError::CacheCorruption { .. }) => return Err(e),
            Err(e) => failures.push((input.clone(), e)),
        }
    }
    if !failures.is_empty() {
        let list = failures
            .iter()
            .map(|(p, e)| format!("{} ({})", p, e))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(SketchError::input(
            failures[0].0.as_str(),
            format!("{} input(s) failed : {}", failures.len(), list),
        ));
    }
    Ok(sketches)
}

fn sketch_one<S: KmerSketcher>(
    input: &str,
    params: &SketchParams,
    opts: &PipelineOptions,
    cms: &[Mutex<CountMin>],
) -> Result<S::Final, SketchError> {
    if opts.presketched {
        return read_sketch_file::<S::Final>(input, params);
    }
    let fname = sketch_file_name(input, params, &opts.prefix, &opts.suffix, opts.gzip);
    let cached = opts.cache && sketch_file_exists(&fname);
    if cached {
        debug!("cache hit for {} at {}", input, fname);
        return read_sketch_file::<S::Final>(&fname, params);
    }
    //
    let mut sketcher = S::new(params);
    let mut encoder = build_encoder(params)?;
    let use_filter = match opts.filtering {
        Filtering::None => false,
        Filtering::CountMin => true,
        Filtering::ByFilename => fname_is_fastq(input),
    };
    let min_count = opts.min_count;
    let worker = rayon::current_thread_index().unwrap_or(0);
    let mut cm_guard = if use_filter {
        Some(cms[worker].lock().unwrap())
    } else {
        None
    };
    //
    for sub in input.split(FNAME_SEP).filter(|s| !s.is_empty()) {
        let mut reader = needletail::parse_fastx_file(sub)
            .map_err(|e| SketchError::input(sub, format!("cannot parse : {}", e)))?;
        while let Some(record) = reader.next() {
            let seqrec =
                record.map_err(|e| SketchError::input(sub, format!("bad record : {}", e)))?;
            let seq = seqrec.seq();
            match cm_guard.as_mut() {
                Some(cm) => encoder.for_each_hash(&seq, &mut |h| {
                    if cm.add(h) >= min_count {
                        sketcher.add_hash(h);
                    }
                }),
                None => encoder.for_each_hash(&seq, &mut |h| sketcher.add_hash(h)),
            }
        }
    }
    // reset the per worker table so the next input starts clean
    if let Some(cm) = cm_guard.as_mut() {
        cm.clear();
    }
    //
    let finalized = sketcher.finalize();
    if opts.cache {
        write_sketch_file(&finalized, &fname, params, opts.gzip)?;
    }
    Ok(finalized)
}

//===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SketchFamily;
    use crate::sketching::{FullHashSet, Hll};
    use std::io::Write as _;

    #[allow(dead_code)]
    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn write_fasta(dir: &std::path::Path, name: &str, seqs: &[&str]) -> String {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for (i, s) in seqs.iter().enumerate() {
            writeln!(f, ">seq{}", i).unwrap();
            writeln!(f, "{}", s).unwrap();
        }
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_identical_files_identical_sketches() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let seq = "ACGGTTACCATGGATTACAGATTACACCGGTTAACCATAGGCCATTAA";
        let f1 = write_fasta(dir.path(), "a.fna", &[seq]);
        let f2 = write_fasta(dir.path(), "b.fna", &[seq]);
        let params = SketchParams::new(11, 10, SketchFamily::Hll);
        let sketches =
            sketch_inputs::<Hll>(&[f1, f2], &params, &PipelineOptions::default()).unwrap();
        assert_eq!(sketches.len(), 2);
        assert_eq!(sketches[0], sketches[1]);
    }

    #[test]
    fn test_multi_file_input_is_one_genome() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_fasta(dir.path(), "a.fna", &["ACGGTTACCATGGATTACAG"]);
        let f2 = write_fasta(dir.path(), "b.fna", &["CCGGTTAACCATAGGCCATT"]);
        let joined = format!("{} {}", f1, f2);
        let both = write_fasta(
            dir.path(),
            "ab.fna",
            &["ACGGTTACCATGGATTACAG", "CCGGTTAACCATAGGCCATT"],
        );
        let params = SketchParams::new(9, 10, SketchFamily::FullHashSet);
        let sketches = sketch_inputs::<FullHashSet>(
            &[joined, both],
            &params,
            &PipelineOptions::default(),
        )
        .unwrap();
        assert_eq!(sketches[0], sketches[1]);
    }

    #[test]
    fn test_missing_input_aggregated() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_fasta(dir.path(), "a.fna", &["ACGGTTACCATGGATTACAG"]);
        let missing = dir.path().join("nope.fna").to_string_lossy().to_string();
        let params = SketchParams::new(9, 10, SketchFamily::Hll);
        let res = sketch_inputs::<Hll>(&[f1, missing], &params, &PipelineOptions::default());
        assert!(matches!(res, Err(SketchError::Input { .. })));
    }

    #[test]
    fn test_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_fasta(dir.path(), "a.fna", &["ACGGTTACCATGGATTACAGATTACA"]);
        let params = SketchParams::new(9, 10, SketchFamily::Hll);
        let opts = PipelineOptions {
            cache: true,
            prefix: dir.path().join("cache").to_string_lossy().to_string(),
            ..Default::default()
        };
        std::fs::create_dir_all(dir.path().join("cache")).unwrap();
        let first = sketch_inputs::<Hll>(std::slice::from_ref(&f1), &params, &opts).unwrap();
        // second run : the cache file must be loaded, even without the source
        std::fs::remove_file(&f1).unwrap();
        let second = sketch_inputs::<Hll>(&[f1], &params, &opts).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_countmin_filter_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        // one repeated read and one unique read
        let f1 = write_fasta(
            dir.path(),
            "a.fq.fna",
            &[
                "ACGGTTACCATGGATTACAG",
                "ACGGTTACCATGGATTACAG",
                "ACGGTTACCATGGATTACAG",
                "TTTTACCCGGGAATTTACCA",
            ],
        );
        let params = SketchParams::new(9, 10, SketchFamily::FullHashSet);
        let mut cards = Vec::new();
        for min_count in [1u64, 2, 4] {
            let opts = PipelineOptions {
                filtering: Filtering::CountMin,
                min_count,
                cm_log2: 12,
                ..Default::default()
            };
            let sk =
                sketch_inputs::<FullHashSet>(std::slice::from_ref(&f1), &params, &opts).unwrap();
            cards.push(crate::sketching::FinalSketch::cardinality(&sk[0]));
        }
        // raising min_count can only drop kmers
        assert!(cards[0] >= cards[1] && cards[1] >= cards[2]);
        // the repeated read occurs 3 times : it survives min_count 2
        assert!(cards[1] > 0.);
        // nothing occurs 4 times
        assert_eq!(cards[2], 0.);
    }
}
