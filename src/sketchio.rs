//! This module is dedicated to dump and reload of sketches and to the
//! deterministic cache naming scheme.
//!
//! The cache path of an input is a pure function of the input name and the
//! run parameters :
//! `{prefix/}{basename}.w{window}.{k}.spacing{spacing}.[suf{suffix}.]{p}{family_suffix}`
//! so a later run with the same parameters finds the sketch again without
//! any bookkeeping. Files may be gzip compressed, detected on reload by
//! the gzip magic rather than the name.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::SketchError;
use crate::params::SketchParams;
use crate::sketching::{check_header, write_header, FinalSketch};

/// the single character joining several physical files into one logical input
pub const FNAME_SEP: char = ' ';

/// deterministic sketch cache path for a logical input
pub fn sketch_file_name(
    input: &str,
    params: &SketchParams,
    prefix: &str,
    suffix: &str,
    gzip: bool,
) -> String {
    // several sub paths form one genome, the last one names the sketch
    let last = input.rsplit(FNAME_SEP).next().unwrap_or(input);
    let mut name = String::from(prefix);
    if !prefix.is_empty() {
        if !name.ends_with('/') {
            name.push('/');
        }
        match last.rsplit('/').next() {
            Some(base) => name.push_str(base),
            None => name.push_str(last),
        }
    } else {
        name.push_str(last);
    }
    name.push_str(&format!(
        ".w{}.{}.spacing{}.",
        params.get_window_size(),
        params.get_kmer_size(),
        params.get_spacing()
    ));
    // the weighted wrapper changes sketch contents, keep its files apart
    let mut suf = String::from(suffix);
    if params.get_weighted() {
        suf.push_str("wj");
    }
    if !suf.is_empty() {
        name.push_str(&format!("suf{}.", suf));
    }
    name.push_str(&format!("{}", params.get_log2_sketch_size()));
    name.push_str(params.get_family().suffix());
    if gzip {
        name.push_str(".gz");
    }
    name
}

/// rewrite the empty path slot of a cache corruption error
fn with_path(e: SketchError, path: &str) -> SketchError {
    match e {
        SketchError::CacheCorruption { msg, .. } => SketchError::cache(path, msg),
        SketchError::Io(e) => SketchError::cache(path, format!("truncated sketch : {}", e)),
        other => other,
    }
}

/// dump a finalized sketch, optionally gzip compressed
pub fn write_sketch_file<S: FinalSketch>(
    sketch: &S,
    path: &str,
    params: &SketchParams,
    gzip: bool,
) -> Result<(), SketchError> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| SketchError::input(path, format!("cannot create sketch file : {}", e)))?;
    let mut out: Box<dyn Write> = if gzip {
        Box::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
    } else {
        Box::new(BufWriter::new(file))
    };
    write_header(&mut *out, S::family(), params)?;
    sketch.write_to(&mut *out)?;
    out.flush()?;
    Ok(())
}

/// reload a sketch, verifying the parameter echo in its header.
/// Compression is probed from the gzip magic bytes.
pub fn read_sketch_file<S: FinalSketch>(
    path: &str,
    params: &SketchParams,
) -> Result<S, SketchError> {
    let mut probe = [0u8; 2];
    let mut file = File::open(path)
        .map_err(|e| SketchError::input(path, format!("cannot open sketch file : {}", e)))?;
    let gzipped = match file.read(&mut probe) {
        Ok(2) => probe == [0x1f, 0x8b],
        _ => false,
    };
    drop(file);
    let file = File::open(path)
        .map_err(|e| SketchError::input(path, format!("cannot open sketch file : {}", e)))?;
    let mut input: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    check_header(&mut *input, S::family(), params).map_err(|e| with_path(e, path))?;
    S::read_from(&mut *input, params).map_err(|e| with_path(e, path))
}

pub fn sketch_file_exists(path: &str) -> bool {
    Path::new(path).is_file()
}

//===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SketchFamily;
    use crate::sketching::countmin::splitmix64;
    use crate::sketching::{Hll, KmerSketcher};

    #[test]
    fn test_sketch_file_name() {
        let params = SketchParams::new(31, 16, SketchFamily::Hll);
        assert_eq!(
            sketch_file_name("data/g1.fna", &params, "", "", false),
            "data/g1.fna.w31.31.spacing.16.hll"
        );
        // prefix replaces the directory
        assert_eq!(
            sketch_file_name("data/g1.fna", &params, "cache", "", false),
            "cache/g1.fna.w31.31.spacing.16.hll"
        );
        // multi file input is named after the last sub path
        assert_eq!(
            sketch_file_name("a.fna b.fna", &params, "", "", false),
            "b.fna.w31.31.spacing.16.hll"
        );
        // suffix, window, gz
        let params = SketchParams::new(21, 14, SketchFamily::RangeMinHash).with_window(40);
        assert_eq!(
            sketch_file_name("g.fa", &params, "", "x1", true),
            "g.fa.w40.21.spacing.sufx1.14.rmh.gz"
        );
    }

    #[test]
    fn test_weighted_marker() {
        let params = SketchParams::new(31, 16, SketchFamily::Hll).with_weighted(true);
        assert_eq!(
            sketch_file_name("g.fa", &params, "", "", false),
            "g.fa.w31.31.spacing.sufwj.16.hll"
        );
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let params = SketchParams::new(31, 10, SketchFamily::Hll);
        let mut h = Hll::new(&params);
        for i in 0..500u64 {
            h.add_hash(splitmix64(i));
        }
        let fin = h.finalize();
        for gz in [false, true] {
            let path = dir
                .path()
                .join(if gz { "s.hll.gz" } else { "s.hll" })
                .to_string_lossy()
                .to_string();
            write_sketch_file(&fin, &path, &params, gz).unwrap();
            let back: Hll = read_sketch_file(&path, &params).unwrap();
            assert_eq!(fin, back);
        }
    }

    #[test]
    fn test_mismatch_is_cache_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let params = SketchParams::new(31, 10, SketchFamily::Hll);
        let mut h = Hll::new(&params);
        h.add_hash(12345);
        let fin = h.finalize();
        let path = dir.path().join("s.hll").to_string_lossy().to_string();
        write_sketch_file(&fin, &path, &params, false).unwrap();
        // different k on reload
        let other = SketchParams::new(21, 10, SketchFamily::Hll);
        let res: Result<Hll, _> = read_sketch_file(&path, &other);
        assert!(matches!(res, Err(SketchError::CacheCorruption { .. })));
        // truncated file
        std::fs::write(&path, b"\x00\x01").unwrap();
        let res: Result<Hll, _> = read_sketch_file(&path, &params);
        assert!(matches!(res, Err(SketchError::CacheCorruption { .. })));
    }
}
