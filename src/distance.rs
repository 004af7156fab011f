//! The distance engine : all-pairs (strict upper triangle) or
//! queries x references evaluation over finalized sketches.
//!
//! Rows are computed in parallel (rayon over the inner index) into one of
//! two reusable buffers while the previous row is formatted and written by
//! a dedicated writer thread ; a bounded crossbeam channel pair keeps
//! exactly one write outstanding. In symmetric mode the sketch of row i is
//! released as soon as its row is computed, so memory shrinks as the
//! triangle is walked.

use std::io::Write;
use std::sync::Mutex;

use crossbeam_channel::bounded;
use log::debug;
use rayon::prelude::*;

use crate::error::SketchError;
use crate::params::{EmitFormat, ResultType, SketchParams};
use crate::sketching::FinalSketch;

#[derive(Clone, Debug)]
pub struct DistOptions {
    pub result_type: ResultType,
    pub emit_fmt: EmitFormat,
    pub use_scientific: bool,
    /// binary rows as f32 instead of f64
    pub emit_float: bool,
}

impl Default for DistOptions {
    fn default() -> Self {
        DistOptions {
            result_type: ResultType::Ji,
            emit_fmt: EmitFormat::UpperTriTsv,
            use_scientific: false,
            emit_float: false,
        }
    }
}

/// asymmetric result types require query/reference mode ; this is checked
/// at engine construction, never silently worked around
pub fn check_engine_config(tag: ResultType, symmetric: bool) -> Result<(), SketchError> {
    if symmetric && !tag.is_symmetric() {
        return Err(SketchError::Config(format!(
            "result type {:?} is asymmetric and requires query/reference mode",
            tag
        )));
    }
    Ok(())
}

/// phylip describes a square matrix ; a rectangular query/reference block
/// cannot be expressed in it and is rejected up front
pub fn check_emit_config(emit: EmitFormat, symmetric: bool) -> Result<(), SketchError> {
    if !symmetric && emit == EmitFormat::PhylipUpperTri {
        return Err(SketchError::Config(
            "phylip emission is defined for all-pairs mode only".to_string(),
        ));
    }
    Ok(())
}

/// the mash distance adapter from the jaccard index
/// (from Mash, Ondov et al.)
pub fn dist_index(ji: f64, kinv: f64) -> f64 {
    if ji == 0. {
        1.
    } else {
        -(2. * ji / (1. + ji)).ln() * kinv
    }
}

/// one matrix cell
pub fn eval_result<S: FinalSketch>(
    tag: ResultType,
    a: &S,
    b: &S,
    kinv: f64,
) -> Result<f64, SketchError> {
    match tag {
        ResultType::Ji => Ok(a.jaccard(b)),
        ResultType::MashDist => Ok(dist_index(a.jaccard(b), kinv)),
        ResultType::FullMashDist => {
            let ji = a.jaccard(b);
            Ok(1. - (2. * ji / (1. + ji)).powf(kinv))
        }
        ResultType::Sizes => Ok(a.union_size(b)),
        ResultType::ContainmentIndex => a.containment(b),
        ResultType::ContainmentDist => {
            let c = a.containment(b)?;
            Ok(if c == 0. { 1. } else { -c.ln() * kinv })
        }
        ResultType::FullContainmentDist => {
            let c = a.containment(b)?;
            Ok(1. - c.powf(kinv))
        }
        ResultType::SymContainmentIndex => {
            Ok(a.containment(b)?.max(b.containment(a)?))
        }
        ResultType::SymContainmentDist => {
            let c = a.containment(b)?.max(b.containment(a)?);
            Ok(if c == 0. {
                1.
            } else {
                -(2. * c / (1. + c)).ln() * kinv
            })
        }
    }
}

fn format_value(v: f64, scientific: bool) -> String {
    if scientific {
        format!("{:e}", v)
    } else {
        format!("{:.6}", v)
    }
}

/// push the binary form of a row slice, respecting the float width
fn push_binary(bytes: &mut Vec<u8>, row: &[f64], emit_float: bool) {
    if emit_float {
        for &v in row {
            bytes.extend_from_slice(&(v as f32).to_le_bytes());
        }
    } else {
        for &v in row {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }
}

/// render one row. `fillers` is the number of leading `-` cells
/// (upper-triangular TSV only).
fn render_row(
    label: &str,
    row: &[f64],
    fillers: usize,
    opts: &DistOptions,
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16 * row.len() + label.len() + 2 * fillers + 16);
    match opts.emit_fmt {
        EmitFormat::Binary => push_binary(&mut bytes, row, opts.emit_float),
        EmitFormat::UpperTriTsv | EmitFormat::FullTsv => {
            bytes.extend_from_slice(label.as_bytes());
            for _ in 0..fillers {
                bytes.extend_from_slice(b"\t-");
            }
            for &v in row {
                bytes.push(b'\t');
                bytes.extend_from_slice(format_value(v, opts.use_scientific).as_bytes());
            }
            bytes.push(b'\n');
        }
        EmitFormat::PhylipUpperTri => {
            bytes.extend_from_slice(format!("{:<10}", label).as_bytes());
            for &v in row {
                bytes.push(b'\t');
                bytes.extend_from_slice(format_value(v, opts.use_scientific).as_bytes());
            }
            bytes.push(b'\n');
        }
    }
    bytes
}

/// row description handed to the writer future
struct RowMsg {
    label: String,
    fillers: usize,
    len: usize,
    buf: Vec<f64>,
}

/// drive the two-buffer compute/write pipeline. `fill` computes row i into
/// the buffer and returns (label, fillers, len) ; rows stream to `out`
/// through the writer thread, one outstanding write at a time.
fn row_pipeline<W, F>(
    nb_rows: usize,
    max_row: usize,
    opts: &DistOptions,
    out: &mut W,
    mut fill: F,
) -> Result<(), SketchError>
where
    W: Write + Send,
    F: FnMut(usize, &mut [f64]) -> Result<(String, usize, usize), SketchError>,
{
    let (row_tx, row_rx) = bounded::<RowMsg>(1);
    let (buf_tx, buf_rx) = bounded::<Vec<f64>>(2);
    // the two reusable row buffers
    for _ in 0..2 {
        buf_tx.send(vec![0f64; max_row]).expect("buffer channel");
    }
    std::thread::scope(|scope| -> Result<(), SketchError> {
        let writer = scope.spawn(|| -> Result<(), SketchError> {
            for msg in row_rx.iter() {
                let bytes = render_row(&msg.label, &msg.buf[..msg.len], msg.fillers, opts);
                out.write_all(&bytes)?;
                // hand the buffer back, the engine may already be done
                let _ = buf_tx.send(msg.buf);
            }
            out.flush()?;
            Ok(())
        });
        let mut compute_err = None;
        for i in 0..nb_rows {
            let mut buf = buf_rx.recv().expect("row buffer");
            match fill(i, &mut buf) {
                Ok((label, fillers, len)) => {
                    row_tx
                        .send(RowMsg {
                            label,
                            fillers,
                            len,
                            buf,
                        })
                        .expect("writer alive");
                }
                Err(e) => {
                    compute_err = Some(e);
                    break;
                }
            }
        }
        drop(row_tx);
        let write_res = writer.join().expect("writer thread");
        if let Some(e) = compute_err {
            return Err(e);
        }
        write_res
    })
}

/// all-pairs mode : the strict upper triangle, row by row.
/// `sketches` is consumed ; slot i is dropped once row i is written out of
/// the compute loop (kept alive in FullTsv mode where late rows still need
/// early sketches).
pub fn symmetric_distances<S, W>(
    sketches: Vec<S>,
    labels: &[String],
    params: &SketchParams,
    opts: &DistOptions,
    out: &mut W,
) -> Result<(), SketchError>
where
    S: FinalSketch,
    W: Write + Send,
{
    check_engine_config(opts.result_type, true)?;
    let n = sketches.len();
    assert_eq!(n, labels.len());
    if n == 0 {
        return Ok(());
    }
    let kinv = 1. / params.get_kmer_size() as f64;
    let full = opts.emit_fmt == EmitFormat::FullTsv;
    let tag = opts.result_type;
    let mut slots: Vec<Option<S>> = sketches.into_iter().map(Some).collect();
    //
    row_pipeline(n, n, opts, out, |i, buf| {
        let len = if full { n } else { n - i - 1 };
        let err_slot = Mutex::new(None::<SketchError>);
        {
            let a = slots[i].as_ref().expect("sketch released too early");
            let slots_ref = &slots;
            buf[..len].par_iter_mut().enumerate().for_each(|(jj, cell)| {
                let j = if full { jj } else { i + 1 + jj };
                let b = slots_ref[j].as_ref().expect("sketch released too early");
                match eval_result(tag, a, b, kinv) {
                    Ok(v) => *cell = v,
                    Err(e) => {
                        let mut guard = err_slot.lock().unwrap();
                        if guard.is_none() {
                            *guard = Some(e);
                        }
                    }
                }
            });
        }
        if let Some(e) = err_slot.into_inner().unwrap() {
            return Err(e);
        }
        if !full {
            // row i is done, nobody reads sketch i anymore
            slots[i] = None;
        }
        debug!("finished row {} of {}", i + 1, n);
        let fillers = if full || opts.emit_fmt != EmitFormat::UpperTriTsv {
            0
        } else {
            i + 1
        };
        Ok((labels[i].clone(), fillers, len))
    })
}

/// query/reference mode : the rectangular Q x R block, one row per query
pub fn query_reference_distances<S, W>(
    references: &[S],
    queries: &[S],
    query_labels: &[String],
    params: &SketchParams,
    opts: &DistOptions,
    out: &mut W,
) -> Result<(), SketchError>
where
    S: FinalSketch,
    W: Write + Send,
{
    check_emit_config(opts.emit_fmt, false)?;
    let r = references.len();
    let q = queries.len();
    assert_eq!(q, query_labels.len());
    if q == 0 || r == 0 {
        return Ok(());
    }
    let kinv = 1. / params.get_kmer_size() as f64;
    let tag = opts.result_type;
    //
    row_pipeline(q, r, opts, out, |qi, buf| {
        let err_slot = Mutex::new(None::<SketchError>);
        let query = &queries[qi];
        buf[..r].par_iter_mut().enumerate().for_each(|(j, cell)| {
            match eval_result(tag, query, &references[j], kinv) {
                Ok(v) => *cell = v,
                Err(e) => {
                    let mut guard = err_slot.lock().unwrap();
                    if guard.is_none() {
                        *guard = Some(e);
                    }
                }
            }
        });
        if let Some(e) = err_slot.into_inner().unwrap() {
            return Err(e);
        }
        Ok((query_labels[qi].clone(), 0, r))
    })
}

//===========================================================================
