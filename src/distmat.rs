//! Binary distance matrix reload and pretty print.
//!
//! Layout, little endian : 8 magic bytes identifying the float width, the
//! row count as u64, then the strict upper triangle packed row by row.
//! Labels travel in a sidecar file, one path per line, in row order.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use num::NumCast;

use crate::error::SketchError;

pub const MAGIC_F32: [u8; 8] = *b"SKDMATF4";
pub const MAGIC_F64: [u8; 8] = *b"SKDMATF8";

/// float widths the binary format knows about
pub trait MatrixFloat: num::Float + NumCast + Copy + Send + Sync {
    const MAGIC: [u8; 8];
    fn write_le(self, out: &mut dyn Write) -> std::io::Result<()>;
    fn read_le(input: &mut dyn Read) -> std::io::Result<Self>;
}

impl MatrixFloat for f32 {
    const MAGIC: [u8; 8] = MAGIC_F32;

    fn write_le(self, out: &mut dyn Write) -> std::io::Result<()> {
        out.write_all(&self.to_le_bytes())
    }

    fn read_le(input: &mut dyn Read) -> std::io::Result<f32> {
        let mut buf = [0u8; 4];
        input.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }
}

impl MatrixFloat for f64 {
    const MAGIC: [u8; 8] = MAGIC_F64;

    fn write_le(self, out: &mut dyn Write) -> std::io::Result<()> {
        out.write_all(&self.to_le_bytes())
    }

    fn read_le(input: &mut dyn Read) -> std::io::Result<f64> {
        let mut buf = [0u8; 8];
        input.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }
}

/// a symmetric matrix stored as its strict upper triangle
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceMatrix<F> {
    nb_items: usize,
    data: Vec<F>,
}

impl<F: MatrixFloat> DistanceMatrix<F> {
    pub fn new(nb_items: usize, data: Vec<F>) -> Self {
        assert_eq!(data.len(), nb_items * nb_items.saturating_sub(1) / 2);
        DistanceMatrix { nb_items, data }
    }

    pub fn nb_items(&self) -> usize {
        self.nb_items
    }

    pub fn triangle(&self) -> &[F] {
        &self.data
    }

    /// off diagonal entry, both orders accepted
    pub fn entry(&self, i: usize, j: usize) -> F {
        assert!(i != j && i < self.nb_items && j < self.nb_items);
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        let start = i * (2 * self.nb_items - i - 1) / 2;
        self.data[start + j - i - 1]
    }

    pub fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        out.write_all(&F::MAGIC)?;
        out.write_all(&(self.nb_items as u64).to_le_bytes())?;
        for &v in self.data.iter() {
            v.write_le(out)?;
        }
        Ok(())
    }

    pub fn read_from(input: &mut dyn Read) -> Result<Self, SketchError> {
        let mut magic = [0u8; 8];
        input.read_exact(&mut magic)?;
        if magic != F::MAGIC {
            return Err(SketchError::cache(
                "",
                "matrix magic does not match the requested float width",
            ));
        }
        let mut nbuf = [0u8; 8];
        input.read_exact(&mut nbuf)?;
        let nb_items = u64::from_le_bytes(nbuf) as usize;
        let nb_entries = nb_items * nb_items.saturating_sub(1) / 2;
        let mut data = Vec::with_capacity(nb_entries);
        for _ in 0..nb_entries {
            data.push(F::read_le(input)?);
        }
        Ok(DistanceMatrix { nb_items, data })
    }

    pub fn read_file(path: &str) -> Result<Self, SketchError> {
        let file = File::open(path)
            .map_err(|e| SketchError::input(path, format!("cannot open matrix : {}", e)))?;
        Self::read_from(&mut BufReader::new(file))
    }

    /// full square pretty print with `-` on the diagonal
    pub fn printf(
        &self,
        out: &mut dyn Write,
        labels: &[String],
        scientific: bool,
    ) -> Result<(), SketchError> {
        assert_eq!(labels.len(), self.nb_items);
        let mut header = String::from("##Names");
        for l in labels.iter() {
            header.push('\t');
            header.push_str(l);
        }
        header.push('\n');
        out.write_all(header.as_bytes())?;
        for i in 0..self.nb_items {
            let mut line = labels[i].clone();
            for j in 0..self.nb_items {
                line.push('\t');
                if i == j {
                    line.push('-');
                } else {
                    let v: f64 = <f64 as NumCast>::from(self.entry(i, j)).unwrap();
                    if scientific {
                        line.push_str(&format!("{:e}", v));
                    } else {
                        line.push_str(&format!("{:.6}", v));
                    }
                }
            }
            line.push('\n');
            out.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    /// one `label_i  label_j  value` line per pair
    pub fn flatten(
        &self,
        out: &mut dyn Write,
        labels: &[String],
        scientific: bool,
    ) -> Result<(), SketchError> {
        assert_eq!(labels.len(), self.nb_items);
        for i in 0..self.nb_items {
            for j in i + 1..self.nb_items {
                let v: f64 = <f64 as NumCast>::from(self.entry(i, j)).unwrap();
                let line = if scientific {
                    format!("{}\t{}\t{:e}\n", labels[i], labels[j], v)
                } else {
                    format!("{}\t{}\t{:.6}\n", labels[i], labels[j], v)
                };
                out.write_all(line.as_bytes())?;
            }
        }
        Ok(())
    }
}

/// a matrix of either float width, probed from the magic
pub enum AnyDistanceMatrix {
    F32(DistanceMatrix<f32>),
    F64(DistanceMatrix<f64>),
}

impl AnyDistanceMatrix {
    pub fn read_file(path: &str) -> Result<Self, SketchError> {
        let mut file = File::open(path)
            .map_err(|e| SketchError::input(path, format!("cannot open matrix : {}", e)))?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)
            .map_err(|e| SketchError::cache(path, format!("truncated matrix : {}", e)))?;
        drop(file);
        let file = File::open(path)
            .map_err(|e| SketchError::input(path, format!("cannot open matrix : {}", e)))?;
        let mut reader = BufReader::new(file);
        match magic {
            MAGIC_F32 => Ok(AnyDistanceMatrix::F32(DistanceMatrix::read_from(
                &mut reader,
            )?)),
            MAGIC_F64 => Ok(AnyDistanceMatrix::F64(DistanceMatrix::read_from(
                &mut reader,
            )?)),
            _ => Err(SketchError::cache(path, "unknown matrix magic")),
        }
    }

    pub fn nb_items(&self) -> usize {
        match self {
            AnyDistanceMatrix::F32(m) => m.nb_items(),
            AnyDistanceMatrix::F64(m) => m.nb_items(),
        }
    }

    pub fn printf(
        &self,
        out: &mut dyn Write,
        labels: &[String],
        scientific: bool,
    ) -> Result<(), SketchError> {
        match self {
            AnyDistanceMatrix::F32(m) => m.printf(out, labels, scientific),
            AnyDistanceMatrix::F64(m) => m.printf(out, labels, scientific),
        }
    }

    pub fn flatten(
        &self,
        out: &mut dyn Write,
        labels: &[String],
        scientific: bool,
    ) -> Result<(), SketchError> {
        match self {
            AnyDistanceMatrix::F32(m) => m.flatten(out, labels, scientific),
            AnyDistanceMatrix::F64(m) => m.flatten(out, labels, scientific),
        }
    }
}

/// the labels sidecar : one path per line, LF terminated, row order
pub fn write_labels(path: &str, labels: &[String]) -> Result<(), SketchError> {
    let file = File::create(path)
        .map_err(|e| SketchError::input(path, format!("cannot create labels file : {}", e)))?;
    let mut out = BufWriter::new(file);
    for l in labels.iter() {
        out.write_all(l.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub fn read_labels(path: &str) -> Result<Vec<String>, SketchError> {
    let file = File::open(path)
        .map_err(|e| SketchError::input(path, format!("cannot open labels file : {}", e)))?;
    let reader = BufReader::new(file);
    let mut labels = Vec::new();
    for line in reader.lines() {
        labels.push(line?);
    }
    Ok(labels)
}

//===========================================================================
