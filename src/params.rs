//! Sketching parameters shared by the whole run.
//! These are immutable once the orchestrator has built them : the sketch
//! files on disk echo them back and a mismatch on reload is treated as
//! cache corruption.

use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::to_writer;

use crate::error::SketchError;

/// the sketch families we know how to build.
/// The tag drives file suffix selection and the capacity conversion from
/// the log2 byte budget.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SketchFamily {
    Hll,
    Bloom,
    RangeMinHash,
    CountingRangeMinHash,
    FullHashSet,
    BBitMinHash,
    SuperMinHash,
    CountingBBitMinHash,
}

impl SketchFamily {
    /// stable file suffix, appended to cache file names
    pub fn suffix(&self) -> &'static str {
        match self {
            SketchFamily::Hll => ".hll",
            SketchFamily::Bloom => ".bf",
            SketchFamily::RangeMinHash => ".rmh",
            SketchFamily::CountingRangeMinHash => ".crmh",
            SketchFamily::FullHashSet => ".khs",
            SketchFamily::BBitMinHash => ".bmh",
            SketchFamily::SuperMinHash => ".bbs",
            SketchFamily::CountingBBitMinHash => ".cbmh",
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            SketchFamily::Hll => 0,
            SketchFamily::Bloom => 1,
            SketchFamily::RangeMinHash => 2,
            SketchFamily::CountingRangeMinHash => 3,
            SketchFamily::FullHashSet => 4,
            SketchFamily::BBitMinHash => 5,
            SketchFamily::SuperMinHash => 6,
            SketchFamily::CountingBBitMinHash => 7,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, SketchError> {
        match name {
            "hll" => Ok(SketchFamily::Hll),
            "bloom" | "bf" => Ok(SketchFamily::Bloom),
            "rmh" | "minhash" => Ok(SketchFamily::RangeMinHash),
            "crmh" => Ok(SketchFamily::CountingRangeMinHash),
            "set" | "khs" => Ok(SketchFamily::FullHashSet),
            "bmh" => Ok(SketchFamily::BBitMinHash),
            "bbs" | "superminhash" => Ok(SketchFamily::SuperMinHash),
            "cbmh" => Ok(SketchFamily::CountingBBitMinHash),
            _ => Err(SketchError::Config(format!(
                "unknown sketch family : {}",
                name
            ))),
        }
    }
}

/// how kmers are turned into 64 bit hashes
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// exact 2-bit packed kmer, k <= 32, spaced seeds and minimizers allowed
    Bonsai,
    /// ntHash rolling hash, k <= 64, ambiguous bases are hashed as-is
    NtHash,
    /// rotate-xor rolling hash, k <= 64, ambiguous bases reset the window
    Cyclic,
}

impl Encoding {
    pub fn from_name(name: &str) -> Result<Self, SketchError> {
        match name {
            "bonsai" | "exact" => Ok(Encoding::Bonsai),
            "nthash" => Ok(Encoding::NtHash),
            "cyclic" => Ok(Encoding::Cyclic),
            _ => Err(SketchError::Config(format!("unknown encoding : {}", name))),
        }
    }
}

/// minimizer scoring inside a window
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowScore {
    Lex,
    Entropy,
}

/// count-min gating policy in front of the sketch
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filtering {
    None,
    /// every input goes through the count-min gate
    CountMin,
    /// only inputs whose path contains ".fq" or ".fastq" (case sensitive)
    ByFilename,
}

/// HyperLogLog cardinality estimator selectors
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HllEstimator {
    Original,
    ErtlImproved,
    ErtlMle,
    ErtlJointMle,
}

impl HllEstimator {
    pub fn tag(&self) -> u8 {
        match self {
            HllEstimator::Original => 0,
            HllEstimator::ErtlImproved => 1,
            HllEstimator::ErtlMle => 2,
            HllEstimator::ErtlJointMle => 3,
        }
    }
}

/// what number is emitted for a pair of sketches
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    Ji,
    MashDist,
    FullMashDist,
    Sizes,
    ContainmentIndex,
    ContainmentDist,
    FullContainmentDist,
    SymContainmentIndex,
    SymContainmentDist,
}

impl ResultType {
    /// symmetric result types may run in all-pairs mode, the others require
    /// query/reference mode
    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            ResultType::Ji
                | ResultType::MashDist
                | ResultType::FullMashDist
                | ResultType::Sizes
                | ResultType::SymContainmentIndex
                | ResultType::SymContainmentDist
        )
    }

    pub fn from_name(name: &str) -> Result<Self, SketchError> {
        match name {
            "ji" => Ok(ResultType::Ji),
            "mash" => Ok(ResultType::MashDist),
            "full-mash" => Ok(ResultType::FullMashDist),
            "sizes" => Ok(ResultType::Sizes),
            "containment" => Ok(ResultType::ContainmentIndex),
            "containment-dist" => Ok(ResultType::ContainmentDist),
            "full-containment-dist" => Ok(ResultType::FullContainmentDist),
            "sym-containment" => Ok(ResultType::SymContainmentIndex),
            "sym-containment-dist" => Ok(ResultType::SymContainmentDist),
            _ => Err(SketchError::Config(format!(
                "unknown result type : {}",
                name
            ))),
        }
    }
}

/// layout of the emitted matrix
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmitFormat {
    UpperTriTsv,
    PhylipUpperTri,
    FullTsv,
    Binary,
}

impl EmitFormat {
    pub fn from_name(name: &str) -> Result<Self, SketchError> {
        match name {
            "tsv" | "upper-tri" => Ok(EmitFormat::UpperTriTsv),
            "phylip" => Ok(EmitFormat::PhylipUpperTri),
            "full-tsv" => Ok(EmitFormat::FullTsv),
            "binary" => Ok(EmitFormat::Binary),
            _ => Err(SketchError::Config(format!(
                "unknown emission format : {}",
                name
            ))),
        }
    }
}

/// All parameters defining sketch contents. Two sketches are comparable
/// only when built from equal parameters ; the serialized form echoes the
/// relevant fields so a reload can verify them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SketchParams {
    kmer_size: usize,
    window_size: usize,
    spacing: String,
    log2_sketch_size: u32,
    b_bits: u32,
    canonical: bool,
    family: SketchFamily,
    encoding: Encoding,
    window_score: WindowScore,
    weighted: bool,
    hll_estim: HllEstimator,
    hll_jestim: HllEstimator,
    /// geometry of the multiplicity count-min of the weighted wrapper
    weight_cm_log2: u32,
    weight_cm_nhashes: u32,
    run_seed: u64,
}

impl Default for SketchParams {
    fn default() -> Self {
        SketchParams {
            kmer_size: 31,
            window_size: 0,
            spacing: String::new(),
            log2_sketch_size: 16,
            b_bits: 16,
            canonical: true,
            family: SketchFamily::Hll,
            encoding: Encoding::Bonsai,
            window_score: WindowScore::Lex,
            weighted: false,
            hll_estim: HllEstimator::ErtlMle,
            hll_jestim: HllEstimator::ErtlJointMle,
            weight_cm_log2: 16,
            weight_cm_nhashes: 8,
            run_seed: 1337,
        }
    }
}

impl SketchParams {
    pub fn new(kmer_size: usize, log2_sketch_size: u32, family: SketchFamily) -> Self {
        SketchParams {
            kmer_size,
            log2_sketch_size,
            family,
            ..Default::default()
        }
    }

    // the with_ setters cover the less common knobs

    pub fn with_window(mut self, w: usize) -> Self {
        self.window_size = w;
        self
    }

    pub fn with_family(mut self, family: SketchFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_spacing(mut self, spacing: &str) -> Self {
        self.spacing = spacing.to_string();
        self
    }

    pub fn with_b_bits(mut self, b: u32) -> Self {
        self.b_bits = b;
        self
    }

    pub fn with_canonical(mut self, canonical: bool) -> Self {
        self.canonical = canonical;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_window_score(mut self, score: WindowScore) -> Self {
        self.window_score = score;
        self
    }

    pub fn with_weighted(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    pub fn with_estimators(mut self, estim: HllEstimator, jestim: HllEstimator) -> Self {
        self.hll_estim = estim;
        self.hll_jestim = jestim;
        self
    }

    pub fn with_weight_cm(mut self, cm_log2: u32, cm_nhashes: u32) -> Self {
        self.weight_cm_log2 = cm_log2;
        self.weight_cm_nhashes = cm_nhashes;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.run_seed = seed;
        self
    }

    pub fn get_kmer_size(&self) -> usize {
        self.kmer_size
    }

    /// effective window size : at least the span of the (spaced) kmer
    pub fn get_window_size(&self) -> usize {
        self.window_size.max(self.kmer_span())
    }

    pub fn get_spacing(&self) -> &str {
        &self.spacing
    }

    pub fn get_log2_sketch_size(&self) -> u32 {
        self.log2_sketch_size
    }

    pub fn get_b_bits(&self) -> u32 {
        self.b_bits
    }

    pub fn get_canonical(&self) -> bool {
        self.canonical
    }

    pub fn get_family(&self) -> SketchFamily {
        self.family
    }

    pub fn get_encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn get_window_score(&self) -> WindowScore {
        self.window_score
    }

    pub fn get_weighted(&self) -> bool {
        self.weighted
    }

    pub fn get_hll_estim(&self) -> HllEstimator {
        self.hll_estim
    }

    pub fn get_hll_jestim(&self) -> HllEstimator {
        self.hll_jestim
    }

    pub fn get_weight_cm_log2(&self) -> u32 {
        self.weight_cm_log2
    }

    pub fn get_weight_cm_nhashes(&self) -> u32 {
        self.weight_cm_nhashes
    }

    pub fn get_run_seed(&self) -> u64 {
        self.run_seed
    }

    /// number of bases covered by the kmer once spacing is applied
    pub fn kmer_span(&self) -> usize {
        match parse_spacing(&self.spacing, self.kmer_size) {
            Ok(skips) => self.kmer_size + skips.iter().map(|&s| s as usize).sum::<usize>(),
            Err(_) => self.kmer_size,
        }
    }

    // capacity conversions : every family translates the log2 byte budget
    // to its own unit

    /// HLL : one byte per register
    pub fn nb_registers(&self) -> usize {
        1usize << self.log2_sketch_size
    }

    /// Bloom filter : 8 bits per byte
    pub fn bloom_bits(&self) -> usize {
        1usize << (self.log2_sketch_size + 3)
    }

    /// bottom-k minhash : 8 byte minima
    pub fn nb_minima(&self) -> usize {
        1usize << (self.log2_sketch_size.saturating_sub(3)).max(1)
    }

    /// b-bit minhash : 2^p * 8 / b signatures
    pub fn nb_bbit_signatures(&self) -> usize {
        (((1u64 << self.log2_sketch_size) * 8) / self.b_bits as u64).max(1) as usize
    }

    /// superminhash slot count, same budget rule as bottom-k
    pub fn superminhash_size(&self) -> usize {
        self.nb_minima()
    }

    /// check the parameter combination before any work starts
    pub fn validate(&self) -> Result<(), SketchError> {
        if self.kmer_size == 0 || self.kmer_size > 64 {
            return Err(SketchError::Config(format!(
                "kmer size {} out of range [1,64]",
                self.kmer_size
            )));
        }
        if self.log2_sketch_size == 0 || self.log2_sketch_size > 32 {
            return Err(SketchError::Config(format!(
                "log2 sketch size {} out of range [1,32]",
                self.log2_sketch_size
            )));
        }
        if !matches!(self.b_bits, 1 | 2 | 4 | 8 | 16 | 32 | 64) {
            return Err(SketchError::Config(format!(
                "b_bits {} must be a power of two in [1,64]",
                self.b_bits
            )));
        }
        match self.encoding {
            Encoding::Bonsai => {
                if self.kmer_size > 32 {
                    return Err(SketchError::Config(format!(
                        "exact encoding supports k <= 32, got {}",
                        self.kmer_size
                    )));
                }
                // spacing string must parse
                parse_spacing(&self.spacing, self.kmer_size)?;
            }
            Encoding::NtHash | Encoding::Cyclic => {
                if !self.spacing.is_empty() {
                    return Err(SketchError::Config(
                        "spaced seeds require the exact encoding".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// serialized dump of the run parameters next to the sketches
    pub fn dump_json(&self, dirpath: &Path) -> Result<(), SketchError> {
        let filepath = dirpath.join("sketchparams_dump.json");
        log::info!("dumping sketching parameters in json file {:?}", filepath);
        let fileres = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&filepath);
        let file = match fileres {
            Ok(f) => f,
            Err(e) => {
                log::error!("SketchParams dump : could not open file {:?}", filepath);
                return Err(SketchError::Io(e));
            }
        };
        let mut writer = BufWriter::new(file);
        to_writer(&mut writer, &self)
            .map_err(|e| SketchError::Config(format!("params dump failed : {}", e)))?;
        Ok(())
    }

    /// reload from a json dump
    pub fn reload_json(dirpath: &Path) -> Result<SketchParams, SketchError> {
        let filepath = dirpath.join("sketchparams_dump.json");
        let fileres = OpenOptions::new().read(true).open(&filepath);
        let file = match fileres {
            Ok(f) => f,
            Err(e) => {
                log::error!("SketchParams reload : could not open file {:?}", filepath);
                return Err(SketchError::Io(e));
            }
        };
        let reader = BufReader::new(file);
        let params: SketchParams = serde_json::from_reader(reader)
            .map_err(|e| SketchError::Config(format!("params reload failed : {}", e)))?;
        log::info!(
            "SketchParams reload, kmer_size : {}, log2 size : {}",
            params.get_kmer_size(),
            params.get_log2_sketch_size()
        );
        Ok(params)
    }
}

/// parse a spacing specification of the form `<skip>x<times>,<skip>x<times>,...`
/// where skip is the number of ignored bases inserted after a kmer position
/// and times how many positions it applies to. Omitting `x<times>` means one
/// occurrence. Returns one skip per kmer position but the last, zero padded.
pub fn parse_spacing(spacing: &str, k: usize) -> Result<Vec<u8>, SketchError> {
    let mut skips = Vec::<u8>::with_capacity(k.saturating_sub(1));
    if !spacing.is_empty() {
        for item in spacing.split(',') {
            let (skip_s, times_s) = match item.split_once('x') {
                Some((a, b)) => (a, b),
                None => (item, "1"),
            };
            let skip: u8 = skip_s.parse().map_err(|_| {
                SketchError::Config(format!("bad spacing item : {}", item))
            })?;
            let times: usize = times_s.parse().map_err(|_| {
                SketchError::Config(format!("bad spacing item : {}", item))
            })?;
            for _ in 0..times {
                skips.push(skip);
            }
        }
        if skips.len() > k.saturating_sub(1) {
            return Err(SketchError::Config(format!(
                "spacing covers {} gaps but k = {} has only {}",
                skips.len(),
                k,
                k - 1
            )));
        }
    }
    skips.resize(k.saturating_sub(1), 0);
    Ok(skips)
}

//===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spacing() {
        let skips = parse_spacing("", 5).unwrap();
        assert_eq!(skips, vec![0, 0, 0, 0]);
        //
        let skips = parse_spacing("1x2,2", 5).unwrap();
        assert_eq!(skips, vec![1, 1, 2, 0]);
        //
        assert!(parse_spacing("1x7", 5).is_err());
        assert!(parse_spacing("yx2", 5).is_err());
    }

    #[test]
    fn test_capacities() {
        let params = SketchParams::new(21, 10, SketchFamily::Hll);
        assert_eq!(params.nb_registers(), 1024);
        assert_eq!(params.bloom_bits(), 8192);
        assert_eq!(params.nb_minima(), 128);
        // 2^10 bytes at 16 bits a signature
        assert_eq!(params.with_b_bits(16).nb_bbit_signatures(), 512);
    }

    #[test]
    fn test_validate() {
        assert!(SketchParams::new(31, 16, SketchFamily::Hll).validate().is_ok());
        // exact encoding caps k at 32
        assert!(SketchParams::new(33, 16, SketchFamily::Hll).validate().is_err());
        assert!(SketchParams::new(33, 16, SketchFamily::Hll)
            .with_encoding(Encoding::NtHash)
            .validate()
            .is_ok());
        // no spacing on rolling encoders
        assert!(SketchParams::new(31, 16, SketchFamily::Hll)
            .with_encoding(Encoding::Cyclic)
            .with_spacing("1x2")
            .validate()
            .is_err());
        assert!(SketchParams::new(31, 0, SketchFamily::Hll).validate().is_err());
    }

    #[test]
    fn test_kmer_span() {
        let params = SketchParams::new(5, 10, SketchFamily::Hll).with_spacing("1x2");
        assert_eq!(params.kmer_span(), 7);
        assert_eq!(params.get_window_size(), 7);
        assert_eq!(params.with_window(12).get_window_size(), 12);
    }
}
