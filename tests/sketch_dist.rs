//! End to end scenarios over the sketching pipeline and the distance
//! engine, driven through temporary fasta files.

use std::io::Write as _;

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use sketchdist::distance::{eval_result, symmetric_distances, DistOptions};
use sketchdist::distmat::{read_labels, write_labels, DistanceMatrix, MAGIC_F32};
use sketchdist::params::{EmitFormat, ResultType, SketchFamily, SketchParams};
use sketchdist::pipeline::{sketch_inputs, PipelineOptions};
use sketchdist::sketching::{FinalSketch, FullHashSet, Hll, KmerSketcher, RangeMinHash};

fn write_fasta(dir: &std::path::Path, name: &str, seqs: &[&str]) -> String {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    for (i, s) in seqs.iter().enumerate() {
        writeln!(f, ">seq{}", i).unwrap();
        writeln!(f, "{}", s).unwrap();
    }
    path.to_string_lossy().to_string()
}

fn random_dna(len: usize, seed: u64) -> String {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    (0..len)
        .map(|_| match rng.gen_range(0..4) {
            0 => 'A',
            1 => 'C',
            2 => 'G',
            _ => 'T',
        })
        .collect()
}

/// reference count of distinct canonical kmers, string based
fn exact_canonical_kmers(seq: &str, k: usize) -> usize {
    fn revcomp(s: &str) -> String {
        s.chars()
            .rev()
            .map(|c| match c {
                'A' => 'T',
                'C' => 'G',
                'G' => 'C',
                _ => 'A',
            })
            .collect()
    }
    let mut set = std::collections::HashSet::new();
    let bytes = seq.as_bytes();
    for i in 0..=seq.len().saturating_sub(k) {
        let fwd = std::str::from_utf8(&bytes[i..i + k]).unwrap().to_string();
        let rc = revcomp(&fwd);
        set.insert(fwd.min(rc));
    }
    set.len()
}

// scenario S1 : a small repetitive sequence sketched into a tiny HLL
#[test]
fn tiny_hll_estimate() {
    let dir = tempfile::tempdir().unwrap();
    // a 30 base pattern repeated to 200 bases keeps the distinct 5-mer
    // count near 30
    let pattern = "ACGGTTACCATGGATTACAGCCTTAGACGG";
    let seq: String = pattern.repeat(7)[..200].to_string();
    let exact = exact_canonical_kmers(&seq, 5);
    assert!(exact >= 20 && exact <= 35, "pattern gives {} kmers", exact);
    //
    let f = write_fasta(dir.path(), "tiny.fna", &[&seq]);
    let params = SketchParams::new(5, 10, SketchFamily::Hll);
    let sketches = sketch_inputs::<Hll>(&[f], &params, &PipelineOptions::default()).unwrap();
    let est = sketches[0].cardinality();
    let tol = (0.17 * exact as f64).max(5.);
    assert!(
        (est - exact as f64).abs() <= tol,
        "estimated {} for {} distinct kmers",
        est,
        exact
    );
    assert!((sketches[0].jaccard(&sketches[0]) - 1.).abs() < 1e-12);
}

// scenario S2 : the same fasta twice gives ji 1 and mash distance 0
#[test]
fn identical_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let seq = random_dna(2000, 42);
    let f1 = write_fasta(dir.path(), "a.fna", &[&seq]);
    let f2 = write_fasta(dir.path(), "b.fna", &[&seq]);
    //
    for_family_pair(&[f1, f2], |ji, mash| {
        assert_eq!(ji, 1.0);
        assert_eq!(mash, 0.0);
    });
}

fn for_family_pair(inputs: &[String], check: impl Fn(f64, f64)) {
    let opts = PipelineOptions::default();
    let kinv = 1. / 21f64;
    {
        let params = SketchParams::new(21, 12, SketchFamily::Hll);
        let s = sketch_inputs::<Hll>(inputs, &params, &opts).unwrap();
        let ji = s[0].jaccard(&s[1]);
        check(ji, sketchdist::distance::dist_index(ji, kinv));
    }
    {
        let params = SketchParams::new(21, 12, SketchFamily::RangeMinHash);
        let s = sketch_inputs::<RangeMinHash>(inputs, &params, &opts).unwrap();
        let ji = s[0].jaccard(&s[1]);
        check(ji, sketchdist::distance::dist_index(ji, kinv));
    }
}

// scenario S3 : sequences sharing no kmer
#[test]
fn disjoint_inputs() {
    let dir = tempfile::tempdir().unwrap();
    // kmers of the first live on {A,C}, of the second on {A,G} ; neither
    // collides with the other, on either strand
    let f1 = write_fasta(dir.path(), "ac.fna", &[&"AACC".repeat(60)]);
    let f2 = write_fasta(dir.path(), "ag.fna", &[&"AAGG".repeat(60)]);
    let inputs = [f1, f2];
    //
    let params = SketchParams::new(16, 14, SketchFamily::FullHashSet);
    let s = sketch_inputs::<FullHashSet>(&inputs, &params, &PipelineOptions::default()).unwrap();
    assert_eq!(s[0].jaccard(&s[1]), 0.0);
    //
    let params = SketchParams::new(16, 14, SketchFamily::Hll);
    let s = sketch_inputs::<Hll>(&inputs, &params, &PipelineOptions::default()).unwrap();
    assert!(s[0].jaccard(&s[1]).abs() < 0.01);
}

// scenario S4 : a cached sketch makes the source file unnecessary
#[test]
fn cache_hit_skips_source() {
    let dir = tempfile::tempdir().unwrap();
    let seq = random_dna(3000, 7);
    let f = write_fasta(dir.path(), "g.fna", &[&seq]);
    let params = SketchParams::new(21, 12, SketchFamily::Hll);
    let opts = PipelineOptions {
        cache: true,
        ..Default::default()
    };
    let first = sketch_inputs::<Hll>(std::slice::from_ref(&f), &params, &opts).unwrap();
    // the source is gone, only the cache can answer
    std::fs::remove_file(&f).unwrap();
    let second = sketch_inputs::<Hll>(std::slice::from_ref(&f), &params, &opts).unwrap();
    assert_eq!(first, second);
    // without the cache the run now fails
    let res = sketch_inputs::<Hll>(&[f], &params, &PipelineOptions::default());
    assert!(res.is_err());
}

// scenario S5 : containment asymmetry between a genome and a fragment
#[test]
fn containment_asymmetry() {
    let dir = tempfile::tempdir().unwrap();
    let genome = random_dna(10_500, 99);
    let fragment = genome[..120].to_string();
    let fg = write_fasta(dir.path(), "genome.fna", &[&genome]);
    let ff = write_fasta(dir.path(), "frag.fna", &[&fragment]);
    let params = SketchParams::new(21, 14, SketchFamily::FullHashSet);
    let s = sketch_inputs::<FullHashSet>(
        &[ff, fg],
        &params,
        &PipelineOptions {
            sort_by_size: false,
            ..Default::default()
        },
    )
    .unwrap();
    let (frag, genome) = (&s[0], &s[1]);
    // every fragment kmer is in the genome
    assert_eq!(frag.containment(genome).unwrap(), 1.0);
    let back = genome.containment(frag).unwrap();
    let expected = frag.cardinality() / genome.cardinality();
    assert!((back - expected).abs() < 1e-12);
    assert!(back < 0.02);
    // the symmetric index keeps the large direction
    let sym = eval_result(ResultType::SymContainmentIndex, frag, genome, 1. / 21.).unwrap();
    assert_eq!(sym, 1.0);
}

// scenario S6 : binary and text emission agree, labels line up
#[test]
fn binary_matrix_parity() {
    let dir = tempfile::tempdir().unwrap();
    let base = random_dna(5000, 1234);
    let mut inputs = Vec::new();
    for i in 0..4usize {
        // overlapping slices give a gradient of similarities
        let start = i * 700;
        let s = &base[start..start + 2500];
        inputs.push(write_fasta(dir.path(), &format!("g{}.fna", i), &[s]));
    }
    let labels: Vec<String> = inputs.clone();
    let params = SketchParams::new(21, 12, SketchFamily::FullHashSet);
    let opts = PipelineOptions {
        sort_by_size: false,
        ..Default::default()
    };
    let sketches = sketch_inputs::<FullHashSet>(&inputs, &params, &opts).unwrap();
    //
    // text emission
    let mut text_out = Vec::<u8>::new();
    symmetric_distances(
        sketches.clone(),
        &labels,
        &params,
        &DistOptions::default(),
        &mut text_out,
    )
    .unwrap();
    let text = String::from_utf8(text_out).unwrap();
    let mut text_vals = Vec::<f64>::new();
    for line in text.lines() {
        for cell in line.split('\t').skip(1) {
            if cell != "-" {
                text_vals.push(cell.parse().unwrap());
            }
        }
    }
    assert_eq!(text_vals.len(), 6);
    //
    // binary emission, f32, with the header the orchestrator writes
    let mut bin_out = Vec::<u8>::new();
    bin_out.extend_from_slice(&MAGIC_F32);
    bin_out.extend_from_slice(&4u64.to_le_bytes());
    let bopts = DistOptions {
        emit_fmt: EmitFormat::Binary,
        emit_float: true,
        ..Default::default()
    };
    symmetric_distances(sketches, &labels, &params, &bopts, &mut bin_out).unwrap();
    let mat = DistanceMatrix::<f32>::read_from(&mut bin_out.as_slice()).unwrap();
    assert_eq!(mat.nb_items(), 4);
    for (t, b) in text_vals.iter().zip(mat.triangle().iter()) {
        assert!((t - *b as f64).abs() < 1e-6, "text {} binary {}", t, b);
    }
    //
    // labels sidecar
    let labels_path = dir.path().join("m.labels").to_string_lossy().to_string();
    write_labels(&labels_path, &labels).unwrap();
    let back = read_labels(&labels_path).unwrap();
    assert_eq!(back.len(), 4);
    assert_eq!(back, labels);
}

// sketch bytes do not depend on the number of workers
#[test]
fn determinism_across_thread_counts() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs = Vec::new();
    for i in 0..6u64 {
        let seq = random_dna(1500 + 300 * i as usize, i);
        inputs.push(write_fasta(dir.path(), &format!("d{}.fna", i), &[&seq]));
    }
    let params = SketchParams::new(17, 11, SketchFamily::RangeMinHash);
    let opts = PipelineOptions::default();
    //
    let serialize_all = |sketches: &[<RangeMinHash as KmerSketcher>::Final]| -> Vec<u8> {
        let mut buf = Vec::new();
        for s in sketches {
            s.write_to(&mut buf).unwrap();
        }
        buf
    };
    let single = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap()
        .install(|| sketch_inputs::<RangeMinHash>(&inputs, &params, &opts).unwrap());
    let multi = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .unwrap()
        .install(|| sketch_inputs::<RangeMinHash>(&inputs, &params, &opts).unwrap());
    assert_eq!(serialize_all(&single), serialize_all(&multi));
}
