//! sketchdist command line driver.
//!
//! Subcommands :
//! - sketch : build and cache one sketch per input
//! - dist : sketch (or reload) inputs then emit the pairwise matrix
//! - union : merge cached sketches into one
//! - hll : quick union cardinality estimate of all inputs
//! - printmat / view : pretty print a binary distance matrix
//! - mkdist : dist over pre-sketched inputs, binary emission
//! - flatten : binary matrix to label pair / value triples
//!
//! Exit code is 0 on success ; any configuration, input, cache or io
//! error prints a one line diagnostic and exits non zero.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;

use sketchdist::distance::{
    check_emit_config, check_engine_config, query_reference_distances, symmetric_distances,
    DistOptions,
};
use sketchdist::distmat::{read_labels, write_labels, AnyDistanceMatrix, MAGIC_F32, MAGIC_F64};
use sketchdist::error::SketchError;
use sketchdist::params::{
    EmitFormat, Encoding, Filtering, HllEstimator, ResultType, SketchFamily, SketchParams,
    WindowScore,
};
use sketchdist::pipeline::{sketch_inputs, sort_inputs_by_size, PipelineOptions};
use sketchdist::sketching::{FinalSketch, Hll, KmerSketcher};
use sketchdist::sketchio::{read_sketch_file, write_sketch_file};

// install a logger facility, set RUST_LOG to trace, warn, debug ...
fn init_log() {
    env_logger::Builder::from_default_env().init();
}

fn main() {
    init_log();
    let matches = build_cli().get_matches();
    let res = match matches.subcommand() {
        Some(("sketch", sub)) => cmd_sketch(sub),
        Some(("dist", sub)) => cmd_dist(sub, false),
        Some(("mkdist", sub)) => cmd_dist(sub, true),
        Some(("union", sub)) => cmd_union(sub),
        Some(("hll", sub)) => cmd_hll(sub),
        Some(("printmat", sub)) | Some(("view", sub)) => cmd_printmat(sub, false),
        Some(("flatten", sub)) => cmd_printmat(sub, true),
        _ => unreachable!("subcommand required"),
    };
    if let Err(e) = res {
        log::error!("{:#}", e);
        eprintln!("sketchdist error : {:#}", e);
        std::process::exit(1);
    }
}

//========================== cli definition =================================

fn sketch_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("kmer_size")
            .short('k')
            .long("kmer")
            .value_parser(clap::value_parser!(usize))
            .default_value("31")
            .help("kmer size"),
    )
    .arg(
        Arg::new("window")
            .short('w')
            .long("window")
            .value_parser(clap::value_parser!(usize))
            .default_value("0")
            .help("window size for minimizer selection [max(kmer span, value)]"),
    )
    .arg(
        Arg::new("spacing")
            .short('s')
            .long("spacing")
            .default_value("")
            .help("spaced seed, <skip>x<times>,... (exact encoding only)"),
    )
    .arg(
        Arg::new("sketch_size")
            .short('S')
            .long("sketch-size")
            .value_parser(clap::value_parser!(u32))
            .default_value("16")
            .help("log2 of the sketch byte budget"),
    )
    .arg(
        Arg::new("b_bits")
            .short('B')
            .long("b-bits")
            .value_parser(clap::value_parser!(u32))
            .default_value("16")
            .help("signature width for the b-bit families"),
    )
    .arg(
        Arg::new("no_canonical")
            .short('C')
            .long("no-canonical")
            .action(ArgAction::SetTrue)
            .help("do not canonicalize kmers"),
    )
    .arg(
        Arg::new("family")
            .long("family")
            .default_value("hll")
            .help("sketch family : hll, bloom, rmh, crmh, khs, bmh, bbs, cbmh"),
    )
    .arg(
        Arg::new("encoding")
            .long("encoding")
            .default_value("bonsai")
            .help("kmer encoding : bonsai (exact), nthash, cyclic"),
    )
    .arg(
        Arg::new("entropy")
            .short('g')
            .long("entropy")
            .action(ArgAction::SetTrue)
            .help("entropy minimizer scoring instead of lexicographic"),
    )
    .arg(
        Arg::new("weighted")
            .long("weighted")
            .action(ArgAction::SetTrue)
            .help("weighted jaccard through the multiplicity wrapper"),
    )
    .arg(
        Arg::new("wcm_log2")
            .long("wcm-log2")
            .value_parser(clap::value_parser!(u32))
            .default_value("16")
            .help("weighted wrapper count-min columns, log2"),
    )
    .arg(
        Arg::new("wcm_nhashes")
            .long("wcm-nhashes")
            .value_parser(clap::value_parser!(u32))
            .default_value("8")
            .help("weighted wrapper count-min rows"),
    )
    .arg(
        Arg::new("estim")
            .long("estim")
            .default_value("mle")
            .help("hll estimator : original, improved, mle, jmle"),
    )
    .arg(
        Arg::new("jestim")
            .long("jestim")
            .default_value("jmle")
            .help("hll joint estimator : original, improved, mle, jmle"),
    )
    .arg(
        Arg::new("threads")
            .short('p')
            .long("threads")
            .value_parser(clap::value_parser!(usize))
            .default_value("1")
            .help("number of threads"),
    )
    .arg(
        Arg::new("seed")
            .short('R')
            .long("seed")
            .value_parser(clap::value_parser!(u64))
            .default_value("1337")
            .help("run seed, feeds the per worker count-min seeding"),
    )
    .arg(
        Arg::new("paths_file")
            .short('F')
            .long("paths-file")
            .help("file with one input path per line"),
    )
    .arg(
        Arg::new("prefix")
            .short('P')
            .long("prefix")
            .default_value("")
            .help("directory prefix for sketch file locations"),
    )
    .arg(
        Arg::new("suffix")
            .short('x')
            .long("suffix")
            .default_value("")
            .help("extra suffix in sketch file names"),
    )
    .arg(
        Arg::new("cache")
            .short('c')
            .long("cache")
            .action(ArgAction::SetTrue)
            .help("cache sketches / use cached sketches"),
    )
    .arg(
        Arg::new("gzip")
            .short('z')
            .long("gzip")
            .action(ArgAction::SetTrue)
            .help("gzip compress written sketches"),
    )
    .arg(
        Arg::new("presketched")
            .short('H')
            .long("presketched")
            .action(ArgAction::SetTrue)
            .help("treat inputs as serialized sketches"),
    )
    .arg(
        Arg::new("no_sort")
            .long("no-sort")
            .action(ArgAction::SetTrue)
            .help("keep input order instead of sorting by decreasing size"),
    )
    .arg(
        Arg::new("filter")
            .long("filter")
            .default_value("none")
            .help("count-min gating : none, countmin, byfname"),
    )
    .arg(
        Arg::new("min_count")
            .short('n')
            .long("min-count")
            .value_parser(clap::value_parser!(u64))
            .default_value("30")
            .help("minimum estimated multiplicity reaching the sketch"),
    )
    .arg(
        Arg::new("cm_nhashes")
            .short('q')
            .long("cm-nhashes")
            .value_parser(clap::value_parser!(u32))
            .default_value("4")
            .help("count-min rows"),
    )
    .arg(
        Arg::new("cm_log2")
            .long("cm-log2")
            .value_parser(clap::value_parser!(u32))
            .default_value("0")
            .help("count-min columns log2, 0 derives from the largest input"),
    )
    .arg(
        Arg::new("inputs")
            .num_args(0..)
            .help("input paths ; a quoted argument may join several files into one genome"),
    )
}

fn dist_args(cmd: Command) -> Command {
    sketch_args(cmd)
        .arg(
            Arg::new("queries")
                .short('Q')
                .long("query")
                .action(ArgAction::Append)
                .help("query input, compared against every reference"),
        )
        .arg(
            Arg::new("query_file")
                .long("query-file")
                .help("file with one query path per line"),
        )
        .arg(
            Arg::new("result")
                .short('M')
                .long("result")
                .default_value("ji")
                .help("result type : ji, mash, full-mash, sizes, containment, containment-dist, full-containment-dist, sym-containment, sym-containment-dist"),
        )
        .arg(
            Arg::new("emit")
                .long("emit")
                .default_value("tsv")
                .help("emission : tsv, phylip, full-tsv, binary"),
        )
        .arg(
            Arg::new("scientific")
                .short('e')
                .long("scientific")
                .action(ArgAction::SetTrue)
                .help("scientific notation in text output"),
        )
        .arg(
            Arg::new("float")
                .short('f')
                .long("float")
                .action(ArgAction::SetTrue)
                .help("binary emission as f32 instead of f64"),
        )
        .arg(
            Arg::new("sizes_out")
                .short('o')
                .long("sizes-out")
                .help("sink for the cardinality report [stdout]"),
        )
        .arg(
            Arg::new("dist_out")
                .short('O')
                .long("dist-out")
                .help("sink for the distance matrix [stdout]"),
        )
}

fn build_cli() -> Command {
    Command::new("sketchdist")
        .version(env!("CARGO_PKG_VERSION"))
        .about("kmer sketching and pairwise genome distance estimation")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(sketch_args(Command::new("sketch").about(
            "stream inputs into sketches and write them to their cache paths",
        )))
        .subcommand(dist_args(Command::new("dist").about(
            "sketch inputs then emit the pairwise distance/similarity matrix",
        )))
        .subcommand(dist_args(Command::new("mkdist").about(
            "binary distance matrix from pre-sketched inputs",
        )))
        .subcommand(
            sketch_args(Command::new("union").about("merge sketch files into one")).arg(
                Arg::new("out")
                    .short('o')
                    .long("out")
                    .required(true)
                    .help("output sketch file"),
            ),
        )
        .subcommand(sketch_args(Command::new("hll").about(
            "estimate the number of distinct kmers over all inputs",
        )))
        .subcommand(matrix_args(Command::new("printmat").about(
            "pretty print a binary distance matrix as tsv",
        )))
        .subcommand(matrix_args(
            Command::new("view").about("alias of printmat"),
        ))
        .subcommand(matrix_args(Command::new("flatten").about(
            "binary distance matrix to label pair / value triples",
        )))
}

fn matrix_args(cmd: Command) -> Command {
    cmd.arg(Arg::new("matrix").required(true).help("binary matrix path"))
        .arg(
            Arg::new("labels")
                .short('l')
                .long("labels")
                .help("labels sidecar [matrix path + .labels]"),
        )
        .arg(
            Arg::new("out")
                .short('o')
                .long("out")
                .help("output file [stdout]"),
        )
        .arg(
            Arg::new("scientific")
                .short('e')
                .long("scientific")
                .action(ArgAction::SetTrue)
                .help("scientific notation"),
        )
}

//========================== argument decoding ==============================

fn params_from_matches(m: &ArgMatches) -> Result<SketchParams> {
    let family = SketchFamily::from_name(m.get_one::<String>("family").unwrap())?;
    let mut params = SketchParams::new(
        *m.get_one::<usize>("kmer_size").unwrap(),
        *m.get_one::<u32>("sketch_size").unwrap(),
        family,
    )
    .with_window(*m.get_one::<usize>("window").unwrap())
    .with_spacing(m.get_one::<String>("spacing").unwrap())
    .with_b_bits(*m.get_one::<u32>("b_bits").unwrap())
    .with_canonical(!m.get_flag("no_canonical"))
    .with_encoding(Encoding::from_name(m.get_one::<String>("encoding").unwrap())?)
    .with_weighted(m.get_flag("weighted"))
    .with_weight_cm(
        *m.get_one::<u32>("wcm_log2").unwrap(),
        *m.get_one::<u32>("wcm_nhashes").unwrap(),
    )
    .with_seed(*m.get_one::<u64>("seed").unwrap());
    if m.get_flag("entropy") {
        params = params.with_window_score(WindowScore::Entropy);
    }
    params = params.with_estimators(
        estimator_from_name(m.get_one::<String>("estim").unwrap())?,
        estimator_from_name(m.get_one::<String>("jestim").unwrap())?,
    );
    params.validate()?;
    Ok(params)
}

fn estimator_from_name(name: &str) -> Result<HllEstimator> {
    Ok(match name {
        "original" => HllEstimator::Original,
        "improved" => HllEstimator::ErtlImproved,
        "mle" => HllEstimator::ErtlMle,
        "jmle" => HllEstimator::ErtlJointMle,
        _ => bail!("unknown hll estimator : {}", name),
    })
}

fn pipeline_opts_from_matches(m: &ArgMatches) -> Result<PipelineOptions> {
    let filtering = match m.get_one::<String>("filter").unwrap().as_str() {
        "none" => Filtering::None,
        "countmin" => Filtering::CountMin,
        "byfname" => Filtering::ByFilename,
        other => bail!("unknown filtering mode : {}", other),
    };
    Ok(PipelineOptions {
        cache: m.get_flag("cache"),
        gzip: m.get_flag("gzip"),
        prefix: m.get_one::<String>("prefix").unwrap().clone(),
        suffix: m.get_one::<String>("suffix").unwrap().clone(),
        presketched: m.get_flag("presketched"),
        filtering,
        min_count: *m.get_one::<u64>("min_count").unwrap(),
        cm_nhashes: *m.get_one::<u32>("cm_nhashes").unwrap(),
        cm_log2: *m.get_one::<u32>("cm_log2").unwrap(),
        sort_by_size: !m.get_flag("no_sort"),
    })
}

fn read_paths_file(path: &str) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("cannot open paths file {}", path))?;
    let mut paths = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            paths.push(line.trim().to_string());
        }
    }
    Ok(paths)
}

fn gather_inputs(m: &ArgMatches) -> Result<Vec<String>> {
    let mut inputs: Vec<String> = match m.get_many::<String>("inputs") {
        Some(vals) => vals.cloned().collect(),
        None => Vec::new(),
    };
    if let Some(pf) = m.get_one::<String>("paths_file") {
        inputs.extend(read_paths_file(pf)?);
    }
    if inputs.is_empty() {
        bail!("no input paths, see usage");
    }
    Ok(inputs)
}

fn gather_queries(m: &ArgMatches) -> Result<Vec<String>> {
    let mut queries: Vec<String> = match m.get_many::<String>("queries") {
        Some(vals) => vals.cloned().collect(),
        None => Vec::new(),
    };
    if let Some(qf) = m.get_one::<String>("query_file") {
        queries.extend(read_paths_file(qf)?);
    }
    Ok(queries)
}

fn init_thread_pool(m: &ArgMatches) -> Result<()> {
    let threads = *m.get_one::<usize>("threads").unwrap();
    info!("using {} threads", threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("cannot build thread pool")?;
    Ok(())
}

fn open_sink(path: Option<&String>) -> Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("cannot create output file {}", p))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    })
}

//========================== family dispatch ================================

macro_rules! dispatch_family {
    ($params:expr, $run:ident ( $($arg:expr),* )) => {{
        use sketchdist::sketching as sk;
        if $params.get_weighted() {
            match $params.get_family() {
                SketchFamily::Hll => $run::<sk::WeightedSketcher<sk::Hll>>($($arg),*),
                SketchFamily::Bloom => $run::<sk::WeightedSketcher<sk::BloomSketch>>($($arg),*),
                SketchFamily::RangeMinHash => $run::<sk::WeightedSketcher<sk::RangeMinHash>>($($arg),*),
                SketchFamily::CountingRangeMinHash => $run::<sk::WeightedSketcher<sk::CountingRangeMinHash>>($($arg),*),
                SketchFamily::FullHashSet => $run::<sk::WeightedSketcher<sk::FullHashSet>>($($arg),*),
                SketchFamily::BBitMinHash => $run::<sk::WeightedSketcher<sk::BBitMinHash>>($($arg),*),
                SketchFamily::SuperMinHash => $run::<sk::WeightedSketcher<sk::SuperMinHashSketch>>($($arg),*),
                SketchFamily::CountingBBitMinHash => $run::<sk::WeightedSketcher<sk::CountingBBitMinHash>>($($arg),*),
            }
        } else {
            match $params.get_family() {
                SketchFamily::Hll => $run::<sk::Hll>($($arg),*),
                SketchFamily::Bloom => $run::<sk::BloomSketch>($($arg),*),
                SketchFamily::RangeMinHash => $run::<sk::RangeMinHash>($($arg),*),
                SketchFamily::CountingRangeMinHash => $run::<sk::CountingRangeMinHash>($($arg),*),
                SketchFamily::FullHashSet => $run::<sk::FullHashSet>($($arg),*),
                SketchFamily::BBitMinHash => $run::<sk::BBitMinHash>($($arg),*),
                SketchFamily::SuperMinHash => $run::<sk::SuperMinHashSketch>($($arg),*),
                SketchFamily::CountingBBitMinHash => $run::<sk::CountingBBitMinHash>($($arg),*),
            }
        }
    }};
}

//========================== subcommands ====================================

fn cmd_sketch(m: &ArgMatches) -> Result<()> {
    init_thread_pool(m)?;
    let params = params_from_matches(m)?;
    let mut opts = pipeline_opts_from_matches(m)?;
    // sketching exists to persist, caching is the point here
    opts.cache = true;
    let mut inputs = gather_inputs(m)?;
    if opts.sort_by_size {
        sort_inputs_by_size(&mut inputs);
    }
    fn run<S: KmerSketcher>(
        inputs: &[String],
        params: &SketchParams,
        opts: &PipelineOptions,
    ) -> Result<(), SketchError> {
        sketch_inputs::<S>(inputs, params, opts).map(|_| ())
    }
    dispatch_family!(params, run(&inputs, &params, &opts))?;
    info!("successfully finished sketching {} inputs", inputs.len());
    Ok(())
}

fn cmd_dist(m: &ArgMatches, presketched_binary: bool) -> Result<()> {
    init_thread_pool(m)?;
    let params = params_from_matches(m)?;
    let mut popts = pipeline_opts_from_matches(m)?;
    let mut dopts = DistOptions {
        result_type: ResultType::from_name(m.get_one::<String>("result").unwrap())?,
        emit_fmt: EmitFormat::from_name(m.get_one::<String>("emit").unwrap())?,
        use_scientific: m.get_flag("scientific"),
        emit_float: m.get_flag("float"),
    };
    if presketched_binary {
        // mkdist : inputs are sketches, output is the binary matrix
        popts.presketched = true;
        dopts.emit_fmt = EmitFormat::Binary;
    }
    let mut references = gather_inputs(m)?;
    let queries = gather_queries(m)?;
    if popts.sort_by_size && !popts.presketched {
        sort_inputs_by_size(&mut references);
    }
    // fail before any sketching work if the combination cannot run
    check_engine_config(dopts.result_type, queries.is_empty())?;
    check_emit_config(dopts.emit_fmt, queries.is_empty())?;
    //
    let sizes_path = m.get_one::<String>("sizes_out").cloned();
    let dist_path = m.get_one::<String>("dist_out").cloned();
    //
    fn run<S: KmerSketcher>(
        references: &[String],
        queries: &[String],
        params: &SketchParams,
        popts: &PipelineOptions,
        dopts: &DistOptions,
        sizes_path: Option<&String>,
        dist_path: Option<&String>,
    ) -> Result<()> {
        // one batch : references first, queries appended
        let mut all: Vec<String> = references.to_vec();
        all.extend(queries.iter().cloned());
        let mut sketches = sketch_inputs::<S>(&all, params, popts)?;
        let query_sketches = sketches.split_off(references.len());
        //
        // cardinality report
        let mut sizes_out = open_sink(sizes_path)?;
        sizes_out.write_all(b"#Path\tSize (est.)\n")?;
        for (path, sketch) in all.iter().zip(sketches.iter().chain(query_sketches.iter())) {
            sizes_out.write_all(
                format!("{}\t{}\n", path, sketch.cardinality()).as_bytes(),
            )?;
        }
        sizes_out.flush()?;
        drop(sizes_out);
        //
        let mut dist_out = open_sink(dist_path)?;
        let n = sketches.len();
        if query_sketches.is_empty() {
            // symmetric preludes
            match dopts.emit_fmt {
                EmitFormat::UpperTriTsv | EmitFormat::FullTsv => {
                    let mut head = String::from("##Names");
                    for l in references.iter() {
                        head.push('\t');
                        head.push_str(l);
                    }
                    head.push('\n');
                    dist_out.write_all(head.as_bytes())?;
                }
                EmitFormat::PhylipUpperTri => {
                    dist_out.write_all(format!("{}\n", n).as_bytes())?;
                }
                EmitFormat::Binary => {
                    let magic = if dopts.emit_float { MAGIC_F32 } else { MAGIC_F64 };
                    dist_out.write_all(&magic)?;
                    dist_out.write_all(&(n as u64).to_le_bytes())?;
                }
            }
            symmetric_distances(sketches, references, params, dopts, &mut dist_out)?;
        } else {
            // query/reference preludes ; phylip was rejected before any
            // sketching started
            match dopts.emit_fmt {
                EmitFormat::UpperTriTsv | EmitFormat::FullTsv => {
                    let mut head = String::from("##Names");
                    for l in references.iter() {
                        head.push('\t');
                        head.push_str(l);
                    }
                    head.push('\n');
                    dist_out.write_all(head.as_bytes())?;
                }
                EmitFormat::PhylipUpperTri | EmitFormat::Binary => {}
            }
            query_reference_distances(
                &sketches,
                &query_sketches,
                queries,
                params,
                dopts,
                &mut dist_out,
            )?;
        }
        dist_out.flush()?;
        drop(dist_out);
        // binary consumers reconstruct row/column identity from the sidecar
        if dopts.emit_fmt == EmitFormat::Binary {
            if let Some(p) = dist_path {
                let labels: Vec<String> = if query_sketches.is_empty() {
                    references.to_vec()
                } else {
                    all
                };
                write_labels(&format!("{}.labels", p), &labels)?;
            }
        }
        Ok(())
    }
    dispatch_family!(
        params,
        run(
            &references,
            &queries,
            &params,
            &popts,
            &dopts,
            sizes_path.as_ref(),
            dist_path.as_ref()
        )
    )
}

fn cmd_union(m: &ArgMatches) -> Result<()> {
    let params = params_from_matches(m)?;
    let inputs = gather_inputs(m)?;
    let out = m.get_one::<String>("out").unwrap().clone();
    let gzip = m.get_flag("gzip");
    fn run<S: KmerSketcher>(
        inputs: &[String],
        params: &SketchParams,
        out: &str,
        gzip: bool,
    ) -> Result<()> {
        let mut merged: S::Final = read_sketch_file(&inputs[0], params)?;
        for path in &inputs[1..] {
            let next: S::Final = read_sketch_file(path, params)?;
            merged.merge(&next)?;
        }
        write_sketch_file(&merged, out, params, gzip)?;
        info!("union of {} sketches written to {}", inputs.len(), out);
        Ok(())
    }
    dispatch_family!(params, run(&inputs, &params, &out, gzip))
}

fn cmd_hll(m: &ArgMatches) -> Result<()> {
    init_thread_pool(m)?;
    // this subcommand always sketches with hll ; cache names must say so
    // whatever --family was set to
    let params = params_from_matches(m)?.with_family(SketchFamily::Hll);
    let opts = pipeline_opts_from_matches(m)?;
    let inputs = gather_inputs(m)?;
    // the weighted wrapper finalizes to a plain hll, so both paths agree
    // with what the cache name announces
    let sketches = if params.get_weighted() {
        sketch_inputs::<sketchdist::sketching::WeightedSketcher<Hll>>(&inputs, &params, &opts)?
    } else {
        sketch_inputs::<Hll>(&inputs, &params, &opts)?
    };
    let mut merged = sketches[0].clone();
    for s in &sketches[1..] {
        merged.merge(s)?;
    }
    println!(
        "Estimated number of unique exact matches: {}",
        merged.cardinality()
    );
    Ok(())
}

fn cmd_printmat(m: &ArgMatches, flatten: bool) -> Result<()> {
    let path = m.get_one::<String>("matrix").unwrap();
    let labels_path = match m.get_one::<String>("labels") {
        Some(p) => p.clone(),
        None => format!("{}.labels", path),
    };
    let mat = AnyDistanceMatrix::read_file(path)?;
    let labels = read_labels(&labels_path)?;
    if labels.len() != mat.nb_items() {
        bail!(
            "labels file {} has {} entries but the matrix holds {}",
            labels_path,
            labels.len(),
            mat.nb_items()
        );
    }
    let mut out = open_sink(m.get_one::<String>("out"))?;
    if flatten {
        mat.flatten(&mut out, &labels, m.get_flag("scientific"))?;
    } else {
        mat.printf(&mut out, &labels, m.get_flag("scientific"))?;
    }
    out.flush()?;
    Ok(())
}
