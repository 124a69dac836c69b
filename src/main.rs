// main.rs

// --- External Crate Imports ---
use anyhow::{anyhow, Error, Result};
use clap::Parser;
use decompose::{
    Algorithm, Colormap, DecomposerParams, ImageFormat, RenderContext, RunConfig, TableFormat,
};
use log::{debug, error, info};
use std::{ffi::OsString, path::PathBuf, process, time::Instant};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse_from(cli::expand_legacy_flags(std::env::args_os()));

    // Usage errors end the run before any file is touched.
    let algorithm = match cli_args.algorithm.parse::<Algorithm>() {
        Ok(algorithm) => algorithm,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    let colormap = cli_args
        .colormap
        .parse::<Colormap>()
        .map_err(|e| anyhow!(e))?;

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });

    let mut config = RunConfig::new(&cli_args.input, &cli_args.output);
    // No log files for a figure path that cannot be written.
    ImageFormat::from_path(&cli_args.output)?;
    if cli_args.log_files {
        logging::init_with_files(
            log_level,
            &config.derived_path("log"),
            &config.derived_path("err"),
        )?;
    } else {
        logging::init(log_level)?;
    }

    info!("Starting decompose with args: {:?}", cli_args);

    // Configure Rayon thread pool
    let num_threads = cli_args.threads.unwrap_or_else(num_cpus::get);
    info!("Using {} threads for parallel operations.", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    config.format = if cli_args.feature_counts {
        TableFormat::FeatureCounts
    } else {
        TableFormat::Matrix
    };
    config.lengths = cli_args.lengths.clone();
    config.rpkm = cli_args.rpkm;
    config.log2 = cli_args.log2;
    config.sum_cutoff = cli_args.sum_cutoff as f64;
    config.gene = cli_args.gene.clone();
    config.subset = cli_args.subset.clone();
    config.conditions = cli_args.conditions.clone();
    config.conditions_col = cli_args.conditions_col.clone();
    config.algorithm = algorithm;
    config.keep_intermediates = cli_args.keep_intermediates;
    config.interactive = cli_args.interactive;
    config.params = DecomposerParams {
        components: cli_args.components,
        seed: cli_args.seed,
        perplexity: cli_args.perplexity,
        show_progress: true,
    };
    config.render = RenderContext::default().colormap(colormap);
    debug!("Run configuration: {:?}", config);

    let outputs = match decompose::run(&config) {
        Ok(outputs) => outputs,
        Err(e) => {
            error!("{}", e);
            log::logger().flush();
            process::exit(1);
        }
    };
    info!(
        "Figure: {}, components: {}.",
        outputs.figure.display(),
        outputs.components.display()
    );

    info!(
        "decompose finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

mod cli {
    use super::{OsString, PathBuf};
    use clap::Parser; // For the derive macro to find Parser

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Plot PCA, ICA or t-SNE embeddings of gene-expression samples.", long_about = None)]
    pub(crate) struct CliArgs {
        /// Counts table, features as rows and samples as columns.
        #[arg(short, long, required = true)]
        pub(crate) input: PathBuf,

        /// Figure path (.svg, .png, .jpg or .bmp); other outputs share its prefix.
        #[arg(short, long, required = true)]
        pub(crate) output: PathBuf,

        /// Input is featureCounts output.
        #[arg(short = 'f', long = "featureCounts", visible_alias = "feature-counts")]
        pub(crate) feature_counts: bool,

        /// Per-feature lengths for a plain matrix (id<TAB>length).
        #[arg(short = 'L', long)]
        pub(crate) lengths: Option<PathBuf>,

        #[arg(long)]
        pub(crate) rpkm: bool,

        /// log2(x + 1) transform, also accepted as -l2.
        #[arg(long)]
        pub(crate) log2: bool,

        /// Drop features whose counts sum below this, also accepted as -sc.
        #[arg(long = "sum_cutoff", visible_alias = "sum-cutoff", default_value_t = 0)]
        pub(crate) sum_cutoff: u64,

        /// Color samples by this gene's expression.
        #[arg(short, long)]
        pub(crate) gene: Option<String>,

        /// File of feature ids to keep, one per line.
        #[arg(short, long)]
        pub(crate) subset: Option<PathBuf>,

        /// Conditions table, samples as rows.
        #[arg(short, long)]
        pub(crate) conditions: Option<PathBuf>,

        /// Conditions column to color by, also accepted as -cc.
        #[arg(long = "conditions-col", visible_alias = "conditions_col")]
        pub(crate) conditions_col: Option<String>,

        /// PCA, TSNE or ICA.
        #[arg(short, long, default_value = "PCA")]
        pub(crate) algorithm: String,

        /// Write the table after each stage, plus sample metadata.
        #[arg(short, long)]
        pub(crate) keep_intermediates: bool,

        /// Components to compute (PCA/ICA); defaults to min(samples, features).
        #[arg(short = 'n', long)]
        pub(crate) components: Option<usize>,

        #[arg(long, default_value_t = 1)]
        pub(crate) seed: u64,

        /// t-SNE perplexity.
        #[arg(long, default_value_t = 30.0)]
        pub(crate) perplexity: f64,

        /// Colormap for expression coloring.
        #[arg(long, default_value = "Purples")]
        pub(crate) colormap: String,

        /// Also write an interactive HTML figure.
        #[arg(long)]
        pub(crate) interactive: bool,

        #[arg(short = 't', long)]
        pub(crate) threads: Option<usize>,

        #[arg(long, default_value = "Info")]
        pub(crate) log_level: String,

        /// Also log to <prefix>.log and errors to <prefix>.err.
        #[arg(long)]
        pub(crate) log_files: bool,
    }

    /// Rewrites the multi-letter short flags clap cannot express into their long forms.
    pub(crate) fn expand_legacy_flags<I>(args: I) -> Vec<OsString>
    where
        I: IntoIterator<Item = OsString>,
    {
        args.into_iter()
            .map(|arg| match arg.to_str() {
                Some("-l2") => OsString::from("--log2"),
                Some("-sc") => OsString::from("--sum_cutoff"),
                Some("-cc") => OsString::from("--conditions-col"),
                _ => arg,
            })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn parse(args: &[&str]) -> CliArgs {
            CliArgs::parse_from(expand_legacy_flags(args.iter().map(OsString::from)))
        }

        #[test]
        fn test_legacy_short_flags() {
            let args = parse(&[
                "decompose", "-i", "counts.txt", "-o", "plot.svg", "-l2", "-sc", "5", "-cc", "group",
            ]);
            assert!(args.log2);
            assert_eq!(args.sum_cutoff, 5);
            assert_eq!(args.conditions_col.as_deref(), Some("group"));
            assert_eq!(args.algorithm, "PCA");
        }

        #[test]
        fn test_long_flags() {
            let args = parse(&[
                "decompose", "--input", "c.txt", "--output", "p.png", "--featureCounts", "--rpkm",
                "-a", "TSNE", "-k", "-n", "3",
            ]);
            assert!(args.feature_counts && args.rpkm && args.keep_intermediates);
            assert_eq!(args.algorithm, "TSNE");
            assert_eq!(args.components, Some(3));
        }

        #[test]
        fn test_missing_required_flag_is_an_error() {
            assert!(CliArgs::try_parse_from(["decompose", "-i", "c.txt"]).is_err());
        }
    }
}

mod logging {
    use anyhow::Result;
    use env_logger::{Builder, Logger, Target};
    use log::{LevelFilter, Log, Metadata, Record};
    use std::{fs::File, io::Write, path::Path};

    fn console(level: LevelFilter) -> Builder {
        let mut builder = Builder::new();
        builder.filter_level(level).format_timestamp_micros();
        builder
    }

    fn file(level: LevelFilter, path: &Path) -> Result<Logger> {
        let sink = File::create(path)?;
        Ok(Builder::new()
            .filter_level(level)
            .target(Target::Pipe(Box::new(sink)))
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} - decompose - {} - {}",
                    buf.timestamp_millis(),
                    record.level(),
                    record.args()
                )
            })
            .build())
    }

    pub(crate) fn init(level: LevelFilter) -> Result<()> {
        console(level).try_init()?;
        Ok(())
    }

    /// Console logging plus `log_path` at `level` and `err_path` at Error.
    pub(crate) fn init_with_files(level: LevelFilter, log_path: &Path, err_path: &Path) -> Result<()> {
        let tee = Tee {
            sinks: vec![
                console(level).build(),
                file(level, log_path)?,
                file(LevelFilter::Error, err_path)?,
            ],
        };
        log::set_max_level(level);
        log::set_boxed_logger(Box::new(tee))?;
        Ok(())
    }

    struct Tee {
        sinks: Vec<Logger>,
    }

    impl Log for Tee {
        fn enabled(&self, metadata: &Metadata) -> bool {
            self.sinks.iter().any(|s| s.enabled(metadata))
        }

        fn log(&self, record: &Record) {
            for sink in &self.sinks {
                if sink.matches(record) {
                    sink.log(record);
                }
            }
        }

        fn flush(&self) {
            for sink in &self.sinks {
                sink.flush();
            }
        }
    }
}
