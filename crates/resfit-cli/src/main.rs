//! resfit: find and fit superconducting resonators in S21 sweeps

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use resfit_core::io::{
    parse_flux_manifest, write_fit_file, write_lambda_file, SpectrumFormat, SpectrumReader,
};
use resfit_core::pipeline::{analyze_batch, assemble_flux_series, fit_lambda_batch};
use resfit_core::{
    analyze_spectrum, CancelToken, FrequencyUnit, PipelineConfig, Preprocessor, ResonanceDetector,
    SpectrumTrace,
};

#[derive(Parser)]
#[command(name = "resfit")]
#[command(about = "Resonance finding and fitting for superconducting resonator sweeps", long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Config TOML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Spectrum columns after frequency: ri (real, imag) or db (dB, degrees)
    #[arg(long, default_value = "ri", global = true)]
    format: String,

    /// Unit of the frequency column
    #[arg(long, default_value = "ghz", global = true)]
    unit: String,

    /// Worker threads (overrides the config file)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect resonances and print the candidates
    Find {
        /// Spectrum file
        spectrum: PathBuf,
    },
    /// Detect and fit every resonance in one or more spectra
    Fit {
        /// Spectrum files
        #[arg(required = true)]
        spectra: Vec<PathBuf>,

        /// Output CSV
        #[arg(short, long, default_value = "fits.csv")]
        output: PathBuf,
    },
    /// Fit the SQUID model across a flux-ramp sweep
    Flux {
        /// Manifest with `current_ua,path` lines; paths relative to it
        manifest: PathBuf,

        /// Prefix for `<prefix>_fits.csv` and `<prefix>_lambda.csv`
        #[arg(short, long, default_value = "flux")]
        output: String,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn load_config(common: &CommonArgs) -> Result<PipelineConfig> {
    let mut config = match &common.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if common.workers.is_some() {
        config.workers = common.workers;
    }
    config.validate()?;
    Ok(config)
}

fn reader(common: &CommonArgs) -> Result<SpectrumReader> {
    let format: SpectrumFormat = common.format.parse()?;
    let unit: FrequencyUnit = common.unit.parse()?;
    Ok(SpectrumReader::new(format, unit))
}

fn read_spectrum(reader: &SpectrumReader, path: &Path) -> Result<SpectrumTrace> {
    reader
        .from_file(path)
        .with_context(|| format!("reading spectrum {}", path.display()))
}

/// Outcome of the `fit` command
#[derive(Debug)]
struct FitRun {
    /// Spectra whose rows reached the table
    written: usize,
    /// `(source, reason)` for spectra that could not be read or analyzed
    failed: Vec<(String, String)>,
}

/// Analyze every readable spectrum and write the table for those that succeed
fn run_fit(
    reader: &SpectrumReader,
    config: &PipelineConfig,
    spectra: &[PathBuf],
    output: &Path,
) -> Result<FitRun> {
    let mut failed = Vec::new();
    let mut inputs = Vec::with_capacity(spectra.len());
    for path in spectra {
        let source = path.display().to_string();
        match read_spectrum(reader, path) {
            Ok(trace) => inputs.push((source, trace)),
            Err(e) => {
                error!(%source, "spectrum skipped: {e:#}");
                failed.push((source, format!("{e:#}")));
            }
        }
    }

    let results = analyze_batch(&inputs, config, &CancelToken::new())?;
    let mut analyses = Vec::with_capacity(results.len());
    for ((source, _), result) in inputs.iter().zip(results) {
        match result {
            Ok(analysis) => {
                println!("{}: {}", source, analysis.summary);
                analyses.push(analysis);
            }
            Err(e) => {
                error!(%source, "analysis failed: {e}");
                failed.push((source.clone(), e.to_string()));
            }
        }
    }

    write_fit_file(output, &analyses).with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), spectra = analyses.len(), "fit table written");
    Ok(FitRun {
        written: analyses.len(),
        failed,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);
    let config = load_config(&cli.common)?;
    let reader = reader(&cli.common)?;

    match &cli.command {
        Commands::Find { spectrum } => {
            let trace = read_spectrum(&reader, spectrum)?;
            let preprocessed = Preprocessor::new(config.preprocess.clone()).run(&trace)?;
            let candidates = ResonanceDetector::new(config.detector.clone())
                .detect(&preprocessed.trace)?;
            println!("index,center_frequency_ghz,quality_statistic");
            for (i, c) in candidates.iter().enumerate() {
                println!("{},{:.9},{:.1}", i, c.center_frequency_ghz, c.quality_statistic);
            }
            info!(found = candidates.len(), "detection finished");
        }
        Commands::Fit { spectra, output } => {
            let run = run_fit(&reader, &config, spectra, output)?;
            if !run.failed.is_empty() {
                let sources: Vec<&str> = run.failed.iter().map(|(s, _)| s.as_str()).collect();
                bail!(
                    "{} of {} spectra failed ({}); table holds the other {}",
                    run.failed.len(),
                    spectra.len(),
                    sources.join(", "),
                    run.written
                );
            }
        }
        Commands::Flux { manifest, output } => {
            let content = std::fs::read_to_string(manifest)
                .with_context(|| format!("reading manifest {}", manifest.display()))?;
            let entries = parse_flux_manifest(&content)
                .with_context(|| format!("parsing manifest {}", manifest.display()))?;
            let base = manifest.parent().unwrap_or_else(|| Path::new("."));

            let mut sweep = Vec::with_capacity(entries.len());
            for entry in &entries {
                let path = base.join(&entry.path);
                let trace = read_spectrum(&reader, &path)?;
                let analysis = analyze_spectrum(&trace, &entry.path, &config)
                    .with_context(|| format!("analyzing {}", path.display()))?;
                sweep.push((entry.current_ua, analysis));
            }

            let source = manifest.display().to_string();
            let series = assemble_flux_series(&source, &sweep, &config.lambda);
            let batch = fit_lambda_batch(&series, &config, &CancelToken::new())?;
            println!("{}: {}", source, batch.summary);

            let analyses: Vec<_> = sweep.into_iter().map(|(_, a)| a).collect();
            let fits_path = PathBuf::from(format!("{output}_fits.csv"));
            let lambda_path = PathBuf::from(format!("{output}_lambda.csv"));
            write_fit_file(&fits_path, &analyses)
                .with_context(|| format!("writing {}", fits_path.display()))?;
            write_lambda_file(&lambda_path, &source, &batch.outcomes)
                .with_context(|| format!("writing {}", lambda_path.display()))?;
            info!(fits = %fits_path.display(), lambda = %lambda_path.display(), "tables written");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use resfit_core::frequency::linspace_ghz;
    use resfit_core::resonator::evaluate_point;
    use resfit_core::ResonatorModel;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("resfit_cli_{}_{}", std::process::id(), name))
    }

    fn write_dip(path: &Path) {
        let p = [1.0, 0.0, 0.0, 0.0, 4.1, 5e4, 2e4, 0.0];
        let mut content = String::from("freq,re,im\n");
        for f in linspace_ghz(4.0, 4.2, 2001) {
            let z = evaluate_point(ResonatorModel::GainSlopeComplex, &p, f).unwrap();
            content.push_str(&format!("{f:.9},{:.15e},{:.15e}\n", z.re, z.im));
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_fit_keeps_good_spectra_when_others_fail() {
        let good = temp_path("good.csv");
        let unsorted = temp_path("unsorted.csv");
        let missing = temp_path("missing.csv");
        let output = temp_path("fits.csv");
        write_dip(&good);
        fs::write(&unsorted, "4.1,1,0\n4.0,1,0\n4.2,1,0\n").unwrap();

        let spectra = vec![missing.clone(), good.clone(), unsorted.clone()];
        let run = run_fit(
            &SpectrumReader::default(),
            &PipelineConfig::default(),
            &spectra,
            &output,
        )
        .unwrap();
        let table = fs::read_to_string(&output).unwrap();
        for path in [&good, &unsorted, &output] {
            fs::remove_file(path).ok();
        }

        assert_eq!(run.written, 1);
        let failed: Vec<&str> = run.failed.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.contains(&missing.display().to_string().as_str()));
        assert!(failed.contains(&unsorted.display().to_string().as_str()));

        let rows: Vec<&str> = table.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].starts_with(&format!("{},0,fitted,", good.display())));
    }
}
