// Loop Architect CLI
// Analyze a mix, slice its stems and optionally write the sample pack

use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use loop_architect::audio::{read_wav, write_wav};
use loop_architect::groove::TimeSignature;
use loop_architect::pipeline::{PackReport, TraceWriter};
use loop_architect::{
    process_track, AudioBuffer, CoreError, CoreResult, LoopType, ModelContext, PipelineConfig,
    SeparationBackend,
};

/// loop-architect - tempo, key and loop/one-shot slicing for stems
#[derive(Parser, Debug)]
#[command(name = "loop-architect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Mixed track (WAV)
    #[arg(value_name = "MIX")]
    mix: PathBuf,

    /// Pre-separated stem as name=path (repeatable); the mix is used when absent
    #[arg(long = "stem", value_name = "NAME=PATH")]
    stems: Vec<String>,

    /// Separation backend used when no stems are given
    #[arg(long, default_value = "passthrough")]
    #[arg(value_parser = ["passthrough", "demucs", "sam-audio"])]
    backend: String,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Manual tempo override (bypasses estimation)
    #[arg(long)]
    bpm: Option<f64>,

    /// 1-bar, 2-bar, 4-bar or one-shot
    #[arg(long, value_name = "TYPE")]
    loop_type: Option<String>,

    /// Time signature, e.g. 4/4 or 3/4
    #[arg(long, value_name = "N/D")]
    time_signature: Option<String>,

    /// Transpose every segment by this many semitones
    #[arg(long, allow_hyphen_values = true)]
    transpose: Option<i32>,

    /// Write segment WAVs, MIDI and manifest.json here
    #[arg(short, long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Append progress entries to this JSONL file
    #[arg(long, value_name = "FILE")]
    trace: Option<PathBuf>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(report) => {
            let failures = report.failures();
            for failure in &failures {
                eprintln!("{}", failure);
            }
            if failures.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: &Cli) -> CoreResult<PackReport> {
    let config = build_config(cli)?;
    let mix = read_wav(&cli.mix)?;

    let stems = if cli.stems.is_empty() {
        let mut context = ModelContext::new(parse_backend(&cli.backend)?)?;
        let stems = context.separate(&mix)?;
        context.teardown();
        stems
    } else {
        load_stems(&cli.stems)?
    };

    let report = process_track(&mix, &stems, &config)?;
    println!("{}", serde_json::to_string_pretty(&report.summary())?);

    if let Some(path) = &cli.trace {
        TraceWriter::new(path.clone()).write_batch(&report.all_trace())?;
    }

    if let Some(dir) = &cli.out_dir {
        write_pack(dir, &report)?;
    }

    Ok(report)
}

/// Config file first, then command-line overrides
fn build_config(cli: &Cli) -> CoreResult<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(bpm) = cli.bpm {
        config.manual_bpm = Some(bpm);
    }
    if let Some(loop_type) = &cli.loop_type {
        config.loop_type = LoopType::parse(loop_type)?;
    }
    if let Some(signature) = &cli.time_signature {
        config.time_signature = signature.parse::<TimeSignature>()?;
    }
    if let Some(semitones) = cli.transpose {
        config.transpose_semitones = semitones;
    }

    config.validate()?;
    Ok(config)
}

fn parse_backend(name: &str) -> CoreResult<SeparationBackend> {
    match name {
        "passthrough" => Ok(SeparationBackend::Passthrough),
        "demucs" => Ok(SeparationBackend::Demucs),
        "sam-audio" => Ok(SeparationBackend::SamAudio),
        other => Err(CoreError::InvalidConfig(format!("unknown backend '{}'", other))),
    }
}

fn load_stems(specs: &[String]) -> CoreResult<BTreeMap<String, AudioBuffer>> {
    let mut stems = BTreeMap::new();
    for spec in specs {
        let (name, path) = spec.split_once('=').ok_or_else(|| {
            CoreError::InvalidConfig(format!("stem '{}' is not NAME=PATH", spec))
        })?;
        if name.is_empty() || stems.contains_key(name) {
            return Err(CoreError::InvalidConfig(format!(
                "stem name '{}' is empty or repeated",
                name
            )));
        }
        stems.insert(name.to_string(), read_wav(Path::new(path))?);
    }
    Ok(stems)
}

fn write_pack(dir: &Path, report: &PackReport) -> CoreResult<()> {
    std::fs::create_dir_all(dir)?;

    let mut written = 0;
    for stem in report.successful() {
        for (segment, tags) in stem.segments.iter().zip(&stem.tags) {
            write_wav(&dir.join(format!("{}.wav", tags.file_stem)), &segment.audio)?;
            written += 1;
        }
        if let (Some(bytes), Some(name)) = (&stem.midi, &stem.midi_file_stem) {
            std::fs::write(dir.join(format!("{}.mid", name)), bytes)?;
        }
    }

    let manifest = serde_json::to_string_pretty(&report.summary())?;
    std::fs::write(dir.join("manifest.json"), manifest)?;

    log::info!("Wrote {} segments to {}", written, dir.display());
    Ok(())
}
