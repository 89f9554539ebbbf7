use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand};

use narrate_rs::{
    accelerator::AcceleratorPool,
    audit,
    corpus::{discover, run_corpus, Document},
    debug::DebugRecorder,
    engines::command::{CommandSynthesizer, CommandTranscriber},
    error::RunError,
    ledger::FileLedger,
    orchestrator::{Orchestrator, PassOptionsBuilder, FIX_MODE_CANDIDATES},
    segment::{Segmenter, SegmenterConfigBuilder},
    voice::{VoiceLibrary, VoiceSpec},
    Transcriber,
};

/// Read text corpora aloud, one recording per document and voice.
#[derive(Parser, Debug)]
#[command(name = "narrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate recordings for a text file or a directory of texts
    Generate(GenerateArgs),
    /// Re-transcribe finished clips and record mismatches
    Qa(QaArgs),
    /// Rebuild the completion ledger from the combined files on disk
    Mark(MarkArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// A single text file to read
    #[arg(long, conflicts_with = "textdir", required_unless_present = "textdir")]
    textfile: Option<PathBuf>,

    /// A directory tree of .txt files to read
    #[arg(long)]
    textdir: Option<PathBuf>,

    /// Comma-separated voices; join voices with '&' to blend them
    #[arg(long, default_value = "pat")]
    voice: String,

    /// Where to store outputs
    #[arg(long, default_value = "results/")]
    outdir: PathBuf,

    /// Directory holding one subdirectory of reference clips per voice
    #[arg(long, default_value = "voices/")]
    voices_dir: PathBuf,

    /// Candidates generated per segment (default 1, or 10 with --fix)
    #[arg(long)]
    candidates: Option<usize>,

    /// Extra generation rounds for segments that fail
    #[arg(long, default_value_t = 0)]
    retries: usize,

    /// Comma-separated segment indices to regenerate
    #[arg(long, value_delimiter = ',', requires = "textfile")]
    regenerate: Option<Vec<usize>>,

    /// Transcribe every clip and record mismatches
    #[arg(long)]
    qa: bool,

    /// Regenerate segments listed in existing failure records
    #[arg(long)]
    fix: bool,

    /// Keep every candidate and combine one reading per candidate
    #[arg(long, conflicts_with_all = ["qa", "fix"])]
    review: bool,

    /// Random seed which can be used to reproduce results (default: current time)
    #[arg(long)]
    seed: Option<u64>,

    /// Do not write reproducibility records
    #[arg(long)]
    no_debug_state: bool,

    /// Where to write reproducibility records (default: <outdir>/debug_states)
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// Character marking explicit segment boundaries
    #[arg(long, default_value_t = '|')]
    separator: char,

    /// Accelerator this worker owns; passed to both programs as NARRATE_DEVICE.
    /// Workers sharing an output directory should each get their own.
    #[arg(long, default_value_t = 0)]
    device: usize,

    #[command(flatten)]
    synth: SynthArgs,

    #[command(flatten)]
    stt: SttArgs,
}

#[derive(Args, Debug)]
struct SynthArgs {
    /// Program that synthesizes speech
    #[arg(long, env = "NARRATE_SYNTH_CMD")]
    synth_cmd: String,

    /// Argument passed to the synthesis program (repeatable)
    #[arg(long = "synth-arg", allow_hyphen_values = true)]
    synth_args: Vec<String>,
}

#[derive(Args, Debug)]
struct SttArgs {
    /// Program that transcribes a WAV file
    #[arg(long, env = "NARRATE_STT_CMD")]
    stt_cmd: Option<String>,

    /// Argument passed to the transcription program (repeatable)
    #[arg(long = "stt-arg", allow_hyphen_values = true)]
    stt_args: Vec<String>,
}

impl SttArgs {
    fn transcriber(&self) -> Option<CommandTranscriber> {
        self.stt_cmd
            .as_ref()
            .map(|cmd| CommandTranscriber::new(cmd.clone(), self.stt_args.clone()))
    }
}

#[derive(Args, Debug)]
struct QaArgs {
    /// Output directory to audit
    #[arg(long)]
    audio: PathBuf,

    #[command(flatten)]
    stt: SttArgs,
}

#[derive(Args, Debug)]
struct MarkArgs {
    /// Output directory whose ledger is rebuilt
    #[arg(long)]
    audio: PathBuf,
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn config_error(e: impl std::fmt::Display) -> RunError {
    RunError::Config(e.to_string())
}

/// Returns `Ok(false)` when some pass was left without a combined output.
fn generate(args: GenerateArgs) -> Result<bool, RunError> {
    let voices = VoiceSpec::parse_list(&args.voice).map_err(config_error)?;
    if voices.is_empty() {
        return Err(config_error("no voice given"));
    }

    let documents = match (&args.textfile, &args.textdir) {
        (Some(file), _) => vec![Document::single(file)],
        (None, Some(dir)) => discover(dir)?,
        (None, None) => return Err(config_error("either --textfile or --textdir is required")),
    };

    let transcriber = args.stt.transcriber();
    if (args.qa || args.fix) && transcriber.is_none() {
        return Err(config_error("--qa and --fix need a transcription program (--stt-cmd)"));
    }

    let seed = args.seed.unwrap_or_else(unix_seconds);
    log::info!("Using seed {seed}");
    let candidates = args
        .candidates
        .unwrap_or(if args.fix { FIX_MODE_CANDIDATES } else { 1 });

    let mut builder = PassOptionsBuilder::default();
    builder
        .candidates(candidates)
        .retries(args.retries)
        .verify(args.qa)
        .fix(args.fix)
        .review(args.review)
        .seed(seed);
    if let Some(indices) = &args.regenerate {
        builder.regenerate(indices.iter().copied().collect());
    }
    let options = builder.build().map_err(config_error)?;

    let segmenter = Segmenter::new(
        SegmenterConfigBuilder::default()
            .separator(args.separator)
            .build()
            .map_err(config_error)?,
    );

    let mut orchestrator = Orchestrator::new(
        Box::new(CommandSynthesizer::new(
            args.synth.synth_cmd.clone(),
            args.synth.synth_args.clone(),
        )),
        transcriber.map(|t| Box::new(t) as Box<dyn Transcriber>),
        Box::new(VoiceLibrary::new(&args.voices_dir)),
        Box::new(FileLedger::open(&args.outdir)?),
        options,
    )
    .with_accelerators(AcceleratorPool::with_devices([args.device]));

    if !args.no_debug_state {
        let dir = args
            .debug_dir
            .clone()
            .unwrap_or_else(|| args.outdir.join("debug_states"));
        orchestrator = orchestrator.with_debug_recorder(DebugRecorder::new(dir));
    }

    let summary = run_corpus(
        &mut orchestrator,
        &segmenter,
        &documents,
        &voices,
        &args.outdir,
    )?;
    Ok(summary.is_clean())
}

fn qa(args: QaArgs) -> Result<bool, RunError> {
    let mut transcriber = args
        .stt
        .transcriber()
        .ok_or_else(|| config_error("qa needs a transcription program (--stt-cmd)"))?;
    let mut ledger = FileLedger::open(&args.audio)?;
    audit::qa(&args.audio, &mut transcriber, &mut ledger)?;
    Ok(true)
}

fn mark(args: MarkArgs) -> Result<bool, RunError> {
    audit::rebuild_completion(&args.audio)?;
    Ok(true)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Generate(args) => generate(args),
        Commands::Qa(args) => qa(args),
        Commands::Mark(args) => mark(args),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            log::error!("Some passes could not be completed; rerun after investigating");
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands};
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn regenerate_takes_a_comma_list() {
        let cli = Cli::try_parse_from([
            "narrate",
            "generate",
            "--textfile",
            "doc.txt",
            "--synth-cmd",
            "synth",
            "--regenerate",
            "2,5",
        ])
        .expect("parse");
        let Commands::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.regenerate, Some(vec![2, 5]));
        assert_eq!(args.voice, "pat");
        assert_eq!(args.separator, '|');
        assert_eq!(args.device, 0);
    }

    #[test]
    fn review_conflicts_with_quality_gate() {
        let result = Cli::try_parse_from([
            "narrate",
            "generate",
            "--textdir",
            "texts",
            "--synth-cmd",
            "synth",
            "--review",
            "--qa",
        ]);
        assert!(result.is_err());
    }
}
