//! `transformer` - initialise checkpoints and decode token-id sequences.
//!
//! Input and output are whitespace-separated token ids, one example per line;
//! tokenisation happens upstream.

use std::{
    fs,
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand};
use decoding::{BeamSearchDecoder, GreedyDecoder};
use layers::WeightMap;
use model::Transformer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::RunConfig;

/// Encoder-decoder transformer inference.
#[derive(Parser)]
#[command(name = "transformer", version, about, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a freshly initialised checkpoint for the configured architecture
    Init {
        /// Run configuration (TOML or JSON)
        #[arg(long, value_name = "PATH")]
        config: PathBuf,

        /// Destination safetensors file
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },

    /// Decode one source sequence per input line
    Decode {
        /// Run configuration (TOML or JSON)
        #[arg(long, value_name = "PATH")]
        config: PathBuf,

        /// Checkpoint holding every model parameter
        #[arg(long, value_name = "PATH")]
        weights: PathBuf,

        /// Source ids, one example per line; stdin when omitted
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,

        /// Use greedy decoding instead of beam search
        #[arg(long)]
        greedy: bool,

        /// Override `decoding.beam_width`
        #[arg(long)]
        beam_width: Option<usize>,

        /// Override `decoding.length_penalty`
        #[arg(long)]
        length_penalty: Option<f32>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init { config, output } => init(&config, &output),
        Commands::Decode {
            config,
            weights,
            input,
            greedy,
            beam_width,
            length_penalty,
        } => {
            let mut run = RunConfig::from_path(&config)?;
            if let Some(width) = beam_width {
                run.decoding.beam_width = width;
            }
            if let Some(penalty) = length_penalty {
                run.decoding.length_penalty = penalty;
            }
            run.validate()?;
            decode(&run, &weights, input.as_deref(), greedy)
        }
    }
}

fn init(config_path: &Path, output: &Path) -> Result<()> {
    let run = RunConfig::from_path(config_path)?;
    let mut weights = WeightMap::initialize(&Device::Cpu);
    let model = Transformer::new(run.model, run.tokens, &mut weights)
        .context("failed to initialise the transformer")?;
    weights
        .save_safetensors(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        "wrote {} tensors ({} parameters) to {}",
        weights.len(),
        model.parameter_count(),
        output.display()
    );
    Ok(())
}

fn decode(run: &RunConfig, weights_path: &Path, input: Option<&Path>, greedy: bool) -> Result<()> {
    let mut weights = WeightMap::load_safetensors(weights_path, &Device::Cpu)
        .with_context(|| format!("failed to load {}", weights_path.display()))?;
    let model = Transformer::new(run.model.clone(), run.tokens, &mut weights)
        .context("checkpoint does not match the configured architecture")?;

    let sources = read_sources(input)?;
    info!("decoding {} examples", sources.len());
    let started = Instant::now();

    let outputs: Vec<Vec<u32>> = if greedy {
        GreedyDecoder::new(run.tokens)
            .decode_batch(&model, &sources, &run.max_length)?
            .into_iter()
            .map(|hypothesis| hypothesis.tokens)
            .collect()
    } else {
        let decoder = BeamSearchDecoder::new(run.decoding, run.tokens)?;
        decoder
            .decode_batch(&model, &sources, &run.max_length)?
            .into_iter()
            .map(|output| output.best.tokens)
            .collect()
    };
    info!("decoded {} examples in {:.1?}", outputs.len(), started.elapsed());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for tokens in outputs {
        writeln!(out, "{}", format_ids(&tokens))?;
    }
    Ok(())
}

fn read_sources(input: Option<&Path>) -> Result<Vec<Vec<u32>>> {
    let reader: Box<dyn Read> = match input {
        Some(path) => Box::new(
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    };
    let mut sources = Vec::new();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        sources.push(parse_ids(&line).with_context(|| format!("line {}", index + 1))?);
    }
    Ok(sources)
}

fn parse_ids(line: &str) -> Result<Vec<u32>> {
    line.split_whitespace()
        .map(|id| {
            id.parse::<u32>()
                .with_context(|| format!("invalid token id '{id}'"))
        })
        .collect()
}

fn format_ids(ids: &[u32]) -> String {
    ids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_text() {
        let ids = parse_ids("  5 17\t9 0 ").unwrap();
        assert_eq!(ids, vec![5, 17, 9, 0]);
        assert_eq!(format_ids(&ids), "5 17 9 0");
        assert!(parse_ids("").unwrap().is_empty());
        assert!(parse_ids("5 x").is_err());
    }

    #[test]
    fn cli_accepts_decode_overrides() {
        let cli = Cli::try_parse_from([
            "transformer",
            "decode",
            "--config",
            "run.toml",
            "--weights",
            "model.safetensors",
            "--beam-width",
            "1",
            "--greedy",
        ])
        .unwrap();
        match cli.command {
            Commands::Decode {
                beam_width, greedy, input, ..
            } => {
                assert_eq!(beam_width, Some(1));
                assert!(greedy);
                assert!(input.is_none());
            }
            Commands::Init { .. } => panic!("parsed the wrong subcommand"),
        }
    }

    #[test]
    fn init_then_decode_reads_back_the_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("run.toml");
        fs::write(
            &config_path,
            r#"
[model]
d_model = 16
n_heads = 4
n_layers = 1
d_ff = 32
max_seq_len = 32
src_vocab_size = 20
tgt_vocab_size = 24
share_target_embeddings = true

[max_length]
scale = 1.0
offset = 4
"#,
        )?;
        let weights_path = dir.path().join("model.safetensors");
        init(&config_path, &weights_path)?;

        let input_path = dir.path().join("input.txt");
        fs::write(&input_path, "5 17 9 0\n0 0\n")?;
        let run = RunConfig::from_path(&config_path)?;
        assert_eq!(read_sources(Some(&input_path))?.len(), 2);
        decode(&run, &weights_path, Some(&input_path), false)?;
        decode(&run, &weights_path, Some(&input_path), true)?;
        Ok(())
    }
}
