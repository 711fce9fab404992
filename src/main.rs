use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hexseq::{
    AudioOutput, BranchKind, Coord, EffectKind, EngineConfig, Sequencer, ThreadClock, UtilityKind,
};

/// Headless hex-grid sequencer: draws a few paths from the board edge toward
/// the centre and plays them.
#[derive(Parser, Debug)]
#[command(name = "hexseq", version, about)]
struct Cli {
    /// TOML engine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tempo override (40-240)
    #[arg(short, long)]
    bpm: Option<f64>,

    /// How long to play, in seconds
    #[arg(short, long, default_value = "8")]
    seconds: f64,

    /// Number of paths to draw
    #[arg(short, long, default_value = "3")]
    paths: usize,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// WAV files to use instead of the built-in drum sounds
    #[arg(short, long)]
    wav: Vec<PathBuf>,
}

const SYNTH_RATE: f32 = 44_100.0;

fn kick() -> Vec<f32> {
    let len = (SYNTH_RATE * 0.4) as usize;
    let mut phase = 0.0f32;
    (0..len)
        .map(|i| {
            let t = i as f32 / SYNTH_RATE;
            let freq = 50.0 + 90.0 * (-t * 30.0).exp();
            phase += freq / SYNTH_RATE;
            (phase * std::f32::consts::TAU).sin() * (-t * 8.0).exp() * 0.8
        })
        .collect()
}

fn hat(rng: &mut StdRng) -> Vec<f32> {
    let len = (SYNTH_RATE * 0.08) as usize;
    (0..len)
        .map(|i| {
            let t = i as f32 / SYNTH_RATE;
            rng.gen_range(-1.0f32..1.0) * (-t * 60.0).exp() * 0.3
        })
        .collect()
}

fn click() -> Vec<f32> {
    let len = (SYNTH_RATE * 0.05) as usize;
    (0..len)
        .map(|i| {
            let t = i as f32 / SYNTH_RATE;
            (t * 1_500.0 * std::f32::consts::TAU).sin() * (-t * 90.0).exp() * 0.5
        })
        .collect()
}

fn load_config(cli: &Cli) -> hexseq::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(bpm) = cli.bpm {
        config.bpm = bpm;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    Ok(config)
}

/// How long the player runs. Negative, NaN, infinite or overflowing values
/// are rejected before any audio is opened.
fn play_length(seconds: f64) -> hexseq::Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|err| hexseq::Error::InvalidConfig(format!("--seconds {seconds}: {err}")))
}

/// Fills the sample bank and returns the names in use.
fn load_samples(audio: &mut AudioOutput, cli: &Cli, rng: &mut StdRng) -> hexseq::Result<Vec<String>> {
    if cli.wav.is_empty() {
        audio.register_sample("kick", kick(), SYNTH_RATE);
        audio.register_sample("hat", hat(rng), SYNTH_RATE);
        audio.register_sample("click", click(), SYNTH_RATE);
        return Ok(vec!["kick".into(), "hat".into(), "click".into()]);
    }

    let mut names = Vec::new();
    for path in &cli.wav {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("wav{}", names.len()));
        audio.load_wav(name.clone(), path)?;
        names.push(name);
    }
    Ok(names)
}

fn main() -> hexseq::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let play_for = play_length(cli.seconds)?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let clock = ThreadClock::new();
    let mut audio = AudioOutput::new(clock.origin()).unwrap_or_else(|err| {
        warn!(error = %err, "no audio device, playing silently");
        AudioOutput::default()
    });
    let samples = load_samples(&mut audio, &cli, &mut rng)?;

    let mut seq = Sequencer::new(config, clock, audio)?;

    // scatter samples over the board, leaving every fourth hex silent
    let coords: Vec<Coord> = seq.grid().iter().map(|h| h.coord()).collect();
    for (i, coord) in coords.into_iter().enumerate() {
        let sample = if i % 4 == 3 {
            None
        } else {
            Some(samples[rng.gen_range(0..samples.len())].clone())
        };
        seq.assign_sample(coord, sample)?;
    }

    // draw paths toward the hexes around the centre
    let goals: Vec<Coord> = Coord::ORIGIN
        .within(2)
        .into_iter()
        .filter(|c| c.distance(Coord::ORIGIN) == 2)
        .collect();
    let mut committed = Vec::new();
    for goal in goals {
        if committed.len() >= cli.paths || !seq.can_commit_more_paths() {
            break;
        }
        let route = seq.propose_candidate(goal);
        if route.is_empty() {
            continue;
        }
        seq.set_draft(&route);
        match seq.commit_path(&route) {
            Ok(id) => committed.push(id),
            Err(err) => warn!(error = %err, %goal, "could not draw path"),
        }
    }
    info!(paths = committed.len(), "board ready");

    // give each path a little character
    let flavours = [
        (BranchKind::Utility(UtilityKind::Speed), 2.0),
        (BranchKind::Effect(EffectKind::Chaos), 0.4),
        (BranchKind::Utility(UtilityKind::Offset), 0.25),
        (BranchKind::Effect(EffectKind::PitchShift), -5.0),
    ];
    for (id, (kind, value)) in committed.iter().zip(flavours) {
        if let Err(err) = seq.upsert_utility(*id, kind, value) {
            warn!(path = %id, error = %err, "could not attach branch");
        }
    }

    let deadline = Instant::now()
        .checked_add(play_for)
        .ok_or_else(|| hexseq::Error::InvalidConfig(format!("--seconds {} is too long", cli.seconds)))?;
    seq.start();
    while Instant::now() < deadline {
        let ticks = seq.clock_mut().wait_ticks(Duration::from_millis(20));
        seq.run_ticks(ticks);
    }
    for (id, index) in seq.playback_indices() {
        info!(path = %id, index, "final position");
    }
    seq.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_length_accepts_finite_seconds() {
        assert_eq!(play_length(8.0).unwrap(), Duration::from_secs(8));
        assert_eq!(play_length(0.0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_play_length_rejects_bad_seconds() {
        for seconds in [-1.0, f64::NAN, f64::INFINITY, 1e20] {
            let err = play_length(seconds).unwrap_err();
            assert!(matches!(err, hexseq::Error::InvalidConfig(_)), "{seconds}: {err:?}");
        }
    }
}
