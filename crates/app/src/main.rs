use std::{
    f32::consts::PI,
    path::{Path, PathBuf},
    sync::Barrier,
};

use clap::{Parser, Subcommand};
use ndarray::{s, Array2};
use spatial_attention_core::{
    AudioEvent, BallDetection, FaceDetection, PinholeCameraModel, SelfState, SpatialEngine,
    SpatialParams, StreamFrameSink, StreamId,
};
use tracing_subscriber::EnvFilter;

fn main() -> spatial_attention_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            ticks,
            params,
            width,
            height,
            json,
        } => run_simulate(ticks, params.as_deref(), width, height, json),
        Commands::Params { check } => run_params(check.as_deref()),
    }
}

fn load_params(path: Option<&Path>) -> spatial_attention_core::Result<SpatialParams> {
    match path {
        Some(path) => SpatialParams::from_path(path),
        None => Ok(SpatialParams::default()),
    }
}

fn run_simulate(
    ticks: usize,
    params: Option<&Path>,
    width: usize,
    height: usize,
    json: bool,
) -> spatial_attention_core::Result<()> {
    let params = load_params(params)?;
    tracing::info!(ticks, width, height, "starting simulation");

    let engine = SpatialEngine::new(params, Box::new(PinholeCameraModel::default()));
    let barrier = Barrier::new(2);
    let stimulus = Stimulus { width, height };

    std::thread::scope(|scope| {
        for stream in [StreamId::Left, StreamId::Right] {
            let engine = &engine;
            let barrier = &barrier;
            scope.spawn(move || {
                for tick in 0..ticks {
                    stimulus.feed(engine, stream, tick);
                    let updated = engine.on_stream_frame(stream, Some(stimulus.motion(stream, tick)));
                    if updated.is_empty() {
                        tracing::debug!(%stream, tick, "stream skipped tick");
                    }
                    barrier.wait();
                    if stream == StreamId::Left {
                        log_best_peak(engine, tick);
                    }
                }
            });
        }

        scope.spawn(|| {
            for tick in 0..ticks {
                if tick % 10 == 0 {
                    let azim = (tick as f32 * 0.1).sin() * PI * 0.6;
                    engine.push_audio_events([AudioEvent {
                        azim,
                        elev: 0.1,
                        level: 1.0,
                    }]);
                }
                engine.set_self_state(SelfState {
                    vocalizing: tick % 25 < 3,
                    ..Default::default()
                });
                std::thread::yield_now();
            }
        });
    });

    match engine.best_peak() {
        Some(peak) if json => {
            println!("{}", serde_json::to_string(&peak)?);
        }
        Some(peak) => tracing::info!(
            stream = %peak.stream,
            height = peak.height,
            azim = peak.azim,
            elev = peak.elev,
            range = peak.range,
            "best peak"
        ),
        None => tracing::info!("nothing salient"),
    }
    tracing::info!(domes = engine.domes().len(), "simulation finished");
    Ok(())
}

fn log_best_peak(engine: &SpatialEngine, tick: usize) {
    match engine.best_peak() {
        Some(peak) => tracing::debug!(
            tick,
            stream = %peak.stream,
            height = peak.height,
            azim = peak.azim,
            elev = peak.elev,
            range = peak.range,
            "best peak"
        ),
        None => tracing::debug!(tick, "nothing salient"),
    }
}

fn run_params(check: Option<&Path>) -> spatial_attention_core::Result<()> {
    match check {
        Some(path) => {
            SpatialParams::from_path(path)?;
            tracing::info!(?path, "parameter file is valid");
        }
        None => println!("{}", SpatialParams::default().to_json_pretty()?),
    }
    Ok(())
}

/// Synthetic detector output: a face drifting across the left camera and a
/// ball bouncing in the right camera.
#[derive(Debug, Clone, Copy)]
struct Stimulus {
    width: usize,
    height: usize,
}

impl Stimulus {
    fn feed(&self, engine: &SpatialEngine, stream: StreamId, tick: usize) {
        let phase = tick as f32 * 0.05;
        match stream {
            StreamId::Left => {
                let x = (phase.sin() * 0.4 + 0.5) * self.width as f32;
                engine.push_faces(
                    stream,
                    vec![FaceDetection {
                        x: x - 24.0,
                        y: self.height as f32 * 0.3,
                        w: 48.0,
                        h: 48.0,
                        confidence: 0.8,
                    }],
                );
            }
            StreamId::Right if tick % 3 == 0 => {
                let y = (phase.cos() * 0.3 + 0.5) * self.height as f32;
                engine.push_ball(
                    stream,
                    BallDetection {
                        x: self.width as f32 * 0.5,
                        y,
                        radius: 20.0,
                    },
                );
            }
            _ => {}
        }
    }

    fn motion(&self, stream: StreamId, tick: usize) -> Array2<f32> {
        let mut frame = Array2::zeros((self.height, self.width));
        if stream == StreamId::Right && tick % 7 == 0 {
            let (h, w) = (self.height / 8, self.width / 8);
            frame.slice_mut(s![h..2 * h, w..2 * w]).fill(120.0);
        }
        frame
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Spatial attention core harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive both camera streams on their own threads against synthetic stimuli.
    Simulate {
        /// Number of ticks per camera stream.
        #[arg(short, long, default_value_t = 100)]
        ticks: usize,
        /// Optional JSON parameter bundle.
        #[arg(short, long)]
        params: Option<PathBuf>,
        #[arg(long, default_value_t = 320)]
        width: usize,
        #[arg(long, default_value_t = 240)]
        height: usize,
        /// Print the final best peak as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the default parameter bundle, or validate a parameter file.
    Params {
        /// Parameter file to validate instead of printing defaults.
        #[arg(long)]
        check: Option<PathBuf>,
    },
}
