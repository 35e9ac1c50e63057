//! Command line front end for the pan-tilt jib.
//!
//! Each invocation loads `jib.toml` (plus `JIB_*` environment overrides), centres
//! the rig, runs one command and exits. Without the `rpi` feature, or with
//! `--simulate`, servo lines are simulated and no time is spent settling.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use jib::camera::mock::SimulatedSensor;
use jib::camera::{Camera, SensorBackend, StreamSensor};
use jib::config::{CameraConfig, JibConfig};
use jib::hardware::mock::MockBus;
use jib::hardware::{Delay, PwmLine};
use jib::rig::DEFAULT_STEP_DEG;
use jib::servo::clamp_angle;
use jib::{logging, PanTiltRig};

/// Finest sweep increment accepted, in degrees.
const MIN_SWEEP_STEP_DEG: f64 = 0.1;

#[derive(Parser, Debug)]
#[command(name = "jib", version, about = "Aim and shoot with the pan-tilt camera jib")]
struct Cli {
    /// Configuration file (defaults to ./jib.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use simulated servo lines even when GPIO is available.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Point the pan axis at an angle in degrees.
    Pan {
        #[arg(allow_negative_numbers = true)]
        degrees: f64,
    },
    /// Point the tilt axis at an angle in degrees (negative is up).
    Tilt {
        #[arg(allow_negative_numbers = true)]
        degrees: f64,
    },
    /// Move both axes, pan first.
    Move {
        #[arg(allow_negative_numbers = true)]
        pan: f64,
        #[arg(allow_negative_numbers = true)]
        tilt: f64,
    },
    /// Centre both axes.
    Center,
    /// Drive one axis to its mechanical limit.
    Preset { direction: Direction },
    /// Nudge the rig from its current position.
    Step {
        direction: Direction,
        /// Increment in degrees.
        #[arg(long, default_value_t = DEFAULT_STEP_DEG)]
        by: f64,
        /// Number of steps.
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Pan across a range, optionally taking a snapshot at every stop.
    Sweep {
        #[arg(long, default_value_t = -90.0, allow_negative_numbers = true)]
        from: f64,
        #[arg(long, default_value_t = 90.0, allow_negative_numbers = true)]
        to: f64,
        #[arg(long, default_value_t = 30.0)]
        step: f64,
        #[arg(long)]
        snap: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
    /// Capture a still frame.
    Snap {
        /// Output file; defaults to a timestamped JPEG in the configured directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Override the configured resolution, e.g. 640x480.
        #[arg(long, value_parser = parse_resolution)]
        resolution: Option<(u32, u32)>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Direction {
    Left,
    Right,
    Up,
    Down,
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((w, h))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => JibConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => JibConfig::load().context("loading configuration")?,
    };
    logging::init(&config.log)?;
    debug!(?config, "configuration loaded");

    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    if let Command::Snap { output, resolution } = &cli.command {
        return with_camera(&config.camera, |camera| {
            if let Some((w, h)) = resolution {
                camera.set_resolution(*w, *h)?;
            }
            let path = camera.save(output.as_deref())?;
            println!("{}", path.display());
            Ok(())
        });
    }

    if cli.simulate || !cfg!(feature = "rpi") {
        let mut bus = MockBus::new();
        let delay = bus.delay();
        let rig = PanTiltRig::from_config(&mut bus, &config, delay)?;
        run_rig(rig, &cli.command, &config)?;
        debug!(events = bus.events().len(), "simulated line events");
        return Ok(());
    }

    #[cfg(feature = "rpi")]
    {
        let mut bus = jib::hardware::rpi::RppalBus::new(config.gpio.numbering)?;
        let rig = PanTiltRig::from_config(&mut bus, &config, jib::hardware::ThreadDelay)?;
        run_rig(rig, &cli.command, &config)?;
    }
    Ok(())
}

fn run_rig<L: PwmLine, D: Delay>(
    mut rig: PanTiltRig<L, D>,
    command: &Command,
    config: &JibConfig,
) -> Result<()> {
    match command {
        Command::Pan { degrees } => {
            rig.move_pan(*degrees)?;
        }
        Command::Tilt { degrees } => {
            rig.move_tilt(*degrees)?;
        }
        Command::Move { pan, tilt } => {
            rig.move_to(*pan, *tilt)?;
        }
        Command::Center => {}
        Command::Preset { direction } => {
            match direction {
                Direction::Left => rig.pan_extreme_left()?,
                Direction::Right => rig.pan_extreme_right()?,
                Direction::Up => rig.tilt_extreme_up()?,
                Direction::Down => rig.tilt_extreme_down()?,
            };
        }
        Command::Step {
            direction,
            by,
            count,
        } => {
            for _ in 0..*count {
                match direction {
                    Direction::Left => rig.move_left(*by)?,
                    Direction::Right => rig.move_right(*by)?,
                    Direction::Up => rig.move_up(*by)?,
                    Direction::Down => rig.move_down(*by)?,
                };
            }
        }
        Command::Sweep {
            from,
            to,
            step,
            snap,
        } => {
            if !(step.is_finite() && *step >= MIN_SWEEP_STEP_DEG) {
                bail!("sweep step must be at least {MIN_SWEEP_STEP_DEG} degrees");
            }
            let stops = sweep_stops(*from, *to, *step);
            info!(count = stops.len(), "starting pan sweep");
            if *snap {
                with_camera(&config.camera, |camera| {
                    for angle in &stops {
                        rig.move_pan(*angle)?;
                        let path = camera.save(None)?;
                        println!("{angle:.1}\t{}", path.display());
                    }
                    Ok(())
                })?;
            } else {
                for angle in &stops {
                    rig.move_pan(*angle)?;
                }
            }
        }
        Command::Config | Command::Snap { .. } => bail!("command does not drive the rig"),
    }

    let (pan, tilt) = rig.angles();
    println!("pan {pan:.1} tilt {tilt:.1}");
    Ok(())
}

/// Angles from `from` towards `to` in `step` increments, always ending on `to`.
///
/// Both ends are clamped to the servo range first, like every move.
fn sweep_stops(from: f64, to: f64, step: f64) -> Vec<f64> {
    let from = clamp_angle(from);
    let to = clamp_angle(to);
    let step = if to >= from { step } else { -step };
    let mut stops = Vec::new();
    let mut angle = from;
    while (step > 0.0 && angle < to) || (step < 0.0 && angle > to) {
        stops.push(angle);
        angle += step;
    }
    stops.push(to);
    stops
}

fn with_camera<F>(config: &CameraConfig, f: F) -> Result<()>
where
    F: FnOnce(&mut dyn CameraOps) -> Result<()>,
{
    match &config.device {
        Some(device) => {
            let mut camera = Camera::from_config(StreamSensor::from_path(device), config)?;
            info!(%camera, device = %device.display(), "using capture device");
            f(&mut camera)
        }
        None => {
            let mut camera = Camera::from_config(SimulatedSensor::new(), config)?;
            info!(%camera, "using simulated sensor");
            f(&mut camera)
        }
    }
}

/// The camera operations the CLI needs, independent of the sensor type.
trait CameraOps {
    fn set_resolution(&mut self, width: u32, height: u32) -> jib::JibResult<()>;
    fn save(&mut self, path: Option<&std::path::Path>) -> jib::JibResult<PathBuf>;
}

impl<S: SensorBackend> CameraOps for Camera<S> {
    fn set_resolution(&mut self, width: u32, height: u32) -> jib::JibResult<()> {
        Camera::set_resolution(self, width, height)
    }

    fn save(&mut self, path: Option<&std::path::Path>) -> jib::JibResult<PathBuf> {
        Camera::save(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_stops_end_on_target() {
        assert_eq!(sweep_stops(-90.0, 90.0, 60.0), vec![-90.0, -30.0, 30.0, 90.0]);
        assert_eq!(sweep_stops(-90.0, 90.0, 100.0), vec![-90.0, 10.0, 90.0]);
        assert_eq!(sweep_stops(30.0, -30.0, 30.0), vec![30.0, 0.0, -30.0]);
        assert_eq!(sweep_stops(10.0, 10.0, 5.0), vec![10.0]);
    }

    #[test]
    fn test_sweep_stops_clamp_out_of_range_ends() {
        assert_eq!(sweep_stops(-1e20, 90.0, 60.0), vec![-90.0, -30.0, 30.0, 90.0]);
        assert_eq!(sweep_stops(f64::NEG_INFINITY, 0.0, 45.0), vec![-90.0, -45.0, 0.0]);
        assert_eq!(sweep_stops(0.0, f64::INFINITY, 90.0), vec![0.0, 90.0]);
        assert_eq!(sweep_stops(f64::NAN, 1e300, 90.0), vec![0.0, 90.0]);
    }

    #[test]
    fn test_sweep_rejects_tiny_step() {
        let cli = Cli::try_parse_from(["jib", "sweep", "--step", "1e-300"]).unwrap();
        let mut bus = MockBus::new();
        let delay = bus.delay();
        let config = JibConfig::default();
        let rig = PanTiltRig::from_config(&mut bus, &config, delay).unwrap();
        assert!(run_rig(rig, &cli.command, &config).is_err());
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("640x480"), Ok((640, 480)));
        assert!(parse_resolution("640").is_err());
        assert!(parse_resolution("axb").is_err());
    }

    #[test]
    fn test_cli_accepts_negative_angles() {
        let cli = Cli::try_parse_from(["jib", "move", "-30", "-45.5"]).unwrap();
        assert!(matches!(cli.command, Command::Move { pan, tilt } if pan == -30.0 && tilt == -45.5));
    }
}
