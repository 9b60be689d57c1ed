//! Command-line reduction of GIWAXS detector images.
//!
//! Reads EDF images, derives profiles, polar images and ring fits, and
//! writes the results as CSV.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Args, Parser, Subcommand};

use giwaxs_algorithms::{
    angular_profile, fit_selected, fit_together, propose_rings, BaselineSession, BoxInterpolation,
    PolarInterpolator, RadialProfile,
};
use giwaxs_core::error::{BaselineError, FitError};
use giwaxs_core::{BeamCenter, ImageContext, InterpolationMode};
use giwaxs_io::{ConfigStore, CsvWriter, EdfReader};
use log::info;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    GiwaxsIo(#[from] giwaxs_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] giwaxs_core::Error),

    #[error("Fit error: {0}")]
    Fit(#[from] FitError),

    #[error("Baseline error: {0}")]
    Baseline(#[from] BaselineError),

    #[error("{0}")]
    Empty(&'static str),
}

/// GIWAXS image reduction.
#[derive(Parser)]
#[command(name = "giwaxs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory of saved parameter groups (JSON)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Image loading options shared by the reducing commands.
#[derive(Args)]
struct ImageArgs {
    /// Input EDF file
    input: PathBuf,

    /// Beam center row (pixels); defaults to the image center
    #[arg(long)]
    center_row: Option<f64>,

    /// Beam center column (pixels); defaults to the image center
    #[arg(long)]
    center_col: Option<f64>,

    /// Physical units per pixel
    #[arg(long, default_value = "1.0")]
    scale: f64,

    /// Keep the stored orientation instead of rotating counter-clockwise
    #[arg(long)]
    no_rotate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the header and intensity range of an EDF file
    Info {
        /// Input EDF file
        input: PathBuf,
    },

    /// Azimuthally averaged radial profile
    Radial {
        #[command(flatten)]
        image: ImageArgs,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        /// Gaussian smoothing (bins)
        #[arg(long, default_value = "0.0")]
        sigma: f64,
    },

    /// Angular profile within a radial band
    Angular {
        #[command(flatten)]
        image: ImageArgs,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        /// Inner radius (pixels)
        #[arg(long)]
        r1: f64,

        /// Outer radius (pixels)
        #[arg(long)]
        r2: f64,

        /// Gaussian smoothing (bins)
        #[arg(long, default_value = "0.0")]
        sigma: f64,

        /// Number of angular bins
        #[arg(long, default_value = "300")]
        bins: usize,
    },

    /// Polar (radius x angle) image
    Polar {
        #[command(flatten)]
        image: ImageArgs,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        /// Radius samples; defaults to the saved configuration
        #[arg(long)]
        r_size: Option<usize>,

        /// Angle samples; defaults to the saved configuration
        #[arg(long)]
        phi_size: Option<usize>,

        /// Nearest, Bilinear, Cubic or Lanczos
        #[arg(long)]
        mode: Option<String>,

        /// Average source pixels over a box instead of point sampling
        #[arg(long = "box")]
        box_average: bool,

        /// Spread the output rows over all cores
        #[arg(long)]
        parallel: bool,
    },

    /// Find rings on the radial profile and fit them
    Peaks {
        #[command(flatten)]
        image: ImageArgs,

        /// Output CSV path for the ROI table
        #[arg(short, long)]
        output: PathBuf,

        /// Cap on the number of rings
        #[arg(long)]
        max_peaks: Option<usize>,

        /// Initial ring width (pixels)
        #[arg(long)]
        init_width: Option<f64>,

        /// Fit all rings jointly
        #[arg(long)]
        joint: bool,

        /// Only propose rings, do not fit
        #[arg(long)]
        no_fit: bool,
    },

    /// Asymmetric least squares baseline of the radial profile
    Baseline {
        #[command(flatten)]
        image: ImageArgs,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        /// First profile index of the region
        #[arg(long, default_value = "0")]
        x1: usize,

        /// Last profile index of the region; defaults to the profile end
        #[arg(long)]
        x2: Option<usize>,

        /// Smoothness (lambda)
        #[arg(long)]
        smoothness: Option<f64>,

        /// Asymmetry (p)
        #[arg(long)]
        asymmetry: Option<f64>,
    },
}

fn load_context(args: &ImageArgs) -> Result<ImageContext> {
    let edf = EdfReader::open(&args.input)?
        .with_rotation(!args.no_rotate)
        .read()?;
    let (rows, cols) = edf.data.dim();
    let mut ctx = ImageContext::new();
    ctx.set_image(edf.data);
    ctx.set_beam_center(BeamCenter::new(
        args.center_row.unwrap_or(rows as f64 / 2.0),
        args.center_col.unwrap_or(cols as f64 / 2.0),
    ))?;
    ctx.set_scale(args.scale, "px")?;
    info!(
        "loaded {} ({}x{}), beam center ({}, {})",
        args.input.display(),
        rows,
        cols,
        ctx.beam_center().row,
        ctx.beam_center().col
    );
    Ok(ctx)
}

fn radial(ctx: &ImageContext, sigma: f64) -> Result<RadialProfile> {
    RadialProfile::from_context(ctx, sigma)?.ok_or(CliError::Empty("no image loaded"))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let store = cli.config_dir.map(ConfigStore::new);
    let start = Instant::now();

    match cli.command {
        Commands::Info { input } => {
            let reader = EdfReader::open(&input)?;
            let header = reader.header()?;
            println!("File: {}", input.display());
            println!("Header size: {} bytes", header.header_size());
            for (key, value) in header.iter() {
                println!("  {} = {}", key, value);
            }

            let image = reader.read()?.data;
            let (lo, hi) = image
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            println!("Shape (rotated): {:?}", image.dim());
            if !image.is_empty() {
                println!("Intensity range: {} - {}", lo, hi);
                println!("Mean intensity: {:.4}", image.sum() / image.len() as f64);
            }
        }

        Commands::Radial {
            image,
            output,
            sigma,
        } => {
            let ctx = load_context(&image)?;
            let profile = radial(&ctx, sigma)?;
            CsvWriter::create(&output)?.write_profile(profile.x.view(), profile.y.view())?;
            println!("Wrote {} radial bins to {}", profile.y.len(), output.display());
        }

        Commands::Angular {
            image,
            output,
            r1,
            r2,
            sigma,
            bins,
        } => {
            let ctx = load_context(&image)?;
            let (Some(img), Some(phi), Some(rr)) = (ctx.image(), ctx.phi(), ctx.rr()) else {
                return Err(CliError::Empty("no image loaded"));
            };
            let profile = angular_profile(img, phi, rr, r1, r2, sigma, bins)?;
            CsvWriter::create(&output)?.write_angular_profile(&profile)?;
            println!(
                "Wrote {} angular bins ({} pixels) to {}",
                bins,
                profile.counts.sum(),
                output.display()
            );
        }

        Commands::Polar {
            image,
            output,
            r_size,
            phi_size,
            mode,
            box_average,
            parallel,
        } => {
            let ctx = load_context(&image)?;
            let mut config = store
                .as_ref()
                .map(ConfigStore::interpolation_config)
                .unwrap_or_default()
                .with_parallel(parallel);
            if let Some(mode) = mode {
                config.mode = mode.parse::<InterpolationMode>()?;
            }
            let mut interpolator = PolarInterpolator::new(config);
            interpolator.set_size(r_size.unwrap_or(0), phi_size.unwrap_or(0));

            let polar = if box_average {
                interpolator.interpolate_with(&ctx, &BoxInterpolation::new())
            } else {
                interpolator.interpolate(&ctx)
            }
            .ok_or(CliError::Empty("interpolation produced no image"))?;
            CsvWriter::create(&output)?.write_image(&polar)?;
            println!(
                "Wrote {}x{} polar image to {}",
                polar.nrows(),
                polar.ncols(),
                output.display()
            );
        }

        Commands::Peaks {
            image,
            output,
            max_peaks,
            init_width,
            joint,
            no_fit,
        } => {
            let ctx = load_context(&image)?;
            let mut config = store
                .as_ref()
                .map(ConfigStore::fit_config)
                .unwrap_or_default();
            if let Some(max_peaks) = max_peaks {
                config = config.with_max_peaks(max_peaks);
            }
            if let Some(width) = init_width {
                config = config.with_init_width(width);
            }

            let profile = radial(&ctx, 0.0)?;
            let proposed = propose_rings(&profile, &config);
            let rois = if no_fit {
                proposed
            } else if joint {
                fit_together(&profile, &proposed, &config)?
            } else {
                fit_selected(&profile, &proposed, &config)
            };
            CsvWriter::create(&output)?.write_rois(&rois)?;
            for roi in &rois {
                println!(
                    "{:<18} radius {:>10.3}  width {:>9.3}{}",
                    roi.name.as_deref().unwrap_or("-"),
                    roi.radius,
                    roi.width,
                    if roi.fitted { "  (fitted)" } else { "" }
                );
            }
            println!("Wrote {} rings to {}", rois.len(), output.display());
        }

        Commands::Baseline {
            image,
            output,
            x1,
            x2,
            smoothness,
            asymmetry,
        } => {
            let ctx = load_context(&image)?;
            let mut config = store
                .as_ref()
                .map(ConfigStore::baseline_config)
                .unwrap_or_default();
            if let Some(smoothness) = smoothness {
                config = config.with_smoothness(smoothness);
            }
            if let Some(asymmetry) = asymmetry {
                config = config.with_asymmetry(asymmetry);
            }

            let profile = radial(&ctx, 0.0)?;
            let x2 = x2.unwrap_or(profile.y.len().saturating_sub(1));
            let mut session = BaselineSession::new(config);
            let baseline = session.calculate(profile.y.view(), x1, x2)?.clone();
            session.subtract()?;
            let corrected = session.corrected(profile.y.view());
            CsvWriter::create(&output)?.write_columns(
                &["x", "y", "baseline", "corrected"],
                &[
                    profile.x.view(),
                    profile.y.view(),
                    baseline.view(),
                    corrected.view(),
                ],
            )?;
            println!(
                "Wrote baseline over [{}, {}] to {}",
                x1,
                x2,
                output.display()
            );
        }
    }

    info!("done in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
