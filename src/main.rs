mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::photometry::StarSource;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Detect {
            fits_path,
            region,
            role,
            detection,
        } => {
            commands::apply_detection_options(&mut config, &detection)?;
            let image = commands::load_image(&fits_path)?;
            commands::detect_region(&image, &region, &role, config, &cli.format)?;
        }
        Commands::Fwhm { fits_path, x, y, size } => {
            if let Some(size) = size {
                config.set_profile_size(size)?;
            }
            let image = commands::load_image(&fits_path)?;
            commands::estimate_fwhm(&image, x, y, config.profile_size, &cli.format)?;
        }
        Commands::Photometry {
            fits_path,
            targets,
            comparisons,
            target_region,
            comparison_region,
            comp_mag,
            fit_background,
            profile_size,
            detection,
        } => {
            commands::apply_detection_options(&mut config, &detection)?;
            if let Some(comp_mag) = comp_mag {
                config.set_comparison_magnitude(comp_mag)?;
            }
            if let Some(size) = profile_size {
                config.set_profile_size(size)?;
            }
            if fit_background {
                config.fit_background = true;
            }

            let targets = match target_region {
                Some(region) => StarSource::Region(region),
                None if !targets.is_empty() => StarSource::Manual(targets),
                None => anyhow::bail!("Provide --target x,y or --target-region x,y,w,h"),
            };
            let comparisons = match comparison_region {
                Some(region) => StarSource::Region(region),
                None if !comparisons.is_empty() => StarSource::Manual(comparisons),
                None => anyhow::bail!("Provide --comparison x,y or --comparison-region x,y,w,h"),
            };

            let image = commands::load_image(&fits_path)?;
            commands::run_photometry(&image, targets, comparisons, config, &cli.format)?;
        }
        Commands::Magnitude {
            target_flux,
            comp_flux,
            comp_mag,
        } => {
            if let Some(comp_mag) = comp_mag {
                config.set_comparison_magnitude(comp_mag)?;
            }
            commands::compute_magnitude(target_flux, comp_flux, config.comparison_magnitude, &cli.format)?;
        }
    }

    Ok(())
}
