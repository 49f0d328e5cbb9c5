use super::fmt_value;
use anyhow::{Context, Result};
use astro_psf::config::PhotometryConfig;
use astro_psf::image::Image;
use astro_psf::region::{Region, StarCandidate, StarRole};
use astro_psf::session::PhotometrySession;

pub fn detect_region(
    image: &Image,
    region: &Region,
    role: &str,
    config: PhotometryConfig,
    format: &str,
) -> Result<()> {
    let role: StarRole = role.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let mut session = PhotometrySession::new(config);
    let stars = session
        .detect_in_region(image, role, region)
        .with_context(|| format!("Star detection failed in region {:?}", region))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(stars)?),
        "csv" => output_csv(stars),
        _ => output_table(stars, region),
    }

    Ok(())
}

fn output_table(stars: &[StarCandidate], region: &Region) {
    println!(
        "Region {}x{} at ({}, {})",
        region.width, region.height, region.x0, region.y0
    );
    println!(
        "{:<5} {:<12} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "#", "Role", "X", "Y", "Peak", "Sharpness", "Roundness", "FWHM"
    );
    println!("{:-<84}", "");

    for (i, star) in stars.iter().enumerate() {
        let metric = |value: Option<f64>| {
            value
                .map(|v| fmt_value(v, 3, "-"))
                .unwrap_or_else(|| "-".to_string())
        };
        let m = star.metrics.as_ref();
        println!(
            "{:<5} {:<12} {:>10.3} {:>10.3} {:>10} {:>10} {:>10} {:>10}",
            i + 1,
            star.role,
            star.x,
            star.y,
            metric(m.map(|m| m.peak)),
            metric(m.map(|m| m.sharpness)),
            metric(m.map(|m| m.roundness)),
            metric(m.map(|m| m.fwhm)),
        );
    }

    println!("\nTotal: {} stars", stars.len());
}

fn output_csv(stars: &[StarCandidate]) {
    println!("id,role,x,y,peak,flux,sharpness,roundness,fwhm");
    for (i, star) in stars.iter().enumerate() {
        let (peak, flux, sharpness, roundness, fwhm) = match &star.metrics {
            Some(m) => (m.peak, m.flux, m.sharpness, m.roundness, m.fwhm),
            None => (f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN),
        };
        println!(
            "{},{},{},{},{},{},{},{},{}",
            i + 1,
            star.role,
            star.x,
            star.y,
            fmt_value(peak, 4, ""),
            fmt_value(flux, 4, ""),
            fmt_value(sharpness, 4, ""),
            fmt_value(roundness, 4, ""),
            fmt_value(fwhm, 4, ""),
        );
    }
}
