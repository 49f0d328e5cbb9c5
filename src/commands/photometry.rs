use super::fmt_value;
use super::fwhm::print_axis_rows;
use anyhow::{Context, Result};
use astro_psf::config::PhotometryConfig;
use astro_psf::image::Image;
use astro_psf::psf_fitting::PhotometryResult;
use astro_psf::region::{Region, StarRole};
use astro_psf::session::{PhotometryReport, PhotometrySession};

/// Where the stars of one role come from
pub enum StarSource {
    Manual(Vec<(f64, f64)>),
    Region(Region),
}

pub fn run_photometry(
    image: &Image,
    targets: StarSource,
    comparisons: StarSource,
    config: PhotometryConfig,
    format: &str,
) -> Result<()> {
    let mut session = PhotometrySession::new(config);

    for (role, source) in [(StarRole::Target, targets), (StarRole::Comparison, comparisons)] {
        match source {
            StarSource::Manual(coords) => session.set_stars(role, &coords),
            StarSource::Region(region) => {
                let found = session
                    .detect_in_region(image, role, &region)
                    .with_context(|| format!("Detecting {} stars in region {:?}", role, region))?;
                if found.is_empty() {
                    anyhow::bail!("No {} stars detected in region {:?}", role, region);
                }
            }
        }
    }

    let report = session.run_photometry(image)?;

    match format {
        "json" => output_json(&report)?,
        "csv" => output_csv(&report),
        _ => output_table(&report, session.config().comparison_magnitude),
    }

    Ok(())
}

fn all_results(report: &PhotometryReport) -> impl Iterator<Item = &PhotometryResult> {
    report.targets.iter().chain(report.comparisons.iter())
}

fn output_table(report: &PhotometryReport, comp_mag: f64) {
    print_axis_rows("Target", &report.fwhm_report.target);
    print_axis_rows("Comparison", &report.fwhm_report.comparison);
    println!("PSF FWHM: {:.3} px\n", report.fwhm_report.fwhm);

    println!(
        "{:<12} {:<4} {:>10} {:>10} {:>14} {:>10} {:>8} {:>6} {:<8}",
        "Role", "ID", "X", "Y", "Flux", "Bkg", "QFit", "Flags", "Status"
    );
    println!("{:-<90}", "");
    for result in all_results(report) {
        println!(
            "{:<12} {:<4} {:>10} {:>10} {:>14} {:>10} {:>8} {:>6} {:<8}",
            result.role,
            result.id,
            fmt_value(result.x_fit, 3, "NaN"),
            fmt_value(result.y_fit, 3, "NaN"),
            fmt_value(result.flux_fit, 2, "NaN"),
            fmt_value(result.local_bkg, 2, "NaN"),
            fmt_value(result.qfit, 4, "NaN"),
            result.flags,
            if result.success { "ok" } else { "failed" }
        );
    }
    println!();

    match &report.magnitude {
        Ok(m) => {
            println!("Flux ratio:           {:.5}", m.flux_ratio);
            println!("Comparison magnitude: {:.3}", m.comparison_magnitude);
            println!("Target magnitude:     {:.3}", m.target_magnitude);
        }
        Err(e) => {
            println!("Comparison magnitude: {:.3}", comp_mag);
            println!("Target magnitude:     unavailable ({})", e);
        }
    }
}

fn output_json(report: &PhotometryReport) -> Result<()> {
    let magnitude = match &report.magnitude {
        Ok(m) => serde_json::to_value(m)?,
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };
    let value = serde_json::json!({
        "fwhm": report.fwhm_report,
        "targets": report.targets,
        "comparisons": report.comparisons,
        "magnitude": magnitude,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn output_csv(report: &PhotometryReport) {
    println!("role,id,x_init,y_init,flux_init,x_fit,y_fit,flux_fit,local_bkg,npixfit,iterations,qfit,flags,success");
    for r in all_results(report) {
        println!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            r.role,
            r.id,
            r.x_init,
            r.y_init,
            fmt_value(r.flux_init, 4, ""),
            fmt_value(r.x_fit, 4, ""),
            fmt_value(r.y_fit, 4, ""),
            fmt_value(r.flux_fit, 4, ""),
            fmt_value(r.local_bkg, 4, ""),
            r.npixfit,
            r.iterations,
            fmt_value(r.qfit, 6, ""),
            r.flags,
            r.success
        );
    }
}
