use super::fmt_value;
use anyhow::Result;
use astro_psf::fwhm_profile::{estimate_fwhm_1d_profile, AxisFit, FwhmProfile};
use astro_psf::image::Image;

pub fn estimate_fwhm(image: &Image, x: f64, y: f64, size: usize, format: &str) -> Result<()> {
    let profile = estimate_fwhm_1d_profile(&image.view(), x, y, size)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&profile)?),
        "csv" => {
            println!("axis,fwhm,sigma,amplitude,mean,offset,success");
            for (name, axis) in [("x", &profile.x), ("y", &profile.y)] {
                println!(
                    "{},{},{},{},{},{},{}",
                    name,
                    fmt_value(axis.fwhm, 4, ""),
                    fmt_value(axis.sigma, 4, ""),
                    fmt_value(axis.amplitude, 4, ""),
                    fmt_value(axis.mean, 4, ""),
                    fmt_value(axis.offset, 4, ""),
                    axis.success
                );
            }
        }
        _ => output_table(&profile),
    }

    Ok(())
}

pub fn print_axis_rows(label: &str, profile: &FwhmProfile) {
    for (name, axis) in [("x", &profile.x), ("y", &profile.y)] {
        println!("{:<12} {}", format!("{} FWHM_{}", label, name), describe_axis(axis));
    }
}

fn describe_axis(axis: &AxisFit) -> String {
    match axis.valid_fwhm() {
        Some(fwhm) => format!("{:>8.3} px (sigma {:.3})", fwhm, axis.sigma),
        None => format!("{:>8} ({})", "NaN", axis.failure_reason()),
    }
}

fn output_table(profile: &FwhmProfile) {
    println!(
        "Profile patch {}x{} centered at ({}, {})",
        profile.size, profile.size, profile.center_x, profile.center_y
    );
    print_axis_rows("Star", profile);

    let values: Vec<f64> = profile.valid_values().collect();
    if !values.is_empty() {
        println!(
            "{:<12} {:>8.3} px",
            "Mean",
            values.iter().sum::<f64>() / values.len() as f64
        );
    }
}
