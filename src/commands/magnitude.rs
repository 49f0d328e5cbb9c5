use anyhow::Result;
use astro_psf::magnitude::differential_magnitude;

pub fn compute_magnitude(target_flux: f64, comp_flux: f64, comp_mag: f64, format: &str) -> Result<()> {
    let result = differential_magnitude(target_flux, comp_flux, comp_mag)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "csv" => {
            println!("target_magnitude,comparison_magnitude,flux_ratio");
            println!(
                "{:.3},{:.3},{}",
                result.target_magnitude, result.comparison_magnitude, result.flux_ratio
            );
        }
        _ => {
            println!("Flux ratio:           {:.5}", result.flux_ratio);
            println!("Comparison magnitude: {:.3}", result.comparison_magnitude);
            println!("Target magnitude:     {:.3}", result.target_magnitude);
        }
    }

    Ok(())
}
