use anyhow::{Context, Result};
use snow_mirror::MirrorConfig;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snow_mirror=info")),
        )
        .init();

    let config = MirrorConfig::from_env().context("invalid SNOW_MIRROR_* configuration")?;

    match snow_mirror::enumerate_outputs() {
        Ok(outputs) => {
            for output in &outputs {
                println!(
                    "output {}: {} {:?} rotation={:?}",
                    output.index, output.name, output.desktop_bounds, output.rotation
                );
            }
        }
        Err(error) => eprintln!("could not enumerate outputs: {error}"),
    }

    println!(
        "Mirroring displays {:?} at zoom {:.2}. Ctrl+wheel or Ctrl+/- zooms, drag or Ctrl+arrows pans, Ctrl+0 resets, Ctrl+P pauses.",
        config.displays, config.zoom
    );
    snow_mirror::run(config).context("mirror loop failed")?;
    Ok(())
}
