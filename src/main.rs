//! Iris live viewer: camera acquisition, decode and display.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use iris::capture::sim::{SimSpec, SimSystem};
use iris::display::Viewer;
use iris::{Config, ControlFacade};

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("iris=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Iris launching...");

    let config = load_config()?;

    // No vendor transport is linked in this build, so stream from the
    // simulated camera at the display size.
    let system = Arc::new(SimSystem::single(SimSpec {
        width: config.display.width,
        height: config.display.height,
        pixel_format: config.capture.pixel_format,
        ..SimSpec::default()
    }));

    let facade = ControlFacade::new(system, config.clone(), "iris-preset.json");
    facade.start();

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut viewer = Viewer::new(&sdl_context, config.display.width, config.display.height)?;
    viewer.run(&sdl_context, &facade)?;

    facade.stop();
    info!("Iris shutting down");
    Ok(())
}

/// Layered configuration: optional `iris.toml`, then `IRIS_*` environment
/// overrides, then built-in defaults.
fn load_config() -> Result<Config> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("iris").required(false))
        .add_source(config::Environment::with_prefix("IRIS").separator("__"))
        .build()?;
    Ok(settings.try_deserialize()?)
}
