use color_eyre::{eyre::eyre, Result};
use procontroller::config::Config;
use procontroller::controller::{ControllerHandle, DriverSettings};
use procontroller::hid::hidapi_backend::HidApiProvider;
use procontroller::inference::load_classifier;
use tracing::{info, Level, Subscriber};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    // The configured level is only known after loading, so loading logs
    // through a scoped default-level subscriber
    let (config_path, config, level) =
        tracing::subscriber::with_default(subscriber(Level::INFO), || {
            let path = Config::default_path();
            let config = Config::load_or_default(&path);
            let level = config.logging.level();
            (path, config, level)
        });
    tracing::subscriber::set_global_default(subscriber(level))?;
    info!("Configuration: {}", config_path.display());

    let classifier = load_classifier(&config.inference);
    let provider = HidApiProvider::new(config.driver.rescan_interval());
    let driver = ControllerHandle::new(
        DriverSettings::from(&config),
        Box::new(provider),
        classifier,
    );

    driver
        .initialize()
        .map_err(|e| eyre!("Failed to initialize driver: {}", e))?;
    driver
        .start()
        .map_err(|e| eyre!("Failed to start driver: {}", e))?;
    info!("Waiting for a Pro Controller, press Ctrl-C to quit");

    let mut states = driver.subscribe();
    let mut connected = false;
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    Some(state) if !connected => {
                        connected = true;
                        let status = driver.status();
                        info!(
                            "Controller ready: {:?}, device {}",
                            status.link,
                            status.device.map(|d| d.to_string()).unwrap_or_default()
                        );
                        info!("First sample at {:?}", state.timestamp);
                    }
                    None if connected => {
                        connected = false;
                        info!("Controller gone, waiting for reconnect");
                    }
                    _ => {}
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Ctrl-C received");
                break;
            }
        }
    }

    let status = driver.status();
    info!(
        "Shutting down ({} feature vectors queued, {} dropped)",
        status.queued_features, status.dropped_features
    );
    tokio::task::spawn_blocking(move || driver.stop()).await?;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn subscriber(level: Level) -> impl Subscriber + Send + Sync + 'static {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .finish()
}
