//! sessiond - session manager daemon

use std::process::ExitCode;

use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use sessiond_protocol::ShutdownKind;
use sessiond_utils::Result;

mod client;
mod config;
mod connection;
mod events;
mod hooks;
mod keyfile;
mod manager;
mod properties;
mod session_store;
mod shutdown;
mod startup;

use config::ConfigLoader;
use hooks::Collaborators;
use keyfile::KeyFile;
use manager::{LoadOutcome, Manager, ManagerMsg};
use session_store::SessionStore;
use shutdown::ShutdownDriver;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = sessiond_utils::init_logging() {
        eprintln!("sessiond: {}", e);
        return ExitCode::FAILURE;
    }
    info!("sessiond starting");

    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("sessiond: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    sessiond_utils::ensure_all_dirs()?;

    let mut config = ConfigLoader::load_and_validate()?;

    // System settings: session defaults, chooser, failsafe definition
    let settings = match sessiond_utils::settings_file() {
        Some(path) => {
            info!("Using settings from {}", path.display());
            KeyFile::load(&path)?
        }
        None => KeyFile::new(),
    };
    config.merge_settings(&settings);

    let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".into());
    let store = SessionStore::new(sessiond_utils::session_file_path(&display));

    let (manager_tx, manager_rx) = mpsc::unbounded_channel();
    let mut manager = Manager::new(config, store, Collaborators::default(), manager_tx.clone());

    match manager.load(&settings) {
        LoadOutcome::Loaded => {
            info!("Session \"{}\" loaded successfully", manager.session_name());
        }
        LoadOutcome::Failsafe => {
            info!("No session to restore, starting the failsafe session");
        }
        LoadOutcome::ChooserLogout => {
            info!("Chooser requested logout");
            return Ok(ExitCode::SUCCESS);
        }
        LoadOutcome::NoSession => {
            eprintln!(
                "sessiond: Unable to load a failsafe session, exiting. Please check\n\
                 \x20         the value of the environment variable XDG_CONFIG_DIRS\n\
                 \x20         and make sure that it includes a directory containing\n\
                 \x20         sessiond/sessiond.rc"
            );
            return Ok(ExitCode::FAILURE);
        }
    }

    let socket = sessiond_utils::socket_path();
    let _ = std::fs::remove_file(&socket);
    let listener = UnixListener::bind(&socket)?;
    info!("Listening on {}", socket.display());

    tokio::spawn(connection::serve(listener, manager_tx.clone()));

    let _ = manager_tx.send(ManagerMsg::BeginStartup);
    let kind = manager.run(manager_rx).await;

    let _ = std::fs::remove_file(&socket);

    // The manager is done; hand the power action to the backend chain
    match kind {
        ShutdownKind::Ask | ShutdownKind::Logout => {}
        kind => {
            let driver = ShutdownDriver::new();
            if let Err(e) = driver.execute(kind) {
                warn!("Power action failed: {}", e);
            }
        }
    }

    info!("sessiond stopped");
    Ok(ExitCode::SUCCESS)
}
