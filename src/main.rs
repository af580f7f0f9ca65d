//! navjoy: spacenav 6DoF device as a uinput joystick
//!
//! Main entry point.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

use navjoy::cli::Cli;
use navjoy::config::VirtualDeviceSpec;
use navjoy::daemon;
use navjoy::joystick::VirtualJoystick;
use navjoy::lifecycle::{CancelToken, Lifecycle};
use navjoy::logging;
use navjoy::spacenav::SpnavSession;

fn main() -> ExitCode {
    // Handlers go in first so a signal during startup still tears down
    let cancel = CancelToken::new();
    let handlers = cancel.install_signal_handlers();

    let cli = Cli::parse();
    let (settings, warnings) = cli.settings();
    logging::init(settings.verbosity);
    for warning in warnings {
        error!("{}", warning);
    }

    if let Err(e) = handlers {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    info!("uinput device is {}", settings.uinput_path.display());
    info!("spacenavd socket is {}", settings.socket_path.display());

    let spec = VirtualDeviceSpec::default();
    let mut lifecycle = Lifecycle::new(cancel);
    let reason = lifecycle.run(
        &spec,
        |spec| VirtualJoystick::create(spec, &settings.uinput_path),
        || SpnavSession::open(&settings.socket_path),
        || {
            if settings.daemonize {
                daemon::detach()
            } else {
                Ok(())
            }
        },
    );

    info!("Exiting ({:?})", reason);
    reason.into()
}
