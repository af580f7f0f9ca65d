//! Command line interface

use crate::config::{Settings, Verbosity, DEFAULT_SOCKET_PATH, DEFAULT_UINPUT_PATH};
use clap::Parser;
use std::path::PathBuf;

/// Spacenav 6DoF device as a uinput joystick
#[derive(Parser, Debug)]
#[command(name = "navjoy", version, about)]
pub struct Cli {
    /// Detach into the background once the joystick is up
    #[arg(short, long)]
    pub daemon: bool,

    /// Log level: 0 errors, 1 warnings, 2 information, 3 debug
    #[arg(short, long, value_name = "0-3", allow_hyphen_values = true)]
    pub logging: Option<String>,

    /// uinput device node
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_UINPUT_PATH)]
    pub uinput: PathBuf,

    /// spacenavd socket
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,
}

impl Cli {
    /// Build the settings, with any problems to log once logging is up
    ///
    /// An unusable `--logging` value keeps the default level.
    pub fn settings(&self) -> (Settings, Vec<String>) {
        let mut warnings = Vec::new();
        let mut verbosity = Verbosity::default();

        if let Some(raw) = &self.logging {
            match raw.trim().parse::<i64>().ok().and_then(Verbosity::from_level) {
                Some(level) => verbosity = level,
                None => {
                    warnings.push(format!("invalid log level {}, setting to 0", raw));
                    warnings.push(
                        "0 for errors, 1 for warnings, 2 for information, 3 for debug".to_string(),
                    );
                }
            }
        }

        let settings = Settings {
            verbosity,
            daemonize: self.daemon,
            uinput_path: self.uinput.clone(),
            socket_path: self.socket.clone(),
        };
        (settings, warnings)
    }
}
