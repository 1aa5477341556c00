//! Router process lifecycle.
//!
//! `RouterService` walks the service-style state machine and drives the
//! transport; relaying itself happens inside the transport using
//! [`relay::RelayTable`].

pub mod relay;

use crate::config::{ConfigError, RouterConfig};
use crate::transport::{Transport, TransportError};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterState {
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    Continuing,
    Stopping,
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: RouterState,
        action: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Host facility the router reports its state to.
pub trait ServiceControl: Send {
    fn report_state(&mut self, state: RouterState);
}

/// Control for a plain console process: nothing to report to.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleControl;

impl ServiceControl for ConsoleControl {
    fn report_state(&mut self, _state: RouterState) {}
}

pub struct RouterService<T, C> {
    transport: T,
    control: C,
    config_path: Option<PathBuf>,
    listen_override: Option<String>,
    config: Option<RouterConfig>,
    state: RouterState,
    quit_sender: watch::Sender<bool>,
}

impl<T: Transport, C: ServiceControl> RouterService<T, C> {
    /// `config_path` of `None` runs with the default configuration.
    pub fn new(transport: T, control: C, config_path: Option<PathBuf>) -> Self {
        let (quit_sender, _) = watch::channel(false);
        Self {
            transport,
            control,
            config_path,
            listen_override: None,
            config: None,
            state: RouterState::Stopped,
            quit_sender,
        }
    }

    /// Listens on `address` regardless of the configuration file.
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_override = Some(address.into());
        self
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    /// Configuration in use since the last successful start.
    pub fn config(&self) -> Option<&RouterConfig> {
        self.config.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fires `true` once the hosting process should exit.
    pub fn quit_signal(&self) -> watch::Receiver<bool> {
        self.quit_sender.subscribe()
    }

    pub fn is_quit_signaled(&self) -> bool {
        *self.quit_sender.borrow()
    }

    /// Loads the configuration and starts the transport.
    ///
    /// On failure the router stays stopped and the quit signal fires.
    pub fn start(&mut self) -> Result<(), RouterError> {
        self.expect_state(RouterState::Stopped, "start")?;
        self.set_state(RouterState::Starting);

        let result = self.load_config().and_then(|config| {
            self.transport.configure(&config)?;
            self.transport.start_remoting_service()?;
            Ok(config)
        });
        match result {
            Ok(config) => {
                self.config = Some(config);
                self.set_state(RouterState::Running);
                Ok(())
            }
            Err(e) => {
                log::error!("Router failed to start: {}", e);
                self.abandon();
                Err(e)
            }
        }
    }

    /// Stops accepting and relaying; connections and configuration are kept.
    pub fn pause(&mut self) -> Result<(), RouterError> {
        self.expect_state(RouterState::Running, "pause")?;
        self.set_state(RouterState::Pausing);
        self.transport.pause_remoting_service();
        self.set_state(RouterState::Paused);
        Ok(())
    }

    /// Resumes the transport with the configuration it already has.
    pub fn resume(&mut self) -> Result<(), RouterError> {
        self.expect_state(RouterState::Paused, "continue")?;
        self.set_state(RouterState::Continuing);
        match self.transport.resume_remoting_service() {
            Ok(()) => {
                self.set_state(RouterState::Running);
                Ok(())
            }
            Err(e) => {
                log::error!("Router failed to continue: {}", e);
                self.abandon();
                Err(e.into())
            }
        }
    }

    /// Stops from any state and fires the quit signal.
    pub fn stop(&mut self) {
        self.set_state(RouterState::Stopping);
        self.transport.stop_remoting_service();
        self.set_state(RouterState::Stopped);
        self.quit_sender.send_replace(true);
    }

    fn load_config(&self) -> Result<RouterConfig, RouterError> {
        let mut config = RouterConfig::load_or_default(self.config_path.as_deref())?;
        if let Some(address) = &self.listen_override {
            config.listen_address = address.clone();
            config.validate()?;
        }
        Ok(config)
    }

    fn abandon(&mut self) {
        self.transport.stop_remoting_service();
        self.set_state(RouterState::Stopped);
        self.quit_sender.send_replace(true);
    }

    fn expect_state(&self, expected: RouterState, action: &'static str) -> Result<(), RouterError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RouterError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    fn set_state(&mut self, state: RouterState) {
        if self.state != state {
            log::info!("Router {} -> {}", self.state, state);
        }
        self.state = state;
        self.control.report_state(state);
    }
}
