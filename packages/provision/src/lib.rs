//! Device-identity gate and Wi-Fi provisioning core.
//!
//! Everything here is chip independent: hardware sits behind [`store::ByteStore`],
//! [`identity::HardwareIdentity`], [`command::CommandChannel`] and
//! [`controller::NetworkLink`]. The firmware crate supplies those and performs the
//! restarts this crate asks for.

#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod controller;
pub mod credentials;
pub mod gate;
pub mod identity;
pub mod layout;
pub mod portal;
pub mod store;

pub use command::{Command, CommandChannel, SerialCommands, SerialError, UNLOCK_TOKEN};
pub use controller::{
    NetworkLink, Provisioning, ProvisioningConfig, ProvisioningController, ProvisioningError,
};
pub use credentials::{CredentialRecord, CredentialStore};
pub use gate::{AuthorizationGate, GateError, GateOutcome};
pub use identity::{generate, Fingerprint, HardwareIdentity, IdentityError};
pub use portal::{AccessPointCredentials, ConfigService};
pub use store::{ByteStore, EepromStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartReason {
    /// Fingerprint persisted after the unlock token.
    Unlocked,
    /// Locked device received anything but the unlock token.
    UnlockRejected,
    CredentialsSaved,
    /// The configuration service ran past its configured timeout.
    PortalTimeout,
}

impl RestartReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::UnlockRejected => "unlock rejected",
            Self::CredentialsSaved => "credentials saved",
            Self::PortalTimeout => "portal timeout",
        }
    }

    /// Pause between deciding to restart and doing it, so log lines and replies
    /// leave the device.
    pub fn delay_ms(self, config: &ProvisioningConfig) -> u32 {
        match self {
            Self::Unlocked | Self::UnlockRejected => controller::UNLOCK_RESTART_DELAY_MS,
            Self::CredentialsSaved => config.save_restart_delay_ms,
            Self::PortalTimeout => 0,
        }
    }
}
