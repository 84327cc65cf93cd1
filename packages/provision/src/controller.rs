use core::fmt;

use embedded_hal_async::delay::DelayNs;
use log::{info, warn};

use crate::{
    credentials::{CredentialRecord, CredentialStore},
    portal::ConfigService,
    store::{ByteStore, StoreError},
};

pub const CONNECT_ATTEMPTS_DEFAULT: u8 = 15;
pub const CONNECT_INTERVAL_MS_DEFAULT: u32 = 1_000;
pub const SAVE_RESTART_DELAY_MS_DEFAULT: u32 = 2_000;
pub const UNLOCK_RESTART_DELAY_MS: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub connect_attempts: u8,
    pub connect_interval_ms: u32,
    pub save_restart_delay_ms: u32,
    /// `None` keeps the configuration service up until a save arrives.
    pub portal_timeout_ms: Option<u32>,
}

impl ProvisioningConfig {
    pub const fn defaults() -> Self {
        Self {
            connect_attempts: CONNECT_ATTEMPTS_DEFAULT,
            connect_interval_ms: CONNECT_INTERVAL_MS_DEFAULT,
            save_restart_delay_ms: SAVE_RESTART_DELAY_MS_DEFAULT,
            portal_timeout_ms: None,
        }
    }

    pub const fn sanitized(self) -> Self {
        let connect_attempts = if self.connect_attempts == 0 {
            1
        } else {
            self.connect_attempts
        };
        let portal_timeout_ms = match self.portal_timeout_ms {
            Some(0) => None,
            other => other,
        };
        Self {
            connect_attempts,
            connect_interval_ms: self.connect_interval_ms,
            save_restart_delay_ms: self.save_restart_delay_ms,
            portal_timeout_ms,
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Station side of the network stack.
#[allow(async_fn_in_trait)]
pub trait NetworkLink {
    type Error: fmt::Debug;

    /// Starts joining `ssid`; completion is observed through `is_connected`.
    async fn begin(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error>;

    fn is_connected(&mut self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { attempts: u8 },
    Unreachable { attempts: u8 },
}

/// Joins the stored network, polling status up to `connect_attempts` times.
pub async fn connect<L, D>(
    link: &mut L,
    delay: &mut D,
    record: &CredentialRecord,
    config: &ProvisioningConfig,
) -> ConnectOutcome
where
    L: NetworkLink,
    D: DelayNs,
{
    let ssid = record.ssid.as_str().unwrap_or("");
    let password = record.password.as_str().unwrap_or("");
    info!("provision: connecting ssid={:?}", ssid);

    if let Err(err) = link.begin(ssid, password).await {
        warn!("provision: connect start err={:?}", err);
    }

    let mut attempts = 0u8;
    while attempts < config.connect_attempts {
        if link.is_connected() {
            info!("provision: connected attempts={}", attempts);
            return ConnectOutcome::Connected { attempts };
        }
        delay.delay_ms(config.connect_interval_ms).await;
        attempts += 1;
    }

    if link.is_connected() {
        info!("provision: connected attempts={}", attempts);
        return ConnectOutcome::Connected { attempts };
    }
    warn!("provision: connect failed attempts={}", attempts);
    ConnectOutcome::Unreachable { attempts }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisioningError {
    Store(StoreError),
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "credential store: {err}"),
        }
    }
}

impl From<StoreError> for ProvisioningError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

pub enum Provisioning {
    Online(CredentialRecord),
    /// No connection: the caller must serve this until it asks for a restart.
    Portal(ConfigService),
}

/// Load, connect, and fall back to the configuration service. Runs once per boot.
pub struct ProvisioningController {
    config: ProvisioningConfig,
}

impl ProvisioningController {
    pub fn new(config: ProvisioningConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    pub async fn run<S, L, D>(
        &self,
        store: &mut S,
        link: &mut L,
        delay: &mut D,
    ) -> Result<Provisioning, ProvisioningError>
    where
        S: ByteStore,
        L: NetworkLink,
        D: DelayNs,
    {
        let record = CredentialStore::new(store).load()?;
        match connect(link, delay, &record, &self.config).await {
            ConnectOutcome::Connected { .. } => Ok(Provisioning::Online(record)),
            ConnectOutcome::Unreachable { .. } => {
                info!("provision: starting configuration service");
                Ok(Provisioning::Portal(ConfigService::new(
                    record,
                    self.config.save_restart_delay_ms,
                )))
            }
        }
    }
}
