//! Authorization gate: execution continues only on a device whose fingerprint
//! matches the persisted record.

mod machine;

use core::fmt;

use heapless::Vec;
use log::{error, info, warn};
use statig::blocking::IntoStateMachineExt as _;

use crate::{
    command::{Command, CommandChannel, UNLOCK_TOKEN},
    identity::{generate, Fingerprint, HardwareIdentity, IdentityError, FINGERPRINT_MAX_LEN},
    layout::AUTH_RECORD,
    store::{ByteStore, StoreError},
    RestartReason,
};
use machine::{DispatchContext, GateMachine};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatePhase {
    Checking,
    Locked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateEvent {
    Compared { matched: bool },
    Command(Command),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateAction {
    None,
    Pass,
    AwaitCommand,
    PersistAndRestart,
    Restart,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    Authorized(Fingerprint),
    Restart(RestartReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateError {
    Identity(IdentityError),
    Store(StoreError),
    /// The command channel ended while the device was locked.
    CommandsClosed,
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(err) => write!(f, "device identity: {err}"),
            Self::Store(err) => write!(f, "authorization record: {err}"),
            Self::CommandsClosed => f.write_str("command channel closed while locked"),
        }
    }
}

impl From<IdentityError> for GateError {
    fn from(err: IdentityError) -> Self {
        Self::Identity(err)
    }
}

impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

pub struct AuthorizationGate {
    machine: statig::blocking::StateMachine<GateMachine>,
}

impl Default for AuthorizationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizationGate {
    pub fn new() -> Self {
        Self {
            machine: GateMachine::new().state_machine(),
        }
    }

    pub fn phase(&self) -> GatePhase {
        self.machine.inner().phase
    }

    pub fn apply(&mut self, event: GateEvent) -> GateAction {
        let mut context = DispatchContext::default();
        self.machine.handle_with_context(&event, &mut context);
        context.action
    }

    /// Checks the fingerprint and, on mismatch, blocks on `commands` until the
    /// operator either unlocks or forces a restart.
    ///
    /// Returns `Err` when the device identity or the record cannot be read, or when
    /// the command channel closes while locked.
    pub async fn run<I, S, C>(
        &mut self,
        identity: &I,
        store: &mut S,
        commands: &mut C,
    ) -> Result<GateOutcome, GateError>
    where
        I: HardwareIdentity + ?Sized,
        S: ByteStore,
        C: CommandChannel,
    {
        info!("gate: checking authorization");
        let fingerprint = generate(identity)?;
        info!("gate: fingerprint={}", fingerprint);

        let stored = read_record(store, fingerprint.len())?;
        info!(
            "gate: stored record={:?}",
            core::str::from_utf8(&stored).unwrap_or("<non-utf8>")
        );

        let matched = stored.as_slice() == fingerprint.as_bytes();
        match self.apply(GateEvent::Compared { matched }) {
            GateAction::Pass => {
                info!("gate: authorization successful");
                return Ok(GateOutcome::Authorized(fingerprint));
            }
            GateAction::AwaitCommand => {
                warn!(
                    "gate: authorization failed; locked, send '{}' to unlock",
                    UNLOCK_TOKEN
                );
            }
            action => {
                error!("gate: unexpected action {:?} while checking", action);
            }
        }

        loop {
            let command = match commands.next_command().await {
                Ok(command) => command,
                Err(err) if commands.is_closed() => {
                    error!("gate: command channel closed err={:?}", err);
                    return Err(GateError::CommandsClosed);
                }
                Err(err) => {
                    warn!("gate: command channel err={:?}", err);
                    continue;
                }
            };

            match self.apply(GateEvent::Command(command)) {
                GateAction::PersistAndRestart => match write_record(store, &fingerprint) {
                    Ok(()) => {
                        info!("gate: fingerprint recorded; restarting");
                        return Ok(GateOutcome::Restart(RestartReason::Unlocked));
                    }
                    Err(err) => {
                        error!("gate: unlock not persisted err={}; still locked", err);
                    }
                },
                GateAction::Restart => {
                    warn!("gate: invalid command; restarting");
                    return Ok(GateOutcome::Restart(RestartReason::UnlockRejected));
                }
                _ => {}
            }
        }
    }
}

/// Reads `len` bytes of the authorization record.
pub fn read_record<S: ByteStore>(
    store: &S,
    len: usize,
) -> Result<Vec<u8, FINGERPRINT_MAX_LEN>, StoreError> {
    let len = len.min(FINGERPRINT_MAX_LEN);
    let mut window = [0u8; FINGERPRINT_MAX_LEN];
    store.read_into(AUTH_RECORD.offset, &mut window[..len])?;
    let mut record = Vec::new();
    // `len` is clamped to the capacity above.
    let _ = record.extend_from_slice(&window[..len]);
    Ok(record)
}

/// Writes the fingerprint into the authorization record and commits.
pub fn write_record<S: ByteStore>(store: &mut S, fingerprint: &Fingerprint) -> Result<(), StoreError> {
    store.write_all(AUTH_RECORD.offset, fingerprint.as_bytes())?;
    store.commit()
}
