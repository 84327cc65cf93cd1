use statig::prelude::*;

use super::{GateAction, GateEvent, GatePhase};
use crate::command::Command;

#[derive(Clone, Copy, Debug)]
pub(super) struct GateMachine {
    pub(super) phase: GatePhase,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct DispatchContext {
    pub(super) action: GateAction,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self {
            action: GateAction::None,
        }
    }
}

impl GateMachine {
    pub(super) fn new() -> Self {
        Self {
            phase: GatePhase::Checking,
        }
    }
}

#[state_machine(initial = "State::checking()")]
impl GateMachine {
    #[state]
    fn checking(&mut self, context: &mut DispatchContext, event: &GateEvent) -> Outcome<State> {
        match event {
            GateEvent::Compared { matched: true } => {
                context.action = GateAction::Pass;
                Handled
            }
            GateEvent::Compared { matched: false } => {
                self.phase = GatePhase::Locked;
                context.action = GateAction::AwaitCommand;
                Transition(State::locked())
            }
            GateEvent::Command(_) => {
                context.action = GateAction::None;
                Handled
            }
        }
    }

    /// Terminal for the boot: only a restart leaves it.
    #[state]
    fn locked(&mut self, context: &mut DispatchContext, event: &GateEvent) -> Outcome<State> {
        context.action = match event {
            GateEvent::Command(Command::Unlock) => GateAction::PersistAndRestart,
            GateEvent::Command(Command::Other) => GateAction::Restart,
            GateEvent::Compared { .. } => GateAction::None,
        };
        Handled
    }
}
