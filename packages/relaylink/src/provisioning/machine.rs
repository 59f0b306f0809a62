use statig::prelude::*;

use super::ProvisioningState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ProvisioningEvent {
    PortalOpened,
    PortalClosed,
    CredentialsSubmitted,
    JoinSucceeded,
    JoinFailed,
    StoredJoinSucceeded,
    LinkDropped,
    LinkRestored,
    FactoryReset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum DispatchStatus {
    Applied,
    Ignored,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct DispatchContext {
    pub(super) status: DispatchStatus,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self {
            status: DispatchStatus::Ignored,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(super) struct ProvisioningMachine {
    pub(super) state: ProvisioningState,
}

impl ProvisioningMachine {
    pub(super) fn new() -> Self {
        Self {
            state: ProvisioningState::Unconfigured,
        }
    }

    fn enter(&mut self, context: &mut DispatchContext, next: ProvisioningState) {
        self.state = next;
        context.status = DispatchStatus::Applied;
    }
}

#[state_machine(initial = "State::unconfigured()")]
impl ProvisioningMachine {
    #[state(superstate = "any")]
    fn unconfigured(
        &mut self,
        context: &mut DispatchContext,
        event: &ProvisioningEvent,
    ) -> Outcome<State> {
        match event {
            ProvisioningEvent::PortalOpened => {
                self.enter(context, ProvisioningState::PortalActive);
                Transition(State::portal_active())
            }
            ProvisioningEvent::StoredJoinSucceeded => {
                self.enter(context, ProvisioningState::Connected);
                Transition(State::connected())
            }
            _ => Super,
        }
    }

    #[state(superstate = "any")]
    fn portal_active(
        &mut self,
        context: &mut DispatchContext,
        event: &ProvisioningEvent,
    ) -> Outcome<State> {
        match event {
            ProvisioningEvent::CredentialsSubmitted => {
                self.enter(context, ProvisioningState::Connecting);
                Transition(State::connecting())
            }
            ProvisioningEvent::StoredJoinSucceeded => {
                self.enter(context, ProvisioningState::Connected);
                Transition(State::connected())
            }
            ProvisioningEvent::PortalClosed => {
                self.enter(context, ProvisioningState::ConnectionLost);
                Transition(State::connection_lost())
            }
            _ => Super,
        }
    }

    #[state(superstate = "any")]
    fn connecting(
        &mut self,
        context: &mut DispatchContext,
        event: &ProvisioningEvent,
    ) -> Outcome<State> {
        match event {
            ProvisioningEvent::JoinSucceeded => {
                self.enter(context, ProvisioningState::Connected);
                Transition(State::connected())
            }
            ProvisioningEvent::JoinFailed => {
                self.enter(context, ProvisioningState::PortalActive);
                Transition(State::portal_active())
            }
            _ => Super,
        }
    }

    #[state(superstate = "any")]
    fn connected(
        &mut self,
        context: &mut DispatchContext,
        event: &ProvisioningEvent,
    ) -> Outcome<State> {
        match event {
            ProvisioningEvent::LinkDropped => {
                self.enter(context, ProvisioningState::ConnectionLost);
                Transition(State::connection_lost())
            }
            ProvisioningEvent::PortalOpened => {
                self.enter(context, ProvisioningState::PortalActive);
                Transition(State::portal_active())
            }
            _ => Super,
        }
    }

    #[state(superstate = "any")]
    fn connection_lost(
        &mut self,
        context: &mut DispatchContext,
        event: &ProvisioningEvent,
    ) -> Outcome<State> {
        match event {
            ProvisioningEvent::StoredJoinSucceeded | ProvisioningEvent::LinkRestored => {
                self.enter(context, ProvisioningState::Connected);
                Transition(State::connected())
            }
            ProvisioningEvent::PortalOpened => {
                self.enter(context, ProvisioningState::PortalActive);
                Transition(State::portal_active())
            }
            _ => Super,
        }
    }

    /// Factory reset wins from every state; anything else unmatched is dropped.
    #[superstate]
    fn any(&mut self, context: &mut DispatchContext, event: &ProvisioningEvent) -> Outcome<State> {
        match event {
            ProvisioningEvent::FactoryReset => {
                self.enter(context, ProvisioningState::Unconfigured);
                Transition(State::unconfigured())
            }
            _ => {
                context.status = DispatchStatus::Ignored;
                Handled
            }
        }
    }
}
