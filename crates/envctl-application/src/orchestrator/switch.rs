//! Connection-switch state machine
//!
//! The switch workflow is conceptually a sequential async function (stop
//! everything, login, switch context, rebuild, restart), but it runs as an
//! explicit state machine driven by orchestrator inbox messages: each awaited
//! step completes by sending a [`PhaseOutcome`], so the workflow is
//! observable, serialized with every other transition, and cancellable.

use envctl_domain::context::EnvironmentTarget;
use envctl_domain::error::Result;
use envctl_domain::ports::LoginOutput;

/// Where an in-flight switch currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SwitchPhase {
    /// Tearing down the current graph in reverse topological order
    StoppingServices,
    /// Waiting for the MC login
    LoginMc,
    /// Waiting for the WC login
    LoginWc,
    /// Waiting for the kube context switch
    SwitchingContext,
}

/// One in-flight connection switch
pub(crate) struct SwitchFlow {
    pub target: EnvironmentTarget,
    pub phase: SwitchPhase,
}

impl SwitchFlow {
    pub(crate) fn new(target: EnvironmentTarget) -> Self {
        Self {
            target,
            phase: SwitchPhase::StoppingServices,
        }
    }
}

/// Completion message of one switch step
pub(crate) enum PhaseOutcome {
    /// `stop_all` finished
    ServicesStopped,
    /// MC login finished
    LoginMcDone(Result<LoginOutput>),
    /// WC login finished
    LoginWcDone(Result<LoginOutput>),
    /// Kube context switch finished
    ContextSwitched(Result<()>),
}

impl PhaseOutcome {
    /// The phase this outcome belongs to; mismatched outcomes are ignored.
    pub(crate) fn phase(&self) -> SwitchPhase {
        match self {
            Self::ServicesStopped => SwitchPhase::StoppingServices,
            Self::LoginMcDone(_) => SwitchPhase::LoginMc,
            Self::LoginWcDone(_) => SwitchPhase::LoginWc,
            Self::ContextSwitched(_) => SwitchPhase::SwitchingContext,
        }
    }
}
