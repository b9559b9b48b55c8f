use serde::Serialize;

/// Coarse lifecycle of the supervised modem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    PoweringOn,
    AwaitingBoot,
    Ready,
    Restarting,
    ShuttingDown,
    Dumping,
}

/// Tracks lifecycle transitions.
///
/// Side-effect-free: the supervisor drives the hardware and reports what it
/// did. Every notification moves the state; the return value says whether
/// the move came from a state where it was expected.
#[derive(Debug)]
pub struct LifecycleController {
    state: LifecycleState,
    restarts: u32,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            restarts: 0,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Number of restarts triggered since attach.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn on_power_on_requested(&mut self) -> bool {
        // a manual power-on may arrive in any state
        self.enter(LifecycleState::PoweringOn, true)
    }

    pub fn on_powered_on(&mut self) -> bool {
        let expected = self.state == LifecycleState::PoweringOn;
        self.enter(LifecycleState::AwaitingBoot, expected)
    }

    pub fn on_boot_reported(&mut self) -> bool {
        let expected = matches!(
            self.state,
            LifecycleState::AwaitingBoot | LifecycleState::PoweringOn | LifecycleState::Ready
        );
        self.enter(LifecycleState::Ready, expected)
    }

    pub fn on_fault_confirmed(&mut self) -> bool {
        let expected = self.state == LifecycleState::Ready;
        self.restarts = self.restarts.saturating_add(1);
        self.enter(LifecycleState::Restarting, expected)
    }

    pub fn on_shutdown(&mut self) -> bool {
        let expected = self.state != LifecycleState::Uninitialized;
        self.enter(LifecycleState::ShuttingDown, expected)
    }

    pub fn on_dump_started(&mut self) -> bool {
        let expected = self.state == LifecycleState::ShuttingDown;
        self.enter(LifecycleState::Dumping, expected)
    }

    pub fn on_detached(&mut self) -> bool {
        self.enter(LifecycleState::Uninitialized, true)
    }

    fn enter(&mut self, next: LifecycleState, expected: bool) -> bool {
        self.state = next;
        expected
    }
}
