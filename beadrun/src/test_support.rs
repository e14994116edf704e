//! Test-only helpers: deterministic bead builders and scripted collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::types::{Bead, BeadId, BeadKind, BeadStatus, ExecutionResult};
use crate::io::executor::Executor;
use crate::io::operator::{FailureDecision, Operator, StepDecision};
use crate::report::Resolution;

/// Create a pending, non-testable bead with no dependencies.
pub fn bead(id: &str, priority: u32) -> Bead {
    Bead {
        id: id.to_string(),
        title: format!("{id} title"),
        kind: BeadKind::NonTestable,
        status: BeadStatus::Pending,
        depends_on: Default::default(),
        priority,
        payload: String::new(),
        parent_id: None,
        group: None,
        reason: None,
    }
}

pub fn bead_with_deps(id: &str, priority: u32, deps: &[&str]) -> Bead {
    Bead {
        depends_on: deps.iter().map(|dep| dep.to_string()).collect(),
        ..bead(id, priority)
    }
}

pub fn test_bead(id: &str, priority: u32) -> Bead {
    Bead {
        kind: BeadKind::Test,
        ..bead(id, priority)
    }
}

/// An impl bead; its test bead belongs in `deps`.
pub fn impl_bead(id: &str, priority: u32, deps: &[&str]) -> Bead {
    Bead {
        kind: BeadKind::Impl,
        ..bead_with_deps(id, priority, deps)
    }
}

pub fn with_status(mut bead: Bead, status: BeadStatus) -> Bead {
    bead.status = status;
    bead
}

pub fn in_group(mut bead: Bead, group: &str) -> Bead {
    bead.group = Some(group.to_string());
    bead
}

/// How a scripted unit of work behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Yield once, then succeed.
    Succeed,
    /// Yield once, then fail with the given detail.
    Fail(String),
    /// Sleep, then succeed.
    SucceedAfter(Duration),
    /// Sleep, then fail with the given detail.
    FailAfter(Duration, String),
    /// Never resolve.
    Hang,
}

type Hook = Box<dyn Fn(&Bead) + Send + Sync>;

/// Executor that resolves beads from per-bead scripts without spawning anything.
///
/// Beads without a queued script succeed. Records the order beads were
/// executed in and the highest number of units in flight at once.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<BeadId, VecDeque<Script>>>,
    calls: Mutex<Vec<BeadId>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    hook: Option<Hook>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `script` for the next execution of `id`.
    pub fn script(self, id: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(id.to_string())
            .or_default()
            .push_back(script);
        self
    }

    /// Run `hook` synchronously as each bead starts executing.
    pub fn on_execute(mut self, hook: impl Fn(&Bead) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<BeadId> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_script(&self, id: &str) -> Script {
        self.scripts
            .lock()
            .expect("scripts lock")
            .get_mut(id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Script::Succeed)
    }
}

impl Executor for ScriptedExecutor {
    async fn execute(&self, bead: Bead) -> ExecutionResult {
        self.calls.lock().expect("calls lock").push(bead.id.clone());
        if let Some(hook) = &self.hook {
            hook(&bead);
        }
        let script = self.next_script(&bead.id);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match script {
            Script::Succeed => {
                tokio::task::yield_now().await;
                ExecutionResult::success(format!("{} done", bead.id))
            }
            Script::Fail(detail) => {
                tokio::task::yield_now().await;
                ExecutionResult::failure(detail)
            }
            Script::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                ExecutionResult::success(format!("{} done", bead.id))
            }
            Script::FailAfter(delay, detail) => {
                tokio::time::sleep(delay).await;
                ExecutionResult::failure(detail)
            }
            Script::Hang => std::future::pending().await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Operator that replays queued decisions and stops once they run out.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    steps: VecDeque<StepDecision>,
    failures: VecDeque<FailureDecision>,
    /// Bead ids of every resolution the operator was shown.
    pub seen: Vec<BeadId>,
}

impl ScriptedOperator {
    pub fn new(
        steps: impl IntoIterator<Item = StepDecision>,
        failures: impl IntoIterator<Item = FailureDecision>,
    ) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            failures: failures.into_iter().collect(),
            seen: Vec::new(),
        }
    }
}

impl Operator for ScriptedOperator {
    fn after_step(
        &mut self,
        resolution: &Resolution,
        _ready: &[Bead],
    ) -> anyhow::Result<StepDecision> {
        self.seen.push(resolution.bead_id.clone());
        Ok(self.steps.pop_front().unwrap_or(StepDecision::Stop))
    }

    fn on_failure(&mut self, resolution: &Resolution) -> anyhow::Result<FailureDecision> {
        self.seen.push(resolution.bead_id.clone());
        Ok(self.failures.pop_front().unwrap_or(FailureDecision::Stop))
    }
}
