/// Lifecycle state of a job.
///
/// `Starting → Running → Exited` is the normal path; `Starting → Failed`
/// covers spawn errors and `Running → Failed` covers isolation setup errors
/// reported by the helper. A command terminated by signal N is reported as
/// `Exited` with code `128 + N`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Starting,
    Running,
    Exited { code: i32 },
    Failed { reason: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Exited { .. } | JobState::Failed { .. })
    }
}

/// Point-in-time view of a job returned by status queries.
#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub state: JobState,
    pub pid: Option<i32>,
}

impl StatusSnapshot {
    pub fn done(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            JobState::Exited { code } => Some(code),
            _ => None,
        }
    }
}
