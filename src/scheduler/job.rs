use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code of a job that has not reached a terminal state.
pub const NOT_FINISHED: i32 = -257;
/// Exit code of a job whose process could not be created.
pub const SPAWN_FAILED: i32 = -258;
/// Exit code of a job whose process was lost: waiting on it failed, or the
/// submission driving it was dropped before it finished.
pub const LOST: i32 = -259;

/// Program plus arguments. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandSpec(Vec<String>);

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(argv.into_iter().map(Into::into).collect())
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }

    pub fn program(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Finished => write!(f, "finished"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Full record of one submitted command.
///
/// `id` is a negative placeholder while the job waits for a slot and the
/// OS process id once it is running. Spawn failures keep a negative id
/// since they never get a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub id: i64,
    pub command: CommandSpec,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Placeholder id this job held while queued, if it ever was
    pub queued_id: Option<i64>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobResult {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            id: -1,
            command,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: NOT_FINISHED,
            queued_id: None,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn queued(command: CommandSpec, placeholder: i64) -> Self {
        debug_assert!(placeholder < 0, "placeholder ids are negative");
        Self {
            id: placeholder,
            queued_id: Some(placeholder),
            ..Self::new(command)
        }
    }

    pub fn state(&self) -> JobState {
        match self.exit_code {
            NOT_FINISHED if self.id < 0 => JobState::Queued,
            NOT_FINISHED => JobState::Running,
            SPAWN_FAILED | LOST => JobState::Failed,
            _ => JobState::Finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.exit_code != NOT_FINISHED
    }

    pub fn is_queued(&self) -> bool {
        self.state() == JobState::Queued
    }

    /// Move the record onto a live process.
    pub(crate) fn mark_started(&mut self, pid: i64) {
        debug_assert!(pid >= 0);
        self.id = pid;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_exited(&mut self, stdout: String, stderr: String, exit_code: i32) {
        self.stdout = stdout;
        self.stderr = stderr;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, exit_code: i32, error: String) {
        debug_assert!(exit_code == SPAWN_FAILED || exit_code == LOST);
        self.exit_code = exit_code;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }
}
