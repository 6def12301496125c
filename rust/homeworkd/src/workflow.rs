//! Role-gated status rules for tasks and homework.
//!
//! Every status write in the daemon goes through one of the functions here
//! first. They are pure: callers pass the current facts about a record and
//! get back either the change to persist or a [`WorkflowError`].

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Parent,
}

impl Role {
    /// Stored roles are free text. `admin` is the historical name of the
    /// parent role; anything unrecognised is treated as a student.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("parent") | Some("admin") => Role::Parent,
            _ => Role::Student,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "parent" | "admin" => Some(Role::Parent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Parent => "parent",
        }
    }

    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Parent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Forbidden(String),
    #[error("cannot {action} from status {from}")]
    InvalidTransition { from: &'static str, action: &'static str },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Locked(String),
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::Forbidden(_) => "forbidden",
            WorkflowError::InvalidTransition { .. } => "invalid_transition",
            WorkflowError::Validation(_) => "validation_failed",
            WorkflowError::Locked(_) => "locked",
        }
    }
}

fn forbidden(msg: &str) -> WorkflowError {
    WorkflowError::Forbidden(msg.to_string())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    AwaitingApproval,
    Approved,
}

impl TaskStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "completed" => Some(TaskStatus::Completed),
            "awaiting_approval" => Some(TaskStatus::AwaitingApproval),
            "approved" => Some(TaskStatus::Approved),
            _ => None,
        }
    }

    /// Lenient read used for stored and imported rows.
    pub fn normalize(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or(TaskStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::Approved => "approved",
        }
    }

    /// The stored `completed` flag is always derived from the status.
    pub fn is_done(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Approved)
    }
}

/// What the rules need to know about a task and who is acting on it.
#[derive(Debug, Clone, Copy)]
pub struct TaskFacts {
    pub status: TaskStatus,
    pub required: bool,
    pub owned_by_actor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl TaskTransition {
    pub fn completed(&self) -> bool {
        self.to.is_done()
    }

    /// Approval timestamp must be set exactly when the new status is approved.
    pub fn sets_approval(&self) -> bool {
        self.to == TaskStatus::Approved
    }
}

/// The checkbox action on a task.
pub fn toggle_task(role: Role, facts: TaskFacts) -> Result<TaskTransition, WorkflowError> {
    if !role.is_privileged() && !facts.owned_by_actor {
        return Err(forbidden("students can only change their own tasks"));
    }
    let to = match (facts.status, role) {
        (TaskStatus::Pending, Role::Parent) => TaskStatus::Completed,
        (TaskStatus::Pending, Role::Student) if facts.required => TaskStatus::AwaitingApproval,
        (TaskStatus::Pending, Role::Student) => TaskStatus::Completed,
        // Re-toggling a task that waits for approval withdraws it; approval
        // itself goes through approve_task.
        (TaskStatus::AwaitingApproval, _) => TaskStatus::Pending,
        (TaskStatus::Completed | TaskStatus::Approved, Role::Parent) => TaskStatus::Pending,
        (TaskStatus::Completed | TaskStatus::Approved, Role::Student) => {
            return Err(forbidden("only a parent can reopen a finished task"));
        }
    };
    Ok(TaskTransition {
        from: facts.status,
        to,
    })
}

/// Parent approval. Returns `None` when the task is already approved.
pub fn approve_task(role: Role, status: TaskStatus) -> Result<Option<TaskTransition>, WorkflowError> {
    if !role.is_privileged() {
        return Err(forbidden("only a parent can approve tasks"));
    }
    if status == TaskStatus::Approved {
        return Ok(None);
    }
    Ok(Some(TaskTransition {
        from: status,
        to: TaskStatus::Approved,
    }))
}

/// Edits and deletes share one rule: required tasks belong to parents,
/// ordinary tasks to their owner.
pub fn ensure_task_mutable(role: Role, required: bool, owned_by_actor: bool) -> Result<(), WorkflowError> {
    if role.is_privileged() {
        return Ok(());
    }
    if required {
        return Err(forbidden("required tasks can only be changed by a parent"));
    }
    if !owned_by_actor {
        return Err(forbidden("students can only change their own tasks"));
    }
    Ok(())
}

pub fn ensure_can_create_required(role: Role) -> Result<(), WorkflowError> {
    if role.is_privileged() {
        Ok(())
    } else {
        Err(forbidden("only a parent can assign required tasks"))
    }
}

// ---------------------------------------------------------------------------
// Homework
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeworkStatus {
    Pending,
    Submitted,
    Approved,
    ChangesRequested,
}

impl HomeworkStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(HomeworkStatus::Pending),
            "submitted" => Some(HomeworkStatus::Submitted),
            "approved" => Some(HomeworkStatus::Approved),
            "changes_requested" => Some(HomeworkStatus::ChangesRequested),
            _ => None,
        }
    }

    pub fn normalize(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or(HomeworkStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HomeworkStatus::Pending => "pending",
            HomeworkStatus::Submitted => "submitted",
            HomeworkStatus::Approved => "approved",
            HomeworkStatus::ChangesRequested => "changes_requested",
        }
    }

    pub fn is_done(self) -> bool {
        self == HomeworkStatus::Approved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    Set,
    Clear,
    Keep,
}

impl Stamp {
    pub fn apply(self, current: Option<String>, now: &str) -> Option<String> {
        match self {
            Stamp::Set => Some(now.to_string()),
            Stamp::Clear => None,
            Stamp::Keep => current,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentChange {
    Keep,
    Set(String),
    Clear,
}

/// A validated homework status change, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeworkChange {
    pub from: HomeworkStatus,
    pub to: HomeworkStatus,
    pub completed: bool,
    pub submitted_at: Stamp,
    pub approved_at: Stamp,
    pub comment: CommentChange,
}

#[derive(Debug, Clone, Copy)]
pub struct HomeworkFacts {
    pub status: HomeworkStatus,
    pub owned_by_actor: bool,
    pub photo_count: usize,
}

fn invalid(from: HomeworkStatus, action: &'static str) -> WorkflowError {
    WorkflowError::InvalidTransition {
        from: from.as_str(),
        action,
    }
}

pub fn submit_homework(role: Role, facts: HomeworkFacts) -> Result<HomeworkChange, WorkflowError> {
    if !role.is_privileged() && !facts.owned_by_actor {
        return Err(forbidden("students can only submit their own homework"));
    }
    match facts.status {
        HomeworkStatus::Pending | HomeworkStatus::ChangesRequested => {}
        other => return Err(invalid(other, "submit")),
    }
    if facts.photo_count == 0 {
        return Err(WorkflowError::Validation(
            "attach at least one photo before submitting".to_string(),
        ));
    }
    Ok(HomeworkChange {
        from: facts.status,
        to: HomeworkStatus::Submitted,
        completed: false,
        submitted_at: Stamp::Set,
        approved_at: Stamp::Clear,
        comment: CommentChange::Keep,
    })
}

pub fn approve_homework(role: Role, status: HomeworkStatus) -> Result<HomeworkChange, WorkflowError> {
    if !role.is_privileged() {
        return Err(forbidden("only a parent can approve homework"));
    }
    if status != HomeworkStatus::Submitted {
        return Err(invalid(status, "approve"));
    }
    Ok(HomeworkChange {
        from: status,
        to: HomeworkStatus::Approved,
        completed: true,
        submitted_at: Stamp::Keep,
        approved_at: Stamp::Set,
        comment: CommentChange::Clear,
    })
}

pub fn request_changes(
    role: Role,
    status: HomeworkStatus,
    comment: &str,
) -> Result<HomeworkChange, WorkflowError> {
    if !role.is_privileged() {
        return Err(forbidden("only a parent can request changes"));
    }
    if status != HomeworkStatus::Submitted {
        return Err(invalid(status, "request changes"));
    }
    let comment = comment.trim();
    if comment.is_empty() {
        return Err(WorkflowError::Validation(
            "a comment is required when requesting changes".to_string(),
        ));
    }
    Ok(HomeworkChange {
        from: status,
        to: HomeworkStatus::ChangesRequested,
        completed: false,
        submitted_at: Stamp::Keep,
        approved_at: Stamp::Clear,
        comment: CommentChange::Set(comment.to_string()),
    })
}

pub fn unapprove_homework(role: Role, status: HomeworkStatus) -> Result<HomeworkChange, WorkflowError> {
    if !role.is_privileged() {
        return Err(forbidden("only a parent can unapprove homework"));
    }
    if status != HomeworkStatus::Approved {
        return Err(invalid(status, "unapprove"));
    }
    Ok(HomeworkChange {
        from: status,
        to: HomeworkStatus::Pending,
        completed: false,
        submitted_at: Stamp::Clear,
        approved_at: Stamp::Clear,
        comment: CommentChange::Keep,
    })
}

/// Approved homework is view-only for students.
pub fn homework_locked(role: Role, status: HomeworkStatus) -> bool {
    !role.is_privileged() && status == HomeworkStatus::Approved
}

/// Guard for field edits, photo changes and deletes.
pub fn ensure_homework_editable(
    role: Role,
    status: HomeworkStatus,
    owned_by_actor: bool,
) -> Result<(), WorkflowError> {
    if role.is_privileged() {
        return Ok(());
    }
    if !owned_by_actor {
        return Err(forbidden("students can only change their own homework"));
    }
    if homework_locked(role, status) {
        return Err(WorkflowError::Locked(
            "approved homework is view-only".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Records arriving from caches and imports
// ---------------------------------------------------------------------------

/// Status a task may be stored with when it is created from outside data.
/// Students cannot bring in approvals.
pub fn admit_task_status(role: Role, status: TaskStatus) -> TaskStatus {
    match (role, status) {
        (Role::Student, TaskStatus::Approved) => TaskStatus::Completed,
        (_, s) => s,
    }
}

/// Imported homework must satisfy the same rules as live transitions:
/// submissions need a photo, requested changes need a comment, and only
/// parents can bring in approvals.
pub fn admit_homework_status(role: Role, status: HomeworkStatus, photo_count: usize) -> HomeworkStatus {
    match status {
        HomeworkStatus::Approved if role.is_privileged() => HomeworkStatus::Approved,
        HomeworkStatus::Approved | HomeworkStatus::Submitted if photo_count > 0 => {
            HomeworkStatus::Submitted
        }
        _ => HomeworkStatus::Pending,
    }
}
