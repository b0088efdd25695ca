use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used for summaries and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DependencyCycle,
    VersionConflict,
    ChecksumMismatch,
    FetchError,
    BuildStepFailed,
    DependencyFailed,
    BottleUnavailable,
    PostInstallFailed,
    Cancelled,
    ParseError,
    NotInstalled,
    HasDependents,
    Io,
    Other,
}

impl ErrorKind {
    /// Resolution errors abort the whole run before anything is built
    pub fn is_resolution(self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound | ErrorKind::DependencyCycle | ErrorKind::VersionConflict
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::DependencyCycle => "DependencyCycle",
            ErrorKind::VersionConflict => "VersionConflict",
            ErrorKind::ChecksumMismatch => "ChecksumMismatch",
            ErrorKind::FetchError => "FetchError",
            ErrorKind::BuildStepFailed => "BuildStepFailed",
            ErrorKind::DependencyFailed => "DependencyFailed",
            ErrorKind::BottleUnavailable => "BottleUnavailable",
            ErrorKind::PostInstallFailed => "PostInstallFailed",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::NotInstalled => "NotInstalled",
            ErrorKind::HasDependents => "HasDependents",
            ErrorKind::Io => "Io",
            ErrorKind::Other => "Other",
        };
        f.write_str(s)
    }
}

/// One side of a version conflict: who asked, and for what
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub by: String,
    pub wants: String,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wants {}", self.by, self.wants)
    }
}

#[derive(Error, Debug)]
pub enum KegError {
    #[error("Formula not found: {name}{}{}",
        .required_by.as_ref().map(|r| format!(" (required by {r})")).unwrap_or_default(),
        .suggestion.as_ref().map(|s| format!("; did you mean {s}?")).unwrap_or_default())]
    FormulaNotFound {
        name: String,
        required_by: Option<String>,
        suggestion: Option<String>,
    },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Version conflict for {formula}: {first} but {second}")]
    VersionConflict {
        formula: String,
        first: Requirement,
        second: Requirement,
    },

    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Build step {step} of {formula} failed ({command}): {reason}")]
    BuildStepFailed {
        formula: String,
        step: usize,
        command: String,
        reason: String,
    },

    #[error("{formula} skipped: dependency {dependency} failed")]
    DependencyFailed { formula: String, dependency: String },

    #[error("No usable bottle for {formula} on {tag} and source builds are disabled")]
    BottleUnavailable { formula: String, tag: String },

    #[error("Post-install of {formula} failed: {reason}")]
    PostInstallFailed { formula: String, reason: String },

    #[error("Install of {0} cancelled")]
    Cancelled(String),

    #[error("Failed to parse formula {formula}: {message}")]
    Parse { formula: String, message: String },

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("Refusing to uninstall {formula}: required by {}", .dependents.join(", "))]
    HasDependents {
        formula: String,
        dependents: Vec<String>,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl KegError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KegError::FormulaNotFound { .. } => ErrorKind::NotFound,
            KegError::DependencyCycle { .. } => ErrorKind::DependencyCycle,
            KegError::VersionConflict { .. } => ErrorKind::VersionConflict,
            KegError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            KegError::Fetch { .. } | KegError::Http(_) => ErrorKind::FetchError,
            KegError::BuildStepFailed { .. } => ErrorKind::BuildStepFailed,
            KegError::DependencyFailed { .. } => ErrorKind::DependencyFailed,
            KegError::BottleUnavailable { .. } => ErrorKind::BottleUnavailable,
            KegError::PostInstallFailed { .. } => ErrorKind::PostInstallFailed,
            KegError::Cancelled(_) => ErrorKind::Cancelled,
            KegError::Parse { .. } | KegError::Json(_) => ErrorKind::ParseError,
            KegError::NotInstalled(_) => ErrorKind::NotInstalled,
            KegError::HasDependents { .. } => ErrorKind::HasDependents,
            KegError::Io(_) => ErrorKind::Io,
            KegError::Other(_) => ErrorKind::Other,
        }
    }

    pub(crate) fn not_found(name: impl Into<String>) -> Self {
        KegError::FormulaNotFound {
            name: name.into(),
            required_by: None,
            suggestion: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, KegError>;
