use std::fmt;

/// Machine-readable error codes for operator and agent decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NodeNotFound,
    ChildrenRemain,
    ClosureViolation,
    EmptyPath,
    StoreFailure,
    LockContention,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NodeNotFound => "E2001",
            Self::ChildrenRemain => "E2002",
            Self::ClosureViolation => "E2003",
            Self::EmptyPath => "E2004",
            Self::StoreFailure => "E5001",
            Self::LockContention => "E5002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NodeNotFound => "Node not found",
            Self::ChildrenRemain => "Node still has children",
            Self::ClosureViolation => "Closure index violation",
            Self::EmptyPath => "Empty path with no scope",
            Self::StoreFailure => "Store read/write failed",
            Self::LockContention => "Lock contention",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NodeNotFound => Some("The node may have been deleted by a concurrent worker."),
            Self::ChildrenRemain => {
                Some("Delete the descendants first, or use delete_subtree for a cascade.")
            }
            Self::ClosureViolation => {
                Some("The transaction was rolled back. Check for writers bypassing the lock protocol.")
            }
            Self::EmptyPath => Some("Pass at least one path segment or a starting scope."),
            Self::StoreFailure => Some("Check disk space, permissions, and SQLite busy timeouts."),
            Self::LockContention => Some("Retry after the competing worker releases its lock."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NodeNotFound,
            ErrorCode::ChildrenRemain,
            ErrorCode::ClosureViolation,
            ErrorCode::EmptyPath,
            ErrorCode::StoreFailure,
            ErrorCode::LockContention,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::ChildrenRemain.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }
}
