#![forbid(unsafe_code)]

pub mod peer_spec;

pub mod model {
    /// Error text recorded on every job the operator (or the fail-closed gate) turns down.
    pub const REJECTED_BY_OPERATOR: &str = "Rejected by operator";

    /// Error text recorded on a job found `running` with no process left to finish it.
    pub const INTERRUPTED_BEFORE_COMPLETION: &str = "Interrupted before completion";

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum JobStatus {
        Pending,
        Running,
        Completed,
        Failed,
        Rejected,
    }

    impl JobStatus {
        pub const ALL: [JobStatus; 5] = [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Rejected,
        ];

        pub fn as_str(self) -> &'static str {
            match self {
                JobStatus::Pending => "pending",
                JobStatus::Running => "running",
                JobStatus::Completed => "completed",
                JobStatus::Failed => "failed",
                JobStatus::Rejected => "rejected",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value.trim() {
                "pending" => Some(JobStatus::Pending),
                "running" => Some(JobStatus::Running),
                "completed" => Some(JobStatus::Completed),
                "failed" => Some(JobStatus::Failed),
                "rejected" => Some(JobStatus::Rejected),
                _ => None,
            }
        }

        pub fn is_terminal(self) -> bool {
            matches!(
                self,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Rejected
            )
        }

        /// Legal edges: pending -> running -> {completed, failed}, pending -> rejected.
        pub fn can_transition_to(self, next: JobStatus) -> bool {
            matches!(
                (self, next),
                (JobStatus::Pending, JobStatus::Running)
                    | (JobStatus::Pending, JobStatus::Rejected)
                    | (JobStatus::Running, JobStatus::Completed)
                    | (JobStatus::Running, JobStatus::Failed)
            )
        }
    }

    impl std::fmt::Display for JobStatus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

}
