//! Job lifecycle as an explicit transition table.

use crate::bpmn::lifecycle::LifecycleError;
use crate::record::{JobIntent, JobRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Activatable,
    Activated,
    Failed,
    ErrorThrown,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Activatable => "ACTIVATABLE",
            JobState::Activated => "ACTIVATED",
            JobState::Failed => "FAILED",
            JobState::ErrorThrown => "ERROR_THROWN",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of applying a job event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    To(JobState),
    Removed,
}

/// `from == None` means the job does not exist yet. `record` is the event
/// payload; a failure with retries left and no backoff is immediately
/// activatable again.
pub fn next_job_state(
    from: Option<JobState>,
    intent: JobIntent,
    record: &JobRecord,
) -> Result<JobTransition, LifecycleError> {
    use JobState::*;
    use JobTransition::*;

    let next = match (from, intent) {
        (None, JobIntent::Created) => Some(To(Activatable)),
        (Some(Activatable | Activated), JobIntent::Completed) => Some(Removed),
        (Some(Activatable | Activated), JobIntent::Failed) => {
            if record.retries > 0 && record.retry_backoff <= 0 {
                Some(To(Activatable))
            } else {
                Some(To(Failed))
            }
        }
        (Some(Activated), JobIntent::TimedOut) => Some(To(Activatable)),
        (Some(Failed), JobIntent::RecurredAfterBackoff) => Some(To(Activatable)),
        (Some(Activatable | Activated), JobIntent::ErrorThrown) => Some(To(ErrorThrown)),
        (Some(_), JobIntent::Canceled) => Some(Removed),
        (Some(state), JobIntent::RetriesUpdated | JobIntent::Migrated) => Some(To(state)),
        (Some(Activated), JobIntent::TimeoutUpdated) => Some(To(Activated)),
        _ => None,
    };

    next.ok_or_else(|| LifecycleError {
        from: from.map(|s| s.as_str()).unwrap_or("NONE").to_string(),
        to: intent.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(retries: i32, backoff: i64) -> JobRecord {
        JobRecord {
            retries,
            retry_backoff: backoff,
            ..Default::default()
        }
    }

    #[test]
    fn fail_with_retries_is_activatable_again() {
        let next = next_job_state(Some(JobState::Activated), JobIntent::Failed, &job(2, 0)).unwrap();
        assert_eq!(next, JobTransition::To(JobState::Activatable));
    }

    #[test]
    fn fail_with_backoff_waits() {
        let next = next_job_state(Some(JobState::Activated), JobIntent::Failed, &job(2, 1000)).unwrap();
        assert_eq!(next, JobTransition::To(JobState::Failed));
    }

    #[test]
    fn fail_without_retries_waits_for_incident() {
        let next = next_job_state(Some(JobState::Activated), JobIntent::Failed, &job(0, 0)).unwrap();
        assert_eq!(next, JobTransition::To(JobState::Failed));
    }

    #[test]
    fn only_activated_jobs_time_out() {
        assert!(next_job_state(Some(JobState::Activatable), JobIntent::TimedOut, &job(1, 0)).is_err());
        assert!(next_job_state(None, JobIntent::Completed, &job(1, 0)).is_err());
    }
}
