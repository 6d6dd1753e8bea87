//! Bounded polling for submit-and-poll vendors.
//!
//! A job moves `Pending -> Running -> {Succeeded, Failed, TimedOut}`. Each
//! status query counts as one attempt; between non-terminal attempts the
//! poller sleeps a fixed interval on the injected [`Clock`]. There is no
//! backoff and no retry past `max_attempts`, so a job never takes longer than
//! `max_attempts * interval` of sleeping.

use std::time::Duration;

use plume_contracts::GatewayError;
use serde_json::{Map, Value};
use tracing::debug;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Vendor status values that end a job. Anything else counts as in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMarkers {
    pub success: Vec<String>,
    pub failure: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Success,
    Failure,
    InProgress,
}

impl StatusMarkers {
    pub fn new(success: &[&str], failure: &[&str]) -> Self {
        Self {
            success: success.iter().map(|value| (*value).to_string()).collect(),
            failure: failure.iter().map(|value| (*value).to_string()).collect(),
        }
    }

    fn classify(&self, raw: &str) -> Observed {
        let status = raw.trim();
        if self
            .success
            .iter()
            .any(|marker| marker.eq_ignore_ascii_case(status))
        {
            return Observed::Success;
        }
        if self
            .failure
            .iter()
            .any(|marker| marker.eq_ignore_ascii_case(status))
        {
            return Observed::Failure;
        }
        Observed::InProgress
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub markers: StatusMarkers,
}

/// What an async adapter hands back after a successful submission.
/// `metadata` carries request details the final result should report.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job_id: String,
    pub model: String,
    pub policy: PollPolicy,
    pub metadata: Map<String, Value>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, model: impl Into<String>, policy: PollPolicy) -> Self {
        Self {
            job_id: job_id.into(),
            model: model.into(),
            policy,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// One status query result, as reported by the vendor.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub status: String,
    pub payload: Value,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorJob {
    pub job_id: String,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl VendorJob {
    pub fn new(handle: &JobHandle) -> Self {
        Self {
            job_id: handle.job_id.clone(),
            status: JobStatus::Pending,
            attempt: 0,
            max_attempts: handle.policy.max_attempts.max(1),
            poll_interval: handle.policy.interval,
        }
    }

    /// Records one status query and returns the resulting state.
    pub fn observe(&mut self, vendor_status: &str, markers: &StatusMarkers) -> JobStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        self.attempt += 1;
        self.status = match markers.classify(vendor_status) {
            Observed::Success => JobStatus::Succeeded,
            Observed::Failure => JobStatus::Failed,
            Observed::InProgress if self.attempt >= self.max_attempts => JobStatus::TimedOut,
            Observed::InProgress => JobStatus::Running,
        };
        self.status
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded(Value),
    Failed(String),
    TimedOut { attempts: u32 },
}

pub struct JobPoller<'a> {
    clock: &'a dyn Clock,
}

impl<'a> JobPoller<'a> {
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self { clock }
    }

    /// Drives `handle` to a terminal state. Query errors end polling at once.
    pub fn run<F>(&self, handle: &JobHandle, mut query: F) -> Result<PollOutcome, GatewayError>
    where
        F: FnMut(&VendorJob) -> Result<JobSnapshot, GatewayError>,
    {
        let mut job = VendorJob::new(handle);
        loop {
            let snapshot = query(&job)?;
            let status = job.observe(&snapshot.status, &handle.policy.markers);
            debug!(
                target: "plume::poller",
                job_id = %job.job_id,
                attempt = job.attempt,
                vendor_status = %snapshot.status,
                ?status,
                "polled job"
            );
            match status {
                JobStatus::Succeeded => return Ok(PollOutcome::Succeeded(snapshot.payload)),
                JobStatus::Failed => {
                    let message = snapshot.message.unwrap_or_else(|| {
                        format!(
                            "job {} failed with status {}",
                            job.job_id, snapshot.status
                        )
                    });
                    return Ok(PollOutcome::Failed(message));
                }
                JobStatus::TimedOut => {
                    return Ok(PollOutcome::TimedOut {
                        attempts: job.attempt,
                    })
                }
                JobStatus::Pending | JobStatus::Running => self.clock.sleep(job.poll_interval),
            }
        }
    }
}
