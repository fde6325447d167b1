//! Service request aggregate and its lifecycle vocabulary.

use crate::utils::TimeStamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum RequestStatus {
    #[n(0)]
    Requested,
    #[n(1)]
    Assigned,
    // part of the stored vocabulary, no transition reaches it
    #[n(2)]
    InProgress,
    #[n(3)]
    Completed,
    #[n(4)]
    Closed,
    #[n(5)]
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Closed | RequestStatus::Cancelled)
    }
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Requested => "requested",
            RequestStatus::Assigned => "assigned",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Closed => "closed",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

/// The aggregate root of the lifecycle. Never physically deleted by
/// normal operation; cancellation is a status, not a delete.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct ServiceRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub customer_id: String,
    #[n(2)]
    pub service_id: String,
    #[n(3)]
    pub professional_id: Option<String>,
    #[n(4)]
    pub request_date: TimeStamp,
    #[n(5)]
    pub scheduled_date: TimeStamp,
    #[n(6)]
    pub completion_date: Option<TimeStamp>,
    #[n(7)]
    pub status: RequestStatus,
    #[n(8)]
    pub remarks: String,
    #[n(9)]
    pub last_updated: TimeStamp,
}

impl ServiceRequest {
    pub fn open(
        id: String,
        customer_id: String,
        service_id: String,
        scheduled_date: TimeStamp,
        remarks: String,
        now: TimeStamp,
    ) -> Self {
        Self {
            id,
            customer_id,
            service_id,
            professional_id: None,
            request_date: now,
            scheduled_date,
            completion_date: None,
            status: RequestStatus::Requested,
            remarks,
            last_updated: now,
        }
    }

    /// Record-level invariants: the professional slot is filled exactly
    /// in {Assigned, Completed, Closed} (Closed keeps the last
    /// professional for review attribution), and the completion
    /// timestamp is set exactly in {Completed, Closed}.
    pub fn consistent(&self) -> bool {
        let slot_filled = matches!(
            self.status,
            RequestStatus::Assigned | RequestStatus::Completed | RequestStatus::Closed
        );
        let completed = matches!(
            self.status,
            RequestStatus::Completed | RequestStatus::Closed
        );

        self.professional_id.is_some() == slot_filled && self.completion_date.is_some() == completed
    }
}

/// One row per (request, professional) rejection event; append-only.
/// The composite key makes the uniqueness constraint a key-level fact.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Rejection {
    #[n(0)]
    pub service_request_id: String,
    #[n(1)]
    pub professional_id: String,
    #[n(2)]
    pub reason: Option<String>,
    #[n(3)]
    pub rejected_at: TimeStamp,
}

impl Rejection {
    pub fn new(
        service_request_id: &str,
        professional_id: &str,
        reason: Option<&str>,
        now: TimeStamp,
    ) -> Self {
        Self {
            service_request_id: service_request_id.to_string(),
            professional_id: professional_id.to_string(),
            reason: reason.map(str::to_string),
            rejected_at: now,
        }
    }

    pub fn key(&self) -> String {
        rejection_key(&self.service_request_id, &self.professional_id)
    }
}

pub fn rejection_key(service_request_id: &str, professional_id: &str) -> String {
    format!("{service_request_id}/{professional_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_request_is_consistent() {
        let now = TimeStamp::now();
        let request = ServiceRequest::open(
            "req_1".into(),
            "cust_1".into(),
            "svc_1".into(),
            now,
            String::new(),
            now,
        );

        assert_eq!(request.status, RequestStatus::Requested);
        assert!(request.consistent());
    }

    #[test]
    fn terminal_states() {
        assert!(RequestStatus::Closed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(!RequestStatus::Requested.is_terminal());
        assert!(!RequestStatus::Assigned.is_terminal());
        assert!(!RequestStatus::Completed.is_terminal());
        assert!(!RequestStatus::InProgress.is_terminal());
    }
}
