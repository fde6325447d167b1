//! Draft construction for new service requests.

use crate::error::EngineError;
use crate::utils::TimeStamp;

/// Customer-supplied input for [`crate::service::RequestService::create`].
/// Field checks run on [`finalise`](RequestDraft::finalise); state
/// checks (active service, candidate pool) belong to the service layer.
#[derive(Debug, Default, Clone)]
pub struct RequestDraft {
    service_id: Option<String>,
    scheduled_date: Option<TimeStamp>,
    remarks: Option<String>,
}

/// Validated create input.
#[derive(Debug, Clone)]
pub struct FinalisedDraft {
    pub service_id: String,
    pub scheduled_date: TimeStamp,
    pub remarks: String,
}

impl RequestDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_service(mut self, service_id: &str) -> Self {
        self.service_id = Some(service_id.to_string());
        self
    }
    pub fn set_scheduled_date(mut self, date: TimeStamp) -> Self {
        self.scheduled_date = Some(date);
        self
    }
    pub fn set_remarks(mut self, remarks: &str) -> Self {
        self.remarks = Some(remarks.to_string());
        self
    }

    /// Checks required fields and the strict-future scheduling rule.
    pub fn finalise(self, now: TimeStamp) -> Result<FinalisedDraft, EngineError> {
        let Some(service_id) = self.service_id else {
            return Err(EngineError::Validation("service id is not set".into()));
        };
        let Some(scheduled_date) = self.scheduled_date else {
            return Err(EngineError::Validation("scheduled date is not set".into()));
        };
        if scheduled_date <= now {
            return Err(EngineError::Validation(
                "scheduled date must be in the future".into(),
            ));
        }

        Ok(FinalisedDraft {
            service_id,
            scheduled_date,
            remarks: self.remarks.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_with_all_fields_finalises() {
        let now = TimeStamp::from_ymd_hms(2025, 6, 1, 9, 0, 0);
        let later = TimeStamp::from_ymd_hms(2025, 6, 2, 9, 0, 0);

        let draft = RequestDraft::new()
            .set_service("svc_plumbing")
            .set_scheduled_date(later)
            .set_remarks("kitchen sink");

        let finalised = draft.finalise(now).unwrap();
        assert_eq!(finalised.service_id, "svc_plumbing");
        assert_eq!(finalised.remarks, "kitchen sink");
    }

    #[test]
    fn draft_rejects_missing_service() {
        let now = TimeStamp::from_ymd_hms(2025, 6, 1, 9, 0, 0);
        let draft = RequestDraft::new().set_scheduled_date(TimeStamp::from_ymd_hms(2025, 6, 2, 9, 0, 0));

        assert!(matches!(
            draft.finalise(now),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn draft_rejects_past_or_present_schedule() {
        let now = TimeStamp::from_ymd_hms(2025, 6, 1, 9, 0, 0);

        let past = RequestDraft::new()
            .set_service("svc_plumbing")
            .set_scheduled_date(TimeStamp::from_ymd_hms(2025, 5, 30, 9, 0, 0));
        assert!(matches!(past.finalise(now), Err(EngineError::Validation(_))));

        let exactly_now = RequestDraft::new()
            .set_service("svc_plumbing")
            .set_scheduled_date(now);
        assert!(matches!(
            exactly_now.finalise(now),
            Err(EngineError::Validation(_))
        ));
    }
}
