//! Periodic reconciliation jobs, driven by an external scheduler.
//!
//! Jobs re-enter the engine's transition API instead of mutating state
//! directly, so time-triggered transitions behave exactly like
//! actor-triggered ones. One item's failure never aborts a batch: it is
//! logged, counted, and the sweep moves on.

use std::collections::HashMap;

use chrono::{Datelike, TimeZone, Utc};

use crate::error::EngineError;
use crate::notify::NotificationKind;
use crate::request::{RequestStatus, ServiceRequest};
use crate::service::RequestService;
use crate::utils::TimeStamp;

/// Batch outcome: how many items were handled and how many were logged
/// as failed. Partial failure is not an error.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub processed: usize,
    pub failed: usize,
}

pub struct SweepJobs {
    service: RequestService,
}

impl SweepJobs {
    pub fn new(service: RequestService) -> Self {
        Self { service }
    }

    /// Expire open requests whose scheduled date has passed with nobody
    /// assigned. Runs every few minutes.
    pub fn auto_cancel_expired(&self, now: TimeStamp) -> Result<SweepSummary, EngineError> {
        let expired = self.service.store().requests_where(|r| {
            r.status == RequestStatus::Requested
                && r.professional_id.is_none()
                && r.scheduled_date < now
        })?;

        let mut summary = SweepSummary::default();
        for request in expired {
            match self.service.auto_cancel(&request.id, now) {
                Ok(_) => summary.processed += 1,
                // raced with an accept or another sweep; nothing to expire
                Err(EngineError::InvalidState(_)) => {}
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(request = %request.id, %err, "auto-cancel failed");
                }
            }
        }

        tracing::info!(cancelled = summary.processed, failed = summary.failed, "expiry sweep done");
        Ok(summary)
    }

    /// Remind both parties about assigned requests past their scheduled
    /// date. Overdue is advisory, the status does not change.
    pub fn notify_overdue(&self, now: TimeStamp) -> Result<SweepSummary, EngineError> {
        let overdue = self.service.store().requests_where(|r| {
            r.status == RequestStatus::Assigned && r.scheduled_date < now
        })?;

        let mut summary = SweepSummary::default();
        for request in overdue {
            self.service.notify_customer_of(
                &request,
                NotificationKind::Overdue,
                &format!(
                    "Service request {} is past its scheduled date. The professional has been reminded.",
                    request.id
                ),
            );
            if let Some(professional_id) = &request.professional_id {
                self.service.notify_professional_by_id(
                    professional_id,
                    NotificationKind::Overdue,
                    &format!(
                        "Service request {} is past its scheduled date. Please complete it.",
                        request.id
                    ),
                );
            }
            summary.processed += 1;
        }

        Ok(summary)
    }

    /// One aggregated reminder per professional holding pending work,
    /// stating the count, never one message per request.
    pub fn daily_reminders(&self) -> Result<SweepSummary, EngineError> {
        let counts = self.service.pending_counts_by_professional()?;

        let mut summary = SweepSummary::default();
        for (professional_id, count) in counts {
            match self.service.store().professional(&professional_id) {
                Ok(professional) => {
                    self.service.notify_user(
                        &professional.user_id,
                        NotificationKind::Reminder,
                        &format!("You have {count} pending service request(s). Please take action."),
                    );
                    summary.processed += 1;
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(%professional_id, %err, "reminder skipped");
                }
            }
        }

        Ok(summary)
    }

    /// Monthly activity summary per active customer: request counts by
    /// outcome and total spent on closed requests. Customers with no
    /// requests in the month are skipped.
    pub fn monthly_reports(&self, year: i32, month: u32) -> Result<SweepSummary, EngineError> {
        let (start, end) = month_bounds(year, month)?;
        let in_month = self
            .service
            .store()
            .requests_where(|r| r.request_date >= start && r.request_date < end)?;

        let mut by_customer: HashMap<String, Vec<ServiceRequest>> = HashMap::new();
        for request in in_month {
            by_customer
                .entry(request.customer_id.clone())
                .or_default()
                .push(request);
        }

        let mut summary = SweepSummary::default();
        for (customer_id, requests) in by_customer {
            let delivered = self.deliver_report(&customer_id, &requests, year, month);
            match delivered {
                Ok(true) => summary.processed += 1,
                Ok(false) => {} // inactive account, skipped
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(%customer_id, %err, "monthly report failed");
                }
            }
        }

        Ok(summary)
    }

    fn deliver_report(
        &self,
        customer_id: &str,
        requests: &[ServiceRequest],
        year: i32,
        month: u32,
    ) -> Result<bool, EngineError> {
        let store = self.service.store();
        let customer = store.customer(customer_id)?;
        let user = store.user(&customer.user_id)?;
        if !user.is_active {
            return Ok(false);
        }

        let activity = MonthlyActivity::tally(requests, |service_id| {
            match store.service(service_id) {
                Ok(service) => service.base_price,
                Err(err) => {
                    tracing::warn!(%service_id, %err, "price lookup failed, counted as zero");
                    0
                }
            }
        });

        self.service.notify_user(
            &user.id,
            NotificationKind::MonthlyReport,
            &activity.summary_line(year, month),
        );
        Ok(true)
    }
}

/// Per-customer tallies for one reporting month.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonthlyActivity {
    pub total: usize,
    pub closed: usize,
    pub pending: usize,
    pub cancelled: usize,
    pub spent_minor: u64,
}

impl MonthlyActivity {
    pub fn tally<F>(requests: &[ServiceRequest], price_of: F) -> Self
    where
        F: Fn(&str) -> u64,
    {
        let mut activity = Self {
            total: requests.len(),
            ..Self::default()
        };
        for request in requests {
            match request.status {
                RequestStatus::Closed => {
                    activity.closed += 1;
                    activity.spent_minor += price_of(&request.service_id);
                }
                RequestStatus::Requested | RequestStatus::Assigned => activity.pending += 1,
                RequestStatus::Cancelled => activity.cancelled += 1,
                RequestStatus::InProgress | RequestStatus::Completed => {}
            }
        }
        activity
    }

    pub fn summary_line(&self, year: i32, month: u32) -> String {
        format!(
            "Your activity for {year}-{month:02}: {} request(s), {} closed, {} pending, {} cancelled. Total spent on closed requests: {}.",
            self.total, self.closed, self.pending, self.cancelled, self.spent_minor
        )
    }
}

/// Half-open [start, end) bounds of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> Result<(TimeStamp, TimeStamp), EngineError> {
    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| EngineError::Validation(format!("invalid report month {year}-{month:02}")))?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| EngineError::Validation(format!("invalid report month {year}-{month:02}")))?;
    Ok((start.into(), end.into()))
}

/// The month a report run at `now` covers.
pub fn previous_month(now: TimeStamp) -> (i32, u32) {
    let date = now.to_datetime_utc();
    if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    }
}
