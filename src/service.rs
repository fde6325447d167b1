//! Service layer API for the request lifecycle and its satellite records.
//!
//! Every operation runs as a short unit of work: resolve the actor,
//! check the current state, apply the transition through a guarded
//! store update, then hand side effects to the notification sink.
//! Sink delivery is best-effort and never changes an operation's result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::builder::RequestDraft;
use crate::directory::{Actor, Customer, Professional, Role, User, VerificationStatus};
use crate::error::EngineError;
use crate::notify::{NotificationKind, NotificationSink};
use crate::request::{Rejection, RequestStatus, ServiceRequest};
use crate::review::Review;
use crate::store::MarketStore;
use crate::utils::{TimeStamp, new_id};

#[derive(Clone)]
pub struct RequestService {
    store: MarketStore,
    sink: Arc<dyn NotificationSink>,
}

impl RequestService {
    pub fn new(store: MarketStore, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    pub fn store(&self) -> &MarketStore {
        &self.store
    }

    // -- actor resolution

    fn require_active(actor: &Actor) -> Result<(), EngineError> {
        if !actor.is_active {
            return Err(EngineError::Authorization("account is deactivated".into()));
        }
        Ok(())
    }

    fn require_customer(&self, actor: &Actor) -> Result<Customer, EngineError> {
        Self::require_active(actor)?;
        if actor.role != Role::Customer {
            return Err(EngineError::Authorization(
                "operation is reserved for customers".into(),
            ));
        }
        self.store.customer_by_user(&actor.user_id)
    }

    fn require_professional(&self, actor: &Actor) -> Result<Professional, EngineError> {
        Self::require_active(actor)?;
        if actor.role != Role::Professional {
            return Err(EngineError::Authorization(
                "operation is reserved for professionals".into(),
            ));
        }
        self.store.professional_by_user(&actor.user_id)
    }

    fn require_admin(actor: &Actor) -> Result<(), EngineError> {
        Self::require_active(actor)?;
        if actor.role != Role::Admin {
            return Err(EngineError::Authorization(
                "operation is reserved for administrators".into(),
            ));
        }
        Ok(())
    }

    // -- notification side effects (best-effort, logged on failure)

    pub(crate) fn notify_customer_of(
        &self,
        request: &ServiceRequest,
        kind: NotificationKind,
        message: &str,
    ) {
        match self.store.customer(&request.customer_id) {
            Ok(customer) => self.sink.notify(&customer.user_id, kind, message),
            Err(err) => {
                tracing::warn!(request = %request.id, %err, "customer notification skipped");
            }
        }
    }

    pub(crate) fn notify_professional_by_id(
        &self,
        professional_id: &str,
        kind: NotificationKind,
        message: &str,
    ) {
        match self.store.professional(professional_id) {
            Ok(professional) => self.sink.notify(&professional.user_id, kind, message),
            Err(err) => {
                tracing::warn!(%professional_id, %err, "professional notification skipped");
            }
        }
    }

    pub(crate) fn notify_user(&self, user_id: &str, kind: NotificationKind, message: &str) {
        self.sink.notify(user_id, kind, message);
    }

    // -- lifecycle transitions

    /// Open a new request in `Requested` and announce it to the
    /// candidate pool of approved professionals for the service.
    pub fn create(&self, actor: &Actor, draft: RequestDraft) -> Result<ServiceRequest, EngineError> {
        let customer = self.require_customer(actor)?;
        let now = TimeStamp::now();
        let finalised = draft.finalise(now)?;

        // a missing service is a validation failure on the draft, not a
        // lookup miss
        let service = self
            .store
            .try_service(&finalised.service_id)?
            .ok_or_else(|| EngineError::Validation("service does not exist".into()))?;
        if !service.is_active {
            return Err(EngineError::Validation(
                "service is not currently active".into(),
            ));
        }

        let request = ServiceRequest::open(
            new_id("req_")?,
            customer.id,
            service.id.clone(),
            finalised.scheduled_date,
            finalised.remarks,
            now,
        );
        self.store.save_request(&request)?;

        match self.store.professionals_where(|p| {
            p.service_id == service.id && p.verification_status == VerificationStatus::Approved
        }) {
            Ok(pool) => {
                let message = format!("A new {} request is open for booking.", service.name);
                for professional in pool {
                    self.sink
                        .notify(&professional.user_id, NotificationKind::NewRequest, &message);
                }
            }
            Err(err) => tracing::warn!(request = %request.id, %err, "candidate pool notification skipped"),
        }

        Ok(request)
    }

    /// Requester-only edit of schedule and remarks, legal only while the
    /// request is still `Requested`. An assigned request is immutable to
    /// the customer; that is policy, not an oversight.
    pub fn update(
        &self,
        actor: &Actor,
        request_id: &str,
        scheduled_date: Option<TimeStamp>,
        remarks: Option<&str>,
    ) -> Result<ServiceRequest, EngineError> {
        Self::require_active(actor)?;
        let owner_id = match actor.role {
            Role::Admin => None,
            _ => Some(self.require_customer(actor)?.id),
        };

        let updated = self.store.update_request(request_id, |request| {
            if let Some(owner_id) = &owner_id {
                if &request.customer_id != owner_id {
                    return Err(EngineError::Authorization(
                        "request belongs to another customer".into(),
                    ));
                }
            }
            if request.status != RequestStatus::Requested {
                return Err(EngineError::InvalidState(format!(
                    "a {} request cannot be edited",
                    request.status.as_str()
                )));
            }

            let mut next = request.clone();
            if let Some(date) = scheduled_date {
                next.scheduled_date = date;
            }
            if let Some(text) = remarks {
                next.remarks = text.to_string();
            }
            next.last_updated = TimeStamp::now();
            Ok(next)
        })?;

        if actor.role == Role::Admin {
            self.notify_customer_of(
                &updated,
                NotificationKind::RequestUpdated,
                &format!("Your service request {} has been updated by an administrator.", updated.id),
            );
        }

        Ok(updated)
    }

    /// Customer-initiated cancellation, legal only while `Requested`
    /// with an empty professional slot.
    pub fn cancel(&self, actor: &Actor, request_id: &str) -> Result<ServiceRequest, EngineError> {
        let customer = self.require_customer(actor)?;

        self.store.update_request(request_id, |request| {
            if request.customer_id != customer.id {
                return Err(EngineError::Authorization(
                    "request belongs to another customer".into(),
                ));
            }
            if request.professional_id.is_some() || request.status != RequestStatus::Requested {
                return Err(EngineError::InvalidState(
                    "only an unassigned request still awaiting a professional can be cancelled"
                        .into(),
                ));
            }

            let mut next = request.clone();
            next.status = RequestStatus::Cancelled;
            next.last_updated = TimeStamp::now();
            Ok(next)
        })
    }

    /// A professional claims an open request. The write is guarded: of
    /// two racers only the one whose swap lands sees `Requested`, the
    /// other re-reads `Assigned` and is refused.
    pub fn accept(&self, actor: &Actor, request_id: &str) -> Result<ServiceRequest, EngineError> {
        let professional = self.require_professional(actor)?;

        let updated = self.store.update_request(request_id, |request| {
            if request.status != RequestStatus::Requested || request.professional_id.is_some() {
                return Err(EngineError::InvalidState(
                    "request is no longer open for assignment".into(),
                ));
            }
            if request.service_id != professional.service_id {
                return Err(EngineError::Validation(
                    "request does not match your service category".into(),
                ));
            }
            if professional.verification_status != VerificationStatus::Approved {
                return Err(EngineError::Authorization(
                    "professional is not verified for accepting requests".into(),
                ));
            }
            if self
                .store
                .rejection_exists(&request.id, &professional.id)?
            {
                return Err(EngineError::InvalidState(
                    "a previously rejected request cannot be accepted".into(),
                ));
            }

            let mut next = request.clone();
            next.professional_id = Some(professional.id.clone());
            next.status = RequestStatus::Assigned;
            next.last_updated = TimeStamp::now();
            Ok(next)
        })?;

        let accepted_by = self
            .store
            .user(&professional.user_id)
            .map(|user| user.name)
            .unwrap_or_else(|_| "a professional".to_string());
        self.notify_customer_of(
            &updated,
            NotificationKind::RequestAccepted,
            &format!("Your service request has been accepted by {accepted_by}."),
        );

        Ok(updated)
    }

    /// A professional declines a request. The rejection row is recorded
    /// unconditionally (a professional may opt out of a request they
    /// never held); if they held the assignment it is released, and the
    /// exhaustion rule is re-evaluated from persisted state.
    pub fn reject(
        &self,
        actor: &Actor,
        request_id: &str,
        reason: Option<&str>,
    ) -> Result<ServiceRequest, EngineError> {
        let professional = self.require_professional(actor)?;
        let request = self.store.request(request_id)?;

        if request.service_id != professional.service_id {
            return Err(EngineError::Validation(
                "request does not match your service category".into(),
            ));
        }

        let rejection = Rejection::new(request_id, &professional.id, reason, TimeStamp::now());
        if !self.store.insert_rejection(&rejection)? {
            return Err(EngineError::InvalidState(
                "request was already rejected by this professional".into(),
            ));
        }

        // release the assignment if the rejecting professional holds it
        if request.professional_id.as_deref() == Some(professional.id.as_str()) {
            let released = self.store.update_request(request_id, |current| {
                if current.professional_id.as_deref() != Some(professional.id.as_str()) {
                    return Err(EngineError::InvalidState("assignment already moved".into()));
                }

                let mut next = current.clone();
                next.professional_id = None;
                next.status = RequestStatus::Requested;
                next.last_updated = TimeStamp::now();
                Ok(next)
            });
            match released {
                Ok(updated) => self.notify_customer_of(
                    &updated,
                    NotificationKind::RequestRejected,
                    "Your service request has been declined by the assigned professional and is open again.",
                ),
                Err(EngineError::InvalidState(_)) => {}
                Err(err) => return Err(err),
            }
        }

        self.apply_exhaustion_rule(request_id)?;
        self.store.request(request_id)
    }

    /// Exhaustion rule: once every approved professional in the
    /// request's category has a rejection row, cancel the request.
    /// Recomputed from persisted state on every call; the final cancel
    /// is guarded so concurrent rejectors cancel and notify once.
    fn apply_exhaustion_rule(&self, request_id: &str) -> Result<(), EngineError> {
        let request = self.store.request(request_id)?;
        if request.status != RequestStatus::Requested {
            return Ok(());
        }

        let pool = self.store.professionals_where(|p| {
            p.service_id == request.service_id
                && p.verification_status == VerificationStatus::Approved
        })?;
        if pool.is_empty() {
            return Ok(());
        }

        let mut rejectors = 0usize;
        for professional in &pool {
            if self.store.rejection_exists(request_id, &professional.id)? {
                rejectors += 1;
            }
        }
        if rejectors < pool.len() {
            return Ok(());
        }

        let cancelled = self.store.update_request(request_id, |current| {
            if current.status != RequestStatus::Requested {
                return Err(EngineError::InvalidState("no longer requested".into()));
            }

            let mut next = current.clone();
            next.status = RequestStatus::Cancelled;
            next.last_updated = TimeStamp::now();
            Ok(next)
        });
        match cancelled {
            Ok(updated) => {
                self.notify_customer_of(
                    &updated,
                    NotificationKind::RequestCancelled,
                    "Your service request has been cancelled because every available professional declined it.",
                );
                Ok(())
            }
            // another writer got there first; the notification is theirs
            Err(EngineError::InvalidState(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Only the assigned professional can complete, only from `Assigned`.
    pub fn complete(&self, actor: &Actor, request_id: &str) -> Result<ServiceRequest, EngineError> {
        let professional = self.require_professional(actor)?;

        let updated = self.store.update_request(request_id, |request| {
            if request.professional_id.as_deref() != Some(professional.id.as_str()) {
                return Err(EngineError::Authorization(
                    "request is not assigned to this professional".into(),
                ));
            }
            if request.status != RequestStatus::Assigned {
                return Err(EngineError::InvalidState(format!(
                    "a {} request cannot be completed",
                    request.status.as_str()
                )));
            }

            let now = TimeStamp::now();
            let mut next = request.clone();
            next.status = RequestStatus::Completed;
            next.completion_date = Some(now);
            next.last_updated = now;
            Ok(next)
        })?;

        self.notify_customer_of(
            &updated,
            NotificationKind::RequestCompleted,
            "Your service request has been marked completed. Close it once you are satisfied.",
        );

        Ok(updated)
    }

    /// Only the owning customer can close, only from `Completed`. The
    /// professional slot is kept for review attribution.
    pub fn close(&self, actor: &Actor, request_id: &str) -> Result<ServiceRequest, EngineError> {
        let customer = self.require_customer(actor)?;

        let updated = self.store.update_request(request_id, |request| {
            if request.customer_id != customer.id {
                return Err(EngineError::Authorization(
                    "request belongs to another customer".into(),
                ));
            }
            if request.status != RequestStatus::Completed {
                return Err(EngineError::InvalidState(
                    "only a completed request can be closed".into(),
                ));
            }

            let mut next = request.clone();
            next.status = RequestStatus::Closed;
            next.last_updated = TimeStamp::now();
            Ok(next)
        })?;

        if let Some(professional_id) = &updated.professional_id {
            self.notify_professional_by_id(
                professional_id,
                NotificationKind::RequestClosed,
                &format!("Service request {} has been closed by the customer.", updated.id),
            );
        }

        Ok(updated)
    }

    /// System-driven expiry used by the sweep: cancel a request that is
    /// still `Requested`, unassigned and past its scheduled date. Same
    /// guarded transition discipline as a customer cancellation.
    pub fn auto_cancel(
        &self,
        request_id: &str,
        now: TimeStamp,
    ) -> Result<ServiceRequest, EngineError> {
        let updated = self.store.update_request(request_id, |request| {
            if request.status != RequestStatus::Requested || request.professional_id.is_some() {
                return Err(EngineError::InvalidState(
                    "request is no longer eligible for expiry".into(),
                ));
            }
            if request.scheduled_date >= now {
                return Err(EngineError::InvalidState(
                    "request has not passed its scheduled date".into(),
                ));
            }

            let mut next = request.clone();
            next.status = RequestStatus::Cancelled;
            next.last_updated = now;
            Ok(next)
        })?;

        self.notify_customer_of(
            &updated,
            NotificationKind::RequestAutoCancelled,
            &format!(
                "Your service request {} was cancelled automatically because no professional accepted it before the scheduled date.",
                updated.id
            ),
        );

        Ok(updated)
    }

    // -- listings

    /// The professional's visible pool: open requests in their category,
    /// minus everything they already rejected unless the caller asks to
    /// see those too (a display concern, not a transition).
    pub fn list_available(
        &self,
        actor: &Actor,
        include_rejected: bool,
    ) -> Result<Vec<ServiceRequest>, EngineError> {
        let professional = self.require_professional(actor)?;

        let mut open = self.store.requests_where(|r| {
            r.status == RequestStatus::Requested
                && r.professional_id.is_none()
                && r.service_id == professional.service_id
        })?;

        if !include_rejected {
            let mine: HashSet<String> = self
                .store
                .rejections_where(|rej| rej.professional_id == professional.id)?
                .into_iter()
                .map(|rej| rej.service_request_id)
                .collect();
            open.retain(|r| !mine.contains(&r.id));
        }

        open.sort_by(|a, b| b.request_date.cmp(&a.request_date));
        Ok(open)
    }

    /// Role-scoped request listing: a customer sees their own requests,
    /// a professional their assignments, an admin everything.
    pub fn list_requests(
        &self,
        actor: &Actor,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ServiceRequest>, EngineError> {
        Self::require_active(actor)?;

        let mut requests = match actor.role {
            Role::Customer => {
                let customer = self.require_customer(actor)?;
                self.store
                    .requests_where(|r| r.customer_id == customer.id)?
            }
            Role::Professional => {
                let professional = self.require_professional(actor)?;
                self.store
                    .requests_where(|r| r.professional_id.as_deref() == Some(professional.id.as_str()))?
            }
            Role::Admin => self.store.requests_where(|_| true)?,
        };

        if let Some(status) = status {
            requests.retain(|r| r.status == status);
        }
        requests.sort_by(|a, b| b.request_date.cmp(&a.request_date));
        Ok(requests)
    }

    /// Rejection history of one request, visible to admins and to
    /// professionals of the matching category.
    pub fn rejections_for_request(
        &self,
        actor: &Actor,
        request_id: &str,
    ) -> Result<Vec<Rejection>, EngineError> {
        Self::require_active(actor)?;
        let request = self.store.request(request_id)?;

        match actor.role {
            Role::Admin => {}
            Role::Professional => {
                let professional = self.require_professional(actor)?;
                if professional.service_id != request.service_id {
                    return Err(EngineError::Authorization(
                        "request does not match your service category".into(),
                    ));
                }
            }
            Role::Customer => {
                return Err(EngineError::Authorization(
                    "rejection history is not visible to customers".into(),
                ));
            }
        }

        self.store
            .rejections_where(|rej| rej.service_request_id == request_id)
    }

    // -- reviews

    /// Attach the one allowed review to a closed request.
    pub fn create_review(
        &self,
        actor: &Actor,
        request_id: &str,
        rating: u8,
        comment: Option<&str>,
    ) -> Result<Review, EngineError> {
        let customer = self.require_customer(actor)?;

        if !(1..=5).contains(&rating) {
            return Err(EngineError::Validation(
                "rating must be between 1 and 5".into(),
            ));
        }

        let request = self.store.request(request_id)?;
        if request.customer_id != customer.id {
            return Err(EngineError::Authorization(
                "request belongs to another customer".into(),
            ));
        }
        if request.status != RequestStatus::Closed {
            return Err(EngineError::InvalidState(
                "only a closed request can be reviewed".into(),
            ));
        }
        if self.store.review_for_request(request_id)?.is_some() {
            return Err(EngineError::InvalidState(
                "request has already been reviewed".into(),
            ));
        }
        let professional_id = request.professional_id.clone().ok_or_else(|| {
            EngineError::InvalidState("request has no professional to review".into())
        })?;

        let review = Review {
            id: new_id("rev_")?,
            service_request_id: request_id.to_string(),
            customer_id: customer.id,
            professional_id: professional_id.clone(),
            rating,
            comment: comment.map(str::to_string),
            created_at: TimeStamp::now(),
        };
        self.store.save_review(&review)?;

        self.notify_professional_by_id(
            &professional_id,
            NotificationKind::NewReview,
            "A customer has left a review for your service.",
        );

        Ok(review)
    }

    /// Owner-only edit; the request's status is untouched.
    pub fn update_review(
        &self,
        actor: &Actor,
        review_id: &str,
        rating: Option<u8>,
        comment: Option<&str>,
    ) -> Result<Review, EngineError> {
        let customer = self.require_customer(actor)?;

        let mut review = self.store.review(review_id)?;
        if review.customer_id != customer.id {
            return Err(EngineError::Authorization(
                "review belongs to another customer".into(),
            ));
        }

        if let Some(rating) = rating {
            if !(1..=5).contains(&rating) {
                return Err(EngineError::Validation(
                    "rating must be between 1 and 5".into(),
                ));
            }
            review.rating = rating;
        }
        if let Some(comment) = comment {
            review.comment = Some(comment.to_string());
        }
        self.store.save_review(&review)?;

        self.notify_professional_by_id(
            &review.professional_id,
            NotificationKind::ReviewUpdated,
            "A customer has updated their review for your service.",
        );

        Ok(review)
    }

    /// Owner-only delete; the request's status is untouched.
    pub fn delete_review(&self, actor: &Actor, review_id: &str) -> Result<(), EngineError> {
        let customer = self.require_customer(actor)?;

        let review = self.store.review(review_id)?;
        if review.customer_id != customer.id {
            return Err(EngineError::Authorization(
                "review belongs to another customer".into(),
            ));
        }
        self.store.delete_review(review_id)
    }

    pub fn reviews_for_professional(
        &self,
        professional_id: &str,
    ) -> Result<Vec<Review>, EngineError> {
        self.store
            .reviews_where(|r| r.professional_id == professional_id)
    }

    /// Mean rating rounded to one decimal, or None with no reviews yet.
    pub fn average_rating(&self, professional_id: &str) -> Result<Option<f64>, EngineError> {
        let reviews = self.reviews_for_professional(professional_id)?;
        if reviews.is_empty() {
            return Ok(None);
        }
        let total: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
        let mean = f64::from(total) / reviews.len() as f64;
        Ok(Some((mean * 10.0).round() / 10.0))
    }

    // -- notifications (owner-scoped reads)

    pub fn notifications_for(
        &self,
        actor: &Actor,
        unread_only: bool,
    ) -> Result<Vec<crate::notify::Notification>, EngineError> {
        Self::require_active(actor)?;

        let mut notifications = self
            .store
            .notifications_where(|n| n.user_id == actor.user_id && (!unread_only || !n.is_read))?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    pub fn mark_notification_read(
        &self,
        actor: &Actor,
        notification_id: &str,
    ) -> Result<crate::notify::Notification, EngineError> {
        Self::require_active(actor)?;

        let mut notification = self.store.notification(notification_id)?;
        if notification.user_id != actor.user_id {
            return Err(EngineError::Authorization(
                "notification belongs to another user".into(),
            ));
        }
        notification.is_read = true;
        self.store.save_notification(&notification)?;
        Ok(notification)
    }

    pub fn mark_all_read(&self, actor: &Actor) -> Result<usize, EngineError> {
        Self::require_active(actor)?;

        let unread = self
            .store
            .notifications_where(|n| n.user_id == actor.user_id && !n.is_read)?;
        let count = unread.len();
        for mut notification in unread {
            notification.is_read = true;
            self.store.save_notification(&notification)?;
        }
        Ok(count)
    }

    pub fn delete_notification(
        &self,
        actor: &Actor,
        notification_id: &str,
    ) -> Result<(), EngineError> {
        Self::require_active(actor)?;

        let notification = self.store.notification(notification_id)?;
        if notification.user_id != actor.user_id {
            return Err(EngineError::Authorization(
                "notification belongs to another user".into(),
            ));
        }
        self.store.delete_notification(notification_id)
    }

    // -- admin moderation

    /// Settle a professional's verification one way or the other.
    pub fn verify_professional(
        &self,
        actor: &Actor,
        professional_id: &str,
        decision: VerificationStatus,
        note: Option<&str>,
    ) -> Result<Professional, EngineError> {
        Self::require_admin(actor)?;

        let message = match decision {
            VerificationStatus::Approved => {
                note.unwrap_or("Your profile has been approved. You can now accept service requests.")
            }
            VerificationStatus::Rejected => {
                note.unwrap_or("Your profile verification has been rejected. Contact support for details.")
            }
            VerificationStatus::Pending => {
                return Err(EngineError::Validation(
                    "verification decision must be approved or rejected".into(),
                ));
            }
        };

        let mut professional = self.store.professional(professional_id)?;
        professional.verification_status = decision;
        self.store.save_professional(&professional)?;

        self.sink
            .notify(&professional.user_id, NotificationKind::Verification, message);

        Ok(professional)
    }

    /// Toggle a user account on or off. The auth collaborator reads the
    /// stored flag when it resolves the next actor context.
    pub fn set_account_active(
        &self,
        actor: &Actor,
        user_id: &str,
        active: bool,
    ) -> Result<User, EngineError> {
        Self::require_admin(actor)?;

        let mut user = self.store.user(user_id)?;
        user.is_active = active;
        self.store.save_user(&user)?;

        let message = if active {
            "Your account has been activated by an administrator."
        } else {
            "Your account has been deactivated by an administrator."
        };
        self.sink
            .notify(&user.id, NotificationKind::AccountStatus, message);

        Ok(user)
    }

    /// Aggregated reminder helper used by the daily sweep: pending
    /// request counts keyed by assigned professional.
    pub(crate) fn pending_counts_by_professional(
        &self,
    ) -> Result<HashMap<String, usize>, EngineError> {
        let pending = self.store.requests_where(|r| {
            r.professional_id.is_some()
                && matches!(r.status, RequestStatus::Requested | RequestStatus::Assigned)
        })?;

        let mut counts: HashMap<String, usize> = HashMap::new();
        for request in pending {
            if let Some(professional_id) = request.professional_id {
                *counts.entry(professional_id).or_default() += 1;
            }
        }
        Ok(counts)
    }
}
