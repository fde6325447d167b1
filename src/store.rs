//! Sled-backed persistence: one named tree per record type, values
//! encoded as CBOR.
//!
//! All check-then-set transitions go through [`MarketStore::update_request`],
//! a compare-and-swap loop, so a racing writer can never clobber a
//! precondition another writer already invalidated. Rejection rows use a
//! compare-and-swap insert on their composite key, which is the
//! uniqueness constraint on (request, professional).

use std::sync::Arc;

use sled::{Db, Tree};

use crate::directory::{Customer, Professional, Service, User};
use crate::error::EngineError;
use crate::notify::Notification;
use crate::request::{Rejection, ServiceRequest, rejection_key};
use crate::review::Review;

#[derive(Clone)]
pub struct MarketStore {
    users: Tree,
    customers: Tree,
    professionals: Tree,
    services: Tree,
    requests: Tree,
    rejections: Tree,
    reviews: Tree,
    notifications: Tree,
}

impl MarketStore {
    pub fn new(db: Arc<Db>) -> Result<Self, EngineError> {
        Ok(Self {
            users: db.open_tree("users")?,
            customers: db.open_tree("customers")?,
            professionals: db.open_tree("professionals")?,
            services: db.open_tree("services")?,
            requests: db.open_tree("service_requests")?,
            rejections: db.open_tree("rejected_service_requests")?,
            reviews: db.open_tree("reviews")?,
            notifications: db.open_tree("notifications")?,
        })
    }

    fn put<T: minicbor::Encode<()>>(tree: &Tree, key: &str, value: &T) -> Result<(), EngineError> {
        tree.insert(key.as_bytes(), minicbor::to_vec(value)?)?;
        Ok(())
    }

    fn fetch<T>(tree: &Tree, key: &str) -> Result<Option<T>, EngineError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T, F>(tree: &Tree, keep: F) -> Result<Vec<T>, EngineError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
        F: Fn(&T) -> bool,
    {
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let record: T = minicbor::decode(&bytes)?;
            if keep(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    // -- users

    pub fn save_user(&self, user: &User) -> Result<(), EngineError> {
        Self::put(&self.users, &user.id, user)
    }

    pub fn user(&self, id: &str) -> Result<User, EngineError> {
        Self::fetch(&self.users, id)?.ok_or_else(|| EngineError::NotFound(format!("user {id}")))
    }

    // -- customers

    pub fn save_customer(&self, customer: &Customer) -> Result<(), EngineError> {
        Self::put(&self.customers, &customer.id, customer)
    }

    pub fn customer(&self, id: &str) -> Result<Customer, EngineError> {
        Self::fetch(&self.customers, id)?
            .ok_or_else(|| EngineError::NotFound(format!("customer {id}")))
    }

    pub fn customer_by_user(&self, user_id: &str) -> Result<Customer, EngineError> {
        Self::scan(&self.customers, |c: &Customer| c.user_id == user_id)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NotFound(format!("customer profile for user {user_id}")))
    }

    pub fn customers(&self) -> Result<Vec<Customer>, EngineError> {
        Self::scan(&self.customers, |_: &Customer| true)
    }

    // -- professionals

    pub fn save_professional(&self, professional: &Professional) -> Result<(), EngineError> {
        Self::put(&self.professionals, &professional.id, professional)
    }

    pub fn professional(&self, id: &str) -> Result<Professional, EngineError> {
        Self::fetch(&self.professionals, id)?
            .ok_or_else(|| EngineError::NotFound(format!("professional {id}")))
    }

    pub fn professional_by_user(&self, user_id: &str) -> Result<Professional, EngineError> {
        Self::scan(&self.professionals, |p: &Professional| p.user_id == user_id)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EngineError::NotFound(format!("professional profile for user {user_id}"))
            })
    }

    pub fn professionals_where<F>(&self, keep: F) -> Result<Vec<Professional>, EngineError>
    where
        F: Fn(&Professional) -> bool,
    {
        Self::scan(&self.professionals, keep)
    }

    // -- services

    pub fn save_service(&self, service: &Service) -> Result<(), EngineError> {
        Self::put(&self.services, &service.id, service)
    }

    pub fn service(&self, id: &str) -> Result<Service, EngineError> {
        Self::fetch(&self.services, id)?
            .ok_or_else(|| EngineError::NotFound(format!("service {id}")))
    }

    pub fn try_service(&self, id: &str) -> Result<Option<Service>, EngineError> {
        Self::fetch(&self.services, id)
    }

    // -- service requests

    pub fn save_request(&self, request: &ServiceRequest) -> Result<(), EngineError> {
        Self::put(&self.requests, &request.id, request)
    }

    pub fn request(&self, id: &str) -> Result<ServiceRequest, EngineError> {
        Self::fetch(&self.requests, id)?
            .ok_or_else(|| EngineError::NotFound(format!("service request {id}")))
    }

    pub fn requests_where<F>(&self, keep: F) -> Result<Vec<ServiceRequest>, EngineError>
    where
        F: Fn(&ServiceRequest) -> bool,
    {
        Self::scan(&self.requests, keep)
    }

    /// Guarded read-modify-write on one request. `apply` sees the
    /// current record and either produces its successor or refuses the
    /// transition; losing a swap race re-reads and re-checks, so a
    /// stale precondition is always caught before the write lands.
    pub fn update_request<F>(&self, id: &str, apply: F) -> Result<ServiceRequest, EngineError>
    where
        F: Fn(&ServiceRequest) -> Result<ServiceRequest, EngineError>,
    {
        loop {
            let current = self
                .requests
                .get(id.as_bytes())?
                .ok_or_else(|| EngineError::NotFound(format!("service request {id}")))?;
            let decoded: ServiceRequest = minicbor::decode(&current)?;
            let next = apply(&decoded)?;
            let encoded = minicbor::to_vec(&next)?;

            match self
                .requests
                .compare_and_swap(id.as_bytes(), Some(current), Some(encoded))?
            {
                Ok(()) => return Ok(next),
                Err(_) => continue, // lost the race, re-read
            }
        }
    }

    // -- rejections

    /// Insert-if-absent on the (request, professional) composite key.
    /// Returns false when a row already exists; the pair can never gain
    /// a second row, even under concurrent rejects.
    pub fn insert_rejection(&self, rejection: &Rejection) -> Result<bool, EngineError> {
        let key = rejection.key();
        let encoded = minicbor::to_vec(rejection)?;
        let swapped = self.rejections.compare_and_swap(
            key.as_bytes(),
            None as Option<&[u8]>,
            Some(encoded),
        )?;
        Ok(swapped.is_ok())
    }

    pub fn rejection_exists(
        &self,
        service_request_id: &str,
        professional_id: &str,
    ) -> Result<bool, EngineError> {
        let key = rejection_key(service_request_id, professional_id);
        Ok(self.rejections.contains_key(key.as_bytes())?)
    }

    pub fn rejections_where<F>(&self, keep: F) -> Result<Vec<Rejection>, EngineError>
    where
        F: Fn(&Rejection) -> bool,
    {
        Self::scan(&self.rejections, keep)
    }

    // -- reviews

    pub fn save_review(&self, review: &Review) -> Result<(), EngineError> {
        Self::put(&self.reviews, &review.id, review)
    }

    pub fn review(&self, id: &str) -> Result<Review, EngineError> {
        Self::fetch(&self.reviews, id)?
            .ok_or_else(|| EngineError::NotFound(format!("review {id}")))
    }

    pub fn review_for_request(&self, request_id: &str) -> Result<Option<Review>, EngineError> {
        Ok(
            Self::scan(&self.reviews, |r: &Review| r.service_request_id == request_id)?
                .into_iter()
                .next(),
        )
    }

    pub fn reviews_where<F>(&self, keep: F) -> Result<Vec<Review>, EngineError>
    where
        F: Fn(&Review) -> bool,
    {
        Self::scan(&self.reviews, keep)
    }

    pub fn delete_review(&self, id: &str) -> Result<(), EngineError> {
        self.reviews.remove(id.as_bytes())?;
        Ok(())
    }

    // -- notifications

    pub fn save_notification(&self, notification: &Notification) -> Result<(), EngineError> {
        Self::put(&self.notifications, &notification.id, notification)
    }

    pub fn notification(&self, id: &str) -> Result<Notification, EngineError> {
        Self::fetch(&self.notifications, id)?
            .ok_or_else(|| EngineError::NotFound(format!("notification {id}")))
    }

    pub fn notifications_where<F>(&self, keep: F) -> Result<Vec<Notification>, EngineError>
    where
        F: Fn(&Notification) -> bool,
    {
        Self::scan(&self.notifications, keep)
    }

    pub fn delete_notification(&self, id: &str) -> Result<(), EngineError> {
        self.notifications.remove(id.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestStatus;
    use crate::utils::TimeStamp;

    // keep the tempdir guard alive next to the store or sled loses its
    // backing files mid-test
    fn temp_store() -> (MarketStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("store_tests.db")).unwrap();
        (MarketStore::new(Arc::new(db)).unwrap(), dir)
    }

    #[test]
    fn request_roundtrip() {
        let (store, _dir) = temp_store();
        let now = TimeStamp::now();
        let request = ServiceRequest::open(
            "req_a".into(),
            "cust_a".into(),
            "svc_a".into(),
            now,
            "leaky tap".into(),
            now,
        );

        store.save_request(&request).unwrap();
        assert_eq!(store.request("req_a").unwrap(), request);
    }

    #[test]
    fn duplicate_rejection_is_refused_at_the_key_level() {
        let (store, _dir) = temp_store();
        let rejection = Rejection::new("req_a", "pro_a", Some("too far"), TimeStamp::now());

        assert!(store.insert_rejection(&rejection).unwrap());
        assert!(!store.insert_rejection(&rejection).unwrap());
        assert!(store.rejection_exists("req_a", "pro_a").unwrap());
        assert_eq!(
            store
                .rejections_where(|r| r.service_request_id == "req_a")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn guarded_update_refuses_a_stale_precondition() {
        let (store, _dir) = temp_store();
        let now = TimeStamp::now();
        let request = ServiceRequest::open(
            "req_b".into(),
            "cust_a".into(),
            "svc_a".into(),
            now,
            String::new(),
            now,
        );
        store.save_request(&request).unwrap();

        store
            .update_request("req_b", |req| {
                let mut next = req.clone();
                next.status = RequestStatus::Cancelled;
                Ok(next)
            })
            .unwrap();

        let refused = store.update_request("req_b", |req| {
            if req.status != RequestStatus::Requested {
                return Err(EngineError::InvalidState("no longer requested".into()));
            }
            Ok(req.clone())
        });
        assert!(matches!(refused, Err(EngineError::InvalidState(_))));
    }
}
