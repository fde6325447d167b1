//! Customer reviews attached to closed service requests.

use crate::utils::TimeStamp;

/// Exactly one review per closed request, enforced by the engine. The
/// professional link is copied from the request at creation so the
/// review stays attributable after later directory changes.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Review {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub service_request_id: String,
    #[n(2)]
    pub customer_id: String,
    #[n(3)]
    pub professional_id: String,
    #[n(4)]
    pub rating: u8, // 1..=5
    #[n(5)]
    pub comment: Option<String>,
    #[n(6)]
    pub created_at: TimeStamp,
}
