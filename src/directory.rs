//! Directory records: the people and services the marketplace knows about.
//!
//! Records reference each other through plain id strings. Display joins
//! (a customer's name on a request, a professional's service name) are
//! derived at read time, never stored on the referencing record.

use crate::utils::TimeStamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Role {
    #[n(0)]
    Admin,
    #[n(1)]
    Customer,
    #[n(2)]
    Professional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum VerificationStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

/// The authenticated caller of an engine operation, resolved by an
/// external auth collaborator. The engine trusts this context and only
/// re-joins to the role profile it needs.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
    pub is_active: bool,
}

impl Actor {
    pub fn new(user_id: &str, role: Role) -> Self {
        Self {
            user_id: user_id.to_string(),
            role,
            is_active: true,
        }
    }
    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct User {
    #[n(0)]
    pub id: String, // uuid7 addressable string, "user_" prefix
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub phone: Option<String>,
    #[n(4)]
    pub role: Role,
    #[n(5)]
    pub is_active: bool,
    #[n(6)]
    pub created_at: TimeStamp,
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Customer {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub address: String,
    #[n(3)]
    pub pincode: String,
    #[n(4)]
    pub registered_on: TimeStamp,
}

/// A professional is tied to exactly one service category and may only
/// take work once verification reaches `Approved`.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Professional {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub service_id: String,
    #[n(3)]
    pub bio: String,
    #[n(4)]
    pub years_experience: u32,
    #[n(5)]
    pub verification_status: VerificationStatus,
    #[n(6)]
    pub registered_on: TimeStamp,
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Service {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub base_price: u64, // minor currency units
    #[n(3)]
    pub estimated_minutes: Option<u32>,
    #[n(4)]
    pub description: String,
    #[n(5)]
    pub is_active: bool,
    #[n(6)]
    pub created_at: TimeStamp,
}
