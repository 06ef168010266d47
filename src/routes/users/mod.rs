//! Routes scoped to the authenticated user. All of them sit behind
//! [`crate::core::middleware::users_authorization`].

pub mod carts;
pub mod notifications;
pub mod orders;
