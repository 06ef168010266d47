pub mod api;
pub mod assistant;
pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod core;
pub mod models;
pub mod routes;
pub mod schema;
pub mod settlement;

#[cfg(test)]
pub(crate) mod testing;
