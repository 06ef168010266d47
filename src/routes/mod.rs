use utoipa_axum::router::OpenApiRouter;

use crate::core::app_state::AppState;

pub mod assistant;
pub mod payments;
pub mod products;
pub mod shipping_methods;
pub mod users;

/// Every route of the service, with its OpenAPI description.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    assistant::routes_with_openapi()
        .merge(users::carts::routes_with_openapi())
        .merge(users::orders::routes_with_openapi())
        .merge(users::notifications::routes_with_openapi())
        .merge(payments::routes_with_openapi())
        .merge(products::routes_with_openapi())
        .merge(shipping_methods::routes_with_openapi())
}
