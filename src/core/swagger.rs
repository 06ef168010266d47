use anyhow::Result;
use utoipa::openapi::{
    OpenApi,
    security::{ApiKey, ApiKeyValue, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::core::middleware::USER_ID_HEADER;

/// Name of the security scheme referenced by `security(...)` in route annotations.
pub const USER_SECURITY: &str = "userHeader";

pub fn create_swagger_ui(mut openapi: OpenApi) -> Result<SwaggerUi> {
    openapi
        .components
        .get_or_insert_with(Default::default)
        .add_security_scheme(
            USER_SECURITY,
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(USER_ID_HEADER))),
        );

    Ok(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
}
