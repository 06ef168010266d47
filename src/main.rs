use anyhow::Result;
use axum::Router;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use storefront_service::{
    api::Upstreams,
    core::{
        app_state::AppState,
        bootstrap::{self, bootstrap},
        config, db, swagger,
    },
    routes,
};

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_env();
    bootstrap::init_tracing();

    let config = config::load()?;

    let (routes, mut openapi) = routes::routes_with_openapi().split_for_parts();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("Storefront Service API")
        .version("1.0.0")
        .build();
    let swagger_ui = swagger::create_swagger_ui(openapi)?;

    tracing::info!("Running migrations...");
    let migrations_count = db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    let db_pool = db::connect(&config.database.url, config.database.max_connections).await?;
    let upstreams = Upstreams::init(&config)?;
    let server = config.server.clone();
    let state = AppState::new(db_pool, upstreams, config);

    let app = Router::new().merge(routes.with_state(state)).merge(swagger_ui);

    tracing::info!("Bootstrapping...");
    bootstrap("StorefrontService", app, &server).await?;
    Ok(())
}
