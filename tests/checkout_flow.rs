//! End-to-end checks against a real PostgreSQL database.
//!
//! Set `TEST_DATABASE_URL` to a scratch database to run them; without it every
//! test returns early.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use storefront_service::{
    api::{
        Upstreams,
        classifier::IntentClassifier,
        payments::{INTENT_SUCCEEDED, PaymentIntent, PaymentProcessor},
        push::PushGateway,
    },
    carts,
    catalog,
    checkout::{self, CheckoutRequest, PaymentMode},
    core::{
        app_error::AppError,
        app_state::AppState,
        config::{
            AppConfig, AssistantConfig, CheckoutConfig, ClassifierConfig, DatabaseConfig,
            PaymentsConfig, PushConfig, ServerConfig,
        },
        db,
    },
    models::{Lifecycle, NotificationEntity, PaymentEntity, ProductEntity, Role},
    schema::{branches, invoices, notifications, orders, payments, products, stocks, users},
    settlement::{self, Billing},
};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static MIGRATED: OnceCell<()> = OnceCell::const_new();

struct Unused;

#[async_trait]
impl IntentClassifier for Unused {
    async fn classify(&self, _utterance: &str) -> Result<String, AppError> {
        Err(AppError::ServiceUnreachable("IntentClassifier".into()))
    }
}

#[async_trait]
impl PushGateway for Unused {
    async fn send(&self, _device_token: &str, _title: &str, _body: &str) -> Result<(), AppError> {
        Ok(())
    }
}

/// Records every processor call. Hands out `fixed_id` when set and unique ids
/// otherwise, and reports `status` (succeeded by default) on retrieval.
#[derive(Default)]
struct Recording {
    fixed_id: Option<String>,
    status: Option<&'static str>,
    delay: Option<Duration>,
    retrieved: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
}

#[async_trait]
impl PaymentProcessor for Recording {
    fn provider(&self) -> &'static str {
        "test"
    }

    async fn create_intent(
        &self,
        _amount_cents: i64,
        _currency: &str,
        _metadata: Vec<(String, String)>,
    ) -> Result<PaymentIntent, AppError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let id = self
            .fixed_id
            .clone()
            .unwrap_or_else(|| format!("pi_{}", Uuid::new_v4().simple()));
        Ok(PaymentIntent {
            id,
            client_secret: Some("secret".into()),
            status: "requires_payment_method".into(),
        })
    }

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, AppError> {
        self.retrieved.lock().push(id.to_string());
        Ok(PaymentIntent {
            id: id.to_string(),
            client_secret: None,
            status: self.status.unwrap_or(INTENT_SUCCEEDED).into(),
        })
    }

    async fn cancel_intent(&self, id: &str) -> Result<(), AppError> {
        self.cancelled.lock().push(id.to_string());
        Ok(())
    }
}

async fn state() -> Option<AppState> {
    state_with(Arc::new(Recording::default())).await
}

async fn state_with(payments: Arc<dyn PaymentProcessor>) -> Option<AppState> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set, skipping");
            return None;
        }
    };

    MIGRATED
        .get_or_init(|| async {
            db::run_migrations_blocking(MIGRATIONS, &url).await.unwrap();
        })
        .await;

    let config = AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        database: DatabaseConfig {
            url: url.clone(),
            max_connections: 4,
        },
        classifier: ClassifierConfig {
            url: String::new(),
            api_key: String::new(),
            model: String::new(),
            timeout: Duration::from_secs(1),
        },
        payments: PaymentsConfig {
            url: String::new(),
            secret_key: String::new(),
            currency: "usd".into(),
            timeout: Duration::from_secs(1),
        },
        push: PushConfig {
            url: String::new(),
            server_key: String::new(),
            timeout: Duration::from_secs(1),
        },
        assistant: AssistantConfig {
            pending_intent_ttl: Duration::from_secs(60),
        },
        checkout: CheckoutConfig {
            low_stock_threshold: 5,
        },
    };

    let pool = db::connect(&url, config.database.max_connections)
        .await
        .unwrap();
    let upstreams = Upstreams {
        classifier: Arc::new(Unused),
        payments,
        push: Arc::new(Unused),
    };
    Some(AppState::new(pool, upstreams, config))
}

async fn seed_user(conn: &mut AsyncPgConnection, role: Role) -> Uuid {
    diesel::insert_into(users::table)
        .values((
            users::name.eq("Test user"),
            users::email.eq(format!("{}@example.com", Uuid::new_v4())),
            users::role.eq(role.as_str()),
        ))
        .returning(users::id)
        .get_result(conn)
        .await
        .unwrap()
}

/// A listed product with a single stock row holding `quantity` units.
async fn seed_product(conn: &mut AsyncPgConnection, price_cents: i64, quantity: i32) -> ProductEntity {
    let name = format!("Producto {}", Uuid::new_v4().simple());
    seed_listing(conn, &name, "Audio", "Acme", price_cents, quantity).await
}

async fn seed_listing(
    conn: &mut AsyncPgConnection,
    name: &str,
    category: &str,
    brand: &str,
    price_cents: i64,
    quantity: i32,
) -> ProductEntity {
    let product: ProductEntity = diesel::insert_into(products::table)
        .values((
            products::name.eq(name),
            products::category.eq(category),
            products::brand.eq(brand),
            products::price_cents.eq(price_cents),
        ))
        .returning(ProductEntity::as_returning())
        .get_result(conn)
        .await
        .unwrap();

    let branch_id: Uuid = diesel::insert_into(branches::table)
        .values(branches::name.eq("Central"))
        .returning(branches::id)
        .get_result(conn)
        .await
        .unwrap();

    diesel::insert_into(stocks::table)
        .values((
            stocks::product_id.eq(product.id),
            stocks::branch_id.eq(branch_id),
            stocks::quantity.eq(quantity),
        ))
        .execute(conn)
        .await
        .unwrap();

    product
}

async fn delist(conn: &mut AsyncPgConnection, product_id: Uuid) {
    diesel::update(products::table.find(product_id))
        .set(products::lifecycle.eq(Lifecycle::Deleted.as_str()))
        .execute(conn)
        .await
        .unwrap();
}

async fn stock_of(conn: &mut AsyncPgConnection, product_id: Uuid) -> i32 {
    stocks::table
        .filter(stocks::product_id.eq(product_id))
        .select(stocks::quantity)
        .first(conn)
        .await
        .unwrap()
}

async fn orders_of(conn: &mut AsyncPgConnection, user_id: Uuid) -> i64 {
    orders::table
        .filter(orders::user_id.eq(user_id))
        .count()
        .get_result(conn)
        .await
        .unwrap()
}

fn manual(user_id: Uuid) -> CheckoutRequest {
    CheckoutRequest {
        user_id,
        shipping_method_id: None,
        mode: PaymentMode::Manual,
    }
}

fn deferred(user_id: Uuid) -> CheckoutRequest {
    CheckoutRequest {
        user_id,
        shipping_method_id: None,
        mode: PaymentMode::Deferred,
    }
}

#[tokio::test]
async fn repeated_adds_accumulate_quantity_and_total() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let user_id = seed_user(conn, Role::Customer).await;
    let product = seed_product(conn, 1_250, 10).await;

    carts::add_product(conn, user_id, &product, 1).await.unwrap();
    carts::add_product(conn, user_id, &product, 1).await.unwrap();

    let view = carts::view_open_cart(conn, user_id).await.unwrap().unwrap();
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.lines[0].quantity, 2);
    assert_eq!(view.cart.total_price_cents, 2_500);
}

#[tokio::test]
async fn last_unit_goes_to_exactly_one_checkout() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let product = seed_product(conn, 999, 1).await;
    let first = seed_user(conn, Role::Customer).await;
    let second = seed_user(conn, Role::Customer).await;
    carts::add_product(conn, first, &product, 1).await.unwrap();
    carts::add_product(conn, second, &product, 1).await.unwrap();

    let (a, b) = tokio::join!(
        checkout::checkout(&state, manual(first)),
        checkout::checkout(&state, manual(second)),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|outcome| matches!(
        outcome,
        Err(AppError::InsufficientStock {
            requested: 1,
            available: 0,
            ..
        })
    )));

    assert_eq!(stock_of(conn, product.id).await, 0);
}

#[tokio::test]
async fn checkout_closes_the_cart_and_snapshots_prices() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let user_id = seed_user(conn, Role::Customer).await;
    let product = seed_product(conn, 300, 20).await;
    carts::add_product(conn, user_id, &product, 3).await.unwrap();

    let receipt = checkout::checkout(&state, manual(user_id)).await.unwrap();

    assert_eq!(receipt.order.total_price_cents, 900);
    assert_eq!(receipt.order_items[0].unit_price_cents, 300);
    assert!(carts::find_open_cart(conn, user_id).await.unwrap().is_none());

    let again = checkout::checkout(&state, manual(user_id)).await;
    assert!(matches!(again, Err(AppError::NotFound)));
}

#[tokio::test]
async fn low_stock_notifies_admins() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let admin = seed_user(conn, Role::Admin).await;
    let customer = seed_user(conn, Role::Customer).await;
    let product = seed_product(conn, 100, 6).await;
    carts::add_product(conn, customer, &product, 2).await.unwrap();

    let receipt = checkout::checkout(&state, manual(customer)).await.unwrap();
    assert_eq!(receipt.low_stock.len(), 1);
    assert_eq!(receipt.low_stock[0].remaining, 4);

    let received: Vec<NotificationEntity> = notifications::table
        .filter(notifications::user_id.eq(admin))
        .select(NotificationEntity::as_select())
        .load(conn)
        .await
        .unwrap();
    assert!(
        received
            .iter()
            .any(|notification| notification.message.contains(&product.name))
    );
}

#[tokio::test]
async fn settling_twice_issues_one_invoice() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let user_id = seed_user(conn, Role::Customer).await;
    let product = seed_product(conn, 4_000, 10).await;
    carts::add_product(conn, user_id, &product, 1).await.unwrap();

    let receipt = checkout::checkout(&state, deferred(user_id)).await.unwrap();
    assert_eq!(receipt.order.status, "PENDING");
    let provider_ref = receipt.payment.provider_ref.clone().unwrap();

    let first = settlement::settle(&state, &provider_ref, Billing::default())
        .await
        .unwrap();
    let second = settlement::settle(&state, &provider_ref, Billing::default())
        .await
        .unwrap();

    assert!(!first.already_settled);
    assert!(second.already_settled);
    assert_eq!(first.order.status, "PAID");
    assert_eq!(first.invoice.id, second.invoice.id);
    assert_eq!(first.invoice.total_amount_cents, 4_000);

    let issued: i64 = invoices::table
        .filter(invoices::order_id.eq(receipt.order.id))
        .count()
        .get_result(conn)
        .await
        .unwrap();
    assert_eq!(issued, 1);
}

#[tokio::test]
async fn unknown_or_inactive_users_cannot_open_a_cart() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let product = seed_product(conn, 500, 10).await;

    let stranger = carts::add_product(conn, Uuid::new_v4(), &product, 1).await;
    assert!(matches!(stranger, Err(AppError::NotFound)));

    let inactive = seed_user(conn, Role::Customer).await;
    diesel::update(users::table.find(inactive))
        .set(users::is_active.eq(false))
        .execute(conn)
        .await
        .unwrap();
    let refused = carts::add_product(conn, inactive, &product, 1).await;
    assert!(matches!(refused, Err(AppError::NotFound)));
    assert!(carts::find_open_cart(conn, inactive).await.unwrap().is_none());
}

#[tokio::test]
async fn delisted_products_block_checkout() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let user_id = seed_user(conn, Role::Customer).await;
    let product = seed_product(conn, 700, 10).await;
    carts::add_product(conn, user_id, &product, 1).await.unwrap();
    delist(conn, product.id).await;

    let outcome = checkout::checkout(&state, manual(user_id)).await;

    assert!(matches!(outcome, Err(AppError::Conflict(message)) if message.contains(&product.name)));
    assert!(carts::find_open_cart(conn, user_id).await.unwrap().is_some());
    assert_eq!(orders_of(conn, user_id).await, 0);
    assert_eq!(stock_of(conn, product.id).await, 10);
}

#[tokio::test]
async fn add_after_a_concurrent_close_opens_a_fresh_cart() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let user_id = seed_user(conn, Role::Customer).await;
    let product = seed_product(conn, 200, 10).await;
    carts::add_product(conn, user_id, &product, 1).await.unwrap();

    let mut holder = state.db_pool.get().await.unwrap();
    let mut adder = state.db_pool.get().await.unwrap();

    // The first transaction closes the cart while the add is waiting on its lock.
    let closing = holder.transaction(move |conn| {
        Box::pin(async move {
            let cart = carts::lock_open_cart(conn, user_id).await?;
            tokio::time::sleep(Duration::from_millis(300)).await;
            carts::soft_delete(conn, cart.id).await?;
            Ok::<Uuid, AppError>(cart.id)
        })
    });
    let adding = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        carts::add_product(&mut adder, user_id, &product, 2).await
    };

    let (closed, added) = tokio::join!(closing, adding);
    let closed = closed.unwrap();
    let added = added.unwrap();

    assert_ne!(added.cart_id, closed);
    let view = carts::view_open_cart(conn, user_id).await.unwrap().unwrap();
    assert_eq!(view.cart.id, added.cart_id);
    assert_eq!(view.lines[0].quantity, 2);
    assert_eq!(view.cart.total_price_cents, 400);
}

#[tokio::test]
async fn unknown_references_never_reach_the_processor() {
    let processor = Arc::new(Recording::default());
    let Some(state) = state_with(processor.clone()).await else { return };

    for reference in ["pi_unknown", "../../v1/customers", "pi_1/cancel"] {
        let outcome = settlement::settle(&state, reference, Billing::default()).await;
        assert!(matches!(outcome, Err(AppError::NotFound)));
    }
    assert!(processor.retrieved.lock().is_empty());
}

#[tokio::test]
async fn unfinished_payments_stay_pending() {
    let processor = Arc::new(Recording {
        status: Some("processing"),
        ..Default::default()
    });
    let Some(state) = state_with(processor.clone()).await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let user_id = seed_user(conn, Role::Customer).await;
    let product = seed_product(conn, 1_000, 10).await;
    carts::add_product(conn, user_id, &product, 1).await.unwrap();
    let receipt = checkout::checkout(&state, deferred(user_id)).await.unwrap();
    let provider_ref = receipt.payment.provider_ref.clone().unwrap();

    let outcome = settlement::settle(&state, &provider_ref, Billing::default()).await;

    assert!(matches!(outcome, Err(AppError::BadRequest(_))));
    assert_eq!(*processor.retrieved.lock(), vec![provider_ref]);
    let payment: PaymentEntity = payments::table
        .find(receipt.payment.id)
        .select(PaymentEntity::as_select())
        .first(conn)
        .await
        .unwrap();
    assert_eq!(payment.state, "PENDING");
}

#[tokio::test]
async fn search_matches_name_category_or_brand_once() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let token = Uuid::new_v4().simple().to_string();
    let by_name = seed_listing(conn, &format!("Parlante {token}"), "Audio", "Acme", 100, 1).await;
    let by_category = seed_listing(
        conn,
        &format!("Cable {}", Uuid::new_v4().simple()),
        &format!("Cat {token}"),
        "Acme",
        100,
        1,
    )
    .await;
    let by_both = seed_listing(
        conn,
        &format!("Auricular {token}"),
        "Audio",
        &format!("{token} Labs"),
        100,
        1,
    )
    .await;
    let hidden = seed_listing(conn, &format!("Viejo {token}"), "Audio", "Acme", 100, 1).await;
    delist(conn, hidden.id).await;

    let found = catalog::search(conn, &token.to_uppercase()).await.unwrap();
    let ids: Vec<Uuid> = found.iter().map(|product| product.id).collect();
    assert_eq!(ids, vec![by_both.id, by_category.id, by_name.id]);

    let everything = catalog::search(conn, "").await.unwrap();
    let ids: Vec<Uuid> = everything.iter().map(|product| product.id).collect();
    assert!(ids.contains(&by_name.id) && ids.contains(&by_category.id) && ids.contains(&by_both.id));
    assert!(!ids.contains(&hidden.id));
}

#[tokio::test]
async fn insufficient_stock_changes_nothing() {
    let Some(state) = state().await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let user_id = seed_user(conn, Role::Customer).await;
    let product = seed_product(conn, 800, 1).await;
    carts::add_product(conn, user_id, &product, 2).await.unwrap();

    let outcome = checkout::checkout(&state, manual(user_id)).await;

    assert!(matches!(
        outcome,
        Err(AppError::InsufficientStock {
            requested: 2,
            available: 1,
            ..
        })
    ));
    let view = carts::view_open_cart(conn, user_id).await.unwrap().unwrap();
    assert_eq!(view.lines[0].quantity, 2);
    assert_eq!(stock_of(conn, product.id).await, 1);
    assert_eq!(orders_of(conn, user_id).await, 0);
}

#[tokio::test]
async fn failed_checkout_cancels_its_intent() {
    let intent_id = format!("pi_{}", Uuid::new_v4().simple());
    let processor = Arc::new(Recording {
        fixed_id: Some(intent_id.clone()),
        ..Default::default()
    });
    let Some(state) = state_with(processor.clone()).await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let product = seed_product(conn, 150, 10).await;
    let first = seed_user(conn, Role::Customer).await;
    let second = seed_user(conn, Role::Customer).await;
    carts::add_product(conn, first, &product, 1).await.unwrap();
    carts::add_product(conn, second, &product, 1).await.unwrap();

    checkout::checkout(&state, deferred(first)).await.unwrap();
    assert!(processor.cancelled.lock().is_empty());

    // The processor reuses the reference, so recording the second payment fails.
    let outcome = checkout::checkout(&state, deferred(second)).await;

    assert!(outcome.is_err());
    assert_eq!(*processor.cancelled.lock(), vec![intent_id]);
    assert!(carts::find_open_cart(conn, second).await.unwrap().is_some());
    assert_eq!(orders_of(conn, second).await, 0);
    assert_eq!(stock_of(conn, product.id).await, 9);
}

#[tokio::test]
async fn cart_changed_while_quoting_is_refused() {
    let processor = Arc::new(Recording {
        delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let Some(state) = state_with(processor.clone()).await else { return };
    let conn = &mut state.db_pool.get().await.unwrap();

    let user_id = seed_user(conn, Role::Customer).await;
    let product = seed_product(conn, 250, 10).await;
    carts::add_product(conn, user_id, &product, 1).await.unwrap();

    let mut adder = state.db_pool.get().await.unwrap();
    let adding = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        carts::add_product(&mut adder, user_id, &product, 1).await
    };
    let (outcome, added) = tokio::join!(checkout::checkout(&state, deferred(user_id)), adding);

    added.unwrap();
    assert!(matches!(outcome, Err(AppError::Conflict(_))));
    assert_eq!(processor.cancelled.lock().len(), 1);
    let view = carts::view_open_cart(conn, user_id).await.unwrap().unwrap();
    assert_eq!(view.lines[0].quantity, 2);
    assert_eq!(stock_of(conn, product.id).await, 10);
}
