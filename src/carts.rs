//! Open-cart operations shared by the cart routes and the assistant.
//!
//! A user has at most one open cart. The partial unique index
//! `carts_one_active_per_user` makes get-or-create race free: a concurrent
//! insert loses with `ON CONFLICT DO NOTHING` and then reads the winner's row.

use anyhow::Context;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    core::app_error::AppError,
    models::{
        CartEntity, CartItemEntity, CreateCartEntity, CreateCartItemEntity, Lifecycle, ProductEntity,
    },
    schema::{cart_items, carts, products, users},
};

#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CartView {
    pub cart: CartEntity,
    pub lines: Vec<CartLine>,
}

pub async fn find_open_cart(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
) -> Result<Option<CartEntity>, AppError> {
    let cart = carts::table
        .filter(CartEntity::is_open())
        .filter(carts::user_id.eq(user_id))
        .select(CartEntity::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(cart)
}

/// Same as [`find_open_cart`] but takes a row lock for the rest of the transaction.
pub async fn lock_open_cart(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
) -> Result<CartEntity, AppError> {
    let cart = carts::table
        .filter(CartEntity::is_open())
        .filter(carts::user_id.eq(user_id))
        .select(CartEntity::as_select())
        .for_update()
        .first(conn)
        .await?;
    Ok(cart)
}

/// The caller must be a known, active user.
pub async fn ensure_active_user(conn: &mut AsyncPgConnection, user_id: Uuid) -> Result<(), AppError> {
    users::table
        .find(user_id)
        .filter(users::is_active.eq(true))
        .select(users::id)
        .first::<Uuid>(conn)
        .await?;
    Ok(())
}

pub async fn get_or_create_open_cart(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
) -> Result<CartEntity, AppError> {
    ensure_active_user(conn, user_id).await?;

    // The insert can conflict with an open cart that a concurrent checkout is
    // closing. Once that commits the lock below finds nothing, and a second
    // insert opens the replacement cart.
    let mut retried = false;
    loop {
        let inserted = diesel::insert_into(carts::table)
            .values(CreateCartEntity {
                user_id,
                total_price_cents: 0,
            })
            .on_conflict_do_nothing()
            .execute(conn)
            .await
            .context("Failed to create cart")?;

        if inserted > 0 {
            tracing::info!("Opened a new cart for user {}", user_id);
        }

        match lock_open_cart(conn, user_id).await {
            Err(AppError::NotFound) if inserted == 0 && !retried => {
                tracing::debug!("Open cart of user {} was closed concurrently", user_id);
                retried = true;
            }
            result => return result,
        }
    }
}

pub async fn cart_lines(
    conn: &mut AsyncPgConnection,
    cart_id: Uuid,
) -> Result<Vec<CartLine>, AppError> {
    let rows: Vec<(CartItemEntity, ProductEntity)> = cart_items::table
        .inner_join(products::table)
        .filter(cart_items::cart_id.eq(cart_id))
        .order_by(products::name.asc())
        .select((CartItemEntity::as_select(), ProductEntity::as_select()))
        .load(conn)
        .await
        .context("Failed to get cart items")?;

    Ok(rows
        .into_iter()
        .map(|(item, product)| CartLine {
            product_id: product.id,
            product_name: product.name,
            quantity: item.quantity,
            unit_price_cents: product.price_cents,
        })
        .collect())
}

/// Names of products in the cart that have been soft-deleted since they were added.
pub async fn delisted_products(
    conn: &mut AsyncPgConnection,
    cart_id: Uuid,
) -> Result<Vec<String>, AppError> {
    let names = cart_items::table
        .inner_join(products::table)
        .filter(cart_items::cart_id.eq(cart_id))
        .filter(products::lifecycle.ne(Lifecycle::Active.as_str()))
        .order_by(products::name.asc())
        .select(products::name)
        .load(conn)
        .await
        .context("Failed to check cart products")?;
    Ok(names)
}

pub async fn view_open_cart(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
) -> Result<Option<CartView>, AppError> {
    let Some(cart) = find_open_cart(conn, user_id).await? else {
        return Ok(None);
    };
    let lines = cart_lines(conn, cart.id).await?;
    Ok(Some(CartView { cart, lines }))
}

/// Adds `quantity` units of `product` to the user's open cart, opening one if
/// needed. Quantities accumulate on an existing line and the cart total grows
/// by the product's current price.
pub async fn add_product(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
    product: &ProductEntity,
    quantity: i32,
) -> Result<CartItemEntity, AppError> {
    if quantity <= 0 {
        return Err(AppError::BadRequest("Quantity must be positive".into()));
    }

    let product_id = product.id;
    let added_cents = product.price_cents * i64::from(quantity);

    conn.transaction(move |conn| {
        Box::pin(async move {
            let cart = get_or_create_open_cart(conn, user_id).await?;

            let item = diesel::insert_into(cart_items::table)
                .values(CreateCartItemEntity {
                    cart_id: cart.id,
                    product_id,
                    quantity,
                })
                .on_conflict((cart_items::cart_id, cart_items::product_id))
                .do_update()
                .set((
                    cart_items::quantity.eq(cart_items::quantity + quantity),
                    cart_items::updated_at.eq(diesel::dsl::now),
                ))
                .returning(CartItemEntity::as_returning())
                .get_result(conn)
                .await
                .context("Failed to upsert cart item")?;

            diesel::update(carts::table.find(cart.id))
                .set((
                    carts::total_price_cents.eq(carts::total_price_cents + added_cents),
                    carts::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)
                .await
                .context("Failed to update cart total")?;

            Ok::<CartItemEntity, AppError>(item)
        })
    })
    .await
}

/// Removes a line from the open cart. The total never drops below zero.
pub async fn remove_product(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
    product_id: Uuid,
) -> Result<CartEntity, AppError> {
    conn.transaction(move |conn| {
        Box::pin(async move {
            let cart = lock_open_cart(conn, user_id).await?;

            let removed: CartItemEntity = diesel::delete(
                cart_items::table
                    .filter(cart_items::cart_id.eq(cart.id))
                    .filter(cart_items::product_id.eq(product_id)),
            )
            .returning(CartItemEntity::as_returning())
            .get_result(conn)
            .await?;

            let unit_price: i64 = products::table
                .find(product_id)
                .select(products::price_cents)
                .get_result(conn)
                .await
                .context("Failed to get product price")?;

            let total = (cart.total_price_cents - unit_price * i64::from(removed.quantity)).max(0);

            let cart = diesel::update(carts::table.find(cart.id))
                .set((
                    carts::total_price_cents.eq(total),
                    carts::updated_at.eq(diesel::dsl::now),
                ))
                .returning(CartEntity::as_returning())
                .get_result(conn)
                .await
                .context("Failed to update cart total")?;

            Ok::<CartEntity, AppError>(cart)
        })
    })
    .await
}

/// Closes an open cart so that it can never be mutated or checked out again.
pub async fn soft_delete(conn: &mut AsyncPgConnection, cart_id: Uuid) -> Result<CartEntity, AppError> {
    diesel::update(carts::table.find(cart_id))
        .filter(CartEntity::is_open())
        .set((
            carts::lifecycle.eq(Lifecycle::Deleted.as_str()),
            carts::deleted_at.eq(diesel::dsl::now),
            carts::updated_at.eq(diesel::dsl::now),
        ))
        .returning(CartEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::Conflict("Cart is already closed".into()))
}

pub async fn delete_open_cart(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
) -> Result<CartEntity, AppError> {
    conn.transaction(move |conn| {
        Box::pin(async move {
            let cart = lock_open_cart(conn, user_id).await?;
            soft_delete(conn, cart.id).await
        })
    })
    .await
}
