use diesel::{
    BoolExpressionMethods, ExpressionMethods, PgTextExpressionMethods, QueryDsl, SelectableHelper,
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{core::app_error::AppError, models::ProductEntity, schema::products};

#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct ProductSummary {
    pub id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub category: String,
    pub brand: String,
}

impl From<ProductEntity> for ProductSummary {
    fn from(product: ProductEntity) -> Self {
        Self {
            id: product.id,
            name: product.name,
            price_cents: product.price_cents,
            category: product.category,
            brand: product.brand,
        }
    }
}

/// `%term%` with LIKE metacharacters escaped, so the term matches literally.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.trim().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Listed products whose name, category or brand contains `term`, ignoring
/// case. Each product appears once. An empty term matches every product.
pub async fn search(
    conn: &mut AsyncPgConnection,
    term: &str,
) -> Result<Vec<ProductSummary>, AppError> {
    let pattern = like_pattern(term);

    let found: Vec<ProductEntity> = products::table
        .filter(ProductEntity::is_listed())
        .filter(
            products::name
                .ilike(&pattern)
                .or(products::category.ilike(&pattern))
                .or(products::brand.ilike(&pattern)),
        )
        .order_by(products::name.asc())
        .select(ProductEntity::as_select())
        .load(conn)
        .await?;

    Ok(found.into_iter().map(ProductSummary::from).collect())
}

/// First listed product (alphabetically) whose name contains `term`.
pub async fn find_by_name(conn: &mut AsyncPgConnection, term: &str) -> Result<ProductEntity, AppError> {
    if term.trim().is_empty() {
        return Err(AppError::NotFound);
    }

    let product = products::table
        .filter(ProductEntity::is_listed())
        .filter(products::name.ilike(like_pattern(term)))
        .order_by(products::name.asc())
        .select(ProductEntity::as_select())
        .first(conn)
        .await?;

    Ok(product)
}

pub async fn find_listed(conn: &mut AsyncPgConnection, id: Uuid) -> Result<ProductEntity, AppError> {
    let product = products::table
        .find(id)
        .filter(ProductEntity::is_listed())
        .select(ProductEntity::as_select())
        .first(conn)
        .await?;
    Ok(product)
}
