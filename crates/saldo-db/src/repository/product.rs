//! # Product Repository
//!
//! Database operations for the product catalog.
//!
//! The engine reads products for pricing defaults (list price, tax rate)
//! and as step 3 of the COGS fallback chain (list cost). Catalog
//! management itself is thin: the interesting state lives in `inventory`.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use saldo_core::Product;

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
///
/// // Get by SKU
/// let product = repo.get_by_sku("t1", "WIDGET-1").await?;
///
/// // Get by ID
/// let product = repo.get_by_id("t1", "uuid-here").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

const PRODUCT_COLUMNS: &str = "id, tenant_id, sku, name, price_cents, list_cost_cents, \
     tax_rate_bps, is_active, created_at, updated_at";

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by its ID.
    ///
    /// ## Arguments
    /// * `tenant_id` - Owning tenant
    /// * `id` - Product UUID
    ///
    /// ## Returns
    /// * `Ok(Some(Product))` - Product found
    /// * `Ok(None)` - Product not found
    pub async fn get_by_id(&self, tenant_id: &str, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = ?1 AND id = ?2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets a product by its SKU.
    ///
    /// ## Arguments
    /// * `tenant_id` - Owning tenant
    /// * `sku` - Product SKU (e.g., "WIDGET-1")
    pub async fn get_by_sku(&self, tenant_id: &str, sku: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = ?1 AND sku = ?2"
        ))
        .bind(tenant_id)
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Lists active products sorted by name.
    pub async fn list_active(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE tenant_id = ?1 AND is_active = 1 \
             ORDER BY name LIMIT ?2"
        ))
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Counts active products (for diagnostics).
    pub async fn count(&self, tenant_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM products WHERE tenant_id = ?1 AND is_active = 1",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // =========================================================================
    // Unit-of-work functions
    // =========================================================================

    /// Loads a product inside an open unit of work.
    ///
    /// The coordinator's pre-validation reads may be stale by the time the
    /// transaction opens; in-work reads are the authoritative ones.
    pub async fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = ?1 AND id = ?2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(product)
    }

    /// Inserts a new product.
    ///
    /// ## Arguments
    /// * `product` - Product to insert (id generated beforehand)
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - SKU already exists for the tenant
    pub async fn insert(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
        debug!(sku = %product.sku, "Inserting product");

        sqlx::query(
            "INSERT INTO products (\
                 id, tenant_id, sku, name, price_cents, list_cost_cents, \
                 tax_rate_bps, is_active, created_at, updated_at\
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&product.id)
        .bind(&product.tenant_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.list_cost_cents)
        .bind(product.tax_rate_bps)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Soft-deletes a product by setting is_active = false.
    ///
    /// Historical orders still reference the row, so products are never
    /// hard-deleted.
    pub async fn deactivate(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> DbResult<()> {
        debug!(id = %id, "Deactivating product");

        let result = sqlx::query(
            "UPDATE products SET is_active = 0, updated_at = ?3 \
             WHERE tenant_id = ?1 AND id = ?2",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use saldo_core::Money;

    fn sample_product(tenant: &str, sku: &str) -> Product {
        let now = Utc::now();
        Product {
            id: crate::repository::new_id(),
            tenant_id: tenant.to_string(),
            sku: sku.to_string(),
            name: format!("Product {sku}"),
            price_cents: 1000,
            list_cost_cents: Some(600),
            tax_rate_bps: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = sample_product("t1", "WIDGET-1");

        let mut uow = db.begin().await.unwrap();
        ProductRepository::insert(uow.conn(), &product).await.unwrap();
        uow.commit().await.unwrap();

        let found = db
            .products()
            .get_by_sku("t1", "WIDGET-1")
            .await
            .unwrap()
            .expect("product should exist");
        assert_eq!(found.id, product.id);
        assert_eq!(found.price(), Money::from_cents(1000));
        assert_eq!(found.list_cost(), Some(Money::from_cents(600)));

        // Different tenant must not see it
        assert!(db
            .products()
            .get_by_sku("t2", "WIDGET-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_sku_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        ProductRepository::insert(uow.conn(), &sample_product("t1", "WIDGET-1"))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let mut uow = db.begin().await.unwrap();
        let err = ProductRepository::insert(uow.conn(), &sample_product("t1", "WIDGET-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_count_is_tenant_scoped() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        ProductRepository::insert(uow.conn(), &sample_product("t1", "WIDGET-1"))
            .await
            .unwrap();
        ProductRepository::insert(uow.conn(), &sample_product("t1", "WIDGET-2"))
            .await
            .unwrap();
        ProductRepository::insert(uow.conn(), &sample_product("t2", "WIDGET-1"))
            .await
            .unwrap();
        let discontinued = Product {
            is_active: false,
            ..sample_product("t1", "WIDGET-3")
        };
        ProductRepository::insert(uow.conn(), &discontinued).await.unwrap();
        uow.commit().await.unwrap();

        // Active products of the requested tenant only
        assert_eq!(db.products().count("t1").await.unwrap(), 2);
        assert_eq!(db.products().count("t2").await.unwrap(), 1);
        assert_eq!(db.products().count("t3").await.unwrap(), 0);
    }
}
