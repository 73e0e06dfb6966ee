//! Product descriptors frozen into valuation snapshots.
//!
//! The catalog is owned elsewhere; the ledger only reads name, SKU, barcode
//! and category at snapshot time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;

use stockledger_core::{ProductId, TenantId};
use stockledger_inventory::ProductDescriptor;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Tenant-scoped product lookup.
///
/// Products absent from the result are treated as having an empty descriptor.
#[async_trait::async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn describe(
        &self,
        tenant_id: TenantId,
        products: &[ProductId],
    ) -> Result<HashMap<ProductId, ProductDescriptor>, CatalogError>;
}

#[async_trait::async_trait]
impl<C> ProductCatalog for Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    async fn describe(
        &self,
        tenant_id: TenantId,
        products: &[ProductId],
    ) -> Result<HashMap<ProductId, ProductDescriptor>, CatalogError> {
        (**self).describe(tenant_id, products).await
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    inner: RwLock<HashMap<(TenantId, ProductId), ProductDescriptor>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, tenant_id: TenantId, product_id: ProductId, descriptor: ProductDescriptor) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((tenant_id, product_id), descriptor);
        }
    }

    pub fn rename(&self, tenant_id: TenantId, product_id: ProductId, name: impl Into<String>) {
        if let Ok(mut map) = self.inner.write() {
            map.entry((tenant_id, product_id)).or_default().name = name.into();
        }
    }

    pub fn remove(&self, tenant_id: TenantId, product_id: ProductId) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&(tenant_id, product_id));
        }
    }
}

#[async_trait::async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn describe(
        &self,
        tenant_id: TenantId,
        products: &[ProductId],
    ) -> Result<HashMap<ProductId, ProductDescriptor>, CatalogError> {
        let map = self
            .inner
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;

        Ok(products
            .iter()
            .filter_map(|id| map.get(&(tenant_id, *id)).map(|d| (*id, d.clone())))
            .collect())
    }
}

/// Reads the `products` table.
#[derive(Debug, Clone)]
pub struct PostgresProductCatalog {
    pool: Arc<PgPool>,
}

impl PostgresProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl ProductCatalog for PostgresProductCatalog {
    #[instrument(skip(self, products), fields(tenant_id = %tenant_id.as_uuid(), requested = products.len()), err)]
    async fn describe(
        &self,
        tenant_id: TenantId,
        products: &[ProductId],
    ) -> Result<HashMap<ProductId, ProductDescriptor>, CatalogError> {
        let ids: Vec<uuid::Uuid> = products.iter().map(|id| *id.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT id, name, sku, barcode, category_name
            FROM products
            WHERE tenant_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(format!("sqlx error in describe: {e}")))?;

        rows.iter()
            .map(|row| {
                let id: uuid::Uuid = row.try_get("id")?;
                let descriptor = ProductDescriptor {
                    name: row.try_get("name")?,
                    sku: row.try_get("sku")?,
                    barcode: row.try_get("barcode")?,
                    category_name: row.try_get("category_name")?,
                };
                Ok((ProductId::from_uuid(id), descriptor))
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| CatalogError::Unavailable(format!("failed to decode product row: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn describe_returns_only_known_products_of_the_tenant() {
        let catalog = InMemoryProductCatalog::new();
        let tenant_id = TenantId::new();
        let known = ProductId::new();
        catalog.upsert(
            tenant_id,
            known,
            ProductDescriptor {
                name: "Cola 0.5L".to_string(),
                sku: Some("COLA-05".to_string()),
                barcode: None,
                category_name: Some("Drinks".to_string()),
            },
        );

        let found = catalog.describe(tenant_id, &[known, ProductId::new()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&known].name, "Cola 0.5L");

        let other = catalog.describe(TenantId::new(), &[known]).await.unwrap();
        assert!(other.is_empty());
    }
}
