use anyhow::Result;

use super::MarketRepository;
use crate::models::{NewProduct, Product, now_millis};

const PRODUCT_COLUMNS: &str = "id, seller_id, title, description, price, category, created_at";

impl MarketRepository {
    pub async fn create_product(&self, product: &NewProduct) -> Result<Product> {
        let created = sqlx::query_as::<_, Product>(&format!(
            "INSERT INTO products (seller_id, title, description, price, category, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(product.seller_id)
        .bind(&product.title)
        .bind(&product.description)
        .bind(product.price)
        .bind(&product.category)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    pub async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(product)
    }

    /// List products newest-first, optionally restricted to one category.
    pub async fn list_products(&self, category: Option<&str>) -> Result<Vec<Product>> {
        let products = match category {
            Some(category) => {
                sqlx::query_as::<_, Product>(&format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products WHERE category = ?
                     ORDER BY created_at DESC, id DESC"
                ))
                .bind(category)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Product>(&format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at DESC, id DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(products)
    }
}
