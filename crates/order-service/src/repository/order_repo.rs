//! 订单仓储的 PostgreSQL 实现
//!
//! 订单头与行项目分两张表存储，行项目通过自增主键保持插入顺序。
//! 状态迁移使用条件 UPDATE 在数据库层实施终态保护，
//! 并发的对账事件在行级锁上自然串行化。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::debug;

use super::traits::{OrderRepositoryTrait, StatusTransition};
use crate::error::{OrderError, Result};
use crate::models::{Order, OrderItem, OrderStatus};

/// 分页查询的默认页大小
const DEFAULT_PAGE_SIZE: i32 = 10;

/// 订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

/// orders 表的行结构
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    user_id: String,
    address: String,
    currency: String,
    amount: Decimal,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// order_items 表的行结构
#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: String,
    product_id: String,
    quantity: i32,
    unit_price: Decimal,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Order {
        Order {
            id: self.id,
            user_id: self.user_id,
            items,
            address: self.address,
            currency: self.currency,
            amount: self.amount,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按订单 ID 批量加载行项目，按插入顺序分组
    async fn load_items(&self, order_ids: &[String]) -> Result<HashMap<String, Vec<OrderItem>>> {
        if order_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT order_id, product_id, quantity, unit_price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<String, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            grouped.entry(row.order_id).or_default().push(OrderItem {
                product_id: row.product_id,
                quantity: row.quantity,
                unit_price: row.unit_price,
            });
        }

        Ok(grouped)
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn save(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let insert_result = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, address, currency, amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&order.id)
        .bind(&order.user_id)
        .bind(&order.address)
        .bind(&order.currency)
        .bind(order.amount)
        .bind(order.status)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert_result {
            if let sqlx::Error::Database(db_err) = &e
                && db_err.is_unique_violation()
            {
                return Err(OrderError::Conflict(order.id.clone()));
            }
            return Err(e.into());
        }

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&order.id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(order_id = %order.id, items = order.items.len(), "订单已落库");
        Ok(())
    }

    async fn transition_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<StatusTransition> {
        // 条件更新：只有非终态订单会被修改。数据库在被命中的行上持有
        // 写锁，同一订单的并发迁移串行执行，终态一经写入不可再改。
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = $3
            WHERE id = $1 AND status NOT IN ('PAID', 'FAILED', 'COMPLETE')
            "#,
        )
        .bind(order_id)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(StatusTransition::Applied);
        }

        // 未命中：要么订单不存在，要么已处于终态
        let current: Option<(OrderStatus,)> =
            sqlx::query_as("SELECT status FROM orders WHERE id = $1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            Some(_) => Ok(StatusTransition::SkippedTerminal),
            None => Err(OrderError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn find_by_id(&self, order_id: &str) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, address, currency, amount, status, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))?;

        let mut items = self.load_items(std::slice::from_ref(&row.id)).await?;
        let order_items = items.remove(&row.id).unwrap_or_default();

        Ok(row.into_order(order_items))
    }

    async fn list_by_user(&self, user_id: &str, page: i32, page_size: i32) -> Result<Vec<Order>> {
        let page_size = if page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        // 页码从 1 开始，偏移量下钳到 0
        let offset = (i64::from(page) - 1).max(0) * i64::from(page_size);

        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, address, currency, amount, status, created_at, updated_at
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let order_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut grouped = self.load_items(&order_ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let items = grouped.remove(&row.id).unwrap_or_default();
                row.into_order(items)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_page_size_applied() {
        // page_size <= 0 时的替换逻辑与偏移量钳制
        let page_size = -5;
        let normalized = if page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        assert_eq!(normalized, 10);
    }

    #[test]
    fn test_offset_clamped_to_zero() {
        for page in [-3, 0, 1] {
            let offset = (i64::from(page) - 1).max(0) * i64::from(DEFAULT_PAGE_SIZE);
            assert!(offset >= 0, "page={page} 的偏移量不应为负");
        }

        // 第 2 页跳过前 10 条
        let offset = (2i64 - 1).max(0) * i64::from(DEFAULT_PAGE_SIZE);
        assert_eq!(offset, 10);
    }

    #[test]
    fn test_order_row_conversion_preserves_fields() {
        let row = OrderRow {
            id: "ord-1".to_string(),
            user_id: "user-1".to_string(),
            address: "解放路 9 号".to_string(),
            currency: "USD".to_string(),
            amount: Decimal::new(2000, 2),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let items = vec![OrderItem {
            product_id: "prod-a".to_string(),
            quantity: 2,
            unit_price: Decimal::new(1000, 2),
        }];

        let order = row.into_order(items);
        assert_eq!(order.id, "ord-1");
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.amount, Decimal::new(2000, 2));
        assert_eq!(order.status, OrderStatus::Pending);
    }
}
