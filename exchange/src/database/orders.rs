use super::{accounts, Database, StoreError};
use chrono::{DateTime, Utc};
use model::order::{ActiveOrder, FulfilledOrder};

pub struct CreateOrder {
    pub seller_id: i64,
    pub service_id: i64,
    pub ask_price: i64,
    pub quantity: i64,
    pub order_expire_time: DateTime<Utc>,
    pub service_expire_time: DateTime<Utc>,
}

/// Parameters for one matching attempt. The matcher fills at most one order
/// per call; partial fulfillment of the bid is expected.
pub struct MatchOrderTx {
    pub buyer_id: i64,
    pub service_id: i64,
    pub bid_price: i64,
    pub bid_quantity: i64,
    pub min_expire_time: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ActiveOrderRow {
    order_id: i64,
    seller_id: i64,
    service_id: i64,
    ask_price: i64,
    quantity: i64,
    order_expire_time: DateTime<Utc>,
    service_expire_time: DateTime<Utc>,
}

impl ActiveOrderRow {
    fn into_order(self) -> ActiveOrder {
        ActiveOrder {
            order_id: self.order_id,
            seller_id: self.seller_id,
            service_id: self.service_id,
            ask_price: self.ask_price,
            quantity: self.quantity,
            order_expire_time: self.order_expire_time,
            service_expire_time: self.service_expire_time,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct FulfilledOrderRow {
    pub order_fulfillment_id: i64,
    pub order_id: i64,
    pub service_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub deal_price: i64,
    pub deal_quantity: i64,
    pub remaining_quantity: i64,
    pub deal_time: DateTime<Utc>,
    pub service_expire_time: DateTime<Utc>,
}

impl FulfilledOrderRow {
    pub(super) fn into_order(self) -> FulfilledOrder {
        FulfilledOrder {
            order_fulfillment_id: self.order_fulfillment_id,
            order_id: self.order_id,
            service_id: self.service_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            deal_price: self.deal_price,
            deal_quantity: self.deal_quantity,
            remaining_quantity: self.remaining_quantity,
            deal_time: self.deal_time,
            service_expire_time: self.service_expire_time,
        }
    }
}

impl Database {
    /// Inserts a sell order. Listing quota for sale has no balance effect.
    pub async fn create_order(&self, params: &CreateOrder) -> Result<ActiveOrder, StoreError> {
        const QUERY: &str = "\
            INSERT INTO active_orders \
                (seller_id, service_id, ask_price, quantity, order_expire_time, service_expire_time) \
            VALUES ($1, $2, $3, $4, $5, $6) \
            RETURNING *;";
        let row: ActiveOrderRow = sqlx::query_as(QUERY)
            .bind(params.seller_id)
            .bind(params.service_id)
            .bind(params.ask_price)
            .bind(params.quantity)
            .bind(params.order_expire_time)
            .bind(params.service_expire_time)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into_order())
    }

    /// Deactivates an order by zeroing its quantity, but only when it belongs
    /// to `seller_id` and is still active.
    pub async fn cancel_order(&self, order_id: i64, seller_id: i64) -> Result<ActiveOrder, StoreError> {
        const QUERY: &str = "\
            UPDATE active_orders SET quantity = 0 \
            WHERE order_id = $1 AND seller_id = $2 AND quantity > 0 AND order_expire_time >= now() \
            RETURNING *;";
        let row: ActiveOrderRow = sqlx::query_as(QUERY)
            .bind(order_id)
            .bind(seller_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.into_order())
    }

    /// Atomically fills the single best matching order: lowest ask price not
    /// above the bid, earliest order id on ties (price-time priority). The
    /// selected row is locked so two concurrent matchers cannot both claim it.
    /// Balance moves buyer -> seller in the same transaction; the buyer's
    /// `balance >= 0` constraint surfaces an overdraft as a constraint error
    /// without any partial state.
    pub async fn match_order_tx(&self, params: &MatchOrderTx) -> Result<FulfilledOrder, StoreError> {
        if params.bid_quantity <= 0 {
            return Err(StoreError::Constraint(format!(
                "expect bid quantity to be positive but got {}",
                params.bid_quantity
            )));
        }
        let mut transaction = self.pool.begin().await?;

        const SELECT_BEST: &str = "\
            SELECT * FROM active_orders \
            WHERE service_id = $1 AND ask_price <= $2 AND quantity > 0 \
                AND order_expire_time >= now() AND service_expire_time >= $3 \
            ORDER BY ask_price ASC, order_id ASC \
            LIMIT 1 \
            FOR UPDATE;";
        let best: ActiveOrderRow = sqlx::query_as(SELECT_BEST)
            .bind(params.service_id)
            .bind(params.bid_price)
            .bind(params.min_expire_time)
            .fetch_optional(&mut transaction)
            .await?
            .ok_or(StoreError::NotFound)?;

        let deal_quantity = params.bid_quantity.min(best.quantity);
        let deal_price = best.ask_price;
        sqlx::query("UPDATE active_orders SET quantity = quantity - $2 WHERE order_id = $1;")
            .bind(best.order_id)
            .bind(deal_quantity)
            .execute(&mut transaction)
            .await?;

        const INSERT_FULFILLMENT: &str = "\
            INSERT INTO fulfilled_orders \
                (order_id, service_id, buyer_id, seller_id, deal_price, deal_quantity, \
                 remaining_quantity, deal_time, service_expire_time) \
            VALUES ($1, $2, $3, $4, $5, $6, $6, now(), $7) \
            RETURNING *;";
        let fulfillment: FulfilledOrderRow = sqlx::query_as(INSERT_FULFILLMENT)
            .bind(best.order_id)
            .bind(best.service_id)
            .bind(params.buyer_id)
            .bind(best.seller_id)
            .bind(deal_price)
            .bind(deal_quantity)
            .bind(best.service_expire_time)
            .fetch_one(&mut transaction)
            .await?;

        let deal_total = deal_price * deal_quantity;
        accounts::change_balance(&mut transaction, params.buyer_id, -deal_total).await?;
        accounts::change_balance(&mut transaction, best.seller_id, deal_total).await?;

        transaction.commit().await?;
        Ok(fulfillment.into_order())
    }

    /// Garbage collection of orders that can never match again.
    pub async fn clean_inactive_orders(&self) -> Result<Vec<ActiveOrder>, StoreError> {
        const QUERY: &str =
            "DELETE FROM active_orders WHERE quantity = 0 OR order_expire_time < now() RETURNING *;";
        let rows: Vec<ActiveOrderRow> = sqlx::query_as(QUERY).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ActiveOrderRow::into_order).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testutil;
    use chrono::{Duration, Utc};

    async fn sell(db: &Database, seller_id: i64, service_id: i64, ask_price: i64, quantity: i64) -> ActiveOrder {
        let expire = Utc::now() + Duration::days(30);
        db.create_order(&CreateOrder {
            seller_id,
            service_id,
            ask_price,
            quantity,
            order_expire_time: expire,
            service_expire_time: expire,
        })
        .await
        .unwrap()
    }

    fn bid(buyer_id: i64, service_id: i64, bid_price: i64, bid_quantity: i64) -> MatchOrderTx {
        MatchOrderTx {
            buyer_id,
            service_id,
            bid_price,
            bid_quantity,
            min_expire_time: Utc::now() + Duration::days(1),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_match_fills_cheapest_order_first() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();
        let seller = testutil::new_account(&db, "seller", 1_000_000).await;
        let buyer = testutil::new_account(&db, "buyer", 1_000_000).await;
        let service = testutil::new_service(&db, "sample service").await;

        sell(&db, seller.account_id, service.service_id, 100, 30).await;
        sell(&db, seller.account_id, service.service_id, 80, 50).await;

        // Bid above the cheaper ask fills at the ask, not at the bid.
        let first = db
            .match_order_tx(&bid(buyer.account_id, service.service_id, 90, 10))
            .await
            .unwrap();
        assert_eq!(first.deal_price, 80);
        assert_eq!(first.deal_quantity, 10);
        assert_eq!(first.remaining_quantity, 10);
        assert_eq!(db.get_account("seller").await.unwrap().balance, 1_000_800);
        assert_eq!(db.get_account("buyer").await.unwrap().balance, 999_200);

        // Only 40 units remain in the cheaper order.
        let second = db
            .match_order_tx(&bid(buyer.account_id, service.service_id, 90, 100))
            .await
            .unwrap();
        assert_eq!(second.deal_price, 80);
        assert_eq!(second.deal_quantity, 40);
        assert_eq!(db.get_account("seller").await.unwrap().balance, 1_004_000);
        assert_eq!(db.get_account("buyer").await.unwrap().balance, 996_000);

        // The cheaper order is exhausted, the pricier one fills next.
        let third = db
            .match_order_tx(&bid(buyer.account_id, service.service_id, 120, 60))
            .await
            .unwrap();
        assert_eq!(third.deal_price, 100);
        assert_eq!(third.deal_quantity, 30);
        assert_eq!(db.get_account("seller").await.unwrap().balance, 1_007_000);
        assert_eq!(db.get_account("buyer").await.unwrap().balance, 993_000);

        // Nothing left to match.
        assert!(matches!(
            db.match_order_tx(&bid(buyer.account_id, service.service_id, 120, 10)).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_match_breaks_price_ties_by_order_id() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();
        let seller = testutil::new_account(&db, "seller", 0).await;
        let buyer = testutil::new_account(&db, "buyer", 1_000).await;
        let service = testutil::new_service(&db, "sample service").await;

        let earlier = sell(&db, seller.account_id, service.service_id, 10, 5).await;
        let _later = sell(&db, seller.account_id, service.service_id, 10, 5).await;

        let fulfillment = db
            .match_order_tx(&bid(buyer.account_id, service.service_id, 10, 3))
            .await
            .unwrap();
        assert_eq!(fulfillment.order_id, earlier.order_id);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_match_with_insufficient_balance_changes_nothing() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();
        let seller = testutil::new_account(&db, "seller", 0).await;
        let poor_buyer = testutil::new_account(&db, "poor-buyer", 100).await;
        let service = testutil::new_service(&db, "sample service").await;

        let order = sell(&db, seller.account_id, service.service_id, 100, 10).await;

        assert!(matches!(
            db.match_order_tx(&bid(poor_buyer.account_id, service.service_id, 100, 10)).await,
            Err(StoreError::Constraint(_))
        ));
        // The whole transaction rolled back.
        assert_eq!(db.get_account("poor-buyer").await.unwrap().balance, 100);
        assert_eq!(db.get_account("seller").await.unwrap().balance, 0);
        let fulfillment = db
            .match_order_tx(&bid(poor_buyer.account_id, service.service_id, 100, 1))
            .await
            .unwrap();
        assert_eq!(fulfillment.order_id, order.order_id);
        assert_eq!(fulfillment.deal_quantity, 1);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_cancel_order_requires_owner() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();
        let seller = testutil::new_account(&db, "seller", 0).await;
        let stranger = testutil::new_account(&db, "stranger", 0).await;
        let service = testutil::new_service(&db, "sample service").await;

        let order = sell(&db, seller.account_id, service.service_id, 10, 5).await;
        assert!(matches!(
            db.cancel_order(order.order_id, stranger.account_id).await,
            Err(StoreError::NotFound)
        ));
        let cancelled = db.cancel_order(order.order_id, seller.account_id).await.unwrap();
        assert_eq!(cancelled.quantity, 0);
        // Cancelling twice fails because the order is no longer active.
        assert!(matches!(
            db.cancel_order(order.order_id, seller.account_id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_clean_inactive_orders() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();
        let seller = testutil::new_account(&db, "seller", 0).await;
        let service = testutil::new_service(&db, "sample service").await;

        let active = sell(&db, seller.account_id, service.service_id, 10, 5).await;
        let cancelled = sell(&db, seller.account_id, service.service_id, 10, 5).await;
        db.cancel_order(cancelled.order_id, seller.account_id).await.unwrap();

        let cleaned = db.clean_inactive_orders().await.unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].order_id, cancelled.order_id);
        let _ = active;
    }
}
