use super::{orders::FulfilledOrderRow, Database, StoreError};
use model::{
    order::{Claim, ClaimedOrder, FulfilledOrder},
    Address,
};

/// Parameters for converting fulfilled order units into a claim. The claim
/// only succeeds for the buyer that owns the fulfillment and while enough
/// `remaining_quantity` is left.
pub struct ClaimOrderTx {
    pub buyer_id: i64,
    pub order_fulfillment_id: i64,
    pub audience_address: Address,
    pub claim_quantity: i64,
}

#[derive(Default)]
pub struct ListFulfilledOrders {
    pub buyer_id: i64,
    pub service_id: Option<i64>,
    pub min_remaining_quantity: i64,
    pub start_id: i64,
    pub skip: i64,
    pub limit: i64,
}

#[derive(sqlx::FromRow)]
struct ClaimedOrderRow {
    order_claim_id: i64,
    order_fulfillment_id: i64,
    audience_address: Vec<u8>,
    claim_quantity: i64,
}

impl ClaimedOrderRow {
    fn into_claimed_order(self) -> Result<ClaimedOrder, StoreError> {
        Ok(ClaimedOrder {
            order_claim_id: self.order_claim_id,
            order_fulfillment_id: self.order_fulfillment_id,
            audience_address: Address::from_slice(&self.audience_address)
                .ok_or_else(|| StoreError::Decode("audience address has wrong length".to_string()))?,
            claim_quantity: self.claim_quantity,
        })
    }
}

impl Database {
    /// Decrements a fulfillment's remaining quantity and records the claim.
    /// The fulfillment row is locked first so concurrent claims serialize; the
    /// `remaining_quantity >= 0` constraint rejects over-claims. The service
    /// must still exist, otherwise there is nothing the minted token could be
    /// redeemed against.
    pub async fn claim_order_tx(&self, params: &ClaimOrderTx) -> Result<Claim, StoreError> {
        if params.claim_quantity <= 0 {
            return Err(StoreError::Constraint(format!(
                "expect claim quantity to be positive but got {}",
                params.claim_quantity
            )));
        }
        let mut transaction = self.pool.begin().await?;

        const SELECT_OWNED: &str = "\
            SELECT * FROM fulfilled_orders \
            WHERE order_fulfillment_id = $1 AND buyer_id = $2 \
            FOR UPDATE;";
        let fulfillment: FulfilledOrderRow = sqlx::query_as(SELECT_OWNED)
            .bind(params.order_fulfillment_id)
            .bind(params.buyer_id)
            .fetch_optional(&mut transaction)
            .await?
            .ok_or(StoreError::NotFound)?;

        const DECREMENT: &str = "\
            UPDATE fulfilled_orders SET remaining_quantity = remaining_quantity - $2 \
            WHERE order_fulfillment_id = $1 \
            RETURNING *;";
        let updated: FulfilledOrderRow = sqlx::query_as(DECREMENT)
            .bind(params.order_fulfillment_id)
            .bind(params.claim_quantity)
            .fetch_one(&mut transaction)
            .await?;

        const INSERT_CLAIM: &str = "\
            INSERT INTO claimed_orders (order_fulfillment_id, audience_address, claim_quantity) \
            VALUES ($1, $2, $3) \
            RETURNING *;";
        let claimed: ClaimedOrderRow = sqlx::query_as(INSERT_CLAIM)
            .bind(params.order_fulfillment_id)
            .bind(params.audience_address.as_bytes().as_ref())
            .bind(params.claim_quantity)
            .fetch_one(&mut transaction)
            .await?;
        let claimed = claimed.into_claimed_order()?;

        sqlx::query("SELECT service_id FROM services WHERE service_id = $1;")
            .bind(fulfillment.service_id)
            .fetch_optional(&mut transaction)
            .await?
            .ok_or(StoreError::NotFound)?;

        transaction.commit().await?;
        Ok(Claim {
            order_claim_id: claimed.order_claim_id,
            audience_address: claimed.audience_address,
            expiration: updated.service_expire_time,
            order_id: updated.order_id,
            order_fulfillment_id: updated.order_fulfillment_id,
            seller_id: updated.seller_id,
            service_id: updated.service_id,
            quantity: claimed.claim_quantity,
        })
    }

    pub async fn list_fulfilled_orders(
        &self,
        params: &ListFulfilledOrders,
    ) -> Result<Vec<FulfilledOrder>, StoreError> {
        // $3 is NULL when the listing is not restricted to one service.
        const QUERY: &str = "\
            SELECT * FROM fulfilled_orders \
            WHERE buyer_id = $1 AND order_fulfillment_id >= $2 \
                AND ($3::bigint IS NULL OR service_id = $3) \
                AND remaining_quantity >= $4 \
            ORDER BY order_fulfillment_id ASC \
            LIMIT $5 OFFSET $6;";
        let rows: Vec<FulfilledOrderRow> = sqlx::query_as(QUERY)
            .bind(params.buyer_id)
            .bind(params.start_id)
            .bind(params.service_id)
            .bind(params.min_remaining_quantity)
            .bind(params.limit)
            .bind(params.skip)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(FulfilledOrderRow::into_order).collect())
    }

    /// Garbage collection of fulfillments whose service lifetime ran out.
    /// Claims hanging off them are removed by the cascade.
    pub async fn clean_expired_fulfilled_orders(&self) -> Result<Vec<FulfilledOrder>, StoreError> {
        const QUERY: &str =
            "DELETE FROM fulfilled_orders WHERE service_expire_time < now() RETURNING *;";
        let rows: Vec<FulfilledOrderRow> = sqlx::query_as(QUERY).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(FulfilledOrderRow::into_order).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{testutil, CreateOrder, MatchOrderTx};
    use chrono::{Duration, Utc};

    async fn fulfillment_of(db: &Database, quantity: i64) -> (FulfilledOrder, i64, i64) {
        let seller = testutil::new_account(db, "seller", 1_000_000).await;
        let buyer = testutil::new_account(db, "buyer", 1_000_000).await;
        let service = testutil::new_service(db, "sample service").await;
        let expire = Utc::now() + Duration::days(30);
        db.create_order(&CreateOrder {
            seller_id: seller.account_id,
            service_id: service.service_id,
            ask_price: 100,
            quantity,
            order_expire_time: expire,
            service_expire_time: expire,
        })
        .await
        .unwrap();
        let fulfillment = db
            .match_order_tx(&MatchOrderTx {
                buyer_id: buyer.account_id,
                service_id: service.service_id,
                bid_price: 120,
                bid_quantity: quantity,
                min_expire_time: Utc::now() + Duration::days(1),
            })
            .await
            .unwrap();
        (fulfillment, buyer.account_id, service.service_id)
    }

    fn claim(buyer_id: i64, order_fulfillment_id: i64, claim_quantity: i64) -> ClaimOrderTx {
        ClaimOrderTx {
            buyer_id,
            order_fulfillment_id,
            audience_address: Address([0x42; 32]),
            claim_quantity,
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_claims_never_exceed_the_deal_quantity() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();
        let (fulfillment, buyer_id, _) = fulfillment_of(&db, 30).await;
        let id = fulfillment.order_fulfillment_id;

        // A non owner never sees the fulfillment.
        assert!(matches!(
            db.claim_order_tx(&claim(buyer_id + 1, id, 25)).await,
            Err(StoreError::NotFound)
        ));
        // Claiming more than remains fails without changing anything.
        assert!(matches!(
            db.claim_order_tx(&claim(buyer_id, id, 40)).await,
            Err(StoreError::Constraint(_))
        ));
        let first = db.claim_order_tx(&claim(buyer_id, id, 10)).await.unwrap();
        assert_eq!(first.quantity, 10);
        assert_eq!(first.expiration, fulfillment.service_expire_time);
        assert!(matches!(
            db.claim_order_tx(&claim(buyer_id, id, 25)).await,
            Err(StoreError::Constraint(_))
        ));
        let second = db.claim_order_tx(&claim(buyer_id, id, 20)).await.unwrap();
        assert_eq!(second.quantity, 20);

        let listed = db
            .list_fulfilled_orders(&ListFulfilledOrders {
                buyer_id,
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed[0].remaining_quantity, 0);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_claim_requires_positive_quantity() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();
        let (fulfillment, buyer_id, _) = fulfillment_of(&db, 5).await;
        for quantity in [0, -4] {
            assert!(matches!(
                db.claim_order_tx(&claim(buyer_id, fulfillment.order_fulfillment_id, quantity)).await,
                Err(StoreError::Constraint(_))
            ));
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_claim_fails_for_removed_service() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();
        let (fulfillment, buyer_id, service_id) = fulfillment_of(&db, 5).await;
        db.remove_service(service_id).await.unwrap();
        assert!(matches!(
            db.claim_order_tx(&claim(buyer_id, fulfillment.order_fulfillment_id, 1)).await,
            Err(StoreError::NotFound)
        ));
        // The failed claim did not consume any quantity. Recreating a service
        // does not resurrect the old one, so the fulfillment stays unclaimable,
        // but its remaining quantity is still intact in the listing.
        let listed = db
            .list_fulfilled_orders(&ListFulfilledOrders {
                buyer_id,
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed[0].remaining_quantity, 5);
    }
}
