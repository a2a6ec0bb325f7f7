use super::{Database, PgTransaction, StoreError};
use chrono::{DateTime, Duration, Utc};
use model::account::{Account, Privilege};

/// Parameters for the deposit transaction: insert the account if absent,
/// otherwise extend its lifetime and credit the balance. The deposit row keyed
/// on the chain digest is part of the same transaction so a digest can never
/// be applied twice.
pub struct UpsertAccountTx {
    pub username: String,
    pub password_hash: String,
    pub privilege: Privilege,
    pub balance_delta: i64,
    pub ttl: Duration,
    pub deposit_digest: String,
    pub deposit_epoch: i64,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    account_id: i64,
    username: String,
    password_hash: String,
    privilege: String,
    balance: i64,
    expire_time: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> Result<Account, StoreError> {
        Ok(Account {
            account_id: self.account_id,
            username: self.username,
            password_hash: self.password_hash,
            privilege: Privilege::from_str(&self.privilege)
                .ok_or_else(|| StoreError::Decode(format!("privilege {:?}", self.privilege)))?,
            balance: self.balance,
            expire_time: self.expire_time,
        })
    }
}

impl Database {
    pub async fn upsert_account_tx(&self, params: &UpsertAccountTx) -> Result<Account, StoreError> {
        if params.balance_delta < 0 || params.ttl < Duration::zero() {
            return Err(StoreError::Constraint(format!(
                "expect deposit balance and ttl to be non negative but got {} and {}",
                params.balance_delta, params.ttl
            )));
        }
        let mut transaction = self.pool.begin().await?;
        const QUERY: &str = "\
            INSERT INTO accounts (username, password_hash, privilege, balance, expire_time) \
            VALUES ($1, $2, $3, $4, now() + make_interval(secs => $5)) \
            ON CONFLICT (username) DO UPDATE \
            SET balance = accounts.balance + EXCLUDED.balance, \
                expire_time = accounts.expire_time + make_interval(secs => $5) \
            RETURNING account_id, username, password_hash, privilege, balance, expire_time;";
        let row: AccountRow = sqlx::query_as(QUERY)
            .bind(&params.username)
            .bind(&params.password_hash)
            .bind(params.privilege.as_str())
            .bind(params.balance_delta)
            .bind(params.ttl.num_milliseconds() as f64 / 1e3)
            .fetch_one(&mut transaction)
            .await?;
        let account = row.into_account()?;
        sqlx::query("INSERT INTO deposits (account_id, transaction_digest, epoch) VALUES ($1, $2, $3);")
            .bind(account.account_id)
            .bind(&params.deposit_digest)
            .bind(params.deposit_epoch)
            .execute(&mut transaction)
            .await?;
        transaction.commit().await?;
        Ok(account)
    }

    pub async fn get_account(&self, username: &str) -> Result<Account, StoreError> {
        let row: AccountRow = sqlx::query_as("SELECT * FROM accounts WHERE username = $1;")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        row.into_account()
    }

    pub async fn get_account_by_id(&self, account_id: i64) -> Result<Account, StoreError> {
        let row: AccountRow = sqlx::query_as("SELECT * FROM accounts WHERE account_id = $1;")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        row.into_account()
    }

    /// Garbage collection of accounts whose lifetime ran out.
    pub async fn delete_invalid_accounts(&self) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("DELETE FROM accounts WHERE expire_time < now() RETURNING account_id;")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(account_id,)| account_id).collect())
    }
}

/// Moves an account balance inside a caller held transaction. The `balance >=
/// 0` check constraint turns an overdraft into `StoreError::Constraint`.
pub(crate) async fn change_balance(
    transaction: &mut PgTransaction,
    account_id: i64,
    delta: i64,
) -> Result<Account, StoreError> {
    let row: AccountRow =
        sqlx::query_as("UPDATE accounts SET balance = balance + $2 WHERE account_id = $1 RETURNING *;")
            .bind(account_id)
            .bind(delta)
            .fetch_optional(&mut *transaction)
            .await?
            .ok_or(StoreError::NotFound)?;
    row.into_account()
}

pub(crate) async fn change_balance_by_username(
    transaction: &mut PgTransaction,
    username: &str,
    delta: i64,
) -> Result<Account, StoreError> {
    let row: AccountRow =
        sqlx::query_as("UPDATE accounts SET balance = balance + $2 WHERE username = $1 RETURNING *;")
            .bind(username)
            .bind(delta)
            .fetch_optional(&mut *transaction)
            .await?
            .ok_or(StoreError::NotFound)?;
    row.into_account()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testutil;

    #[tokio::test]
    #[ignore]
    async fn postgres_deposit_digest_is_idempotent() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let params = UpsertAccountTx {
            username: "depositor".to_string(),
            password_hash: "hash".to_string(),
            privilege: Privilege::User,
            balance_delta: 500,
            ttl: Duration::days(1),
            deposit_digest: "DdzbG47u5MDUrSVArmVYmvnpDvspgKeAXxzgq2cNnhpJ".to_string(),
            deposit_epoch: 7,
        };
        let account = db.upsert_account_tx(&params).await.unwrap();
        assert_eq!(account.balance, 500);

        // Reusing the digest fails before any balance change.
        match db.upsert_account_tx(&params).await {
            Err(StoreError::Duplicate) => (),
            other => panic!("expecting Duplicate error, got {:?}", other.map(|a| a.balance)),
        }
        let account = db.get_account("depositor").await.unwrap();
        assert_eq!(account.balance, 500);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_upsert_extends_existing_account() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let mut params = UpsertAccountTx {
            username: "depositor".to_string(),
            password_hash: "hash".to_string(),
            privilege: Privilege::User,
            balance_delta: 100,
            ttl: Duration::days(2),
            deposit_digest: "digest-1".to_string(),
            deposit_epoch: 1,
        };
        let first = db.upsert_account_tx(&params).await.unwrap();

        params.deposit_digest = "digest-2".to_string();
        params.balance_delta = 250;
        let second = db.upsert_account_tx(&params).await.unwrap();

        assert_eq!(second.account_id, first.account_id);
        assert_eq!(second.balance, 350);
        let extension = second.expire_time - first.expire_time;
        assert_eq!(extension.num_days(), 2);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_rejects_negative_deposit() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let params = UpsertAccountTx {
            username: "depositor".to_string(),
            password_hash: "hash".to_string(),
            privilege: Privilege::User,
            balance_delta: -1,
            ttl: Duration::days(1),
            deposit_digest: "digest".to_string(),
            deposit_epoch: 1,
        };
        assert!(matches!(
            db.upsert_account_tx(&params).await,
            Err(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_prunes_expired_accounts() {
        let db = Database::new("postgresql://").unwrap();
        db.clear().await.unwrap();

        let expired = db
            .upsert_account_tx(&UpsertAccountTx {
                username: "expired".to_string(),
                password_hash: "hash".to_string(),
                privilege: Privilege::User,
                balance_delta: 0,
                ttl: Duration::zero(),
                deposit_digest: "digest-expired".to_string(),
                deposit_epoch: 1,
            })
            .await
            .unwrap();
        let alive = testutil::new_account(&db, "alive", 10).await;

        let deleted = db.delete_invalid_accounts().await.unwrap();
        assert_eq!(deleted, vec![expired.account_id]);
        assert!(db.get_account_by_id(alive.account_id).await.is_ok());
        assert!(matches!(
            db.get_account_by_id(expired.account_id).await,
            Err(StoreError::NotFound)
        ));
    }
}
