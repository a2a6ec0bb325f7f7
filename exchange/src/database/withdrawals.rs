use super::{accounts, Database, PgTransaction, StoreError};
use chrono::{DateTime, Utc};
use model::{
    withdrawal::{ProcessingStatus, ProcessingWithdrawal, Withdrawal, WithdrawalStatus},
    Address,
};

/// Parameters for recording a withdrawal request. With `withdraw_all` the
/// amount is derived from the current balance under a share lock.
pub struct WithdrawTx {
    pub account_id: i64,
    pub withdraw_address: Address,
    pub amount: i64,
    pub priority_fee: i64,
    pub withdraw_all: bool,
}

#[derive(sqlx::FromRow)]
struct WithdrawalRow {
    withdrawal_id: i64,
    account_id: i64,
    withdraw_address: Vec<u8>,
    amount: i64,
    priority_fee: i64,
    processing_withdrawal_id: Option<i64>,
    status: String,
}

impl WithdrawalRow {
    fn into_withdrawal(self) -> Result<Withdrawal, StoreError> {
        Ok(Withdrawal {
            withdrawal_id: self.withdrawal_id,
            account_id: self.account_id,
            withdraw_address: Address::from_slice(&self.withdraw_address)
                .ok_or_else(|| StoreError::Decode("withdraw address has wrong length".to_string()))?,
            amount: self.amount,
            priority_fee: self.priority_fee,
            processing_withdrawal_id: self.processing_withdrawal_id,
            status: WithdrawalStatus::from_str(&self.status)
                .ok_or_else(|| StoreError::Decode(format!("withdrawal status {:?}", self.status)))?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProcessingWithdrawalRow {
    processing_withdrawal_id: i64,
    transaction_digest: String,
    transaction_bytes: String,
    total_priority_fee: i64,
    status: String,
    created_time: DateTime<Utc>,
}

impl ProcessingWithdrawalRow {
    fn into_processing_withdrawal(self) -> Result<ProcessingWithdrawal, StoreError> {
        Ok(ProcessingWithdrawal {
            processing_withdrawal_id: self.processing_withdrawal_id,
            transaction_digest: self.transaction_digest,
            transaction_bytes: self.transaction_bytes,
            total_priority_fee: self.total_priority_fee,
            status: ProcessingStatus::from_str(&self.status)
                .ok_or_else(|| StoreError::Decode(format!("processing status {:?}", self.status)))?,
            created_time: self.created_time,
        })
    }
}

impl Database {
    /// Records a waiting withdrawal and debits `amount + priority_fee` in one
    /// transaction. The partial unique index on `(account_id, address)` keeps
    /// a second live withdrawal to the same recipient from being created.
    /// The account is not deleted even when all balance is withdrawn; only
    /// `expire_time` ends an account.
    pub async fn withdraw_tx(&self, params: &WithdrawTx) -> Result<Withdrawal, StoreError> {
        if params.priority_fee < 0 {
            return Err(StoreError::Constraint(format!(
                "expect priority fee to be non negative but got {}",
                params.priority_fee
            )));
        }
        let mut transaction = self.pool.begin().await?;
        let amount = if params.withdraw_all {
            let (balance,): (i64,) =
                sqlx::query_as("SELECT balance FROM accounts WHERE account_id = $1 FOR SHARE;")
                    .bind(params.account_id)
                    .fetch_optional(&mut transaction)
                    .await?
                    .ok_or(StoreError::NotFound)?;
            balance - params.priority_fee
        } else {
            params.amount
        };
        if amount <= 0 {
            return Err(StoreError::Constraint(format!(
                "expect withdraw amount to be positive but got {}",
                amount
            )));
        }

        const INSERT: &str = "\
            INSERT INTO withdrawals (account_id, withdraw_address, amount, priority_fee, status) \
            VALUES ($1, $2, $3, $4, 'waiting') \
            RETURNING *;";
        let row: WithdrawalRow = sqlx::query_as(INSERT)
            .bind(params.account_id)
            .bind(params.withdraw_address.as_bytes().as_ref())
            .bind(amount)
            .bind(params.priority_fee)
            .fetch_one(&mut transaction)
            .await?;
        let withdrawal = row.into_withdrawal()?;

        accounts::change_balance(
            &mut transaction,
            withdrawal.account_id,
            -withdrawal.amount - withdrawal.priority_fee,
        )
        .await?;

        transaction.commit().await?;
        Ok(withdrawal)
    }

    /// Deletes a waiting withdrawal owned by `account_id` and refunds
    /// `amount + priority_fee`. Processing and successful withdrawals cannot
    /// be cancelled.
    pub async fn cancel_withdraw_tx(
        &self,
        withdrawal_id: i64,
        account_id: i64,
    ) -> Result<Withdrawal, StoreError> {
        let mut transaction = self.pool.begin().await?;
        const DELETE: &str = "\
            DELETE FROM withdrawals \
            WHERE withdrawal_id = $1 AND account_id = $2 AND status = 'waiting' \
            RETURNING *;";
        let row: WithdrawalRow = sqlx::query_as(DELETE)
            .bind(withdrawal_id)
            .bind(account_id)
            .fetch_optional(&mut transaction)
            .await?
            .ok_or(StoreError::NotFound)?;
        let withdrawal = row.into_withdrawal()?;

        accounts::change_balance(
            &mut transaction,
            withdrawal.account_id,
            withdrawal.amount + withdrawal.priority_fee,
        )
        .await?;

        transaction.commit().await?;
        Ok(withdrawal)
    }

    /// Marks the batch identified by its chain digest successful together
    /// with every withdrawal linked to it.
    pub async fn set_withdrawal_success(
        &self,
        transaction_digest: &str,
    ) -> Result<ProcessingWithdrawal, StoreError> {
        let mut transaction = self.pool.begin().await?;
        const UPDATE_BATCH: &str = "\
            UPDATE processing_withdrawals SET status = 'success' \
            WHERE transaction_digest = $1 AND status = 'processing' \
            RETURNING *;";
        let row: ProcessingWithdrawalRow = sqlx::query_as(UPDATE_BATCH)
            .bind(transaction_digest)
            .fetch_optional(&mut transaction)
            .await?
            .ok_or(StoreError::NotFound)?;
        let batch = row.into_processing_withdrawal()?;

        sqlx::query("UPDATE withdrawals SET status = 'success' WHERE processing_withdrawal_id = $1;")
            .bind(batch.processing_withdrawal_id)
            .execute(&mut transaction)
            .await?;

        transaction.commit().await?;
        Ok(batch)
    }

    /// Garbage collection of settled batches older than `before`, withdrawal
    /// rows included. Batches still in processing must first be marked to
    /// avoid losing money.
    pub async fn clean_old_withdrawals(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ProcessingWithdrawal>, StoreError> {
        let mut transaction = self.pool.begin().await?;
        const DELETE_LINKED: &str = "\
            DELETE FROM withdrawals WHERE status = 'success' AND processing_withdrawal_id IN ( \
                SELECT processing_withdrawal_id FROM processing_withdrawals \
                WHERE status = 'success' AND created_time < $1);";
        sqlx::query(DELETE_LINKED)
            .bind(before)
            .execute(&mut transaction)
            .await?;
        const DELETE_BATCHES: &str = "\
            DELETE FROM processing_withdrawals \
            WHERE status = 'success' AND created_time < $1 \
            RETURNING *;";
        let rows: Vec<ProcessingWithdrawalRow> = sqlx::query_as(DELETE_BATCHES)
            .bind(before)
            .fetch_all(&mut transaction)
            .await?;
        transaction.commit().await?;
        rows.into_iter()
            .map(ProcessingWithdrawalRow::into_processing_withdrawal)
            .collect()
    }

    pub async fn list_processing_withdrawals(
        &self,
        limit: i64,
    ) -> Result<Vec<ProcessingWithdrawal>, StoreError> {
        const QUERY: &str = "\
            SELECT * FROM processing_withdrawals WHERE status = 'processing' \
            ORDER BY processing_withdrawal_id ASC \
            LIMIT $1;";
        let rows: Vec<ProcessingWithdrawalRow> =
            sqlx::query_as(QUERY).bind(limit).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(ProcessingWithdrawalRow::into_processing_withdrawal)
            .collect()
    }

    pub async fn list_withdrawals(&self, account_id: i64) -> Result<Vec<Withdrawal>, StoreError> {
        const QUERY: &str =
            "SELECT * FROM withdrawals WHERE account_id = $1 ORDER BY withdrawal_id ASC;";
        let rows: Vec<WithdrawalRow> = sqlx::query_as(QUERY)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WithdrawalRow::into_withdrawal).collect()
    }
}

/// Picks up to `limit` waiting withdrawals for the next batch, highest
/// priority fee first with ids breaking ties, and locks them for the caller's
/// transaction.
pub async fn select_candidate_withdrawals(
    transaction: &mut PgTransaction,
    limit: i64,
) -> Result<Vec<Withdrawal>, StoreError> {
    const QUERY: &str = "\
        SELECT * FROM withdrawals WHERE status = 'waiting' \
        ORDER BY priority_fee DESC, withdrawal_id ASC \
        LIMIT $1 \
        FOR UPDATE;";
    let rows: Vec<WithdrawalRow> = sqlx::query_as(QUERY)
        .bind(limit)
        .fetch_all(&mut *transaction)
        .await?;
    rows.into_iter().map(WithdrawalRow::into_withdrawal).collect()
}

/// Creates the processing batch row for a prepared chain transaction.
pub async fn set_withdrawal_batch(
    transaction: &mut PgTransaction,
    transaction_digest: &str,
    transaction_bytes: &str,
    total_priority_fee: i64,
) -> Result<ProcessingWithdrawal, StoreError> {
    const QUERY: &str = "\
        INSERT INTO processing_withdrawals \
            (transaction_digest, transaction_bytes, total_priority_fee, status) \
        VALUES ($1, $2, $3, 'processing') \
        RETURNING *;";
    let row: ProcessingWithdrawalRow = sqlx::query_as(QUERY)
        .bind(transaction_digest)
        .bind(transaction_bytes)
        .bind(total_priority_fee)
        .fetch_one(&mut *transaction)
        .await?;
    row.into_processing_withdrawal()
}

/// Links the selected withdrawals to their batch, moving them from waiting to
/// processing.
pub async fn process_withdrawals(
    transaction: &mut PgTransaction,
    withdrawal_ids: &[i64],
    processing_withdrawal_id: i64,
) -> Result<Vec<Withdrawal>, StoreError> {
    const QUERY: &str = "\
        UPDATE withdrawals SET status = 'processing', processing_withdrawal_id = $2 \
        WHERE withdrawal_id = ANY($1) AND status = 'waiting' \
        RETURNING *;";
    let rows: Vec<WithdrawalRow> = sqlx::query_as(QUERY)
        .bind(withdrawal_ids)
        .bind(processing_withdrawal_id)
        .fetch_all(&mut *transaction)
        .await?;
    rows.into_iter().map(WithdrawalRow::into_withdrawal).collect()
}
