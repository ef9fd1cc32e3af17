use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use common::{ClientRef, ItemRef, Money, PaymentId, SaleId, SettlementId, UserId};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Change, ChangeSet, LedgerStoreError, Payment, PaymentQuery, RecordKey, Result, Sale,
    SaleQuery, Settlement, SettlementQuery, Version, Versioned, store::LedgerStore,
};

const SALE_COLUMNS: &str = "id, client_ref, item_ref, agreed_price_cents, balance_cents, seller, commission_paid, created_at, version";
const PAYMENT_COLUMNS: &str = "id, sale_id, amount_cents, method, collected_by, custody_holder, custody_state, settlement_ref, collected_at, version";
const SETTLEMENT_COLUMNS: &str = "id, kind, performed_by, received_by, total_amount_cents, included_payment_ids, commission_total_cents, commission_by_payee, sales_marked_paid, created_at, version";

/// PostgreSQL-backed ledger store.
///
/// A commit runs in one SQL transaction. Inserts only succeed for ids that do
/// not exist yet, updates and deletes only match rows still at the expected
/// version, and guards lock the rows they check until the transaction ends.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_sale(row: PgRow) -> Result<Versioned<Sale>> {
        let sale = Sale {
            id: SaleId::from_uuid(row.try_get::<Uuid, _>("id")?),
            client: ClientRef::new(row.try_get::<String, _>("client_ref")?),
            item: ItemRef::new(row.try_get::<String, _>("item_ref")?),
            agreed_price: Money::from_cents(row.try_get("agreed_price_cents")?),
            balance: Money::from_cents(row.try_get("balance_cents")?),
            seller: UserId::new(row.try_get::<String, _>("seller")?),
            commission_paid: row.try_get("commission_paid")?,
            created_at: row.try_get("created_at")?,
        };
        Ok(Versioned::new(sale, Version::new(row.try_get("version")?)))
    }

    fn row_to_payment(row: PgRow) -> Result<Versioned<Payment>> {
        let id: Uuid = row.try_get("id")?;
        let corrupt = |reason: String| LedgerStoreError::Corrupt {
            record: format!("payment {id}"),
            reason,
        };

        let payment = Payment {
            id: PaymentId::from_uuid(id),
            sale_id: SaleId::from_uuid(row.try_get::<Uuid, _>("sale_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            method: row
                .try_get::<String, _>("method")?
                .parse()
                .map_err(corrupt)?,
            collected_by: UserId::new(row.try_get::<String, _>("collected_by")?),
            custody_holder: UserId::new(row.try_get::<String, _>("custody_holder")?),
            custody_state: row
                .try_get::<String, _>("custody_state")?
                .parse()
                .map_err(corrupt)?,
            settlement_ref: row
                .try_get::<Option<Uuid>, _>("settlement_ref")?
                .map(SettlementId::from_uuid),
            collected_at: row.try_get("collected_at")?,
        };
        Ok(Versioned::new(payment, Version::new(row.try_get("version")?)))
    }

    fn row_to_settlement(row: PgRow) -> Result<Versioned<Settlement>> {
        let id: Uuid = row.try_get("id")?;
        let kind = row
            .try_get::<String, _>("kind")?
            .parse()
            .map_err(|reason| LedgerStoreError::Corrupt {
                record: format!("settlement {id}"),
                reason,
            })?;

        let commission_json: serde_json::Value = row.try_get("commission_by_payee")?;
        let commission_by_payee: BTreeMap<UserId, Money> = serde_json::from_value(commission_json)?;

        let settlement = Settlement {
            id: SettlementId::from_uuid(id),
            kind,
            performed_by: UserId::new(row.try_get::<String, _>("performed_by")?),
            received_by: UserId::new(row.try_get::<String, _>("received_by")?),
            total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
            included_payment_ids: row
                .try_get::<Vec<Uuid>, _>("included_payment_ids")?
                .into_iter()
                .map(PaymentId::from_uuid)
                .collect(),
            commission_total: Money::from_cents(row.try_get("commission_total_cents")?),
            commission_by_payee,
            sales_marked_paid: row
                .try_get::<Vec<Uuid>, _>("sales_marked_paid")?
                .into_iter()
                .map(SaleId::from_uuid)
                .collect::<BTreeSet<_>>(),
            created_at: row.try_get("created_at")?,
        };
        Ok(Versioned::new(
            settlement,
            Version::new(row.try_get("version")?),
        ))
    }

    fn table_of(key: RecordKey) -> (&'static str, Uuid) {
        match key {
            RecordKey::Sale(id) => ("sales", id.as_uuid()),
            RecordKey::Payment(id) => ("payments", id.as_uuid()),
            RecordKey::Settlement(id) => ("settlements", id.as_uuid()),
        }
    }

    /// Reads the committed version of a record, locking its row for the rest
    /// of the transaction.
    async fn locked_version(conn: &mut PgConnection, key: RecordKey) -> Result<Version> {
        let (table, id) = Self::table_of(key);
        let version: Option<i64> =
            sqlx::query_scalar(&format!("SELECT version FROM {table} WHERE id = $1 FOR SHARE"))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(version.map(Version::new).unwrap_or_else(Version::initial))
    }

    async fn conflict(
        conn: &mut PgConnection,
        key: RecordKey,
        expected: Version,
    ) -> Result<LedgerStoreError> {
        let actual = Self::locked_version(conn, key).await?;
        tracing::debug!(%key, %expected, %actual, "commit rejected");
        Ok(LedgerStoreError::ConcurrencyConflict {
            record: key,
            expected,
            actual,
        })
    }

    async fn apply_sale(conn: &mut PgConnection, sale: &Sale, expected: Version) -> Result<u64> {
        let result = if expected == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO sales (id, client_ref, item_ref, agreed_price_cents, balance_cents, seller, commission_paid, created_at, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(sale.id.as_uuid())
            .bind(sale.client.as_str())
            .bind(sale.item.as_str())
            .bind(sale.agreed_price.cents())
            .bind(sale.balance.cents())
            .bind(sale.seller.as_str())
            .bind(sale.commission_paid)
            .bind(sale.created_at)
            .execute(&mut *conn)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE sales
                SET client_ref = $2, item_ref = $3, agreed_price_cents = $4, balance_cents = $5,
                    seller = $6, commission_paid = $7, version = version + 1
                WHERE id = $1 AND version = $8
                "#,
            )
            .bind(sale.id.as_uuid())
            .bind(sale.client.as_str())
            .bind(sale.item.as_str())
            .bind(sale.agreed_price.cents())
            .bind(sale.balance.cents())
            .bind(sale.seller.as_str())
            .bind(sale.commission_paid)
            .bind(expected.as_i64())
            .execute(&mut *conn)
            .await?
        };
        Ok(result.rows_affected())
    }

    async fn apply_payment(
        conn: &mut PgConnection,
        payment: &Payment,
        expected: Version,
    ) -> Result<u64> {
        let settlement_ref = payment.settlement_ref.map(|id| id.as_uuid());
        let result = if expected == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO payments (id, sale_id, amount_cents, method, collected_by, custody_holder, custody_state, settlement_ref, collected_at, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 1)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(payment.id.as_uuid())
            .bind(payment.sale_id.as_uuid())
            .bind(payment.amount.cents())
            .bind(payment.method.as_str())
            .bind(payment.collected_by.as_str())
            .bind(payment.custody_holder.as_str())
            .bind(payment.custody_state.as_str())
            .bind(settlement_ref)
            .bind(payment.collected_at)
            .execute(&mut *conn)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE payments
                SET amount_cents = $2, method = $3, custody_holder = $4, custody_state = $5,
                    settlement_ref = $6, version = version + 1
                WHERE id = $1 AND version = $7
                "#,
            )
            .bind(payment.id.as_uuid())
            .bind(payment.amount.cents())
            .bind(payment.method.as_str())
            .bind(payment.custody_holder.as_str())
            .bind(payment.custody_state.as_str())
            .bind(settlement_ref)
            .bind(expected.as_i64())
            .execute(&mut *conn)
            .await?
        };
        Ok(result.rows_affected())
    }

    async fn insert_settlement(conn: &mut PgConnection, settlement: &Settlement) -> Result<u64> {
        let commission_json = serde_json::to_value(&settlement.commission_by_payee)?;
        let included: Vec<Uuid> = settlement
            .included_payment_ids
            .iter()
            .map(|id| id.as_uuid())
            .collect();
        let marked: Vec<Uuid> = settlement
            .sales_marked_paid
            .iter()
            .map(|id| id.as_uuid())
            .collect();

        let result = sqlx::query(
            r#"
            INSERT INTO settlements (id, kind, performed_by, received_by, total_amount_cents, included_payment_ids, commission_total_cents, commission_by_payee, sales_marked_paid, created_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(settlement.id.as_uuid())
        .bind(settlement.kind.as_str())
        .bind(settlement.performed_by.as_str())
        .bind(settlement.received_by.as_str())
        .bind(settlement.total_amount.cents())
        .bind(included)
        .bind(settlement.commission_total.cents())
        .bind(commission_json)
        .bind(marked)
        .bind(settlement.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete(conn: &mut PgConnection, key: RecordKey, expected: Version) -> Result<u64> {
        let (table, id) = Self::table_of(key);
        let result = sqlx::query(&format!(
            "DELETE FROM {table} WHERE id = $1 AND version = $2"
        ))
        .bind(id)
        .bind(expected.as_i64())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn get_sale(&self, id: SaleId) -> Result<Option<Versioned<Sale>>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        row.map(Self::row_to_sale).transpose()
    }

    async fn query_sales(&self, query: SaleQuery) -> Result<Vec<Versioned<Sale>>> {
        let mut sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE 1=1");
        let mut param_count = 0;

        if query.client.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND client_ref = ${param_count}"));
        }
        if query.outstanding_only {
            sql.push_str(" AND balance_cents > 0");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(ref client) = query.client {
            sqlx_query = sqlx_query.bind(client.as_str());
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_sale).collect()
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Versioned<Payment>>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn query_payments(&self, query: PaymentQuery) -> Result<Vec<Versioned<Payment>>> {
        let mut sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE 1=1");
        let mut param_count = 0;

        if query.sale_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND sale_id = ${param_count}"));
        }
        if query.custody_holder.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND custody_holder = ${param_count}"));
        }
        if query.custody_state.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND custody_state = ${param_count}"));
        }
        sql.push_str(" ORDER BY collected_at ASC, id ASC");

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(sale_id) = query.sale_id {
            sqlx_query = sqlx_query.bind(sale_id.as_uuid());
        }
        if let Some(ref holder) = query.custody_holder {
            sqlx_query = sqlx_query.bind(holder.as_str());
        }
        if let Some(state) = query.custody_state {
            sqlx_query = sqlx_query.bind(state.as_str());
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_payment).collect()
    }

    async fn get_settlement(&self, id: SettlementId) -> Result<Option<Versioned<Settlement>>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_settlement).transpose()
    }

    async fn query_settlements(
        &self,
        query: SettlementQuery,
    ) -> Result<Vec<Versioned<Settlement>>> {
        let mut sql = format!("SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE 1=1");
        let mut param_count = 0;

        if query.kind.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND kind = ${param_count}"));
        }
        if query.performed_by.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND performed_by = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);
        if let Some(kind) = query.kind {
            sqlx_query = sqlx_query.bind(kind.as_str());
        }
        if let Some(ref actor) = query.performed_by {
            sqlx_query = sqlx_query.bind(actor.as_str());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_settlement).collect()
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        changes.validate()?;

        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        for change in changes.changes() {
            let key = change.key();
            let expected = change.expected();

            let applied = match change {
                Change::Guard { .. } => {
                    let actual = Self::locked_version(&mut tx, key).await?;
                    if actual == expected { 1 } else { 0 }
                }
                Change::PutSale { sale, .. } => Self::apply_sale(&mut tx, sale, expected).await?,
                Change::PutPayment { payment, .. } => {
                    Self::apply_payment(&mut tx, payment, expected).await?
                }
                Change::PutSettlement { settlement, .. } => {
                    Self::insert_settlement(&mut tx, settlement).await?
                }
                Change::DeletePayment { .. } | Change::DeleteSettlement { .. } => {
                    Self::delete(&mut tx, key, expected).await?
                }
            };

            if applied != 1 {
                return Err(Self::conflict(&mut tx, key, expected).await?);
            }
        }

        tx.commit().await?;
        tracing::debug!(changes = changes.len(), "commit applied");
        Ok(())
    }
}
