//! Postgres-backed ledger store.
//!
//! A [`PostgresUnitOfWork`] is one SQL transaction. Balance writes are
//! compare-and-swap on the row version:
//!
//! | Expected version | Statement | Zero rows affected means |
//! |------------------|-----------|--------------------------|
//! | `0` | `INSERT ... ON CONFLICT DO NOTHING` | another writer created the row first |
//! | `n` | `UPDATE ... WHERE version = n` | the row moved past `n` |
//!
//! Either case is reported as [`StoreError::Concurrency`]. Dropping the unit
//! of work without committing rolls the SQL transaction back.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (serialization failure) | `40001` | `Concurrency` |
//! | anything else | | `Backend` |
//!
//! The [`LedgerStore`] trait is synchronous; calls are driven on the ambient
//! tokio runtime and must therefore come from outside async tasks (for
//! example after `Runtime::enter` or inside `spawn_blocking`).

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{debug, instrument};
use uuid::Uuid;

use tallyerp_accounting::{GlTransaction, JournalLine};
use tallyerp_approval::{ApprovalDecision, Decision};
use tallyerp_core::{
    AccountId, BusinessModule, DecisionId, ExpectedVersion, FlowId, MovementId, ProductId,
    ReferenceId, StepId, TransactionId, UserId, WarehouseId,
};
use tallyerp_inventory::{
    BalanceWrite, InventoryMovement, MovementKind, MovementLine, StockBalance, StockKey,
    StockSnapshot,
};

use super::{LedgerStore, StoreError, UnitOfWork};

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }
}

fn runtime() -> Result<Handle, StoreError> {
    Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "PostgresLedgerStore requires a tokio runtime context (enter one before calling)"
                .to_string(),
        )
    })
}

fn block_on<F: Future>(future: F) -> Result<F::Output, StoreError> {
    Ok(runtime()?.block_on(future))
}

/// One SQL transaction.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
    handle: Handle,
}

impl UnitOfWork for PostgresUnitOfWork {
    fn load_balances(&mut self, keys: &[StockKey]) -> Result<StockSnapshot, StoreError> {
        if keys.is_empty() {
            return Ok(StockSnapshot::new());
        }

        let products: Vec<Uuid> = keys.iter().map(|k| *k.product_id.as_uuid()).collect();
        let warehouses: Vec<Uuid> = keys.iter().map(|k| *k.warehouse_id.as_uuid()).collect();

        let Self { tx, handle } = self;
        let rows = handle
            .block_on(
                sqlx::query(
                    r#"
                    SELECT b.product_id, b.warehouse_id, b.quantity, b.updated_at, b.version
                    FROM stock_balances b
                    JOIN UNNEST($1::uuid[], $2::uuid[]) AS k(product_id, warehouse_id)
                      ON b.product_id = k.product_id AND b.warehouse_id = k.warehouse_id
                    "#,
                )
                .bind(&products)
                .bind(&warehouses)
                .fetch_all(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("load_balances", e))?;

        rows.iter().map(balance_from_row).collect()
    }

    fn write_balance(&mut self, write: &BalanceWrite) -> Result<(), StoreError> {
        let b = &write.balance;
        let Self { tx, handle } = self;

        let affected = match write.expected {
            ExpectedVersion(0) => handle.block_on(
                sqlx::query(
                    r#"
                    INSERT INTO stock_balances (product_id, warehouse_id, quantity, updated_at, version)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (product_id, warehouse_id) DO NOTHING
                    "#,
                )
                .bind(b.key.product_id.as_uuid())
                .bind(b.key.warehouse_id.as_uuid())
                .bind(b.quantity)
                .bind(b.updated_at)
                .bind(b.version as i64)
                .execute(&mut **tx),
            ),
            ExpectedVersion(expected) => handle.block_on(
                sqlx::query(
                    r#"
                    UPDATE stock_balances
                    SET quantity = $3, updated_at = $4, version = $5
                    WHERE product_id = $1 AND warehouse_id = $2 AND version = $6
                    "#,
                )
                .bind(b.key.product_id.as_uuid())
                .bind(b.key.warehouse_id.as_uuid())
                .bind(b.quantity)
                .bind(b.updated_at)
                .bind(b.version as i64)
                .bind(expected as i64)
                .execute(&mut **tx),
            ),
        }
        .map_err(|e| map_sqlx_error("write_balance", e))?;

        if affected.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!(
                "balance {}: expected version {}, row changed concurrently",
                b.key,
                write.expected.get()
            )));
        }
        Ok(())
    }

    fn append_movement(&mut self, movement: &InventoryMovement) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        handle.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO inventory_movements (id, kind, occurred_at, reference, warehouse_from, warehouse_to)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(movement.id.as_uuid())
            .bind(movement.kind.as_str())
            .bind(movement.occurred_at)
            .bind(&movement.reference)
            .bind(movement.warehouse_from.map(|w| *w.as_uuid()))
            .bind(movement.warehouse_to.map(|w| *w.as_uuid()))
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_movement", e))?;

            for (line_no, line) in movement.lines.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO inventory_movement_lines (movement_id, line_no, product_id, quantity, unit_cost)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(movement.id.as_uuid())
                .bind(line_no as i32)
                .bind(line.product_id.as_uuid())
                .bind(line.quantity)
                .bind(line.unit_cost)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("insert_movement_line", e))?;
            }
            Ok::<_, StoreError>(())
        })
    }

    fn append_decision(&mut self, decision: &ApprovalDecision) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        handle
            .block_on(
                sqlx::query(
                    r#"
                    INSERT INTO approval_decisions (
                        id, flow_id, reference_id, module, step_id, approver_id,
                        decision, comment, amount, recorded_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(decision.id.as_uuid())
                .bind(decision.flow_id.as_uuid())
                .bind(decision.reference_id.as_uuid())
                .bind(decision.module.key())
                .bind(decision.step_id.map(|s| *s.as_uuid()))
                .bind(decision.approver_id.as_uuid())
                .bind(decision.decision.as_str())
                .bind(decision.comment.as_deref())
                .bind(decision.amount)
                .bind(decision.recorded_at)
                .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("insert_decision", e))?;
        Ok(())
    }

    fn next_transaction_sequence(&mut self) -> Result<u64, StoreError> {
        let Self { tx, handle } = self;
        let row = handle
            .block_on(sqlx::query("SELECT nextval('gl_transaction_seq') AS seq").fetch_one(&mut **tx))
            .map_err(|e| map_sqlx_error("next_transaction_sequence", e))?;
        let seq: i64 = row.try_get("seq").map_err(|e| decode_error("seq", e))?;
        Ok(seq as u64)
    }

    fn insert_transaction(&mut self, transaction: &GlTransaction) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        handle.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO gl_transactions (id, number, date, module, reference_id, description, reversal_of)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(transaction.id.as_uuid())
            .bind(&transaction.number)
            .bind(transaction.date)
            .bind(transaction.module.key())
            .bind(transaction.reference_id.map(|r| *r.as_uuid()))
            .bind(transaction.description.as_deref())
            .bind(transaction.reversal_of.map(|r| *r.as_uuid()))
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_gl_transaction", e))?;

            for (line_no, line) in transaction.lines.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO gl_transaction_lines (
                        transaction_id, line_no, account_id, account_code, debit, credit, note
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(transaction.id.as_uuid())
                .bind(line_no as i32)
                .bind(line.account_id.as_uuid())
                .bind(&line.account_code)
                .bind(line.debit)
                .bind(line.credit)
                .bind(line.note.as_deref())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("insert_gl_transaction_line", e))?;
            }
            Ok::<_, StoreError>(())
        })
    }

    fn commit(self) -> Result<(), StoreError> {
        let Self { tx, handle } = self;
        handle
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

impl LedgerStore for PostgresLedgerStore {
    type Tx<'a>
        = PostgresUnitOfWork
    where
        Self: 'a;

    #[instrument(skip(self), err)]
    fn begin(&self) -> Result<Self::Tx<'_>, StoreError> {
        let handle = runtime()?;
        let tx = handle
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        debug!("unit of work started");
        Ok(PostgresUnitOfWork { tx, handle })
    }

    #[instrument(skip(self), fields(key = %key), err)]
    fn balance(&self, key: StockKey) -> Result<Option<StockBalance>, StoreError> {
        let row = block_on(
            sqlx::query(
                r#"
                SELECT product_id, warehouse_id, quantity, updated_at, version
                FROM stock_balances
                WHERE product_id = $1 AND warehouse_id = $2
                "#,
            )
            .bind(key.product_id.as_uuid())
            .bind(key.warehouse_id.as_uuid())
            .fetch_optional(&self.pool),
        )?
        .map_err(|e| map_sqlx_error("load_balance", e))?;

        row.as_ref().map(balance_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    fn balances(
        &self,
        product: Option<ProductId>,
        warehouse: Option<WarehouseId>,
    ) -> Result<Vec<StockBalance>, StoreError> {
        let rows = block_on(
            sqlx::query(
                r#"
                SELECT product_id, warehouse_id, quantity, updated_at, version
                FROM stock_balances
                WHERE ($1::uuid IS NULL OR product_id = $1)
                  AND ($2::uuid IS NULL OR warehouse_id = $2)
                ORDER BY product_id, warehouse_id
                "#,
            )
            .bind(product.map(|p| *p.as_uuid()))
            .bind(warehouse.map(|w| *w.as_uuid()))
            .fetch_all(&self.pool),
        )?
        .map_err(|e| map_sqlx_error("list_balances", e))?;

        rows.iter().map(balance_from_row).collect()
    }

    #[instrument(skip(self), fields(product = %product), err)]
    fn movements(
        &self,
        product: ProductId,
        since: DateTime<Utc>,
    ) -> Result<Vec<InventoryMovement>, StoreError> {
        block_on(async {
            let headers = sqlx::query(
                r#"
                SELECT m.id, m.kind, m.occurred_at, m.reference, m.warehouse_from, m.warehouse_to
                FROM inventory_movements m
                WHERE m.occurred_at >= $2
                  AND EXISTS (
                      SELECT 1 FROM inventory_movement_lines l
                      WHERE l.movement_id = m.id AND l.product_id = $1
                  )
                ORDER BY m.occurred_at DESC, m.id DESC
                "#,
            )
            .bind(product.as_uuid())
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?;

            let ids: Vec<Uuid> = headers
                .iter()
                .map(|r| r.try_get::<Uuid, _>("id"))
                .collect::<Result<_, _>>()
                .map_err(|e| decode_error("id", e))?;

            let line_rows = sqlx::query(
                r#"
                SELECT movement_id, product_id, quantity, unit_cost
                FROM inventory_movement_lines
                WHERE movement_id = ANY($1)
                ORDER BY movement_id, line_no
                "#,
            )
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_movement_lines", e))?;

            let mut lines: HashMap<Uuid, Vec<MovementLine>> = HashMap::new();
            for row in &line_rows {
                let movement_id: Uuid = get(row, "movement_id")?;
                lines.entry(movement_id).or_default().push(MovementLine {
                    product_id: ProductId::from_uuid(get(row, "product_id")?),
                    quantity: get(row, "quantity")?,
                    unit_cost: get(row, "unit_cost")?,
                });
            }

            headers
                .iter()
                .map(|row| {
                    let id: Uuid = get(row, "id")?;
                    let kind: String = get(row, "kind")?;
                    Ok(InventoryMovement {
                        id: MovementId::from_uuid(id),
                        kind: MovementKind::parse(&kind).ok_or_else(|| {
                            StoreError::Backend(format!("unknown movement kind '{kind}'"))
                        })?,
                        occurred_at: get(row, "occurred_at")?,
                        reference: get(row, "reference")?,
                        warehouse_from: get::<Option<Uuid>>(row, "warehouse_from")?
                            .map(WarehouseId::from_uuid),
                        warehouse_to: get::<Option<Uuid>>(row, "warehouse_to")?
                            .map(WarehouseId::from_uuid),
                        lines: lines.remove(&id).unwrap_or_default(),
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()
        })?
    }

    #[instrument(skip(self), fields(reference = %reference), err)]
    fn decisions(&self, reference: ReferenceId) -> Result<Vec<ApprovalDecision>, StoreError> {
        let rows = block_on(
            sqlx::query(
                r#"
                SELECT id, flow_id, reference_id, module, step_id, approver_id,
                       decision, comment, amount, recorded_at
                FROM approval_decisions
                WHERE reference_id = $1
                ORDER BY seq ASC
                "#,
            )
            .bind(reference.as_uuid())
            .fetch_all(&self.pool),
        )?
        .map_err(|e| map_sqlx_error("list_decisions", e))?;

        rows.iter()
            .map(|row| {
                let decision: String = get(row, "decision")?;
                Ok(ApprovalDecision {
                    id: DecisionId::from_uuid(get(row, "id")?),
                    flow_id: FlowId::from_uuid(get(row, "flow_id")?),
                    reference_id: ReferenceId::from_uuid(get(row, "reference_id")?),
                    module: module_from_row(row)?,
                    step_id: get::<Option<Uuid>>(row, "step_id")?.map(StepId::from_uuid),
                    approver_id: UserId::from_uuid(get(row, "approver_id")?),
                    decision: Decision::from_str(&decision)
                        .map_err(|e| StoreError::Backend(e.to_string()))?,
                    comment: get(row, "comment")?,
                    amount: get(row, "amount")?,
                    recorded_at: get(row, "recorded_at")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(transaction = %id), err)]
    fn transaction(&self, id: TransactionId) -> Result<Option<GlTransaction>, StoreError> {
        block_on(async {
            let Some(header) = sqlx::query(
                r#"
                SELECT id, number, date, module, reference_id, description, reversal_of
                FROM gl_transactions
                WHERE id = $1
                "#,
            )
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_gl_transaction", e))?
            else {
                return Ok(None);
            };

            let line_rows = sqlx::query(
                r#"
                SELECT account_id, account_code, debit, credit, note
                FROM gl_transaction_lines
                WHERE transaction_id = $1
                ORDER BY line_no
                "#,
            )
            .bind(id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_gl_transaction_lines", e))?;

            let lines = line_rows
                .iter()
                .map(|row| {
                    Ok(JournalLine {
                        account_id: AccountId::from_uuid(get(row, "account_id")?),
                        account_code: get(row, "account_code")?,
                        debit: get(row, "debit")?,
                        credit: get(row, "credit")?,
                        note: get(row, "note")?,
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            Ok::<_, StoreError>(Some(GlTransaction {
                id,
                number: get(&header, "number")?,
                date: get(&header, "date")?,
                module: module_from_row(&header)?,
                reference_id: get::<Option<Uuid>>(&header, "reference_id")?
                    .map(ReferenceId::from_uuid),
                description: get(&header, "description")?,
                reversal_of: get::<Option<Uuid>>(&header, "reversal_of")?
                    .map(TransactionId::from_uuid),
                lines,
            }))
        })?
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(|e| decode_error(column, e))
}

fn decode_error(column: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to read column {column}: {err}"))
}

fn balance_from_row(row: &PgRow) -> Result<StockBalance, StoreError> {
    let version: i64 = get(row, "version")?;
    let quantity: Decimal = get(row, "quantity")?;
    Ok(StockBalance {
        key: StockKey::new(
            ProductId::from_uuid(get(row, "product_id")?),
            WarehouseId::from_uuid(get(row, "warehouse_id")?),
        ),
        quantity,
        updated_at: get(row, "updated_at")?,
        version: version as u64,
    })
}

fn module_from_row(row: &PgRow) -> Result<BusinessModule, StoreError> {
    let key: String = get(row, "module")?;
    BusinessModule::from_str(&key).map_err(|e| StoreError::Backend(e.to_string()))
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("40001") => StoreError::Concurrency(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
