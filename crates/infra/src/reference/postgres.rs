//! Load a [`ReferenceCatalog`] from the reference tables.

use std::collections::HashMap;
use std::str::FromStr;

use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{info, instrument};
use uuid::Uuid;

use tallyerp_accounting::{AccountKind, GlAccount, GlTemplate, TemplateLine};
use tallyerp_approval::{ApprovalFlow, ApprovalStep};
use tallyerp_auth::{Role, RoleRef};
use tallyerp_core::{
    AccountId, BusinessModule, FlowId, ProductId, RoleId, StepId, TemplateId, UserId, WarehouseId,
};
use tallyerp_inventory::{MinStockRule, Warehouse};

use super::ReferenceCatalog;
use crate::store::StoreError;
use crate::store::postgres::map_sqlx_error;

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Backend(format!("failed to read column {name}: {e}")))
}

fn module(row: &PgRow) -> Result<BusinessModule, StoreError> {
    let key: String = column(row, "module")?;
    BusinessModule::from_str(&key).map_err(|e| StoreError::Backend(e.to_string()))
}

/// Read every reference table into a fresh catalog.
#[instrument(skip(pool), err)]
pub async fn load_catalog(pool: &PgPool) -> Result<ReferenceCatalog, StoreError> {
    let mut catalog = ReferenceCatalog::new();

    for row in sqlx::query("SELECT id, name FROM warehouses ORDER BY id")
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_warehouses", e))?
    {
        catalog = catalog.with_warehouse(Warehouse::new(
            WarehouseId::from_uuid(column(&row, "id")?),
            column::<String>(&row, "name")?,
        ));
    }

    for row in sqlx::query(
        "SELECT product_id, warehouse_id, min_quantity FROM min_stock_rules ORDER BY product_id, id",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| map_sqlx_error("load_min_stock_rules", e))?
    {
        catalog = catalog.with_min_stock_rule(MinStockRule {
            product_id: ProductId::from_uuid(column(&row, "product_id")?),
            warehouse_id: column::<Option<Uuid>>(&row, "warehouse_id")?.map(WarehouseId::from_uuid),
            min_quantity: column(&row, "min_quantity")?,
        });
    }

    for row in sqlx::query("SELECT id, name FROM roles ORDER BY id")
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_roles", e))?
    {
        catalog = catalog.with_role(Role::new(
            RoleId::from_uuid(column(&row, "id")?),
            column::<String>(&row, "name")?,
        ));
    }

    for row in sqlx::query("SELECT user_id, role_id FROM user_roles")
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_user_roles", e))?
    {
        catalog = catalog.with_membership(
            UserId::from_uuid(column(&row, "user_id")?),
            RoleId::from_uuid(column(&row, "role_id")?),
        );
    }

    for row in sqlx::query("SELECT id, code, name, kind FROM gl_accounts ORDER BY code")
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_gl_accounts", e))?
    {
        let kind: String = column(&row, "kind")?;
        catalog = catalog.with_account(GlAccount {
            id: AccountId::from_uuid(column(&row, "id")?),
            code: column(&row, "code")?,
            name: column(&row, "name")?,
            kind: AccountKind::from_str(&kind).map_err(|e| StoreError::Backend(e.to_string()))?,
        });
    }

    let mut steps: HashMap<Uuid, Vec<ApprovalStep>> = HashMap::new();
    for row in sqlx::query(
        r#"
        SELECT id, flow_id, step_number, role_id, role_name, min_amount, max_amount
        FROM approval_steps
        ORDER BY flow_id, step_number, id
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| map_sqlx_error("load_approval_steps", e))?
    {
        let step_number: i32 = column(&row, "step_number")?;
        steps
            .entry(column(&row, "flow_id")?)
            .or_default()
            .push(ApprovalStep {
                id: StepId::from_uuid(column(&row, "id")?),
                step_number: u32::try_from(step_number).map_err(|_| {
                    StoreError::Backend(format!("negative step number {step_number}"))
                })?,
                role: RoleRef {
                    role_id: column::<Option<Uuid>>(&row, "role_id")?.map(RoleId::from_uuid),
                    role_name: column(&row, "role_name")?,
                },
                min_amount: column(&row, "min_amount")?,
                max_amount: column(&row, "max_amount")?,
            });
    }

    for row in sqlx::query("SELECT id, name, module, is_active FROM approval_flows ORDER BY name, id")
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_approval_flows", e))?
    {
        let id: Uuid = column(&row, "id")?;
        catalog = catalog.with_flow(ApprovalFlow {
            id: FlowId::from_uuid(id),
            name: column(&row, "name")?,
            module: module(&row)?,
            is_active: column(&row, "is_active")?,
            steps: steps.remove(&id).unwrap_or_default(),
        });
    }

    let mut lines: HashMap<Uuid, Vec<TemplateLine>> = HashMap::new();
    for row in sqlx::query(
        r#"
        SELECT template_id, account_code, is_debit, amount_formula, line_order
        FROM gl_template_lines
        ORDER BY template_id, line_order, id
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| map_sqlx_error("load_gl_template_lines", e))?
    {
        lines
            .entry(column(&row, "template_id")?)
            .or_default()
            .push(TemplateLine {
                account_code: column(&row, "account_code")?,
                is_debit: column(&row, "is_debit")?,
                amount_formula: column(&row, "amount_formula")?,
                line_order: column(&row, "line_order")?,
            });
    }

    for row in sqlx::query("SELECT id, module, name, description FROM gl_templates ORDER BY id")
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_gl_templates", e))?
    {
        let id: Uuid = column(&row, "id")?;
        catalog = catalog.with_template(GlTemplate {
            id: TemplateId::from_uuid(id),
            module: module(&row)?,
            name: column(&row, "name")?,
            description: column(&row, "description")?,
            lines: lines.remove(&id).unwrap_or_default(),
        });
    }

    info!(
        warehouses = catalog.warehouses.len(),
        accounts = catalog.accounts.len(),
        flows = catalog.flows.len(),
        templates = catalog.templates.len(),
        "reference catalog loaded"
    );
    Ok(catalog)
}
