//! Reference data: approval flows, posting templates, the chart of accounts,
//! warehouses, minimum-stock rules and roles.
//!
//! Engines read configuration only through the lookup traits below, so the
//! source (in-memory fixtures, a Postgres snapshot, a remote service) stays
//! swappable. [`ReferenceCatalog`] is the in-memory implementation of all of
//! them; [`postgres::load_catalog`] fills one from the database.

pub mod postgres;

use std::collections::BTreeMap;
use std::sync::Arc;

use tallyerp_accounting::{GlAccount, GlTemplate};
use tallyerp_approval::ApprovalFlow;
use tallyerp_auth::{DirectoryError, InMemoryRoleDirectory, Role, RoleDirectory};
use tallyerp_core::{BusinessModule, RoleId, UserId, WarehouseId};
use tallyerp_inventory::{MinStockRule, Warehouse};

use crate::store::StoreError;

pub trait FlowRepository: Send + Sync {
    /// Flows (active or not) configured for `module`.
    fn flows_for(&self, module: BusinessModule) -> Result<Vec<ApprovalFlow>, StoreError>;

    fn all_flows(&self) -> Result<Vec<ApprovalFlow>, StoreError>;
}

pub trait TemplateRepository: Send + Sync {
    fn templates_for(&self, module: BusinessModule) -> Result<Vec<GlTemplate>, StoreError>;

    fn all_templates(&self) -> Result<Vec<GlTemplate>, StoreError>;
}

pub trait AccountRepository: Send + Sync {
    fn account_by_code(&self, code: &str) -> Result<Option<GlAccount>, StoreError>;

    fn all_accounts(&self) -> Result<Vec<GlAccount>, StoreError>;
}

pub trait WarehouseDirectory: Send + Sync {
    fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError>;
}

impl<T> FlowRepository for Arc<T>
where
    T: FlowRepository + ?Sized,
{
    fn flows_for(&self, module: BusinessModule) -> Result<Vec<ApprovalFlow>, StoreError> {
        (**self).flows_for(module)
    }

    fn all_flows(&self) -> Result<Vec<ApprovalFlow>, StoreError> {
        (**self).all_flows()
    }
}

impl<T> TemplateRepository for Arc<T>
where
    T: TemplateRepository + ?Sized,
{
    fn templates_for(&self, module: BusinessModule) -> Result<Vec<GlTemplate>, StoreError> {
        (**self).templates_for(module)
    }

    fn all_templates(&self) -> Result<Vec<GlTemplate>, StoreError> {
        (**self).all_templates()
    }
}

impl<T> AccountRepository for Arc<T>
where
    T: AccountRepository + ?Sized,
{
    fn account_by_code(&self, code: &str) -> Result<Option<GlAccount>, StoreError> {
        (**self).account_by_code(code)
    }

    fn all_accounts(&self) -> Result<Vec<GlAccount>, StoreError> {
        (**self).all_accounts()
    }
}

impl<T> WarehouseDirectory for Arc<T>
where
    T: WarehouseDirectory + ?Sized,
{
    fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        (**self).warehouse(id)
    }
}

/// In-memory snapshot of all reference data.
#[derive(Debug, Default)]
pub struct ReferenceCatalog {
    flows: Vec<ApprovalFlow>,
    templates: Vec<GlTemplate>,
    accounts: BTreeMap<String, GlAccount>,
    warehouses: BTreeMap<WarehouseId, Warehouse>,
    min_stock_rules: Vec<MinStockRule>,
    roles: InMemoryRoleDirectory,
}

impl ReferenceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(mut self, flow: ApprovalFlow) -> Self {
        self.flows.push(flow);
        self
    }

    pub fn with_template(mut self, template: GlTemplate) -> Self {
        self.templates.push(template);
        self
    }

    /// Add an account; a later account with the same code replaces the earlier one.
    pub fn with_account(mut self, account: GlAccount) -> Self {
        self.accounts.insert(account.code.clone(), account);
        self
    }

    pub fn with_warehouse(mut self, warehouse: Warehouse) -> Self {
        self.warehouses.insert(warehouse.id, warehouse);
        self
    }

    pub fn with_min_stock_rule(mut self, rule: MinStockRule) -> Self {
        self.min_stock_rules.push(rule);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.add_role(role);
        self
    }

    pub fn with_membership(mut self, user: UserId, role: RoleId) -> Self {
        self.roles.grant(user, role);
        self
    }

    pub fn min_stock_rules(&self) -> &[MinStockRule] {
        &self.min_stock_rules
    }

    pub fn warehouses(&self) -> impl Iterator<Item = &Warehouse> {
        self.warehouses.values()
    }
}

impl FlowRepository for ReferenceCatalog {
    fn flows_for(&self, module: BusinessModule) -> Result<Vec<ApprovalFlow>, StoreError> {
        Ok(self
            .flows
            .iter()
            .filter(|f| f.module == module)
            .cloned()
            .collect())
    }

    fn all_flows(&self) -> Result<Vec<ApprovalFlow>, StoreError> {
        Ok(self.flows.clone())
    }
}

impl TemplateRepository for ReferenceCatalog {
    fn templates_for(&self, module: BusinessModule) -> Result<Vec<GlTemplate>, StoreError> {
        Ok(self
            .templates
            .iter()
            .filter(|t| t.module == module)
            .cloned()
            .collect())
    }

    fn all_templates(&self) -> Result<Vec<GlTemplate>, StoreError> {
        Ok(self.templates.clone())
    }
}

impl AccountRepository for ReferenceCatalog {
    fn account_by_code(&self, code: &str) -> Result<Option<GlAccount>, StoreError> {
        Ok(self.accounts.get(code).cloned())
    }

    fn all_accounts(&self) -> Result<Vec<GlAccount>, StoreError> {
        Ok(self.accounts.values().cloned().collect())
    }
}

impl WarehouseDirectory for ReferenceCatalog {
    fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        Ok(self.warehouses.get(&id).cloned())
    }
}

impl RoleDirectory for ReferenceCatalog {
    fn user_has_role(&self, user: UserId, role: RoleId) -> Result<bool, DirectoryError> {
        self.roles.user_has_role(user, role)
    }

    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, DirectoryError> {
        self.roles.find_role_by_name(name)
    }
}
