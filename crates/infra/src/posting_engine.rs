//! General-ledger posting: template → balanced journal → persisted transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tallyerp_accounting::{
    GlAccount, GlTemplate, GlTransaction, JournalDraft, PostJournal, PostingError, TemplateIssue,
    draft_entry, select_template, transaction_number, validate_templates,
};
use tallyerp_core::TransactionId;

use crate::error::LedgerResult;
use crate::reference::{AccountRepository, TemplateRepository};
use crate::store::{LedgerStore, UnitOfWork};

/// Identity of a committed GL transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedTransaction {
    pub transaction_id: TransactionId,
    pub number: String,
}

pub struct LedgerPostingEngine<S> {
    store: Arc<S>,
    templates: Arc<dyn TemplateRepository>,
    accounts: Arc<dyn AccountRepository>,
    number_prefix: String,
}

impl<S> Clone for LedgerPostingEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            templates: Arc::clone(&self.templates),
            accounts: Arc::clone(&self.accounts),
            number_prefix: self.number_prefix.clone(),
        }
    }
}

impl<S: LedgerStore> LedgerPostingEngine<S> {
    pub fn new(
        store: Arc<S>,
        templates: Arc<dyn TemplateRepository>,
        accounts: Arc<dyn AccountRepository>,
        number_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            templates,
            accounts,
            number_prefix: number_prefix.into(),
        }
    }

    /// Post `request` in a unit of work of its own.
    pub fn post(&self, request: PostJournal) -> LedgerResult<PostedTransaction> {
        let mut tx = self.store.begin()?;
        let posted = self.post_in(&mut tx, request)?;
        tx.commit()?;

        tracing::info!(
            transaction_id = %posted.transaction_id,
            number = %posted.number,
            "GL transaction posted"
        );
        Ok(posted)
    }

    /// Draft, balance-check and stage `request` in the caller's unit of work.
    #[instrument(skip(self, tx, request), fields(module = %request.module, template = ?request.template_name), err)]
    pub fn post_in<U: UnitOfWork>(
        &self,
        tx: &mut U,
        request: PostJournal,
    ) -> LedgerResult<PostedTransaction> {
        let draft = self.draft(&request)?;
        self.persist(tx, draft)
    }

    /// Draft the entry `request` would post without writing anything.
    pub fn draft(&self, request: &PostJournal) -> LedgerResult<JournalDraft> {
        let templates = self.templates.templates_for(request.module)?;
        let template = select_template(&templates, request.module, request.template_name.as_deref())
            .ok_or_else(|| PostingError::TemplateNotFound {
                module: request.module,
                name: request.template_name.clone(),
            })?;

        let accounts = self.accounts_for(template)?;
        match draft_entry(
            template,
            &accounts,
            &request.variables,
            request.reference_id,
            request.description.clone(),
        ) {
            Ok(draft) => Ok(draft),
            Err(err) => {
                tracing::warn!(module = %request.module, error = %err, "journal rejected");
                Err(err.into())
            }
        }
    }

    /// Post the mirror image of transaction `id`.
    pub fn reverse(&self, id: TransactionId, reason: &str) -> LedgerResult<PostedTransaction> {
        let original = self
            .store
            .transaction(id)?
            .ok_or(PostingError::TransactionNotFound(id))?;

        let mut tx = self.store.begin()?;
        let posted = self.reverse_in(&mut tx, &original, reason)?;
        tx.commit()?;

        tracing::info!(
            transaction_id = %posted.transaction_id,
            number = %posted.number,
            reversal_of = %original.id,
            "GL transaction reversed"
        );
        Ok(posted)
    }

    pub fn reverse_in<U: UnitOfWork>(
        &self,
        tx: &mut U,
        original: &GlTransaction,
        reason: &str,
    ) -> LedgerResult<PostedTransaction> {
        self.persist(tx, original.reversal(reason))
    }

    pub fn transaction(&self, id: TransactionId) -> LedgerResult<Option<GlTransaction>> {
        Ok(self.store.transaction(id)?)
    }

    /// Parse every formula and resolve every account code.
    pub fn validate_templates(&self) -> LedgerResult<Vec<TemplateIssue>> {
        let templates = self.templates.all_templates()?;
        let accounts: BTreeMap<String, GlAccount> = self
            .accounts
            .all_accounts()?
            .into_iter()
            .map(|a| (a.code.clone(), a))
            .collect();
        Ok(validate_templates(&templates, &accounts))
    }

    fn accounts_for(&self, template: &GlTemplate) -> LedgerResult<BTreeMap<String, GlAccount>> {
        let mut accounts = BTreeMap::new();
        for line in &template.lines {
            if accounts.contains_key(&line.account_code) {
                continue;
            }
            if let Some(account) = self.accounts.account_by_code(&line.account_code)? {
                accounts.insert(line.account_code.clone(), account);
            }
        }
        Ok(accounts)
    }

    fn persist<U: UnitOfWork>(&self, tx: &mut U, draft: JournalDraft) -> LedgerResult<PostedTransaction> {
        draft.ensure_balanced()?;

        let date = Utc::now();
        let sequence = tx.next_transaction_sequence()?;
        let number = transaction_number(&self.number_prefix, date, sequence);
        let transaction = draft.into_transaction(TransactionId::new(), number, date);
        tx.insert_transaction(&transaction)?;

        Ok(PostedTransaction {
            transaction_id: transaction.id,
            number: transaction.number,
        })
    }
}
