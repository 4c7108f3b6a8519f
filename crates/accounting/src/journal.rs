//! Journal drafting and the committed GL transaction model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{AccountId, BusinessModule, ReferenceId, TransactionId, to_ledger_scale};

use crate::account::GlAccount;
use crate::error::PostingError;
use crate::formula::{Formula, FormulaError, Variables};
use crate::template::GlTemplate;

/// One side of a journal entry. Exactly one of `debit`/`credit` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: AccountId,
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub note: Option<String>,
}

impl JournalLine {
    pub fn debit(account: &GlAccount, amount: Decimal, note: Option<String>) -> Self {
        Self {
            account_id: account.id,
            account_code: account.code.clone(),
            debit: amount,
            credit: Decimal::ZERO,
            note,
        }
    }

    pub fn credit(account: &GlAccount, amount: Decimal, note: Option<String>) -> Self {
        Self {
            account_id: account.id,
            account_code: account.code.clone(),
            debit: Decimal::ZERO,
            credit: amount,
            note,
        }
    }

    fn swapped(&self) -> Self {
        Self {
            account_id: self.account_id,
            account_code: self.account_code.clone(),
            debit: self.credit,
            credit: self.debit,
            note: self.note.clone(),
        }
    }
}

/// A journal entry that has not been numbered or persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalDraft {
    pub module: BusinessModule,
    pub reference_id: Option<ReferenceId>,
    pub description: Option<String>,
    pub reversal_of: Option<TransactionId>,
    pub lines: Vec<JournalLine>,
}

impl JournalDraft {
    pub fn total_debit(&self) -> Result<Decimal, PostingError> {
        sum(self.lines.iter().map(|l| l.debit))
    }

    pub fn total_credit(&self) -> Result<Decimal, PostingError> {
        sum(self.lines.iter().map(|l| l.credit))
    }

    /// Enforce the double-entry invariants a draft must meet before it may be
    /// persisted: at least one line, no negative sides, Σdebit == Σcredit.
    pub fn ensure_balanced(&self) -> Result<(), PostingError> {
        if self.lines.is_empty() {
            return Err(PostingError::EmptyEntry);
        }
        if self
            .lines
            .iter()
            .any(|l| l.debit < Decimal::ZERO || l.credit < Decimal::ZERO)
        {
            return Err(PostingError::validation("journal lines cannot carry negative amounts"));
        }

        let total_debit = self.total_debit()?;
        let total_credit = self.total_credit()?;
        if total_debit != total_credit {
            return Err(PostingError::UnbalancedEntry {
                total_debit,
                total_credit,
            });
        }
        Ok(())
    }

    /// Attach identity and number, producing the immutable record.
    pub fn into_transaction(
        self,
        id: TransactionId,
        number: String,
        date: DateTime<Utc>,
    ) -> GlTransaction {
        GlTransaction {
            id,
            number,
            date,
            module: self.module,
            reference_id: self.reference_id,
            description: self.description,
            reversal_of: self.reversal_of,
            lines: self.lines,
        }
    }
}

fn sum(mut amounts: impl Iterator<Item = Decimal>) -> Result<Decimal, PostingError> {
    amounts.try_fold(Decimal::ZERO, |acc, a| {
        acc.checked_add(a)
            .ok_or_else(|| PostingError::validation("journal total overflows"))
    })
}

/// Request to draft a journal entry from a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostJournal {
    pub module: BusinessModule,
    pub reference_id: Option<ReferenceId>,
    pub variables: Variables,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Draft a balanced journal entry from `template`.
///
/// Lines are evaluated in `line_order`; each resolves its account through
/// `accounts` (keyed by code). Amounts are rounded to the ledger scale before
/// anything else, so the balance check sees exactly what gets stored. Zero
/// amounts are skipped. Negative amounts are rejected rather than flipped to
/// the other side.
pub fn draft_entry(
    template: &GlTemplate,
    accounts: &BTreeMap<String, GlAccount>,
    variables: &Variables,
    reference_id: Option<ReferenceId>,
    description: Option<String>,
) -> Result<JournalDraft, PostingError> {
    let mut lines = Vec::with_capacity(template.lines.len());

    for line in template.ordered_lines() {
        let account = accounts
            .get(&line.account_code)
            .ok_or_else(|| PostingError::AccountNotFound(line.account_code.clone()))?;

        let formula_error = |source: FormulaError| PostingError::FormulaEvaluation {
            account_code: line.account_code.clone(),
            formula: line.amount_formula.clone(),
            source,
        };
        let amount = Formula::parse(&line.amount_formula)
            .and_then(|f| f.eval(variables))
            .map(to_ledger_scale)
            .map_err(formula_error)?;

        if amount.is_zero() {
            continue;
        }
        if amount < Decimal::ZERO {
            return Err(PostingError::validation(format!(
                "formula '{}' for account {} evaluated to negative amount {amount}",
                line.amount_formula, line.account_code
            )));
        }

        let note = template.name.clone();
        lines.push(if line.is_debit {
            JournalLine::debit(account, amount, note)
        } else {
            JournalLine::credit(account, amount, note)
        });
    }

    let draft = JournalDraft {
        module: template.module,
        reference_id,
        description: description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .or_else(|| template.description.clone()),
        reversal_of: None,
        lines,
    };
    draft.ensure_balanced()?;
    Ok(draft)
}

/// A committed, immutable journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlTransaction {
    pub id: TransactionId,
    pub number: String,
    pub date: DateTime<Utc>,
    pub module: BusinessModule,
    pub reference_id: Option<ReferenceId>,
    pub description: Option<String>,
    pub reversal_of: Option<TransactionId>,
    pub lines: Vec<JournalLine>,
}

impl GlTransaction {
    pub fn total_debit(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    pub fn total_credit(&self) -> Decimal {
        self.lines.iter().map(|l| l.credit).sum()
    }

    /// Draft the correcting entry: every line with its sides swapped.
    pub fn reversal(&self, reason: &str) -> JournalDraft {
        let reason = reason.trim();
        let description = if reason.is_empty() {
            format!("Reversal of {}", self.number)
        } else {
            format!("Reversal of {}: {reason}", self.number)
        };

        JournalDraft {
            module: self.module,
            reference_id: self.reference_id,
            description: Some(description),
            reversal_of: Some(self.id),
            lines: self.lines.iter().map(JournalLine::swapped).collect(),
        }
    }
}

/// Human-readable transaction number: `<prefix>-<yyyymmdd>-<seq:06>`.
pub fn transaction_number(prefix: &str, date: DateTime<Utc>, sequence: u64) -> String {
    format!("{prefix}-{}-{sequence:06}", date.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountKind;
    use crate::template::TemplateLine;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use tallyerp_core::TemplateId;

    fn account(code: &str, kind: AccountKind) -> GlAccount {
        GlAccount {
            id: AccountId::new(),
            code: code.to_string(),
            name: code.to_string(),
            kind,
        }
    }

    fn chart() -> BTreeMap<String, GlAccount> {
        [
            account("Cash", AccountKind::Asset),
            account("Revenue", AccountKind::Revenue),
            account("TaxPayable", AccountKind::Liability),
        ]
        .into_iter()
        .map(|a| (a.code.clone(), a))
        .collect()
    }

    fn line(code: &str, is_debit: bool, formula: &str, order: i32) -> TemplateLine {
        TemplateLine {
            account_code: code.to_string(),
            is_debit,
            amount_formula: formula.to_string(),
            line_order: order,
        }
    }

    fn pos_sale_template() -> GlTemplate {
        GlTemplate {
            id: TemplateId::new(),
            module: BusinessModule::PosSale,
            name: None,
            description: Some("POS sale".to_string()),
            lines: vec![
                line("Cash", true, "Total", 1),
                line("Revenue", false, "Total-Tax", 2),
                line("TaxPayable", false, "Tax", 3),
            ],
        }
    }

    fn vars(pairs: &[(&str, Decimal)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn pos_sale_posts_three_balanced_lines() {
        let draft = draft_entry(
            &pos_sale_template(),
            &chart(),
            &vars(&[("Total", dec!(110)), ("Tax", dec!(10))]),
            None,
            None,
        )
        .unwrap();

        let summary: Vec<(&str, Decimal, Decimal)> = draft
            .lines
            .iter()
            .map(|l| (l.account_code.as_str(), l.debit, l.credit))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Cash", dec!(110), dec!(0)),
                ("Revenue", dec!(0), dec!(100)),
                ("TaxPayable", dec!(0), dec!(10)),
            ]
        );
        assert_eq!(draft.description.as_deref(), Some("POS sale"));
    }

    #[test]
    fn zero_lines_are_skipped() {
        let draft = draft_entry(
            &pos_sale_template(),
            &chart(),
            &vars(&[("Total", dec!(50)), ("Tax", dec!(0))]),
            None,
            Some("tax exempt".to_string()),
        )
        .unwrap();
        assert_eq!(draft.lines.len(), 2);
        assert_eq!(draft.description.as_deref(), Some("tax exempt"));
    }

    #[test]
    fn unbalanced_template_is_rejected() {
        let mut template = pos_sale_template();
        template.lines[1].amount_formula = "Total".to_string();

        let err = draft_entry(
            &template,
            &chart(),
            &vars(&[("Total", dec!(110)), ("Tax", dec!(10))]),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            PostingError::UnbalancedEntry {
                total_debit: dec!(110),
                total_credit: dec!(120)
            }
        );
    }

    #[test]
    fn missing_account_and_variable_are_reported() {
        let mut accounts = chart();
        accounts.remove("TaxPayable");
        let err = draft_entry(
            &pos_sale_template(),
            &accounts,
            &vars(&[("Total", dec!(110)), ("Tax", dec!(10))]),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err, PostingError::AccountNotFound("TaxPayable".to_string()));

        let err = draft_entry(&pos_sale_template(), &chart(), &vars(&[("Total", dec!(1))]), None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            PostingError::FormulaEvaluation {
                source: FormulaError::UnknownVariable(ref v),
                ..
            } if v == "Tax"
        ));
    }

    #[test]
    fn negative_amounts_and_empty_entries_are_rejected() {
        let err = draft_entry(
            &pos_sale_template(),
            &chart(),
            &vars(&[("Total", dec!(5)), ("Tax", dec!(10))]),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PostingError::Validation(_)));

        let err = draft_entry(
            &pos_sale_template(),
            &chart(),
            &vars(&[("Total", dec!(0)), ("Tax", dec!(0))]),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err, PostingError::EmptyEntry);
    }

    #[test]
    fn reversal_swaps_sides_and_stays_balanced() {
        let draft = draft_entry(
            &pos_sale_template(),
            &chart(),
            &vars(&[("Total", dec!(110)), ("Tax", dec!(10))]),
            Some(ReferenceId::new()),
            None,
        )
        .unwrap();
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let original = draft.into_transaction(TransactionId::new(), "GL-20240309-000001".to_string(), date);

        let reversal = original.reversal("customer refund");
        reversal.ensure_balanced().unwrap();
        assert_eq!(reversal.reversal_of, Some(original.id));
        assert_eq!(reversal.reference_id, original.reference_id);
        assert_eq!(reversal.lines[0].credit, dec!(110));
        assert_eq!(reversal.lines[0].debit, dec!(0));
        assert_eq!(
            reversal.description.as_deref(),
            Some("Reversal of GL-20240309-000001: customer refund")
        );
    }

    fn split_in_thirds_template() -> GlTemplate {
        GlTemplate {
            id: TemplateId::new(),
            module: BusinessModule::PosSale,
            name: Some("three-way split".to_string()),
            description: None,
            lines: vec![
                line("Cash", true, "Total", 1),
                line("Revenue", false, "Total/3", 2),
                line("Revenue", false, "Total/3", 3),
                line("TaxPayable", false, "Total - Total/3 - Total/3", 4),
            ],
        }
    }

    #[test]
    fn amounts_are_rounded_before_the_balance_check() {
        let err = draft_entry(
            &split_in_thirds_template(),
            &chart(),
            &vars(&[("Total", dec!(1))]),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            PostingError::UnbalancedEntry {
                total_debit: dec!(1),
                total_credit: dec!(0.99999999),
            }
        );

        let draft = draft_entry(
            &split_in_thirds_template(),
            &chart(),
            &vars(&[("Total", dec!(0.3))]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(draft.total_credit().unwrap(), dec!(0.3));
        assert!(
            draft
                .lines
                .iter()
                .all(|l| l.debit.scale() <= 8 && l.credit.scale() <= 8)
        );
    }

    #[test]
    fn amounts_below_the_ledger_scale_are_skipped() {
        let draft = draft_entry(
            &pos_sale_template(),
            &chart(),
            &vars(&[("Total", dec!(10)), ("Tax", dec!(0.000000001))]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(draft.lines.len(), 2);
        assert_eq!(draft.total_debit().unwrap(), dec!(10));
    }

    #[test]
    fn numbers_are_prefixed_dated_and_padded() {
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        assert_eq!(transaction_number("GL", date, 42), "GL-20240309-000042");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every draft that passes validation has Σdebit == Σcredit.
        #[test]
        fn accepted_drafts_are_balanced(
            total_cents in 0i64..10_000_000,
            tax_cents in 0i64..10_000_000,
        ) {
            let v = vars(&[
                ("Total", Decimal::new(total_cents, 2)),
                ("Tax", Decimal::new(tax_cents, 2)),
            ]);
            match draft_entry(&pos_sale_template(), &chart(), &v, None, None) {
                Ok(draft) => {
                    prop_assert_eq!(draft.total_debit().unwrap(), draft.total_credit().unwrap());
                    prop_assert!(!draft.lines.is_empty());
                }
                Err(err) => prop_assert!(matches!(
                    err,
                    PostingError::Validation(_) | PostingError::EmptyEntry
                )),
            }
        }
    }
}
