use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use tallyerp_core::{BusinessModule, TemplateId};

use crate::account::GlAccount;
use crate::formula::{Formula, FormulaError};

/// One line of a posting template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateLine {
    pub account_code: String,
    pub is_debit: bool,
    pub amount_formula: String,
    pub line_order: i32,
}

/// Posting template for a business module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlTemplate {
    pub id: TemplateId,
    pub module: BusinessModule,
    pub name: Option<String>,
    pub description: Option<String>,
    pub lines: Vec<TemplateLine>,
}

impl GlTemplate {
    /// Lines in posting order (`line_order`, ties kept in stored order).
    pub fn ordered_lines(&self) -> Vec<&TemplateLine> {
        let mut lines: Vec<&TemplateLine> = self.lines.iter().collect();
        lines.sort_by_key(|l| l.line_order);
        lines
    }

    fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// Resolve the template for `module`.
///
/// With a name, only templates carrying exactly that name match. Without one,
/// an unnamed template wins, then the lowest name. Remaining ties go to the
/// lowest id so the choice never depends on storage order.
pub fn select_template<'a>(
    templates: impl IntoIterator<Item = &'a GlTemplate>,
    module: BusinessModule,
    name: Option<&str>,
) -> Option<&'a GlTemplate> {
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    let candidates = templates.into_iter().filter(|t| t.module == module);

    match name {
        Some(wanted) => candidates
            .filter(|t| t.name.as_deref().map(str::trim) == Some(wanted))
            .min_by_key(|t| t.id),
        None => candidates.min_by(|a, b| {
            a.has_name()
                .cmp(&b.has_name())
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        }),
    }
}

/// Configuration problem found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateIssue {
    NoLines {
        template_id: TemplateId,
    },
    InvalidFormula {
        template_id: TemplateId,
        line_order: i32,
        formula: String,
        error: FormulaError,
    },
    UnknownAccount {
        template_id: TemplateId,
        line_order: i32,
        account_code: String,
    },
    DuplicateLineOrder {
        template_id: TemplateId,
        line_order: i32,
    },
    DuplicateName {
        module: BusinessModule,
        name: Option<String>,
        templates: Vec<TemplateId>,
    },
}

impl core::fmt::Display for TemplateIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TemplateIssue::NoLines { template_id } => write!(f, "template {template_id} has no lines"),
            TemplateIssue::InvalidFormula {
                template_id,
                line_order,
                formula,
                error,
            } => write!(
                f,
                "template {template_id} line {line_order}: formula '{formula}' does not parse: {error}"
            ),
            TemplateIssue::UnknownAccount {
                template_id,
                line_order,
                account_code,
            } => write!(
                f,
                "template {template_id} line {line_order}: unknown account {account_code}"
            ),
            TemplateIssue::DuplicateLineOrder {
                template_id,
                line_order,
            } => write!(f, "template {template_id} repeats line order {line_order}"),
            TemplateIssue::DuplicateName {
                module,
                name,
                templates,
            } => write!(
                f,
                "module {module} has {} templates named '{}'",
                templates.len(),
                name.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Parse every formula and check every account code up front.
pub fn validate_templates(
    templates: &[GlTemplate],
    accounts: &BTreeMap<String, GlAccount>,
) -> Vec<TemplateIssue> {
    let mut issues = Vec::new();

    for template in templates {
        let template_id = template.id;
        if template.lines.is_empty() {
            issues.push(TemplateIssue::NoLines { template_id });
        }

        let mut orders = HashSet::new();
        for line in template.ordered_lines() {
            if !orders.insert(line.line_order) {
                issues.push(TemplateIssue::DuplicateLineOrder {
                    template_id,
                    line_order: line.line_order,
                });
            }
            if !accounts.contains_key(&line.account_code) {
                issues.push(TemplateIssue::UnknownAccount {
                    template_id,
                    line_order: line.line_order,
                    account_code: line.account_code.clone(),
                });
            }
            if let Err(error) = Formula::parse(&line.amount_formula) {
                issues.push(TemplateIssue::InvalidFormula {
                    template_id,
                    line_order: line.line_order,
                    formula: line.amount_formula.clone(),
                    error,
                });
            }
        }
    }

    let mut by_name: BTreeMap<(BusinessModule, Option<String>), Vec<TemplateId>> = BTreeMap::new();
    for template in templates {
        let name = template
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        by_name.entry((template.module, name)).or_default().push(template.id);
    }
    for ((module, name), mut ids) in by_name {
        if ids.len() > 1 {
            ids.sort();
            issues.push(TemplateIssue::DuplicateName {
                module,
                name,
                templates: ids,
            });
        }
    }

    issues
}
