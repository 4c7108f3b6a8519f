//! Integration tests for the full event pipeline.
//!
//! Tests: BusinessEvent → approval gate → StockLedger → LedgerPostingEngine → commit
//!
//! Verifies:
//! - Balances move by exactly the requested quantities, or not at all
//! - A failure anywhere in an event leaves no decision, movement or journal
//! - Only balanced journals are ever persisted
//! - Approval routing and role checks behave as configured
//! - Concurrent writers on one balance row never lose an update

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use tallyerp_accounting::{AccountKind, GlAccount, GlTemplate, PostJournal, PostingError, TemplateLine, Variables};
    use tallyerp_approval::{ApprovalError, ApprovalFlow, ApprovalStep, Decision};
    use tallyerp_auth::{Role, RoleRef};
    use tallyerp_core::{
        AccountId, BusinessModule, FlowId, ProductId, ReferenceId, RoleId, StepId, TemplateId,
        UserId, WarehouseId,
    };
    use tallyerp_inventory::{
        InventoryError, IssueStock, MovementLine, ReceiveStock, StockCommand, TransferStock,
        Warehouse,
    };

    use crate::approval_engine::SubmitDecision;
    use crate::config::LedgerConfig;
    use crate::error::LedgerError;
    use crate::event_handler::{BusinessEvent, BusinessEventHandler, EventOutcome, PostingRequest};
    use crate::reference::ReferenceCatalog;
    use crate::store::{InMemoryLedgerStore, LedgerStore};

    struct World {
        handler: BusinessEventHandler<InMemoryLedgerStore>,
        store: Arc<InMemoryLedgerStore>,
        main: WarehouseId,
        branch: WarehouseId,
        manager: UserId,
        director: UserId,
        /// Holds Manager plus an unrelated role.
        clerk: UserId,
    }

    fn account(code: &str, name: &str, kind: AccountKind) -> GlAccount {
        GlAccount {
            id: AccountId::new(),
            code: code.to_string(),
            name: name.to_string(),
            kind,
        }
    }

    fn line(code: &str, is_debit: bool, formula: &str, order: i32) -> TemplateLine {
        TemplateLine {
            account_code: code.to_string(),
            is_debit,
            amount_formula: formula.to_string(),
            line_order: order,
        }
    }

    fn step(step_number: u32, min: Decimal, max: Option<Decimal>, role: &str) -> ApprovalStep {
        ApprovalStep {
            id: StepId::new(),
            step_number,
            role: RoleRef::by_name(role),
            min_amount: min,
            max_amount: max,
        }
    }

    fn world() -> World {
        let main = WarehouseId::new();
        let branch = WarehouseId::new();
        let manager_role = Role::new(RoleId::new(), "Manager");
        let director_role = Role::new(RoleId::new(), "Director");
        let cashier_role = Role::new(RoleId::new(), "Cashier");
        let (manager, director, clerk) = (UserId::new(), UserId::new(), UserId::new());

        let catalog = ReferenceCatalog::new()
            .with_warehouse(Warehouse::new(main, "Main"))
            .with_warehouse(Warehouse::new(branch, "Branch"))
            .with_account(account("1000", "Cash", AccountKind::Asset))
            .with_account(account("1200", "Inventory", AccountKind::Asset))
            .with_account(account("2000", "Payables", AccountKind::Liability))
            .with_account(account("2100", "Tax Payable", AccountKind::Liability))
            .with_account(account("4000", "Revenue", AccountKind::Revenue))
            .with_template(GlTemplate {
                id: TemplateId::new(),
                module: BusinessModule::PosSale,
                name: None,
                description: Some("POS sale".to_string()),
                lines: vec![
                    line("1000", true, "Total", 1),
                    line("4000", false, "Total-Tax", 2),
                    line("2100", false, "Tax", 3),
                ],
            })
            .with_template(GlTemplate {
                id: TemplateId::new(),
                module: BusinessModule::PurchaseGoodsReceipt,
                name: None,
                description: None,
                lines: vec![line("1200", true, "Cost", 1), line("2000", false, "Cost", 2)],
            })
            // Deliberately lopsided: credits only 90% of the debit.
            .with_template(GlTemplate {
                id: TemplateId::new(),
                module: BusinessModule::InventoryAdjustment,
                name: None,
                description: None,
                lines: vec![line("1200", true, "Cost", 1), line("2000", false, "Cost * 0.9", 2)],
            })
            .with_flow(ApprovalFlow {
                id: FlowId::new(),
                name: "PR approvals".to_string(),
                module: BusinessModule::PurchaseRequest,
                is_active: true,
                steps: vec![
                    step(1, dec!(0), Some(dec!(10000)), "Manager"),
                    step(2, dec!(10000), None, "Director"),
                ],
            })
            .with_role(manager_role.clone())
            .with_role(director_role.clone())
            .with_role(cashier_role.clone())
            .with_membership(manager, manager_role.id)
            .with_membership(director, director_role.id)
            .with_membership(clerk, manager_role.id)
            .with_membership(clerk, cashier_role.id);

        let store = Arc::new(InMemoryLedgerStore::new());
        World {
            handler: BusinessEventHandler::from_catalog(
                Arc::clone(&store),
                Arc::new(catalog),
                &LedgerConfig::default(),
            ),
            store,
            main,
            branch,
            manager,
            director,
            clerk,
        }
    }

    fn vars(pairs: &[(&str, Decimal)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn receive(world: &World, product: ProductId, quantity: Decimal) {
        world
            .handler
            .stock()
            .receive(ReceiveStock {
                to: world.main,
                lines: vec![MovementLine::new(product, quantity, dec!(1))],
                reference: "GR".to_string(),
                occurred_at: Utc::now(),
            })
            .unwrap();
    }

    fn event(module: BusinessModule, amount: Decimal) -> BusinessEvent {
        BusinessEvent {
            module,
            reference_id: ReferenceId::new(),
            amount,
            approver: None,
            comment: None,
            stock: None,
            posting: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn pos_sale_example_posts_cash_revenue_and_tax() {
        let w = world();
        let posted = w
            .handler
            .posting()
            .post(PostJournal {
                module: BusinessModule::PosSale,
                reference_id: Some(ReferenceId::new()),
                variables: vars(&[("Total", dec!(110)), ("Tax", dec!(10))]),
                template_name: None,
                description: None,
            })
            .unwrap();

        let txn = w.handler.posting().transaction(posted.transaction_id).unwrap().unwrap();
        let amounts: Vec<(&str, Decimal, Decimal)> = txn
            .lines
            .iter()
            .map(|l| (l.account_code.as_str(), l.debit, l.credit))
            .collect();
        assert_eq!(
            amounts,
            vec![
                ("1000", dec!(110), dec!(0)),
                ("4000", dec!(0), dec!(100)),
                ("2100", dec!(0), dec!(10)),
            ]
        );
        assert_eq!(txn.description.as_deref(), Some("POS sale"));
    }

    #[test]
    fn issuing_seven_of_five_fails_and_keeps_five() {
        let w = world();
        let product = ProductId::new();
        receive(&w, product, dec!(5));

        let err = w
            .handler
            .stock()
            .issue(IssueStock {
                from: w.main,
                lines: vec![MovementLine::new(product, dec!(7), dec!(1))],
                reference: "SO".to_string(),
                occurred_at: Utc::now(),
            })
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Inventory(InventoryError::InsufficientStock { requested, available, .. })
                if requested == dec!(7) && available == dec!(5)
        ));
        assert_eq!(w.handler.stock().balance(product, w.main).unwrap(), dec!(5));
    }

    #[test]
    fn purchase_request_of_fifteen_thousand_routes_to_director() {
        let w = world();
        let approvals = w.handler.approvals();
        let step = approvals
            .required_step(BusinessModule::PurchaseRequest, dec!(15000))
            .unwrap()
            .unwrap();
        assert_eq!(step.step_number, 2);

        // Deterministic for identical inputs.
        for _ in 0..3 {
            assert_eq!(
                approvals
                    .required_step(BusinessModule::PurchaseRequest, dec!(15000))
                    .unwrap()
                    .map(|s| s.id),
                Some(step.id)
            );
        }
    }

    #[test]
    fn holding_other_roles_does_not_grant_approval() {
        let w = world();
        let approvals = w.handler.approvals();
        assert!(!approvals.can_approve(w.clerk, BusinessModule::PurchaseRequest, dec!(15000)).unwrap());
        assert!(approvals.can_approve(w.clerk, BusinessModule::PurchaseRequest, dec!(500)).unwrap());
        assert!(approvals.can_approve(w.director, BusinessModule::PurchaseRequest, dec!(15000)).unwrap());
        assert!(!approvals.can_approve(w.manager, BusinessModule::PurchaseRequest, dec!(15000)).unwrap());
    }

    #[test]
    fn transfer_to_unknown_warehouse_leaves_source_untouched() {
        let w = world();
        let product = ProductId::new();
        receive(&w, product, dec!(10));

        let err = w
            .handler
            .stock()
            .transfer(TransferStock {
                from: w.main,
                to: WarehouseId::new(),
                lines: vec![MovementLine::new(product, dec!(4), dec!(1))],
                reference: "TR".to_string(),
                occurred_at: Utc::now(),
            })
            .unwrap_err();

        assert!(matches!(err, LedgerError::Inventory(InventoryError::UnknownWarehouse(_))));
        assert_eq!(w.handler.stock().balance(product, w.main).unwrap(), dec!(10));
        assert_eq!(
            w.handler
                .stock()
                .movements(product, Utc::now() - Duration::days(1))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn transfer_rolled_back_by_later_posting_failure() {
        let w = world();
        let product = ProductId::new();
        receive(&w, product, dec!(10));

        let mut evt = event(BusinessModule::InventoryAdjustment, dec!(0));
        evt.stock = Some(StockCommand::Transfer(TransferStock {
            from: w.main,
            to: w.branch,
            lines: vec![MovementLine::new(product, dec!(4), dec!(1))],
            reference: "TR".to_string(),
            occurred_at: Utc::now(),
        }));
        evt.posting = Some(PostingRequest {
            variables: vars(&[("Cost", dec!(40))]),
            template_name: None,
            description: None,
        });

        let err = w.handler.handle(evt).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Posting(PostingError::UnbalancedEntry { total_debit, total_credit })
                if total_debit == dec!(40) && total_credit == dec!(36)
        ));

        assert_eq!(w.handler.stock().balance(product, w.main).unwrap(), dec!(10));
        assert_eq!(w.handler.stock().balance(product, w.branch).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn goods_receipt_event_commits_stock_and_journal_together() {
        let w = world();
        let product = ProductId::new();

        let mut evt = event(BusinessModule::PurchaseGoodsReceipt, dec!(250));
        evt.stock = Some(StockCommand::Receive(ReceiveStock {
            to: w.main,
            lines: vec![MovementLine::new(product, dec!(25), dec!(10))],
            reference: "GR-7".to_string(),
            occurred_at: Utc::now(),
        }));
        evt.posting = Some(PostingRequest {
            variables: vars(&[("Cost", dec!(250))]),
            template_name: None,
            description: Some("Goods receipt GR-7".to_string()),
        });

        let outcome = w.handler.handle(evt).unwrap();
        let EventOutcome::Completed { decision, movement, transaction } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert!(decision.is_none());
        assert!(movement.is_some());
        let txn = w
            .store
            .transaction(transaction.unwrap().transaction_id)
            .unwrap()
            .unwrap();
        assert_eq!(txn.total_debit(), txn.total_credit());
        assert_eq!(w.handler.stock().balance(product, w.main).unwrap(), dec!(25));
    }

    #[test]
    fn purchase_request_needs_director_sign_off() {
        let w = world();

        let mut evt = event(BusinessModule::PurchaseRequest, dec!(15000));
        let outcome = w.handler.handle(evt.clone()).unwrap();
        assert!(matches!(outcome, EventOutcome::AwaitingApproval { ref step } if step.step_number == 2));

        evt.approver = Some(w.manager);
        let err = w.handler.handle(evt.clone()).unwrap_err();
        assert!(matches!(err, LedgerError::Approval(ApprovalError::PermissionDenied { .. })));

        evt.approver = Some(w.director);
        let outcome = w.handler.handle(evt.clone()).unwrap();
        assert!(matches!(outcome, EventOutcome::Completed { decision: Some(_), .. }));
        assert_eq!(w.handler.approvals().history(evt.reference_id).unwrap().len(), 1);
    }

    #[test]
    fn unbalanced_journal_persists_nothing() {
        let w = world();
        let err = w
            .handler
            .posting()
            .post(PostJournal {
                module: BusinessModule::InventoryAdjustment,
                reference_id: None,
                variables: vars(&[("Cost", dec!(100))]),
                template_name: None,
                description: None,
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Posting(PostingError::UnbalancedEntry { .. })));

        // The next successful posting still gets the first number.
        let posted = w
            .handler
            .posting()
            .post(PostJournal {
                module: BusinessModule::PurchaseGoodsReceipt,
                reference_id: None,
                variables: vars(&[("Cost", dec!(100))]),
                template_name: None,
                description: None,
            })
            .unwrap();
        assert!(posted.number.ends_with("-000001"));
    }

    #[test]
    fn concurrent_issues_never_oversell() {
        let w = world();
        let product = ProductId::new();
        receive(&w, product, dec!(5));

        let results: Vec<Result<_, LedgerError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let stock = w.handler.stock().clone();
                    let from = w.main;
                    scope.spawn(move || {
                        stock.issue(IssueStock {
                            from,
                            lines: vec![MovementLine::new(product, dec!(1), dec!(1))],
                            reference: format!("SO-{i}"),
                            occurred_at: Utc::now(),
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let issued = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(issued, 5);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
            e,
            LedgerError::Inventory(InventoryError::InsufficientStock { .. })
        )));
        assert_eq!(w.handler.stock().balance(product, w.main).unwrap(), Decimal::ZERO);

        let movements = w
            .handler
            .stock()
            .movements(product, Utc::now() - Duration::days(1))
            .unwrap();
        assert_eq!(movements.len(), 1 + issued);
    }

    #[test]
    fn concurrent_receipts_all_land() {
        let w = world();
        let product = ProductId::new();

        thread::scope(|scope| {
            for _ in 0..8 {
                let stock = w.handler.stock().clone();
                let to = w.main;
                scope.spawn(move || {
                    stock
                        .receive(ReceiveStock {
                            to,
                            lines: vec![MovementLine::new(product, dec!(3), dec!(1))],
                            reference: "GR".to_string(),
                            occurred_at: Utc::now(),
                        })
                        .unwrap();
                });
            }
        });

        assert_eq!(w.handler.stock().balance(product, w.main).unwrap(), dec!(24));
    }

    #[test]
    fn decision_is_recorded_against_the_step_that_was_checked() {
        let w = world();
        let approvals = w.handler.approvals();
        let manager_step = approvals
            .required_step(BusinessModule::PurchaseRequest, dec!(500))
            .unwrap()
            .unwrap();
        let director_step = approvals
            .required_step(BusinessModule::PurchaseRequest, dec!(15000))
            .unwrap()
            .unwrap();

        let submit = |step_id: StepId| SubmitDecision {
            reference_id: ReferenceId::new(),
            module: BusinessModule::PurchaseRequest,
            step_id: Some(step_id),
            approver_id: w.manager,
            decision: Decision::Approved,
            comment: None,
            amount: dec!(500),
            occurred_at: Utc::now(),
        };

        let claimed = submit(director_step.id);
        let reference = claimed.reference_id;
        let err = approvals.submit_decision(claimed).unwrap_err();
        assert!(matches!(err, LedgerError::Approval(ApprovalError::Validation(_))));
        assert!(approvals.history(reference).unwrap().is_empty());

        let matching = submit(manager_step.id);
        let reference = matching.reference_id;
        approvals.submit_decision(matching).unwrap();
        let history = approvals.history(reference).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].step_id, Some(manager_step.id));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: receiving `qty` raises the stored balance by exactly `qty`.
        #[test]
        fn receive_raises_balance_by_quantity(start in 0i64..10_000i64, qty in 1i64..10_000i64) {
            let w = world();
            let product = ProductId::new();
            if start > 0 {
                receive(&w, product, Decimal::from(start));
            }
            receive(&w, product, Decimal::from(qty));
            prop_assert_eq!(
                w.handler.stock().balance(product, w.main).unwrap(),
                Decimal::from(start + qty)
            );
        }

        /// Property: an issue lowers the balance by `qty` or fails and changes nothing.
        #[test]
        fn issue_is_exact_or_nothing(start in 1i64..1_000i64, qty in 1i64..2_000i64) {
            let w = world();
            let product = ProductId::new();
            receive(&w, product, Decimal::from(start));

            let result = w.handler.stock().issue(IssueStock {
                from: w.main,
                lines: vec![MovementLine::new(product, Decimal::from(qty), dec!(1))],
                reference: "SO".to_string(),
                occurred_at: Utc::now(),
            });
            let balance = w.handler.stock().balance(product, w.main).unwrap();

            if qty <= start {
                prop_assert!(result.is_ok());
                prop_assert_eq!(balance, Decimal::from(start - qty));
            } else {
                let insufficient = matches!(
                    result,
                    Err(LedgerError::Inventory(InventoryError::InsufficientStock { .. }))
                );
                prop_assert!(insufficient);
                prop_assert_eq!(balance, Decimal::from(start));
            }
        }

        /// Property: every committed journal balances.
        #[test]
        fn committed_journals_balance(cents in 1i64..10_000_000i64, tax_pct in 0i64..30i64) {
            let w = world();
            let total = Decimal::new(cents, 2);
            let tax = (total * Decimal::from(tax_pct) / dec!(100)).round_dp(2);

            let posted = w.handler.posting().post(PostJournal {
                module: BusinessModule::PosSale,
                reference_id: None,
                variables: vars(&[("Total", total), ("Tax", tax)]),
                template_name: None,
                description: None,
            }).unwrap();
            let txn = w.store.transaction(posted.transaction_id).unwrap().unwrap();
            prop_assert_eq!(txn.total_debit(), txn.total_credit());
            prop_assert_eq!(txn.total_debit(), total);
        }
    }
}
