use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::*;
use crate::audit::{MemoryAuditLog, RecordId};
use crate::engine::{FaultPoint, MemoryEngine};

fn demo_schema() -> BTreeMap<String, Vec<String>> {
    let cols = |c: &[&str]| c.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut schema = BTreeMap::new();
    schema.insert(
        "users".to_string(),
        cols(&["id", "email", "city", "age", "created_at"]),
    );
    schema.insert("items".to_string(), cols(&["id", "name", "price"]));
    schema.insert(
        "orders".to_string(),
        cols(&["id", "user_id", "item_id", "status", "amount", "created_at"]),
    );
    let wide: Vec<String> = (0..16).map(|i| format!("c{}", i)).collect();
    schema.insert("wide".to_string(), wide);
    schema
}

struct Fixture {
    engine: Arc<MemoryEngine>,
    audit: Arc<MemoryAuditLog>,
    manager: IndexLifecycleManager,
}

fn fixture(capacity: usize) -> Fixture {
    let engine = Arc::new(MemoryEngine::with_schema(&demo_schema()));
    let audit = Arc::new(MemoryAuditLog::new());
    let manager = IndexLifecycleManager::with_engine(engine.clone(), audit.clone(), capacity);
    Fixture {
        engine,
        audit,
        manager,
    }
}

fn applied(index: &str, deleted: Option<&str>) -> ApplyOutcome {
    ApplyOutcome::Applied {
        index: index.to_string(),
        deleted_index: deleted.map(|s| s.to_string()),
    }
}

fn actions(audit: &MemoryAuditLog) -> Vec<(AuditAction, String)> {
    audit
        .query(&AuditFilter::default())
        .unwrap()
        .into_iter()
        .map(|r| (r.action, r.index_name))
        .collect()
}

/// 可切换写失败的审计日志
#[derive(Default)]
struct FlakyAudit {
    inner: MemoryAuditLog,
    fail_writes: AtomicBool,
}

impl AuditLog for FlakyAudit {
    fn append(&self, entry: NewAuditRecord) -> Result<RecordId> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LifecycleError::AuditWrite("disk full".to_string()));
        }
        self.inner.append(entry)
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        self.inner.query(filter)
    }
}

#[test]
fn dry_run_lists_existing_and_has_no_side_effects() {
    let f = fixture(3);
    f.manager.apply("orders", "status", true, "api").unwrap();
    let before = actions(&f.audit);
    let ddl_before = f.engine.ddl_count();

    for _ in 0..5 {
        let out = f.manager.apply("orders", "amount", false, "api").unwrap();
        assert_eq!(
            out,
            ApplyOutcome::DryRun {
                index: "idx_orders_amount".to_string(),
                existing: vec!["idx_orders_status".to_string(), "orders_pkey".to_string()],
            }
        );
    }

    assert_eq!(actions(&f.audit), before);
    assert_eq!(f.engine.ddl_count(), ddl_before);
    assert!(!f.engine.index_exists("idx_orders_amount").unwrap());
    assert_eq!(f.manager.stats().dry_runs, 5);
}

#[test]
fn second_apply_of_same_pair_is_already_exists() {
    let f = fixture(3);
    assert_eq!(
        f.manager.apply("orders", "status", true, "api").unwrap(),
        applied("idx_orders_status", None)
    );
    assert_eq!(
        f.manager.apply("orders", "status", true, "api").unwrap(),
        ApplyOutcome::AlreadyExists {
            index: "idx_orders_status".to_string()
        }
    );

    let creates = f
        .audit
        .query(&AuditFilter::actions(&[AuditAction::Create]))
        .unwrap();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].details, json!({ "note": "applied" }));
    assert_eq!(creates[0].user_name, "api");
    assert_eq!(f.engine.ddl_count(), 1);
}

#[test]
fn fourth_distinct_request_evicts_the_oldest() {
    let f = fixture(3);
    f.manager.apply("users", "city", true, "alice").unwrap();
    f.manager.apply("users", "age", true, "alice").unwrap();
    f.manager.apply("orders", "status", true, "alice").unwrap();

    let out = f.manager.apply("items", "name", true, "bob").unwrap();
    assert_eq!(out, applied("idx_items_name", Some("idx_users_city")));
    assert!(!f.engine.index_exists("idx_users_city").unwrap());
    assert!(f.engine.index_exists("idx_items_name").unwrap());

    let deletes = f
        .audit
        .query(&AuditFilter::actions(&[AuditAction::Delete]))
        .unwrap();
    assert_eq!(deletes.len(), 1);
    let del = &deletes[0];
    assert_eq!(del.index_name, "idx_users_city");
    assert_eq!(del.column_name.as_deref(), Some("city"));
    assert_eq!(del.user_name, "bob");
    assert_eq!(
        del.details,
        json!({ "reason": "rotation_limit", "replaced_by": "idx_items_name" })
    );

    // delete 晚于它所撤销的 create
    let create = f
        .audit
        .query(&AuditFilter {
            actions: vec![AuditAction::Create],
            index: Some("idx_users_city".to_string()),
            limit: None,
        })
        .unwrap();
    assert!(del.ts > create[0].ts);

    let names: Vec<_> = f
        .manager
        .live_view()
        .unwrap()
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    assert_eq!(
        names,
        vec!["idx_users_age", "idx_orders_status", "idx_items_name"]
    );
}

#[test]
fn live_count_never_exceeds_capacity_across_a_sequence() {
    let f = fixture(3);
    for i in 0..12 {
        let column = format!("c{}", i);
        let out = f.manager.apply("wide", &column, true, "api").unwrap();
        assert!(matches!(out, ApplyOutcome::Applied { .. }));
        assert!(f.manager.live_view().unwrap().len() <= 3);

        let managed = f
            .engine
            .list_indexes("wide")
            .unwrap()
            .into_iter()
            .filter(|n| n.starts_with("idx_"))
            .count();
        assert!(managed <= 3, "after c{}: {} managed indexes", i, managed);
    }
    let s = f.manager.stats();
    assert_eq!(s.applied, 12);
    assert_eq!(s.evictions, 9);
}

#[test]
fn eviction_failure_still_creates_and_omits_deleted_index() {
    let f = fixture(2);
    f.manager.apply("users", "city", true, "api").unwrap();
    f.manager.apply("users", "age", true, "api").unwrap();
    f.engine
        .inject_fault(FaultPoint::Drop("idx_users_city".to_string()));

    let out = f.manager.apply("orders", "status", true, "api").unwrap();
    assert_eq!(out, applied("idx_orders_status", None));
    assert!(f.engine.index_exists("idx_orders_status").unwrap());
    assert!(f.engine.index_exists("idx_users_city").unwrap());

    let failed = f
        .audit
        .query(&AuditFilter::actions(&[AuditAction::DeleteFailed]))
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].index_name, "idx_users_city");
    assert!(failed[0].details["error"].as_str().unwrap().contains("idx_users_city"));

    // 淘汰失败的索引仍然存活：暂时超出容量
    assert_eq!(f.manager.live_view().unwrap().len(), 3);

    // 下一次 apply 一次淘汰两个最老的，回到容量以内
    let out = f.manager.apply("items", "name", true, "api").unwrap();
    assert_eq!(out, applied("idx_items_name", Some("idx_users_city")));
    assert!(!f.engine.index_exists("idx_users_city").unwrap());
    assert!(!f.engine.index_exists("idx_users_age").unwrap());

    let view = f.manager.live_view().unwrap();
    assert!(view.len() <= 2);
    let names: Vec<_> = view.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["idx_orders_status", "idx_items_name"]);

    let deletes: Vec<_> = f
        .audit
        .query(&AuditFilter::actions(&[AuditAction::Delete]))
        .unwrap()
        .into_iter()
        .map(|r| r.index_name)
        .collect();
    assert_eq!(deletes, vec!["idx_users_city", "idx_users_age"]);
    let stats = f.manager.stats();
    assert_eq!(stats.eviction_failures, 1);
    assert_eq!(stats.evictions, 2);
}

#[test]
fn create_failure_is_recorded_and_surfaced() {
    let f = fixture(3);
    f.engine
        .inject_fault(FaultPoint::Create("idx_orders_status".to_string()));

    let err = f.manager.apply("orders", "status", true, "api").unwrap_err();
    assert!(matches!(err, LifecycleError::Ddl { ref index, .. } if index == "idx_orders_status"));
    assert_eq!(
        actions(&f.audit),
        vec![(AuditAction::CreateFailed, "idx_orders_status".to_string())]
    );
    assert!(f.manager.live_view().unwrap().is_empty());

    // 失败后再试一次即可成功
    assert_eq!(
        f.manager.apply("orders", "status", true, "api").unwrap(),
        applied("idx_orders_status", None)
    );
}

#[test]
fn unknown_column_surfaces_engine_message() {
    let f = fixture(3);
    let err = f.manager.apply("orders", "nope", true, "api").unwrap_err();
    match err {
        LifecycleError::Ddl { message, .. } => assert!(message.contains("nope")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn audit_failure_never_masks_ddl_outcome() {
    let engine = Arc::new(MemoryEngine::with_schema(&demo_schema()));
    let audit = Arc::new(FlakyAudit::default());
    let manager = IndexLifecycleManager::with_engine(engine.clone(), audit.clone(), 3);
    audit.fail_writes.store(true, Ordering::SeqCst);

    // DDL 成功 + 审计失败 → 仍然 applied
    assert_eq!(
        manager.apply("users", "city", true, "api").unwrap(),
        applied("idx_users_city", None)
    );
    assert!(engine.index_exists("idx_users_city").unwrap());

    // DDL 失败 + 审计失败 → 返回的是 DDL 错误
    engine.inject_fault(FaultPoint::Create("idx_users_age".to_string()));
    let err = manager.apply("users", "age", true, "api").unwrap_err();
    assert!(matches!(err, LifecycleError::Ddl { .. }));

    assert_eq!(manager.stats().audit_write_failures, 2);
}

#[test]
fn invalid_identifiers_are_rejected_before_any_ddl() {
    let f = fixture(3);
    for (table, column) in [
        ("orders; DROP TABLE users", "status"),
        ("orders", "status)"),
        ("orders", ""),
        ("or ders", "status"),
    ] {
        for force in [false, true] {
            let err = f.manager.apply(table, column, force, "api").unwrap_err();
            assert!(err.is_validation());
        }
    }
    assert_eq!(f.engine.ddl_count(), 0);
    assert!(f.audit.is_empty());
}

#[test]
fn catalog_outage_aborts_before_ddl() {
    let f = fixture(3);
    f.engine.set_unavailable(true);
    let err = f.manager.apply("orders", "status", true, "api").unwrap_err();
    assert!(matches!(err, LifecycleError::CatalogUnavailable(_)));
    let err = f.manager.apply("orders", "status", false, "api").unwrap_err();
    assert!(matches!(err, LifecycleError::CatalogUnavailable(_)));
    assert!(f.audit.is_empty());
}

#[test]
fn externally_dropped_index_can_be_applied_again() {
    let f = fixture(3);
    f.manager.apply("orders", "status", true, "api").unwrap();
    assert!(f.engine.drop_externally("idx_orders_status"));
    assert!(f.manager.live_view().unwrap().is_empty());

    assert_eq!(
        f.manager.apply("orders", "status", true, "api").unwrap(),
        applied("idx_orders_status", None)
    );
    assert_eq!(
        f.engine.index_columns("idx_orders_status"),
        Some(("orders".to_string(), vec!["status".to_string()]))
    );

    // 最近一次 create 才是视图里的那一条
    let view = f.manager.live_view().unwrap();
    let creates = f
        .audit
        .query(&AuditFilter::actions(&[AuditAction::Create]))
        .unwrap();
    assert_eq!(creates.len(), 2);
    assert_eq!(view.oldest().unwrap().record_id, creates[1].id);
}

#[test]
fn concurrent_applies_keep_every_attempt_audited() {
    let f = fixture(3);
    for c in ["c0", "c1", "c2"] {
        f.manager.apply("wide", c, true, "seed").unwrap();
    }

    let outcomes: Vec<ApplyOutcome> = std::thread::scope(|s| {
        let handles: Vec<_> = (3..9)
            .map(|i| {
                let manager = &f.manager;
                s.spawn(move || {
                    manager
                        .apply("wide", &format!("c{}", i), true, &format!("worker-{}", i))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ApplyOutcome::Applied { .. })));

    let records = f.audit.query(&AuditFilter::default()).unwrap();
    let creates = records
        .iter()
        .filter(|r| r.action == AuditAction::Create)
        .count();
    assert_eq!(creates, 9);

    // 每个 deletedIndex 都有 delete 审计；一次 apply 可能淘汰多个，重复 drop 不是错误
    let reported = outcomes
        .iter()
        .filter(|o| matches!(o, ApplyOutcome::Applied { deleted_index: Some(_), .. }))
        .count();
    let deletes = records
        .iter()
        .filter(|r| r.action == AuditAction::Delete)
        .count();
    assert!(reported <= deletes);
    assert!(records.iter().all(|r| r.action != AuditAction::DeleteFailed));

    // 并发超出的部分由下一次串行 apply 收回
    f.manager.apply("wide", "c9", true, "seed").unwrap();
    assert!(f.manager.live_view().unwrap().len() <= 3);
}

#[test]
fn request_body_defaults_and_response_shapes() {
    let req: ApplyRequest =
        serde_json::from_str(r#"{"table":"orders","column":"status"}"#).unwrap();
    assert!(!req.force);
    assert_eq!(req.actor, "api");

    let req: ApplyRequest =
        serde_json::from_str(r#"{"table":"orders","column":"status","force":true,"user":"ops"}"#)
            .unwrap();
    assert_eq!(req.actor, "ops");

    assert_eq!(
        serde_json::to_value(applied("idx_items_name", Some("idx_users_city"))).unwrap(),
        json!({ "status": "applied", "index": "idx_items_name", "deletedIndex": "idx_users_city" })
    );
    assert_eq!(
        serde_json::to_value(applied("idx_items_name", None)).unwrap(),
        json!({ "status": "applied", "index": "idx_items_name" })
    );
    assert_eq!(
        serde_json::to_value(ApplyOutcome::DryRun {
            index: "idx_orders_status".to_string(),
            existing: vec!["orders_pkey".to_string()],
        })
        .unwrap(),
        json!({ "status": "dry-run", "index": "idx_orders_status", "existing": ["orders_pkey"] })
    );
    assert_eq!(
        serde_json::to_value(ApplyOutcome::AlreadyExists {
            index: "idx_orders_status".to_string()
        })
        .unwrap(),
        json!({ "status": "already-exists", "index": "idx_orders_status" })
    );
}
