//! Local-resource transaction demarcation over managed sessions.

use std::sync::{Arc, Mutex};

use mapper_di::{
    AnyArc, FactoryRegistration, LocalTransactionInterceptor, Session, SessionFactory,
    SessionManagerRegistry, Tag, TransactionAttributes, TransactionDemarcation, WireError,
    WireResult,
};

type CallLog = Arc<Mutex<Vec<String>>>;

struct RecordingSession {
    factory_id: &'static str,
    log: CallLog,
    fail_commit: bool,
}

impl RecordingSession {
    fn record(&self, event: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.factory_id, event));
    }
}

impl Session for RecordingSession {
    fn dispatch(&mut self, statement: &str, _args: AnyArc) -> WireResult<AnyArc> {
        self.record(&format!("dispatch {}", statement));
        Ok(Arc::new(statement.to_string()))
    }

    fn commit(&mut self) -> WireResult<()> {
        self.record("commit");
        if self.fail_commit {
            return Err(WireError::Transaction("commit refused".to_string()));
        }
        Ok(())
    }

    fn rollback(&mut self) -> WireResult<()> {
        self.record("rollback");
        Ok(())
    }

    fn close(&mut self) {
        self.record("close");
    }
}

struct RecordingFactory {
    id: &'static str,
    log: CallLog,
    fail_commit: bool,
}

impl SessionFactory for RecordingFactory {
    fn id(&self) -> &str {
        self.id
    }

    fn open_session(&self) -> WireResult<Box<dyn Session>> {
        self.log.lock().unwrap().push(format!("{}:open", self.id));
        Ok(Box::new(RecordingSession {
            factory_id: self.id,
            log: self.log.clone(),
            fail_commit: self.fail_commit,
        }))
    }
}

fn registry_with(log: &CallLog, ids: &[&'static str]) -> Arc<SessionManagerRegistry> {
    let registrations = ids
        .iter()
        .map(|id| FactoryRegistration {
            factory: Arc::new(RecordingFactory {
                id,
                log: log.clone(),
                fail_commit: false,
            }) as Arc<dyn SessionFactory>,
            tags: vec![Tag::Named(id.to_string())],
        })
        .collect();
    Arc::new(SessionManagerRegistry::build(registrations).unwrap())
}

fn events(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn outer_call_begins_and_commits_every_manager() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let managers = registry_with(&log, &["alpha", "beta"]);
    let tx = LocalTransactionInterceptor::new(managers);

    let out = tx.invoke(|| Ok(1)).unwrap();
    assert_eq!(out, 1);

    let events = events(&log);
    assert_eq!(events.iter().filter(|e| e.ends_with(":open")).count(), 2);
    assert_eq!(events.iter().filter(|e| e.ends_with(":commit")).count(), 2);
    assert_eq!(events.iter().filter(|e| e.ends_with(":close")).count(), 2);
}

#[test]
fn nested_call_runs_inside_the_outer_transaction() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let managers = registry_with(&log, &["alpha"]);
    let tx = LocalTransactionInterceptor::new(managers.clone());

    let out = tx
        .invoke(|| {
            let inner = LocalTransactionInterceptor::new(managers.clone());
            inner.invoke(|| Ok("nested"))
        })
        .unwrap();
    assert_eq!(out, "nested");

    // One open, one commit: the nested call neither began nor terminated.
    let events = events(&log);
    assert_eq!(events.iter().filter(|e| e.ends_with(":open")).count(), 1);
    assert_eq!(events.iter().filter(|e| e.ends_with(":commit")).count(), 1);
    assert_eq!(events.iter().filter(|e| e.ends_with(":rollback")).count(), 0);
}

#[test]
fn nested_failure_forces_the_outer_call_to_roll_back() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let managers = registry_with(&log, &["alpha"]);
    let tx = LocalTransactionInterceptor::new(managers.clone());

    let result: WireResult<i32> = tx.invoke(|| {
        let inner = LocalTransactionInterceptor::new(managers.clone());
        let nested: WireResult<i32> = inner.invoke(|| {
            Err(WireError::Transaction("constraint violated".to_string()))
        });
        // The outer delegate recovers, but the ambient transaction is
        // already flagged rollback-only.
        assert!(nested.is_err());
        Ok(0)
    });

    assert_eq!(result.unwrap(), 0);
    let events = events(&log);
    assert_eq!(events.iter().filter(|e| e.ends_with(":rollback")).count(), 1);
    assert_eq!(events.iter().filter(|e| e.ends_with(":commit")).count(), 0);
}

#[test]
fn failing_outer_call_rolls_back_and_reraises() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let managers = registry_with(&log, &["alpha"]);
    let tx = LocalTransactionInterceptor::new(managers);

    let result: WireResult<i32> = tx.invoke(|| {
        Err(WireError::Transaction("write failed".to_string()))
    });

    match result {
        Err(WireError::Transaction(msg)) => assert_eq!(msg, "write failed"),
        other => panic!("expected the original error, got {:?}", other.err()),
    }
    let events = events(&log);
    assert_eq!(events.iter().filter(|e| e.ends_with(":rollback")).count(), 1);
    assert_eq!(events.iter().filter(|e| e.ends_with(":commit")).count(), 0);
}

#[test]
fn dispatch_inside_a_transaction_reuses_the_managed_session() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let managers = registry_with(&log, &["alpha"]);
    let tx = LocalTransactionInterceptor::new(managers.clone());

    let manager = managers.manager_for(Some("alpha"), &[]).unwrap();
    tx.invoke(|| {
        manager.dispatch("m.insert", Arc::new(()))?;
        manager.dispatch("m.update", Arc::new(()))?;
        Ok(0)
    })
    .unwrap();

    // One open for both dispatches plus the terminating commit/close.
    let events = events(&log);
    assert_eq!(events.iter().filter(|e| e.ends_with(":open")).count(), 1);
    assert_eq!(
        events.iter().filter(|e| e.contains("dispatch")).count(),
        2
    );
}

#[test]
fn force_rollback_attribute_defeats_a_clean_commit() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let managers = registry_with(&log, &["alpha"]);
    let tx = LocalTransactionInterceptor::new(managers);

    let attrs = TransactionAttributes {
        force_rollback: true,
    };
    tx.invoke_with(attrs, || Ok(0)).unwrap();

    let events = events(&log);
    assert_eq!(events.iter().filter(|e| e.ends_with(":rollback")).count(), 1);
    assert_eq!(events.iter().filter(|e| e.ends_with(":commit")).count(), 0);
}

struct ExhaustedFactory {
    id: &'static str,
    log: CallLog,
}

impl SessionFactory for ExhaustedFactory {
    fn id(&self) -> &str {
        self.id
    }

    fn open_session(&self) -> WireResult<Box<dyn Session>> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:open refused", self.id));
        Err(WireError::Transaction("pool exhausted".to_string()))
    }
}

#[test]
fn partial_begin_failure_unwinds_the_managers_that_began() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let registrations = vec![
        FactoryRegistration {
            factory: Arc::new(RecordingFactory {
                id: "alpha",
                log: log.clone(),
                fail_commit: false,
            }) as Arc<dyn SessionFactory>,
            tags: vec![Tag::Named("alpha".to_string())],
        },
        FactoryRegistration {
            factory: Arc::new(ExhaustedFactory {
                id: "beta",
                log: log.clone(),
            }) as Arc<dyn SessionFactory>,
            tags: vec![Tag::Named("beta".to_string())],
        },
    ];
    let managers = Arc::new(SessionManagerRegistry::build(registrations).unwrap());
    let tx = LocalTransactionInterceptor::new(managers.clone());

    let result: WireResult<i32> = tx.invoke(|| Ok(1));
    assert!(matches!(result, Err(WireError::Transaction(_))));

    // The manager that did begin was rolled back, closed, and unbound, so
    // the thread is not left inside a half-open transaction.
    let events = events(&log);
    assert_eq!(events.iter().filter(|e| *e == "alpha:rollback").count(), 1);
    assert_eq!(events.iter().filter(|e| *e == "alpha:close").count(), 1);
    let alpha = managers.manager_for(Some("alpha"), &[]).unwrap();
    assert!(!alpha.is_transaction_active());
}

#[test]
fn foreign_delegate_errors_are_wrapped_and_reraised() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let managers = registry_with(&log, &["alpha"]);
    let tx = LocalTransactionInterceptor::new(managers);

    let result: WireResult<i32> = tx.invoke(|| {
        let parsed: i32 = "not-a-number".parse().map_err(WireError::delegate)?;
        Ok(parsed)
    });

    let err = result.unwrap_err();
    assert!(matches!(err, WireError::Delegate(_)));
    // The wrapped parse failure stays reachable through source().
    assert!(std::error::Error::source(&err).is_some());
    let events = events(&log);
    assert_eq!(events.iter().filter(|e| e.ends_with(":rollback")).count(), 1);
    assert_eq!(events.iter().filter(|e| e.ends_with(":commit")).count(), 0);
}

#[test]
fn commit_failure_surfaces_as_a_transaction_error() {
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let registrations = vec![FactoryRegistration {
        factory: Arc::new(RecordingFactory {
            id: "alpha",
            log: log.clone(),
            fail_commit: true,
        }) as Arc<dyn SessionFactory>,
        tags: vec![],
    }];
    let managers = Arc::new(SessionManagerRegistry::build(registrations).unwrap());
    let tx = LocalTransactionInterceptor::new(managers.clone());

    let result = tx.invoke(|| Ok(0));
    assert!(matches!(result, Err(WireError::Transaction(_))));
    // The managed session was closed and unbound despite the failure.
    assert!(!managers.managers().next().unwrap().is_transaction_active());
}
