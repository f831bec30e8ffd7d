//! Persistence-toolkit seam and the long-lived session manager.
//!
//! The toolkit's session and factory objects are opaque collaborators; this
//! module only orchestrates their creation, delegation, and closing. The
//! [`SessionManager`] is the thread-safe wrapper the registry hands out: one
//! per factory, shared by every proxy invocation.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use log::{debug, error};

use crate::error::{WireError, WireResult};

/// Type-erased shared value passed through mapper dispatch.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// A unit-of-work handle from the persistence toolkit.
///
/// One method per concern the wiring layer needs: statement dispatch and
/// transaction termination. Everything else the toolkit does (SQL execution,
/// connection pooling) stays behind this seam.
pub trait Session: Send {
    /// Executes the mapped statement with the given arguments.
    fn dispatch(&mut self, statement: &str, args: AnyArc) -> WireResult<AnyArc>;

    /// Commits the session's transaction.
    fn commit(&mut self) -> WireResult<()>;

    /// Rolls back the session's transaction.
    fn rollback(&mut self) -> WireResult<()>;

    /// Releases the session. Infallible by contract; failures are the
    /// toolkit's to swallow or log.
    fn close(&mut self);
}

/// Factory for toolkit sessions.
///
/// Factories are registered by explicit producers during discovery and are
/// treated as opaque; `id` gives them a stable identity for logging and the
/// manager registry.
pub trait SessionFactory: Send + Sync {
    /// Stable identity of this factory (e.g. the configuration source name).
    fn id(&self) -> &str;

    /// Opens a fresh session.
    fn open_session(&self) -> WireResult<Box<dyn Session>>;
}

/// Explicit diagnostic context, cleared before each proxy invocation.
///
/// Replaces the toolkit's thread-local error-context reset hook with a value
/// the caller owns: the creation path clears it before building a proxy, and
/// every dispatch clears it again before delegating.
///
/// Clones share the same underlying slot.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    slot: Arc<Mutex<Option<String>>>,
}

impl ErrorContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic message, replacing any previous one.
    pub fn record(&self, message: impl Into<String>) {
        *self.slot.lock().unwrap() = Some(message.into());
    }

    /// Takes the recorded message, leaving the context empty.
    pub fn take(&self) -> Option<String> {
        self.slot.lock().unwrap().take()
    }

    /// Clears any recorded message.
    pub fn reset(&self) {
        *self.slot.lock().unwrap() = None;
    }
}

struct ManagedUnit {
    session: Box<dyn Session>,
    rollback_only: bool,
}

/// Long-lived, thread-safe wrapper around one session factory.
///
/// Built once per factory by the [`SessionManagerRegistry`] and shared
/// read-only by all proxy invocations. A managed (transactional) session is
/// bound per calling thread; outside a managed transaction each dispatch
/// opens a one-shot session, delegates, and closes it.
///
/// [`SessionManagerRegistry`]: crate::managers::SessionManagerRegistry
pub struct SessionManager {
    factory: Arc<dyn SessionFactory>,
    managed: Mutex<HashMap<ThreadId, ManagedUnit>>,
}

impl SessionManager {
    pub(crate) fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            managed: Mutex::new(HashMap::new()),
        }
    }

    /// Identity of the wrapped factory.
    pub fn factory_id(&self) -> String {
        self.factory.id().to_string()
    }

    /// Whether the calling thread has a managed transaction on this manager.
    pub fn is_transaction_active(&self) -> bool {
        self.managed
            .lock()
            .unwrap()
            .contains_key(&thread::current().id())
    }

    /// Opens a session and binds it to the calling thread as a managed
    /// transaction. Fails if one is already bound.
    pub fn begin_managed(&self) -> WireResult<()> {
        let tid = thread::current().id();
        if self.managed.lock().unwrap().contains_key(&tid) {
            return Err(WireError::Transaction(format!(
                "managed transaction already active on {}",
                self.factory.id()
            )));
        }
        // Only the calling thread can bind its own id, so opening the
        // session outside the lock cannot race the check above.
        let session = self.factory.open_session()?;
        self.managed.lock().unwrap().insert(
            tid,
            ManagedUnit {
                session,
                rollback_only: false,
            },
        );
        debug!("mapper-di - began managed transaction on {}", self.factory.id());
        Ok(())
    }

    /// Flags the calling thread's managed transaction as rollback-only.
    /// No-op when no managed transaction is active.
    pub fn set_rollback_only(&self) {
        let tid = thread::current().id();
        if let Some(unit) = self.managed.lock().unwrap().get_mut(&tid) {
            unit.rollback_only = true;
        }
    }

    /// Whether the calling thread's managed transaction was flagged
    /// rollback-only.
    pub fn is_rollback_only(&self) -> bool {
        let tid = thread::current().id();
        self.managed
            .lock()
            .unwrap()
            .get(&tid)
            .map(|unit| unit.rollback_only)
            .unwrap_or(false)
    }

    /// Commits and unbinds the calling thread's managed transaction.
    ///
    /// The session is closed and the binding removed even when the commit
    /// itself fails; the resource error is propagated afterwards.
    pub fn commit_managed(&self) -> WireResult<()> {
        self.end_managed(false)
    }

    /// Rolls back and unbinds the calling thread's managed transaction.
    pub fn rollback_managed(&self) -> WireResult<()> {
        self.end_managed(true)
    }

    fn end_managed(&self, rollback: bool) -> WireResult<()> {
        let tid = thread::current().id();
        let unit = self.managed.lock().unwrap().remove(&tid);
        let mut unit = unit.ok_or_else(|| {
            WireError::Transaction(format!(
                "no managed transaction active on {}",
                self.factory.id()
            ))
        })?;
        let result = if rollback {
            unit.session.rollback()
        } else {
            unit.session.commit()
        };
        unit.session.close();
        if let Err(err) = &result {
            error!(
                "mapper-di - failed to end managed transaction on {}: {}",
                self.factory.id(),
                err
            );
        }
        result
    }

    /// Dispatches a mapped statement.
    ///
    /// Reuses the calling thread's managed session when a transaction is
    /// active; otherwise opens a one-shot session, delegates, and closes it.
    /// The delegate's return value or failure is propagated unchanged.
    ///
    /// The managed map is locked only to look the unit up and to rebind it;
    /// statement execution runs unlocked, so one thread's slow statement
    /// never stalls dispatch or activity checks on other threads.
    pub fn dispatch(&self, statement: &str, args: AnyArc) -> WireResult<AnyArc> {
        let tid = thread::current().id();
        let unit = self.managed.lock().unwrap().remove(&tid);
        if let Some(mut unit) = unit {
            let result = unit.session.dispatch(statement, args);
            self.managed.lock().unwrap().insert(tid, unit);
            return result;
        }

        let mut session = self.factory.open_session()?;
        let result = session.dispatch(statement, args);
        session.close();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSession {
        closed: Arc<AtomicUsize>,
    }

    impl Session for CountingSession {
        fn dispatch(&mut self, statement: &str, _args: AnyArc) -> WireResult<AnyArc> {
            Ok(Arc::new(statement.to_string()))
        }

        fn commit(&mut self) -> WireResult<()> {
            Ok(())
        }

        fn rollback(&mut self) -> WireResult<()> {
            Ok(())
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingFactory {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                opened: AtomicUsize::new(0),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SessionFactory for CountingFactory {
        fn id(&self) -> &str {
            "counting"
        }

        fn open_session(&self) -> WireResult<Box<dyn Session>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSession {
                closed: self.closed.clone(),
            }))
        }
    }

    #[test]
    fn one_shot_dispatch_opens_and_closes_per_call() {
        let factory = Arc::new(CountingFactory::new());
        let manager = SessionManager::new(factory.clone());

        manager.dispatch("m.find", Arc::new(())).unwrap();
        manager.dispatch("m.find", Arc::new(())).unwrap();

        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn managed_dispatch_reuses_the_bound_session() {
        let factory = Arc::new(CountingFactory::new());
        let manager = SessionManager::new(factory.clone());

        manager.begin_managed().unwrap();
        manager.dispatch("m.find", Arc::new(())).unwrap();
        manager.dispatch("m.find", Arc::new(())).unwrap();
        manager.commit_managed().unwrap();

        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert!(!manager.is_transaction_active());
    }

    #[test]
    fn begin_twice_is_a_transaction_error() {
        let manager = SessionManager::new(Arc::new(CountingFactory::new()));
        manager.begin_managed().unwrap();
        let err = manager.begin_managed().unwrap_err();
        assert!(matches!(err, WireError::Transaction(_)));
        manager.rollback_managed().unwrap();
    }

    #[test]
    fn rollback_only_flag_is_per_transaction() {
        let manager = SessionManager::new(Arc::new(CountingFactory::new()));
        assert!(!manager.is_rollback_only());

        manager.begin_managed().unwrap();
        manager.set_rollback_only();
        assert!(manager.is_rollback_only());
        manager.rollback_managed().unwrap();

        manager.begin_managed().unwrap();
        assert!(!manager.is_rollback_only());
        manager.commit_managed().unwrap();
    }

    #[test]
    fn managed_dispatch_does_not_serialize_other_threads() {
        use std::sync::mpsc;

        struct GatedSession {
            entered: mpsc::Sender<()>,
            release: mpsc::Receiver<()>,
        }

        impl Session for GatedSession {
            fn dispatch(&mut self, statement: &str, _args: AnyArc) -> WireResult<AnyArc> {
                self.entered.send(()).unwrap();
                self.release.recv().unwrap();
                Ok(Arc::new(statement.to_string()))
            }

            fn commit(&mut self) -> WireResult<()> {
                Ok(())
            }

            fn rollback(&mut self) -> WireResult<()> {
                Ok(())
            }

            fn close(&mut self) {}
        }

        struct FastSession;

        impl Session for FastSession {
            fn dispatch(&mut self, statement: &str, _args: AnyArc) -> WireResult<AnyArc> {
                Ok(Arc::new(statement.to_string()))
            }

            fn commit(&mut self) -> WireResult<()> {
                Ok(())
            }

            fn rollback(&mut self) -> WireResult<()> {
                Ok(())
            }

            fn close(&mut self) {}
        }

        struct GateFirstFactory {
            gated: Mutex<Option<GatedSession>>,
        }

        impl SessionFactory for GateFirstFactory {
            fn id(&self) -> &str {
                "gate-first"
            }

            fn open_session(&self) -> WireResult<Box<dyn Session>> {
                if let Some(gated) = self.gated.lock().unwrap().take() {
                    return Ok(Box::new(gated));
                }
                Ok(Box::new(FastSession))
            }
        }

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let manager = Arc::new(SessionManager::new(Arc::new(GateFirstFactory {
            gated: Mutex::new(Some(GatedSession {
                entered: entered_tx,
                release: release_rx,
            })),
        })));

        let worker = {
            let manager = manager.clone();
            thread::spawn(move || {
                manager.begin_managed().unwrap();
                manager.dispatch("m.slow", Arc::new(())).unwrap();
                manager.commit_managed().unwrap();
            })
        };

        // The worker is mid-statement; this thread's one-shot dispatch and
        // activity check must still go through.
        entered_rx.recv().unwrap();
        assert!(!manager.is_transaction_active());
        manager.dispatch("m.fast", Arc::new(())).unwrap();

        release_tx.send(()).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn error_context_records_and_resets() {
        let ctx = ErrorContext::new();
        ctx.record("boom");
        let shared = ctx.clone();
        assert_eq!(shared.take().as_deref(), Some("boom"));
        ctx.record("again");
        ctx.reset();
        assert_eq!(ctx.take(), None);
    }
}
