//! Declarative transaction demarcation around mapper calls.
//!
//! One state machine, two capability-specific implementations. Per call the
//! machine is in one of three states: not active, active-outer (this call
//! opened the transaction and must terminate it), or active-nested (the call
//! runs inside the caller's transaction and never terminates it). A nested
//! failure only flags the ambient transaction rollback-only; the owning
//! outer call then rolls back instead of committing.
//!
//! The split into a local-resource and an externally-coordinated variant
//! exists because an externally-managed transaction may span multiple
//! resource managers and must not be committed or rolled back by code that
//! did not open it.

use std::sync::Arc;

use log::error;

use crate::error::{WireError, WireResult};
use crate::managers::SessionManagerRegistry;
use crate::session::SessionManager;

/// Status of the ambient transaction as reported by a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// No transaction is associated with the current execution context
    NoTransaction,
    /// A transaction is active
    Active,
    /// A transaction is active and flagged rollback-only
    MarkedRollback,
}

/// External transaction-coordination capability.
///
/// Consumed, never implemented here: the coordinator owns transactions that
/// may span multiple resource managers.
pub trait TransactionCoordinator: Send + Sync {
    /// Status of the transaction on the current execution context.
    fn status(&self) -> WireResult<TxStatus>;
    /// Starts a transaction on the current execution context.
    fn begin(&self) -> WireResult<()>;
    /// Commits the transaction this context opened.
    fn commit(&self) -> WireResult<()>;
    /// Rolls back the transaction this context opened.
    fn rollback(&self) -> WireResult<()>;
    /// Flags the ambient transaction so its owner rolls back.
    fn set_rollback_only(&self) -> WireResult<()>;
}

/// Per-call demarcation attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionAttributes {
    /// Roll back on exit even when the call succeeds.
    pub force_rollback: bool,
}

/// Shared demarcation state machine.
///
/// Implementations supply the capability-specific activity query, begin, and
/// termination; `invoke` drives the machine:
///
/// - entry with no active transaction: begin, run as the outermost call;
/// - entry with an active transaction: run nested, neither begin nor end;
/// - nested exit after failure: mark the ambient transaction rollback-only
///   and propagate the error untouched;
/// - outermost exit: commit on success, roll back on failure, forced
///   rollback, or a rollback-only flag.
pub trait TransactionDemarcation {
    /// Whether a transaction is already active on the current execution
    /// context.
    fn is_transaction_active(&self) -> WireResult<bool>;

    /// Begins a transaction; only called when none is active.
    fn begin(&self) -> WireResult<()>;

    /// Terminates the call's participation.
    ///
    /// `joined_existing` is true for nested calls, which at most flag the
    /// ambient transaction rollback-only. The outermost call commits or
    /// rolls back.
    fn end(&self, joined_existing: bool, needs_rollback: bool) -> WireResult<()>;

    /// Wraps `call` with default attributes.
    fn invoke<T>(&self, call: impl FnOnce() -> WireResult<T>) -> WireResult<T>
    where
        Self: Sized,
    {
        self.invoke_with(TransactionAttributes::default(), call)
    }

    /// Wraps `call` in the demarcation state machine.
    ///
    /// The delegate's error is re-raised verbatim after rollback handling; a
    /// termination failure on the clean path surfaces as a transaction
    /// error. When both the delegate and termination fail, the delegate's
    /// error wins and the termination failure is logged.
    fn invoke_with<T>(
        &self,
        attrs: TransactionAttributes,
        call: impl FnOnce() -> WireResult<T>,
    ) -> WireResult<T>
    where
        Self: Sized,
    {
        let joined_existing = self.is_transaction_active()?;
        if !joined_existing {
            self.begin()?;
        }
        let result = call();
        let needs_rollback = attrs.force_rollback || result.is_err();
        match self.end(joined_existing, needs_rollback) {
            Ok(()) => result,
            Err(end_err) => match result {
                Ok(_) => Err(end_err),
                Err(delegate_err) => {
                    error!(
                        "mapper-di - transaction termination failed after delegate error: {}",
                        end_err
                    );
                    Err(delegate_err)
                }
            },
        }
    }
}

/// Local-resource interceptor: owns begin/commit/rollback directly on the
/// managed sessions of every manager in the registry.
///
/// A transaction is considered active when any manager has a managed session
/// bound to the current thread; begin opens one on each manager so all
/// configured resources join the same unit of work. A nested failure flags
/// every participating managed session rollback-only.
pub struct LocalTransactionInterceptor {
    managers: Arc<SessionManagerRegistry>,
}

impl LocalTransactionInterceptor {
    /// Creates an interceptor over the bootstrap-time manager registry.
    pub fn new(managers: Arc<SessionManagerRegistry>) -> Self {
        Self { managers }
    }
}

impl TransactionDemarcation for LocalTransactionInterceptor {
    fn is_transaction_active(&self) -> WireResult<bool> {
        Ok(self.managers.managers().any(|m| m.is_transaction_active()))
    }

    fn begin(&self) -> WireResult<()> {
        let mut begun: Vec<&Arc<SessionManager>> = Vec::new();
        for manager in self.managers.managers() {
            if let Err(err) = manager.begin_managed() {
                // Unwind the managers that already began so the thread is
                // not left bound to a half-open transaction.
                for started in &begun {
                    if let Err(unwind_err) = started.rollback_managed() {
                        error!(
                            "mapper-di - rollback after failed begin on {}: {}",
                            started.factory_id(),
                            unwind_err
                        );
                    }
                }
                return Err(err);
            }
            begun.push(manager);
        }
        Ok(())
    }

    fn end(&self, joined_existing: bool, needs_rollback: bool) -> WireResult<()> {
        if joined_existing {
            if needs_rollback {
                for manager in self.managers.managers() {
                    manager.set_rollback_only();
                }
            }
            return Ok(());
        }

        let rollback =
            needs_rollback || self.managers.managers().any(|m| m.is_rollback_only());
        let mut first_failure: Option<WireError> = None;
        for manager in self.managers.managers() {
            if !manager.is_transaction_active() {
                continue;
            }
            let ended = if rollback {
                manager.rollback_managed()
            } else {
                manager.commit_managed()
            };
            if let Err(err) = ended {
                if first_failure.is_none() {
                    first_failure = Some(err);
                } else {
                    error!(
                        "mapper-di - additional termination failure on {}: {}",
                        manager.factory_id(),
                        err
                    );
                }
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Externally-coordinated interceptor: defers to an ambient coordinator.
///
/// When nested it only ever flags the ambient transaction rollback-only; it
/// commits or rolls back only when it itself opened the transaction, since
/// an externally-managed transaction may span resource managers this code
/// knows nothing about.
pub struct ManagedTransactionInterceptor {
    coordinator: Arc<dyn TransactionCoordinator>,
}

impl ManagedTransactionInterceptor {
    /// Creates an interceptor over the ambient coordinator.
    pub fn new(coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl TransactionDemarcation for ManagedTransactionInterceptor {
    fn is_transaction_active(&self) -> WireResult<bool> {
        Ok(self.coordinator.status()? != TxStatus::NoTransaction)
    }

    fn begin(&self) -> WireResult<()> {
        self.coordinator.begin()
    }

    fn end(&self, joined_existing: bool, needs_rollback: bool) -> WireResult<()> {
        if joined_existing {
            if needs_rollback {
                self.coordinator.set_rollback_only()?;
            }
            return Ok(());
        }
        if needs_rollback || self.coordinator.status()? == TxStatus::MarkedRollback {
            self.coordinator.rollback()
        } else {
            self.coordinator.commit()
        }
    }
}
