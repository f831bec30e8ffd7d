//! Call-time dispatch proxies for mapper interfaces.
//!
//! Instead of a runtime-generated class, a mapper provider hands out a
//! [`MapperProxy`]: dispatch is keyed by statement id
//! (`"{mapper_type}.{method}"`, one method per mapped operation), and typed
//! mapper traits are implemented as thin adapters forwarding each method to
//! [`MapperProxy::invoke`].

use std::sync::Arc;

use crate::error::{WireError, WireResult};
use crate::key::BeanKey;
use crate::session::{AnyArc, ErrorContext, SessionManager};

/// Proxy standing in for one mapper interface.
///
/// Each invocation clears the diagnostic context, resolves (or reuses) the
/// bound session through the shared [`SessionManager`], and forwards the
/// call with identical arguments, propagating the callee's return value or
/// failure unchanged.
///
/// # Examples
///
/// Typed adapters forward trait methods to `invoke`:
///
/// ```rust,ignore
/// trait UserMapper {
///     fn find_by_id(&self, id: u64) -> WireResult<Arc<User>>;
/// }
///
/// impl UserMapper for MapperProxy {
///     fn find_by_id(&self, id: u64) -> WireResult<Arc<User>> {
///         self.invoke_as::<User>("find_by_id", Arc::new(id))
///     }
/// }
/// ```
pub struct MapperProxy {
    key: BeanKey,
    manager: Arc<SessionManager>,
    diagnostics: ErrorContext,
}

impl MapperProxy {
    pub(crate) fn new(
        key: BeanKey,
        manager: Arc<SessionManager>,
        diagnostics: ErrorContext,
    ) -> Self {
        Self {
            key,
            manager,
            diagnostics,
        }
    }

    /// The identity key of the mapper this proxy stands in for.
    pub fn key(&self) -> &BeanKey {
        &self.key
    }

    /// The shared session manager backing this proxy.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Invokes the mapped statement `"{mapper_type}.{method}"`.
    ///
    /// The diagnostic context is cleared before delegating; the result or
    /// failure comes back verbatim.
    pub fn invoke(&self, method: &str, args: AnyArc) -> WireResult<AnyArc> {
        self.diagnostics.reset();
        let statement = format!("{}.{}", self.key.type_ref().name(), method);
        self.manager.dispatch(&statement, args)
    }

    /// Invokes a statement and downcasts the result to `T`.
    pub fn invoke_as<T: Send + Sync + 'static>(
        &self,
        method: &str,
        args: AnyArc,
    ) -> WireResult<Arc<T>> {
        self.invoke(method, args)?
            .downcast::<T>()
            .map_err(|_| WireError::TypeMismatch(std::any::type_name::<T>()))
    }
}
