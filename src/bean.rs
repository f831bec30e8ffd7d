//! Provider beans and the per-creation context.

use std::any::TypeId;
use std::sync::Arc;

use log::debug;

use crate::error::WireResult;
use crate::key::{BeanKey, Tag, TypeRef};
use crate::managers::SessionManagerRegistry;
use crate::proxy::MapperProxy;
use crate::session::{AnyArc, ErrorContext, Session};

/// Capabilities handed to a provider's creation path.
///
/// Carries the shared manager registry and the diagnostic context that is
/// cleared before each proxy is built. The context is released when the
/// created instance is destroyed; the registry is never mutated through it.
pub struct CreationContext {
    managers: Arc<SessionManagerRegistry>,
    diagnostics: ErrorContext,
}

impl CreationContext {
    /// Creates a context over the given manager registry.
    pub fn new(managers: Arc<SessionManagerRegistry>) -> Self {
        Self {
            managers,
            diagnostics: ErrorContext::new(),
        }
    }

    /// The shared manager registry.
    pub fn managers(&self) -> &Arc<SessionManagerRegistry> {
        &self.managers
    }

    /// The diagnostic context cleared before proxy construction and dispatch.
    pub fn diagnostics(&self) -> &ErrorContext {
        &self.diagnostics
    }
}

/// The registry's unit of registration: one provider per distinct key.
///
/// A bean whose requested type is the session type creates (returns) the
/// cached long-lived session manager for its factory; any other bean creates
/// a mapper proxy over that manager. Created once per distinct identity key
/// at finalize time.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use mapper_di::{
///     AnyArc, CreationContext, MapperCollection, MapperProxy, ProducerDecl, Session,
///     SessionFactory, Tag, TypeRef, WireResult,
/// };
///
/// trait UserMapper: Send + Sync {}
///
/// struct StubSession;
/// impl Session for StubSession {
///     fn dispatch(&mut self, statement: &str, _args: AnyArc) -> WireResult<AnyArc> {
///         Ok(Arc::new(statement.to_string()))
///     }
///     fn commit(&mut self) -> WireResult<()> { Ok(()) }
///     fn rollback(&mut self) -> WireResult<()> { Ok(()) }
///     fn close(&mut self) {}
/// }
///
/// struct StubFactory;
/// impl SessionFactory for StubFactory {
///     fn id(&self) -> &str { "main" }
///     fn open_session(&self) -> WireResult<Box<dyn Session>> { Ok(Box::new(StubSession)) }
/// }
///
/// let mut collection = MapperCollection::new();
/// collection.observe_mapper_type::<dyn UserMapper>();
/// collection.observe_injection_point(TypeRef::of::<dyn UserMapper>(), &[]);
/// collection.observe_producer(ProducerDecl {
///     member: "Producers.main".to_string(),
///     returns: TypeRef::of::<dyn SessionFactory>(),
///     provider_tagged: true,
///     tags: vec![],
///     factory: Some(Arc::new(StubFactory)),
/// });
///
/// let beans = collection.build().unwrap();
/// let managers = Arc::new(beans.build_managers().unwrap());
/// let ctx = CreationContext::new(managers);
///
/// let bean = &beans.beans()[0];
/// let instance = bean.create(&ctx).unwrap();
/// let proxy = instance.downcast::<MapperProxy>().unwrap();
/// let row = proxy.invoke_as::<String>("find_by_id", Arc::new(42u64)).unwrap();
/// assert!(row.ends_with(".find_by_id"));
/// ```
#[derive(Debug)]
pub struct MapperBean {
    key: BeanKey,
}

impl MapperBean {
    pub(crate) fn from_key(key: BeanKey) -> Self {
        Self { key }
    }

    /// The provider id: the identity-key text.
    pub fn id(&self) -> &str {
        self.key.text()
    }

    /// The requested type this provider satisfies.
    pub fn type_ref(&self) -> TypeRef {
        self.key.type_ref()
    }

    /// The normalized qualifier set of the key.
    pub fn qualifiers(&self) -> &[Tag] {
        self.key.qualifiers()
    }

    /// The backing factory name, when a `Named` tag was present.
    pub fn manager_name(&self) -> Option<&str> {
        self.key.manager_name()
    }

    /// Creates the injectable instance for this provider.
    ///
    /// For the session type this is the shared `Arc<SessionManager>` cached
    /// in the registry, resolved by the provider's name and qualifiers with
    /// unique-match rules. For a mapper type the diagnostic context is
    /// cleared first and a [`MapperProxy`] over the resolved manager is
    /// returned.
    pub fn create(&self, ctx: &CreationContext) -> WireResult<AnyArc> {
        let manager = ctx
            .managers()
            .manager_for(self.key.manager_name(), self.key.qualifiers())?;
        if self.key.type_ref().id() == TypeId::of::<dyn Session>() {
            debug!("mapper-di - handing out session manager for {}", self.key);
            return Ok(manager);
        }
        ctx.diagnostics().reset();
        Ok(Arc::new(MapperProxy::new(
            self.key.clone(),
            manager,
            ctx.diagnostics().clone(),
        )))
    }

    /// Releases a created instance.
    ///
    /// Only the per-creation state is dropped; the shared session manager is
    /// never closed or mutated here.
    pub fn destroy(&self, instance: AnyArc) {
        debug!("mapper-di - releasing instance of {}", self.key);
        drop(instance);
    }
}
