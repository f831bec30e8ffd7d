//! Process-wide registry of session managers.
//!
//! Built once, eagerly, at bootstrap: exactly one [`SessionManager`] per
//! registered factory. After construction the map is immutable and safe for
//! unsynchronized concurrent reads from any calling thread.

use std::fmt;
use std::sync::Arc;

use log::info;
use once_cell::sync::OnceCell;

use crate::error::{WireError, WireResult};
use crate::key::Tag;
use crate::session::{SessionFactory, SessionManager};

/// A session factory together with the tags its producer declared.
#[derive(Clone)]
pub struct FactoryRegistration {
    /// The factory instance supplied by an explicit producer.
    pub factory: Arc<dyn SessionFactory>,
    /// Qualifying tags of the producer declaration.
    pub tags: Vec<Tag>,
}

struct ManagerEntry {
    name: Option<String>,
    qualifiers: Vec<&'static str>,
    manager: Arc<SessionManager>,
}

static GLOBAL: OnceCell<Arc<SessionManagerRegistry>> = OnceCell::new();

/// Immutable factory-to-manager map, one manager per factory.
///
/// Bootstrap fails fast when zero factories are configured. Lookup resolves
/// a manager by producer name or by qualifier match, and requires a unique
/// match.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use mapper_di::{
///     AnyArc, FactoryRegistration, Session, SessionFactory, SessionManagerRegistry, Tag,
///     WireResult,
/// };
///
/// struct StubSession;
/// impl Session for StubSession {
///     fn dispatch(&mut self, _statement: &str, args: AnyArc) -> WireResult<AnyArc> {
///         Ok(args)
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
/// let registry = SessionManagerRegistry::build(vec![FactoryRegistration {
///     factory: Arc::new(StubFactory),
///     tags: vec![],
/// }]).unwrap();
///
/// let manager = registry.manager_for(None, &[]).unwrap();
/// assert_eq!(manager.factory_id(), "main");
/// ```
pub struct SessionManagerRegistry {
    entries: Vec<ManagerEntry>,
}

impl fmt::Debug for SessionManagerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.entries.iter().map(|e| e.manager.factory_id()).collect();
        f.debug_struct("SessionManagerRegistry")
            .field("factories", &ids)
            .finish()
    }
}

impl SessionManagerRegistry {
    /// Eagerly builds one manager per factory registration.
    ///
    /// Zero registrations is a fatal configuration error: it aborts
    /// bootstrap rather than being retried.
    pub fn build(registrations: Vec<FactoryRegistration>) -> WireResult<Self> {
        if registrations.is_empty() {
            return Err(WireError::Configuration(
                "there are no session factory producers properly configured".to_string(),
            ));
        }
        let mut entries = Vec::with_capacity(registrations.len());
        for registration in registrations {
            let name = registration.tags.iter().find_map(|t| match t {
                Tag::Named(value) => Some(value.clone()),
                _ => None,
            });
            let qualifiers = registration
                .tags
                .iter()
                .filter_map(|t| match t {
                    Tag::Qualifier(q) => Some(*q),
                    _ => None,
                })
                .collect();
            info!(
                "mapper-di - session manager ready for factory {}",
                registration.factory.id()
            );
            entries.push(ManagerEntry {
                name,
                qualifiers,
                manager: Arc::new(SessionManager::new(registration.factory)),
            });
        }
        Ok(Self { entries })
    }

    /// Installs a registry as the process-wide instance.
    ///
    /// One-shot: the first install wins and later calls return the already
    /// installed registry. Hot reload of factories is not supported.
    pub fn install_global(registry: SessionManagerRegistry) -> Arc<SessionManagerRegistry> {
        GLOBAL.get_or_init(|| Arc::new(registry)).clone()
    }

    /// The process-wide registry, if one was installed.
    pub fn global() -> Option<Arc<SessionManagerRegistry>> {
        GLOBAL.get().cloned()
    }

    /// Number of managers (one per registered factory).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no factory is registered. `build` never produces this.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All managers, for the local transaction interceptor.
    pub fn managers(&self) -> impl Iterator<Item = &Arc<SessionManager>> {
        self.entries.iter().map(|e| &e.manager)
    }

    /// Resolves the manager backing a provider's factory.
    ///
    /// A `Named` value matches the producer's declared name; otherwise the
    /// requested qualifiers must all be carried by exactly one factory;
    /// an unqualified request requires a sole registered factory. Zero
    /// matches is an `UnsatisfiedFactory` error, more than one an
    /// `AmbiguousFactory` error.
    pub fn manager_for(
        &self,
        name: Option<&str>,
        qualifiers: &[Tag],
    ) -> WireResult<Arc<SessionManager>> {
        if let Some(name) = name {
            return self.unique(
                self.entries
                    .iter()
                    .filter(|e| e.name.as_deref() == Some(name)),
                &format!("named '{}'", name),
            );
        }

        let requested: Vec<&'static str> = qualifiers
            .iter()
            .filter_map(|t| match t {
                Tag::Qualifier(q) => Some(*q),
                _ => None,
            })
            .collect();
        if requested.is_empty() {
            return self.unique(self.entries.iter(), "unqualified");
        }
        self.unique(
            self.entries
                .iter()
                .filter(|e| requested.iter().all(|q| e.qualifiers.contains(q))),
            &format!("qualified by {:?}", requested),
        )
    }

    fn unique<'a>(
        &self,
        candidates: impl Iterator<Item = &'a ManagerEntry>,
        wanted: &str,
    ) -> WireResult<Arc<SessionManager>> {
        let mut found: Option<&ManagerEntry> = None;
        for entry in candidates {
            if found.is_some() {
                return Err(WireError::AmbiguousFactory(format!(
                    "more than one session factory matches the {} requirement",
                    wanted
                )));
            }
            found = Some(entry);
        }
        match found {
            Some(entry) => Ok(entry.manager.clone()),
            None => Err(WireError::UnsatisfiedFactory(format!(
                "no session factory matches the {} requirement",
                wanted
            ))),
        }
    }
}
