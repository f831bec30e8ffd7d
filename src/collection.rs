//! Discovery and finalize phases of the provider registry.
//!
//! [`MapperCollection`] accumulates observed requirements during the
//! container's single-threaded bootstrap window; `build` then emits exactly
//! one provider per distinct identity key and discards all observation
//! state. The three observation callbacks may run in any order and are
//! idempotent with respect to re-registration.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};

use crate::bean::MapperBean;
use crate::key::{BeanKey, Tag, TypeRef};
use crate::managers::{FactoryRegistration, SessionManagerRegistry};
use crate::session::{Session, SessionFactory};

/// An explicit factory-producer declaration.
///
/// Producers are declared metadata rather than scanned annotations: the
/// caller states what the producer member returns and whether it carries the
/// provider tag, so misconfigurations stay expressible and are reported the
/// way the container reports definition errors.
pub struct ProducerDecl {
    /// The declaring member, named in diagnostics (e.g. `ManagerProducers.create`).
    pub member: String,
    /// The producer's declared return type.
    pub returns: TypeRef,
    /// Whether the producer carries the session-factory-provider tag.
    pub provider_tagged: bool,
    /// Qualifying tags on the producer declaration.
    pub tags: Vec<Tag>,
    /// The produced factory instance, retained for manager bootstrap.
    pub factory: Option<Arc<dyn SessionFactory>>,
}

/// Accumulates discovery observations and finalizes them into a [`BeanSet`].
///
/// The collection is a single-use builder: `build` consumes it, supporting
/// the container's one-shot bootstrap, and no requirement state survives
/// finalization.
///
/// # Examples
///
/// ```rust
/// use mapper_di::{MapperCollection, Tag, TypeRef};
///
/// trait UserMapper: Send + Sync {}
///
/// let mut collection = MapperCollection::new();
/// collection.observe_mapper_type::<dyn UserMapper>();
/// collection.observe_injection_point(TypeRef::of::<dyn UserMapper>(), &[Tag::Qualifier("Q1")]);
/// collection.observe_injection_point(TypeRef::of::<dyn UserMapper>(), &[Tag::Qualifier("Q1")]);
///
/// let beans = collection.build().unwrap();
/// // Two identical requirements collapse into one provider.
/// assert_eq!(beans.len(), 1);
/// assert!(beans.beans()[0].id().ends_with(".Q1"));
/// ```
pub struct MapperCollection {
    mapper_types: HashSet<TypeId>,
    injection_points: HashSet<BeanKey>,
    session_producers: BTreeMap<BeanKey, Arc<dyn SessionFactory>>,
    definition_errors: Vec<String>,
}

impl MapperCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            mapper_types: HashSet::new(),
            injection_points: HashSet::new(),
            session_producers: BTreeMap::new(),
            definition_errors: Vec::new(),
        }
    }

    /// Records an interface tagged as a mapper.
    pub fn observe_mapper_type<M: ?Sized + 'static>(&mut self) -> &mut Self {
        let type_ref = TypeRef::of::<M>();
        if self.mapper_types.insert(type_ref.id()) {
            info!("mapper-di - found mapper type: {}", type_ref.name());
        }
        self
    }

    /// Inspects a declared factory producer.
    ///
    /// A tagged producer returning the session-factory type records an
    /// explicit session requirement. A tagged producer with any other return
    /// type accumulates a deferred definition error, surfaced by `build`. An
    /// untagged producer returning the factory type is warned about and
    /// ignored.
    pub fn observe_producer(&mut self, decl: ProducerDecl) -> &mut Self {
        let returns_factory = decl.returns.id() == TypeId::of::<dyn SessionFactory>();
        if decl.provider_tagged {
            if !returns_factory {
                error!(
                    "mapper-di - invalid producer return type (must be a session factory): {}",
                    decl.member
                );
                self.definition_errors.push(format!(
                    "session factory providers must return a session factory ({})",
                    decl.member
                ));
                return self;
            }
            match decl.factory {
                Some(factory) => {
                    info!("mapper-di - session factory producer: {}", decl.member);
                    let key = BeanKey::new(TypeRef::of::<dyn Session>(), &decl.tags);
                    self.session_producers.entry(key).or_insert(factory);
                }
                None => {
                    self.definition_errors.push(format!(
                        "session factory producer supplied no factory instance ({})",
                        decl.member
                    ));
                }
            }
        } else if returns_factory {
            warn!(
                "mapper-di - ignored session factory producer without provider tag: {}",
                decl.member
            );
        }
        self
    }

    /// Records a consumer injection point, regardless of target type.
    pub fn observe_injection_point(&mut self, target: TypeRef, tags: &[Tag]) -> &mut Self {
        self.injection_points.insert(BeanKey::new(target, tags));
        self
    }

    /// Finalizes discovery: one provider per distinct identity key.
    ///
    /// Deferred definition errors abort bootstrap first. Injection points
    /// are then partitioned into mapper and session requirements, mapper
    /// requirements are deduplicated by key, explicit producers take
    /// precedence over matching implicit session requirements, and any
    /// session requirement left unmatched is reported non-fatally as
    /// unmanaged. The emitted bean ids are deterministic for identical
    /// inputs.
    pub fn build(self) -> crate::WireResult<BeanSet> {
        if !self.definition_errors.is_empty() {
            return Err(crate::WireError::Configuration(
                self.definition_errors.join("; "),
            ));
        }

        let session_type = TypeId::of::<dyn Session>();
        let mut mappers: BTreeSet<BeanKey> = BTreeSet::new();
        let mut session_targets: BTreeSet<BeanKey> = BTreeSet::new();
        for key in self.injection_points {
            if self.mapper_types.contains(&key.type_ref().id()) {
                info!("mapper-di - found a requirement for mapper {}", key);
                mappers.insert(key);
            } else if key.type_ref().id() == session_type {
                session_targets.insert(key);
            }
        }

        let mut beans = Vec::new();
        for key in mappers {
            info!("mapper-di - managed mapper dependency: {}", key);
            beans.push(MapperBean::from_key(key));
        }

        let mut factories = Vec::new();
        for (key, factory) in self.session_producers {
            info!("mapper-di - managed session: {}", key);
            session_targets.remove(&key);
            factories.push(FactoryRegistration {
                factory,
                tags: key.qualifiers().to_vec(),
            });
            beans.push(MapperBean::from_key(key));
        }

        for key in session_targets {
            warn!("mapper-di - unmanaged session requirement: {}", key);
        }

        Ok(BeanSet { beans, factories })
    }
}

impl Default for MapperCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// The immutable result of finalization, retained for the process lifetime.
///
/// Holds the providers to register with the container and the factory
/// registrations that feed [`SessionManagerRegistry::build`].
pub struct BeanSet {
    beans: Vec<MapperBean>,
    factories: Vec<FactoryRegistration>,
}

// Factories are opaque, so only their count is rendered.
impl fmt::Debug for BeanSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanSet")
            .field("beans", &self.beans)
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl BeanSet {
    /// The providers, in deterministic id order (mappers, then sessions).
    pub fn beans(&self) -> &[MapperBean] {
        &self.beans
    }

    /// Looks a provider up by its id (the identity-key text).
    pub fn get(&self, id: &str) -> Option<&MapperBean> {
        self.beans.iter().find(|b| b.id() == id)
    }

    /// Number of providers.
    pub fn len(&self) -> usize {
        self.beans.len()
    }

    /// True when finalization produced no providers.
    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }

    /// The factory registrations retained from explicit producers.
    pub fn factory_registrations(&self) -> Vec<FactoryRegistration> {
        self.factories.clone()
    }

    /// Bootstraps the session-manager registry from the retained factories.
    ///
    /// Fatal at startup when no producer was discovered.
    pub fn build_managers(&self) -> crate::WireResult<SessionManagerRegistry> {
        SessionManagerRegistry::build(self.factory_registrations())
    }
}
