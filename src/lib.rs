//! # mapper-di
//!
//! Mapper provisioning and declarative transaction demarcation for
//! dependency-injection containers backed by a persistence toolkit.
//!
//! ## Features
//!
//! - **Identity-key deduplication**: one provider per distinct (type,
//!   qualifiers, name) requirement, keyed by value equality
//! - **Two-phase discovery**: order-independent observation callbacks, a
//!   single finalize step, no retained bootstrap state
//! - **Lazy mapper proxies**: each invocation resolves the bound session
//!   through a shared, long-lived session manager
//! - **Declarative transactions**: outer calls begin/commit/rollback, nested
//!   calls join and at most flag rollback-only
//! - **Fail-fast configuration**: definition errors abort bootstrap instead
//!   of deferring to first use
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use mapper_di::{
//!     AnyArc, CreationContext, LocalTransactionInterceptor, MapperCollection, MapperProxy,
//!     ProducerDecl, Session, SessionFactory, Tag, TransactionDemarcation, TypeRef, WireResult,
//! };
//!
//! // The persistence toolkit is opaque; tests and examples stub it out.
//! struct StubSession;
//! impl Session for StubSession {
//!     fn dispatch(&mut self, statement: &str, _args: AnyArc) -> WireResult<AnyArc> {
//!         Ok(Arc::new(statement.to_string()))
//!     }
//!     fn commit(&mut self) -> WireResult<()> { Ok(()) }
//!     fn rollback(&mut self) -> WireResult<()> { Ok(()) }
//!     fn close(&mut self) {}
//! }
//!
//! struct StubFactory;
//! impl SessionFactory for StubFactory {
//!     fn id(&self) -> &str { "main" }
//!     fn open_session(&self) -> WireResult<Box<dyn Session>> { Ok(Box::new(StubSession)) }
//! }
//!
//! // A mapper interface: one method per mapped statement.
//! trait UserMapper: Send + Sync {}
//!
//! // Discovery phase: observe mapper types, producers, injection points.
//! let mut collection = MapperCollection::new();
//! collection.observe_mapper_type::<dyn UserMapper>();
//! collection.observe_injection_point(TypeRef::of::<dyn UserMapper>(), &[]);
//! collection.observe_producer(ProducerDecl {
//!     member: "Producers.main".to_string(),
//!     returns: TypeRef::of::<dyn SessionFactory>(),
//!     provider_tagged: true,
//!     tags: vec![],
//!     factory: Some(Arc::new(StubFactory)),
//! });
//!
//! // Finalize phase: one provider per distinct identity key.
//! let beans = collection.build().unwrap();
//! let managers = Arc::new(beans.build_managers().unwrap());
//!
//! // Creation path: mapper providers hand out dispatch proxies.
//! let ctx = CreationContext::new(managers.clone());
//! let proxy = beans.beans()[0]
//!     .create(&ctx)
//!     .unwrap()
//!     .downcast::<MapperProxy>()
//!     .unwrap();
//!
//! // Demarcated call: the outer invoke begins and commits.
//! let tx = LocalTransactionInterceptor::new(managers);
//! let row = tx
//!     .invoke(|| proxy.invoke_as::<String>("find_by_id", Arc::new(42u64)))
//!     .unwrap();
//! assert!(row.ends_with(".find_by_id"));
//! ```

// Module declarations
pub mod bean;
pub mod collection;
pub mod error;
pub mod key;
pub mod managers;
pub mod proxy;
pub mod session;
pub mod transaction;

// Re-export core types
pub use bean::{CreationContext, MapperBean};
pub use collection::{BeanSet, MapperCollection, ProducerDecl};
pub use error::{WireError, WireResult};
pub use key::{BeanKey, Tag, TypeRef};
pub use managers::{FactoryRegistration, SessionManagerRegistry};
pub use proxy::MapperProxy;
pub use session::{AnyArc, ErrorContext, Session, SessionFactory, SessionManager};
pub use transaction::{
    LocalTransactionInterceptor, ManagedTransactionInterceptor, TransactionAttributes,
    TransactionCoordinator, TransactionDemarcation, TxStatus,
};
