//! Identity keys for mapper and session requirements.
//!
//! A [`BeanKey`] is the sole deduplication mechanism of the registry: two
//! requirements a user would consider "the same bean" (same requested type,
//! same qualifiers, same name) always produce byte-equal keys, and no
//! pointer identity is ever compared.

use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Lightweight reference to a requested type.
///
/// Pairs the `TypeId` (for fast, exact comparison) with the canonical type
/// name (for key text and diagnostics). Works for trait objects as well as
/// concrete types.
///
/// # Examples
///
/// ```rust
/// use mapper_di::TypeRef;
///
/// trait UserMapper: Send + Sync {}
///
/// let a = TypeRef::of::<dyn UserMapper>();
/// let b = TypeRef::of::<dyn UserMapper>();
/// assert_eq!(a, b);
/// assert!(a.name().contains("UserMapper"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TypeRef {
    id: TypeId,
    name: &'static str,
}

impl TypeRef {
    /// Creates a reference to `T`, which may be a trait object.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The `TypeId` of the referenced type.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The canonical type name, as reported by `std::any::type_name`.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// TypeId alone decides equality; the name is diagnostic.
impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Structured qualifier tag attached to an injection point or producer.
///
/// Tags replace annotation-driven qualifier matching with explicit
/// discriminators passed to each registration call. Only qualifying tags
/// participate in key computation; [`Tag::Meta`] is filtered out.
///
/// # Examples
///
/// ```rust
/// use mapper_di::Tag;
///
/// assert!(Tag::Qualifier("Q1").is_qualifying());
/// assert!(Tag::Named("backend".to_string()).is_qualifying());
/// assert!(!Tag::Meta("trace").is_qualifying());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    /// An explicit qualifier, identified by its canonical name
    Qualifier(&'static str),
    /// A name qualifier; its value is extracted into the key's manager name
    Named(String),
    /// Unqualified marker, folded in when no explicit qualifiers are present
    Default,
    /// Any-candidate marker, paired with `Default`
    Any,
    /// Non-qualifying metadata, ignored by key computation
    Meta(&'static str),
}

impl Tag {
    /// Whether this tag participates in identity-key computation.
    pub fn is_qualifying(&self) -> bool {
        !matches!(self, Tag::Meta(_))
    }

    /// Canonical name used for deterministic tag ordering.
    fn canonical_name(&self) -> &str {
        match self {
            Tag::Qualifier(name) => name,
            Tag::Named(_) => "Named",
            Tag::Default => "Default",
            Tag::Any => "Any",
            Tag::Meta(name) => name,
        }
    }

    /// Last path segment of the canonical name, used as a key segment.
    fn simple_name(&self) -> &str {
        match self.canonical_name().rsplit("::").next() {
            Some(simple) => simple,
            None => self.canonical_name(),
        }
    }
}

/// Identity key for a mapper or session requirement.
///
/// Computed from a requested type plus the filtered, order-normalized set of
/// qualifying tags. The textual key has the shape
/// `type_name(.QualifierSimpleName)*(_name)?`; a requirement with no
/// qualifiers at all gets the `Any`/`Default` marker pair folded in so that
/// unqualified keys stay distinct from explicitly qualified ones.
///
/// Keys are immutable once constructed, and equality, hashing, and ordering
/// are all defined over the composed text only.
///
/// # Examples
///
/// ```rust
/// use mapper_di::{BeanKey, Tag, TypeRef};
///
/// trait OrderMapper: Send + Sync {}
///
/// let t = TypeRef::of::<dyn OrderMapper>();
/// let a = BeanKey::new(t, &[Tag::Qualifier("Q1"), Tag::Named("backend".to_string())]);
/// let b = BeanKey::new(t, &[Tag::Named("backend".to_string()), Tag::Qualifier("Q1")]);
///
/// // Order-independent, value-equal
/// assert_eq!(a, b);
/// assert!(a.text().ends_with(".Q1_backend"));
/// assert_eq!(a.manager_name(), Some("backend"));
/// ```
#[derive(Debug, Clone)]
pub struct BeanKey {
    text: String,
    type_ref: TypeRef,
    qualifiers: Vec<Tag>,
    manager_name: Option<String>,
}

impl BeanKey {
    /// Computes the key for `type_ref` under the given tags.
    ///
    /// Non-qualifying tags are filtered out, the remainder is sorted by
    /// canonical name, and a `Named` tag's value is extracted separately
    /// instead of contributing a structural segment.
    pub fn new(type_ref: TypeRef, tags: &[Tag]) -> Self {
        let mut qualifiers: Vec<Tag> = tags
            .iter()
            .filter(|t| t.is_qualifying())
            .cloned()
            .collect();
        if qualifiers.is_empty() {
            qualifiers.push(Tag::Any);
            qualifiers.push(Tag::Default);
        }
        qualifiers.sort_by(|a, b| a.canonical_name().cmp(b.canonical_name()));
        qualifiers.dedup();

        let mut text = String::from(type_ref.name());
        let mut manager_name = None;
        for tag in &qualifiers {
            if let Tag::Named(value) = tag {
                manager_name = Some(value.clone());
            } else {
                text.push('.');
                text.push_str(tag.simple_name());
            }
        }
        if let Some(name) = &manager_name {
            text.push('_');
            text.push_str(name);
        }

        Self {
            text,
            type_ref,
            qualifiers,
            manager_name,
        }
    }

    /// The composed textual key, also used as the provider id.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The requested type.
    pub fn type_ref(&self) -> TypeRef {
        self.type_ref
    }

    /// The normalized qualifying tags, including any folded-in markers.
    pub fn qualifiers(&self) -> &[Tag] {
        &self.qualifiers
    }

    /// The extracted `Named` value, if one was present.
    pub fn manager_name(&self) -> Option<&str> {
        self.manager_name.as_deref()
    }
}

impl PartialEq for BeanKey {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for BeanKey {}

impl Hash for BeanKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialOrd for BeanKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BeanKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl fmt::Display for BeanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
