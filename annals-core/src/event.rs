//! Domain event contract.
//!
//! [`Event`] is the trait every application event sum type implements.
//! It intentionally avoids persistence concerns; how a payload is
//! written and read back is decided by the configured
//! [`VersioningStrategy`](crate::versioning::VersioningStrategy).

use std::{
    any::TypeId,
    fmt,
    hash::{Hash, Hasher},
};

use uuid::Uuid;

/// Stable identity of a concrete event payload type.
///
/// Registries are keyed by type identity rather than by string name so
/// that event types can be renamed or moved between modules without
/// touching stored data. The tag is obtained explicitly via
/// [`TypeTag::of`]; there is no runtime type discovery.
#[derive(Clone, Copy, Debug)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// The tag for the payload type `P`.
    #[must_use]
    pub fn of<P: 'static>() -> Self {
        Self {
            id: TypeId::of::<P>(),
            name: std::any::type_name::<P>(),
        }
    }

    /// The Rust type name behind this tag, for diagnostics only.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.name
    }
}

// Identity is the `TypeId`; the name is carried for error messages and
// must not participate in comparisons.
impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// An immutable domain fact that can be persisted by an event store.
///
/// Implemented by the application's event sum type. Each value exposes
/// a globally unique event identifier, the identifier of the aggregate
/// it belongs to, and the [`TypeTag`] of its concrete payload variant,
/// which versioning registries use to resolve the stored
/// `(name, version)` pair.
pub trait Event: Clone + Send + Sync + 'static {
    /// Globally unique identifier of this event.
    fn event_id(&self) -> Uuid;

    /// Identifier of the aggregate this event belongs to.
    fn aggregate_id(&self) -> Uuid;

    /// Identity of the concrete payload variant.
    fn type_tag(&self) -> TypeTag;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    #[test]
    fn tags_of_distinct_types_differ() {
        assert_ne!(TypeTag::of::<Alpha>(), TypeTag::of::<Beta>());
        assert_eq!(TypeTag::of::<Alpha>(), TypeTag::of::<Alpha>());
    }

    #[test]
    fn tag_display_uses_type_name() {
        let tag = TypeTag::of::<Alpha>();
        assert!(tag.to_string().ends_with("Alpha"));
        assert_eq!(tag.type_name(), std::any::type_name::<Alpha>());
    }

    #[test]
    fn equality_ignores_name() {
        // Two tags of the same type are equal regardless of how the
        // name renders.
        let a = TypeTag::of::<Alpha>();
        let b = TypeTag::of::<Alpha>();
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }
}
