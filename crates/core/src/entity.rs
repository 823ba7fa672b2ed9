//! Entity trait: a record addressed by its natural key.

/// The four persisted entity families.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Group,
    Policy,
    Credential,
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            EntityKind::User => "user",
            EntityKind::Group => "group",
            EntityKind::Policy => "policy",
            EntityKind::Credential => "credential",
        })
    }
}

/// Entity marker + natural key accessor.
///
/// `key()` is both the sort key and the pagination cursor for listings of
/// this entity.
pub trait Entity {
    const KIND: EntityKind;

    fn key(&self) -> &str;
}
