//! Group registry
//!
//! Groups are volume buses keyed by an id the application chooses (a
//! gameplay category, say). They are never registered up front: the first
//! reference creates the engine object, and it lives until the session ends.
//!
//! First touch wins. A group created by a play request starts at the
//! default volume, while one created by [`GroupRegistry::update`] starts at
//! the requested volume. A plain [`GroupRegistry::get_or_create`] never
//! changes the volume of a group that already exists.

use crate::audio::backend::AudioBackend;
use crate::audio::error::{BackendError, Checked};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Application-chosen group identifier
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GroupId(pub i32);

impl GroupId {
    /// Group used by channels that do not name one
    pub const DEFAULT: Self = Self(0);
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Volume given to a group created implicitly by a play request
pub const DEFAULT_GROUP_VOLUME: f32 = 1.0;

/// Lazily created engine channel groups
#[derive(Debug)]
pub struct GroupRegistry<G> {
    groups: BTreeMap<GroupId, G>,
}

impl<G> GroupRegistry<G> {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }

    /// The one place groups are created. Returns the group and whether it
    /// was created by this call.
    fn ensure_group_exists<B>(
        &mut self,
        backend: &mut B,
        id: GroupId,
    ) -> Result<(&G, bool), BackendError>
    where
        B: AudioBackend<Group = G>,
    {
        use std::collections::btree_map::Entry;

        match self.groups.entry(id) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), false)),
            Entry::Vacant(entry) => {
                let group = backend.create_group(&id.to_string())?;
                // Ramp volume changes instead of stepping, avoids clicks
                backend
                    .set_group_volume_ramp(&group, true)
                    .checked("set_group_volume_ramp");
                log::debug!("Created channel group {id}");
                Ok((entry.insert(group), true))
            }
        }
    }

    /// Group for `id`, created with `default_volume` if it does not exist yet
    pub fn get_or_create<B>(
        &mut self,
        backend: &mut B,
        id: GroupId,
        default_volume: f32,
    ) -> Result<&G, BackendError>
    where
        B: AudioBackend<Group = G>,
    {
        let (group, created) = self.ensure_group_exists(backend, id)?;
        if created {
            backend
                .set_group_volume(group, default_volume)
                .checked("set_group_volume");
        }
        Ok(group)
    }

    /// Set a group's volume, creating the group first if needed
    pub fn update<B>(&mut self, backend: &mut B, id: GroupId, volume: f32) -> Result<&G, BackendError>
    where
        B: AudioBackend<Group = G>,
    {
        let (group, _) = self.ensure_group_exists(backend, id)?;
        backend.set_group_volume(group, volume).checked("set_group_volume");
        Ok(group)
    }

    /// Existing group, without creating one
    pub fn get(&self, id: GroupId) -> Option<&G> {
        self.groups.get(&id)
    }

    /// Whether a group exists for `id`
    pub fn contains(&self, id: GroupId) -> bool {
        self.groups.contains_key(&id)
    }

    /// Ids of all created groups in ascending order
    pub fn ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.groups.keys().copied()
    }

    /// Number of created groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no group has been created
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Remove every group, in ascending id order, for release at teardown
    pub(crate) fn drain(&mut self) -> Vec<G> {
        std::mem::take(&mut self.groups).into_values().collect()
    }
}

impl<G> Default for GroupRegistry<G> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::headless::{HeadlessBackend, HeadlessSettings, Operation};
    use crate::audio::backend::{AudioBackend, InitFlags};

    fn backend() -> HeadlessBackend {
        backend_with(HeadlessSettings::default())
    }

    fn backend_with(settings: HeadlessSettings) -> HeadlessBackend {
        let mut backend = HeadlessBackend::create(&settings).unwrap();
        backend.init(64, InitFlags::empty()).unwrap();
        backend
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut backend = backend();
        let mut registry = GroupRegistry::new();

        let first = *registry.get_or_create(&mut backend, GroupId(5), 1.0).unwrap();
        backend.set_group_volume(&first, 0.4).unwrap();
        let second = *registry.get_or_create(&mut backend, GroupId(5), 1.0).unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(backend.group_volume(&second), Some(0.4));
    }

    #[test]
    fn test_new_group_gets_default_volume_and_ramp() {
        let mut backend = backend();
        let mut registry = GroupRegistry::new();

        let group = *registry.get_or_create(&mut backend, GroupId(2), 0.7).unwrap();

        assert_eq!(backend.group_volume(&group), Some(0.7));
        assert_eq!(backend.group_ramp(&group), Some(true));
        assert_eq!(backend.group_name(&group).as_deref(), Some("2"));
    }

    #[test]
    fn test_update_creates_with_requested_volume() {
        let mut backend = backend();
        let mut registry = GroupRegistry::new();

        let created = *registry.update(&mut backend, GroupId(7), 0.3).unwrap();
        assert_eq!(backend.group_volume(&created), Some(0.3));

        let updated = *registry.update(&mut backend, GroupId(7), 0.9).unwrap();
        assert_eq!(created, updated);
        assert_eq!(backend.group_volume(&updated), Some(0.9));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_after_implicit_creation_overrides_default() {
        let mut backend = backend();
        let mut registry = GroupRegistry::new();

        registry.get_or_create(&mut backend, GroupId(1), 1.0).unwrap();
        let group = *registry.update(&mut backend, GroupId(1), 0.25).unwrap();
        let again = *registry.get_or_create(&mut backend, GroupId(1), 1.0).unwrap();

        assert_eq!(group, again);
        assert_eq!(backend.group_volume(&again), Some(0.25));
    }

    #[test]
    fn test_creation_failure_leaves_no_entry() {
        let mut backend = backend_with(HeadlessSettings::default().fail(Operation::CreateGroup));
        let mut registry = GroupRegistry::new();

        assert!(registry.update(&mut backend, GroupId(3), 0.5).is_err());
        assert!(!registry.contains(GroupId(3)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drain_in_id_order() {
        let mut backend = backend();
        let mut registry = GroupRegistry::new();
        let c = *registry.get_or_create(&mut backend, GroupId(9), 1.0).unwrap();
        let a = *registry.get_or_create(&mut backend, GroupId(-1), 1.0).unwrap();
        let b = *registry.get_or_create(&mut backend, GroupId(4), 1.0).unwrap();

        assert_eq!(registry.drain(), vec![a, b, c]);
        assert!(registry.is_empty());
    }
}
