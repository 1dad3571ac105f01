// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Blob assignment from object lifetimes.
//!
//! Objects of one group register in the order their lifetimes start and
//! end. An object whose lifetime starts takes the most recently freed blob,
//! or a new blob if none is free. When it ends, its blob becomes free for
//! the next object to start. Two objects can therefore share a blob only if
//! one ended before the other started.
//!
//! ```text
//! start(A) start(B) end(A) start(C) end(B) end(C)
//!   blob0    blob1   ──►     blob0    ──►    ──►
//!
//! mappings: A→blob0, C→blob0, B→blob1
//! ```
//!
//! A group stays open until it is finalized explicitly, even when none of
//! its objects is in flight, so an object starting after all others ended
//! still reuses their blobs. On finalization the free blobs are sorted by
//! size (largest first), the manager's blob table is widened to cover them,
//! and the group receives its object → blob mappings.

use crate::{Allocator, BlobMemoryPool, GroupId, Memory, MemoryError, ObjectId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

/// Requirements of one blob, merged across every group that used it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct BlobInfo {
    pub size: usize,
    pub alignment: usize,
    pub owners: usize,
}

/// Binds one managed object's memory slot to a blob index.
#[derive(Debug, Clone)]
pub struct MemoryMapping {
    pub object: ObjectId,
    pub memory: Memory,
    pub blob: usize,
}

#[derive(Debug)]
struct Element {
    memory: Option<Memory>,
    size: usize,
    alignment: usize,
    finalized: bool,
}

#[derive(Debug)]
struct Blob {
    /// Object currently occupying the blob.
    occupant: Option<ObjectId>,
    max_size: usize,
    max_alignment: usize,
    bound_elements: BTreeSet<ObjectId>,
}

/// Lifetime manager that maps objects onto reusable blobs.
#[derive(Debug, Default)]
pub struct BlobLifetimeManager {
    active_group: Option<GroupId>,
    active_elements: BTreeMap<ObjectId, Element>,
    free_blobs: VecDeque<Blob>,
    occupied_blobs: VecDeque<Blob>,
    blobs: Vec<BlobInfo>,
}

impl BlobLifetimeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `group` the group whose objects are being registered.
    ///
    /// Registering the already active group is a no-op. A different group
    /// can only register once the active one has finalized all its objects.
    pub fn register_group(&mut self, group: GroupId) -> Result<(), MemoryError> {
        match self.active_group {
            None => {
                self.active_group = Some(group);
                Ok(())
            }
            Some(active) if active == group => Ok(()),
            Some(active) => Err(MemoryError::GroupConflict {
                active,
                requested: group,
            }),
        }
    }

    /// Returns the group currently registering objects.
    pub fn active_group(&self) -> Option<GroupId> {
        self.active_group
    }

    /// Starts the lifetime of `object`, assigning it a blob.
    pub fn start_lifetime(&mut self, object: ObjectId) -> Result<(), MemoryError> {
        if self.active_elements.contains_key(&object) {
            return Err(MemoryError::AlreadyManaged(object));
        }

        let blob = match self.free_blobs.pop_front() {
            Some(mut blob) => {
                blob.occupant = Some(object);
                blob
            }
            None => Blob {
                occupant: Some(object),
                max_size: 0,
                max_alignment: 0,
                bound_elements: BTreeSet::from([object]),
            },
        };
        self.occupied_blobs.push_front(blob);

        self.active_elements.insert(
            object,
            Element {
                memory: None,
                size: 0,
                alignment: 0,
                finalized: false,
            },
        );
        Ok(())
    }

    /// Ends the lifetime of `object`, freeing its blob for the next object
    /// of the active group.
    pub fn end_lifetime(
        &mut self,
        object: ObjectId,
        memory: Memory,
        size: usize,
        alignment: usize,
    ) -> Result<(), MemoryError> {
        let element = self
            .active_elements
            .get_mut(&object)
            .ok_or(MemoryError::UnknownObject(object))?;
        element.memory = Some(memory);
        element.size = size;
        element.alignment = alignment;
        element.finalized = true;

        let pos = self
            .occupied_blobs
            .iter()
            .position(|b| b.occupant == Some(object))
            .ok_or(MemoryError::UnknownObject(object))?;
        if let Some(mut blob) = self.occupied_blobs.remove(pos) {
            blob.bound_elements.insert(object);
            blob.max_size = blob.max_size.max(size);
            blob.max_alignment = blob.max_alignment.max(alignment);
            blob.occupant = None;
            self.free_blobs.push_front(blob);
        }
        Ok(())
    }

    /// Closes `group` and returns its object → blob mappings.
    ///
    /// A group that never registered an object gets no mappings. Fails with
    /// [`MemoryError::NotFinalized`] while one of its objects is in flight.
    pub fn finalize_group(&mut self, group: GroupId) -> Result<Vec<MemoryMapping>, MemoryError> {
        if self.active_group != Some(group) {
            return Ok(Vec::new());
        }
        if !self.are_all_finalized() {
            return Err(MemoryError::NotFinalized);
        }

        let mappings = self.update_blobs_and_mappings();
        self.active_elements.clear();
        self.active_group = None;
        self.free_blobs.clear();
        Ok(mappings)
    }

    /// Returns `true` when no object is in flight.
    pub fn are_all_finalized(&self) -> bool {
        self.active_elements.values().all(|e| e.finalized)
    }

    /// Blob requirements accumulated over every finalized group.
    pub fn blobs(&self) -> &[BlobInfo] {
        &self.blobs
    }

    /// Creates a pool that satisfies the accumulated blob requirements.
    pub fn create_pool(&self, allocator: Rc<dyn Allocator>) -> Result<BlobMemoryPool, MemoryError> {
        BlobMemoryPool::new(allocator, self.blobs.clone())
    }

    fn update_blobs_and_mappings(&mut self) -> Vec<MemoryMapping> {
        let mut free: Vec<Blob> = self.free_blobs.drain(..).collect();
        free.sort_by(|a, b| b.max_size.cmp(&a.max_size));

        let group_sizes: Vec<BlobInfo> = free
            .iter()
            .map(|b| BlobInfo {
                size: b.max_size,
                alignment: b.max_alignment,
                owners: b.bound_elements.len(),
            })
            .collect();

        if self.blobs.len() < group_sizes.len() {
            self.blobs.resize(group_sizes.len(), BlobInfo::default());
        }
        for (blob, group) in self.blobs.iter_mut().zip(group_sizes.iter()) {
            blob.size = blob.size.max(group.size);
            blob.alignment = blob.alignment.max(group.alignment);
            blob.owners = blob.owners.max(group.owners);
        }

        let mut mappings = Vec::new();
        for (blob_idx, blob) in free.iter().enumerate() {
            for object in &blob.bound_elements {
                if let Some(memory) = self
                    .active_elements
                    .get(object)
                    .and_then(|e| e.memory.clone())
                {
                    mappings.push(MemoryMapping {
                        object: *object,
                        memory,
                        blob: blob_idx,
                    });
                }
            }
        }
        mappings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_of(mappings: &[MemoryMapping], object: ObjectId) -> usize {
        mappings.iter().find(|m| m.object == object).unwrap().blob
    }

    #[test]
    fn test_disjoint_lifetimes_share_blob() {
        let mut lm = BlobLifetimeManager::new();
        let group = GroupId::next();
        let (a, b, c) = (ObjectId::next(), ObjectId::next(), ObjectId::next());

        lm.register_group(group).unwrap();
        lm.start_lifetime(a).unwrap();
        lm.start_lifetime(b).unwrap();
        lm.end_lifetime(a, Memory::new(), 100, 0).unwrap();
        lm.start_lifetime(c).unwrap();
        lm.end_lifetime(b, Memory::new(), 300, 0).unwrap();
        lm.end_lifetime(c, Memory::new(), 200, 0).unwrap();
        let mappings = lm.finalize_group(group).unwrap();

        assert_eq!(mappings.len(), 3);
        assert_eq!(blob_of(&mappings, a), blob_of(&mappings, c));
        assert_ne!(blob_of(&mappings, a), blob_of(&mappings, b));

        // Largest blob first: b's blob (300) before a/c's blob (200).
        assert_eq!(blob_of(&mappings, b), 0);
        assert_eq!(
            lm.blobs(),
            &[
                BlobInfo { size: 300, alignment: 0, owners: 1 },
                BlobInfo { size: 200, alignment: 0, owners: 2 },
            ]
        );
        assert!(lm.active_group().is_none());
    }

    #[test]
    fn test_group_stays_open_when_nothing_is_in_flight() {
        let mut lm = BlobLifetimeManager::new();
        let group = GroupId::next();
        let (a, b) = (ObjectId::next(), ObjectId::next());

        lm.register_group(group).unwrap();
        lm.start_lifetime(a).unwrap();
        lm.end_lifetime(a, Memory::new(), 64, 0).unwrap();
        assert!(lm.are_all_finalized());
        assert_eq!(lm.active_group(), Some(group));

        lm.start_lifetime(b).unwrap();
        lm.end_lifetime(b, Memory::new(), 96, 0).unwrap();
        let mappings = lm.finalize_group(group).unwrap();
        assert_eq!(blob_of(&mappings, a), blob_of(&mappings, b));
        assert_eq!(lm.blobs(), &[BlobInfo { size: 96, alignment: 0, owners: 2 }]);
    }

    #[test]
    fn test_finalize_with_object_in_flight_fails() {
        let mut lm = BlobLifetimeManager::new();
        let group = GroupId::next();
        lm.register_group(group).unwrap();
        lm.start_lifetime(ObjectId::next()).unwrap();
        assert_eq!(lm.finalize_group(group), Err(MemoryError::NotFinalized));
        assert!(lm.finalize_group(GroupId::next()).unwrap().is_empty());
    }

    #[test]
    fn test_blob_sizes_merge_across_groups() {
        let mut lm = BlobLifetimeManager::new();

        let g1 = GroupId::next();
        let x = ObjectId::next();
        lm.register_group(g1).unwrap();
        lm.start_lifetime(x).unwrap();
        lm.end_lifetime(x, Memory::new(), 64, 0).unwrap();
        lm.finalize_group(g1).unwrap();

        let g2 = GroupId::next();
        let (y, z) = (ObjectId::next(), ObjectId::next());
        lm.register_group(g2).unwrap();
        lm.start_lifetime(y).unwrap();
        lm.start_lifetime(z).unwrap();
        lm.end_lifetime(y, Memory::new(), 32, 0).unwrap();
        lm.end_lifetime(z, Memory::new(), 16, 0).unwrap();
        lm.finalize_group(g2).unwrap();

        let sizes: Vec<usize> = lm.blobs().iter().map(|b| b.size).collect();
        assert_eq!(sizes, vec![64, 16]);
    }

    #[test]
    fn test_group_conflict() {
        let mut lm = BlobLifetimeManager::new();
        let (g1, g2) = (GroupId::next(), GroupId::next());
        lm.register_group(g1).unwrap();
        lm.register_group(g1).unwrap();
        assert!(matches!(
            lm.register_group(g2),
            Err(MemoryError::GroupConflict { .. })
        ));
    }

    #[test]
    fn test_double_start_and_unknown_end() {
        let mut lm = BlobLifetimeManager::new();
        let a = ObjectId::next();
        lm.start_lifetime(a).unwrap();
        assert_eq!(lm.start_lifetime(a), Err(MemoryError::AlreadyManaged(a)));

        let stranger = ObjectId::next();
        assert!(matches!(
            lm.end_lifetime(stranger, Memory::new(), 8, 0),
            Err(MemoryError::UnknownObject(_))
        ));
        assert!(!lm.are_all_finalized());
    }
}
