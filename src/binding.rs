//! Binding slot descriptions
//!
//! A compute program consumes GPU images through named, indexed binding
//! slots. [`BindingDesc`] describes one slot; [`BindingList`] is the
//! validated, declaration-ordered collection a program is built from and
//! the lookup table `set_texture` resolves names against.

use ash::vk;

use crate::error::{ComputeError, CrateResult};

/// Kind of GPU resource a binding slot accepts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Read/write image accessed with image loads and stores
    StorageImage,
    /// Read-only image sampled through a combined sampler
    CombinedImageSampler,
}

impl BindingKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            BindingKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One named GPU-resource slot of a compute program
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingDesc {
    pub name: String,
    pub kind: BindingKind,
    pub format: vk::Format,
    /// Binding index inside the program's set layout
    pub slot: u32,
}

/// Ordered, validated list of binding slots for one compute program
///
/// Slot indices are unique and densely assigned in declaration order, and
/// names are unique (they are the lookup key for `set_texture`). Both are
/// enforced at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingList {
    entries: Vec<BindingDesc>,
}

impl BindingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot, assigning the next dense index.
    pub fn push(mut self, name: &str, kind: BindingKind, format: vk::Format) -> Self {
        let slot = self.entries.len() as u32;
        self.entries.push(BindingDesc {
            name: name.to_owned(),
            kind,
            format,
            slot,
        });
        self
    }

    /// Build from explicit descriptors, validating density and uniqueness.
    pub fn from_entries(entries: Vec<BindingDesc>) -> CrateResult<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|prev| prev.name == entry.name) {
                return Err(ComputeError::DuplicateBindingSlot(entry.name.clone()));
            }
            if entry.slot != i as u32 {
                return Err(ComputeError::NonDenseBindingSlot {
                    name: entry.name.clone(),
                    slot: entry.slot,
                    expected: i as u32,
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[BindingDesc] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&BindingDesc> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of slots of the given kind (for descriptor pool sizing)
    pub fn count_of(&self, kind: BindingKind) -> u32 {
        self.entries.iter().filter(|e| e.kind == kind).count() as u32
    }

    /// Compute-stage-visible set layout entries, one per slot
    pub fn set_layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.slot)
                    .descriptor_type(entry.kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_dense_slots() {
        let list = BindingList::new()
            .push("U_in", BindingKind::CombinedImageSampler, vk::Format::R32G32_SFLOAT)
            .push("U_out", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT);

        let slots: Vec<u32> = list.entries().iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![0, 1]);
        assert_eq!(list.find("U_out").unwrap().slot, 1);
        assert!(list.find("W_out").is_none());
    }

    #[test]
    fn from_entries_rejects_duplicate_name() {
        let err = BindingList::from_entries(vec![
            BindingDesc {
                name: "P_in".into(),
                kind: BindingKind::StorageImage,
                format: vk::Format::R32_SFLOAT,
                slot: 0,
            },
            BindingDesc {
                name: "P_in".into(),
                kind: BindingKind::StorageImage,
                format: vk::Format::R32_SFLOAT,
                slot: 1,
            },
        ])
        .unwrap_err();
        assert!(matches!(err, ComputeError::DuplicateBindingSlot(name) if name == "P_in"));
    }

    #[test]
    fn from_entries_rejects_non_dense_slots() {
        let err = BindingList::from_entries(vec![BindingDesc {
            name: "W_in".into(),
            kind: BindingKind::StorageImage,
            format: vk::Format::R32G32_SFLOAT,
            slot: 3,
        }])
        .unwrap_err();
        assert!(matches!(
            err,
            ComputeError::NonDenseBindingSlot { slot: 3, expected: 0, .. }
        ));
    }

    #[test]
    fn set_layout_entries_are_compute_visible() {
        let list = BindingList::new()
            .push("F_out", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT)
            .push("O_in", BindingKind::CombinedImageSampler, vk::Format::R32_SFLOAT);

        let bindings = list.set_layout_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert!(bindings
            .iter()
            .all(|b| b.stage_flags == vk::ShaderStageFlags::COMPUTE && b.descriptor_count == 1));
    }

    #[test]
    fn kind_counts_feed_pool_sizing() {
        let list = BindingList::new()
            .push("W_in", BindingKind::StorageImage, vk::Format::R32G32_SFLOAT)
            .push("DivW_out", BindingKind::StorageImage, vk::Format::R32_SFLOAT)
            .push("O_in", BindingKind::CombinedImageSampler, vk::Format::R32_SFLOAT);

        assert_eq!(list.count_of(BindingKind::StorageImage), 2);
        assert_eq!(list.count_of(BindingKind::CombinedImageSampler), 1);
    }
}
