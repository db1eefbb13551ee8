//! Packed per-dispatch parameter blocks
//!
//! Compute programs receive their small scalar/vector parameters through an
//! inline push-constant range rather than a backing buffer. This module
//! describes that range: the typed layout of each named parameter
//! ([`UniformLayout`]), the validated ordered collection ([`UniformSet`]),
//! and the owned byte buffer that is memcpy'd into the command stream
//! before every dispatch ([`UniformBlock`]).

use crate::error::{ComputeError, CrateResult};

/// Scalar/vector types that can live in a push-constant block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Float2,
    Int,
}

impl UniformType {
    /// Size of the type in bytes
    pub const fn size(self) -> u32 {
        match self {
            UniformType::Float => 4,
            UniformType::Float2 => 8,
            UniformType::Int => 4,
        }
    }

    /// Required byte alignment of the type's offset
    ///
    /// A two-component vector must begin at a multiple of its own size;
    /// scalars only need natural 4-byte alignment.
    pub const fn alignment(self) -> u32 {
        match self {
            UniformType::Float2 => 8,
            UniformType::Float | UniformType::Int => 4,
        }
    }
}

/// One named parameter inside a push-constant block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformLayout {
    pub name: String,
    pub ty: UniformType,
    /// Declaration-order index
    pub order: u32,
    /// Byte offset inside the packed block
    pub byte_offset: u32,
}

/// Ordered, validated set of uniform layouts for one compute program
///
/// Invariants enforced at construction: byte offsets equal the running sum
/// of the preceding entries' sizes, every entry satisfies its alignment
/// rule, and names are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UniformSet {
    entries: Vec<UniformLayout>,
    total_size: u32,
}

impl UniformSet {
    /// A set with no parameters (programs without push constants)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set from `(name, type)` pairs, assigning offsets as the
    /// running sum of the preceding sizes.
    ///
    /// Fails if the running sum leaves a `Float2` misaligned; reorder the
    /// fields so vectors land on 8-byte boundaries, as the shader-side
    /// block must do anyway.
    pub fn pack(fields: &[(&str, UniformType)]) -> CrateResult<Self> {
        let mut entries = Vec::with_capacity(fields.len());
        let mut offset = 0u32;
        for (order, (name, ty)) in fields.iter().enumerate() {
            entries.push(UniformLayout {
                name: (*name).to_owned(),
                ty: *ty,
                order: order as u32,
                byte_offset: offset,
            });
            offset += ty.size();
        }
        Self::from_entries(entries)
    }

    /// Build a set from explicit entries, validating every invariant.
    pub fn from_entries(entries: Vec<UniformLayout>) -> CrateResult<Self> {
        let mut expected_offset = 0u32;
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|prev| prev.name == entry.name) {
                return Err(ComputeError::DuplicateUniform(entry.name.clone()));
            }
            if entry.byte_offset != expected_offset {
                return Err(ComputeError::NonContiguousUniform {
                    name: entry.name.clone(),
                    offset: entry.byte_offset,
                    expected: expected_offset,
                });
            }
            let align = entry.ty.alignment();
            if entry.byte_offset % align != 0 {
                return Err(ComputeError::MisalignedUniform {
                    name: entry.name.clone(),
                    offset: entry.byte_offset,
                    align,
                });
            }
            expected_offset += entry.ty.size();
        }
        Ok(Self {
            entries,
            total_size: expected_offset,
        })
    }

    /// Extend this set with more fields, continuing the running offset.
    ///
    /// The fluid passes share a common parameter prefix and append
    /// pass-specific fields after it.
    pub fn extended(&self, fields: &[(&str, UniformType)]) -> CrateResult<Self> {
        let mut entries = self.entries.clone();
        let mut offset = self.total_size;
        for (name, ty) in fields {
            entries.push(UniformLayout {
                name: (*name).to_owned(),
                ty: *ty,
                order: entries.len() as u32,
                byte_offset: offset,
            });
            offset += ty.size();
        }
        Self::from_entries(entries)
    }

    pub fn entries(&self) -> &[UniformLayout] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&UniformLayout> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Total packed size in bytes
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The packed byte buffer holding one program's current parameter values
///
/// Mutated in place by the name-keyed setters and consumed verbatim by the
/// push-constant update before each dispatch. The buffer is allocated once,
/// at construction; setters never grow it.
#[derive(Clone, Debug)]
pub struct UniformBlock {
    owner: String,
    layout: UniformSet,
    data: Vec<u8>,
}

impl UniformBlock {
    /// Allocate a zeroed block for `layout`; `owner` names the program in
    /// error messages.
    pub fn new(owner: impl Into<String>, layout: UniformSet) -> Self {
        let data = vec![0u8; layout.total_size() as usize];
        Self {
            owner: owner.into(),
            layout,
            data,
        }
    }

    pub fn layout(&self) -> &UniformSet {
        &self.layout
    }

    /// The raw bytes pushed to the GPU
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn set_f32(&mut self, name: &str, value: f32) -> CrateResult<()> {
        let offset = self.locate(name, UniformType::Float)?;
        self.data[offset..offset + 4].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    pub fn set_i32(&mut self, name: &str, value: i32) -> CrateResult<()> {
        let offset = self.locate(name, UniformType::Int)?;
        self.data[offset..offset + 4].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    pub fn set_vec2(&mut self, name: &str, x: f32, y: f32) -> CrateResult<()> {
        let offset = self.locate(name, UniformType::Float2)?;
        self.data[offset..offset + 8].copy_from_slice(bytemuck::bytes_of(&[x, y]));
        Ok(())
    }

    /// Read back a `Float` value (bit-for-bit what a setter stored)
    pub fn read_f32(&self, name: &str) -> CrateResult<f32> {
        let offset = self.locate(name, UniformType::Float)?;
        Ok(bytemuck::pod_read_unaligned(&self.data[offset..offset + 4]))
    }

    /// Read back an `Int` value
    pub fn read_i32(&self, name: &str) -> CrateResult<i32> {
        let offset = self.locate(name, UniformType::Int)?;
        Ok(bytemuck::pod_read_unaligned(&self.data[offset..offset + 4]))
    }

    /// Read back a `Float2` value
    pub fn read_vec2(&self, name: &str) -> CrateResult<[f32; 2]> {
        let offset = self.locate(name, UniformType::Float2)?;
        Ok(bytemuck::pod_read_unaligned(&self.data[offset..offset + 8]))
    }

    /// Resolve a name to its byte offset, checking the stored type.
    ///
    /// Unknown names are a configuration error, not a no-op: silently
    /// ignoring one would desynchronize the pushed bytes from the shader's
    /// expectation.
    fn locate(&self, name: &str, requested: UniformType) -> CrateResult<usize> {
        let entry = self
            .layout
            .find(name)
            .ok_or_else(|| ComputeError::UnknownUniform {
                program: self.owner.clone(),
                name: name.to_owned(),
            })?;
        if entry.ty != requested {
            return Err(ComputeError::UniformTypeMismatch {
                name: name.to_owned(),
                expected: entry.ty,
                requested,
            });
        }
        Ok(entry.byte_offset as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_assigns_running_sum_offsets() {
        let set = UniformSet::pack(&[
            ("DeltaTime", UniformType::Float),
            ("Time", UniformType::Float),
            ("FrameNo", UniformType::Int),
        ])
        .unwrap();

        let offsets: Vec<u32> = set.entries().iter().map(|e| e.byte_offset).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(set.total_size(), 12);

        // Offset of entry i equals the sum of the preceding sizes.
        let mut running = 0;
        for entry in set.entries() {
            assert_eq!(entry.byte_offset, running);
            running += entry.ty.size();
        }
    }

    #[test]
    fn pack_rejects_misaligned_vec2() {
        // Float at 0 pushes the vector to offset 4, which is not a
        // multiple of 8.
        let err = UniformSet::pack(&[
            ("Exponent", UniformType::Float),
            ("Origin", UniformType::Float2),
        ])
        .unwrap_err();
        assert!(matches!(err, ComputeError::MisalignedUniform { offset: 4, align: 8, .. }));
    }

    #[test]
    fn from_entries_rejects_gap() {
        let err = UniformSet::from_entries(vec![
            UniformLayout {
                name: "A".into(),
                ty: UniformType::Float,
                order: 0,
                byte_offset: 0,
            },
            UniformLayout {
                name: "B".into(),
                ty: UniformType::Float,
                order: 1,
                byte_offset: 8,
            },
        ])
        .unwrap_err();
        assert!(matches!(err, ComputeError::NonContiguousUniform { offset: 8, expected: 4, .. }));
    }

    #[test]
    fn from_entries_rejects_duplicate_name() {
        let err = UniformSet::pack(&[
            ("Alpha", UniformType::Float),
            ("Alpha", UniformType::Float),
        ])
        .unwrap_err();
        assert!(matches!(err, ComputeError::DuplicateUniform(name) if name == "Alpha"));
    }

    #[test]
    fn extended_continues_offsets() {
        let common = UniformSet::pack(&[
            ("DeltaTime", UniformType::Float),
            ("Time", UniformType::Float),
            ("FrameNo", UniformType::Int),
        ])
        .unwrap();
        let jet = common
            .extended(&[
                ("JetForceExponent", UniformType::Float),
                ("JetForceOrigin", UniformType::Float2),
                ("JetForceVector", UniformType::Float2),
            ])
            .unwrap();

        assert_eq!(jet.find("JetForceExponent").unwrap().byte_offset, 12);
        assert_eq!(jet.find("JetForceOrigin").unwrap().byte_offset, 16);
        assert_eq!(jet.find("JetForceVector").unwrap().byte_offset, 24);
        assert_eq!(jet.total_size(), 32);
    }

    #[test]
    fn scalar_round_trip_is_bit_exact() {
        let set = UniformSet::pack(&[
            ("DeltaTime", UniformType::Float),
            ("FrameNo", UniformType::Int),
        ])
        .unwrap();
        let mut block = UniformBlock::new("test", set);

        block.set_f32("DeltaTime", 0.016).unwrap();
        block.set_i32("FrameNo", 7).unwrap();

        assert_eq!(block.read_f32("DeltaTime").unwrap().to_bits(), 0.016f32.to_bits());
        assert_eq!(block.read_i32("FrameNo").unwrap(), 7);

        // The packed bytes decode the same way.
        let bytes = block.bytes();
        assert_eq!(f32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 0.016);
        assert_eq!(i32::from_ne_bytes(bytes[4..8].try_into().unwrap()), 7);
    }

    #[test]
    fn vec2_round_trip() {
        let set = UniformSet::pack(&[("JetForceOrigin", UniformType::Float2)]).unwrap();
        let mut block = UniformBlock::new("test", set);

        block.set_vec2("JetForceOrigin", 0.25, -1.5).unwrap();
        assert_eq!(block.read_vec2("JetForceOrigin").unwrap(), [0.25, -1.5]);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let set = UniformSet::pack(&[("Alpha", UniformType::Float)]).unwrap();
        let mut block = UniformBlock::new("jacobi1", set);

        let err = block.set_f32("Beta", 4.0).unwrap_err();
        assert!(matches!(
            err,
            ComputeError::UnknownUniform { program, name } if program == "jacobi1" && name == "Beta"
        ));
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let set = UniformSet::pack(&[("FrameNo", UniformType::Int)]).unwrap();
        let mut block = UniformBlock::new("test", set);

        let err = block.set_f32("FrameNo", 1.0).unwrap_err();
        assert!(matches!(err, ComputeError::UniformTypeMismatch { .. }));
    }

    #[test]
    fn empty_set_allocates_nothing() {
        let block = UniformBlock::new("test", UniformSet::empty());
        assert!(block.is_empty());
        assert_eq!(block.bytes().len(), 0);
    }
}
