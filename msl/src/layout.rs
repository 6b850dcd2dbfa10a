//! Struct member layout matching SPIR-V declared offsets
//!
//! MSL and SPIR-V disagree on the size and alignment of some types, most
//! notably 3-component vectors. Members are first packed where the declared
//! offsets sit closer together than Metal's natural spacing, then padded with
//! inert byte arrays where they sit further apart.

use smelt_ir::{spv, BaseType, SpirType};

use crate::generator::Compiler;
use crate::CompileError;

impl Compiler {
    pub(crate) fn is_packed_type(&self, type_id: u32) -> bool {
        self.packed_types.contains(&type_id)
    }

    pub(crate) fn packed_types_insert(&mut self, type_id: u32) -> bool {
        self.packed_types.insert(type_id)
    }

    pub(crate) fn is_packed_member(&self, struct_id: u32, index: u32) -> bool {
        self.packed_members.contains(&(struct_id, index))
    }

    /// Sort the members of a struct by offset, then pack and pad them so the
    /// emitted MSL layout matches the SPIR-V offsets
    ///
    /// Packing runs before padding because packing a member shrinks both its
    /// size and its natural alignment, possibly requiring a padding member to
    /// be inserted ahead of the one that follows it.
    pub(crate) fn align_struct(&mut self, struct_id: u32) -> Result<(), CompileError> {
        // Members should already be sorted by offset per the SPIR-V spec, but
        // synthesized blocks may have grown out of order
        self.sort_members_by_offset(struct_id);

        let member_count = self.module.get_type(struct_id).member_types.len() as u32;

        // If a member sits closer to its predecessor than default spacing
        // expects, the predecessor must be stored in a packed format
        let mut curr_offset = 0;
        for index in 0..member_count {
            let align_mask = self.declared_member_alignment(struct_id, index)? - 1;
            curr_offset = (curr_offset + align_mask) & !align_mask;

            let declared_offset = self.member_offset(struct_id, index);
            if curr_offset > declared_offset && index > 0 {
                let prev = index - 1;
                if self.is_member_packable(struct_id, prev) {
                    self.packed_members.insert((struct_id, prev));
                }
            }

            curr_offset = declared_offset + self.declared_member_size(struct_id, index)?;
        }

        // If a member sits farther than its alignment from the end of its
        // predecessor, record an inert padding run to emit ahead of it
        let mut curr_offset = 0;
        for index in 0..member_count {
            let align_mask = self.declared_member_alignment(struct_id, index)? - 1;
            curr_offset = (curr_offset + align_mask) & !align_mask;

            let declared_offset = self.member_offset(struct_id, index);
            if declared_offset > curr_offset {
                self.struct_member_padding
                    .insert((struct_id, index), declared_offset - curr_offset);
            }

            curr_offset = declared_offset + self.declared_member_size(struct_id, index)?;
        }

        Ok(())
    }

    /// Whether a member has a packed type variation smaller than its unpacked
    /// one; true exactly for 3-component single-column vectors
    fn is_member_packable(&self, struct_id: u32, index: u32) -> bool {
        let member_type_id = self.module.get_type(struct_id).member_types[index as usize];
        let member_type = self.module.get_type(member_type_id);
        member_type.vecsize == 3 && member_type.columns == 1
    }

    fn member_offset(&self, struct_id: u32, index: u32) -> u32 {
        self.module
            .meta(struct_id)
            .and_then(|m| m.member(index))
            .map_or(0, |d| d.offset)
    }

    fn member_array_stride(&self, struct_id: u32, index: u32) -> u32 {
        self.module
            .meta(struct_id)
            .and_then(|m| m.member(index))
            .map_or(0, |d| d.array_stride)
    }

    /// Byte size a struct member occupies in the generated source
    pub(crate) fn declared_member_size(
        &self,
        struct_id: u32,
        index: u32,
    ) -> Result<u32, CompileError> {
        let member_type_id = self.module.get_type(struct_id).member_types[index as usize];
        let ty = self.module.get_type(member_type_id);

        if is_opaque_type(ty) {
            return Err(CompileError::QueryOpaqueLayout);
        }

        // Arrays use the declared stride; runtime arrays are forced to a
        // minimum of one element
        if ty.is_array() {
            let stride = self.member_array_stride(struct_id, index);
            return Ok(stride * ty.outer_array_length());
        }

        if ty.basetype == BaseType::Struct {
            return self.declared_struct_size(ty.self_id);
        }

        let component_size = ty.width / 8;
        let mut vecsize = ty.vecsize;
        let mut columns = ty.columns;
        let member = self.module.meta(struct_id).and_then(|m| m.member(index));

        if columns == 1 {
            // An unpacked 3-element vector is the same size as a 4-element one
            if !self.is_packed_member(struct_id, index) && vecsize == 3 {
                vecsize = 4;
            }
        } else {
            // A matrix with a 3-element span is sized like a 4-element one
            // along its decorated major dimension
            if member.map_or(false, |d| d.has(spv::Decoration::ColMajor)) {
                if vecsize == 3 {
                    vecsize = 4;
                }
            } else if member.map_or(false, |d| d.has(spv::Decoration::RowMajor)) && columns == 3 {
                columns = 4;
            }
        }

        Ok(vecsize * columns * component_size)
    }

    fn declared_struct_size(&self, struct_id: u32) -> Result<u32, CompileError> {
        let member_count = self.module.get_type(struct_id).member_types.len() as u32;
        if member_count == 0 {
            return Ok(0);
        }
        let last = member_count - 1;
        let end = self.member_offset(struct_id, last) + self.declared_member_size(struct_id, last)?;
        Ok(end)
    }

    /// Byte alignment of a struct member in the generated source
    pub(crate) fn declared_member_alignment(
        &self,
        struct_id: u32,
        index: u32,
    ) -> Result<u32, CompileError> {
        let member_type_id = self.module.get_type(struct_id).member_types[index as usize];
        let ty = self.module.get_type(member_type_id);

        if is_opaque_type(ty) {
            return Err(CompileError::QueryOpaqueLayout);
        }

        // Struct members inside a host-visible struct are 16 byte aligned
        if ty.basetype == BaseType::Struct {
            return Ok(16);
        }

        if self.is_packed_member(struct_id, index) {
            // A packed type aligns like its scalar component
            Ok(ty.width / 8)
        } else {
            // An unpacked type aligns like one column of one array element
            let array_size = ty.outer_array_length();
            Ok(self.declared_member_size(struct_id, index)? / (ty.columns * array_size))
        }
    }

    /// Reorder members so built-ins come last, then by the declared offset
    fn sort_members_by_offset(&mut self, struct_id: u32) {
        let member_count = self.module.get_type(struct_id).member_types.len();
        let mut indices: Vec<usize> = (0..member_count).collect();
        let meta = self.module.meta(struct_id).cloned().unwrap_or_default();

        let key = |index: usize| {
            let member = meta.member(index as u32);
            let builtin = member.map_or(false, |d| d.has(spv::Decoration::BuiltIn));
            let offset = member.map_or(0, |d| d.offset);
            (builtin, offset)
        };
        indices.sort_by_key(|index| key(*index));

        self.permute_members(struct_id, &indices);
    }

    /// Reorder members so built-ins come last, then by location, optionally
    /// reversed
    pub(crate) fn sort_members_by_location(&mut self, struct_id: u32, reverse: bool) {
        let member_count = self.module.get_type(struct_id).member_types.len();
        let mut indices: Vec<usize> = (0..member_count).collect();
        let meta = self.module.meta(struct_id).cloned().unwrap_or_default();

        let key = |index: usize| {
            let member = meta.member(index as u32);
            let builtin = member.map_or(false, |d| d.has(spv::Decoration::BuiltIn));
            let location = member.map_or(0, |d| d.location) as i64;
            (builtin, if reverse { -location } else { location })
        };
        indices.sort_by_key(|index| key(*index));

        self.permute_members(struct_id, &indices);
    }

    /// Move type and meta member info into the order given by sorted indices
    fn permute_members(&mut self, struct_id: u32, indices: &[usize]) {
        let ty = self.module.get_type(struct_id);
        let old_types = ty.member_types.clone();
        let old_members = self
            .module
            .meta(struct_id)
            .map(|m| m.members.clone())
            .unwrap_or_default();

        let mut new_types = Vec::with_capacity(old_types.len());
        let mut new_members = Vec::with_capacity(old_types.len());
        for index in indices {
            new_types.push(old_types[*index]);
            new_members.push(old_members.get(*index).cloned().unwrap_or_default());
        }

        self.module.get_type_mut(struct_id).member_types = new_types;
        self.module.meta_mut(struct_id).members = new_members;
    }
}

fn is_opaque_type(ty: &SpirType) -> bool {
    matches!(
        ty.basetype,
        BaseType::Unknown
            | BaseType::Void
            | BaseType::AtomicCounter
            | BaseType::Image
            | BaseType::SampledImage
            | BaseType::Sampler
    )
}
