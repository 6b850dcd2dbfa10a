use spirv as spv;

/// Decorations attached to an id or a struct member
///
/// Flags are stored as a mask indexed by the SPIR-V decoration value, with the
/// decorations that carry an operand mirrored into their own field. The packed
/// marker is not a SPIR-V decoration and lives in its own flag.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct Decoration {
    /// Debug name from OpName / OpMemberName
    pub alias: String,
    /// Rewritten textual reference used instead of the alias once interface
    /// flattening has relocated the entity
    pub qualified_alias: String,
    pub decoration_flags: u64,
    pub builtin_type: Option<spv::BuiltIn>,
    pub location: u32,
    pub set: u32,
    pub binding: u32,
    pub offset: u32,
    pub array_stride: u32,
    pub spec_id: u32,
    /// Marks a type or member for tight packing in the generated source
    pub cpacked: bool,
}

impl Decoration {
    pub fn has(&self, decoration: spv::Decoration) -> bool {
        self.decoration_flags & (1u64 << decoration as u32) != 0
    }

    pub fn set_flag(&mut self, decoration: spv::Decoration) {
        self.decoration_flags |= 1u64 << decoration as u32;
    }

    pub fn clear_flag(&mut self, decoration: spv::Decoration) {
        self.decoration_flags &= !(1u64 << decoration as u32);
    }
}

/// All metadata attached to a single id
#[derive(PartialEq, Debug, Clone, Default)]
pub struct Meta {
    pub decoration: Decoration,
    /// Per-member decorations for struct types
    pub members: Vec<Decoration>,
    /// Sampler id assigned to a sampled image expression
    pub sampler: u32,
}

impl Meta {
    /// Member decoration slot, growing the list as needed
    pub fn member_mut(&mut self, index: u32) -> &mut Decoration {
        let index = index as usize;
        if index >= self.members.len() {
            self.members.resize(index + 1, Decoration::default());
        }
        &mut self.members[index]
    }

    pub fn member(&self, index: u32) -> Option<&Decoration> {
        self.members.get(index as usize)
    }
}
