use spirv as spv;

/// Base kind of a [SpirType]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
pub enum BaseType {
    #[default]
    Unknown,
    Void,
    Boolean,
    Char,
    Int,
    UInt,
    Int64,
    UInt64,
    AtomicCounter,
    Float,
    Double,
    Struct,
    Image,
    SampledImage,
    Sampler,
}

/// Description of an image or sampled image type
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct ImageDescriptor {
    /// Type id of the sampled component type
    pub sampled_type: u32,
    pub dim: spv::Dim,
    pub depth: bool,
    pub arrayed: bool,
    pub ms: bool,
    /// 1 = used with a sampler, 2 = storage image
    pub sampled: u32,
    pub format: spv::ImageFormat,
    /// Kernel-style access qualifier if the module declared one
    pub access: Option<spv::AccessQualifier>,
}

impl Default for ImageDescriptor {
    fn default() -> Self {
        ImageDescriptor {
            sampled_type: 0,
            dim: spv::Dim::Dim1D,
            depth: false,
            arrayed: false,
            ms: false,
            sampled: 0,
            format: spv::ImageFormat::Unknown,
            access: None,
        }
    }
}

/// A type in the module
///
/// Derived types (vectors, matrices, arrays, pointers) are built by copying
/// the record of the type they derive from and adjusting the extra dimension.
/// The copied record keeps the `self_id` of the underlying non-derived type so
/// opaque types can be reached through pointers without chasing parents.
#[derive(PartialEq, Debug, Clone)]
pub struct SpirType {
    /// Id of the underlying non-derived type for this record
    pub self_id: u32,
    pub basetype: BaseType,
    /// Bit width of one scalar component
    pub width: u32,
    pub vecsize: u32,
    pub columns: u32,
    /// Array dimensions from innermost to outermost, 0 for runtime sized
    pub array: Vec<u32>,
    pub pointer: bool,
    pub storage: spv::StorageClass,
    /// Member type ids when basetype is Struct
    pub member_types: Vec<u32>,
    pub image: ImageDescriptor,
    /// Id of the type this record derives from, 0 when not derived
    pub parent_type: u32,
    /// Id of an identically laid out sibling type, 0 when none
    pub type_alias: u32,
}

impl SpirType {
    pub fn new(self_id: u32) -> SpirType {
        SpirType {
            self_id,
            basetype: BaseType::Unknown,
            width: 0,
            vecsize: 1,
            columns: 1,
            array: Vec::new(),
            pointer: false,
            storage: spv::StorageClass::Generic,
            member_types: Vec::new(),
            image: ImageDescriptor::default(),
            parent_type: 0,
            type_alias: 0,
        }
    }

    pub fn is_matrix(&self) -> bool {
        self.columns > 1
    }

    pub fn is_array(&self) -> bool {
        !self.array.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.vecsize == 1 && self.columns == 1 && self.member_types.is_empty() && self.array.is_empty()
    }

    /// Length of the outermost array dimension, clamped to one for runtime arrays
    pub fn outer_array_length(&self) -> u32 {
        self.array.last().map_or(1, |len| (*len).max(1))
    }
}
