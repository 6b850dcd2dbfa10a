use spirv as spv;

/// A variable declaration at module or function scope
#[derive(PartialEq, Debug, Clone)]
pub struct SpirVariable {
    pub self_id: u32,
    /// Type id of the variable, normally a pointer type
    pub basetype: u32,
    pub storage: spv::StorageClass,
    /// Constant or expression id the variable starts with, 0 when none
    pub initializer: u32,
    /// When the variable stands in for another one as a pass-through
    /// function parameter, the id of the variable it aliases
    pub basevariable: u32,
}

impl SpirVariable {
    pub fn new(self_id: u32, basetype: u32, storage: spv::StorageClass) -> SpirVariable {
        SpirVariable {
            self_id,
            basetype,
            storage,
            initializer: 0,
            basevariable: 0,
        }
    }
}
