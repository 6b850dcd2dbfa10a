/// A scalar or composite constant
#[derive(PartialEq, Debug, Clone)]
pub struct SpirConstant {
    pub self_id: u32,
    pub constant_type: u32,
    /// Raw bits of a scalar value, zero extended to 64 bits
    pub value: u64,
    /// Component constant ids for composite constants
    pub subconstants: Vec<u32>,
    /// True for OpSpecConstant* until specialization is resolved away
    pub specialization: bool,
    /// Set when the constant provides the length of an array type
    pub is_used_as_array_length: bool,
}

impl SpirConstant {
    pub fn new(self_id: u32, constant_type: u32, value: u64) -> SpirConstant {
        SpirConstant {
            self_id,
            constant_type,
            value,
            subconstants: Vec::new(),
            specialization: false,
            is_used_as_array_length: false,
        }
    }

    pub fn scalar(&self) -> u32 {
        self.value as u32
    }

    pub fn scalar_u64(&self) -> u64 {
        self.value
    }

    pub fn scalar_i32(&self) -> i32 {
        self.value as i32
    }

    pub fn scalar_i64(&self) -> i64 {
        self.value as i64
    }

    pub fn scalar_f32(&self) -> f32 {
        f32::from_bits(self.value as u32)
    }

    pub fn scalar_f64(&self) -> f64 {
        f64::from_bits(self.value)
    }

    pub fn scalar_bool(&self) -> bool {
        self.value != 0
    }
}
