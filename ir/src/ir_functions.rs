use num_traits::FromPrimitive;
use spirv as spv;

/// A single instruction within a basic block
#[derive(PartialEq, Debug, Clone)]
pub struct Instruction {
    /// Raw opcode value
    pub op: u16,
    /// Operand words following the opcode word
    pub operands: Vec<u32>,
}

impl Instruction {
    pub fn opcode(&self) -> Option<spv::Op> {
        spv::Op::from_u32(self.op as u32)
    }
}

/// How a basic block transfers control
#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
pub enum Terminator {
    #[default]
    Unknown,
    /// Unconditional branch to `next_block`
    Direct,
    /// Conditional branch on `condition`
    Select,
    /// OpSwitch over `condition`
    MultiSelect,
    Return,
    Kill,
    Unreachable,
}

/// Structured control flow role declared by a merge instruction
#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
pub enum MergeKind {
    #[default]
    None,
    Selection,
    Loop,
}

/// A basic block of a function
#[derive(PartialEq, Debug, Clone, Default)]
pub struct SpirBlock {
    pub self_id: u32,
    pub ops: Vec<Instruction>,
    pub terminator: Terminator,
    pub merge: MergeKind,
    /// Condition id for Select and MultiSelect terminators
    pub condition: u32,
    pub true_block: u32,
    pub false_block: u32,
    /// Target of a Direct terminator
    pub next_block: u32,
    pub merge_block: u32,
    pub continue_block: u32,
    /// Value id returned by a Return terminator, 0 when returning void
    pub return_value: u32,
    pub default_block: u32,
    /// Literal value and target block pairs of a MultiSelect terminator
    pub cases: Vec<(u32, u32)>,
}

impl SpirBlock {
    pub fn new(self_id: u32) -> SpirBlock {
        SpirBlock {
            self_id,
            ..SpirBlock::default()
        }
    }
}

/// A parameter of a function
#[derive(PartialEq, Debug, Clone)]
pub struct FunctionParameter {
    pub type_id: u32,
    pub id: u32,
    /// True for parameters synthesized to pass a global variable through
    pub alias_global_variable: bool,
}

/// A function definition
#[derive(PartialEq, Debug, Clone)]
pub struct SpirFunction {
    pub self_id: u32,
    pub return_type: u32,
    pub function_type: u32,
    pub arguments: Vec<FunctionParameter>,
    /// Ids of variables declared in the function body
    pub local_variables: Vec<u32>,
    /// Basic block ids in declaration order, the first is the entry block
    pub blocks: Vec<u32>,
}

impl SpirFunction {
    pub fn new(self_id: u32, return_type: u32, function_type: u32) -> SpirFunction {
        SpirFunction {
            self_id,
            return_type,
            function_type,
            arguments: Vec::new(),
            local_variables: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn add_parameter(&mut self, type_id: u32, id: u32, alias_global_variable: bool) {
        self.arguments.push(FunctionParameter {
            type_id,
            id,
            alias_global_variable,
        });
    }

    pub fn add_local_variable(&mut self, id: u32) {
        self.local_variables.push(id);
    }
}
