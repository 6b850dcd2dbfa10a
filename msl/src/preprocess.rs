//! Reachable-opcode scan deciding which helper functions and pragmas the
//! generated source needs

use std::collections::{BTreeSet, HashMap, HashSet};

use num_traits::FromPrimitive;
use smelt_ir::{spv, ExtensionKind, IdEntry, Instruction, Module};

/// Helper function implementations that may need to be emitted because Metal
/// has no direct equivalent
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
pub enum SpvFuncImpl {
    Mod,
    Radians,
    Degrees,
    FindILsb,
    FindSMsb,
    FindUMsb,
    ArrayCopy,
    Inverse2x2,
    Inverse3x3,
    Inverse4x4,
    RowMajor2x3,
    RowMajor2x4,
    RowMajor3x2,
    RowMajor3x4,
    RowMajor4x2,
    RowMajor4x3,
}

/// Facts gathered by one pre-processing walk
#[derive(Default)]
pub struct PreprocessResult {
    /// The output will contain functions without forward declarations
    pub suppress_missing_prototypes: bool,
    /// The output needs the atomic header
    pub uses_atomics: bool,
    pub function_implementations: BTreeSet<SpvFuncImpl>,
}

/// Scan every opcode reachable from the entry point
pub fn preprocess_op_codes(module: &Module) -> PreprocessResult {
    let mut preproc = OpCodePreprocessor {
        module,
        result: PreprocessResult::default(),
        result_types: HashMap::new(),
    };

    let mut visited = HashSet::new();
    preproc.traverse_function(module.entry_point, &mut visited);

    if !preproc.result.function_implementations.is_empty() {
        preproc.result.suppress_missing_prototypes = true;
    }

    preproc.result
}

struct OpCodePreprocessor<'a> {
    module: &'a Module,
    result: PreprocessResult,
    /// Result type by result id, gathered while walking so the OpStore check
    /// can resolve the type of intermediate values
    result_types: HashMap<u32, u32>,
}

impl<'a> OpCodePreprocessor<'a> {
    fn traverse_function(&mut self, func_id: u32, visited: &mut HashSet<u32>) {
        if !visited.insert(func_id) {
            return;
        }

        let func = self.module.get_function(func_id);
        for block_id in &func.blocks {
            let block = self.module.get_block(*block_id);
            for instruction in &block.ops {
                self.handle(instruction);
                if instruction.opcode() == Some(spv::Op::FunctionCall) {
                    self.traverse_function(instruction.operands[2], visited);
                }
            }
        }
    }

    fn handle(&mut self, instruction: &Instruction) {
        let opcode = match instruction.opcode() {
            Some(opcode) => opcode,
            None => return,
        };
        let ops = &instruction.operands;

        if let Some(impl_needed) = self.get_spv_func_impl(opcode, ops) {
            self.result.function_implementations.insert(impl_needed);
            self.result.suppress_missing_prototypes = true;
        }

        match opcode {
            spv::Op::FunctionCall => self.result.suppress_missing_prototypes = true,

            spv::Op::AtomicExchange
            | spv::Op::AtomicCompareExchange
            | spv::Op::AtomicCompareExchangeWeak
            | spv::Op::AtomicLoad
            | spv::Op::AtomicStore
            | spv::Op::AtomicIIncrement
            | spv::Op::AtomicIDecrement
            | spv::Op::AtomicIAdd
            | spv::Op::AtomicISub
            | spv::Op::AtomicSMin
            | spv::Op::AtomicUMin
            | spv::Op::AtomicSMax
            | spv::Op::AtomicUMax
            | spv::Op::AtomicAnd
            | spv::Op::AtomicOr
            | spv::Op::AtomicXor => self.result.uses_atomics = true,

            _ => {}
        }

        // Track the result type of value producing instructions so stores of
        // intermediate values can be classified
        match opcode {
            spv::Op::Store
            | spv::Op::CopyMemory
            | spv::Op::CopyMemorySized
            | spv::Op::ImageWrite
            | spv::Op::AtomicStore
            | spv::Op::ControlBarrier
            | spv::Op::MemoryBarrier => {}
            _ => {
                if ops.len() > 1 {
                    self.result_types.insert(ops[1], ops[0]);
                }
            }
        }
    }

    /// Helper implementation required by an opcode, if any
    fn get_spv_func_impl(&self, opcode: spv::Op, ops: &[u32]) -> Option<SpvFuncImpl> {
        match opcode {
            spv::Op::FMod => Some(SpvFuncImpl::Mod),

            spv::Op::Store => {
                // An array store must be lowered to the copy helper
                let id_rhs = *ops.get(1)?;
                let type_id = match self.module.id_kind(id_rhs) {
                    IdEntry::Constant => return None,
                    _ => self
                        .module
                        .try_get_value_type(id_rhs)
                        .or_else(|| self.result_types.get(&id_rhs).copied())?,
                };
                let ty = self.module.try_get_type(type_id)?;
                if ty.is_array() {
                    Some(SpvFuncImpl::ArrayCopy)
                } else {
                    None
                }
            }

            spv::Op::ExtInst => {
                let set = *ops.get(2)?;
                if self.module.extensions.get(&set) != Some(&ExtensionKind::GlslStd450) {
                    return None;
                }
                match spv::GLOp::from_u32(*ops.get(3)?)? {
                    spv::GLOp::Radians => Some(SpvFuncImpl::Radians),
                    spv::GLOp::Degrees => Some(SpvFuncImpl::Degrees),
                    spv::GLOp::FindILsb => Some(SpvFuncImpl::FindILsb),
                    spv::GLOp::FindSMsb => Some(SpvFuncImpl::FindSMsb),
                    spv::GLOp::FindUMsb => Some(SpvFuncImpl::FindUMsb),
                    spv::GLOp::MatrixInverse => {
                        let ty = self.module.try_get_type(*ops.first()?)?;
                        match ty.columns {
                            2 => Some(SpvFuncImpl::Inverse2x2),
                            3 => Some(SpvFuncImpl::Inverse3x3),
                            4 => Some(SpvFuncImpl::Inverse4x4),
                            _ => None,
                        }
                    }
                    _ => None,
                }
            }

            _ => None,
        }
    }
}
