//! Parser turning a SPIR-V word stream into a [Module]

use num_traits::FromPrimitive;
use spirv as spv;
use thiserror::Error;

use crate::{
    BaseType, ExtensionKind, Instruction, MergeKind, Module, SpirBlock, SpirConstant,
    SpirFunction, SpirType, SpirVariable, Terminator,
};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Error result when parsing a module fails
#[derive(PartialEq, Eq, Debug, Clone, Error)]
pub enum ParseError {
    #[error("stream does not start with the SPIR-V magic number")]
    InvalidMagic,

    #[error("stream ends in the middle of an instruction")]
    TruncatedModule,

    #[error("instruction has too few operands: {0}")]
    MalformedInstruction(&'static str),

    #[error("id {0} is out of bounds for the declared id bound")]
    IdOutOfBounds(u32),

    #[error("{0} found outside of a function body")]
    InstructionOutsideFunction(&'static str),

    #[error("module does not declare an entry point")]
    MissingEntryPoint,
}

/// Parse a SPIR-V binary into a module
pub fn parse_words(words: &[u32]) -> Result<Module, ParseError> {
    if words.len() < 5 || words[0] != SPIRV_MAGIC {
        return Err(ParseError::InvalidMagic);
    }

    let bound = words[3];
    let mut module = Module::new(bound);
    let mut parser = Parser {
        module: &mut module,
        current_function: 0,
        current_block: 0,
        seen_entry_point: false,
    };

    let mut offset = 5;
    while offset < words.len() {
        let first = words[offset];
        let word_count = (first >> 16) as usize;
        let op = (first & 0xffff) as u16;
        if word_count == 0 || offset + word_count > words.len() {
            return Err(ParseError::TruncatedModule);
        }

        parser.instruction(op, &words[offset + 1..offset + word_count])?;
        offset += word_count;
    }

    if !parser.seen_entry_point {
        return Err(ParseError::MissingEntryPoint);
    }

    Ok(module)
}

struct Parser<'a> {
    module: &'a mut Module,
    current_function: u32,
    current_block: u32,
    seen_entry_point: bool,
}

/// Decode a null terminated literal string, returning it with the number of
/// words it occupied
fn literal_string(operands: &[u32]) -> (String, usize) {
    let mut bytes = Vec::new();
    let mut used = 0;
    'words: for word in operands {
        used += 1;
        for byte in word.to_le_bytes() {
            if byte == 0 {
                break 'words;
            }
            bytes.push(byte);
        }
    }
    (String::from_utf8_lossy(&bytes).into_owned(), used)
}

fn require(operands: &[u32], count: usize, what: &'static str) -> Result<(), ParseError> {
    if operands.len() < count {
        Err(ParseError::MalformedInstruction(what))
    } else {
        Ok(())
    }
}

impl<'a> Parser<'a> {
    fn instruction(&mut self, op: u16, operands: &[u32]) -> Result<(), ParseError> {
        let opcode = match spv::Op::from_u32(op as u32) {
            Some(opcode) => opcode,
            // Unknown instructions inside a function body would change its
            // meaning; outside they are metadata we do not consume
            None => {
                return if self.current_block != 0 {
                    Err(ParseError::MalformedInstruction("unknown opcode"))
                } else {
                    Ok(())
                }
            }
        };

        match opcode {
            spv::Op::Capability
            | spv::Op::Extension
            | spv::Op::MemoryModel
            | spv::Op::Source
            | spv::Op::SourceContinued
            | spv::Op::SourceExtension
            | spv::Op::String
            | spv::Op::Line
            | spv::Op::NoLine
            | spv::Op::ModuleProcessed => {}

            spv::Op::ExtInstImport => {
                require(operands, 2, "OpExtInstImport")?;
                let id = operands[0];
                let (name, _) = literal_string(&operands[1..]);
                let kind = if name == "GLSL.std.450" {
                    ExtensionKind::GlslStd450
                } else {
                    ExtensionKind::Unknown
                };
                self.module.set_extension(id, kind);
            }

            spv::Op::EntryPoint => {
                require(operands, 3, "OpEntryPoint")?;
                let model = spv::ExecutionModel::from_u32(operands[0])
                    .ok_or(ParseError::MalformedInstruction("OpEntryPoint model"))?;
                let entry_id = operands[1];
                let (name, used) = literal_string(&operands[2..]);

                // Only the first entry point is compiled
                if !self.seen_entry_point {
                    self.seen_entry_point = true;
                    self.module.execution_model = model;
                    self.module.entry_point = entry_id;
                    self.module.entry_point_name = name.clone();
                    self.module.entry_interface = operands[2 + used..].to_vec();
                    self.module.set_name(entry_id, name);
                }
            }

            spv::Op::ExecutionMode => {
                require(operands, 2, "OpExecutionMode")?;
                if operands[0] == self.module.entry_point {
                    self.module.execution_mode_flags |= 1u64 << operands[1];
                    if spv::ExecutionMode::from_u32(operands[1])
                        == Some(spv::ExecutionMode::LocalSize)
                    {
                        require(operands, 5, "OpExecutionMode LocalSize")?;
                        self.module.workgroup_size = [operands[2], operands[3], operands[4]];
                    }
                }
            }

            spv::Op::Name => {
                require(operands, 1, "OpName")?;
                let (name, _) = literal_string(&operands[1..]);
                self.module.set_name(operands[0], name);
            }

            spv::Op::MemberName => {
                require(operands, 2, "OpMemberName")?;
                let (name, _) = literal_string(&operands[2..]);
                self.module.set_member_name(operands[0], operands[1], name);
            }

            spv::Op::Decorate => {
                require(operands, 2, "OpDecorate")?;
                let dec = self.module.meta_mut(operands[0]);
                apply_decoration(&mut dec.decoration, operands[1], &operands[2..]);
            }

            spv::Op::MemberDecorate => {
                require(operands, 3, "OpMemberDecorate")?;
                let member = operands[1];
                let dec = self.module.meta_mut(operands[0]).member_mut(member);
                apply_decoration(dec, operands[2], &operands[3..]);
            }

            spv::Op::DecorationGroup | spv::Op::GroupDecorate | spv::Op::GroupMemberDecorate => {
                // Decoration groups are deprecated and absent from the
                // toolchains this backend consumes
            }

            spv::Op::TypeVoid => {
                require(operands, 1, "OpTypeVoid")?;
                let mut ty = SpirType::new(operands[0]);
                ty.basetype = BaseType::Void;
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeBool => {
                require(operands, 1, "OpTypeBool")?;
                let mut ty = SpirType::new(operands[0]);
                ty.basetype = BaseType::Boolean;
                ty.width = 1;
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeInt => {
                require(operands, 3, "OpTypeInt")?;
                let width = operands[1];
                let signed = operands[2] != 0;
                let mut ty = SpirType::new(operands[0]);
                ty.basetype = match (width, signed) {
                    (64, true) => BaseType::Int64,
                    (64, false) => BaseType::UInt64,
                    (8, true) => BaseType::Char,
                    (_, true) => BaseType::Int,
                    (_, false) => BaseType::UInt,
                };
                ty.width = width;
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeFloat => {
                require(operands, 2, "OpTypeFloat")?;
                let width = operands[1];
                let mut ty = SpirType::new(operands[0]);
                ty.basetype = if width == 64 {
                    BaseType::Double
                } else {
                    BaseType::Float
                };
                ty.width = width;
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeVector => {
                require(operands, 3, "OpTypeVector")?;
                let mut ty = self.derived_type(operands[1])?;
                ty.vecsize = operands[2];
                ty.parent_type = operands[1];
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeMatrix => {
                require(operands, 3, "OpTypeMatrix")?;
                let mut ty = self.derived_type(operands[1])?;
                ty.columns = operands[2];
                ty.parent_type = operands[1];
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeArray => {
                require(operands, 3, "OpTypeArray")?;
                let mut ty = self.derived_type(operands[1])?;
                let length = match self.module.constants.get_mut(&operands[2]) {
                    Some(constant) => {
                        constant.is_used_as_array_length = true;
                        constant.scalar()
                    }
                    None => 0,
                };
                ty.array.push(length);
                ty.parent_type = operands[1];
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeRuntimeArray => {
                require(operands, 2, "OpTypeRuntimeArray")?;
                let mut ty = self.derived_type(operands[1])?;
                ty.array.push(0);
                ty.parent_type = operands[1];
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeStruct => {
                require(operands, 1, "OpTypeStruct")?;
                let mut ty = SpirType::new(operands[0]);
                ty.basetype = BaseType::Struct;
                ty.member_types = operands[1..].to_vec();
                // Identically laid out struct types are emitted through one
                // declaration; later duplicates alias the lowest matching id
                let mut alias = None;
                for (other_id, other) in &self.module.types {
                    if other.basetype == BaseType::Struct
                        && other.member_types == ty.member_types
                        && self.module.meta(*other_id).map(|m| &m.members)
                            == self.module.meta(operands[0]).map(|m| &m.members)
                        && alias.map_or(true, |lowest| *other_id < lowest)
                    {
                        alias = Some(*other_id);
                    }
                }
                ty.type_alias = alias.unwrap_or(0);
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeImage => {
                require(operands, 8, "OpTypeImage")?;
                let mut ty = SpirType::new(operands[0]);
                ty.basetype = BaseType::Image;
                ty.image.sampled_type = operands[1];
                ty.image.dim = spv::Dim::from_u32(operands[2])
                    .ok_or(ParseError::MalformedInstruction("OpTypeImage dim"))?;
                ty.image.depth = operands[3] == 1;
                ty.image.arrayed = operands[4] != 0;
                ty.image.ms = operands[5] != 0;
                ty.image.sampled = operands[6];
                ty.image.format = spv::ImageFormat::from_u32(operands[7])
                    .unwrap_or(spv::ImageFormat::Unknown);
                ty.image.access = operands.get(8).and_then(|w| spv::AccessQualifier::from_u32(*w));
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeSampler => {
                require(operands, 1, "OpTypeSampler")?;
                let mut ty = SpirType::new(operands[0]);
                ty.basetype = BaseType::Sampler;
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeSampledImage => {
                require(operands, 2, "OpTypeSampledImage")?;
                let mut ty = self.derived_type(operands[1])?;
                ty.basetype = BaseType::SampledImage;
                ty.parent_type = operands[1];
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypePointer => {
                require(operands, 3, "OpTypePointer")?;
                let storage = spv::StorageClass::from_u32(operands[1])
                    .ok_or(ParseError::MalformedInstruction("OpTypePointer storage"))?;
                let mut ty = self.derived_type(operands[2])?;
                ty.pointer = true;
                ty.storage = storage;
                ty.parent_type = operands[2];
                self.module.set_type(operands[0], ty);
            }

            spv::Op::TypeFunction => {
                require(operands, 2, "OpTypeFunction")?;
                // Only the id needs to resolve; signatures are read from the
                // function definitions themselves
                let mut ty = SpirType::new(operands[0]);
                ty.basetype = BaseType::Unknown;
                self.module.set_type(operands[0], ty);
            }

            spv::Op::ConstantTrue | spv::Op::SpecConstantTrue => {
                require(operands, 2, "OpConstantTrue")?;
                let mut constant = SpirConstant::new(operands[1], operands[0], 1);
                constant.specialization = opcode == spv::Op::SpecConstantTrue;
                self.module.set_constant(operands[1], constant);
            }

            spv::Op::ConstantFalse | spv::Op::SpecConstantFalse => {
                require(operands, 2, "OpConstantFalse")?;
                let mut constant = SpirConstant::new(operands[1], operands[0], 0);
                constant.specialization = opcode == spv::Op::SpecConstantFalse;
                self.module.set_constant(operands[1], constant);
            }

            spv::Op::Constant | spv::Op::SpecConstant => {
                require(operands, 3, "OpConstant")?;
                let value = if operands.len() >= 4 {
                    (operands[2] as u64) | ((operands[3] as u64) << 32)
                } else {
                    operands[2] as u64
                };
                let mut constant = SpirConstant::new(operands[1], operands[0], value);
                constant.specialization = opcode == spv::Op::SpecConstant;
                self.module.set_constant(operands[1], constant);
            }

            spv::Op::ConstantComposite | spv::Op::SpecConstantComposite => {
                require(operands, 2, "OpConstantComposite")?;
                let mut constant = SpirConstant::new(operands[1], operands[0], 0);
                constant.subconstants = operands[2..].to_vec();
                constant.specialization = opcode == spv::Op::SpecConstantComposite;
                self.module.set_constant(operands[1], constant);
            }

            spv::Op::ConstantNull => {
                require(operands, 2, "OpConstantNull")?;
                let constant = SpirConstant::new(operands[1], operands[0], 0);
                self.module.set_constant(operands[1], constant);
            }

            spv::Op::Undef => {
                require(operands, 2, "OpUndef")?;
                self.module.set_undef(operands[1], operands[0]);
            }

            spv::Op::Variable => {
                require(operands, 3, "OpVariable")?;
                let storage = spv::StorageClass::from_u32(operands[2])
                    .ok_or(ParseError::MalformedInstruction("OpVariable storage"))?;
                let mut var = SpirVariable::new(operands[1], operands[0], storage);
                if let Some(init) = operands.get(3) {
                    var.initializer = *init;
                }
                self.module.set_variable(operands[1], var);

                if storage == spv::StorageClass::Function {
                    if self.current_function == 0 {
                        return Err(ParseError::InstructionOutsideFunction("OpVariable"));
                    }
                    self.module
                        .get_function_mut(self.current_function)
                        .add_local_variable(operands[1]);
                } else {
                    self.module.global_variables.push(operands[1]);
                }
            }

            spv::Op::Function => {
                require(operands, 4, "OpFunction")?;
                let function = SpirFunction::new(operands[1], operands[0], operands[3]);
                self.current_function = operands[1];
                self.module.set_function(operands[1], function);
            }

            spv::Op::FunctionParameter => {
                require(operands, 2, "OpFunctionParameter")?;
                if self.current_function == 0 {
                    return Err(ParseError::InstructionOutsideFunction("OpFunctionParameter"));
                }
                let var = SpirVariable::new(operands[1], operands[0], spv::StorageClass::Function);
                self.module.set_variable(operands[1], var);
                self.module
                    .get_function_mut(self.current_function)
                    .add_parameter(operands[0], operands[1], false);
            }

            spv::Op::FunctionEnd => {
                self.current_function = 0;
                self.current_block = 0;
            }

            spv::Op::Label => {
                require(operands, 1, "OpLabel")?;
                if self.current_function == 0 {
                    return Err(ParseError::InstructionOutsideFunction("OpLabel"));
                }
                self.module.set_block(operands[0], SpirBlock::new(operands[0]));
                self.module
                    .get_function_mut(self.current_function)
                    .blocks
                    .push(operands[0]);
                self.current_block = operands[0];
            }

            spv::Op::SelectionMerge => {
                require(operands, 1, "OpSelectionMerge")?;
                let block = self.block_mut()?;
                block.merge = MergeKind::Selection;
                block.merge_block = operands[0];
            }

            spv::Op::LoopMerge => {
                require(operands, 2, "OpLoopMerge")?;
                let block = self.block_mut()?;
                block.merge = MergeKind::Loop;
                block.merge_block = operands[0];
                block.continue_block = operands[1];
            }

            spv::Op::Branch => {
                require(operands, 1, "OpBranch")?;
                let block = self.block_mut()?;
                block.terminator = Terminator::Direct;
                block.next_block = operands[0];
                self.current_block = 0;
            }

            spv::Op::BranchConditional => {
                require(operands, 3, "OpBranchConditional")?;
                let block = self.block_mut()?;
                block.terminator = Terminator::Select;
                block.condition = operands[0];
                block.true_block = operands[1];
                block.false_block = operands[2];
                self.current_block = 0;
            }

            spv::Op::Switch => {
                require(operands, 2, "OpSwitch")?;
                let block = self.block_mut()?;
                block.terminator = Terminator::MultiSelect;
                block.condition = operands[0];
                block.default_block = operands[1];
                block.cases = operands[2..]
                    .chunks_exact(2)
                    .map(|pair| (pair[0], pair[1]))
                    .collect();
                self.current_block = 0;
            }

            spv::Op::Return => {
                let block = self.block_mut()?;
                block.terminator = Terminator::Return;
                self.current_block = 0;
            }

            spv::Op::ReturnValue => {
                require(operands, 1, "OpReturnValue")?;
                let block = self.block_mut()?;
                block.terminator = Terminator::Return;
                block.return_value = operands[0];
                self.current_block = 0;
            }

            spv::Op::Kill => {
                let block = self.block_mut()?;
                block.terminator = Terminator::Kill;
                self.current_block = 0;
            }

            spv::Op::Unreachable => {
                let block = self.block_mut()?;
                block.terminator = Terminator::Unreachable;
                self.current_block = 0;
            }

            _ => {
                // Everything else is a body instruction
                let instruction = Instruction {
                    op,
                    operands: operands.to_vec(),
                };
                self.block_mut()?.ops.push(instruction);
            }
        }

        Ok(())
    }

    /// Copy the record of a base type to build a derived type from it
    fn derived_type(&self, base_id: u32) -> Result<SpirType, ParseError> {
        match self.module.try_get_type(base_id) {
            Some(base) => Ok(base.clone()),
            None => Err(ParseError::IdOutOfBounds(base_id)),
        }
    }

    fn block_mut(&mut self) -> Result<&mut SpirBlock, ParseError> {
        if self.current_block == 0 {
            return Err(ParseError::InstructionOutsideFunction("body instruction"));
        }
        Ok(self.module.get_block_mut(self.current_block))
    }
}

fn apply_decoration(dec: &mut crate::Decoration, decoration: u32, args: &[u32]) {
    let decoration = match spv::Decoration::from_u32(decoration) {
        Some(decoration) => decoration,
        None => return,
    };
    dec.set_flag(decoration);
    match decoration {
        spv::Decoration::BuiltIn => dec.builtin_type = args.first().and_then(|w| spv::BuiltIn::from_u32(*w)),
        spv::Decoration::Location => dec.location = args.first().copied().unwrap_or(0),
        spv::Decoration::DescriptorSet => dec.set = args.first().copied().unwrap_or(0),
        spv::Decoration::Binding => dec.binding = args.first().copied().unwrap_or(0),
        spv::Decoration::Offset => dec.offset = args.first().copied().unwrap_or(0),
        spv::Decoration::ArrayStride => dec.array_stride = args.first().copied().unwrap_or(0),
        spv::Decoration::SpecId => dec.spec_id = args.first().copied().unwrap_or(0),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_bad_magic() {
        assert_eq!(
            parse_words(&[0xdeadbeef, 0, 0, 8, 0]),
            Err(ParseError::InvalidMagic)
        );
        assert_eq!(parse_words(&[SPIRV_MAGIC]), Err(ParseError::InvalidMagic));
    }

    #[test]
    fn reject_truncated_instruction() {
        // Header followed by an instruction claiming three words with one present
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 8, 0, (3 << 16) | 19];
        assert_eq!(parse_words(&words), Err(ParseError::TruncatedModule));
    }

    #[test]
    fn literal_string_spans_words() {
        let words = [u32::from_le_bytes(*b"main"), 0];
        let (name, used) = literal_string(&words);
        assert_eq!(name, "main");
        assert_eq!(used, 2);
    }
}
