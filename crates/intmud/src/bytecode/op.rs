//! Opcode definitions for the stack-based VM.
//!
//! Each opcode is one byte; operands follow inline, little-endian. Jump
//! operands are signed 16-bit offsets relative to the instruction pointer
//! after the operand has been fetched.

use strum::FromRepr;

/// Bytecode operation codes.
///
/// The VM is a stack machine: most operations pop operands from the value
/// stack and push one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum Opcode {
    // =====================================================================
    // Constants and trivially-pushed values
    // =====================================================================
    /// Push null.
    LoadNull = 0,
    /// Push integer 0.
    LoadZero,
    /// Push integer 1.
    LoadOne,
    /// Push the current receiver.
    LoadThis,
    /// Push the call's argument count.
    LoadArgCount,
    /// Push constant from the function's pool. Operand: u16 index.
    LoadConst,
    /// Push positional argument. Operand: u8 index (0..=9); missing args
    /// read as null.
    LoadArg,

    // =====================================================================
    // Stack shuffling
    // =====================================================================
    Pop,
    Dup,
    Swap,

    // =====================================================================
    // Locals
    // =====================================================================
    /// Operand: u8 slot.
    LoadLocal,
    /// Operand: u8 slot.
    StoreLocal,

    // =====================================================================
    // Fields, members, class members
    // =====================================================================
    /// Load a name on the current receiver (field → common → constant
    /// along the hierarchy). Operand: u16 name id.
    LoadField,
    /// Store to a name on the current receiver. Operand: u16 name id.
    /// Pops the value.
    StoreField,
    /// Load a member of a popped receiver. Operands: u16 name id, u8
    /// flags (bit 0 = countdown marker).
    LoadMember,
    /// Store a member of a receiver. Stack: `[recv, value]`. Operand: u16
    /// name id.
    StoreMember,
    /// Like `LoadMember` but the name is a string popped from the stack
    /// (above the receiver). Operand: u8 flags.
    LoadMemberDyn,
    /// Stack: `[recv, name, value]`.
    StoreMemberDyn,
    /// `Classe:membro` read. Operands: u16 class name id, u16 member id.
    LoadClassMember,
    /// `Classe:membro` write (common variables only). Pops the value.
    /// Operands: u16 class name id, u16 member id.
    StoreClassMember,
    /// `Classe[expr]:membro` read — the built class name is popped from
    /// the stack. Operand: u16 member id.
    LoadClassMemberDyn,
    /// `Classe[expr]:membro` write. Stack: `[classname, value]`.
    /// Operand: u16 member id.
    StoreClassMemberDyn,
    /// `$nome` — pops the name string, pushes the indexed object or null.
    LoadIndexed,
    /// Concatenate the text of N popped values into one name string.
    /// Operand: u8 piece count.
    BuildName,
    /// Collect N popped values into an array (in push order).
    /// Operand: u8 element count.
    BuildArray,
    /// Wrap the top of stack to an N-bit two's-complement integer.
    /// Operand: u8 bit width.
    CoerceInt,
    /// Coerce the top of stack to a double.
    CoerceReal,
    /// Coerce the top of stack to text bounded to N characters.
    /// Operand: u16 capacity.
    CoerceTxt,

    // =====================================================================
    // Indexing and sequences
    // =====================================================================
    /// Stack: `[recv, index]` → element (null past end).
    IndexGet,
    /// Stack: `[container, index, value]` → updated container.
    IndexStore,
    /// Pops a value, pushes its sequence length (0 when not a sequence).
    SeqLen,

    // =====================================================================
    // Arithmetic / logic / bitwise
    // =====================================================================
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Not,
    BitNot,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    EqStrict,
    NeStrict,
    Lt,
    Le,
    Gt,
    Ge,

    // =====================================================================
    // Control flow
    // =====================================================================
    /// Operand: i16 relative offset.
    Jump,
    /// Pops the condition. Operand: i16.
    JumpIfFalse,
    /// Pops the condition. Operand: i16.
    JumpIfTrue,
    /// Jumps on a falsy top of stack without popping (short-circuit `&&`).
    /// Operand: i16.
    JumpIfFalsePeek,
    /// Jumps on a truthy top of stack without popping (short-circuit `||`).
    /// Operand: i16.
    JumpIfTruePeek,
    /// Jumps when the top of stack is non-null without popping (`??`).
    /// Operand: i16.
    JumpIfNotNullPeek,

    // =====================================================================
    // Calls and returns
    // =====================================================================
    /// Call a function by name along the receiver's linearised hierarchy.
    /// Operands: u16 name id, u8 arg count.
    CallVirtual,
    /// Call a member of a popped receiver (handler operation or virtual
    /// function). Stack: `[recv, args...]`. Operands: u16 name id, u8 arg
    /// count, u8 flags.
    CallMember,
    /// Like `CallMember` with the name popped from the stack between the
    /// receiver and the arguments. Operand: u8 arg count.
    CallMemberDyn,
    /// `Classe:func(args)` — resolved in the named class's hierarchy.
    /// Operands: u16 class name id, u16 member id, u8 arg count.
    CallClass,
    /// `Classe[expr]:func(args)` — class name below the arguments on the
    /// stack. Operands: u16 member id, u8 arg count.
    CallClassDyn,
    /// Call a builtin. Operands: u16 builtin id, u8 arg count.
    CallBuiltin,
    /// Return the popped value.
    Ret,
    /// Return null.
    RetNull,
    /// Conditional return: pops the condition, then the value; returns the
    /// value when the condition is truthy, otherwise drops both and
    /// continues.
    RetCond,
    /// Terminate the whole program.
    Terminate,
}

impl Opcode {
    /// Operand byte count following the opcode byte.
    #[must_use]
    pub fn operand_size(self) -> usize {
        match self {
            Self::LoadNull
            | Self::LoadZero
            | Self::LoadOne
            | Self::LoadThis
            | Self::LoadArgCount
            | Self::Pop
            | Self::Dup
            | Self::Swap
            | Self::StoreMemberDyn
            | Self::LoadIndexed
            | Self::IndexGet
            | Self::IndexStore
            | Self::SeqLen
            | Self::CoerceReal
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Rem
            | Self::Neg
            | Self::Not
            | Self::BitNot
            | Self::BitAnd
            | Self::BitOr
            | Self::BitXor
            | Self::Shl
            | Self::Shr
            | Self::Eq
            | Self::Ne
            | Self::EqStrict
            | Self::NeStrict
            | Self::Lt
            | Self::Le
            | Self::Gt
            | Self::Ge
            | Self::Ret
            | Self::RetNull
            | Self::RetCond
            | Self::Terminate => 0,

            Self::LoadArg
            | Self::LoadLocal
            | Self::StoreLocal
            | Self::BuildName
            | Self::BuildArray
            | Self::CoerceInt
            | Self::LoadMemberDyn
            | Self::CallMemberDyn => 1,

            Self::LoadConst
            | Self::LoadField
            | Self::StoreField
            | Self::StoreMember
            | Self::LoadClassMemberDyn
            | Self::StoreClassMemberDyn
            | Self::CoerceTxt
            | Self::Jump
            | Self::JumpIfFalse
            | Self::JumpIfTrue
            | Self::JumpIfFalsePeek
            | Self::JumpIfTruePeek
            | Self::JumpIfNotNullPeek => 2,

            Self::LoadMember | Self::CallVirtual | Self::CallBuiltin | Self::CallClassDyn => 3,

            Self::LoadClassMember | Self::StoreClassMember | Self::CallMember => 4,

            Self::CallClass => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_repr() {
        assert_eq!(Opcode::from_repr(Opcode::LoadNull as u8), Some(Opcode::LoadNull));
        assert_eq!(Opcode::from_repr(Opcode::Terminate as u8), Some(Opcode::Terminate));
        assert_eq!(Opcode::from_repr(Opcode::Terminate as u8 + 1), None);
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(Opcode::Add.operand_size(), 0);
        assert_eq!(Opcode::LoadLocal.operand_size(), 1);
        assert_eq!(Opcode::Jump.operand_size(), 2);
        assert_eq!(Opcode::CallVirtual.operand_size(), 3);
        assert_eq!(Opcode::CallBuiltin.operand_size(), 4);
        assert_eq!(Opcode::CallClass.operand_size(), 5);
    }
}
