//! The opcode table of the CPython 3.7 virtual machine.
//!
//! Opcode numbers, argument presence, jump kinds and stack effects all follow
//! CPython 3.7 exactly, so assembled code objects load into that interpreter.

use strum::{Display, FromRepr, IntoStaticStr};

/// Opcodes at or above this number take an argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// CPython 3.7 opcodes.
///
/// Names print in `dis` style (`BINARY_ADD`) through strum.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, FromRepr, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,
    BinaryMatrixMultiply = 16,
    InplaceMatrixMultiply = 17,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    GetAiter = 50,
    GetAnext = 51,
    BeforeAsyncWith = 52,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    GetYieldFromIter = 69,
    PrintExpr = 70,
    LoadBuildClass = 71,
    YieldFrom = 72,
    GetAwaitable = 73,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    BreakLoop = 80,
    WithCleanupStart = 81,
    WithCleanupFinish = 82,
    ReturnValue = 83,
    ImportStar = 84,
    SetupAnnotations = 85,
    YieldValue = 86,
    PopBlock = 87,
    EndFinally = 88,
    PopExcept = 89,
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    UnpackEx = 94,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildSet = 104,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    ImportName = 108,
    ImportFrom = 109,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    DeleteDeref = 138,
    CallFunctionKw = 141,
    CallFunctionEx = 142,
    SetupWith = 143,
    ExtendedArg = 144,
    ListAppend = 145,
    SetAdd = 146,
    MapAdd = 147,
    LoadClassderef = 148,
    BuildListUnpack = 149,
    BuildMapUnpack = 150,
    BuildMapUnpackWithCall = 151,
    BuildTupleUnpack = 152,
    BuildSetUnpack = 153,
    SetupAsyncWith = 154,
    FormatValue = 155,
    BuildConstKeyMap = 156,
    BuildString = 157,
    BuildTupleUnpackWithCall = 158,
    LoadMethod = 160,
    CallMethod = 161,
}

impl Opcode {
    #[must_use]
    pub fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// Jumps whose argument is a distance from the next instruction.
    #[must_use]
    pub fn is_relative_jump(self) -> bool {
        matches!(
            self,
            Self::ForIter
                | Self::JumpForward
                | Self::SetupLoop
                | Self::SetupExcept
                | Self::SetupFinally
                | Self::SetupWith
                | Self::SetupAsyncWith
        )
    }

    /// Jumps whose argument is a byte offset from the start of the code.
    #[must_use]
    pub fn is_absolute_jump(self) -> bool {
        matches!(
            self,
            Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::JumpAbsolute
                | Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::ContinueLoop
        )
    }

    #[must_use]
    pub fn is_jump(self) -> bool {
        self.is_relative_jump() || self.is_absolute_jump()
    }

    /// Instructions after which control never falls through to the next one.
    #[must_use]
    pub fn is_unconditional_transfer(self) -> bool {
        matches!(
            self,
            Self::JumpAbsolute | Self::JumpForward | Self::ReturnValue | Self::RaiseVarargs | Self::BreakLoop
        )
    }

    /// Net change of the value stack, following CPython 3.7's `stack_effect`.
    ///
    /// `jump` selects the effect along the taken branch of a jump or block
    /// setup instruction; it is ignored for everything else.
    #[must_use]
    pub fn stack_effect(self, arg: u32, jump: bool) -> i32 {
        let oparg = i32::try_from(arg).unwrap_or(i32::MAX);
        match self {
            Self::Nop | Self::ExtendedArg => 0,
            Self::PopTop => -1,
            Self::RotTwo | Self::RotThree => 0,
            Self::DupTop => 1,
            Self::DupTopTwo => 2,

            Self::UnaryPositive | Self::UnaryNegative | Self::UnaryNot | Self::UnaryInvert => 0,

            Self::SetAdd | Self::ListAppend => -1,
            Self::MapAdd => -2,

            Self::BinaryPower
            | Self::BinaryMultiply
            | Self::BinaryMatrixMultiply
            | Self::BinaryModulo
            | Self::BinaryAdd
            | Self::BinarySubtract
            | Self::BinarySubscr
            | Self::BinaryFloorDivide
            | Self::BinaryTrueDivide
            | Self::BinaryLshift
            | Self::BinaryRshift
            | Self::BinaryAnd
            | Self::BinaryXor
            | Self::BinaryOr => -1,
            Self::InplaceFloorDivide
            | Self::InplaceTrueDivide
            | Self::InplaceAdd
            | Self::InplaceSubtract
            | Self::InplaceMultiply
            | Self::InplaceMatrixMultiply
            | Self::InplaceModulo
            | Self::InplacePower
            | Self::InplaceLshift
            | Self::InplaceRshift
            | Self::InplaceAnd
            | Self::InplaceXor
            | Self::InplaceOr => -1,

            Self::StoreSubscr => -3,
            Self::DeleteSubscr => -2,

            Self::GetIter | Self::GetYieldFromIter => 0,
            Self::PrintExpr => -1,
            Self::LoadBuildClass => 1,

            Self::ReturnValue => -1,
            Self::ImportStar => -1,
            Self::SetupAnnotations => 0,
            Self::YieldValue => 0,
            Self::YieldFrom => -1,
            Self::PopBlock => 0,
            // the three saved exception values
            Self::PopExcept => -3,
            // handlers are entered with six extra values; the normal path
            // reaches `END_FINALLY` with fewer and is never walked there
            Self::EndFinally => -6,

            Self::StoreName => -1,
            Self::DeleteName => 0,
            Self::UnpackSequence => oparg - 1,
            Self::UnpackEx => (oparg & 0xFF) + (oparg >> 8),
            Self::ForIter => {
                if jump {
                    -1
                } else {
                    1
                }
            }

            Self::StoreAttr => -2,
            Self::DeleteAttr => -1,
            Self::StoreGlobal => -1,
            Self::DeleteGlobal => 0,
            Self::LoadConst => 1,
            Self::LoadName => 1,
            Self::BuildTuple
            | Self::BuildList
            | Self::BuildSet
            | Self::BuildString
            | Self::BuildListUnpack
            | Self::BuildTupleUnpack
            | Self::BuildTupleUnpackWithCall
            | Self::BuildSetUnpack
            | Self::BuildMapUnpack
            | Self::BuildMapUnpackWithCall => 1 - oparg,
            Self::BuildMap => 1 - 2 * oparg,
            Self::BuildConstKeyMap => -oparg,
            Self::LoadAttr => 0,
            Self::CompareOp => -1,
            Self::ImportName => -1,
            Self::ImportFrom => 1,

            Self::JumpForward | Self::JumpAbsolute | Self::ContinueLoop => 0,
            Self::JumpIfTrueOrPop | Self::JumpIfFalseOrPop => {
                if jump {
                    0
                } else {
                    -1
                }
            }
            Self::PopJumpIfFalse | Self::PopJumpIfTrue => -1,

            Self::LoadGlobal => 1,

            Self::BreakLoop => 0,
            Self::SetupLoop => 0,
            Self::SetupExcept | Self::SetupFinally => {
                if jump {
                    6
                } else {
                    0
                }
            }
            Self::SetupWith => {
                if jump {
                    6
                } else {
                    1
                }
            }
            Self::WithCleanupStart => 2,
            Self::WithCleanupFinish => -3,

            Self::LoadFast => 1,
            Self::StoreFast => -1,
            Self::DeleteFast => 0,

            Self::RaiseVarargs => -oparg,

            Self::CallFunction => -oparg,
            Self::CallMethod => -oparg - 1,
            Self::CallFunctionKw => -oparg - 1,
            Self::CallFunctionEx => -1 - (oparg & 0x01),
            Self::MakeFunction => -1 - i32::try_from((arg & 0x0F).count_ones()).unwrap_or(0),
            Self::BuildSlice => {
                if oparg == 3 {
                    -2
                } else {
                    -1
                }
            }

            Self::LoadClosure => 1,
            Self::LoadDeref | Self::LoadClassderef => 1,
            Self::StoreDeref => -1,
            Self::DeleteDeref => 0,

            Self::GetAwaitable => 0,
            Self::SetupAsyncWith => {
                if jump {
                    5
                } else {
                    0
                }
            }
            Self::BeforeAsyncWith => 1,
            Self::GetAiter => 0,
            Self::GetAnext => 1,

            Self::FormatValue => {
                if (oparg & 0x04) == 0x04 {
                    -1
                } else {
                    0
                }
            }
            Self::LoadMethod => 1,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_repr(value).ok_or(value)
    }
}

/// Argument of `COMPARE_OP`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
pub enum CompareOp {
    #[strum(serialize = "<")]
    Lt = 0,
    #[strum(serialize = "<=")]
    LtE = 1,
    #[strum(serialize = "==")]
    Eq = 2,
    #[strum(serialize = "!=")]
    NotEq = 3,
    #[strum(serialize = ">")]
    Gt = 4,
    #[strum(serialize = ">=")]
    GtE = 5,
    #[strum(serialize = "in")]
    In = 6,
    #[strum(serialize = "not in")]
    NotIn = 7,
    #[strum(serialize = "is")]
    Is = 8,
    #[strum(serialize = "is not")]
    IsNot = 9,
    #[strum(serialize = "exception match")]
    ExceptionMatch = 10,
}

/// `MAKE_FUNCTION` flag bits.
pub mod make_function {
    pub const DEFAULTS: u32 = 0x01;
    pub const KW_DEFAULTS: u32 = 0x02;
    pub const ANNOTATIONS: u32 = 0x04;
    pub const CLOSURE: u32 = 0x08;
}

/// `FORMAT_VALUE` flag bits.
pub mod format_value {
    pub const CONVERSION_STR: u32 = 0x01;
    pub const CONVERSION_REPR: u32 = 0x02;
    pub const CONVERSION_ASCII: u32 = 0x03;
    pub const HAS_SPEC: u32 = 0x04;
}
