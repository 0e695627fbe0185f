//! 字节码操作码定义
//!
//! Register instruction set. Every instruction is one opcode byte followed by
//! operands in one of a few fixed formats:
//!
//! | format | layout             | size |
//! |--------|--------------------|------|
//! | Z      | op                 | 1    |
//! | B      | op a:u8            | 2    |
//! | BB     | op a:u8 b:u8       | 3    |
//! | BBB    | op a:u8 b:u8 c:u8  | 4    |
//! | S      | op a:u16           | 3    |
//! | BS     | op a:u8 b:u16      | 4    |
//! | BSB    | op a:u8 b:u16 c:u8 | 5    |
//!
//! 16-bit operands are little endian. `R(x)` is register `x` of the current
//! window, `Syms(x)`, `Pool(x)` and `Child(x)` index the irep's tables.
//!
//! 指令编码空间规划：
//! - 0x00-0x0F：加载
//! - 0x10-0x1F：变量
//! - 0x20-0x2F：跳转与异常
//! - 0x30-0x3F：调用与返回
//! - 0x40-0x4F：算术与比较
//! - 0x50-0x5F：对象构造与定义

use std::fmt;

/// Operand format of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandFormat {
    Z,
    B,
    BB,
    BBB,
    S,
    BS,
    BSB,
}

impl OperandFormat {
    /// Encoded size including the opcode byte
    pub fn size(&self) -> usize {
        match self {
            OperandFormat::Z => 1,
            OperandFormat::B => 2,
            OperandFormat::BB => 3,
            OperandFormat::BBB => 4,
            OperandFormat::S => 3,
            OperandFormat::BS => 4,
            OperandFormat::BSB => 5,
        }
    }
}

/// 字节码操作码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// 空操作
    Nop = 0x00,
    /// R(a) = R(b)
    Move = 0x01,
    /// R(a) = Pool(b) (numeric literal)
    LoadL = 0x02,
    /// R(a) = b as i16
    LoadI = 0x03,
    /// R(a) = :Syms(b)
    LoadSym = 0x04,
    /// R(a) = nil
    LoadNil = 0x05,
    /// R(a) = self
    LoadSelf = 0x06,
    /// R(a) = true
    LoadT = 0x07,
    /// R(a) = false
    LoadF = 0x08,
    /// R(a) = new string copied from Pool(b)
    String = 0x09,

    /// R(a) = $Syms(b)
    GetGV = 0x10,
    /// $Syms(b) = R(a)
    SetGV = 0x11,
    /// R(a) = @Syms(b)
    GetIV = 0x12,
    /// @Syms(b) = R(a)
    SetIV = 0x13,
    /// R(a) = constant Syms(b)
    GetConst = 0x14,
    /// constant Syms(b) = R(a)
    SetConst = 0x15,
    /// R(a) = register b of the enclosing frame c levels up
    GetUpVar = 0x16,
    /// register b of the enclosing frame c levels up = R(a)
    SetUpVar = 0x17,

    /// pc = a
    Jmp = 0x20,
    /// if R(a) then pc = b
    JmpIf = 0x21,
    /// unless R(a) then pc = b
    JmpNot = 0x22,
    /// if R(a).nil? then pc = b
    JmpNil = 0x23,
    /// push a rescue handler at a
    OnErr = 0x28,
    /// R(a) = pending exception; clear it
    Except = 0x29,
    /// R(b) = R(a).is_a?(R(b))
    Rescue = 0x2A,
    /// pop a rescue handlers
    PopErr = 0x2B,
    /// raise R(a) unless it is nil
    RaiseIf = 0x2C,

    /// R(a) = R(a).Syms(b)(R(a+1) .. R(a+c))
    Send = 0x30,
    /// R(a) = R(a).Syms(b)(R(a+1) .. R(a+c)) with block R(a+c+1)
    SendB = 0x31,
    /// R(a) = super(R(a+1) .. R(a+b))
    Super = 0x32,
    /// return R(a)
    Return = 0x33,
    /// return R(a) from the method enclosing the block
    ReturnBlk = 0x34,
    /// break out of the block's call with R(a)
    Break = 0x35,
    /// R(a) = block argument of the enclosing method
    BlkPush = 0x36,

    /// R(a) = R(a) + R(a+1)
    Add = 0x40,
    /// R(a) = R(a) + b
    AddI = 0x41,
    /// R(a) = R(a) - R(a+1)
    Sub = 0x42,
    /// R(a) = R(a) - b
    SubI = 0x43,
    /// R(a) = R(a) * R(a+1)
    Mul = 0x44,
    /// R(a) = R(a) / R(a+1)
    Div = 0x45,
    /// R(a) = R(a) == R(a+1)
    Eq = 0x46,
    /// R(a) = R(a) < R(a+1)
    Lt = 0x47,
    /// R(a) = R(a) <= R(a+1)
    Le = 0x48,
    /// R(a) = R(a) > R(a+1)
    Gt = 0x49,
    /// R(a) = R(a) >= R(a+1)
    Ge = 0x4A,

    /// R(a) = [R(b) .. R(b+c-1)]
    Array = 0x50,
    /// R(a) = {R(a) => R(a+1), ...} with b pairs
    Hash = 0x51,
    /// R(a) = R(a) + R(a+1) (string concatenation)
    StrCat = 0x52,
    /// R(a) = R(a)..R(a+1), exclusive when b != 0
    Range = 0x53,
    /// R(a) = block closure over Child(b)
    Block = 0x58,
    /// R(a) = method body Child(b)
    Method = 0x59,
    /// R(a).define_method(Syms(b), R(a+1))
    Def = 0x5A,
    /// define singleton method Syms(b) on class R(a) with body R(a+1)
    SDef = 0x5B,
    /// R(a) = class Syms(b) < R(a+1)
    Class = 0x5C,
    /// run Child(b) with self = R(a); R(a) = result
    Exec = 0x5D,
    /// R(a) = target class
    TClass = 0x5E,

    /// stop the task
    Stop = 0xFF,
}

impl Opcode {
    /// Operand format of this opcode
    pub fn format(&self) -> OperandFormat {
        use Opcode::*;
        match self {
            Nop | Stop => OperandFormat::Z,
            LoadNil | LoadSelf | LoadT | LoadF | Except | PopErr | RaiseIf | Return
            | ReturnBlk | Break | BlkPush | Add | Sub | Mul | Div | Eq | Lt | Le | Gt | Ge
            | StrCat | TClass => OperandFormat::B,
            Move | Rescue | Super | AddI | SubI | Hash | Range => OperandFormat::BB,
            GetUpVar | SetUpVar | Array => OperandFormat::BBB,
            Jmp | OnErr => OperandFormat::S,
            LoadL | LoadI | LoadSym | String | GetGV | SetGV | GetIV | SetIV | GetConst
            | SetConst | JmpIf | JmpNot | JmpNil | Block | Method | Def | SDef | Class | Exec => {
                OperandFormat::BS
            }
            Send | SendB => OperandFormat::BSB,
        }
    }

    /// Mnemonic used by the disassembler
    pub fn name(&self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Move => "MOVE",
            LoadL => "LOADL",
            LoadI => "LOADI",
            LoadSym => "LOADSYM",
            LoadNil => "LOADNIL",
            LoadSelf => "LOADSELF",
            LoadT => "LOADT",
            LoadF => "LOADF",
            String => "STRING",
            GetGV => "GETGV",
            SetGV => "SETGV",
            GetIV => "GETIV",
            SetIV => "SETIV",
            GetConst => "GETCONST",
            SetConst => "SETCONST",
            GetUpVar => "GETUPVAR",
            SetUpVar => "SETUPVAR",
            Jmp => "JMP",
            JmpIf => "JMPIF",
            JmpNot => "JMPNOT",
            JmpNil => "JMPNIL",
            OnErr => "ONERR",
            Except => "EXCEPT",
            Rescue => "RESCUE",
            PopErr => "POPERR",
            RaiseIf => "RAISEIF",
            Send => "SEND",
            SendB => "SENDB",
            Super => "SUPER",
            Return => "RETURN",
            ReturnBlk => "RETURN_BLK",
            Break => "BREAK",
            BlkPush => "BLKPUSH",
            Add => "ADD",
            AddI => "ADDI",
            Sub => "SUB",
            SubI => "SUBI",
            Mul => "MUL",
            Div => "DIV",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Gt => "GT",
            Ge => "GE",
            Array => "ARRAY",
            Hash => "HASH",
            StrCat => "STRCAT",
            Range => "RANGE",
            Block => "BLOCK",
            Method => "METHOD",
            Def => "DEF",
            SDef => "SDEF",
            Class => "CLASS",
            Exec => "EXEC",
            TClass => "TCLASS",
            Stop => "STOP",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        Ok(match value {
            0x00 => Nop,
            0x01 => Move,
            0x02 => LoadL,
            0x03 => LoadI,
            0x04 => LoadSym,
            0x05 => LoadNil,
            0x06 => LoadSelf,
            0x07 => LoadT,
            0x08 => LoadF,
            0x09 => String,
            0x10 => GetGV,
            0x11 => SetGV,
            0x12 => GetIV,
            0x13 => SetIV,
            0x14 => GetConst,
            0x15 => SetConst,
            0x16 => GetUpVar,
            0x17 => SetUpVar,
            0x20 => Jmp,
            0x21 => JmpIf,
            0x22 => JmpNot,
            0x23 => JmpNil,
            0x28 => OnErr,
            0x29 => Except,
            0x2A => Rescue,
            0x2B => PopErr,
            0x2C => RaiseIf,
            0x30 => Send,
            0x31 => SendB,
            0x32 => Super,
            0x33 => Return,
            0x34 => ReturnBlk,
            0x35 => Break,
            0x36 => BlkPush,
            0x40 => Add,
            0x41 => AddI,
            0x42 => Sub,
            0x43 => SubI,
            0x44 => Mul,
            0x45 => Div,
            0x46 => Eq,
            0x47 => Lt,
            0x48 => Le,
            0x49 => Gt,
            0x4A => Ge,
            0x50 => Array,
            0x51 => Hash,
            0x52 => StrCat,
            0x53 => Range,
            0x58 => Block,
            0x59 => Method,
            0x5A => Def,
            0x5B => SDef,
            0x5C => Class,
            0x5D => Exec,
            0x5E => TClass,
            0xFF => Stop,
            other => return Err(other),
        })
    }
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub op: Opcode,
    pub a: u32,
    pub b: u32,
    pub c: u32,
}

/// Why an instruction could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    InvalidOpcode { pc: usize, byte: u8 },
    Truncated { pc: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            DecodeError::InvalidOpcode { pc, byte } => {
                write!(f, "invalid opcode 0x{:02X} at {}", byte, pc)
            }
            DecodeError::Truncated { pc } => write!(f, "truncated instruction at {}", pc),
        }
    }
}

/// Decode the instruction at `pc`, returning it with the next pc
#[inline]
pub fn decode(
    iseq: &[u8],
    pc: usize,
) -> Result<(Instr, usize), DecodeError> {
    let byte = *iseq.get(pc).ok_or(DecodeError::Truncated { pc })?;
    let op = Opcode::try_from(byte).map_err(|byte| DecodeError::InvalidOpcode { pc, byte })?;
    let format = op.format();
    let end = pc + format.size();
    if end > iseq.len() {
        return Err(DecodeError::Truncated { pc });
    }
    let u8_at = |i: usize| iseq[pc + i] as u32;
    let u16_at = |i: usize| u16::from_le_bytes([iseq[pc + i], iseq[pc + i + 1]]) as u32;
    let (a, b, c) = match format {
        OperandFormat::Z => (0, 0, 0),
        OperandFormat::B => (u8_at(1), 0, 0),
        OperandFormat::BB => (u8_at(1), u8_at(2), 0),
        OperandFormat::BBB => (u8_at(1), u8_at(2), u8_at(3)),
        OperandFormat::S => (u16_at(1), 0, 0),
        OperandFormat::BS => (u8_at(1), u16_at(2), 0),
        OperandFormat::BSB => (u8_at(1), u16_at(2), u8_at(4)),
    };
    Ok((Instr { op, a, b, c }, end))
}

/// Append an encoded instruction to `out`
///
/// Operands that do not fit their slot are truncated; callers check ranges.
pub fn encode(
    out: &mut Vec<u8>,
    op: Opcode,
    a: u32,
    b: u32,
    c: u32,
) {
    out.push(op as u8);
    match op.format() {
        OperandFormat::Z => {}
        OperandFormat::B => out.push(a as u8),
        OperandFormat::BB => out.extend_from_slice(&[a as u8, b as u8]),
        OperandFormat::BBB => out.extend_from_slice(&[a as u8, b as u8, c as u8]),
        OperandFormat::S => out.extend_from_slice(&(a as u16).to_le_bytes()),
        OperandFormat::BS => {
            out.push(a as u8);
            out.extend_from_slice(&(b as u16).to_le_bytes());
        }
        OperandFormat::BSB => {
            out.push(a as u8);
            out.extend_from_slice(&(b as u16).to_le_bytes());
            out.push(c as u8);
        }
    }
}
