//! Instruction sequences (ireps) and their binary format
//!
//! A compiled unit is a tree of ireps: the top-level sequence plus one child
//! per block, method or class body. The compiler produces a [`RawIrep`] with
//! symbol names as strings; loading verifies it and interns the names into an
//! immutable [`Irep`] shared through `Rc`.
//!
//! Binary layout (all integers little endian after the magic):
//!
//! ```text
//! "TRBC"  u16 version  u16 flags  u32 body_len  u32 crc32(body)
//! body := irep
//! irep := u16 nlocals  u16 nregs  u8 argc  u8 optc
//!         u8 n (u16 opt_entry)*n
//!         u32 len  iseq[len]
//!         u16 n  literal*n
//!         u16 n  (u16 len bytes)*n      symbols
//!         u16 n  (u16 len bytes)*n      local names
//!         u16 n  irep*n                 children
//! literal := 0 i64 | 1 f64 | 2 u32 len bytes
//! ```

use std::fmt::Write as _;
use std::rc::Rc;

use crate::runtime::symbol::{SymbolId, SymbolTable};
use crate::vm::errors::VmError;
use crate::vm::opcode::{decode, Opcode, OperandFormat};

/// Magic at the start of every irep blob
pub const IREP_MAGIC: &[u8; 4] = b"TRBC";
/// Current binary format version
pub const IREP_VERSION: u16 = 1;

const HEADER_LEN: usize = 16;
/// Nested blocks deeper than this are rejected at load
const MAX_NESTING: usize = 64;

/// Pool literal
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(Box<str>),
}

/// Irep as produced by a compiler, before symbol interning
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawIrep {
    pub nlocals: u16,
    pub nregs: u16,
    /// Required arguments
    pub argc: u8,
    /// Optional arguments
    pub optc: u8,
    /// Entry pc for 0..=optc supplied optional arguments
    pub opt_entries: Vec<u16>,
    pub iseq: Vec<u8>,
    pub pool: Vec<Literal>,
    pub syms: Vec<String>,
    pub lvars: Vec<String>,
    pub children: Vec<RawIrep>,
}

/// Loaded, immutable instruction sequence
#[derive(Debug)]
pub struct Irep {
    pub nlocals: u16,
    pub nregs: u16,
    pub argc: u8,
    pub optc: u8,
    pub opt_entries: Box<[u16]>,
    pub iseq: Box<[u8]>,
    pub pool: Box<[Literal]>,
    pub syms: Box<[SymbolId]>,
    pub lvars: Box<[SymbolId]>,
    pub children: Box<[Rc<Irep>]>,
}

impl Irep {
    /// Register slot receiving the block argument
    #[inline]
    pub fn block_slot(&self) -> usize {
        1 + self.argc as usize + self.optc as usize
    }

    /// Entry pc when `given` optional arguments were supplied
    pub fn entry_pc(
        &self,
        given: usize,
    ) -> usize {
        if self.optc == 0 {
            return 0;
        }
        let idx = given.min(self.optc as usize);
        self.opt_entries.get(idx).copied().unwrap_or(0) as usize
    }

    /// True while any irep of this tree is referenced from outside it
    pub fn is_shared(self: &Rc<Self>) -> bool {
        Rc::strong_count(self) > 1 || self.children.iter().any(|c| c.is_shared())
    }

    /// Bytes this tree accounts for in the arena
    pub fn footprint(&self) -> usize {
        let own = 24
            + self.iseq.len()
            + self.pool.len() * 16
            + (self.syms.len() + self.lvars.len()) * 4
            + self.opt_entries.len() * 2;
        own + self.children.iter().map(|c| c.footprint()).sum::<usize>()
    }
}

impl RawIrep {
    /// Serialize to the binary format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        self.write_body(&mut body);

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(IREP_MAGIC);
        out.extend_from_slice(&IREP_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    fn write_body(
        &self,
        out: &mut Vec<u8>,
    ) {
        out.extend_from_slice(&self.nlocals.to_le_bytes());
        out.extend_from_slice(&self.nregs.to_le_bytes());
        out.push(self.argc);
        out.push(self.optc);
        out.push(self.opt_entries.len() as u8);
        for pc in &self.opt_entries {
            out.extend_from_slice(&pc.to_le_bytes());
        }
        out.extend_from_slice(&(self.iseq.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.iseq);

        out.extend_from_slice(&(self.pool.len() as u16).to_le_bytes());
        for lit in &self.pool {
            match lit {
                Literal::Integer(i) => {
                    out.push(0);
                    out.extend_from_slice(&i.to_le_bytes());
                }
                Literal::Float(f) => {
                    out.push(1);
                    out.extend_from_slice(&f.to_bits().to_le_bytes());
                }
                Literal::String(s) => {
                    out.push(2);
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
        for names in [&self.syms, &self.lvars] {
            out.extend_from_slice(&(names.len() as u16).to_le_bytes());
            for name in names.iter() {
                out.extend_from_slice(&(name.len() as u16).to_le_bytes());
                out.extend_from_slice(name.as_bytes());
            }
        }
        out.extend_from_slice(&(self.children.len() as u16).to_le_bytes());
        for child in &self.children {
            child.write_body(out);
        }
    }

    /// Parse and check a binary blob
    pub fn from_bytes(bytes: &[u8]) -> Result<RawIrep, VmError> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != IREP_MAGIC {
            return Err(VmError::IrepFormat("bad magic".to_string()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != IREP_VERSION {
            return Err(VmError::VersionMismatch {
                expected: IREP_VERSION,
                found: version,
            });
        }
        let body_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let crc = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        let body = &bytes[HEADER_LEN..];
        if body.len() != body_len {
            return Err(VmError::IrepFormat(format!(
                "body length {} does not match header {}",
                body.len(),
                body_len
            )));
        }
        if crc32fast::hash(body) != crc {
            return Err(VmError::IrepFormat("checksum mismatch".to_string()));
        }

        let mut reader = Reader { bytes: body, pos: 0 };
        let irep = reader.irep(0)?;
        if reader.pos != body.len() {
            return Err(VmError::IrepFormat("trailing bytes after irep".to_string()));
        }
        Ok(irep)
    }

    /// Check every instruction against this irep's tables
    pub fn verify(&self) -> Result<(), VmError> {
        let fail = |msg: String| Err(VmError::IrepFormat(msg));
        let nregs = self.nregs as usize;
        if nregs == 0 || nregs > 256 {
            return fail(format!("register count {} out of range", nregs));
        }
        if nregs <= 1 + self.argc as usize + self.optc as usize {
            return fail("no room for arguments and block slot".to_string());
        }
        if self.optc > 0 && self.opt_entries.len() != self.optc as usize + 1 {
            return fail("optional argument entries missing".to_string());
        }

        // instruction boundaries
        let mut starts = vec![false; self.iseq.len() + 1];
        let mut instrs = Vec::new();
        let mut pc = 0;
        while pc < self.iseq.len() {
            let (instr, next) =
                decode(&self.iseq, pc).map_err(|e| VmError::IrepFormat(e.to_string()))?;
            starts[pc] = true;
            instrs.push((pc, instr));
            pc = next;
        }
        let is_target = |t: u32| (t as usize) < self.iseq.len() && starts[t as usize];
        for pc in &self.opt_entries {
            if !is_target(*pc as u32) {
                return fail(format!("optional entry {} is not an instruction", pc));
            }
        }

        for (pc, i) in instrs {
            let reg = |r: u32| -> Result<(), VmError> {
                if (r as usize) < nregs {
                    Ok(())
                } else {
                    Err(VmError::IrepFormat(format!(
                        "{} at {}: register {} out of {}",
                        i.op, pc, r, nregs
                    )))
                }
            };
            let sym = |s: u32| -> Result<(), VmError> {
                if (s as usize) < self.syms.len() {
                    Ok(())
                } else {
                    Err(VmError::IrepFormat(format!("{} at {}: symbol {} out of range", i.op, pc, s)))
                }
            };
            let child = |c: u32| -> Result<(), VmError> {
                if (c as usize) < self.children.len() {
                    Ok(())
                } else {
                    Err(VmError::IrepFormat(format!("{} at {}: child {} out of range", i.op, pc, c)))
                }
            };
            let target = |t: u32| -> Result<(), VmError> {
                if is_target(t) {
                    Ok(())
                } else {
                    Err(VmError::IrepFormat(format!("{} at {}: bad jump target {}", i.op, pc, t)))
                }
            };

            use Opcode::*;
            match i.op {
                Nop | Stop | PopErr => {}
                Move => {
                    reg(i.a)?;
                    reg(i.b)?;
                }
                LoadL => {
                    reg(i.a)?;
                    match self.pool.get(i.b as usize) {
                        Some(Literal::Integer(_)) | Some(Literal::Float(_)) => {}
                        _ => return fail(format!("LOADL at {}: pool {} is not numeric", pc, i.b)),
                    }
                }
                String => {
                    reg(i.a)?;
                    if !matches!(self.pool.get(i.b as usize), Some(Literal::String(_))) {
                        return fail(format!("STRING at {}: pool {} is not a string", pc, i.b));
                    }
                }
                LoadI | LoadNil | LoadSelf | LoadT | LoadF | Except | RaiseIf | Return
                | ReturnBlk | Break | BlkPush | TClass => reg(i.a)?,
                LoadSym | GetGV | SetGV | GetIV | SetIV | GetConst | SetConst => {
                    reg(i.a)?;
                    sym(i.b)?;
                }
                GetUpVar | SetUpVar => reg(i.a)?,
                Jmp | OnErr => target(i.a)?,
                JmpIf | JmpNot | JmpNil => {
                    reg(i.a)?;
                    target(i.b)?;
                }
                Rescue => {
                    reg(i.a)?;
                    reg(i.b)?;
                }
                Send => {
                    reg(i.a + i.c)?;
                    sym(i.b)?;
                }
                SendB => {
                    reg(i.a + i.c + 1)?;
                    sym(i.b)?;
                }
                Super => reg(i.a + i.b + 1)?,
                Add | AddI | Sub | SubI | Mul | Div | Eq | Lt | Le | Gt | Ge | StrCat | Range => {
                    reg(i.a + 1)?
                }
                Array => {
                    reg(i.a)?;
                    if i.c > 0 {
                        reg(i.b + i.c - 1)?;
                    }
                }
                Hash => {
                    reg(i.a)?;
                    if i.b > 0 {
                        reg(i.a + 2 * i.b - 1)?;
                    }
                }
                Block | Method | Exec => {
                    reg(i.a)?;
                    child(i.b)?;
                }
                Def | SDef | Class => {
                    reg(i.a + 1)?;
                    sym(i.b)?;
                }
            }
        }

        for c in &self.children {
            c.verify()?;
        }
        Ok(())
    }

    /// Intern names and freeze the tree
    pub fn intern(
        &self,
        symbols: &mut SymbolTable,
    ) -> Rc<Irep> {
        Rc::new(Irep {
            nlocals: self.nlocals,
            nregs: self.nregs,
            argc: self.argc,
            optc: self.optc,
            opt_entries: self.opt_entries.clone().into_boxed_slice(),
            iseq: self.iseq.clone().into_boxed_slice(),
            pool: self.pool.clone().into_boxed_slice(),
            syms: self.syms.iter().map(|s| symbols.intern(s)).collect(),
            lvars: self.lvars.iter().map(|s| symbols.intern(s)).collect(),
            children: self.children.iter().map(|c| c.intern(symbols)).collect(),
        })
    }

    /// Human-readable listing of the tree
    pub fn disassemble(&self) -> std::string::String {
        let mut out = std::string::String::new();
        self.disassemble_into(&mut out, 0);
        out
    }

    fn disassemble_into(
        &self,
        out: &mut std::string::String,
        index: usize,
    ) {
        let _ = writeln!(
            out,
            "irep #{} nregs={} nlocals={} argc={} optc={}",
            index, self.nregs, self.nlocals, self.argc, self.optc
        );
        if !self.lvars.is_empty() {
            let _ = writeln!(out, "  locals: {}", self.lvars.join(", "));
        }
        let mut pc = 0;
        while pc < self.iseq.len() {
            match decode(&self.iseq, pc) {
                Ok((i, next)) => {
                    let operands = match i.op.format() {
                        OperandFormat::Z => std::string::String::new(),
                        OperandFormat::B => format!("R{}", i.a),
                        OperandFormat::S => format!("{}", i.a),
                        OperandFormat::BB | OperandFormat::BS => {
                            format!("R{} {}", i.a, i.b)
                        }
                        OperandFormat::BBB | OperandFormat::BSB => {
                            format!("R{} {} {}", i.a, i.b, i.c)
                        }
                    };
                    let note = match i.op {
                        Opcode::Send
                        | Opcode::SendB
                        | Opcode::LoadSym
                        | Opcode::GetGV
                        | Opcode::SetGV
                        | Opcode::GetIV
                        | Opcode::SetIV
                        | Opcode::GetConst
                        | Opcode::SetConst
                        | Opcode::Def
                        | Opcode::SDef
                        | Opcode::Class => self
                            .syms
                            .get(i.b as usize)
                            .map(|s| format!("  ; :{}", s))
                            .unwrap_or_default(),
                        Opcode::LoadL | Opcode::String => self
                            .pool
                            .get(i.b as usize)
                            .map(|l| format!("  ; {:?}", l))
                            .unwrap_or_default(),
                        _ => std::string::String::new(),
                    };
                    let _ = writeln!(out, "  {:04} {:<10} {}{}", pc, i.op.name(), operands, note);
                    pc = next;
                }
                Err(e) => {
                    let _ = writeln!(out, "  {:04} <{}>", pc, e);
                    break;
                }
            }
        }
        for (n, child) in self.children.iter().enumerate() {
            child.disassemble_into(out, index * 16 + n + 1);
        }
    }
}

/// Bounds-checked body reader
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(
        &mut self,
        n: usize,
    ) -> Result<&'a [u8], VmError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| VmError::IrepFormat(format!("unexpected end of data at {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, VmError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, VmError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, VmError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, VmError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(
        &mut self,
        len: usize,
    ) -> Result<String, VmError> {
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).map_err(|_| VmError::IrepFormat("invalid UTF-8 in irep".to_string()))
    }

    fn names(&mut self) -> Result<Vec<String>, VmError> {
        let n = self.u16()? as usize;
        let mut names = Vec::with_capacity(n);
        for _ in 0..n {
            let len = self.u16()? as usize;
            names.push(self.string(len)?);
        }
        Ok(names)
    }

    fn irep(
        &mut self,
        depth: usize,
    ) -> Result<RawIrep, VmError> {
        if depth > MAX_NESTING {
            return Err(VmError::IrepFormat("irep nesting too deep".to_string()));
        }
        let nlocals = self.u16()?;
        let nregs = self.u16()?;
        let argc = self.u8()?;
        let optc = self.u8()?;
        let n = self.u8()? as usize;
        let mut opt_entries = Vec::with_capacity(n);
        for _ in 0..n {
            opt_entries.push(self.u16()?);
        }
        let len = self.u32()? as usize;
        let iseq = self.take(len)?.to_vec();

        let n = self.u16()? as usize;
        let mut pool = Vec::with_capacity(n);
        for _ in 0..n {
            pool.push(match self.u8()? {
                0 => Literal::Integer(self.u64()? as i64),
                1 => Literal::Float(f64::from_bits(self.u64()?)),
                2 => {
                    let len = self.u32()? as usize;
                    Literal::String(self.string(len)?.into_boxed_str())
                }
                tag => return Err(VmError::IrepFormat(format!("unknown literal tag {}", tag))),
            });
        }
        let syms = self.names()?;
        let lvars = self.names()?;
        let n = self.u16()? as usize;
        let mut children = Vec::with_capacity(n);
        for _ in 0..n {
            children.push(self.irep(depth + 1)?);
        }

        Ok(RawIrep {
            nlocals,
            nregs,
            argc,
            optc,
            opt_entries,
            iseq,
            pool,
            syms,
            lvars,
            children,
        })
    }
}
