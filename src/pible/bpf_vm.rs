//! # BPF Virtual Machine Module
//!
//! Single-threaded interpreter used for testing compiled programs and
//! as the executable description of instruction semantics.
//!
//! Each execution owns eleven 64-bit registers, a 512-byte stack
//! addressed through `R10`, a heap region for globals, and an optional
//! input region. A bounded step counter is the cancellation primitive
//! for runaway guest programs: exceeding it traps, which is an
//! ordinary outcome observable by the host, not a process failure.

use thiserror::Error;

use crate::pible::bpf::{
    opc, BpfInstruction, HEAP_BASE, HEAP_SIZE, INPUT_BASE, STACK_BASE, STACK_SIZE,
};
use crate::pible::emitter::{read_object, ObjectError};

/// Default ceiling on executed instructions per run.
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// Helper index of `MemoryRead`.
pub const HELPER_MEMORY_READ: i32 = 1;
/// Helper index of `MemoryWrite`.
pub const HELPER_MEMORY_WRITE: i32 = 2;
/// Helper index of `PrintF`.
pub const HELPER_PRINTF: i32 = 6;

/// Execution traps. Non-fatal to the host: the VM instance stays
/// usable for another run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The program counter left the instruction vector.
    #[error("program counter {pc} outside the instruction vector")]
    PcOutOfRange {
        /// Faulting counter value.
        pc: usize,
    },
    /// The configured step ceiling was reached.
    #[error("step limit of {limit} instructions exceeded (pc {pc})")]
    StepLimit {
        /// Configured ceiling.
        limit: u64,
        /// Counter when the limit hit.
        pc: usize,
    },
    /// A load or store targeted no mapped region.
    #[error("memory fault: {len}-byte access at 0x{addr:x} (pc {pc})")]
    MemoryFault {
        /// Faulting guest address.
        addr: u64,
        /// Access width in bytes.
        len: usize,
        /// Instruction that faulted.
        pc: usize,
    },
    /// `CALL` with an unregistered helper index.
    #[error("unknown helper index {index} (pc {pc})")]
    UnknownHelper {
        /// Requested index.
        index: i32,
        /// Call site.
        pc: usize,
    },
    /// Division or modulo with a zero divisor.
    #[error("divide by zero (pc {pc})")]
    DivideByZero {
        /// Faulting instruction.
        pc: usize,
    },
    /// Opcode or register encoding outside the implemented set.
    #[error("invalid instruction 0x{opcode:02x} (pc {pc})")]
    InvalidInstruction {
        /// Undecodable opcode byte.
        opcode: u8,
        /// Where it sits.
        pc: usize,
    },
}

impl VmError {
    /// Program counter the trap refers to.
    pub fn pc(&self) -> usize {
        match self {
            VmError::PcOutOfRange { pc }
            | VmError::StepLimit { pc, .. }
            | VmError::MemoryFault { pc, .. }
            | VmError::UnknownHelper { pc, .. }
            | VmError::DivideByZero { pc }
            | VmError::InvalidInstruction { pc, .. } => *pc,
        }
    }
}

/// Failure of the load-and-run entry point.
#[derive(Error, Debug)]
pub enum VmRunError {
    /// The byte buffer is not a loadable object.
    #[error(transparent)]
    Object(#[from] ObjectError),
    /// The program trapped during execution.
    #[error(transparent)]
    Trap(#[from] VmError),
}

/// Successful execution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmResult {
    /// `R0` at the `EXIT` instruction.
    pub exit_code: u64,
    /// Instructions executed.
    pub steps: u64,
}

/// The BPF interpreter.
///
/// ```rust
/// use pible::{BpfInstruction, BpfVm};
///
/// let program = [
///     BpfInstruction::mov_imm(0, 42),
///     BpfInstruction::exit(),
/// ];
/// let result = BpfVm::new(&program).execute().unwrap();
/// assert_eq!(result.exit_code, 42);
/// ```
pub struct BpfVm {
    registers: [u64; 11],
    program: Vec<BpfInstruction>,
    pc: usize,
    steps: u64,
    step_limit: u64,
    stack: Vec<u8>,
    heap: Vec<u8>,
    input: Vec<u8>,
    trace: Vec<u8>,
}

impl BpfVm {
    /// Creates a VM over an instruction vector.
    pub fn new(program: &[BpfInstruction]) -> Self {
        Self {
            registers: [0; 11],
            program: program.to_vec(),
            pc: 0,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            stack: vec![0; STACK_SIZE],
            heap: vec![0; HEAP_SIZE],
            input: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Loads a VM from object bytes; headerless raw instruction
    /// vectors are accepted as well.
    pub fn from_object(bytes: &[u8]) -> Result<Self, ObjectError> {
        match read_object(bytes) {
            Ok(parsed) => Ok(Self::new(&parsed.instructions)),
            Err(ObjectError::InvalidMagic) | Err(ObjectError::Truncated(_))
                if !bytes.is_empty() && bytes.len() % 8 == 0 =>
            {
                let instructions: Vec<BpfInstruction> = bytes
                    .chunks_exact(8)
                    .map(|chunk| {
                        let record: [u8; 8] =
                            chunk.try_into().expect("chunks_exact yields eight bytes");
                        BpfInstruction::from_bytes(&record)
                    })
                    .collect();
                Ok(Self::new(&instructions))
            }
            Err(err) => Err(err),
        }
    }

    /// Replaces the step ceiling.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Provides the program input region.
    pub fn with_input(mut self, input: &[u8]) -> Self {
        self.input = input.to_vec();
        self
    }

    /// Loads object bytes and executes them against `input`, the
    /// one-call entry point hosts use.
    pub fn run_object(bytes: &[u8], input: &[u8]) -> Result<VmResult, VmRunError> {
        let mut vm = Self::from_object(bytes)?.with_input(input);
        Ok(vm.execute()?)
    }

    /// Reads a register, for tests and host inspection.
    pub fn register(&self, index: usize) -> u64 {
        self.registers.get(index).copied().unwrap_or(0)
    }

    /// Sets a register before execution.
    pub fn set_register(&mut self, index: usize, value: u64) {
        if let Some(slot) = self.registers.get_mut(index) {
            *slot = value;
        }
    }

    /// Bytes `PrintF` wrote during the last execution.
    pub fn trace_output(&self) -> &[u8] {
        &self.trace
    }

    /// Executes from instruction 0 until `EXIT` or a trap.
    pub fn execute(&mut self) -> Result<VmResult, VmError> {
        self.pc = 0;
        self.steps = 0;
        self.trace.clear();
        self.registers = [0; 11];
        self.registers[10] = STACK_BASE + STACK_SIZE as u64;
        // Entry convention: R1 points at the input region, R2 holds
        // its length.
        self.registers[1] = INPUT_BASE;
        self.registers[2] = self.input.len() as u64;

        loop {
            if self.pc >= self.program.len() {
                return Err(VmError::PcOutOfRange { pc: self.pc });
            }
            if self.steps >= self.step_limit {
                return Err(VmError::StepLimit {
                    limit: self.step_limit,
                    pc: self.pc,
                });
            }

            let inst = self.program[self.pc];
            let cur = self.pc;
            self.pc += if inst.is_wide() { 2 } else { 1 };
            self.steps += 1;

            let dst = inst.dst_reg as usize;
            let src = inst.src_reg as usize;
            if dst > 10 || src > 10 {
                return Err(VmError::InvalidInstruction {
                    opcode: inst.opcode,
                    pc: cur,
                });
            }
            let imm = inst.imm as i64 as u64;

            match inst.opcode {
                opc::LDDW => {
                    let hi = self
                        .program
                        .get(cur + 1)
                        .ok_or(VmError::PcOutOfRange { pc: cur + 1 })?;
                    self.registers[dst] =
                        (inst.imm as u32 as u64) | ((hi.imm as u32 as u64) << 32);
                }

                opc::LDXB => self.registers[dst] = self.load(dst_addr(self, src, inst), 1, cur)?,
                opc::LDXH => self.registers[dst] = self.load(dst_addr(self, src, inst), 2, cur)?,
                opc::LDXW => self.registers[dst] = self.load(dst_addr(self, src, inst), 4, cur)?,
                opc::LDXDW => {
                    self.registers[dst] = self.load(dst_addr(self, src, inst), 8, cur)?
                }

                opc::STXB => self.store(dst_addr(self, dst, inst), 1, self.registers[src], cur)?,
                opc::STXH => self.store(dst_addr(self, dst, inst), 2, self.registers[src], cur)?,
                opc::STXW => self.store(dst_addr(self, dst, inst), 4, self.registers[src], cur)?,
                opc::STXDW => {
                    self.store(dst_addr(self, dst, inst), 8, self.registers[src], cur)?
                }
                opc::STW => self.store(dst_addr(self, dst, inst), 4, inst.imm as u32 as u64, cur)?,
                opc::STDW => self.store(dst_addr(self, dst, inst), 8, imm, cur)?,

                opc::ADD64_IMM => {
                    self.registers[dst] = self.registers[dst].wrapping_add(imm);
                }
                opc::ADD64_REG => {
                    self.registers[dst] = self.registers[dst].wrapping_add(self.registers[src]);
                }
                opc::SUB64_IMM => {
                    self.registers[dst] = self.registers[dst].wrapping_sub(imm);
                }
                opc::SUB64_REG => {
                    self.registers[dst] = self.registers[dst].wrapping_sub(self.registers[src]);
                }
                opc::MUL64_IMM => {
                    self.registers[dst] = self.registers[dst].wrapping_mul(imm);
                }
                opc::MUL64_REG => {
                    self.registers[dst] = self.registers[dst].wrapping_mul(self.registers[src]);
                }
                opc::DIV64_IMM => {
                    if imm == 0 {
                        return Err(VmError::DivideByZero { pc: cur });
                    }
                    self.registers[dst] /= imm;
                }
                opc::DIV64_REG => {
                    let divisor = self.registers[src];
                    if divisor == 0 {
                        return Err(VmError::DivideByZero { pc: cur });
                    }
                    self.registers[dst] /= divisor;
                }
                opc::MOD64_IMM => {
                    if imm == 0 {
                        return Err(VmError::DivideByZero { pc: cur });
                    }
                    self.registers[dst] %= imm;
                }
                opc::MOD64_REG => {
                    let divisor = self.registers[src];
                    if divisor == 0 {
                        return Err(VmError::DivideByZero { pc: cur });
                    }
                    self.registers[dst] %= divisor;
                }
                opc::OR64_IMM => self.registers[dst] |= imm,
                opc::OR64_REG => self.registers[dst] |= self.registers[src],
                opc::AND64_IMM => self.registers[dst] &= imm,
                opc::AND64_REG => self.registers[dst] &= self.registers[src],
                opc::XOR64_IMM => self.registers[dst] ^= imm,
                opc::XOR64_REG => self.registers[dst] ^= self.registers[src],
                opc::LSH64_IMM => self.registers[dst] = self.registers[dst] << (imm & 63),
                opc::LSH64_REG => {
                    self.registers[dst] = self.registers[dst] << (self.registers[src] & 63)
                }
                opc::RSH64_IMM => self.registers[dst] = self.registers[dst] >> (imm & 63),
                opc::RSH64_REG => {
                    self.registers[dst] = self.registers[dst] >> (self.registers[src] & 63)
                }
                opc::ARSH64_IMM => {
                    self.registers[dst] = ((self.registers[dst] as i64) >> (imm & 63)) as u64
                }
                opc::ARSH64_REG => {
                    self.registers[dst] =
                        ((self.registers[dst] as i64) >> (self.registers[src] & 63)) as u64
                }
                opc::NEG64 => {
                    self.registers[dst] = (self.registers[dst] as i64).wrapping_neg() as u64
                }
                opc::MOV64_IMM => self.registers[dst] = imm,
                opc::MOV64_REG => self.registers[dst] = self.registers[src],

                opc::JA => self.branch(cur, inst.offset)?,
                opc::JEQ_IMM => {
                    if self.registers[dst] == imm {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JEQ_REG => {
                    if self.registers[dst] == self.registers[src] {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JNE_IMM => {
                    if self.registers[dst] != imm {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JNE_REG => {
                    if self.registers[dst] != self.registers[src] {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JGT_IMM => {
                    if self.registers[dst] > imm {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JGT_REG => {
                    if self.registers[dst] > self.registers[src] {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JGE_IMM => {
                    if self.registers[dst] >= imm {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JGE_REG => {
                    if self.registers[dst] >= self.registers[src] {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JLT_IMM => {
                    if self.registers[dst] < imm {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JLT_REG => {
                    if self.registers[dst] < self.registers[src] {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JLE_IMM => {
                    if self.registers[dst] <= imm {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JLE_REG => {
                    if self.registers[dst] <= self.registers[src] {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JSGT_REG => {
                    if (self.registers[dst] as i64) > (self.registers[src] as i64) {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JSGE_REG => {
                    if (self.registers[dst] as i64) >= (self.registers[src] as i64) {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JSLT_REG => {
                    if (self.registers[dst] as i64) < (self.registers[src] as i64) {
                        self.branch(cur, inst.offset)?;
                    }
                }
                opc::JSLE_REG => {
                    if (self.registers[dst] as i64) <= (self.registers[src] as i64) {
                        self.branch(cur, inst.offset)?;
                    }
                }

                opc::CALL => self.dispatch_helper(inst.imm, cur)?,
                opc::EXIT => {
                    return Ok(VmResult {
                        exit_code: self.registers[0],
                        steps: self.steps,
                    });
                }

                other => {
                    return Err(VmError::InvalidInstruction {
                        opcode: other,
                        pc: cur,
                    })
                }
            }
        }
    }

    fn branch(&mut self, cur: usize, offset: i16) -> Result<(), VmError> {
        let target = cur as i64 + 1 + offset as i64;
        if target < 0 {
            return Err(VmError::PcOutOfRange { pc: cur });
        }
        self.pc = target as usize;
        Ok(())
    }

    // === Memory map ===

    fn region(&self, addr: u64, len: usize, pc: usize) -> Result<&[u8], VmError> {
        let fault = VmError::MemoryFault { addr, len, pc };
        let (base, buf): (u64, &[u8]) = if addr >= STACK_BASE
            && addr < STACK_BASE + STACK_SIZE as u64
        {
            (STACK_BASE, &self.stack)
        } else if addr >= HEAP_BASE && addr < HEAP_BASE + HEAP_SIZE as u64 {
            (HEAP_BASE, &self.heap)
        } else if addr >= INPUT_BASE && addr < INPUT_BASE + self.input.len() as u64 {
            (INPUT_BASE, &self.input)
        } else {
            return Err(fault);
        };
        let start = (addr - base) as usize;
        if start + len > buf.len() {
            return Err(fault);
        }
        Ok(&buf[start..start + len])
    }

    fn region_mut(&mut self, addr: u64, len: usize, pc: usize) -> Result<&mut [u8], VmError> {
        let fault = VmError::MemoryFault { addr, len, pc };
        let (base, buf): (u64, &mut [u8]) = if addr >= STACK_BASE
            && addr < STACK_BASE + STACK_SIZE as u64
        {
            (STACK_BASE, &mut self.stack)
        } else if addr >= HEAP_BASE && addr < HEAP_BASE + HEAP_SIZE as u64 {
            (HEAP_BASE, &mut self.heap)
        } else if addr >= INPUT_BASE && addr < INPUT_BASE + self.input.len() as u64 {
            (INPUT_BASE, &mut self.input)
        } else {
            return Err(fault);
        };
        let start = (addr - base) as usize;
        if start + len > buf.len() {
            return Err(fault);
        }
        Ok(&mut buf[start..start + len])
    }

    fn load(&self, addr: u64, len: usize, pc: usize) -> Result<u64, VmError> {
        let bytes = self.region(addr, len, pc)?;
        let mut word = [0u8; 8];
        word[..len].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(word))
    }

    fn store(&mut self, addr: u64, len: usize, value: u64, pc: usize) -> Result<(), VmError> {
        let word = value.to_le_bytes();
        let bytes = self.region_mut(addr, len, pc)?;
        bytes.copy_from_slice(&word[..len]);
        Ok(())
    }

    /// NUL-terminated string read, bounded by its region.
    fn read_cstr(&self, addr: u64, pc: usize) -> Result<Vec<u8>, VmError> {
        let mut out = Vec::new();
        let mut cursor = addr;
        loop {
            let byte = self.region(cursor, 1, pc)?[0];
            if byte == 0 {
                return Ok(out);
            }
            out.push(byte);
            cursor += 1;
        }
    }

    // === Helpers ===

    fn dispatch_helper(&mut self, index: i32, pc: usize) -> Result<(), VmError> {
        match index {
            HELPER_MEMORY_READ | HELPER_MEMORY_WRITE => {
                let dst = self.registers[1];
                let src = self.registers[2];
                let len = self.registers[3] as usize;
                let data = self.region(src, len, pc)?.to_vec();
                self.region_mut(dst, len, pc)?.copy_from_slice(&data);
                self.registers[0] = len as u64;
                Ok(())
            }
            HELPER_PRINTF => {
                let written = self.helper_printf(pc)?;
                self.registers[0] = written as u64;
                Ok(())
            }
            _ => Err(VmError::UnknownHelper { index, pc }),
        }
    }

    /// `PrintF(fmt, a, b, c)`: `%d %u %x %s %%` against `R2..R4`,
    /// appended to the trace sink.
    fn helper_printf(&mut self, pc: usize) -> Result<usize, VmError> {
        let fmt = self.read_cstr(self.registers[1], pc)?;
        let args = [self.registers[2], self.registers[3], self.registers[4]];
        let mut next_arg = 0usize;
        let mut out = Vec::new();

        let mut bytes = fmt.iter().copied();
        while let Some(b) = bytes.next() {
            if b != b'%' {
                out.push(b);
                continue;
            }
            match bytes.next() {
                Some(b'%') => out.push(b'%'),
                Some(b'd') => {
                    let v = args.get(next_arg).copied().unwrap_or(0);
                    next_arg += 1;
                    out.extend_from_slice((v as i64).to_string().as_bytes());
                }
                Some(b'u') => {
                    let v = args.get(next_arg).copied().unwrap_or(0);
                    next_arg += 1;
                    out.extend_from_slice(v.to_string().as_bytes());
                }
                Some(b'x') => {
                    let v = args.get(next_arg).copied().unwrap_or(0);
                    next_arg += 1;
                    out.extend_from_slice(format!("{:x}", v).as_bytes());
                }
                Some(b's') => {
                    let addr = args.get(next_arg).copied().unwrap_or(0);
                    next_arg += 1;
                    let s = self.read_cstr(addr, pc)?;
                    out.extend_from_slice(&s);
                }
                Some(other) => {
                    out.push(b'%');
                    out.push(other);
                }
                None => out.push(b'%'),
            }
        }

        self.trace.extend_from_slice(&out);
        Ok(out.len())
    }
}

/// Effective address of a memory operand.
fn dst_addr(vm: &BpfVm, reg: usize, inst: BpfInstruction) -> u64 {
    vm.registers[reg].wrapping_add(inst.offset as i64 as u64)
}
