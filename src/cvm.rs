/*!

  Structures and functions for the Cursed Virtual Machine: the decoder, the dispatch
  loop, the class handlers, and the machine state they act on.

  The machine owns four memory stores (word memory, object memory, the call stack
  backing, and the immediate reuse stack backing), the 32-slot register file, the
  environment of host bindings, and a private call-stack cursor. Execution is
  single-threaded and cooperative: `run` loops `step` until the stopped flag is set by
  an exit instruction, a breakpoint, or a fault; `step` decodes and dispatches exactly
  one instruction. A fault aborts the step and stops the machine, leaving registers
  and memories exactly as they were for post-mortem inspection.

  Diagnostic output (the `sys` class) is rendered to a pluggable byte sink, and cycle
  accounting in `run` consults a pluggable monotonic clock, so embedders can capture
  both without the machine knowing who is listening.

*/

use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::rc::Rc;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use prettytable::{format as TableFormat, row, table, Table};
use tracing::{debug, info, trace};

use crate::bytecode::{s_is_meaningful, Fields, OpClass, Word};
use crate::environment::{
  read_property,
  write_property,
  DeclaredFn,
  Environment,
  HostArg,
  HostFunction,
  HostValue,
  NativeFn
};
use crate::error::{Fault, VmResult};
use crate::memory::{
  ObjectStore,
  WordStore,
  CALL_STACK_CAPACITY,
  IRS_CAPACITY,
  OBJECT_MEMORY_CAPACITY,
  WORD_MEMORY_CAPACITY
};
use crate::registers::{RegisterFile, SlotHook, SlotName, REGISTER_COUNT, SLOT_HOOKS};
use crate::value::{ExtRef, Region, Value, ValueKind};

/// How many stack cells the state dump shows.
const STATE_DUMP_WINDOW: u32 = 8;

/// A monotonic time source consulted by `run` for cycle accounting.
pub type ClockSource = Box<dyn Fn() -> Duration>;

lazy_static! {
  static ref CLOCK_EPOCH: Instant = Instant::now();

  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

pub struct CVM {

  // Flags
  stopped  : bool,         // Set by exit, breakpoint, or fault.
  branched : bool,         // Set by a handler that updated PC itself.
  exit     : Option<Value>,

  // Memory stores
  words   : WordStore,     // Word memory; programs load at offset 0.
  objects : ObjectStore,   // Object memory; the data stack lives here.
  calls   : WordStore,     // Call stack backing.
  irs     : WordStore,     // Immediate reuse stack backing.

  registers   : RegisterFile,
  environment : Environment,

  csp    : u32,            // Call stack cursor; deliberately not a register.
  cycles : u64,

  sink  : Box<dyn Write>,
  clock : ClockSource,

}

impl CVM {

  // region Construction and configuration

  pub fn new() -> CVM {
    CVM {
      stopped  : false,
      branched : false,
      exit     : None,

      words   : WordStore::new(Region::Word, WORD_MEMORY_CAPACITY),
      objects : ObjectStore::new(Region::Object, OBJECT_MEMORY_CAPACITY),
      calls   : WordStore::new(Region::Call, CALL_STACK_CAPACITY),
      irs     : WordStore::new(Region::Irs, IRS_CAPACITY),

      registers   : RegisterFile::new(),
      environment : Environment::new(),

      csp    : 0,
      cycles : 0,

      sink  : Box::new(std::io::stdout()),
      clock : Box::new(|| CLOCK_EPOCH.elapsed()),
    }
  }

  /// Redirects diagnostic output (the `sys` class) to the given byte sink.
  pub fn set_sink(&mut self, sink: Box<dyn Write>) {
    self.sink = sink;
  }

  /// Replaces the monotonic clock consulted for cycle accounting.
  pub fn set_clock(&mut self, clock: ClockSource) {
    self.clock = clock;
  }

  pub fn cycles(&self) -> u64 {
    self.cycles
  }

  pub fn stopped(&self) -> bool {
    self.stopped
  }

  pub fn exit_value(&self) -> Option<Value> {
    self.exit.clone()
  }

  // endregion

  // region Embedding surface

  /**
    Resets the machine and copies the program into word memory starting at offset 0.
    The program format is a flat sequence of words: no header, no checksums, no
    relocations (those were resolved at link time).
  */
  pub fn load_program(&mut self, program: &[Word]) -> VmResult<()> {
    self.reset();
    self.words.load(program)?;
    debug!(words = program.len(), "program loaded");
    Ok(())
  }

  /// Zeroes all four regions and re-initializes the fixed registers. Slots P0 and P1
  /// survive; everything else is cleared.
  pub fn reset(&mut self) {
    self.words.clear();
    self.objects.clear();
    self.calls.clear();
    self.irs.clear();
    self.registers.reset();
    self.csp      = 0;
    self.cycles   = 0;
    self.stopped  = false;
    self.branched = false;
    self.exit     = None;
  }

  pub fn set_environment(&mut self, key: &str, value: Rc<HostValue>) {
    self.environment.set(key, value);
  }

  pub fn get_environment(&self, key: &str) -> Option<Rc<HostValue>> {
    self.environment.get(key)
  }

  /// Registers a fixed-arity host function, distinguishable at call time from an
  /// ordinary callable.
  pub fn declare_host_function(&mut self, name: &str, arity: u32, f: DeclaredFn) {
    self.environment.declare_function(name, arity, f);
  }

  /// Registers an ordinary host callable: it reads its own argument count off the
  /// data stack when called.
  pub fn register_native(&mut self, name: &str, f: NativeFn) {
    self.environment.register_native(name, f);
  }

  /// Pushes onto the data stack; SP moves up. Exposed for bootstrap.
  pub fn push(&mut self, value: Value) -> VmResult<()> {
    let sp = self.sp_offset()?;
    self.objects.write(sp, value)?;
    self.registers.raw_write(SlotName::SP as u8, Value::Ptr(Region::Object, sp + 1));
    Ok(())
  }

  /// Pops from the data stack; SP moves down. Popping past the bottom is a bounds
  /// fault, and SP is unchanged when the pop faults.
  pub fn pop(&mut self) -> VmResult<Value> {
    let sp    = self.sp_offset()?.wrapping_sub(1);
    let value = self.objects.read(sp)?;
    self.registers.raw_write(SlotName::SP as u8, Value::Ptr(Region::Object, sp));
    Ok(value)
  }

  // endregion

  // region Register access

  /**
    Reads a register through its slot hook. ZERO reads Int 0 regardless of writes;
    IPOP/IPTR pop the IRS; POP pops the data stack; every other slot reads its stored
    value (PUSH reads the last value written through it).
  */
  pub fn get_register(&mut self, slot: u8) -> VmResult<Value> {
    match SLOT_HOOKS[slot as usize & 0x1F] {

      SlotHook::Zero => Ok(Value::Int(0)),

      SlotHook::IrsPopInt => {
        let word = self.irs_pop()?;
        Ok(Value::Int(word as i32))
      }

      SlotHook::IrsPopPtr => {
        let word = self.irs_pop()?;
        Ok(Value::Ptr(Region::Word, word))
      }

      SlotHook::StackPop => self.pop(),

      _ => Ok(self.registers.raw_read(slot)),

    }
  }

  /**
    Writes a register through its slot hook. Writes to ZERO are silently dropped;
    PC/SP/IRSP enforce their pointer shapes; PUSH pushes onto the data stack and also
    stores; the read-only slots fault.
  */
  pub fn set_register(&mut self, slot: u8, value: Value) -> VmResult<()> {
    match SLOT_HOOKS[slot as usize & 0x1F] {

      SlotHook::Zero => Ok(()),

      SlotHook::ProgramCounter => {
        match value {
          Value::Ptr(Region::Word, _) => {
            self.registers.raw_write(slot, value);
            Ok(())
          }
          other => Err(Fault::Type(
            format!("PC holds a Ptr into word memory, not {}", other)
          ))
        }
      }

      SlotHook::IrsPointer => {
        match value {
          Value::Ptr(Region::Irs, _) => {
            self.registers.raw_write(slot, value);
            Ok(())
          }
          other => Err(Fault::Type(
            format!("IRSP holds a Ptr into the IRS backing, not {}", other)
          ))
        }
      }

      SlotHook::StackPointer => {
        match value {
          Value::Ptr(Region::Object, _) => {
            self.registers.raw_write(slot, value);
            Ok(())
          }
          other => Err(Fault::Type(
            format!("SP holds a Ptr into object memory, not {}", other)
          ))
        }
      }

      SlotHook::StackPush => {
        self.push(value.clone())?;
        self.registers.raw_write(slot, value);
        Ok(())
      }

      | SlotHook::IrsPopInt
      | SlotHook::IrsPopPtr
      | SlotHook::StackPop => {
        Err(Fault::Type(format!("register {} is read-only", slot)))
      }

      SlotHook::Plain => {
        self.registers.raw_write(slot, value);
        Ok(())
      }

    }
  }

  fn pc_offset(&self) -> VmResult<u32> {
    match self.registers.raw_read(SlotName::PC as u8) {
      Value::Ptr(Region::Word, offset) => Ok(offset),
      other => Err(Fault::Type(format!("PC holds {}, not a Ptr into word memory", other)))
    }
  }

  fn set_pc_offset(&mut self, offset: u32) {
    self.registers.raw_write(SlotName::PC as u8, Value::Ptr(Region::Word, offset));
  }

  fn sp_offset(&self) -> VmResult<u32> {
    match self.registers.raw_read(SlotName::SP as u8) {
      Value::Ptr(Region::Object, offset) => Ok(offset),
      other => Err(Fault::Type(format!("SP holds {}, not a Ptr into object memory", other)))
    }
  }

  fn irsp_offset(&self) -> VmResult<u32> {
    match self.registers.raw_read(SlotName::IRSP as u8) {
      Value::Ptr(Region::Irs, offset) => Ok(offset),
      other => Err(Fault::Type(format!("IRSP holds {}, not a Ptr into the IRS", other)))
    }
  }

  // endregion

  // region Stack discipline

  fn irs_push(&mut self, word: Word) -> VmResult<()> {
    let top = self.irsp_offset()?;
    self.irs.write(top, word)?;
    self.registers.raw_write(SlotName::IRSP as u8, Value::Ptr(Region::Irs, top + 1));
    Ok(())
  }

  fn irs_pop(&mut self) -> VmResult<Word> {
    let top  = self.irsp_offset()?.wrapping_sub(1);
    let word = self.irs.read(top)?;
    self.registers.raw_write(SlotName::IRSP as u8, Value::Ptr(Region::Irs, top));
    Ok(word)
  }

  fn call_push(&mut self, word: Word) -> VmResult<()> {
    self.calls.write(self.csp, word)?;
    self.csp += 1;
    Ok(())
  }

  fn call_pop(&mut self) -> VmResult<Word> {
    let top  = self.csp.wrapping_sub(1);
    let word = self.calls.read(top)?;
    self.csp = top;
    Ok(word)
  }

  // endregion

  // region Execution

  /**
    Decodes and dispatches exactly one instruction. Returns the exit value once the
    machine has stopped on an exit instruction, `None` otherwise (including at a
    breakpoint). A fault stops the machine and is returned as the error.
  */
  pub fn step(&mut self) -> VmResult<Option<Value>> {
    match self.step_inner() {
      Ok(value) => Ok(value),
      Err(fault) => {
        self.stopped = true;
        debug!(%fault, "fault; machine stopped");
        Err(fault)
      }
    }
  }

  fn step_inner(&mut self) -> VmResult<Option<Value>> {
    if self.stopped {
      return Ok(self.exit.clone());
    }

    let pc     = self.pc_offset()?;
    let word   = self.words.read(pc)?;
    let fields = Fields::split(word);
    let class  = fields.op_class()?;
    trace!(pc, word = %format_args!("{:08X}", word), %class, "dispatch");

    self.branched = false;
    self.dispatch(class, &fields)?;

    // The S epilogue: handlers that declare the flag meaningful get the immediate
    // pushed onto the IRS after they return.
    if fields.s && s_is_meaningful(class, &fields) {
      self.irs_push(fields.imm_signed() as Word)?;
    }

    if !self.branched {
      self.set_pc_offset(pc.wrapping_add(1));
    }
    self.cycles += 1;

    match self.stopped {
      true  => Ok(self.exit.clone()),
      false => Ok(None)
    }
  }

  /// Loops `step` until the stopped flag is set. Returns the exit value, or Null when
  /// stopped at a breakpoint. Resumes from the current PC if called again.
  pub fn run(&mut self) -> VmResult<Value> {
    let started = (self.clock)();
    self.stopped = false;
    while !self.stopped {
      self.step()?;
    }
    let elapsed = (self.clock)() - started;
    info!(cycles = self.cycles, ?elapsed, "machine stopped");
    Ok(self.exit.clone().unwrap_or(Value::Null))
  }

  fn dispatch(&mut self, class: OpClass, fields: &Fields) -> VmResult<()> {
    match class {
      OpClass::Nop    => Ok(()),
      OpClass::Exit   => self.op_exit(fields),
      OpClass::Push   => self.op_push(fields),
      OpClass::Pop    => self.op_pop(fields),
      OpClass::Ret    => self.op_ret(),
      OpClass::Env    => self.op_env(fields),
      OpClass::Branch => self.op_branch(fields),
      OpClass::Cmp    => self.op_cmp(fields),
      OpClass::Cvt    => self.op_cvt(fields),
      OpClass::Num    => self.op_num(fields),
      OpClass::Mem    => self.op_mem(fields),
      OpClass::Sys    => self.op_sys(fields),
    }
  }

  // endregion

  // region Class handlers

  /// exit: stop execution. c0 bit 0 selects the register form (exit value from r0)
  /// over the immediate form (sign-extended immediate as Int).
  fn op_exit(&mut self, fields: &Fields) -> VmResult<()> {
    let value = match fields.c0 & 1 {
      1 => self.get_register(fields.r0)?,
      _ => Value::Int(fields.imm_signed()),
    };
    self.exit    = Some(value);
    self.stopped = true;
    Ok(())
  }

  /// push: c0 bit 0 selects pushing the Value of r0 over pushing a fresh Int built
  /// from the immediate.
  fn op_push(&mut self, fields: &Fields) -> VmResult<()> {
    let value = match fields.c0 & 1 {
      1 => self.get_register(fields.r0)?,
      _ => Value::Int(fields.imm_signed()),
    };
    self.push(value)
  }

  /// pop: the low two bits of c0 select the source. `00` pops a Value from the data
  /// stack; `01` pops an IRS word as Int; `11` pops an IRS word as Ptr into word
  /// memory. `10` is reserved.
  fn op_pop(&mut self, fields: &Fields) -> VmResult<()> {
    let value = match fields.c0 & 0b11 {
      0b00 => self.pop()?,
      0b01 => Value::Int(self.irs_pop()? as i32),
      0b11 => Value::Ptr(Region::Word, self.irs_pop()?),
      _    => {
        return Err(Fault::Decode("reserved pop variant".to_string()));
      }
    };
    self.set_register(fields.r0, value)
  }

  /// ret: pop the call stack into PC.
  fn op_ret(&mut self) -> VmResult<()> {
    let target = self.call_pop()?;
    self.set_pc_offset(target);
    self.branched = true;
    Ok(())
  }

  /// env: c0 selects get/getp/load/loadp/set/setp. The key is the Value of r1; for
  /// the property forms the base is the Ext held in r2.
  fn op_env(&mut self, fields: &Fields) -> VmResult<()> {
    if fields.c0 > 0b101 {
      return Err(Fault::Decode("reserved env subfunction".to_string()));
    }
    let key_value = self.get_register(fields.r1)?;
    let key       = self.stringify_key(&key_value)?;

    match fields.c0 {

      // get: coerce the binding to a 32-bit float. Missing keys store Null.
      0b000 => {
        let value = match self.environment.get(&key) {
          None       => Value::Null,
          Some(host) => self.coerce_fetched(&key, &host)?,
        };
        self.set_register(fields.r0, value)
      }

      // getp
      0b001 => {
        let base  = self.ext_base(fields.r2)?;
        let value = match read_property(&base, &key) {
          None => {
            return Err(Fault::Type(format!("Ext base `{}` has no properties", base.describe())));
          }
          Some(None)       => Value::Null,
          Some(Some(host)) => self.coerce_fetched(&key, &host)?,
        };
        self.set_register(fields.r0, value)
      }

      // load: wrap the raw binding as Ext. Missing keys store Null.
      0b010 => {
        let value = match self.environment.get(&key) {
          None       => Value::Null,
          Some(host) => Value::Ext(ExtRef(host)),
        };
        self.set_register(fields.r0, value)
      }

      // loadp
      0b011 => {
        let base  = self.ext_base(fields.r2)?;
        let value = match read_property(&base, &key) {
          None => {
            return Err(Fault::Type(format!("Ext base `{}` has no properties", base.describe())));
          }
          Some(None)       => Value::Null,
          Some(Some(host)) => Value::Ext(ExtRef(host)),
        };
        self.set_register(fields.r0, value)
      }

      // set: write the Value of r0, stringified if Ptr.
      0b100 => {
        let value = self.get_register(fields.r0)?;
        let host  = self.host_value_from(&value)?;
        self.environment.set(&key, host);
        Ok(())
      }

      // setp
      0b101 => {
        let value = self.get_register(fields.r0)?;
        let host  = self.host_value_from(&value)?;
        let base  = self.ext_base(fields.r2)?;
        match write_property(&base, &key, host) {
          true  => Ok(()),
          false => Err(Fault::Type(format!("Ext base `{}` has no properties", base.describe())))
        }
      }

      _ => Err(Fault::Decode("reserved env subfunction".to_string()))

    }
  }

  /**
    b: branch or call, absolute or relative, unconditional or conditional on COMP.
    c0 bit 0 is relative, bit 1 is call, bit 2 is register mode; c1 bit 0 is
    conditional. A relative call is illegal. A register-mode call whose target is an
    Ext handle takes the external-call path.
  */
  fn op_branch(&mut self, fields: &Fields) -> VmResult<()> {
    let relative = fields.c0 & 0b001 != 0;
    let call     = fields.c0 & 0b010 != 0;
    let register = fields.c0 & 0b100 != 0;

    if relative && call {
      return Err(Fault::Decode("relative call is illegal".to_string()));
    }

    // A skipped conditional branch never reads its target register, so a POP-slot
    // target has no side effect on the not-taken path.
    if fields.c1 & 1 != 0 {
      match self.registers.raw_read(SlotName::COMP as u8) {
        Value::Int(flag) => {
          if flag == 0 {
            return Ok(());
          }
        }
        other => {
          return Err(Fault::Type(
            format!("conditional branch requires COMP to hold an Int, found {}", other)
          ));
        }
      }
    }

    let pc = self.pc_offset()?;

    let target: u32 = match (register, relative) {

      (false, true)  => pc.wrapping_add(fields.imm_signed() as u32),

      (false, false) => fields.imm_signed() as u32,

      (true, rel) => {
        match self.get_register(fields.r0)? {

          Value::Int(i) if rel => pc.wrapping_add(i as u32),

          Value::Int(i)        => i as u32,

          Value::Ptr(Region::Word, offset) if !rel => offset,

          Value::Ext(ext) if call => {
            return self.external_call(ext);
          }

          other => {
            return Err(Fault::Type(match rel {
              true  => format!("relative branch target must be an Int, found {}", other),
              false => format!("branch target must be an Int or a Ptr into word memory, found {}", other),
            }));
          }

        }
      }

    };

    if call {
      self.call_push(pc.wrapping_add(1))?;
    }
    self.set_pc_offset(target);
    self.branched = true;
    Ok(())
  }

  /**
    The external-call path. A declared host function pops exactly its arity in Values,
    top first. An ordinary callable first pops an Int argument count, then that many
    Values marshalled for the host. Either way the result is pushed as Ext, or Null if
    the host returned nothing. Control flow continues at the next instruction.
  */
  fn external_call(&mut self, ext: ExtRef) -> VmResult<()> {
    let result = match &*ext.0 {

      HostValue::Function(HostFunction::Declared{ arity, f }) => {
        let mut args = Vec::with_capacity(*arity as usize);
        for _ in 0..*arity {
          args.push(self.pop()?);
        }
        f(&args)
      }

      HostValue::Function(HostFunction::Native(f)) => {
        let count = match self.pop()? {
          Value::Int(n) if n >= 0 => n as u32,
          Value::Int(n)           => {
            return Err(Fault::Domain(format!("negative argument count {}", n)));
          }
          other => {
            return Err(Fault::Type(format!("argument count must be an Int, found {}", other)));
          }
        };
        let mut args = Vec::with_capacity(count as usize);
        for _ in 0..count {
          let value = self.pop()?;
          args.push(self.marshal(&value)?);
        }
        f(&args)
      }

      other => {
        return Err(Fault::Type(format!("call target Ext `{}` is not callable", other.describe())));
      }

    };

    let value = match result {
      Some(host) => Value::Ext(ExtRef(host)),
      None       => Value::Null,
    };
    self.push(value)
  }

  /**
    cmp: c1 bit 0 selects immediate mode (destination COMP) or register-register mode
    (destination r1). Three-way comparison writes an Int in {-1, 0, 1}; every other
    comparison writes 0 or 1. Pointers compare only with pointers into the same
    region; mixing regions, or a pointer against an immediate, is fatal.
  */
  fn op_cmp(&mut self, fields: &Fields) -> VmResult<()> {
    let register_mode = fields.c1 & 1 != 0;

    if !register_mode {
      let x = self.get_register(fields.r0)?;
      let result = match fields.c0 {
        // Logical not. The immediate is unused, but the encoding still honors S.
        0b100 => Value::Int(Self::is_zeroish(&x) as i32),
        code  => Self::compare(&x, &Value::Int(fields.imm_signed()), code)?,
      };
      return self.set_register(SlotName::COMP as u8, result);
    }

    let x = self.get_register(fields.r0)?;
    let result = match fields.c0 {

      0b011 => Value::Int(x.is_null() as i32),

      0b111 => Value::Int(!x.is_null() as i32),

      // Object identity: same tag, same bits. Both operands must be numeric or
      // pointer.
      0b100 => {
        let y = self.get_register(fields.r2)?;
        for operand in [&x, &y] {
          match operand.kind() {
            ValueKind::Int | ValueKind::Float | ValueKind::Ptr => {}
            kind => {
              return Err(Fault::Type(format!("identity comparison of a {} operand", kind)));
            }
          }
        }
        Value::Int((x == y) as i32)
      }

      code => {
        let y = self.get_register(fields.r2)?;
        Self::compare(&x, &y, code)?
      }

    };
    self.set_register(fields.r1, result)
  }

  /// The ordered/equality comparison table shared by both cmp modes.
  fn compare(x: &Value, y: &Value, code: u8) -> VmResult<Value> {
    let ordering: std::cmp::Ordering = match (x, y) {

      (Value::Ptr(rx, ox), Value::Ptr(ry, oy)) => {
        if rx != ry {
          return Err(Fault::Type(format!(
            "cross-region pointer comparison: {} against {}", x, y
          )));
        }
        ox.cmp(oy)
      }

      (Value::Ptr(_, _), _) | (_, Value::Ptr(_, _)) => {
        return Err(Fault::Type(format!("pointer compared against non-pointer: {} vs {}", x, y)));
      }

      _ => {
        let a = Self::as_number(x)?;
        let b = Self::as_number(y)?;
        a.partial_cmp(&b)
          .ok_or_else(|| Fault::Domain(format!("unordered comparison: {} vs {}", x, y)))?
      }

    };

    use std::cmp::Ordering::*;
    let result = match code {
      0b000 => (ordering == Equal) as i32,                      // eq
      0b001 => (ordering != Equal) as i32,                      // ne
      0b010 => (ordering == Less) as i32,                       // lt
      0b011 => (ordering != Greater) as i32,                    // le
      0b101 => (ordering == Greater) as i32,                    // gt
      0b111 => (ordering != Less) as i32,                       // ge
      0b110 => match ordering { Less => -1, Equal => 0, Greater => 1 },
      _     => {
        return Err(Fault::Decode("reserved comparison subfunction".to_string()));
      }
    };
    Ok(Value::Int(result))
  }

  fn as_number(value: &Value) -> VmResult<f64> {
    match value {
      Value::Int(i)   => Ok(*i as f64),
      Value::Float(f) => Ok(*f as f64),
      other           => Err(Fault::Type(format!("{} is not numeric", other)))
    }
  }

  fn is_zeroish(value: &Value) -> bool {
    match value {
      Value::Int(0)   => true,
      Value::Float(f) => *f == 0.0,
      Value::Null     => true,
      _               => false,
    }
  }

  /**
    cvt: c1 bit 0 selects immediate or register mode. Immediate mode constructs the
    destination type from the immediate (Null ignores it, and is the one immediate
    variant that honors S). Register mode converts the Value of r2. In register mode,
    bit 27 instead selects the nested `repr` form: r2's raw view is reinterpreted as
    the source type named by the r1 field, then reinterpreted into the destination
    type, a pure bitwise round trip.
  */
  fn op_cvt(&mut self, fields: &Fields) -> VmResult<()> {
    let register_mode = fields.c1 & 1 != 0;

    if !register_mode {
      let kind = Self::cvt_kind(fields.c0)?;
      let value = match kind {
        ValueKind::Null  => Value::Null,
        ValueKind::Int   => Value::Int(fields.imm_signed()),
        ValueKind::Float => Value::Float(fields.imm_signed() as f32),
        ValueKind::Ptr   => Value::Ptr(Region::Word, fields.imm_signed() as u32),
        ValueKind::Ext   => {
          return Err(Fault::Decode("Ext is not a constructible destination".to_string()));
        }
      };
      return self.set_register(fields.r0, value);
    }

    if fields.s {
      // repr
      let source_kind = ValueKind::try_from(fields.r1)
        .map_err(|_| Fault::Decode(format!("reserved type code {}", fields.r1)))?;
      let dest_kind = Self::cvt_kind(fields.c0)?;
      let raw          = self.get_register(fields.r2)?.raw()?;
      let intermediate = Value::reinterpret(source_kind, raw)?;
      let result       = Value::reinterpret(dest_kind, intermediate.raw()?)?;
      return self.set_register(fields.r0, result);
    }

    let kind   = Self::cvt_kind(fields.c0)?;
    let source = self.get_register(fields.r2)?;
    let value  = Self::convert(&source, kind)?;
    self.set_register(fields.r0, value)
  }

  fn cvt_kind(code: u8) -> VmResult<ValueKind> {
    ValueKind::try_from(code)
      .map_err(|_| Fault::Decode(format!("reserved conversion type code {}", code)))
  }

  /// The conversion table. Float to Int truncates toward zero; Int to Float rounds
  /// the way the host FPU rounds. Ptr and Float never convert into each other, and
  /// nothing converts into Ext.
  fn convert(source: &Value, kind: ValueKind) -> VmResult<Value> {
    match (kind, source) {

      (ValueKind::Null, _) => Ok(Value::Null),

      (ValueKind::Int, Value::Int(i))      => Ok(Value::Int(*i)),
      (ValueKind::Int, Value::Float(f))    => Ok(Value::Int(*f as i32)),
      (ValueKind::Int, Value::Ptr(_, o))   => Ok(Value::Int(*o as i32)),

      (ValueKind::Float, Value::Int(i))    => Ok(Value::Float(*i as f32)),
      (ValueKind::Float, Value::Float(f))  => Ok(Value::Float(*f)),

      (ValueKind::Ptr, Value::Int(i))      => Ok(Value::Ptr(Region::Word, *i as u32)),
      (ValueKind::Ptr, Value::Ptr(r, o))   => Ok(Value::Ptr(*r, *o)),

      (kind, source) => Err(Fault::Type(format!("no conversion from {} to {}", source, kind)))

    }
  }

  /**
    num: c0 selects the operation, X is r1, Y is r2, the result lands in r0. Bit 27 is
    the type toggle T: for arithmetic it forces a Float result (and faults on a Ptr
    X); for the bitwise rows it selects the second operation of the pair.
  */
  fn op_num(&mut self, fields: &Fields) -> VmResult<()> {
    let t = fields.s;
    let x = self.get_register(fields.r1)?;
    let y = self.get_register(fields.r2)?;

    let result = match fields.c0 {

      // Bitwise rows: and/or, xor/xnor, shl/shr. Both operands must be Int; shift
      // counts are masked to five bits.
      0b101 | 0b110 | 0b111 => {
        let (a, b) = match (&x, &y) {
          (Value::Int(a), Value::Int(b)) => (*a, *b),
          _ => {
            return Err(Fault::Type(format!("bitwise operands must be Int: {} and {}", x, y)));
          }
        };
        let v = match (fields.c0, t) {
          (0b101, false) => a & b,
          (0b101, true)  => a | b,
          (0b110, false) => a ^ b,
          (0b110, true)  => !(a ^ b),
          (0b111, false) => ((a as u32) << (b as u32 & 31)) as i32,
          _              => a >> (b as u32 & 31),
        };
        Value::Int(v)
      }

      code if code <= 0b100 => self.arithmetic(code, t, &x, &y)?,

      _ => {
        return Err(Fault::Decode("reserved numeric subfunction".to_string()));
      }

    };
    self.set_register(fields.r0, result)
  }

  fn arithmetic(&self, code: u8, t: bool, x: &Value, y: &Value) -> VmResult<Value> {
    // Pointer arithmetic: add and sub take Ptr+Int or Ptr+Ptr with X as the Ptr, and
    // yield a Ptr into X's region.
    if let Value::Ptr(region, base) = x {
      if t {
        return Err(Fault::Type("float-forced arithmetic on a Ptr".to_string()));
      }
      if code > 0b001 {
        return Err(Fault::Type("only add and sub accept Ptr operands".to_string()));
      }
      let delta = match y {
        Value::Int(i)    => *i as u32,
        Value::Ptr(_, o) => *o,
        other            => {
          return Err(Fault::Type(format!("Ptr arithmetic against {}", other)));
        }
      };
      let offset = match code {
        0b000 => base.wrapping_add(delta),
        _     => base.wrapping_sub(delta),
      };
      return Ok(Value::Ptr(*region, offset));
    }
    if matches!(y, Value::Ptr(_, _)) {
      return Err(Fault::Type("Ptr operand must be X".to_string()));
    }

    // Exact integer arithmetic when both operands are Int and T is clear.
    if let (false, Value::Int(a), Value::Int(b)) = (t, x, y) {
      let v = match code {
        0b000 => a.wrapping_add(*b),
        0b001 => a.wrapping_sub(*b),
        0b010 => a.wrapping_mul(*b),
        0b011 => {
          if *b == 0 {
            return Err(Fault::Domain("division by zero".to_string()));
          }
          a.wrapping_div(*b)
        }
        _     => {
          if *b == 0 {
            return Err(Fault::Domain("modulo by zero".to_string()));
          }
          a.wrapping_rem(*b)
        }
      };
      return Ok(Value::Int(v));
    }

    let a = Self::as_number(x)?;
    let b = Self::as_number(y)?;
    if code >= 0b011 && b == 0.0 {
      return Err(Fault::Domain(match code {
        0b011 => "division by zero".to_string(),
        _     => "modulo by zero".to_string(),
      }));
    }
    let v = match code {
      0b000 => a + b,
      0b001 => a - b,
      0b010 => a * b,
      0b011 => a / b,
      _     => a % b,
    };

    match (t, x) {
      (false, Value::Int(_)) => Ok(Value::Int(v as i32)),
      _                      => Ok(Value::Float(v as f32)),
    }
  }

  /**
    mem: c1 bit 0 selects read or write. The address is the Ptr in r1 offset by r2
    (Int, or another Ptr's offset). Reads from object memory yield the stored Value
    verbatim; reads from a word region reinterpret the word as the type named by c0.
    Writes to object memory accept any Value; word regions store the raw view.
  */
  fn op_mem(&mut self, fields: &Fields) -> VmResult<()> {
    let write = fields.c1 & 1 != 0;

    let (region, base) = match self.get_register(fields.r1)? {
      Value::Ptr(region, offset) => (region, offset),
      other => {
        return Err(Fault::Type(format!("mem address must be a Ptr, found {}", other)));
      }
    };
    let delta = match self.get_register(fields.r2)? {
      Value::Int(i)    => i as u32,
      Value::Ptr(_, o) => o,
      other            => {
        return Err(Fault::Type(format!("mem offset must be an Int or Ptr, found {}", other)));
      }
    };
    let address = base.wrapping_add(delta);

    if write {
      let value = self.get_register(fields.r0)?;
      match region {
        Region::Object => self.objects.write(address, value),
        _ => {
          let raw = value.raw().map_err(|_| Fault::Type(
            format!("word memory stores only Int/Float/Ptr, found {}", value)
          ))?;
          self.word_region_write(region, address, raw)
        }
      }
    } else {
      let value = match region {
        // Object memory reads preserve the stored tag; the type field is ignored.
        Region::Object => self.objects.read(address)?,
        _ => {
          let kind = Self::cvt_kind(fields.c0)?;
          if matches!(kind, ValueKind::Null | ValueKind::Ext) {
            return Err(Fault::Decode(format!("read cannot reinterpret as {}", kind)));
          }
          let word = self.word_region_read(region, address)?;
          Value::reinterpret(kind, word)?
        }
      };
      self.set_register(fields.r0, value)
    }
  }

  fn word_region_read(&self, region: Region, offset: u32) -> VmResult<Word> {
    match region {
      Region::Word => self.words.read(offset),
      Region::Call => self.calls.read(offset),
      Region::Irs  => self.irs.read(offset),
      Region::Object => Err(Fault::Type("object memory has no word view".to_string())),
    }
  }

  fn word_region_write(&mut self, region: Region, offset: u32, word: Word) -> VmResult<()> {
    match region {
      Region::Word => self.words.write(offset, word),
      Region::Call => self.calls.write(offset, word),
      Region::Irs  => self.irs.write(offset, word),
      Region::Object => Err(Fault::Type("object memory has no word view".to_string())),
    }
  }

  /// sys: print register r0 or the full machine state to the byte sink. The high
  /// variants additionally stop the machine (a breakpoint). Unenumerated
  /// subfunctions are reserved.
  fn op_sys(&mut self, fields: &Fields) -> VmResult<()> {
    match fields.c0 {

      0b000 | 0b100 => {
        let state = format!("{}", self);
        let _ = self.sink.write_all(state.as_bytes());
      }

      0b001 | 0b101 => {
        let value = self.get_register(fields.r0)?;
        let _ = writeln!(self.sink, "${} = {}", fields.r0, value);
      }

      _ => {
        return Err(Fault::Decode("reserved sys subfunction".to_string()));
      }

    }
    if fields.c0 & 0b100 != 0 {
      self.stopped = true;
    }
    Ok(())
  }

  // endregion

  // region Host marshalling

  /// Reads the NUL-terminated UTF-8 string through a word-memory pointer.
  fn read_cstr(&self, offset: u32) -> VmResult<String> {
    let mut bytes  = Vec::new();
    let mut cursor = offset;
    'words: loop {
      let word = self.words.read(cursor)?;
      for byte in word.to_be_bytes() {
        if byte == 0 {
          break 'words;
        }
        bytes.push(byte);
      }
      cursor = cursor.wrapping_add(1);
    }
    String::from_utf8(bytes)
      .map_err(|_| Fault::Domain("invalid UTF-8 behind string pointer".to_string()))
  }

  /// The env key rule: Int and Float stringify numerically; a Ptr names a
  /// NUL-terminated string in word memory.
  fn stringify_key(&self, value: &Value) -> VmResult<String> {
    match value {
      Value::Int(i)                  => Ok(i.to_string()),
      Value::Float(f)                => Ok(f.to_string()),
      Value::Ptr(Region::Word, o)    => self.read_cstr(*o),
      other => Err(Fault::Domain(format!("{} does not convert to a key", other)))
    }
  }

  /// The env get/getp coercion: the raw host value must be a finite number, which is
  /// narrowed to binary32.
  fn coerce_fetched(&self, key: &str, host: &HostValue) -> VmResult<Value> {
    match host.to_finite_number() {
      Some(n) => Ok(Value::Float(n as f32)),
      None    => Err(Fault::Domain(
        format!("binding `{}` ({}) is not a finite number", key, host.describe())
      ))
    }
  }

  /// The env set/setp rule: Ptr values are stringified through word memory, Ext
  /// values store their underlying host value, Null stores nothing.
  fn host_value_from(&self, value: &Value) -> VmResult<Rc<HostValue>> {
    match value {
      Value::Int(i)               => Ok(Rc::new(HostValue::Number(*i as f64))),
      Value::Float(f)             => Ok(Rc::new(HostValue::Number(*f as f64))),
      Value::Ptr(Region::Word, o) => Ok(Rc::new(HostValue::Text(self.read_cstr(*o)?))),
      Value::Ptr(_, _)            => Err(Fault::Type(
        "only word-memory pointers stringify".to_string()
      )),
      Value::Null                 => Ok(Rc::new(HostValue::Nothing)),
      Value::Ext(ext)             => Ok(ext.0.clone()),
    }
  }

  /// Marshals one argument for an ordinary host callable.
  fn marshal(&self, value: &Value) -> VmResult<HostArg> {
    match value {
      Value::Int(i)               => Ok(HostArg::Number(*i as f64)),
      Value::Float(f)             => Ok(HostArg::Number(*f as f64)),
      Value::Ptr(Region::Word, o) => Ok(HostArg::Text(self.read_cstr(*o)?)),
      Value::Ptr(_, _)            => Err(Fault::Type(
        "only word-memory pointers marshal as strings".to_string()
      )),
      Value::Null                 => Ok(HostArg::Nothing),
      Value::Ext(ext)             => Ok(HostArg::Handle(ext.0.clone())),
    }
  }

  fn ext_base(&mut self, slot: u8) -> VmResult<Rc<HostValue>> {
    match self.get_register(slot)? {
      Value::Ext(ext) => Ok(ext.0),
      other => Err(Fault::Type(format!("property base must be an Ext, found {}", other)))
    }
  }

  // endregion

  // region Display methods

  fn make_slot_table(&self) -> Table {
    let mut table = Table::new();
    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Slot", ubl->"Contents"]);

    for index in 0..REGISTER_COUNT {
      let label = match SlotName::try_from(index as u8) {
        Ok(name) => format!("{} ${} =", name, index),
        Err(_)   => format!("${} =", index),
      };
      table.add_row(row![r->label, format!("{}", self.registers.raw_read(index as u8))]);
    }
    table
  }

  fn make_stack_table(&self) -> Table {
    let mut table = Table::new();
    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Cell", ubl->"Contents"]);

    let top = self.sp_offset().unwrap_or(0);
    let bottom = top.saturating_sub(STATE_DUMP_WINDOW);
    for offset in (bottom..top).rev() {
      let value = self.objects.read(offset).unwrap_or(Value::Null);
      table.add_row(row![r->format!("STACK[{}] =", offset), format!("{}", value)]);
    }
    table
  }

  fn make_call_table(&self) -> Table {
    let mut table = Table::new();
    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Frame", ubl->"Return"]);

    let bottom = self.csp.saturating_sub(STATE_DUMP_WINDOW);
    for offset in (bottom..self.csp).rev() {
      let word = self.calls.read(offset).unwrap_or(0);
      table.add_row(row![r->format!("CALL[{}] =", offset), format!("{}", word)]);
    }
    table
  }

  // endregion

}

impl Default for CVM {
  fn default() -> CVM {
    CVM::new()
  }
}

impl Display for CVM {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let slot_table  = self.make_slot_table();
    let stack_table = self.make_stack_table();
    let call_table  = self.make_call_table();

    let mut combined_table = table!([slot_table, stack_table, call_table]);
    combined_table.set_titles(row![ub->"Registers", ub->"Data Stack", ub->"Call Stack"]);
    combined_table.set_format(*TABLE_DISPLAY_FORMAT);

    write!(f, "Cycles: {}\n{}", self.cycles, combined_table)
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  // Hand-packs one instruction word from its fields.
  fn word(class: u8, s: bool, c0: u8, c1: u8, r0: u8, imm: u16) -> Word {
    ((class as Word) << 28)
      | ((s as Word) << 27)
      | ((c0 as Word) << 24)
      | ((c1 as Word) << 21)
      | ((r0 as Word) << 16)
      | imm as Word
  }

  fn reg3(class: u8, s: bool, c0: u8, c1: u8, r0: u8, r1: u8, r2: u8) -> Word {
    word(class, s, c0, c1, r0, ((r1 as u16) << 8) | r2 as u16)
  }

  fn machine(program: &[Word]) -> CVM {
    let mut vm = CVM::new();
    vm.load_program(program).unwrap();
    vm
  }

  #[test]
  fn exit_immediate() {
    let mut vm = machine(&[word(1, false, 0, 0, 0, 7)]);
    assert_eq!(vm.run().unwrap(), Value::Int(7));
    assert_eq!(vm.cycles(), 1);
  }

  #[test]
  fn exit_immediate_sign_extends() {
    let mut vm = machine(&[word(1, false, 0, 0, 0, 0xFFFE)]);
    assert_eq!(vm.run().unwrap(), Value::Int(-2));
  }

  #[test]
  fn zero_register_ignores_writes() {
    // cvt.int.i $0, #9 ; exit.r $0
    let mut vm = machine(&[
      word(8, false, 1, 0, 0, 9),
      word(1, false, 1, 0, 0, 0),
    ]);
    assert_eq!(vm.run().unwrap(), Value::Int(0));
  }

  #[test]
  fn pc_advances_by_one_per_instruction() {
    let mut vm = machine(&[word(0, false, 0, 0, 0, 0), word(0, false, 0, 0, 0, 0)]);
    vm.step().unwrap();
    assert_eq!(vm.registers.raw_read(SlotName::PC as u8), Value::Ptr(Region::Word, 1));
    vm.step().unwrap();
    assert_eq!(vm.registers.raw_read(SlotName::PC as u8), Value::Ptr(Region::Word, 2));
  }

  #[test]
  fn integer_addition_scenario() {
    // cvt.int.i $3, #2 ; cvt.int.i $4, #3 ; add $5, $3, $4 ; exit.r $5
    let mut vm = machine(&[
      word(8, false, 1, 0, 3, 2),
      word(8, false, 1, 0, 4, 3),
      reg3(9, false, 0, 0, 5, 3, 4),
      word(1, false, 1, 0, 5, 0),
    ]);
    assert_eq!(vm.run().unwrap(), Value::Int(5));
  }

  #[test]
  fn float_division_scenario() {
    // cvt.float.i $3, #1 ; cvt.float.i $4, #2 ; div.f $5, $3, $4 ; exit.r $5
    let mut vm = machine(&[
      word(8, false, 2, 0, 3, 1),
      word(8, false, 2, 0, 4, 2),
      reg3(9, true, 3, 0, 5, 3, 4),
      word(1, false, 1, 0, 5, 0),
    ]);
    assert_eq!(vm.run().unwrap(), Value::Float(0.5));
  }

  #[test]
  fn division_by_zero_faults() {
    let mut vm = machine(&[
      word(8, false, 1, 0, 3, 6),
      word(8, false, 1, 0, 4, 0),
      reg3(9, false, 3, 0, 5, 3, 4),
    ]);
    vm.step().unwrap();
    vm.step().unwrap();
    assert!(matches!(vm.step(), Err(Fault::Domain(_))));
    assert!(vm.stopped());
    // Post-mortem state survives the fault.
    assert_eq!(vm.get_register(3).unwrap(), Value::Int(6));
  }

  #[test]
  fn conditional_branch_scenario() {
    // c.eq.i $3, #4 ; bc.i #2 ; exit.i #0 ; exit.i #1
    let program = [
      word(7, false, 0, 0, 3, 4),
      word(6, false, 1, 1, 0, 2),
      word(1, false, 0, 0, 0, 0),
      word(1, false, 0, 0, 0, 1),
    ];

    let mut vm = machine(&program);
    vm.set_register(3, Value::Int(4)).unwrap();
    assert_eq!(vm.run().unwrap(), Value::Int(1));

    let mut vm = machine(&program);
    vm.set_register(3, Value::Int(5)).unwrap();
    assert_eq!(vm.run().unwrap(), Value::Int(0));
  }

  #[test]
  fn call_and_ret_balance() {
    // call.i #3 ; nop ; exit.i #1 ; cvt.int.i $4, #9 ; ret
    let mut vm = machine(&[
      word(6, false, 0b010, 0, 0, 3),
      word(0, false, 0, 0, 0, 0),
      word(1, false, 0, 0, 0, 1),
      word(8, false, 1, 0, 4, 9),
      word(4, false, 0, 0, 0, 0),
    ]);
    assert_eq!(vm.run().unwrap(), Value::Int(1));
    assert_eq!(vm.get_register(4).unwrap(), Value::Int(9));
    assert_eq!(vm.csp, 0);
  }

  #[test]
  fn data_stack_round_trip() {
    let mut vm = machine(&[]);
    let value = Value::Ptr(Region::Object, 13);
    vm.push(value.clone()).unwrap();
    assert_eq!(vm.pop().unwrap(), value);
  }

  #[test]
  fn pop_past_bottom_is_bounds_fault() {
    let mut vm = machine(&[]);
    assert!(matches!(vm.pop(), Err(Fault::Bounds{ region: Region::Object, .. })));
    // SP is unchanged by the failed pop.
    assert_eq!(vm.registers.raw_read(SlotName::SP as u8), Value::Ptr(Region::Object, 0));
  }

  #[test]
  fn push_pop_registers_port_the_stack() {
    let mut vm = machine(&[]);
    vm.set_register(SlotName::PUSH as u8, Value::Int(11)).unwrap();
    assert_eq!(vm.registers.raw_read(SlotName::PUSH as u8), Value::Int(11));
    assert_eq!(vm.get_register(SlotName::POP as u8).unwrap(), Value::Int(11));
  }

  #[test]
  fn irs_ipop_sign_extends_and_iptr_does_not() {
    // nop with S set pushes the immediate onto the IRS.
    let mut vm = machine(&[
      word(0, true, 0, 0, 0, 0xFFFF),
      word(0, true, 0, 0, 0, 0xFFFF),
    ]);
    vm.step().unwrap();
    vm.step().unwrap();
    assert_eq!(vm.get_register(SlotName::IPOP as u8).unwrap(), Value::Int(-1));
    assert_eq!(
      vm.get_register(SlotName::IPTR as u8).unwrap(),
      Value::Ptr(Region::Word, 0xFFFF_FFFF)
    );
  }

  #[test]
  fn irs_underflow_is_bounds_fault() {
    let mut vm = machine(&[]);
    assert!(matches!(
      vm.get_register(SlotName::IPOP as u8),
      Err(Fault::Bounds{ region: Region::Irs, .. })
    ));
  }

  #[test]
  fn pop_variants_read_the_irs() {
    // nop [S, #5] ; pop.i $3  -- then again with pop.p
    let mut vm = machine(&[
      word(0, true, 0, 0, 0, 5),
      word(3, false, 1, 0, 3, 0),
    ]);
    vm.run_steps(2);
    assert_eq!(vm.get_register(3).unwrap(), Value::Int(5));

    let mut vm = machine(&[
      word(0, true, 0, 0, 0, 5),
      word(3, false, 3, 0, 3, 0),
    ]);
    vm.run_steps(2);
    assert_eq!(vm.get_register(3).unwrap(), Value::Ptr(Region::Word, 5));
  }

  impl CVM {
    fn run_steps(&mut self, n: usize) {
      for _ in 0..n {
        self.step().unwrap();
      }
    }
  }

  #[test]
  fn relative_branch_loops() {
    // b.i #0 is an infinite loop: PC never moves.
    let mut vm = machine(&[word(6, false, 1, 0, 0, 0)]);
    for _ in 0..4 {
      vm.step().unwrap();
    }
    assert_eq!(vm.registers.raw_read(SlotName::PC as u8), Value::Ptr(Region::Word, 0));

    // b.i #1 is a control-flow nop.
    let mut vm = machine(&[word(6, false, 1, 0, 0, 1), word(1, false, 0, 0, 0, 3)]);
    assert_eq!(vm.run().unwrap(), Value::Int(3));
  }

  #[test]
  fn relative_call_is_a_decode_fault() {
    let mut vm = machine(&[word(6, false, 0b011, 0, 0, 1)]);
    assert!(matches!(vm.step(), Err(Fault::Decode(_))));
  }

  #[test]
  fn conditional_branch_requires_int_comp() {
    let mut vm = machine(&[word(6, false, 1, 1, 0, 2)]);
    vm.set_register(SlotName::COMP as u8, Value::Float(1.0)).unwrap();
    assert!(matches!(vm.step(), Err(Fault::Type(_))));
  }

  #[test]
  fn cross_region_pointer_comparison_faults() {
    // c.eq.r $5, $3, $4
    let mut vm = machine(&[reg3(7, false, 0, 1, 3, 5, 4)]);
    vm.set_register(3, Value::Ptr(Region::Word, 1)).unwrap();
    vm.set_register(4, Value::Ptr(Region::Object, 1)).unwrap();
    assert!(matches!(vm.step(), Err(Fault::Type(_))));
  }

  #[test]
  fn three_way_comparison() {
    // c.cmp.r $5, $3, $4
    let program = [reg3(7, false, 0b110, 1, 3, 5, 4)];
    for (a, b, expected) in [(1, 2, -1), (2, 2, 0), (3, 2, 1)] {
      let mut vm = machine(&program);
      vm.set_register(3, Value::Int(a)).unwrap();
      vm.set_register(4, Value::Int(b)).unwrap();
      vm.step().unwrap();
      assert_eq!(vm.get_register(5).unwrap(), Value::Int(expected));
    }
  }

  #[test]
  fn null_tests_and_identity() {
    // c.null.r $5, $3
    let mut vm = machine(&[reg3(7, false, 0b011, 1, 3, 5, 0)]);
    vm.step().unwrap();
    assert_eq!(vm.get_register(5).unwrap(), Value::Int(1));

    // c.is.r $5, $3, $4 with bit-identical Int/Float operands is still false.
    let mut vm = machine(&[reg3(7, false, 0b100, 1, 3, 5, 4)]);
    vm.set_register(3, Value::Int(0)).unwrap();
    vm.set_register(4, Value::Float(0.0)).unwrap();
    vm.step().unwrap();
    assert_eq!(vm.get_register(5).unwrap(), Value::Int(0));
  }

  #[test]
  fn logical_not_honors_s() {
    // c.not.i $3 with S set: COMP gets the negation, IRS gets the immediate.
    let mut vm = machine(&[word(7, true, 0b100, 0, 3, 42)]);
    vm.step().unwrap();
    assert_eq!(vm.registers.raw_read(SlotName::COMP as u8), Value::Int(1));
    assert_eq!(vm.get_register(SlotName::IPOP as u8).unwrap(), Value::Int(42));
  }

  #[test]
  fn repr_round_trips_bitwise() {
    // repr.float.int $5, $3 ; repr.int.float $6, $5
    let mut vm = machine(&[
      reg3(8, true, 1, 1, 5, 2, 3),
      reg3(8, true, 2, 1, 6, 1, 5),
    ]);
    vm.set_register(3, Value::Float(-11.75)).unwrap();
    vm.run_steps(2);
    assert_eq!(
      vm.get_register(5).unwrap(),
      Value::Int((-11.75_f32).to_bits() as i32)
    );
    assert_eq!(vm.get_register(6).unwrap(), Value::Float(-11.75));
  }

  #[test]
  fn conversion_faults() {
    // cvt.float.r $5, $3 with a Ptr source
    let mut vm = machine(&[reg3(8, false, 2, 1, 5, 0, 3)]);
    vm.set_register(3, Value::Ptr(Region::Word, 4)).unwrap();
    assert!(matches!(vm.step(), Err(Fault::Type(_))));
  }

  #[test]
  fn mem_word_and_object_access() {
    // write $3 -> words[40], read.float back into $6
    let mut vm = machine(&[
      reg3(10, false, 0, 1, 3, 4, 0),
      reg3(10, false, 2, 0, 6, 4, 0),
    ]);
    vm.set_register(3, Value::Float(1.5)).unwrap();
    vm.set_register(4, Value::Ptr(Region::Word, 40)).unwrap();
    vm.run_steps(2);
    assert_eq!(vm.get_register(6).unwrap(), Value::Float(1.5));
  }

  #[test]
  fn object_memory_reads_preserve_tags() {
    // write $3 -> objects[5], read.int yields the stored Value verbatim
    let mut vm = machine(&[
      reg3(10, false, 0, 1, 3, 4, 0),
      reg3(10, false, 1, 0, 6, 4, 0),
    ]);
    vm.set_register(3, Value::Ext(ExtRef(Rc::new(HostValue::Number(3.0))))).unwrap();
    vm.set_register(4, Value::Ptr(Region::Object, 5)).unwrap();
    vm.run_steps(2);
    assert!(matches!(vm.get_register(6).unwrap(), Value::Ext(_)));
  }

  #[test]
  fn breakpoint_stops_without_exit_value() {
    let mut vm = machine(&[word(15, false, 0b100, 0, 0, 0)]);
    vm.set_sink(Box::new(Vec::new()));
    assert_eq!(vm.step().unwrap(), None);
    assert!(vm.stopped());
    assert_eq!(vm.exit_value(), None);
  }

  #[test]
  fn sys_prints_to_the_sink() {
    // Sink contents are checked end to end in the integration tests; here we only
    // prove the machine keeps running after a dump.
    let mut vm = machine(&[word(15, false, 1, 0, 3, 0), word(1, false, 0, 0, 0, 2)]);
    vm.set_sink(Box::new(Vec::new()));
    assert_eq!(vm.run().unwrap(), Value::Int(2));
  }

  #[test]
  fn external_call_duality() {
    // Ordinary callable: pops Int argc, then argc marshalled values.
    let mut vm = machine(&[reg3(6, false, 0b110, 0, 3, 0, 0)]);
    vm.register_native("id", Rc::new(|args: &[HostArg]| {
      match &args[0] {
        HostArg::Number(n) => Some(Rc::new(HostValue::Number(*n))),
        _                  => None,
      }
    }));
    let id = vm.get_environment("id").unwrap();
    vm.push(Value::Int(1)).unwrap();
    vm.push(Value::Int(1)).unwrap();   // argument count
    vm.set_register(3, Value::Ext(ExtRef(id))).unwrap();
    vm.step().unwrap();
    match vm.pop().unwrap() {
      Value::Ext(ext) => {
        assert!(matches!(&*ext.0, HostValue::Number(n) if *n == 1.0));
      }
      other => panic!("expected Ext, found {}", other),
    }

    // Declared function: fixed arity, raw Values, no stacked count.
    let mut vm = machine(&[reg3(6, false, 0b110, 0, 3, 0, 0)]);
    vm.declare_host_function("first", 2, Rc::new(|args: &[Value]| {
      match &args[0] {
        Value::Int(i) => Some(Rc::new(HostValue::Number(*i as f64))),
        _             => None,
      }
    }));
    let first = vm.get_environment("first").unwrap();
    vm.push(Value::Int(20)).unwrap();
    vm.push(Value::Int(10)).unwrap();  // top of stack is the first argument
    vm.set_register(3, Value::Ext(ExtRef(first))).unwrap();
    vm.step().unwrap();
    match vm.pop().unwrap() {
      Value::Ext(ext) => {
        assert!(matches!(&*ext.0, HostValue::Number(n) if *n == 10.0));
      }
      other => panic!("expected Ext, found {}", other),
    }
  }

  #[test]
  fn environment_get_and_set() {
    // set $3 under key in $4 ; get back into $5
    let mut vm = machine(&[
      reg3(5, false, 0b100, 0, 3, 4, 0),
      reg3(5, false, 0b000, 0, 5, 4, 0),
    ]);
    vm.set_register(3, Value::Int(21)).unwrap();
    vm.set_register(4, Value::Int(7)).unwrap();   // numeric key "7"
    vm.run_steps(2);
    assert_eq!(vm.get_register(5).unwrap(), Value::Float(21.0));
  }

  #[test]
  fn environment_missing_key_stores_null() {
    let mut vm = machine(&[reg3(5, false, 0b000, 0, 5, 4, 0)]);
    vm.set_register(4, Value::Int(99)).unwrap();
    vm.step().unwrap();
    assert_eq!(vm.get_register(5).unwrap(), Value::Null);
  }

  #[test]
  fn environment_non_numeric_fetch_faults() {
    let mut vm = machine(&[reg3(5, false, 0b000, 0, 5, 4, 0)]);
    vm.set_environment("3", Rc::new(HostValue::Nothing));
    vm.set_register(4, Value::Int(3)).unwrap();
    assert!(matches!(vm.step(), Err(Fault::Domain(_))));
  }

  #[test]
  fn properties_on_ext_bases() {
    // setp $3 (value) key $4 base $6 ; getp $5 key $4 base $6
    let mut vm = machine(&[
      reg3(5, false, 0b101, 0, 3, 4, 6),
      reg3(5, false, 0b001, 0, 5, 4, 6),
    ]);
    let record = HostValue::record();
    vm.set_register(3, Value::Int(8)).unwrap();
    vm.set_register(4, Value::Int(1)).unwrap();
    vm.set_register(6, Value::Ext(ExtRef(record))).unwrap();
    vm.run_steps(2);
    assert_eq!(vm.get_register(5).unwrap(), Value::Float(8.0));
  }

  #[test]
  fn preserved_slots_survive_reload() {
    let mut vm = machine(&[]);
    vm.set_register(SlotName::P0 as u8, Value::Int(123)).unwrap();
    vm.set_register(5, Value::Int(5)).unwrap();
    vm.load_program(&[word(1, false, 0, 0, 0, 0)]).unwrap();
    assert_eq!(vm.get_register(SlotName::P0 as u8).unwrap(), Value::Int(123));
    assert_eq!(vm.get_register(5).unwrap(), Value::Null);
  }
}
