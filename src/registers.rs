/*!

  The register file: 32 `Value` slots, some of which carry side effects on read or
  write. The side-effecting slots are described by a static per-slot capability table
  rather than per-slot dynamic dispatch; the machine consults the table and performs
  the effect, because the effects reach into the machine's stacks.

  Slot duties:

    0   ZERO  constant Int 0; writes are silently dropped
    1   COMP  comparison result; conditional branches require it to hold an Int
    2   PC    program counter; must hold a Ptr into word memory
    24  P0    scratch, preserved across reset
    25  P1    scratch, preserved across reset
    26  IRSP  immediate-reuse-stack pointer; must hold a Ptr into the IRS backing
    27  IPOP  read-only; each read pops one IRS word, returned as Int
    28  IPTR  read-only; each read pops one IRS word, returned as Ptr to word memory
    29  SP    data-stack pointer; must hold a Ptr into object memory
    30  PUSH  each write pushes the value onto the data stack (and lands in the slot)
    31  POP   read-only; each read pops a Value from the data stack

*/

use strum_macros::{Display as StrumDisplay, IntoStaticStr, EnumString};
use num_enum::{TryFromPrimitive, IntoPrimitive};

use crate::value::{Region, Value};

pub const REGISTER_COUNT: usize = 32;

/// The fixed symbolic names of the special slots, shared with the assembler's `$NAME`
/// register syntax.
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,         PartialEq,        Debug, Hash
)]
#[repr(u8)]
pub enum SlotName {
  ZERO = 0,
  COMP = 1,
  PC   = 2,
  P0   = 24,
  P1   = 25,
  IRSP = 26,
  IPOP = 27,
  IPTR = 28,
  SP   = 29,
  PUSH = 30,
  POP  = 31,
}

/// What a slot does besides holding a value.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum SlotHook {
  /// Read and write the slot, nothing else.
  Plain,
  /// Reads Int 0; writes are dropped.
  Zero,
  /// Writes must be a Ptr into word memory.
  ProgramCounter,
  /// Writes must be a Ptr into the IRS backing.
  IrsPointer,
  /// Read-only; a read pops an IRS word as Int.
  IrsPopInt,
  /// Read-only; a read pops an IRS word as Ptr to word memory.
  IrsPopPtr,
  /// Writes must be a Ptr into object memory.
  StackPointer,
  /// A write pushes onto the data stack and also lands in the slot.
  StackPush,
  /// Read-only; a read pops a Value from the data stack.
  StackPop,
}

pub const SLOT_HOOKS: [SlotHook; REGISTER_COUNT] = [
  SlotHook::Zero,            //  0 ZERO
  SlotHook::Plain,           //  1 COMP
  SlotHook::ProgramCounter,  //  2 PC
  SlotHook::Plain,           //  3
  SlotHook::Plain,           //  4
  SlotHook::Plain,           //  5
  SlotHook::Plain,           //  6
  SlotHook::Plain,           //  7
  SlotHook::Plain,           //  8
  SlotHook::Plain,           //  9
  SlotHook::Plain,           // 10
  SlotHook::Plain,           // 11
  SlotHook::Plain,           // 12
  SlotHook::Plain,           // 13
  SlotHook::Plain,           // 14
  SlotHook::Plain,           // 15
  SlotHook::Plain,           // 16
  SlotHook::Plain,           // 17
  SlotHook::Plain,           // 18
  SlotHook::Plain,           // 19
  SlotHook::Plain,           // 20
  SlotHook::Plain,           // 21
  SlotHook::Plain,           // 22
  SlotHook::Plain,           // 23
  SlotHook::Plain,           // 24 P0
  SlotHook::Plain,           // 25 P1
  SlotHook::IrsPointer,      // 26 IRSP
  SlotHook::IrsPopInt,       // 27 IPOP
  SlotHook::IrsPopPtr,       // 28 IPTR
  SlotHook::StackPointer,    // 29 SP
  SlotHook::StackPush,       // 30 PUSH
  SlotHook::StackPop,        // 31 POP
];

/// The backing storage of the register file. Hook behavior lives in the machine; the
/// file itself only stores values and owns the reset discipline.
pub struct RegisterFile {
  slots: Vec<Value>,
}

impl RegisterFile {

  pub fn new() -> RegisterFile {
    let mut file = RegisterFile{
      slots: vec![Value::Null; REGISTER_COUNT]
    };
    file.reset();
    file
  }

  /// Reads the stored value without applying any hook.
  pub fn raw_read(&self, slot: u8) -> Value {
    self.slots[slot as usize & 0x1F].clone()
  }

  /// Stores a value without applying any hook.
  pub fn raw_write(&mut self, slot: u8, value: Value) {
    self.slots[slot as usize & 0x1F] = value;
  }

  /**
    Clears every slot to Null except P0 and P1, which are preserved, then
    re-initializes the fixed slots: ZERO to Int 0, PC, SP, and IRSP to the bottoms of
    their regions.
  */
  pub fn reset(&mut self) {
    for (index, slot) in self.slots.iter_mut().enumerate() {
      match SlotName::try_from(index as u8) {
        Ok(SlotName::P0) | Ok(SlotName::P1) => { /* preserved */ }
        _                                   => { *slot = Value::Null; }
      }
    }
    self.slots[SlotName::ZERO as usize] = Value::Int(0);
    self.slots[SlotName::PC   as usize] = Value::Ptr(Region::Word,   0);
    self.slots[SlotName::SP   as usize] = Value::Ptr(Region::Object, 0);
    self.slots[SlotName::IRSP as usize] = Value::Ptr(Region::Irs,    0);
  }

}

impl Default for RegisterFile {
  fn default() -> RegisterFile {
    RegisterFile::new()
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::TryFrom;
  use std::str::FromStr;

  #[test]
  fn slot_names_round_trip() {
    assert_eq!(SlotName::from_str("IRSP").unwrap(), SlotName::IRSP);
    assert_eq!(SlotName::IRSP as u8, 26);
    assert_eq!(SlotName::try_from(31u8).unwrap(), SlotName::POP);
    assert!(SlotName::try_from(3u8).is_err());
  }

  #[test]
  fn reset_preserves_p0_p1() {
    let mut file = RegisterFile::new();
    file.raw_write(SlotName::P0 as u8, Value::Int(7));
    file.raw_write(5, Value::Int(9));
    file.reset();
    assert_eq!(file.raw_read(SlotName::P0 as u8), Value::Int(7));
    assert_eq!(file.raw_read(5), Value::Null);
    assert_eq!(file.raw_read(SlotName::PC as u8), Value::Ptr(Region::Word, 0));
  }
}
