/*!

  The machine uses a 32 bit big-endian word size. Every instruction is exactly one
  word, decomposed into fixed-position fields:

    bits 31..28  class       (4)
    bit  27      S           (1)   "sticky IRS push" flag where defined
    bits 26..24  c0          (3)   class subfunction
    bits 23..21  c1          (3)
    bits 20..16  r0          (5)
    bits 15..13  c2          (3)
    bits 12..8   r1          (5)
    bits  7..5   c3          (3)
    bits  4..0   r2          (5)
    bits 15..0   imm         (16)  alias of the low half

  The field splitter is total: it cannot fail, because every bit pattern decomposes.
  Routing on the class is where reserved patterns become decode faults; classes 11
  through 14 are reserved, as are class-specific c0 subfunctions.

  Bit 27 is the S flag wherever a class declares it meaningful, with two exceptions
  owned by their classes: `num` reads it as the type-toggle T, and `cvt` reads it as
  the nested-reinterpret marker in register mode.

*/

use std::convert::TryFrom;

use strum_macros::{Display as StrumDisplay, IntoStaticStr};
use num_enum::{TryFromPrimitive, IntoPrimitive};

use crate::error::{Fault, VmResult};

// If you change this you must also change the assembler templates and the field splitter.
pub type Word = u32;

/// Instruction classes, bits 31..28. Classes 11 through 14 are reserved.
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,               PartialEq,     Debug, Hash
)]
#[repr(u8)]
pub enum OpClass {
  Nop    = 0,
  Exit   = 1,
  Push   = 2,
  Pop    = 3,
  Ret    = 4,
  Env    = 5,
  Branch = 6,
  Cmp    = 7,
  Cvt    = 8,
  Num    = 9,
  Mem    = 10,
  Sys    = 15,
}

/// The unencoded fields of one instruction word.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Fields {
  pub class : u8,
  pub s     : bool,
  pub c0    : u8,
  pub c1    : u8,
  pub r0    : u8,
  pub c2    : u8,
  pub r1    : u8,
  pub c3    : u8,
  pub r2    : u8,
  pub imm   : u16,
}

impl Fields {

  pub fn split(word: Word) -> Fields {
    Fields{
      class : ((word >> 28) & 0xF)  as u8,
      s     : (word >> 27) & 1 == 1,
      c0    : ((word >> 24) & 0x7)  as u8,
      c1    : ((word >> 21) & 0x7)  as u8,
      r0    : ((word >> 16) & 0x1F) as u8,
      c2    : ((word >> 13) & 0x7)  as u8,
      r1    : ((word >>  8) & 0x1F) as u8,
      c3    : ((word >>  5) & 0x7)  as u8,
      r2    : ( word        & 0x1F) as u8,
      imm   : (word & 0xFFFF)       as u16,
    }
  }

  /// Routes the class field, faulting on the reserved classes.
  pub fn op_class(&self) -> VmResult<OpClass> {
    OpClass::try_from(self.class)
      .map_err(|_| Fault::Decode(format!("reserved instruction class {}", self.class)))
  }

  pub fn imm_signed(&self) -> i32 {
    self.imm as i16 as i32
  }

}

/**
  Whether the decoded variant declares the S flag meaningful. The dispatcher consults
  this after the handler returns; the assembler's `ipush` legality flag on each
  mnemonic template must agree with it.
*/
pub fn s_is_meaningful(class: OpClass, fields: &Fields) -> bool {
  match class {
    OpClass::Nop  => true,
    OpClass::Push => fields.c0 & 1 == 1,
    OpClass::Pop  => true,
    OpClass::Ret  => true,
    // Immediate-mode logical-not honors S even though the immediate itself is unused.
    OpClass::Cmp  => fields.c1 & 1 == 0 && fields.c0 == 0b100,
    // Immediate-mode Null construction honors S; the immediate is not consumed.
    OpClass::Cvt  => fields.c1 & 1 == 0 && fields.c0 == 0b000,
    _             => false,
  }
}
