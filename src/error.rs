/*!
  Error types for the machine and for the toolchain.

  Every runtime fault is fatal within the step that raised it. The machine stops, and
  registers and memories are left exactly as they were at the point of fault so the
  embedder can inspect them post-mortem. Toolchain failures carry enough context to
  point at the offending source line.
*/

use thiserror::Error;

use crate::value::Region;

/// A fatal runtime fault. One kind per failure family, each carrying a rendered message.
#[derive(Error, Clone, Eq, PartialEq, Debug)]
pub enum Fault {
  /// Reserved class or subfunction, or an invalid bit combination (e.g. a relative call).
  #[error("decode error: {0}")]
  Decode(String),

  /// An operand type disallowed for the operation.
  #[error("type error: {0}")]
  Type(String),

  /// A memory or stack access outside its region.
  #[error("bounds error: {region} has no cell {offset}")]
  Bounds{
    region : Region,
    offset : u32
  },

  /// A numeric domain violation: division by zero, a non-finite environment fetch,
  /// an unconvertible key.
  #[error("domain error: {0}")]
  Domain(String),
}

pub type VmResult<T> = Result<T, Fault>;

/// A toolchain failure from the assembler or the linker.
#[derive(Error, Clone, Eq, PartialEq, Debug)]
pub enum LinkError {
  #[error("line {line}: `{name}` is not a mnemonic or directive")]
  UnknownMnemonic{
    line : usize,
    name : String
  },

  #[error("line {line}: `{mnemonic}` takes {expected} operand(s) but was given {found}")]
  WrongOperandCount{
    line     : usize,
    mnemonic : String,
    expected : usize,
    found    : usize
  },

  #[error("line {line}: operand `{token}` cannot fill a {width}-bit group of `{mnemonic}`")]
  OperandKindMismatch{
    line     : usize,
    mnemonic : String,
    token    : String,
    width    : usize
  },

  #[error("line {line}: malformed operand `{token}`")]
  MalformedOperand{
    line  : usize,
    token : String
  },

  #[error("line {line}: unterminated string literal")]
  UnterminatedString{
    line : usize
  },

  #[error("line {line}: unrecognized directive `{name}`")]
  UnknownDirective{
    line : usize,
    name : String
  },

  #[error("line {line}: malformed macro definition")]
  MalformedMacro{
    line : usize
  },

  #[error("line {line}: macro `{name}` takes {expected} parameter(s) but was given {found}")]
  MacroArity{
    line     : usize,
    name     : String,
    expected : usize,
    found    : usize
  },

  #[error("line {line}: `ipush` must immediately follow an instruction that carries the S flag")]
  StrayIpush{
    line : usize
  },

  #[error("duplicate label `{0}`")]
  DuplicateLabel(String),

  #[error("unresolved label `{0}`")]
  MissingLabel(String),
}

pub type LinkResult<T> = Result<T, LinkError>;
