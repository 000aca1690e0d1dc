/*!

  A `Value` abstractly represents the data that may live in a register, in a data-stack
  cell, or behind a pointer into object memory. A `Value` is a tagged sum with exactly
  five cases. Int, Float, and Ptr values can produce a bit-exact four-byte raw view of
  themselves used by reinterpretation; Null and Ext have no raw view and fail it.

  A pointer knows which of the machine's regions it points into. The region rides with
  the value for its whole lifetime, and region identity is part of pointer comparison:
  pointers into different regions never compare, they fault.

*/

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use strum_macros::{Display as StrumDisplay, IntoStaticStr};
use num_enum::{TryFromPrimitive, IntoPrimitive};

use crate::bytecode::Word;
use crate::environment::HostValue;
use crate::error::{Fault, VmResult};

/// Identifies one of the machine's four memory stores. A "pointer" is an index into
/// the store named by its region.
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,               PartialEq,     Debug, Hash
)]
#[repr(u8)]
pub enum Region {
  /// Word memory, the single large addressable store. Programs load at offset 0.
  Word   = 0,
  /// Object memory. Cells hold whole `Value`s; the data stack lives here.
  Object = 1,
  /// The call stack backing. Holds return addresses as words.
  Call   = 2,
  /// The immediate reuse stack backing.
  Irs    = 3,
}

/// The numeric type codes used by the `cvt`/`repr` encodings.
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,               PartialEq,     Debug
)]
#[repr(u8)]
pub enum ValueKind {
  Null  = 0,
  Int   = 1,
  Float = 2,
  Ptr   = 3,
  Ext   = 4,
}

/// An opaque reference to a host object supplied through the environment. Two `ExtRef`s
/// are equal iff they refer to the same host object.
#[derive(Clone, Debug)]
pub struct ExtRef(pub Rc<HostValue>);

impl PartialEq for ExtRef {
  fn eq(&self, other: &ExtRef) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}
impl Eq for ExtRef {}

#[derive(Clone, Debug)]
pub enum Value {
  /// A value containing nothing. Fresh cells and reset registers hold `Null`.
  Null,
  /// A signed 32-bit integer. Its raw view is the same bits viewed unsigned.
  Int(i32),
  /// An IEEE-754 binary32. Its raw view is bit-identical to its storage.
  Float(f32),
  /// An index into the store named by the region.
  Ptr(Region, u32),
  /// A host object handle.
  Ext(ExtRef),
}

impl Value {

  /// Gives the numeric code of the value's type, as used by `cvt`/`repr` encodings.
  pub fn kind(&self) -> ValueKind {
    match self {
      Value::Null      => ValueKind::Null,
      Value::Int(_)    => ValueKind::Int,
      Value::Float(_)  => ValueKind::Float,
      Value::Ptr(_, _) => ValueKind::Ptr,
      Value::Ext(_)    => ValueKind::Ext,
    }
  }

  /// The four-byte raw view. Null and Ext have none and fault.
  pub fn raw(&self) -> VmResult<Word> {
    match self {
      Value::Int(i)      => Ok(*i as Word),
      Value::Float(f)    => Ok(f.to_bits()),
      Value::Ptr(_, o)   => Ok(*o),
      Value::Null        => Err(Fault::Type("Null has no raw view".to_string())),
      Value::Ext(_)      => Err(Fault::Type("Ext has no raw view".to_string())),
    }
  }

  /// Constructs a value of the given kind from a raw word. A pointer made this way
  /// always points into word memory. Null and Ext destinations fault.
  pub fn reinterpret(kind: ValueKind, raw: Word) -> VmResult<Value> {
    match kind {
      ValueKind::Int   => Ok(Value::Int(raw as i32)),
      ValueKind::Float => Ok(Value::Float(f32::from_bits(raw))),
      ValueKind::Ptr   => Ok(Value::Ptr(Region::Word, raw)),
      ValueKind::Null  => Err(Fault::Type("cannot reinterpret as Null".to_string())),
      ValueKind::Ext   => Err(Fault::Type("cannot reinterpret as Ext".to_string())),
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

}

// Int compares by value, Float by bits (so a stack round trip is reflexive even for
// NaN), Ptr by region and offset, Ext by host-object identity.
impl PartialEq for Value {
  fn eq(&self, other: &Value) -> bool {
    match (self, other) {
      (Value::Null,        Value::Null       ) => true,
      (Value::Int(a),      Value::Int(b)     ) => a == b,
      (Value::Float(a),    Value::Float(b)   ) => a.to_bits() == b.to_bits(),
      (Value::Ptr(ra, oa), Value::Ptr(rb, ob)) => ra == rb && oa == ob,
      (Value::Ext(a),      Value::Ext(b)     ) => a == b,
      _                                        => false,
    }
  }
}
impl Eq for Value {}

impl Display for Value {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {

      Value::Null => {
        write!(f, "<Null>")
      }

      Value::Int(i) => {
        write!(f, "<Int, {}>", i)
      }

      Value::Float(x) => {
        write!(f, "<Float, {}>", x)
      }

      Value::Ptr(region, offset) => {
        write!(f, "<Ptr, {}[{}]>", region, offset)
      }

      Value::Ext(ext) => {
        write!(f, "<Ext, {}>", ext.0.describe())
      }

    }
  }
}
