/*!

  The environment is the machine's window onto its host: a string-keyed mapping of
  host-visible bindings, plus property access on `Ext` bases. Keys are identifier-like
  strings (or numeric strings) and are interned.

  Host callables come in two shapes, distinguished by a capability chosen at
  registration time and checked at call time:

   * a *declared* host function carries a fixed arity and receives raw machine
     `Value`s;
   * an *ordinary* (native) callable reads its own argument count off the data stack
     and receives marshalled arguments: pointers as strings, numbers as scalars.

  The machine never inspects the host language's types to tell the two apart.

*/

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use string_cache::DefaultAtom;

use crate::value::Value;

/// A declared host function: receives machine values, arity fixed at registration.
pub type DeclaredFn = Rc<dyn Fn(&[Value]) -> Option<Rc<HostValue>>>;

/// An ordinary host callable: receives marshalled arguments.
pub type NativeFn = Rc<dyn Fn(&[HostArg]) -> Option<Rc<HostValue>>>;

/// A machine value marshalled for an ordinary host callable.
#[derive(Clone, Debug)]
pub enum HostArg {
  /// Int and Float operands arrive as scalars.
  Number(f64),
  /// Ptr operands arrive as the NUL-terminated string read through the pointer.
  Text(String),
  /// Ext operands arrive as their underlying host value.
  Handle(Rc<HostValue>),
  Nothing,
}

/// The callable-duality capability record.
#[derive(Clone)]
pub enum HostFunction {
  Declared{
    arity : u32,
    f     : DeclaredFn
  },
  Native(NativeFn),
}

/// A host-side value as the environment stores it.
#[derive(Clone)]
pub enum HostValue {
  Number(f64),
  Text(String),
  /// A property bag. The base of `getp`/`loadp`/`setp` must wrap one of these.
  Record(RefCell<HashMap<DefaultAtom, Rc<HostValue>>>),
  Function(HostFunction),
  Nothing,
}

impl HostValue {

  /// One-word description for diagnostics; host values have no general Display.
  pub fn describe(&self) -> &'static str {
    match self {
      HostValue::Number(_)   => "number",
      HostValue::Text(_)     => "text",
      HostValue::Record(_)   => "record",
      HostValue::Function(_) => "function",
      HostValue::Nothing     => "nothing",
    }
  }

  /// The numeric coercion used by `env get`/`getp`. `None` when the value does not
  /// coerce to a finite number.
  pub fn to_finite_number(&self) -> Option<f64> {
    match self {

      HostValue::Number(n) if n.is_finite() => Some(*n),

      HostValue::Text(s) => {
        match s.trim().parse::<f64>() {
          Ok(n) if n.is_finite() => Some(n),
          _                      => None
        }
      }

      _ => None

    }
  }

  pub fn record() -> Rc<HostValue> {
    Rc::new(HostValue::Record(RefCell::new(HashMap::new())))
  }

}

impl std::fmt::Debug for HostValue {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "HostValue::{}", self.describe())
  }
}

impl Display for HostValue {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      HostValue::Number(n) => write!(f, "{}", n),
      HostValue::Text(s)   => write!(f, "{:?}", s),
      _                    => write!(f, "{}", self.describe()),
    }
  }
}

/// The global binding table. A second form of every lookup operates on the properties
/// of a `HostValue::Record` instead; see `read_property`/`write_property`.
pub struct Environment {
  bindings: HashMap<DefaultAtom, Rc<HostValue>>,
}

impl Environment {

  pub fn new() -> Environment {
    Environment{ bindings: HashMap::new() }
  }

  pub fn get(&self, key: &str) -> Option<Rc<HostValue>> {
    self.bindings.get(&DefaultAtom::from(key)).cloned()
  }

  pub fn set(&mut self, key: &str, value: Rc<HostValue>) {
    self.bindings.insert(DefaultAtom::from(key), value);
  }

  /// Registers a fixed-arity declared host function under `name`.
  pub fn declare_function(&mut self, name: &str, arity: u32, f: DeclaredFn) {
    self.set(name, Rc::new(HostValue::Function(HostFunction::Declared{ arity, f })));
  }

  /// Registers an ordinary host callable under `name`.
  pub fn register_native(&mut self, name: &str, f: NativeFn) {
    self.set(name, Rc::new(HostValue::Function(HostFunction::Native(f))));
  }

}

impl Default for Environment {
  fn default() -> Environment {
    Environment::new()
  }
}

/// Reads a property off a `Record` base. `None` when the property is missing.
pub fn read_property(base: &HostValue, key: &str) -> Option<Option<Rc<HostValue>>> {
  match base {
    HostValue::Record(fields) => {
      Some(fields.borrow().get(&DefaultAtom::from(key)).cloned())
    }
    _ => None
  }
}

/// Writes a property on a `Record` base. `false` when the base has no properties.
pub fn write_property(base: &HostValue, key: &str, value: Rc<HostValue>) -> bool {
  match base {
    HostValue::Record(fields) => {
      fields.borrow_mut().insert(DefaultAtom::from(key), value);
      true
    }
    _ => false
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn numeric_coercion() {
    assert_eq!(HostValue::Number(2.5).to_finite_number(), Some(2.5));
    assert_eq!(HostValue::Text(" 17 ".to_string()).to_finite_number(), Some(17.0));
    assert_eq!(HostValue::Number(f64::NAN).to_finite_number(), None);
    assert_eq!(HostValue::Nothing.to_finite_number(), None);
  }

  #[test]
  fn record_properties() {
    let record = HostValue::record();
    assert!(write_property(&record, "x", Rc::new(HostValue::Number(4.0))));
    let read = read_property(&record, "x").unwrap().unwrap();
    assert_eq!(read.to_finite_number(), Some(4.0));
    assert!(read_property(&record, "y").unwrap().is_none());
    assert!(read_property(&HostValue::Number(0.0), "x").is_none());
  }
}
