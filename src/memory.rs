/*!

  The machine's memory stores. Two shapes exist: a word store whose cells are 32-bit
  words, and an object store whose cells are whole `Value`s, tags preserved.

  Each store has a fixed capacity but grows its backing vector lazily on write, the
  way the machine's registers grow: a read inside capacity but beyond the written
  extent yields a zero word or a fresh Null. Any access at or past capacity is a
  bounds fault naming the region and the offending offset.

*/

use crate::bytecode::Word;
use crate::error::{Fault, VmResult};
use crate::value::{Region, Value};

/// Capacity of word memory, in words.
pub const WORD_MEMORY_CAPACITY : usize = 1 << 24;
/// Capacity of object memory (the data stack backing), in cells.
pub const OBJECT_MEMORY_CAPACITY : usize = 1 << 16;
/// Capacity of the call stack backing, in words.
pub const CALL_STACK_CAPACITY : usize = 1 << 16;
/// Capacity of the immediate reuse stack backing, in words.
pub const IRS_CAPACITY : usize = 1 << 16;

/// A memory store of 32-bit word cells.
pub struct WordStore {
  region   : Region,
  cells    : Vec<Word>,
  capacity : usize,
}

impl WordStore {

  pub fn new(region: Region, capacity: usize) -> WordStore {
    WordStore{
      region,
      cells: Vec::new(),
      capacity,
    }
  }

  pub fn region(&self) -> Region {
    self.region
  }

  /// The written extent, not the capacity.
  pub fn len(&self) -> usize {
    self.cells.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cells.is_empty()
  }

  pub fn read(&self, offset: u32) -> VmResult<Word> {
    if offset as usize >= self.capacity {
      return Err(Fault::Bounds{ region: self.region, offset });
    }
    Ok(self.cells.get(offset as usize).copied().unwrap_or(0))
  }

  pub fn write(&mut self, offset: u32, word: Word) -> VmResult<()> {
    if offset as usize >= self.capacity {
      return Err(Fault::Bounds{ region: self.region, offset });
    }
    if offset as usize >= self.cells.len() {
      self.cells.resize(offset as usize + 1, 0);
    }
    self.cells[offset as usize] = word;
    Ok(())
  }

  /// Replaces the store's contents with `words` starting at offset 0.
  pub fn load(&mut self, words: &[Word]) -> VmResult<()> {
    if words.len() > self.capacity {
      return Err(Fault::Bounds{ region: self.region, offset: self.capacity as u32 });
    }
    self.cells.clear();
    self.cells.extend_from_slice(words);
    Ok(())
  }

  pub fn clear(&mut self) {
    self.cells.clear();
  }

}

/// A memory store of tagged `Value` cells.
pub struct ObjectStore {
  region   : Region,
  cells    : Vec<Value>,
  capacity : usize,
}

impl ObjectStore {

  pub fn new(region: Region, capacity: usize) -> ObjectStore {
    ObjectStore{
      region,
      cells: Vec::new(),
      capacity,
    }
  }

  pub fn region(&self) -> Region {
    self.region
  }

  pub fn len(&self) -> usize {
    self.cells.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cells.is_empty()
  }

  pub fn read(&self, offset: u32) -> VmResult<Value> {
    if offset as usize >= self.capacity {
      return Err(Fault::Bounds{ region: self.region, offset });
    }
    Ok(self.cells.get(offset as usize).cloned().unwrap_or(Value::Null))
  }

  pub fn write(&mut self, offset: u32, value: Value) -> VmResult<()> {
    if offset as usize >= self.capacity {
      return Err(Fault::Bounds{ region: self.region, offset });
    }
    if offset as usize >= self.cells.len() {
      self.cells.resize(offset as usize + 1, Value::Null);
    }
    self.cells[offset as usize] = value;
    Ok(())
  }

  pub fn clear(&mut self) {
    self.cells.clear();
  }

}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn word_store_grows_on_write() {
    let mut store = WordStore::new(Region::Word, 64);
    assert_eq!(store.read(10).unwrap(), 0);
    store.write(10, 0xDEAD).unwrap();
    assert_eq!(store.read(10).unwrap(), 0xDEAD);
    assert_eq!(store.len(), 11);
  }

  #[test]
  fn word_store_bounds() {
    let mut store = WordStore::new(Region::Call, 4);
    assert_eq!(
      store.write(4, 1),
      Err(Fault::Bounds{ region: Region::Call, offset: 4 })
    );
    assert!(store.read(4).is_err());
  }

  #[test]
  fn object_store_preserves_tags() {
    let mut store = ObjectStore::new(Region::Object, 8);
    store.write(3, Value::Float(1.5)).unwrap();
    assert_eq!(store.read(3).unwrap(), Value::Float(1.5));
    assert_eq!(store.read(0).unwrap(), Value::Null);
  }
}
