/*!

  The two-pass toolchain: a line-oriented assembler that turns textual assembly into
  a pair of objects (text and rodata), and a linker that concatenates objects and
  resolves their relocations into a flat word stream the machine can load.

  The compilation pipeline is this:

  ```text
  source -> [preprocess] -> logical lines -> [tokenize] -> tokens ->
         -> [encode per line] -> text/rodata objects -> [link] -> words
  ```

  Each object carries its own word stream, label table, and relocation list. A
  relocation is a link-time fixup that writes a label's resolved address (absolute)
  or displacement (relative) into the low 16 bits of the word at the site.

*/

mod encoder;
mod lexer;
mod linker;
mod preprocess;

use bimap::BiMap;
use string_cache::DefaultAtom;

use crate::bytecode::Word;
use crate::error::LinkResult;

pub use encoder::{assemble, Assembler};
pub use linker::link;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum RelocationKind {
  Absolute,
  Relative,
}

/// A link-time fixup: write the target label's address (or displacement from the
/// site) into the low 16 bits of the word at `site`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Relocation {
  pub site   : u32,
  pub target : DefaultAtom,
  pub kind   : RelocationKind,
}

/// One emitted object: a word stream plus its label table and relocation list.
#[derive(Clone, Debug, Default)]
pub struct AsmObject {
  pub words       : Vec<Word>,
  pub labels      : BiMap<DefaultAtom, u32>,
  pub relocations : Vec<Relocation>,
}

/// Assembles a source blob and links its text and rodata objects, text first.
pub fn assemble_and_link(source: &str) -> LinkResult<Vec<Word>> {
  let (text, rodata) = assemble(source)?;
  link(&[text, rodata])
}
