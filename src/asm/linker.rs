/*!

  The linker. Objects concatenate in argument order; every label and relocation is
  re-offset by the running output length and merged. A label defined twice anywhere
  in the input set is fatal. After concatenation each relocation resolves: the
  target label's address (absolute) or its displacement from the site (relative) is
  masked into the low 16 bits of the word at the site.

*/

use bimap::BiMap;
use string_cache::DefaultAtom;

use crate::bytecode::Word;
use crate::error::{LinkError, LinkResult};

use super::{AsmObject, Relocation, RelocationKind};

/// Concatenates and resolves. The output is a single flat word array ready for
/// `load_program`.
pub fn link(objects: &[AsmObject]) -> LinkResult<Vec<Word>> {
  let mut words       : Vec<Word>            = Vec::new();
  let mut labels      : BiMap<DefaultAtom, u32> = BiMap::new();
  let mut relocations : Vec<Relocation>      = Vec::new();

  for object in objects {
    let base = words.len() as u32;
    words.extend_from_slice(&object.words);

    for (name, &offset) in object.labels.iter() {
      if labels.contains_left(name) {
        return Err(LinkError::DuplicateLabel(name.to_string()));
      }
      labels.insert(name.clone(), base + offset);
    }

    for relocation in &object.relocations {
      relocations.push(Relocation{
        site   : base + relocation.site,
        target : relocation.target.clone(),
        kind   : relocation.kind,
      });
    }
  }

  for relocation in relocations {
    let target = labels
      .get_by_left(&relocation.target)
      .copied()
      .ok_or_else(|| LinkError::MissingLabel(relocation.target.to_string()))?;
    let value = match relocation.kind {
      RelocationKind::Absolute => target,
      RelocationKind::Relative => target.wrapping_sub(relocation.site),
    };
    let site = relocation.site as usize;
    words[site] = (words[site] & 0xFFFF_0000) | (value & 0xFFFF);
  }

  Ok(words)
}
