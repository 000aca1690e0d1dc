/*!

  The per-line encoder. Each mnemonic maps to exactly one encoding template: a
  32-character bit string over `0`, `1`, `?`, and the letters `a`/`b`/`c` naming
  operand bit groups in argument order. Fixed bits encode the class and subfunction;
  5-bit groups take register indices; 16-bit groups take immediates or relocations.

  The `?` positions are substrate: scanning the template from bit 31 toward bit 0,
  the i-th `?` (counting from 1) copies the bit at its own position of the
  previously emitted word rotated left by i. The seed word at the start of each
  object is 0. This rule is load-bearing; emitted streams depend on it bit for bit.

  String and float literal operands are hoisted into the rodata object under an
  auto-generated label and replaced by an absolute relocation to that label.
  Directives emit data into the current object. The `ipush` pseudo-mnemonic rewrites
  the previously emitted instruction, which must have declared the S flag
  meaningful: S is set and the low 16 bits are replaced by the argument.

*/

use std::collections::HashMap;

use bimap::BiMap;
use lazy_static::lazy_static;
use string_cache::DefaultAtom;

use crate::bytecode::Word;
use crate::error::{LinkError, LinkResult};

use super::lexer::{parse_bare_float, parse_bare_int, tokenize, Token};
use super::preprocess::preprocess;
use super::{AsmObject, Relocation, RelocationKind};

/// One mnemonic's encoding: the bit template and whether `ipush` may rewrite it.
pub struct Template {
  pub bits      : &'static str,
  pub s_capable : bool,
}

lazy_static! {
  /// The fixed mnemonic table. Exactly one template per mnemonic. Segment widths are
  /// class(4) S(1) c0(3) c1(3) r0(5) and either a 16-bit immediate half or
  /// c2(3) r1(5) c3(3) r2(5).
  pub static ref MNEMONICS: HashMap<&'static str, Template> = {
    let mut table: HashMap<&'static str, Template> = HashMap::new();
    {
      let mut def = |name: &'static str, bits: &'static str, s_capable: bool| {
        debug_assert_eq!(bits.len(), 32, "bad template width for {}", name);
        table.insert(name, Template{ bits, s_capable });
      };

      def("nop",       concat!("0000", "0", "???", "???", "?????", "????????????????"), true);

      def("exit.i",    concat!("0001", "0", "000", "???", "?????", "aaaaaaaaaaaaaaaa"), false);
      def("exit.r",    concat!("0001", "0", "001", "???", "aaaaa", "????????????????"), false);

      def("push.i",    concat!("0010", "0", "000", "???", "?????", "aaaaaaaaaaaaaaaa"), false);
      def("push.r",    concat!("0010", "0", "001", "???", "aaaaa", "????????????????"), true);

      def("pop",       concat!("0011", "0", "000", "???", "aaaaa", "????????????????"), true);
      def("pop.i",     concat!("0011", "0", "001", "???", "aaaaa", "????????????????"), true);
      def("pop.p",     concat!("0011", "0", "011", "???", "aaaaa", "????????????????"), true);

      def("ret",       concat!("0100", "0", "???", "???", "?????", "????????????????"), true);

      def("get",       concat!("0101", "0", "000", "???", "aaaaa", "???", "bbbbb", "???", "?????"), false);
      def("getp",      concat!("0101", "0", "001", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("load",      concat!("0101", "0", "010", "???", "aaaaa", "???", "bbbbb", "???", "?????"), false);
      def("loadp",     concat!("0101", "0", "011", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("set",       concat!("0101", "0", "100", "???", "aaaaa", "???", "bbbbb", "???", "?????"), false);
      def("setp",      concat!("0101", "0", "101", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);

      def("ba.i",      concat!("0110", "0", "000", "??0", "?????", "aaaaaaaaaaaaaaaa"), false);
      def("b.i",       concat!("0110", "0", "001", "??0", "?????", "aaaaaaaaaaaaaaaa"), false);
      def("call.i",    concat!("0110", "0", "010", "??0", "?????", "aaaaaaaaaaaaaaaa"), false);
      def("ba.r",      concat!("0110", "0", "100", "??0", "aaaaa", "????????????????"), false);
      def("b.r",       concat!("0110", "0", "101", "??0", "aaaaa", "????????????????"), false);
      def("call.r",    concat!("0110", "0", "110", "??0", "aaaaa", "????????????????"), false);
      def("bac.i",     concat!("0110", "0", "000", "??1", "?????", "aaaaaaaaaaaaaaaa"), false);
      def("bc.i",      concat!("0110", "0", "001", "??1", "?????", "aaaaaaaaaaaaaaaa"), false);
      def("callc.i",   concat!("0110", "0", "010", "??1", "?????", "aaaaaaaaaaaaaaaa"), false);
      def("bac.r",     concat!("0110", "0", "100", "??1", "aaaaa", "????????????????"), false);
      def("bc.r",      concat!("0110", "0", "101", "??1", "aaaaa", "????????????????"), false);
      def("callc.r",   concat!("0110", "0", "110", "??1", "aaaaa", "????????????????"), false);

      def("c.eq.i",    concat!("0111", "0", "000", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("c.ne.i",    concat!("0111", "0", "001", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("c.lt.i",    concat!("0111", "0", "010", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("c.le.i",    concat!("0111", "0", "011", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("c.gt.i",    concat!("0111", "0", "101", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("c.ge.i",    concat!("0111", "0", "111", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("c.cmp.i",   concat!("0111", "0", "110", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("c.not.i",   concat!("0111", "0", "100", "??0", "aaaaa", "????????????????"), true);
      def("c.eq.r",    concat!("0111", "0", "000", "??1", "bbbbb", "???", "aaaaa", "???", "ccccc"), false);
      def("c.ne.r",    concat!("0111", "0", "001", "??1", "bbbbb", "???", "aaaaa", "???", "ccccc"), false);
      def("c.lt.r",    concat!("0111", "0", "010", "??1", "bbbbb", "???", "aaaaa", "???", "ccccc"), false);
      def("c.gt.r",    concat!("0111", "0", "101", "??1", "bbbbb", "???", "aaaaa", "???", "ccccc"), false);
      def("c.cmp.r",   concat!("0111", "0", "110", "??1", "bbbbb", "???", "aaaaa", "???", "ccccc"), false);
      def("c.is.r",    concat!("0111", "0", "100", "??1", "bbbbb", "???", "aaaaa", "???", "ccccc"), false);
      def("c.null.r",  concat!("0111", "0", "011", "??1", "bbbbb", "???", "aaaaa", "???", "?????"), false);
      def("c.nnull.r", concat!("0111", "0", "111", "??1", "bbbbb", "???", "aaaaa", "???", "?????"), false);

      def("cvt.null",    concat!("1000", "0", "000", "??0", "aaaaa", "????????????????"), true);
      def("cvt.int.i",   concat!("1000", "0", "001", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("cvt.float.i", concat!("1000", "0", "010", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("cvt.ptr.i",   concat!("1000", "0", "011", "??0", "aaaaa", "bbbbbbbbbbbbbbbb"), false);
      def("cvt.int.r",   concat!("1000", "0", "001", "??1", "aaaaa", "???", "?????", "???", "bbbbb"), false);
      def("cvt.float.r", concat!("1000", "0", "010", "??1", "aaaaa", "???", "?????", "???", "bbbbb"), false);
      def("cvt.ptr.r",   concat!("1000", "0", "011", "??1", "aaaaa", "???", "?????", "???", "bbbbb"), false);

      def("repr.int.int",     concat!("1000", "1", "001", "??1", "aaaaa", "???", "00001", "???", "bbbbb"), false);
      def("repr.int.float",   concat!("1000", "1", "010", "??1", "aaaaa", "???", "00001", "???", "bbbbb"), false);
      def("repr.int.ptr",     concat!("1000", "1", "011", "??1", "aaaaa", "???", "00001", "???", "bbbbb"), false);
      def("repr.float.int",   concat!("1000", "1", "001", "??1", "aaaaa", "???", "00010", "???", "bbbbb"), false);
      def("repr.float.float", concat!("1000", "1", "010", "??1", "aaaaa", "???", "00010", "???", "bbbbb"), false);
      def("repr.float.ptr",   concat!("1000", "1", "011", "??1", "aaaaa", "???", "00010", "???", "bbbbb"), false);
      def("repr.ptr.int",     concat!("1000", "1", "001", "??1", "aaaaa", "???", "00011", "???", "bbbbb"), false);
      def("repr.ptr.float",   concat!("1000", "1", "010", "??1", "aaaaa", "???", "00011", "???", "bbbbb"), false);
      def("repr.ptr.ptr",     concat!("1000", "1", "011", "??1", "aaaaa", "???", "00011", "???", "bbbbb"), false);

      def("add",    concat!("1001", "0", "000", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("sub",    concat!("1001", "0", "001", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("mult",   concat!("1001", "0", "010", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("div",    concat!("1001", "0", "011", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("mod",    concat!("1001", "0", "100", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("add.f",  concat!("1001", "1", "000", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("sub.f",  concat!("1001", "1", "001", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("mult.f", concat!("1001", "1", "010", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("div.f",  concat!("1001", "1", "011", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("mod.f",  concat!("1001", "1", "100", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("and",    concat!("1001", "0", "101", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("or",     concat!("1001", "1", "101", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("xor",    concat!("1001", "0", "110", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("xnor",   concat!("1001", "1", "110", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("shl",    concat!("1001", "0", "111", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("shr",    concat!("1001", "1", "111", "???", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);

      def("read.int",   concat!("1010", "0", "001", "??0", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("read.float", concat!("1010", "0", "010", "??0", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("read.ptr",   concat!("1010", "0", "011", "??0", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);
      def("write",      concat!("1010", "0", "???", "??1", "aaaaa", "???", "bbbbb", "???", "ccccc"), false);

      def("sys.state",  concat!("1111", "0", "000", "???", "?????", "????????????????"), false);
      def("sys.reg",    concat!("1111", "0", "001", "???", "aaaaa", "????????????????"), false);
      def("brk.state",  concat!("1111", "0", "100", "???", "?????", "????????????????"), false);
      def("brk.reg",    concat!("1111", "0", "101", "???", "aaaaa", "????????????????"), false);
    }
    table
  };
}

/// One growing output section.
struct ObjectBuilder {
  words       : Vec<Word>,
  labels      : BiMap<DefaultAtom, u32>,
  relocations : Vec<Relocation>,
  substrate   : Word,
}

impl ObjectBuilder {

  fn new() -> ObjectBuilder {
    ObjectBuilder{
      words       : Vec::new(),
      labels      : BiMap::new(),
      relocations : Vec::new(),
      substrate   : 0,
    }
  }

  fn here(&self) -> u32 {
    self.words.len() as u32
  }

  fn emit(&mut self, word: Word) {
    self.words.push(word);
    self.substrate = word;
  }

  fn declare_label(&mut self, name: &str) -> LinkResult<()> {
    let atom = DefaultAtom::from(name);
    if self.labels.contains_left(&atom) {
      return Err(LinkError::DuplicateLabel(name.to_string()));
    }
    let here = self.here();
    self.labels.insert(atom, here);
    Ok(())
  }

  fn finish(self) -> AsmObject {
    AsmObject{
      words       : self.words,
      labels      : self.labels,
      relocations : self.relocations,
    }
  }

}

/// Fills one template from its operands and the substrate word.
fn encode_word(
  line_no   : usize,
  mnemonic  : &str,
  template  : &Template,
  operands  : &[Token],
  substrate : Word,
  site      : u32,
) -> LinkResult<(Word, Vec<Relocation>)> {

  let chars: Vec<char> = template.bits.chars().collect();

  // Collect the named bit groups. The letter names the argument position: `a` binds
  // the first operand wherever its bits sit in the word.
  let mut groups: Vec<(char, Vec<usize>)> = Vec::new();
  for (index, c) in chars.iter().enumerate() {
    if c.is_ascii_lowercase() {
      match groups.iter_mut().find(|(letter, _)| letter == c) {
        Some((_, positions)) => positions.push(index),
        None                 => groups.push((*c, vec![index])),
      }
    }
  }
  groups.sort_by_key(|(letter, _)| *letter);

  if groups.len() != operands.len() {
    return Err(LinkError::WrongOperandCount{
      line     : line_no,
      mnemonic : mnemonic.to_string(),
      expected : groups.len(),
      found    : operands.len(),
    });
  }

  // Bind each operand to its group.
  let mut values      : HashMap<char, (u32, usize)> = HashMap::new();
  let mut relocations : Vec<Relocation>             = Vec::new();
  for ((letter, positions), token) in groups.iter().zip(operands.iter()) {
    let width = positions.len();
    let mismatch = || LinkError::OperandKindMismatch{
      line     : line_no,
      mnemonic : mnemonic.to_string(),
      token    : token.to_string(),
      width,
    };
    let value = match token {

      Token::Register(index) => {
        match width {
          5 => *index as u32,
          _ => { return Err(mismatch()); }
        }
      }

      Token::Immediate(value) => {
        match width {
          16 => (*value as u32) & 0xFFFF,
          _  => { return Err(mismatch()); }
        }
      }

      | Token::AbsoluteRef(name)
      | Token::RelativeRef(name) => {
        if width != 16 {
          return Err(mismatch());
        }
        relocations.push(Relocation{
          site,
          target : DefaultAtom::from(name.as_str()),
          kind   : match token {
            Token::AbsoluteRef(_) => RelocationKind::Absolute,
            _                     => RelocationKind::Relative,
          },
        });
        0
      }

      other => {
        return Err(LinkError::MalformedOperand{
          line  : line_no,
          token : other.to_string(),
        });
      }

    };
    values.insert(*letter, (value, width));
  }

  // Fill the word bit by bit, MSB first.
  let mut word: Word = 0;
  let mut substrate_count: u32 = 0;
  let mut consumed: HashMap<char, usize> = HashMap::new();
  for (index, c) in chars.iter().enumerate() {
    let position = 31 - index as u32;
    let bit = match c {

      '0' => 0,

      '1' => 1,

      // The substrate rule. Rotation deepens by one for every substrate position.
      '?' => {
        substrate_count += 1;
        (substrate.rotate_left(substrate_count) >> position) & 1
      }

      letter => {
        let (value, width) = values[letter];
        let cursor = consumed.entry(*letter).or_insert(0);
        let bit = (value >> (width - 1 - *cursor)) & 1;
        *cursor += 1;
        bit
      }

    };
    word |= bit << position;
  }

  Ok((word, relocations))
}

/// Packs a string as NUL-terminated UTF-8, padded with NULs to a word boundary,
/// bytes in big-endian order.
fn string_words(text: &str) -> Vec<Word> {
  let mut bytes = text.as_bytes().to_vec();
  bytes.push(0);
  while bytes.len() % 4 != 0 {
    bytes.push(0);
  }
  bytes
    .chunks_exact(4)
    .map(|chunk| Word::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    .collect()
}

/// The line-by-line assembler. Feed it preprocessed lines, then `finish` it into
/// the text and rodata objects.
pub struct Assembler {
  text      : ObjectBuilder,
  rodata    : ObjectBuilder,
  in_rodata : bool,
  hoisted   : usize,
  pending_s : Option<usize>,
}

impl Assembler {

  pub fn new() -> Assembler {
    Assembler{
      text      : ObjectBuilder::new(),
      rodata    : ObjectBuilder::new(),
      in_rodata : false,
      hoisted   : 0,
      pending_s : None,
    }
  }

  fn current(&mut self) -> &mut ObjectBuilder {
    match self.in_rodata {
      true  => &mut self.rodata,
      false => &mut self.text,
    }
  }

  pub fn process_line(&mut self, line_no: usize, line: &str) -> LinkResult<()> {
    let mut tokens = tokenize(line, line_no)?;
    if tokens.is_empty() {
      return Ok(());
    }

    // A trailing colon on the first token declares a label at the current offset.
    if let Token::Label(name) = tokens[0].clone() {
      self.current().declare_label(&name)?;
      tokens.remove(0);
    }
    if tokens.is_empty() {
      return Ok(());
    }

    let head = match &tokens[0] {
      Token::Word(name) => name.clone(),
      other => {
        return Err(LinkError::MalformedOperand{
          line  : line_no,
          token : other.to_string(),
        });
      }
    };
    let operands = tokens.split_off(1);

    if head == "ipush" {
      return self.rewrite_ipush(line_no, &operands);
    }
    if let Some(name) = head.strip_prefix('.') {
      return self.directive(line_no, name, &operands);
    }
    self.instruction(line_no, &head, operands)
  }

  fn instruction(&mut self, line_no: usize, head: &str, operands: Vec<Token>) -> LinkResult<()> {
    let template = MNEMONICS.get(head).ok_or_else(|| LinkError::UnknownMnemonic{
      line : line_no,
      name : head.to_string(),
    })?;

    // Hoist string and float literals into rodata behind an absolute relocation.
    let mut bound = Vec::with_capacity(operands.len());
    for token in operands {
      match token {
        Token::Str(text)    => {
          let label = self.hoist(&string_words(&text))?;
          bound.push(Token::AbsoluteRef(label));
        }
        Token::FloatLit(x)  => {
          let label = self.hoist(&[x.to_bits()])?;
          bound.push(Token::AbsoluteRef(label));
        }
        token => bound.push(token),
      }
    }

    let object = self.current();
    let site   = object.here();
    let (word, relocations) =
      encode_word(line_no, head, template, &bound, object.substrate, site)?;
    object.relocations.extend(relocations);
    object.emit(word);

    self.pending_s = match template.s_capable {
      true  => Some(site as usize),
      false => None,
    };
    Ok(())
  }

  fn hoist(&mut self, words: &[Word]) -> LinkResult<String> {
    let label = format!("@lit{}", self.hoisted);
    self.hoisted += 1;
    self.rodata.declare_label(&label)?;
    for &word in words {
      self.rodata.emit(word);
    }
    Ok(label)
  }

  fn directive(&mut self, line_no: usize, name: &str, operands: &[Token]) -> LinkResult<()> {
    // Data and section changes break the instruction sequence; `ipush` may no
    // longer reach back past them.
    self.pending_s = None;

    let arity_error = |found: usize| LinkError::WrongOperandCount{
      line     : line_no,
      mnemonic : format!(".{}", name),
      expected : 1,
      found,
    };

    match name {

      "text" => {
        self.in_rodata = false;
        Ok(())
      }

      "rodata" => {
        self.in_rodata = true;
        Ok(())
      }

      "int" => {
        if operands.is_empty() {
          return Err(arity_error(0));
        }
        for token in operands {
          let word = match token {
            Token::Immediate(i) => *i as u32,
            Token::Word(text)   => {
              match parse_bare_int(text) {
                Some(value) => value as u32,
                None => {
                  return Err(LinkError::MalformedOperand{
                    line  : line_no,
                    token : token.to_string(),
                  });
                }
              }
            }
            other => {
              return Err(LinkError::MalformedOperand{
                line  : line_no,
                token : other.to_string(),
              });
            }
          };
          self.current().emit(word);
        }
        Ok(())
      }

      "float" => {
        if operands.is_empty() {
          return Err(arity_error(0));
        }
        for token in operands {
          let word = match token {
            Token::FloatLit(x) => x.to_bits(),
            Token::Word(text)  => {
              match parse_bare_float(text) {
                Some(x) => x.to_bits(),
                None => {
                  return Err(LinkError::MalformedOperand{
                    line  : line_no,
                    token : token.to_string(),
                  });
                }
              }
            }
            other => {
              return Err(LinkError::MalformedOperand{
                line  : line_no,
                token : other.to_string(),
              });
            }
          };
          self.current().emit(word);
        }
        Ok(())
      }

      "ptr" => {
        if operands.is_empty() {
          return Err(arity_error(0));
        }
        for token in operands {
          match token {
            Token::Immediate(i) => {
              let word = *i as u32;
              self.current().emit(word);
            }
            Token::Word(text) => {
              match parse_bare_int(text) {
                Some(value) => {
                  self.current().emit(value as u32);
                }
                None => {
                  return Err(LinkError::MalformedOperand{
                    line  : line_no,
                    token : token.to_string(),
                  });
                }
              }
            }
            | Token::AbsoluteRef(target)
            | Token::RelativeRef(target) => {
              let kind = match token {
                Token::AbsoluteRef(_) => RelocationKind::Absolute,
                _                     => RelocationKind::Relative,
              };
              let object = self.current();
              let site   = object.here();
              object.relocations.push(Relocation{
                site,
                target : DefaultAtom::from(target.as_str()),
                kind,
              });
              object.emit(0);
            }
            other => {
              return Err(LinkError::MalformedOperand{
                line  : line_no,
                token : other.to_string(),
              });
            }
          }
        }
        Ok(())
      }

      "utf8" | "string" | "str" => {
        match operands {
          [Token::Str(text)] => {
            for word in string_words(text) {
              self.current().emit(word);
            }
            Ok(())
          }
          [other] => Err(LinkError::MalformedOperand{
            line  : line_no,
            token : other.to_string(),
          }),
          _ => Err(arity_error(operands.len())),
        }
      }

      _ => Err(LinkError::UnknownDirective{
        line : line_no,
        name : format!(".{}", name),
      })

    }
  }

  /// `ipush` is legal only immediately after an instruction whose encoding declared
  /// S meaningful. It rewrites that word: S set, low 16 bits replaced.
  fn rewrite_ipush(&mut self, line_no: usize, operands: &[Token]) -> LinkResult<()> {
    let site = match self.pending_s.take() {
      Some(site) => site,
      None       => {
        return Err(LinkError::StrayIpush{ line: line_no });
      }
    };
    if operands.len() != 1 {
      return Err(LinkError::WrongOperandCount{
        line     : line_no,
        mnemonic : "ipush".to_string(),
        expected : 1,
        found    : operands.len(),
      });
    }

    let object = self.current();
    let mut word = (object.words[site] | 1 << 27) & 0xFFFF_0000;
    match &operands[0] {

      Token::Immediate(value) => {
        word |= (*value as u32) & 0xFFFF;
      }

      | Token::AbsoluteRef(target)
      | Token::RelativeRef(target) => {
        let kind = match &operands[0] {
          Token::AbsoluteRef(_) => RelocationKind::Absolute,
          _                     => RelocationKind::Relative,
        };
        object.relocations.push(Relocation{
          site   : site as u32,
          target : DefaultAtom::from(target.as_str()),
          kind,
        });
      }

      other => {
        return Err(LinkError::MalformedOperand{
          line  : line_no,
          token : other.to_string(),
        });
      }

    }
    object.words[site] = word;
    object.substrate   = word;
    Ok(())
  }

  pub fn finish(self) -> (AsmObject, AsmObject) {
    (self.text.finish(), self.rodata.finish())
  }

}

impl Default for Assembler {
  fn default() -> Assembler {
    Assembler::new()
  }
}

/// Assembles a source blob into its text and rodata objects.
pub fn assemble(source: &str) -> LinkResult<(AsmObject, AsmObject)> {
  let mut assembler = Assembler::new();
  for (line_no, line) in preprocess(source)? {
    assembler.process_line(line_no, &line)?;
  }
  Ok(assembler.finish())
}
