/*!

  Tokenization of one logical assembly line. Lines split on whitespace and commas,
  except inside double-quoted strings. The leading character of a token decides its
  kind: `$` registers (decimal index or a symbolic slot name), `#` decimal
  immediates, `F#` float literals, `&` absolute and `^` relative label references.
  A trailing colon on a token declares a label. Anything else is a bare word: a
  mnemonic, a directive, or garbage for the encoder to reject.

*/

use std::str::FromStr;

use nom::{
  branch::alt,
  bytes::complete::tag,
  character::complete::{alpha1, alphanumeric1, char as one_char, digit1},
  combinator::{all_consuming, opt, recognize},
  multi::many0,
  number::complete::float,
  sequence::{pair, preceded},
  IResult,
};

use crate::error::{LinkError, LinkResult};
use crate::registers::SlotName;

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
  /// `name:` — declares `name` at the current offset of the current object.
  Label(String),
  /// `$3` or `$PC`
  Register(u8),
  /// `#-12`
  Immediate(i32),
  /// `&name`
  AbsoluteRef(String),
  /// `^name`
  RelativeRef(String),
  /// `"…"` — hoisted into rodata by the encoder.
  Str(String),
  /// `F#1.5` — hoisted into rodata by the encoder.
  FloatLit(f32),
  /// A bare word: mnemonic, directive, or not our problem yet.
  Word(String),
}

// Tokens render back to their source spelling in toolchain errors.
impl std::fmt::Display for Token {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Token::Label(name)       => write!(f, "{}:", name),
      Token::Register(index)   => write!(f, "${}", index),
      Token::Immediate(value)  => write!(f, "#{}", value),
      Token::AbsoluteRef(name) => write!(f, "&{}", name),
      Token::RelativeRef(name) => write!(f, "^{}", name),
      Token::Str(text)         => write!(f, "{:?}", text),
      Token::FloatLit(x)       => write!(f, "F#{}", x),
      Token::Word(text)        => write!(f, "{}", text),
    }
  }
}

fn identifier(input: &str) -> IResult<&str, &str> {
  recognize(pair(
    alt((alpha1, tag("_"))),
    many0(alt((alphanumeric1, tag("_"))))
  ))(input)
}

fn decimal(input: &str) -> IResult<&str, &str> {
  recognize(preceded(opt(one_char('-')), digit1))(input)
}

fn register(input: &str) -> IResult<&str, &str> {
  preceded(one_char('$'), alt((digit1, recognize(identifier))))(input)
}

/// Splits a line on whitespace and commas, keeping quoted strings whole. The
/// returned raw tokens still carry their quotes.
fn split_raw(line: &str, line_no: usize) -> LinkResult<Vec<String>> {
  let mut tokens  = Vec::new();
  let mut current = String::new();
  let mut chars   = line.chars();

  while let Some(c) = chars.next() {
    match c {

      '"' => {
        current.push('"');
        loop {
          match chars.next() {
            Some('"') => {
              current.push('"');
              break;
            }
            Some(inner) => current.push(inner),
            None => {
              return Err(LinkError::UnterminatedString{ line: line_no });
            }
          }
        }
      }

      c if c.is_whitespace() || c == ',' => {
        if !current.is_empty() {
          tokens.push(std::mem::take(&mut current));
        }
      }

      c => current.push(c),

    }
  }
  if !current.is_empty() {
    tokens.push(current);
  }
  Ok(tokens)
}

fn classify(raw: &str, line_no: usize) -> LinkResult<Token> {
  let malformed = || LinkError::MalformedOperand{ line: line_no, token: raw.to_string() };

  if let Some(inner) = raw.strip_prefix('"') {
    // split_raw guarantees the closing quote.
    return Ok(Token::Str(inner.trim_end_matches('"').to_string()));
  }

  if let Some(name) = raw.strip_suffix(':') {
    let parsed: IResult<&str, &str> = all_consuming(identifier)(name);
    return match parsed {
      Ok(_)  => Ok(Token::Label(name.to_string())),
      Err(_) => Err(malformed()),
    };
  }

  if raw.starts_with("F#") {
    let parsed: IResult<&str, f32> = all_consuming(preceded(tag("F#"), float))(raw);
    return match parsed {
      Ok((_, x)) => Ok(Token::FloatLit(x)),
      Err(_)     => Err(malformed()),
    };
  }

  if raw.starts_with('#') {
    let parsed: IResult<&str, &str> = all_consuming(preceded(one_char('#'), decimal))(raw);
    return match parsed {
      Ok((_, digits)) => {
        digits.parse::<i32>().map(Token::Immediate).map_err(|_| malformed())
      }
      Err(_) => Err(malformed()),
    };
  }

  if raw.starts_with('$') {
    let parsed: IResult<&str, &str> = all_consuming(register)(raw);
    return match parsed {
      Ok((_, name)) => {
        let index = match name.parse::<u8>() {
          Ok(index) => index,
          Err(_)    => SlotName::from_str(name).map_err(|_| malformed())? as u8,
        };
        match index < 32 {
          true  => Ok(Token::Register(index)),
          false => Err(malformed()),
        }
      }
      Err(_) => Err(malformed()),
    };
  }

  if let Some(name) = raw.strip_prefix('&') {
    let parsed: IResult<&str, &str> = all_consuming(identifier)(name);
    return match parsed {
      Ok(_)  => Ok(Token::AbsoluteRef(name.to_string())),
      Err(_) => Err(malformed()),
    };
  }

  if let Some(name) = raw.strip_prefix('^') {
    let parsed: IResult<&str, &str> = all_consuming(identifier)(name);
    return match parsed {
      Ok(_)  => Ok(Token::RelativeRef(name.to_string())),
      Err(_) => Err(malformed()),
    };
  }

  Ok(Token::Word(raw.to_string()))
}

/// Tokenizes one logical line.
pub fn tokenize(line: &str, line_no: usize) -> LinkResult<Vec<Token>> {
  split_raw(line, line_no)?
    .iter()
    .map(|raw| classify(raw, line_no))
    .collect()
}

/// Parses the bare numeric argument of `.int`/`.ptr`.
pub fn parse_bare_int(word: &str) -> Option<i64> {
  let parsed: IResult<&str, &str> = all_consuming(decimal)(word);
  match parsed {
    Ok((_, digits)) => digits.parse::<i64>().ok(),
    Err(_)          => None,
  }
}

/// Parses the bare numeric argument of `.float`.
pub fn parse_bare_float(word: &str) -> Option<f32> {
  let parsed: IResult<&str, f32> = all_consuming(float)(word);
  match parsed {
    Ok((_, x)) => Some(x),
    Err(_)     => None,
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_kinds() {
    let tokens = tokenize("start: cvt.int.i $3, #-4", 1).unwrap();
    assert_eq!(tokens, vec![
      Token::Label("start".to_string()),
      Token::Word("cvt.int.i".to_string()),
      Token::Register(3),
      Token::Immediate(-4),
    ]);
  }

  #[test]
  fn symbolic_registers() {
    assert_eq!(tokenize("$IRSP", 1).unwrap(), vec![Token::Register(26)]);
    assert_eq!(tokenize("$31", 1).unwrap(), vec![Token::Register(31)]);
    assert!(tokenize("$32", 1).is_err());
    assert!(tokenize("$FNORD", 1).is_err());
  }

  #[test]
  fn references_and_literals() {
    let tokens = tokenize("push.i &table ^loop F#1.5 \"hi there\"", 1).unwrap();
    assert_eq!(tokens, vec![
      Token::Word("push.i".to_string()),
      Token::AbsoluteRef("table".to_string()),
      Token::RelativeRef("loop".to_string()),
      Token::FloatLit(1.5),
      Token::Str("hi there".to_string()),
    ]);
  }

  #[test]
  fn unterminated_string() {
    assert_eq!(
      tokenize(".utf8 \"oops", 3),
      Err(LinkError::UnterminatedString{ line: 3 })
    );
  }

  #[test]
  fn commas_are_separators() {
    assert_eq!(
      tokenize("add $1,$2,$3", 1).unwrap().len(),
      4
    );
  }
}
