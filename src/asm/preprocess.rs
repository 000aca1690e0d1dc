/*!

  The macro preprocessor. It strips `//` line comments, collects `DEFINE` and
  `DEFINEX` definitions, applies `[name]` and parameterized `[tag] a b c`
  substitutions, and splits the result into logical statements on `;`.

  Expansion applies the most recently declared macro first, and expanded text is
  re-scanned, so earlier-expanded text is visible to later expansions. A pass cap
  keeps mutually recursive definitions from looping forever.

*/

use crate::error::{LinkError, LinkResult};

const MAX_EXPANSION_PASSES: usize = 64;

enum MacroDef {
  /// `DEFINE name replacement` — `[name]` expands to the replacement text.
  Simple{
    name        : String,
    replacement : String
  },
  /// `DEFINEX (tag;?p1;?p2) template` — `[tag] a b` expands to the template with
  /// each `?p` placeholder replaced by the corresponding argument.
  Parameterized{
    tag      : String,
    params   : Vec<String>,
    template : String
  },
}

/// Strips a `//` comment, ignoring slashes inside double-quoted strings.
fn strip_comment(line: &str) -> &str {
  let mut in_string = false;
  let bytes = line.as_bytes();
  for (index, &byte) in bytes.iter().enumerate() {
    match byte {
      b'"' => {
        in_string = !in_string;
      }
      b'/' if !in_string && bytes.get(index + 1) == Some(&b'/') => {
        return &line[..index];
      }
      _ => {}
    }
  }
  line
}

fn parse_define(line: &str, line_no: usize) -> LinkResult<MacroDef> {
  let rest = line["DEFINE".len()..].trim_start();
  let name_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
  let (name, replacement) = rest.split_at(name_end);
  if name.is_empty() {
    return Err(LinkError::MalformedMacro{ line: line_no });
  }
  Ok(MacroDef::Simple{
    name        : name.to_string(),
    replacement : replacement.trim().to_string(),
  })
}

fn parse_definex(line: &str, line_no: usize) -> LinkResult<MacroDef> {
  let malformed = || LinkError::MalformedMacro{ line: line_no };

  let rest = line["DEFINEX".len()..].trim_start();
  let rest = rest.strip_prefix('(').ok_or_else(malformed)?;
  let close = rest.find(')').ok_or_else(malformed)?;
  let (head, template) = rest.split_at(close);
  let template = template[1..].trim();

  let mut pieces = head.split(';').map(str::trim);
  let tag = pieces.next().ok_or_else(malformed)?;
  if tag.is_empty() {
    return Err(malformed());
  }
  let params: Vec<String> = pieces.map(str::to_string).collect();
  if params.iter().any(|p| !p.starts_with('?') || p.len() < 2) {
    return Err(malformed());
  }

  Ok(MacroDef::Parameterized{
    tag      : tag.to_string(),
    params,
    template : template.to_string(),
  })
}

/// One substitution step: the most recently declared macro with a live occurrence
/// wins. Returns `None` when the line is fully expanded.
fn apply_once(text: &str, macros: &[MacroDef], line_no: usize) -> LinkResult<Option<String>> {
  for def in macros.iter().rev() {
    match def {

      MacroDef::Simple{ name, replacement } => {
        let needle = format!("[{}]", name);
        if text.contains(&needle) {
          return Ok(Some(text.replacen(&needle, replacement, 1)));
        }
      }

      MacroDef::Parameterized{ tag, params, template } => {
        let needle = format!("[{}]", tag);
        let position = match text.find(&needle) {
          Some(position) => position,
          None           => continue,
        };
        let mut rest = &text[position + needle.len()..];
        let mut args: Vec<&str> = Vec::new();
        for _ in 0..params.len() {
          rest = rest.trim_start();
          if rest.is_empty() {
            return Err(LinkError::MacroArity{
              line     : line_no,
              name     : tag.clone(),
              expected : params.len(),
              found    : args.len(),
            });
          }
          let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
          args.push(&rest[..end]);
          rest = &rest[end..];
        }

        let mut body = template.clone();
        for (param, arg) in params.iter().zip(args.iter()) {
          body = body.replace(param.as_str(), arg);
        }

        let mut result = String::with_capacity(text.len() + body.len());
        result.push_str(&text[..position]);
        result.push_str(&body);
        result.push_str(rest);
        return Ok(Some(result));
      }

    }
  }
  Ok(None)
}

fn expand(line: &str, macros: &[MacroDef], line_no: usize) -> LinkResult<String> {
  let mut text = line.to_string();
  for _ in 0..MAX_EXPANSION_PASSES {
    match apply_once(&text, macros, line_no)? {
      Some(next) => text = next,
      None       => return Ok(text),
    }
  }
  Err(LinkError::MalformedMacro{ line: line_no })
}

/// Splits a line on `;`, keeping quoted strings whole.
fn split_statements(line: &str) -> Vec<&str> {
  let mut statements = Vec::new();
  let mut in_string  = false;
  let mut start      = 0;
  for (index, c) in line.char_indices() {
    match c {
      '"'                => in_string = !in_string,
      ';' if !in_string  => {
        statements.push(&line[start..index]);
        start = index + 1;
      }
      _ => {}
    }
  }
  statements.push(&line[start..]);
  statements
}

/**
  Runs the whole preprocessing pass: comments stripped, macro definitions collected
  and removed, substitutions applied, statements split. Returns logical lines
  paired with the 1-based source line they came from.
*/
pub fn preprocess(source: &str) -> LinkResult<Vec<(usize, String)>> {
  let mut macros : Vec<MacroDef>       = Vec::new();
  let mut lines  : Vec<(usize, &str)>  = Vec::new();

  for (index, raw) in source.lines().enumerate() {
    let line_no  = index + 1;
    let stripped = strip_comment(raw);
    let trimmed  = stripped.trim();

    if trimmed.starts_with("DEFINEX") {
      macros.push(parse_definex(trimmed, line_no)?);
    } else if trimmed.starts_with("DEFINE") {
      macros.push(parse_define(trimmed, line_no)?);
    } else if !trimmed.is_empty() {
      lines.push((line_no, stripped));
    }
  }

  let mut output = Vec::new();
  for (line_no, line) in lines {
    let expanded = expand(line, &macros, line_no)?;
    for statement in split_statements(&expanded) {
      let statement = statement.trim();
      if !statement.is_empty() {
        output.push((line_no, statement.to_string()));
      }
    }
  }
  Ok(output)
}
