//! The entity query clause language.
//!
//! A query string is a single virtual path component: comma-separated
//! clauses, each optionally negated with a leading `-`. Commas inside
//! `[...]` are argument separators, not clause separators. Clause strings
//! are percent-decoded before parsing.
//!
//! ```text
//! querystring := clause ("," clause)*
//! clause      := ["-"] (function "[" args "]" | filename "=" content | filename)
//! ```

use crate::error::{Error, Result};
use crate::filename::valid_path;
use percent_encoding::percent_decode_str;

/// One clause of an entity query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clause {
    pub invert: bool,
    pub kind: ClauseKind,
}

/// The clause kinds the engine understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClauseKind {
    /// Entity has an active non-tombstone row at this path.
    FileExists(String),
    /// Entity has an active row at this path whose trimmed bytes equal the
    /// trimmed contents. `blank[f]` parses to empty contents.
    FileContents { filename: String, contents: String },
    /// Restriction to a single entity ID.
    EntityIdEquals(String),
    /// Restriction by one- or two-level shard prefix.
    EntityInShard(Vec<String>),
    /// `random[n]`; accepted by the grammar, not executable.
    RandomSelection(i64),
}

/// A parsed entity query: the conjunction of its clauses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityQuery {
    pub clauses: Vec<Clause>,
}

impl EntityQuery {
    /// Parse a querystring into a clause tree.
    pub fn parse(querystring: &str) -> Result<Self> {
        let mut clauses = Vec::new();
        for clausestring in split_querystring(querystring)? {
            clauses.push(parse_clause(&clausestring)?);
        }
        Ok(Self { clauses })
    }

    /// The query extended with an `EntityIdEquals` restriction.
    pub fn with_entity_id(&self, entity_id: &str) -> Self {
        let mut query = self.clone();
        query.clauses.push(Clause {
            invert: false,
            kind: ClauseKind::EntityIdEquals(entity_id.to_string()),
        });
        query
    }

    /// The query extended with an `EntityInShard` restriction. A no-op for
    /// an empty prefix.
    pub fn with_shards(&self, shards: &[String]) -> Self {
        let mut query = self.clone();
        if !shards.is_empty() {
            query.clauses.push(Clause {
                invert: false,
                kind: ClauseKind::EntityInShard(shards.to_vec()),
            });
        }
        query
    }
}

/// Split on top-level commas, respecting `[...]` nesting. Empty segments
/// are dropped.
fn split_querystring(s: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut level = 0usize;
    let mut collected = String::new();

    for ch in s.chars() {
        match ch {
            ',' if level == 0 => {
                if !collected.is_empty() {
                    parts.push(std::mem::take(&mut collected));
                }
                continue;
            }
            '[' => level += 1,
            ']' => {
                level = level
                    .checked_sub(1)
                    .ok_or_else(|| Error::UnmatchedBracket(s.to_string()))?;
            }
            _ => {}
        }
        collected.push(ch);
    }

    if !collected.is_empty() {
        parts.push(collected);
    }

    Ok(parts)
}

fn parse_clause(clausestring: &str) -> Result<Clause> {
    let decoded = percent_decode_str(clausestring)
        .decode_utf8()
        .map_err(|_| Error::InvalidEncoding(clausestring.to_string()))?
        .into_owned();

    let (invert, body) = match decoded.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, decoded.as_str()),
    };

    let kind = if body.contains('[') {
        parse_function_clause(body)?
    } else if let Some((filename, contents)) = body.split_once('=') {
        if !valid_path(filename) {
            return Err(Error::InvalidFilename(filename.to_string()));
        }
        ClauseKind::FileContents {
            filename: filename.to_string(),
            contents: contents.to_string(),
        }
    } else {
        if !valid_path(body) {
            return Err(Error::InvalidFilename(body.to_string()));
        }
        ClauseKind::FileExists(body.to_string())
    };

    Ok(Clause { invert, kind })
}

/// A parsed typed function argument.
enum ArgValue {
    Str(String),
    Int(i64),
}

/// Parse raw argument strings against a spec of per-argument type codes:
/// `f` validated path, `s` string, `i` integer.
fn parse_args(raw: &[String], spec: &str) -> Result<Vec<ArgValue>> {
    if raw.len() != spec.len() {
        return Err(Error::WrongArgumentCount {
            want: spec.len(),
            got: raw.len(),
        });
    }

    let mut values = Vec::with_capacity(raw.len());
    for (arg, code) in raw.iter().zip(spec.chars()) {
        let value = match code {
            'f' => {
                if !valid_path(arg) {
                    return Err(Error::InvalidFilename(arg.clone()));
                }
                ArgValue::Str(arg.clone())
            }
            's' => ArgValue::Str(arg.clone()),
            'i' => ArgValue::Int(
                arg.parse()
                    .map_err(|_| Error::BadIntegerArgument(arg.clone()))?,
            ),
            _ => return Err(Error::Internal(format!("unknown arg code {code:?}"))),
        };
        values.push(value);
    }

    Ok(values)
}

fn parse_function_clause(body: &str) -> Result<ClauseKind> {
    let call = parse_simple_function(body)?;

    match call.name.as_str() {
        "blank" => {
            let args = parse_args(&call.args, "f")?;
            let ArgValue::Str(filename) = &args[0] else {
                unreachable!()
            };
            Ok(ClauseKind::FileContents {
                filename: filename.clone(),
                contents: String::new(),
            })
        }
        "random" => {
            let args = parse_args(&call.args, "i")?;
            let ArgValue::Int(n) = args[0] else {
                unreachable!()
            };
            Ok(ClauseKind::RandomSelection(n))
        }
        _ => Err(Error::UnknownFunction(call.name)),
    }
}

struct SimpleFunction {
    name: String,
    args: Vec<String>,
}

fn parse_simple_function(s: &str) -> Result<SimpleFunction> {
    if split_querystring(s)?.len() != 1 {
        return Err(Error::MalformedFunction {
            clause: s.to_string(),
            reason: "top-level comma",
        });
    }

    let (Some(args_start), Some(args_end)) = (s.find('['), s.rfind(']')) else {
        return Err(Error::MalformedFunction {
            clause: s.to_string(),
            reason: "must contain brackets",
        });
    };

    let name = s[..args_start].trim();
    if name.is_empty() {
        return Err(Error::MalformedFunction {
            clause: s.to_string(),
            reason: "no function name",
        });
    }

    let args = split_querystring(s[args_start + 1..args_end].trim())?;

    Ok(SimpleFunction {
        name: name.to_string(),
        args,
    })
}
