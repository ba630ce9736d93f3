use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use super::{Flag, PartialStateSpec, Register};
use crate::errors::ParseError;
use crate::utils::parse_int_literal;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Registers,
    Flags,
    Memory,
    Ignored,
}

/// Loads a state specification. A missing file is not an error.
pub fn load(path: &Path) -> Result<Option<PartialStateSpec>, ParseError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ParseError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse(&text).map(Some)
}

pub fn parse(text: &str) -> Result<PartialStateSpec, ParseError> {
    let mut spec = PartialStateSpec::default();
    let mut section: Option<(Section, String)> = None;
    let mut seen_sections = BTreeSet::new();
    let mut seen_keys = BTreeSet::new();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if let Some(header) = trimmed.strip_prefix('[') {
            let name = header
                .strip_suffix(']')
                .ok_or_else(|| ParseError::UnterminatedSection {
                    line,
                    text: trimmed.to_string(),
                })?
                .trim()
                .to_ascii_lowercase();
            if name.is_empty() || name.contains(['[', ']']) {
                return Err(ParseError::MalformedEntry {
                    line,
                    text: trimmed.to_string(),
                });
            }
            if !seen_sections.insert(name.clone()) {
                return Err(ParseError::DuplicateSection { line, name });
            }
            let kind = match name.as_str() {
                "registers" => Section::Registers,
                "flags" => Section::Flags,
                "memory" => Section::Memory,
                _ => {
                    tracing::debug!("skipping unknown section [{name}]");
                    Section::Ignored
                }
            };
            section = Some((kind, name));
            continue;
        }

        let Some((kind, section_name)) = &section else {
            return Err(ParseError::MissingSection {
                line,
                text: trimmed.to_string(),
            });
        };

        let (key, value) = split_entry(trimmed).ok_or_else(|| ParseError::MalformedEntry {
            line,
            text: trimmed.to_string(),
        })?;
        let literal = |text: &str| {
            parse_int_literal(text).map_err(|source| ParseError::Literal { line, source })
        };

        let duplicate = || ParseError::DuplicateKey {
            line,
            section: section_name.clone(),
            key: key.to_string(),
        };

        match kind {
            Section::Registers => {
                let register = Register::from_name(key).ok_or_else(|| ParseError::UnknownRegister {
                    line,
                    name: key.to_string(),
                })?;
                let slot = spec.registers.slot(register);
                if slot.is_some() {
                    return Err(duplicate());
                }
                *slot = Some((literal(value)? & 0xFF) as u8);
            }
            Section::Flags => {
                let flag = Flag::from_name(key).ok_or_else(|| ParseError::UnknownFlag {
                    line,
                    name: key.to_string(),
                })?;
                let slot = spec.flags.slot(flag);
                if slot.is_some() {
                    return Err(duplicate());
                }
                *slot = Some(literal(value)? != 0);
            }
            Section::Memory => {
                let addr = (literal(key)? & 0xFFFF) as u16;
                let byte = (literal(value)? & 0xFF) as u8;
                if spec.memory.insert(addr, byte).is_some() {
                    return Err(duplicate());
                }
            }
            Section::Ignored => {
                if !seen_keys.insert((section_name.clone(), key.to_ascii_lowercase())) {
                    return Err(duplicate());
                }
            }
        }
    }

    Ok(spec)
}

/// Splits `key = value` (or `key: value`) at the first delimiter.
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let pos = line.find(['=', ':'])?;
    let key = line[..pos].trim();
    let value = line[pos + 1..].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}
