use crate::address_table::entry::mask_offset;
use crate::address_table::{Mode, RegisterEntry, RegisterMap};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use wib_globals::{Error, MAX_INCLUDE_DEPTH, Result, WIB_ADDRESS_TABLE_PATH};

/// Parses an unsigned integer literal the way `strtoul(s, NULL, 0)` picks the base:
/// `0x` prefix for hex, a leading `0` for octal, decimal otherwise.
///
/// Unlike `strtoul` the whole token must be consumed.
pub fn parse_c_integer(token: &str) -> Result<u32> {
    let bad = || Error::BadToken(format!("\"{token}\" is not an integer"));
    let (digits, radix) = if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        (hex, 16)
    } else if token.len() > 1 && token.starts_with('0') {
        (&token[1..], 8)
    } else {
        (token, 10)
    };
    if digits.is_empty() {
        return Err(bad());
    }
    u32::from_str_radix(digits, radix).map_err(|_| bad())
}

impl RegisterMap {
    /// Parses `file_name` and everything it includes into a new map.
    pub fn load(file_name: &str) -> Result<Self> {
        let mut map = Self::new();
        map.load_file(file_name, "", 0)?;
        log::debug!("loaded {} entries from {file_name}", map.len());
        Ok(map)
    }

    /// Adds the entries of `file_name` with `prefix` prepended to every name and
    /// `offset` added to every address.
    pub fn load_file(&mut self, file_name: &str, prefix: &str, offset: u16) -> Result<()> {
        self.load_nested(file_name, prefix, offset, 0, None)
    }

    /// Parses register-map text that does not live in a file.
    ///
    /// Includes are looked up relative to the working directory and `WIB_ADDRESS_TABLE_PATH`.
    pub fn parse_str(&mut self, text: &str, prefix: &str, offset: u16) -> Result<()> {
        self.parse_text(text, prefix, offset, 0, None)
    }

    fn load_nested(
        &mut self,
        file_name: &str,
        prefix: &str,
        offset: u16,
        depth: usize,
        including_dir: Option<&Path>,
    ) -> Result<()> {
        let (path, text) = read_table_file(file_name, including_dir)?;
        log::trace!("parsing {} (depth {depth})", path.display());
        let dir = path.parent().map(Path::to_path_buf);
        self.parse_text(&text, prefix, offset, depth, dir.as_deref())
            .inspect_err(|e| log::error!("{}: {e}", path.display()))
    }

    fn parse_text(
        &mut self,
        text: &str,
        prefix: &str,
        offset: u16,
        depth: usize,
        dir: Option<&Path>,
    ) -> Result<()> {
        for (idx, line) in text.lines().enumerate() {
            self.process_line(line, idx + 1, prefix, offset, depth, dir)?;
        }
        Ok(())
    }

    fn process_line(
        &mut self,
        line: &str,
        line_number: usize,
        prefix: &str,
        offset: u16,
        depth: usize,
        dir: Option<&Path>,
    ) -> Result<()> {
        let active = line.split('#').next().unwrap_or("");
        let tokens: Vec<&str> = active.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(());
        }

        let mut name = if prefix.is_empty() {
            tokens[0].to_string()
        } else {
            format!("{prefix}.{}", tokens[0])
        };
        while name.ends_with('.') {
            name.pop();
        }
        if name.is_empty() {
            return Err(Error::BadToken(format!("empty name on line {line_number}")));
        }
        let name = name.to_uppercase();

        let Some(address_token) = tokens.get(1) else {
            return Ok(());
        };
        let address = parse_c_integer(address_token)?;
        let address = u16::try_from(address).map_err(|_| {
            Error::BadToken(format!(
                "address {address:#x} wider than 16 bits on line {line_number}"
            ))
        })?;
        let address = address.wrapping_add(offset);

        let Some(third) = tokens.get(2) else {
            return Ok(());
        };
        if !third.starts_with(|c: char| c.is_ascii_digit()) {
            let file_name = tokens[2..].join(" ");
            let depth = depth + 1;
            if depth > MAX_INCLUDE_DEPTH {
                log::error!("{file_name} at prefix {name} is too deep");
                return Err(Error::MaxIncludeDepth(format!(
                    "{file_name} at prefix {name}"
                )));
            }
            return self.load_nested(&file_name, &name, address, depth, dir);
        }

        let mask = parse_c_integer(third)?;
        let Some(mode_token) = tokens.get(3) else {
            return Ok(());
        };
        let attributes = parse_attributes(&tokens[4..], line_number)?;

        self.register(RegisterEntry {
            name,
            address,
            mask,
            offset: mask_offset(mask),
            mode: Mode::from_token(mode_token),
            attributes,
            conversion: Default::default(),
        })
    }
}

/// Opens `file_name` as given, then next to the including file, then below
/// `$WIB_ADDRESS_TABLE_PATH`.
fn read_table_file(file_name: &str, including_dir: Option<&Path>) -> Result<(PathBuf, String)> {
    let mut candidates = vec![PathBuf::from(file_name)];
    if let Some(dir) = including_dir {
        candidates.push(dir.join(file_name));
    }
    if let Ok(root) = std::env::var(WIB_ADDRESS_TABLE_PATH) {
        candidates.push(Path::new(&root).join(file_name));
    }
    for candidate in &candidates {
        if let Ok(text) = std::fs::read_to_string(candidate) {
            return Ok((candidate.clone(), text));
        }
    }
    let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
    Err(Error::BadFile(format!(
        "file not found: {file_name} (tried {})",
        tried.join(", ")
    )))
}

/// Bare `key`, `key=value` or `key="value with spaces"` where `\n` becomes a newline.
fn parse_attributes(tokens: &[&str], line_number: usize) -> Result<HashMap<String, String>> {
    let malformed =
        |token: &str| Error::BadToken(format!("malformed token {token} on line {line_number}"));
    let mut attributes = HashMap::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        let Some(eq) = token.find('=') else {
            attributes.insert(token.to_string(), String::new());
            i += 1;
            continue;
        };
        if token.find('"').is_some_and(|q| q < eq) || eq == token.len() - 1 {
            return Err(malformed(token));
        }
        let key = &token[..eq];
        let value = &token[eq + 1..];
        let value = match value.strip_prefix('"') {
            None => value.to_string(),
            Some(rest) => {
                let value = match rest.find('"') {
                    Some(end) => rest[..end].to_string(),
                    None => {
                        let mut value = rest.to_string();
                        let mut closed = false;
                        while i + 1 < tokens.len() {
                            i += 1;
                            value.push(' ');
                            value.push_str(tokens[i]);
                            if tokens[i].ends_with('"') {
                                value.pop();
                                closed = true;
                                break;
                            }
                        }
                        if !closed {
                            return Err(Error::BadToken(format!(
                                "unterminated quote in {token} on line {line_number}"
                            )));
                        }
                        value
                    }
                };
                value.replace("\\n", "\n")
            }
        };
        attributes.insert(key.to_string(), value);
        i += 1;
    }
    Ok(attributes)
}
