use crate::address_table::{RegisterEntry, RegisterMap};
use regex::Regex;
use std::collections::BTreeSet;
use wib_globals::{Error, Result};

/// Attribute naming the table an entry is displayed in.
pub const TABLE_KEY: &str = "Table";

const PERL_PREFIX: &str = "PERL:";

/// Builds a full-match regex from a wildcard pattern.
///
/// `.` is literal and `*` matches any run. With a `PERL:` prefix the remainder is
/// used as a regex verbatim.
fn compile_pattern(pattern: &str, upper_case: bool) -> Result<Regex> {
    let perl = pattern.len() > PERL_PREFIX.len() + 1
        && pattern
            .get(..PERL_PREFIX.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(PERL_PREFIX));
    let expr = if perl {
        log::debug!("using PERL-style regex unchanged");
        pattern[PERL_PREFIX.len()..].to_string()
    } else {
        let pattern = if upper_case {
            pattern.to_uppercase()
        } else {
            pattern.to_string()
        };
        pattern.replace('.', "\\.").replace('*', ".*")
    };
    Regex::new(&format!("^(?:{expr})$")).map_err(|e| {
        log::error!("bad pattern {pattern}: {e}");
        Error::BadRegex(format!("({expr}) {pattern}"))
    })
}

impl RegisterMap {
    /// All names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names fully matching `pattern`, sorted. The pattern is upper-cased first.
    pub fn names_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let re = compile_pattern(pattern, true)?;
        let mut names: Vec<String> = self
            .by_name
            .keys()
            .filter(|name| re.is_match(name))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    /// Names of entries with `lower <= address < upper`, in ascending address order.
    pub fn names_in_address_range(&self, lower: u16, upper: u16) -> Vec<String> {
        if lower >= upper {
            return Vec::new();
        }
        self.by_address
            .range(lower..upper)
            .flat_map(|(_, idxs)| idxs.iter())
            .map(|&idx| self.entries[idx].name.clone())
            .collect()
    }

    /// Distinct values of the `Table` attribute matching `pattern`, sorted.
    ///
    /// Table names keep their case, so the pattern is not upper-cased.
    pub fn table_names_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let re = compile_pattern(pattern, false)?;
        let tables: BTreeSet<&str> = self
            .entries
            .iter()
            .filter_map(|e| e.attribute(TABLE_KEY))
            .filter(|table| re.is_match(table))
            .collect();
        Ok(tables.into_iter().map(str::to_string).collect())
    }

    /// Entries carrying `tag` as an attribute key.
    pub fn entries_tagged(&self, tag: &str) -> Vec<&RegisterEntry> {
        self.entries
            .iter()
            .filter(|e| e.attributes.contains_key(tag))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_translation() {
        let re = compile_pattern("system.*", true).unwrap();
        assert!(re.is_match("SYSTEM.RESET"));
        assert!(!re.is_match("SYSTEMXRESET"));
        assert!(!re.is_match("DTS.SYSTEM.RESET"));
    }

    #[test]
    fn perl_prefix() {
        let re = compile_pattern("PERL:^SYSTEM\\.RESET$", true).unwrap();
        assert!(re.is_match("SYSTEM.RESET"));
        assert!(!re.is_match("SYSTEM.RESET.UDP_RESET"));
        assert!(matches!(
            compile_pattern("PERL:(unclosed", true),
            Err(Error::BadRegex(_))
        ));
    }
}
