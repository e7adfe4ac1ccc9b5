use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Longest identifier any upstream accepts: series names such as
/// `TREASURY_3MONTH` are the long tail.
const MAX_SYMBOL_LEN: usize = 20;

/// Separators found in share classes (`BRK.B`), suffixes (`RDS-A`) and
/// synthetic series names (`TREASURY_10YEAR`).
const SEPARATORS: [char; 3] = ['.', '-', '_'];

/// Uppercase identifier of one tradable or published series.
///
/// The same type names every series the pipeline moves, which keeps cache
/// keys and store rows comparable across providers:
///
/// | Market | Examples |
/// |--------|----------|
/// | US | `AAPL`, `BRK.B`, `TREASURY_10YEAR` |
/// | BR (B3) | `PETR4`, `HGLG11` |
/// | FOREX | `EURUSD` |
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Trim, uppercase and validate user or upstream input.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();
        check(&normalized)?;
        Ok(Self(normalized))
    }

    /// Wrap a value already known to satisfy [`Symbol::parse`], such as a
    /// series name assembled from validated parts.
    pub(crate) fn from_normalized(value: String) -> Self {
        debug_assert!(check(&value).is_ok(), "invalid symbol '{value}'");
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check(symbol: &str) -> Result<(), ValidationError> {
    let mut chars = symbol.chars();
    let first = chars.next().ok_or(ValidationError::EmptySymbol)?;

    let len = symbol.chars().count();
    if len > MAX_SYMBOL_LEN {
        return Err(ValidationError::SymbolTooLong {
            len,
            max: MAX_SYMBOL_LEN,
        });
    }
    if !first.is_ascii_alphabetic() {
        return Err(ValidationError::SymbolInvalidStart { ch: first });
    }

    match symbol
        .chars()
        .enumerate()
        .find(|(_, ch)| !ch.is_ascii_alphanumeric() && !SEPARATORS.contains(ch))
    {
        Some((index, ch)) => Err(ValidationError::SymbolInvalidChar { ch, index }),
        None => Ok(()),
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}
