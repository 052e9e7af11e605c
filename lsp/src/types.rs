//! Symbol records returned by the analyzer bundle.
//!
//! These mirror LSP `SymbolInformation`. Only the fields the bundle fills in
//! are modelled; unknown fields are ignored on decode.

use std::fmt;

use serde::{Deserialize, Serialize};

/// LSP symbol kind. Kept as the raw integer so unknown kinds still decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolKind(pub u32);

impl SymbolKind {
    pub const FILE: Self = Self(1);
    pub const MODULE: Self = Self(2);
    pub const NAMESPACE: Self = Self(3);
    pub const PACKAGE: Self = Self(4);
    pub const CLASS: Self = Self(5);
    pub const METHOD: Self = Self(6);
    pub const PROPERTY: Self = Self(7);
    pub const FIELD: Self = Self(8);
    pub const CONSTRUCTOR: Self = Self(9);
    pub const ENUM: Self = Self(10);
    pub const INTERFACE: Self = Self(11);
    pub const FUNCTION: Self = Self(12);
    pub const VARIABLE: Self = Self(13);
    pub const CONSTANT: Self = Self(14);
    pub const ENUM_MEMBER: Self = Self(22);

    #[must_use]
    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "file",
            2 => "module",
            3 => "namespace",
            4 => "package",
            5 => "class",
            6 => "method",
            7 => "property",
            8 => "field",
            9 => "constructor",
            10 => "enum",
            11 => "interface",
            12 => "function",
            13 => "variable",
            14 => "constant",
            22 => "enum-member",
            _ => "other",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label(), self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// 0-indexed line.
    pub line: u32,
    /// 0-indexed UTF-16 column.
    pub character: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    #[serde(default)]
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInformation {
    pub name: String,
    #[serde(default)]
    pub container_name: String,
    pub kind: SymbolKind,
    pub location: Location,
}

impl SymbolInformation {
    /// Format as `name [kind] in container at uri:line` (1-indexed line).
    #[must_use]
    pub fn display_line(&self) -> String {
        format!(
            "{} [{}] in {} at {}:{}",
            self.name,
            self.kind.label(),
            if self.container_name.is_empty() {
                "-"
            } else {
                &self.container_name
            },
            self.location.uri,
            self.location.range.start.line.saturating_add(1),
        )
    }
}

/// Whether any symbol is named `name` (and has `kind`, when given).
#[must_use]
pub fn contains_symbol(symbols: &[SymbolInformation], name: &str, kind: Option<SymbolKind>) -> bool {
    symbols
        .iter()
        .any(|s| s.name == name && kind.is_none_or(|k| s.kind == k))
}

/// Whether a symbol named `name` lives in a file whose URI contains `file_fragment`.
#[must_use]
pub fn symbol_in_file(symbols: &[SymbolInformation], name: &str, file_fragment: &str) -> bool {
    symbols
        .iter()
        .any(|s| s.name == name && s.location.uri.contains(file_fragment))
}
