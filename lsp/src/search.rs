//! Typed arguments for the analyzer bundle's rule-entry search command.
//!
//! The bundle takes a single JSON object argument. Location kinds travel as
//! their decimal code rendered as a string; optional fields are omitted rather
//! than sent as `null`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Command id of the bundle's symbol search entry point.
pub const RULE_ENTRY_COMMAND: &str = "io.konveyor.tackle.ruleEntry";

/// Command id of the bundle's liveness command. Answers `"Hello World"`.
pub const SAMPLE_COMMAND: &str = "io.konveyor.tackle.samplecommand";

/// Where in the code a search pattern is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKind {
    Default,
    Inheritance,
    MethodCall,
    ConstructorCall,
    Annotation,
    ImplementsType,
    EnumConstant,
    ReturnType,
    Import,
    VariableDeclaration,
    Type,
    PackageDeclaration,
    FieldDeclaration,
    MethodDeclaration,
    ClassDeclaration,
}

static LOCATION_KINDS: [(LocationKind, &str); 15] = [
    (LocationKind::Default, "default"),
    (LocationKind::Inheritance, "inheritance"),
    (LocationKind::MethodCall, "method-call"),
    (LocationKind::ConstructorCall, "constructor-call"),
    (LocationKind::Annotation, "annotation"),
    (LocationKind::ImplementsType, "implements-type"),
    (LocationKind::EnumConstant, "enum-constant"),
    (LocationKind::ReturnType, "return-type"),
    (LocationKind::Import, "import"),
    (LocationKind::VariableDeclaration, "variable-declaration"),
    (LocationKind::Type, "type"),
    (LocationKind::PackageDeclaration, "package-declaration"),
    (LocationKind::FieldDeclaration, "field-declaration"),
    (LocationKind::MethodDeclaration, "method-declaration"),
    (LocationKind::ClassDeclaration, "class-declaration"),
];

impl LocationKind {
    /// Integer code understood by the bundle.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        LOCATION_KINDS.get(usize::from(code)).map(|(kind, _)| *kind)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        LOCATION_KINDS[usize::from(self.code())].1
    }

    pub fn all() -> impl Iterator<Item = Self> {
        LOCATION_KINDS.iter().map(|(kind, _)| *kind)
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown location `{0}` (expected 0-14 or a name such as `method-call`)")]
pub struct UnknownLocation(pub String);

impl FromStr for LocationKind {
    type Err = UnknownLocation;

    /// Accepts the numeric code or the kebab-case name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code).ok_or_else(|| UnknownLocation(s.to_string()));
        }
        LOCATION_KINDS
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(kind, _)| *kind)
            .ok_or_else(|| UnknownLocation(s.to_string()))
    }
}

impl Serialize for LocationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code().to_string())
    }
}

impl<'de> Deserialize<'de> for LocationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(u8),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Code(code) => Self::from_code(code)
                .ok_or_else(|| serde::de::Error::custom(UnknownLocation(code.to_string()))),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Whether dependency sources are analyzed alongside the project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisMode {
    #[default]
    #[serde(rename = "source-only")]
    SourceOnly,
    #[serde(rename = "full")]
    Full,
}

impl AnalysisMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceOnly => "source-only",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "source-only" => Ok(Self::SourceOnly),
            "full" => Ok(Self::Full),
            other => Err(format!(
                "unknown analysis mode `{other}` (expected `source-only` or `full`)"
            )),
        }
    }
}

/// One `name = value` constraint on an annotation's elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationElement {
    pub name: String,
    pub value: String,
}

/// Narrows a search to matches carrying a specific annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationQuery {
    pub pattern: String,
    #[serde(default)]
    pub elements: Vec<AnnotationElement>,
}

impl AnnotationQuery {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            elements: Vec::new(),
        }
    }

    #[must_use]
    pub fn element(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.elements.push(AnnotationElement {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// The argument object of [`RULE_ENTRY_COMMAND`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSearch {
    pub project: String,
    pub query: String,
    pub location: LocationKind,
    pub analysis_mode: AnalysisMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_query: Option<AnnotationQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_open_source_libraries: Option<bool>,
}

impl SymbolSearch {
    pub fn new(
        project: impl Into<String>,
        query: impl Into<String>,
        location: LocationKind,
        analysis_mode: AnalysisMode,
    ) -> Self {
        Self {
            project: project.into(),
            query: query.into(),
            location,
            analysis_mode,
            included_paths: None,
            annotation_query: None,
            include_open_source_libraries: None,
        }
    }

    /// Restrict matches to these project-relative paths. An empty list is
    /// treated as "no restriction" and omitted.
    #[must_use]
    pub fn included_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        self.included_paths = (!paths.is_empty()).then_some(paths);
        self
    }

    #[must_use]
    pub fn annotation(mut self, query: AnnotationQuery) -> Self {
        self.annotation_query = Some(query);
        self
    }

    #[must_use]
    pub fn include_open_source_libraries(mut self, include: bool) -> Self {
        self.include_open_source_libraries = Some(include);
        self
    }
}
