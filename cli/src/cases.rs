//! Declarative search cases loaded from TOML.
//!
//! ```toml
//! [[case]]
//! name = "file usages"
//! query = "java.io.File"
//! location = "type"
//!
//! [case.expect]
//! min_results = 1
//! names = ["File"]
//! file_contains = "FileUtils"
//! ```

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use probe_lsp::types::{contains_symbol, symbol_in_file};
use probe_lsp::{
    AnalysisMode, AnalyzerClient, AnnotationQuery, LocationKind, SymbolInformation, SymbolSearch,
};

#[derive(Debug, Deserialize)]
struct CaseFile {
    #[serde(default, rename = "case")]
    cases: Vec<Case>,
}

#[derive(Debug, Deserialize)]
pub struct Case {
    pub name: String,
    #[serde(default = "default_project")]
    pub project: String,
    pub query: String,
    #[serde(default = "default_location")]
    pub location: LocationKind,
    #[serde(default)]
    pub mode: AnalysisMode,
    #[serde(default)]
    pub included_paths: Vec<String>,
    pub annotation: Option<AnnotationQuery>,
    #[serde(default)]
    pub expect: Expectations,
}

fn default_project() -> String {
    "java".to_string()
}

fn default_location() -> LocationKind {
    LocationKind::Default
}

#[derive(Debug, Default, Deserialize)]
pub struct Expectations {
    pub min_results: Option<usize>,
    pub max_results: Option<usize>,
    /// Every name must appear among the results.
    #[serde(default)]
    pub names: Vec<String>,
    /// Matches must come from a file whose URI contains this fragment. With
    /// `names`, each named symbol must; otherwise any result will do.
    pub file_contains: Option<String>,
    /// Some result must have this container name.
    pub container: Option<String>,
}

impl Case {
    fn search(&self) -> SymbolSearch {
        let mut search = SymbolSearch::new(&self.project, &self.query, self.location, self.mode)
            .included_paths(self.included_paths.iter().cloned());
        if let Some(annotation) = &self.annotation {
            search = search.annotation(annotation.clone());
        }
        search
    }
}

pub fn load(path: &Path) -> Result<Vec<Case>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading case file {}", path.display()))?;
    parse(&content).with_context(|| format!("parsing case file {}", path.display()))
}

fn parse(content: &str) -> Result<Vec<Case>> {
    let file: CaseFile = toml::from_str(content)?;
    if file.cases.is_empty() {
        anyhow::bail!("no [[case]] entries");
    }
    Ok(file.cases)
}

/// Every unmet expectation, as a human-readable reason.
pub fn check(expect: &Expectations, symbols: &[SymbolInformation]) -> Vec<String> {
    let mut failures = Vec::new();
    let found = symbols.len();

    if let Some(min) = expect.min_results
        && found < min
    {
        failures.push(format!("expected at least {min} results, got {found}"));
    }
    if let Some(max) = expect.max_results
        && found > max
    {
        failures.push(format!("expected at most {max} results, got {found}"));
    }
    for name in &expect.names {
        if !contains_symbol(symbols, name, None) {
            failures.push(format!("missing symbol `{name}`"));
        }
    }
    if let Some(fragment) = &expect.file_contains {
        if expect.names.is_empty() {
            if !symbols.iter().any(|s| s.location.uri.contains(fragment.as_str())) {
                failures.push(format!("no result in a file matching `{fragment}`"));
            }
        } else {
            for name in &expect.names {
                if contains_symbol(symbols, name, None) && !symbol_in_file(symbols, name, fragment) {
                    failures.push(format!("`{name}` not found in a file matching `{fragment}`"));
                }
            }
        }
    }
    if let Some(container) = &expect.container
        && !symbols.iter().any(|s| &s.container_name == container)
    {
        failures.push(format!("no result inside `{container}`"));
    }

    failures
}

#[derive(Debug)]
pub struct CaseReport {
    pub name: String,
    pub found: usize,
    pub failures: Vec<String>,
}

impl CaseReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Summary {
    pub reports: Vec<CaseReport>,
}

impl Summary {
    pub fn all_passed(&self) -> bool {
        self.reports.iter().all(CaseReport::passed)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.reports {
            if report.passed() {
                writeln!(f, "PASS  {} ({} results)", report.name, report.found)?;
            } else {
                writeln!(f, "FAIL  {} ({} results)", report.name, report.found)?;
                for failure in &report.failures {
                    writeln!(f, "      - {failure}")?;
                }
            }
        }
        let passed = self.reports.iter().filter(|r| r.passed()).count();
        writeln!(f, "{passed}/{} cases passed", self.reports.len())
    }
}

/// Run every case in order. A failed search fails its case only.
pub async fn run_all(client: &AnalyzerClient, cases: &[Case]) -> Summary {
    let mut summary = Summary::default();
    for case in cases {
        let report = match client.search_symbols(&case.search()).await {
            Ok(symbols) => CaseReport {
                name: case.name.clone(),
                found: symbols.len(),
                failures: check(&case.expect, &symbols),
            },
            Err(e) => {
                tracing::warn!(case = %case.name, "Search failed: {e}");
                CaseReport {
                    name: case.name.clone(),
                    found: 0,
                    failures: vec![format!("search failed: {e}")],
                }
            }
        };
        summary.reports.push(report);
    }
    summary
}
