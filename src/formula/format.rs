// src/formula/format.rs

//! Formula definitions
//!
//! A [`Formula`] is immutable once constructed. Both construction paths,
//! [`FormulaBuilder::build`] and TOML parsing, run the same validation, so a
//! `Formula` value in hand always satisfies the load-time invariants:
//! every guard names a declared option and no formula depends on itself.

use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};

use crate::error::{Error, Result};
use crate::hash::Checksum;

/// Condition attached to a patch, install step, argument group, environment
/// edit or caveat
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Guard {
    #[default]
    Always,
    /// Active iff the option is selected
    When(String),
    /// Active iff the option is not selected
    Unless(String),
}

impl Guard {
    /// Evaluate against a concrete option selection
    pub fn is_active(&self, selected: &BTreeSet<String>) -> bool {
        match self {
            Self::Always => true,
            Self::When(option) => selected.contains(option),
            Self::Unless(option) => !selected.contains(option),
        }
    }

    /// The option this guard refers to, if any
    pub fn option(&self) -> Option<&str> {
        match self {
            Self::Always => None,
            Self::When(option) | Self::Unless(option) => Some(option),
        }
    }

    fn from_fields(when: Option<String>, unless: Option<String>) -> std::result::Result<Self, String> {
        match (when, unless) {
            (None, None) => Ok(Self::Always),
            (Some(w), None) => Ok(Self::When(w)),
            (None, Some(u)) => Ok(Self::Unless(u)),
            (Some(w), Some(u)) => Err(format!("guard sets both when='{w}' and unless='{u}'")),
        }
    }
}

/// A named boolean build switch, off unless selected
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct FormulaOption {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// How a dependency edge participates in a build
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// Needed to build and at runtime
    Required,
    /// Needed only when building from source
    BuildOnly,
    /// Unconditional optional dependency, always pulled in
    Optional,
    /// Active only when `option` is selected
    ConditionalOnOption { option: String, build_only: bool },
}

impl DependencyKind {
    /// Whether the edge only matters for source builds
    pub fn is_build_only(&self) -> bool {
        match self {
            Self::BuildOnly => true,
            Self::ConditionalOnOption { build_only, .. } => *build_only,
            Self::Required | Self::Optional => false,
        }
    }

    /// The guarding option, for conditional edges
    pub fn option(&self) -> Option<&str> {
        match self {
            Self::ConditionalOnOption { option, .. } => Some(option),
            _ => None,
        }
    }
}

/// One declared dependency edge
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    pub target: String,
    pub kind: DependencyKind,
}

impl DependencySpec {
    pub fn new(target: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            target: target.into(),
            kind,
        }
    }
}

/// Source artifact reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// URL (`https://`, `file://`) or local path
    pub url: String,
    pub checksum: Checksum,
}

impl SourceRef {
    /// File name of the artifact, used to detect the archive format
    pub fn file_name(&self) -> &str {
        self.url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("source")
    }
}

/// A patch applied to the unpacked source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRef {
    /// URL or local path of the patch file
    pub source: String,
    /// Required for remote patches to be verified
    pub checksum: Option<Checksum>,
    /// Leading path components to strip (`patch -p`)
    pub strip: u32,
    pub guard: Guard,
}

impl PatchRef {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            checksum: None,
            strip: 1,
            guard: Guard::Always,
        }
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_strip(mut self, strip: u32) -> Self {
        self.strip = strip;
        self
    }

    pub fn when(mut self, option: impl Into<String>) -> Self {
        self.guard = Guard::When(option.into());
        self
    }

    pub fn is_remote(&self) -> bool {
        self.source.starts_with("http://") || self.source.starts_with("https://")
    }
}

/// How an environment edit combines with an existing value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvMode {
    #[default]
    Set,
    /// Space-separated append, as for `CPPFLAGS`/`LDFLAGS`
    Append,
}

/// An environment variable assignment for the install steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEdit {
    pub name: String,
    pub value: String,
    pub mode: EnvMode,
    pub guard: Guard,
}

impl EnvEdit {
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            mode: EnvMode::Set,
            guard: Guard::Always,
        }
    }

    pub fn append(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            mode: EnvMode::Append,
            ..Self::set(name, value)
        }
    }

    pub fn when(mut self, option: impl Into<String>) -> Self {
        self.guard = Guard::When(option.into());
        self
    }
}

/// A group of arguments appended to a step when its guard holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalArgs {
    pub args: Vec<String>,
    pub guard: Guard,
}

/// Structured command descriptor for one configure/build/install step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    pub program: String,
    pub args: Vec<String>,
    pub extra_args: Vec<ConditionalArgs>,
    /// Working directory relative to the unpacked source tree
    pub workdir: Option<String>,
    pub guard: Guard,
}

impl InstallStep {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            extra_args: Vec::new(),
            workdir: None,
            guard: Guard::Always,
        }
    }

    pub fn when(mut self, option: impl Into<String>) -> Self {
        self.guard = Guard::When(option.into());
        self
    }

    pub fn unless(mut self, option: impl Into<String>) -> Self {
        self.guard = Guard::Unless(option.into());
        self
    }

    pub fn in_dir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Append `args` when `guard` holds
    pub fn with_args<I, S>(mut self, guard: Guard, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.push(ConditionalArgs {
            args: args.into_iter().map(Into::into).collect(),
            guard,
        });
        self
    }

    /// Arguments in declared order for a concrete selection
    pub fn active_args<'a>(&'a self, selected: &BTreeSet<String>) -> Vec<&'a str> {
        let mut args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        for group in &self.extra_args {
            if group.guard.is_active(selected) {
                args.extend(group.args.iter().map(String::as_str));
            }
        }
        args
    }
}

/// Ordered install steps plus their environment edits
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallProcedure {
    pub env: Vec<EnvEdit>,
    pub steps: Vec<InstallStep>,
}

/// Post-install notes shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caveats {
    pub text: String,
    pub guard: Guard,
}

/// A validated, immutable package definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    name: String,
    version: String,
    description: Option<String>,
    homepage: Option<String>,
    source: SourceRef,
    dependencies: Vec<DependencySpec>,
    options: Vec<FormulaOption>,
    patches: Vec<PatchRef>,
    install: InstallProcedure,
    caveats: Option<Caveats>,
}

impl Formula {
    /// Start building a formula programmatically
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> FormulaBuilder {
        FormulaBuilder::new(name, version)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn homepage(&self) -> Option<&str> {
        self.homepage.as_deref()
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn dependencies(&self) -> &[DependencySpec] {
        &self.dependencies
    }

    pub fn options(&self) -> &[FormulaOption] {
        &self.options
    }

    pub fn patches(&self) -> &[PatchRef] {
        &self.patches
    }

    pub fn install(&self) -> &InstallProcedure {
        &self.install
    }

    pub fn caveats(&self) -> Option<&Caveats> {
        self.caveats.as_ref()
    }

    /// Check whether an option is declared on this formula
    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|o| o.name == name)
    }

    /// `name-version`, used for staging and log prefixes
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(Error::invalid_formula(&self.name, reason));

        if self.name.is_empty() {
            return Err(Error::invalid_formula("<unnamed>", "name cannot be empty"));
        }
        if self.name.contains('/') || self.name.chars().any(char::is_whitespace) {
            return invalid("name may not contain '/' or whitespace".to_string());
        }
        if self.version.is_empty() {
            return invalid("version cannot be empty".to_string());
        }

        let mut declared = HashSet::new();
        for option in &self.options {
            if option.name.is_empty() {
                return invalid("option name cannot be empty".to_string());
            }
            if !declared.insert(option.name.as_str()) {
                return invalid(format!("option '{}' declared twice", option.name));
            }
        }

        let check_guard = |guard: &Guard, what: &str| -> Result<()> {
            match guard.option() {
                Some(option) if !declared.contains(option) => Err(Error::invalid_formula(
                    &self.name,
                    format!("{what} references undeclared option '{option}'"),
                )),
                _ => Ok(()),
            }
        };

        for dep in &self.dependencies {
            if dep.target.is_empty() {
                return invalid("dependency name cannot be empty".to_string());
            }
            if dep.target == self.name {
                return invalid("formula cannot depend on itself".to_string());
            }
            if let Some(option) = dep.kind.option()
                && !declared.contains(option)
            {
                return invalid(format!(
                    "dependency '{}' references undeclared option '{option}'",
                    dep.target
                ));
            }
        }

        for patch in &self.patches {
            if patch.source.is_empty() {
                return invalid("patch source cannot be empty".to_string());
            }
            check_guard(&patch.guard, &format!("patch '{}'", patch.source))?;
        }

        for edit in &self.install.env {
            if edit.name.is_empty() {
                return invalid("environment variable name cannot be empty".to_string());
            }
            check_guard(&edit.guard, &format!("environment edit '{}'", edit.name))?;
        }

        for step in &self.install.steps {
            if step.program.is_empty() {
                return invalid("install step program cannot be empty".to_string());
            }
            let what = format!("install step '{}'", step.program);
            check_guard(&step.guard, &what)?;
            for group in &step.extra_args {
                check_guard(&group.guard, &what)?;
            }
        }

        if let Some(caveats) = &self.caveats {
            check_guard(&caveats.guard, "caveats")?;
        }

        Ok(())
    }
}

/// Programmatic constructor for [`Formula`]
#[derive(Debug, Clone)]
pub struct FormulaBuilder {
    name: String,
    version: String,
    description: Option<String>,
    homepage: Option<String>,
    source: Option<(String, String)>,
    dependencies: Vec<DependencySpec>,
    options: Vec<FormulaOption>,
    patches: Vec<PatchRef>,
    install: InstallProcedure,
    caveats: Option<Caveats>,
}

impl FormulaBuilder {
    fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            homepage: None,
            source: None,
            dependencies: Vec::new(),
            options: Vec::new(),
            patches: Vec::new(),
            install: InstallProcedure::default(),
            caveats: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn homepage(mut self, homepage: impl Into<String>) -> Self {
        self.homepage = Some(homepage.into());
        self
    }

    /// Set the source URL and its prefixed checksum (`sha256:...`)
    pub fn source(mut self, url: impl Into<String>, checksum: impl Into<String>) -> Self {
        self.source = Some((url.into(), checksum.into()));
        self
    }

    pub fn option(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.options.push(FormulaOption {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    pub fn depends_on(mut self, target: impl Into<String>, kind: DependencyKind) -> Self {
        self.dependencies.push(DependencySpec::new(target, kind));
        self
    }

    pub fn patch(mut self, patch: PatchRef) -> Self {
        self.patches.push(patch);
        self
    }

    pub fn env(mut self, edit: EnvEdit) -> Self {
        self.install.env.push(edit);
        self
    }

    pub fn step(mut self, step: InstallStep) -> Self {
        self.install.steps.push(step);
        self
    }

    pub fn caveats(mut self, text: impl Into<String>, guard: Guard) -> Self {
        self.caveats = Some(Caveats {
            text: text.into(),
            guard,
        });
        self
    }

    /// Validate and freeze the formula
    pub fn build(self) -> Result<Formula> {
        let (url, checksum) = self
            .source
            .ok_or_else(|| Error::invalid_formula(&self.name, "missing source"))?;
        let checksum = Checksum::parse(&checksum)
            .map_err(|e| Error::invalid_formula(&self.name, format!("source checksum: {e}")))?;

        let formula = Formula {
            name: self.name,
            version: self.version,
            description: self.description,
            homepage: self.homepage,
            source: SourceRef { url, checksum },
            dependencies: self.dependencies,
            options: self.options,
            patches: self.patches,
            install: self.install,
            caveats: self.caveats,
        };
        formula.validate()?;
        Ok(formula)
    }
}

// =============================================================================
// TOML document layout
// =============================================================================

/// Raw formula file as deserialized from TOML
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FormulaDocument {
    formula: MetadataSection,
    source: SourceSection,
    #[serde(default)]
    options: Vec<FormulaOption>,
    #[serde(default)]
    dependencies: Vec<DependencyEntry>,
    #[serde(default)]
    patches: Vec<PatchEntry>,
    #[serde(default)]
    install: InstallSection,
    #[serde(default)]
    caveats: Option<CaveatsEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetadataSection {
    name: String,
    version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceSection {
    url: String,
    checksum: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DependencyKindEntry {
    #[default]
    Required,
    Build,
    Optional,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DependencyEntry {
    name: String,
    #[serde(default)]
    kind: DependencyKindEntry,
    /// Makes the edge conditional on this option
    #[serde(default)]
    when: Option<String>,
}

fn default_strip() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchEntry {
    url: String,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default = "default_strip")]
    strip: u32,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    unless: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstallSection {
    #[serde(default)]
    env: Vec<EnvEntry>,
    #[serde(default)]
    steps: Vec<StepEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnvEntry {
    name: String,
    value: String,
    #[serde(default)]
    mode: EnvMode,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    unless: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArgsEntry {
    args: Vec<String>,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    unless: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepEntry {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    extra_args: Vec<ArgsEntry>,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    unless: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CaveatsEntry {
    text: String,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    unless: Option<String>,
}

impl TryFrom<FormulaDocument> for Formula {
    type Error = Error;

    fn try_from(doc: FormulaDocument) -> Result<Self> {
        let name = doc.formula.name;
        let guard = |when, unless| {
            Guard::from_fields(when, unless).map_err(|reason| Error::invalid_formula(&name, reason))
        };

        let dependencies = doc
            .dependencies
            .into_iter()
            .map(|entry| {
                let kind = match (entry.when, entry.kind) {
                    (Some(option), kind) => DependencyKind::ConditionalOnOption {
                        option,
                        build_only: matches!(kind, DependencyKindEntry::Build),
                    },
                    (None, DependencyKindEntry::Required) => DependencyKind::Required,
                    (None, DependencyKindEntry::Build) => DependencyKind::BuildOnly,
                    (None, DependencyKindEntry::Optional) => DependencyKind::Optional,
                };
                DependencySpec::new(entry.name, kind)
            })
            .collect();

        let mut patches = Vec::with_capacity(doc.patches.len());
        for entry in doc.patches {
            let checksum = entry
                .checksum
                .as_deref()
                .map(Checksum::parse)
                .transpose()
                .map_err(|e| Error::invalid_formula(&name, format!("patch '{}': {e}", entry.url)))?;
            patches.push(PatchRef {
                source: entry.url,
                checksum,
                strip: entry.strip,
                guard: guard(entry.when, entry.unless)?,
            });
        }

        let mut env = Vec::with_capacity(doc.install.env.len());
        for entry in doc.install.env {
            env.push(EnvEdit {
                name: entry.name,
                value: entry.value,
                mode: entry.mode,
                guard: guard(entry.when, entry.unless)?,
            });
        }

        let mut steps = Vec::with_capacity(doc.install.steps.len());
        for entry in doc.install.steps {
            let mut extra_args = Vec::with_capacity(entry.extra_args.len());
            for group in entry.extra_args {
                extra_args.push(ConditionalArgs {
                    args: group.args,
                    guard: guard(group.when, group.unless)?,
                });
            }
            steps.push(InstallStep {
                program: entry.program,
                args: entry.args,
                extra_args,
                workdir: entry.workdir,
                guard: guard(entry.when, entry.unless)?,
            });
        }

        let caveats = match doc.caveats {
            Some(entry) => Some(Caveats {
                text: entry.text,
                guard: guard(entry.when, entry.unless)?,
            }),
            None => None,
        };

        let checksum = Checksum::parse(&doc.source.checksum)
            .map_err(|e| Error::invalid_formula(&name, format!("source checksum: {e}")))?;

        let formula = Formula {
            version: doc.formula.version,
            description: doc.formula.description,
            homepage: doc.formula.homepage,
            source: SourceRef {
                url: doc.source.url,
                checksum,
            },
            dependencies,
            options: doc.options,
            patches,
            install: InstallProcedure { env, steps },
            caveats,
            name,
        };
        formula.validate()?;
        Ok(formula)
    }
}
