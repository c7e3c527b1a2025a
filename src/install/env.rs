// src/install/env.rs

//! Per-node build environment
//!
//! A [`BuildEnvironment`] is an immutable snapshot: the variables handed to
//! every subprocess of one install plus the values of the `%(...)s`
//! placeholders in step arguments. The process environment of the engine is
//! never read or modified.
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `%(name)s`, `%(version)s` | formula name and version |
//! | `%(prefix)s` | staged install prefix (what `make install` writes to) |
//! | `%(keg)s` | final keg path after promotion |
//! | `%(destdir)s` | `DESTDIR` root for builds configured with `--prefix=%(keg)s` |
//! | `%(etc)s` | shared configuration directory |
//! | `%(jobs)s` | parallel job count |
//! | `%(source)s` | unpacked source root |
//! | `%(opt:<dep>)s` | opt link of a dependency |
//!
//! Unknown placeholders are left untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::formula::EnvMode;
use crate::resolve::ResolvedNode;

/// Immutable environment snapshot for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
    placeholders: BTreeMap<String, String>,
    opt_dir: PathBuf,
    step_timeout: Duration,
    keep_failed_staging: bool,
}

impl BuildEnvironment {
    /// Snapshot for `node` under the layout of `config`
    ///
    /// Placeholders that depend on the staging area (`prefix`, `destdir`,
    /// `source`) are filled in by [`BuildEnvironment::bind`].
    pub fn assemble(node: &ResolvedNode, config: &EngineConfig) -> Self {
        let mut placeholders = BTreeMap::new();
        placeholders.insert("name".to_string(), node.name().to_string());
        placeholders.insert("version".to_string(), node.version().to_string());
        placeholders.insert(
            "keg".to_string(),
            config.keg_path(node.name(), node.version()).display().to_string(),
        );
        placeholders.insert("etc".to_string(), config.etc_dir().display().to_string());
        placeholders.insert("jobs".to_string(), config.jobs.to_string());

        // Dependency bin directories come first on PATH
        let mut path_entries: Vec<String> = node
            .dependencies()
            .keys()
            .map(|dep| config.opt_path(dep).join("bin").display().to_string())
            .collect();
        path_entries.push(config.base_path.clone());

        let mut vars = BTreeMap::new();
        vars.insert("PATH".to_string(), path_entries.join(":"));
        vars.insert("MAKEFLAGS".to_string(), format!("-j{}", config.jobs));
        vars.insert("LC_ALL".to_string(), "C".to_string());

        for edit in node.active_env() {
            match edit.mode {
                EnvMode::Set => {
                    vars.insert(edit.name.clone(), edit.value.clone());
                }
                EnvMode::Append => {
                    let value = match vars.get(&edit.name) {
                        Some(existing) if !existing.is_empty() => {
                            format!("{} {}", existing, edit.value)
                        }
                        _ => edit.value.clone(),
                    };
                    vars.insert(edit.name.clone(), value);
                }
            }
        }

        Self {
            vars,
            placeholders,
            opt_dir: config.opt_dir(),
            step_timeout: config.step_timeout,
            keep_failed_staging: config.keep_failed_staging,
        }
    }

    /// New snapshot with staging paths filled in and placeholders in
    /// variable values expanded
    pub fn bind(&self, prefix: &Path, destdir: &Path, source: &Path) -> Self {
        let mut bound = self.clone();
        bound
            .placeholders
            .insert("prefix".to_string(), prefix.display().to_string());
        bound
            .placeholders
            .insert("destdir".to_string(), destdir.display().to_string());
        bound
            .placeholders
            .insert("source".to_string(), source.display().to_string());
        bound.vars.insert("HOME".to_string(), source.display().to_string());

        let vars: BTreeMap<String, String> = bound
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), bound.substitute(v)))
            .collect();
        bound.vars = vars;
        bound
    }

    /// Expand `%(key)s` placeholders in `text`
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("%(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find(")s") {
                Some(end) => {
                    let key = &after[..end];
                    match self.lookup(key) {
                        Some(value) => out.push_str(&value),
                        None => out.push_str(&rest[start..start + 2 + end + 2]),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(dep) = key.strip_prefix("opt:") {
            return (!dep.is_empty()).then(|| self.opt_dir.join(dep).display().to_string());
        }
        self.placeholders.get(key).cloned()
    }

    /// Variables handed to subprocesses
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    pub fn keep_failed_staging(&self) -> bool {
        self.keep_failed_staging
    }
}
