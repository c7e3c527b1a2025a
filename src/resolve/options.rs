// src/resolve/options.rs

//! Option resolution
//!
//! Turns a formula plus a selection of option names into a [`ResolvedNode`]:
//! the concrete dependency set that applies to this build. Guards on
//! dependencies are evaluated here, once. Guards on patches, steps and
//! environment edits are evaluated later against [`ResolvedNode::selected`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::formula::{
    Caveats, DependencyKind, EnvEdit, Formula, InstallStep, PatchRef,
};

/// Option names chosen by the caller
pub type OptionSelection = BTreeSet<String>;

/// Why the graph is being resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResolveIntent {
    /// Building from source: build-only edges apply
    #[default]
    Build,
    /// Pouring a prebuilt keg: build-only edges are dropped
    InstallFromCache,
}

/// A formula paired with the concrete choices that apply to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    formula: Arc<Formula>,
    selected: OptionSelection,
    ignored_options: BTreeSet<String>,
    dependencies: BTreeMap<String, DependencyKind>,
}

impl ResolvedNode {
    pub fn name(&self) -> &str {
        self.formula.name()
    }

    pub fn version(&self) -> &str {
        self.formula.version()
    }

    pub fn formula(&self) -> &Arc<Formula> {
        &self.formula
    }

    /// Options declared on this formula that were selected
    pub fn selected(&self) -> &OptionSelection {
        &self.selected
    }

    /// Selected names this formula does not declare
    pub fn ignored_options(&self) -> &BTreeSet<String> {
        &self.ignored_options
    }

    /// Active dependency edges, target name to kind
    pub fn dependencies(&self) -> &BTreeMap<String, DependencyKind> {
        &self.dependencies
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn active_patches(&self) -> impl Iterator<Item = &PatchRef> {
        self.formula
            .patches()
            .iter()
            .filter(|p| p.guard.is_active(&self.selected))
    }

    pub fn active_steps(&self) -> impl Iterator<Item = &InstallStep> {
        self.formula
            .install()
            .steps
            .iter()
            .filter(|s| s.guard.is_active(&self.selected))
    }

    pub fn active_env(&self) -> impl Iterator<Item = &EnvEdit> {
        self.formula
            .install()
            .env
            .iter()
            .filter(|e| e.guard.is_active(&self.selected))
    }

    pub fn active_caveats(&self) -> Option<&Caveats> {
        self.formula
            .caveats()
            .filter(|c| c.guard.is_active(&self.selected))
    }
}

/// Evaluates option guards on a single formula
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionResolver {
    intent: ResolveIntent,
}

impl OptionResolver {
    pub fn new(intent: ResolveIntent) -> Self {
        Self { intent }
    }

    pub fn intent(&self) -> ResolveIntent {
        self.intent
    }

    /// Resolve `formula` against `selected_options`
    ///
    /// Names the formula does not declare are ignored for it and recorded in
    /// [`ResolvedNode::ignored_options`].
    pub fn resolve(&self, formula: &Arc<Formula>, selected_options: &OptionSelection) -> ResolvedNode {
        let (selected, ignored_options): (BTreeSet<String>, BTreeSet<String>) = selected_options
            .iter()
            .cloned()
            .partition(|name| formula.has_option(name));

        if !ignored_options.is_empty() {
            debug!(
                "{}: ignoring undeclared options {:?}",
                formula.name(),
                ignored_options
            );
        }

        let mut dependencies = BTreeMap::new();
        for dep in formula.dependencies() {
            let active = match &dep.kind {
                DependencyKind::Required | DependencyKind::Optional => true,
                DependencyKind::BuildOnly => self.intent == ResolveIntent::Build,
                DependencyKind::ConditionalOnOption { option, build_only } => {
                    selected.contains(option)
                        && (!build_only || self.intent == ResolveIntent::Build)
                }
            };

            if !active {
                debug!("{}: dropping inactive edge to {}", formula.name(), dep.target);
                continue;
            }

            // First active declaration wins
            if !dependencies.contains_key(&dep.target) {
                debug!("{}: edge to {} ({:?})", formula.name(), dep.target, dep.kind);
                dependencies.insert(dep.target.clone(), dep.kind.clone());
            }
        }

        ResolvedNode {
            formula: Arc::clone(formula),
            selected,
            ignored_options,
            dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Guard, InstallStep, PatchRef};

    const CHECKSUM: &str =
        "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

    fn openssh() -> Arc<Formula> {
        Arc::new(
            Formula::builder("openssh", "6.5p1")
                .source("openssh-6.5p1.tar.gz", CHECKSUM)
                .option("with-brewed-openssl", "Use the openssl formula")
                .option("with-keychain-support", "Keychain support")
                .option("with-ldns", "ldns support")
                .depends_on(
                    "autoconf",
                    DependencyKind::ConditionalOnOption {
                        option: "with-keychain-support".into(),
                        build_only: true,
                    },
                )
                .depends_on(
                    "openssl",
                    DependencyKind::ConditionalOnOption {
                        option: "with-brewed-openssl".into(),
                        build_only: false,
                    },
                )
                .depends_on("ldns", DependencyKind::Optional)
                .depends_on(
                    "pkg-config",
                    DependencyKind::ConditionalOnOption {
                        option: "with-ldns".into(),
                        build_only: true,
                    },
                )
                .depends_on("zlib", DependencyKind::Required)
                .depends_on("make", DependencyKind::BuildOnly)
                .patch(PatchRef::new("keychain.patch").when("with-keychain-support"))
                .step(InstallStep::new("autoreconf", ["-i"]).when("with-keychain-support"))
                .step(InstallStep::new("make", ["install"]))
                .caveats("launchd notes", Guard::When("with-keychain-support".into()))
                .build()
                .unwrap(),
        )
    }

    fn selection(names: &[&str]) -> OptionSelection {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn targets(node: &ResolvedNode) -> Vec<&str> {
        node.dependencies().keys().map(String::as_str).collect()
    }

    #[test]
    fn test_no_options_selected() {
        let node = OptionResolver::default().resolve(&openssh(), &selection(&[]));
        assert_eq!(targets(&node), vec!["ldns", "make", "zlib"]);
        assert!(node.selected().is_empty());
        assert_eq!(node.active_patches().count(), 0);
        assert_eq!(node.active_steps().count(), 1);
        assert!(node.active_caveats().is_none());
    }

    #[test]
    fn test_conditional_edges_follow_selection() {
        let node = OptionResolver::default().resolve(
            &openssh(),
            &selection(&["with-brewed-openssl", "with-keychain-support"]),
        );
        assert_eq!(
            targets(&node),
            vec!["autoconf", "ldns", "make", "openssl", "zlib"]
        );
        assert_eq!(node.active_patches().count(), 1);
        assert_eq!(node.active_steps().count(), 2);
        assert!(node.active_caveats().is_some());
    }

    #[test]
    fn test_install_from_cache_drops_build_only_edges() {
        let node = OptionResolver::new(ResolveIntent::InstallFromCache).resolve(
            &openssh(),
            &selection(&["with-keychain-support", "with-ldns", "with-brewed-openssl"]),
        );
        assert_eq!(targets(&node), vec!["ldns", "openssl", "zlib"]);
    }

    #[test]
    fn test_unknown_options_are_recorded() {
        let node = OptionResolver::default()
            .resolve(&openssh(), &selection(&["with-ldns", "with-gssapi-support"]));
        assert_eq!(node.selected(), &selection(&["with-ldns"]));
        assert_eq!(node.ignored_options(), &selection(&["with-gssapi-support"]));
        assert!(node.depends_on("pkg-config"));
    }

    #[test]
    fn test_first_active_declaration_wins() {
        let formula = Arc::new(
            Formula::builder("x", "1")
                .source("x.tar", CHECKSUM)
                .option("with-y", "")
                .depends_on(
                    "y",
                    DependencyKind::ConditionalOnOption {
                        option: "with-y".into(),
                        build_only: true,
                    },
                )
                .depends_on("y", DependencyKind::Required)
                .build()
                .unwrap(),
        );

        let off = OptionResolver::default().resolve(&formula, &selection(&[]));
        assert_eq!(off.dependencies()["y"], DependencyKind::Required);

        let on = OptionResolver::default().resolve(&formula, &selection(&["with-y"]));
        assert!(on.dependencies()["y"].is_build_only());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let formula = openssh();
        let options = selection(&["with-ldns", "with-brewed-openssl", "bogus"]);
        let resolver = OptionResolver::default();
        assert_eq!(
            resolver.resolve(&formula, &options),
            resolver.resolve(&formula, &options)
        );
    }
}
