//! Module descriptors and the static module registry

use crate::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::warn;

/// A named, loadable unit of page content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique module id
    pub id: String,
    /// Payload location (relative to the payload origin)
    #[serde(default)]
    pub file: Option<String>,
    /// Tier (lower loads earlier, equal priorities load concurrently)
    pub priority: u32,
    /// Modules that must be loaded before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Artificial stagger applied after dependencies resolve (ms)
    #[serde(default)]
    pub delay_ms: u64,
    /// Loaded inline during initialization, before any tier
    #[serde(default)]
    pub critical: bool,
    /// Human readable size hint carried in load events
    #[serde(default)]
    pub size_hint: Option<String>,
}

impl ModuleDescriptor {
    /// Create a descriptor with no dependencies and no delay
    pub fn new(id: impl Into<String>, priority: u32) -> Self {
        Self {
            id: id.into(),
            file: None,
            priority,
            dependencies: Vec::new(),
            delay_ms: 0,
            critical: false,
            size_hint: None,
        }
    }

    /// Create the critical descriptor
    pub fn critical(id: impl Into<String>, priority: u32) -> Self {
        Self {
            critical: true,
            ..Self::new(id, priority)
        }
    }

    /// Add a dependency
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Set the artificial delay
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set the payload location
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Set the size hint
    pub fn with_size_hint(mut self, hint: impl Into<String>) -> Self {
        self.size_hint = Some(hint.into());
        self
    }

    /// Artificial delay as a duration
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Element id installed in the page for this module
    pub fn marker(&self) -> String {
        marker_for(&self.id)
    }
}

/// Element id a module installs when applied
pub fn marker_for(module_id: &str) -> String {
    format!("{module_id}-css")
}

/// Immutable, validated list of module descriptors
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: Vec<ModuleDescriptor>,
    index: HashMap<String, usize>,
    critical: usize,
}

impl ModuleRegistry {
    /// Validate and build a registry
    ///
    /// Exactly one module must be flagged critical, and it may not declare
    /// dependencies. Dependencies on ids outside the registry are accepted
    /// with a warning: they can never be satisfied and resolve through the
    /// dependency timeout like any other unsatisfiable wait.
    pub fn new(modules: Vec<ModuleDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(modules.len());
        for (i, module) in modules.iter().enumerate() {
            if index.insert(module.id.clone(), i).is_some() {
                return Err(LoaderError::DuplicateModule(module.id.clone()));
            }
        }

        let critical: Vec<usize> = modules
            .iter()
            .enumerate()
            .filter(|(_, m)| m.critical)
            .map(|(i, _)| i)
            .collect();
        if critical.len() != 1 {
            return Err(LoaderError::MissingCriticalModule(critical.len()));
        }
        let critical = critical[0];
        if !modules[critical].dependencies.is_empty() {
            return Err(LoaderError::Registry(format!(
                "critical module {} must not declare dependencies",
                modules[critical].id
            )));
        }

        for module in &modules {
            for dep in &module.dependencies {
                if !index.contains_key(dep) {
                    warn!("Module {} depends on unknown module {}", module.id, dep);
                }
            }
        }

        Ok(Self {
            modules,
            index,
            critical,
        })
    }

    /// Parse a registry from a JSON array of descriptors
    pub fn from_json(json: &str) -> Result<Self> {
        let modules: Vec<ModuleDescriptor> = serde_json::from_str(json)?;
        Self::new(modules)
    }

    /// The site's stylesheet modules
    pub fn site_stylesheets() -> Self {
        let modules = vec![
            ModuleDescriptor::critical("critical", 1)
                .with_file("/src/styles/critical.css")
                .with_size_hint("≤15KB"),
            ModuleDescriptor::new("responsive-containers", 2)
                .with_file("/src/styles/responsive-containers.css")
                .depends_on("critical")
                .with_delay(50),
            ModuleDescriptor::new("layout", 2)
                .with_file("/src/styles/layout.css")
                .depends_on("critical")
                .with_delay(75),
            ModuleDescriptor::new("navigation-touch", 3)
                .with_file("/src/styles/navigation-touch.css")
                .depends_on("critical")
                .depends_on("responsive-containers")
                .with_delay(100),
            ModuleDescriptor::new("booking-widget-responsive", 3)
                .with_file("/src/styles/booking-widget-responsive.css")
                .depends_on("responsive-containers")
                .with_delay(125),
            ModuleDescriptor::new("components", 3)
                .with_file("/src/styles/components.css")
                .depends_on("critical")
                .depends_on("layout")
                .with_delay(150),
            ModuleDescriptor::new("utilities", 4)
                .with_file("/src/styles/utilities.css")
                .depends_on("components")
                .with_delay(175),
            ModuleDescriptor::new("container-query-fallbacks", 4)
                .with_file("/src/styles/container-query-fallbacks.css")
                .depends_on("responsive-containers")
                .with_delay(200),
            ModuleDescriptor::new("enhancements", 5)
                .with_file("/src/styles/enhancements.css")
                .depends_on("utilities")
                .with_delay(225),
        ];

        Self {
            index: modules
                .iter()
                .enumerate()
                .map(|(i, m)| (m.id.clone(), i))
                .collect(),
            modules,
            critical: 0,
        }
    }

    /// Look up a module by id
    pub fn get(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    /// Whether the registry declares this id
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The critical module
    pub fn critical(&self) -> &ModuleDescriptor {
        &self.modules[self.critical]
    }

    /// All modules in declaration order
    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the registry is empty (never true for a validated registry)
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Non-critical modules grouped by priority, ascending
    ///
    /// Declaration order is preserved inside each tier.
    pub fn tiers(&self) -> Vec<(u32, Vec<&ModuleDescriptor>)> {
        let mut tiers: BTreeMap<u32, Vec<&ModuleDescriptor>> = BTreeMap::new();
        for module in self.modules.iter().filter(|m| !m.critical) {
            tiers.entry(module.priority).or_default().push(module);
        }
        tiers.into_iter().collect()
    }

    /// Modules whose dependency chain loops back onto itself
    ///
    /// Informational only: the loader does not reject cycles up front, they
    /// fail through the bounded dependency wait.
    pub fn find_cycles(&self) -> Vec<String> {
        fn visit<'a>(
            registry: &'a ModuleRegistry,
            id: &'a str,
            stack: &mut Vec<&'a str>,
            done: &mut HashSet<&'a str>,
            cyclic: &mut HashSet<String>,
        ) {
            if let Some(pos) = stack.iter().position(|s| *s == id) {
                cyclic.extend(stack[pos..].iter().map(|s| s.to_string()));
                return;
            }
            if done.contains(id) {
                return;
            }
            let Some(module) = registry.get(id) else {
                return;
            };
            stack.push(id);
            for dep in &module.dependencies {
                visit(registry, dep, stack, done, cyclic);
            }
            stack.pop();
            done.insert(id);
        }

        let mut cyclic = HashSet::new();
        let mut done = HashSet::new();
        for module in &self.modules {
            visit(self, &module.id, &mut Vec::new(), &mut done, &mut cyclic);
        }

        let mut cyclic: Vec<String> = cyclic.into_iter().collect();
        cyclic.sort();
        cyclic
    }
}
