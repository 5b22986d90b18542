//! Tiered, dependency-aware module loader

use crate::{
    LoadMetrics, LoaderConfig, LoaderError, LoaderEvent, ModuleDescriptor, ModuleRegistry,
    ModuleSource, PerformanceReport, Result, SessionPhase,
};
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch, OnceCell};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle position of a single module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleState {
    /// Not requested yet
    NotStarted,
    /// Requested; waiting on dependencies, its delay, or the source
    InFlight,
    /// Applied to the page (final for the session)
    Loaded,
    /// Failed (final for the session)
    Failed(LoaderError),
}

/// Terminal module outcomes, published to waiters
#[derive(Debug, Default)]
struct Outcomes {
    /// Loaded ids in completion order; only ever grows
    loaded: Vec<String>,
    failed: HashMap<String, LoaderError>,
}

impl Outcomes {
    fn is_loaded(&self, id: &str) -> bool {
        self.loaded.iter().any(|m| m == id)
    }

    fn is_failed(&self, id: &str) -> bool {
        self.failed.contains_key(id)
    }
}

type Flight = Arc<OnceCell<Result<()>>>;

/// Loads a registry's modules once per session
///
/// The critical module is loaded by [`initialize`](Self::initialize). The
/// remaining modules are processed tier by tier in ascending priority by
/// [`load_all`](Self::load_all): all modules of a tier are requested
/// together and the next tier starts once each of them has loaded or failed.
/// Within a tier, a module waits until its dependencies are loaded, bounded
/// by [`LoaderConfig::dependency_timeout`].
///
/// Concurrent requests for the same module share one underlying load.
pub struct ResourceLoader {
    registry: ModuleRegistry,
    source: Arc<dyn ModuleSource>,
    config: LoaderConfig,
    started: Instant,
    outcomes: watch::Sender<Outcomes>,
    flights: DashMap<String, Flight>,
    metrics: Mutex<LoadMetrics>,
    events: broadcast::Sender<LoaderEvent>,
    phase: watch::Sender<SessionPhase>,
}

impl ResourceLoader {
    /// Start a session over `registry`
    pub fn new(
        registry: ModuleRegistry,
        source: Arc<dyn ModuleSource>,
        config: LoaderConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (outcomes, _) = watch::channel(Outcomes::default());
        let (phase, _) = watch::channel(SessionPhase::Idle);

        Self {
            registry,
            source,
            config,
            started: Instant::now(),
            outcomes,
            flights: DashMap::new(),
            metrics: Mutex::new(LoadMetrics::default()),
            events,
            phase,
        }
    }

    /// Run a whole session: critical module, then `dom_ready`, then every tier
    ///
    /// A failed critical load is logged and does not stop the tiers.
    pub async fn run<R>(&self, dom_ready: R) -> PerformanceReport
    where
        R: Future<Output = ()>,
    {
        if let Err(e) = self.initialize().await {
            warn!("Continuing without critical module: {}", e);
        }
        dom_ready.await;
        self.load_all().await
    }

    /// Load the critical module
    ///
    /// Idempotent: once the critical module is loaded, or its marker is
    /// found in the page, further calls are no-ops.
    pub async fn initialize(&self) -> Result<()> {
        let critical = self.registry.critical();
        if self.is_loaded(&critical.id) {
            debug!("Critical module {} already loaded", critical.id);
            return Ok(());
        }

        info!("Initializing module loader ({} modules)", self.registry.len());
        self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Idle {
                *phase = SessionPhase::Critical;
                true
            } else {
                false
            }
        });

        self.load_module(&critical.id).await.inspect_err(|e| {
            error!("Failed to load critical module {}: {}", critical.id, e);
        })
    }

    /// Load every non-critical tier and produce the performance report
    pub async fn load_all(&self) -> PerformanceReport {
        let critical = self.registry.critical();
        if !self.is_loaded(&critical.id) {
            warn!(
                "Critical module {} not loaded, loading remaining tiers anyway",
                critical.id
            );
        }

        self.phase.send_replace(SessionPhase::Loading);
        info!("Loading non-critical modules");

        for (priority, modules) in self.registry.tiers() {
            let ids: Vec<&str> = modules.iter().map(|m| m.id.as_str()).collect();
            info!("Loading priority {} modules: {:?}", priority, ids);

            let results = join_all(ids.iter().map(|id| self.load_module(id))).await;
            let failed = results.iter().filter(|r| r.is_err()).count();
            if failed > 0 {
                warn!("Priority {}: {} of {} modules failed", priority, failed, ids.len());
            }
        }

        let total = self.started.elapsed();
        let metrics = {
            let mut metrics = self.lock_metrics();
            metrics.record_total(total);
            metrics.clone()
        };
        info!("All modules processed ({:.2}ms total)", total.as_secs_f64() * 1000.0);

        let report = metrics.report(&self.config.thresholds);
        self.emit(LoaderEvent::AllLoaded {
            total_time: total,
            metrics,
        });
        self.phase.send_replace(SessionPhase::Complete);

        report.log();
        report
    }

    /// Load one module, coalescing with any load already in flight
    ///
    /// Resolves immediately for loaded modules. A failure is final for the
    /// session and is returned to every caller.
    pub async fn load_module(&self, module_id: &str) -> Result<()> {
        let module = self
            .registry
            .get(module_id)
            .ok_or_else(|| LoaderError::UnknownModule(module_id.to_string()))?;

        if self.is_loaded(module_id) {
            return Ok(());
        }

        let flight = self
            .flights
            .entry(module_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let outcome = flight.get_or_init(|| self.execute(module)).await.clone();
        outcome
    }

    async fn execute(&self, module: &ModuleDescriptor) -> Result<()> {
        let result = self.try_execute(module).await;

        if let Err(ref e) = result {
            error!("Failed to load module {}: {}", module.id, e);
            self.outcomes.send_modify(|o| {
                o.failed.insert(module.id.clone(), e.clone());
            });
            self.emit(LoaderEvent::ModuleFailed {
                module_id: module.id.clone(),
                error: e.clone(),
            });
        }

        result
    }

    async fn try_execute(&self, module: &ModuleDescriptor) -> Result<()> {
        self.wait_for_dependencies(module).await?;

        let start = Instant::now();
        if !module.delay().is_zero() {
            tokio::time::sleep(module.delay()).await;
        }

        // The page may already carry the module (server-inlined, or applied
        // during the delay).
        if self.source.is_installed(module) {
            info!("{}: already present", module.id);
            self.mark_loaded(&module.id);
            return Ok(());
        }

        let applied = self.source.load(module).await?;
        let load_time = start.elapsed();

        if module.critical {
            self.lock_metrics().record_critical(&module.id, load_time);
        } else {
            self.lock_metrics().record_module(&module.id, load_time);
        }
        self.mark_loaded(&module.id);

        info!(
            "{}: loaded ({:.2}ms, {} bytes)",
            module.id,
            load_time.as_secs_f64() * 1000.0,
            applied.bytes
        );

        let event = if module.critical {
            LoaderEvent::CriticalLoaded {
                module_id: module.id.clone(),
                load_time,
            }
        } else {
            LoaderEvent::ModuleLoaded {
                module_id: module.id.clone(),
                load_time,
                size: applied.bytes,
                size_hint: module.size_hint.clone(),
            }
        };
        self.emit(event);

        Ok(())
    }

    async fn wait_for_dependencies(&self, module: &ModuleDescriptor) -> Result<()> {
        let unmet = self.unmet_dependencies(module);
        if unmet.is_empty() {
            return Ok(());
        }

        debug!("{}: waiting for dependencies: {}", module.id, unmet.join(", "));

        let started = Instant::now();
        let mut rx = self.outcomes.subscribe();
        // A failed dependency can never load, so stop waiting on it.
        let _ = tokio::time::timeout(
            self.config.dependency_timeout,
            rx.wait_for(|o| {
                module.dependencies.iter().all(|d| o.is_loaded(d))
                    || module.dependencies.iter().any(|d| o.is_failed(d))
            }),
        )
        .await;

        if self.unmet_dependencies(module).is_empty() {
            return Ok(());
        }

        Err(LoaderError::DependencyUnsatisfied {
            module_id: module.id.clone(),
            missing: self.unmet_dependencies(module),
            waited_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn unmet_dependencies(&self, module: &ModuleDescriptor) -> Vec<String> {
        let outcomes = self.outcomes.borrow();
        module
            .dependencies
            .iter()
            .filter(|d| !outcomes.is_loaded(d))
            .cloned()
            .collect()
    }

    fn mark_loaded(&self, module_id: &str) {
        self.outcomes.send_if_modified(|o| {
            if o.is_loaded(module_id) {
                false
            } else {
                o.loaded.push(module_id.to_string());
                true
            }
        });
    }

    fn emit(&self, event: LoaderEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_metrics(&self) -> MutexGuard<'_, LoadMetrics> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a module has been loaded in this session
    pub fn is_loaded(&self, module_id: &str) -> bool {
        self.outcomes.borrow().is_loaded(module_id)
    }

    /// Current state of a module
    pub fn module_state(&self, module_id: &str) -> ModuleState {
        {
            let outcomes = self.outcomes.borrow();
            if outcomes.is_loaded(module_id) {
                return ModuleState::Loaded;
            }
            if let Some(e) = outcomes.failed.get(module_id) {
                return ModuleState::Failed(e.clone());
            }
        }
        if self.flights.contains_key(module_id) {
            ModuleState::InFlight
        } else {
            ModuleState::NotStarted
        }
    }

    /// Wait until a module is loaded
    ///
    /// Resolves with the module's error if it fails instead.
    pub async fn wait_for_module(&self, module_id: &str) -> Result<()> {
        if !self.registry.contains(module_id) {
            return Err(LoaderError::UnknownModule(module_id.to_string()));
        }

        let mut rx = self.outcomes.subscribe();
        let outcome = match rx
            .wait_for(|o| o.is_loaded(module_id) || o.failed.contains_key(module_id))
            .await
        {
            Ok(o) => o.failed.get(module_id).cloned(),
            // Sender lives as long as `self`
            Err(_) => None,
        };

        match outcome {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wait until every tier has been processed
    pub async fn wait_for_all(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|p| *p == SessionPhase::Complete).await;
    }

    /// Snapshot of the recorded timings
    pub fn metrics(&self) -> LoadMetrics {
        self.lock_metrics().clone()
    }

    /// Loaded module ids, in completion order
    pub fn loaded_modules(&self) -> Vec<String> {
        self.outcomes.borrow().loaded.clone()
    }

    /// Subscribe to loader notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    /// Current session phase
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// The registry being loaded
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Performance report over the timings recorded so far
    pub fn report(&self) -> PerformanceReport {
        self.metrics().report(&self.config.thresholds)
    }
}
