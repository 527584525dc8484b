//! The evaluation driver.
//!
//! [`Engine`] owns the compiled config, the dependency graph and scheduler
//! output, the caches, and the host interfaces. A sensor evaluation is one
//! *cycle*: walk the scheduler's order, resolve and evaluate the main
//! formula, feed its result to the attribute formulas through the `state`
//! token, and hand the finished snapshot to the output channel. Evaluations
//! are serialized; there is no concurrent evaluation inside the engine.

pub mod cache;
pub mod graph;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use cache::{ResultCache, input_fingerprint};
pub use graph::{DependencyGraph, DependencyNode, NodeId, NodeKind, build_graph};
pub use scheduler::Scheduler;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use synsor_common::{
    AlternateState, BooleanStates, EngineError, EngineErrorKind, Value, ValueState,
    classify_error, classify_value,
};
use synsor_parse::AstNode;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::alternate::{self, HandlerPlan};
use crate::classify::{Classified, Classifier, STATE_TOKEN};
use crate::config::{
    AlternateStateHandler, ComputedVariable, Config, ConfigError, FormulaConfig, SensorConfig,
    VariableValue,
};
use crate::context::{EvaluationContext, RefValueArena, ReferenceValue};
use crate::deps::{Dependency, DependencyExtractor, DependencyKind};
use crate::function_registry;
use crate::resolver::{BackingRegistry, ResolveOutcome, ResolverChain, read_entity};
use crate::selector::{Selector, SelectorKind, cached_regex};
use crate::traits::{EvaluationEnv, HostEnv, SensorSnapshot};

/* ───────────────────────── public result type ───────────────────────── */

/// The user-visible outcome of one sensor evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    Success {
        value: Value,
        state: ValueState,
        /// References whose resolved values carried an alternate state.
        unavailable_dependencies: Vec<String>,
    },
    Error {
        error: EngineError,
        state: ValueState,
        missing_dependencies: Vec<String>,
    },
}

impl EvaluationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, EvaluationResult::Success { .. })
    }

    pub fn state(&self) -> ValueState {
        match self {
            EvaluationResult::Success { state, .. } => *state,
            EvaluationResult::Error { state, .. } => *state,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            EvaluationResult::Success { value, .. } => Some(value),
            EvaluationResult::Error { .. } => None,
        }
    }
}

/* ───────────────────────────── the engine ───────────────────────────── */

pub struct Engine<H: HostEnv> {
    host: H,
    domains: HashSet<String>,

    config: Config,
    sensor_ids: HashSet<String>,
    sensor_entity_ids: BTreeMap<String, String>,
    /// node key → parsed, volatility-annotated AST
    asts: FxHashMap<String, AstNode>,
    /// node key → formula config
    formulas: FxHashMap<String, FormulaConfig>,
    /// node key → merged variable scope (globals, sensor, formula)
    scopes: FxHashMap<String, BTreeMap<String, VariableValue>>,

    graph: DependencyGraph,
    sensor_order: Vec<String>,
    node_orders: FxHashMap<String, Vec<NodeId>>,

    backing: BackingRegistry,
    boolean_states: BooleanStates,
    result_cache: ResultCache,
    published: FxHashMap<String, SensorSnapshot>,

    paused: bool,
    pending: BTreeSet<String>,
}

impl<H: HostEnv> Engine<H> {
    /// Create an engine. The domain list is mandatory: without it, dotted
    /// identifiers cannot be classified.
    pub fn new(host: H, domains: HashSet<String>) -> Result<Self, EngineError> {
        if domains.is_empty() {
            return Err(EngineError::new(EngineErrorKind::Validation)
                .with_message("no entity domains configured"));
        }
        Ok(Self {
            host,
            domains,
            config: Config::default(),
            sensor_ids: HashSet::new(),
            sensor_entity_ids: BTreeMap::new(),
            asts: FxHashMap::default(),
            formulas: FxHashMap::default(),
            scopes: FxHashMap::default(),
            graph: DependencyGraph::new(),
            sensor_order: Vec::new(),
            node_orders: FxHashMap::default(),
            backing: BackingRegistry::new(),
            boolean_states: BooleanStates::defaults().clone(),
            result_cache: ResultCache::new(),
            published: FxHashMap::default(),
            paused: false,
            pending: BTreeSet::new(),
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn published_snapshot(&self, sensor_id: &str) -> Option<&SensorSnapshot> {
        self.published.get(sensor_id)
    }

    /* ───────────────────────── compile ─────────────────────────── */

    /// Compile a config: validate, extract dependencies, build the graph,
    /// and fail loudly on cycles or unknown references. Idempotent under
    /// identical input.
    pub fn load_config(&mut self, mut config: Config) -> Result<(), ConfigError> {
        config.validate()?;
        if self.domains.is_empty() {
            return Err(ConfigError::MissingDomains);
        }

        let boolean_states = BooleanStates::with_overrides(
            config.global.extra_true_states.iter().cloned(),
            config.global.extra_false_states.iter().cloned(),
        );
        let sensor_ids: HashSet<String> =
            config.sensors.iter().map(|s| s.unique_id.clone()).collect();
        let mut sensor_entity_ids = BTreeMap::new();
        for sensor in &config.sensors {
            if let Some(entity_id) = &sensor.entity_id {
                sensor_entity_ids.insert(sensor.unique_id.clone(), entity_id.clone());
            }
        }

        let mut asts = FxHashMap::default();
        let mut formulas = FxHashMap::default();
        let mut scopes = FxHashMap::default();
        let mut deps_per_formula: FxHashMap<String, BTreeSet<Dependency>> = FxHashMap::default();
        let mut cross_refs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for sensor in &config.sensors {
            let sensor_vars = sensor.main_formula().variables.clone();
            let mut earlier_attrs: HashSet<String> = HashSet::new();

            for (index, formula) in sensor.formulas.iter().enumerate() {
                let key = if index == 0 {
                    sensor.unique_id.clone()
                } else {
                    formula.id.clone()
                };

                // Merged scope: globals under sensor vars under formula
                // vars.
                let mut scope = config.global.variables.clone();
                scope.extend(sensor_vars.clone());
                scope.extend(formula.variables.clone());

                let ast = synsor_parse::parse_with_volatility_classifier(&formula.formula, |name| {
                    function_registry::get(name).is_some_and(|f| f.volatile())
                })
                .map_err(|e| ConfigError::Syntax {
                    unique_id: sensor.unique_id.clone(),
                    formula_id: formula.id.clone(),
                    message: e.to_string(),
                })?;

                let deps = {
                    let in_scope =
                        |name: &str| scope.contains_key(name) || earlier_attrs.contains(name);
                    let classifier = Classifier::new(&self.domains, &in_scope, &sensor_ids);
                    let extractor = DependencyExtractor {
                        classifier: &classifier,
                        variables: &scope,
                        attribute_names: &earlier_attrs,
                        sensor_entity_ids: &sensor_entity_ids,
                    };

                    validate_computed_scope(sensor, formula, &classifier)?;

                    extractor.extract(&ast).map_err(|e| match e.kind {
                        EngineErrorKind::Circular => ConfigError::CircularDependency {
                            path: vec![sensor.unique_id.clone(), formula.id.clone()],
                        },
                        _ => ConfigError::Syntax {
                            unique_id: sensor.unique_id.clone(),
                            formula_id: formula.id.clone(),
                            message: e.to_string(),
                        },
                    })?
                };

                for dep in &deps {
                    if dep.kind == DependencyKind::CrossSensor && dep.identifier != sensor.unique_id
                    {
                        cross_refs
                            .entry(sensor.unique_id.clone())
                            .or_default()
                            .insert(dep.identifier.clone());
                    }
                }

                deps_per_formula.insert(key.clone(), deps);
                asts.insert(key.clone(), ast);
                formulas.insert(key.clone(), formula.clone());
                scopes.insert(key.clone(), scope);

                if index > 0 {
                    if let Some(name) = sensor.attribute_name(&formula.id) {
                        earlier_attrs.insert(name.to_string());
                    }
                }
            }
        }

        config.cross_sensor_references = cross_refs;

        let graph = build_graph(&config, &deps_per_formula);
        let scheduler = Scheduler::new(&graph);
        let sensor_order = scheduler
            .cross_sensor_order()
            .map_err(|e| ConfigError::CircularDependency {
                path: e.cycle_path().to_vec(),
            })?
            .into_iter()
            .filter(|id| sensor_ids.contains(id))
            .collect();

        let mut node_orders = FxHashMap::default();
        for sensor in &config.sensors {
            let order =
                scheduler
                    .evaluation_order(&sensor.unique_id)
                    .map_err(|e| ConfigError::CircularDependency {
                        path: e.cycle_path().to_vec(),
                    })?;
            node_orders.insert(sensor.unique_id.clone(), order);
        }

        self.config = config;
        self.sensor_ids = sensor_ids;
        self.sensor_entity_ids = sensor_entity_ids;
        self.asts = asts;
        self.formulas = formulas;
        self.scopes = scopes;
        self.graph = graph;
        self.sensor_order = sensor_order;
        self.node_orders = node_orders;
        self.boolean_states = boolean_states;
        self.result_cache.begin_cycle();
        self.pending.clear();

        #[cfg(feature = "tracing")]
        debug!(
            sensors = self.config.sensors.len(),
            nodes = self.graph.len(),
            "config loaded"
        );

        Ok(())
    }

    /// Rebuild from a new config: same contract as `load_config`.
    pub fn reload_config(&mut self, config: Config) -> Result<(), ConfigError> {
        self.load_config(config)
    }

    /* ───────────────────────── host surface ────────────────────── */

    /// Declare which entities the data provider backs and which entity
    /// backs which sensor. An empty set selects host-state-only mode.
    pub fn register_backing_entities(
        &mut self,
        entities: BTreeSet<String>,
        sensor_entities: BTreeMap<String, String>,
    ) {
        self.backing.register(entities, sensor_entities);
    }

    /// Host notification that backing data changed: invalidate affected
    /// cache entries and schedule the affected sensors. Notifications
    /// arriving while paused are coalesced and drained on resume.
    pub fn notify_backing_changed(
        &mut self,
        entities: &BTreeSet<String>,
    ) -> Result<(), EngineError> {
        let affected = self.graph.sensors_affected_by(entities);
        for sensor_id in &affected {
            for node_id in self.graph.sensor_nodes(sensor_id) {
                let key = self.graph.node(node_id).key.clone();
                self.result_cache.invalidate_formula(&key);
            }
        }
        self.pending.extend(affected);

        if self.paused {
            return Ok(());
        }
        self.evaluate_scheduled()
    }

    pub fn pause_evaluations(&mut self) {
        self.paused = true;
    }

    /// Reopen the gate and drain any evaluations scheduled while paused.
    pub fn resume_evaluations(&mut self) -> Result<(), EngineError> {
        self.paused = false;
        self.evaluate_scheduled()
    }

    /// Evaluate the sensors scheduled by change notifications, in
    /// cross-sensor order.
    pub fn evaluate_scheduled(&mut self) -> Result<(), EngineError> {
        if self.paused {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let order: Vec<String> = self
            .sensor_order
            .iter()
            .filter(|id| pending.contains(*id))
            .cloned()
            .collect();
        for sensor_id in order {
            self.evaluate_sensor(&sensor_id)?;
        }
        Ok(())
    }

    /* ───────────────────────── evaluation ──────────────────────── */

    /// Evaluate every enabled sensor in dependency order.
    pub fn evaluate_all(&mut self) -> Result<Vec<(String, EvaluationResult)>, EngineError> {
        if self.paused {
            return Ok(Vec::new());
        }
        let order = self.sensor_order.clone();
        let mut results = Vec::with_capacity(order.len());
        for sensor_id in order {
            let enabled = self
                .config
                .sensor(&sensor_id)
                .is_some_and(|s| s.enabled);
            if !enabled {
                continue;
            }
            let result = self.evaluate_sensor(&sensor_id)?;
            results.push((sensor_id, result));
        }
        Ok(results)
    }

    /// Evaluate one sensor cycle and publish its snapshot.
    pub fn evaluate_sensor(&mut self, unique_id: &str) -> Result<EvaluationResult, EngineError> {
        if self.paused {
            return Err(EngineError::new(EngineErrorKind::Eval)
                .with_message("evaluations are paused"));
        }
        let Some(sensor) = self.config.sensor(unique_id) else {
            return Err(EngineError::new(EngineErrorKind::Validation)
                .with_message(format!("unknown sensor '{unique_id}'")));
        };

        let order = self
            .node_orders
            .get(unique_id)
            .cloned()
            .unwrap_or_default();

        self.pending.remove(unique_id);

        let mut cycle = SensorCycle {
            host: &self.host,
            domains: &self.domains,
            sensor_ids: &self.sensor_ids,
            sensor_entity_ids: &self.sensor_entity_ids,
            sensor,
            graph: &self.graph,
            asts: &self.asts,
            formulas: &self.formulas,
            scopes: &self.scopes,
            backing: &self.backing,
            boolean_states: &self.boolean_states,
            published: &self.published,
            cache: &mut self.result_cache,
            arena: RefValueArena::new(),
            ctx: EvaluationContext::new(),
            unavailable_deps: Vec::new(),
        };

        let (result, snapshot) = cycle.run(&order);

        // Cycle end: reference values and cached results do not outlive it.
        self.result_cache.begin_cycle();

        self.published.insert(unique_id.to_string(), snapshot.clone());
        self.host.publish(unique_id, &snapshot);

        Ok(result)
    }
}

/* ─────────────────────────── one sensor cycle ───────────────────────── */

/// How one formula's evaluation concluded, before handler dispatch.
enum Flow {
    Value(Value),
    Alternate(AlternateState),
}

struct SensorCycle<'a, H: HostEnv> {
    host: &'a H,
    domains: &'a HashSet<String>,
    sensor_ids: &'a HashSet<String>,
    sensor_entity_ids: &'a BTreeMap<String, String>,
    sensor: &'a SensorConfig,
    graph: &'a DependencyGraph,
    asts: &'a FxHashMap<String, AstNode>,
    formulas: &'a FxHashMap<String, FormulaConfig>,
    scopes: &'a FxHashMap<String, BTreeMap<String, VariableValue>>,
    backing: &'a BackingRegistry,
    boolean_states: &'a BooleanStates,
    published: &'a FxHashMap<String, SensorSnapshot>,
    cache: &'a mut ResultCache,
    arena: RefValueArena,
    ctx: EvaluationContext,
    unavailable_deps: Vec<String>,
}

impl<'a, H: HostEnv> SensorCycle<'a, H> {
    fn run(&mut self, order: &[NodeId]) -> (EvaluationResult, SensorSnapshot) {
        self.cache.begin_cycle();
        self.ctx.push_layer(); // sensor scope

        // Seed the pre-evaluation `state` value.
        if let Err(e) = self.seed_state_token() {
            return error_outputs(e);
        }

        let mut attributes: BTreeMap<String, Value> =
            self.sensor.main_formula().attributes.clone();
        let mut main_value = Value::Empty;
        let mut main_state = ValueState::Ok;

        for &node_id in order {
            let node = self.graph.node(node_id);
            if node.kind == NodeKind::CrossSensor {
                continue;
            }

            let (value, state) = match self.evaluate_node(&node.key, node.kind) {
                Ok(outcome) => outcome,
                Err(e) => return error_outputs(e),
            };

            match node.kind {
                NodeKind::Main => {
                    // Attribute formulas see this cycle's result as `state`.
                    let id = self
                        .arena
                        .alloc(ReferenceValue::new(STATE_TOKEN, value.clone()));
                    self.ctx.set(STATE_TOKEN, id);
                    main_value = value;
                    main_state = state;
                }
                NodeKind::Attribute => {
                    let Some(name) = self.sensor.attribute_name(&node.key) else {
                        continue;
                    };
                    let id = self
                        .arena
                        .alloc(ReferenceValue::new(name, value.clone()));
                    self.ctx.set(name, id);
                    attributes.insert(name.to_string(), value.into_boundary());
                }
                NodeKind::CrossSensor => unreachable!(),
            }
        }

        let snapshot = SensorSnapshot {
            value: main_value.into_boundary(),
            state: main_state,
            attributes,
        };
        self.unavailable_deps.sort();
        self.unavailable_deps.dedup();
        let result = EvaluationResult::Success {
            value: snapshot.value.clone(),
            state: main_state,
            unavailable_dependencies: self.unavailable_deps.clone(),
        };
        (result, snapshot)
    }

    fn seed_state_token(&mut self) -> Result<(), EngineError> {
        let scope = self
            .scopes
            .get(&self.sensor.unique_id)
            .expect("main formula scope exists");
        let chain = self.chain(scope, false);
        let id = chain.resolve_state_token(&self.ctx, &mut self.arena)?;
        self.ctx.set(STATE_TOKEN, id);
        Ok(())
    }

    /// Build a resolver chain over this cycle's scope. The returned chain
    /// borrows the engine-lifetime data and the given variable scope, never
    /// the cycle itself, so it can run alongside arena mutation.
    fn chain<'c>(
        &self,
        variables: &'c BTreeMap<String, VariableValue>,
        in_attribute_formula: bool,
    ) -> ResolverChain<'c>
    where
        'a: 'c,
    {
        ResolverChain {
            provider: self.host,
            states: self.host,
            backing: self.backing,
            boolean_states: self.boolean_states,
            variables,
            sensor: self.sensor,
            published: self.published,
            sensor_entity_ids: self.sensor_entity_ids,
            in_attribute_formula,
        }
    }

    /// Evaluate one scheduled formula node, handler dispatch included.
    fn evaluate_node(
        &mut self,
        key: &str,
        kind: NodeKind,
    ) -> Result<(Value, ValueState), EngineError> {
        let formula = &self.formulas[key];
        let ast = &self.asts[key];
        let scope = &self.scopes[key];
        let is_attr = kind == NodeKind::Attribute;

        self.ctx.push_layer(); // formula scope
        let flow = self.evaluate_ast_flow(ast, Some(key), scope, is_attr, false);

        let outcome = match flow {
            Ok(Flow::Value(v)) => Ok((v, ValueState::Ok)),
            Ok(Flow::Alternate(alt)) => {
                self.dispatch(formula.alternate_state_handler.as_ref(), alt, scope, is_attr)
            }
            Err(e) => Err(e),
        };
        self.ctx.pop_layer();
        outcome
    }

    /// Resolve, extract, check the cache, and run the interpreter over one
    /// AST. Fatal resolution errors propagate; everything else concludes as
    /// a value or a detected alternate.
    fn evaluate_ast_flow(
        &mut self,
        ast: &AstNode,
        cache_id: Option<&str>,
        scope: &BTreeMap<String, VariableValue>,
        is_attr: bool,
        allow_unresolved: bool,
    ) -> Result<Flow, EngineError> {
        // Classify every referenced name up front.
        let mut names: SmallVec<[(String, Classified); 8]> = SmallVec::new();
        {
            let in_scope = |n: &str| scope.contains_key(n) || self.ctx.contains(n);
            let classifier = Classifier::new(self.domains, &in_scope, self.sensor_ids);
            let mut seen: HashSet<String> = HashSet::new();
            ast.visit_names(|nv| {
                if seen.insert(nv.original.to_string()) {
                    names.push((nv.original.to_string(), classifier.classify(nv)));
                }
            });
        }

        // Resolve each into the context (C5).
        for (original, classified) in &names {
            if matches!(classified, Classified::Reserved(_)) {
                continue;
            }
            let chain = self.chain(scope, is_attr);
            match chain.resolve(original, classified, &self.ctx, &mut self.arena)? {
                ResolveOutcome::Resolved(id) => {
                    self.ctx.set(original.clone(), id);
                }
                ResolveOutcome::Computed(cv) => {
                    let value = self.evaluate_computed(original, &cv, scope, is_attr)?;
                    let id = self.arena.alloc(ReferenceValue::new(original.clone(), value));
                    self.ctx.set(original.clone(), id);
                }
            }
        }

        // Extract the values the formula actually references (C7 input),
        // detecting alternate-state inputs on the way (C6 pre-check).
        let mut values: FxHashMap<String, Value> = FxHashMap::default();
        let mut refs: FxHashMap<String, ReferenceValue> = FxHashMap::default();
        let mut detected: Option<AlternateState> = None;

        for (original, _) in &names {
            let Some(id) = self.ctx.get(original) else {
                continue;
            };
            let rv = self.arena.get(id).clone();
            // A null from a backing entity is a failed guard (UNAVAILABLE);
            // a null that was explicitly provided classifies NONE.
            let state = if rv.value == Value::Empty && self.backing.contains(&rv.reference) {
                ValueState::Unavailable
            } else {
                classify_value(&rv.value)
            };
            if let Some(alt) = state.alternate() {
                self.unavailable_deps.push(rv.reference.clone());
                if detected.is_none() {
                    detected = Some(alt);
                }
                values.insert(original.clone(), Value::Alt(alt));
            } else {
                values.insert(original.clone(), rv.value.clone());
            }
            refs.insert(original.clone(), rv);
        }

        if let Some(alt) = detected {
            if !allow_unresolved {
                #[cfg(feature = "tracing")]
                debug!(state = %alt, "alternate-state input detected before evaluation");
                return Ok(Flow::Alternate(alt));
            }
        }

        // At-most-once evaluation per (formula, input fingerprint). Volatile
        // formulas bypass the cache entirely.
        let fingerprint = (!ast.contains_volatile()).then(|| {
            let mut pairs: Vec<(String, &Value)> = values
                .iter()
                .map(|(name, value)| (name.clone(), value))
                .collect();
            input_fingerprint(&mut pairs)
        });
        if let (Some(id), Some(fp)) = (cache_id, fingerprint) {
            if let Some(cached) = self.cache.check(id, fp) {
                return Ok(Flow::Value(cached));
            }
        }

        // Execute (C7).
        let env = FormulaEnv {
            values,
            refs,
            host: self.host,
            backing: self.backing,
            boolean_states: self.boolean_states,
            allow_unresolved,
        };
        let result = crate::interpreter::Interpreter::new(&env).evaluate_ast(ast);
        drop(env);

        match result {
            Ok(value) => match classify_value(&value).alternate() {
                None => {
                    if let (Some(id), Some(fp)) = (cache_id, fingerprint) {
                        self.cache.store(id, fp, &value);
                    }
                    Ok(Flow::Value(value))
                }
                Some(alt) => Ok(Flow::Alternate(alt)),
            },
            Err(e) => match e.kind {
                // Resolution-grade failures stay fatal.
                EngineErrorKind::MissingDependency | EngineErrorKind::BackingEntity => Err(e),
                _ => {
                    #[cfg(feature = "tracing")]
                    debug!(error = %e, "evaluation failure classified as alternate state");
                    Ok(Flow::Alternate(classify_error(&e)))
                }
            },
        }
    }

    /// Evaluate a computed variable: its own formula, its own handler, its
    /// own `allow_unresolved_states` mode. The produced value is what the
    /// referencing formula sees.
    fn evaluate_computed(
        &mut self,
        name: &str,
        cv: &ComputedVariable,
        scope: &BTreeMap<String, VariableValue>,
        is_attr: bool,
    ) -> Result<Value, EngineError> {
        let ast = synsor_parse::parse_with_volatility_classifier(&cv.formula, |n| {
            function_registry::get(n).is_some_and(|f| f.volatile())
        })
        .map_err(|e| {
            EngineError::new(EngineErrorKind::Syntax)
                .with_message(format!("computed variable '{name}': {e}"))
        })?;

        let cache_id = format!("cv:{}:{}", self.sensor.unique_id, name);
        let flow = self.evaluate_ast_flow(
            &ast,
            Some(&cache_id),
            scope,
            is_attr,
            cv.allow_unresolved_states,
        )?;

        match flow {
            Flow::Value(v) => Ok(v),
            Flow::Alternate(alt) => {
                let (value, state) =
                    self.dispatch(cv.alternate_state_handler.as_ref(), alt, scope, is_attr)?;
                // Without a handler value, the variable itself carries the
                // alternate into the referencing formula.
                match (state.alternate(), &value) {
                    (Some(alt), Value::Empty) => Ok(Value::Alt(alt)),
                    _ => Ok(value),
                }
            }
        }
    }

    /// C8: route a detected alternate to the declared handler.
    fn dispatch(
        &mut self,
        handler: Option<&AlternateStateHandler>,
        alt: AlternateState,
        scope: &BTreeMap<String, VariableValue>,
        is_attr: bool,
    ) -> Result<(Value, ValueState), EngineError> {
        let Some(slot) = handler.and_then(|h| alternate::select_slot(h, alt)) else {
            #[cfg(feature = "tracing")]
            warn!(state = %alt, sensor = %self.sensor.unique_id, "no alternate handler declared");
            return Ok((Value::Empty, alt.into()));
        };

        match alternate::plan(slot) {
            HandlerPlan::Literal(v) => Ok((v, alt.into())),
            HandlerPlan::Formula { formula, variables } => {
                // A literal string that merely looks like a formula falls
                // back to its literal self if it does not parse.
                let Ok(ast) = synsor_parse::parse(formula) else {
                    return Ok((Value::Text(formula.to_string()), alt.into()));
                };

                // Handler-local variables live in a temporary top layer.
                self.ctx.push_layer();
                let merged_scope;
                let scope_ref = match variables {
                    Some(extra) if !extra.is_empty() => {
                        let mut merged = scope.clone();
                        merged.extend(extra.clone());
                        merged_scope = merged;
                        &merged_scope
                    }
                    _ => scope,
                };

                let flow = self.evaluate_ast_flow(&ast, None, scope_ref, is_attr, false);
                self.ctx.pop_layer();

                match flow? {
                    Flow::Value(v) => Ok((v, alt.into())),
                    // The handler's own alternate propagates unchanged.
                    Flow::Alternate(handler_alt) => Ok((Value::Empty, handler_alt.into())),
                }
            }
        }
    }
}

fn error_outputs(e: EngineError) -> (EvaluationResult, SensorSnapshot) {
    let result = EvaluationResult::Error {
        missing_dependencies: e.missing_dependencies().to_vec(),
        state: ValueState::Unavailable,
        error: e,
    };
    let snapshot = SensorSnapshot::new(Value::Empty, ValueState::Unavailable);
    (result, snapshot)
}

/// Compile-time check that computed variables only reference known names.
fn validate_computed_scope(
    sensor: &SensorConfig,
    formula: &FormulaConfig,
    classifier: &Classifier<'_>,
) -> Result<(), ConfigError> {
    for (var_name, value) in &formula.variables {
        let VariableValue::Computed(cv) = value else {
            continue;
        };
        let ast = synsor_parse::parse(&cv.formula).map_err(|e| ConfigError::Syntax {
            unique_id: sensor.unique_id.clone(),
            formula_id: formula.id.clone(),
            message: format!("computed variable '{var_name}': {e}"),
        })?;

        let mut unknown = None;
        ast.visit_names(|nv| {
            if unknown.is_some() {
                return;
            }
            if let Classified::Unresolved { original } = classifier.classify(nv) {
                if BooleanStates::defaults().classify(&original).is_none() {
                    unknown = Some(original);
                }
            }
        });
        if let Some(name) = unknown {
            return Err(ConfigError::UnknownReference {
                unique_id: sensor.unique_id.clone(),
                formula_id: formula.id.clone(),
                name,
            });
        }
    }
    Ok(())
}

/* ─────────────────── per-formula evaluation environment ─────────────── */

/// The flat view one formula evaluation reads from: extracted values for
/// the names it references, plus the host capabilities builtins reach for.
struct FormulaEnv<'a, H: HostEnv> {
    values: FxHashMap<String, Value>,
    refs: FxHashMap<String, ReferenceValue>,
    host: &'a H,
    backing: &'a BackingRegistry,
    boolean_states: &'a BooleanStates,
    allow_unresolved: bool,
}

impl<'a, H: HostEnv> EvaluationEnv for FormulaEnv<'a, H> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn function(&self, name: &str) -> Option<std::sync::Arc<dyn crate::function::Function>> {
        function_registry::get(name)
    }

    fn collection_values(&self, selector: &Selector) -> Result<Vec<Value>, EngineError> {
        let mut out = Vec::new();
        for entity_id in self.host.select(selector) {
            if selector.exclusions.iter().any(|e| e == &entity_id) {
                continue;
            }
            if selector.kind == SelectorKind::Regex
                && !cached_regex(&selector.value)?.is_match(&entity_id)
            {
                continue;
            }

            // Entities missing from both data planes are skipped, not
            // fatal: a collection is a snapshot of what exists.
            let Ok(rv) = read_entity(
                self.host,
                self.host,
                self.backing,
                self.boolean_states,
                &entity_id,
            ) else {
                continue;
            };

            let included = match (selector.kind, &selector.condition) {
                (SelectorKind::State, Some(cond)) => cond.matches(&rv.value),
                (SelectorKind::Attribute, cond) => match rv.attributes.get(&selector.value) {
                    Some(attr) => cond.as_ref().is_none_or(|c| c.matches(attr)),
                    None => false,
                },
                _ => true,
            };
            if !included {
                continue;
            }

            let normalized = match classify_value(&rv.value).alternate() {
                Some(alt) => Value::Alt(alt),
                None => rv.value,
            };
            out.push(normalized);
        }
        Ok(out)
    }

    fn metadata(&self, name: &str, key: &str) -> Result<Value, EngineError> {
        // Resolve through the formula's own references first; a literal
        // entity id falls back to a host lookup.
        let rv_owned;
        let rv = match self.refs.get(name) {
            Some(rv) => rv,
            None => {
                rv_owned = read_entity(
                    self.host,
                    self.host,
                    self.backing,
                    self.boolean_states,
                    name,
                )
                .map_err(|e| {
                    EngineError::new(EngineErrorKind::Eval)
                        .with_message(format!("metadata({name}): {e}"))
                })?;
                &rv_owned
            }
        };

        match key {
            "entity_id" => Ok(Value::Text(rv.reference.clone())),
            "last_valid_state" => rv.last_valid_state.clone().ok_or_else(|| {
                EngineError::new(EngineErrorKind::Eval)
                    .with_message(format!("no last valid state for '{name}'"))
            }),
            "last_changed" | "last_updated" | "last_valid_changed" => rv
                .last_valid_changed
                .map(Value::DateTime)
                .ok_or_else(|| {
                    EngineError::new(EngineErrorKind::Eval)
                        .with_message(format!("no change timestamp for '{name}'"))
                }),
            _ => rv.attributes.get(key).cloned().ok_or_else(|| {
                EngineError::new(EngineErrorKind::Eval)
                    .with_message(format!("no metadata '{key}' for '{name}'"))
            }),
        }
    }

    fn boolean_state(&self, state: &str) -> Option<bool> {
        self.boolean_states.classify(state)
    }

    fn allow_unresolved_states(&self) -> bool {
        self.allow_unresolved
    }
}
