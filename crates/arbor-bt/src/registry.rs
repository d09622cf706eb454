//! Node type registry: maps type names to a schema and a builder function.
//!
//! Built-in types come from a static table that is checked once when a registry is created.
//! Embedders add their own leaves with [`Registry::register_action`].

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arbor_core::{Comparison, Operator, Status, Value};
use serde::Serialize;

use crate::composites::ParallelPolicy;
use crate::decorators::{Decorator, OneShotPolicy, StatusConversion};
use crate::error::RegistryError;
use crate::leaves::{Action, ActionLeaf, Leaf};
use crate::node::NodeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Composite,
    Decorator,
    Leaf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChildBounds {
    pub min: usize,
    pub max: Option<usize>,
}

impl ChildBounds {
    pub const NONE: ChildBounds = ChildBounds {
        min: 0,
        max: Some(0),
    };
    pub const EXACTLY_ONE: ChildBounds = ChildBounds {
        min: 1,
        max: Some(1),
    };

    pub const fn at_least(min: usize) -> Self {
        ChildBounds { min, max: None }
    }

    pub fn contains(self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

impl fmt::Display for ChildBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "exactly {max}"),
            Some(max) => write!(f, "{}..={max}", self.min),
            None => write!(f, "at least {}", self.min),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Bool,
    Int,
    Float,
    String,
    Status,
    Operator,
    /// Any non-null blackboard value.
    Value,
}

impl ParamKind {
    fn check(self, value: &serde_json::Value) -> Result<(), String> {
        let ok = match self {
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Int => value.is_i64() || value.is_u64(),
            ParamKind::Float => value.is_number(),
            ParamKind::String => value.is_string(),
            ParamKind::Status => value.as_str().is_some_and(|s| s.parse::<Status>().is_ok()),
            ParamKind::Operator => value.as_str().is_some_and(|s| s.parse::<Operator>().is_ok()),
            ParamKind::Value => !value.is_null(),
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {self:?}, got `{value}`"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: Cow<'static, str>,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind,
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSchema {
    pub node_type: Cow<'static, str>,
    pub category: NodeCategory,
    pub children: ChildBounds,
    pub params: Vec<ParamSpec>,
}

impl NodeSchema {
    pub fn leaf(node_type: impl Into<Cow<'static, str>>, params: Vec<ParamSpec>) -> Self {
        Self {
            node_type: node_type.into(),
            category: NodeCategory::Leaf,
            children: ChildBounds::NONE,
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidSchema {
            node_type: self.node_type.to_string(),
            reason: reason.to_string(),
        };
        if self.node_type.trim().is_empty() {
            return Err(invalid("type name is empty"));
        }
        let bounds_ok = match self.category {
            NodeCategory::Composite => self.children.min >= 1,
            NodeCategory::Decorator => self.children == ChildBounds::EXACTLY_ONE,
            NodeCategory::Leaf => self.children == ChildBounds::NONE,
        };
        if !bounds_ok {
            return Err(invalid("child bounds do not match the category"));
        }
        let mut seen = BTreeSet::new();
        if self.params.iter().any(|p| !seen.insert(p.name.as_ref())) {
            return Err(invalid("duplicate parameter name"));
        }
        Ok(())
    }

    /// Check `config` against the declared parameters. Unknown keys are reported separately.
    pub fn check_config<'a>(
        &self,
        config: &'a BTreeMap<String, serde_json::Value>,
    ) -> Result<Vec<&'a str>, String> {
        for spec in &self.params {
            match config.get(spec.name.as_ref()) {
                Some(value) => spec
                    .kind
                    .check(value)
                    .map_err(|e| format!("parameter `{}`: {e}", spec.name))?,
                None if spec.required => {
                    return Err(format!("missing required parameter `{}`", spec.name))
                }
                None => {}
            }
        }
        Ok(config
            .keys()
            .map(String::as_str)
            .filter(|k| self.param(k).is_none())
            .collect())
    }
}

/// Typed read access to a node's raw parameters.
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig<'a> {
    node_type: &'a str,
    values: &'a BTreeMap<String, serde_json::Value>,
}

impl<'a> NodeConfig<'a> {
    pub fn new(node_type: &'a str, values: &'a BTreeMap<String, serde_json::Value>) -> Self {
        Self { node_type, values }
    }

    pub fn node_type(&self) -> &'a str {
        self.node_type
    }

    pub fn raw(&self) -> &'a BTreeMap<String, serde_json::Value> {
        self.values
    }

    pub fn get(&self, name: &str) -> Option<&'a serde_json::Value> {
        self.values.get(name)
    }

    fn required(&self, name: &str) -> Result<&'a serde_json::Value, String> {
        self.get(name)
            .ok_or_else(|| format!("missing required parameter `{name}`"))
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, String> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| format!("`{name}` must be a bool")),
        }
    }

    pub fn i64(&self, name: &str) -> Result<i64, String> {
        self.required(name)?
            .as_i64()
            .ok_or_else(|| format!("`{name}` must be an integer"))
    }

    pub fn u32(&self, name: &str) -> Result<u32, String> {
        let n = self.i64(name)?;
        u32::try_from(n).map_err(|_| format!("`{name}` must be between 0 and {}, got {n}", u32::MAX))
    }

    pub fn f64(&self, name: &str) -> Result<f64, String> {
        self.required(name)?
            .as_f64()
            .ok_or_else(|| format!("`{name}` must be a number"))
    }

    pub fn string(&self, name: &str) -> Result<String, String> {
        self.required(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("`{name}` must be a string"))
    }

    pub fn string_or(&self, name: &str, default: &str) -> Result<String, String> {
        match self.get(name) {
            None => Ok(default.to_string()),
            Some(_) => self.string(name),
        }
    }

    pub fn status_or(&self, name: &str, default: Status) -> Result<Status, String> {
        match self.get(name) {
            None => Ok(default),
            Some(_) => self.string(name)?.parse(),
        }
    }

    pub fn operator(&self, name: &str) -> Result<Operator, String> {
        self.string(name)?.parse()
    }

    pub fn value(&self, name: &str) -> Result<Value, String> {
        Value::try_from(self.required(name)?.clone()).map_err(|e| format!("`{name}`: {e}"))
    }

    fn comparison(&self) -> Result<Comparison, String> {
        Ok(Comparison::new(
            self.string("key")?,
            self.operator("operator")?,
            self.value("value")?,
        ))
    }
}

pub type BuildFn = Arc<dyn Fn(&NodeConfig<'_>) -> Result<NodeKind, String> + Send + Sync>;

struct Entry {
    schema: NodeSchema,
    build: BuildFn,
}

pub struct Registry {
    entries: BTreeMap<String, Entry>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("node_types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in node type.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for builtin in BUILTINS {
            let schema = builtin.schema();
            debug_assert!(schema.validate().is_ok(), "{}", builtin.node_type);
            registry.entries.insert(
                builtin.node_type.to_string(),
                Entry {
                    schema,
                    build: Arc::new(builtin.build),
                },
            );
        }
        registry
    }

    pub fn register(&mut self, schema: NodeSchema, build: BuildFn) -> Result<(), RegistryError> {
        schema.validate()?;
        let node_type = schema.node_type.to_string();
        if self.entries.contains_key(&node_type) {
            return Err(RegistryError::Duplicate(node_type));
        }
        tracing::debug!(node_type = %node_type, category = ?schema.category, "registered node type");
        self.entries.insert(node_type, Entry { schema, build });
        Ok(())
    }

    /// Register a leaf backed by an embedder [`Action`]. `factory` runs once per node built.
    pub fn register_action<F, A>(
        &mut self,
        node_type: impl Into<Cow<'static, str>>,
        params: Vec<ParamSpec>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&NodeConfig<'_>) -> Result<A, String> + Send + Sync + 'static,
        A: Action,
    {
        let build: BuildFn = Arc::new(move |config: &NodeConfig<'_>| -> Result<NodeKind, String> {
            let action = factory(config)?;
            Ok(NodeKind::Leaf(Leaf::Action(ActionLeaf::new(
                config.raw().clone(),
                Box::new(action),
            ))))
        });
        self.register(NodeSchema::leaf(node_type, params), build)
    }

    pub fn get_schema(&self, node_type: &str) -> Option<&NodeSchema> {
        self.entries.get(node_type).map(|e| &e.schema)
    }

    pub fn get_implementation(&self, node_type: &str) -> Option<&BuildFn> {
        self.entries.get(node_type).map(|e| &e.build)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &NodeSchema> {
        self.entries.values().map(|e| &e.schema)
    }
}

struct Builtin {
    node_type: &'static str,
    category: NodeCategory,
    children: ChildBounds,
    params: &'static [ParamSpec],
    build: fn(&NodeConfig<'_>) -> Result<NodeKind, String>,
}

impl Builtin {
    fn schema(&self) -> NodeSchema {
        NodeSchema {
            node_type: Cow::Borrowed(self.node_type),
            category: self.category,
            children: self.children,
            params: self.params.to_vec(),
        }
    }
}

const fn composite(
    node_type: &'static str,
    params: &'static [ParamSpec],
    build: fn(&NodeConfig<'_>) -> Result<NodeKind, String>,
) -> Builtin {
    Builtin {
        node_type,
        category: NodeCategory::Composite,
        children: ChildBounds::at_least(1),
        params,
        build,
    }
}

const fn decorator(
    node_type: &'static str,
    params: &'static [ParamSpec],
    build: fn(&NodeConfig<'_>) -> Result<NodeKind, String>,
) -> Builtin {
    Builtin {
        node_type,
        category: NodeCategory::Decorator,
        children: ChildBounds::EXACTLY_ONE,
        params,
        build,
    }
}

const fn leaf(
    node_type: &'static str,
    params: &'static [ParamSpec],
    build: fn(&NodeConfig<'_>) -> Result<NodeKind, String>,
) -> Builtin {
    Builtin {
        node_type,
        category: NodeCategory::Leaf,
        children: ChildBounds::NONE,
        params,
        build,
    }
}

const MEMORY: &[ParamSpec] = &[ParamSpec::optional("memory", ParamKind::Bool)];
const COMPARISON: &[ParamSpec] = &[
    ParamSpec::required("key", ParamKind::String),
    ParamSpec::required("operator", ParamKind::Operator),
    ParamSpec::required("value", ParamKind::Value),
];
const KEY: &[ParamSpec] = &[ParamSpec::required("key", ParamKind::String)];
const NONE: &[ParamSpec] = &[];
const PARALLEL: &[ParamSpec] = &[
    ParamSpec::optional("policy", ParamKind::String),
    ParamSpec::optional("synchronise", ParamKind::Bool),
];
const TIMEOUT: &[ParamSpec] = &[ParamSpec::required("duration", ParamKind::Float)];
const RETRY: &[ParamSpec] = &[ParamSpec::required("num_failures", ParamKind::Int)];
const REPEAT: &[ParamSpec] = &[ParamSpec::required("num_success", ParamKind::Int)];
const ONE_SHOT: &[ParamSpec] = &[ParamSpec::optional("policy", ParamKind::String)];
const COUNTER: &[ParamSpec] = &[ParamSpec::required("target", ParamKind::Int)];
const TICK_COUNTER: &[ParamSpec] = &[
    ParamSpec::required("duration", ParamKind::Int),
    ParamSpec::optional("completion_status", ParamKind::Status),
];
const EVERY_N: &[ParamSpec] = &[ParamSpec::required("n", ParamKind::Int)];
const SET_VARIABLE: &[ParamSpec] = &[
    ParamSpec::required("key", ParamKind::String),
    ParamSpec::required("value", ParamKind::Value),
    ParamSpec::optional("overwrite", ParamKind::Bool),
];

static BUILTINS: &[Builtin] = &[
    composite("Sequence", MEMORY, |c| Ok(NodeKind::sequence(c.bool_or("memory", true)?))),
    composite("Selector", MEMORY, |c| Ok(NodeKind::selector(c.bool_or("memory", true)?))),
    Builtin {
        node_type: "Parallel",
        category: NodeCategory::Composite,
        children: ChildBounds::at_least(2),
        params: PARALLEL,
        build: build_parallel,
    },
    decorator("Inverter", NONE, |_| Ok(NodeKind::Decorator(Decorator::Inverter))),
    decorator("SuccessIsFailure", NONE, |_| convert(StatusConversion::SuccessIsFailure)),
    decorator("FailureIsSuccess", NONE, |_| convert(StatusConversion::FailureIsSuccess)),
    decorator("FailureIsRunning", NONE, |_| convert(StatusConversion::FailureIsRunning)),
    decorator("RunningIsFailure", NONE, |_| convert(StatusConversion::RunningIsFailure)),
    decorator("RunningIsSuccess", NONE, |_| convert(StatusConversion::RunningIsSuccess)),
    decorator("SuccessIsRunning", NONE, |_| convert(StatusConversion::SuccessIsRunning)),
    decorator(
        "Timeout",
        TIMEOUT,
        build_timeout,
    ),
    decorator(
        "Retry",
        RETRY,
        |c| Ok(NodeKind::Decorator(Decorator::retry(c.u32("num_failures")?))),
    ),
    decorator(
        "Repeat",
        REPEAT,
        build_repeat,
    ),
    decorator(
        "OneShot",
        ONE_SHOT,
        |c| {
            let policy = OneShotPolicy::parse(&c.string_or("policy", "ON_COMPLETION")?)?;
            Ok(NodeKind::Decorator(Decorator::one_shot(policy)))
        },
    ),
    decorator("EternalGuard", COMPARISON, build_guard),
    decorator("Condition", COMPARISON, build_guard),
    leaf("Success", NONE, |_| Ok(NodeKind::Leaf(Leaf::Fixed(Status::Success)))),
    leaf("Failure", NONE, |_| Ok(NodeKind::Leaf(Leaf::Fixed(Status::Failure)))),
    leaf("Running", NONE, |_| Ok(NodeKind::Leaf(Leaf::Fixed(Status::Running)))),
    leaf(
        "Counter",
        COUNTER,
        |c| {
            let target = c.u32("target")?;
            if target == 0 {
                return Err("`target` must be at least 1".to_string());
            }
            Ok(NodeKind::Leaf(Leaf::counter(target)))
        },
    ),
    leaf(
        "TickCounter",
        TICK_COUNTER,
        |c| {
            let completion = c.status_or("completion_status", Status::Success)?;
            if !completion.is_terminal() {
                return Err(format!("`completion_status` must be SUCCESS or FAILURE, got {completion}"));
            }
            Ok(NodeKind::Leaf(Leaf::tick_counter(c.u32("duration")?, completion)))
        },
    ),
    leaf(
        "SuccessEveryN",
        EVERY_N,
        |c| {
            let n = c.u32("n")?;
            if n == 0 {
                return Err("`n` must be at least 1".to_string());
            }
            Ok(NodeKind::Leaf(Leaf::success_every_n(n)))
        },
    ),
    leaf(
        "SetBlackboardVariable",
        SET_VARIABLE,
        |c| {
            Ok(NodeKind::Leaf(Leaf::SetVariable {
                key: c.string("key")?,
                value: c.value("value")?,
                overwrite: c.bool_or("overwrite", true)?,
            }))
        },
    ),
    leaf("UnsetBlackboardVariable", KEY, |c| {
        Ok(NodeKind::Leaf(Leaf::UnsetVariable { key: c.string("key")? }))
    }),
    leaf("CheckBlackboardVariableExists", KEY, |c| {
        Ok(NodeKind::Leaf(Leaf::CheckExists { key: c.string("key")? }))
    }),
    leaf("CheckBlackboardVariableValue", COMPARISON, |c| {
        Ok(NodeKind::Leaf(Leaf::CheckValue {
            comparison: c.comparison()?,
        }))
    }),
    leaf("WaitForBlackboardVariable", KEY, |c| {
        Ok(NodeKind::Leaf(Leaf::WaitForVariable { key: c.string("key")? }))
    }),
];

fn convert(conversion: StatusConversion) -> Result<NodeKind, String> {
    Ok(NodeKind::Decorator(Decorator::Convert(conversion)))
}

fn build_parallel(c: &NodeConfig<'_>) -> Result<NodeKind, String> {
    let policy: ParallelPolicy = c.string_or("policy", "SuccessOnAll")?.parse()?;
    let synchronise = c.bool_or("synchronise", false)?;
    let policy = match policy {
        ParallelPolicy::SuccessOnAll { .. } => ParallelPolicy::SuccessOnAll { synchronise },
        ParallelPolicy::SuccessOnOne if synchronise => {
            return Err("`synchronise` is only supported with the SuccessOnAll policy".to_string())
        }
        ParallelPolicy::SuccessOnOne => ParallelPolicy::SuccessOnOne,
    };
    Ok(NodeKind::parallel(policy))
}

fn build_timeout(c: &NodeConfig<'_>) -> Result<NodeKind, String> {
    let seconds = c.f64("duration")?;
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("`duration` must be a non-negative number of seconds, got {seconds}"))?;
    Ok(NodeKind::Decorator(Decorator::timeout(duration)))
}

fn build_repeat(c: &NodeConfig<'_>) -> Result<NodeKind, String> {
    let n = c.i64("num_success")?;
    let num_success = match n {
        -1 => None,
        n if n >= 1 => Some(u32::try_from(n).map_err(|_| format!("`num_success` is too large: {n}"))?),
        n => return Err(format!("`num_success` must be -1 (forever) or at least 1, got {n}")),
    };
    Ok(NodeKind::Decorator(Decorator::repeat(num_success)))
}

fn build_guard(c: &NodeConfig<'_>) -> Result<NodeKind, String> {
    Ok(NodeKind::Decorator(Decorator::guard(c.comparison()?)))
}
