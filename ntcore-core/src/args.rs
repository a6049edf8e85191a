//! Call arguments and declared signatures for intercepted framework entry points.
//!
//! A framework call is described by its positional and keyword arguments. The
//! entry point's declared [`Signature`] maps positions to names, so the same
//! value can be found whether the caller passed it positionally or by keyword.

use serde_json::Value;
use std::collections::BTreeMap;

/// Hyperparameters and run-identifying tags.
pub type Params = BTreeMap<String, Value>;

/// Computed numeric metrics.
pub type Metrics = BTreeMap<String, f64>;

/// Row-major feature matrix.
pub type Matrix = Vec<Vec<f64>>;

/// A single argument value of a framework call.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Feature matrix (`X`).
    Matrix(Matrix),
    /// Labels, sample weights or any other 1-d array.
    Vector(Vec<f64>),
    /// Scalar or structured hyperparameter.
    Value(Value),
}

impl ArgValue {
    pub fn as_matrix(&self) -> Option<&Matrix> {
        match self {
            Self::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    /// The value as a loggable parameter. Arrays are not logged.
    pub fn to_param(&self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v.clone()),
            Self::Matrix(_) | Self::Vector(_) => None,
        }
    }
}

impl From<Matrix> for ArgValue {
    fn from(m: Matrix) -> Self {
        Self::Matrix(m)
    }
}

impl From<Vec<f64>> for ArgValue {
    fn from(v: Vec<f64>) -> Self {
        Self::Vector(v)
    }
}

impl From<Value> for ArgValue {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        Self::Value(Value::String(s.to_string()))
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        Self::Value(Value::String(s))
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        Self::Value(Value::Bool(b))
    }
}

impl From<i64> for ArgValue {
    fn from(n: i64) -> Self {
        Self::Value(Value::from(n))
    }
}

impl From<f64> for ArgValue {
    fn from(n: f64) -> Self {
        Self::Value(Value::from(n))
    }
}

/// A declared parameter of an entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    /// `None` when the parameter has no default.
    pub default: Option<Value>,
}

/// Ordered parameters of an entry point, excluding the receiver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    params: Vec<Parameter>,
}

impl Signature {
    /// Signature from parameter names only.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: names
                .into_iter()
                .map(|name| Parameter {
                    name: name.into(),
                    default: None,
                })
                .collect(),
        }
    }

    /// Signature with per-parameter defaults.
    pub fn with_defaults<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<Value>)>,
        S: Into<String>,
    {
        Self {
            params: params
                .into_iter()
                .map(|(name, default)| Parameter {
                    name: name.into(),
                    default,
                })
                .collect(),
        }
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Positional and keyword arguments of one framework call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<ArgValue>,
    keywords: BTreeMap<String, ArgValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<ArgValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.keywords.insert(name.into(), value.into());
        self
    }

    pub fn positional(&self) -> &[ArgValue] {
        &self.positional
    }

    pub fn keywords(&self) -> &BTreeMap<String, ArgValue> {
        &self.keywords
    }

    pub fn keyword(&self, name: &str) -> Option<&ArgValue> {
        self.keywords.get(name)
    }

    pub fn set_keyword(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        self.keywords.insert(name.into(), value.into());
    }

    /// Remove a keyword argument, returning it.
    pub fn take_keyword(&mut self, name: &str) -> Option<ArgValue> {
        self.keywords.remove(name)
    }

    /// Find an argument by its declared name, positionally first.
    pub fn lookup(&self, signature: &Signature, name: &str) -> Option<&ArgValue> {
        if let Some(index) = signature.position(name) {
            if let Some(value) = self.positional.get(index) {
                return Some(value);
            }
        }
        self.keywords.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }
}

/// Loggable parameters for a call: explicitly passed positional and keyword
/// values, completed with the declared defaults of everything not passed.
/// Names listed in `unlogged` and array-valued arguments are left out.
pub fn run_params_for_call(signature: &Signature, args: &CallArgs, unlogged: &[&str]) -> Params {
    let mut params = Params::new();

    for (param, value) in signature.params().iter().zip(args.positional()) {
        if let Some(v) = value.to_param() {
            params.insert(param.name.clone(), v);
        }
    }

    for (name, value) in args.keywords() {
        if let Some(v) = value.to_param() {
            params.insert(name.clone(), v);
        }
    }

    for param in signature.params().iter().skip(args.positional().len()) {
        if args.keywords().contains_key(&param.name) {
            continue;
        }
        if let Some(default) = &param.default {
            params.insert(param.name.clone(), default.clone());
        }
    }

    params.retain(|name, _| !unlogged.contains(&name.as_str()));
    params
}
