use std::{fmt::Debug, sync::Arc};

use indexmap::IndexMap;
use scipp_variable::Variable;

use crate::error::CoordTransformError;

/// Result of a compute function
#[derive(Debug, Clone)]
pub enum KernelOutput {
    /// A single value, only valid for nodes with exactly one output
    Single(Variable),
    /// Values by output name
    Named(IndexMap<String, Variable>),
}

impl From<Variable> for KernelOutput {
    fn from(var: Variable) -> Self {
        KernelOutput::Single(var)
    }
}

impl From<IndexMap<String, Variable>> for KernelOutput {
    fn from(outputs: IndexMap<String, Variable>) -> Self {
        KernelOutput::Named(outputs)
    }
}

/// Parameters accepted by a compute function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Fixed(Vec<String>),
    /// Any number of arguments. Not allowed in coordinate graphs.
    Variadic,
}

/// A function computing one or more coordinates from other coordinates.
pub trait CoordFunction: Send + Sync {
    fn name(&self) -> &str;

    fn signature(&self) -> Signature;

    /// Coordinate names bound to the parameters, in parameter order.
    ///
    /// Use this when a parameter name must differ from the coordinate it
    /// consumes. Defaults to the parameter names.
    fn input_keys(&self) -> Option<&[String]> {
        None
    }

    /// Evaluate with one argument per parameter, in parameter order
    fn call(&self, args: &[Variable]) -> Result<KernelOutput, CoordTransformError>;
}

type KernelFn = dyn Fn(&[Variable]) -> Result<KernelOutput, CoordTransformError> + Send + Sync;

/// A [`CoordFunction`] backed by a closure
#[derive(Clone)]
pub struct Kernel {
    name: String,
    signature: Signature,
    input_keys: Option<Vec<String>>,
    func: Arc<KernelFn>,
}

impl Kernel {
    pub fn new<S, O, F>(name: &str, params: impl IntoIterator<Item = S>, func: F) -> Self
    where
        S: Into<String>,
        O: Into<KernelOutput> + 'static,
        F: Fn(&[Variable]) -> Result<O, CoordTransformError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            signature: Signature::Fixed(params.into_iter().map(Into::into).collect()),
            input_keys: None,
            func: erase(func),
        }
    }

    pub fn variadic<O, F>(name: &str, func: F) -> Self
    where
        O: Into<KernelOutput> + 'static,
        F: Fn(&[Variable]) -> Result<O, CoordTransformError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            signature: Signature::Variadic,
            input_keys: None,
            func: erase(func),
        }
    }

    pub fn with_input_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.input_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

fn erase<O, F>(func: F) -> Arc<KernelFn>
where
    O: Into<KernelOutput> + 'static,
    F: Fn(&[Variable]) -> Result<O, CoordTransformError> + Send + Sync + 'static,
{
    Arc::new(move |args: &[Variable]| -> Result<KernelOutput, CoordTransformError> {
        func(args).map(Into::into)
    })
}

impl Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("input_keys", &self.input_keys)
            .finish()
    }
}

impl CoordFunction for Kernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> Signature {
        self.signature.clone()
    }

    fn input_keys(&self) -> Option<&[String]> {
        self.input_keys.as_deref()
    }

    fn call(&self, args: &[Variable]) -> Result<KernelOutput, CoordTransformError> {
        (self.func)(args)
    }
}
