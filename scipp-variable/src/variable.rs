use std::{fmt::Display, ops::Range, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, AsArray, Float64Array, UInt64Array},
    compute::{kernels::numeric, take},
    datatypes::{DataType, Float64Type},
};
use arrow_schema::ArrowError;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::{
    bins::{BinBuffer, Bins},
    data_array::DataArray,
    error::VariableError,
};

/// Storage behind a [`Variable`]
#[derive(Debug, Clone)]
pub enum Values {
    /// Dense `f64` values in row-major order
    Dense(ArrayRef),
    /// Per-bin events of a binned variable (e.g. an event coordinate)
    Binned(Bins<Variable>),
    /// Per-bin events of binned data, including the event coordinates
    BinnedArray(Bins<DataArray>),
}

/// A multi-dimensional array with labeled dimensions.
///
/// Cloning is shallow: dense values are immutable arrow arrays and bin buffers
/// are reference counted.
#[derive(Debug, Clone)]
pub struct Variable {
    dims: Vec<String>,
    shape: Vec<usize>,
    pub(crate) values: Values,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(self, lhs: &ArrayRef, rhs: &ArrayRef) -> Result<ArrayRef, ArrowError> {
        match self {
            BinaryOp::Add => numeric::add(lhs, rhs),
            BinaryOp::Sub => numeric::sub(lhs, rhs),
            BinaryOp::Mul => numeric::mul(lhs, rhs),
            BinaryOp::Div => numeric::div(lhs, rhs),
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{symbol}")
    }
}

impl Variable {
    pub fn from_vec<S: Into<String>>(
        dims: impl IntoIterator<Item = S>,
        shape: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, VariableError> {
        Self::from_array(dims, shape, Arc::new(Float64Array::from(values)))
    }

    pub fn from_array<S: Into<String>>(
        dims: impl IntoIterator<Item = S>,
        shape: Vec<usize>,
        array: ArrayRef,
    ) -> Result<Self, VariableError> {
        let dims = make_dims(dims, &shape)?;
        if array.data_type() != &DataType::Float64 {
            return Err(VariableError::ArrowError(ArrowError::InvalidArgumentError(
                format!("Expected Float64 values, got {}", array.data_type()),
            )));
        }
        let expected = shape.iter().product::<usize>();
        if array.len() != expected {
            return Err(VariableError::ShapeMismatch {
                shape,
                expected,
                actual: array.len(),
            });
        }
        Ok(Self {
            dims,
            shape,
            values: Values::Dense(array),
        })
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            dims: vec![],
            shape: vec![],
            values: Values::Dense(Arc::new(Float64Array::from(vec![value]))),
        }
    }

    /// A binned variable whose buffer is a 1-d dense variable along the bin dim
    pub fn binned<S: Into<String>>(
        dims: impl IntoIterator<Item = S>,
        shape: Vec<usize>,
        bins: Bins<Variable>,
    ) -> Result<Self, VariableError> {
        let buffer = bins.buffer();
        if buffer.is_binned() || buffer.dims() != [bins.dim()] {
            return Err(VariableError::InvalidBins(format!(
                "buffer must be dense and 1-d along `{}`, got dims {:?}",
                bins.dim(),
                buffer.dims()
            )));
        }
        Self::with_bins(dims, shape, Values::Binned(bins))
    }

    /// Binned data whose buffer is a data array along the bin dim
    pub fn binned_data<S: Into<String>>(
        dims: impl IntoIterator<Item = S>,
        shape: Vec<usize>,
        bins: Bins<DataArray>,
    ) -> Result<Self, VariableError> {
        let buffer = bins.buffer().data();
        if buffer.is_binned() || buffer.dims() != [bins.dim()] {
            return Err(VariableError::InvalidBins(format!(
                "buffer must be dense and 1-d along `{}`, got dims {:?}",
                bins.dim(),
                buffer.dims()
            )));
        }
        Self::with_bins(dims, shape, Values::BinnedArray(bins))
    }

    fn with_bins<S: Into<String>>(
        dims: impl IntoIterator<Item = S>,
        shape: Vec<usize>,
        values: Values,
    ) -> Result<Self, VariableError> {
        let dims = make_dims(dims, &shape)?;
        let nbins = match &values {
            Values::Binned(bins) => bins.len(),
            Values::BinnedArray(bins) => bins.len(),
            Values::Dense(array) => array.len(),
        };
        let expected = shape.iter().product::<usize>();
        if nbins != expected {
            return Err(VariableError::ShapeMismatch {
                shape,
                expected,
                actual: nbins,
            });
        }
        Ok(Self {
            dims,
            shape,
            values,
        })
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements (or bins)
    pub fn volume(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn sizes(&self) -> IndexMap<String, usize> {
        self.dims
            .iter()
            .cloned()
            .zip(self.shape.iter().copied())
            .collect()
    }

    pub fn dim_size(&self, dim: &str) -> Option<usize> {
        self.dims
            .iter()
            .position(|d| d == dim)
            .map(|axis| self.shape[axis])
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn is_binned(&self) -> bool {
        !matches!(self.values, Values::Dense(_))
    }

    pub fn bins(&self) -> Option<&Bins<Variable>> {
        match &self.values {
            Values::Binned(bins) => Some(bins),
            _ => None,
        }
    }

    pub fn data_bins(&self) -> Option<&Bins<DataArray>> {
        match &self.values {
            Values::BinnedArray(bins) => Some(bins),
            _ => None,
        }
    }

    pub fn array(&self) -> Result<&ArrayRef, VariableError> {
        match &self.values {
            Values::Dense(array) => Ok(array),
            _ => Err(VariableError::InvalidBins(
                "expected dense values, got binned values".to_string(),
            )),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<f64>, VariableError> {
        Ok(self
            .array()?
            .as_primitive::<Float64Type>()
            .values()
            .to_vec())
    }

    /// Event values of every bin of a binned variable
    pub fn bin_values(&self) -> Result<Vec<Vec<f64>>, VariableError> {
        let bins = self.bins().ok_or_else(|| {
            VariableError::InvalidBins("expected a binned variable".to_string())
        })?;
        let values = bins.buffer().to_vec()?;
        Ok(bins
            .begin()
            .iter()
            .zip(bins.end().iter())
            .map(|(b, e)| values[*b..*e].to_vec())
            .collect())
    }

    pub fn try_add(&self, other: &Variable) -> Result<Variable, VariableError> {
        self.binary(other, BinaryOp::Add)
    }

    pub fn try_sub(&self, other: &Variable) -> Result<Variable, VariableError> {
        self.binary(other, BinaryOp::Sub)
    }

    pub fn try_mul(&self, other: &Variable) -> Result<Variable, VariableError> {
        self.binary(other, BinaryOp::Mul)
    }

    pub fn try_div(&self, other: &Variable) -> Result<Variable, VariableError> {
        self.binary(other, BinaryOp::Div)
    }

    /// Element-wise binary operation with broadcasting by dimension label.
    pub fn binary(&self, other: &Variable, op: BinaryOp) -> Result<Variable, VariableError> {
        match (&self.values, &other.values) {
            (Values::Dense(lhs), Values::Dense(rhs)) => {
                let (dims, shape) = merge_dims(self, other)?;
                let lhs = take(
                    lhs.as_ref(),
                    &broadcast_indices(&self.dims, &self.shape, &dims, &shape),
                    None,
                )?;
                let rhs = take(
                    rhs.as_ref(),
                    &broadcast_indices(&other.dims, &other.shape, &dims, &shape),
                    None,
                )?;
                Variable::from_array(dims, shape, op.apply(&lhs, &rhs)?)
            }
            (Values::Binned(bins), Values::Dense(_)) => {
                self.binned_with_dense(bins, other, op, true)
            }
            (Values::Dense(_), Values::Binned(bins)) => {
                other.binned_with_dense(bins, self, op, false)
            }
            (Values::Binned(lhs), Values::Binned(rhs)) => {
                if self.dims != other.dims || self.shape != other.shape {
                    return Err(VariableError::DimensionMismatch(format!(
                        "binned operands have dims {:?} and {:?}",
                        self.sizes(),
                        other.sizes()
                    )));
                }
                if lhs.sizes() != rhs.sizes() {
                    return Err(VariableError::BinIndicesMismatch(
                        "binned operands have different bin sizes".to_string(),
                    ));
                }
                let (lhs_events, _) = lhs.event_indices();
                let (rhs_events, _) = rhs.event_indices();
                let lhs_values = take(lhs.buffer().array()?.as_ref(), &lhs_events, None)?;
                let rhs_values = take(rhs.buffer().array()?.as_ref(), &rhs_events, None)?;
                let out = op.apply(&lhs_values, &rhs_values)?;
                self.compact_binned_result(lhs, out)
            }
            _ => Err(VariableError::InvalidBins(format!(
                "operation `{op}` is not supported for binned data arrays"
            ))),
        }
    }

    fn binned_with_dense(
        &self,
        bins: &Bins<Variable>,
        dense: &Variable,
        op: BinaryOp,
        binned_on_left: bool,
    ) -> Result<Variable, VariableError> {
        for (dim, size) in dense.dims.iter().zip(dense.shape.iter()) {
            match self.dim_size(dim) {
                Some(outer) if outer == *size => {}
                Some(outer) => {
                    return Err(VariableError::DimensionMismatch(format!(
                        "dimension `{dim}` has size {outer} in binned operand, {size} in dense"
                    )));
                }
                None => {
                    return Err(VariableError::DimensionMismatch(format!(
                        "dense operand dimension `{dim}` is not an outer dimension of the bins"
                    )));
                }
            }
        }
        let per_bin = take(
            dense.array()?.as_ref(),
            &broadcast_indices(&dense.dims, &dense.shape, &self.dims, &self.shape),
            None,
        )?;
        let (events, owners) = bins.event_indices();
        let event_values = take(bins.buffer().array()?.as_ref(), &events, None)?;
        let dense_values = take(per_bin.as_ref(), &owners, None)?;
        let out = if binned_on_left {
            op.apply(&event_values, &dense_values)?
        } else {
            op.apply(&dense_values, &event_values)?
        };
        self.compact_binned_result(bins, out)
    }

    fn compact_binned_result(
        &self,
        bins: &Bins<Variable>,
        events: ArrayRef,
    ) -> Result<Variable, VariableError> {
        let buffer = Variable::from_array([bins.dim()], vec![events.len()], events)?;
        let bins = Bins::compact(&bins.sizes(), bins.dim(), buffer);
        Variable::binned(self.dims.clone(), self.shape.clone(), bins)
    }

    /// Apply `f` to every value. Binned variables keep their bin indices.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Result<Variable, VariableError> {
        match &self.values {
            Values::Dense(array) => {
                let mapped = array.as_primitive::<Float64Type>().unary::<_, Float64Type>(f);
                Variable::from_array(self.dims.clone(), self.shape.clone(), Arc::new(mapped))
            }
            Values::Binned(bins) => {
                let buffer = bins.buffer().map(f)?;
                Ok(Variable {
                    dims: self.dims.clone(),
                    shape: self.shape.clone(),
                    values: Values::Binned(bins.with_buffer(buffer)),
                })
            }
            Values::BinnedArray(_) => Err(VariableError::InvalidBins(
                "cannot map over binned data arrays".to_string(),
            )),
        }
    }

    /// Deep copy. Binned values are copied into a contiguous buffer.
    pub fn copy(&self) -> Result<Variable, VariableError> {
        let values = match &self.values {
            Values::Dense(array) => Values::Dense(array.clone()),
            Values::Binned(bins) => Values::Binned(bins.compacted()?),
            Values::BinnedArray(bins) => Values::BinnedArray(bins.compacted()?),
        };
        Ok(Variable {
            dims: self.dims.clone(),
            shape: self.shape.clone(),
            values,
        })
    }

    /// Slice along `dim`. Binned slices share the buffer of `self`.
    pub fn slice(&self, dim: &str, range: Range<usize>) -> Result<Variable, VariableError> {
        let axis = self
            .dims
            .iter()
            .position(|d| d == dim)
            .ok_or_else(|| VariableError::DimensionNotFound(dim.to_string()))?;
        if range.start > range.end || range.end > self.shape[axis] {
            return Err(VariableError::DimensionMismatch(format!(
                "slice {}..{} is out of bounds for dimension `{dim}` of size {}",
                range.start, range.end, self.shape[axis]
            )));
        }
        let mut shape = self.shape.clone();
        shape[axis] = range.len();
        let selected = slice_indices(&self.shape, axis, range.start, &shape);
        let values = match &self.values {
            Values::Dense(array) => {
                let indices = UInt64Array::from_iter_values(selected.iter().map(|i| *i as u64));
                Values::Dense(take(array.as_ref(), &indices, None)?)
            }
            Values::Binned(bins) => Values::Binned(bins.select(&selected)),
            Values::BinnedArray(bins) => Values::BinnedArray(bins.select(&selected)),
        };
        Ok(Variable {
            dims: self.dims.clone(),
            shape,
            values,
        })
    }

    /// Rename outer dimensions. Dimensions absent from `mapping` are kept.
    pub fn rename_dims(
        &self,
        mapping: &IndexMap<String, String>,
    ) -> Result<Variable, VariableError> {
        let dims = self
            .dims
            .iter()
            .map(|dim| mapping.get(dim).unwrap_or(dim).clone())
            .collect::<Vec<_>>();
        Ok(Variable {
            dims: make_dims(dims, &self.shape)?,
            shape: self.shape.clone(),
            values: self.values.clone(),
        })
    }
}

impl BinBuffer for Variable {
    fn buffer_len(&self) -> usize {
        self.volume()
    }

    fn take_events(&self, indices: &UInt64Array) -> Result<Self, VariableError> {
        let taken = take(self.array()?.as_ref(), indices, None)?;
        Variable::from_array(self.dims.clone(), vec![taken.len()], taken)
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        if self.dims != other.dims || self.shape != other.shape {
            return false;
        }
        match (&self.values, &other.values) {
            (Values::Dense(lhs), Values::Dense(rhs)) => lhs.to_data() == rhs.to_data(),
            (Values::Binned(lhs), Values::Binned(rhs)) => {
                match (lhs.compacted(), rhs.compacted()) {
                    (Ok(lhs), Ok(rhs)) => lhs.same_indices(&rhs) && lhs.buffer() == rhs.buffer(),
                    _ => false,
                }
            }
            (Values::BinnedArray(lhs), Values::BinnedArray(rhs)) => {
                match (lhs.compacted(), rhs.compacted()) {
                    (Ok(lhs), Ok(rhs)) => lhs.same_indices(&rhs) && lhs.buffer() == rhs.buffer(),
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

fn make_dims<S: Into<String>>(
    dims: impl IntoIterator<Item = S>,
    shape: &[usize],
) -> Result<Vec<String>, VariableError> {
    let dims = dims.into_iter().map(Into::into).collect::<Vec<String>>();
    if dims.len() != shape.len() {
        return Err(VariableError::DimensionMismatch(format!(
            "{} dims {:?} given for shape {:?}",
            dims.len(),
            dims,
            shape
        )));
    }
    if !dims.iter().all_unique() {
        return Err(VariableError::DimensionMismatch(format!(
            "duplicate dimension labels in {dims:?}"
        )));
    }
    Ok(dims)
}

/// Dims of the result of a binary operation: the dims of `lhs` followed by
/// the dims only `rhs` has.
fn merge_dims(lhs: &Variable, rhs: &Variable) -> Result<(Vec<String>, Vec<usize>), VariableError> {
    let mut dims = lhs.dims.clone();
    let mut shape = lhs.shape.clone();
    for (dim, size) in rhs.dims.iter().zip(rhs.shape.iter()) {
        match lhs.dim_size(dim) {
            Some(existing) if existing != *size => {
                return Err(VariableError::DimensionMismatch(format!(
                    "dimension `{dim}` has size {existing} and {size}"
                )));
            }
            Some(_) => {}
            None => {
                dims.push(dim.clone());
                shape.push(*size);
            }
        }
    }
    Ok((dims, shape))
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Flat source index for every element of the broadcast target shape.
pub(crate) fn broadcast_indices(
    dims: &[String],
    shape: &[usize],
    out_dims: &[String],
    out_shape: &[usize],
) -> UInt64Array {
    let source_strides = strides(shape);
    let out_strides = out_dims
        .iter()
        .map(|dim| {
            dims.iter()
                .position(|d| d == dim)
                .map(|axis| source_strides[axis])
                .unwrap_or(0)
        })
        .collect::<Vec<_>>();
    let volume = out_shape.iter().product::<usize>();
    let mut counter = vec![0usize; out_shape.len()];
    let mut indices = Vec::with_capacity(volume);
    for _ in 0..volume {
        let index = counter
            .iter()
            .zip(out_strides.iter())
            .map(|(i, stride)| i * stride)
            .sum::<usize>();
        indices.push(index as u64);
        for axis in (0..counter.len()).rev() {
            counter[axis] += 1;
            if counter[axis] < out_shape[axis] {
                break;
            }
            counter[axis] = 0;
        }
    }
    UInt64Array::from(indices)
}

/// Flat indices of the elements of a slice starting at `start` along `axis`.
fn slice_indices(shape: &[usize], axis: usize, start: usize, out_shape: &[usize]) -> Vec<usize> {
    let source_strides = strides(shape);
    let volume = out_shape.iter().product::<usize>();
    let mut counter = vec![0usize; out_shape.len()];
    let mut indices = Vec::with_capacity(volume);
    for _ in 0..volume {
        let index = counter
            .iter()
            .enumerate()
            .map(|(k, i)| {
                let offset = if k == axis { start } else { 0 };
                (i + offset) * source_strides[k]
            })
            .sum::<usize>();
        indices.push(index);
        for k in (0..counter.len()).rev() {
            counter[k] += 1;
            if counter[k] < out_shape[k] {
                break;
            }
            counter[k] = 0;
        }
    }
    indices
}
