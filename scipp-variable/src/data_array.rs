use std::ops::Range;

use arrow::array::UInt64Array;
use indexmap::IndexMap;

use crate::{
    bins::{BinBuffer, Bins},
    error::VariableError,
    variable::{Values, Variable},
};

/// Named metadata entries of a data array
pub type Coords = IndexMap<String, Variable>;

/// A variable with coordinates and attributes.
///
/// Coordinates take part in alignment checks, attributes do not. Both must
/// have dims contained in the data's dims, with either the data's size or one
/// extra element (bin-edges).
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    data: Variable,
    coords: Coords,
    attrs: Coords,
}

impl DataArray {
    pub fn new(data: Variable) -> Self {
        Self {
            data,
            coords: Coords::new(),
            attrs: Coords::new(),
        }
    }

    /// Binned data over a buffer data array holding the events.
    pub fn binned<S: Into<String>>(
        dims: impl IntoIterator<Item = S>,
        shape: Vec<usize>,
        begin: Vec<usize>,
        end: Vec<usize>,
        dim: &str,
        buffer: DataArray,
    ) -> Result<Self, VariableError> {
        let bins = Bins::try_new(begin, end, dim, buffer)?;
        Ok(Self::new(Variable::binned_data(dims, shape, bins)?))
    }

    pub fn with_coord(mut self,
        name: impl Into<String>,
        coord: Variable,
    ) -> Result<Self, VariableError> {
        self.set_coord(name, coord)?;
        Ok(self)
    }

    pub fn with_attr(mut self,
        name: impl Into<String>,
        attr: Variable,
    ) -> Result<Self, VariableError> {
        self.set_attr(name, attr)?;
        Ok(self)
    }

    pub fn data(&self) -> &Variable {
        &self.data
    }

    pub fn dims(&self) -> &[String] {
        self.data.dims()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn coords(&self) -> &Coords {
        &self.coords
    }

    pub fn attrs(&self) -> &Coords {
        &self.attrs
    }

    /// Coordinate or attribute
    pub fn meta(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name).or_else(|| self.attrs.get(name))
    }

    pub fn is_binned(&self) -> bool {
        self.data.data_bins().is_some()
    }

    pub fn set_coord(
        &mut self,
        name: impl Into<String>,
        coord: Variable,
    ) -> Result<(), VariableError> {
        let name = name.into();
        self.check_meta(&name, &coord)?;
        self.coords.insert(name, coord);
        Ok(())
    }

    pub fn set_attr(
        &mut self,
        name: impl Into<String>,
        attr: Variable,
    ) -> Result<(), VariableError> {
        let name = name.into();
        self.check_meta(&name, &attr)?;
        self.attrs.insert(name, attr);
        Ok(())
    }

    pub fn remove_coord(&mut self, name: &str) -> Result<Variable, VariableError> {
        self.coords
            .shift_remove(name)
            .ok_or_else(|| VariableError::NotFound(format!("coordinate {name}")))
    }

    pub fn remove_attr(&mut self, name: &str) -> Result<Variable, VariableError> {
        self.attrs
            .shift_remove(name)
            .ok_or_else(|| VariableError::NotFound(format!("attribute {name}")))
    }

    fn check_meta(&self, name: &str, var: &Variable) -> Result<(), VariableError> {
        if var.is_binned() {
            return Err(VariableError::InvalidBins(format!(
                "coordinate `{name}` must be dense, binned coordinates are stored per event"
            )));
        }
        for (dim, size) in var.dims().iter().zip(var.shape().iter()) {
            let Some(data_size) = self.data.dim_size(dim) else {
                return Err(VariableError::DimensionMismatch(format!(
                    "coordinate `{name}` has dimension `{dim}` which the data does not have"
                )));
            };
            if *size != data_size && *size != data_size + 1 {
                return Err(VariableError::DimensionMismatch(format!(
                    "coordinate `{name}` has size {size} along `{dim}`, expected {data_size} or {}",
                    data_size + 1
                )));
            }
        }
        Ok(())
    }

    /// Per-event coordinates of binned data, as binned variables sharing the
    /// bin indices of the data. `None` for dense data.
    pub fn event_coords(&self) -> Result<Option<Coords>, VariableError> {
        self.event_meta(DataArray::coords)
    }

    /// Per-event attributes of binned data, see [`DataArray::event_coords`]
    pub fn event_attrs(&self) -> Result<Option<Coords>, VariableError> {
        self.event_meta(DataArray::attrs)
    }

    fn event_meta(&self, meta: fn(&DataArray) -> &Coords) -> Result<Option<Coords>, VariableError> {
        let Some(bins) = self.data.data_bins() else {
            return Ok(None);
        };
        let wrapped = meta(bins.buffer())
            .iter()
            .map(|(name, var)| {
                let binned = Variable::binned(
                    self.dims().to_vec(),
                    self.shape().to_vec(),
                    bins.with_buffer(var.clone()),
                )?;
                Ok((name.clone(), binned))
            })
            .collect::<Result<Coords, VariableError>>()?;
        Ok(Some(wrapped))
    }

    /// Store a per-event coordinate. The bin indices of `coord` must be
    /// identical to those of the data.
    pub fn set_event_coord(
        &mut self,
        name: impl Into<String>,
        coord: Variable,
    ) -> Result<(), VariableError> {
        let name = name.into();
        let events = self.checked_events(&name, &coord)?;
        self.bins_mut(&name)?.buffer_mut().set_coord(name, events)
    }

    /// Store a per-event attribute, see [`DataArray::set_event_coord`]
    pub fn set_event_attr(
        &mut self,
        name: impl Into<String>,
        attr: Variable,
    ) -> Result<(), VariableError> {
        let name = name.into();
        let events = self.checked_events(&name, &attr)?;
        self.bins_mut(&name)?.buffer_mut().set_attr(name, events)
    }

    pub fn remove_event_coord(&mut self, name: &str) -> Result<Variable, VariableError> {
        let Ok(bins) = self.bins_mut(name) else {
            return Err(VariableError::NotFound(format!("event coordinate {name}")));
        };
        if !bins.buffer().coords().contains_key(name) {
            return Err(VariableError::NotFound(format!("event coordinate {name}")));
        }
        bins.buffer_mut().remove_coord(name)
    }

    pub fn remove_event_attr(&mut self, name: &str) -> Result<Variable, VariableError> {
        let Ok(bins) = self.bins_mut(name) else {
            return Err(VariableError::NotFound(format!("event attribute {name}")));
        };
        if !bins.buffer().attrs().contains_key(name) {
            return Err(VariableError::NotFound(format!("event attribute {name}")));
        }
        bins.buffer_mut().remove_attr(name)
    }

    fn bins_mut(&mut self, name: &str) -> Result<&mut Bins<DataArray>, VariableError> {
        match &mut self.data.values {
            Values::BinnedArray(bins) => Ok(bins),
            _ => Err(VariableError::InvalidBins(format!(
                "cannot store event metadata `{name}` on dense data"
            ))),
        }
    }

    /// The event buffer of `var` if its bins match those of the data
    fn checked_events(&self, name: &str, var: &Variable) -> Result<Variable, VariableError> {
        let Some(bins) = self.data.data_bins() else {
            return Err(VariableError::InvalidBins(format!(
                "cannot store event metadata `{name}` on dense data"
            )));
        };
        let Some(var_bins) = var.bins() else {
            return Err(VariableError::InvalidBins(format!(
                "event metadata `{name}` must be binned"
            )));
        };
        let dims_match = var.dims() == self.dims() && var.shape() == self.shape();
        if !dims_match
            || !bins.same_indices(var_bins)
            || var_bins.buffer().buffer_len() != bins.buffer().buffer_len()
        {
            return Err(VariableError::BinIndicesMismatch(format!(
                "event metadata `{name}` does not share the bin indices of the data"
            )));
        }
        Ok(var_bins.buffer().clone())
    }

    /// Copy the bin buffer into a contiguous layout owned by `self`.
    pub fn compact_bins(&mut self) -> Result<(), VariableError> {
        if self.is_binned() {
            self.data = self.data.copy()?;
        }
        Ok(())
    }

    pub fn rename_dims(
        &self,
        mapping: &IndexMap<String, String>,
    ) -> Result<DataArray, VariableError> {
        let rename_all = |meta: &Coords| -> Result<Coords, VariableError> {
            meta.iter()
                .map(|(name, var)| Ok((name.clone(), var.rename_dims(mapping)?)))
                .collect()
        };
        Ok(DataArray {
            data: self.data.rename_dims(mapping)?,
            coords: rename_all(&self.coords)?,
            attrs: rename_all(&self.attrs)?,
        })
    }

    /// Slice along `dim`. Bin-edge metadata keeps one extra element.
    pub fn slice(&self, dim: &str, range: Range<usize>) -> Result<DataArray, VariableError> {
        let size = self
            .data
            .dim_size(dim)
            .ok_or_else(|| VariableError::DimensionNotFound(dim.to_string()))?;
        let slice_all = |meta: &Coords| -> Result<Coords, VariableError> {
            meta.iter()
                .map(|(name, var)| {
                    let sliced = match var.dim_size(dim) {
                        Some(n) if n == size + 1 => var.slice(dim, range.start..range.end + 1)?,
                        Some(_) => var.slice(dim, range.clone())?,
                        None => var.clone(),
                    };
                    Ok((name.clone(), sliced))
                })
                .collect()
        };
        Ok(DataArray {
            data: self.data.slice(dim, range.clone())?,
            coords: slice_all(&self.coords)?,
            attrs: slice_all(&self.attrs)?,
        })
    }
}

impl BinBuffer for DataArray {
    fn buffer_len(&self) -> usize {
        self.data.volume()
    }

    fn take_events(&self, indices: &UInt64Array) -> Result<Self, VariableError> {
        let take_all = |meta: &Coords| -> Result<Coords, VariableError> {
            meta.iter()
                .map(|(name, var)| Ok((name.clone(), var.take_events(indices)?)))
                .collect()
        };
        Ok(DataArray {
            data: self.data.take_events(indices)?,
            coords: take_all(&self.coords)?,
            attrs: take_all(&self.attrs)?,
        })
    }
}
