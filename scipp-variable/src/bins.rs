use std::sync::Arc;

use arrow::array::UInt64Array;

use crate::error::VariableError;

/// Content that can be stored in the flat buffer behind binned values.
pub trait BinBuffer: Clone {
    /// Number of events in the buffer
    fn buffer_len(&self) -> usize;

    /// Gather the events at `indices` into a new buffer
    fn take_events(&self, indices: &UInt64Array) -> Result<Self, VariableError>;
}

/// Index bookkeeping for binned values.
///
/// Bin `i` holds the events `begin[i]..end[i]` of the shared buffer. Shallow
/// copies and slices share the buffer, so bins are not required to be
/// contiguous or to cover the whole buffer.
#[derive(Debug, Clone)]
pub struct Bins<T> {
    begin: Arc<[usize]>,
    end: Arc<[usize]>,
    dim: String,
    buffer: Arc<T>,
}

impl<T: BinBuffer> Bins<T> {
    pub fn try_new(
        begin: Vec<usize>,
        end: Vec<usize>,
        dim: impl Into<String>,
        buffer: T,
    ) -> Result<Self, VariableError> {
        if begin.len() != end.len() {
            return Err(VariableError::InvalidBins(format!(
                "begin has {} entries but end has {}",
                begin.len(),
                end.len()
            )));
        }
        let buffer_len = buffer.buffer_len();
        for (b, e) in begin.iter().zip(end.iter()) {
            if b > e || *e > buffer_len {
                return Err(VariableError::InvalidBins(format!(
                    "bin {b}..{e} is out of bounds for buffer of length {buffer_len}"
                )));
            }
        }
        Ok(Self {
            begin: begin.into(),
            end: end.into(),
            dim: dim.into(),
            buffer: Arc::new(buffer),
        })
    }

    /// Build compact bins from per-bin sizes over a buffer holding exactly
    /// the concatenated bin contents.
    pub(crate) fn compact(sizes: &[usize], dim: impl Into<String>, buffer: T) -> Self {
        let mut begin = Vec::with_capacity(sizes.len());
        let mut end = Vec::with_capacity(sizes.len());
        let mut offset = 0;
        for size in sizes {
            begin.push(offset);
            offset += size;
            end.push(offset);
        }
        Self {
            begin: begin.into(),
            end: end.into(),
            dim: dim.into(),
            buffer: Arc::new(buffer),
        }
    }

    /// Copy the bin contents into a new, contiguous buffer.
    pub fn compacted(&self) -> Result<Self, VariableError> {
        let (event_indices, _) = self.event_indices();
        let buffer = self.buffer.take_events(&event_indices)?;
        Ok(Self::compact(&self.sizes(), self.dim.clone(), buffer))
    }

    pub fn is_compact(&self) -> bool {
        let mut offset = 0;
        for (b, e) in self.begin.iter().zip(self.end.iter()) {
            if *b != offset {
                return false;
            }
            offset = *e;
        }
        offset == self.buffer.buffer_len()
    }

    pub fn buffer_mut(&mut self) -> &mut T {
        Arc::make_mut(&mut self.buffer)
    }
}

impl<T> Bins<T> {
    pub fn begin(&self) -> &[usize] {
        &self.begin
    }

    pub fn end(&self) -> &[usize] {
        &self.end
    }

    pub fn dim(&self) -> &str {
        &self.dim
    }

    pub fn buffer(&self) -> &T {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.begin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.begin.is_empty()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.begin
            .iter()
            .zip(self.end.iter())
            .map(|(b, e)| e - b)
            .collect()
    }

    /// Buffer index of every event, and the index of the bin it belongs to
    pub fn event_indices(&self) -> (UInt64Array, UInt64Array) {
        let mut events = Vec::new();
        let mut owners = Vec::new();
        for (bin, (b, e)) in self.begin.iter().zip(self.end.iter()).enumerate() {
            for event in *b..*e {
                events.push(event as u64);
                owners.push(bin as u64);
            }
        }
        (UInt64Array::from(events), UInt64Array::from(owners))
    }

    pub fn same_indices<U>(&self, other: &Bins<U>) -> bool {
        self.dim == other.dim && self.begin == other.begin && self.end == other.end
    }

    /// Bins sharing these indices over a different buffer
    pub fn with_buffer<U>(&self, buffer: U) -> Bins<U> {
        Bins {
            begin: self.begin.clone(),
            end: self.end.clone(),
            dim: self.dim.clone(),
            buffer: Arc::new(buffer),
        }
    }

    /// Select bins by position, sharing the buffer.
    pub(crate) fn select(&self, bins: &[usize]) -> Self {
        Self {
            begin: bins.iter().map(|i| self.begin[*i]).collect(),
            end: bins.iter().map(|i| self.end[*i]).collect(),
            dim: self.dim.clone(),
            buffer: self.buffer.clone(),
        }
    }
}
