//! Compiled executables and their inputs and outputs
//!
//! An [`Executable`] consumes one [`ExecutionInput`] per parameter, enqueues
//! its work on the stream in [`ExecutableRunOptions`], and returns an
//! [`ExecutionOutput`] whose buffers are valid once that stream drains.

use std::sync::Arc;

use crate::error::{BackendError, Result};
use crate::memory::{DeviceMemoryAllocator, DeviceMemoryBase, MaybeOwningDeviceMemory, OwningDeviceMemory};
use crate::shape::{Shape, ShapeIndex, ShapeTree};
use crate::stream::Stream;

/// Buffers bound to one executable parameter.
#[derive(Debug)]
pub struct ExecutionInput {
    buffers: ShapeTree<Option<MaybeOwningDeviceMemory>>,
}

impl ExecutionInput {
    /// Input for `shape` with no buffers set yet.
    pub fn new(shape: Shape) -> Self {
        Self {
            buffers: ShapeTree::new(shape),
        }
    }

    /// Input for an untyped device span, `u8[size]`, borrowing the memory.
    pub fn borrowed_bytes(memory: DeviceMemoryBase) -> Self {
        let mut input = Self::new(Shape::bytes(memory.size()));
        input.buffers.set_element(&ShapeIndex::root(), Some(memory.into()));
        input
    }

    pub fn shape(&self) -> &Shape {
        self.buffers.shape()
    }

    /// Bind the buffer for one leaf.
    ///
    /// # Errors
    ///
    /// [`BackendError::InvalidShapeIndex`] if `index` is not a leaf of the shape.
    pub fn set_buffer(&mut self, index: &ShapeIndex, buffer: MaybeOwningDeviceMemory) -> Result<()> {
        match self.buffers.element_mut(index) {
            Some(slot) => {
                *slot = Some(buffer);
                Ok(())
            }
            None => Err(BackendError::InvalidShapeIndex {
                index: index.to_string(),
                shape: self.buffers.shape().to_string(),
            }),
        }
    }

    pub fn buffer(&self, index: &ShapeIndex) -> Option<&MaybeOwningDeviceMemory> {
        self.buffers.element(index).and_then(Option::as_ref)
    }

    /// Split into the buffer views, in leaf order, and the owned memory.
    ///
    /// # Errors
    ///
    /// [`BackendError::MissingArgumentBuffer`] if a leaf has no buffer;
    /// `argument` names the input in the message.
    pub fn into_parts(self, argument: usize) -> Result<(Vec<DeviceMemoryBase>, Vec<OwningDeviceMemory>)> {
        let mut views = Vec::new();
        let mut owned = Vec::new();
        for (index, buffer) in self.buffers.into_leaves() {
            let buffer = buffer.ok_or_else(|| BackendError::MissingArgumentBuffer {
                index: argument,
                shape_index: index.to_string(),
            })?;
            views.push(buffer.as_base());
            if let Some(memory) = buffer.into_owned() {
                owned.push(memory);
            }
        }
        Ok((views, owned))
    }
}

/// Device buffers laid out according to a shape.
#[derive(Debug, Clone)]
pub struct ShapedBuffer {
    device_ordinal: usize,
    buffers: ShapeTree<DeviceMemoryBase>,
}

impl ShapedBuffer {
    pub fn new(device_ordinal: usize, buffers: ShapeTree<DeviceMemoryBase>) -> Self {
        Self {
            device_ordinal,
            buffers,
        }
    }

    pub fn on_device_shape(&self) -> &Shape {
        self.buffers.shape()
    }

    pub fn device_ordinal(&self) -> usize {
        self.device_ordinal
    }

    pub fn buffer(&self, index: &ShapeIndex) -> Option<DeviceMemoryBase> {
        self.buffers.element(index).copied()
    }

    pub fn buffers(&self) -> &ShapeTree<DeviceMemoryBase> {
        &self.buffers
    }

    /// Leaf buffers in leaf order.
    pub fn leaf_buffers(&self) -> Vec<DeviceMemoryBase> {
        self.buffers.leaves().map(|(_, buffer)| *buffer).collect()
    }
}

/// Result of one execution.
///
/// Owns the result memory the executable allocated plus any temporaries,
/// all of which are freed when the output is dropped.
#[derive(Debug)]
pub struct ExecutionOutput {
    result: ShapedBuffer,
    owned: Vec<OwningDeviceMemory>,
    to_be_released: Vec<OwningDeviceMemory>,
}

impl ExecutionOutput {
    pub fn new(result: ShapedBuffer, owned: Vec<OwningDeviceMemory>, to_be_released: Vec<OwningDeviceMemory>) -> Self {
        Self {
            result,
            owned,
            to_be_released,
        }
    }

    pub fn result(&self) -> &ShapedBuffer {
        &self.result
    }

    /// Give up the result memory without freeing it.
    ///
    /// Temporaries are still freed when the returned vector is dropped.
    pub fn into_parts(self) -> (ShapedBuffer, Vec<OwningDeviceMemory>, Vec<OwningDeviceMemory>) {
        (self.result, self.owned, self.to_be_released)
    }
}

/// Where and with what an executable runs.
#[derive(Clone)]
pub struct ExecutableRunOptions<'a> {
    pub stream: &'a Stream,
    pub allocator: Arc<dyn DeviceMemoryAllocator>,
    pub device_ordinal: usize,
}

impl<'a> ExecutableRunOptions<'a> {
    /// Run on `stream`'s device with `allocator`.
    pub fn new(stream: &'a Stream, allocator: Arc<dyn DeviceMemoryAllocator>) -> Self {
        Self {
            device_ordinal: stream.parent().ordinal(),
            stream,
            allocator,
        }
    }
}

/// A compiled module bound to one entry point.
pub trait Executable: Send + Sync {
    fn module_name(&self) -> &str;

    fn entry_point(&self) -> &str;

    /// Shape of each parameter, in parameter order.
    fn parameter_shapes(&self) -> &[Shape];

    fn result_shape(&self) -> &Shape;

    /// Enqueue the computation on `run_options.stream`.
    ///
    /// Returns once all work is enqueued; the outputs hold valid data only
    /// after the stream drains.
    fn execute_async_on_stream(
        &self,
        run_options: &ExecutableRunOptions<'_>,
        arguments: Vec<ExecutionInput>,
    ) -> Result<ExecutionOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::PrimitiveType;

    #[test]
    fn test_borrowed_bytes_input() {
        let input = ExecutionInput::borrowed_bytes(DeviceMemoryBase::new(0x100, 8));
        assert_eq!(input.shape(), &Shape::bytes(8));
        let (views, owned) = input.into_parts(0).unwrap();
        assert_eq!(views, vec![DeviceMemoryBase::new(0x100, 8)]);
        assert!(owned.is_empty());
    }

    #[test]
    fn test_missing_leaf_buffer() {
        let shape = Shape::tuple(vec![Shape::bytes(4), Shape::array(PrimitiveType::F32, vec![2])]);
        let mut input = ExecutionInput::new(shape);
        input
            .set_buffer(&ShapeIndex(vec![0]), DeviceMemoryBase::new(0x10, 4).into())
            .unwrap();
        let err = input.into_parts(2).unwrap_err();
        assert_eq!(
            err,
            BackendError::MissingArgumentBuffer {
                index: 2,
                shape_index: "{1}".to_string()
            }
        );
    }

    #[test]
    fn test_set_buffer_rejects_non_leaf() {
        let mut input = ExecutionInput::new(Shape::bytes(4));
        assert!(matches!(
            input.set_buffer(&ShapeIndex(vec![0]), DeviceMemoryBase::null().into()),
            Err(BackendError::InvalidShapeIndex { .. })
        ));
    }
}
