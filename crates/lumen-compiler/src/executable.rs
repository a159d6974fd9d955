//! Executable produced by [`crate::GpuCompiler`]

use lumen_backends::{
    BackendError, CodegenUnit, DeviceMemoryBase, Executable, ExecutableRunOptions, ExecutionInput, ExecutionOutput,
    OwningDeviceMemory, Result, Shape, ShapeTree, ShapedBuffer,
};

use crate::buffer_assignment::{BufferAssignment, BufferSlot};
use crate::thunk::Thunk;

/// Thunk sequence plus the buffer layout it runs against.
#[derive(Debug)]
pub struct GpuExecutable {
    module_name: String,
    entry_point: String,
    assignment: BufferAssignment,
    thunks: Vec<Thunk>,
    unit: CodegenUnit,
}

impl GpuExecutable {
    pub fn new(
        module_name: impl Into<String>,
        entry_point: impl Into<String>,
        assignment: BufferAssignment,
        thunks: Vec<Thunk>,
        unit: CodegenUnit,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            entry_point: entry_point.into(),
            assignment,
            thunks,
            unit,
        }
    }

    pub fn thunks(&self) -> &[Thunk] {
        &self.thunks
    }

    /// Kernels emitted for this executable.
    pub fn codegen_unit(&self) -> &CodegenUnit {
        &self.unit
    }

    /// Single device view per argument, checked against the parameter shapes.
    fn bind_arguments(
        &self,
        arguments: Vec<ExecutionInput>,
    ) -> Result<(Vec<DeviceMemoryBase>, Vec<OwningDeviceMemory>)> {
        let shapes = self.assignment.parameter_shapes();
        if arguments.len() != shapes.len() {
            return Err(BackendError::ArgumentCount {
                executable: self.module_name.clone(),
                expected: shapes.len(),
                actual: arguments.len(),
            });
        }

        let mut views = Vec::with_capacity(arguments.len());
        let mut donated = Vec::new();
        for (index, (argument, shape)) in arguments.into_iter().zip(shapes).enumerate() {
            let (buffers, owned) = argument.into_parts(index)?;
            donated.extend(owned);
            let expected = shape.byte_size();
            match buffers.as_slice() {
                [view] if view.size() == expected => views.push(*view),
                _ => {
                    return Err(BackendError::ArgumentSize {
                        executable: self.module_name.clone(),
                        index,
                        expected,
                        actual: buffers.iter().map(DeviceMemoryBase::size).sum(),
                    });
                }
            }
        }
        Ok((views, donated))
    }
}

impl Executable for GpuExecutable {
    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn entry_point(&self) -> &str {
        &self.entry_point
    }

    fn parameter_shapes(&self) -> &[Shape] {
        self.assignment.parameter_shapes()
    }

    fn result_shape(&self) -> &Shape {
        self.assignment.result_shape()
    }

    #[tracing::instrument(skip_all, fields(module = %self.module_name, thunks = self.thunks.len()))]
    fn execute_async_on_stream(
        &self,
        run_options: &ExecutableRunOptions<'_>,
        arguments: Vec<ExecutionInput>,
    ) -> Result<ExecutionOutput> {
        let (parameters, donated) = self.bind_arguments(arguments)?;
        let ordinal = run_options.device_ordinal;
        let allocator = &run_options.allocator;

        let outputs = self
            .assignment
            .output_sizes()
            .iter()
            .map(|&size| allocator.allocate(ordinal, size))
            .collect::<Result<Vec<OwningDeviceMemory>>>()?;
        let temps = self
            .assignment
            .temp_sizes()
            .iter()
            .map(|&size| allocator.allocate(ordinal, size))
            .collect::<Result<Vec<OwningDeviceMemory>>>()?;

        let resolve = |slot: BufferSlot| match slot {
            BufferSlot::Parameter(i) => parameters[i],
            BufferSlot::Output(i) => outputs[i].as_base(),
            BufferSlot::Temp(i) => temps[i].as_base(),
        };
        for thunk in &self.thunks {
            tracing::trace!(%thunk, "enqueue");
            thunk.enqueue(run_options.stream, &resolve);
        }

        let mut leaves = outputs.iter().map(OwningDeviceMemory::as_base);
        let buffers = ShapeTree::from_fn(self.assignment.result_shape().clone(), |_| {
            leaves.next().unwrap_or_else(DeviceMemoryBase::null)
        });

        let mut to_be_released = temps;
        to_be_released.extend(donated);
        Ok(ExecutionOutput::new(
            ShapedBuffer::new(ordinal, buffers),
            outputs,
            to_be_released,
        ))
    }
}
