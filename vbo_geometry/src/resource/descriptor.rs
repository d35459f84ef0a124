/// One CPU/GPU buffer pairing.
///
/// A descriptor ties an optional CPU buffer to the GPU buffer it is uploaded
/// to. Interleaved attributes are windows into a shared CPU buffer: several
/// descriptors hold the same [`SharedCpuBuffer`] and differ only by
/// `offset` and `stride`; `vertex_stride` is the width of one packed vertex.

use std::cell::RefCell;
use std::rc::Rc;
use crate::graphics_device::{BufferId, BufferTarget, BufferUsage};
use crate::resource::element::{CpuBuffer, ElementData, ElementKind, SharedCpuBuffer};

// ===== GPU HANDLE =====

/// State of the GPU side of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuHandle {
    /// Never uploaded, or the device forgot it (context loss)
    Unset,
    /// Uploaded and owned by a registry
    Live(BufferId),
    /// Deleted by `destroy`
    Invalid,
}

impl GpuHandle {
    pub fn id(&self) -> Option<BufferId> {
        match self {
            GpuHandle::Live(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, GpuHandle::Live(_))
    }
}

// ===== BUFFER DESCRIPTOR =====

/// Descriptors are shared by identity between registries
pub type DescriptorRef = Rc<RefCell<BufferDescriptor>>;

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    element_kind: ElementKind,
    target: BufferTarget,
    usage: BufferUsage,
    cpu_buffer: Option<SharedCpuBuffer>,
    gpu_handle: GpuHandle,
    /// First element of this attribute inside the CPU buffer
    offset: usize,
    /// Elements per vertex for this attribute (0 = tightly packed)
    stride: usize,
    /// Elements per packed vertex of the shared buffer (0 = not interleaved)
    vertex_stride: usize,
    /// Set at upload time
    element_byte_size: usize,
    registry_key: Option<usize>,
}

impl BufferDescriptor {
    /// Declared but not populated
    pub fn new(element_kind: ElementKind, target: BufferTarget, usage: BufferUsage) -> Self {
        Self {
            element_kind,
            target,
            usage,
            cpu_buffer: None,
            gpu_handle: GpuHandle::Unset,
            offset: 0,
            stride: 0,
            vertex_stride: 0,
            element_byte_size: 0,
            registry_key: None,
        }
    }

    /// Descriptor owning a fresh CPU buffer holding `data`
    pub fn with_data(data: ElementData, target: BufferTarget, usage: BufferUsage) -> Self {
        let mut descriptor = Self::new(data.kind(), target, usage);
        descriptor.cpu_buffer = Some(CpuBuffer::new(data).into_shared());
        descriptor
    }

    /// Window into a buffer shared with other descriptors
    pub fn window(
        buffer: SharedCpuBuffer,
        target: BufferTarget,
        usage: BufferUsage,
        offset: usize,
        stride: usize,
        vertex_stride: usize,
    ) -> Self {
        let kind = buffer.borrow().kind();
        let mut descriptor = Self::new(kind, target, usage);
        descriptor.cpu_buffer = Some(buffer);
        descriptor.offset = offset;
        descriptor.stride = stride;
        descriptor.vertex_stride = vertex_stride;
        descriptor
    }

    pub fn into_ref(self) -> DescriptorRef {
        Rc::new(RefCell::new(self))
    }

    // ===== ACCESSORS =====

    pub fn element_kind(&self) -> ElementKind {
        self.element_kind
    }

    pub fn target(&self) -> BufferTarget {
        self.target
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn cpu_buffer(&self) -> Option<&SharedCpuBuffer> {
        self.cpu_buffer.as_ref()
    }

    pub fn gpu_handle(&self) -> GpuHandle {
        self.gpu_handle
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn vertex_stride(&self) -> usize {
        self.vertex_stride
    }

    /// Window into a packed buffer shared with other attributes
    pub fn is_interleaved(&self) -> bool {
        self.vertex_stride != 0
    }

    pub fn element_byte_size(&self) -> usize {
        self.element_byte_size
    }

    pub fn registry_key(&self) -> Option<usize> {
        self.registry_key
    }

    pub fn byte_offset(&self) -> usize {
        self.offset * self.element_kind.byte_size()
    }

    pub fn byte_stride(&self) -> usize {
        self.stride * self.element_kind.byte_size()
    }

    pub fn byte_vertex_stride(&self) -> usize {
        self.vertex_stride * self.element_kind.byte_size()
    }

    /// Elements held by the CPU buffer (0 when absent)
    pub fn capacity(&self) -> usize {
        self.cpu_buffer.as_ref().map_or(0, |b| b.borrow().capacity())
    }

    /// Whether both descriptors window the same CPU storage
    pub fn shares_cpu_buffer_with(&self, other: &BufferDescriptor) -> bool {
        match (&self.cpu_buffer, &other.cpu_buffer) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    // ===== MUTATORS =====

    pub fn set_usage(&mut self, usage: BufferUsage) {
        self.usage = usage;
    }

    /// Attach (or detach) CPU storage; a detached descriptor loses its handle
    pub fn set_cpu_buffer(&mut self, buffer: Option<SharedCpuBuffer>) {
        if let Some(buffer) = &buffer {
            self.element_kind = buffer.borrow().kind();
        } else if self.gpu_handle.is_live() {
            self.gpu_handle = GpuHandle::Unset;
        }
        self.cpu_buffer = buffer;
    }

    pub fn set_layout(&mut self, offset: usize, stride: usize, vertex_stride: usize) {
        self.offset = offset;
        self.stride = stride;
        self.vertex_stride = vertex_stride;
    }

    pub(crate) fn set_gpu_handle(&mut self, handle: GpuHandle) {
        self.gpu_handle = handle;
    }

    pub(crate) fn set_element_byte_size(&mut self, size: usize) {
        self.element_byte_size = size;
    }

    pub(crate) fn set_registry_key(&mut self, key: Option<usize>) {
        self.registry_key = key;
    }

    /// Reads the attribute values of every vertex as floats
    ///
    /// Honors `offset`, `stride` and `vertex_stride`, so a window into an
    /// interleaved buffer yields only its own components. A descriptor that
    /// is not interleaved yields everything from `offset` on.
    pub fn read_f32(&self) -> Option<Vec<f32>> {
        let buffer = self.cpu_buffer.as_ref()?.borrow();
        let values = buffer.data().as_f32()?;
        let start = self.offset.min(values.len());

        if self.vertex_stride == 0 || self.stride == 0 || self.stride >= self.vertex_stride {
            return Some(values[start..].to_vec());
        }

        let mut out = Vec::with_capacity(values.len() / self.vertex_stride * self.stride);
        let mut vertex = start;
        while vertex + self.stride <= values.len() {
            out.extend_from_slice(&values[vertex..vertex + self.stride]);
            vertex += self.vertex_stride;
        }
        Some(out)
    }
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
