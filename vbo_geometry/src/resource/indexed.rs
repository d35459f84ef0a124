/// Registry plus one index buffer.
///
/// The index width is picked from the vertex count alone: fewer than 256
/// vertices use byte indices, fewer than 65536 use shorts, anything larger
/// uses ints. Values that do not fit the selected width are masked, not
/// rejected.

use std::sync::{Arc, Mutex};
use crate::error::Result;
use crate::{engine_bail, engine_debug, engine_warn};
use crate::graphics_device::{BufferTarget, GraphicsDevice, IndexType};
use crate::resource::descriptor::{BufferDescriptor, DescriptorRef};
use crate::resource::element::{CpuBuffer, ElementData, ElementKind};
use crate::resource::registry::{BufferRegistry, Ownership, RegistryConfig};

const SOURCE: &str = "vbo::IndexedBufferSet";

pub struct IndexedBufferSet {
    registry: BufferRegistry,
    index_key: Option<usize>,
    /// Indices currently valid, may be less than the buffer capacity
    index_count: usize,
}

impl IndexedBufferSet {
    pub fn new(device: Arc<Mutex<dyn GraphicsDevice>>) -> Self {
        Self::with_config(device, RegistryConfig::default())
    }

    pub fn with_config(device: Arc<Mutex<dyn GraphicsDevice>>, config: RegistryConfig) -> Self {
        Self {
            registry: BufferRegistry::with_config(device, config),
            index_key: None,
            index_count: 0,
        }
    }

    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BufferRegistry {
        &mut self.registry
    }

    pub fn index_key(&self) -> Option<usize> {
        self.index_key
    }

    pub fn index_count(&self) -> usize {
        self.index_count
    }

    pub fn triangle_count(&self) -> usize {
        self.index_count / 3
    }

    pub fn index_buffer_info(&self) -> Option<DescriptorRef> {
        self.index_key.and_then(|key| self.registry.buffer_info(key))
    }

    /// Width of the current index buffer
    pub fn index_type(&self) -> Option<IndexType> {
        self.index_buffer_info()
            .and_then(|d| d.borrow().element_kind().index_type())
    }

    /// Copy of the whole index buffer, in its stored width
    pub fn indices(&self) -> Option<ElementData> {
        let descriptor = self.index_buffer_info()?;
        let descriptor = descriptor.borrow();
        let buffer = descriptor.cpu_buffer()?.borrow();
        Some(buffer.data().clone())
    }

    /// The first `index_count` indices widened to u32
    pub fn index_values(&self) -> Option<Vec<u32>> {
        let data = self.indices()?;
        Some((0..self.index_count.min(data.len()))
            .filter_map(|i| data.integer_at(i))
            .map(|v| v as u32)
            .collect())
    }

    /// Store `indices` in the narrowest width that addresses `vertex_count` vertices
    ///
    /// `vertex_count` is `None` when the geometry has no vertex data yet.
    /// With `replace_data == false` an existing buffer of the same width is
    /// overwritten from the start; a buffer too small for `indices` is an
    /// error and nothing is changed. A width change always replaces the
    /// buffer. An index slot aliased from another geometry is replaced by an
    /// owned descriptor so the source is never written.
    pub fn set_indices(&mut self, indices: &[i32], replace_data: bool, vertex_count: Option<usize>) -> Result<()> {
        let vertex_count = match vertex_count {
            Some(count) => count,
            None => engine_bail!(SOURCE, InvalidState,
                "'{}': no vertex data, vertices must be set before element indices", self.registry.config().label),
        };
        let index_type = IndexType::for_vertex_count(vertex_count);
        let kind = ElementKind::for_index_width(index_type);

        let existing = match self.index_key {
            Some(key) if self.registry.ownership(key) == Some(Ownership::Owned) => self.registry.buffer_info(key),
            _ => None,
        };
        let in_place = existing.as_ref().and_then(|d| {
            let d = d.borrow();
            match d.cpu_buffer() {
                Some(buffer) if d.element_kind() == kind && !replace_data => Some(buffer.borrow().capacity()),
                _ => None,
            }
        });
        if let Some(capacity) = in_place {
            if indices.len() > capacity {
                engine_bail!(SOURCE, InvalidArgument,
                    "'{}': {} indices do not fit the existing {:?} buffer of {} elements",
                    self.registry.config().label, indices.len(), kind, capacity);
            }
        }

        let (data, truncated) = encode_indices(indices, index_type);
        if truncated > 0 && self.registry.config().warn_on_index_truncation {
            engine_warn!(SOURCE, "'{}': {} index value(s) do not fit {:?} indices for {} vertices and were masked",
                self.registry.config().label, truncated, index_type, vertex_count);
        }

        let descriptor = match existing {
            Some(descriptor) => descriptor,
            None => self.declare_index_descriptor(kind)?,
        };
        {
            let mut descriptor = descriptor.borrow_mut();
            let reusable = match in_place {
                Some(_) => descriptor.cpu_buffer().cloned(),
                None => None,
            };
            match reusable {
                Some(buffer) => {
                    let mut buffer = buffer.borrow_mut();
                    buffer.rewind();
                    buffer.write_at(0, &data, 0, data.len())?;
                    buffer.rewind();
                }
                None => {
                    if descriptor.element_kind() != kind && descriptor.cpu_buffer().is_some() {
                        engine_debug!(SOURCE, "'{}': index width changes from {:?} to {:?}",
                            self.registry.config().label, descriptor.element_kind(), kind);
                    }
                    descriptor.set_cpu_buffer(Some(CpuBuffer::new(data).into_shared()));
                }
            }
        }

        self.index_count = indices.len();
        Ok(())
    }

    /// Install an external index descriptor
    ///
    /// Uploads and registers when there is no index slot yet, otherwise
    /// replaces the slot without GPU work.
    pub fn set_index_buffer_info(&mut self, descriptor: DescriptorRef) -> Result<()> {
        match self.index_key {
            None => self.index_key = Some(self.registry.add_buffer(descriptor)?),
            Some(key) => {
                self.registry.set_buffer_info(key, descriptor);
            }
        }
        Ok(())
    }

    /// Alias the index buffer of `other` without taking ownership
    ///
    /// An index buffer this set owned is released.
    pub fn copy_index_from(&mut self, other: &IndexedBufferSet) -> Result<()> {
        if let Some(descriptor) = other.index_buffer_info() {
            let owner = other.registry.id();
            match self.index_key {
                None => self.index_key = Some(self.registry.add_borrowed(descriptor, owner)?),
                Some(key) => {
                    let owned = self.registry.ownership(key) == Some(Ownership::Owned);
                    let previous = self.registry.set_borrowed(key, descriptor, owner);
                    if owned {
                        self.registry.release_replaced(previous.into_iter().collect())?;
                    }
                }
            }
        }
        self.index_count = other.index_count;
        Ok(())
    }

    /// Destroy the registry and forget the index slot
    pub fn destroy(&mut self) -> Result<()> {
        self.registry.destroy()?;
        self.index_key = None;
        self.index_count = 0;
        Ok(())
    }

    /// Fresh descriptor in the index slot, registered without upload
    fn declare_index_descriptor(&mut self, kind: ElementKind) -> Result<DescriptorRef> {
        let usage = self.registry.config().default_usage;
        let descriptor = BufferDescriptor::new(kind, BufferTarget::ElementIndexArray, usage).into_ref();
        match self.index_key {
            Some(key) => {
                self.registry.set_buffer_info(key, descriptor.clone());
            }
            None => self.index_key = Some(self.registry.add_buffer(descriptor.clone())?),
        }
        Ok(descriptor)
    }
}

/// Narrow `indices` to `index_type`, returning the data and how many values were masked
fn encode_indices(indices: &[i32], index_type: IndexType) -> (ElementData, usize) {
    match index_type {
        IndexType::U8 => (
            ElementData::Byte(indices.iter().map(|i| (*i & 0xFF) as u8).collect()),
            indices.iter().filter(|i| !(0..=0xFF).contains(*i)).count(),
        ),
        IndexType::U16 => (
            ElementData::Short(indices.iter().map(|i| (*i & 0xFFFF) as u16).collect()),
            indices.iter().filter(|i| !(0..=0xFFFF).contains(*i)).count(),
        ),
        IndexType::U32 => (
            ElementData::Int(indices.to_vec()),
            indices.iter().filter(|i| **i < 0).count(),
        ),
    }
}

#[cfg(test)]
#[path = "indexed_tests.rs"]
mod tests;
