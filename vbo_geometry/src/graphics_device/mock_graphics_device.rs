/// Mock graphics device (no GPU required)
///
/// Keeps buffer stores in memory, tracks what is bound to each target and
/// records every call in `commands` so tests can assert on the exact device
/// traffic a geometry operation produced.

use rustc_hash::FxHashMap;
use crate::error::Result;
use crate::engine_bail;
use crate::graphics_device::{
    GraphicsDevice, BufferId, BufferTarget, BufferUsage, IndexType, PrimitiveTopology,
};

// ============================================================================
// Mock Buffer
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MockBuffer {
    pub data: Vec<u8>,
    pub usage: Option<BufferUsage>,
}

// ============================================================================
// Mock Graphics Device
// ============================================================================

#[derive(Debug, Default)]
pub struct MockGraphicsDevice {
    next_id: u32,
    buffers: FxHashMap<BufferId, MockBuffer>,
    vertex_binding: Option<BufferId>,
    index_binding: Option<BufferId>,
    /// Remaining successful allocations before `OutOfMemory` (None = unlimited)
    allocation_budget: Option<usize>,
    pub commands: Vec<String>,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a context loss: every buffer name becomes dead
    ///
    /// Names keep increasing afterwards so stale ids are never reused.
    pub fn lose_context(&mut self) {
        self.buffers.clear();
        self.vertex_binding = None;
        self.index_binding = None;
        self.commands.push("lose_context".to_string());
    }

    /// Fail allocations with `OutOfMemory` after `budget` more successes
    pub fn limit_allocations(&mut self, budget: Option<usize>) {
        self.allocation_budget = budget;
    }

    pub fn buffer(&self, id: BufferId) -> Option<&MockBuffer> {
        self.buffers.get(&id)
    }

    pub fn buffer_data(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(&id).map(|b| b.data.as_slice())
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn bound_buffer(&self, target: BufferTarget) -> Option<BufferId> {
        match target {
            BufferTarget::VertexAttributeArray => self.vertex_binding,
            BufferTarget::ElementIndexArray => self.index_binding,
        }
    }

    /// Number of recorded commands starting with `prefix`
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    fn binding_mut(&mut self, target: BufferTarget) -> &mut Option<BufferId> {
        match target {
            BufferTarget::VertexAttributeArray => &mut self.vertex_binding,
            BufferTarget::ElementIndexArray => &mut self.index_binding,
        }
    }

    fn bound_store(&mut self, target: BufferTarget) -> Result<&mut MockBuffer> {
        let id = match self.bound_buffer(target) {
            Some(id) => id,
            None => engine_bail!("vbo::MockGraphicsDevice", BackendError,
                "No buffer bound to {:?}", target),
        };
        match self.buffers.get_mut(&id) {
            Some(buffer) => Ok(buffer),
            None => engine_bail!("vbo::MockGraphicsDevice", BackendError,
                "Buffer {} bound to {:?} is not live", id, target),
        }
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn allocate_buffer(&mut self) -> Result<BufferId> {
        if let Some(budget) = self.allocation_budget.as_mut() {
            if *budget == 0 {
                self.commands.push("allocate_buffer:oom".to_string());
                return Err(crate::error::Error::OutOfMemory);
            }
            *budget -= 1;
        }
        self.next_id += 1;
        let id = BufferId(self.next_id);
        self.buffers.insert(id, MockBuffer::default());
        self.commands.push(format!("allocate_buffer:{}", id.0));
        Ok(id)
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) -> Result<()> {
        if let Some(id) = buffer {
            if !self.buffers.contains_key(&id) {
                engine_bail!("vbo::MockGraphicsDevice", BackendError,
                    "Cannot bind dead buffer {} to {:?}", id, target);
            }
            self.commands.push(format!("bind_buffer:{:?}:{}", target, id.0));
        } else {
            self.commands.push(format!("unbind_buffer:{:?}", target));
        }
        *self.binding_mut(target) = buffer;
        Ok(())
    }

    fn upload_buffer(&mut self, target: BufferTarget, data: &[u8], usage: BufferUsage) -> Result<()> {
        let store = self.bound_store(target)?;
        store.data = data.to_vec();
        store.usage = Some(usage);
        self.commands.push(format!("upload_buffer:{:?}:{}", target, data.len()));
        Ok(())
    }

    fn upload_sub_buffer(&mut self, target: BufferTarget, byte_offset: usize, data: &[u8]) -> Result<()> {
        let store = self.bound_store(target)?;
        let end = byte_offset + data.len();
        if end > store.data.len() {
            let size = store.data.len();
            engine_bail!("vbo::MockGraphicsDevice", BackendError,
                "Sub-upload [{}, {}) past end of {}-byte store", byte_offset, end, size);
        }
        store.data[byte_offset..end].copy_from_slice(data);
        self.commands.push(format!("upload_sub_buffer:{:?}:{}:{}", target, byte_offset, data.len()));
        Ok(())
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<()> {
        for id in buffers {
            if self.buffers.remove(id).is_some() {
                // Deleting a bound buffer reverts the binding to zero
                if self.vertex_binding == Some(*id) {
                    self.vertex_binding = None;
                }
                if self.index_binding == Some(*id) {
                    self.index_binding = None;
                }
            }
        }
        self.commands.push(format!("delete_buffers:{}", buffers.len()));
        Ok(())
    }

    fn is_buffer(&self, buffer: BufferId) -> bool {
        self.buffers.contains_key(&buffer)
    }

    fn draw_elements(&mut self, topology: PrimitiveTopology, count: usize, index_type: IndexType) -> Result<()> {
        let available = self.bound_store(BufferTarget::ElementIndexArray)?.data.len();
        let needed = count * index_type.size_bytes() as usize;
        if needed > available {
            engine_bail!("vbo::MockGraphicsDevice", BackendError,
                "Draw reads {} index bytes but only {} are uploaded", needed, available);
        }
        self.commands.push(format!("draw_elements:{:?}:{}:{:?}", topology, count, index_type));
        Ok(())
    }
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;
