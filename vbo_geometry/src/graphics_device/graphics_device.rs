/// GraphicsDevice trait - the buffer-level contract consumed by the geometry layer
///
/// The trait mirrors the handful of buffer-object calls a GL-style API offers.
/// Every method is expected to run on the thread that owns the graphics context.

use crate::error::Result;
use crate::graphics_device::{BufferId, BufferTarget, BufferUsage, IndexType, PrimitiveTopology};

/// Graphics device abstraction
pub trait GraphicsDevice: Send + Sync {
    /// Allocate a new, empty buffer name
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfMemory` if the device cannot hand out more buffers.
    fn allocate_buffer(&mut self) -> Result<BufferId>;

    /// Bind `buffer` to `target`, or unbind the target when `buffer` is `None`
    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) -> Result<()>;

    /// Replace the whole store of the buffer bound to `target`
    fn upload_buffer(&mut self, target: BufferTarget, data: &[u8], usage: BufferUsage) -> Result<()>;

    /// Overwrite part of the store of the buffer bound to `target`
    ///
    /// # Arguments
    ///
    /// * `target` - Binding point whose buffer is updated
    /// * `byte_offset` - Offset in bytes from the start of the store
    /// * `data` - Bytes to write
    fn upload_sub_buffer(&mut self, target: BufferTarget, byte_offset: usize, data: &[u8]) -> Result<()>;

    /// Delete buffers in one batched call
    ///
    /// Names the device does not know are ignored.
    fn delete_buffers(&mut self, buffers: &[BufferId]) -> Result<()>;

    /// Whether `buffer` still names a live buffer (false after context loss)
    fn is_buffer(&self, buffer: BufferId) -> bool;

    /// Indexed draw using the buffer bound to `ElementIndexArray`
    fn draw_elements(&mut self, topology: PrimitiveTopology, count: usize, index_type: IndexType) -> Result<()>;
}
