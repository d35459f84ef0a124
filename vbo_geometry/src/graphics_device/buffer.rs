/// Buffer handle, binding target and usage types shared with the device

use std::fmt;

/// Opaque GPU buffer name handed out by [`GraphicsDevice::allocate_buffer`]
///
/// [`GraphicsDevice::allocate_buffer`]: crate::graphics_device::GraphicsDevice::allocate_buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Binding point a buffer is uploaded to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Per-vertex attribute data (positions, normals, ...)
    VertexAttributeArray,
    /// Element indices used by indexed draws
    ElementIndexArray,
}

/// Upload usage hint
///
/// A hint only: it never constrains which operations are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Written once, drawn a few times
    StreamDraw,
    /// Written once, drawn many times
    StaticDraw,
    /// Rewritten often, drawn many times
    DynamicDraw,
}

impl Default for BufferUsage {
    fn default() -> Self {
        BufferUsage::StaticDraw
    }
}

/// Index buffer element type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// 8-bit indices (max 255 vertices)
    U8,
    /// 16-bit indices (max 65535 vertices)
    U16,
    /// 32-bit indices
    U32,
}

impl IndexType {
    /// Size in bytes of one index element
    pub fn size_bytes(&self) -> u32 {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }

    /// Narrowest index type able to address `vertex_count` vertices
    pub fn for_vertex_count(vertex_count: usize) -> Self {
        if vertex_count < 256 {
            IndexType::U8
        } else if vertex_count < 65536 {
            IndexType::U16
        } else {
            IndexType::U32
        }
    }
}

/// Primitive topology used by indexed draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    /// Triangle list
    TriangleList,
    /// Triangle strip
    TriangleStrip,
    /// Line list
    LineList,
    /// Point list
    PointList,
}
