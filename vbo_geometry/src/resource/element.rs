//! Element kinds and CPU-side typed storage.
//!
//! Every buffer holds elements of exactly one [`ElementKind`]. Operations that
//! depend on the concrete element type (allocation, range copies, compaction)
//! go through the static [`ElementOps`] table of the kind instead of matching
//! on the kind at every call site.

use std::cell::RefCell;
use std::rc::Rc;
use crate::error::Result;
use crate::engine_bail;
use crate::graphics_device::IndexType;

/// Numeric type of the elements stored in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
}

impl ElementKind {
    /// Order in which interleaved buffers are built
    pub const BUILD_ORDER: [ElementKind; 7] = [
        ElementKind::Byte,
        ElementKind::Float,
        ElementKind::Double,
        ElementKind::Short,
        ElementKind::Int,
        ElementKind::Long,
        ElementKind::Char,
    ];

    /// Size in bytes of one element
    pub fn byte_size(&self) -> usize {
        match self {
            ElementKind::Byte => 1,
            ElementKind::Short | ElementKind::Char => 2,
            ElementKind::Int | ElementKind::Float => 4,
            ElementKind::Long | ElementKind::Double => 8,
        }
    }

    /// Dispatch table for this kind
    pub fn ops(&self) -> &'static ElementOps {
        match self {
            ElementKind::Byte => &byte_ops::OPS,
            ElementKind::Short => &short_ops::OPS,
            ElementKind::Int => &int_ops::OPS,
            ElementKind::Long => &long_ops::OPS,
            ElementKind::Float => &float_ops::OPS,
            ElementKind::Double => &double_ops::OPS,
            ElementKind::Char => &char_ops::OPS,
        }
    }

    /// Index type a draw call uses for index buffers of this kind
    ///
    /// Only byte, short and int buffers can back an index buffer.
    pub fn index_type(&self) -> Option<IndexType> {
        match self {
            ElementKind::Byte => Some(IndexType::U8),
            ElementKind::Short => Some(IndexType::U16),
            ElementKind::Int => Some(IndexType::U32),
            _ => None,
        }
    }

    /// Element kind storing indices of the given width
    pub fn for_index_width(index_type: IndexType) -> Self {
        match index_type {
            IndexType::U8 => ElementKind::Byte,
            IndexType::U16 => ElementKind::Short,
            IndexType::U32 => ElementKind::Int,
        }
    }
}

/// Per-kind operations
///
/// Function pointers let generic code stay free of per-kind branches.
pub struct ElementOps {
    /// Zero-filled storage of `len` elements
    pub allocate: fn(len: usize) -> ElementData,
    /// Copy `len` elements from `src[src_start..]` into `dst[dst_start..]`
    pub copy_range: fn(src: &ElementData, src_start: usize, dst: &mut ElementData, dst_start: usize, len: usize) -> Result<()>,
    /// Shift `[position, len)` to the front; capacity is unchanged
    pub compact: fn(data: &mut ElementData, position: usize),
}

fn copy_slice<T: Copy>(src: &[T], src_start: usize, dst: &mut [T], dst_start: usize, len: usize) -> Result<()> {
    if src_start + len > src.len() || dst_start + len > dst.len() {
        engine_bail!("vbo::ElementOps", InvalidArgument,
            "Range copy of {} elements ({}..{} -> {}..{}) exceeds source {} / destination {}",
            len, src_start, src_start + len, dst_start, dst_start + len, src.len(), dst.len());
    }
    dst[dst_start..dst_start + len].copy_from_slice(&src[src_start..src_start + len]);
    Ok(())
}

fn compact_vec<T: Copy>(data: &mut [T], position: usize) {
    let position = position.min(data.len());
    data.copy_within(position.., 0);
}

macro_rules! element_ops {
    ($module:ident, $variant:ident, $ty:ty) => {
        mod $module {
            use super::*;

            fn allocate(len: usize) -> ElementData {
                ElementData::$variant(vec![<$ty as bytemuck::Zeroable>::zeroed(); len])
            }

            fn copy_range(src: &ElementData, src_start: usize, dst: &mut ElementData, dst_start: usize, len: usize) -> Result<()> {
                match (src, dst) {
                    (ElementData::$variant(s), ElementData::$variant(d)) => copy_slice(s, src_start, d, dst_start, len),
                    (s, d) => crate::engine_bail!("vbo::ElementOps", InvalidArgument,
                        "Cannot copy {:?} elements into {:?} storage through {:?} ops",
                        s.kind(), d.kind(), ElementKind::$variant),
                }
            }

            fn compact(data: &mut ElementData, position: usize) {
                if let ElementData::$variant(v) = data {
                    compact_vec(v, position);
                }
            }

            pub(super) static OPS: ElementOps = ElementOps { allocate, copy_range, compact };
        }
    };
}

element_ops!(byte_ops, Byte, u8);
element_ops!(short_ops, Short, u16);
element_ops!(int_ops, Int, i32);
element_ops!(long_ops, Long, i64);
element_ops!(float_ops, Float, f32);
element_ops!(double_ops, Double, f64);
element_ops!(char_ops, Char, u16);

/// Owned, contiguous, native-endian element storage
///
/// Byte and short storage is unsigned: the device reads those buffers as
/// unsigned indices.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementData {
    Byte(Vec<u8>),
    Short(Vec<u16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Char(Vec<u16>),
}

impl ElementData {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementData::Byte(_) => ElementKind::Byte,
            ElementData::Short(_) => ElementKind::Short,
            ElementData::Int(_) => ElementKind::Int,
            ElementData::Long(_) => ElementKind::Long,
            ElementData::Float(_) => ElementKind::Float,
            ElementData::Double(_) => ElementKind::Double,
            ElementData::Char(_) => ElementKind::Char,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ElementData::Byte(v) => v.len(),
            ElementData::Short(v) | ElementData::Char(v) => v.len(),
            ElementData::Int(v) => v.len(),
            ElementData::Long(v) => v.len(),
            ElementData::Float(v) => v.len(),
            ElementData::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Native-endian byte view, as uploaded to the device
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ElementData::Byte(v) => v.as_slice(),
            ElementData::Short(v) | ElementData::Char(v) => bytemuck::cast_slice(v),
            ElementData::Int(v) => bytemuck::cast_slice(v),
            ElementData::Long(v) => bytemuck::cast_slice(v),
            ElementData::Float(v) => bytemuck::cast_slice(v),
            ElementData::Double(v) => bytemuck::cast_slice(v),
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            ElementData::Float(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Element `i` widened to i64, for integer kinds
    pub fn integer_at(&self, i: usize) -> Option<i64> {
        match self {
            ElementData::Byte(v) => v.get(i).map(|x| *x as i64),
            ElementData::Short(v) | ElementData::Char(v) => v.get(i).map(|x| *x as i64),
            ElementData::Int(v) => v.get(i).map(|x| *x as i64),
            ElementData::Long(v) => v.get(i).copied(),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for ElementData {
    fn from(v: Vec<u8>) -> Self {
        ElementData::Byte(v)
    }
}

impl From<Vec<u16>> for ElementData {
    fn from(v: Vec<u16>) -> Self {
        ElementData::Short(v)
    }
}

impl From<Vec<i32>> for ElementData {
    fn from(v: Vec<i32>) -> Self {
        ElementData::Int(v)
    }
}

impl From<Vec<i64>> for ElementData {
    fn from(v: Vec<i64>) -> Self {
        ElementData::Long(v)
    }
}

impl From<Vec<f32>> for ElementData {
    fn from(v: Vec<f32>) -> Self {
        ElementData::Float(v)
    }
}

impl From<&[f32]> for ElementData {
    fn from(v: &[f32]) -> Self {
        ElementData::Float(v.to_vec())
    }
}

impl From<Vec<f64>> for ElementData {
    fn from(v: Vec<f64>) -> Self {
        ElementData::Double(v)
    }
}

/// CPU-resident buffer: typed storage plus a read/write cursor
#[derive(Debug, Clone, PartialEq)]
pub struct CpuBuffer {
    data: ElementData,
    position: usize,
}

/// CPU buffer shared by every descriptor that windows into it
pub type SharedCpuBuffer = Rc<RefCell<CpuBuffer>>;

impl CpuBuffer {
    pub fn new(data: ElementData) -> Self {
        Self { data, position: 0 }
    }

    /// Zero-filled buffer of `capacity` elements
    pub fn allocate(kind: ElementKind, capacity: usize) -> Self {
        Self::new((kind.ops().allocate)(capacity))
    }

    pub fn into_shared(self) -> SharedCpuBuffer {
        Rc::new(RefCell::new(self))
    }

    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.capacity() {
            engine_bail!("vbo::CpuBuffer", InvalidArgument,
                "Position {} past capacity {}", position, self.capacity());
        }
        self.position = position;
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Discard the consumed prefix `[0, position)` and rewind
    ///
    /// Unconsumed elements move to the front. Capacity is kept, so the tail
    /// keeps its previous contents.
    pub fn compact(&mut self) {
        (self.data.kind().ops().compact)(&mut self.data, self.position);
        self.position = 0;
    }

    pub fn data(&self) -> &ElementData {
        &self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Copy `len` elements of `src` (from `src_start`) to `index`; cursor untouched
    pub fn write_at(&mut self, index: usize, src: &ElementData, src_start: usize, len: usize) -> Result<()> {
        (self.data.kind().ops().copy_range)(src, src_start, &mut self.data, index, len)
    }

    /// Relative put: write at the cursor and advance it
    pub fn put(&mut self, src: &ElementData, src_start: usize, len: usize) -> Result<()> {
        self.write_at(self.position, src, src_start, len)?;
        self.position += len;
        Ok(())
    }

    /// Replace the storage wholesale and rewind
    pub fn replace(&mut self, data: ElementData) {
        self.data = data;
        self.position = 0;
    }
}

#[cfg(test)]
#[path = "element_tests.rs"]
mod tests;
