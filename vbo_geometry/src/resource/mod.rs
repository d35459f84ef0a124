//! Buffer resources
//!
//! CPU-side element storage, buffer descriptors, the registry that owns their
//! GPU lifecycle, and the geometry layers built on top of it.

pub mod element;
pub mod descriptor;
pub mod registry;
pub mod indexed;
pub mod attribute_set;
pub mod interleaved;

pub use element::{
    ElementKind, ElementOps, ElementData,
    CpuBuffer, SharedCpuBuffer,
};
pub use descriptor::{BufferDescriptor, DescriptorRef, GpuHandle};
pub use registry::{BufferRegistry, RegistryConfig, RegistryId, Ownership};
pub use indexed::IndexedBufferSet;
pub use attribute_set::{
    AttributeBufferSet, AttributeFlags, AttributeSlot,
    GeometryData,
};
pub use interleaved::{InterleavedAttributeBuilder, InterleavedGeometry};
