/*!
# VBO Geometry

CPU/GPU buffer bookkeeping for vertex and index data.

The crate owns the mapping between CPU-resident attribute and index arrays and
the GPU buffer objects they are uploaded to. The graphics API itself is behind
the [`GraphicsDevice`](vbo::render::GraphicsDevice) trait; an in-memory
[`MockGraphicsDevice`](vbo::render::MockGraphicsDevice) ships with the crate.

## Architecture

- **BufferRegistry**: keyed descriptors, creation, validation, context-loss reload, destruction
- **IndexedBufferSet**: registry plus an index buffer sized from the vertex count
- **AttributeBufferSet**: one float buffer per vertex attribute, aliasing of other sets
- **InterleavedAttributeBuilder**: packs attributes into one buffer per element kind

Geometry types are single-threaded (`Rc`/`RefCell`) and meant to live on the
render thread. The device is shared as `Arc<Mutex<dyn GraphicsDevice>>`.
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod graphics_device;
pub mod resource;

// Main vbo namespace module
pub mod vbo {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine singleton
    pub use crate::engine::Engine;

    // Geometry types at the top of the namespace
    pub use crate::resource::{
        BufferRegistry, RegistryConfig,
        IndexedBufferSet,
        AttributeBufferSet, GeometryData,
        InterleavedAttributeBuilder, InterleavedGeometry,
    };

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
    }

    // Device sub-module
    pub mod render {
        pub use crate::graphics_device::*;
    }

    // Resource sub-module
    pub mod resource {
        pub use crate::resource::*;
    }
}

// Re-export math library at crate root
pub use glam;
