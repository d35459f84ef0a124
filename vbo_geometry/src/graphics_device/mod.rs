/// Graphics device module - buffer-level device contract and its types

// Module declarations
pub mod graphics_device;
pub mod buffer;

// Re-export everything from graphics_device.rs
pub use graphics_device::*;
pub use buffer::*;

// In-memory device for tests and headless tooling (no GPU required)
pub mod mock_graphics_device;
pub use mock_graphics_device::MockGraphicsDevice;
