/// Keyed collection of buffer descriptors and their GPU lifecycle.
///
/// The registry is the only place that talks to the [`GraphicsDevice`] about
/// buffers: creation, validation after context loss, in-place updates, usage
/// changes and batched destruction.
///
/// Keys are handed out by insertion count: the Nth registered descriptor gets
/// key N-1. `add_buffer` uploads and registers; `set_buffer_info` only
/// registers, so pre-built or shared descriptors can be attached without a
/// second upload.
///
/// Entries are either `Owned` (this registry created, and will delete, the GPU
/// buffer) or `Borrowed` from another registry. Borrowed entries are never
/// uploaded, resized or deleted through this registry.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use crate::error::Result;
use crate::{engine_bail, engine_err, engine_debug, engine_info, engine_trace, engine_warn};
use crate::graphics_device::{BufferId, BufferTarget, BufferUsage, GraphicsDevice};
use crate::resource::descriptor::{BufferDescriptor, DescriptorRef, GpuHandle};
use crate::resource::element::{CpuBuffer, ElementData, SharedCpuBuffer};

const SOURCE: &str = "vbo::BufferRegistry";

// ===== CONFIG =====

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Name used in log lines and `Display`
    pub label: String,
    /// Usage hint for descriptors the geometry layer creates itself
    pub default_usage: BufferUsage,
    /// Log a warning when index values do not fit the selected index width
    pub warn_on_index_truncation: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            label: "geometry".to_string(),
            default_usage: BufferUsage::StaticDraw,
            warn_on_index_truncation: true,
        }
    }
}

// ===== IDENTITY AND OWNERSHIP =====

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique registry identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryId(u64);

impl RegistryId {
    fn next() -> Self {
        RegistryId(NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry-{}", self.0)
    }
}

/// Who deletes the GPU buffer of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    /// Alias of a descriptor owned by another registry
    Borrowed(RegistryId),
}

#[derive(Debug)]
struct RegistryEntry {
    descriptor: DescriptorRef,
    ownership: Ownership,
}

// ===== BUFFER REGISTRY =====

pub struct BufferRegistry {
    id: RegistryId,
    device: Arc<Mutex<dyn GraphicsDevice>>,
    entries: BTreeMap<usize, RegistryEntry>,
    buffers_created: bool,
    config: RegistryConfig,
}

impl BufferRegistry {
    pub fn new(device: Arc<Mutex<dyn GraphicsDevice>>) -> Self {
        Self::with_config(device, RegistryConfig::default())
    }

    pub fn with_config(device: Arc<Mutex<dyn GraphicsDevice>>, config: RegistryConfig) -> Self {
        Self {
            id: RegistryId::next(),
            device,
            entries: BTreeMap::new(),
            buffers_created: false,
            config,
        }
    }

    // ===== ACCESSORS =====

    pub fn id(&self) -> RegistryId {
        self.id
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<Mutex<dyn GraphicsDevice>> {
        &self.device
    }

    pub fn buffers_created(&self) -> bool {
        self.buffers_created
    }

    pub fn buffer_count(&self) -> usize {
        self.entries.len()
    }

    pub fn buffer_info(&self, key: usize) -> Option<DescriptorRef> {
        self.entries.get(&key).map(|e| e.descriptor.clone())
    }

    pub fn has_buffer(&self, key: usize) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn ownership(&self, key: usize) -> Option<Ownership> {
        self.entries.get(&key).map(|e| e.ownership)
    }

    /// Registered keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    pub(crate) fn lock_device(&self) -> Result<MutexGuard<'_, dyn GraphicsDevice + 'static>> {
        self.device.lock()
            .map_err(|_| engine_err!(SOURCE, BackendError, "Graphics device lock poisoned"))
    }

    // ===== REGISTRATION =====

    /// Upload `descriptor` (when it has CPU data) and register it at the next key
    pub fn add_buffer(&mut self, descriptor: DescriptorRef) -> Result<usize> {
        let key = self.next_key()?;
        self.create_buffer_object(&descriptor)?;
        descriptor.borrow_mut().set_registry_key(Some(key));
        self.entries.insert(key, RegistryEntry { descriptor, ownership: Ownership::Owned });
        Ok(key)
    }

    /// Register `descriptor` at `key` without any GPU work
    ///
    /// Returns the previous occupant so the caller can release it.
    pub fn set_buffer_info(&mut self, key: usize, descriptor: DescriptorRef) -> Option<DescriptorRef> {
        descriptor.borrow_mut().set_registry_key(Some(key));
        self.entries
            .insert(key, RegistryEntry { descriptor, ownership: Ownership::Owned })
            .map(|e| e.descriptor)
    }

    /// Register `descriptor` at the next key without any GPU work
    pub fn append_buffer_info(&mut self, descriptor: DescriptorRef) -> Result<usize> {
        let key = self.next_key()?;
        self.set_buffer_info(key, descriptor);
        Ok(key)
    }

    /// Register an alias of another registry's descriptor at the next key
    pub fn add_borrowed(&mut self, descriptor: DescriptorRef, owner: RegistryId) -> Result<usize> {
        let key = self.next_key()?;
        self.entries.insert(key, RegistryEntry { descriptor, ownership: Ownership::Borrowed(owner) });
        Ok(key)
    }

    /// Register an alias at `key`, returning the previous occupant
    pub fn set_borrowed(&mut self, key: usize, descriptor: DescriptorRef, owner: RegistryId) -> Option<DescriptorRef> {
        self.entries
            .insert(key, RegistryEntry { descriptor, ownership: Ownership::Borrowed(owner) })
            .map(|e| e.descriptor)
    }

    /// Drop the entry at `key` without GPU work
    pub fn remove_buffer_info(&mut self, key: usize) -> Option<DescriptorRef> {
        self.entries.remove(&key).map(|e| e.descriptor)
    }

    fn next_key(&self) -> Result<usize> {
        let key = self.entries.len();
        if self.entries.contains_key(&key) {
            engine_bail!(SOURCE, InvalidState,
                "'{}': next sequential key {} is already occupied", self.config.label, key);
        }
        Ok(key)
    }

    fn ensure_not_borrowed(&self, descriptor: &DescriptorRef) -> Result<()> {
        let borrowed = self.entries.values().any(|e| {
            matches!(e.ownership, Ownership::Borrowed(_)) && Rc::ptr_eq(&e.descriptor, descriptor)
        });
        if borrowed {
            engine_bail!(SOURCE, InvalidState,
                "'{}': descriptor is borrowed from another geometry and cannot be modified here",
                self.config.label);
        }
        Ok(())
    }

    // ===== GPU LIFECYCLE =====

    /// Compact and upload every owned descriptor that has CPU data
    ///
    /// Descriptors sharing one CPU buffer are uploaded once and share the
    /// handle. Both binding points are unbound afterwards.
    pub fn create_buffers(&mut self) -> Result<()> {
        let created = self.upload_pass(false)?;
        self.buffers_created = true;
        engine_info!(SOURCE, "'{}': created {} buffer object(s) for {} descriptor(s)",
            self.config.label, created, self.entries.len());
        Ok(())
    }

    /// Create buffers on first use, otherwise re-create those whose handle is unset
    pub fn validate_buffers(&mut self) -> Result<()> {
        if !self.buffers_created {
            return self.create_buffers();
        }
        let created = self.upload_pass(true)?;
        if created > 0 {
            engine_debug!(SOURCE, "'{}': re-created {} buffer object(s)", self.config.label, created);
        }
        Ok(())
    }

    /// Forget handles the device no longer knows, then validate
    pub fn reload(&mut self) -> Result<()> {
        {
            let device = self.lock_device()?;
            let mut lost = 0usize;
            for entry in self.entries.values().filter(|e| e.ownership == Ownership::Owned) {
                let mut descriptor = entry.descriptor.borrow_mut();
                if let GpuHandle::Live(id) = descriptor.gpu_handle() {
                    if !device.is_buffer(id) {
                        descriptor.set_gpu_handle(GpuHandle::Unset);
                        lost += 1;
                    }
                }
            }
            if lost > 0 {
                engine_info!(SOURCE, "'{}': {} buffer handle(s) lost, re-uploading", self.config.label, lost);
            }
        }
        self.validate_buffers()
    }

    /// Delete owned GPU buffers in one batch and empty the registry
    ///
    /// Owned descriptors lose their CPU buffer and are marked `Invalid`.
    /// Borrowed entries are only dropped. No-op on an empty registry.
    pub fn destroy(&mut self) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }

        let mut handles: Vec<BufferId> = Vec::new();
        for entry in self.entries.values().filter(|e| e.ownership == Ownership::Owned) {
            if let Some(id) = entry.descriptor.borrow().gpu_handle().id() {
                if !handles.contains(&id) {
                    handles.push(id);
                }
            }
        }
        if !handles.is_empty() {
            self.lock_device()?.delete_buffers(&handles)?;
        }

        for (key, entry) in std::mem::take(&mut self.entries) {
            if entry.ownership != Ownership::Owned {
                continue;
            }
            if Rc::strong_count(&entry.descriptor) > 1 {
                engine_warn!(SOURCE,
                    "'{}': destroying buffer {} while it is still referenced elsewhere; aliases become invalid",
                    self.config.label, key);
            }
            let mut descriptor = entry.descriptor.borrow_mut();
            descriptor.set_cpu_buffer(None);
            descriptor.set_gpu_handle(GpuHandle::Invalid);
        }

        self.buffers_created = false;
        engine_info!(SOURCE, "'{}': destroyed, {} GPU buffer(s) deleted", self.config.label, handles.len());
        Ok(())
    }

    /// Upload a single descriptor
    ///
    /// Allocates a handle unless the descriptor already has a live one, binds
    /// it, pushes `capacity * element_byte_size` bytes and unbinds. A
    /// descriptor without CPU data is skipped.
    pub fn create_buffer_object(&self, descriptor: &DescriptorRef) -> Result<()> {
        let mut device = self.lock_device()?;
        let mut descriptor = descriptor.borrow_mut();
        Self::upload_descriptor(&mut *device, &mut descriptor)?;
        Ok(())
    }

    /// Delete the GPU buffer and re-create it with a new usage hint
    ///
    /// Registered descriptors on the same GPU buffer or CPU storage (the other
    /// windows of an interleaved buffer) move to the new handle and usage.
    pub fn change_buffer_usage(&self, descriptor: &DescriptorRef, usage: BufferUsage) -> Result<()> {
        self.ensure_not_borrowed(descriptor)?;
        let siblings = self.descriptors_sharing(descriptor);
        let mut device = self.lock_device()?;
        let handle = {
            let mut descriptor = descriptor.borrow_mut();
            if let Some(id) = descriptor.gpu_handle().id() {
                device.delete_buffers(&[id])?;
                descriptor.set_gpu_handle(GpuHandle::Unset);
            }
            descriptor.set_usage(usage);
            Self::upload_descriptor(&mut *device, &mut descriptor)?;
            descriptor.gpu_handle()
        };
        for sibling in &siblings {
            let mut sibling = sibling.borrow_mut();
            sibling.set_usage(usage);
            sibling.set_gpu_handle(handle);
        }
        if !siblings.is_empty() {
            engine_debug!(SOURCE, "'{}': {} sibling window(s) moved to the new buffer", self.config.label, siblings.len());
        }
        Ok(())
    }

    /// Update part of a live buffer, optionally growing it
    ///
    /// * `resize == false` - sub-range upload of `count` elements at
    ///   `index * element_byte_size`; the device decides what happens past the
    ///   end of its store. The CPU copy is written through when the range fits.
    /// * `resize && index == 0` - the CPU buffer is replaced by `new_data` and
    ///   `count` elements are re-uploaded.
    /// * `resize && index > 0` - see [`BufferRegistry::build_resized_buffer`];
    ///   the whole resulting buffer is re-uploaded.
    ///
    /// Inputs are checked before anything is touched: `new_data` must match
    /// the descriptor's element kind and hold at least `count` elements.
    pub fn change_buffer_data(
        &self,
        descriptor: &DescriptorRef,
        new_data: &ElementData,
        index: usize,
        count: usize,
        resize: bool,
    ) -> Result<()> {
        self.ensure_not_borrowed(descriptor)?;
        let mut descriptor = descriptor.borrow_mut();

        let kind = descriptor.element_kind();
        if new_data.kind() != kind {
            engine_bail!(SOURCE, InvalidArgument,
                "New data is {:?} but the buffer holds {:?}", new_data.kind(), kind);
        }
        if new_data.len() < count {
            engine_bail!(SOURCE, InvalidArgument,
                "Asked for {} elements but new data only holds {}", count, new_data.len());
        }
        if resize && descriptor.is_interleaved() {
            engine_bail!(SOURCE, InvalidArgument,
                "Cannot resize an interleaved window; its GPU buffer is shared with other attributes");
        }
        let id = match descriptor.gpu_handle() {
            GpuHandle::Live(id) => id,
            handle => engine_bail!(SOURCE, InvalidState,
                "Cannot change data of a buffer that is not uploaded ({:?})", handle),
        };
        let resized = if resize && index > 0 {
            match descriptor.cpu_buffer() {
                Some(old) => Some(Self::build_resized_buffer(old, new_data, index, count)?),
                None => engine_bail!(SOURCE, InvalidState, "Cannot resize a buffer without CPU data"),
            }
        } else {
            None
        };

        let byte_size = kind.byte_size();
        let target = descriptor.target();
        let usage = descriptor.usage();
        let bytes = &new_data.as_bytes()[..count * byte_size];

        let mut device = self.lock_device()?;
        device.bind_buffer(target, Some(id))?;
        let result = if let Some(resized) = resized {
            let upload = device.upload_buffer(target, resized.borrow().as_bytes(), usage);
            descriptor.set_cpu_buffer(Some(resized));
            upload
        } else if resize {
            descriptor.set_cpu_buffer(Some(CpuBuffer::new(new_data.clone()).into_shared()));
            device.upload_buffer(target, bytes, usage)
        } else {
            let upload = device.upload_sub_buffer(target, index * byte_size, bytes);
            if upload.is_ok() {
                if let Some(buffer) = descriptor.cpu_buffer() {
                    let mut buffer = buffer.borrow_mut();
                    if index + count <= buffer.capacity() {
                        buffer.write_at(index, new_data, 0, count)?;
                    }
                }
            }
            upload
        };
        device.bind_buffer(target, None)?;
        descriptor.set_element_byte_size(byte_size);
        // The descriptor kept its handle; a failed upload leaves the CPU side
        // authoritative for the next validate pass
        result
    }

    /// Overlay `count` elements of `new_data` at `index` on top of `old`
    ///
    /// The first `index` old elements are kept. When `old` is too small to
    /// hold `index + count` elements a new buffer is allocated; otherwise
    /// `old` is updated in place and returned. The result is rewound.
    pub fn build_resized_buffer(
        old: &SharedCpuBuffer,
        new_data: &ElementData,
        index: usize,
        count: usize,
    ) -> Result<SharedCpuBuffer> {
        let (kind, capacity) = {
            let old = old.borrow();
            (old.kind(), old.capacity())
        };
        if new_data.kind() != kind {
            engine_bail!(SOURCE, InvalidArgument,
                "Cannot resize a {:?} buffer with {:?} data", kind, new_data.kind());
        }
        if count > new_data.len() {
            engine_bail!(SOURCE, InvalidArgument,
                "Asked for {} elements but new data only holds {}", count, new_data.len());
        }
        if index > capacity {
            engine_bail!(SOURCE, InvalidArgument,
                "Resize index {} is past the old capacity {}", index, capacity);
        }

        let ops = kind.ops();
        if capacity < index + count {
            let mut data = (ops.allocate)(index + count);
            (ops.copy_range)(old.borrow().data(), 0, &mut data, 0, index)?;
            (ops.copy_range)(new_data, 0, &mut data, index, count)?;
            engine_trace!(SOURCE, "Grew {:?} buffer from {} to {} elements", kind, capacity, index + count);
            Ok(CpuBuffer::new(data).into_shared())
        } else {
            {
                let mut buffer = old.borrow_mut();
                buffer.write_at(index, new_data, 0, count)?;
                buffer.rewind();
            }
            Ok(old.clone())
        }
    }

    /// Delete the GPU buffers of descriptors this registry replaced
    ///
    /// A buffer still used by a registered descriptor is kept. Released
    /// descriptors that are no longer registered here are marked `Invalid`.
    pub fn release_replaced(&self, released: Vec<DescriptorRef>) -> Result<()> {
        if released.is_empty() {
            return Ok(());
        }
        let in_use: Vec<BufferId> = self.entries.values()
            .filter_map(|e| e.descriptor.borrow().gpu_handle().id())
            .collect();

        let mut stale: Vec<BufferId> = Vec::new();
        for descriptor in &released {
            if self.entries.values().any(|e| Rc::ptr_eq(&e.descriptor, descriptor)) {
                continue;
            }
            let mut descriptor = descriptor.borrow_mut();
            if let Some(id) = descriptor.gpu_handle().id() {
                if !in_use.contains(&id) && !stale.contains(&id) {
                    stale.push(id);
                }
                descriptor.set_gpu_handle(GpuHandle::Invalid);
            }
        }
        if !stale.is_empty() {
            self.lock_device()?.delete_buffers(&stale)?;
            engine_debug!(SOURCE, "'{}': released {} replaced GPU buffer(s)", self.config.label, stale.len());
        }
        Ok(())
    }

    // ===== INTERNALS =====

    /// Other registered descriptors on the same GPU buffer or CPU storage
    fn descriptors_sharing(&self, descriptor: &DescriptorRef) -> Vec<DescriptorRef> {
        let target = descriptor.borrow();
        let id = target.gpu_handle().id();
        let sharing = self.entries.values()
            .filter(|e| !Rc::ptr_eq(&e.descriptor, descriptor))
            .filter(|e| {
                let other = e.descriptor.borrow();
                (id.is_some() && other.gpu_handle().id() == id) || other.shares_cpu_buffer_with(&target)
            })
            .map(|e| e.descriptor.clone())
            .collect();
        sharing
    }

    /// Upload owned descriptors (all, or only those with an unset handle)
    ///
    /// Returns the number of device uploads performed.
    fn upload_pass(&mut self, only_unset: bool) -> Result<usize> {
        let mut device = self.lock_device()?;
        let mut uploaded: FxHashMap<*const std::cell::RefCell<CpuBuffer>, BufferId> = FxHashMap::default();
        let mut count = 0usize;

        for entry in self.entries.values().filter(|e| e.ownership == Ownership::Owned) {
            let mut descriptor = entry.descriptor.borrow_mut();
            if only_unset && descriptor.gpu_handle() != GpuHandle::Unset {
                continue;
            }
            let buffer = match descriptor.cpu_buffer() {
                Some(buffer) => buffer.clone(),
                None => continue,
            };
            let shared_key = Rc::as_ptr(&buffer);

            if let Some(id) = uploaded.get(&shared_key) {
                let byte_size = descriptor.element_kind().byte_size();
                descriptor.set_gpu_handle(GpuHandle::Live(*id));
                descriptor.set_element_byte_size(byte_size);
                continue;
            }

            buffer.borrow_mut().compact();
            if let Some(id) = Self::upload_descriptor(&mut *device, &mut descriptor)? {
                uploaded.insert(shared_key, id);
                count += 1;
            }
        }

        device.bind_buffer(BufferTarget::ElementIndexArray, None)?;
        device.bind_buffer(BufferTarget::VertexAttributeArray, None)?;
        Ok(count)
    }

    fn upload_descriptor(device: &mut dyn GraphicsDevice, descriptor: &mut BufferDescriptor) -> Result<Option<BufferId>> {
        let buffer = match descriptor.cpu_buffer() {
            Some(buffer) => buffer.clone(),
            None => return Ok(None),
        };
        let buffer = buffer.borrow();
        let byte_size = buffer.kind().byte_size();
        let target = descriptor.target();

        let (id, fresh) = match descriptor.gpu_handle() {
            GpuHandle::Live(id) if device.is_buffer(id) => (id, false),
            _ => (device.allocate_buffer()?, true),
        };

        let result = device.bind_buffer(target, Some(id))
            .and_then(|_| device.upload_buffer(target, buffer.as_bytes(), descriptor.usage()))
            .and_then(|_| device.bind_buffer(target, None));
        if let Err(error) = result {
            if fresh {
                let _ = device.delete_buffers(&[id]);
            }
            return Err(error);
        }

        engine_trace!(SOURCE, "Uploaded {} {:?} element(s) ({} bytes) to buffer {} on {:?}",
            buffer.capacity(), buffer.kind(), buffer.capacity() * byte_size, id, target);
        descriptor.set_element_byte_size(byte_size);
        descriptor.set_gpu_handle(GpuHandle::Live(id));
        Ok(Some(id))
    }
}

impl fmt::Display for BufferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BufferRegistry '{}' ({}, {} buffer(s), created: {})",
            self.config.label, self.id, self.entries.len(), self.buffers_created)?;
        for (key, entry) in &self.entries {
            let descriptor = entry.descriptor.borrow();
            let handle = match descriptor.gpu_handle() {
                GpuHandle::Live(id) => id.to_string(),
                GpuHandle::Unset => "unset".to_string(),
                GpuHandle::Invalid => "invalid".to_string(),
            };
            let ownership = match entry.ownership {
                Ownership::Owned => "owned".to_string(),
                Ownership::Borrowed(owner) => format!("borrowed from {}", owner),
            };
            writeln!(f, "  [{}] {:?} {:?} x{} handle {} ({})",
                key, descriptor.element_kind(), descriptor.target(), descriptor.capacity(), handle, ownership)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BufferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRegistry")
            .field("id", &self.id)
            .field("label", &self.config.label)
            .field("buffers", &self.entries.len())
            .field("buffers_created", &self.buffers_created)
            .finish()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
