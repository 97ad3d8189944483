//! Client buffers
//!
//! A buffer is produced by a client and displayed by zero or more scene
//! nodes. It stays alive until the client has released it and no node
//! references it anymore; a disconnecting client may also destroy it
//! outright, in which case every later read sees it as gone.

use log::{debug, warn};

use crate::compositor::ClientId;
use crate::resource::{arena_key, Arena, Lookup, ResourceError};

arena_key!(
    /// Handle to a tracked buffer
    BufferId
);

/// Supported pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferFormat {
    /// 32-bit ARGB (A in high byte)
    Argb8888,
    /// 32-bit XRGB (X in high byte, alpha ignored)
    Xrgb8888,
    /// Other format with raw value
    Other(u32),
}

impl BufferFormat {
    /// Create from a wl_shm format value
    pub fn from_wayland(format: u32) -> Self {
        match format {
            0 => BufferFormat::Argb8888,
            1 => BufferFormat::Xrgb8888,
            other => BufferFormat::Other(other),
        }
    }

    /// Convert to a wl_shm format value
    pub fn to_wayland(&self) -> u32 {
        match self {
            BufferFormat::Argb8888 => 0,
            BufferFormat::Xrgb8888 => 1,
            BufferFormat::Other(v) => *v,
        }
    }

    /// Get bytes per pixel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            BufferFormat::Argb8888 | BufferFormat::Xrgb8888 => 4,
            BufferFormat::Other(_) => 4,
        }
    }
}

/// Pixel content handle
#[derive(Debug, Clone)]
pub struct Buffer {
    /// Client that produced the buffer
    pub owner: ClientId,
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Pixel format
    pub format: BufferFormat,
    client_held: bool,
    scene_refs: u32,
}

impl Buffer {
    /// Whether the producing client still holds the buffer
    pub fn client_held(&self) -> bool {
        self.client_held
    }

    /// Number of scene nodes displaying the buffer
    pub fn scene_refs(&self) -> u32 {
        self.scene_refs
    }
}

/// Outcome of dropping one holder of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRelease {
    /// Other holders remain
    Retained,
    /// The scene no longer reads the buffer; the client may reuse it
    Idle,
    /// Both sides released it and it is no longer tracked
    Destroyed,
}

/// Buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("invalid buffer size {width}x{height}")]
    InvalidSize { width: i32, height: i32 },
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Tracks every live buffer
#[derive(Debug, Default)]
pub struct BufferStore {
    buffers: Arena<BufferId, Buffer>,
}

impl BufferStore {
    /// Create a new buffer store
    pub fn new() -> Self {
        Self {
            buffers: Arena::new(),
        }
    }

    /// Track a new client buffer
    pub fn create(
        &mut self,
        owner: ClientId,
        width: i32,
        height: i32,
        format: BufferFormat,
    ) -> Result<BufferId, BufferError> {
        if width <= 0 || height <= 0 {
            return Err(BufferError::InvalidSize { width, height });
        }

        let id = self.buffers.track(Buffer {
            owner,
            width,
            height,
            format,
            client_held: true,
            scene_refs: 0,
        });
        debug!("Created buffer {} {}x{} for {:?}", id, width, height, owner);
        Ok(id)
    }

    /// Liveness-checked read
    pub fn lookup(&self, id: BufferId) -> Lookup<'_, Buffer> {
        self.buffers.lookup(id)
    }

    pub fn is_live(&self, id: BufferId) -> bool {
        self.buffers.is_live(id)
    }

    /// Record that a scene node now displays the buffer
    pub fn attach(&mut self, id: BufferId) -> Result<(), ResourceError> {
        let buffer = self.buffers.require_mut(id)?;
        buffer.scene_refs += 1;
        Ok(())
    }

    /// The client gave up its handle
    pub fn release_client(&mut self, id: BufferId) -> Result<BufferRelease, ResourceError> {
        let buffer = self.buffers.require_mut(id)?;
        if !buffer.client_held {
            warn!("Buffer {} released twice by its client", id);
            return Err(ResourceError::double_release(id));
        }
        buffer.client_held = false;
        self.collect(id)
    }

    /// A scene node stopped displaying the buffer
    pub fn release_scene(&mut self, id: BufferId) -> Result<BufferRelease, ResourceError> {
        let buffer = self.buffers.require_mut(id)?;
        if buffer.scene_refs == 0 {
            warn!("Buffer {} released twice by the scene", id);
            return Err(ResourceError::double_release(id));
        }
        buffer.scene_refs -= 1;
        if buffer.scene_refs == 0 && buffer.client_held {
            return Ok(BufferRelease::Idle);
        }
        self.collect(id)
    }

    /// Destroy a buffer regardless of its holders
    pub fn destroy(&mut self, id: BufferId) -> Result<Buffer, ResourceError> {
        let buffer = self.buffers.release(id)?;
        debug!("Destroyed buffer {}", id);
        Ok(buffer)
    }

    /// Destroy every buffer owned by a client
    pub fn destroy_owned_by(&mut self, owner: ClientId) -> Vec<BufferId> {
        let owned: Vec<BufferId> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| buffer.owner == owner)
            .map(|(id, _)| id)
            .collect();
        owned
            .into_iter()
            .filter(|id| match self.buffers.release(*id) {
                Ok(_) => true,
                Err(err) => {
                    warn!("Failed to destroy buffer {}: {}", id, err);
                    false
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn collect(&mut self, id: BufferId) -> Result<BufferRelease, ResourceError> {
        let buffer = self.buffers.require(id)?;
        if buffer.client_held || buffer.scene_refs > 0 {
            return Ok(BufferRelease::Retained);
        }
        self.buffers.release(id)?;
        debug!("Buffer {} fully released", id);
        Ok(BufferRelease::Destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_format() {
        assert_eq!(BufferFormat::from_wayland(0), BufferFormat::Argb8888);
        assert_eq!(BufferFormat::Argb8888.to_wayland(), 0);
        assert_eq!(BufferFormat::from_wayland(42), BufferFormat::Other(42));
        assert_eq!(BufferFormat::Xrgb8888.bytes_per_pixel(), 4);
    }

    #[test]
    fn test_invalid_size() {
        let mut store = BufferStore::new();
        assert_eq!(
            store.create(ClientId(1), 0, 10, BufferFormat::Argb8888),
            Err(BufferError::InvalidSize {
                width: 0,
                height: 10
            })
        );
    }

    #[test]
    fn test_shared_lifetime() {
        let mut store = BufferStore::new();
        let id = store
            .create(ClientId(1), 64, 64, BufferFormat::Argb8888)
            .unwrap();
        store.attach(id).unwrap();

        assert_eq!(store.release_client(id), Ok(BufferRelease::Retained));
        assert!(store.is_live(id));

        assert_eq!(store.release_scene(id), Ok(BufferRelease::Destroyed));
        assert!(!store.is_live(id));
    }

    #[test]
    fn test_scene_release_leaves_client_buffer_idle() {
        let mut store = BufferStore::new();
        let id = store
            .create(ClientId(1), 64, 64, BufferFormat::Xrgb8888)
            .unwrap();
        store.attach(id).unwrap();
        assert_eq!(store.release_scene(id), Ok(BufferRelease::Idle));
        assert!(store.is_live(id));
        assert_eq!(store.release_client(id), Ok(BufferRelease::Destroyed));
    }

    #[test]
    fn test_client_double_release() {
        let mut store = BufferStore::new();
        let id = store
            .create(ClientId(1), 8, 8, BufferFormat::Argb8888)
            .unwrap();
        store.attach(id).unwrap();
        assert!(store.release_client(id).is_ok());
        assert!(matches!(
            store.release_client(id),
            Err(ResourceError::DoubleRelease { .. })
        ));
    }

    #[test]
    fn test_destroy_owned_by() {
        let mut store = BufferStore::new();
        let a = store
            .create(ClientId(1), 8, 8, BufferFormat::Argb8888)
            .unwrap();
        let b = store
            .create(ClientId(2), 8, 8, BufferFormat::Argb8888)
            .unwrap();
        store.attach(a).unwrap();

        assert_eq!(store.destroy_owned_by(ClientId(1)), vec![a]);
        assert!(store.lookup(a).is_gone());
        assert!(store.is_live(b));
    }
}
