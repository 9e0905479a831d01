//! Surface registry
//!
//! Surfaces live in one flat, insertion-ordered registry owned by the
//! compositor. Subsurface relationships are registry links (parent id plus an
//! ordered child list), never ownership: destroying a parent detaches its
//! children, it does not destroy them.

use log::{debug, warn};
use std::cell::RefCell;
use std::fmt;
use wayland_server::backend::ClientId;
use wayland_server::protocol::{wl_callback::WlCallback, wl_output, wl_surface::WlSurface};
use wayland_server::Resource;

use crate::buffer::ClientBuffer;
use crate::error::{CompositorError, Result};

/// Compositor-wide surface identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// User data attached to every `wl_surface` resource
#[derive(Debug, Clone, Copy)]
pub struct SurfaceData {
    pub id: SurfaceId,
}

/// Application-side implementation bound to a surface
pub trait SurfaceHandler {
    /// Short name used in logs
    fn kind(&self) -> &str {
        "surface"
    }

    /// Called after pending state has been applied
    fn committed(&mut self, _state: &SurfaceState) {}

    /// Called once, right before the surface leaves the registry
    fn about_to_be_destroyed(&mut self) {}
}

/// Implementation used when nobody binds one during "surface requested"
#[derive(Debug, Default)]
pub struct DefaultSurface;

impl SurfaceHandler for DefaultSurface {}

/// Builds the fallback surface implementation
pub trait SurfaceFactory {
    fn create_default_surface(&self, request: &SurfaceRequest) -> Box<dyn SurfaceHandler>;
}

#[derive(Debug, Default)]
pub struct DefaultSurfaceFactory;

impl SurfaceFactory for DefaultSurfaceFactory {
    fn create_default_surface(&self, _request: &SurfaceRequest) -> Box<dyn SurfaceHandler> {
        Box::new(DefaultSurface)
    }
}

/// Payload of the "surface requested" notification.
///
/// A handler may call [`SurfaceRequest::bind`] once to supply its own
/// implementation; binding twice is a programming error.
pub struct SurfaceRequest {
    client: ClientId,
    id: u32,
    version: u32,
    binding: RefCell<Option<Box<dyn SurfaceHandler>>>,
}

impl fmt::Debug for SurfaceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceRequest")
            .field("client", &self.client)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl SurfaceRequest {
    pub(crate) fn new(client: ClientId, id: u32, version: u32) -> Self {
        Self {
            client,
            id,
            version,
            binding: RefCell::new(None),
        }
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// Protocol object id of the requested surface
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_bound(&self) -> bool {
        self.binding.borrow().is_some()
    }

    /// Bind an implementation to the requested surface
    pub fn bind(&self, handler: Box<dyn SurfaceHandler>) {
        let mut binding = self.binding.borrow_mut();
        assert!(
            binding.is_none(),
            "surface {} of client {:?} is already bound",
            self.id,
            self.client
        );
        *binding = Some(handler);
    }

    pub(crate) fn take_binding(&self) -> Option<Box<dyn SurfaceHandler>> {
        self.binding.borrow_mut().take()
    }
}

/// Integer rectangle in surface or buffer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Edges are computed in `i64`; client-supplied rectangles may reach past `i32::MAX`
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (x, y) = (i64::from(x), i64::from(y));
        let (left, top) = (i64::from(self.x), i64::from(self.y));
        x >= left && y >= top && x < left + i64::from(self.width) && y < top + i64::from(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionOp {
    Add,
    Subtract,
}

/// A set of rectangles built from add/subtract operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    ops: Vec<(RegionOp, Rect)>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rect: Rect) {
        self.ops.push((RegionOp::Add, rect));
    }

    pub fn subtract(&mut self, rect: Rect) {
        self.ops.push((RegionOp::Subtract, rect));
    }

    /// Later operations win over earlier ones
    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.ops
            .iter()
            .rev()
            .find(|(_, rect)| rect.contains(x, y))
            .is_some_and(|(op, _)| *op == RegionOp::Add)
    }

    pub fn is_empty(&self) -> bool {
        !self.ops.iter().any(|(op, rect)| {
            *op == RegionOp::Add && rect.width > 0 && rect.height > 0
        })
    }
}

/// State applied by the last commit
#[derive(Debug, Clone)]
pub struct SurfaceState {
    pub buffer: Option<ClientBuffer>,
    pub buffer_offset: (i32, i32),
    pub damage: Vec<Rect>,
    pub buffer_damage: Vec<Rect>,
    pub buffer_scale: i32,
    pub buffer_transform: wl_output::Transform,
    pub opaque_region: Option<Region>,
    pub input_region: Option<Region>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            buffer: None,
            buffer_offset: (0, 0),
            damage: Vec::new(),
            buffer_damage: Vec::new(),
            buffer_scale: 1,
            buffer_transform: wl_output::Transform::Normal,
            opaque_region: None,
            input_region: None,
        }
    }
}

/// Double-buffered state accumulated between commits
#[derive(Debug, Default)]
struct PendingState {
    buffer: Option<Option<ClientBuffer>>,
    offset: (i32, i32),
    damage: Vec<Rect>,
    buffer_damage: Vec<Rect>,
    scale: Option<i32>,
    transform: Option<wl_output::Transform>,
    opaque_region: Option<Option<Region>>,
    input_region: Option<Option<Region>>,
    frame_callbacks: Vec<WlCallback>,
}

impl PendingState {
    /// Fold a newer pending state into this cached one
    fn absorb(&mut self, newer: PendingState) {
        if newer.buffer.is_some() {
            self.buffer = newer.buffer;
            self.offset = newer.offset;
        }
        self.damage.extend(newer.damage);
        self.buffer_damage.extend(newer.buffer_damage);
        self.scale = newer.scale.or(self.scale);
        self.transform = newer.transform.or(self.transform);
        if newer.opaque_region.is_some() {
            self.opaque_region = newer.opaque_region;
        }
        if newer.input_region.is_some() {
            self.input_region = newer.input_region;
        }
        self.frame_callbacks.extend(newer.frame_callbacks);
    }
}

/// Subsurface role state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsurfaceState {
    pub position: (i32, i32),
    pending_position: Option<(i32, i32)>,
    pub sync: bool,
}

impl Default for SubsurfaceState {
    fn default() -> Self {
        Self {
            position: (0, 0),
            pending_position: None,
            sync: true,
        }
    }
}

/// One live surface
pub struct Surface {
    id: SurfaceId,
    client: ClientId,
    protocol_id: u32,
    version: u32,
    resource: Option<WlSurface>,
    handler: Box<dyn SurfaceHandler>,
    parent: Option<SurfaceId>,
    children: Vec<SurfaceId>,
    subsurface: Option<SubsurfaceState>,
    pending: PendingState,
    cached: Option<PendingState>,
    current: SurfaceState,
    frame_callbacks: Vec<WlCallback>,
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("client", &self.client)
            .field("protocol_id", &self.protocol_id)
            .field("kind", &self.handler.kind())
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish()
    }
}

impl Surface {
    pub(crate) fn new(
        id: SurfaceId,
        client: ClientId,
        protocol_id: u32,
        version: u32,
        resource: Option<WlSurface>,
        handler: Box<dyn SurfaceHandler>,
    ) -> Self {
        Self {
            id,
            client,
            protocol_id,
            version,
            resource,
            handler,
            parent: None,
            children: Vec::new(),
            subsurface: None,
            pending: PendingState::default(),
            cached: None,
            current: SurfaceState::default(),
            frame_callbacks: Vec::new(),
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub fn protocol_id(&self) -> u32 {
        self.protocol_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn resource(&self) -> Option<&WlSurface> {
        self.resource.as_ref()
    }

    pub fn handler(&self) -> &dyn SurfaceHandler {
        self.handler.as_ref()
    }

    pub fn handler_mut(&mut self) -> &mut dyn SurfaceHandler {
        self.handler.as_mut()
    }

    pub fn parent(&self) -> Option<SurfaceId> {
        self.parent
    }

    /// Children in stacking order, bottom first
    pub fn children(&self) -> &[SurfaceId] {
        &self.children
    }

    pub fn subsurface(&self) -> Option<&SubsurfaceState> {
        self.subsurface.as_ref()
    }

    pub fn current(&self) -> &SurfaceState {
        &self.current
    }

    pub fn has_content(&self) -> bool {
        self.current.buffer.is_some()
    }

    /// Whether the surface is still reachable over the wire
    pub fn is_alive(&self) -> bool {
        self.resource.as_ref().map_or(true, |r| r.is_alive())
    }

    pub fn attach(&mut self, buffer: Option<ClientBuffer>, dx: i32, dy: i32) {
        self.pending.buffer = Some(buffer);
        self.pending.offset = (dx, dy);
    }

    pub fn damage(&mut self, rect: Rect) {
        self.pending.damage.push(rect);
    }

    pub fn damage_buffer(&mut self, rect: Rect) {
        self.pending.buffer_damage.push(rect);
    }

    pub fn set_buffer_scale(&mut self, scale: i32) {
        self.pending.scale = Some(scale);
    }

    pub fn set_buffer_transform(&mut self, transform: wl_output::Transform) {
        self.pending.transform = Some(transform);
    }

    pub fn set_opaque_region(&mut self, region: Option<Region>) {
        self.pending.opaque_region = Some(region);
    }

    pub fn set_input_region(&mut self, region: Option<Region>) {
        self.pending.input_region = Some(region);
    }

    pub(crate) fn add_frame_callback(&mut self, callback: WlCallback) {
        self.pending.frame_callbacks.push(callback);
    }

    /// Number of frame callbacks waiting for the next frame
    pub fn pending_frame_callbacks(&self) -> usize {
        self.frame_callbacks.len()
    }

    fn apply(&mut self, pending: PendingState) {
        if let Some(buffer) = pending.buffer {
            if let Some(old) = self.current.buffer.take() {
                let same = match (old.resource(), buffer.as_ref().and_then(|b| b.resource())) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };
                if !same {
                    old.release();
                }
            }
            self.current.buffer = buffer;
            self.current.buffer_offset = pending.offset;
        }
        self.current.damage = pending.damage;
        self.current.buffer_damage = pending.buffer_damage;
        if let Some(scale) = pending.scale {
            self.current.buffer_scale = scale;
        }
        if let Some(transform) = pending.transform {
            self.current.buffer_transform = transform;
        }
        if let Some(region) = pending.opaque_region {
            self.current.opaque_region = region;
        }
        if let Some(region) = pending.input_region {
            self.current.input_region = region;
        }
        self.frame_callbacks.extend(pending.frame_callbacks);
        self.handler.committed(&self.current);
    }
}

/// Flat registry of every live surface
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    surfaces: Vec<Surface>,
    next_id: u64,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id of a surface that is about to be registered
    pub(crate) fn allocate_id(&mut self) -> SurfaceId {
        self.next_id += 1;
        SurfaceId(self.next_id)
    }

    pub(crate) fn insert(&mut self, surface: Surface) {
        debug_assert!(
            !self.surfaces.iter().any(|s| s.client == surface.client
                && s.protocol_id == surface.protocol_id
                && s.is_alive()),
            "protocol id {} registered twice for one client",
            surface.protocol_id
        );
        debug!("Registered {} ({})", surface.id, surface.handler.kind());
        self.surfaces.push(surface);
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.surfaces.iter().any(|s| s.id == id)
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.iter_mut().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Surface> {
        self.surfaces.iter_mut()
    }

    /// Ids in registration order
    pub fn ids(&self) -> Vec<SurfaceId> {
        self.surfaces.iter().map(|s| s.id).collect()
    }

    pub fn for_client(&self, client: &ClientId) -> Vec<SurfaceId> {
        self.surfaces
            .iter()
            .filter(|s| s.client == *client)
            .map(|s| s.id)
            .collect()
    }

    /// Find the surface behind a client's protocol object
    pub fn find_by_protocol_id(&self, client: &ClientId, protocol_id: u32) -> Option<SurfaceId> {
        self.surfaces
            .iter()
            .find(|s| s.client == *client && s.protocol_id == protocol_id)
            .map(|s| s.id)
    }

    fn is_ancestor(&self, candidate: SurfaceId, of: SurfaceId) -> bool {
        let mut cursor = self.get(of).and_then(|s| s.parent);
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            cursor = self.get(id).and_then(|s| s.parent);
        }
        false
    }

    /// Make `child` a subsurface of `parent`, appended on top of its siblings
    pub fn link_subsurface(&mut self, child: SurfaceId, parent: SurfaceId) -> Result<()> {
        if !self.contains(parent) {
            return Err(CompositorError::UnknownSurface(parent));
        }
        let surface = self.get(child).ok_or(CompositorError::UnknownSurface(child))?;
        if surface.subsurface.is_some() {
            return Err(CompositorError::AlreadySubsurface(child));
        }
        if child == parent || self.is_ancestor(child, parent) {
            return Err(CompositorError::SubsurfaceCycle { child, parent });
        }

        if let Some(surface) = self.get_mut(child) {
            surface.parent = Some(parent);
            surface.subsurface = Some(SubsurfaceState::default());
        }
        if let Some(parent) = self.get_mut(parent) {
            parent.children.push(child);
        }
        Ok(())
    }

    /// Drop the subsurface role of `child`. Returns the former parent.
    pub fn unlink_subsurface(&mut self, child: SurfaceId) -> Option<SurfaceId> {
        let surface = self.get_mut(child)?;
        let parent = surface.parent.take();
        surface.subsurface = None;
        surface.cached = None;
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|c| *c != child);
        }
        parent
    }

    pub fn set_subsurface_position(&mut self, child: SurfaceId, x: i32, y: i32) {
        if let Some(state) = self.get_mut(child).and_then(|s| s.subsurface.as_mut()) {
            state.pending_position = Some((x, y));
        }
    }

    pub fn set_subsurface_sync(&mut self, child: SurfaceId, sync: bool) -> Result<()> {
        let surface = self.get_mut(child).ok_or(CompositorError::UnknownSurface(child))?;
        let Some(state) = surface.subsurface.as_mut() else {
            return Ok(());
        };
        state.sync = sync;
        if !sync {
            if let Some(cached) = surface.cached.take() {
                surface.apply(cached);
            }
        }
        Ok(())
    }

    /// Restack `child` directly above `sibling` (or its parent)
    pub fn place_above(&mut self, child: SurfaceId, sibling: SurfaceId) -> Result<()> {
        self.restack(child, sibling, 1)
    }

    /// Restack `child` directly below `sibling` (or its parent)
    pub fn place_below(&mut self, child: SurfaceId, sibling: SurfaceId) -> Result<()> {
        self.restack(child, sibling, 0)
    }

    fn restack(&mut self, child: SurfaceId, sibling: SurfaceId, after: usize) -> Result<()> {
        let parent_id = self
            .get(child)
            .and_then(|s| s.parent)
            .ok_or(CompositorError::UnknownSurface(child))?;
        let parent = self
            .get_mut(parent_id)
            .ok_or(CompositorError::UnknownSurface(parent_id))?;
        if sibling != parent_id && !parent.children.contains(&sibling) {
            return Err(CompositorError::UnknownSurface(sibling));
        }
        parent.children.retain(|c| *c != child);
        let index = if sibling == parent_id {
            0
        } else {
            // sibling is present: checked above
            parent.children.iter().position(|c| *c == sibling).unwrap_or(0) + after
        };
        parent.children.insert(index, child);
        Ok(())
    }

    /// Apply pending state; synchronized subsurfaces cache it until their parent commits
    pub fn commit(&mut self, id: SurfaceId) -> Result<()> {
        let surface = self.get_mut(id).ok_or(CompositorError::UnknownSurface(id))?;
        let pending = std::mem::take(&mut surface.pending);
        let synced = surface.subsurface.map_or(false, |s| s.sync) && surface.parent.is_some();
        if synced {
            match surface.cached.as_mut() {
                Some(cached) => cached.absorb(pending),
                None => surface.cached = Some(pending),
            }
            return Ok(());
        }
        surface.apply(pending);
        self.apply_children(id);
        Ok(())
    }

    fn apply_children(&mut self, parent: SurfaceId) {
        let children = match self.get(parent) {
            Some(surface) => surface.children.clone(),
            None => return,
        };
        for child in children {
            let Some(surface) = self.get_mut(child) else {
                continue;
            };
            if let Some(state) = surface.subsurface.as_mut() {
                if let Some(position) = state.pending_position.take() {
                    state.position = position;
                }
            }
            if let Some(cached) = surface.cached.take() {
                surface.apply(cached);
                self.apply_children(child);
            }
        }
    }

    /// Fire and drop every frame callback queued by a commit
    pub fn send_frame_callbacks(&mut self, time: u32) {
        for surface in &mut self.surfaces {
            for callback in surface.frame_callbacks.drain(..) {
                if callback.is_alive() {
                    callback.done(time);
                }
            }
        }
    }

    /// Remove a surface, detaching it from its parent and its children
    pub fn remove(&mut self, id: SurfaceId) -> Option<Surface> {
        let index = match self.surfaces.iter().position(|s| s.id == id) {
            Some(index) => index,
            None => {
                warn!("Tried to remove unregistered {}", id);
                return None;
            }
        };
        self.unlink_subsurface(id);
        let mut surface = self.surfaces.remove(index);
        for child in surface.children.drain(..) {
            if let Some(child) = self.get_mut(child) {
                child.parent = None;
                child.subsurface = None;
                child.cached = None;
            }
        }
        Some(surface)
    }

    /// Notify the implementation, then remove the surface
    pub(crate) fn destroy(&mut self, id: SurfaceId) -> Option<Surface> {
        self.get_mut(id)?.handler.about_to_be_destroyed();
        self.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ShmBuffer, ShmBufferView, ShmFormat};
    use crate::test_support::TestClient;
    use std::rc::Rc;

    struct Recording {
        commits: Rc<RefCell<Vec<Option<(i32, i32)>>>>,
    }

    impl SurfaceHandler for Recording {
        fn kind(&self) -> &str {
            "recording"
        }
        fn committed(&mut self, state: &SurfaceState) {
            self.commits
                .borrow_mut()
                .push(state.buffer.as_ref().map(|b| b.size()));
        }
    }

    fn register(registry: &mut SurfaceRegistry, client: &ClientId, protocol_id: u32) -> SurfaceId {
        let id = registry.allocate_id();
        registry.insert(Surface::new(
            id,
            client.clone(),
            protocol_id,
            4,
            None,
            Box::new(DefaultSurface),
        ));
        id
    }

    fn shm_buffer(width: i32, height: i32) -> ClientBuffer {
        let bytes = vec![0u8; (width * height * 4) as usize];
        let pool = crate::buffer::shm::tests::pool_with(&bytes);
        ClientBuffer::SharedMemory(ShmBuffer::from_view(ShmBufferView {
            pool,
            offset: 0,
            width,
            height,
            stride: width * 4,
            format: ShmFormat::Argb8888,
        }))
    }

    #[test]
    fn test_registry_keeps_insertion_order() {
        let client = TestClient::new();
        let mut registry = SurfaceRegistry::new();
        let a = register(&mut registry, client.id(), 3);
        let b = register(&mut registry, client.id(), 4);
        let c = register(&mut registry, client.id(), 5);
        assert_eq!(registry.ids(), vec![a, b, c]);
        assert_eq!(registry.for_client(client.id()), vec![a, b, c]);
        assert_eq!(registry.find_by_protocol_id(client.id(), 4), Some(b));
    }

    #[test]
    fn test_subsurface_links_are_ordered() {
        let client = TestClient::new();
        let mut registry = SurfaceRegistry::new();
        let parent = register(&mut registry, client.id(), 3);
        let first = register(&mut registry, client.id(), 4);
        let second = register(&mut registry, client.id(), 5);

        registry.link_subsurface(first, parent).unwrap();
        registry.link_subsurface(second, parent).unwrap();
        assert_eq!(registry.get(parent).unwrap().children(), &[first, second]);
        assert_eq!(registry.get(first).unwrap().parent(), Some(parent));

        registry.place_below(second, first).unwrap();
        assert_eq!(registry.get(parent).unwrap().children(), &[second, first]);
        registry.place_above(second, first).unwrap();
        assert_eq!(registry.get(parent).unwrap().children(), &[first, second]);
    }

    #[test]
    fn test_subsurface_errors() {
        let client = TestClient::new();
        let mut registry = SurfaceRegistry::new();
        let a = register(&mut registry, client.id(), 3);
        let b = register(&mut registry, client.id(), 4);
        let missing = registry.allocate_id();

        assert!(matches!(
            registry.link_subsurface(a, missing),
            Err(CompositorError::UnknownSurface(_))
        ));
        assert!(matches!(
            registry.link_subsurface(a, a),
            Err(CompositorError::SubsurfaceCycle { .. })
        ));
        registry.link_subsurface(b, a).unwrap();
        assert!(matches!(
            registry.link_subsurface(b, a),
            Err(CompositorError::AlreadySubsurface(_))
        ));
        assert!(matches!(
            registry.link_subsurface(a, b),
            Err(CompositorError::SubsurfaceCycle { .. })
        ));
    }

    #[test]
    fn test_remove_detaches_parent_and_children() {
        let client = TestClient::new();
        let mut registry = SurfaceRegistry::new();
        let root = register(&mut registry, client.id(), 3);
        let middle = register(&mut registry, client.id(), 4);
        let leaf = register(&mut registry, client.id(), 5);
        registry.link_subsurface(middle, root).unwrap();
        registry.link_subsurface(leaf, middle).unwrap();

        let removed = registry.remove(middle).unwrap();
        assert_eq!(removed.id(), middle);
        assert!(!registry.contains(middle));
        assert!(registry.get(root).unwrap().children().is_empty());
        assert_eq!(registry.get(leaf).unwrap().parent(), None);
        assert!(registry.get(leaf).unwrap().subsurface().is_none());
        assert!(registry.remove(middle).is_none());
    }

    #[test]
    fn test_commit_applies_pending_state() {
        let client = TestClient::new();
        let commits = Rc::new(RefCell::new(Vec::new()));
        let mut registry = SurfaceRegistry::new();
        let id = registry.allocate_id();
        registry.insert(Surface::new(
            id,
            client.id().clone(),
            3,
            4,
            None,
            Box::new(Recording {
                commits: commits.clone(),
            }),
        ));

        let surface = registry.get_mut(id).unwrap();
        surface.attach(Some(shm_buffer(4, 2)), 0, 0);
        surface.damage(Rect::new(0, 0, 4, 2));
        surface.set_buffer_scale(2);
        assert!(!surface.has_content());

        registry.commit(id).unwrap();
        let surface = registry.get(id).unwrap();
        assert!(surface.has_content());
        assert_eq!(surface.current().buffer_scale, 2);
        assert_eq!(surface.current().damage, vec![Rect::new(0, 0, 4, 2)]);

        // A commit without attach keeps the buffer but resets damage
        registry.commit(id).unwrap();
        assert!(registry.get(id).unwrap().current().damage.is_empty());
        assert_eq!(*commits.borrow(), vec![Some((4, 2)), Some((4, 2))]);
    }

    #[test]
    fn test_synced_subsurface_waits_for_parent() {
        let client = TestClient::new();
        let mut registry = SurfaceRegistry::new();
        let parent = register(&mut registry, client.id(), 3);
        let child = register(&mut registry, client.id(), 4);
        registry.link_subsurface(child, parent).unwrap();
        registry.set_subsurface_position(child, 10, 20);

        registry.get_mut(child).unwrap().attach(Some(shm_buffer(2, 2)), 0, 0);
        registry.commit(child).unwrap();
        assert!(!registry.get(child).unwrap().has_content());
        assert_eq!(registry.get(child).unwrap().subsurface().unwrap().position, (0, 0));

        registry.commit(parent).unwrap();
        let child_surface = registry.get(child).unwrap();
        assert!(child_surface.has_content());
        assert_eq!(child_surface.subsurface().unwrap().position, (10, 20));
    }

    #[test]
    fn test_desync_flushes_cached_state() {
        let client = TestClient::new();
        let mut registry = SurfaceRegistry::new();
        let parent = register(&mut registry, client.id(), 3);
        let child = register(&mut registry, client.id(), 4);
        registry.link_subsurface(child, parent).unwrap();

        registry.get_mut(child).unwrap().attach(Some(shm_buffer(2, 2)), 0, 0);
        registry.commit(child).unwrap();
        registry.set_subsurface_sync(child, false).unwrap();
        assert!(registry.get(child).unwrap().has_content());
    }

    #[test]
    fn test_region_operations() {
        let mut region = Region::new();
        assert!(region.is_empty());
        region.add(Rect::new(0, 0, 10, 10));
        region.subtract(Rect::new(2, 2, 2, 2));
        assert!(region.contains(1, 1));
        assert!(!region.contains(3, 3));
        assert!(!region.contains(10, 10));
        assert!(!region.is_empty());
    }

    #[test]
    fn test_region_near_coordinate_limit() {
        let mut region = Region::new();
        region.add(Rect::new(i32::MAX - 4, 0, 100, 100));
        assert!(region.contains(i32::MAX - 1, 1));
        assert!(!region.contains(i32::MAX - 5, 1));

        region.add(Rect::new(i32::MIN, i32::MIN, i32::MAX, 10));
        assert!(region.contains(i32::MIN, i32::MIN));
        assert!(!region.contains(-1, i32::MIN));
    }

    #[test]
    #[should_panic(expected = "already bound")]
    fn test_double_bind_panics() {
        let client = TestClient::new();
        let request = SurfaceRequest::new(client.id().clone(), 7, 4);
        request.bind(Box::new(DefaultSurface));
        request.bind(Box::new(DefaultSurface));
    }
}
