//! Output/display management
//!
//! This module tracks the displays reported by the backend, their modes
//! and their position in the global layout. Each output carries the
//! damage pending redraw on it.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::compositor::damage::DamageRegion;
use crate::geometry::{Point, Rect};

/// Unique identifier for outputs
///
/// Ids are never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u64);

impl std::fmt::Display for OutputId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "output-{}", self.0)
    }
}

/// Output transform (rotation/flip)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputTransform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl OutputTransform {
    /// Convert to Wayland wl_output::transform value
    pub fn to_wayland(&self) -> u32 {
        match self {
            OutputTransform::Normal => 0,
            OutputTransform::Rotate90 => 1,
            OutputTransform::Rotate180 => 2,
            OutputTransform::Rotate270 => 3,
            OutputTransform::Flipped => 4,
            OutputTransform::Flipped90 => 5,
            OutputTransform::Flipped180 => 6,
            OutputTransform::Flipped270 => 7,
        }
    }

    /// Whether width and height swap in the layout
    pub fn swaps_axes(&self) -> bool {
        matches!(
            self,
            OutputTransform::Rotate90
                | OutputTransform::Rotate270
                | OutputTransform::Flipped90
                | OutputTransform::Flipped270
        )
    }
}

/// Output subpixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subpixel {
    #[default]
    Unknown,
    None,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
}

impl Subpixel {
    /// Convert to Wayland wl_output::subpixel value
    pub fn to_wayland(&self) -> u32 {
        match self {
            Subpixel::Unknown => 0,
            Subpixel::None => 1,
            Subpixel::HorizontalRgb => 2,
            Subpixel::HorizontalBgr => 3,
            Subpixel::VerticalRgb => 4,
            Subpixel::VerticalBgr => 5,
        }
    }
}

/// An output mode (resolution + refresh rate)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Refresh rate in mHz (e.g., 60000 for 60Hz)
    pub refresh: u32,
    /// Is this the preferred mode?
    pub preferred: bool,
}

impl OutputMode {
    pub fn new(width: i32, height: i32, refresh: u32) -> Self {
        Self {
            width,
            height,
            refresh,
            preferred: false,
        }
    }

    /// Duration of one refresh cycle
    pub fn frame_interval(&self) -> std::time::Duration {
        let refresh = self.refresh.max(1) as u64;
        std::time::Duration::from_nanos(1_000_000_000_000 / refresh)
    }
}

/// A display as discovered by the backend
#[derive(Debug, Clone, Default)]
pub struct OutputDevice {
    /// Output name (e.g., "HEADLESS-1")
    pub name: String,
    pub make: String,
    pub model: String,
    pub serial: String,
    /// Physical size in millimeters
    pub physical_width: i32,
    pub physical_height: i32,
    pub subpixel: Subpixel,
    pub transform: OutputTransform,
    /// Integer scale factor
    pub scale: i32,
    pub modes: Vec<OutputMode>,
}

/// A registered display output
#[derive(Debug)]
pub struct Output {
    /// Unique identifier
    pub id: OutputId,
    /// Output name (e.g., "eDP-1")
    pub name: String,
    /// Manufacturer name
    pub make: String,
    /// Model name
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Position in global coordinate space
    pub x: i32,
    pub y: i32,
    /// Physical size in millimeters
    pub physical_width: i32,
    pub physical_height: i32,
    /// Transform applied to output
    pub transform: OutputTransform,
    /// Subpixel layout
    pub subpixel: Subpixel,
    /// Available modes
    pub modes: Vec<OutputMode>,
    /// Current mode index
    pub current_mode: usize,
    /// Scale factor
    pub scale: i32,
    /// Damage pending redraw, output-local
    pub damage: DamageRegion,
}

impl Output {
    /// Get the current mode
    pub fn current_mode(&self) -> OutputMode {
        self.modes[self.current_mode]
    }

    /// Refresh rate of the current mode in mHz
    pub fn refresh(&self) -> u32 {
        self.current_mode().refresh
    }

    /// Size in layout coordinates
    pub fn logical_size(&self) -> (i32, i32) {
        let mode = self.current_mode();
        let (width, height) = if self.transform.swaps_axes() {
            (mode.height, mode.width)
        } else {
            (mode.width, mode.height)
        };
        let scale = self.scale.max(1);
        (width / scale, height / scale)
    }

    /// Area covered in the global layout
    pub fn layout_box(&self) -> Rect {
        let (width, height) = self.logical_size();
        Rect::new(self.x, self.y, width, height)
    }

    /// Output-local bounds
    pub fn local_bounds(&self) -> Rect {
        let (width, height) = self.logical_size();
        Rect::new(0, 0, width, height)
    }
}

/// Output registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    #[error("unknown output {0}")]
    Unknown(OutputId),
    #[error("output {0} reports no modes")]
    NoModes(String),
    #[error("output {output} has no mode {index}")]
    InvalidMode { output: OutputId, index: usize },
}

/// Registry of all outputs and their layout
#[derive(Debug)]
pub struct OutputRegistry {
    outputs: BTreeMap<OutputId, Output>,
    /// Primary output
    primary: Option<OutputId>,
    next_id: u64,
}

impl OutputRegistry {
    /// Create a new output registry
    pub fn new() -> Self {
        Self {
            outputs: BTreeMap::new(),
            primary: None,
            next_id: 1,
        }
    }

    /// Register a discovered device
    ///
    /// The output starts in its preferred mode (or the first one), to the
    /// right of the current layout, fully damaged.
    pub fn register(&mut self, device: OutputDevice) -> Result<OutputId, OutputError> {
        if device.modes.is_empty() {
            return Err(OutputError::NoModes(device.name));
        }

        let id = OutputId(self.next_id);
        self.next_id += 1;

        let current_mode = device
            .modes
            .iter()
            .position(|mode| mode.preferred)
            .unwrap_or(0);
        let x = self
            .outputs
            .values()
            .map(|output| output.layout_box().right())
            .max()
            .unwrap_or(0);

        let mut output = Output {
            id,
            name: device.name,
            make: device.make,
            model: device.model,
            serial: device.serial,
            x,
            y: 0,
            physical_width: device.physical_width,
            physical_height: device.physical_height,
            transform: device.transform,
            subpixel: device.subpixel,
            modes: device.modes,
            current_mode,
            scale: device.scale.max(1),
            damage: DamageRegion::default(),
        };
        output.damage = DamageRegion::new(output.local_bounds());
        output.damage.add_whole();

        let mode = output.current_mode();
        info!(
            "Registered output {} ({}) {}x{}@{} at {},{}",
            id, output.name, mode.width, mode.height, mode.refresh, x, 0
        );

        self.outputs.insert(id, output);
        if self.primary.is_none() {
            self.primary = Some(id);
        }
        Ok(id)
    }

    /// Remove an output from the registry and the layout
    pub fn unregister(&mut self, id: OutputId) -> Result<Output, OutputError> {
        let output = self.outputs.remove(&id).ok_or(OutputError::Unknown(id))?;
        if self.primary == Some(id) {
            self.primary = self.outputs.keys().next().copied();
        }
        info!("Unregistered output {} ({})", id, output.name);
        Ok(output)
    }

    /// Get an output by ID
    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    /// Get a mutable output by ID
    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.get_mut(&id)
    }

    fn require_mut(&mut self, id: OutputId) -> Result<&mut Output, OutputError> {
        self.outputs.get_mut(&id).ok_or(OutputError::Unknown(id))
    }

    /// Move an output in the global layout (overlap is allowed)
    pub fn set_layout_position(&mut self, id: OutputId, x: i32, y: i32) -> Result<(), OutputError> {
        let output = self.require_mut(id)?;
        output.x = x;
        output.y = y;
        output.damage.add_whole();
        debug!("Output {} moved to {},{}", id, x, y);
        Ok(())
    }

    /// Switch the current mode
    pub fn set_mode(&mut self, id: OutputId, index: usize) -> Result<(), OutputError> {
        let output = self.require_mut(id)?;
        if index >= output.modes.len() {
            return Err(OutputError::InvalidMode { output: id, index });
        }
        output.current_mode = index;
        let bounds = output.local_bounds();
        output.damage.set_bounds(bounds);
        output.damage.add_whole();
        debug!("Output {} switched to mode {}", id, index);
        Ok(())
    }

    pub fn modes_for(&self, id: OutputId) -> Result<&[OutputMode], OutputError> {
        self.outputs
            .get(&id)
            .map(|output| output.modes.as_slice())
            .ok_or(OutputError::Unknown(id))
    }

    pub fn layout_box(&self, id: OutputId) -> Result<Rect, OutputError> {
        self.outputs
            .get(&id)
            .map(Output::layout_box)
            .ok_or(OutputError::Unknown(id))
    }

    /// Output containing a global point (first registered wins on overlap)
    pub fn output_at(&self, point: Point) -> Option<OutputId> {
        self.outputs
            .values()
            .find(|output| output.layout_box().contains(point))
            .map(|output| output.id)
    }

    /// Closest point to `point` inside the layout
    pub fn closest_point(&self, point: Point) -> Option<Point> {
        const EDGE: f64 = 1.0 / 65536.0;
        self.outputs
            .values()
            .map(|output| {
                let area = output.layout_box();
                let x = point
                    .x
                    .clamp(area.x as f64, (area.right() as f64 - EDGE).max(area.x as f64));
                let y = point
                    .y
                    .clamp(area.y as f64, (area.bottom() as f64 - EDGE).max(area.y as f64));
                let distance = (x - point.x).powi(2) + (y - point.y).powi(2);
                (Point::new(x, y), distance)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(point, _)| point)
    }

    /// Damage a rectangle of the global layout on every output it covers
    pub fn add_damage(&mut self, rect: Rect) {
        for output in self.outputs.values_mut() {
            let area = output.layout_box();
            if let Some(visible) = rect.intersection(&area) {
                output.damage.add(visible.translate(area.x.saturating_neg(), area.y.saturating_neg()));
            }
        }
    }

    /// Damage a whole output
    pub fn damage_whole(&mut self, id: OutputId) -> Result<(), OutputError> {
        self.require_mut(id)?.damage.add_whole();
        Ok(())
    }

    /// Get the primary output
    pub fn primary(&self) -> Option<&Output> {
        self.primary.and_then(|id| self.outputs.get(&id))
    }

    /// Set the primary output
    pub fn set_primary(&mut self, id: OutputId) -> Result<(), OutputError> {
        if !self.outputs.contains_key(&id) {
            return Err(OutputError::Unknown(id));
        }
        self.primary = Some(id);
        Ok(())
    }

    /// Get all outputs in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    pub fn ids(&self) -> Vec<OutputId> {
        self.outputs.keys().copied().collect()
    }

    /// Get count of outputs
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl Default for OutputRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, width: i32, height: i32) -> OutputDevice {
        OutputDevice {
            name: name.to_string(),
            scale: 1,
            modes: vec![OutputMode {
                preferred: true,
                ..OutputMode::new(width, height, 60000)
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_ids_not_reused() {
        let mut registry = OutputRegistry::new();
        let first = registry.register(device("A", 100, 100)).unwrap();
        registry.unregister(first).unwrap();
        let second = registry.register(device("B", 100, 100)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_preferred_mode_and_whole_damage() {
        let mut registry = OutputRegistry::new();
        let mut dev = device("A", 1920, 1080);
        dev.modes.insert(0, OutputMode::new(1280, 720, 60000));
        let id = registry.register(dev).unwrap();

        let output = registry.get(id).unwrap();
        assert_eq!(output.current_mode().width, 1920);
        assert_eq!(output.damage.rects(), &[Rect::new(0, 0, 1920, 1080)]);
    }

    #[test]
    fn test_no_modes_rejected() {
        let mut registry = OutputRegistry::new();
        let dev = OutputDevice {
            name: "empty".to_string(),
            ..Default::default()
        };
        assert_eq!(
            registry.register(dev),
            Err(OutputError::NoModes("empty".to_string()))
        );
    }

    #[test]
    fn test_auto_layout_to_the_right() {
        let mut registry = OutputRegistry::new();
        let a = registry.register(device("A", 1920, 1080)).unwrap();
        let b = registry.register(device("B", 1280, 720)).unwrap();
        assert_eq!(registry.layout_box(a), Ok(Rect::new(0, 0, 1920, 1080)));
        assert_eq!(registry.layout_box(b), Ok(Rect::new(1920, 0, 1280, 720)));

        assert_eq!(registry.output_at(Point::new(2000.0, 10.0)), Some(b));
        assert_eq!(registry.output_at(Point::new(2000.0, 900.0)), None);
    }

    #[test]
    fn test_closest_point() {
        let mut registry = OutputRegistry::new();
        registry.register(device("A", 100, 100)).unwrap();
        let p = registry.closest_point(Point::new(-5.0, 50.0)).unwrap();
        assert_eq!(p, Point::new(0.0, 50.0));
        let p = registry.closest_point(Point::new(500.0, 500.0)).unwrap();
        assert!(p.x < 100.0 && p.x > 99.0);
        assert!(p.y < 100.0 && p.y > 99.0);
    }

    #[test]
    fn test_set_mode() {
        let mut registry = OutputRegistry::new();
        let mut dev = device("A", 1920, 1080);
        dev.modes.push(OutputMode::new(1280, 720, 59940));
        let id = registry.register(dev).unwrap();

        registry.set_mode(id, 1).unwrap();
        assert_eq!(registry.layout_box(id), Ok(Rect::new(0, 0, 1280, 720)));
        assert_eq!(
            registry.get(id).unwrap().damage.rects(),
            &[Rect::new(0, 0, 1280, 720)]
        );
        assert_eq!(
            registry.set_mode(id, 5),
            Err(OutputError::InvalidMode {
                output: id,
                index: 5
            })
        );
        assert_eq!(registry.modes_for(id).unwrap().len(), 2);
    }

    #[test]
    fn test_damage_translated_to_output() {
        let mut registry = OutputRegistry::new();
        let a = registry.register(device("A", 100, 100)).unwrap();
        let b = registry.register(device("B", 100, 100)).unwrap();
        registry.get_mut(a).unwrap().damage.clear();
        registry.get_mut(b).unwrap().damage.clear();

        registry.add_damage(Rect::new(90, 10, 20, 20));
        assert_eq!(
            registry.get(a).unwrap().damage.rects(),
            &[Rect::new(90, 10, 10, 20)]
        );
        assert_eq!(
            registry.get(b).unwrap().damage.rects(),
            &[Rect::new(0, 10, 10, 20)]
        );
    }

    #[test]
    fn test_primary_follows_removal() {
        let mut registry = OutputRegistry::new();
        let a = registry.register(device("A", 100, 100)).unwrap();
        let b = registry.register(device("B", 100, 100)).unwrap();
        assert_eq!(registry.primary().map(|o| o.id), Some(a));
        registry.unregister(a).unwrap();
        assert_eq!(registry.primary().map(|o| o.id), Some(b));
        assert_eq!(registry.unregister(a).err(), Some(OutputError::Unknown(a)));
    }

    #[test]
    fn test_rotated_layout_box() {
        let mut registry = OutputRegistry::new();
        let mut dev = device("A", 1920, 1080);
        dev.transform = OutputTransform::Rotate90;
        dev.scale = 2;
        let id = registry.register(dev).unwrap();
        assert_eq!(registry.layout_box(id), Ok(Rect::new(0, 0, 540, 960)));
    }
}
