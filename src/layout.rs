//! Window and embedded-surface geometry.
//!
//! [`compute_layout`] is pure: given the logical target size, the current
//! rotation, the host window bounds and the zoom factor it returns where the
//! worker's surface goes and whether the window should be resized. The
//! lifecycle controller owns a [`LayoutState`] and applies the result
//! through its window host.

use crate::{AppError, Result};

/// Display rotation; only right angles are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    /// 0°
    #[default]
    Deg0,
    /// 90°
    Deg90,
    /// 180°
    Deg180,
    /// 270°
    Deg270,
}

impl Rotation {
    /// Rotation in degrees.
    #[must_use]
    pub fn degrees(self) -> i64 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether width and height trade places.
    #[must_use]
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

impl TryFrom<i64> for Rotation {
    type Error = AppError;

    fn try_from(degrees: i64) -> Result<Self> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(AppError::Protocol(format!(
                "rotation ({other}deg) is not supported"
            ))),
        }
    }
}

/// Width and height in host DIPs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Size {
    /// Build a size.
    #[must_use]
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Placement of the embedded surface inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    /// Offset from the container's top edge.
    pub top: f64,
    /// Offset from the container's left edge.
    pub left: f64,
    /// Surface width.
    pub width: f64,
    /// Surface height.
    pub height: f64,
}

/// Everything [`compute_layout`] needs besides the live window state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutInput {
    /// Logical target size at rotation 0.
    pub target: Size,
    /// Current rotation.
    pub rotation: Rotation,
    /// Zoom used by the previous layout.
    pub previous_zoom: f64,
    /// Whether the window is maximized.
    pub maximized: bool,
    /// Whether this is the first layout of the window.
    pub initial: bool,
    /// Height of the title bar above the surface.
    pub chrome_height: f64,
}

/// Result of one layout pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    /// Area available to the surface.
    pub container: Size,
    /// Where the surface goes, already adjusted for the rotation transform.
    pub surface: Bounds,
    /// The window should be resized to [`window_size`](Self::window_size).
    pub resize_window: bool,
    /// Window size that fits the target exactly at the current zoom.
    pub window_size: Size,
    /// The zoom differs from the previous layout.
    pub zoom_changed: bool,
}

/// Compute the layout for `window` bounds at `zoom`.
#[must_use]
#[allow(clippy::float_cmp)] // zoom is compared for exact change, as reported by the host
pub fn compute_layout(input: &LayoutInput, window: Size, zoom: f64) -> Layout {
    let rotated = input.rotation.is_quarter_turn();
    let (target_w, target_h) = if rotated {
        (input.target.height, input.target.width)
    } else {
        (input.target.width, input.target.height)
    };
    let zoom_changed = input.previous_zoom != zoom;

    // Window bounds ignore zoom but are compared against DIPs.
    let user_w = window.width / zoom;
    let user_h = window.height / zoom - input.chrome_height;
    let too_small = user_w < target_w || user_h < target_h;

    let resize_window = zoom_changed || (!input.maximized && !input.initial && too_small);

    let user_aspect = user_w / user_h;
    let target_aspect = target_w / target_h;

    let mut surface = Bounds::default();
    if too_small {
        surface.width = input.target.width;
        surface.height = input.target.height;
    } else if user_aspect > target_aspect {
        // Pillarbox.
        surface.height = user_h;
        surface.width = (user_h * target_aspect).floor();
        surface.left = ((user_w - surface.width) / 2.0).floor();
    } else {
        // Letterbox.
        surface.height = (user_w / target_aspect).floor();
        surface.width = user_w;
        surface.top = ((user_h - surface.height) / 2.0).floor();
    }

    if rotated {
        // Recenter for the rotation transform, then swap.
        surface.top += (surface.height - surface.width) / 2.0;
        surface.left += (surface.width - surface.height) / 2.0;
        std::mem::swap(&mut surface.width, &mut surface.height);
    }

    Layout {
        container: Size::new(user_w, user_h),
        surface,
        resize_window,
        window_size: Size::new(target_w * zoom, (target_h + input.chrome_height) * zoom),
        zoom_changed,
    }
}

/// Smallest window that shows the whole target at `rotation` and `zoom`.
#[must_use]
pub fn minimum_window_size(target: Size, rotation: Rotation, chrome_height: f64, zoom: f64) -> Size {
    let (w, h) = if rotation.is_quarter_turn() {
        (target.height, target.width)
    } else {
        (target.width, target.height)
    };
    Size::new(w * zoom, (h + chrome_height) * zoom)
}

/// Layout bookkeeping owned by the lifecycle controller.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutState {
    /// Current rotation.
    pub rotation: Rotation,
    /// Zoom of the last layout.
    pub previous_zoom: f64,
    /// Last computed layout.
    pub last: Option<Layout>,
}

impl Default for LayoutState {
    fn default() -> Self {
        Self {
            rotation: Rotation::Deg0,
            previous_zoom: 1.0,
            last: None,
        }
    }
}

impl LayoutState {
    /// Run [`compute_layout`] and remember the result and zoom.
    pub fn relayout(
        &mut self,
        target: Size,
        chrome_height: f64,
        window: Size,
        zoom: f64,
        maximized: bool,
        initial: bool,
    ) -> Layout {
        let input = LayoutInput {
            target,
            rotation: self.rotation,
            previous_zoom: self.previous_zoom,
            maximized,
            initial,
            chrome_height,
        };
        let layout = compute_layout(&input, window, zoom);
        self.previous_zoom = zoom;
        self.last = Some(layout);
        layout
    }
}
