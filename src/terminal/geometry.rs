use serde::{Deserialize, Serialize};

use crate::config::TerminalSettings;

/// Pixel size of a render surface as the view measured it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceGeometry {
    pub width_px: u32,
    pub height_px: u32,
}

impl SurfaceGeometry {
    pub fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px,
            height_px,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub cols: u16,
    pub rows: u16,
}

/// Converts surface geometry into a column/row count by flooring over a
/// fixed glyph cell, never going below the configured minimum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridPolicy {
    cell_width_px: u32,
    cell_height_px: u32,
    min_cols: u16,
    min_rows: u16,
}

impl Default for GridPolicy {
    fn default() -> Self {
        Self::from_settings(&TerminalSettings::default())
    }
}

impl GridPolicy {
    pub fn from_settings(settings: &TerminalSettings) -> Self {
        Self {
            cell_width_px: settings.cell_width_px.max(1),
            cell_height_px: settings.cell_height_px.max(1),
            min_cols: settings.min_cols,
            min_rows: settings.min_rows,
        }
    }

    pub fn grid_for(&self, geometry: SurfaceGeometry) -> GridSize {
        let cols = geometry.width_px / self.cell_width_px;
        let rows = geometry.height_px / self.cell_height_px;
        GridSize {
            cols: clamp_u16(cols).max(self.min_cols),
            rows: clamp_u16(rows).max(self.min_rows),
        }
    }
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
