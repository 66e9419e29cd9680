use crate::types::Pt;
use log::warn;
use std::path::{Path, PathBuf};

/// One image positioned relative to the top-left corner of its layout block.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    pub path: PathBuf,
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
}

/// A grid row. Cell `y` values are relative to the row top.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRow {
    pub height: Pt,
    pub cells: Vec<ImagePlacement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoLayout {
    pub width: Pt,
    pub rows: Vec<PhotoRow>,
}

impl PhotoLayout {
    pub fn height(&self) -> Pt {
        self.rows.iter().map(|row| row.height).sum()
    }

    /// Placements with `y` measured from the block top.
    pub fn placements(&self) -> Vec<ImagePlacement> {
        let mut out = Vec::new();
        let mut row_top = Pt::ZERO;
        for row in &self.rows {
            for cell in &row.cells {
                out.push(ImagePlacement {
                    y: row_top + cell.y,
                    ..cell.clone()
                });
            }
            row_top += row.height;
        }
        out
    }
}

/// An image file with its native pixel size.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedImage {
    pub path: PathBuf,
    pub width_px: u32,
    pub height_px: u32,
}

impl SizedImage {
    /// Reads the header only. Unreadable files are logged and skipped.
    pub fn probe(path: &Path) -> Option<SizedImage> {
        match image::image_dimensions(path) {
            Ok((w, h)) if w > 0 && h > 0 => Some(SizedImage {
                path: path.to_path_buf(),
                width_px: w,
                height_px: h,
            }),
            Ok(_) => {
                warn!("Warning: Skipping empty image {}", path.display());
                None
            }
            Err(err) => {
                warn!("Warning: Could not process image {}: {err}", path.display());
                None
            }
        }
    }
}

/// Aspect-preserving shrink-to-fit. One pixel counts as one point, and the
/// result never exceeds the native size.
pub fn fit(width_px: u32, height_px: u32, max_width: Pt, max_height: Pt) -> (Pt, Pt) {
    if width_px == 0 || height_px == 0 {
        return (Pt::ZERO, Pt::ZERO);
    }
    let aspect = width_px as f64 / height_px as f64;
    let mut width = (max_width.to_f32() as f64).min(width_px as f64).max(0.0);
    let mut height = width / aspect;
    let max_height = (max_height.to_f32() as f64).max(0.0);
    if height > max_height {
        height = max_height;
        width = height * aspect;
    }
    (Pt::from_f32(width as f32), Pt::from_f32(height as f32))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoLayoutEngine {
    /// Horizontal gap between the two grid columns.
    pub gutter: Pt,
    pub tile_height: Pt,
    /// Kept free below a lone image so it shares the page with a caption.
    pub single_margin: Pt,
    pub cell_padding_x: Pt,
    pub cell_padding_y: Pt,
}

impl Default for PhotoLayoutEngine {
    fn default() -> Self {
        Self {
            gutter: Pt::inches(0.15),
            tile_height: Pt::inches(3.0),
            single_margin: Pt::inches(1.0),
            cell_padding_x: Pt::from_f32(2.0),
            cell_padding_y: Pt::from_f32(4.0),
        }
    }
}

impl PhotoLayoutEngine {
    /// Lays out image files, skipping any whose size cannot be read.
    pub fn layout(
        &self,
        paths: &[PathBuf],
        max_width: Pt,
        available_height: Pt,
    ) -> Option<PhotoLayout> {
        let images: Vec<SizedImage> = paths
            .iter()
            .filter_map(|path| SizedImage::probe(path))
            .collect();
        self.layout_sized(&images, max_width, available_height)
    }

    /// One image: as large as fits. Two or more: a two-column grid filled
    /// left to right, an odd last image sitting in the left cell.
    pub fn layout_sized(
        &self,
        images: &[SizedImage],
        max_width: Pt,
        available_height: Pt,
    ) -> Option<PhotoLayout> {
        match images {
            [] => None,
            [single] => {
                let max_height = (available_height - self.single_margin).max(Pt::ZERO);
                let (w, h) = fit(single.width_px, single.height_px, max_width, max_height);
                let x = (max_width - w).max(Pt::ZERO).mul_ratio(1, 2);
                Some(PhotoLayout {
                    width: max_width,
                    rows: vec![PhotoRow {
                        height: h,
                        cells: vec![ImagePlacement {
                            path: single.path.clone(),
                            x,
                            y: Pt::ZERO,
                            width: w,
                            height: h,
                        }],
                    }],
                })
            }
            _ => {
                let tile_width = (max_width - self.gutter).mul_ratio(1, 2);
                let inner_width = (tile_width - self.cell_padding_x * 2).max(Pt::ZERO);
                let rows = images
                    .chunks(2)
                    .map(|pair| {
                        let sized: Vec<(Pt, Pt)> = pair
                            .iter()
                            .map(|img| fit(img.width_px, img.height_px, inner_width, self.tile_height))
                            .collect();
                        let content_height = sized
                            .iter()
                            .fold(Pt::ZERO, |acc, (_, h)| acc.max(*h));
                        let row_height = content_height + self.cell_padding_y * 2;
                        let cells = pair
                            .iter()
                            .zip(sized)
                            .enumerate()
                            .map(|(col, (img, (w, h)))| {
                                let cell_x = (tile_width + self.gutter) * (col as i32);
                                ImagePlacement {
                                    path: img.path.clone(),
                                    x: cell_x + (tile_width - w).max(Pt::ZERO).mul_ratio(1, 2),
                                    y: (row_height - h).max(Pt::ZERO).mul_ratio(1, 2),
                                    width: w,
                                    height: h,
                                }
                            })
                            .collect();
                        PhotoRow {
                            height: row_height,
                            cells,
                        }
                    })
                    .collect();
                Some(PhotoLayout {
                    width: max_width,
                    rows,
                })
            }
        }
    }
}
