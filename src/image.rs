// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 tagdex contributors

//! Image records and their geometry
//!
//! An [`Image`] is the unit the catalog manages: a file path, optional pixel
//! dimensions, an ordered tag list and the metadata loaded from the JSON
//! sidecar (crop rectangle, markings, rating).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Axis-aligned rectangle in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
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

    /// One past the rightmost column
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// One past the bottommost row
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width.max(0) as u32, self.height.max(0) as u32)
    }

    /// Whether the two rectangles share any pixels
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Whether `other` lies entirely inside this rectangle
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    fn to_array(self) -> [i32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    fn from_array(parts: [i32; 4]) -> Self {
        Self::new(parts[0], parts[1], parts[2], parts[3])
    }
}

/// What a marking rectangle means for export masking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarkingKind {
    Hint,
    Include,
    Exclude,
}

/// A labeled rectangle produced by a detection model or drawn by hand
#[derive(Debug, Clone, PartialEq)]
pub struct Marking {
    pub label: String,
    pub kind: MarkingKind,
    pub rect: Rect,
    pub confidence: f64,
}

/// A cataloged image and its tag data
#[derive(Debug, Clone)]
pub struct Image {
    /// Filesystem location, unique key within a catalog
    pub path: PathBuf,
    /// Native pixel dimensions, `None` if the file could not be probed
    pub dimensions: Option<(u32, u32)>,
    /// Ordered tag list; order is significant and duplicates are permitted
    pub tags: Vec<String>,
    /// Crop rectangle in image pixel space; `None` means the whole image
    pub crop: Option<Rect>,
    pub markings: Vec<Marking>,
    /// Rating in `[0, 1]`
    pub rating: f64,
    /// Cached export dimensions, invalidated when the crop or the export
    /// configuration changes
    pub target_dimension: Option<(u32, u32)>,
}

impl Image {
    pub fn new(path: PathBuf, dimensions: Option<(u32, u32)>) -> Self {
        Self {
            path,
            dimensions,
            tags: Vec::new(),
            crop: None,
            markings: Vec::new(),
            rating: 0.0,
            target_dimension: None,
        }
    }

    /// The tags joined into a single caption string
    pub fn caption(&self, separator: &str) -> String {
        self.tags.join(separator)
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// The crop rectangle if set, else the full image bounds
    pub fn effective_viewport(&self) -> Option<Rect> {
        if let Some(crop) = self.crop {
            return Some(crop);
        }
        self.dimensions
            .map(|(width, height)| Rect::new(0, 0, width as i32, height as i32))
    }

    /// The dimensions exports start from: the crop size if set, else the
    /// native dimensions
    pub fn source_dimensions(&self) -> Option<(u32, u32)> {
        match self.crop {
            Some(crop) => Some(crop.size()),
            None => self.dimensions,
        }
    }
}

/// On-disk schema of the JSON metadata sidecar
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageMeta {
    pub version: u32,
    #[serde(default)]
    pub rating: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<[i32; 4]>,
    #[serde(default)]
    pub markings: Vec<MarkingMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkingMeta {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: MarkingKind,
    pub rect: [i32; 4],
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

/// Supported metadata sidecar schema version
pub const META_VERSION: u32 = 1;

impl ImageMeta {
    pub fn from_image(image: &Image) -> Self {
        Self {
            version: META_VERSION,
            rating: image.rating,
            crop: image.crop.map(Rect::to_array),
            markings: image
                .markings
                .iter()
                .map(|marking| MarkingMeta {
                    label: marking.label.clone(),
                    kind: marking.kind,
                    rect: marking.rect.to_array(),
                    confidence: marking.confidence,
                })
                .collect(),
        }
    }

    /// Apply the sidecar contents to an image record
    pub fn apply_to(self, image: &mut Image) {
        image.rating = self.rating;
        image.crop = self.crop.map(Rect::from_array);
        image.markings = self
            .markings
            .into_iter()
            .map(|meta| Marking {
                label: meta.label,
                kind: meta.kind,
                rect: Rect::from_array(meta.rect),
                confidence: meta.confidence,
            })
            .collect();
    }
}

/// The metadata sidecar path for an image path (`photo.jpg` -> `photo.json`)
pub fn meta_sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}

/// The caption sidecar path for an image path (`photo.jpg` -> `photo.txt`)
pub fn caption_sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_intersects() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 100, 100);
        let c = Rect::new(200, 200, 10, 10);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        // Touching edges share no pixels.
        let d = Rect::new(100, 0, 10, 10);
        assert!(!a.intersects(&d));
    }

    #[test]
    fn test_rect_contains() {
        let outer = Rect::new(0, 0, 100, 100);
        let inner = Rect::new(10, 10, 20, 20);
        let straddling = Rect::new(90, 90, 20, 20);
        assert!(outer.contains(&inner));
        assert!(!outer.contains(&straddling));
        assert!(outer.contains(&outer));
    }

    #[test]
    fn test_effective_viewport_prefers_crop() {
        let mut image = Image::new(PathBuf::from("a.png"), Some((640, 480)));
        assert_eq!(image.effective_viewport(), Some(Rect::new(0, 0, 640, 480)));
        image.crop = Some(Rect::new(10, 10, 100, 100));
        assert_eq!(image.effective_viewport(), Some(Rect::new(10, 10, 100, 100)));
    }

    #[test]
    fn test_meta_round_trip() {
        let mut image = Image::new(PathBuf::from("a.png"), Some((640, 480)));
        image.rating = 0.8;
        image.crop = Some(Rect::new(1, 2, 3, 4));
        image.markings.push(Marking {
            label: "face".to_string(),
            kind: MarkingKind::Include,
            rect: Rect::new(5, 6, 7, 8),
            confidence: 0.9,
        });

        let json = serde_json::to_string(&ImageMeta::from_image(&image)).unwrap();
        assert!(json.contains("\"INCLUDE\""));

        let meta: ImageMeta = serde_json::from_str(&json).unwrap();
        let mut restored = Image::new(PathBuf::from("a.png"), Some((640, 480)));
        meta.apply_to(&mut restored);
        assert_eq!(restored.rating, 0.8);
        assert_eq!(restored.crop, Some(Rect::new(1, 2, 3, 4)));
        assert_eq!(restored.markings, image.markings);
    }

    #[test]
    fn test_sidecar_paths() {
        let path = Path::new("/data/photo.jpg");
        assert_eq!(caption_sidecar_path(path), PathBuf::from("/data/photo.txt"));
        assert_eq!(meta_sidecar_path(path), PathBuf::from("/data/photo.json"));
    }
}
