//! Anchor/Prior generation for Single Shot MultiBox Detectors (SSDs).
//!
//! Note that the implementation in this module is extremely limited and is only meant to work for
//! the palm detection network, not more general networks.

use std::ops::Index;

/// An anchor of an SSD network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    // values range from 0 to 1
    x_center: f32,
    y_center: f32,
}

impl Anchor {
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    pub fn y_center(&self) -> f32 {
        self.y_center
    }
}

/// Describes an output layer of an SSD network.
#[derive(Debug, Clone, Copy)]
pub struct LayerInfo {
    /// Number of anchors per feature map cell. Must be non-zero.
    boxes_per_cell: u32,
    /// Feature map width, in cells.
    width: u32,
    /// Feature map height, in cells.
    height: u32,
}

impl LayerInfo {
    /// Creates a new SSD layer description.
    ///
    /// # Parameters
    ///
    /// - `boxes_per_cell`: the number of boxes associated with each cell in this feature map.
    /// - `width`/`height`: size of this layer's feature map, in output cells.
    pub const fn new(boxes_per_cell: u32, width: u32, height: u32) -> Self {
        assert!(boxes_per_cell != 0);
        Self {
            boxes_per_cell,
            width,
            height,
        }
    }
}

/// The precomputed anchor list of an SSD network.
pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    /// Computes the anchors of a network with the given output layers.
    ///
    /// All boxes of a cell share the cell's center; the anchor sizes are not needed since the palm
    /// network regresses absolute box sizes.
    pub fn calculate(layers: &[LayerInfo]) -> Self {
        let mut anchors = Vec::new();

        for layer in layers {
            for y in 0..layer.height {
                for x in 0..layer.width {
                    let x_center = (x as f32 + 0.5) / layer.width as f32;
                    let y_center = (y as f32 + 0.5) / layer.height as f32;
                    anchors.extend(
                        std::iter::repeat(Anchor { x_center, y_center })
                            .take(layer.boxes_per_cell as usize),
                    );
                }
            }
        }

        Self { anchors }
    }

    /// Returns the total number of SSD anchors/priors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_layout() {
        let anchors = Anchors::calculate(&[LayerInfo::new(2, 2, 2), LayerInfo::new(1, 1, 1)]);
        assert_eq!(anchors.anchor_count(), 2 * 2 * 2 + 1);

        // Boxes of one cell are adjacent and share the center.
        assert_eq!(anchors[0], anchors[1]);
        assert_eq!(anchors[0].x_center(), 0.25);
        assert_eq!(anchors[0].y_center(), 0.25);
        assert_eq!(anchors[2].x_center(), 0.75);
        assert_eq!(anchors[2].y_center(), 0.25);
        assert_eq!(anchors[4].y_center(), 0.75);

        assert_eq!(anchors[8].x_center(), 0.5);
        assert_eq!(anchors[8].y_center(), 0.5);
    }
}
